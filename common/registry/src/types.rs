use std::time::Duration;

use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::error::RegistryError;

/// Name of a service plus the id of this running instance of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
    instance_id: String,
}

impl ServiceIdentity {
    /// Generate a fresh identity. The instance id is `<name>-<uuid v4>`, so two
    /// process starts never share one.
    pub fn generate(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            instance_id: format!("{}-{}", name, Uuid::new_v4()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Tag used by fabio-style reverse proxies to route `/<name>` to this service.
    pub fn routing_tag(&self) -> String {
        format!("urlprefix-/{}", self.name)
    }
}

/// Where the registry (and its health checker) can reach this instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// HTTP check the registry runs against the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSpec {
    pub url: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthCheckSpec {
    pub fn http(address: &ServiceAddress, path: &str, interval: Duration, timeout: Duration) -> Self {
        Self {
            url: format!("http://{}:{}{}", address.host, address.port, path),
            interval,
            timeout,
        }
    }
}

/// Host and port of the registry agent, kept as strings since both come straight from
/// the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConnectionConfig {
    pub host: String,
    pub port: String,
}

impl Default for RegistryConnectionConfig {
    fn default() -> Self {
        Self {
            host: "consul".to_owned(),
            port: "8500".to_owned(),
        }
    }
}

impl RegistryConnectionConfig {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn base_url(&self) -> Result<Url, RegistryError> {
        let raw = format!("http://{}:{}", self.host, self.port);
        Url::parse(&raw).map_err(|error| RegistryError::InvalidAddress { address: raw, error })
    }
}

/// Body of `PUT /v1/agent/service/register`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Check")]
    pub check: AgentServiceCheck,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentServiceCheck {
    #[serde(rename = "HTTP")]
    pub http: String,
    #[serde(rename = "Interval")]
    pub interval: String,
    #[serde(rename = "Timeout")]
    pub timeout: String,
}

impl ServiceRegistration {
    pub fn new(
        identity: &ServiceIdentity,
        address: &ServiceAddress,
        health_check: &HealthCheckSpec,
    ) -> Self {
        Self {
            id: identity.instance_id().to_owned(),
            name: identity.name().to_owned(),
            address: address.host.clone(),
            port: address.port,
            tags: vec![identity.routing_tag()],
            check: AgentServiceCheck {
                http: health_check.url.clone(),
                interval: format_go_duration(health_check.interval),
                timeout: format_go_duration(health_check.timeout),
            },
        }
    }
}

/// Render a duration the way Consul parses it: whole seconds as `10s`, anything finer
/// as milliseconds.
pub fn format_go_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
