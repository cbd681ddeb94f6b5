use std::time::Duration;

use envconfig::Envconfig;
use registry_client::{RegistryConnectionConfig, RetryPolicy};

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "SERVICE_NAME", default = "go-service")]
    pub service_name: String,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "30012")]
    pub port: u16,

    // Advertised to the registry instead of the local hostname when set
    #[envconfig(from = "ADVERTISE_HOST")]
    pub advertise_host: Option<String>,

    #[envconfig(from = "REGISTRY_HOST", default = "consul")]
    pub registry_host: String,

    #[envconfig(from = "REGISTRY_PORT", default = "8500")]
    pub registry_port: String,

    #[envconfig(from = "HEALTH_CHECK_INTERVAL_SECS", default = "10")]
    pub health_check_interval_secs: u64,

    #[envconfig(from = "HEALTH_CHECK_TIMEOUT_SECS", default = "5")]
    pub health_check_timeout_secs: u64,

    #[envconfig(from = "REGISTRATION_MAX_ATTEMPTS", default = "1")]
    pub registration_max_attempts: u32,

    #[envconfig(from = "REGISTRATION_RETRY_INTERVAL_MS", default = "1000")]
    pub registration_retry_interval_ms: u64,

    #[envconfig(from = "SHUTDOWN_GRACE_SECS", default = "5")]
    pub shutdown_grace_secs: u64,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "false")]
    pub export_prometheus: bool,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn registry(&self) -> RegistryConnectionConfig {
        RegistryConnectionConfig::new(&self.registry_host, &self.registry_port)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn registration_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::build(
            self.registration_max_attempts,
            Duration::from_millis(self.registration_retry_interval_ms),
        )
        .maximum_interval(Duration::from_secs(30))
        .provide()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
