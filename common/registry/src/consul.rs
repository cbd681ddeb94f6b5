use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::RegistryError;
use crate::types::{
    HealthCheckSpec, RegistryConnectionConfig, ServiceAddress, ServiceIdentity,
    ServiceRegistration,
};
use crate::RegistryClient;

/// `RegistryClient` backed by the Consul agent HTTP API.
///
/// The target agent is resolved once at construction. Requests carry no timeout beyond
/// the transport defaults and are never retried here.
#[derive(Clone, Debug)]
pub struct ConsulClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ConsulClient {
    pub fn new(config: &RegistryConnectionConfig) -> Result<Self, RegistryError> {
        let base_url = config.base_url()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(RegistryError::Client)?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidAddress {
                address: self.base_url.to_string(),
                error: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<(), RegistryError> {
        let result = match request.send().await {
            Err(error) => Err(RegistryError::Unreachable(error)),
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(RegistryError::Rejected {
                    operation,
                    status,
                    body,
                })
            }
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(RegistryError::Rejected { status, .. })
                if *status == StatusCode::NOT_FOUND =>
            {
                "not_found"
            }
            Err(RegistryError::Rejected { .. }) => "rejected",
            Err(_) => "unreachable",
        };
        metrics::counter!(
            "registry_requests_total",
            "operation" => operation,
            "outcome" => outcome
        )
        .increment(1);

        result
    }
}

#[async_trait]
impl RegistryClient for ConsulClient {
    async fn register(
        &self,
        identity: &ServiceIdentity,
        address: &ServiceAddress,
        health_check: &HealthCheckSpec,
    ) -> Result<(), RegistryError> {
        let url = self.endpoint(&["v1", "agent", "service", "register"])?;
        let registration = ServiceRegistration::new(identity, address, health_check);
        debug!(%url, instance_id = identity.instance_id(), "registering service");

        self.send("register", self.client.put(url).json(&registration))
            .await
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", instance_id])?;
        debug!(%url, instance_id, "deregistering service");

        self.send("deregister", self.client.put(url)).await
    }
}
