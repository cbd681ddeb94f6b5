//! Client side of service-discovery registration.
//!
//! A service describes itself with a [`ServiceIdentity`], a [`ServiceAddress`] and a
//! [`HealthCheckSpec`], and hands them to a [`RegistryClient`]. [`ConsulClient`] talks
//! to the Consul agent HTTP API; tests can substitute any other implementation.

mod consul;
mod error;
mod retry;
mod types;

use async_trait::async_trait;

pub use consul::ConsulClient;
pub use error::RegistryError;
pub use retry::{register_with_retry, RegistrationOutcome, RetryPolicy, RetryPolicyBuilder};
pub use types::{
    format_go_duration, AgentServiceCheck, HealthCheckSpec, RegistryConnectionConfig,
    ServiceAddress, ServiceIdentity, ServiceRegistration,
};

/// Registration and deregistration against an external service-discovery registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Register the instance, its routing tag and its health check.
    async fn register(
        &self,
        identity: &ServiceIdentity,
        address: &ServiceAddress,
        health_check: &HealthCheckSpec,
    ) -> Result<(), RegistryError>;

    /// Remove the instance registered under `instance_id`.
    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError>;
}

#[async_trait]
impl<T: RegistryClient + ?Sized> RegistryClient for std::sync::Arc<T> {
    async fn register(
        &self,
        identity: &ServiceIdentity,
        address: &ServiceAddress,
        health_check: &HealthCheckSpec,
    ) -> Result<(), RegistryError> {
        (**self).register(identity, address, health_check).await
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        (**self).deregister(instance_id).await
    }
}
