#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hello_service::config::Config;
use hello_service::lifecycle::{
    Coordinator, LifecycleState, Phase, ShutdownReport, StartupError,
};
use registry_client::{
    HealthCheckSpec, RegistryClient, RegistryError, ServiceAddress, ServiceIdentity,
};

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| Config {
    service_name: "go-service".to_string(),
    host: "127.0.0.1".to_string(),
    port: 0, // Let the OS pick, the advertised port comes from the identity fixture
    advertise_host: Some("box-1".to_string()),
    registry_host: "127.0.0.1".to_string(),
    registry_port: "9".to_string(),
    health_check_interval_secs: 10,
    health_check_timeout_secs: 5,
    registration_max_attempts: 1,
    registration_retry_interval_ms: 10,
    shutdown_grace_secs: 5,
    export_prometheus: false,
});

static TRACING_INIT: Once = Once::new();
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .init()
    });
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    Register {
        instance_id: String,
        name: String,
        address: ServiceAddress,
        health_check: HealthCheckSpec,
    },
    Deregister(String),
}

/// In-memory registry recording every call it receives.
#[derive(Default)]
pub struct RecordingRegistry {
    calls: Mutex<Vec<RegistryCall>>,
    failing_registrations: AtomicU32,
    failing_deregistration: AtomicBool,
    stalled_registration: AtomicBool,
}

impl RecordingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rejects the first `n` registrations.
    pub fn failing_registrations(n: u32) -> Arc<Self> {
        let registry = Self::default();
        registry.failing_registrations.store(n, Ordering::SeqCst);
        Arc::new(registry)
    }

    pub fn failing_deregistration() -> Arc<Self> {
        let registry = Self::default();
        registry.failing_deregistration.store(true, Ordering::SeqCst);
        Arc::new(registry)
    }

    /// Records registrations but never answers them.
    pub fn stalled_registration() -> Arc<Self> {
        let registry = Self::default();
        registry.stalled_registration.store(true, Ordering::SeqCst);
        Arc::new(registry)
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RegistryCall::Register { .. }))
            .count()
    }

    pub fn deregistrations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RegistryCall::Deregister(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

fn unavailable(operation: &'static str) -> RegistryError {
    RegistryError::Rejected {
        operation,
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: "No cluster leader".to_string(),
    }
}

#[async_trait]
impl RegistryClient for RecordingRegistry {
    async fn register(
        &self,
        identity: &ServiceIdentity,
        address: &ServiceAddress,
        health_check: &HealthCheckSpec,
    ) -> Result<(), RegistryError> {
        self.calls.lock().unwrap().push(RegistryCall::Register {
            instance_id: identity.instance_id().to_string(),
            name: identity.name().to_string(),
            address: address.clone(),
            health_check: health_check.clone(),
        });

        if self.stalled_registration.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        let remaining = self.failing_registrations.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_registrations
                .store(remaining - 1, Ordering::SeqCst);
            return Err(unavailable("register"));
        }
        Ok(())
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push(RegistryCall::Deregister(instance_id.to_string()));

        if self.failing_deregistration.load(Ordering::SeqCst) {
            return Err(unavailable("deregister"));
        }
        Ok(())
    }
}

pub fn fixture_identity() -> (ServiceIdentity, ServiceAddress) {
    (
        ServiceIdentity::generate("go-service"),
        ServiceAddress::new("box-1", 30012),
    )
}

/// A coordinator running on its own task.
pub struct ServiceHandle {
    pub instance_id: String,
    pub state: watch::Receiver<LifecycleState>,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<Result<ShutdownReport, StartupError>>,
}

impl ServiceHandle {
    pub fn spawn<R: RegistryClient + 'static>(config: Config, registry: R) -> Self {
        Self::spawn_with(config, registry, |coordinator| coordinator)
    }

    /// Like `spawn`, with a chance to configure the coordinator before it runs.
    pub fn spawn_with<R, F>(config: Config, registry: R, configure: F) -> Self
    where
        R: RegistryClient + 'static,
        F: FnOnce(Coordinator<R>) -> Coordinator<R>,
    {
        setup_tracing();
        let (identity, address) = fixture_identity();
        let coordinator = configure(Coordinator::with_identity(
            config, registry, identity, address,
        ));

        let instance_id = coordinator.identity().instance_id().to_string();
        let state = coordinator.subscribe();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(shutdown.clone()));

        Self {
            instance_id,
            state,
            shutdown,
            task,
        }
    }

    /// Wait until the listener is up (or startup failed) and return the current state.
    pub async fn started(&mut self) -> LifecycleState {
        *self
            .state
            .wait_for(|s| s.phase == Phase::Serving || s.phase == Phase::Failed)
            .await
            .expect("coordinator dropped its state before starting")
    }

    pub async fn local_addr(&mut self) -> SocketAddr {
        let state = self.started().await;
        assert_eq!(state.phase, Phase::Serving);
        state.local_addr.expect("serving without a bound address")
    }

    pub async fn url(&mut self, path: &str) -> String {
        format!("http://{}{}", self.local_addr().await, path)
    }

    /// Wait for the coordinator to finish on its own.
    pub async fn finished(self) -> ShutdownReport {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.task)
            .await
            .expect("coordinator did not finish in time")
            .expect("coordinator task panicked")
            .expect("coordinator failed to start")
    }

    pub async fn stop(self) -> ShutdownReport {
        self.shutdown.cancel();
        self.task
            .await
            .expect("coordinator task panicked")
            .expect("coordinator failed to start")
    }
}
