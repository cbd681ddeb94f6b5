//! Process lifecycle: register, serve, wait for shutdown, deregister.
//!
//! ```text
//! Starting -> Registered -> Serving -> ShuttingDown -> Deregistered -> Terminated
//! ```
//!
//! A registration or bind failure ends in `Failed` instead. A shutdown requested while
//! registration is still being attempted skips `Registered` and `Serving`, the
//! instance never binds.
//!
//! The coordinator never exits the process itself. Startup failures come back as
//! [`StartupError`], shutdown problems are logged and collected in the
//! [`ShutdownReport`], and `main` decides the exit status.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use registry_client::{
    register_with_retry, HealthCheckSpec, RegistrationOutcome, RegistryClient, RegistryError,
    ServiceAddress, ServiceIdentity,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::identity;
use crate::router::{self, AppState};
use crate::server;

pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Registered,
    Serving,
    ShuttingDown,
    Deregistered,
    Terminated,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Registered => "registered",
            Phase::Serving => "serving",
            Phase::ShuttingDown => "shutting_down",
            Phase::Deregistered => "deregistered",
            Phase::Terminated => "terminated",
            Phase::Failed => "failed",
        }
    }
}

/// Published on every transition. `local_addr` is set once the listener is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleState {
    pub phase: Phase,
    pub local_addr: Option<SocketAddr>,
}

/// Failures that abort startup. The process should exit non-zero on any of them.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("failed to create registry client: {0}")]
    RegistryClient(#[source] RegistryError),
    #[error("failed to register {instance_id} after {attempts} attempt(s): {source}")]
    Registration {
        instance_id: String,
        attempts: u32,
        source: RegistryError,
    },
    #[error("failed to bind http listener on {bind}: {source}")]
    Bind {
        bind: String,
        source: std::io::Error,
    },
}

/// Problems met while shutting down. Logged, never change the exit status on their own.
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("failed to deregister {instance_id}: {source}")]
    Deregistration {
        instance_id: String,
        source: RegistryError,
    },
    #[error("http listener failed: {0}")]
    Listener(#[source] std::io::Error),
    #[error("http listener task did not complete: {0}")]
    ListenerTask(#[source] tokio::task::JoinError),
    #[error("in-flight requests still running after {0:?}")]
    DrainTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The shutdown token was cancelled, normally by SIGINT or SIGTERM.
    Signal,
    /// The http listener stopped by itself while serving.
    ListenerExited,
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub instance_id: String,
    pub trigger: ShutdownTrigger,
    pub errors: Vec<ShutdownError>,
}

impl ShutdownReport {
    /// Whether the process should exit zero. Shutdown errors are only logged, a listener
    /// that stopped on its own is not.
    pub fn is_clean_exit(&self) -> bool {
        self.trigger == ShutdownTrigger::Signal
    }
}

pub struct Coordinator<R> {
    config: Config,
    registry: R,
    identity: ServiceIdentity,
    address: ServiceAddress,
    metrics: Option<PrometheusHandle>,
    listener_token: CancellationToken,
    state: watch::Sender<LifecycleState>,
}

impl<R: RegistryClient> Coordinator<R> {
    /// Resolve a fresh identity and the advertised address for this process.
    pub fn new(config: Config, registry: R) -> Self {
        let (identity, address) = identity::resolve(&config);
        Self::with_identity(config, registry, identity, address)
    }

    pub fn with_identity(
        config: Config,
        registry: R,
        identity: ServiceIdentity,
        address: ServiceAddress,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState {
            phase: Phase::Starting,
            local_addr: None,
        });
        info!(
            instance_id = identity.instance_id(),
            host = %address.host,
            port = address.port,
            "starting {}",
            identity.name()
        );

        Self {
            config,
            registry,
            identity,
            address,
            metrics: None,
            listener_token: CancellationToken::new(),
            state,
        }
    }

    /// Expose the given recorder on `/metrics`.
    pub fn with_metrics(mut self, recorder_handle: PrometheusHandle) -> Self {
        self.metrics = Some(recorder_handle);
        self
    }

    /// Stop the http listener through `token` instead of an internal one. Cancelling it
    /// while serving is treated like the listener exiting by itself.
    pub fn with_listener_token(mut self, token: CancellationToken) -> Self {
        self.listener_token = token;
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn health_check(&self) -> HealthCheckSpec {
        HealthCheckSpec::http(
            &self.address,
            HEALTH_PATH,
            self.config.health_check_interval(),
            self.config.health_check_timeout(),
        )
    }

    fn transition(&self, phase: Phase, local_addr: Option<SocketAddr>) {
        self.state.send_modify(|state| {
            state.phase = phase;
            if local_addr.is_some() {
                state.local_addr = local_addr;
            }
        });
        metrics::counter!("lifecycle_transitions_total", "phase" => phase.as_str()).increment(1);
        info!(
            instance_id = self.identity.instance_id(),
            phase = phase.as_str(),
            "lifecycle transition"
        );
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), ShutdownError> {
        match self.registry.deregister(instance_id).await {
            Ok(()) => {
                info!(
                    instance_id = %instance_id,
                    "Service {} deregistered from registry",
                    instance_id
                );
                Ok(())
            }
            Err(source) => Err(ShutdownError::Deregistration {
                instance_id: instance_id.to_owned(),
                source,
            }),
        }
    }

    fn finish(
        &self,
        instance_id: String,
        trigger: ShutdownTrigger,
        errors: Vec<ShutdownError>,
    ) -> ShutdownReport {
        for e in &errors {
            warn!(instance_id = %instance_id, "{}", e);
        }
        self.transition(Phase::Terminated, None);

        ShutdownReport {
            instance_id,
            trigger,
            errors,
        }
    }

    /// Shut down before the listener was ever bound. `deregister` is set when the
    /// registry may hold the instance.
    async fn abandon_startup(&self, instance_id: String, deregister: bool) -> ShutdownReport {
        self.transition(Phase::ShuttingDown, None);
        let mut errors = Vec::new();
        if deregister {
            if let Err(e) = self.deregister(&instance_id).await {
                errors.push(e);
            }
            self.transition(Phase::Deregistered, None);
        }
        self.finish(instance_id, ShutdownTrigger::Signal, errors)
    }

    /// Run the whole lifecycle. Returns once `shutdown` is cancelled (or the listener
    /// dies) and the instance has been deregistered.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ShutdownReport, StartupError> {
        let instance_id = self.identity.instance_id().to_owned();
        let health_check = self.health_check();
        let policy = self.config.registration_retry_policy();

        let outcome = register_with_retry(
            &self.registry,
            &self.identity,
            &self.address,
            &health_check,
            &policy,
            &shutdown,
        )
        .await;
        match outcome {
            Ok(RegistrationOutcome::Registered { attempts }) => info!(
                instance_id = %instance_id,
                attempts,
                health_check = %health_check.url,
                "Service {} registered with registry",
                instance_id
            ),
            Ok(RegistrationOutcome::Cancelled {
                attempts,
                in_flight,
            }) => {
                info!(
                    instance_id = %instance_id,
                    attempts,
                    "shutdown requested before registration completed"
                );
                return Ok(self.abandon_startup(instance_id, in_flight).await);
            }
            Err(source) => {
                self.transition(Phase::Failed, None);
                return Err(StartupError::Registration {
                    instance_id,
                    attempts: policy.max_attempts,
                    source,
                });
            }
        }
        self.transition(Phase::Registered, None);

        if shutdown.is_cancelled() {
            return Ok(self.abandon_startup(instance_id, true).await);
        }

        let bind = self.config.bind();
        let listener = match TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(source) => {
                // Nothing will answer the health check, leave before giving up
                if let Err(e) = self.deregister(&instance_id).await {
                    warn!(instance_id = %instance_id, "after bind failure: {}", e);
                }
                self.transition(Phase::Failed, None);
                return Err(StartupError::Bind { bind, source });
            }
        };
        let local_addr = listener.local_addr().ok();

        let app = router::router(
            AppState::new(self.identity.name(), &self.address.host),
            self.metrics.clone(),
        );
        let listener_token = self.listener_token.clone();
        let mut server = tokio::spawn(server::serve(app, listener, listener_token.clone()));
        self.transition(Phase::Serving, local_addr);

        let mut errors = Vec::new();
        let trigger = tokio::select! {
            _ = shutdown.cancelled() => ShutdownTrigger::Signal,
            result = &mut server => {
                match result {
                    Ok(Ok(())) => error!("http listener exited while serving"),
                    Ok(Err(e)) => errors.push(ShutdownError::Listener(e)),
                    Err(e) => errors.push(ShutdownError::ListenerTask(e)),
                }
                ShutdownTrigger::ListenerExited
            }
        };
        self.transition(Phase::ShuttingDown, None);

        if let Err(e) = self.deregister(&instance_id).await {
            errors.push(e);
        }
        self.transition(Phase::Deregistered, None);

        if trigger == ShutdownTrigger::Signal {
            // Only stop accepting once the registry no longer routes to us
            listener_token.cancel();
            let grace = self.config.shutdown_grace();
            match tokio::time::timeout(grace, &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => errors.push(ShutdownError::Listener(e)),
                Ok(Err(e)) => errors.push(ShutdownError::ListenerTask(e)),
                Err(_) => {
                    server.abort();
                    errors.push(ShutdownError::DrainTimeout(grace));
                }
            }
        }

        Ok(self.finish(instance_id, trigger, errors))
    }
}
