use tokio::signal::unix::{signal, Signal, SignalKind};

/// Handlers for the two signals that stop the service.
pub struct ShutdownSignals {
    interrupt: Signal,
    term: Signal,
}

impl ShutdownSignals {
    /// Errors only if a handler can't be installed.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            term: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves on the first SIGINT or SIGTERM.
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => tracing::info!("received SIGINT"),
            _ = self.term.recv() => tracing::info!("received SIGTERM"),
        }
    }
}
