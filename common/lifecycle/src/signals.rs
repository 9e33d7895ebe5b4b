use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::LifecycleError;

/// OS signals that trigger a coordinated shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Abort,
    Quit,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Abort => "SIGABRT",
            ShutdownSignal::Quit => "SIGQUIT",
        }
    }

    fn kind(&self) -> SignalKind {
        match self {
            ShutdownSignal::Interrupt => SignalKind::interrupt(),
            ShutdownSignal::Terminate => SignalKind::terminate(),
            // tokio has no named constructor for SIGABRT
            ShutdownSignal::Abort => SignalKind::from_raw(6),
            ShutdownSignal::Quit => SignalKind::quit(),
        }
    }

    /// Must be called from within a tokio runtime.
    pub(crate) fn install(&self) -> Result<Signal, LifecycleError> {
        signal(self.kind()).map_err(|source| LifecycleError::SignalHandler {
            signal: self.name(),
            source,
        })
    }
}
