//! Ctrl+C and SIGTERM turn into a cancelled token; the run drains and the
//! process exits with `128 + signal`.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SIGINT: i32 = 2;
#[cfg(unix)]
const SIGTERM: i32 = 15;

#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    signal: Arc<AtomicI32>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Records the first signal and cancels the token.
    pub fn trigger(&self, signal: i32) {
        let _ = self
            .signal
            .compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Conventional exit status for the received signal, 130 when unknown.
    pub fn exit_code(&self) -> i32 {
        match self.signal.load(Ordering::SeqCst) {
            0 => 128 + SIGINT,
            signal => 128 + signal,
        }
    }

    pub fn install_signal_handlers(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received Ctrl+C, draining before exit");
                shutdown.trigger(SIGINT);
            }
        });

        #[cfg(unix)]
        {
            let shutdown = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    info!("Received SIGTERM, draining before exit");
                    shutdown.trigger(SIGTERM);
                }
            });
        }
    }
}
