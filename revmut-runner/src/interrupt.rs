use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Whether the running operation should stop, because of Ctrl-C or a
/// deadline.
#[derive(Clone, Debug, Default)]
pub struct InterruptState {
    token: CancellationToken,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interrupted(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token to hand to client operations.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Interrupt after `timeout`. Must be called within a tokio runtime.
    pub fn interrupt_after(&self, timeout: Duration) {
        let state = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = state.token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    info!(?timeout, "deadline reached, cancelling");
                    state.set_interrupted();
                }
            }
        });
    }
}

fn set_process_interrupt_handler(interrupted: &InterruptState) -> Result<()> {
    let interrupted = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted.set_interrupted();
    })
    .context("Error setting interrupt handler")
}

pub fn set_up_process_interrupt_handler() -> Result<InterruptState> {
    let interrupt_state = InterruptState::new();
    set_process_interrupt_handler(&interrupt_state)?;
    Ok(interrupt_state)
}
