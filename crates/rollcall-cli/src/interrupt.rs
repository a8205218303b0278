//! SIGINT handling for the capture loop.
//!
//! Raw mode turns Ctrl-C into a key event, but when stdin is not a terminal the
//! signal arrives as SIGINT. The handler only raises a flag; the capture loop
//! checks it and leaves through the normal exit path.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Raised once an interrupt has been received.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Wait for Ctrl-C on a background thread and raise the flag when it comes.
    ///
    /// A second Ctrl-C exits immediately, for a capture loop stuck on the camera.
    pub fn listen_for_ctrl_c(&self) -> io::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let flag = self.clone();

        std::thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                        return;
                    }
                    tracing::info!("interrupt received, stopping");
                    flag.raise();

                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("second interrupt, exiting now");
                        std::process::exit(130);
                    }
                })
            })?;
        Ok(())
    }
}
