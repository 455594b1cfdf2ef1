//! Periodic expiry sweep
//!
//! Runs [`AudioCache::sweep`] on a dedicated thread every interval until the
//! [`Sweeper`] is dropped. A panicking sweep is logged and the loop carries on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use super::AudioCache;

/// Owned handle to the sweep thread; dropping it cancels and joins
pub struct Sweeper {
    cancel_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn start(cache: Arc<AudioCache>, interval: Duration) -> std::io::Result<Self> {
        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("clipdeck-sweep".to_string())
            .spawn(move || {
                log::debug!("[SWEEP] Started, interval {:?}", interval);
                loop {
                    match cancel_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    match panic::catch_unwind(AssertUnwindSafe(|| cache.sweep())) {
                        Ok(0) => {}
                        Ok(n) => log::info!(
                            "[SWEEP] Evicted {} idle entries, {} remain",
                            n,
                            cache.len()
                        ),
                        Err(_) => log::error!("[SWEEP] Sweep panicked, continuing"),
                    }
                }
                log::debug!("[SWEEP] Stopped");
            })?;

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    /// Cancel the sweep and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
