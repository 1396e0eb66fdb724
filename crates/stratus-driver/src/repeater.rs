//! Periodic task runner.
//!
//! One worker runs the task at a fixed interval until stopped. Two ticks
//! never overlap: a tick that runs longer than the interval is followed by
//! exactly one immediate rerun, never a catch-up burst.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::Context;

pub(crate) struct Repeater {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Repeater {
    /// Starts the worker. Each tick receives a fresh [`Context`] derived
    /// from the repeater's lifetime; stopping cancels it.
    pub(crate) fn spawn<F, Fut>(interval: Duration, mut task: F) -> Self
    where
        F: FnMut(Context) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut next = tokio::time::Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = worker_cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(next) => {}
                }
                task(Context::with_token(worker_cancel.child_token())).await;

                // Late completion reruns once, immediately; the schedule
                // then restarts from now instead of bursting to catch up.
                let now = tokio::time::Instant::now();
                next = std::cmp::max(next + interval, now);
            }
        });
        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signals the worker and joins it. A tick in progress observes its
    /// context being cancelled and is awaited, not aborted.
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
