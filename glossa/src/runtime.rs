//! Background-sweep plumbing: a shutdown token and a fixed-delay spawner
//! with exception isolation, so one bad tick never stops a schedule.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Token for signaling graceful shutdown to background sweeps.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug, Default)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Spawn a background sweep that fires `tick` at a fixed delay.
///
/// The first tick runs after `initial_delay`; each subsequent tick runs
/// `interval` after the previous one finished. Tick errors are logged and
/// swallowed so the schedule keeps going.
pub fn spawn_fixed_delay<F, Fut>(
    name: &'static str,
    initial_delay: Duration,
    interval: Duration,
    shutdown: ShutdownToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    tokio::spawn(async move {
        if !initial_delay.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }
        }

        loop {
            if let Err(err) = tick().await {
                tracing::warn!(sweep = name, "sweep tick failed: {err:#}");
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(sweep = name, "sweep shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn shutdown_token_wakes_waiters() {
        let token = ShutdownToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn sweep_survives_tick_errors() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let shutdown = ShutdownToken::new();

        let handle = spawn_fixed_delay(
            "test_sweep",
            Duration::ZERO,
            Duration::from_millis(5),
            shutdown.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("tick failure")
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
