//! Long-poll wait for the backend's write index
//!
//! A request blocks until the backend index reaches a target or a timeout
//! elapses. The poller runs on its own task and signals completion through a
//! single-fire channel; it observes the same deadline as the waiting side
//! and also exits as soon as nobody is listening, so an abandoned wait never
//! polls forever.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

use crate::backend::Backend;

/// The wait elapsed before the backend index reached the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimedOut;

/// Block until `backend.index() >= target`, polling every `poll_interval`.
/// `timeout_after: None` waits without bound.
pub async fn wait_for_index(
    backend: Arc<dyn Backend>,
    target: u64,
    timeout_after: Option<Duration>,
    poll_interval: Duration,
) -> Result<(), WaitTimedOut> {
    let (tx, rx) = oneshot::channel();
    let deadline = timeout_after.map(|d| Instant::now() + d);

    tokio::spawn(async move {
        loop {
            if tx.is_closed() {
                return;
            }
            if backend.index() >= target {
                let _ = tx.send(());
                return;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return;
                }
            }
            sleep(poll_interval).await;
        }
    });

    let received = match timeout_after {
        Some(d) => match timeout(d, rx).await {
            Ok(result) => result,
            Err(_) => return Err(WaitTimedOut),
        },
        None => rx.await,
    };

    // A dropped sender means the poller hit the deadline first.
    received.map_err(|_| WaitTimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn poll() -> Duration {
        Duration::from_millis(1)
    }

    #[tokio::test]
    async fn test_immediate_when_index_already_reached() {
        let backend = Arc::new(MemoryBackend::new(false));
        backend.advance_index();

        let result = wait_for_index(backend, 1, Some(Duration::from_millis(50)), poll()).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_times_out_when_index_never_reached() {
        let backend = Arc::new(MemoryBackend::new(false));

        let result = wait_for_index(backend, 2, Some(Duration::from_millis(20)), poll()).await;
        assert_eq!(result, Err(WaitTimedOut));
    }

    #[tokio::test]
    async fn test_wakes_when_index_advances() {
        let backend = Arc::new(MemoryBackend::new(false));

        let advancer = backend.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            advancer.advance_index();
            advancer.advance_index();
        });

        let result =
            wait_for_index(backend, 2, Some(Duration::from_millis(500)), poll()).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_unbounded_wait_completes() {
        let backend = Arc::new(MemoryBackend::new(false));

        let advancer = backend.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(5)).await;
            advancer.advance_index();
        });

        let result = wait_for_index(backend, 1, None, poll()).await;
        assert_eq!(result, Ok(()));
    }
}
