//! Restart-on-failure supervision for background loops

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::Result;

/// Run `make_loop` until `cancellation_token` fires.
///
/// Each run is spawned as its own task. A run that returns an error or panics
/// is logged at error level and started again after `restart_delay`. A run
/// that returns `Ok` ends supervision.
pub async fn supervise<F, Fut>(
    name: &'static str,
    restart_delay: Duration,
    cancellation_token: CancellationToken,
    make_loop: F,
) where
    F: Fn(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let run = tokio::spawn(make_loop(cancellation_token.clone()));

        match run.await {
            Ok(Ok(())) => {
                debug!("{} loop exited", name);
                return;
            }
            Ok(Err(e)) => error!("{} loop failed: {}", name, e),
            Err(e) => error!("{} loop panicked: {}", name, e),
        }

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {
                debug!("Restarting {} loop", name);
            }
            _ = cancellation_token.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_failed_loop_is_restarted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let counter = runs.clone();
        let handle = tokio::spawn(supervise("test", Duration::from_secs(1), token.clone(), move |_| {
            let counter = counter.clone();
            async move {
                let run = counter.fetch_add(1, Ordering::SeqCst);
                match run {
                    0 => Err(Error::Task("boom".to_string())),
                    1 => panic!("loop panicked"),
                    _ => Ok(()),
                }
            }
        }));

        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_restarts() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let counter = runs.clone();
        let handle = tokio::spawn(supervise("test", Duration::from_secs(60), token.clone(), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Task("always".to_string()))
            }
        }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
