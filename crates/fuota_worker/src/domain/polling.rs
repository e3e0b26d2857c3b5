use std::future::Future;
use std::time::Duration;

use common::domain::DomainResult;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs `tick` every `interval` until the token is cancelled.
///
/// A failing tick is logged and the loop carries on with the next one.
pub async fn run_polling_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
    mut tick: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DomainResult<usize>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(loop_name = name, ?interval, "polling loop started");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(loop_name = name, "received shutdown signal, stopping polling loop");
                break;
            }
            _ = ticker.tick() => {
                match tick().await {
                    Ok(0) => {}
                    Ok(count) => debug!(loop_name = name, count, "processed batch"),
                    Err(e) => error!(loop_name = name, error = %e, "polling iteration failed"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::DomainError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_survives_errors_and_stops_on_cancel() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = {
            let token = token.clone();
            let calls = calls.clone();
            tokio::spawn(run_polling_loop(
                "test",
                Duration::from_millis(5),
                token,
                move || {
                    let calls = calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n % 2 == 0 {
                            Err(DomainError::RepositoryError(anyhow::anyhow!("boom")))
                        } else {
                            Ok(1)
                        }
                    }
                },
            ))
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        token.cancel();

        handle.await.unwrap().unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();

        let result = run_polling_loop("test", Duration::from_secs(3600), token, || async {
            Ok(0)
        })
        .await;
        assert!(result.is_ok());
    }
}
