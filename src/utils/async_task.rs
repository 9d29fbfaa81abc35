use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Run a fallible async operation with per-attempt timeout and exponential
/// backoff between attempts.
///
/// `policy.max_retries == 0` means retry without bound; the only exits are
/// success or cancellation. Delays are jittered to avoid thundering herds of
/// reconnecting watchers.
pub(crate) async fn retry_with_backoff<F, T, P>(
    op_name: &str,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    task: F,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<P>>,
{
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut attempts = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        let error = match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(error)) => {
                warn!(op = op_name, attempt = attempts, "attempt failed: {:?}", error);
                error
            }
            Err(_) => {
                warn!(
                    op = op_name,
                    attempt = attempts,
                    "attempt timed out after {:?}",
                    timeout_duration
                );
                Error::Fatal(format!("{op_name}: attempt timed out"))
            }
        };

        attempts += 1;
        if policy.max_retries > 0 && attempts >= policy.max_retries {
            warn!(op = op_name, "giving up after {} attempts", attempts);
            return Err(error);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Stopped),
            _ = sleep(with_jitter(delay)) => {}
        }
        delay = std::cmp::min(delay * 2, max_delay);
    }
}

/// Randomize a delay to 50%..150% of its nominal value.
fn with_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis().max(1) as u64;
    let jittered = rand::thread_rng().gen_range(millis / 2..=millis + millis / 2);
    Duration::from_millis(jittered)
}
