//! Connection establishment with bounded exponential backoff.
//!
//! Every attempt gets a fresh session from the [`TransportFactory`]; a session that
//! failed to connect is closed and dropped, never reused. An optional deadline
//! bounds both the connect calls and the backoff sleeps.

use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::contract::{TransportConfig, TransportFactory, TransportSession};
use crate::error::{ConnectionError, SyncError, TimeoutError};

/// Connect a new session, retrying per `policy`.
///
/// Fails with [`SyncError::Connection`] after `policy.max_attempts` failures, or
/// with [`SyncError::Timeout`] as soon as `deadline` passes.
pub async fn establish(
    factory: &dyn TransportFactory,
    config: &TransportConfig,
    policy: &RetryPolicy,
    deadline: Option<Instant>,
) -> Result<Box<dyn TransportSession>, SyncError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let mut session = factory.create();
        let outcome = match deadline {
            Some(at) => {
                let bounded = timeout_at(at, session.connect(config)).await;
                match bounded {
                    Ok(result) => result,
                    Err(_) => {
                        close_quietly(session.as_mut()).await;
                        warn!(host = %config.host, attempt, "[CONNECT] Deadline passed while connecting");
                        return Err(timeout("connect"));
                    }
                }
            }
            None => session.connect(config).await,
        };

        match outcome {
            Ok(()) => {
                info!(host = %config.host, attempt, "[CONNECT] Session established");
                return Ok(session);
            }
            Err(e) => {
                last_error = e.to_string();
                close_quietly(session.as_mut()).await;
            }
        }

        if attempt == max_attempts {
            break;
        }

        let delay = policy.delay_after(attempt);
        warn!(
            host = %config.host,
            attempt,
            error = %last_error,
            delay_ms = delay.as_millis() as u64,
            "[CONNECT] Attempt failed, backing off"
        );
        // An unrepresentable wake time lies past any deadline.
        let wake = Instant::now().checked_add(delay);
        if let Some(at) = deadline {
            if wake.map_or(true, |w| w >= at) {
                sleep_until(at).await;
                return Err(timeout("connect backoff"));
            }
        }
        match wake {
            Some(w) => sleep_until(w).await,
            None => sleep(delay).await,
        }
    }

    warn!(host = %config.host, attempts = max_attempts, error = %last_error, "[CONNECT] All attempts failed");
    Err(ConnectionError {
        attempts: max_attempts,
        message: last_error,
    }
    .into())
}

async fn close_quietly(session: &mut dyn TransportSession) {
    if let Err(e) = session.end().await {
        debug!(error = %e, "[CONNECT] Ignoring error while closing failed session");
    }
}

fn timeout(operation: &str) -> SyncError {
    TimeoutError {
        operation: operation.to_string(),
    }
    .into()
}
