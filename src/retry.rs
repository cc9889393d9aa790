//! Backoff for calls made outside the reconcile loop
//!
//! Reconciles never retry in-process, the controller requeues them instead.
//! Startup work (CRD installation) has no requeue to fall back on, so it
//! retries transient failures here with jittered exponential backoff.
//!
//! ```ignore
//! let crd = retry_transient(&RetryConfig::startup(), "install CRD", || install_crd(&client)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::{Error, Result};

/// How often and how fast to retry
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Attempts before giving up, 0 retries forever
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound of the delay
    pub max_delay: Duration,
    /// Growth factor of the delay between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Bounded retries for operator startup, about two minutes in total
    pub fn startup() -> Self {
        Self {
            max_attempts: 10,
            ..Default::default()
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds, fails with an error that is not
/// transient, or runs out of attempts.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !e.is_transient() {
            error!(operation = %operation_name, error = %e, "Operation failed permanently");
            return Err(e);
        }
        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(operation = %operation_name, attempt, error = %e, "Operation failed after max retries");
            return Err(e);
        }

        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = jittered.as_millis(),
            "Operation failed, retrying"
        );
        tokio::time::sleep(jittered).await;
        delay = config.next_delay(delay);
    }
}

impl Error {
    /// True when the same call may succeed if repeated later: transport
    /// failures, throttling and server-side errors
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(ae)) => ae.code >= 500 || ae.code == 429,
            Error::Kube(kube::Error::Service(_) | kube::Error::HyperError(_)) => true,
            Error::Http(_) => true,
            Error::Jenkins {
                status: Some(status),
                ..
            } => *status >= 500,
            Error::Jenkins { status: None, .. } => true,
            _ => false,
        }
    }
}
