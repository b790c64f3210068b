use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Bounded exponential backoff, used where a short-lived conflict is
/// expected to clear on its own (the ML counter lock).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, op_name: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay_ms;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(val) => {
                if attempt > 1 {
                    info!(op = op_name, attempt, "retry success");
                }
                return Ok(val);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(op = op_name, attempt, error = %e, "giving up");
                    return Err(e);
                }
                warn!(op = op_name, attempt, delay, error = %e, "retrying");
                sleep(Duration::from_millis(delay)).await;
                delay = ((delay as f64) * config.backoff_multiplier) as u64;
                delay = delay.min(config.max_delay_ms);
            }
        }
    }
}
