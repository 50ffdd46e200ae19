use std::time::Duration;

#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// For writes that should survive longer outages, e.g. the background
    /// checkpoint drain.
    pub fn persistent() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }
}

/// Retry an async operation with exponential backoff and jitter. The last
/// error is returned once attempts are exhausted.
pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempts_left = config.max_attempts;
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left = attempts_left.saturating_sub(1);
                if attempts_left == 0 {
                    return Err(e);
                }

                let wait = match config.jitter_max {
                    Some(jitter_max) if jitter_max.as_millis() > 0 => {
                        let jitter_ms = jitter_max.as_millis() as u64;
                        backoff + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
                    }
                    _ => backoff,
                };
                tokio::time::sleep(wait).await;

                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}
