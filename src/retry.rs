//! 重试策略
//! Configurable retry policy for fallible collaborator calls

use std::time::Duration;

use tracing::warn;

use crate::error::RetryError;

/// 退避方式
#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// initial × multiplier^(n-1), 上限 max
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// 第 `attempt` 次失败后的等待时间 (attempt 从1开始)
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => *d,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数 (含首次), 至少1
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(200),
                multiplier: 2.0,
                max: Duration::from_secs(5),
            },
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// 执行 `op`, 对 `is_retryable` 判定为暂时性的错误按退避重试
    ///
    /// `op` 的参数为当前尝试序号 (从1开始)
    pub fn call<T, E, F, P>(&self, mut op: F, is_retryable: P) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(RetryError::NonRetryable(e)),
                Err(e) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(attempt, max_attempts, ?delay, error = %e, "retrying collaborator call");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
