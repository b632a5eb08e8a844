//! Backoff policies for retrying transient failures when talking to the
//! staging bucket or the git hosting API.
//!
//! # Example
//!
//! ```
//! use ingestor_retry::{RetryPolicy, calculate_delay};
//!
//! let config = RetryPolicy::Default.to_config();
//! let delay = calculate_delay(&config, 2);
//! println!("retry after: {:?}", delay);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy used to compute the delay before the next retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries.
    Immediate,
    /// Delay doubles each attempt.
    #[default]
    Exponential,
    /// Delay increases linearly with attempt number.
    Linear,
    /// Same delay every attempt.
    Constant,
}

/// Predefined retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Default,
    Aggressive,
    Conservative,
    Custom,
}

impl RetryPolicy {
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                jitter: 0.5,
            },
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 10,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Concrete retry parameters, loadable from the `[retry]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        RetryPolicy::Default.to_config()
    }
}

/// Compute the delay before attempt number `attempt` (1-indexed).
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::RngExt;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Runs a fallible operation, retrying according to a `RetryStrategyConfig`
/// until it succeeds or the attempt budget is exhausted.
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    /// `operation` receives the current attempt number, starting at 1.
    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        return Err(e);
                    }
                    let delay = calculate_delay(&self.config, attempt);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_to_config_default() {
        let config = RetryPolicy::Default.to_config();
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
        assert_eq!(config.max_attempts, 6);
    }

    #[test]
    fn calculate_delay_exponential_without_jitter() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(60));
    }

    #[test]
    fn calculate_delay_linear_without_jitter() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 15), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_range() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
            max_attempts: 10,
        };
        for _ in 0..100 {
            let delay = calculate_delay(&config, 1);
            assert!(delay >= Duration::from_millis(5000));
            assert!(delay <= Duration::from_millis(15000));
        }
    }

    #[test]
    fn retry_executor_retries_until_success() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        });

        let mut attempts = 0;
        let result = executor.run(|attempt| {
            attempts = attempt;
            if attempt < 3 { Err("transient") } else { Ok("ok") }
        });
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn retry_executor_gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        });
        let result = executor.run(|_| Err::<&str, _>("permanent"));
        assert_eq!(result, Err("permanent"));
    }
}
