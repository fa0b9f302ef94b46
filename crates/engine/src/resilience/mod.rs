pub mod cache;
pub mod circuit_breaker;
pub mod retry;

pub use cache::{Cache, CacheStats, CacheTier};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use retry::{retry_with_backoff, safe_execute, with_timeout, RetryExhausted, RetryPolicy};
