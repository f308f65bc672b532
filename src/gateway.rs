//! JSON-RPC gateway plumbing: authentication headers, circuit breaker, request metrics, and
//! the gateway-backed session handle.

pub mod auth;
pub mod circuit_breaker;
pub mod metrics;
pub mod options;
pub mod session;

pub use circuit_breaker::{CircuitBreakerSnapshot, CircuitOpen, CircuitState, GatewayCircuitBreaker};
pub use metrics::GatewayMetricsSnapshot;
pub use options::GatewayOptions;
pub use session::{
    GatewayError, GatewaySession, CODE_RATE_LIMITED, CODE_UNAUTHORIZED, CODE_UNKNOWN_THREAD,
};
