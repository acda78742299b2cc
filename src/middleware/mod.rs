//! Middleware for observability.
//!
//! This module provides request logging with latency tracking. Rate limiting
//! is out of scope for this core; a gateway/ingress in front of the service
//! is expected to own that concern.

pub mod logging;

pub use logging::{request_logging, request_logging_simple};
