//! Infrastructure: configuration loading, logging, rate limiting, and the
//! remote-execution adapter.

pub mod config;
pub mod logging;
pub mod rate_limiter;
pub mod remote;
