//! Per-bot middleware set, attached by the dispatcher factory in a
//! fixed order: logging, stats, store session, tokens, access,
//! rate limit, error handler (innermost).

pub mod access;
pub mod error_handler;
pub mod logging;
pub mod rate_limit;
pub mod session;
pub mod stats;
pub mod tokens;

pub use access::AccessMiddleware;
pub use error_handler::ErrorMiddleware;
pub use logging::LoggingMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use session::SessionMiddleware;
pub use stats::StatsMiddleware;
pub use tokens::TokenMiddleware;
