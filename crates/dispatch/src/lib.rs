//! Handler-graph primitives: the typed per-request context, filters and
//! routers, the middleware chain, and the per-bot dispatcher that roots
//! them and drives the polling loop.

pub mod context;
pub mod dispatcher;
pub mod middleware;
pub mod router;

pub use context::{extract_command, EventKind, RequestContext};
pub use dispatcher::Dispatcher;
pub use middleware::{Middleware, Next};
pub use router::{Handler, Router, UpdateFilter};
