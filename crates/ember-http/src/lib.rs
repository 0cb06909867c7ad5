//! Embedded HTTP/1.1 server (spec §4.7): a single-threaded accept loop,
//! pattern-based routing, and a per-request context recycled through a
//! bounded pool with its own scratch arena.
//!
//! This crate knows nothing about the evaluator. A [`RouteHandler`] is any
//! `Fn(&mut RequestContext) -> HttpResponse`; `ember-runtime` supplies the
//! one that actually dispatches into `ember-core::Vm`.

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod request;
pub mod response;
pub mod router;
pub mod server;

pub use context::{ContextPool, PooledContext, RequestContext, MAX_POOLED_CONTEXTS};
pub use error::{HttpError, HttpResult};
pub use request::{parse_request, HttpRequest};
pub use response::{status_text, HttpResponse};
pub use router::{RouteHandler, Router};
pub use server::{HttpServer, ServerLimits};
