//! Switchyard: predicate-driven HTTP routing and a content-rewriting reverse
//! proxy.
//!
//! Requests are matched against ordered rule sets built from predicates (client
//! IP, referer, user agent, virtual host, path, campaign membership). The first
//! matching rule picks either an application, which receives the request
//! unchanged, or a proxy profile, which rewrites the outbound request and the
//! upstream response.

pub mod backends;
pub mod campaign;
pub mod config;
pub mod error;
pub mod metrics;
pub mod predicate;
pub mod proxy;
pub mod request;
pub mod rewrite;
pub mod routing;

pub use error::{LookupUnavailable, PredicateError, ProxyError};
pub use request::RequestView;
pub use routing::{Router, SharedRouter};
