//! Hosting server and proxy controller.
//!
//! - `server` - accept loop, per-request routing and the metrics listener
//! - `controller` - proxy profiles and the rewriting exchange
//! - `forwarding` - transparent forwarding to applications
//! - `client` - pooled upstream client and the `Upstream` seam
//! - `tls` - listener certificates and the skip-verify verifier
//! - `network` - listener sockets

pub mod client;
pub mod controller;
pub mod forwarding;
pub mod headers;
pub mod network;
pub mod response_ext;
pub mod server;
pub mod tls;

pub use client::{create_http_client, install_crypto_provider, HttpClient, Upstream};
pub use controller::{ProxyController, ProxyProfile};
pub use forwarding::error_response;
pub use server::{SwitchyardServer, Target};
