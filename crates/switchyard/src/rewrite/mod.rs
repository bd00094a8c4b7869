//! Request and response rewriting for proxy profiles.

pub mod body;
pub mod builtin;
pub mod chain;
pub mod descriptor;
mod html;
pub mod overrides;
pub mod script;

pub use body::{MarkupKind, RewritableBody};
pub use builtin::{
    build_request_chain, build_response_chain, RequestRewriterConfig, ResponseRewriterConfig,
};
pub use chain::{
    MarkupTransformer, RequestRewriter, RequestRewriterChain, ResponseBodyTransformer,
    ResponseHead, ResponseObserver, ResponseRewriterChain, ResponseStage,
};
pub use descriptor::OutboundRequest;
pub use overrides::RequestOverrides;
pub use script::ScriptRewriter;
