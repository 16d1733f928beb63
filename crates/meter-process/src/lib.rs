//! Processing-plugin pipeline
//!
//! Analyzers implement [`plugin::ProcessPlugin`] and are registered
//! explicitly at startup. The pipeline assigns each a dense extension
//! id, invokes lifecycle callbacks in registration order, and folds
//! the returned action masks for the cache.

pub mod dns;
pub mod http;
pub mod ntp;
pub mod phists;
pub mod pipeline;
pub mod plugin;
pub mod sip;
pub mod smtp;
pub mod tls;

pub use pipeline::Pipeline;
pub use plugin::ProcessPlugin;
