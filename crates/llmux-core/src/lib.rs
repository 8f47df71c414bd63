//! The proxy core: validated configuration, client authentication, the
//! model-string router, the credential auth manager and the dispatcher that
//! drives one request end-to-end.

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod router;

pub use auth::{ClientAuth, pinned_auth_id};
pub use config::{Config, StreamingConfig};
pub use dispatcher::{DispatchReply, Dispatcher, InboundRequest, error_document};
pub use manager::{AuthManager, Outcome};
pub use router::{RouteDecision, resolve_model};
