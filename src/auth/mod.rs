//! Authorization decision engine for the ext_authz integration.

mod service;
mod token;

pub use service::AuthorizerService;
pub use token::BotToken;
