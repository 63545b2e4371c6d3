mod session_service;
mod token_issuer;

pub use session_service::*;
pub use token_issuer::*;
