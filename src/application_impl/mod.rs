mod key_pair_generator;
mod session_rotator;
mod token_issuer_jwt;

pub use key_pair_generator::*;
pub use session_rotator::*;
pub use token_issuer_jwt::*;
