mod key_token;
mod token;
mod user;

pub use key_token::*;
pub use token::*;
pub use user::*;
