// store

mod key_token_store;

pub use key_token_store::*;

// repo

mod user_repo;

pub use user_repo::*;
