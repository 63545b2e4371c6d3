mod key_token_store_redis;

pub use key_token_store_redis::*;
