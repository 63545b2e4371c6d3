mod key_token_store_mysql;
mod user_repo_mysql;

pub use key_token_store_mysql::*;
pub use user_repo_mysql::*;

mod util;
