use super::{Parser, Subcommand};
use crate::domain_model::UserId;

#[derive(Parser, Debug)]
#[command(name = "keytoken", about = "Session credential lifecycle")]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a session and print the issued pair.
    Login {
        #[arg(long)]
        user_id: UserId,
    },
    /// Exchange a refresh token for a new pair.
    Rotate {
        #[arg(long)]
        refresh_token: String,
    },
    /// Verify an access token against the user's stored key.
    Authenticate {
        #[arg(long)]
        access_token: String,
    },
    Logout {
        #[arg(long)]
        user_id: UserId,
    },
    /// Print the stored record without key material.
    Inspect {
        #[arg(long)]
        user_id: UserId,
    },
    /// Run login, rotation and a replayed token against one user.
    Scenario {
        #[arg(long)]
        user_id: UserId,
    },
}
