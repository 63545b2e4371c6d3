use chrono::{DateTime, Utc};
use keytoken::application_port::*;
use keytoken::domain_model::*;
use keytoken::logger::*;
use keytoken::server::*;
use keytoken::settings::*;
use serde::Serialize;
use serde_json::json;

/// What `inspect` prints. Tokens appear only as fingerprints and the private
/// key not at all.
#[derive(Serialize)]
struct RecordView {
    user_id: UserId,
    public_key: String,
    refresh_token: String,
    refresh_expires_at: DateTime<Utc>,
    used_refresh_tokens: Vec<RetiredView>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RetiredView {
    token: String,
    expires_at: DateTime<Utc>,
}

impl From<&KeyTokenRecord> for RecordView {
    fn from(record: &KeyTokenRecord) -> Self {
        RecordView {
            user_id: record.user_id,
            public_key: record.key_pair.public_key.clone(),
            refresh_token: record.refresh_token.fingerprint(),
            refresh_expires_at: record.refresh_expires_at,
            used_refresh_tokens: record
                .used_refresh_tokens
                .iter()
                .map(|retired| RetiredView {
                    token: retired.token.fingerprint(),
                    expires_at: retired.expires_at,
                })
                .collect(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn outcome<T: Serialize>(result: &Result<T, SessionError>) -> serde_json::Value {
    match result {
        Ok(value) => json!({ "ok": value }),
        Err(e @ SessionError::AuthorizedFail(_)) => json!({ "unauthorized": e.message() }),
        Err(e @ SessionError::Forbidden(_)) => json!({ "forbidden": e.message() }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

async fn load_user(server: &Server, user_id: UserId) -> anyhow::Result<UserRecord> {
    server
        .user_repo
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("{}: {}", MSG_USER_NOT_REGISTERED, user_id))
}

async fn run(server: &Server, command: Command) -> anyhow::Result<serde_json::Value> {
    let sessions = &server.session_service;

    let output = match command {
        Command::Login { user_id } => {
            let user = load_user(server, user_id).await?;
            serde_json::to_value(sessions.login(&user).await?)?
        }
        Command::Rotate { refresh_token } => {
            serde_json::to_value(sessions.rotate(&RefreshToken(refresh_token)).await?)?
        }
        Command::Authenticate { access_token } => {
            serde_json::to_value(sessions.authenticate(&AccessToken(access_token)).await?)?
        }
        Command::Logout { user_id } => {
            sessions.logout(user_id).await?;
            json!({ "logged_out": user_id })
        }
        Command::Inspect { user_id } => match server.key_token_store.find(user_id).await? {
            Some(record) => serde_json::to_value(RecordView::from(&record))?,
            None => serde_json::Value::Null,
        },
        Command::Scenario { user_id } => {
            let user = load_user(server, user_id).await?;
            let first = sessions.login(&user).await?;
            let first_refresh = first.tokens.refresh_token.clone();

            let rotated = sessions.rotate(&first_refresh).await;
            let replayed = sessions.rotate(&first_refresh).await;
            let after_revoke = match &rotated {
                Ok(grant) => Some(sessions.rotate(&grant.tokens.refresh_token).await),
                Err(_) => None,
            };

            json!({
                "login": first,
                "rotate": outcome(&rotated),
                "replay_retired_token": outcome(&replayed),
                "rotate_after_revocation": after_revoke.as_ref().map(outcome),
            })
        }
    };

    Ok(output)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    debug!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let server = Server::try_new(&project_settings).await?;

    let result = run(&server, cli.command).await;
    server.shutdown().await;

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
