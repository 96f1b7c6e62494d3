use crate::{
    api::{self, auth::Policy},
    store::{self, SharedStore},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub max_connections: u32,
    pub admin: Option<Admin>,
}

/// Account created at startup when missing.
#[derive(Debug)]
pub struct Admin {
    pub username: String,
    pub api_key: SecretString,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be opened or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store = store::connect(&args.dsn, args.max_connections)
        .await
        .with_context(|| format!("Failed to open store {}", redact_dsn(&args.dsn)))?;

    if let Some(admin) = &args.admin {
        ensure_admin(&store, admin)
            .await
            .with_context(|| format!("Failed to create admin user {}", admin.username))?;
    }

    api::new(args.port, store).await
}

/// Creates the admin account with every permission. An existing account of
/// that name is left untouched.
async fn ensure_admin(store: &SharedStore, admin: &Admin) -> Result<()> {
    let mut tx = store.begin().await?;
    if tx.account(&admin.username).await?.is_some() {
        info!(username = %admin.username, "Admin user already exists");
        return Ok(());
    }

    let permissions: Vec<String> = Policy::ALL
        .iter()
        .map(|policy| policy.permission().to_string())
        .collect();
    let user = tx
        .insert_user(&admin.username, &admin.api_key, &permissions)
        .await?;
    tx.commit().await?;
    info!(username = %user.username, id = user.id, "Created admin user");
    Ok(())
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("max_connections", args.max_connections.to_string()),
        (
            "admin_user",
            args.admin
                .as_ref()
                .map_or_else(|| "-".to_string(), |admin| admin.username.clone()),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
