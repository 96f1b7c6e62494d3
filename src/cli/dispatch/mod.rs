use crate::cli::{
    actions::{
        server::{Admin, Args},
        Action,
    },
    commands::{ARG_ADMIN_KEY, ARG_ADMIN_USER, ARG_DSN, ARG_MAX_CONNECTIONS, ARG_PORT},
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let max_connections = matches
        .get_one::<u32>(ARG_MAX_CONNECTIONS)
        .copied()
        .unwrap_or(5);
    let admin = match (
        matches.get_one::<String>(ARG_ADMIN_USER),
        matches.get_one::<String>(ARG_ADMIN_KEY),
    ) {
        (Some(username), Some(api_key)) => Some(Admin {
            username: username.clone(),
            api_key: SecretString::from(api_key.clone()),
        }),
        _ => None,
    };

    Ok(Action::Server(Args {
        port,
        dsn,
        max_connections,
        admin,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn test_handler_builds_server_action() {
        temp_env::with_vars(
            [
                ("CASETRACK_PORT", None::<&str>),
                ("CASETRACK_MAX_CONNECTIONS", None),
                ("CASETRACK_ADMIN_USER", None),
                ("CASETRACK_ADMIN_KEY", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "casetrack",
                    "--dsn",
                    "memory://",
                    "--max-connections",
                    "3",
                ]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected a server action");
                };
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "memory://");
                assert_eq!(args.max_connections, 3);
                assert!(args.admin.is_none());
            },
        );
    }

    #[test]
    fn test_handler_reads_the_admin_account() {
        temp_env::with_vars(
            [
                ("CASETRACK_ADMIN_USER", Some("admin")),
                ("CASETRACK_ADMIN_KEY", Some("s3cret")),
            ],
            || {
                let matches =
                    commands::new().get_matches_from(vec!["casetrack", "--dsn", "memory://"]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected a server action");
                };
                let admin = args.admin.unwrap();
                assert_eq!(admin.username, "admin");
                assert_eq!(admin.api_key.expose_secret(), "s3cret");
            },
        );
    }
}
