use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::{Context, Result};

pub fn handler(matches: &clap::ArgMatches) -> Result<(Action, GlobalArgs)> {
    let secret_file = matches
        .get_one::<std::path::PathBuf>("secret-file")
        .cloned()
        .context("missing required argument: --secret-file")?;

    let mut globals = GlobalArgs::new(secret_file);
    globals.debug = matches.get_flag("debug");
    globals.cors_origins = matches
        .get_many::<String>("cors-origin")
        .map(|origins| origins.cloned().collect())
        .unwrap_or_default();

    let action = Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one::<String>("dsn")
            .cloned()
            .context("missing required argument: --dsn")?,
        wp_dsn: matches
            .get_one::<String>("wp-dsn")
            .cloned()
            .context("missing required argument: --wp-dsn")?,
    };

    Ok((action, globals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn test_handler_builds_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "garageminder",
            "--dsn",
            "postgres://garage@localhost/garage",
            "--wp-dsn",
            "postgres://wp@localhost/wordpress",
            "--cors-origin",
            "https://trackmywrench.com",
            "--debug",
        ]);

        let (action, globals) = handler(&matches).unwrap();

        match action {
            Action::Server { port, dsn, wp_dsn } => {
                assert_eq!(port, 8080);
                assert_eq!(dsn, "postgres://garage@localhost/garage");
                assert_eq!(wp_dsn, "postgres://wp@localhost/wordpress");
            }
        }
        assert!(globals.debug);
        assert_eq!(globals.cors_origins, vec!["https://trackmywrench.com"]);
    }
}
