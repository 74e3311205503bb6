use crate::api;
use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::Result;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server { port, dsn, wp_dsn } => {
            // Validate both DSNs up front so a typo fails before we bind the port
            let dsn = Url::parse(&dsn)?;
            let wp_dsn = Url::parse(&wp_dsn)?;

            api::new(port, dsn.as_str(), wp_dsn.as_str(), globals).await?;
        }
    }

    Ok(())
}
