use clap::Subcommand;
use contactsync_core::{Config, KeyringCredentials};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Authenticate with the remote directory
    Login {
        /// Pre-issued access token; skips the browser flow
        #[arg(long)]
        token: Option<String>,
        /// OAuth client ID (saved to config)
        #[arg(long)]
        client_id: Option<String>,
        /// OAuth client secret (saved to the OS keyring)
        #[arg(long)]
        client_secret: Option<String>,
    },
    /// Remove stored tokens
    Logout,
    /// Check authentication status
    Status,
}

pub async fn run(action: AuthAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AuthAction::Login {
            token,
            client_id,
            client_secret,
        } => {
            if let Some(token) = token {
                KeyringCredentials::set_token(&token)?;
                println!("access token stored");
                return Ok(());
            }

            let mut config = Config::load()?;
            if let Some(cid) = client_id {
                config.set("oauth.client_id", &cid)?;
            }
            if let Some(secret) = client_secret {
                KeyringCredentials::set_client_secret(&secret)?;
            }

            println!("Opening browser for authorization...");
            KeyringCredentials::new(config.oauth.clone()).login().await?;
            println!("authenticated");
        }
        AuthAction::Logout => {
            KeyringCredentials::logout()?;
            println!("logged out");
        }
        AuthAction::Status => match KeyringCredentials::tokens()? {
            Some(tokens) => {
                let expiry = match tokens.expires_at {
                    Some(at) => chrono::DateTime::from_timestamp(at, 0)
                        .map(|t| format!("expires {}", t.to_rfc3339()))
                        .unwrap_or_else(|| "invalid expiry".to_string()),
                    None => "no expiry".to_string(),
                };
                let refresh = if tokens.refresh_token.is_some() {
                    "refreshable"
                } else {
                    "not refreshable"
                };
                println!("authenticated ({expiry}, {refresh})");
            }
            None => println!("not authenticated"),
        },
    }
    Ok(())
}
