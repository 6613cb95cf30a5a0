use clap::Subcommand;

use offsync_core::integrations::oauth::{self, GOOGLE_SERVICE};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Google: login / logout / status
    Google {
        #[command(subcommand)]
        action: AuthOp,
    },
}

#[derive(Subcommand)]
pub enum AuthOp {
    /// Store OAuth client credentials and a refresh token
    Login {
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        client_secret: String,
        /// Refresh token from a completed consent flow
        #[arg(long)]
        refresh_token: String,
    },
    /// Remove stored credentials
    Logout,
    /// Check authentication status
    Status,
}

pub fn run(action: AuthAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AuthAction::Google { action: op } => handle_google(op),
    }
}

fn handle_google(op: AuthOp) -> Result<(), Box<dyn std::error::Error>> {
    match op {
        AuthOp::Login {
            client_id,
            client_secret,
            refresh_token,
        } => {
            oauth::connect_google(&client_id, &client_secret, &refresh_token)?;
            println!("Google credentials stored");
        }
        AuthOp::Logout => {
            oauth::disconnect_google()?;
            println!("Google disconnected");
        }
        AuthOp::Status => {
            let connected = oauth::load_tokens(GOOGLE_SERVICE)
                .is_some_and(|t| t.refresh_token.is_some() || !oauth::is_expired(&t));
            println!("{}", if connected { "authenticated" } else { "not authenticated" });
        }
    }
    Ok(())
}
