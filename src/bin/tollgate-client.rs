//! Tollgate client CLI
//!
//! Obtains access tokens with the client credentials grant and calls protected
//! resources with them.
//!
//! ```bash
//! # Print a token response
//! tollgate-client token --client-id order-service --client-secret order-service-secret
//!
//! # Call a protected endpoint, retrying once with a new token on 401
//! tollgate-client call --scope read:inventory http://localhost:8081/api/stock/laptop-001
//!
//! # Hash a secret for a client definitions file
//! tollgate-client hash-secret order-service-secret
//! ```
//!
//! `TOLLGATE_TOKEN_URL`, `TOLLGATE_CLIENT_ID` and `TOLLGATE_CLIENT_SECRET` can
//! be used instead of the corresponding flags.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::prelude::*;

use tollgate::{client::ClientCredentialsClient, oauth::ClientSecretHash};

#[derive(Parser)]
#[command(name = "tollgate-client", version, about = "Tollgate OAuth2 client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request an access token and print the token response
    Token(ClientArgs),
    /// GET a protected resource with a bearer token
    Call {
        #[command(flatten)]
        client: ClientArgs,
        /// Resource URL
        url: String,
    },
    /// Print the salted hash of a client secret
    HashSecret {
        secret: String,
    },
}

#[derive(Args)]
struct ClientArgs {
    /// Token endpoint URL
    #[arg(long, env = "TOLLGATE_TOKEN_URL", default_value = "http://localhost:9000/oauth/token")]
    token_url: String,
    #[arg(long, env = "TOLLGATE_CLIENT_ID")]
    client_id: String,
    #[arg(long, env = "TOLLGATE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,
    /// Space-delimited scopes, defaults to everything the client is allowed
    #[arg(long)]
    scope: Option<String>,
    /// Request timeout
    #[arg(long, default_value = "10s", value_parser = parse_timeout)]
    timeout: Duration,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|e| e.to_string())
}

impl ClientArgs {
    fn build(self) -> Result<ClientCredentialsClient> {
        let http_client = reqwest::Client::builder()
            .user_agent(format!("tollgate-client/{}", tollgate::config::version()?))
            .timeout(self.timeout)
            .build()?;
        Ok(
            ClientCredentialsClient::new(http_client, self.token_url, self.client_id, self.client_secret)
                .with_scope(self.scope),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Token(args) => {
            let client = args.build()?;
            let token = client.request_token().await?;
            println!("{}", serde_json::to_string_pretty(&token)?);
        }
        Commands::Call { client, url } => {
            let client = client.build()?;
            let response = client.get(&url).await?;
            let status = response.status();
            let body = response.text().await?;
            println!("{}", status);
            println!("{}", body);
            if !status.is_success() {
                std::process::exit(1);
            }
        }
        Commands::HashSecret { secret } => {
            println!("{}", ClientSecretHash::new(&secret).encode());
        }
    }

    Ok(())
}
