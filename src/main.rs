use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use tracing::info;

use secure_api_client::security::cipher::generate_key;
use secure_api_client::utils;
use secure_api_client::{ApiClient, ApiRequest, Config};

#[derive(Parser)]
#[command(name = "secure-api", version, about = "Field-encrypting API client")]
struct AppCli {
    /// Config file path (JSON); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh base64 AES-256 key
    Keygen,
    /// Seal a value with the configured key
    Encrypt { text: String },
    /// Open an envelope with the configured key
    Decrypt { envelope: String },
    /// Show the policy that governs an API path
    Resolve { path: String },
    /// Send a request through the encrypting client
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    match args.command {
        Commands::Keygen => {
            println!("{}", generate_key());
        }
        Commands::Encrypt { text } => {
            let codec = Config::load(args.config.as_deref())?.codec()?;
            if !codec.is_enabled() {
                return Err(anyhow!("no encryption key configured"));
            }
            println!("{}", codec.try_encrypt(&text)?);
        }
        Commands::Decrypt { envelope } => {
            let codec = Config::load(args.config.as_deref())?.codec()?;
            if !codec.is_enabled() {
                return Err(anyhow!("no encryption key configured"));
            }
            println!("{}", codec.try_decrypt(&envelope)?);
        }
        Commands::Resolve { path } => {
            let config = Config::load(args.config.as_deref())?;
            let table = config.policy_table()?;
            match table.resolve(&path) {
                Some(policy) => {
                    println!("request:  {}", join(&policy.request_fields));
                    println!("response: {}", join(&policy.response_fields));
                }
                None => println!("no policy for {path} ({:?} matching)", table.match_mode()),
            }
        }
        Commands::Request { method, path, body } => {
            let config = Config::load(args.config.as_deref())?;
            let method: Method = method
                .to_ascii_uppercase()
                .parse()
                .with_context(|| format!("invalid method {method}"))?;
            let mut request = ApiRequest::new(method, path);
            if let Some(raw) = body {
                let value: Value = serde_json::from_str(&raw).context("parsing --body JSON")?;
                request = request.with_body(value);
            }

            info!(base_url = %config.base_url, "sending request");
            let client = ApiClient::from_config(&config)?;
            match client.execute(request).await {
                Ok(resp) => {
                    info!(status = %resp.status.as_u16(), "request completed");
                    println!("{}", serde_json::to_string_pretty(&resp.body)?);
                }
                Err(err) => {
                    eprintln!("{}", err.user_message());
                    return Err(err.into());
                }
            }
        }
    }

    Ok(())
}

fn join(fields: &std::collections::BTreeSet<String>) -> String {
    if fields.is_empty() {
        "(none)".to_string()
    } else {
        fields.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
