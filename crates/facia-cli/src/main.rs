use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "facia", about = "Facia face gallery CLI")]
struct Cli {
    /// Base URL of the faciad service (defaults to $FACIA_URL, then
    /// http://127.0.0.1:8000).
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Recognize faces in an image
    Recognize {
        /// Path to the image file
        image: PathBuf,
    },
    /// Register a new face
    Register {
        /// Identity to enroll the face under
        #[arg(short, long)]
        name: String,
        /// Path to an image containing exactly one face
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove all faces enrolled for an identity
    Remove {
        /// Identity to remove
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli
        .url
        .or_else(|| std::env::var("FACIA_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8000".to_string());
    tracing::debug!(url = %base, "using faciad service");

    let client = reqwest::Client::new();

    let response = match cli.command {
        Commands::Status => client.get(&base).send().await?,
        Commands::Recognize { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            client
                .post(format!("{base}/recognize"))
                .body(bytes)
                .send()
                .await?
        }
        Commands::Register { name, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            client
                .post(format!("{base}/register"))
                .query(&[("name", name.as_str())])
                .body(bytes)
                .send()
                .await?
        }
        Commands::List => client.get(format!("{base}/known_faces")).send().await?,
        Commands::Remove { name } => {
            client
                .delete(format!("{base}/known_faces/{name}"))
                .send()
                .await?
        }
    };

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .unwrap_or_else(|_| serde_json::json!({}));

    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("request failed with status {status}");
    }
    Ok(())
}
