use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use configuration::{BoltProperties, GormProperties};
use gorm_starter::{Dsn, Repository};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// The main entry point for the data source starter tool.
#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the process environment still applies.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse command-line arguments
    let cli = Cli::parse();

    // Execute the appropriate command
    let command = cli.command.name();
    let result = match cli.command {
        Commands::Sql { command } => {
            let settings = configuration::load_config(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            handle_sql(command, settings.gorm).await
        }
        Commands::Kv { command } => {
            let settings = configuration::load_config(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            handle_kv(command, settings.bolt).await
        }
        Commands::Encrypt(args) => handle_encrypt(args),
    };
    result?;

    tracing::info!(command, "Command finished.");
    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Opens and checks the configured relational database and key-value store.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file. Values can be overridden with STARTER_<SECTION>__<KEY> variables.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with the relational data source (`[gorm]` section).
    Sql {
        #[command(subcommand)]
        command: SqlCommand,
    },
    /// Work with the embedded key-value store (`[bolt]` section).
    Kv {
        #[command(subcommand)]
        command: KvCommand,
    },
    /// Encrypt a password for use with `gorm.config.decrypt = true`.
    Encrypt(EncryptArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Sql { .. } => "sql",
            Commands::Kv { .. } => "kv",
            Commands::Encrypt(_) => "encrypt",
        }
    }
}

#[derive(Subcommand)]
enum SqlCommand {
    /// Connect (honouring the retry settings), run `SELECT 1` and disconnect.
    Ping,
    /// Print the connection string with the password hidden.
    Dsn,
}

#[derive(Subcommand)]
enum KvCommand {
    /// Store a value.
    Put { bucket: String, key: String, value: String },
    /// Print a value.
    Get { bucket: String, key: String },
    /// Remove a value.
    Delete { bucket: String, key: String },
    /// List the keys of a bucket.
    Keys { bucket: String },
}

#[derive(Args)]
struct EncryptArgs {
    /// PEM file holding the RSA public key (or the private key).
    #[arg(long)]
    public_key: PathBuf,

    /// The plain text password.
    password: String,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_sql(command: SqlCommand, properties: GormProperties) -> Result<()> {
    match command {
        SqlCommand::Dsn => {
            let dsn = Dsn::from_properties(&properties, properties.password.clone());
            println!("{}", dsn.redacted());
            Ok(())
        }
        SqlCommand::Ping => {
            let configuration = gorm_starter::Configuration::new(properties);

            // Ctrl+C aborts a retry loop that is waiting for its next attempt.
            let data_source = configuration.data_source();
            let cancel_on_signal = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    data_source.cancel();
                }
            });

            let result = async {
                let repository = configuration.repository().await?;
                repository.ping().await?;
                configuration.data_source().close().await?;
                anyhow::Ok(())
            }
            .await;
            cancel_on_signal.abort();

            result.context("Database ping failed")?;
            tracing::info!(
                retries = configuration.data_source().last_retry_count(),
                "Database answered the ping."
            );
            println!("ok");
            Ok(())
        }
    }
}

async fn handle_kv(command: KvCommand, properties: BoltProperties) -> Result<()> {
    let configuration = bolt_starter::Configuration::new(properties);
    let repository = configuration.repository().await;

    let result = match command {
        KvCommand::Put { bucket, key, value } => repository
            .put(&bucket, key.as_bytes(), value.as_bytes())
            .await
            .map(|()| println!("ok")),
        KvCommand::Get { bucket, key } => {
            repository
                .get(&bucket, key.as_bytes())
                .await
                .map(|value| match value {
                    Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                    None => println!("(not found)"),
                })
        }
        KvCommand::Delete { bucket, key } => repository
            .delete(&bucket, key.as_bytes())
            .await
            .map(|()| println!("ok")),
        KvCommand::Keys { bucket } => repository.keys(&bucket).await.map(|keys| {
            for key in keys {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }),
    };

    if configuration.data_source().is_opened().await {
        configuration.data_source().close().await?;
    }
    result.context("Key-value operation failed")
}

fn handle_encrypt(args: EncryptArgs) -> Result<()> {
    let pem = std::fs::read_to_string(&args.public_key)
        .with_context(|| format!("Failed to read {}", args.public_key.display()))?;
    let ciphertext = crypto::encrypt_base64(&args.password, &pem)?;
    println!("{ciphertext}");
    Ok(())
}
