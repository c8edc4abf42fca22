//! Sessionkit CLI
//!
//! Command-line interface for inspecting the session an application has
//! persisted with sessionkit.
//!
//! # Usage
//!
//! ```bash
//! # Validate a client id before shipping it
//! sessionkit check-config --client-id 12345-abc.apps.example.com --mode silent
//!
//! # Show who is signed in
//! sessionkit status --format json
//!
//! # Print the cached identity token
//! sessionkit token
//!
//! # Forget the local session
//! sessionkit clear
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionkit_core::{
    AcquisitionMode, ConfigResolver, ConfigureOptions, CredentialCache, DescriptorSource,
    SessionSettings, TokenLifecycle, create_store,
};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use commands::OutputFormat;

#[derive(Parser)]
#[command(name = "sessionkit")]
#[command(about = "Inspect and manage persisted authentication sessions")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and validate a session configuration
    CheckConfig {
        /// Identity-provider client id
        #[arg(long)]
        client_id: Option<String>,

        /// Provider descriptor file to discover the client id from
        #[arg(long)]
        descriptor: Option<PathBuf>,

        /// Restrict sign-in to this hosted domain
        #[arg(long)]
        domain: Option<String>,

        /// Scope to request (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,

        /// Acquisition mode (silent, interactive, auto)
        #[arg(long, default_value = "auto")]
        mode: AcquisitionMode,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the persisted session
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the cached identity token if it is still valid
    Token,

    /// Remove the persisted session
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = load_settings(cli.settings.as_deref())?;

    let output = match cli.command {
        Commands::CheckConfig {
            client_id,
            descriptor,
            domain,
            scopes,
            mode,
            format,
        } => {
            let options = ConfigureOptions {
                client_id,
                descriptor: descriptor.map(DescriptorSource::Path),
                hosted_domain: domain,
                scopes,
                mode,
            };
            let resolver = ConfigResolver::new(settings.scope_namespace.clone());
            commands::check_config(&resolver, options, format)?
        }
        Commands::Status { format } => {
            let cache = open_cache(&settings)?;
            commands::status(&cache, &lifecycle(&settings)?, format).await?
        }
        Commands::Token => {
            let cache = open_cache(&settings)?;
            commands::token(&cache, &lifecycle(&settings)?).await?
        }
        Commands::Clear => {
            let cache = open_cache(&settings)?;
            commands::clear(&cache).await?
        }
    };

    println!("{}", output);
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&std::path::Path>) -> Result<SessionSettings> {
    let settings = match path {
        Some(path) => SessionSettings::load_from_path(path)?,
        None => SessionSettings::load()?,
    };
    debug!("Loaded settings: {:?}", settings);
    Ok(settings)
}

fn lifecycle(settings: &SessionSettings) -> Result<TokenLifecycle> {
    Ok(TokenLifecycle::new().with_skew(settings.expiry_skew()?))
}

fn open_cache(
    settings: &SessionSettings,
) -> Result<CredentialCache<sessionkit_core::EncryptedFileStore>> {
    let path = settings.session_path()?;
    let store = create_store(&path, &settings.keyring_service)
        .with_context(|| format!("cannot open encrypted session store at {:?}", path))?;
    Ok(CredentialCache::new(store))
}
