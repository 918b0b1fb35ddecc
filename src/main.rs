use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use finbridge::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the financing-integration service
    Serve,
    /// Print payment schedules for an amount using the standard product table
    Pricing {
        /// Financed amount in dollars
        #[arg(long)]
        amount: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(Commands::Serve) => serve(cli.config_path.as_deref()).await,
        Some(Commands::Pricing { amount }) => pricing(amount),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => finbridge::config::AppConfig::load_from_path(path)?,
        None => finbridge::config::AppConfig::load()?,
    };
    finbridge::run_serve(config).await
}

fn pricing(amount: f64) -> Result<()> {
    let estimates =
        finbridge::pricing::compute_schedule(amount, &finbridge::pricing::standard_products())?;
    println!("{}", serde_json::to_string_pretty(&estimates)?);
    Ok(())
}

fn setup() -> Result<()> {
    use anyhow::Context;

    let path = finbridge::config::AppConfig::default_config_path()?;

    if path.exists() {
        anyhow::bail!("Configuration file already exists at {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let default_config = r#"---
server:
  host: "0.0.0.0"
  port: 8080

lender:
  lender_id: "helios"
  base_url: "https://api.heliosfinancial.example"
  email: ""
  # password via FINBRIDGE_LENDER_PASSWORD

webhook:
  # or via FINBRIDGE_WEBHOOK_SECRET
  secret: null

companies: {}

test_mode: true
"#;

    std::fs::write(&path, default_config)
        .with_context(|| format!("Failed to write config file to {}", path.display()))?;

    tracing::info!("Created default configuration at {}", path.display());
    Ok(())
}
