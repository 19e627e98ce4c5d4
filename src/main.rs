use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use std::{io::stderr, path::PathBuf};

use lidl_receipts::{ApiConfig, AuthContext, HttpTransport, ReceiptClient, Report};

#[derive(Parser)]
#[command(version, about)]
/// Fetches Lidl Plus receipts into a local directory and summarises them.
struct Args {
    /// Log level (error, warn, info, debug, trace) [default: info, or RUST_LOG]
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetches all receipts for an account into WORK_DIR.
    FetchAllReceipts {
        refresh_token: String,
        work_dir: PathBuf,
        /// Access token to skip the token refresh while it is still valid
        #[arg(long)]
        access_token: Option<String>,
        /// Country whose Lidl stores to fetch receipts from
        #[arg(long, default_value = "DE")]
        country_code: String,
        /// Language for localized receipt text
        #[arg(long, default_value = "DE")]
        language_code: String,
        /// Read receipts already in WORK_DIR instead of downloading them again
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        use_cache: bool,
        /// Basic auth credential of the Lidl Plus app
        #[arg(long, env = "LIDL_CLIENT_CREDENTIAL", hide_env_values = true)]
        client_credential: Option<String>,
        /// Version reported in the App-Version header
        #[arg(long, env = "LIDL_APP_VERSION")]
        app_version: Option<String>,
    },
    /// Summarises the cached receipts in RECEIPTS_PATH by product.
    AnalyzeReceipts { receipts_path: PathBuf },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging(args.log_level);
    match args.command {
        Command::FetchAllReceipts {
            refresh_token,
            work_dir,
            access_token,
            country_code,
            language_code,
            use_cache,
            client_credential,
            app_version,
        } => {
            let mut config = ApiConfig::default();
            if let Some(credential) = client_credential {
                config.client_credential = credential;
            }
            if let Some(version) = app_version {
                config.app_version = version;
            }
            let auth = AuthContext::new(refresh_token, access_token);
            let mut client = ReceiptClient::new(
                HttpTransport::new()?,
                config,
                auth,
                &country_code,
                &language_code,
            );
            info!("fetching receipts into {}", work_dir.display());
            let summary = client.fetch_all(&work_dir, use_cache)?;
            print!("{summary}");
        }
        Command::AnalyzeReceipts { receipts_path } => {
            let mut report = Report::new();
            report.read_dir(&receipts_path)?;
            print!("{report}");
        }
    }
    Ok(())
}

fn setup_logging(level: Option<LevelFilter>) {
    let filter = match level {
        Some(level) => EnvFilter::default().add_directive(level.into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(stderr)
        .init();
}
