//! rbk - inspect package rollback state
//!
//! Read-only view over a rollback data directory. The CLI never repairs or
//! mutates the store; the long-running engine does that on load.

mod cli;
mod display;
mod error;

use crate::cli::{Cli, Commands};
use crate::display::{OutputRenderer, VerifyReport};
use crate::error::CliError;
use clap::Parser;
use rbk_config::Config;
use rbk_errors::RollbackError;
use rbk_state::{query, ExpirationPolicy};
use rbk_store::{RecordStore, StateFilter};
use rbk_types::{OutputFormat, RollbackId};
use std::process;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.json_logs);

    if let Err(e) = run(cli).await {
        error!(code = e.exit_code(), "command failed: {e}");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    debug!("Starting rbk v{}", env!("CARGO_PKG_VERSION"));

    // File (or defaults), then environment, then flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    if let Some(dir) = cli.global.data_dir.clone() {
        config.paths.data_dir = Some(dir);
    }
    config.validate()?;

    let format = if cli.global.json {
        OutputFormat::Json
    } else {
        config.general.default_output
    };
    let renderer = OutputRenderer::new(format);
    let policy = ExpirationPolicy::from_config(&config.rollback);
    let store = RecordStore::open_read_only(config.data_dir()).await?;
    let now = chrono::Utc::now();

    match cli.command {
        Commands::List => {
            let records = store.get_all(StateFilter::All).await?;
            let available = query::available(&records, &policy, now);
            renderer.render_rollbacks(&available, "No rollbacks available.")?;
        }
        Commands::Committed => {
            // Live versions are unknown here; only the retention bound applies
            let records = store.get_all(StateFilter::All).await?;
            let committed = query::recently_committed(&records, &policy, None, now);
            renderer.render_rollbacks(&committed, "No recently committed rollbacks.")?;
        }
        Commands::Show { id } => {
            let record = store
                .get(RollbackId(id))
                .await?
                .ok_or(RollbackError::NotFound { id })
                .map_err(rbk_errors::Error::from)?;
            renderer.render_record(&record)?;
        }
        Commands::Quarantined => {
            let records = store.get_all(StateFilter::All).await?;
            let quarantined = query::quarantined(&records);
            renderer.render_records(&quarantined, "No quarantined rollbacks.")?;
        }
        Commands::Verify => {
            let inspected = store.inspect().await?;
            let report = VerifyReport::new(&inspected, store.peek_next_id().await.get());
            renderer.render_verify(&report)?;
            let problems = report.problems();
            if problems > 0 {
                return Err(CliError::Unhealthy(problems));
            }
        }
    }

    info!("Command completed successfully");
    Ok(())
}

/// Logs always go to stderr so stdout stays machine readable
fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,rbk=info"));

    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
