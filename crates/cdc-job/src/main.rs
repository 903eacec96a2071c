//! The CLI entry point for the lakehouse CDC core. Wires the traits this
//! crate consumes (TableStore, SchemaRegistry, QueryEngine, EventSource) to
//! the in-memory fakes the core ships, and dispatches one of the job modes
//! named in spec §6 (`domain.operation ∈ {insert, update, delete}`, plus
//! streaming and maintenance passes).

mod wiring;

use std::collections::HashMap;
use std::sync::Arc;

use cdc_cli_common::{init_logging, LogArgs, OrBail};
use cdc_core::config::{ConfigView, RetryPolicyConfig};
use cdc_core::maintenance::MaintenanceEngine;
use cdc_core::retry::RetryHarness;
use clap::Parser;

/// `cdc-job` runs one micro-batch pipeline pass: stream a table, refresh a
/// domain table, or run a maintenance pass over a root prefix.
#[derive(Debug, Parser)]
#[clap(author, name = "cdc-job", version)]
struct Cli {
    #[clap(flatten)]
    log_args: LogArgs,

    #[clap(subcommand)]
    command: Command,

    /// Repeated `key=value` configuration entries (spec §6's flat key/value
    /// bag). Keys may carry a leading `--` or not; both resolve identically.
    #[clap(long = "set", global = true, value_parser = parse_kv)]
    config: Vec<(String, String)>,
}

fn parse_kv(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Run one source table's streaming supervisor to exhaustion of its
    /// EventSource (demo wiring only; see `wiring::demo_event_source`).
    Stream {
        #[clap(long = "kinesis.reader.streamName")]
        source_table: String,
    },
    /// Refresh a domain table per `domain.operation`.
    Domain {
        #[clap(long = "domain.operation", value_enum)]
        operation: DomainOperation,
        #[clap(long = "domain.name")]
        domain_name: String,
        #[clap(long = "domain.table.name")]
        table_name: String,
    },
    /// Compact or vacuum every table below a root prefix.
    Maintain {
        #[clap(long, value_enum)]
        action: MaintenanceAction,
        #[clap(long)]
        root: String,
        #[clap(long, default_value_t = 4)]
        depth_limit: u32,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum DomainOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum MaintenanceAction {
    Compact,
    Vacuum,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(&cli.log_args);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let config = ConfigView::from_map(cli.config.into_iter().collect::<HashMap<_, _>>());
    let retry_policy = RetryPolicyConfig::from_config(&config);

    let result = match cli.command {
        Command::Stream { source_table } => run_stream(&source_table).await,
        Command::Domain { operation, domain_name, table_name } => {
            run_domain(retry_policy, operation, &domain_name, &table_name).await
        }
        Command::Maintain { action, root, depth_limit } => {
            run_maintenance(retry_policy, action, &root, depth_limit).await
        }
    };

    result.or_bail("job failed");
    Ok(())
}

async fn run_stream(source_table: &str) -> Result<(), anyhow::Error> {
    let (source, table) = source_table
        .split_once('.')
        .ok_or_else(|| anyhow::anyhow!("expected source.table, got '{source_table}'"))?;
    let supervisor = wiring::demo_supervisor("cdc-job", source, table);
    let processed = supervisor.run().await.map_err(anyhow::Error::from)?;
    tracing::info!(processed, "stream exhausted");
    Ok(())
}

async fn run_domain(
    retry_policy: RetryPolicyConfig,
    operation: DomainOperation,
    domain_name: &str,
    table_name: &str,
) -> Result<(), anyhow::Error> {
    let (store, engine) = wiring::demo_domain_refresh_engine(retry_policy);
    match operation {
        DomainOperation::Insert => {
            engine
                .full_refresh(store.as_ref(), domain_name, table_name, &[])
                .await
                .map_err(anyhow::Error::from)?;
        }
        DomainOperation::Update => {
            let reports = engine
                .refresh_cdc_slice(domain_name, table_name, &[])
                .await;
            for report in reports.iter().filter(|r| r.result.is_err()) {
                tracing::warn!(table = %report.table, "domain refresh reported a failure");
            }
        }
        DomainOperation::Delete => {
            engine
                .delete_table(store.as_ref(), domain_name, table_name)
                .await
                .map_err(anyhow::Error::from)?;
        }
    }
    Ok(())
}

async fn run_maintenance(
    retry_policy: RetryPolicyConfig,
    action: MaintenanceAction,
    root: &str,
    depth_limit: u32,
) -> Result<(), anyhow::Error> {
    let store = wiring::demo_table_store();
    let engine = MaintenanceEngine::new(Arc::new(store), RetryHarness::new(retry_policy));
    match action {
        MaintenanceAction::Compact => engine.compact_all(root, depth_limit).await,
        MaintenanceAction::Vacuum => engine.vacuum_all(root, depth_limit).await,
    }
    .map_err(anyhow::Error::from)?;
    Ok(())
}
