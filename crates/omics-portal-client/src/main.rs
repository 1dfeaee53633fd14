#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use omics_portal_client::config::CONFIG_SCHEMA_VERSION;
use omics_portal_client::{PortalConfig, PortalSession, SelectionReport};
use omics_portal_model::EntityKind;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "omics-portal", about = "Query the omics portal REST API through the client data layer")]
struct Cli {
    /// Overrides PORTAL_API_BASE_URL.
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    dataset: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Gene names matching a query (at least three characters).
    Genes {
        #[arg(long, default_value = "")]
        query: String,
    },
    /// Select entities of one kind and report what was fetched.
    Select {
        #[arg(long)]
        kind: String,
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Fetch signal tracks for a region such as chr4:89700000-89900000.
    Region {
        #[arg(long)]
        region: String,
        #[arg(long, value_delimiter = ',')]
        cell_types: Vec<String>,
    },
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so stdout stays machine-readable.
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn selection_json(report: &SelectionReport) -> Value {
    let caches: Vec<Value> = report
        .caches
        .iter()
        .map(|summary| {
            json!({
                "cache": summary.cache,
                "ready": summary.ready.iter().map(|k| k.canonical_string()).collect::<Vec<_>>(),
                "failures": summary
                    .failures
                    .iter()
                    .map(|(k, msg)| (k.canonical_string(), Value::String(msg.clone())))
                    .collect::<serde_json::Map<_, _>>(),
                "skipped": summary.skipped.iter().map(|k| k.canonical_string()).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "dataset": report.dataset,
        "kind": report.kind,
        "selected": report.change.current,
        "caches": caches,
        "evicted": report.evicted,
    })
}

async fn run(cli: Cli, config: PortalConfig) -> Result<Value, String> {
    let session = PortalSession::connect(config).map_err(|e| e.to_string())?;
    session
        .select_dataset(&cli.dataset)
        .await
        .map_err(|e| e.to_string())?;
    match cli.command {
        Command::Genes { query } => {
            let genes = session.list_genes(&query).await.map_err(|e| e.to_string())?;
            Ok(json!({ "genes": genes }))
        }
        Command::Select { kind, ids } => {
            let kind = EntityKind::parse(&kind).map_err(|e| e.to_string())?;
            let report = session
                .set_selection(kind, &ids)
                .await
                .map_err(|e| e.to_string())?;
            Ok(selection_json(&report))
        }
        Command::Region { region, cell_types } => {
            if !cell_types.is_empty() {
                session
                    .viewport()
                    .ensure_signal_available()
                    .await
                    .map_err(|e| e.to_string())?;
                session
                    .set_selection(EntityKind::CellType, &cell_types)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            let viewport = session.viewport();
            viewport
                .set_region_text(&region)
                .await
                .map_err(|e| e.to_string())?;
            viewport.flush().await;
            viewport.wait_idle().await;
            if let Some(err) = viewport.last_error().await {
                return Err(err.to_string());
            }
            let snapshot = viewport.snapshot().await;
            serde_json::to_value(snapshot.as_deref()).map_err(|e| e.to_string())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    let mut config = PortalConfig::from_env();
    if let Some(url) = &cli.api_base_url {
        config.api_base_url.clone_from(url);
    }
    init_tracing(config.log_json);
    info!(
        api = %config.api_base_url,
        dataset = %cli.dataset,
        config_schema = CONFIG_SCHEMA_VERSION,
        "omics-portal starting"
    );
    match run(cli, config).await {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
            println!("{text}");
            Ok(())
        }
        Err(err) => {
            error!("{err}");
            Err(err)
        }
    }
}
