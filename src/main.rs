//! # Linentrack command line
//!
//! Loads configuration, connects, applies migrations and runs one engine
//! operation. Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use linentrack::config::ConfigLoader;
use linentrack::events::EventDispatcher;
use linentrack::models::{PickupStatus, ServiceInfo};
use linentrack::telemetry::{TraceContext, init_tracing, with_trace_context};
use linentrack::workflow::{DeliveryEvent, DeliveryLocation};
use linentrack::{Engine, db};

#[derive(Debug, Parser)]
#[command(name = "linentrack", version, about = "RFID linen workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print service name, version and the redacted configuration
    Info,
    /// Apply pending database migrations and exit
    Migrate,
    /// Reconcile scanned RFID tags against the item ledger
    Scan {
        #[arg(required = true)]
        tags: Vec<String>,
        /// Report items of other tenants separately
        #[arg(long)]
        tenant: Option<Uuid>,
    },
    /// Move cleaned items to ready_for_delivery
    MarkClean {
        #[arg(required = true)]
        item_ids: Vec<Uuid>,
    },
    /// Receive a pickup bag at the laundry
    ReceivePickup { pickup_id: Uuid },
    /// Run one delivery transition
    AdvanceDelivery {
        delivery_id: Uuid,
        /// print-label, package, pickup, deliver or cancel
        event: DeliveryEvent,
        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f64>,
    },
    /// Item counts per status plus open batches for one tenant
    TenantStats { tenant_id: Uuid },
}

#[derive(Debug, Serialize)]
struct TenantStats {
    tenant_id: Uuid,
    name: String,
    is_active: bool,
    items_by_status: std::collections::BTreeMap<String, u64>,
    open_pickups: usize,
    open_deliveries: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config).context("initializing tracing")?;

    if let Command::Info = cli.command {
        let redacted: serde_json::Value =
            serde_json::from_str(&config.redacted_json().context("redacting configuration")?)?;
        return print_json(&json!({ "service": ServiceInfo::default(), "config": redacted }));
    }

    let pool = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::migrate(&pool).await.context("applying migrations")?;

    if let Command::Migrate = cli.command {
        return print_json(&json!({ "migrated": true }));
    }

    let engine = Engine::new(pool, &config, EventDispatcher::logging_only());
    with_trace_context(TraceContext::generate(), run(&engine, cli.command)).await
}

async fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Info | Command::Migrate => Ok(()),
        Command::Scan { tags, tenant } => print_json(&engine.rfid.scan(&tags, tenant).await?),
        Command::MarkClean { item_ids } => print_json(&engine.items.mark_clean(&item_ids).await?),
        Command::ReceivePickup { pickup_id } => {
            print_json(&engine.pickups.receive(pickup_id).await?)
        }
        Command::AdvanceDelivery {
            delivery_id,
            event,
            lat,
            lon,
        } => {
            let location = match (lat, lon) {
                (Some(latitude), Some(longitude)) => Some(DeliveryLocation {
                    latitude,
                    longitude,
                }),
                (None, None) => None,
                _ => bail!("--lat and --lon must be given together"),
            };
            print_json(&engine.deliveries.apply(delivery_id, event, location).await?)
        }
        Command::TenantStats { tenant_id } => {
            let tenant = engine.tenants.get(tenant_id).await?;
            let counts = engine.items.status_counts(tenant_id).await?;
            let open_pickups = engine
                .pickups
                .list(tenant_id, Some(PickupStatus::Created))
                .await?
                .len();
            let open_deliveries = engine
                .deliveries
                .list(tenant_id, None)
                .await?
                .iter()
                .filter(|delivery| delivery.status.is_open())
                .count();

            print_json(&TenantStats {
                tenant_id,
                name: tenant.name,
                is_active: tenant.is_active,
                items_by_status: counts
                    .into_iter()
                    .map(|(status, count)| (status.to_string(), count))
                    .collect(),
                open_pickups,
                open_deliveries,
            })
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
