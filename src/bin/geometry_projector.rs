//! Geometry maintenance CLI.
//!
//! Serializes the geometry tables to a projection file, reads one back, or
//! resets reservations stuck from a crashed process.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! geometry_projector project [FILE]   # serialize geometry to FILE (default geometry.sp)
//! geometry_projector shatter [FILE]   # import FILE back into the store
//! geometry_projector recover          # reset Busy atoms to Claimed
//! ```

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sentinel_kernel::{AtomStore, EventBus, GeometryProjector, PostgresRecordStore};

const DEFAULT_PROJECT_FILE: &str = "geometry.sp";

/// Initialize the tracing subscriber with JSON or pretty format.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "geometry_projector=info,sentinel_kernel=info,sqlx=warn".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    }
}

fn usage() -> ! {
    eprintln!("usage: geometry_projector <project [FILE] | shatter [FILE] | recover>");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let command = match args.next() {
        Some(command) => command,
        None => usage(),
    };

    let store = Arc::new(PostgresRecordStore::from_env().await?);
    store.ensure_schema().await?;
    let bus = Arc::new(EventBus::new());

    match command.as_str() {
        "project" => {
            let file = args.next().unwrap_or_else(|| DEFAULT_PROJECT_FILE.to_string());
            let projector = GeometryProjector::new(store, bus);
            let text = projector.project().await?;
            tokio::fs::write(&file, text).await?;
            info!(file = %file, "Projection written");
        }
        "shatter" => {
            let file = args.next().unwrap_or_else(|| DEFAULT_PROJECT_FILE.to_string());
            let text = tokio::fs::read_to_string(&file).await?;
            let projector = GeometryProjector::new(store, bus);
            let report = projector.shatter(&text).await?;
            info!(
                file = %file,
                anchors = report.anchors,
                envelopes = report.envelopes,
                threads = report.threads,
                skipped = report.skipped,
                "Projection imported"
            );
        }
        "recover" => {
            let atoms = AtomStore::new(store, bus);
            let reclaimed = atoms.recover_stuck().await?;
            info!(count = reclaimed.len(), "Recovery completed");
        }
        _ => usage(),
    }

    Ok(())
}
