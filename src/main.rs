use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use storewatch::cli::{parse_args, print_help};
use storewatch::config::Config;
use storewatch::health::HealthMetrics;
use storewatch::ingest;
use storewatch::model::StoreId;
use storewatch::registry::ReportState;
use storewatch::report::CsvDirectorySink;
use storewatch::samples::SampleStore;
use storewatch::server::serve;
use storewatch::service::ReportService;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storewatch=info".parse()?),
        )
        .init();

    info!("storewatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    let files = config.data_files();
    info!("Configuration loaded");
    info!("  Store status: {}", files.store_status.display());
    info!("  Business hours: {}", files.business_hours.display());
    info!("  Timezones: {}", files.timezones.display());
    info!("  Reports: {}", config.report_dir.display());
    info!("  Reference time: {:?}", config.reference_time);

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        if let Err(e) = config.validate() {
            error!("{}", e);
            std::process::exit(1);
        }
        match ingest::load_snapshot(&files, config.row_policy()) {
            Ok((snapshot, report)) => {
                info!(
                    "Configuration is valid: {} stores, {} rejected rows",
                    snapshot.store_ids().len(),
                    report.rejected.len()
                );
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    let metrics = Arc::new(HealthMetrics::new());
    let service = Arc::new(ReportService::new(
        Arc::new(SampleStore::default()),
        Arc::new(CsvDirectorySink::new(config.report_dir.clone())),
        metrics,
        config.reference_time,
        Duration::from_secs(config.report_timeout_secs),
    ));

    service
        .reload(&files, config.row_policy())
        .context("Failed to load input data")?;

    // Run a single report and exit
    if args.once {
        info!("Running single report (--once mode)");
        let requested = args.store_id.map(StoreId::new);
        return match service.report_now(requested)? {
            ReportState::Complete {
                artifact, uptime, ..
            } => {
                println!("{}", serde_json::to_string_pretty(&uptime)?);
                info!("Report written to {}", artifact);
                Ok(())
            }
            ReportState::Failed { reason, .. } => {
                error!("Report failed: {}", reason);
                std::process::exit(1);
            }
            ReportState::Running { store_id } => {
                warn!("Report for store {} did not finish", store_id);
                std::process::exit(1);
            }
        };
    }

    let ip: IpAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("BIND_ADDR '{}' is not an IP address", config.bind_addr))?;
    let addr = SocketAddr::new(ip, config.http_port);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let cancel_token = CancellationToken::new();
    let server = tokio::spawn(serve(listener, service, cancel_token.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    cancel_token.cancel();

    server.await.context("Server task panicked")?;

    Ok(())
}
