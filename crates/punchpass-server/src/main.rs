//! Punchpass Server
//!
//! Wallet pass web service, push updates and the notification scheduler.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use punchpass_core::tracing_init::{LogFormat, init_tracing};
use punchpass_pass::fetch::HttpImageFetcher;
use punchpass_pass::{OpenSslSigner, PassBundleBuilder};

use punchpass_server::assets::{AssetStore, LocalAssetStore, NoAssetStore};
use punchpass_server::config::Args;
use punchpass_server::passes::PassService;
use punchpass_server::push::{ApnsClient, ApnsTokenProvider, PushSender, UnconfiguredPush};
use punchpass_server::registry::DeviceRegistry;
use punchpass_server::schedule::{
    Dispatcher, NotificationScheduler, RecurrenceCalculator, spawn_scheduler,
};
use punchpass_server::server::{AppState, build_router};
use punchpass_server::storage::ServerDatabase;
use punchpass_server::updates::PassUpdater;
use punchpass_server::wallet::{DisabledWalletSync, HttpWalletSync, WalletSync};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _ = rustls::crypto::ring::default_provider().install_default();
    init_tracing(
        "punchpass_server=info,punchpass_pass=info",
        LogFormat::from_json_flag(args.log_json),
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting punchpass-server"
    );

    let db_path = args.db_path()?;
    info!(path = %db_path.display(), "Opening server database");
    let db = ServerDatabase::open(&db_path).await?;
    let registry = DeviceRegistry::new(db.clone());

    let push: Arc<dyn PushSender> = match args.apns()? {
        Some(apns) => {
            let tokens = ApnsTokenProvider::from_file(&apns.key_path, &apns.key_id, &apns.team_id)?;
            info!(sandbox = apns.sandbox, key_id = %apns.key_id, "APNs push enabled");
            Arc::new(ApnsClient::new(Arc::new(tokens), apns.sandbox)?)
        }
        None => {
            warn!("APNs key not configured, pass updates will not be pushed");
            Arc::new(UnconfiguredPush)
        }
    };
    let updater = Arc::new(PassUpdater::new(registry.clone(), push));

    let wallet: Arc<dyn WalletSync> = match &args.wallet_sync_url {
        Some(url) => {
            info!(url = %url, "Wallet object sync enabled");
            Arc::new(HttpWalletSync::new(url.clone(), args.wallet_sync_token.clone())?)
        }
        None => Arc::new(DisabledWalletSync),
    };
    let assets: Arc<dyn AssetStore> = match (&args.asset_dir, &args.asset_base_url) {
        (Some(dir), Some(base)) => Arc::new(LocalAssetStore::new(dir.clone(), base.clone())),
        _ => Arc::new(NoAssetStore),
    };
    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        Arc::clone(&updater),
        wallet,
        assets,
    ));

    let builder = match args.signing_material() {
        Ok(material) => {
            info!(pass_type = %material.pass_type_identifier, "Pass signing configured");
            let signer = OpenSslSigner::new(args.openssl.clone()).with_legacy(args.openssl_legacy);
            Ok(Arc::new(PassBundleBuilder::new(
                material,
                Arc::new(signer),
                Arc::new(HttpImageFetcher::new()?),
            )))
        }
        Err(e) => {
            warn!(error = %e, "Pass signing not configured, pass downloads are unavailable");
            Err(e)
        }
    };
    let passes = Arc::new(PassService::new(
        db.clone(),
        registry.clone(),
        builder,
        args.web_service_url.clone(),
        args.auth_secret.clone(),
    ));
    if args.auth_secret.is_none() {
        warn!("PUNCHPASS_AUTH_SECRET not set, device requests will be rejected");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let schedule = args.scheduler();
    let scheduler_task = if schedule.enabled {
        let scheduler = Arc::new(NotificationScheduler::new(
            db.clone(),
            Arc::clone(&dispatcher),
            Arc::new(RecurrenceCalculator::new()),
            schedule.batch_size,
        ));
        Some(spawn_scheduler(scheduler, schedule.interval, shutdown_rx))
    } else {
        info!("Notification scheduler disabled");
        None
    };

    let router = build_router(AppState {
        db,
        registry,
        passes,
        updater,
        dispatcher,
        auth_secret: args.auth_secret.clone(),
    });
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Punchpass server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }

    info!("Punchpass server stopped");
    Ok(())
}
