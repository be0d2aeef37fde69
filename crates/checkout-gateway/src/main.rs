use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use checkout_common::Catalog;
use checkout_gateway::{connect_store, router, spawn_purge_task, AppState, GatewayConfig, StoreBackend};
use clap::Parser;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "checkout-gateway")]
#[command(about = "Signaling and frame relay for unmanned checkout kiosks")]
struct Args {
    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Mailbox backend: memory or sqlite
    #[arg(long)]
    store: Option<String>,

    /// SQLite URL when the sqlite backend is selected
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Product catalog JSON file
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Object detector endpoint
    #[arg(long)]
    detector_url: Option<String>,

    /// Base URL embedded in QR join links
    #[arg(long)]
    public_base_url: Option<String>,
}

fn apply_args(config: &mut GatewayConfig, args: Args) -> anyhow::Result<()> {
    if let Some(listen) = args.listen {
        config.bind_addr = listen;
    }
    match args.store.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("memory") => config.store = StoreBackend::Memory,
        Some("sqlite") => {
            let url = match &config.store {
                StoreBackend::Sqlite(url) => url.clone(),
                StoreBackend::Memory => "sqlite:checkout.db".to_string(),
            };
            config.store = StoreBackend::Sqlite(url);
        }
        Some(other) => anyhow::bail!("unknown store backend '{other}'"),
        None => {}
    }
    if let (Some(url), StoreBackend::Sqlite(_)) = (args.database_url, &config.store) {
        config.store = StoreBackend::Sqlite(url);
    }
    if let Some(path) = args.catalog {
        config.catalog_path = Some(path);
    }
    if let Some(url) = args.detector_url {
        config.detector_url = url;
    }
    if let Some(url) = args.public_base_url {
        config.public_base_url = url;
    }
    config.validate()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    checkout_common::init_tracing_with_default("checkout_gateway=info,tower_http=info");

    let args = Args::parse();
    let mut config = GatewayConfig::from_env()?;
    apply_args(&mut config, args)?;

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("failed to load catalog {}", path.display()))?,
        None => {
            tracing::warn!("no catalog configured; product lookups will return 404");
            Catalog::default()
        }
    };
    tracing::info!("loaded {} products", catalog.len());

    let store = connect_store(&config)
        .await
        .context("failed to open mailbox store")?;
    spawn_purge_task(store.clone(), config.purge_interval);

    let state = AppState::new(&config, store, catalog)?;
    let app = router(state, &config);

    let addr = config.bind_addr;
    config.check_public_bind_allowed(addr)?;

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback_addr = SocketAddr::new(addr.ip(), 0);
            tracing::warn!(
                "gateway bind {} is already in use, falling back to {}",
                addr,
                fallback_addr
            );
            TcpListener::bind(fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!("gateway listening on {}", listener.local_addr()?);
    tracing::info!("detector proxy target {}", config.detector_url);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
