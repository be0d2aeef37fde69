//! Checkout agent CLI: drive a kiosk or phone session against a gateway.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use checkout_agent::frames::{mime_for, FileFrameSink, FileFrameSource, LogFrameSink};
use checkout_agent::{
    run_barcode_poller, AgentError, Cart, CheckoutGate, Fallback, FrameRelayApi, FrameSink,
    GatewayClient, Orchestrator, OrchestratorConfig, PeerFactory, Phase, Reconciliation, TaskGuard,
};
use checkout_common::helpers::new_session_id;
use checkout_common::Role;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "checkout-agent")]
#[command(about = "Kiosk and phone agents for the checkout relay")]
struct Args {
    /// Gateway base URL
    #[arg(
        long,
        global = true,
        env = "CHECKOUT_GATEWAY_URL",
        default_value = "http://127.0.0.1:3000"
    )]
    gateway: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a checkout session and print its join link
    NewSession {
        /// Write the QR code SVG here
        #[arg(long)]
        qr_out: Option<PathBuf>,
    },

    /// Publish one scanned barcode, as the phone does
    Scan {
        #[arg(long)]
        device_id: String,
        barcode: String,
    },

    /// Consume scanned barcodes into a cart until interrupted
    Watch {
        #[arg(long)]
        device_id: String,

        /// Image of the basket to send to the detector on exit
        #[arg(long)]
        detect_image: Option<PathBuf>,
    },

    /// Join a session as the phone and stream the camera
    Phone {
        #[arg(long)]
        device_id: String,

        #[arg(long)]
        phone_id: Option<String>,

        /// Image file re-read for every relayed frame
        #[arg(long)]
        frame: PathBuf,
    },

    /// Run the kiosk side of a session
    Kiosk {
        #[arg(long)]
        device_id: String,

        /// Write relayed frames here instead of only logging them
        #[arg(long)]
        frame_out: Option<PathBuf>,

        /// Close the session on exit
        #[arg(long, default_value = "false")]
        teardown: bool,
    },
}

#[cfg(feature = "webrtc-peer")]
fn peer_factory(config: &OrchestratorConfig) -> Arc<dyn PeerFactory> {
    Arc::new(checkout_agent::WebRtcPeerFactory::new(config.ice_servers.clone()))
}

#[cfg(not(feature = "webrtc-peer"))]
fn peer_factory(_config: &OrchestratorConfig) -> Arc<dyn PeerFactory> {
    info!("built without native WebRTC; frames go through the relay");
    Arc::new(checkout_agent::RelayOnlyPeers)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Follow the orchestrator until it closes, fails or the user interrupts.
async fn run_orchestrator(orch: &mut Orchestrator) -> Phase {
    let mut phases = orch.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    orch.start().await;
    let last = loop {
        tokio::select! {
            _ = &mut shutdown => break orch.phase(),
            changed = phases.changed() => {
                if changed.is_err() {
                    break orch.phase();
                }
                let phase = phases.borrow_and_update().clone();
                info!(session_id = orch.session_id(), ?phase, "phase changed");
                if matches!(phase, Phase::Closed | Phase::Failed(_)) {
                    break phase;
                }
            }
        }
    };
    orch.shutdown().await;
    last
}

async fn wait_for_phone(
    client: &GatewayClient,
    device_id: &str,
    config: &OrchestratorConfig,
) -> Result<bool> {
    info!(device_id, "waiting for a phone to join");
    let mut ticker = tokio::time::interval(config.status_poll);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(false),
            _ = ticker.tick() => {}
        }
        match client.status(device_id).await {
            Ok(status) if status.closed => anyhow::bail!("session {device_id} has been closed"),
            Ok(status) if status.phone_joined => return Ok(true),
            Ok(_) => {}
            Err(err) if err.is_retryable() => warn!("status poll failed, retrying: {}", err),
            Err(err) => return Err(err.into()),
        }
    }
}

fn print_cart(cart: &Cart) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(cart.lines())?);
    println!(
        "items: {}  total: {:.2}",
        cart.total_quantity(),
        cart.total_price()
    );
    Ok(())
}

async fn watch(
    client: GatewayClient,
    device_id: String,
    detect_image: Option<PathBuf>,
    config: OrchestratorConfig,
) -> Result<()> {
    let (scans_tx, mut scans) = mpsc::channel(16);
    let relay: Arc<dyn FrameRelayApi> = Arc::new(client.clone());
    let _poller = TaskGuard::spawn({
        let device_id = device_id.clone();
        async move {
            let period = config.barcode_poll;
            if let Err(err) = run_barcode_poller(relay, device_id, period, scans_tx).await {
                warn!("barcode poller stopped: {}", err);
            }
        }
    });

    let mut cart = Cart::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        let barcode = tokio::select! {
            _ = &mut shutdown => break,
            scanned = scans.recv() => match scanned {
                Some(barcode) => barcode,
                None => break,
            },
        };
        match client.lookup_product(&barcode).await {
            Ok(product) => {
                let name = product.name.clone();
                let quantity = cart.record_scan(product);
                info!(barcode = %barcode, "{} x{}", name, quantity);
            }
            Err(AgentError::Catalog(msg)) => warn!("unknown barcode {}: {}", barcode, msg),
            Err(err) => warn!("product lookup failed: {}", err),
        }
    }

    print_cart(&cart)?;
    if let Some(path) = detect_image {
        let image = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let detection = client.detect(image, mime_for(&path)).await?;
        match cart.record_detection(detection.count) {
            Reconciliation::Match => println!("detected {} items: matches cart", detection.count),
            Reconciliation::Mismatch { scanned, detected } => {
                println!("mismatch: scanned {scanned}, detected {detected}")
            }
        }
        if matches!(cart.gate(), CheckoutGate::Blocked { .. }) {
            println!("checkout blocked until the mismatch is acknowledged or items are re-scanned");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    checkout_common::init_tracing_with_default("checkout_agent=info");

    let args = Args::parse();
    let client = GatewayClient::new(&args.gateway)?;
    let config = OrchestratorConfig::from_env();

    match args.command {
        Command::NewSession { qr_out } => {
            let session = client.new_session().await?;
            println!("Session:  {}", session.session_id);
            println!("Join URL: {}", session.join_url);
            if let Some(path) = qr_out {
                tokio::fs::write(&path, session.qr_svg.as_bytes())
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("QR code:  {}", path.display());
            }
        }
        Command::Scan { device_id, barcode } => {
            client.publish_barcode(&device_id, &barcode).await?;
            println!("published {barcode} to {device_id}");
        }
        Command::Watch {
            device_id,
            detect_image,
        } => watch(client, device_id, detect_image, config).await?,
        Command::Phone {
            device_id,
            phone_id,
            frame,
        } => {
            let phone_id = phone_id.unwrap_or_else(new_session_id);
            client.connect(&device_id, &phone_id).await?;
            info!(device_id = %device_id, phone_id = %phone_id, "joined session");

            let gateway = Arc::new(client);
            let mut orch = Orchestrator::new(
                Role::Phone,
                device_id,
                gateway.clone(),
                peer_factory(&config),
                Fallback::Publish {
                    relay: gateway,
                    source: Arc::new(FileFrameSource::new(frame)),
                },
                config,
            )?;
            let last = run_orchestrator(&mut orch).await;
            if let Phase::Failed(failure) = last {
                anyhow::bail!("phone session failed: {failure:?}");
            }
        }
        Command::Kiosk {
            device_id,
            frame_out,
            teardown,
        } => {
            if !wait_for_phone(&client, &device_id, &config).await? {
                return Ok(());
            }
            info!(device_id = %device_id, "phone joined");

            let sink: Arc<dyn FrameSink> = match frame_out {
                Some(path) => Arc::new(FileFrameSink::new(path)),
                None => Arc::new(LogFrameSink),
            };
            let gateway = Arc::new(client.clone());
            let mut orch = Orchestrator::new(
                Role::Web,
                device_id.clone(),
                gateway.clone(),
                peer_factory(&config),
                Fallback::View {
                    relay: gateway,
                    sink,
                },
                config,
            )?;
            let last = run_orchestrator(&mut orch).await;
            info!("kiosk finished in {:?}", last);

            if teardown {
                client.teardown(&device_id).await?;
                info!(device_id = %device_id, "session closed");
            }
        }
    }

    Ok(())
}
