//! bgpview-client — connects the broker (C3) to a view server, runs the
//! registered consumer pipeline (C4) over every relayed view, and exits
//! cleanly after `-N` views or on shutdown.
//!
//! The reference transport this binary wires up is the in-process loopback
//! adapter (C1's [`InProcessDealer`]/[`InProcessSubPublisher`]) driving a
//! minimal in-process demo server: this crate's transport, geo provider, and
//! time-series backend are reference adapters for tests and local
//! operation, not the production collaborators a real deployment would
//! plug in behind the same traits.

use bgpview_client::broker::{run_broker, BrokerMsg, MasterMsg, ServerConnector};
use bgpview_client::config::{BrokerConfig, GeoConsumerConfig, Interest, InterestSet};
use bgpview_client::consumers::{GeoVisibilityConsumer, StaticGeoProvider, VisibilityConsumer};
use bgpview_client::error::{BgpviewError, Result};
use bgpview_client::pipeline::{ChainState, Consumer, InMemoryView, OriginAsPathSegment, PipelineManager, PrefixObservation, View};
use bgpview_client::protocol::{self, Frame, MsgType};
use bgpview_client::timeseries::LoggingBackend;
use bgpview_client::transport::{DealerChannel, InProcessDealer, InProcessSubPublisher, Message, SubChannel};
use clap::Parser;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bgpview-client")]
#[command(about = "Client broker and per-view consumer pipeline for BGP view distribution")]
struct Cli {
    /// Path to a TOML file with broker defaults; CLI flags override it.
    #[arg(long)]
    config: Option<String>,

    /// Dealer endpoint URI (the reference transport ignores the value and
    /// always binds an in-process loopback).
    #[arg(short = 's', long)]
    server_uri: Option<String>,

    /// Sub endpoint URI, required to receive relayed views.
    #[arg(short = 'S', long)]
    server_sub_uri: Option<String>,

    /// Stable reconnect identity.
    #[arg(short = 'n', long)]
    identity: Option<String>,

    /// Interests to subscribe to. Repeatable.
    #[arg(short = 'I', long = "interest", value_enum)]
    interests: Vec<InterestArg>,

    /// Intent bits declared when publishing.
    #[arg(long, default_value_t = 0)]
    intent: u8,

    /// Heartbeat interval while idle, in milliseconds.
    #[arg(short = 'i', long)]
    heartbeat_interval_ms: Option<u64>,

    /// Missed heartbeat intervals tolerated before reconnecting.
    #[arg(short = 'l', long)]
    heartbeat_liveness: Option<u8>,

    /// Minimum reconnect backoff, in milliseconds.
    #[arg(short = 'r', long)]
    reconnect_min_ms: Option<u64>,

    /// Maximum reconnect backoff, in milliseconds.
    #[arg(short = 'R', long)]
    reconnect_max_ms: Option<u64>,

    /// Prefix prepended to every emitted metric name.
    #[arg(short = 'm', long)]
    metric_prefix: Option<String>,

    /// Exit after processing this many views. 0 means run until shutdown.
    #[arg(short = 'N', long, default_value_t = 0)]
    num_views: u64,

    /// Consumers to register, in order. One of "visibility" or
    /// "per-geo-visibility"; the latter requires `-b`/`--locations-file`/`--countries-file`.
    #[arg(short = 'c', long = "consumer")]
    consumers: Vec<String>,

    /// Geo consumer: path to the IP-block-to-location-id file.
    #[arg(short = 'b', long)]
    blocks_file: Option<String>,

    /// Geo consumer: path to the location-id-to-country file.
    #[arg(long)]
    locations_file: Option<String>,

    /// Geo consumer: path to the country metadata file.
    #[arg(long)]
    countries_file: Option<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum InterestArg {
    FirstFull,
    Full,
    Partial,
}

impl From<InterestArg> for Interest {
    fn from(v: InterestArg) -> Self {
        match v {
            InterestArg::FirstFull => Interest::FirstFull,
            InterestArg::Full => Interest::Full,
            InterestArg::Partial => Interest::Partial,
        }
    }
}

fn load_broker_config(cli: &Cli) -> Result<BrokerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| BgpviewError::InitFailed(format!("reading {path}: {e}")))?;
            toml::from_str(&contents).map_err(|e| BgpviewError::InitFailed(format!("parsing {path}: {e}")))?
        }
        None => BrokerConfig::default(),
    };

    if let Some(uri) = &cli.server_uri {
        config.server_uri = uri.clone();
    }
    if let Some(uri) = &cli.server_sub_uri {
        config.server_sub_uri = Some(uri.clone());
    }
    if cli.identity.is_some() {
        config.identity = cli.identity.clone();
    }
    if !cli.interests.is_empty() {
        let mut set = InterestSet::empty();
        for interest in &cli.interests {
            set.insert((*interest).into());
        }
        config.interests = set;
    }
    config.intents.0 = cli.intent;
    if let Some(ms) = cli.heartbeat_interval_ms {
        config.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(liveness) = cli.heartbeat_liveness {
        config.heartbeat_liveness = liveness;
    }
    if let Some(ms) = cli.reconnect_min_ms {
        config.reconnect_interval_min = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.reconnect_max_ms {
        config.reconnect_interval_max = Duration::from_millis(ms);
    }
    if let Some(prefix) = &cli.metric_prefix {
        config.metric_prefix = prefix.clone();
    }
    Ok(config)
}

fn build_pipeline(cli: &Cli, metric_prefix: &str) -> Result<PipelineManager> {
    let mut geo_config = GeoConsumerConfig::default();
    if let Some(blocks_file) = &cli.blocks_file {
        geo_config.blocks_file = blocks_file.clone();
    }
    if let Some(locations_file) = &cli.locations_file {
        geo_config.locations_file = locations_file.clone();
    }
    if let Some(countries_file) = &cli.countries_file {
        geo_config.countries_file = countries_file.clone();
    }

    let mut manager = PipelineManager::new(ChainState::new(metric_prefix, geo_config.pfx_vis_mask_len_threshold));
    for name in &cli.consumers {
        let consumer: Box<dyn Consumer> = match name.as_str() {
            "visibility" => Box::new(VisibilityConsumer::new(geo_config.full_feed_threshold)),
            "per-geo-visibility" => {
                if geo_config.blocks_file.is_empty() {
                    return Err(BgpviewError::InitFailed("per-geo-visibility requires -b".into()));
                }
                if geo_config.countries_file.is_empty() {
                    return Err(BgpviewError::InitFailed("per-geo-visibility requires --countries-file".into()));
                }
                let provider = StaticGeoProvider::load(&geo_config.blocks_file, &geo_config.countries_file)?;
                Box::new(GeoVisibilityConsumer::new(
                    metric_prefix,
                    Box::new(provider),
                    Box::new(LoggingBackend::new()),
                )?)
            }
            other => return Err(BgpviewError::InitFailed(format!("unknown consumer: {other}"))),
        };
        manager.register(consumer);
    }
    Ok(manager)
}

/// A demo view server that runs entirely in-process: acknowledges every
/// VIEW request immediately and periodically publishes a synthetic view on
/// the sub channel. Stands in for the real view server, which this crate
/// treats as an external collaborator, so this binary is runnable
/// standalone.
async fn run_demo_server(
    mut dealer: InProcessDealer,
    publisher: InProcessSubPublisher,
    interests: InterestSet,
    mut cancel: watch::Receiver<bool>,
) {
    let mut publish_timer = tokio::time::interval(Duration::from_millis(500));
    let mut next_view = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
            result = dealer.recv() => {
                match result {
                    Ok(Some(message)) => {
                        if let Some(reply) = handle_demo_request(&message) {
                            if dealer.send(vec![reply]).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) | Err(_) => return,
                }
            }
            _ = publish_timer.tick() => {
                next_view += 1;
                let payload = vec![protocol::encode_sub_prefix(interests), next_view.to_le_bytes().to_vec()];
                if publisher.publish(payload).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn handle_demo_request(message: &Message) -> Option<Frame> {
    let header = message.first()?;
    match protocol::decode_bare(header) {
        Ok(MsgType::View) => {
            let request = protocol::RequestMessage::decode(message).ok()?;
            Some(protocol::ReplyMessage { seq_num: request.seq_num }.encode())
        }
        Ok(MsgType::Heartbeat) => Some(protocol::encode_bare(MsgType::Heartbeat)),
        _ => None,
    }
}

struct LoopbackConnector {
    interests: InterestSet,
    cancel: watch::Receiver<bool>,
}

#[async_trait::async_trait]
impl ServerConnector for LoopbackConnector {
    async fn connect(&mut self) -> Result<(Box<dyn DealerChannel>, Option<Box<dyn SubChannel>>)> {
        let (client_dealer, server_dealer) = InProcessDealer::pair(64);
        let (publisher, sub) = InProcessSubPublisher::pair(64);
        tokio::spawn(run_demo_server(server_dealer, publisher, self.interests, self.cancel.clone()));
        Ok((
            Box::new(client_dealer) as Box<dyn DealerChannel>,
            Some(Box::new(sub) as Box<dyn SubChannel>),
        ))
    }
}

/// Builds a synthetic in-memory view for one relayed sub message. Wire
/// decoding of real view payloads belongs to the external view container
/// this crate consumes through the [`View`] trait; this demo shape
/// exercises the pipeline end to end without it.
fn demo_view(view_id: u32) -> InMemoryView {
    let mut view = InMemoryView::new(1_700_000_000 + view_id as i64);
    let prefix = format!("10.{}.0.0/24", view_id % 256).parse().unwrap();
    view.add_prefix(
        prefix,
        vec![PrefixObservation {
            peer_id: 1,
            peer_signature: 0,
            origin: OriginAsPathSegment::Asn(65000 + view_id),
        }],
    );
    view.set_peer_asn(1, 65000 + view_id);
    view
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_broker_config(&cli)?;
    let mut pipeline = build_pipeline(&cli, &config.metric_prefix)?;

    let (master_to_broker_tx, master_to_broker_rx) = mpsc::channel::<MasterMsg>(64);
    let (broker_to_master_tx, mut broker_to_master_rx) = mpsc::channel::<BrokerMsg>(64);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let connector = Box::new(LoopbackConnector {
        interests: config.interests,
        cancel: cancel_rx.clone(),
    });

    let broker_config = config.clone();
    let broker_handle = tokio::spawn(run_broker(broker_config, connector, master_to_broker_rx, broker_to_master_tx, cancel_rx));

    let mut views_processed = 0u64;
    let mut view_counter = 0u32;
    let mut publish_timer = tokio::time::interval(config.heartbeat_interval);

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = publish_timer.tick() => {
                if master_to_broker_tx.send(MasterMsg::PublishView(vec![b"demo-request".to_vec()])).await.is_err() {
                    break Ok(());
                }
            }
            msg = broker_to_master_rx.recv() => {
                match msg {
                    Some(BrokerMsg::View { payload, .. }) => {
                        let _ = payload;
                        view_counter += 1;
                        let mut view = demo_view(view_counter);
                        if let Err(e) = pipeline.process_view(&mut view).await {
                            break Err(e);
                        }
                        view.clear();
                        views_processed += 1;
                        info!(views_processed, "processed view");
                        if cli.num_views > 0 && views_processed >= cli.num_views {
                            break Ok(());
                        }
                    }
                    Some(BrokerMsg::Error(e)) => {
                        break Err(BgpviewError::Transport(e));
                    }
                    None => break Ok(()),
                }
            }
        }
    };

    let _ = master_to_broker_tx.send(MasterMsg::Shutdown).await;
    let _ = cancel_tx.send(true);
    match broker_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "broker exited with error during shutdown"),
        Err(e) => warn!(error = %e, "broker task panicked"),
    }

    outcome
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "bgpview-client exited with error");
        std::process::exit(1);
    }
}
