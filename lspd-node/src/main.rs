// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! `lspd-node`: the LSP side of the marketplace. Loads configuration, wires
//! the node backend, ad lifecycle manager, health watcher, and DM rumor
//! router together, then spawns one independent task per incoming order
//! until told to shut down -- directly modeled on the teacher's `main.rs`
//! top-level `tokio::select!` loop, generalized from a single ctrl-c arm to
//! a `CancellationToken` observed by every long-lived task.

mod args;
mod config;

use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::signal::unix::SignalKind;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use lspd_core::ads::AdLifecycleManager;
use lspd_core::backend::lnd::{LndRestBackend, REQUIRED_MACAROON_METHODS};
use lspd_core::backend::NodeBackend;
use lspd_core::config::Config;
use lspd_core::health::HealthWatcher;
use lspd_core::lease_log::LeaseLog;
use lspd_core::orchestrator::{spawn_order, OrchestratorDeps};
use lspd_core::rumor::{self, RumorChannels};
use lspd_core::transport::NostrTransport;

use crate::args::ArgsConfig;

#[tokio::main]
async fn main() {
	let args = ArgsConfig::parse();

	let config = match config::load_config(&args).await {
		Ok(config) => config,
		Err(e) => {
			eprintln!("failed to load configuration: {e}");
			std::process::exit(1);
		},
	};

	env_logger::Builder::from_env(
		env_logger::Env::default().default_filter_or(config.log_level.clone()),
	)
	.init();

	if let Err(e) = run(config).await {
		error!("lspd-node exiting: {e}");
		std::process::exit(1);
	}
}

async fn run(config: Config) -> Result<(), lspd_core::error::LspError> {
	let macaroon_bytes = tokio::fs::read(&config.node_macaroon_path)
		.await
		.map_err(|e| lspd_core::error::LspError::NodeError(format!("reading macaroon: {e}")))?;
	let macaroon_hex = encode_hex(&macaroon_bytes);
	let tls_cert_bytes = tokio::fs::read(&config.node_tls_cert_path)
		.await
		.map_err(|e| lspd_core::error::LspError::NodeError(format!("reading TLS cert: {e}")))?;

	let backend: Arc<dyn NodeBackend> = Arc::new(LndRestBackend::new(
		config.node_rest_url.clone(),
		macaroon_hex,
		&tls_cert_bytes,
	)?);

	backend.verify_macaroon_permissions(REQUIRED_MACAROON_METHODS).await?;
	info!("macaroon permissions verified");

	let keys = match &config.nostr_nsec {
		Some(nsec) => NostrTransport::keys_from_nsec(nsec)?,
		None => {
			let keys = NostrTransport::generate_keys();
			warn!(
				"no nostr.nsec configured; generated an ephemeral identity ({}). Set nostr.nsec to keep a stable identity across restarts.",
				keys.public_key()
			);
			keys
		},
	};
	let transport = Arc::new(NostrTransport::connect(keys, &config.nostr_relays).await?);
	info!("connected to {} relay(s) as {}", config.nostr_relays.len(), transport.pubkey());

	let ads = Arc::new(AdLifecycleManager::new(
		Arc::clone(&backend),
		Arc::clone(&transport) as Arc<dyn lspd_core::transport::OfferPublisher>,
	));
	let lease_log = Arc::new(LeaseLog::new(config.lease_log_path.clone()));
	let config = Arc::new(Mutex::new(Arc::new(config)));

	let initial_snapshot = config.lock().await.clone();
	match ads.reload(&initial_snapshot).await {
		Ok(outcome) => info!("initial ad publish: {outcome:?}"),
		Err(e) => warn!("initial ad publish failed: {e}"),
	}

	let cancel = CancellationToken::new();

	let health_watcher =
		HealthWatcher::new(Arc::clone(&backend), Arc::clone(&ads), Arc::clone(&config));
	let health_cancel = cancel.clone();
	let health_handle = tokio::spawn(async move { health_watcher.run(health_cancel).await });

	let (rumor_tx, rumor_rx) = tokio::sync::mpsc::channel(256);
	let listener_transport = Arc::clone(&transport);
	let listener_cancel = cancel.clone();
	let listener_handle = tokio::spawn(async move {
		if let Err(e) = listener_transport.run_rumor_listener(rumor_tx, listener_cancel).await {
			error!("rumor listener ended with an error: {e}");
		}
	});

	let RumorChannels { mut order_requests, order_replies: _, channel_updates: _ } =
		rumor::run(rumor_rx, cancel.clone()).await;

	let deps = Arc::new(OrchestratorDeps {
		backend: Arc::clone(&backend),
		transport: Arc::clone(&transport) as Arc<dyn lspd_core::transport::RumorSender>,
		ads: Arc::clone(&ads),
		lease_log,
		config: Arc::clone(&config),
	});

	let orchestrator_cancel = cancel.clone();
	let orchestrator_handle = tokio::spawn(async move {
		loop {
			tokio::select! {
				_ = orchestrator_cancel.cancelled() => return,
				request = order_requests.recv() => {
					let Some((customer, order)) = request else { return };
					let Some(offer) = deps.ads.current_offer().await else {
						warn!("order from {customer} arrived with no offer currently published");
						continue;
					};
					if offer.id != order.offer_id {
						warn!("order from {customer} references unknown offer {}", order.offer_id);
						continue;
					}
					spawn_order(Arc::clone(&deps), customer, offer, order, orchestrator_cancel.clone());
				}
			}
		}
	});

	let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
		.map_err(|e| lspd_core::error::LspError::NodeError(format!("registering SIGTERM handler: {e}")))?;

	tokio::select! {
		_ = tokio::signal::ctrl_c() => info!("received CTRL-C, shutting down"),
		_ = sigterm.recv() => info!("received SIGTERM, shutting down"),
	}

	cancel.cancel();
	let _ = tokio::join!(health_handle, listener_handle, orchestrator_handle);
	transport.disconnect().await;
	info!("shutdown complete");
	Ok(())
}

fn encode_hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}
