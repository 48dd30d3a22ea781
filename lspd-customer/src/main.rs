// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! `lspd-customer`: a thin driver over the customer-side components
//! (discovery, cost breakdown, order placement, response validation). Not a
//! REPL -- one subcommand, one action, then exit.

mod args;
mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use nostr::key::PublicKey;
use tokio_util::sync::CancellationToken;

use lspd_core::codec::TagCodec;
use lspd_core::customer_validator::validate_response;
use lspd_core::discovery::AdDiscovery;
use lspd_core::error::LspError;
use lspd_core::model::Order;
use lspd_core::rumor::{self, OrderReply, RumorChannels};
use lspd_core::transport::{NostrTransport, RumorSender};

use crate::args::{ArgsConfig, Command};

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

	if let Err(e) = run(config, args.command).await {
		eprintln!("lspd-customer failed: {e}");
		std::process::exit(1);
	}
}

async fn run(
	config: config::CustomerConfig, command: Command,
) -> Result<(), LspError> {
	let keys = match &config.nostr_nsec {
		Some(nsec) => NostrTransport::keys_from_nsec(nsec)?,
		None => {
			let keys = NostrTransport::generate_keys();
			warn!("no nostr.nsec configured; using an ephemeral identity ({})", keys.public_key());
			keys
		},
	};
	let transport = Arc::new(NostrTransport::connect(keys, &config.nostr_relays).await?);

	match command {
		Command::Discover => discover(&transport).await,
		Command::Quote { capacity_sat } => quote(&transport, capacity_sat).await,
		Command::Order {
			lsp_pubkey,
			offer_id,
			target_pubkey_uri,
			lsp_balance_sat,
			client_balance_sat,
			required_channel_confirmations,
			funding_confirms_within_blocks,
			channel_expiry_blocks,
			announce_channel,
			token,
			refund_onchain_address,
			timeout_secs,
		} => {
			place_order(
				&transport,
				&lsp_pubkey,
				Order {
					offer_id,
					target_pubkey_uri,
					lsp_balance_sat,
					client_balance_sat,
					required_channel_confirmations,
					funding_confirms_within_blocks,
					channel_expiry_blocks,
					announce_channel,
					token,
					refund_onchain_address,
				},
				Duration::from_secs(timeout_secs),
			)
			.await
		},
	}
}

async fn discover(transport: &Arc<NostrTransport>) -> Result<(), LspError> {
	let discovery = AdDiscovery::new(Arc::clone(transport));
	let offers = discovery.refresh().await?;
	println!("found {} active offer(s)", offers.len());
	for discovered in &offers {
		println!(
			"{} lsp={} capacity=[{},{}] lsp_balance_max={} fixed_cost={} variable_cost_ppm={} \"{}\"",
			discovered.offer.id,
			discovered.offer.lsp_pubkey,
			discovered.offer.min_capacity_sat,
			discovered.offer.max_capacity_sat,
			discovered.offer.max_lsp_balance_sat,
			discovered.offer.fixed_cost_sats,
			discovered.offer.variable_cost_ppm,
			discovered.content.lsp_message,
		);
	}
	Ok(())
}

async fn quote(transport: &Arc<NostrTransport>, capacity_sat: u64) -> Result<(), LspError> {
	let discovery = AdDiscovery::new(Arc::clone(transport));
	let offers = discovery.refresh().await?;
	let quotes = AdDiscovery::cost_breakdown(&offers, capacity_sat);
	if quotes.is_empty() {
		println!("no offer can currently accommodate a {capacity_sat} sat channel");
		return Ok(());
	}
	for quote in &quotes {
		println!(
			"{} lsp={} fee_sat={} total_sat={} apr={:.2}%",
			quote.offer_id, quote.lsp_pubkey, quote.fee_sat, quote.total_sat, quote.apr_percent
		);
	}
	Ok(())
}

async fn place_order(
	transport: &Arc<NostrTransport>, lsp_pubkey_hex: &str, order: Order, timeout: Duration,
) -> Result<(), LspError> {
	let lsp_pubkey = PublicKey::from_hex(lsp_pubkey_hex)
		.map_err(|e| LspError::ProtocolError(format!("invalid LSP pubkey: {e}")))?;

	let discovery = AdDiscovery::new(Arc::clone(transport));
	let offers = discovery.refresh().await?;
	let offer = offers
		.into_iter()
		.find(|d| d.offer.id == order.offer_id && d.offer.lsp_pubkey == lsp_pubkey_hex)
		.map(|d| d.offer)
		.ok_or_else(|| {
			LspError::ProtocolError(format!("offer {} not found on the relay set", order.offer_id))
		})?;

	let cancel = CancellationToken::new();
	let (rumor_tx, rumor_rx) = tokio::sync::mpsc::channel(64);
	let listener_transport = Arc::clone(transport);
	let listener_cancel = cancel.clone();
	let listener_handle = tokio::spawn(async move {
		let _ = listener_transport.run_rumor_listener(rumor_tx, listener_cancel).await;
	});
	let RumorChannels { order_requests: _, mut order_replies, mut channel_updates } =
		rumor::run(rumor_rx, cancel.clone()).await;

	info!("sending order for offer {} to {lsp_pubkey}", order.offer_id);
	transport.send_rumor(lsp_pubkey, order.to_tags(), String::new()).await?;

	let result =
		wait_for_response(&offer, &order, lsp_pubkey, &mut order_replies, timeout).await;

	if let Ok(()) = result {
		info!("response validated; watching for channel-open progress for {timeout:?}");
		watch_channel_updates(&mut channel_updates, lsp_pubkey, timeout).await;
	}

	cancel.cancel();
	let _ = listener_handle.await;
	transport.disconnect().await;
	result
}

async fn wait_for_response(
	offer: &lspd_core::model::Offer, order: &Order, lsp_pubkey: PublicKey,
	order_replies: &mut tokio::sync::mpsc::Receiver<(PublicKey, OrderReply)>, timeout: Duration,
) -> Result<(), LspError> {
	let deadline = tokio::time::sleep(timeout);
	tokio::pin!(deadline);
	loop {
		tokio::select! {
			_ = &mut deadline => {
				return Err(LspError::ProtocolError("timed out waiting for the LSP's response".to_string()));
			},
			reply = order_replies.recv() => {
				let Some((sender, reply)) = reply else {
					return Err(LspError::ConnectionError("rumor stream ended before a response arrived".to_string()));
				};
				if sender != lsp_pubkey {
					continue;
				}
				match reply {
					OrderReply::Response(response) if response.offer_id == order.offer_id => {
						validate_response(offer, order, &response)?;
						println!("order accepted; pay this invoice to open the channel:");
						println!("{}", response.payment.bolt11);
						return Ok(());
					},
					OrderReply::Error(err) => {
						return Err(LspError::ClientRejected(format!(
							"LSP rejected the order (code {}): {}", err.code, err.error_message
						)));
					},
					_ => continue,
				}
			}
		}
	}
}

async fn watch_channel_updates(
	channel_updates: &mut tokio::sync::mpsc::Receiver<(PublicKey, lspd_core::model::ChannelUpdate)>,
	lsp_pubkey: PublicKey, timeout: Duration,
) {
	let deadline = tokio::time::sleep(timeout);
	tokio::pin!(deadline);
	loop {
		tokio::select! {
			_ = &mut deadline => return,
			update = channel_updates.recv() => {
				let Some((sender, update)) = update else { return };
				if sender != lsp_pubkey {
					continue;
				}
				println!("channel state: {}", update.channel_state);
				if update.channel_state == lspd_core::model::ChannelState::Open {
					return;
				}
			}
		}
	}
}
