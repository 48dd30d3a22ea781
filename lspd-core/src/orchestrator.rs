// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Order orchestrator (component G): the core per-order state machine. Each
//! incoming `Order` is handed its own independent task -- there is no
//! ordering or shared state across orders beyond the node backend and the
//! lease log, both of which are already safe for concurrent use.
//!
//! The invariant this module exists to uphold (spec.md §8): once a hodl
//! invoice has been created for an order, the task must not terminate
//! without either settling it (by reaching `OPEN`), cancelling it, or
//! leaving it to expire untouched because it never held a payment in the
//! first place. Every exit path after invoice creation below is either a
//! successful `Ok(())` (lease recorded, or the invoice expired before HOLD
//! with nothing to release), or an `Err` that the caller turns into a
//! cancel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{error, info, warn};
use nostr::key::PublicKey;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ads::AdLifecycleManager;
use crate::backend::{NodeBackend, OpenChannelRequest};
use crate::codec::TagCodec;
use crate::config::{Config, PEER_CONNECT_TIMEOUT_SECS};
use crate::error::LspError;
use crate::lease_log::{LeaseLog, LeaseRecord};
use crate::model::{
	ChannelInfo, ChannelState, ChannelUpdate, HodlInvoiceState, Offer, Order, OrderError,
	OrderResponse, OrderState, Payment,
};
use crate::preimage::Preimage;
use crate::pricing::{calculate_lease_cost, total_cost};
use crate::transport::RumorSender;

/// How long an unpaid hodl invoice stays valid (spec.md §4.G step 4).
const HODL_INVOICE_EXPIRY_SECS: u64 = 1200;

pub struct OrchestratorDeps {
	pub backend: Arc<dyn NodeBackend>,
	pub transport: Arc<dyn RumorSender>,
	pub ads: Arc<AdLifecycleManager>,
	pub lease_log: Arc<LeaseLog>,
	pub config: Arc<Mutex<Arc<Config>>>,
}

/// Spawn the task that will see one order through to completion (lease
/// recorded) or failure (invoice cancelled, customer notified).
pub fn spawn_order(
	deps: Arc<OrchestratorDeps>, customer: PublicKey, offer: Offer, order: Order,
	cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		if let Err(e) = run_order(&deps, customer, &offer, &order, &cancel).await {
			warn!("order for offer {} from {customer} failed: {e}", offer.id);
			let order_error = OrderError::from(&e);
			if let Err(send_err) =
				deps.transport.send_rumor(customer, order_error.to_tags(), String::new()).await
			{
				error!("failed to notify customer {customer} of order failure: {send_err}");
			}
		}
	})
}

async fn run_order(
	deps: &OrchestratorDeps, customer: PublicKey, offer: &Offer, order: &Order,
	cancel: &CancellationToken,
) -> Result<(), LspError> {
	crate::pricing::validate_order(offer, order)?;

	let capacity = order.total_capacity_sat();

	// CHECK_SOLVENCY (spec.md §4.G step 2): refuse if the UTXO fetch itself
	// fails, or if what the node could actually raise right now can't cover
	// this order's capacity.
	let config = deps.config.lock().await.clone();
	let spendable = deps
		.ads
		.spendable_balance(&config)
		.await
		.map_err(|e| LspError::InvalidParams(format!("solvency check failed: {e}")))?;
	if spendable < capacity {
		return Err(LspError::InvalidParams(format!(
			"insufficient spendable balance ({spendable} sat) for a {capacity} sat channel"
		)));
	}

	let fee = calculate_lease_cost(
		offer.fixed_cost_sats,
		offer.variable_cost_ppm,
		capacity,
		order.channel_expiry_blocks,
		offer.max_channel_expiry_blocks,
	);
	let total = total_cost(fee, order.client_balance_sat);

	deps.backend
		.connect_peer(&order.target_pubkey_uri, Duration::from_secs(PEER_CONNECT_TIMEOUT_SECS))
		.await?;

	let preimage = Preimage::generate();
	let bolt11 =
		deps.backend.create_hodl_invoice(&preimage.hex_hash, total, HODL_INVOICE_EXPIRY_SECS).await?;

	let created_at = now_unix();
	let response = OrderResponse {
		offer_id: order.offer_id,
		lsp_balance_sat: order.lsp_balance_sat,
		client_balance_sat: order.client_balance_sat,
		required_channel_confirmations: order.required_channel_confirmations,
		funding_confirms_within_blocks: order.funding_confirms_within_blocks,
		channel_expiry_blocks: order.channel_expiry_blocks,
		announce_channel: order.announce_channel,
		created_at,
		order_state: OrderState::Created,
		payment: Payment {
			bolt11,
			invoice_state: HodlInvoiceState::ExpectPayment,
			expires_at: created_at + HODL_INVOICE_EXPIRY_SECS as i64,
			fee_total_sat: fee,
			order_total_sat: total,
		},
		channel: None,
	};
	deps.transport.send_rumor(customer, response.to_tags(), String::new()).await?;

	// An invoice now exists. From here every exit path must cancel it
	// unless it settled.
	let result = drive_invoice_and_channel(deps, customer, offer, order, &preimage, cancel).await;
	if let Err(ref e) = result {
		if e.requires_invoice_cancel() {
			if let Err(cancel_err) = deps.backend.cancel_hodl_invoice(&preimage.hex_hash).await {
				error!("failed to cancel invoice {}: {cancel_err}", preimage.hex_hash);
			}
		}
	}
	result
}

async fn drive_invoice_and_channel(
	deps: &OrchestratorDeps, customer: PublicKey, offer: &Offer, order: &Order,
	preimage: &Preimage, cancel: &CancellationToken,
) -> Result<(), LspError> {
	let mut invoice_states = deps.backend.subscribe_invoice(&preimage.hex_hash);

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return Err(LspError::Cancelled),
			state = invoice_states.next() => {
				match state {
					Some(HodlInvoiceState::Hold) => break,
					Some(HodlInvoiceState::ExpectPayment) => continue,
					Some(_other) | None => {
						// The invoice never reached HOLD: nothing was ever
						// held against the customer, so the order just ends.
						// No cancel, no OrderError DM -- the invoice is left
						// to expire on its own (spec.md §4.G step 5, §8
						// boundary "Invoice subscription closes before
						// HOLD").
						info!(
							"invoice {} ended before reaching HOLD; letting it expire",
							preimage.hex_hash
						);
						return Ok(());
					},
				}
			}
		}
	}

	let target_pubkey_uri = order.target_pubkey_uri.clone();
	let mut channel_updates = deps.backend.open_channel(OpenChannelRequest {
		target_pubkey_uri,
		funding_sat: order.total_capacity_sat(),
		push_sat: order.client_balance_sat,
		private: !order.announce_channel,
	});

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return Err(LspError::Cancelled),
			update = channel_updates.next() => {
				let update = match update {
					Some(Ok(update)) => update,
					Some(Err(e)) => return Err(e),
					None => {
						return Err(LspError::NodeError(
							"channel-open stream ended before reaching OPEN".to_string(),
						));
					},
				};

				deps.transport.send_rumor(customer, update.to_tags(), String::new()).await?;

				match update.channel_state {
					ChannelState::Pending => {
						// The channel's funding output now ties up part of the
						// node's spendable balance; the advertised offer may no
						// longer reflect what's actually available (spec.md
						// §4.G step 7).
						let config = deps.config.lock().await.clone();
						if let Err(e) = deps.ads.reload(&config).await {
							warn!("ad reload after pending channel open failed: {e}");
						}
						continue;
					},
					ChannelState::Open => {
						return finish_lease(deps, customer, offer, order, preimage, &update).await;
					},
					ChannelState::Closed | ChannelState::Unknown => {
						return Err(LspError::NodeError(format!(
							"channel open ended in state {}", update.channel_state
						)));
					},
				}
			}
		}
	}
}

async fn finish_lease(
	deps: &OrchestratorDeps, customer: PublicKey, offer: &Offer, order: &Order,
	preimage: &Preimage, update: &ChannelUpdate,
) -> Result<(), LspError> {
	deps.backend.settle_hodl_invoice(&preimage.hex).await?;

	let funded_at = now_unix();
	let total_fee = calculate_lease_cost(
		offer.fixed_cost_sats,
		offer.variable_cost_ppm,
		order.total_capacity_sat(),
		order.channel_expiry_blocks,
		offer.max_channel_expiry_blocks,
	);
	let lease_start_block = deps.backend.get_current_block_height().await?;
	deps.lease_log
		.append(LeaseRecord {
			pubkey_uri: order.target_pubkey_uri.clone(),
			lsp_balance_sat: order.lsp_balance_sat,
			client_balance_sat: order.client_balance_sat,
			total_capacity: order.total_capacity_sat(),
			channel_expiry_blocks: order.channel_expiry_blocks,
			lease_start_block,
			lease_end_block: lease_start_block + order.channel_expiry_blocks,
			total_fee,
			total_cost: total_cost(total_fee, order.client_balance_sat),
			payment_hash: preimage.hex_hash.clone(),
			channel_point: format!(
				"{}:{}",
				update.txid_hex.clone().unwrap_or_default(),
				update.output_index.unwrap_or(0)
			),
		})
		.await?;

	let response = OrderResponse {
		offer_id: order.offer_id,
		lsp_balance_sat: order.lsp_balance_sat,
		client_balance_sat: order.client_balance_sat,
		required_channel_confirmations: order.required_channel_confirmations,
		funding_confirms_within_blocks: order.funding_confirms_within_blocks,
		channel_expiry_blocks: order.channel_expiry_blocks,
		announce_channel: order.announce_channel,
		created_at: funded_at,
		order_state: OrderState::Completed,
		payment: Payment {
			bolt11: String::new(),
			invoice_state: HodlInvoiceState::Paid,
			expires_at: 0,
			fee_total_sat: calculate_lease_cost(
				offer.fixed_cost_sats,
				offer.variable_cost_ppm,
				order.total_capacity_sat(),
				order.channel_expiry_blocks,
				offer.max_channel_expiry_blocks,
			),
			order_total_sat: total_cost(
				calculate_lease_cost(
					offer.fixed_cost_sats,
					offer.variable_cost_ppm,
					order.total_capacity_sat(),
					order.channel_expiry_blocks,
					offer.max_channel_expiry_blocks,
				),
				order.client_balance_sat,
			),
		},
		channel: Some(ChannelInfo {
			funding_txid_hex: update.txid_hex.clone(),
			funding_output_index: update.output_index,
			funded_at: Some(funded_at),
			expires_at: Some(funded_at + blocks_to_seconds(order.channel_expiry_blocks)),
		}),
	};
	deps.transport.send_rumor(customer, response.to_tags(), String::new()).await?;

	info!("lease recorded for offer {} ({} sat)", offer.id, order.total_capacity_sat());

	// Capacity just moved out of the node's spendable balance; refresh what
	// we advertise rather than waiting for the next health tick.
	let config = deps.config.lock().await.clone();
	if let Err(e) = deps.ads.reload(&config).await {
		warn!("ad reload after settling a lease failed: {e}");
	}

	Ok(())
}

fn now_unix() -> i64 {
	chrono::Utc::now().timestamp()
}

/// Lightning mines roughly one block every 10 minutes.
fn blocks_to_seconds(blocks: u32) -> i64 {
	blocks as i64 * 600
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	use async_stream::stream;
	use async_trait::async_trait;
	use uuid::Uuid;

	use crate::backend::{
		AddressType, ChannelUpdateStream, HealthStatus, InvoiceStateStream, NodeGraphAggregates,
		NodeIdentity, Utxo,
	};
	use crate::config::{Config, TomlConfig};
	use crate::model::{ChannelState, OfferStatus};
	use crate::transport::{OfferPublisher, RumorSender};

	#[test]
	fn blocks_to_seconds_matches_ten_minute_blocks() {
		assert_eq!(blocks_to_seconds(6), 3600);
	}

	/// An in-memory `NodeBackend` whose invoice and channel streams replay a
	/// fixed, per-test script instead of talking to a real node.
	struct FakeBackend {
		invoice_states: Vec<HodlInvoiceState>,
		channel_updates: Vec<ChannelUpdate>,
		settle_calls: AtomicU32,
		cancel_calls: AtomicU32,
	}

	#[async_trait]
	impl NodeBackend for FakeBackend {
		async fn check_health(&self) -> Result<HealthStatus, LspError> {
			Ok(HealthStatus { healthy: true, chain_synced: true, graph_synced: true })
		}
		async fn get_identity(&self) -> Result<NodeIdentity, LspError> {
			Ok(NodeIdentity { pubkey_hex: "02".to_string() + &"a".repeat(64), alias: "fake".into() })
		}
		async fn get_current_block_height(&self) -> Result<u32, LspError> {
			Ok(800_000)
		}
		async fn get_node_graph_aggregates(
			&self, _pubkey_hex: &str,
		) -> Result<NodeGraphAggregates, LspError> {
			Ok(NodeGraphAggregates {
				total_capacity_sat: 0,
				channel_count: 0,
				median_outbound_ppm: None,
				median_inbound_ppm: None,
			})
		}
		async fn get_utxos(&self) -> Result<Vec<Utxo>, LspError> {
			Ok(vec![Utxo {
				txid_hex: "aa".repeat(32),
				output_index: 0,
				amount_sat: 20_000_000,
				confirmations: 6,
				address_type: AddressType::P2wpkh,
			}])
		}
		async fn get_reserve(&self) -> Result<u64, LspError> {
			Ok(0)
		}
		async fn estimate_chain_fee_sat_per_vb(&self, _conf_target: u32) -> Result<f64, LspError> {
			Ok(1.0)
		}
		async fn create_hodl_invoice(
			&self, _payment_hash_hex: &str, _amount_sat: u64, _expiry_secs: u64,
		) -> Result<String, LspError> {
			Ok("lnbcrt1fake".to_string())
		}
		fn subscribe_invoice(&self, _payment_hash_hex: &str) -> InvoiceStateStream {
			let states = self.invoice_states.clone();
			Box::pin(stream! {
				for s in states {
					yield s;
				}
			})
		}
		async fn settle_hodl_invoice(&self, _preimage_hex: &str) -> Result<(), LspError> {
			self.settle_calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
		async fn cancel_hodl_invoice(&self, _payment_hash_hex: &str) -> Result<(), LspError> {
			self.cancel_calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
		async fn connect_peer(
			&self, _target_pubkey_uri: &str, _timeout: Duration,
		) -> Result<(), LspError> {
			Ok(())
		}
		fn open_channel(&self, _request: OpenChannelRequest) -> ChannelUpdateStream {
			let updates = self.channel_updates.clone();
			Box::pin(stream! {
				for u in updates {
					yield Ok(u);
				}
			})
		}
		async fn sign_message(&self, _msg: &[u8]) -> Result<String, LspError> {
			Ok("sig".to_string())
		}
		async fn verify_macaroon_permissions(&self, _required: &[&str]) -> Result<(), LspError> {
			Ok(())
		}
	}

	/// An in-memory `RumorSender`/`OfferPublisher` that just records what it
	/// was asked to send, so an orchestrator test can assert on the
	/// customer-visible DM sequence without a relay.
	struct FakeTransport {
		sent: Mutex<Vec<(PublicKey, Vec<(String, String)>, String)>>,
	}

	impl FakeTransport {
		fn new() -> Self {
			FakeTransport { sent: Mutex::new(Vec::new()) }
		}
	}

	#[async_trait]
	impl RumorSender for FakeTransport {
		async fn send_rumor(
			&self, receiver: PublicKey, tags: Vec<(String, String)>, content: String,
		) -> Result<(), LspError> {
			self.sent.lock().await.push((receiver, tags, content));
			Ok(())
		}
	}

	#[async_trait]
	impl OfferPublisher for FakeTransport {
		async fn publish_offer(
			&self, _tags: Vec<(String, String)>, _content: String,
		) -> Result<(), LspError> {
			Ok(())
		}
	}

	fn s1_offer() -> (Uuid, Offer) {
		let id = Uuid::new_v4();
		let offer = Offer {
			id,
			lsp_pubkey: "02".to_string() + &"a".repeat(64),
			status: OfferStatus::Active,
			min_capacity_sat: 1_000_000,
			max_capacity_sat: 10_000_000,
			min_lsp_balance_sat: 1_000_000,
			max_lsp_balance_sat: 10_000_000,
			min_client_balance_sat: 0,
			max_client_balance_sat: 5_000_000,
			max_channel_expiry_blocks: 12960,
			min_required_channel_confirmations: 0,
			min_funding_confirms_within_blocks: 2,
			fixed_cost_sats: 75_000,
			variable_cost_ppm: 10_000,
			max_promised_fee_rate_ppm: 2500,
			max_promised_base_fee_msat: 1000,
			node_sig: None,
		};
		(id, offer)
	}

	fn s1_order(offer_id: Uuid) -> Order {
		Order {
			offer_id,
			target_pubkey_uri: format!("{}@127.0.0.1:9735", "03".to_string() + &"b".repeat(64)),
			lsp_balance_sat: 5_000_000,
			client_balance_sat: 0,
			required_channel_confirmations: 0,
			funding_confirms_within_blocks: 6,
			channel_expiry_blocks: 4320,
			announce_channel: false,
			token: None,
			refund_onchain_address: None,
		}
	}

	fn test_config() -> Config {
		let toml = TomlConfig::from_str(
			r#"
			[node]
			rest_url = "https://127.0.0.1:8080"
			macaroon_path = "/tmp/admin.macaroon"
			tls_cert_path = "/tmp/tls.cert"
			"#,
		)
		.unwrap();
		Config::from_toml(toml).unwrap()
	}

	fn tag(tags: &[(String, String)], key: &str) -> Option<String> {
		tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
	}

	struct TestHarness {
		deps: Arc<OrchestratorDeps>,
		backend: Arc<FakeBackend>,
		transport: Arc<FakeTransport>,
		lease_dir: std::path::PathBuf,
	}

	fn build_harness(invoice_states: Vec<HodlInvoiceState>, channel_updates: Vec<ChannelUpdate>) -> TestHarness {
		let backend = Arc::new(FakeBackend {
			invoice_states,
			channel_updates,
			settle_calls: AtomicU32::new(0),
			cancel_calls: AtomicU32::new(0),
		});
		let backend_dyn: Arc<dyn NodeBackend> = backend.clone();

		let transport = Arc::new(FakeTransport::new());
		let rumor_transport: Arc<dyn RumorSender> = transport.clone();
		let publish_transport: Arc<dyn OfferPublisher> = transport.clone();

		let ads = Arc::new(AdLifecycleManager::new(backend_dyn.clone(), publish_transport));
		let lease_dir =
			std::env::temp_dir().join(format!("lspd-orchestrator-test-{}", Uuid::new_v4()));
		let lease_log = Arc::new(LeaseLog::new(lease_dir.join("lease-history.json")));
		let config = Arc::new(Mutex::new(Arc::new(test_config())));

		let deps = Arc::new(OrchestratorDeps {
			backend: backend_dyn,
			transport: rumor_transport,
			ads,
			lease_log,
			config,
		});

		TestHarness { deps, backend, transport, lease_dir }
	}

	#[tokio::test]
	async fn s1_happy_path_settles_and_records_lease() {
		let (offer_id, offer) = s1_offer();
		let order = s1_order(offer_id);
		let harness = build_harness(
			vec![HodlInvoiceState::ExpectPayment, HodlInvoiceState::Hold],
			vec![
				ChannelUpdate {
					channel_state: ChannelState::Pending,
					txid_hex: Some("cc".repeat(32)),
					output_index: Some(0),
				},
				ChannelUpdate {
					channel_state: ChannelState::Open,
					txid_hex: Some("cc".repeat(32)),
					output_index: Some(0),
				},
			],
		);

		let customer = nostr::key::Keys::generate().public_key();
		let cancel = CancellationToken::new();
		spawn_order(Arc::clone(&harness.deps), customer, offer, order, cancel)
			.await
			.expect("orchestrator task panicked");

		assert_eq!(harness.backend.settle_calls.load(Ordering::SeqCst), 1);
		assert_eq!(harness.backend.cancel_calls.load(Ordering::SeqCst), 0);

		let leases = harness.deps.lease_log.all().await.unwrap();
		assert_eq!(leases.len(), 1);
		let lease = &leases[0];
		assert_eq!(lease.total_capacity, 5_000_000);
		assert_eq!(lease.total_fee, 158_333);
		assert_eq!(lease.total_cost, 158_333);
		assert_eq!(lease.channel_expiry_blocks, 4320);
		assert_eq!(lease.lease_start_block, 800_000);
		assert_eq!(lease.lease_end_block, 804_320);
		assert_eq!(lease.channel_point, format!("{}:0", "cc".repeat(32)));
		assert!(!lease.payment_hash.is_empty());

		let sent = harness.transport.sent.lock().await;
		assert_eq!(sent.len(), 3, "created response, pending update, completed response");
		assert_eq!(tag(&sent[0].1, "order_state").as_deref(), Some("CREATED"));
		assert_eq!(tag(&sent[2].1, "order_state").as_deref(), Some("COMPLETED"));

		let _ = tokio::fs::remove_dir_all(&harness.lease_dir).await;
	}

	#[tokio::test]
	async fn s5_channel_unknown_after_hold_cancels_invoice_without_lease() {
		let (offer_id, offer) = s1_offer();
		let order = s1_order(offer_id);
		let harness = build_harness(
			vec![HodlInvoiceState::ExpectPayment, HodlInvoiceState::Hold],
			vec![ChannelUpdate { channel_state: ChannelState::Unknown, txid_hex: None, output_index: None }],
		);

		let customer = nostr::key::Keys::generate().public_key();
		let cancel = CancellationToken::new();
		spawn_order(Arc::clone(&harness.deps), customer, offer, order, cancel)
			.await
			.expect("orchestrator task panicked");

		assert_eq!(harness.backend.settle_calls.load(Ordering::SeqCst), 0);
		assert_eq!(harness.backend.cancel_calls.load(Ordering::SeqCst), 1);
		assert!(harness.deps.lease_log.all().await.unwrap().is_empty());

		let sent = harness.transport.sent.lock().await;
		// Created response, the UNKNOWN channel update, then the OrderError
		// -- never an OPEN update, never a lease (spec.md §8 scenario S5).
		assert_eq!(sent.len(), 3);
		assert_eq!(tag(&sent[0].1, "order_state").as_deref(), Some("CREATED"));
		assert_eq!(tag(&sent[1].1, "channel_state").as_deref(), Some("UNKNOWN"));
		assert!(tag(&sent[2].1, "code").is_some());

		let _ = tokio::fs::remove_dir_all(&harness.lease_dir).await;
	}
}
