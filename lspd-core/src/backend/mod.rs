// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Node Backend Adapter (component J): a capability interface any Lightning
//! node implementation can sit behind. `lnd` provides the concrete LND REST
//! adapter; a new backend is a new module implementing [`NodeBackend`], not
//! a new call site anywhere else in the crate (spec.md §9 design note).

pub mod lnd;

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;

use crate::error::LspError;
use crate::model::{ChannelUpdate, HodlInvoiceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
	P2wpkh,
	NestedP2wpkh,
	Taproot,
	Other,
}

impl AddressType {
	/// Virtual bytes this input contributes when spent, used by the
	/// spend-all-cost estimate in `ads.rs` (spec.md §4.E).
	pub fn spend_cost_vb(&self) -> f64 {
		match self {
			AddressType::P2wpkh | AddressType::NestedP2wpkh => 68.0,
			AddressType::Taproot => 57.5,
			AddressType::Other => 0.0,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
	pub txid_hex: String,
	pub output_index: u32,
	pub amount_sat: u64,
	pub confirmations: u32,
	pub address_type: AddressType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
	pub healthy: bool,
	pub chain_synced: bool,
	pub graph_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
	pub pubkey_hex: String,
	pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeGraphAggregates {
	pub total_capacity_sat: u64,
	pub channel_count: u32,
	pub median_outbound_ppm: Option<u32>,
	pub median_inbound_ppm: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannelRequest {
	pub target_pubkey_uri: String,
	pub funding_sat: u64,
	pub push_sat: u64,
	pub private: bool,
}

pub type ChannelUpdateStream = Pin<Box<dyn Stream<Item = Result<ChannelUpdate, LspError>> + Send>>;
pub type InvoiceStateStream = Pin<Box<dyn Stream<Item = HodlInvoiceState> + Send>>;

impl fmt::Debug for dyn NodeBackend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("dyn NodeBackend")
	}
}

/// Uniform contract for a Lightning node implementation. Every operation is
/// async and may fail with a structured [`LspError`] (spec.md §4.J).
#[async_trait]
pub trait NodeBackend: Send + Sync {
	async fn check_health(&self) -> Result<HealthStatus, LspError>;

	async fn get_identity(&self) -> Result<NodeIdentity, LspError>;

	/// Current chain tip height, used to stamp a lease's start/end block in
	/// the lease log (spec.md §6; backed by the node's `GetBestBlock`).
	async fn get_current_block_height(&self) -> Result<u32, LspError>;

	async fn get_node_graph_aggregates(
		&self, pubkey_hex: &str,
	) -> Result<NodeGraphAggregates, LspError>;

	async fn get_utxos(&self) -> Result<Vec<Utxo>, LspError>;

	async fn get_reserve(&self) -> Result<u64, LspError>;

	async fn estimate_chain_fee_sat_per_vb(&self, conf_target: u32) -> Result<f64, LspError>;

	async fn create_hodl_invoice(
		&self, payment_hash_hex: &str, amount_sat: u64, expiry_secs: u64,
	) -> Result<String, LspError>;

	/// Subscribe to a hodl invoice's state transitions. The stream ends
	/// (without error) when the node closes its side; the caller treats
	/// stream-end without `HOLD` as "let it expire" per spec.md §4.G step 5.
	fn subscribe_invoice(&self, payment_hash_hex: &str) -> InvoiceStateStream;

	async fn settle_hodl_invoice(&self, preimage_hex: &str) -> Result<(), LspError>;

	async fn cancel_hodl_invoice(&self, payment_hash_hex: &str) -> Result<(), LspError>;

	async fn connect_peer(&self, target_pubkey_uri: &str, timeout: Duration)
		-> Result<(), LspError>;

	fn open_channel(&self, request: OpenChannelRequest) -> ChannelUpdateStream;

	async fn sign_message(&self, msg: &[u8]) -> Result<String, LspError>;

	/// Consulted once at startup; a missing required macaroon URI is fatal
	/// (spec.md §6).
	async fn verify_macaroon_permissions(&self, required: &[&str]) -> Result<(), LspError>;
}
