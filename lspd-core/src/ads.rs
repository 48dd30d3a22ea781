// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Ad lifecycle (component E): derives this node's one deterministic
//! [`Offer`] id, adjusts the advertised capacity down to what the node can
//! actually solvently back, and republishes only when the computed ad
//! changed since the last tick (spec.md §4.E, §8 scenario S6).

use std::sync::Arc;

use log::{info, warn};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::{NodeBackend, Utxo};
use crate::config::Config;
use crate::error::LspError;
use crate::model::{NodeStats, Offer, OfferContent, OfferStatus};
use crate::transport::OfferPublisher;

/// Fixed overhead of a single-input, two-output spend: `10.5` vbytes of
/// version/locktime/count overhead plus two `31`-vbyte P2WPKH outputs.
const SPEND_TX_OVERHEAD_VB: f64 = 10.5 + 2.0 * 31.0;

/// Outcome of one `reload` tick, reported up to the health loop for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdOutcome {
	Published,
	Unchanged,
	Deactivated,
}

pub struct AdLifecycleManager {
	backend: Arc<dyn NodeBackend>,
	transport: Arc<dyn OfferPublisher>,
	last_published: Mutex<Option<Offer>>,
}

impl AdLifecycleManager {
	pub fn new(backend: Arc<dyn NodeBackend>, transport: Arc<dyn OfferPublisher>) -> Self {
		AdLifecycleManager { backend, transport, last_published: Mutex::new(None) }
	}

	/// The offer most recently published, if any. The orchestrator uses this
	/// to look up the offer an incoming `Order` references -- this node ever
	/// publishes at most one (spec.md §1 Non-goals: "one offer per node").
	pub async fn current_offer(&self) -> Option<Offer> {
		self.last_published.lock().await.clone()
	}

	/// One offer per node: the first 16 bytes of `SHA-256(lsp_pubkey)`
	/// interpreted as a UUID.
	pub fn derive_offer_id(lsp_pubkey_hex: &str) -> Result<Uuid, LspError> {
		let bytes = decode_hex(lsp_pubkey_hex)
			.map_err(|_| LspError::ProtocolError(format!("malformed pubkey hex: {lsp_pubkey_hex}")))?;
		let hash = Sha256::digest(&bytes);
		let mut id_bytes = [0u8; 16];
		id_bytes.copy_from_slice(&hash[..16]);
		Ok(Uuid::from_bytes(id_bytes))
	}

	/// Estimated cost, in satoshis, of spending every one of `utxos` in a
	/// single transaction at `fee_rate_sat_per_vb`.
	pub fn spend_all_cost(utxos: &[Utxo], fee_rate_sat_per_vb: f64) -> u64 {
		let inputs_vb: f64 = utxos.iter().map(|u| u.address_type.spend_cost_vb()).sum();
		((SPEND_TX_OVERHEAD_VB + inputs_vb) * fee_rate_sat_per_vb).round() as u64
	}

	/// Re-derive what this node should be advertising and publish it if it
	/// differs from what was last published; deactivate if the node can no
	/// longer solvently back even the configured minimum lease.
	pub async fn reload(&self, config: &Config) -> Result<AdOutcome, LspError> {
		let identity = self.backend.get_identity().await?;

		let computed = self.compute_active_offer(config, &identity).await?;
		let mut last = self.last_published.lock().await;

		match computed {
			Some((offer, content)) => {
				if last.as_ref() == Some(&offer) {
					return Ok(AdOutcome::Unchanged);
				}
				self.publish(&offer, &content).await?;
				*last = Some(offer);
				Ok(AdOutcome::Published)
			},
			None => {
				if last.as_ref().is_some_and(|o| o.status == OfferStatus::Inactive) {
					return Ok(AdOutcome::Unchanged);
				}
				let offer_id = Self::derive_offer_id(&identity.pubkey_hex)?;
				let inactive = inactive_offer(offer_id, &identity.pubkey_hex, config);
				self.publish(&inactive, &empty_content(config)).await?;
				*last = Some(inactive);
				warn!("node {} can no longer solvently back its minimum lease; ad deactivated", identity.pubkey_hex);
				Ok(AdOutcome::Deactivated)
			},
		}
	}

	/// Unconditionally publish the node's ad as inactive, regardless of
	/// solvency. Used by the health watcher when the node backend itself is
	/// unreachable or unsynced (spec.md §4.F).
	pub async fn deactivate(&self, config: &Config) -> Result<AdOutcome, LspError> {
		let identity = self.backend.get_identity().await?;
		let mut last = self.last_published.lock().await;
		if last.as_ref().is_some_and(|o| o.status == OfferStatus::Inactive) {
			return Ok(AdOutcome::Unchanged);
		}
		let offer_id = Self::derive_offer_id(&identity.pubkey_hex)?;
		let inactive = inactive_offer(offer_id, &identity.pubkey_hex, config);
		self.publish(&inactive, &empty_content(config)).await?;
		*last = Some(inactive);
		Ok(AdOutcome::Deactivated)
	}

	/// `spendable = Σ confirmed_utxo − required_reserve − node's own reserve
	/// − estimated_spend_all_cost` (spec.md §4.E step 3). Shared by ad
	/// computation and the order orchestrator's per-order solvency check
	/// (spec.md §4.G step 2), which refuses any order the node can no
	/// longer solvently back even after the last-published ad was sized.
	pub async fn spendable_balance(&self, config: &Config) -> Result<u64, LspError> {
		let utxos = self.backend.get_utxos().await?;
		let reserve = self.backend.get_reserve().await?;
		let fee_rate = self.backend.estimate_chain_fee_sat_per_vb(6).await?;

		let confirmed: Vec<Utxo> = utxos.into_iter().filter(|u| u.confirmations > 0).collect();
		let total_confirmed_sat: u64 = confirmed.iter().map(|u| u.amount_sat).sum();
		let spend_cost_sat = Self::spend_all_cost(&confirmed, fee_rate);

		Ok(total_confirmed_sat
			.saturating_sub(config.offer.required_reserve_sat)
			.saturating_sub(reserve)
			.saturating_sub(spend_cost_sat))
	}

	async fn compute_active_offer(
		&self, config: &Config, identity: &crate::backend::NodeIdentity,
	) -> Result<Option<(Offer, OfferContent)>, LspError> {
		let offer_id = Self::derive_offer_id(&identity.pubkey_hex)?;
		let aggregates = self.backend.get_node_graph_aggregates(&identity.pubkey_hex).await?;
		let spendable = self.spendable_balance(config).await?;

		if spendable < config.offer.min_lsp_balance_sat {
			return Ok(None);
		}

		let max_lsp_balance_sat = if config.offer.sum_utxos_as_max_capacity {
			spendable
		} else if spendable < config.offer.max_lsp_balance_sat {
			spendable - (spendable % config.offer.channel_max_bucket)
		} else {
			config.offer.max_lsp_balance_sat
		};
		if max_lsp_balance_sat < config.offer.min_lsp_balance_sat {
			return Ok(None);
		}

		let fixed_cost_sats = if config.offer.dynamic_fixed_cost {
			let dynamic_fee_rate = self
				.backend
				.estimate_chain_fee_sat_per_vb(config.offer.dynamic_fixed_cost_conf_target)
				.await?;
			((config.offer.dynamic_fixed_cost_vb_multiplier as f64) * dynamic_fee_rate).round()
				as u64
		} else {
			config.offer.fixed_cost_sats
		};

		let node_sig = if config.offer.include_node_sig {
			Some(self.backend.sign_message(identity.pubkey_hex.as_bytes()).await?)
		} else {
			None
		};

		let offer = Offer {
			id: offer_id,
			lsp_pubkey: identity.pubkey_hex.clone(),
			status: OfferStatus::Active,
			min_capacity_sat: config.offer.min_channel_balance_sat,
			max_capacity_sat: config.offer.max_channel_balance_sat,
			min_lsp_balance_sat: config.offer.min_lsp_balance_sat,
			max_lsp_balance_sat,
			min_client_balance_sat: config.offer.min_client_balance_sat,
			max_client_balance_sat: config.offer.max_client_balance_sat,
			max_channel_expiry_blocks: config.offer.max_channel_expiry_blocks,
			min_required_channel_confirmations: config.offer.min_required_channel_confirmations,
			min_funding_confirms_within_blocks: config.offer.min_funding_confirms_within_blocks,
			fixed_cost_sats,
			variable_cost_ppm: config.offer.variable_cost_ppm,
			max_promised_fee_rate_ppm: config.offer.max_promised_fee_rate_ppm,
			max_promised_base_fee_msat: config.offer.max_promised_base_fee_msat,
			node_sig,
		};

		let content = OfferContent {
			lsp_message: config.offer.lsp_message.clone(),
			node_stats: NodeStats {
				alias: identity.alias.clone(),
				total_capacity_sat: aggregates.total_capacity_sat,
				num_channels: aggregates.channel_count,
				median_outbound_ppm: aggregates.median_outbound_ppm,
				median_inbound_ppm: aggregates.median_inbound_ppm,
			},
		};

		Ok(Some((offer, content)))
	}

	async fn publish(&self, offer: &Offer, content: &OfferContent) -> Result<(), LspError> {
		use crate::codec::{encode_json, TagCodec};
		info!("publishing offer {} (status {})", offer.id, offer.status);
		self.transport.publish_offer(offer.to_tags(), encode_json(content)).await
	}
}

fn inactive_offer(offer_id: Uuid, lsp_pubkey_hex: &str, config: &Config) -> Offer {
	Offer {
		id: offer_id,
		lsp_pubkey: lsp_pubkey_hex.to_string(),
		status: OfferStatus::Inactive,
		min_capacity_sat: config.offer.min_channel_balance_sat,
		max_capacity_sat: config.offer.max_channel_balance_sat,
		min_lsp_balance_sat: config.offer.min_lsp_balance_sat,
		max_lsp_balance_sat: 0,
		min_client_balance_sat: config.offer.min_client_balance_sat,
		max_client_balance_sat: config.offer.max_client_balance_sat,
		max_channel_expiry_blocks: config.offer.max_channel_expiry_blocks,
		min_required_channel_confirmations: config.offer.min_required_channel_confirmations,
		min_funding_confirms_within_blocks: config.offer.min_funding_confirms_within_blocks,
		fixed_cost_sats: config.offer.fixed_cost_sats,
		variable_cost_ppm: config.offer.variable_cost_ppm,
		max_promised_fee_rate_ppm: config.offer.max_promised_fee_rate_ppm,
		max_promised_base_fee_msat: config.offer.max_promised_base_fee_msat,
		node_sig: None,
	}
}

fn empty_content(config: &Config) -> OfferContent {
	OfferContent {
		lsp_message: config.offer.lsp_message.clone(),
		node_stats: NodeStats {
			alias: String::new(),
			total_capacity_sat: 0,
			num_channels: 0,
			median_outbound_ppm: None,
			median_inbound_ppm: None,
		},
	}
}

fn decode_hex(s: &str) -> Result<Vec<u8>, ()> {
	if s.len() % 2 != 0 {
		return Err(());
	}
	(0..s.len())
		.step_by(2)
		.map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::AddressType;

	#[test]
	fn derive_offer_id_is_deterministic() {
		let pubkey = "02".to_string() + &"a".repeat(64);
		let a = AdLifecycleManager::derive_offer_id(&pubkey).unwrap();
		let b = AdLifecycleManager::derive_offer_id(&pubkey).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn derive_offer_id_differs_across_nodes() {
		let a = AdLifecycleManager::derive_offer_id(&("02".to_string() + &"a".repeat(64))).unwrap();
		let b = AdLifecycleManager::derive_offer_id(&("03".to_string() + &"b".repeat(64))).unwrap();
		assert_ne!(a, b);
	}

	fn utxo(amount_sat: u64, address_type: AddressType, confirmations: u32) -> Utxo {
		Utxo {
			txid_hex: "00".repeat(32),
			output_index: 0,
			amount_sat,
			confirmations,
			address_type,
		}
	}

	#[test]
	fn s6_spend_all_cost_matches_example() {
		// Five confirmed P2WPKH utxos, 10 sat/vb: (10.5 + 62 + 5*68) * 10 = 4,125
		let utxos: Vec<Utxo> =
			(0..5).map(|_| utxo(2_000_000, AddressType::P2wpkh, 3)).collect();
		let cost = AdLifecycleManager::spend_all_cost(&utxos, 10.0);
		assert_eq!(cost, 4_125);
	}

	#[test]
	fn spend_all_cost_is_zero_with_no_utxos() {
		assert_eq!(AdLifecycleManager::spend_all_cost(&[], 25.0), 0);
	}

	#[test]
	fn taproot_inputs_cost_less_than_segwit_v0() {
		let taproot = vec![utxo(1_000_000, AddressType::Taproot, 1)];
		let segwit = vec![utxo(1_000_000, AddressType::P2wpkh, 1)];
		assert!(
			AdLifecycleManager::spend_all_cost(&taproot, 10.0)
				< AdLifecycleManager::spend_all_cost(&segwit, 10.0)
		);
	}
}
