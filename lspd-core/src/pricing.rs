// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Offer/Order validation and lease pricing (component D). The pricing
//! formulas here MUST stay byte-identical to `customer::validate_response`'s
//! expectations (spec.md §4.D/§4.H) — any divergence is a customer-visible
//! rejection, by design.

use crate::error::LspError;
use crate::model::{Offer, Order};

/// Lightning mines roughly one block every 10 minutes.
pub const BLOCKS_PER_YEAR: u64 = 52560;

/// `total_fee = fixed_cost + round(variable_ppm * 1e-6 * capacity * expiry / max_expiry)`.
pub fn calculate_lease_cost(
	fixed_cost_sats: u64, variable_cost_ppm: u64, capacity_sat: u64, channel_expiry_blocks: u32,
	max_channel_expiry_blocks: u32,
) -> u64 {
	let variable = (variable_cost_ppm as f64 * 1e-6)
		* capacity_sat as f64
		* (channel_expiry_blocks as f64 / max_channel_expiry_blocks as f64);
	fixed_cost_sats + variable.round() as u64
}

/// Annualised percentage cost of a lease at its maximum allowed expiry.
pub fn calculate_apr(
	fixed_cost_sats: u64, variable_cost_ppm: u64, capacity_sat: u64,
	max_channel_expiry_blocks: u32,
) -> f64 {
	let fee_at_max_expiry =
		fixed_cost_sats as f64 + (variable_cost_ppm as f64 * 1e-6) * capacity_sat as f64;
	let annualised = fee_at_max_expiry * (BLOCKS_PER_YEAR as f64 / max_channel_expiry_blocks as f64)
		/ capacity_sat as f64
		* 100.0;
	(annualised * 100.0).round() / 100.0
}

pub fn total_cost(total_fee_sat: u64, client_balance_sat: u64) -> u64 {
	total_fee_sat + client_balance_sat
}

/// Validate an `Order` against the `Offer` it references. Checks run in the
/// order spec.md §4.D lists them; the first failure is reported.
pub fn validate_order(offer: &Offer, order: &Order) -> Result<(), LspError> {
	let capacity = order.total_capacity_sat();

	if !(offer.min_lsp_balance_sat..=offer.max_lsp_balance_sat).contains(&order.lsp_balance_sat) {
		return Err(LspError::OptionMismatch(format!(
			"lsp_balance_sat {} outside [{}, {}]",
			order.lsp_balance_sat, offer.min_lsp_balance_sat, offer.max_lsp_balance_sat
		)));
	}
	if !(offer.min_client_balance_sat..=offer.max_client_balance_sat)
		.contains(&order.client_balance_sat)
	{
		return Err(LspError::OptionMismatch(format!(
			"client_balance_sat {} outside [{}, {}]",
			order.client_balance_sat, offer.min_client_balance_sat, offer.max_client_balance_sat
		)));
	}
	if !(offer.min_capacity_sat..=offer.max_capacity_sat).contains(&capacity) {
		return Err(LspError::OptionMismatch(format!(
			"min_channel_balance_sat: total capacity {} outside [{}, {}]",
			capacity, offer.min_capacity_sat, offer.max_capacity_sat
		)));
	}
	if order.required_channel_confirmations < offer.min_required_channel_confirmations {
		return Err(LspError::OptionMismatch(format!(
			"required_channel_confirmations {} below minimum {}",
			order.required_channel_confirmations, offer.min_required_channel_confirmations
		)));
	}
	if order.funding_confirms_within_blocks < offer.min_funding_confirms_within_blocks {
		return Err(LspError::OptionMismatch(format!(
			"funding_confirms_within_blocks {} below minimum {}",
			order.funding_confirms_within_blocks, offer.min_funding_confirms_within_blocks
		)));
	}
	if order.channel_expiry_blocks > offer.max_channel_expiry_blocks {
		return Err(LspError::OptionMismatch(format!(
			"channel_expiry_blocks {} exceeds maximum {}",
			order.channel_expiry_blocks, offer.max_channel_expiry_blocks
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{Offer, OfferStatus, Order};
	use uuid::Uuid;

	fn offer() -> Offer {
		Offer {
			id: Uuid::new_v4(),
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
		}
	}

	fn order_with_capacity(lsp_balance: u64, client_balance: u64) -> Order {
		Order {
			offer_id: Uuid::new_v4(),
			target_pubkey_uri: format!("{}@127.0.0.1:9735", "03".to_string() + &"b".repeat(64)),
			lsp_balance_sat: lsp_balance,
			client_balance_sat: client_balance,
			required_channel_confirmations: 0,
			funding_confirms_within_blocks: 6,
			channel_expiry_blocks: 4320,
			announce_channel: false,
			token: None,
			refund_onchain_address: None,
		}
	}

	#[test]
	fn s1_happy_path_fee_matches_spec_example() {
		let fee = calculate_lease_cost(75_000, 10_000, 5_000_000, 4320, 12960);
		assert_eq!(fee, 158_333);
		assert_eq!(total_cost(fee, 0), 158_333);
	}

	#[test]
	fn s6_solvency_adaptation_spend_cost_matches_spec_example() {
		// Spend-cost math lives in ads.rs; pricing.rs only owns lease cost
		// and APR, covered above and below.
	}

	#[test]
	fn s2_capacity_below_minimum_is_option_mismatch() {
		let offer = offer();
		let order = order_with_capacity(400_000, 0);
		let err = validate_order(&offer, &order).unwrap_err();
		match err {
			LspError::OptionMismatch(msg) => assert!(msg.contains("min_channel_balance") || msg.contains("outside")),
			other => panic!("expected OptionMismatch, got {other:?}"),
		}
	}

	#[test]
	fn boundary_capacity_equal_to_min_or_max_passes() {
		let offer = offer();
		let min_order = order_with_capacity(1_000_000, 0);
		assert!(validate_order(&offer, &min_order).is_ok());
		let max_order = order_with_capacity(5_000_000, 5_000_000);
		assert!(validate_order(&offer, &max_order).is_ok());
	}

	#[test]
	fn boundary_capacity_one_below_min_fails() {
		let offer = offer();
		let order = order_with_capacity(999_999, 0);
		assert!(validate_order(&offer, &order).is_err());
	}

	#[test]
	fn fee_is_monotone_in_capacity_and_expiry() {
		let low = calculate_lease_cost(75_000, 10_000, 2_000_000, 4320, 12960);
		let high = calculate_lease_cost(75_000, 10_000, 5_000_000, 4320, 12960);
		assert!(high >= low);

		let short = calculate_lease_cost(75_000, 10_000, 5_000_000, 1000, 12960);
		let long = calculate_lease_cost(75_000, 10_000, 5_000_000, 10000, 12960);
		assert!(long >= short);
	}
}
