// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Customer-side response validation (component H). An `OrderResponse` is
//! the LSP's word alone; a customer who trusted it blindly could be quoted
//! one fee and billed another, or handed an invoice payable to a different
//! node entirely. Every field the LSP could lie about gets cross-checked
//! against the `Order` the customer actually sent and the `Offer` terms it
//! was built under (spec.md §4.H).

use crate::error::LspError;
use crate::invoice::decode_invoice;
use crate::model::{HodlInvoiceState, Offer, Order, OrderResponse};
use crate::pricing::{calculate_lease_cost, total_cost};

/// Validate `response` against the `order` that produced it and the `offer`
/// it was priced under. Checks run in the order listed below; the first
/// mismatch is reported and later checks are skipped.
///
/// 1. the response echoes the exact terms the order asked for
/// 2. those terms still respect the offer's bounds
/// 3. the quoted fee matches the same formula the LSP is supposed to use
/// 4. the invoice pays the right amount, to the right node, and isn't
///    already resolved one way or the other
pub fn validate_response(
	offer: &Offer, order: &Order, response: &OrderResponse,
) -> Result<(), LspError> {
	if response.offer_id != order.offer_id {
		return Err(LspError::ProtocolError(format!(
			"response offer_id {} does not match requested offer_id {}",
			response.offer_id, order.offer_id
		)));
	}
	if response.lsp_balance_sat != order.lsp_balance_sat
		|| response.client_balance_sat != order.client_balance_sat
	{
		return Err(LspError::ProtocolError(
			"response balances do not match the requested order".to_string(),
		));
	}
	if response.required_channel_confirmations != order.required_channel_confirmations
		|| response.funding_confirms_within_blocks != order.funding_confirms_within_blocks
		|| response.channel_expiry_blocks != order.channel_expiry_blocks
	{
		return Err(LspError::ProtocolError(
			"response terms do not match the requested order".to_string(),
		));
	}
	if response.announce_channel != order.announce_channel {
		return Err(LspError::ProtocolError(
			"response announce_channel does not match the requested order".to_string(),
		));
	}

	if response.channel_expiry_blocks > offer.max_channel_expiry_blocks {
		return Err(LspError::ProtocolError(
			"response channel_expiry_blocks exceeds the offer's maximum".to_string(),
		));
	}
	let capacity = response.total_capacity_sat();
	if !(offer.min_capacity_sat..=offer.max_capacity_sat).contains(&capacity) {
		return Err(LspError::ProtocolError(
			"response capacity falls outside the offer's bounds".to_string(),
		));
	}

	let expected_fee = calculate_lease_cost(
		offer.fixed_cost_sats,
		offer.variable_cost_ppm,
		capacity,
		response.channel_expiry_blocks,
		offer.max_channel_expiry_blocks,
	);
	if response.payment.fee_total_sat != expected_fee {
		return Err(LspError::ProtocolError(format!(
			"quoted fee {} does not match the expected fee {}",
			response.payment.fee_total_sat, expected_fee
		)));
	}
	let expected_total = total_cost(expected_fee, order.client_balance_sat);
	if response.payment.order_total_sat != expected_total {
		return Err(LspError::ProtocolError(format!(
			"quoted order total {} does not match the expected total {}",
			response.payment.order_total_sat, expected_total
		)));
	}

	if !matches!(
		response.payment.invoice_state,
		HodlInvoiceState::ExpectPayment | HodlInvoiceState::Hold
	) {
		return Err(LspError::ProtocolError(format!(
			"invoice is already in terminal state {}",
			response.payment.invoice_state
		)));
	}

	let decoded = decode_invoice(&response.payment.bolt11)?;
	if decoded.amount_sat != expected_total {
		return Err(LspError::ProtocolError(format!(
			"invoice amount {} does not match the expected total {}",
			decoded.amount_sat, expected_total
		)));
	}
	if decoded.payee_pubkey_hex != offer.lsp_pubkey {
		return Err(LspError::ProtocolError(
			"invoice payee does not match the offer's LSP pubkey".to_string(),
		));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{ChannelInfo, OfferStatus, OrderState, Payment};
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

	fn order() -> Order {
		Order {
			offer_id: offer().id,
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

	fn response_for(order: &Order, fee: u64) -> OrderResponse {
		OrderResponse {
			offer_id: order.offer_id,
			lsp_balance_sat: order.lsp_balance_sat,
			client_balance_sat: order.client_balance_sat,
			required_channel_confirmations: order.required_channel_confirmations,
			funding_confirms_within_blocks: order.funding_confirms_within_blocks,
			channel_expiry_blocks: order.channel_expiry_blocks,
			announce_channel: order.announce_channel,
			created_at: 0,
			order_state: OrderState::Created,
			payment: Payment {
				bolt11: "not-a-real-invoice".to_string(),
				invoice_state: HodlInvoiceState::ExpectPayment,
				expires_at: 0,
				fee_total_sat: fee,
				order_total_sat: fee + order.client_balance_sat,
			},
			channel: None::<ChannelInfo>,
		}
	}

	#[test]
	fn mismatched_offer_id_is_rejected() {
		let order = order();
		let mut response = response_for(&order, 158_333);
		response.offer_id = Uuid::new_v4();
		let err = validate_response(&offer(), &order, &response).unwrap_err();
		assert!(matches!(err, LspError::ProtocolError(_)));
	}

	#[test]
	fn fee_mismatch_is_rejected() {
		let order = order();
		let response = response_for(&order, 1);
		let err = validate_response(&offer(), &order, &response).unwrap_err();
		assert!(matches!(err, LspError::ProtocolError(_)));
	}

	#[test]
	fn terminal_invoice_state_is_rejected() {
		let order = order();
		let mut response = response_for(&order, 158_333);
		response.payment.invoice_state = HodlInvoiceState::Paid;
		let err = validate_response(&offer(), &order, &response).unwrap_err();
		assert!(matches!(err, LspError::ProtocolError(_)));
	}

	#[test]
	fn correct_fee_but_garbage_invoice_still_fails_at_decode_step() {
		let order = order();
		let response = response_for(&order, 158_333);
		// bolt11 is a placeholder, so this must fail at invoice decoding --
		// it must NOT fail any earlier check first.
		let err = validate_response(&offer(), &order, &response).unwrap_err();
		assert!(matches!(err, LspError::InvoiceError(_)));
	}
}
