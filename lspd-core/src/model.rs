// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wire data model (component D's types, plus the shapes component C
//! dispatches on): `Offer`, `Order`, `OrderResponse`, `OrderError`, and
//! `ChannelUpdate`, each carried as an ordered tag list per `codec`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{
	decode_tag_value, encode_display, encode_json, encode_opt_display, require, require_json,
	require_opt_parse, require_parse, CodecError, TagCodec, TagValue, Tags,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
	Active,
	Inactive,
}

impl fmt::Display for OfferStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OfferStatus::Active => write!(f, "active"),
			OfferStatus::Inactive => write!(f, "inactive"),
		}
	}
}

impl FromStr for OfferStatus {
	type Err = ();
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"active" => Ok(OfferStatus::Active),
			"inactive" => Ok(OfferStatus::Inactive),
			_ => Err(()),
		}
	}
}

/// An LSP's advertised lease terms. Offer id is derived deterministically
/// from the LSP's node public key (see `ads::derive_offer_id`), so there is
/// exactly one offer per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
	pub id: Uuid,
	pub lsp_pubkey: String,
	pub status: OfferStatus,
	pub min_capacity_sat: u64,
	pub max_capacity_sat: u64,
	pub min_lsp_balance_sat: u64,
	pub max_lsp_balance_sat: u64,
	pub min_client_balance_sat: u64,
	pub max_client_balance_sat: u64,
	pub max_channel_expiry_blocks: u32,
	pub min_required_channel_confirmations: u32,
	pub min_funding_confirms_within_blocks: u32,
	pub fixed_cost_sats: u64,
	pub variable_cost_ppm: u64,
	pub max_promised_fee_rate_ppm: u32,
	pub max_promised_base_fee_msat: u64,
	/// Hex signature of the transport identity pubkey by the LN node,
	/// present iff `include_node_sig` is configured (§4.E step 5).
	pub node_sig: Option<String>,
}

impl Offer {
	/// Structural invariants beyond what the type system enforces (see
	/// spec.md §3: "min <= max for every bound; fixed >= 0, variable >= 0").
	pub fn is_well_formed(&self) -> bool {
		self.min_capacity_sat <= self.max_capacity_sat
			&& self.min_lsp_balance_sat <= self.max_lsp_balance_sat
			&& self.min_client_balance_sat <= self.max_client_balance_sat
	}
}

impl TagCodec for Offer {
	fn to_tags(&self) -> Tags {
		vec![
			("d".into(), encode_display(&self.id)),
			("lsp_pubkey".into(), encode_display(&self.lsp_pubkey)),
			("status".into(), encode_display(&self.status)),
			("min_capacity_sat".into(), encode_display(&self.min_capacity_sat)),
			("max_capacity_sat".into(), encode_display(&self.max_capacity_sat)),
			("min_lsp_balance_sat".into(), encode_display(&self.min_lsp_balance_sat)),
			("max_lsp_balance_sat".into(), encode_display(&self.max_lsp_balance_sat)),
			("min_client_balance_sat".into(), encode_display(&self.min_client_balance_sat)),
			("max_client_balance_sat".into(), encode_display(&self.max_client_balance_sat)),
			("max_channel_expiry_blocks".into(), encode_display(&self.max_channel_expiry_blocks)),
			(
				"min_required_channel_confirmations".into(),
				encode_display(&self.min_required_channel_confirmations),
			),
			(
				"min_funding_confirms_within_blocks".into(),
				encode_display(&self.min_funding_confirms_within_blocks),
			),
			("fixed_cost_sats".into(), encode_display(&self.fixed_cost_sats)),
			("variable_cost_ppm".into(), encode_display(&self.variable_cost_ppm)),
			("max_promised_fee_rate_ppm".into(), encode_display(&self.max_promised_fee_rate_ppm)),
			(
				"max_promised_base_fee_msat".into(),
				encode_display(&self.max_promised_base_fee_msat),
			),
			("node_sig".into(), encode_opt_display(&self.node_sig)),
		]
	}

	fn from_tags(tags: &[(String, String)]) -> Result<Self, CodecError> {
		let map = crate::codec::tag_map(tags);
		Ok(Offer {
			id: require_parse(&map, "d")?,
			lsp_pubkey: require(&map, "lsp_pubkey")?.to_string(),
			status: require_parse(&map, "status")?,
			min_capacity_sat: require_parse(&map, "min_capacity_sat")?,
			max_capacity_sat: require_parse(&map, "max_capacity_sat")?,
			min_lsp_balance_sat: require_parse(&map, "min_lsp_balance_sat")?,
			max_lsp_balance_sat: require_parse(&map, "max_lsp_balance_sat")?,
			min_client_balance_sat: require_parse(&map, "min_client_balance_sat")?,
			max_client_balance_sat: require_parse(&map, "max_client_balance_sat")?,
			max_channel_expiry_blocks: require_parse(&map, "max_channel_expiry_blocks")?,
			min_required_channel_confirmations: require_parse(
				&map,
				"min_required_channel_confirmations",
			)?,
			min_funding_confirms_within_blocks: require_parse(
				&map,
				"min_funding_confirms_within_blocks",
			)?,
			fixed_cost_sats: require_parse(&map, "fixed_cost_sats")?,
			variable_cost_ppm: require_parse(&map, "variable_cost_ppm")?,
			max_promised_fee_rate_ppm: require_parse(&map, "max_promised_fee_rate_ppm")?,
			max_promised_base_fee_msat: require_parse(&map, "max_promised_base_fee_msat")?,
			node_sig: require_opt_parse(&map, "node_sig")?,
		})
	}

	fn field_keys() -> &'static [&'static str] {
		&[
			"d",
			"lsp_pubkey",
			"status",
			"min_capacity_sat",
			"max_capacity_sat",
			"min_lsp_balance_sat",
			"max_lsp_balance_sat",
			"min_client_balance_sat",
			"max_client_balance_sat",
			"max_channel_expiry_blocks",
			"min_required_channel_confirmations",
			"min_funding_confirms_within_blocks",
			"fixed_cost_sats",
			"variable_cost_ppm",
			"max_promised_fee_rate_ppm",
			"max_promised_base_fee_msat",
		]
	}
}

/// Event content payload accompanying a published `Offer` (not carried as
/// tags — see spec.md §6 wire model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferContent {
	pub lsp_message: String,
	pub node_stats: NodeStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
	pub alias: String,
	pub total_capacity_sat: u64,
	pub num_channels: u32,
	pub median_outbound_ppm: Option<u32>,
	pub median_inbound_ppm: Option<u32>,
}

/// A customer's request to purchase a channel under a specific `Offer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	pub offer_id: Uuid,
	pub target_pubkey_uri: String,
	pub lsp_balance_sat: u64,
	pub client_balance_sat: u64,
	pub required_channel_confirmations: u32,
	pub funding_confirms_within_blocks: u32,
	pub channel_expiry_blocks: u32,
	pub announce_channel: bool,
	pub token: Option<String>,
	pub refund_onchain_address: Option<String>,
}

impl Order {
	pub fn total_capacity_sat(&self) -> u64 {
		self.lsp_balance_sat + self.client_balance_sat
	}

	/// The `<66-hex-pubkey>` prefix of `target_pubkey_uri`.
	pub fn target_pubkey(&self) -> Result<&str, CodecError> {
		self.target_pubkey_uri
			.split('@')
			.next()
			.filter(|s| s.len() == 66)
			.ok_or(CodecError::Malformed("target_pubkey_uri", self.target_pubkey_uri.clone()))
	}
}

impl TagCodec for Order {
	fn to_tags(&self) -> Tags {
		vec![
			("d".into(), encode_display(&self.offer_id)),
			("target_pubkey_uri".into(), encode_display(&self.target_pubkey_uri)),
			("lsp_balance_sat".into(), encode_display(&self.lsp_balance_sat)),
			("client_balance_sat".into(), encode_display(&self.client_balance_sat)),
			(
				"required_channel_confirmations".into(),
				encode_display(&self.required_channel_confirmations),
			),
			(
				"funding_confirms_within_blocks".into(),
				encode_display(&self.funding_confirms_within_blocks),
			),
			("channel_expiry_blocks".into(), encode_display(&self.channel_expiry_blocks)),
			("announce_channel".into(), encode_display(&self.announce_channel)),
			("token".into(), encode_opt_display(&self.token)),
			("refund_onchain_address".into(), encode_opt_display(&self.refund_onchain_address)),
		]
	}

	fn from_tags(tags: &[(String, String)]) -> Result<Self, CodecError> {
		let map = crate::codec::tag_map(tags);
		Ok(Order {
			offer_id: require_parse(&map, "d")?,
			target_pubkey_uri: require(&map, "target_pubkey_uri")?.to_string(),
			lsp_balance_sat: require_parse(&map, "lsp_balance_sat")?,
			client_balance_sat: require_parse(&map, "client_balance_sat")?,
			required_channel_confirmations: require_parse(
				&map,
				"required_channel_confirmations",
			)?,
			funding_confirms_within_blocks: require_parse(
				&map,
				"funding_confirms_within_blocks",
			)?,
			channel_expiry_blocks: require_parse(&map, "channel_expiry_blocks")?,
			announce_channel: require_parse(&map, "announce_channel")?,
			token: require_opt_parse(&map, "token")?,
			refund_onchain_address: require_opt_parse(&map, "refund_onchain_address")?,
		})
	}

	fn field_keys() -> &'static [&'static str] {
		&[
			"d",
			"target_pubkey_uri",
			"lsp_balance_sat",
			"client_balance_sat",
			"required_channel_confirmations",
			"funding_confirms_within_blocks",
			"channel_expiry_blocks",
			"announce_channel",
			"token",
			"refund_onchain_address",
		]
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
	Created,
	Completed,
	Failed,
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderState::Created => write!(f, "CREATED"),
			OrderState::Completed => write!(f, "COMPLETED"),
			OrderState::Failed => write!(f, "FAILED"),
		}
	}
}

impl FromStr for OrderState {
	type Err = ();
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"CREATED" => Ok(OrderState::Created),
			"COMPLETED" => Ok(OrderState::Completed),
			"FAILED" => Ok(OrderState::Failed),
			_ => Err(()),
		}
	}
}

/// A hodl invoice's lifecycle state, mapped from the node backend's native
/// invoice states by `backend::lnd::map_invoice_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HodlInvoiceState {
	ExpectPayment,
	Hold,
	Paid,
	Refunded,
	Unknown,
}

impl fmt::Display for HodlInvoiceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			HodlInvoiceState::ExpectPayment => "EXPECT_PAYMENT",
			HodlInvoiceState::Hold => "HOLD",
			HodlInvoiceState::Paid => "PAID",
			HodlInvoiceState::Refunded => "REFUNDED",
			HodlInvoiceState::Unknown => "UNKNOWN",
		};
		write!(f, "{s}")
	}
}

impl FromStr for HodlInvoiceState {
	type Err = ();
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"EXPECT_PAYMENT" => Ok(HodlInvoiceState::ExpectPayment),
			"HOLD" => Ok(HodlInvoiceState::Hold),
			"PAID" => Ok(HodlInvoiceState::Paid),
			"REFUNDED" => Ok(HodlInvoiceState::Refunded),
			"UNKNOWN" => Ok(HodlInvoiceState::Unknown),
			_ => Err(()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
	pub bolt11: String,
	pub invoice_state: HodlInvoiceState,
	pub expires_at: i64,
	pub fee_total_sat: u64,
	pub order_total_sat: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
	pub funding_txid_hex: Option<String>,
	pub funding_output_index: Option<u32>,
	pub funded_at: Option<i64>,
	pub expires_at: Option<i64>,
}

/// The LSP's reply to an `Order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
	pub offer_id: Uuid,
	pub lsp_balance_sat: u64,
	pub client_balance_sat: u64,
	pub required_channel_confirmations: u32,
	pub funding_confirms_within_blocks: u32,
	pub channel_expiry_blocks: u32,
	pub announce_channel: bool,
	pub created_at: i64,
	pub order_state: OrderState,
	pub payment: Payment,
	pub channel: Option<ChannelInfo>,
}

impl OrderResponse {
	pub fn total_capacity_sat(&self) -> u64 {
		self.lsp_balance_sat + self.client_balance_sat
	}
}

impl TagCodec for OrderResponse {
	fn to_tags(&self) -> Tags {
		vec![
			("d".into(), encode_display(&self.offer_id)),
			("lsp_balance_sat".into(), encode_display(&self.lsp_balance_sat)),
			("client_balance_sat".into(), encode_display(&self.client_balance_sat)),
			(
				"required_channel_confirmations".into(),
				encode_display(&self.required_channel_confirmations),
			),
			(
				"funding_confirms_within_blocks".into(),
				encode_display(&self.funding_confirms_within_blocks),
			),
			("channel_expiry_blocks".into(), encode_display(&self.channel_expiry_blocks)),
			("announce_channel".into(), encode_display(&self.announce_channel)),
			("created_at".into(), encode_display(&self.created_at)),
			("order_state".into(), encode_display(&self.order_state)),
			("payment".into(), encode_json(&self.payment)),
			(
				"channel".into(),
				match &self.channel {
					Some(c) => encode_json(c),
					None => "null".to_string(),
				},
			),
		]
	}

	fn from_tags(tags: &[(String, String)]) -> Result<Self, CodecError> {
		let map = crate::codec::tag_map(tags);
		let channel = match decode_tag_value(require(&map, "channel")?) {
			TagValue::Null => None,
			_ => Some(require_json(&map, "channel")?),
		};
		Ok(OrderResponse {
			offer_id: require_parse(&map, "d")?,
			lsp_balance_sat: require_parse(&map, "lsp_balance_sat")?,
			client_balance_sat: require_parse(&map, "client_balance_sat")?,
			required_channel_confirmations: require_parse(
				&map,
				"required_channel_confirmations",
			)?,
			funding_confirms_within_blocks: require_parse(
				&map,
				"funding_confirms_within_blocks",
			)?,
			channel_expiry_blocks: require_parse(&map, "channel_expiry_blocks")?,
			announce_channel: require_parse(&map, "announce_channel")?,
			created_at: require_parse(&map, "created_at")?,
			order_state: require_parse(&map, "order_state")?,
			payment: require_json(&map, "payment")?,
			channel,
		})
	}

	fn field_keys() -> &'static [&'static str] {
		&[
			"d",
			"lsp_balance_sat",
			"client_balance_sat",
			"required_channel_confirmations",
			"funding_confirms_within_blocks",
			"channel_expiry_blocks",
			"announce_channel",
			"created_at",
			"order_state",
			"payment",
			"channel",
		]
	}
}

/// Sent in place of an `OrderResponse` whenever validation, solvency, or
/// connectivity checks fail before an invoice is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderError {
	pub code: i64,
	pub error_message: String,
}

impl TagCodec for OrderError {
	fn to_tags(&self) -> Tags {
		vec![
			("code".into(), encode_display(&self.code)),
			("error_message".into(), encode_display(&self.error_message)),
		]
	}

	fn from_tags(tags: &[(String, String)]) -> Result<Self, CodecError> {
		let map = crate::codec::tag_map(tags);
		Ok(OrderError {
			code: require_parse(&map, "code")?,
			error_message: require(&map, "error_message")?.to_string(),
		})
	}

	fn field_keys() -> &'static [&'static str] {
		&["error_message", "code"]
	}
}

impl From<&crate::error::LspError> for OrderError {
	fn from(e: &crate::error::LspError) -> Self {
		OrderError { code: e.code(), error_message: e.wire_message() }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
	Pending,
	Open,
	Closed,
	Unknown,
}

impl fmt::Display for ChannelState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ChannelState::Pending => "PENDING",
			ChannelState::Open => "OPEN",
			ChannelState::Closed => "CLOSED",
			ChannelState::Unknown => "UNKNOWN",
		};
		write!(f, "{s}")
	}
}

impl FromStr for ChannelState {
	type Err = ();
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"PENDING" => Ok(ChannelState::Pending),
			"OPEN" => Ok(ChannelState::Open),
			"CLOSED" => Ok(ChannelState::Closed),
			"UNKNOWN" => Ok(ChannelState::Unknown),
			_ => Err(()),
		}
	}
}

/// A single update streamed to the customer while a channel-open is in
/// flight (§4.G step 6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUpdate {
	pub channel_state: ChannelState,
	pub txid_hex: Option<String>,
	pub output_index: Option<u32>,
}

impl TagCodec for ChannelUpdate {
	fn to_tags(&self) -> Tags {
		vec![
			("channel_state".into(), encode_display(&self.channel_state)),
			("txid_hex".into(), encode_opt_display(&self.txid_hex)),
			("output_index".into(), encode_opt_display(&self.output_index)),
		]
	}

	fn from_tags(tags: &[(String, String)]) -> Result<Self, CodecError> {
		let map = crate::codec::tag_map(tags);
		Ok(ChannelUpdate {
			channel_state: require_parse(&map, "channel_state")?,
			txid_hex: require_opt_parse(&map, "txid_hex")?,
			output_index: require_opt_parse(&map, "output_index")?,
		})
	}

	fn field_keys() -> &'static [&'static str] {
		&["channel_state", "txid_hex", "output_index"]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_offer() -> Offer {
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

	#[test]
	fn offer_round_trips_through_tags() {
		let offer = sample_offer();
		let tags = offer.to_tags();
		let decoded = Offer::from_tags(&tags).unwrap();
		assert_eq!(offer, decoded);
	}

	#[test]
	fn offer_field_keys_are_subset_of_its_own_tags() {
		let offer = sample_offer();
		let tags = offer.to_tags();
		let map = crate::codec::tag_map(&tags);
		assert!(crate::codec::is_superset(&map, Offer::field_keys()));
	}

	#[test]
	fn order_round_trips_with_none_fields() {
		let order = Order {
			offer_id: Uuid::new_v4(),
			target_pubkey_uri: format!("{}@127.0.0.1:9735", "03".to_string() + &"b".repeat(64)),
			lsp_balance_sat: 5_000_000,
			client_balance_sat: 0,
			required_channel_confirmations: 0,
			funding_confirms_within_blocks: 6,
			channel_expiry_blocks: 4320,
			announce_channel: false,
			token: None,
			refund_onchain_address: None,
		};
		let tags = order.to_tags();
		assert_eq!(Order::from_tags(&tags).unwrap(), order);
	}

	#[test]
	fn order_response_distinguishes_from_order_by_field_keys() {
		// An Order's tag set must not be mistaken for an OrderResponse's.
		let order_keys: std::collections::HashSet<_> = Order::field_keys().iter().collect();
		let response_keys: std::collections::HashSet<_> =
			OrderResponse::field_keys().iter().collect();
		assert!(!order_keys.is_subset(&response_keys));
	}

	#[test]
	fn order_error_field_keys_match_spec() {
		assert_eq!(OrderError::field_keys(), &["error_message", "code"]);
	}
}
