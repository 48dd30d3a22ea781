// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Ad discovery (component I): the customer side's view of the offer pool.
//! Pulls every live kind-39735 event off the configured relays, keeps only
//! the newest active offer per (LSP pubkey, offer id), and can rank the
//! surviving offers by what a given capacity would actually cost under each.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::codec::{is_superset, tag_map, TagCodec};
use crate::error::LspError;
use crate::model::{Offer, OfferContent, OfferStatus};
use crate::pricing::{calculate_apr, calculate_lease_cost, total_cost};
use crate::transport::NostrTransport;

#[derive(Debug, Clone)]
pub struct DiscoveredOffer {
	pub offer: Offer,
	pub content: OfferContent,
	pub seen_at: u64,
}

pub struct AdDiscovery {
	transport: Arc<NostrTransport>,
}

impl AdDiscovery {
	pub fn new(transport: Arc<NostrTransport>) -> Self {
		AdDiscovery { transport }
	}

	/// Fetch and decode the current offer pool, keeping only the most
	/// recently published event per (LSP pubkey, offer id) and dropping any
	/// that are inactive or malformed.
	pub async fn refresh(&self) -> Result<Vec<DiscoveredOffer>, LspError> {
		let events = self.transport.fetch_offers(Duration::from_secs(10)).await?;

		let mut newest: HashMap<(String, Uuid), DiscoveredOffer> = HashMap::new();
		for event in events {
			let tags: Vec<(String, String)> = event
				.tags
				.iter()
				.filter_map(|t| {
					let slice = t.as_slice();
					slice.first().cloned().zip(slice.get(1).cloned())
				})
				.collect();
			let map = tag_map(&tags);
			if !is_superset(&map, Offer::field_keys()) {
				continue;
			}
			let Ok(offer) = Offer::from_tags(&tags) else { continue };
			if !offer.is_well_formed() {
				continue;
			}
			let Ok(content) = serde_json::from_str::<OfferContent>(&event.content) else {
				continue;
			};
			let seen_at = event.created_at.as_u64();
			let key = (offer.lsp_pubkey.clone(), offer.id);
			let replace = match newest.get(&key) {
				Some(existing) => seen_at >= existing.seen_at,
				None => true,
			};
			if replace {
				newest.insert(key, DiscoveredOffer { offer, content, seen_at });
			}
		}

		Ok(newest.into_values().filter(|d| d.offer.status == OfferStatus::Active).collect())
	}

	/// Rank `offers` by the all-in cost of leasing `capacity_sat` at each
	/// offer's maximum allowed expiry, cheapest first. Offers whose bounds
	/// can't accommodate `capacity_sat` are excluded.
	pub fn cost_breakdown(offers: &[DiscoveredOffer], capacity_sat: u64) -> Vec<CostQuote> {
		let mut quotes: Vec<CostQuote> = offers
			.iter()
			.filter(|d| (d.offer.min_capacity_sat..=d.offer.max_capacity_sat).contains(&capacity_sat))
			.map(|d| {
				let offer = &d.offer;
				let fee = calculate_lease_cost(
					offer.fixed_cost_sats,
					offer.variable_cost_ppm,
					capacity_sat,
					offer.max_channel_expiry_blocks,
					offer.max_channel_expiry_blocks,
				);
				let apr = calculate_apr(
					offer.fixed_cost_sats,
					offer.variable_cost_ppm,
					capacity_sat,
					offer.max_channel_expiry_blocks,
				);
				CostQuote {
					lsp_pubkey: offer.lsp_pubkey.clone(),
					offer_id: offer.id,
					fee_sat: fee,
					total_sat: total_cost(fee, 0),
					apr_percent: apr,
				}
			})
			.collect();
		quotes.sort_by(|a, b| a.total_sat.cmp(&b.total_sat));
		quotes
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostQuote {
	pub lsp_pubkey: String,
	pub offer_id: Uuid,
	pub fee_sat: u64,
	pub total_sat: u64,
	pub apr_percent: f64,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::NodeStats;

	fn offer(pubkey: &str, fixed_cost: u64) -> Offer {
		Offer {
			id: Uuid::new_v4(),
			lsp_pubkey: pubkey.to_string(),
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
			fixed_cost_sats: fixed_cost,
			variable_cost_ppm: 10_000,
			max_promised_fee_rate_ppm: 2500,
			max_promised_base_fee_msat: 1000,
			node_sig: None,
		}
	}

	fn content() -> OfferContent {
		OfferContent {
			lsp_message: "hello".to_string(),
			node_stats: NodeStats {
				alias: "node".to_string(),
				total_capacity_sat: 0,
				num_channels: 0,
				median_outbound_ppm: None,
				median_inbound_ppm: None,
			},
		}
	}

	#[test]
	fn cost_breakdown_sorts_cheapest_first() {
		let offers = vec![
			DiscoveredOffer { offer: offer("expensive", 200_000), content: content(), seen_at: 0 },
			DiscoveredOffer { offer: offer("cheap", 50_000), content: content(), seen_at: 0 },
		];
		let quotes = AdDiscovery::cost_breakdown(&offers, 2_000_000);
		assert_eq!(quotes[0].lsp_pubkey, "cheap");
		assert_eq!(quotes[1].lsp_pubkey, "expensive");
	}

	#[test]
	fn cost_breakdown_excludes_offers_that_cannot_fit_the_capacity() {
		let mut too_small = offer("too_small", 50_000);
		too_small.max_capacity_sat = 500_000;
		let offers = vec![DiscoveredOffer { offer: too_small, content: content(), seen_at: 0 }];
		let quotes = AdDiscovery::cost_breakdown(&offers, 2_000_000);
		assert!(quotes.is_empty());
	}
}
