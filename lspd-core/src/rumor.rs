// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! DM classification (component C's listener half). A single inbound rumor
//! stream is fanned out into four typed channels by structural dispatch: the
//! tag-keyset a rumor carries is matched against each known payload's
//! `field_keys()` rather than against a discriminator tag (spec.md §4.C),
//! because `Order`/`OrderResponse`/`OrderError`/`ChannelUpdate` never share
//! a complete required-key set.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use nostr::key::PublicKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{tag_map, is_superset, TagCodec};
use crate::model::{ChannelUpdate, Order, OrderError, OrderResponse};
use crate::transport::Rumor;

/// A NIP-17 private direct message, per NIP-17 `kind::PRIVATE_DIRECT_MESSAGE`.
const PRIVATE_DIRECT_MESSAGE_KIND: u16 = 14;

/// Rumors older than this are dropped rather than dispatched, guarding
/// against a relay replaying a stale gift wrap long after the fact.
const MAX_RUMOR_AGE_SECS: u64 = 600;

pub enum OrderReply {
	Response(OrderResponse),
	Error(OrderError),
}

pub struct RumorChannels {
	pub order_requests: mpsc::Receiver<(PublicKey, Order)>,
	pub order_replies: mpsc::Receiver<(PublicKey, OrderReply)>,
	pub channel_updates: mpsc::Receiver<(PublicKey, ChannelUpdate)>,
}

struct RumorSenders {
	order_requests: mpsc::Sender<(PublicKey, Order)>,
	order_replies: mpsc::Sender<(PublicKey, OrderReply)>,
	channel_updates: mpsc::Sender<(PublicKey, ChannelUpdate)>,
}

/// Classify and dispatch a single rumor, given `now` (injected so tests
/// don't depend on wall-clock time).
async fn classify_and_dispatch(rumor: Rumor, senders: &RumorSenders, now: u64) {
	if rumor.kind != PRIVATE_DIRECT_MESSAGE_KIND {
		debug!("dropping non-private-DM rumor of kind {}", rumor.kind);
		return;
	}
	if rumor.created_at + MAX_RUMOR_AGE_SECS < now {
		debug!("dropping stale rumor from {}", rumor.sender);
		return;
	}

	let map = tag_map(&rumor.tags);

	if is_superset(&map, Order::field_keys()) {
		match Order::from_tags(&rumor.tags) {
			Ok(order) => {
				let _ = senders.order_requests.send((rumor.sender, order)).await;
			},
			Err(e) => warn!("rumor looked like an Order but failed to decode: {e}"),
		}
		return;
	}
	if is_superset(&map, OrderResponse::field_keys()) {
		match OrderResponse::from_tags(&rumor.tags) {
			Ok(response) => {
				let _ = senders
					.order_replies
					.send((rumor.sender, OrderReply::Response(response)))
					.await;
			},
			Err(e) => warn!("rumor looked like an OrderResponse but failed to decode: {e}"),
		}
		return;
	}
	if is_superset(&map, OrderError::field_keys()) {
		match OrderError::from_tags(&rumor.tags) {
			Ok(error) => {
				let _ =
					senders.order_replies.send((rumor.sender, OrderReply::Error(error))).await;
			},
			Err(e) => warn!("rumor looked like an OrderError but failed to decode: {e}"),
		}
		return;
	}
	if is_superset(&map, ChannelUpdate::field_keys()) {
		match ChannelUpdate::from_tags(&rumor.tags) {
			Ok(update) => {
				let _ = senders.channel_updates.send((rumor.sender, update)).await;
			},
			Err(e) => warn!("rumor looked like a ChannelUpdate but failed to decode: {e}"),
		}
		return;
	}

	debug!("dropping rumor matching no known tag keyset: {:?}", map.keys().collect::<Vec<_>>());
}

/// Drive an already-running rumor stream, dispatching each item until
/// `inbox` closes or `cancel` fires.
pub async fn run(
	mut inbox: mpsc::Receiver<Rumor>, cancel: CancellationToken,
) -> RumorChannels {
	let (order_requests_tx, order_requests) = mpsc::channel(64);
	let (order_replies_tx, order_replies) = mpsc::channel(64);
	let (channel_updates_tx, channel_updates) = mpsc::channel(64);
	let senders = RumorSenders {
		order_requests: order_requests_tx,
		order_replies: order_replies_tx,
		channel_updates: channel_updates_tx,
	};

	tokio::spawn(async move {
		loop {
			tokio::select! {
				_ = cancel.cancelled() => return,
				rumor = inbox.recv() => {
					let Some(rumor) = rumor else { return };
					let now = SystemTime::now()
						.duration_since(UNIX_EPOCH)
						.map(|d| d.as_secs())
						.unwrap_or(0);
					classify_and_dispatch(rumor, &senders, now).await;
				}
			}
		}
	});

	RumorChannels { order_requests, order_replies, channel_updates }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::OfferStatus;
	use uuid::Uuid;

	fn test_pubkey() -> PublicKey {
		PublicKey::from_hex("a".repeat(64)).expect("64 hex chars is a valid x-only pubkey")
	}

	fn sample_order() -> Order {
		Order {
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
		}
	}

	#[tokio::test]
	async fn order_rumor_is_dispatched_to_order_requests_channel() {
		let (order_requests_tx, mut order_requests) = mpsc::channel(4);
		let (order_replies_tx, _order_replies) = mpsc::channel(4);
		let (channel_updates_tx, _channel_updates) = mpsc::channel(4);
		let senders = RumorSenders {
			order_requests: order_requests_tx,
			order_replies: order_replies_tx,
			channel_updates: channel_updates_tx,
		};

		let order = sample_order();
		let rumor = Rumor {
			sender: test_pubkey(),
			created_at: 1000,
			kind: PRIVATE_DIRECT_MESSAGE_KIND,
			tags: order.to_tags(),
			content: String::new(),
		};
		classify_and_dispatch(rumor, &senders, 1000).await;

		let (_, decoded) = order_requests.try_recv().expect("order should have been dispatched");
		assert_eq!(decoded, order);
	}

	#[tokio::test]
	async fn non_private_dm_kind_is_dropped() {
		let (order_requests_tx, mut order_requests) = mpsc::channel(4);
		let (order_replies_tx, _order_replies) = mpsc::channel(4);
		let (channel_updates_tx, _channel_updates) = mpsc::channel(4);
		let senders = RumorSenders {
			order_requests: order_requests_tx,
			order_replies: order_replies_tx,
			channel_updates: channel_updates_tx,
		};

		let order = sample_order();
		let rumor = Rumor {
			sender: test_pubkey(),
			created_at: 1000,
			kind: 1, // a plain text note, not a private DM
			tags: order.to_tags(),
			content: String::new(),
		};
		classify_and_dispatch(rumor, &senders, 1000).await;
		assert!(order_requests.try_recv().is_err());
	}

	#[tokio::test]
	async fn stale_rumor_is_dropped() {
		let (order_requests_tx, mut order_requests) = mpsc::channel(4);
		let (order_replies_tx, _order_replies) = mpsc::channel(4);
		let (channel_updates_tx, _channel_updates) = mpsc::channel(4);
		let senders = RumorSenders {
			order_requests: order_requests_tx,
			order_replies: order_replies_tx,
			channel_updates: channel_updates_tx,
		};

		let order = sample_order();
		let rumor = Rumor {
			sender: test_pubkey(),
			created_at: 0,
			kind: PRIVATE_DIRECT_MESSAGE_KIND,
			tags: order.to_tags(),
			content: String::new(),
		};
		classify_and_dispatch(rumor, &senders, MAX_RUMOR_AGE_SECS + 1000).await;
		assert!(order_requests.try_recv().is_err());
	}
}
