// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Nostr transport (component C's relay-facing half): connects to the
//! configured relay set, publishes the kind-39735 offer event, and moves
//! private-DM rumors (NIP-17/NIP-59) in and out. `rumor.rs` owns classifying
//! what comes out of here; this module only owns the wire.

use std::time::Duration;

use async_trait::async_trait;
use nostr::event::{Event, EventBuilder, Kind, Tag};
use nostr::key::{Keys, PublicKey};
use nostr::nips::nip59::UnwrappedGift;
use nostr::types::Filter;
use nostr_sdk::prelude::*;
use nostr_sdk::{Client, RelayPoolNotification};

use crate::error::LspError;

/// Custom event kind the marketplace publishes offers under (spec.md §4.C).
pub const OFFER_KIND: u16 = 39735;

/// The one relay-facing capability the order orchestrator needs: sending a
/// customer their gift-wrapped DM. Split out from `NostrTransport` itself so
/// the orchestrator's state machine can be driven in tests against an
/// in-memory fake instead of a real relay connection.
#[async_trait]
pub trait RumorSender: Send + Sync {
	async fn send_rumor(
		&self, receiver: PublicKey, tags: Vec<(String, String)>, content: String,
	) -> Result<(), LspError>;
}

/// The ad lifecycle's one relay-facing capability: publishing the
/// parameterized-replaceable offer event. Split out for the same reason as
/// [`RumorSender`].
#[async_trait]
pub trait OfferPublisher: Send + Sync {
	async fn publish_offer(
		&self, tags: Vec<(String, String)>, content: String,
	) -> Result<(), LspError>;
}

pub struct NostrTransport {
	client: Client,
	keys: Keys,
}

/// A gift-wrapped private-message rumor, unwrapped down to its sender and
/// the inner (unsigned, never relay-published) event.
pub struct Rumor {
	pub sender: PublicKey,
	pub created_at: u64,
	pub kind: u16,
	pub tags: Vec<(String, String)>,
	pub content: String,
}

impl NostrTransport {
	/// Generate a fresh identity keypair, matching `Keys::generate()` in the
	/// original tooling for an ephemeral customer session.
	pub fn generate_keys() -> Keys {
		Keys::generate()
	}

	pub fn keys_from_nsec(nsec: &str) -> Result<Keys, LspError> {
		Keys::parse(nsec).map_err(|e| LspError::ProtocolError(format!("invalid nsec: {e}")))
	}

	pub async fn connect(keys: Keys, relays: &[String]) -> Result<Self, LspError> {
		let client = Client::new(keys.clone());
		for relay in relays {
			client
				.add_relay(relay.as_str())
				.await
				.map_err(|e| LspError::ConnectionError(format!("add_relay {relay}: {e}")))?;
		}
		client.connect().await;
		Ok(NostrTransport { client, keys })
	}

	pub fn pubkey(&self) -> PublicKey {
		self.keys.public_key()
	}

	/// Fetch currently-live offer events from the connected relay set.
	pub async fn fetch_offers(&self, timeout: Duration) -> Result<Vec<Event>, LspError> {
		let filter = Filter::new().kind(Kind::Custom(OFFER_KIND));
		let events = self
			.client
			.fetch_events(filter, timeout)
			.await
			.map_err(|e| LspError::ConnectionError(format!("fetch offers: {e}")))?;
		Ok(events.into_iter().collect())
	}

	/// Subscribe to gift wraps addressed to us and start yielding unwrapped
	/// rumors on `out`. Runs until `cancel` fires or the relay pool closes.
	pub async fn run_rumor_listener(
		&self, out: tokio::sync::mpsc::Sender<Rumor>,
		cancel: tokio_util::sync::CancellationToken,
	) -> Result<(), LspError> {
		let filter = Filter::new().kind(Kind::GiftWrap).pubkey(self.pubkey());
		self.client
			.subscribe(filter, None)
			.await
			.map_err(|e| LspError::ConnectionError(format!("subscribe gift wraps: {e}")))?;

		let mut notifications = self.client.notifications();
		loop {
			tokio::select! {
				_ = cancel.cancelled() => return Ok(()),
				notification = notifications.recv() => {
					let notification = match notification {
						Ok(n) => n,
						Err(_) => return Ok(()),
					};
					let RelayPoolNotification::Event { event, .. } = notification else { continue };
					if event.kind != Kind::GiftWrap {
						continue;
					}
					let Ok(unwrapped) = UnwrappedGift::from_gift_wrap(&self.keys, &event).await else {
						continue;
					};
					let rumor = Rumor {
						sender: unwrapped.sender,
						created_at: unwrapped.rumor.created_at.as_u64(),
						kind: unwrapped.rumor.kind.as_u16(),
						tags: unwrapped
							.rumor
							.tags
							.iter()
							.filter_map(|t| {
								let slice = t.as_slice();
								slice.first().cloned().zip(slice.get(1).cloned())
							})
							.collect(),
						content: unwrapped.rumor.content.clone(),
					};
					if out.send(rumor).await.is_err() {
						return Ok(());
					}
				}
			}
		}
	}

	pub async fn disconnect(&self) {
		let _ = self.client.disconnect().await;
	}
}

#[async_trait]
impl RumorSender for NostrTransport {
	/// Send a gift-wrapped NIP-17 private message carrying `tags`/`content`
	/// as the rumor's tag list and content. The receiving side classifies
	/// the rumor by which required tag keyset it's a superset of, so no
	/// discriminator tag is added here.
	async fn send_rumor(
		&self, receiver: PublicKey, tags: Vec<(String, String)>, content: String,
	) -> Result<(), LspError> {
		let rumor_tags: Result<Vec<Tag>, _> =
			tags.into_iter().map(|(k, v)| Tag::parse([k, v])).collect();
		let rumor_tags =
			rumor_tags.map_err(|e| LspError::ProtocolError(format!("invalid tag: {e}")))?;

		self.client
			.send_private_msg(receiver, content, rumor_tags)
			.await
			.map_err(|e| LspError::ConnectionError(format!("send rumor: {e}")))?;
		Ok(())
	}
}

#[async_trait]
impl OfferPublisher for NostrTransport {
	/// Publish (or replace, since kind 39735 is parameterized-replaceable) an
	/// offer event. `tags` carries the tag-coded `Offer` plus a `d` tag for
	/// replaceability; `content` is the JSON-encoded `OfferContent`.
	async fn publish_offer(
		&self, tags: Vec<(String, String)>, content: String,
	) -> Result<(), LspError> {
		let event_tags: Result<Vec<Tag>, _> =
			tags.into_iter().map(|(k, v)| Tag::parse([k, v])).collect();
		let event_tags =
			event_tags.map_err(|e| LspError::ProtocolError(format!("invalid tag: {e}")))?;

		let builder = EventBuilder::new(Kind::Custom(OFFER_KIND), content).tags(event_tags);
		self.client
			.send_event_builder(builder)
			.await
			.map_err(|e| LspError::ConnectionError(format!("publish offer: {e}")))?;
		Ok(())
	}
}
