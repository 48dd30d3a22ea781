// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! CLI surface for the customer driver. Deliberately small: this is a way to
//! exercise discovery, pricing, and order placement by hand, not a
//! general-purpose customer REPL (spec.md's "external collaborators" leaves
//! a full REPL out of scope as a feature).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
	version,
	about = "lspd-customer: a thin driver for the customer side of the liquidity-lease marketplace",
	long_about = None
)]
pub struct ArgsConfig {
	#[arg(
		long,
		env = "LSPD_CONFIG_FILE",
		help = "Config file providing [nostr] relays/nsec and [log] level."
	)]
	pub config_file: Option<PathBuf>,

	#[arg(long, env = "LSPD_NOSTR_NSEC", help = "The customer's Nostr identity, as a bech32 nsec.")]
	pub nostr_nsec: Option<String>,

	#[arg(long, env = "LSPD_LOG_LEVEL", help = "env_logger filter, e.g. \"info\".")]
	pub log_level: Option<String>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Fetch and print every currently-active offer on the configured relays.
	Discover,
	/// Fetch offers and print a cheapest-first cost breakdown for a capacity.
	Quote {
		#[arg(long)]
		capacity_sat: u64,
	},
	/// Build and send an Order to a specific LSP, then wait for and validate
	/// its response.
	Order {
		#[arg(long, help = "The LSP's Nostr public key, as 64 hex characters.")]
		lsp_pubkey: String,
		#[arg(long, help = "The offer id being purchased under (from `discover`).")]
		offer_id: Uuid,
		#[arg(long, help = "The LSP's Lightning node URI, <pubkey>@host:port.")]
		target_pubkey_uri: String,
		#[arg(long, default_value_t = 0)]
		lsp_balance_sat: u64,
		#[arg(long, default_value_t = 0)]
		client_balance_sat: u64,
		#[arg(long, default_value_t = 0)]
		required_channel_confirmations: u32,
		#[arg(long, default_value_t = 6)]
		funding_confirms_within_blocks: u32,
		#[arg(long, default_value_t = 4320)]
		channel_expiry_blocks: u32,
		#[arg(long, default_value_t = false)]
		announce_channel: bool,
		#[arg(long)]
		token: Option<String>,
		#[arg(long)]
		refund_onchain_address: Option<String>,
		#[arg(long, default_value_t = 30, help = "Seconds to wait for the LSP's response.")]
		timeout_secs: u64,
	},
}
