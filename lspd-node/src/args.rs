// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! CLI/env argument layer, mirroring the teacher's `util/config.rs`
//! `ArgsConfig`: every field is an optional override of whatever the TOML
//! config file already set, backed by an `LSPD_...` environment variable of
//! the same name as the long flag.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
	version,
	about = "lspd-node: a Lightning liquidity-lease marketplace daemon",
	long_about = None,
	override_usage = "lspd-node [config_path]"
)]
pub struct ArgsConfig {
	#[arg(required = false, help = "The configuration file for running lspd-node.")]
	pub config_file: Option<PathBuf>,

	#[arg(long, env = "LSPD_NODE_REST_URL", help = "The LND REST API base URL.")]
	pub node_rest_url: Option<String>,

	#[arg(long, env = "LSPD_NODE_MACAROON_PATH", help = "Path to the admin macaroon.")]
	pub node_macaroon_path: Option<PathBuf>,

	#[arg(long, env = "LSPD_NODE_TLS_CERT_PATH", help = "Path to the node's pinned TLS certificate.")]
	pub node_tls_cert_path: Option<PathBuf>,

	#[arg(long, env = "LSPD_NOSTR_NSEC", help = "The node's Nostr identity, as a bech32 nsec.")]
	pub nostr_nsec: Option<String>,

	#[arg(long, env = "LSPD_LEASE_LOG_PATH", help = "Path to the lease log JSON document.")]
	pub lease_log_path: Option<PathBuf>,

	#[arg(long, env = "LSPD_LOG_LEVEL", help = "env_logger filter, e.g. \"info\" or \"lspd_core=debug\".")]
	pub log_level: Option<String>,
}

/// Merge `args` onto `toml`: CLI/env values always win over whatever the file
/// set, matching the teacher's `ConfigBuilder::merge_args` (args override,
/// unlike `merge_toml`'s fill-in-what's-missing semantics).
pub fn merge_args(toml: &mut lspd_core::config::TomlConfig, args: &ArgsConfig) {
	if let Some(v) = &args.node_rest_url {
		toml.node.rest_url = Some(v.clone());
	}
	if let Some(v) = &args.node_macaroon_path {
		toml.node.macaroon_path = Some(v.clone());
	}
	if let Some(v) = &args.node_tls_cert_path {
		toml.node.tls_cert_path = Some(v.clone());
	}
	if let Some(v) = &args.nostr_nsec {
		toml.nostr.nsec = Some(v.clone());
	}
	if let Some(v) = &args.lease_log_path {
		toml.lease_log.path = v.clone();
	}
	if let Some(v) = &args.log_level {
		toml.log.level = v.clone();
	}
}
