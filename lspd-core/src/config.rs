// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Configuration (component K). A `TomlConfig` is read from disk, then
//! `Config::from_toml` turns it into the immutable, `Arc`-shared snapshot
//! every component borrows (spec.md §9 "global mutable configuration with
//! hot reload" design note: reload builds a new snapshot rather than
//! mutating one in place).

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("missing required field: {0}")]
	MissingField(&'static str),
	#[error("invalid value for {0}: {1}")]
	InvalidValue(&'static str, String),
	#[error("failed to read config file {0}: {1}")]
	Io(PathBuf, std::io::Error),
	#[error("failed to parse config file {0}: {1}")]
	Parse(PathBuf, toml::de::Error),
}

/// Minimum health-tick interval, per spec.md §4.F ("floor 30 s").
pub const HEALTH_CHECK_FLOOR_SECS: u64 = 30;
/// Default health-tick interval, per spec.md §4.F.
pub const DEFAULT_HEALTH_CHECK_SECS: u64 = 300;
/// Default hodl invoice expiry, per spec.md §4.G step 4.
pub const DEFAULT_HODL_INVOICE_EXPIRY_SECS: u64 = 1200;
/// Peer-connect timeout, per spec.md §5.
pub const PEER_CONNECT_TIMEOUT_SECS: u64 = 15;
/// Relay fetch timeout, per spec.md §5.
pub const RELAY_FETCH_TIMEOUT_SECS: u64 = 10;

/// On-disk TOML shape, deserialized verbatim before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
	#[serde(default)]
	pub node: NodeSection,
	#[serde(default)]
	pub offer: OfferSection,
	#[serde(default)]
	pub health: HealthSection,
	#[serde(default)]
	pub nostr: NostrSection,
	#[serde(default)]
	pub lease_log: LeaseLogSection,
	#[serde(default)]
	pub log: LogSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeSection {
	pub backend: Option<String>,
	pub rest_url: Option<String>,
	pub macaroon_path: Option<PathBuf>,
	pub tls_cert_path: Option<PathBuf>,
}

fn default_max_channel_expiry_blocks() -> u32 {
	12960
}
fn default_min_funding_confirms_within_blocks() -> u32 {
	2
}
fn default_min_channel_balance_sat() -> u64 {
	1_000_000
}
fn default_max_channel_balance_sat() -> u64 {
	10_000_000
}
fn default_fixed_cost_sats() -> u64 {
	75_000
}
fn default_variable_cost_ppm() -> u64 {
	10_000
}
fn default_max_promised_fee_rate_ppm() -> u32 {
	2500
}
fn default_max_promised_base_fee_msat() -> u64 {
	1000
}
fn default_channel_max_bucket() -> u64 {
	5_000_000
}
fn default_dynamic_fixed_cost_conf_target() -> u32 {
	2
}
fn default_dynamic_fixed_cost_vb_multiplier() -> u64 {
	15_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferSection {
	#[serde(default = "default_max_channel_expiry_blocks")]
	pub max_channel_expiry_blocks: u32,
	#[serde(default)]
	pub min_required_channel_confirmations: u32,
	#[serde(default = "default_min_funding_confirms_within_blocks")]
	pub min_funding_confirms_within_blocks: u32,
	#[serde(default)]
	pub min_lsp_balance_sat: u64,
	#[serde(default = "default_max_channel_balance_sat")]
	pub max_lsp_balance_sat: u64,
	#[serde(default)]
	pub min_client_balance_sat: u64,
	#[serde(default = "default_max_channel_balance_sat")]
	pub max_client_balance_sat: u64,
	#[serde(default = "default_min_channel_balance_sat")]
	pub min_channel_balance_sat: u64,
	#[serde(default = "default_max_channel_balance_sat")]
	pub max_channel_balance_sat: u64,
	#[serde(default = "default_fixed_cost_sats")]
	pub fixed_cost_sats: u64,
	#[serde(default = "default_variable_cost_ppm")]
	pub variable_cost_ppm: u64,
	#[serde(default = "default_max_promised_fee_rate_ppm")]
	pub max_promised_fee_rate_ppm: u32,
	#[serde(default = "default_max_promised_base_fee_msat")]
	pub max_promised_base_fee_msat: u64,
	#[serde(default)]
	pub required_reserve_sat: u64,
	#[serde(default)]
	pub sum_utxos_as_max_capacity: bool,
	#[serde(default = "default_channel_max_bucket")]
	pub channel_max_bucket: u64,
	#[serde(default)]
	pub dynamic_fixed_cost: bool,
	#[serde(default = "default_dynamic_fixed_cost_conf_target")]
	pub dynamic_fixed_cost_conf_target: u32,
	#[serde(default = "default_dynamic_fixed_cost_vb_multiplier")]
	pub dynamic_fixed_cost_vb_multiplier: u64,
	#[serde(default)]
	pub include_node_sig: bool,
	#[serde(default)]
	pub lsp_message: String,
}

impl Default for OfferSection {
	fn default() -> Self {
		OfferSection {
			max_channel_expiry_blocks: default_max_channel_expiry_blocks(),
			min_required_channel_confirmations: 0,
			min_funding_confirms_within_blocks: default_min_funding_confirms_within_blocks(),
			min_lsp_balance_sat: 0,
			max_lsp_balance_sat: default_max_channel_balance_sat(),
			min_client_balance_sat: 0,
			max_client_balance_sat: default_max_channel_balance_sat(),
			min_channel_balance_sat: default_min_channel_balance_sat(),
			max_channel_balance_sat: default_max_channel_balance_sat(),
			fixed_cost_sats: default_fixed_cost_sats(),
			variable_cost_ppm: default_variable_cost_ppm(),
			max_promised_fee_rate_ppm: default_max_promised_fee_rate_ppm(),
			max_promised_base_fee_msat: default_max_promised_base_fee_msat(),
			required_reserve_sat: 0,
			sum_utxos_as_max_capacity: false,
			channel_max_bucket: default_channel_max_bucket(),
			dynamic_fixed_cost: false,
			dynamic_fixed_cost_conf_target: default_dynamic_fixed_cost_conf_target(),
			dynamic_fixed_cost_vb_multiplier: default_dynamic_fixed_cost_vb_multiplier(),
			include_node_sig: false,
			lsp_message: "No frills liquidity offer over Nostr".to_string(),
		}
	}
}

fn default_health_check_secs() -> u64 {
	DEFAULT_HEALTH_CHECK_SECS
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
	#[serde(default = "default_health_check_secs")]
	pub health_check_time_secs: u64,
}

impl Default for HealthSection {
	fn default() -> Self {
		HealthSection { health_check_time_secs: default_health_check_secs() }
	}
}

fn default_relays() -> Vec<String> {
	vec![
		"wss://relay.damus.io".to_string(),
		"wss://nostr.mom".to_string(),
		"wss://nostr.bitcoiner.social".to_string(),
	]
}

#[derive(Debug, Clone, Deserialize)]
pub struct NostrSection {
	#[serde(default)]
	pub nsec: Option<String>,
	#[serde(default = "default_relays")]
	pub relays: Vec<String>,
}

impl Default for NostrSection {
	fn default() -> Self {
		NostrSection { nsec: None, relays: default_relays() }
	}
}

fn default_lease_log_path() -> PathBuf {
	PathBuf::from("output/lease-history.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseLogSection {
	#[serde(default = "default_lease_log_path")]
	pub path: PathBuf,
}

impl Default for LeaseLogSection {
	fn default() -> Self {
		LeaseLogSection { path: default_lease_log_path() }
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
	#[serde(default = "default_log_level")]
	pub level: String,
	#[serde(default)]
	pub file: Option<PathBuf>,
}

impl Default for LogSection {
	fn default() -> Self {
		LogSection { level: default_log_level(), file: None }
	}
}

impl TomlConfig {
	pub fn from_str(contents: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(contents)
	}

	pub async fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
		let contents = tokio::fs::read_to_string(path)
			.await
			.map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
		Self::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
	}
}

/// The immutable configuration snapshot every component reads from. Built
/// once by `ConfigBuilder::build`, re-built wholesale on reload, and swapped
/// behind a single mutex (spec.md §9).
#[derive(Debug, Clone)]
pub struct Config {
	pub node_rest_url: String,
	pub node_macaroon_path: PathBuf,
	pub node_tls_cert_path: PathBuf,
	pub offer: OfferSection,
	pub health_check_time_secs: u64,
	pub nostr_nsec: Option<String>,
	pub nostr_relays: Vec<String>,
	pub lease_log_path: PathBuf,
	pub log_level: String,
	pub log_file: Option<PathBuf>,
}

impl Config {
	/// Validate and normalise a `TomlConfig` into a `Config` snapshot.
	/// Required node-connection fields missing from the file are a fatal
	/// config error (teacher's `missing_field_err` shape, generalized).
	pub fn from_toml(toml: TomlConfig) -> Result<Self, ConfigError> {
		let node_rest_url =
			toml.node.rest_url.ok_or(ConfigError::MissingField("node.rest_url"))?;
		let node_macaroon_path =
			toml.node.macaroon_path.ok_or(ConfigError::MissingField("node.macaroon_path"))?;
		let node_tls_cert_path =
			toml.node.tls_cert_path.ok_or(ConfigError::MissingField("node.tls_cert_path"))?;

		if toml.offer.min_channel_balance_sat > toml.offer.max_channel_balance_sat {
			return Err(ConfigError::InvalidValue(
				"offer.min_channel_balance_sat",
				"must be <= offer.max_channel_balance_sat".to_string(),
			));
		}
		if toml.offer.min_lsp_balance_sat > toml.offer.max_lsp_balance_sat {
			return Err(ConfigError::InvalidValue(
				"offer.min_lsp_balance_sat",
				"must be <= offer.max_lsp_balance_sat".to_string(),
			));
		}
		if toml.offer.min_client_balance_sat > toml.offer.max_client_balance_sat {
			return Err(ConfigError::InvalidValue(
				"offer.min_client_balance_sat",
				"must be <= offer.max_client_balance_sat".to_string(),
			));
		}

		let health_check_time_secs =
			toml.health.health_check_time_secs.max(HEALTH_CHECK_FLOOR_SECS);

		Ok(Config {
			node_rest_url,
			node_macaroon_path,
			node_tls_cert_path,
			offer: toml.offer,
			health_check_time_secs,
			nostr_nsec: toml.nostr.nsec,
			nostr_relays: toml.nostr.relays,
			lease_log_path: toml.lease_log.path,
			log_level: toml.log.level,
			log_file: toml.log.file,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL_TOML: &str = r#"
		[node]
		rest_url = "https://127.0.0.1:8080"
		macaroon_path = "/tmp/admin.macaroon"
		tls_cert_path = "/tmp/tls.cert"
	"#;

	#[test]
	fn minimal_config_uses_defaults() {
		let toml = TomlConfig::from_str(MINIMAL_TOML).unwrap();
		let config = Config::from_toml(toml).unwrap();
		assert_eq!(config.offer.fixed_cost_sats, 75_000);
		assert_eq!(config.health_check_time_secs, DEFAULT_HEALTH_CHECK_SECS);
		assert_eq!(config.nostr_relays.len(), 3);
	}

	#[test]
	fn missing_rest_url_is_a_config_error() {
		let toml = TomlConfig::from_str("").unwrap();
		let err = Config::from_toml(toml).unwrap_err();
		assert!(matches!(err, ConfigError::MissingField("node.rest_url")));
	}

	#[test]
	fn health_check_time_is_floored_at_30_seconds() {
		let toml_str = format!("{MINIMAL_TOML}\n[health]\nhealth_check_time_secs = 5\n");
		let toml = TomlConfig::from_str(&toml_str).unwrap();
		let config = Config::from_toml(toml).unwrap();
		assert_eq!(config.health_check_time_secs, HEALTH_CHECK_FLOOR_SECS);
	}

	#[test]
	fn inverted_capacity_bounds_are_rejected() {
		let toml_str = format!(
			"{MINIMAL_TOML}\n[offer]\nmin_channel_balance_sat = 10\nmax_channel_balance_sat = 5\n"
		);
		let toml = TomlConfig::from_str(&toml_str).unwrap();
		assert!(Config::from_toml(toml).is_err());
	}
}
