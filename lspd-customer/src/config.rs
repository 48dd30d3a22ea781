// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The customer driver only ever needs the `[nostr]` and `[log]` sections of
//! the shared `TomlConfig` shape -- it has no Lightning node of its own, so
//! the node-connection fields `lspd_core::config::Config` requires are
//! irrelevant here and deliberately not validated.

use std::io;
use std::path::{Path, PathBuf};

use lspd_core::config::TomlConfig;

use crate::args::ArgsConfig;

pub struct CustomerConfig {
	pub nostr_nsec: Option<String>,
	pub nostr_relays: Vec<String>,
	pub log_level: String,
}

fn default_config_path() -> Option<PathBuf> {
	std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".lspd").join("customer.toml"))
}

pub async fn load_config(args: &ArgsConfig) -> io::Result<CustomerConfig> {
	let config_path =
		args.config_file.clone().or_else(default_config_path).filter(|path| path.exists());

	let mut toml = if let Some(path) = config_path { read_toml(&path).await? } else { TomlConfig::default() };

	if let Some(nsec) = &args.nostr_nsec {
		toml.nostr.nsec = Some(nsec.clone());
	}
	if let Some(level) = &args.log_level {
		toml.log.level = level.clone();
	}

	Ok(CustomerConfig {
		nostr_nsec: toml.nostr.nsec,
		nostr_relays: toml.nostr.relays,
		log_level: toml.log.level,
	})
}

async fn read_toml(path: &Path) -> io::Result<TomlConfig> {
	let contents = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| io::Error::new(e.kind(), format!("failed to read config file {path:?}: {e}")))?;
	TomlConfig::from_str(&contents).map_err(|e| {
		io::Error::new(io::ErrorKind::InvalidData, format!("config file {path:?} is invalid TOML: {e}"))
	})
}
