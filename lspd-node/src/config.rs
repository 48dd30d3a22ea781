// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Loads the node's config file, layers CLI/env overrides on top, and builds
//! the immutable `Config` snapshot, the same file-then-args flow as the
//! teacher's `util/config::load_config`.

use std::io;
use std::path::{Path, PathBuf};

use lspd_core::config::{Config, TomlConfig};

use crate::args::{merge_args, ArgsConfig};

fn default_config_path() -> Option<PathBuf> {
	dirs_next_home().map(|home| home.join(".lspd").join("config.toml"))
}

fn dirs_next_home() -> Option<PathBuf> {
	std::env::var_os("HOME").map(PathBuf::from)
}

pub async fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let config_path = args
		.config_file
		.clone()
		.or_else(default_config_path)
		.filter(|path| path.exists());

	let mut toml = if let Some(path) = config_path {
		read_toml(&path).await?
	} else {
		TomlConfig::default()
	};

	merge_args(&mut toml, args);

	Config::from_toml(toml).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

async fn read_toml(path: &Path) -> io::Result<TomlConfig> {
	let contents = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| io::Error::new(e.kind(), format!("failed to read config file {path:?}: {e}")))?;
	TomlConfig::from_str(&contents).map_err(|e| {
		io::Error::new(io::ErrorKind::InvalidData, format!("config file {path:?} is invalid TOML: {e}"))
	})
}
