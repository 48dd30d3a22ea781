// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Lease log: an append-only record of every channel this node has sold,
//! kept as a single `{"leases": [...]}` JSON document (spec.md §6). Orders
//! run as independent tasks, so appends are serialized behind a mutex and
//! committed by writing a temp file and renaming it over the original --
//! there is no concurrent-append format here, only whole-file replace.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::LspError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
	pub pubkey_uri: String,
	pub lsp_balance_sat: u64,
	pub client_balance_sat: u64,
	pub total_capacity: u64,
	pub channel_expiry_blocks: u32,
	pub lease_start_block: u32,
	pub lease_end_block: u32,
	pub total_fee: u64,
	pub total_cost: u64,
	pub payment_hash: String,
	pub channel_point: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LeaseLogDocument {
	#[serde(default)]
	leases: Vec<LeaseRecord>,
}

pub struct LeaseLog {
	path: PathBuf,
	lock: Mutex<()>,
}

impl LeaseLog {
	pub fn new(path: PathBuf) -> Self {
		LeaseLog { path, lock: Mutex::new(()) }
	}

	/// Every lease ever recorded, oldest first.
	pub async fn all(&self) -> Result<Vec<LeaseRecord>, LspError> {
		let _guard = self.lock.lock().await;
		Ok(self.read_document().await?.leases)
	}

	/// Append one record and durably replace the file. Serialized against
	/// other appends by the log's own mutex, so two orders settling at once
	/// can't race each other's read-modify-write.
	pub async fn append(&self, record: LeaseRecord) -> Result<(), LspError> {
		let _guard = self.lock.lock().await;
		let mut doc = self.read_document().await?;
		doc.leases.push(record);

		let json = serde_json::to_string_pretty(&doc)
			.map_err(|e| LspError::ProtocolError(format!("failed to encode lease log: {e}")))?;

		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent)
					.await
					.map_err(|e| LspError::ProtocolError(format!("failed to create lease log directory: {e}")))?;
			}
		}

		let tmp_path = self.path.with_extension("json.tmp");
		tokio::fs::write(&tmp_path, json.as_bytes())
			.await
			.map_err(|e| LspError::ProtocolError(format!("failed to write lease log: {e}")))?;
		tokio::fs::rename(&tmp_path, &self.path)
			.await
			.map_err(|e| LspError::ProtocolError(format!("failed to commit lease log: {e}")))?;
		Ok(())
	}

	async fn read_document(&self) -> Result<LeaseLogDocument, LspError> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) => serde_json::from_str(&contents)
				.map_err(|e| LspError::ProtocolError(format!("corrupt lease log: {e}"))),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LeaseLogDocument::default()),
			Err(e) => Err(LspError::ProtocolError(format!("failed to read lease log: {e}"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(funding_txid: &str) -> LeaseRecord {
		LeaseRecord {
			pubkey_uri: "03".to_string() + &"b".repeat(64) + "@127.0.0.1:9735",
			lsp_balance_sat: 5_000_000,
			client_balance_sat: 0,
			total_capacity: 5_000_000,
			channel_expiry_blocks: 4320,
			lease_start_block: 800_000,
			lease_end_block: 804_320,
			total_fee: 158_333,
			total_cost: 158_333,
			payment_hash: "aa".repeat(32),
			channel_point: format!("{}:0", funding_txid),
		}
	}

	#[tokio::test]
	async fn append_then_read_round_trips() {
		let dir = std::env::temp_dir().join(format!("lspd-lease-log-test-{}", Uuid::new_v4()));
		let log = LeaseLog::new(dir.join("lease-history.json"));

		log.append(record("aa".repeat(32).as_str())).await.unwrap();
		log.append(record("bb".repeat(32).as_str())).await.unwrap();

		let all = log.all().await.unwrap();
		assert_eq!(all.len(), 2);
		assert_eq!(all[0].channel_point, format!("{}:0", "aa".repeat(32)));
		assert_eq!(all[1].channel_point, format!("{}:0", "bb".repeat(32)));

		let _ = tokio::fs::remove_dir_all(dir).await;
	}

	#[tokio::test]
	async fn missing_file_reads_as_empty() {
		let dir = std::env::temp_dir().join(format!("lspd-lease-log-missing-{}", Uuid::new_v4()));
		let log = LeaseLog::new(dir.join("nonexistent.json"));
		assert!(log.all().await.unwrap().is_empty());
	}
}
