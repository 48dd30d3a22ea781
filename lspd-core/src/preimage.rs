// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// A 32-byte preimage `P` and its hash `H = SHA-256(P)`, both carried in hex
/// and URL-safe base64 forms (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preimage {
	pub hex: String,
	pub hex_hash: String,
	pub base64: String,
	pub base64_hash: String,
}

impl Preimage {
	/// Generate a fresh random preimage. Unlike the original implementation
	/// (which hashes a UUIDv4's bytes to derive the preimage), we draw the
	/// preimage directly from the OS CSPRNG — a UUID is the wrong source of
	/// entropy to route through when `rand` is already a dependency.
	pub fn generate() -> Self {
		let mut bytes = [0u8; 32];
		rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
		Self::from_bytes(&bytes)
	}

	pub fn from_bytes(preimage: &[u8; 32]) -> Self {
		let hash: [u8; 32] = Sha256::digest(preimage).into();
		Preimage {
			hex: hex_string(preimage),
			hex_hash: hex_string(&hash),
			base64: URL_SAFE_NO_PAD.encode(preimage),
			base64_hash: URL_SAFE_NO_PAD.encode(hash),
		}
	}
}

fn hex_string(bytes: &[u8]) -> String {
	use std::fmt::Write;
	let mut s = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		write!(s, "{b:02x}").expect("writing to a String cannot fail");
	}
	s
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preimage_hash_matches_sha256() {
		let bytes = [7u8; 32];
		let p = Preimage::from_bytes(&bytes);
		let expected_hash: [u8; 32] = Sha256::digest(bytes).into();
		assert_eq!(p.hex_hash, hex_string(&expected_hash));
		assert_eq!(p.hex, hex_string(&bytes));
	}

	#[test]
	fn two_generated_preimages_differ() {
		let a = Preimage::generate();
		let b = Preimage::generate();
		assert_ne!(a.hex, b.hex);
	}
}
