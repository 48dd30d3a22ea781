// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! BOLT-11 invoice decoding (component A). Customer-side code needs to pull
//! the payee pubkey and amount out of an invoice without running a full
//! Lightning node, which is exactly what `lightning-invoice` gives us for
//! free: bech32 parsing, multiplier-unit amount decoding, and
//! recoverable-signature payee recovery are all handled by the library
//! rather than re-implemented here.

use std::str::FromStr;

use lightning_invoice::Bolt11Invoice;

use crate::error::LspError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInvoice {
	pub amount_sat: u64,
	pub payee_pubkey_hex: String,
	pub payment_hash_hex: String,
	pub expiry_seconds: u64,
}

/// Decode a BOLT-11 string, recovering the payee pubkey via the `n` tag if
/// present or via ECDSA signature recovery otherwise. Fails on bech32
/// checksum error, a non-`ln` prefix, a too-short signature, or a signature
/// that does not verify — exactly the failure modes spec.md §4.A lists.
pub fn decode_invoice(bolt11: &str) -> Result<DecodedInvoice, LspError> {
	let invoice = Bolt11Invoice::from_str(bolt11)
		.map_err(|e| LspError::InvoiceError(format!("invalid invoice: {e}")))?;

	let amount_msat = invoice
		.amount_milli_satoshis()
		.ok_or_else(|| LspError::InvoiceError("invoice carries no amount".to_string()))?;

	let payee_pubkey = invoice.recover_payee_pub_key();

	Ok(DecodedInvoice {
		amount_sat: amount_msat / 1000,
		payee_pubkey_hex: hex_encode(&payee_pubkey.serialize()),
		payment_hash_hex: hex_encode(invoice.payment_hash().as_ref()),
		expiry_seconds: invoice.expiry_time().as_secs(),
	})
}

fn hex_encode(bytes: &[u8]) -> String {
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
	fn garbage_input_is_rejected() {
		let result = decode_invoice("not-an-invoice");
		assert!(result.is_err());
	}

	#[test]
	fn wrong_prefix_is_rejected() {
		// Valid bech32 but not an "ln"-prefixed HRP.
		let result = decode_invoice("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq");
		assert!(result.is_err());
	}
}
