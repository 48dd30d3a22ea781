// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Error taxonomy shared by every component. Every variant carries a stable
//! numeric `code()` used when an error crosses the wire as an `OrderError`.

use thiserror::Error;

/// The on-wire codes a customer may observe in an `OrderError` DM.
///
/// The first four mirror the taxonomy the LSP is willing to disclose to a
/// counterparty; everything past invoice creation collapses to
/// [`LspError::ClientRejected`] before it is ever serialized (see
/// `LspError::as_wire_code`).
pub const CODE_CONNECTION_ERROR: i64 = 0;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_CLIENT_REJECTED: i64 = 1;
pub const CODE_OPTION_MISMATCH: i64 = 100;

#[derive(Debug, Error)]
pub enum LspError {
	#[error("invalid params: {0}")]
	InvalidParams(String),

	#[error("option mismatch: {0}")]
	OptionMismatch(String),

	#[error("connection error: {0}")]
	ConnectionError(String),

	#[error("client rejected: {0}")]
	ClientRejected(String),

	#[error("node error: {0}")]
	NodeError(String),

	#[error("invoice error: {0}")]
	InvoiceError(String),

	#[error("protocol error: {0}")]
	ProtocolError(String),

	#[error("cancelled")]
	Cancelled,
}

impl LspError {
	/// Numeric code carried in an `OrderError` DM, per the original
	/// taxonomy. Internal-only variants are folded into `ClientRejected`
	/// with a generic message rather than disclosing backend detail.
	pub fn code(&self) -> i64 {
		match self {
			LspError::ConnectionError(_) => CODE_CONNECTION_ERROR,
			LspError::InvalidParams(_) => CODE_INVALID_PARAMS,
			LspError::ClientRejected(_) => CODE_CLIENT_REJECTED,
			LspError::OptionMismatch(_) => CODE_OPTION_MISMATCH,
			LspError::NodeError(_)
			| LspError::InvoiceError(_)
			| LspError::ProtocolError(_)
			| LspError::Cancelled => CODE_CLIENT_REJECTED,
		}
	}

	/// The message that is safe to hand to a counterparty. Backend and
	/// protocol failures are never disclosed verbatim.
	pub fn wire_message(&self) -> String {
		match self {
			LspError::InvalidParams(m)
			| LspError::OptionMismatch(m)
			| LspError::ConnectionError(m) => m.clone(),
			LspError::ClientRejected(m) => m.clone(),
			LspError::NodeError(_) | LspError::InvoiceError(_) | LspError::ProtocolError(_) => {
				"LSP could not fulfil order at this time".to_string()
			},
			LspError::Cancelled => "order cancelled".to_string(),
		}
	}

	/// True for any failure that occurs after a hodl invoice has been
	/// created but before the channel has reached `OPEN`. Callers use this
	/// to decide whether an invoice cancel is owed.
	pub fn requires_invoice_cancel(&self) -> bool {
		!matches!(self, LspError::InvalidParams(_) | LspError::OptionMismatch(_))
	}
}

pub type Result<T> = std::result::Result<T, LspError>;
