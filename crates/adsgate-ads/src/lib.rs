// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # adsgate-ads
//!
//! ADS (Automation Device Specification) client for the ADSGATE gateway.
//!
//! Implements the AMS/TCP framing, the value codec for the primitive PLC
//! types, symbol handle management, device notifications, and bulk symbol
//! upload against a Beckhoff ADS router.
//!
//! ## Layers
//!
//! - [`proto`]: frame serialization and parsing (shared with the test
//!   mock PLC)
//! - [`codec`]: typed value encode/decode
//! - [`symbols`]: symbol table upload parsing and struct expansion
//! - [`client`]: the transport (invoke-id correlation, notification
//!   routing) and the session (handles, typed reads/writes,
//!   subscriptions)
//!
//! ## Example
//!
//! ```rust,ignore
//! use adsgate_ads::{PlcSession, SessionConfig};
//! use adsgate_core::AdsType;
//!
//! let session = PlcSession::new(config);
//! session.connect().await?;
//! let value = session.read("MAIN.temperature", AdsType::Real).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod codec;
pub mod error;
pub mod proto;
pub mod symbols;
pub mod types;

pub use client::{AmsTransport, PlcSession, SymbolSubscription};
pub use error::{ads_code, AdsError, AdsResult};
pub use symbols::{expand_structs, InfoBlock};
pub use types::{
    index_group, state_flags, AdsCommand, AmsAddr, AmsNetId, SessionConfig, TransmissionMode,
    INFO_BLOCK_LEN,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
