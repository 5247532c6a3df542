// Bitcoin sweep wallet library & command-line tool
// by LNP/BP Association (https://lnp-bp.org)
// Written in 2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

//! Library for finding & sweeping all bitcoin funds controlled by a single
//! master key, whatever derivation scheme or address format the wallet
//! which produced them was using.
//!
//! The library consists of two subsystems:
//! - descriptor scanner: a bounded search over the (address index, account)
//!   grid of each derivation template from the built-in catalog, driven by
//!   usage feedback from an Electrum-style history oracle (see [`iter`],
//!   [`scanner`] and [`resolvers`] modules);
//! - sweep transaction builder: construction and signing of a single
//!   transaction spending all discovered outputs, covering legacy, nested
//!   segwit and native segwit spendings (see [`construct`] module).

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;

pub mod account;
pub mod construct;
pub mod iter;
pub mod path;
pub mod resolvers;
pub mod scanner;
pub mod script;
pub mod templates;

pub use account::{InvalidKeyError, MasterAccount};
pub use construct::{ConstructError, SweepTransaction, DUST_LIMIT};
pub use iter::{DescriptorScriptIterator, ScriptCandidate, ScriptIterator};
pub use path::{DerivationTemplate, RealizeError, TemplateParseError, TemplateStep};
pub use scanner::{scan_master_key, ScanError, ScanReporter, Utxo, MAX_BATCH_SIZE};
pub use script::{output_script_from_address, ScriptType};

/// Constant determining BIP32 boundary for u32 values after which index
/// is treated as hardened
pub const HARDENED_INDEX_BOUNDARY: u32 = 1 << 31;
