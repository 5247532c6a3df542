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

//! Catalog of derivation path templates used by known wallet software.

use std::str::FromStr;

use crate::path::DerivationTemplate;
use crate::script::ScriptType;

use self::ScriptType::{Compat, Legacy, Segwit};

/// Derivation path templates used by known wallet software, together with
/// the output script types each wallet produced under that path.
///
/// Template placeholders: `a` is the account number and `i` the address
/// index.
///
/// The catalog is ordered; the order defines the round-robin rotation of the
/// global script iterator and thus the order in which schemes are probed.
pub const KNOWN_SCHEMES: &[(&str, &[ScriptType])] = &[
    ("m/44'/0'/a'/0/i", &[Legacy]), // BIP44, external chain
    ("m/44'/0'/a'/1/i", &[Legacy]), // BIP44, change chain
    ("m/49'/0'/a'/0/i", &[Compat]), // BIP49, external chain
    ("m/49'/0'/a'/1/i", &[Compat]), // BIP49, change chain
    ("m/84'/0'/a'/0/i", &[Segwit]), // BIP84, external chain
    ("m/84'/0'/a'/1/i", &[Segwit]), // BIP84, change chain
    // Bitcoin Core legacy wallets
    ("m/0'/0'/i'", &[Legacy, Compat, Segwit]),
    // BRD, Hodl, Coinomi & Multibit, external & change chains
    ("m/0'/0/i", &[Legacy, Compat, Segwit]),
    ("m/0'/1/i", &[Legacy, Compat, Segwit]),
    // Samourai ricochet accounts
    ("m/44'/0'/2147483647'/0/i", &[Legacy]),
    ("m/44'/0'/2147483647'/1/i", &[Legacy]),
    ("m/49'/0'/2147483647'/0/i", &[Compat]),
    ("m/49'/0'/2147483647'/1/i", &[Compat]),
    ("m/84'/0'/2147483647'/0/i", &[Segwit]),
    ("m/84'/0'/2147483647'/1/i", &[Segwit]),
    // Samourai post-mix account
    ("m/84'/0'/2147483646'/0/i", &[Segwit]),
    ("m/84'/0'/2147483646'/1/i", &[Segwit]),
    // Samourai pre-mix account
    ("m/84'/0'/2147483645'/0/i", &[Segwit]),
    ("m/84'/0'/2147483645'/1/i", &[Segwit]),
    // Samourai bad-bank account
    ("m/84'/0'/2147483644'/0/i", &[Segwit]),
    ("m/84'/0'/2147483644'/1/i", &[Segwit]),
];

/// Parses the catalog into template objects, preserving the catalog order.
pub fn known_templates() -> Vec<(DerivationTemplate, &'static [ScriptType])> {
    KNOWN_SCHEMES
        .iter()
        .map(|(path, script_types)| {
            let template = DerivationTemplate::from_str(path)
                .expect("invalid derivation template in the built-in catalog");
            (template, *script_types)
        })
        .collect()
}
