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

//! Single-key script constructors for the output types produced by the
//! wallets covered by the derivation catalog.

use std::str::FromStr;

use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash;
use bitcoin::util::address::{Payload, WitnessVersion};
use bitcoin::{Address, Network, PubkeyHash, Script, ScriptHash, WPubkeyHash};
use secp256k1::PublicKey;

/// Type of a single-key output script.
///
/// Defines how the output script, the input script (`scriptSig`) and the
/// witness stack spending that output are built from a public key and a
/// signature.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum ScriptType {
    /// Pay-to-pubkey-hash output (P2PKH)
    #[display("legacy")]
    Legacy,

    /// Pay-to-witness-pubkey-hash nested into pay-to-script-hash
    /// (P2SH-P2WPKH)
    #[display("compat")]
    Compat,

    /// Native pay-to-witness-pubkey-hash output (P2WPKH)
    #[display("segwit")]
    Segwit,
}

impl ScriptType {
    /// Computes the output script (`scriptPubkey`) for a given public key.
    pub fn output_script(self, pubkey: &PublicKey) -> Script {
        match self {
            ScriptType::Legacy => {
                Script::new_p2pkh(&PubkeyHash::hash(&pubkey.serialize()))
            }
            ScriptType::Compat => {
                let program = witness_program(pubkey);
                Script::new_p2sh(&ScriptHash::hash(program.as_bytes()))
            }
            ScriptType::Segwit => witness_program(pubkey),
        }
    }

    /// Computes the input script (`scriptSig`) for a given public key and a
    /// signature already extended with the sighash-type byte.
    pub fn input_script(self, pubkey: &PublicKey, signature: &[u8]) -> Script {
        match self {
            ScriptType::Legacy => Builder::new()
                .push_slice(signature)
                .push_slice(&pubkey.serialize())
                .into_script(),
            ScriptType::Compat => Builder::new()
                .push_slice(witness_program(pubkey).as_bytes())
                .into_script(),
            ScriptType::Segwit => Script::new(),
        }
    }

    /// Computes the witness stack for a given public key and a signature
    /// already extended with the sighash-type byte.
    pub fn witness(self, pubkey: &PublicKey, signature: &[u8]) -> Vec<Vec<u8>> {
        match self {
            ScriptType::Legacy => vec![],
            ScriptType::Compat | ScriptType::Segwit => {
                vec![signature.to_vec(), pubkey.serialize().to_vec()]
            }
        }
    }
}

fn witness_program(pubkey: &PublicKey) -> Script {
    Script::new_v0_p2wpkh(&WPubkeyHash::hash(&pubkey.serialize()))
}

/// Computes the output script paying to a given mainnet address.
///
/// Recognizes base58 P2PKH and P2SH addresses and bech32 addresses with
/// witness version 0. Returns `None` for everything else, including valid
/// addresses of other networks and future witness versions.
pub fn output_script_from_address(address: &str) -> Option<Script> {
    let address = Address::from_str(address).ok()?;
    if address.network != Network::Bitcoin {
        return None;
    }
    match address.payload {
        Payload::PubkeyHash(_) | Payload::ScriptHash(_) => {
            Some(address.script_pubkey())
        }
        Payload::WitnessProgram {
            version: WitnessVersion::V0,
            ..
        } => Some(address.script_pubkey()),
        _ => None,
    }
}
