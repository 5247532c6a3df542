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

//! Master key account: the root of all scanned & swept derivations.

use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::util::bip32::{
    DerivationPath, Error as Bip32Error, ExtendedPrivKey, ExtendedPubKey,
};
use bitcoin::Network;
use secp256k1::{PublicKey, SECP256K1};

/// the provided master key is invalid or has an unrecognized format; it must
/// be a BIP-39 mnemonic, an extended private key (xprv) or an extended public
/// key (xpub)
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error
)]
#[display(doc_comments)]
pub struct InvalidKeyError;

/// Master key controlling all the funds which can be found by a scan.
///
/// A private master key can both scan and sign; a public master key can only
/// scan non-hardened derivations.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MasterAccount {
    /// Signing-capable master key
    Private(ExtendedPrivKey),

    /// Watch-only master key
    Public(ExtendedPubKey),
}

impl FromStr for MasterAccount {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(xpriv) = ExtendedPrivKey::from_str(s) {
            return Ok(MasterAccount::Private(xpriv));
        }
        if let Ok(xpub) = ExtendedPubKey::from_str(s) {
            return Ok(MasterAccount::Public(xpub));
        }
        if let Ok(mnemonic) = Mnemonic::from_str(s) {
            let seed = mnemonic.to_seed("");
            let xpriv = ExtendedPrivKey::new_master(Network::Bitcoin, &seed)
                .map_err(|_| InvalidKeyError)?;
            return Ok(MasterAccount::Private(xpriv));
        }
        Err(InvalidKeyError)
    }
}

impl MasterAccount {
    /// Whether the master key holds the private component and thus can
    /// produce signatures.
    pub fn is_private(&self) -> bool {
        matches!(self, MasterAccount::Private(_))
    }

    /// Returns the extended private key, if the master key holds one.
    pub fn as_private(&self) -> Option<&ExtendedPrivKey> {
        match self {
            MasterAccount::Private(xpriv) => Some(xpriv),
            MasterAccount::Public(_) => None,
        }
    }

    /// Derives the public key at the given derivation path.
    ///
    /// Fails with [`Bip32Error::CannotDeriveFromHardenedKey`] when the path
    /// contains hardened components and the master key is watch-only.
    pub fn derive_public_key(
        &self,
        path: &DerivationPath,
    ) -> Result<PublicKey, Bip32Error> {
        match self {
            MasterAccount::Private(xpriv) => {
                let derived = xpriv.derive_priv(&SECP256K1, path)?;
                Ok(ExtendedPubKey::from_priv(&SECP256K1, &derived).public_key)
            }
            MasterAccount::Public(xpub) => {
                Ok(xpub.derive_pub(&SECP256K1, path)?.public_key)
            }
        }
    }
}
