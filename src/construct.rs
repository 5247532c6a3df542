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

//! Sweep transaction construction: legacy & BIP-143 signature hashing,
//! deterministic ECDSA signing and BIP-144 wire serialization.

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::util::bip32::Error as Bip32Error;
use bitcoin::Script;
use secp256k1::{Message, SECP256K1};

use crate::account::MasterAccount;
use crate::path::RealizeError;
use crate::scanner::Utxo;
use crate::script::ScriptType;

/// Transaction format version used for sweep transactions
pub const TX_VERSION: u32 = 2;
/// Sequence number of every input: final, no replace-by-fee signaling
pub const SEQUENCE: u32 = 0xFFFF_FFFF;
/// Transactions are valid immediately
pub const LOCKTIME: u32 = 0;
/// Signatures commit to all inputs and outputs
pub const SIGHASH_ALL: u32 = 0x01;
/// Outputs below this amount in satoshis are considered non-standard by the
/// network and get rejected
pub const DUST_LIMIT: u64 = 546;

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// Errors during sweep transaction construction.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ConstructError {
    /// the destination address is invalid or its format is not recognized
    InvalidAddress,

    /// amount of {0} satoshis is below the dust limit; not enough funds for
    /// a sweep transaction
    Dust(u64),

    /// a sweep transaction can only be signed with a private master key
    NoPrivateKey,

    /// UTXO with an underivable path: {0}
    #[from]
    Realize(RealizeError),

    /// key derivation failure: {0}
    #[from]
    Derivation(Bip32Error),
}

/// Signed input of a sweep transaction.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SignedInput {
    /// The unspent output consumed by the input
    pub utxo: Utxo,

    /// Final input script (`scriptSig`); empty for native segwit inputs
    pub script_sig: Script,

    /// Final witness stack; empty for legacy inputs
    pub witness: Vec<Vec<u8>>,
}

/// Transaction sweeping a set of unspent outputs into a single destination
/// output. Immutable once constructed.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SweepTransaction {
    inputs: Vec<SignedInput>,
    outputs: Vec<(u64, Script)>,
}

impl SweepTransaction {
    /// Crafts and signs a transaction spending all the given UTXOs and
    /// sending the requested amount to the destination address.
    ///
    /// The caller is responsible for the difference between the input sum
    /// and the requested amount: it is spent as fees.
    pub fn new(
        master: &MasterAccount,
        utxos: &[Utxo],
        address: &str,
        amount_in_sat: u64,
    ) -> Result<SweepTransaction, ConstructError> {
        let output_script = crate::script::output_script_from_address(address)
            .ok_or(ConstructError::InvalidAddress)?;
        if amount_in_sat < DUST_LIMIT {
            return Err(ConstructError::Dust(amount_in_sat));
        }
        let xpriv =
            *master.as_private().ok_or(ConstructError::NoPrivateKey)?;

        let outputs = vec![(amount_in_sat, output_script)];
        let mut inputs = Vec::with_capacity(utxos.len());

        for (vin, utxo) in utxos.iter().enumerate() {
            let path = utxo.path.to_derivation_path()?;
            let seckey = xpriv.derive_priv(&SECP256K1, &path)?.private_key;
            let pubkey = seckey.public_key(&SECP256K1);

            // The script committed to by the signature is the canonical
            // P2PKH script of the signing key; for segwit inputs (native or
            // nested) it doubles as the BIP-143 scriptCode
            let signing_script = ScriptType::Legacy.output_script(&pubkey);

            let preimage = match utxo.script_type {
                ScriptType::Legacy => {
                    legacy_preimage(utxos, &outputs, vin, &signing_script)
                }
                ScriptType::Compat | ScriptType::Segwit => {
                    bip143_preimage(utxos, &outputs, vin, &signing_script)
                }
            };

            let digest = sha256d::Hash::hash(&preimage);
            let message = Message::from_slice(&digest[..])
                .expect("sha256d digest is always 32 bytes");
            // Deterministic (RFC-6979) signature; low R & S keep both the
            // encoding length stable and BIP-146 satisfied
            let signature = SECP256K1.sign_ecdsa_low_r(&message, &seckey);

            let mut extended_signature = signature.serialize_der().to_vec();
            extended_signature.push(SIGHASH_ALL as u8);

            inputs.push(SignedInput {
                utxo: utxo.clone(),
                script_sig: utxo
                    .script_type
                    .input_script(&pubkey, &extended_signature),
                witness: utxo.script_type.witness(&pubkey, &extended_signature),
            });
        }

        Ok(SweepTransaction { inputs, outputs })
    }

    /// Crafts and signs a transaction sweeping the whole value of the given
    /// UTXOs minus the fee computed from the given fee rate (in satoshis per
    /// virtual byte).
    ///
    /// The fee is measured on a throw-away transaction paying the whole
    /// balance; deterministic signing keeps the final virtual size within
    /// one byte of that measurement.
    pub fn with_fee_rate(
        master: &MasterAccount,
        utxos: &[Utxo],
        address: &str,
        fee_rate: u64,
    ) -> Result<SweepTransaction, ConstructError> {
        let balance: u64 =
            utxos.iter().map(|utxo| utxo.amount_in_sat).sum();
        let estimate = SweepTransaction::new(master, utxos, address, balance)?;
        let fee = estimate.virtual_size() as u64 * fee_rate;
        SweepTransaction::new(
            master,
            utxos,
            address,
            balance.saturating_sub(fee),
        )
    }

    /// Signed inputs of the transaction, in the order of the UTXO list the
    /// transaction was constructed from.
    pub fn inputs(&self) -> &[SignedInput] {
        &self.inputs
    }

    /// Outputs of the transaction as (amount, script) pairs.
    pub fn outputs(&self) -> &[(u64, Script)] {
        &self.outputs
    }

    /// Total amount in satoshis sent to the destination.
    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|(amount, _)| amount).sum()
    }

    /// Size of the transaction in virtual bytes, as used by fee computation:
    /// witness bytes are discounted fourfold.
    pub fn virtual_size(&self) -> usize {
        let witness_size = self.serialize_tx(true).len();
        let non_witness_size = self.serialize_tx(false).len();
        (3 * non_witness_size + witness_size) / 4
    }

    /// Serializes the transaction in wire format: BIP-144 when any input
    /// carries a witness, the legacy format otherwise.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_tx(true)
    }

    fn serialize_tx(&self, include_witness: bool) -> Vec<u8> {
        let segwit = include_witness
            && self.inputs.iter().any(|input| !input.witness.is_empty());

        let mut tx = Vec::new();
        tx.extend(TX_VERSION.to_le_bytes());

        if segwit {
            tx.push(SEGWIT_MARKER);
            tx.push(SEGWIT_FLAG);
        }

        write_varint(&mut tx, self.inputs.len() as u64);
        for input in &self.inputs {
            write_outpoint(&mut tx, &input.utxo);
            write_varint(&mut tx, input.script_sig.len() as u64);
            tx.extend(input.script_sig.as_bytes());
            tx.extend(SEQUENCE.to_le_bytes());
        }

        write_outputs(&mut tx, &self.outputs);

        if segwit {
            for input in &self.inputs {
                write_varint(&mut tx, input.witness.len() as u64);
                for item in &input.witness {
                    write_varint(&mut tx, item.len() as u64);
                    tx.extend(item);
                }
            }
        }

        tx.extend(LOCKTIME.to_le_bytes());
        tx
    }
}

/// Legacy signature hash preimage: the wire format serialization with the
/// signed input carrying the previous output script, all other input scripts
/// empty, no witness data, and the sighash type appended.
fn legacy_preimage(
    utxos: &[Utxo],
    outputs: &[(u64, Script)],
    vin: usize,
    signing_script: &Script,
) -> Vec<u8> {
    let mut preimage = Vec::new();
    preimage.extend(TX_VERSION.to_le_bytes());

    write_varint(&mut preimage, utxos.len() as u64);
    for (index, utxo) in utxos.iter().enumerate() {
        write_outpoint(&mut preimage, utxo);
        let script: &[u8] = if index == vin {
            signing_script.as_bytes()
        } else {
            &[]
        };
        write_varint(&mut preimage, script.len() as u64);
        preimage.extend(script);
        preimage.extend(SEQUENCE.to_le_bytes());
    }

    write_outputs(&mut preimage, outputs);
    preimage.extend(LOCKTIME.to_le_bytes());
    preimage.extend(SIGHASH_ALL.to_le_bytes());
    preimage
}

/// BIP-143 signature hash preimage used for segwit inputs, native or nested.
fn bip143_preimage(
    utxos: &[Utxo],
    outputs: &[(u64, Script)],
    vin: usize,
    signing_script: &Script,
) -> Vec<u8> {
    let mut prevouts = Vec::new();
    let mut sequences = Vec::new();
    for utxo in utxos {
        write_outpoint(&mut prevouts, utxo);
        sequences.extend(SEQUENCE.to_le_bytes());
    }

    let mut outs = Vec::new();
    write_outputs_bare(&mut outs, outputs);

    let utxo = &utxos[vin];
    let mut preimage = Vec::new();
    preimage.extend(TX_VERSION.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&prevouts).into_inner());
    preimage.extend(sha256d::Hash::hash(&sequences).into_inner());
    write_outpoint(&mut preimage, utxo);
    write_varint(&mut preimage, signing_script.len() as u64);
    preimage.extend(signing_script.as_bytes());
    preimage.extend(utxo.amount_in_sat.to_le_bytes());
    preimage.extend(SEQUENCE.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&outs).into_inner());
    preimage.extend(LOCKTIME.to_le_bytes());
    preimage.extend(SIGHASH_ALL.to_le_bytes());
    preimage
}

// Txids display in reverse byte order; the inner bytes are already the wire
// order
fn write_outpoint(buf: &mut Vec<u8>, utxo: &Utxo) {
    buf.extend(utxo.txid.into_inner());
    buf.extend(utxo.output_index.to_le_bytes());
}

fn write_outputs(buf: &mut Vec<u8>, outputs: &[(u64, Script)]) {
    write_varint(buf, outputs.len() as u64);
    write_outputs_bare(buf, outputs);
}

fn write_outputs_bare(buf: &mut Vec<u8>, outputs: &[(u64, Script)]) {
    for (amount, script) in outputs {
        buf.extend(amount.to_le_bytes());
        write_varint(buf, script.len() as u64);
        buf.extend(script.as_bytes());
    }
}

/// Bitcoin wire variable-length integer encoding.
pub(crate) fn write_varint(buf: &mut Vec<u8>, number: u64) {
    match number {
        0..=0xFC => buf.push(number as u8),
        0xFD..=0xFFFF => {
            buf.push(0xFD);
            buf.extend((number as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            buf.push(0xFE);
            buf.extend((number as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xFF);
            buf.extend(number.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::blockdata::script::Instruction;
    use bitcoin::Txid;
    use secp256k1::ecdsa::Signature;
    use secp256k1::PublicKey;

    use super::*;
    use crate::path::DerivationTemplate;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon \
                            abandon abandon abandon abandon abandon about";
    const DESTINATION: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";

    fn master() -> MasterAccount {
        MasterAccount::from_str(MNEMONIC).unwrap()
    }

    fn utxo(path: &str, script_type: ScriptType, amount: u64) -> Utxo {
        Utxo {
            txid: Txid::from_str(
                "9be8edf4f18e7486212c73c48aca6f4e21da0c2c8011130caf21dd6b1af97e02",
            )
            .unwrap(),
            output_index: 1,
            amount_in_sat: amount,
            path: DerivationTemplate::from_str(path).unwrap(),
            script_type,
        }
    }

    fn mixed_utxos() -> Vec<Utxo> {
        vec![
            utxo("m/44'/0'/0'/0/0", ScriptType::Legacy, 50_000),
            utxo("m/49'/0'/0'/0/0", ScriptType::Compat, 60_000),
            utxo("m/84'/0'/0'/0/0", ScriptType::Segwit, 70_000),
        ]
    }

    fn read_varint(data: &[u8]) -> (u64, usize) {
        match data[0] {
            value @ 0..=0xFC => (value as u64, 1),
            0xFD => (
                u16::from_le_bytes(data[1..3].try_into().unwrap()) as u64,
                3,
            ),
            0xFE => (
                u32::from_le_bytes(data[1..5].try_into().unwrap()) as u64,
                5,
            ),
            0xFF => (u64::from_le_bytes(data[1..9].try_into().unwrap()), 9),
        }
    }

    #[test]
    fn varint_round_trip() {
        for number in [
            0u64,
            1,
            0xFC,
            0xFD,
            0xFFFE,
            0xFFFF,
            0x1_0000,
            0xFFFF_FFFF,
            0x1_0000_0000,
            u64::MAX,
        ] {
            let mut buf = vec![];
            write_varint(&mut buf, number);
            let (decoded, consumed) = read_varint(&buf);
            assert_eq!(decoded, number);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn invalid_address_and_dust() {
        let master = master();
        let utxos = mixed_utxos();
        assert_eq!(
            SweepTransaction::new(&master, &utxos, "clearly bogus", 10_000),
            Err(ConstructError::InvalidAddress)
        );
        assert_eq!(
            SweepTransaction::new(&master, &utxos, DESTINATION, DUST_LIMIT - 1),
            Err(ConstructError::Dust(DUST_LIMIT - 1))
        );
        assert!(
            SweepTransaction::new(&master, &utxos, DESTINATION, DUST_LIMIT)
                .is_ok()
        );
    }

    #[test]
    fn watch_only_cannot_sweep() {
        let master = master();
        let xpub = bitcoin::util::bip32::ExtendedPubKey::from_priv(
            &SECP256K1,
            master.as_private().unwrap(),
        );
        let watch_only = MasterAccount::Public(xpub);
        assert_eq!(
            SweepTransaction::new(
                &watch_only,
                &mixed_utxos(),
                DESTINATION,
                10_000
            ),
            Err(ConstructError::NoPrivateKey)
        );
    }

    #[test]
    fn legacy_only_vsize_equals_raw_size() {
        let master = master();
        let utxos = vec![utxo("m/44'/0'/0'/0/0", ScriptType::Legacy, 50_000)];
        let tx =
            SweepTransaction::new(&master, &utxos, DESTINATION, 40_000)
                .unwrap();
        let raw = tx.serialize();
        // No witness bytes: virtual size is the raw size, and the
        // serialization must not carry the segwit marker
        assert_eq!(tx.virtual_size(), raw.len());
        assert_eq!(&raw[..4], &[0x02, 0x00, 0x00, 0x00]);
        assert_ne!(raw[4], 0x00);
    }

    #[test]
    fn mixed_inputs_serialization() {
        let master = master();
        let utxos = mixed_utxos();
        let tx =
            SweepTransaction::new(&master, &utxos, DESTINATION, 100_000)
                .unwrap();
        let raw = tx.serialize();

        // Version 2 followed by the BIP-144 marker & flag
        assert_eq!(&raw[..6], &[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

        // Legacy input has no witness; segwit inputs push signature & pubkey
        assert!(tx.inputs()[0].witness.is_empty());
        assert_eq!(tx.inputs()[1].witness.len(), 2);
        assert_eq!(tx.inputs()[2].witness.len(), 2);

        // Native segwit input has an empty scriptSig; the nested one pushes
        // the 22-byte witness program
        assert!(tx.inputs()[2].script_sig.is_empty());
        assert_eq!(tx.inputs()[1].script_sig.len(), 23);

        // The witness section encodes the legacy input as a zero-item stack
        let witness_size = raw.len() - tx.serialize_tx(false).len() - 2;
        assert!(witness_size > 0);

        // 4 * vsize stays within rounding of the weight formula
        let weight =
            3 * tx.serialize_tx(false).len() + tx.serialize_tx(true).len();
        assert_eq!(tx.virtual_size(), weight / 4);
    }

    #[test]
    fn signatures_validate_against_their_inputs() {
        let master = master();
        let utxos = mixed_utxos();
        let tx =
            SweepTransaction::new(&master, &utxos, DESTINATION, 150_000)
                .unwrap();

        for (vin, input) in tx.inputs().iter().enumerate() {
            let (signature, pubkey) = match input.utxo.script_type {
                ScriptType::Legacy => {
                    let mut pushes = input.script_sig.instructions();
                    let signature = match pushes.next() {
                        Some(Ok(Instruction::PushBytes(data))) => data.to_vec(),
                        other => panic!("expected signature push: {:?}", other),
                    };
                    let pubkey = match pushes.next() {
                        Some(Ok(Instruction::PushBytes(data))) => data.to_vec(),
                        other => panic!("expected pubkey push: {:?}", other),
                    };
                    (signature, pubkey)
                }
                ScriptType::Compat | ScriptType::Segwit => {
                    (input.witness[0].clone(), input.witness[1].clone())
                }
            };

            // Sighash byte is appended to every DER signature
            assert_eq!(signature.last(), Some(&(SIGHASH_ALL as u8)));
            let signature =
                Signature::from_der(&signature[..signature.len() - 1])
                    .unwrap();
            let pubkey = PublicKey::from_slice(&pubkey).unwrap();

            let signing_script = ScriptType::Legacy.output_script(&pubkey);
            let preimage = match input.utxo.script_type {
                ScriptType::Legacy => legacy_preimage(
                    &utxos,
                    tx.outputs(),
                    vin,
                    &signing_script,
                ),
                ScriptType::Compat | ScriptType::Segwit => bip143_preimage(
                    &utxos,
                    tx.outputs(),
                    vin,
                    &signing_script,
                ),
            };
            let digest = sha256d::Hash::hash(&preimage);
            let message = Message::from_slice(&digest[..]).unwrap();
            SECP256K1
                .verify_ecdsa(&message, &signature, &pubkey)
                .unwrap();
        }
    }

    #[test]
    fn fee_computation_from_dummy_transaction() {
        let master = master();
        let utxos = vec![
            utxo("m/84'/0'/0'/0/0", ScriptType::Segwit, 100_000),
            utxo("m/84'/0'/0'/0/1", ScriptType::Segwit, 100_000),
        ];

        let estimate =
            SweepTransaction::new(&master, &utxos, DESTINATION, 200_000)
                .unwrap();
        let fee = estimate.virtual_size() as u64 * 10;

        let tx =
            SweepTransaction::with_fee_rate(&master, &utxos, DESTINATION, 10)
                .unwrap();
        assert_eq!(tx.output_value(), 200_000 - fee);
        // Deterministic low-R signing keeps the estimate within a byte
        assert!(tx.virtual_size().abs_diff(estimate.virtual_size()) <= 1);
    }

    #[test]
    fn fee_leaving_dust_is_rejected() {
        let master = master();
        let utxos = vec![utxo("m/84'/0'/0'/0/0", ScriptType::Segwit, 1_200)];
        // ~110 vbytes at 10 sat/vB leaves less than the dust limit
        assert!(matches!(
            SweepTransaction::with_fee_rate(&master, &utxos, DESTINATION, 10),
            Err(ConstructError::Dust(_))
        ));
    }
}
