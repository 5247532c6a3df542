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

//! Wallet scanner: drives the script iterators against a history oracle and
//! collects all unspent outputs controlled by a master key.

use std::collections::HashSet;

use bitcoin::util::bip32::Error as Bip32Error;
use bitcoin::{Script, Txid};

use crate::account::MasterAccount;
use crate::iter::ScriptIterator;
use crate::path::DerivationTemplate;
use crate::resolvers::{ResolveScripts, ResolverError};
use crate::script::ScriptType;

/// Maximum number of requests packed into a single batched oracle call,
/// keeping any single request payload bounded.
pub const MAX_BATCH_SIZE: usize = 100;

/// Data needed to spend a currently unspent transaction output.
#[derive(
    Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display
)]
#[display("{amount_in_sat}@{txid}:{output_index}")]
pub struct Utxo {
    /// Id of the funding transaction
    pub txid: Txid,

    /// Output number within the funding transaction
    pub output_index: u32,

    /// Value of the output in satoshis
    pub amount_in_sat: u64,

    /// Fully realized derivation path controlling the output
    pub path: DerivationTemplate,

    /// Script type of the output
    pub script_type: ScriptType,
}

/// Errors aborting a wallet scan.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ScanError {
    /// history oracle failure: {0}
    #[from]
    Resolver(ResolverError),

    /// key derivation failure: {0}
    #[from]
    Derivation(Bip32Error),
}

/// Progress callbacks of a wallet scan.
///
/// The unit type provides a no-op implementation for silent scans.
pub trait ScanReporter {
    /// Called after each processed batch with the number of scripts probed
    /// so far and the current total estimate. The total grows when used
    /// scripts extend the search space.
    fn on_progress(&self, probed: usize, total: usize) {
        let _ = (probed, total);
    }

    /// Called when a derivation scheme is seen used for the first time.
    fn on_scheme_found(&self, path: &DerivationTemplate, script_type: ScriptType) {
        let _ = (path, script_type);
    }

    /// Called for every discovered unspent output.
    fn on_utxo_found(&self, utxo: &Utxo) {
        let _ = utxo;
    }
}

impl ScanReporter for () {}

/// Iterates through all the possible scripts of a master key, probing them
/// against the history oracle, and returns all unspent outputs found.
///
/// Scripts of a batch found used extend the search of their descriptor
/// before the next batch is pulled, so the address-gap guarantee holds for
/// both batched and unbatched operation.
pub fn scan_master_key(
    resolver: &impl ResolveScripts,
    master: &MasterAccount,
    address_gap: u32,
    account_gap: u32,
    batching: bool,
    reporter: &impl ScanReporter,
) -> Result<Vec<Utxo>, ScanError> {
    let batch_size = if batching { MAX_BATCH_SIZE } else { 1 };
    let mut iter = ScriptIterator::new(master, address_gap, account_gap);
    let mut seen_schemes = HashSet::<(DerivationTemplate, ScriptType)>::new();
    let mut utxos = vec![];
    let mut probed = 0usize;

    loop {
        // Pull the next batch of candidate scripts
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match iter.next_script()? {
                Some(candidate) => batch.push(candidate),
                None => break,
            }
        }
        if batch.is_empty() {
            break;
        }
        probed += batch.len();

        let scripts: Vec<Script> =
            batch.iter().map(|candidate| candidate.script.clone()).collect();
        let histories = resolver.script_history(&scripts)?;

        // Candidates with a non-empty history extend their descriptor's
        // search space right away, before the next batch is pulled
        let mut used = vec![];
        for (candidate, history) in batch.iter().zip(&histories) {
            if history.is_empty() {
                continue;
            }
            if seen_schemes
                .insert((candidate.path.clone(), candidate.script_type))
            {
                reporter.on_scheme_found(&candidate.path, candidate.script_type);
            }
            iter.mark_used(candidate);
            used.push(candidate);
        }

        if !used.is_empty() {
            let scripts: Vec<Script> = used
                .iter()
                .map(|candidate| candidate.script.clone())
                .collect();
            let unspents = resolver.script_unspent(&scripts)?;
            for (candidate, entries) in used.iter().zip(&unspents) {
                for entry in entries {
                    let utxo = Utxo {
                        txid: entry.txid,
                        output_index: entry.vout,
                        amount_in_sat: entry.value,
                        path: candidate.full_path(),
                        script_type: candidate.script_type,
                    };
                    reporter.on_utxo_found(&utxo);
                    utxos.push(utxo);
                }
            }
        }

        // The total must be re-read: used scripts increase it
        reporter.on_progress(probed, iter.total_scripts());
    }

    Ok(utxos)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::str::FromStr;

    use super::*;
    use crate::resolvers::{HistoryEntry, UnspentEntry};

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon \
                            abandon abandon abandon abandon abandon about";

    fn master() -> MasterAccount {
        MasterAccount::from_str(MNEMONIC).unwrap()
    }

    fn txid() -> Txid {
        Txid::from_str(
            "9be8edf4f18e7486212c73c48aca6f4e21da0c2c8011130caf21dd6b1af97e02",
        )
        .unwrap()
    }

    fn script_for(
        master: &MasterAccount,
        path: &str,
        script_type: ScriptType,
    ) -> Script {
        let path = DerivationTemplate::from_str(path)
            .unwrap()
            .to_derivation_path()
            .unwrap();
        script_type.output_script(&master.derive_public_key(&path).unwrap())
    }

    #[derive(Default)]
    struct TestOracle {
        used: HashSet<Script>,
        unspent: HashMap<Script, Vec<UnspentEntry>>,
        probed: RefCell<Vec<Script>>,
        history_calls: RefCell<usize>,
        unspent_calls: RefCell<usize>,
    }

    impl TestOracle {
        fn mark_used(&mut self, script: Script) {
            self.used.insert(script);
        }

        fn add_unspent(&mut self, script: Script, value: u64) {
            self.used.insert(script.clone());
            self.unspent.entry(script).or_default().push(UnspentEntry {
                txid: txid(),
                vout: 0,
                value,
            });
        }
    }

    impl ResolveScripts for TestOracle {
        fn script_history(
            &self,
            scripts: &[Script],
        ) -> Result<Vec<Vec<HistoryEntry>>, ResolverError> {
            *self.history_calls.borrow_mut() += 1;
            self.probed.borrow_mut().extend(scripts.iter().cloned());
            Ok(scripts
                .iter()
                .map(|script| {
                    if self.used.contains(script) {
                        vec![HistoryEntry {
                            txid: txid(),
                            height: 1,
                        }]
                    } else {
                        vec![]
                    }
                })
                .collect())
        }

        fn script_unspent(
            &self,
            scripts: &[Script],
        ) -> Result<Vec<Vec<UnspentEntry>>, ResolverError> {
            *self.unspent_calls.borrow_mut() += 1;
            Ok(scripts
                .iter()
                .map(|script| {
                    self.unspent.get(script).cloned().unwrap_or_default()
                })
                .collect())
        }
    }

    #[test]
    fn empty_wallet() {
        let master = master();
        let oracle = TestOracle::default();
        let utxos =
            scan_master_key(&oracle, &master, 20, 0, true, &()).unwrap();

        assert!(utxos.is_empty());
        // No used scripts, so no unspent requests at all
        assert_eq!(*oracle.unspent_calls.borrow(), 0);
        // 27 descriptors, each probing its 21-cell grid exactly once
        assert_eq!(oracle.probed.borrow().len(), 27 * 21);
        // Full batches of 100
        assert_eq!(*oracle.history_calls.borrow(), 6);
    }

    #[test]
    fn single_utxo_at_bip84() {
        let master = master();
        let script = script_for(&master, "m/84'/0'/0'/0/0", ScriptType::Segwit);
        let mut oracle = TestOracle::default();
        oracle.add_unspent(script, 100_000);

        let utxos =
            scan_master_key(&oracle, &master, 20, 0, true, &()).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].path.to_string(), "m/84'/0'/0'/0/0");
        assert_eq!(utxos[0].script_type, ScriptType::Segwit);
        assert_eq!(utxos[0].amount_in_sat, 100_000);
        assert_eq!(utxos[0].output_index, 0);
    }

    #[test]
    fn hit_chain_within_gap_is_discovered() {
        let master = master();
        let mut oracle = TestOracle::default();
        // Used addresses at indices 0 and 15 keep every gap below the
        // 20-address limit, making index 30 reachable
        for index in [0, 15] {
            oracle.mark_used(script_for(
                &master,
                &format!("m/84'/0'/0'/0/{}", index),
                ScriptType::Segwit,
            ));
        }
        oracle.add_unspent(
            script_for(&master, "m/84'/0'/0'/0/30", ScriptType::Segwit),
            40_000,
        );

        let utxos =
            scan_master_key(&oracle, &master, 20, 0, true, &()).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].path.to_string(), "m/84'/0'/0'/0/30");
    }

    #[test]
    fn isolated_hit_past_gap_stays_undiscovered() {
        let master = master();
        let mut oracle = TestOracle::default();
        // Index 25 with no used address before it: 25 > address gap of 20
        oracle.add_unspent(
            script_for(&master, "m/84'/0'/0'/0/25", ScriptType::Segwit),
            40_000,
        );

        let utxos =
            scan_master_key(&oracle, &master, 20, 0, true, &()).unwrap();
        assert!(utxos.is_empty());
    }

    #[test]
    fn hardened_index_template_is_probed_for_all_script_types() {
        let master = master();
        let oracle = TestOracle::default();
        scan_master_key(&oracle, &master, 5, 0, true, &()).unwrap();

        let probed: HashSet<Script> =
            oracle.probed.borrow().iter().cloned().collect();
        for script_type in
            [ScriptType::Legacy, ScriptType::Compat, ScriptType::Segwit]
        {
            // `m/0'/0'/i'` realizes its index hardened
            let script = script_for(&master, "m/0'/0'/3'", script_type);
            assert!(probed.contains(&script));
        }
    }

    #[test]
    fn batched_and_unbatched_scans_agree() {
        let master = master();
        let mut oracle = TestOracle::default();
        oracle.add_unspent(
            script_for(&master, "m/44'/0'/0'/1/7", ScriptType::Legacy),
            10_000,
        );
        oracle.add_unspent(
            script_for(&master, "m/0'/0/19", ScriptType::Compat),
            20_000,
        );
        oracle.add_unspent(
            script_for(&master, "m/0'/0/39", ScriptType::Compat),
            30_000,
        );
        oracle.mark_used(script_for(
            &master,
            "m/84'/0'/2147483646'/0/2",
            ScriptType::Segwit,
        ));

        let mut batched =
            scan_master_key(&oracle, &master, 20, 0, true, &()).unwrap();
        let mut unbatched =
            scan_master_key(&oracle, &master, 20, 0, false, &()).unwrap();
        batched.sort();
        unbatched.sort();
        assert_eq!(batched, unbatched);
        assert_eq!(batched.len(), 3);
    }

    struct RecordingReporter {
        schemes: RefCell<Vec<String>>,
        utxos: RefCell<usize>,
    }

    impl ScanReporter for RecordingReporter {
        fn on_scheme_found(
            &self,
            path: &DerivationTemplate,
            script_type: ScriptType,
        ) {
            self.schemes
                .borrow_mut()
                .push(format!("{}:{}", path, script_type));
        }

        fn on_utxo_found(&self, _utxo: &Utxo) {
            *self.utxos.borrow_mut() += 1;
        }
    }

    #[test]
    fn reporter_sees_schemes_once() {
        let master = master();
        let mut oracle = TestOracle::default();
        oracle.add_unspent(
            script_for(&master, "m/84'/0'/0'/0/0", ScriptType::Segwit),
            10_000,
        );
        oracle.add_unspent(
            script_for(&master, "m/84'/0'/0'/0/1", ScriptType::Segwit),
            20_000,
        );

        let reporter = RecordingReporter {
            schemes: RefCell::new(vec![]),
            utxos: RefCell::new(0),
        };
        let utxos =
            scan_master_key(&oracle, &master, 20, 0, true, &reporter).unwrap();

        assert_eq!(utxos.len(), 2);
        assert_eq!(*reporter.utxos.borrow(), 2);
        // Two used addresses of the same descriptor report a single scheme
        assert_eq!(
            reporter.schemes.borrow().as_slice(),
            &[s!("m/84'/0'/0'/0/i:segwit")]
        );
    }
}
