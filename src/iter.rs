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

//! Iterators producing all output script candidates of a master key.
//!
//! [`DescriptorScriptIterator`] walks the (address index, account) grid of a
//! single derivation template & script type pair; [`ScriptIterator`] cycles
//! all the descriptors of the built-in catalog in round-robin order.

use std::collections::VecDeque;

use bitcoin::util::bip32::Error as Bip32Error;
use bitcoin::Script;

use crate::account::MasterAccount;
use crate::path::DerivationTemplate;
use crate::script::ScriptType;
use crate::templates;

/// Output script candidate emitted by the iterators and probed against the
/// history oracle.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ScriptCandidate {
    /// Output script to probe
    pub script: Script,

    /// Derivation template with the account number substituted and the
    /// address index still free
    pub path: DerivationTemplate,

    /// Address index of the grid cell the candidate was produced from
    pub index: u32,

    /// Account number of the grid cell the candidate was produced from
    pub account: u32,

    /// Script type of the candidate
    pub script_type: ScriptType,

    pub(crate) descriptor_id: usize,
}

impl ScriptCandidate {
    /// Full derivation path of the candidate, with both the account and the
    /// address index substituted.
    pub fn full_path(&self) -> DerivationTemplate {
        self.path.with_index(self.index)
    }
}

/// Iterator traversing all the output scripts which a single descriptor
/// (a derivation template & script type pair) can produce.
///
/// The grid of (address index, account) cells is bounded by the configured
/// gap limits and extended on the fly when [`Self::mark_used`] reports that
/// a probed cell was used on chain.
pub struct DescriptorScriptIterator {
    template: DerivationTemplate,
    script_type: ScriptType,
    address_gap: u32,
    account_gap: u32,
    index: u32,
    account: u32,
    max_index: u32,
    max_account: u32,
    extra_indices: VecDeque<(u32, u32)>,
    extra_accounts: VecDeque<(u32, u32)>,
    total_scripts: usize,
}

impl DescriptorScriptIterator {
    /// Constructs a fresh iterator positioned at the (0, 0) grid cell.
    ///
    /// Grid axes along which the template has no free variable are fixed to
    /// a single cell.
    pub fn new(
        template: DerivationTemplate,
        script_type: ScriptType,
        address_gap: u32,
        account_gap: u32,
    ) -> DescriptorScriptIterator {
        let max_index = if template.has_variable_index() {
            address_gap
        } else {
            0
        };
        let max_account = if template.has_variable_account() {
            account_gap
        } else {
            0
        };
        DescriptorScriptIterator {
            template,
            script_type,
            address_gap,
            account_gap,
            index: 0,
            account: 0,
            max_index,
            max_account,
            extra_indices: VecDeque::new(),
            extra_accounts: VecDeque::new(),
            total_scripts: (max_index as usize + 1) * (max_account as usize + 1),
        }
    }

    /// Number of scripts this descriptor has produced or will ever produce.
    ///
    /// Grows when [`Self::mark_used`] extends the search space.
    pub fn total_scripts(&self) -> usize {
        self.total_scripts
    }

    /// Whether this descriptor must be drained before the round-robin
    /// rotation continues: a used script has scheduled address-gap cells
    /// which are likely to be used as well.
    pub fn has_priority_scripts(&self) -> bool {
        !self.extra_indices.is_empty()
    }

    fn is_exhausted(&self) -> bool {
        self.extra_indices.is_empty()
            && self.extra_accounts.is_empty()
            && (self.index > self.max_index || self.account > self.max_account)
    }

    fn script_at(
        &self,
        master: &MasterAccount,
        index: u32,
        account: u32,
    ) -> Result<ScriptCandidate, Bip32Error> {
        let path = self.template.with_account(account);
        let derivation = path
            .with_index(index)
            .to_derivation_path()
            .expect("all template placeholders are substituted");
        let pubkey = master.derive_public_key(&derivation)?;
        Ok(ScriptCandidate {
            script: self.script_type.output_script(&pubkey),
            path,
            index,
            account,
            script_type: self.script_type,
            descriptor_id: 0,
        })
    }

    /// Produces the next script candidate, or `None` once the grid and all
    /// scheduled extra cells are exhausted.
    pub fn next_script(
        &mut self,
        master: &MasterAccount,
    ) -> Result<Option<ScriptCandidate>, Bip32Error> {
        if let Some((index, account)) = self.extra_indices.pop_front() {
            return self.script_at(master, index, account).map(Some);
        }

        if let Some((index, account)) = self.extra_accounts.pop_front() {
            return self.script_at(master, index, account).map(Some);
        }

        if self.index > self.max_index || self.account > self.max_account {
            return Ok(None);
        }

        let candidate = self.script_at(master, self.index, self.account)?;

        // Since traversing the entire [0, max_index] x [0, max_account] space
        // of combinations might take a while, we walk the (index, account)
        // grid in diagonal order. This order prioritizes the most probable
        // combinations (low index, low account), while still covering the
        // whole rectangle in the long run.
        //
        //           0     1     2
        //         ↙     ↙     ↙
        //    (0,0) (1,0) (2,0)  3
        //   ↙     ↙     ↙     ↙
        //    (0,1) (1,1) (2,1)  4
        //   ↙     ↙     ↙     ↙
        //    (0,2) (1,2) (2,2)
        //   ↙     ↙     ↙
        if self.index == 0 || self.account == self.max_account {
            // the border is reached, start the next diagonal
            let diagonal = self.index + self.account + 1;
            self.index = diagonal.min(self.max_index);
            self.account = diagonal - self.index;
        } else {
            // go down the diagonal
            self.index -= 1;
            self.account += 1;
        }

        Ok(Some(candidate))
    }

    /// Extends the search space after the script produced at the given grid
    /// cell was seen used on chain.
    ///
    /// Along the index axis, cells up to `address_gap` past the used index
    /// are scheduled into the priority queue; along the account axis, rows
    /// up to `account_gap` past the used account are unlocked. Expansion only
    /// applies to axes the template actually varies: extending a fixed axis
    /// would re-emit identical scripts forever.
    pub fn mark_used(&mut self, index: u32, account: u32) {
        if self.template.has_variable_index() {
            for i in index + 1..=index.saturating_add(self.address_gap) {
                if i > self.max_index
                    && !self.extra_indices.contains(&(i, account))
                {
                    self.extra_indices.push_back((i, account));
                    self.total_scripts += 1;
                }
            }
        }

        if self.template.has_variable_account() {
            while self.max_account <= account.saturating_add(self.account_gap) {
                self.max_account += 1;
                self.total_scripts += self.max_index as usize + 1;
                // Cells of the unlocked row which the diagonal walk has
                // already passed by will never be visited by it; queue them
                // separately.
                let diagonal = self.index + self.account;
                for i in 0..diagonal.saturating_sub(self.max_account) {
                    self.extra_accounts.push_back((i, self.max_account));
                }
            }
        }
    }
}

/// Iterator producing the output scripts of all the descriptors from the
/// built-in catalog, cycling them in round-robin order so that every scheme
/// is explored progressively.
pub struct ScriptIterator<'master> {
    master: &'master MasterAccount,
    descriptors: Vec<DescriptorScriptIterator>,
    rotation: Vec<usize>,
    cursor: usize,
    last: Option<usize>,
}

impl<'master> ScriptIterator<'master> {
    /// Constructs the iterator over all catalog descriptors.
    ///
    /// With a watch-only master key, templates requiring hardened derivation
    /// are skipped: their scripts cannot be computed without the private key.
    pub fn new(
        master: &'master MasterAccount,
        address_gap: u32,
        account_gap: u32,
    ) -> ScriptIterator<'master> {
        let mut descriptors = vec![];
        for (template, script_types) in templates::known_templates() {
            if !master.is_private() && template.has_hardened_step() {
                log::warn!(
                    "skipping {} which requires a private master key for \
                     hardened derivation",
                    template
                );
                continue;
            }
            for script_type in script_types {
                descriptors.push(DescriptorScriptIterator::new(
                    template.clone(),
                    *script_type,
                    address_gap,
                    account_gap,
                ));
            }
        }
        let rotation = (0..descriptors.len()).collect();
        ScriptIterator {
            master,
            descriptors,
            rotation,
            cursor: 0,
            last: None,
        }
    }

    /// Total number of scripts which were or will be explored across all the
    /// descriptors still in rotation.
    pub fn total_scripts(&self) -> usize {
        self.rotation
            .iter()
            .map(|&id| self.descriptors[id].total_scripts())
            .sum()
    }

    fn next_descriptor_script(
        &mut self,
    ) -> Result<Option<ScriptCandidate>, Bip32Error> {
        let master = self.master;

        // A descriptor which has just seen a used script explores its
        // address-gap neighborhood before the rotation continues.
        if let Some(last) = self.last {
            if self.descriptors[last].has_priority_scripts() {
                if let Some(mut candidate) =
                    self.descriptors[last].next_script(master)?
                {
                    candidate.descriptor_id = last;
                    return Ok(Some(candidate));
                }
            }
        }

        let id = self.rotation[self.cursor];
        self.last = Some(id);
        let candidate = self.descriptors[id].next_script(master)?;

        match candidate {
            Some(mut candidate) => {
                candidate.descriptor_id = id;
                self.cursor += 1;
                if self.cursor >= self.rotation.len() {
                    self.cursor = 0;
                }
                Ok(Some(candidate))
            }
            None => {
                // Exhausted descriptors leave the rotation; the cursor now
                // points at the element shifted into the freed slot.
                self.rotation.remove(self.cursor);
                if self.cursor >= self.rotation.len() {
                    self.cursor = 0;
                }
                Ok(None)
            }
        }
    }

    /// Produces the next script candidate, cycling the descriptors, or
    /// `None` once all of them are exhausted.
    pub fn next_script(
        &mut self,
    ) -> Result<Option<ScriptCandidate>, Bip32Error> {
        while !self.rotation.is_empty() {
            if let Some(candidate) = self.next_descriptor_script()? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Reports that the script of a previously emitted candidate was seen
    /// used on chain, extending the owning descriptor's search space.
    ///
    /// A descriptor which was already exhausted and removed from the rotation
    /// re-enters it when the report schedules new work; this keeps batched
    /// and unbatched scans observing the same set of scripts.
    pub fn mark_used(&mut self, candidate: &ScriptCandidate) {
        let id = candidate.descriptor_id;
        self.descriptors[id].mark_used(candidate.index, candidate.account);
        if !self.rotation.contains(&id) && !self.descriptors[id].is_exhausted()
        {
            self.rotation.push(id);
        }
    }
}
