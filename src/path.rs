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

//! Derivation path templates: paths from a master key where the account
//! number and the address index may be left as free variables.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use bitcoin::util::bip32::{ChildNumber, DerivationPath};

use crate::HARDENED_INDEX_BOUNDARY;

/// Errors parsing string representation of a derivation path template
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum TemplateParseError {
    /// derivation path template must start with `m/` prefix
    NoMasterPrefix,

    /// derivation path template must contain at least one component
    Empty,

    /// invalid derivation path template component `{0}`
    InvalidComponent(String),

    /// derivation index {0} exceeds the BIP-32 hardened index boundary
    IndexOverflow(u32),
}

/// Errors happening when a derivation path template with an unresolved
/// placeholder is realized into a concrete derivation path
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error
)]
#[display(doc_comments)]
pub enum RealizeError {
    /// account placeholder left unresolved at derivation time
    UnresolvedAccount,

    /// address index placeholder left unresolved at derivation time
    UnresolvedIndex,
}

/// Single component of a derivation path template.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum TemplateStep {
    /// Literal non-hardened derivation index
    Normal(u32),

    /// Literal hardened derivation index (the stored value is not offset by
    /// the hardened index boundary)
    Hardened(u32),

    /// Account-number placeholder, written `a`; hardened in all templates of
    /// the built-in catalog
    Account {
        /// Whether the substituted account number derives hardened
        hardened: bool,
    },

    /// Address-index placeholder, written `i`
    Index {
        /// Whether the substituted address index derives hardened
        hardened: bool,
    },
}

impl Display for TemplateStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hardened = match self {
            TemplateStep::Normal(index) => {
                write!(f, "{}", index)?;
                false
            }
            TemplateStep::Hardened(index) => {
                write!(f, "{}", index)?;
                true
            }
            TemplateStep::Account { hardened } => {
                f.write_str("a")?;
                *hardened
            }
            TemplateStep::Index { hardened } => {
                f.write_str("i")?;
                *hardened
            }
        };
        if hardened {
            f.write_str("'")?;
        }
        Ok(())
    }
}

impl FromStr for TemplateStep {
    type Err = TemplateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, hardened) = match s
            .strip_suffix('\'')
            .or_else(|| s.strip_suffix('h'))
        {
            Some(base) => (base, true),
            None => (s, false),
        };
        Ok(match base {
            "a" => TemplateStep::Account { hardened },
            "i" => TemplateStep::Index { hardened },
            _ => {
                let index = u32::from_str(base).map_err(|_| {
                    TemplateParseError::InvalidComponent(s.to_owned())
                })?;
                if index >= HARDENED_INDEX_BOUNDARY {
                    return Err(TemplateParseError::IndexOverflow(index));
                }
                if hardened {
                    TemplateStep::Hardened(index)
                } else {
                    TemplateStep::Normal(index)
                }
            }
        })
    }
}

/// Derivation path from a master key which may keep the account number
/// and/or the address index as free variables.
///
/// Displays in the canonical form `m/44'/0'/a'/0/i`; equality and hashing
/// match the canonical string form.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct DerivationTemplate(Vec<TemplateStep>);

impl Display for DerivationTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for step in &self.0 {
            write!(f, "/{}", step)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationTemplate {
    type Err = TemplateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = s
            .strip_prefix("m/")
            .ok_or(TemplateParseError::NoMasterPrefix)?;
        if path.is_empty() {
            return Err(TemplateParseError::Empty);
        }
        let steps = path
            .split('/')
            .map(TemplateStep::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DerivationTemplate(steps))
    }
}

impl DerivationTemplate {
    /// Whether this template has the account level as a free variable.
    pub fn has_variable_account(&self) -> bool {
        self.0
            .iter()
            .any(|step| matches!(step, TemplateStep::Account { .. }))
    }

    /// Whether this template has the index level as a free variable.
    pub fn has_variable_index(&self) -> bool {
        self.0
            .iter()
            .any(|step| matches!(step, TemplateStep::Index { .. }))
    }

    /// Whether any of the template components requires hardened derivation,
    /// which is impossible without the private master key.
    pub fn has_hardened_step(&self) -> bool {
        self.0.iter().any(|step| {
            matches!(
                step,
                TemplateStep::Hardened(_)
                    | TemplateStep::Account { hardened: true }
                    | TemplateStep::Index { hardened: true }
            )
        })
    }

    /// Constructs a new template with the account placeholder replaced by a
    /// concrete account number.
    pub fn with_account(&self, account: u32) -> DerivationTemplate {
        DerivationTemplate(
            self.0
                .iter()
                .map(|step| match step {
                    TemplateStep::Account { hardened: true } => {
                        TemplateStep::Hardened(account)
                    }
                    TemplateStep::Account { hardened: false } => {
                        TemplateStep::Normal(account)
                    }
                    step => *step,
                })
                .collect(),
        )
    }

    /// Constructs a new template with the index placeholder replaced by a
    /// concrete address index.
    pub fn with_index(&self, index: u32) -> DerivationTemplate {
        DerivationTemplate(
            self.0
                .iter()
                .map(|step| match step {
                    TemplateStep::Index { hardened: true } => {
                        TemplateStep::Hardened(index)
                    }
                    TemplateStep::Index { hardened: false } => {
                        TemplateStep::Normal(index)
                    }
                    step => *step,
                })
                .collect(),
        )
    }

    /// Realizes the template into a concrete BIP-32 derivation path.
    ///
    /// Both placeholders must have been substituted before; a remaining
    /// placeholder is an error.
    pub fn to_derivation_path(&self) -> Result<DerivationPath, RealizeError> {
        let path = self
            .0
            .iter()
            .map(|step| match step {
                TemplateStep::Normal(index) => {
                    Ok(ChildNumber::Normal { index: *index })
                }
                TemplateStep::Hardened(index) => {
                    Ok(ChildNumber::Hardened { index: *index })
                }
                TemplateStep::Account { .. } => {
                    Err(RealizeError::UnresolvedAccount)
                }
                TemplateStep::Index { .. } => Err(RealizeError::UnresolvedIndex),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DerivationPath::from(path))
    }
}
