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

//! Resolvers are traits providing the scan with access to an external
//! blockchain index (history oracle), keeping the scanner independent from
//! the concrete transport.

#[cfg(feature = "electrum")]
mod electrum;

#[cfg(feature = "electrum")]
pub use electrum::ElectrumResolver;

use bitcoin::{Script, Txid};

/// Errors returned by history oracles.
///
/// Both kinds abort the current scan: no retry is attempted and no address
/// is silently skipped.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ResolverError {
    /// unable to reach the oracle server: {0}
    Unavailable(String),

    /// the oracle server rejected the request: {0}
    Rejected(String),
}

/// Single entry of an output script usage history.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct HistoryEntry {
    /// Id of the historical transaction
    pub txid: Txid,

    /// Height of the block which mined the transaction; zero or negative
    /// values denote mempool transactions
    pub height: i32,
}

/// Unspent transaction output as reported by the oracle.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct UnspentEntry {
    /// Id of the funding transaction
    pub txid: Txid,

    /// Output number within the funding transaction
    pub vout: u32,

    /// Value of the output in satoshis
    pub value: u64,
}

/// Script usage & unspent output oracle driving a wallet scan.
///
/// Responses correspond positionally to the request list. Implementations
/// must batch multi-script requests whenever the underlying transport allows,
/// keeping any single request payload bounded.
pub trait ResolveScripts {
    /// Returns the on-chain usage history of each of the scripts, in request
    /// order. An empty history means the script was never used.
    fn script_history(
        &self,
        scripts: &[Script],
    ) -> Result<Vec<Vec<HistoryEntry>>, ResolverError>;

    /// Returns the unspent outputs bound to each of the scripts, in request
    /// order.
    fn script_unspent(
        &self,
        scripts: &[Script],
    ) -> Result<Vec<Vec<UnspentEntry>>, ResolverError>;
}

/// Fee rate estimation oracle.
pub trait ResolveFee {
    /// Returns the fee rate, in satoshis per virtual byte, expected to get a
    /// transaction confirmed within the given number of blocks, or `None`
    /// when the oracle has no estimate to offer.
    fn estimate_fee_rate(
        &self,
        target_blocks: usize,
    ) -> Result<Option<u64>, ResolverError>;
}

/// Transaction broadcasting facility.
pub trait BroadcastTx {
    /// Publishes a raw transaction to the network, returning its txid.
    fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, ResolverError>;
}
