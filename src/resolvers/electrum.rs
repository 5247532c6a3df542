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

use bitcoin::{Script, Txid};
use electrum_client::{Client, Config, ElectrumApi, Error};

use super::{
    BroadcastTx, HistoryEntry, ResolveFee, ResolveScripts, ResolverError,
    UnspentEntry,
};

/// Electrum-based history oracle.
///
/// Multi-script requests use the electrum batching protocol
/// (`blockchain.scripthash.get_history` / `listunspent` over a single
/// batched call); single-script requests go out as plain calls.
pub struct ElectrumResolver {
    client: Client,
}

impl ElectrumResolver {
    /// Connects to an electrum server given a URL connection string in the
    /// form of `tcp://host:port` or `ssl://host:port`.
    ///
    /// Domain validation is switched off: many public electrum servers run
    /// with self-signed certificates.
    pub fn connect(server: &str) -> Result<Self, ResolverError> {
        log::debug!("connecting to electrum server {}", server);
        let config = Config::builder().validate_domain(false).build();
        let client = Client::from_config(server, config)
            .map_err(|err| ResolverError::Unavailable(err.to_string()))?;
        Ok(ElectrumResolver { client })
    }
}

fn map_err(err: Error) -> ResolverError {
    match err {
        // Remote error messages are surfaced verbatim
        Error::Protocol(value) => ResolverError::Rejected(value.to_string()),
        err => ResolverError::Unavailable(err.to_string()),
    }
}

impl ResolveScripts for ElectrumResolver {
    fn script_history(
        &self,
        scripts: &[Script],
    ) -> Result<Vec<Vec<HistoryEntry>>, ResolverError> {
        let responses = match scripts {
            [] => vec![],
            [script] => vec![self
                .client
                .script_get_history(script)
                .map_err(map_err)?],
            scripts => self
                .client
                .batch_script_get_history(scripts.iter())
                .map_err(map_err)?,
        };
        Ok(responses
            .into_iter()
            .map(|history| {
                history
                    .into_iter()
                    .map(|entry| HistoryEntry {
                        txid: entry.tx_hash,
                        height: entry.height,
                    })
                    .collect()
            })
            .collect())
    }

    fn script_unspent(
        &self,
        scripts: &[Script],
    ) -> Result<Vec<Vec<UnspentEntry>>, ResolverError> {
        let responses = match scripts {
            [] => vec![],
            [script] => vec![self
                .client
                .script_list_unspent(script)
                .map_err(map_err)?],
            scripts => self
                .client
                .batch_script_list_unspent(scripts.iter())
                .map_err(map_err)?,
        };
        Ok(responses
            .into_iter()
            .map(|unspent| {
                unspent
                    .into_iter()
                    .map(|entry| UnspentEntry {
                        txid: entry.tx_hash,
                        vout: entry.tx_pos as u32,
                        value: entry.value,
                    })
                    .collect()
            })
            .collect())
    }
}

impl ResolveFee for ElectrumResolver {
    fn estimate_fee_rate(
        &self,
        target_blocks: usize,
    ) -> Result<Option<u64>, ResolverError> {
        let btc_per_kb = self
            .client
            .estimate_fee(target_blocks)
            .map_err(map_err)?;
        // Electrum signals a missing estimate with -1
        if btc_per_kb < 0.0 {
            return Ok(None);
        }
        Ok(Some((btc_per_kb * 1e8 / 1024.0) as u64))
    }
}

impl BroadcastTx for ElectrumResolver {
    fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, ResolverError> {
        self.client.transaction_broadcast_raw(raw_tx).map_err(map_err)
    }
}
