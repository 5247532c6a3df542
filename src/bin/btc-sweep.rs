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

#[macro_use]
extern crate amplify;

use std::str::FromStr;
use std::{fs, io, process};

use amplify::hex::ToHex;
use clap::Parser;
use colored::Colorize;
use rand::seq::SliceRandom;
use serde_crate::Deserialize;
use sweeper::resolvers::{
    BroadcastTx, ElectrumResolver, ResolveFee, ResolverError,
};
use sweeper::{
    scan_master_key, ConstructError, DerivationTemplate, InvalidKeyError,
    MasterAccount, ScanError, ScanReporter, ScriptType, SweepTransaction, Utxo,
};

/// Command-line arguments
#[derive(Parser)]
#[derive(Clone, PartialEq, Eq, Debug)]
#[clap(
    author,
    version,
    name = "btc-sweep",
    about = "Find and sweep all the funds of a master key, regardless of the \
             derivation scheme or address format the original wallet used"
)]
pub struct Args {
    /// Master key to sweep: a BIP-39 mnemonic, an xpriv or an xpub
    pub key: String,

    /// Craft a transaction sending all found funds to this address
    #[clap(long, value_name = "ADDRESS")]
    pub address: Option<String>,

    /// Broadcast the crafted transaction to the network
    #[clap(long, requires = "address")]
    pub broadcast: bool,

    /// Fee rate to use, in satoshis per virtual byte; the next-block fee
    /// rate reported by the electrum server is used when omitted
    #[clap(long, value_name = "RATE")]
    pub fee_rate: Option<u64>,

    /// Maximum gap of unused addresses to explore
    #[clap(long, value_name = "NUM", default_value = "20")]
    pub address_gap: u32,

    /// Maximum gap of unused account levels to explore
    #[clap(long, value_name = "NUM", default_value = "0")]
    pub account_gap: u32,

    /// Hostname of the electrum server to use; a random server from
    /// `servers.json` is picked when omitted
    #[clap(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port number of the electrum server
    #[clap(long, value_name = "PORT", requires = "host")]
    pub port: Option<u16>,

    /// Electrum connection protocol: t=TCP, s=SSL
    #[clap(long, value_name = "PROTOCOL", default_value = "s")]
    pub protocol: String,

    /// Disable request batching
    #[clap(long)]
    pub no_batching: bool,
}

/// Fallback electrum server record from `servers.json`
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(crate = "serde_crate")]
pub struct ServerEntry {
    /// Server hostname
    pub host: String,
    /// SSL port number
    pub port: u16,
}

/// Errors of the command-line tool
#[derive(Debug, Display, Error, From)]
#[display(inner)]
pub enum Error {
    #[from]
    Io(io::Error),

    #[from]
    Key(InvalidKeyError),

    #[from]
    Scan(ScanError),

    #[from]
    Construct(ConstructError),

    #[from]
    Resolver(ResolverError),

    #[from]
    Json(serde_json::Error),

    /// electrum protocol must be either `t` (TCP) or `s` (SSL)
    #[display(
        "electrum protocol must be either `t` (TCP) or `s` (SSL)"
    )]
    InvalidProtocol,

    /// `servers.json` does not list any electrum servers
    #[display("`servers.json` does not list any electrum servers")]
    NoServers,

    /// fee estimation unavailable
    #[display(
        "the server could not estimate fee rates; re-run with an explicit \
         `--fee-rate`"
    )]
    FeeUnavailable,
}

struct ConsoleReporter;

impl ScanReporter for ConsoleReporter {
    fn on_progress(&self, probed: usize, total: usize) {
        use io::Write;
        eprint!(
            "\r{} {} of {} possible scripts",
            "Probed".bright_white(),
            probed,
            total.max(probed)
        );
        let _ = io::stderr().flush();
    }

    fn on_scheme_found(&self, path: &DerivationTemplate, script_type: ScriptType) {
        println!(
            "\r{} path={} address_type={}",
            "Found used addresses at".bright_white(),
            path,
            script_type
        );
    }

    fn on_utxo_found(&self, utxo: &Utxo) {
        println!("\r{} {}", "Found unspent output".bright_green(), utxo);
    }
}

fn electrum_url(args: &Args) -> Result<String, Error> {
    if let Some(host) = &args.host {
        return Ok(match args.protocol.as_str() {
            "t" => format!("tcp://{}:{}", host, args.port.unwrap_or(50001)),
            "s" => format!("ssl://{}:{}", host, args.port.unwrap_or(50002)),
            _ => return Err(Error::InvalidProtocol),
        });
    }
    let servers = fs::read_to_string("servers.json")?;
    let servers: Vec<ServerEntry> = serde_json::from_str(&servers)?;
    let server =
        servers.choose(&mut rand::thread_rng()).ok_or(Error::NoServers)?;
    Ok(format!("ssl://{}:{}", server.host, server.port))
}

fn run(args: &Args) -> Result<(), Error> {
    let master = MasterAccount::from_str(&args.key)?;
    match master {
        MasterAccount::Private(_) => {
            println!("{}", "Read master private key successfully".green())
        }
        MasterAccount::Public(_) => {
            println!("{}", "Read master public key successfully".green())
        }
    }

    let url = electrum_url(args)?;
    println!(
        "{} {}, this might take a while",
        "Connecting to electrum server".bright_white(),
        url
    );
    let resolver = ElectrumResolver::connect(&url)?;

    let utxos = scan_master_key(
        &resolver,
        &master,
        args.address_gap,
        args.account_gap,
        !args.no_batching,
        &ConsoleReporter,
    )?;
    eprintln!();

    if utxos.is_empty() {
        println!("{}", "Didn't find any unspent outputs".yellow());
        return Ok(());
    }

    let balance: u64 = utxos.iter().map(|utxo| utxo.amount_in_sat).sum();
    println!(
        "{} {} sats",
        "Total spendable balance found:".bright_white(),
        balance.to_string().bright_green()
    );

    if !master.is_private() {
        println!("Re-run with a private key to create a sweep transaction");
        return Ok(());
    }
    let address = match &args.address {
        Some(address) => address,
        None => {
            println!("Re-run with `--address` to create a sweep transaction");
            return Ok(());
        }
    };

    let fee_rate = match args.fee_rate {
        Some(fee_rate) => fee_rate,
        None => {
            let fee_rate = resolver
                .estimate_fee_rate(1)?
                .ok_or(Error::FeeUnavailable)?;
            println!(
                "{} {} sat/vbyte",
                "Fetched next-block fee rate of".bright_white(),
                fee_rate
            );
            fee_rate
        }
    };

    let tx = SweepTransaction::with_fee_rate(&master, &utxos, address, fee_rate)?;
    let raw_tx = tx.serialize();

    println!(
        "\n{}\n\n{}\n",
        "This transaction sweeps all funds to the address provided"
            .bright_white(),
        raw_tx.to_hex()
    );

    if !args.broadcast {
        println!(
            "Copy this transaction and broadcast it manually to the network, \
             or re-run with `--broadcast`"
        );
        return Ok(());
    }

    println!("{}", "Broadcasting transaction to the network".bright_white());
    let txid = resolver.broadcast(&raw_tx)?;
    println!(
        "{} {} {}",
        "Transaction".bright_green(),
        txid,
        "successfully broadcasted".bright_green()
    );

    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("{} {}", "Error:".bright_red(), err);
        process::exit(1);
    }
}
