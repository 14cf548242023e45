//! Obscura node and wallet binary.
//!
//! Usage:
//!   obscura node                          # run a node (observer by default)
//!   obscura node --validator-key w.json   # run a validating node
//!   obscura wallet init                   # create wallet keys
//!   obscura wallet address                # print the stealth address
//!   obscura wallet balance                # scan the local chain store
//!   obscura wallet send --to <addr> --amount N [--fee N]
//!   obscura wallet stake --amount N       # build a bond transaction
//!   obscura wallet unbond                 # build an unbond transaction

use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use clap::{Parser, Subcommand};

use obscura::config::ObscuraConfig;
use obscura::crypto::keys::WalletKeys;
use obscura::gossip::NullGossip;
use obscura::node::{Node, NodeConfig};
use obscura::transaction::{StakingTx, StakingType};
use obscura::wallet::{format_address, parse_address, Wallet};

/// Obscura privacy-preserving permissioned blockchain node.
#[derive(Parser, Debug)]
#[command(name = "obscura", version, about = "Obscura private blockchain node")]
struct Cli {
    /// Data directory for the chain store and key files.
    #[arg(long, default_value = "./obscura-data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node.
    Node {
        /// Genesis file path.
        #[arg(long, default_value = "genesis.json")]
        genesis: PathBuf,

        /// Validator key file; omit to run an observer.
        #[arg(long)]
        validator_key: Option<PathBuf>,

        /// Block proposal interval in milliseconds.
        #[arg(long)]
        block_time_ms: Option<u64>,
    },

    /// Manage the wallet.
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
}

#[derive(Subcommand, Debug)]
enum WalletAction {
    /// Create a new wallet key file.
    Init,

    /// Show the wallet's stealth address.
    Address,

    /// Scan the local chain store and show the balance.
    Balance {
        /// Genesis file path (used when the store is empty).
        #[arg(long, default_value = "genesis.json")]
        genesis: PathBuf,
    },

    /// Build a private transaction and write it to a file.
    Send {
        /// Recipient address, `<view hex>:<spend hex>`.
        #[arg(long)]
        to: String,

        /// Amount to send, in base units.
        #[arg(long)]
        amount: u64,

        /// Transaction fee.
        #[arg(long, default_value = "1")]
        fee: u64,

        /// Genesis file path (used when the store is empty).
        #[arg(long, default_value = "genesis.json")]
        genesis: PathBuf,
    },

    /// Build a bond staking transaction and write it to a file.
    Stake {
        /// Stake amount, in base units.
        #[arg(long)]
        amount: u64,
    },

    /// Build an unbond staking transaction and write it to a file.
    Unbond,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = ObscuraConfig::load(&cli.data_dir);

    match cli.command {
        Command::Node {
            genesis,
            validator_key,
            block_time_ms,
        } => {
            // CLI flags override the config file.
            let validator_key = validator_key.or_else(|| config.validator_key_path());
            let block_time =
                Duration::from_millis(block_time_ms.unwrap_or(config.node.block_time_ms));
            run_node(cli.data_dir, genesis, validator_key, block_time)
        }
        Command::Wallet { action } => run_wallet_command(action, &cli.data_dir),
    }
}

fn run_node(
    data_dir: PathBuf,
    genesis_file: PathBuf,
    validator_key: Option<PathBuf>,
    block_time: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let validator = match validator_key {
        Some(path) => {
            let keys = WalletKeys::load(&path)?;
            tracing::info!(validator = %keys.spend.public, "running as validator");
            // The long-term spend key doubles as the validator identity.
            Some(keys.spend)
        }
        None => {
            tracing::info!("running as observer");
            None
        }
    };

    let node = Arc::new(Node::new(
        NodeConfig {
            data_dir,
            genesis_file,
            validator,
            block_time,
        },
        Arc::new(NullGossip),
    )?);

    tracing::info!(
        height = node.state().height()?,
        "node started; press Ctrl-C to stop"
    );

    // The inbound channel stays open for the life of the process; with no
    // transport attached nothing arrives, and the run loop services the
    // proposer ticker until the process is terminated.
    let (_inbox_tx, inbox_rx) = mpsc::channel();
    node.run(inbox_rx);
    Ok(())
}

fn run_wallet_command(
    action: WalletAction,
    data_dir: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let wallet_path = data_dir.join("wallet.json");

    match action {
        WalletAction::Init => {
            std::fs::create_dir_all(data_dir)?;
            let keys = WalletKeys::generate();
            keys.save(&wallet_path)?;
            println!("wallet written to {}", wallet_path.display());
            println!("address: {}", format_address(&keys.address()));
            Ok(())
        }

        WalletAction::Address => {
            let keys = WalletKeys::load(&wallet_path)?;
            println!("address: {}", format_address(&keys.address()));
            Ok(())
        }

        WalletAction::Balance { genesis } => {
            let wallet = Wallet::new(WalletKeys::load(&wallet_path)?);
            let node = open_chain(data_dir, &genesis)?;
            println!("balance: {}", wallet.balance(node.state())?);
            Ok(())
        }

        WalletAction::Send {
            to,
            amount,
            fee,
            genesis,
        } => {
            let wallet = Wallet::new(WalletKeys::load(&wallet_path)?);
            let recipient = parse_address(&to)?;
            let node = open_chain(data_dir, &genesis)?;

            let owned = wallet.scan_chain(node.state())?;
            let spend = owned
                .iter()
                .find(|o| o.utxo.output.amount >= amount + fee)
                .ok_or("no single output covers amount + fee")?;
            let pool = node.state().unspent_utxos()?;
            let tx = wallet.build_transaction(spend, &recipient, amount, fee, &pool)?;

            let hash = tx.hash();
            let out_path = data_dir.join(format!("tx_{}.json", &hash.to_string()[..8]));
            std::fs::write(&out_path, serde_json::to_string_pretty(&tx)?)?;
            println!("transaction {hash}");
            println!("written to {}; submit it through a node", out_path.display());
            Ok(())
        }

        WalletAction::Stake { amount } => {
            let keys = WalletKeys::load(&wallet_path)?;
            let stx = StakingTx::create(StakingType::Bond, &keys.spend, amount);
            let out_path = data_dir.join("staking_tx.json");
            std::fs::write(&out_path, serde_json::to_string_pretty(&stx)?)?;
            println!("bond of {amount} for validator {}", stx.validator);
            println!("written to {}", out_path.display());
            Ok(())
        }

        WalletAction::Unbond => {
            let keys = WalletKeys::load(&wallet_path)?;
            let stx = StakingTx::create(StakingType::Unbond, &keys.spend, 0);
            let out_path = data_dir.join("staking_tx.json");
            std::fs::write(&out_path, serde_json::to_string_pretty(&stx)?)?;
            println!("unbond for validator {}", stx.validator);
            println!("written to {}", out_path.display());
            Ok(())
        }
    }
}

/// Open the chain store in observer mode to give wallet commands a view of
/// the ledger. Fails if a node currently holds the store.
fn open_chain(
    data_dir: &std::path::Path,
    genesis_file: &std::path::Path,
) -> Result<Node, Box<dyn std::error::Error>> {
    Ok(Node::new(
        NodeConfig {
            data_dir: data_dir.to_path_buf(),
            genesis_file: genesis_file.to_path_buf(),
            validator: None,
            block_time: Duration::from_millis(obscura::constants::BLOCK_TIME_MS),
        },
        Arc::new(NullGossip),
    )?)
}
