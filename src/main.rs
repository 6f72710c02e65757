// src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{error, info, LevelFilter};
use solana_rpc_gateway::{load_config, utils::setup_logging, RpcGateway};
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "rpc-gateway")]
#[command(about = "Rate-limited, health-aware multi-endpoint Solana RPC gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON gateway config; falls back to RPC_URL / RPC_URL_BACKUP
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the latest blockhash
    Blockhash,

    /// Lamport balance of an account
    Balance { pubkey: Pubkey },

    /// Raw account info
    Account { pubkey: Pubkey },

    /// SPL token accounts owned by a wallet
    TokenAccounts { owner: Pubkey },

    /// Endpoint, limiter and cache statistics
    Stats,

    /// Fire concurrent blockhash reads and report how they were spread
    Probe {
        #[arg(short = 'n', long, default_value = "20")]
        requests: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level).context("failed to initialize logging")?;

    let config = load_config(cli.config.as_deref()).context("failed to load gateway config")?;
    let gateway = RpcGateway::connect(config).context("failed to build gateway")?;

    let outcome = run(&gateway, cli.command).await;
    gateway.shutdown().await;

    if let Err(e) = &outcome {
        error!("rpc-gateway failed: {:#}", e);
    }
    outcome
}

async fn run(gateway: &RpcGateway, command: Commands) -> Result<()> {
    match command {
        Commands::Blockhash => {
            let response = gateway.get_latest_blockhash().await?;
            println!(
                "{} (last valid block height {}) via {} in {}ms",
                response.data.blockhash,
                response.data.last_valid_block_height,
                response.endpoint,
                response.latency_ms
            );
        }
        Commands::Balance { pubkey } => {
            let response = gateway.get_balance(&pubkey).await?;
            println!(
                "{} lamports ({:.9} SOL) via {}",
                response.data,
                response.data as f64 / 1_000_000_000.0,
                response.endpoint
            );
        }
        Commands::Account { pubkey } => {
            let response = gateway.get_account_info(&pubkey).await?;
            match response.data {
                Some(account) => println!(
                    "owner {}, {} lamports, {} bytes, executable: {} via {}",
                    account.owner,
                    account.lamports,
                    account.data.len(),
                    account.executable,
                    response.endpoint
                ),
                None => println!("account {} not found (via {})", pubkey, response.endpoint),
            }
        }
        Commands::TokenAccounts { owner } => {
            let response = gateway.get_token_accounts_by_owner(&owner, None).await?;
            println!(
                "{} token accounts via {}",
                response.data.len(),
                response.endpoint
            );
            for keyed in &response.data {
                println!("  {}", keyed.pubkey);
            }
        }
        Commands::Stats => {
            let stats = gateway.get_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Probe { requests } => {
            info!("Probing with {} concurrent blockhash reads", requests);
            let started = Instant::now();
            let results = join_all((0..requests).map(|_| gateway.get_latest_blockhash())).await;

            let failed = results.iter().filter(|r| r.is_err()).count();
            for e in results.iter().filter_map(|r| r.as_ref().err()) {
                println!("  error: {}", e);
            }
            println!(
                "{} requests in {:?}: {} ok, {} failed",
                requests,
                started.elapsed(),
                requests - failed,
                failed
            );
            println!("{}", gateway.get_stats().await);
        }
    }
    Ok(())
}
