use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{GatewayOptions, HttpGateway};
use shared::{
    directory::{ChainDirectory, DirectoryEntry, HARDHAT_CHAIN_ID},
    domain::ChainId,
    protocol::DeploymentSummary,
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    gateway_url: String,
    /// Read deployments straight from a node database instead of over HTTP.
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long, default_value_t = HARDHAT_CHAIN_ID.0)]
    chain_id: u64,
    /// Extra `[[deployments]]` entries layered over the built-in directory.
    #[arg(long)]
    deployments: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    DeployInfo,
    Verify,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let chain_id = ChainId(cli.chain_id);
    let directory = load_directory(cli.deployments.as_ref())?;
    let deployments = node_deployments(&cli, chain_id).await?;

    match cli.command {
        Command::DeployInfo => {
            print_deploy_info(&directory, &deployments, chain_id);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify => {
            let report = verify(&directory, &deployments, chain_id);
            for line in &report.lines {
                println!("{line}");
            }
            Ok(if report.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn load_directory(path: Option<&PathBuf>) -> Result<ChainDirectory> {
    let builtin = ChainDirectory::builtin();
    let Some(path) = path else {
        return Ok(builtin);
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployments '{}'", path.display()))?;
    let overrides = ChainDirectory::from_toml(&raw)
        .with_context(|| format!("failed to parse deployments '{}'", path.display()))?;
    Ok(builtin.merged_with(overrides))
}

async fn node_deployments(cli: &Cli, chain_id: ChainId) -> Result<Vec<DeploymentSummary>> {
    if let Some(database_url) = &cli.database_url {
        let storage = Storage::new(database_url).await?;
        return Ok(storage
            .list_diaries()
            .await?
            .iter()
            .map(|diary| diary.summary())
            .collect());
    }
    let gateway = HttpGateway::new(&cli.gateway_url, chain_id, GatewayOptions::default())?;
    gateway
        .deployments()
        .await
        .with_context(|| format!("failed to list deployments from {}", cli.gateway_url))
}

fn print_deploy_info(
    directory: &ChainDirectory,
    deployments: &[DeploymentSummary],
    chain_id: ChainId,
) {
    println!("Encrypted Mood Diary - deployment information");
    println!("==============================================");

    let entry = directory.entry(chain_id);
    let chain_name = entry
        .map(|entry| entry.chain_name.clone())
        .unwrap_or_else(|| "unknown".to_string());
    println!("network: {chain_name} (chain id {chain_id})");

    match entry.filter(|entry| !entry.address.is_zero()) {
        Some(entry) => println!("directory address: {}", entry.address),
        None => println!("directory address: not configured"),
    }

    let live: Vec<_> = deployments
        .iter()
        .filter(|deployment| deployment.chain_id == chain_id)
        .collect();
    if live.is_empty() {
        println!("no deployment found on the node for this chain");
        println!("start `diary-node` with APP__CHAIN_ID={chain_id} to deploy one");
        return;
    }

    for deployment in &live {
        println!(
            "deployed: {} at block {}",
            deployment.address, deployment.deployed_at_block
        );
    }
    if let Some(first) = live.first() {
        println!();
        println!("client environment:");
        println!(
            "DIARY_ADDRESS_{}={}",
            chain_name.to_ascii_uppercase(),
            first.address
        );
        println!("APP__CHAIN_ID={chain_id}");
    }
}

#[derive(Debug, PartialEq, Eq)]
struct VerifyReport {
    ok: bool,
    lines: Vec<String>,
}

/// Checks that the directory entry for `chain_id` names a diary the node
/// actually serves on that chain.
fn verify(
    directory: &ChainDirectory,
    deployments: &[DeploymentSummary],
    chain_id: ChainId,
) -> VerifyReport {
    let mut lines = Vec::new();
    let entry: Option<&DirectoryEntry> = directory
        .entry(chain_id)
        .filter(|entry| !entry.address.is_zero());
    let Some(entry) = entry else {
        lines.push(format!("missing: no diary address configured for chain {chain_id}"));
        return VerifyReport { ok: false, lines };
    };
    lines.push(format!(
        "ok: directory entry {} ({})",
        entry.address, entry.chain_name
    ));

    let deployed = deployments
        .iter()
        .find(|deployment| deployment.address == entry.address);
    let ok = match deployed {
        Some(deployment) if deployment.chain_id == chain_id => {
            lines.push(format!(
                "ok: node serves {} since block {}",
                deployment.address, deployment.deployed_at_block
            ));
            true
        }
        Some(deployment) => {
            lines.push(format!(
                "mismatch: {} is deployed on chain {}, not {chain_id}",
                deployment.address, deployment.chain_id
            ));
            false
        }
        None => {
            lines.push(format!("missing: node has no diary at {}", entry.address));
            false
        }
    };
    VerifyReport { ok, lines }
}
