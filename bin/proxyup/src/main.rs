//! proxyup deploys upgradeable contracts behind proxies and proves, from raw proxy
//! storage, that every deploy or upgrade landed where it was meant to.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};
use proxyup_deploy::{
    Config, EnsureOutcome, FileRegistry, FoundryArtifacts, JsonRpcClient, NetworkId, Orchestrator,
    Verification, Verifier,
};

type Runner = Orchestrator<JsonRpcClient, FoundryArtifacts, FileRegistry>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(network) = &cli.network {
        config.network.name = NetworkId::from(network.as_str());
    }
    if let Some(rpc_url) = &cli.rpc_url {
        config.network.rpc_url = rpc_url.clone();
    }

    match cli.command {
        Command::Init { path } => config.save_to_file(&path),
        Command::Verify {
            proxy,
            expected,
            kind,
        } => {
            let client = Arc::new(JsonRpcClient::new(&config.network)?);
            let verification = Verifier::new(client)
                .verify(kind, proxy, expected)
                .await
                .context("Failed to read proxy storage")?;
            report_verification(&verification)
        }
        Command::Deploy(contract) => {
            let orchestrator = orchestrator(&config)?;
            let outcome = orchestrator.ensure_deployed(&contract.to_request()).await?;
            let record = outcome.record();

            let action = match &outcome {
                EnsureOutcome::Deployed(_) => "Deployed",
                EnsureOutcome::Reused(_) => "Up to date",
                EnsureOutcome::Upgraded(_) => "Upgraded",
            };
            tracing::info!(
                identifier = %record.identifier,
                network = %record.network,
                address = %record.address,
                implementation = %record.implementation_address,
                fingerprint = %record.bytecode_fingerprint.short(),
                "{action}"
            );
            println!("{} {}", record.identifier, record.address);
            Ok(())
        }
        Command::Adopt { contract, address } => {
            let orchestrator = orchestrator(&config)?;
            let record = orchestrator
                .adopt_chain_state(&contract.to_request(), address)
                .await?;
            println!("{} {} -> {}", record.identifier, record.address, record.implementation_address);
            Ok(())
        }
        Command::Status => {
            let orchestrator = orchestrator(&config)?;
            print_status(&orchestrator).await
        }
    }
}

fn orchestrator(config: &Config) -> Result<Runner> {
    let client = Arc::new(JsonRpcClient::new(&config.network)?);
    let artifacts = Arc::new(FoundryArtifacts::new(&config.artifacts_dir));
    let registry = Arc::new(FileRegistry::new(&config.registry_dir));

    tracing::debug!(
        network = %config.network.name,
        rpc_url = %config.network.rpc_url,
        registry = %registry.path(&config.network.name).display(),
        "Orchestrator ready"
    );

    Ok(Orchestrator::new(
        client,
        artifacts,
        registry,
        config.network.name.clone(),
        config.owner(),
    ))
}

fn report_verification(verification: &Verification) -> Result<()> {
    let binding = verification.binding();
    match verification {
        Verification::Match(_) => {
            println!("ok {} -> {}", binding.proxy, binding.implementation);
            Ok(())
        }
        Verification::Mismatch { expected, .. } => anyhow::bail!(
            "proxy {} points at {} (slot value {}), expected {expected}",
            binding.proxy,
            binding.implementation,
            binding.slot_value
        ),
    }
}

async fn print_status(orchestrator: &Runner) -> Result<()> {
    let entries = orchestrator.status().await?;
    if entries.is_empty() {
        println!("No deployments recorded on {}", orchestrator.network());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Identifier",
        "Kind",
        "Address",
        "Implementation",
        "Fingerprint",
        "Updated",
        "Chain",
    ]);

    let mut drifted = 0;
    for entry in &entries {
        let chain = match &entry.verification {
            Ok(Verification::Match(_)) => "verified".to_string(),
            Ok(Verification::Mismatch { binding, .. }) => {
                drifted += 1;
                format!("drift: {}", binding.implementation)
            }
            Err(e) => {
                drifted += 1;
                format!("error: {e}")
            }
        };
        let record = &entry.record;
        table.add_row(vec![
            record.identifier.to_string(),
            record.proxy_kind.to_string(),
            record.address.to_string(),
            record.implementation_address.to_string(),
            record.bytecode_fingerprint.short().to_string(),
            record.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            chain,
        ]);
    }
    println!("{table}");

    if drifted > 0 {
        anyhow::bail!("{drifted} deployment(s) on {} disagree with the chain", orchestrator.network());
    }
    Ok(())
}
