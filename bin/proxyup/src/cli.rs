use std::{path::PathBuf, str::FromStr};

use alloy_core::primitives::{Address, Bytes};
use clap::{Args, Parser, Subcommand};
use proxyup_deploy::{DeployRequest, Identifier, ProxyKind};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "proxyup")]
#[command(
    author,
    version,
    about = "Deploy, upgrade and verify proxied smart contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "PROXYUP_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to a proxyup.toml configuration file.
    ///
    /// If not provided, ./proxyup.toml and then the user configuration directory are tried.
    #[arg(long, alias = "conf", env = "PROXYUP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override the network name (and therefore the registry file).
    #[arg(short, long, global = true)]
    pub network: Option<String>,

    /// Override the JSON-RPC endpoint of the network.
    #[arg(long, global = true)]
    pub rpc_url: Option<Url>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a contract, or upgrade it in place when its code changed.
    Deploy(ContractArgs),

    /// Check that a proxy points at the expected implementation.
    Verify {
        /// Proxy address.
        #[arg(value_parser = Address::from_str)]
        proxy: Address,

        /// Implementation the proxy should point at.
        #[arg(value_parser = Address::from_str)]
        expected: Address,

        /// How the proxy stores its implementation.
        #[arg(long, default_value_t = ProxyKind::Uups)]
        kind: ProxyKind,
    },

    /// List recorded deployments of the network with their live verification.
    Status,

    /// Record what the chain says a proxy currently points at.
    ///
    /// Resolves a registry/chain disagreement after a manual intervention or an
    /// interrupted run.
    Adopt {
        #[command(flatten)]
        contract: ContractArgs,

        /// Address of the live proxy (or plain contract).
        #[arg(long, value_parser = Address::from_str)]
        address: Address,
    },

    /// Write the effective configuration to a file.
    Init {
        /// Destination path.
        #[arg(default_value = proxyup_deploy::CONFIG_FILENAME)]
        path: PathBuf,
    },
}

/// Description of the desired deployment of one contract.
#[derive(Debug, Clone, Args)]
pub struct ContractArgs {
    /// Compiled contract name, as found in the artifacts directory.
    pub contract: String,

    /// Instance name, for several deployments of the same contract (identifier `Contract:id`).
    #[arg(long)]
    pub id: Option<String>,

    /// Proxy pattern fronting the contract.
    #[arg(long, default_value_t = ProxyKind::Uups)]
    pub kind: ProxyKind,

    /// ABI-encoded implementation constructor arguments, hex.
    #[arg(long, value_parser = Bytes::from_str, default_value = "0x")]
    pub constructor_args: Bytes,

    /// Initializer calldata run once through the proxy, hex.
    #[arg(long, alias = "init-args", value_parser = Bytes::from_str, default_value = "0x")]
    pub init_data: Bytes,

    /// Deploy a new implementation even when nothing changed.
    #[arg(long)]
    pub force: bool,
}

impl ContractArgs {
    pub fn to_request(&self) -> DeployRequest {
        DeployRequest::new(&self.contract, self.kind)
            .identifier(Identifier::for_contract(&self.contract, self.id.as_deref()))
            .constructor_args(self.constructor_args.clone())
            .init_args(self.init_data.clone())
            .force(self.force)
    }
}
