//! proxyup-deploy - Deployment library for upgradeable smart contracts.
//!
//! This crate deploys versioned contract implementations behind proxies, keeps a
//! registry of what it deployed, and after every deploy or upgrade proves from raw
//! proxy storage that the chain points at the implementation it believes it deployed.

mod artifacts;
mod config;
mod deployer;
mod error;
mod fingerprint;
mod network;
mod orchestrator;
pub mod proxy;
pub mod registry;
mod rpc;
mod types;
mod verifier;

pub use artifacts::{Artifact, ArtifactSource, FoundryArtifacts, InMemoryArtifacts};
pub use config::{CONFIG_FILENAME, Config, ENV_PREFIX, NetworkConfig};
pub use deployer::{ContractDeployer, DeployResult};
pub use error::{ArtifactError, DeployError, RegistryError, TransportError};
pub use fingerprint::BytecodeFingerprint;
pub use network::{NetworkClient, Receipt, TransactionOutcome, TransactionRequest};
pub use orchestrator::{Orchestrator, RecordStatus};
pub use proxy::ProxyBinding;
pub use registry::{DeploymentRegistry, FileRegistry, InMemoryRegistry};
pub use rpc::JsonRpcClient;
pub use types::{
    DeployOptions, DeployRequest, DeploymentRecord, DeploymentState, EnsureOutcome, Identifier,
    NetworkId, ProxyKind,
};
pub use verifier::{Verification, Verifier};
