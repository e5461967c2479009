//! Error taxonomy for deployments.
//!
//! Every variant carries enough context (identifier, network, addresses) to diagnose
//! a failure without re-deriving state. Nothing in this crate retries or compensates
//! on its own: each recovery is an explicit follow-up by the operator.

use std::path::PathBuf;

use alloy_core::primitives::{Address, B256};

use crate::types::{DeploymentRecord, DeploymentState, Identifier, NetworkId};

/// Failure to talk to the chain, as opposed to the chain disagreeing with us.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("RPC request {method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("no contract code at {address}")]
    NoCode { address: Address },

    #[error("malformed {method} response: {message}")]
    Malformed { method: String, message: String },
}

impl TransportError {
    pub fn rpc(method: &str, message: impl ToString) -> Self {
        Self::Rpc {
            method: method.to_string(),
            message: message.to_string(),
        }
    }

    pub fn malformed(method: &str, message: impl ToString) -> Self {
        Self::Malformed {
            method: method.to_string(),
            message: message.to_string(),
        }
    }
}

/// Failure of the persistent deployment registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The backing store exists but cannot be trusted. Never treated as "empty".
    #[error("deployment registry {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to access deployment registry {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("deployment {identifier} on {network} is locked by another run")]
    Locked {
        network: NetworkId,
        identifier: Identifier,
    },

    #[error("record for {identifier} belongs to {record_network}, not {network}")]
    NetworkMismatch {
        identifier: Identifier,
        network: NetworkId,
        record_network: NetworkId,
    },

    #[error("invalid network name '{network}': use letters, digits, '-', '_' and '.'")]
    InvalidNetwork { network: NetworkId },

    #[error("failed to serialize deployment registry: {0}")]
    Serialize(String),
}

/// Failure to load a compiled artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact for {contract} not found at {}", path.display())]
    NotFound { contract: String, path: PathBuf },

    #[error("artifact for {contract} is invalid: {reason}")]
    Invalid { contract: String, reason: String },
}

/// Error returned by the deployment orchestrator and its components.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("transport failure for {identifier} on {network}: {source}")]
    Transport {
        identifier: Identifier,
        network: NetworkId,
        #[source]
        source: TransportError,
    },

    /// A transaction was submitted but reverted or never got mined.
    #[error(
        "transaction for {identifier} on {network} failed at {reached} ({reason}){}{}",
        fmt_tx_hash(.transaction_hash),
        fmt_deployed(.implementation, .beacon)
    )]
    TransactionFailure {
        identifier: Identifier,
        network: NetworkId,
        transaction_hash: Option<B256>,
        reason: String,
        /// Last state reached before the failed transaction.
        reached: DeploymentState,
        /// Implementation deployed earlier in the same run, if any.
        implementation: Option<Address>,
        /// Beacon deployed earlier in the same run, if any.
        beacon: Option<Address>,
    },

    /// Transactions succeeded but the chain does not point where we expected.
    #[error(
        "verification failed for {identifier} on {network}: proxy {proxy} points at {actual}, expected {expected}"
    )]
    VerificationMismatch {
        identifier: Identifier,
        network: NetworkId,
        proxy: Address,
        expected: Address,
        actual: Address,
        reached: DeploymentState,
    },

    /// The registry and the chain already disagreed before any transaction.
    #[error(
        "registry record for {identifier} on {network} says the {subject} of proxy {proxy} is {recorded}, chain says {actual}"
    )]
    Consistency {
        identifier: Identifier,
        network: NetworkId,
        proxy: Address,
        /// `"implementation"` or `"beacon"`.
        subject: &'static str,
        recorded: Address,
        actual: Address,
    },

    #[error("refusing to deploy {identifier} on {network}: {message}")]
    PolicyViolation {
        identifier: Identifier,
        network: NetworkId,
        message: String,
    },

    #[error("no deployment of {identifier} recorded on {network}")]
    UnknownDeployment {
        identifier: Identifier,
        network: NetworkId,
    },

    /// The chain reached the verified end state but the record could not be written.
    /// Feed `record` to `adopt_chain_state` once the registry is writable again.
    #[error(
        "{} on {} was deployed and verified at {} (implementation {}) but could not be recorded: {source}",
        .record.identifier,
        .record.network,
        .record.address,
        .record.implementation_address
    )]
    Unrecorded {
        record: Box<DeploymentRecord>,
        #[source]
        source: RegistryError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

fn fmt_tx_hash(hash: &Option<B256>) -> String {
    match hash {
        Some(hash) => format!(", tx {hash}"),
        None => String::new(),
    }
}

fn fmt_deployed(implementation: &Option<Address>, beacon: &Option<Address>) -> String {
    let mut out = String::new();
    if let Some(implementation) = implementation {
        out.push_str(&format!(", implementation {implementation} already deployed"));
    }
    if let Some(beacon) = beacon {
        out.push_str(&format!(", beacon {beacon} already deployed"));
    }
    out
}

impl DeployError {
    /// Attach the progress of the current run to a transaction failure.
    pub fn at(self, state: DeploymentState, deployed: Option<Address>) -> Self {
        match self {
            DeployError::TransactionFailure {
                identifier,
                network,
                transaction_hash,
                reason,
                beacon,
                ..
            } => DeployError::TransactionFailure {
                identifier,
                network,
                transaction_hash,
                reason,
                reached: state,
                implementation: deployed,
                beacon,
            },
            other => other,
        }
    }

    /// Record a beacon created before a transaction failure.
    pub fn with_beacon(self, deployed: Address) -> Self {
        match self {
            DeployError::TransactionFailure {
                identifier,
                network,
                transaction_hash,
                reason,
                reached,
                implementation,
                ..
            } => DeployError::TransactionFailure {
                identifier,
                network,
                transaction_hash,
                reason,
                reached,
                implementation,
                beacon: Some(deployed),
            },
            other => other,
        }
    }

    /// Whether the failure happened before any transaction was submitted.
    pub fn before_any_transaction(&self) -> bool {
        matches!(
            self,
            DeployError::Consistency { .. }
                | DeployError::PolicyViolation { .. }
                | DeployError::Artifact(_)
        )
    }
}
