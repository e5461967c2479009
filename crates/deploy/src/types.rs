//! Core data model shared by the registry, the deployer and the orchestrator.

use alloy_core::primitives::{Address, B256, Bytes};
use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

use crate::fingerprint::BytecodeFingerprint;

/// Name of the network a deployment belongs to (e.g. `sepolia`, `local`).
///
/// Records are never shared across networks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Deref, Display, From)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl From<&str> for NetworkId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Logical identifier of a deployment within a network.
///
/// Defaults to the contract type name, with an optional instance suffix so that
/// several instances of the same contract (e.g. multiple vaults) can coexist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Deref, Display, From)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Build the identifier for `contract_name`, disambiguated by `instance`.
    pub fn for_contract(contract_name: &str, instance: Option<&str>) -> Self {
        match instance {
            Some(instance) => Self(format!("{contract_name}:{instance}")),
            None => Self(contract_name.to_string()),
        }
    }
}

impl From<&str> for Identifier {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// The upgradeability pattern fronting a deployed contract.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProxyKind {
    /// Plain, non-upgradeable contract.
    None,
    /// OpenZeppelin `TransparentUpgradeableProxy` administered by a `ProxyAdmin`.
    Transparent,
    /// `ERC1967Proxy` whose implementation carries the upgrade logic.
    #[default]
    Uups,
    /// `BeaconProxy` reading its implementation from an `UpgradeableBeacon`.
    Beacon,
}

impl ProxyKind {
    pub fn is_upgradeable(&self) -> bool {
        !matches!(self, ProxyKind::None)
    }
}

/// The last-known, verified deployment of one identifier on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Registry key.
    pub identifier: Identifier,
    /// Network the record belongs to.
    pub network: NetworkId,
    /// Compiled contract (artifact) name of the implementation.
    pub contract_name: String,
    /// How the contract is fronted.
    pub proxy_kind: ProxyKind,
    /// Externally callable address: the proxy, or the contract itself.
    pub address: Address,
    /// Currently active logic contract. Equals `address` for `ProxyKind::None`.
    pub implementation_address: Address,
    /// Beacon backing a `ProxyKind::Beacon` proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon_address: Option<Address>,
    /// ABI-encoded implementation constructor arguments.
    pub constructor_args: Bytes,
    /// Initializer calldata passed to the proxy on creation.
    pub init_args: Bytes,
    /// Fingerprint of the creation bytecode the implementation was deployed from.
    pub bytecode_fingerprint: BytecodeFingerprint,
    /// Last state-changing transaction for this identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    pub deployed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Whether `constructor_args` and `init_args` match the recorded ones.
    pub fn same_args(&self, constructor_args: &Bytes, init_args: &Bytes) -> bool {
        &self.constructor_args == constructor_args && &self.init_args == init_args
    }
}

/// Progress of a single `ensure_deployed` run.
///
/// States are strictly ordered; failures report the last one reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Undeployed,
    ImplementationDeployed,
    ProxyDeployed,
    Upgraded,
    Verified,
}

/// Options accepted by `ensure_deployed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Deploy a new implementation even when nothing changed.
    pub force: bool,
}

/// A request to bring one identifier to its desired deployed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub contract_name: String,
    pub identifier: Identifier,
    pub proxy_kind: ProxyKind,
    pub constructor_args: Bytes,
    pub init_args: Bytes,
    pub options: DeployOptions,
}

impl DeployRequest {
    /// Request for `contract_name` keyed by its own name, with empty arguments.
    pub fn new(contract_name: impl Into<String>, proxy_kind: ProxyKind) -> Self {
        let contract_name = contract_name.into();
        Self {
            identifier: Identifier::for_contract(&contract_name, None),
            contract_name,
            proxy_kind,
            constructor_args: Bytes::new(),
            init_args: Bytes::new(),
            options: DeployOptions::default(),
        }
    }

    pub fn identifier(mut self, identifier: impl Into<Identifier>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn constructor_args(mut self, args: impl Into<Bytes>) -> Self {
        self.constructor_args = args.into();
        self
    }

    pub fn init_args(mut self, args: impl Into<Bytes>) -> Self {
        self.init_args = args.into();
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.options.force = force;
        self
    }
}

/// Result of a successful `ensure_deployed` call. Every variant holds a verified record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// First deployment of the identifier (or forced replacement of a plain contract).
    Deployed(DeploymentRecord),
    /// Nothing changed; no transaction was submitted.
    Reused(DeploymentRecord),
    /// A new implementation was deployed and the proxy repointed.
    Upgraded(DeploymentRecord),
}

impl EnsureOutcome {
    pub fn record(&self) -> &DeploymentRecord {
        match self {
            EnsureOutcome::Deployed(record)
            | EnsureOutcome::Reused(record)
            | EnsureOutcome::Upgraded(record) => record,
        }
    }

    pub fn into_record(self) -> DeploymentRecord {
        match self {
            EnsureOutcome::Deployed(record)
            | EnsureOutcome::Reused(record)
            | EnsureOutcome::Upgraded(record) => record,
        }
    }

    /// Whether the call submitted any transaction.
    pub fn changed_chain(&self) -> bool {
        !matches!(self, EnsureOutcome::Reused(_))
    }
}
