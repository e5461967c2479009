//! In-memory chain simulating the OpenZeppelin proxy contracts closely enough to
//! exercise deployments, upgrades and storage-slot verification.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    sol_types::SolValue,
};
use proxyup_deploy::{
    DeploymentRecord, DeploymentRegistry, Identifier, InMemoryArtifacts, InMemoryRegistry,
    NetworkClient, NetworkId, Orchestrator, Receipt, RegistryError, TransactionOutcome,
    TransactionRequest, TransportError,
    proxy::{
        ADMIN_SLOT, BEACON_IMPLEMENTATION_SLOT, BEACON_PROXY, BEACON_SLOT, ERC1967_PROXY,
        IMPLEMENTATION_SLOT, TRANSPARENT_PROXY, UPGRADE_AND_CALL, UPGRADE_TO,
        UPGRADE_TO_AND_CALL, UPGRADEABLE_BEACON, selector,
    },
};

/// Owner of transparent proxies and beacons in tests.
pub const OWNER: Address = Address::with_last_byte(0x0e);

/// Bytecode the mock recognises for a given contract name.
pub fn bytecode(name: &str) -> Vec<u8> {
    format!("code:{name}|").into_bytes()
}

/// Artifacts for the proxy contracts plus `Vault` at version `v1`.
pub fn artifacts() -> Arc<InMemoryArtifacts> {
    let artifacts = InMemoryArtifacts::new();
    for name in [ERC1967_PROXY, TRANSPARENT_PROXY, UPGRADEABLE_BEACON, BEACON_PROXY] {
        artifacts.insert(name, bytecode(name));
    }
    artifacts.insert("Vault", bytecode("Vault-v1"));
    artifacts.insert("Token", bytecode("Token-v1"));
    Arc::new(artifacts)
}

#[derive(Debug, Default)]
struct Account {
    code: Bytes,
    storage: HashMap<B256, B256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Revert,
    Drop,
}

#[derive(Debug, Default)]
struct ChainState {
    nonce: u64,
    block: u64,
    accounts: HashMap<Address, Account>,
    outcomes: HashMap<B256, TransactionOutcome>,
    submitted: Vec<TransactionRequest>,
    /// Faults applied to the next submitted transactions, in order. `None` lets one through.
    faults: Vec<Option<Fault>>,
    /// When set, upgrades "succeed" but point the proxy here instead.
    sabotage_upgrades: Option<Address>,
    /// When set, new ERC1967 and transparent proxies are constructed pointing here.
    sabotage_proxies: Option<Address>,
    unreachable: bool,
}

/// Simulated chain implementing [`NetworkClient`].
#[derive(Debug)]
pub struct MockChain {
    proxy_code: HashMap<&'static str, Vec<u8>>,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        let proxy_code = [ERC1967_PROXY, TRANSPARENT_PROXY, UPGRADEABLE_BEACON, BEACON_PROXY]
            .into_iter()
            .map(|name| (name, bytecode(name)))
            .collect();
        Arc::new(Self {
            proxy_code,
            state: Mutex::new(ChainState::default()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    /// Number of transactions submitted so far.
    pub fn transaction_count(&self) -> usize {
        self.state().submitted.len()
    }

    pub fn submitted(&self) -> Vec<TransactionRequest> {
        self.state().submitted.clone()
    }

    pub fn revert_next(&self) {
        self.revert_after(0);
    }

    /// Let `n` transactions through, then revert the next one.
    pub fn revert_after(&self, n: usize) {
        let mut state = self.state();
        state.faults.extend(std::iter::repeat_n(None, n));
        state.faults.push(Some(Fault::Revert));
    }

    pub fn drop_next(&self) {
        self.state().faults.push(Some(Fault::Drop));
    }

    pub fn sabotage_upgrades(&self, target: Address) {
        self.state().sabotage_upgrades = Some(target);
    }

    pub fn sabotage_proxies(&self, target: Address) {
        self.state().sabotage_proxies = Some(target);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn storage(&self, address: Address, slot: B256) -> B256 {
        self.state()
            .accounts
            .get(&address)
            .and_then(|account| account.storage.get(&slot).copied())
            .unwrap_or_default()
    }

    /// Write storage directly, as a manual intervention outside the tool would.
    pub fn set_storage(&self, address: Address, slot: B256, value: B256) {
        self.state()
            .accounts
            .entry(address)
            .or_default()
            .storage
            .insert(slot, value);
    }

    /// Install a contract with `code` at a fresh address.
    pub fn install(&self, code: &[u8]) -> Address {
        let mut state = self.state();
        let address = next_address(&mut state);
        state.accounts.entry(address).or_default().code = code.to_vec().into();
        address
    }

    fn execute(&self, state: &mut ChainState, tx: &TransactionRequest) -> Result<Option<Address>, ()> {
        match tx.to {
            None => self.create(state, &tx.data).map(Some),
            Some(to) => self.call(state, to, &tx.data).map(|_| None),
        }
    }

    fn create(&self, state: &mut ChainState, init_code: &[u8]) -> Result<Address, ()> {
        let address = next_address(state);

        let mut storage = HashMap::new();
        let mut extra_accounts = Vec::new();
        if let Some(args) = self.constructor_args(ERC1967_PROXY, init_code) {
            let (implementation, _init) =
                <(Address, Bytes)>::abi_decode_params(args, true).map_err(|_| ())?;
            let implementation = state.sabotage_proxies.unwrap_or(implementation);
            storage.insert(IMPLEMENTATION_SLOT, implementation.into_word());
        } else if let Some(args) = self.constructor_args(TRANSPARENT_PROXY, init_code) {
            let (implementation, _owner, _init) =
                <(Address, Address, Bytes)>::abi_decode_params(args, true).map_err(|_| ())?;
            let implementation = state.sabotage_proxies.unwrap_or(implementation);
            let admin = next_address(state);
            extra_accounts.push((admin, bytecode("ProxyAdmin")));
            storage.insert(IMPLEMENTATION_SLOT, implementation.into_word());
            storage.insert(ADMIN_SLOT, admin.into_word());
        } else if let Some(args) = self.constructor_args(UPGRADEABLE_BEACON, init_code) {
            let (implementation, owner) =
                <(Address, Address)>::abi_decode_params(args, true).map_err(|_| ())?;
            storage.insert(B256::ZERO, owner.into_word());
            storage.insert(BEACON_IMPLEMENTATION_SLOT, implementation.into_word());
        } else if let Some(args) = self.constructor_args(BEACON_PROXY, init_code) {
            let (beacon, _init) =
                <(Address, Bytes)>::abi_decode_params(args, true).map_err(|_| ())?;
            storage.insert(BEACON_SLOT, beacon.into_word());
        }

        for (admin, code) in extra_accounts {
            state.accounts.entry(admin).or_default().code = code.into();
        }
        let account = state.accounts.entry(address).or_default();
        account.code = init_code.to_vec().into();
        account.storage.extend(storage);
        Ok(address)
    }

    fn constructor_args<'a>(&self, name: &str, init_code: &'a [u8]) -> Option<&'a [u8]> {
        init_code.strip_prefix(self.proxy_code.get(name)?.as_slice())
    }

    fn call(&self, state: &mut ChainState, to: Address, data: &[u8]) -> Result<(), ()> {
        if data.len() < 4 || !state.accounts.contains_key(&to) {
            return Err(());
        }
        let (head, args) = data.split_at(4);

        let (proxy, slot, implementation) = if head == selector(UPGRADE_TO_AND_CALL) {
            let (implementation, _) =
                <(Address, Bytes)>::abi_decode_params(args, true).map_err(|_| ())?;
            (to, IMPLEMENTATION_SLOT, implementation)
        } else if head == selector(UPGRADE_AND_CALL) {
            let (proxy, implementation, _) =
                <(Address, Address, Bytes)>::abi_decode_params(args, true).map_err(|_| ())?;
            (proxy, IMPLEMENTATION_SLOT, implementation)
        } else if head == selector(UPGRADE_TO) {
            let (implementation,) = <(Address,)>::abi_decode_params(args, true).map_err(|_| ())?;
            (to, BEACON_IMPLEMENTATION_SLOT, implementation)
        } else {
            return Err(());
        };

        let implementation = state.sabotage_upgrades.unwrap_or(implementation);
        state
            .accounts
            .entry(proxy)
            .or_default()
            .storage
            .insert(slot, implementation.into_word());
        Ok(())
    }
}

fn next_address(state: &mut ChainState) -> Address {
    state.nonce += 1;
    Address::from_word(B256::from(U256::from(0x1000 + state.nonce).to_be_bytes::<32>()))
}

impl NetworkClient for MockChain {
    async fn submit_transaction(&self, tx: TransactionRequest) -> Result<B256, TransportError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(TransportError::rpc("eth_sendTransaction", "connection refused"));
        }

        state.submitted.push(tx.clone());
        let hash = keccak256((state.submitted.len() as u64).to_be_bytes());
        state.block += 1;
        let block_number = state.block;
        let receipt = |contract_address| Receipt {
            transaction_hash: hash,
            block_number,
            contract_address,
            gas_used: 21_000,
        };

        let fault = if state.faults.is_empty() {
            None
        } else {
            state.faults.remove(0)
        };
        let outcome = match fault {
            Some(Fault::Drop) => TransactionOutcome::Dropped,
            Some(Fault::Revert) => TransactionOutcome::Reverted(receipt(None)),
            None => match self.execute(&mut state, &tx) {
                Ok(created) => TransactionOutcome::Confirmed(receipt(created)),
                Err(()) => TransactionOutcome::Reverted(receipt(None)),
            },
        };
        state.outcomes.insert(hash, outcome);
        Ok(hash)
    }

    async fn wait_for_transaction(&self, hash: B256) -> Result<TransactionOutcome, TransportError> {
        self.state()
            .outcomes
            .get(&hash)
            .cloned()
            .ok_or_else(|| TransportError::rpc("eth_getTransactionReceipt", "unknown transaction"))
    }

    async fn read_storage_slot(&self, address: Address, slot: B256) -> Result<B256, TransportError> {
        if self.state().unreachable {
            return Err(TransportError::rpc("eth_getStorageAt", "connection refused"));
        }
        Ok(self.storage(address, slot))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, TransportError> {
        let state = self.state();
        if state.unreachable {
            return Err(TransportError::rpc("eth_getCode", "connection refused"));
        }
        Ok(state
            .accounts
            .get(&address)
            .map(|account| account.code.clone())
            .unwrap_or_default())
    }
}

/// In-memory registry whose writes can be made to fail, like a full disk.
#[derive(Debug, Default)]
pub struct FlakyRegistry {
    inner: InMemoryRegistry,
    fail_puts: AtomicBool,
}

impl FlakyRegistry {
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

impl DeploymentRegistry for FlakyRegistry {
    type KeyGuard = ();

    fn get(
        &self,
        network: &NetworkId,
        identifier: &Identifier,
    ) -> Result<Option<DeploymentRecord>, RegistryError> {
        self.inner.get(network, identifier)
    }

    fn put(&self, network: &NetworkId, record: &DeploymentRecord) -> Result<(), RegistryError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(RegistryError::Io {
                path: PathBuf::from(format!("deployments/{network}.toml")),
                source: std::io::Error::other("no space left on device"),
            });
        }
        self.inner.put(network, record)
    }

    fn list(&self, network: &NetworkId) -> Result<Vec<DeploymentRecord>, RegistryError> {
        self.inner.list(network)
    }

    fn lock_key(&self, network: &NetworkId, identifier: &Identifier) -> Result<(), RegistryError> {
        self.inner.lock_key(network, identifier)
    }
}

pub type TestOrchestrator = Orchestrator<MockChain, InMemoryArtifacts, InMemoryRegistry>;

/// An orchestrator over `registry`, sharing the chain and artifacts of `harness`.
pub fn orchestrator_with<R: DeploymentRegistry>(
    harness: &Harness,
    registry: Arc<R>,
) -> Orchestrator<MockChain, InMemoryArtifacts, R> {
    Orchestrator::new(
        harness.chain.clone(),
        harness.artifacts.clone(),
        registry,
        NetworkId::from("local"),
        OWNER,
    )
}

/// A fresh chain, artifact set and registry wired into an orchestrator.
pub struct Harness {
    pub chain: Arc<MockChain>,
    pub artifacts: Arc<InMemoryArtifacts>,
    pub registry: Arc<InMemoryRegistry>,
    pub orchestrator: TestOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        // Shown with --nocapture; already installed by an earlier test otherwise.
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let chain = MockChain::new();
        let artifacts = artifacts();
        let registry = Arc::new(InMemoryRegistry::new());
        let orchestrator = Orchestrator::new(
            chain.clone(),
            artifacts.clone(),
            registry.clone(),
            NetworkId::from("local"),
            OWNER,
        );
        Self {
            chain,
            artifacts,
            registry,
            orchestrator,
        }
    }

    /// Simulate recompiling `Vault` with different code.
    pub fn recompile_vault(&self, version: &str) {
        self.artifacts
            .insert("Vault", bytecode(&format!("Vault-{version}")));
    }
}
