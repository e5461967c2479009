//! Proxy patterns and their capabilities.
//!
//! Each [`ProxyKind`] maps to one implementation of [`ProxyPattern`]:
//! how to put a proxy in front of an implementation, how to repoint it, and where
//! its implementation pointer lives in raw storage.

use std::future::Future;

use alloy_core::{
    primitives::{Address, B256, Bytes, keccak256},
    sol_types::{SolType, SolValue, abi::TokenSeq},
};

use crate::{
    artifacts::ArtifactSource,
    deployer::ContractDeployer,
    error::{DeployError, TransportError},
    network::NetworkClient,
    types::{Identifier, ProxyKind},
};

/// EIP-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
pub const IMPLEMENTATION_SLOT: B256 =
    alloy_core::primitives::b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// EIP-1967 admin slot: `keccak256("eip1967.proxy.admin") - 1`.
pub const ADMIN_SLOT: B256 =
    alloy_core::primitives::b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// EIP-1967 beacon slot: `keccak256("eip1967.proxy.beacon") - 1`.
pub const BEACON_SLOT: B256 =
    alloy_core::primitives::b256!("a3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50");

/// Storage slot of `_implementation` in OpenZeppelin's `UpgradeableBeacon`
/// (slot 0 is the `Ownable` owner).
pub const BEACON_IMPLEMENTATION_SLOT: B256 = B256::with_last_byte(1);

/// Artifact names of the OpenZeppelin proxy contracts.
pub const ERC1967_PROXY: &str = "ERC1967Proxy";
pub const TRANSPARENT_PROXY: &str = "TransparentUpgradeableProxy";
pub const UPGRADEABLE_BEACON: &str = "UpgradeableBeacon";
pub const BEACON_PROXY: &str = "BeaconProxy";

/// Upgrade entry points.
pub const UPGRADE_TO_AND_CALL: &str = "upgradeToAndCall(address,bytes)";
pub const UPGRADE_AND_CALL: &str = "upgradeAndCall(address,address,bytes)";
pub const UPGRADE_TO: &str = "upgradeTo(address)";

/// 4-byte function selector of `signature`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI-encode a call to `signature` with `args`.
pub fn encode_call<T>(signature: &str, args: T) -> Bytes
where
    T: SolValue,
    for<'a> <T::SolType as SolType>::Token<'a>: TokenSeq<'a>,
{
    let mut data = selector(signature).to_vec();
    data.extend(args.abi_encode_params());
    data.into()
}

/// Proxy address, implementation and raw pointer read from chain.
///
/// Only lives for the duration of one verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyBinding {
    pub proxy: Address,
    pub implementation: Address,
    /// Raw storage word the implementation was decoded from.
    pub slot_value: B256,
    /// Beacon the proxy reads its implementation from, for beacon proxies.
    pub beacon: Option<Address>,
}

/// Result of putting a proxy in front of an implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDeployment {
    pub address: Address,
    pub beacon: Option<Address>,
    /// Last transaction submitted, `None` when nothing had to be sent.
    pub transaction_hash: Option<B256>,
}

/// Everything a pattern needs to send transactions.
pub struct ProxyContext<'a, C, A> {
    pub deployer: &'a ContractDeployer<C, A>,
    pub identifier: &'a Identifier,
    /// Owner of transparent-proxy admins and beacons.
    pub owner: Address,
}

/// Capabilities of one proxy pattern.
pub trait ProxyPattern: Send + Sync {
    /// Deploy the proxy in front of `implementation`, running `init_args` once.
    fn deploy_proxy<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        implementation: Address,
        init_args: &Bytes,
    ) -> impl Future<Output = Result<ProxyDeployment, DeployError>> + Send;

    /// Repoint `proxy` at `new_implementation` without re-initializing it.
    fn upgrade<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        proxy: Address,
        new_implementation: Address,
    ) -> impl Future<Output = Result<B256, DeployError>> + Send;

    /// Read the implementation pointer from raw storage.
    fn locate_implementation<C: NetworkClient>(
        &self,
        client: &C,
        proxy: Address,
    ) -> impl Future<Output = Result<ProxyBinding, TransportError>> + Send;
}

/// Fail with [`TransportError::NoCode`] when nothing is deployed at `address`.
async fn ensure_code<C: NetworkClient>(client: &C, address: Address) -> Result<(), TransportError> {
    if client.get_code(address).await?.is_empty() {
        return Err(TransportError::NoCode { address });
    }
    Ok(())
}

/// Read an address stored right-aligned in `slot` of `address`.
async fn read_address_slot<C: NetworkClient>(
    client: &C,
    address: Address,
    slot: B256,
) -> Result<(Address, B256), TransportError> {
    let word = client.read_storage_slot(address, slot).await?;
    Ok((Address::from_word(word), word))
}

/// `ERC1967Proxy` with the upgrade logic in the implementation (UUPS).
pub struct Uups;

impl ProxyPattern for Uups {
    async fn deploy_proxy<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        implementation: Address,
        init_args: &Bytes,
    ) -> Result<ProxyDeployment, DeployError> {
        let args = (implementation, init_args.clone()).abi_encode_params();
        let proxy = ctx
            .deployer
            .deploy(ERC1967_PROXY, ctx.identifier, &args.into())
            .await?;
        Ok(ProxyDeployment {
            address: proxy.address,
            beacon: None,
            transaction_hash: Some(proxy.transaction_hash),
        })
    }

    async fn upgrade<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        proxy: Address,
        new_implementation: Address,
    ) -> Result<B256, DeployError> {
        let data = encode_call(UPGRADE_TO_AND_CALL, (new_implementation, Bytes::new()));
        let receipt = ctx.deployer.call(ctx.identifier, proxy, data).await?;
        Ok(receipt.transaction_hash)
    }

    async fn locate_implementation<C: NetworkClient>(
        &self,
        client: &C,
        proxy: Address,
    ) -> Result<ProxyBinding, TransportError> {
        ensure_code(client, proxy).await?;
        let (implementation, slot_value) =
            read_address_slot(client, proxy, IMPLEMENTATION_SLOT).await?;
        Ok(ProxyBinding {
            proxy,
            implementation,
            slot_value,
            beacon: None,
        })
    }
}

/// `TransparentUpgradeableProxy`, upgraded through its `ProxyAdmin`.
pub struct Transparent;

impl ProxyPattern for Transparent {
    async fn deploy_proxy<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        implementation: Address,
        init_args: &Bytes,
    ) -> Result<ProxyDeployment, DeployError> {
        let args = (implementation, ctx.owner, init_args.clone()).abi_encode_params();
        let proxy = ctx
            .deployer
            .deploy(TRANSPARENT_PROXY, ctx.identifier, &args.into())
            .await?;
        Ok(ProxyDeployment {
            address: proxy.address,
            beacon: None,
            transaction_hash: Some(proxy.transaction_hash),
        })
    }

    async fn upgrade<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        proxy: Address,
        new_implementation: Address,
    ) -> Result<B256, DeployError> {
        // The admin is created by the proxy constructor; only chain storage knows it.
        let (admin, _) = read_address_slot(ctx.deployer.client(), proxy, ADMIN_SLOT)
            .await
            .map_err(|e| ctx.deployer.transport_error(ctx.identifier, e))?;
        tracing::debug!(proxy = %proxy, admin = %admin, "Upgrading through ProxyAdmin");

        let data = encode_call(UPGRADE_AND_CALL, (proxy, new_implementation, Bytes::new()));
        let receipt = ctx.deployer.call(ctx.identifier, admin, data).await?;
        Ok(receipt.transaction_hash)
    }

    async fn locate_implementation<C: NetworkClient>(
        &self,
        client: &C,
        proxy: Address,
    ) -> Result<ProxyBinding, TransportError> {
        Uups.locate_implementation(client, proxy).await
    }
}

/// `BeaconProxy` reading its implementation from an `UpgradeableBeacon`.
pub struct Beacon;

impl ProxyPattern for Beacon {
    async fn deploy_proxy<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        implementation: Address,
        init_args: &Bytes,
    ) -> Result<ProxyDeployment, DeployError> {
        let beacon_args = (implementation, ctx.owner).abi_encode_params();
        let beacon = ctx
            .deployer
            .deploy(UPGRADEABLE_BEACON, ctx.identifier, &beacon_args.into())
            .await?;
        tracing::info!(identifier = %ctx.identifier, beacon = %beacon.address, "Beacon deployed");

        let proxy_args = (beacon.address, init_args.clone()).abi_encode_params();
        let proxy = ctx
            .deployer
            .deploy(BEACON_PROXY, ctx.identifier, &proxy_args.into())
            .await
            .map_err(|e| e.with_beacon(beacon.address))?;
        Ok(ProxyDeployment {
            address: proxy.address,
            beacon: Some(beacon.address),
            transaction_hash: Some(proxy.transaction_hash),
        })
    }

    async fn upgrade<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        proxy: Address,
        new_implementation: Address,
    ) -> Result<B256, DeployError> {
        let (beacon, _) = read_address_slot(ctx.deployer.client(), proxy, BEACON_SLOT)
            .await
            .map_err(|e| ctx.deployer.transport_error(ctx.identifier, e))?;

        let data = encode_call(UPGRADE_TO, (new_implementation,));
        let receipt = ctx.deployer.call(ctx.identifier, beacon, data).await?;
        Ok(receipt.transaction_hash)
    }

    async fn locate_implementation<C: NetworkClient>(
        &self,
        client: &C,
        proxy: Address,
    ) -> Result<ProxyBinding, TransportError> {
        ensure_code(client, proxy).await?;
        let (beacon, _) = read_address_slot(client, proxy, BEACON_SLOT).await?;
        ensure_code(client, beacon).await?;
        let (implementation, slot_value) =
            read_address_slot(client, beacon, BEACON_IMPLEMENTATION_SLOT).await?;
        Ok(ProxyBinding {
            proxy,
            implementation,
            slot_value,
            beacon: Some(beacon),
        })
    }
}

/// A plain contract: it is its own implementation and cannot be upgraded.
pub struct Immutable;

impl ProxyPattern for Immutable {
    async fn deploy_proxy<C: NetworkClient, A: ArtifactSource>(
        &self,
        _ctx: &ProxyContext<'_, C, A>,
        implementation: Address,
        _init_args: &Bytes,
    ) -> Result<ProxyDeployment, DeployError> {
        Ok(ProxyDeployment {
            address: implementation,
            beacon: None,
            transaction_hash: None,
        })
    }

    async fn upgrade<C: NetworkClient, A: ArtifactSource>(
        &self,
        ctx: &ProxyContext<'_, C, A>,
        _proxy: Address,
        _new_implementation: Address,
    ) -> Result<B256, DeployError> {
        Err(DeployError::PolicyViolation {
            identifier: ctx.identifier.clone(),
            network: ctx.deployer.network().clone(),
            message: "non-upgradeable contracts cannot be upgraded".to_string(),
        })
    }

    async fn locate_implementation<C: NetworkClient>(
        &self,
        client: &C,
        proxy: Address,
    ) -> Result<ProxyBinding, TransportError> {
        ensure_code(client, proxy).await?;
        Ok(ProxyBinding {
            proxy,
            implementation: proxy,
            slot_value: proxy.into_word(),
            beacon: None,
        })
    }
}

impl ProxyKind {
    pub async fn deploy_proxy<C: NetworkClient, A: ArtifactSource>(
        self,
        ctx: &ProxyContext<'_, C, A>,
        implementation: Address,
        init_args: &Bytes,
    ) -> Result<ProxyDeployment, DeployError> {
        match self {
            ProxyKind::None => Immutable.deploy_proxy(ctx, implementation, init_args).await,
            ProxyKind::Transparent => Transparent.deploy_proxy(ctx, implementation, init_args).await,
            ProxyKind::Uups => Uups.deploy_proxy(ctx, implementation, init_args).await,
            ProxyKind::Beacon => Beacon.deploy_proxy(ctx, implementation, init_args).await,
        }
    }

    pub async fn upgrade<C: NetworkClient, A: ArtifactSource>(
        self,
        ctx: &ProxyContext<'_, C, A>,
        proxy: Address,
        new_implementation: Address,
    ) -> Result<B256, DeployError> {
        match self {
            ProxyKind::None => Immutable.upgrade(ctx, proxy, new_implementation).await,
            ProxyKind::Transparent => Transparent.upgrade(ctx, proxy, new_implementation).await,
            ProxyKind::Uups => Uups.upgrade(ctx, proxy, new_implementation).await,
            ProxyKind::Beacon => Beacon.upgrade(ctx, proxy, new_implementation).await,
        }
    }

    pub async fn locate_implementation<C: NetworkClient>(
        self,
        client: &C,
        proxy: Address,
    ) -> Result<ProxyBinding, TransportError> {
        match self {
            ProxyKind::None => Immutable.locate_implementation(client, proxy).await,
            ProxyKind::Transparent => Transparent.locate_implementation(client, proxy).await,
            ProxyKind::Uups => Uups.locate_implementation(client, proxy).await,
            ProxyKind::Beacon => Beacon.locate_implementation(client, proxy).await,
        }
    }
}
