//! Deployment orchestration.
//!
//! For one identifier a run moves strictly forward through
//! `UNDEPLOYED -> IMPLEMENTATION_DEPLOYED -> PROXY_DEPLOYED | UPGRADED -> VERIFIED`.
//! Chain state read by the [`Verifier`] is ground truth; the registry is only
//! written once the end state has been verified.

use std::sync::Arc;

use alloy_core::primitives::Address;
use chrono::Utc;
use futures::future::join_all;

use crate::{
    artifacts::{Artifact, ArtifactSource},
    deployer::ContractDeployer,
    error::{DeployError, TransportError},
    network::NetworkClient,
    proxy::ProxyContext,
    registry::{DeploymentRegistry, KeyLocks},
    types::{
        DeployRequest, DeploymentRecord, DeploymentState, EnsureOutcome, Identifier, NetworkId,
        ProxyKind,
    },
    verifier::{Verification, Verifier},
};

/// What a run has to do for an identifier that already has a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Reuse,
    Upgrade,
    Replace,
}

/// A persisted record together with its live verification.
#[derive(Debug)]
pub struct RecordStatus {
    pub record: DeploymentRecord,
    pub verification: Result<Verification, TransportError>,
}

/// Coordinates the registry, the contract deployer and the verifier on one network.
pub struct Orchestrator<C, A, R> {
    deployer: ContractDeployer<C, A>,
    verifier: Verifier<C>,
    registry: Arc<R>,
    locks: KeyLocks,
    network: NetworkId,
    owner: Address,
}

impl<C, A, R> Orchestrator<C, A, R>
where
    C: NetworkClient,
    A: ArtifactSource,
    R: DeploymentRegistry,
{
    /// `owner` administers transparent proxies and beacons.
    pub fn new(
        client: Arc<C>,
        artifacts: Arc<A>,
        registry: Arc<R>,
        network: NetworkId,
        owner: Address,
    ) -> Self {
        Self {
            deployer: ContractDeployer::new(client.clone(), artifacts, network.clone()),
            verifier: Verifier::new(client),
            registry,
            locks: KeyLocks::new(),
            network,
            owner,
        }
    }

    pub fn network(&self) -> &NetworkId {
        &self.network
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn verifier(&self) -> &Verifier<C> {
        &self.verifier
    }

    /// Bring `request.identifier` to the requested code and arguments.
    ///
    /// Submits no transaction when the record is current, deploys from scratch when
    /// there is no record, and upgrades in place when the code changed. Every
    /// state-changing path ends with a verification before the record is written.
    pub async fn ensure_deployed(
        &self,
        request: &DeployRequest,
    ) -> Result<EnsureOutcome, DeployError> {
        let _local = self.locks.acquire(&self.network, &request.identifier).await;
        let _key = self.registry.lock_key(&self.network, &request.identifier)?;

        let artifact = self.deployer.artifact(&request.contract_name)?;

        match self.registry.get(&self.network, &request.identifier)? {
            None => {
                tracing::info!(
                    identifier = %request.identifier,
                    network = %self.network,
                    proxy_kind = %request.proxy_kind,
                    "No deployment recorded, deploying from scratch"
                );
                self.fresh_deploy(request, &artifact)
                    .await
                    .map(EnsureOutcome::Deployed)
            }
            Some(record) => self.reconcile(request, &artifact, record).await,
        }
    }

    /// Run `ensure_deployed` for several requests concurrently.
    ///
    /// Results are returned in request order. Requests sharing an identifier are
    /// serialized by the per-key lock.
    pub async fn ensure_all(
        &self,
        requests: &[DeployRequest],
    ) -> Vec<Result<EnsureOutcome, DeployError>> {
        join_all(requests.iter().map(|request| self.ensure_deployed(request))).await
    }

    /// Re-verify the persisted record of `identifier` against the chain.
    pub async fn verify_record(
        &self,
        identifier: &Identifier,
    ) -> Result<(DeploymentRecord, Verification), DeployError> {
        let record = self
            .registry
            .get(&self.network, identifier)?
            .ok_or_else(|| DeployError::UnknownDeployment {
                identifier: identifier.clone(),
                network: self.network.clone(),
            })?;

        let verification = self
            .verifier
            .verify(record.proxy_kind, record.address, record.implementation_address)
            .await
            .map_err(|e| self.deployer.transport_error(identifier, e))?;

        Ok((record, verification))
    }

    /// Every record of this network with its live verification.
    pub async fn status(&self) -> Result<Vec<RecordStatus>, DeployError> {
        let records = self.registry.list(&self.network)?;

        let verifications = join_all(records.iter().map(|record| {
            self.verifier.verify(
                record.proxy_kind,
                record.address,
                record.implementation_address,
            )
        }))
        .await;

        Ok(records
            .into_iter()
            .zip(verifications)
            .map(|(record, verification)| RecordStatus {
                record,
                verification,
            })
            .collect())
    }

    /// Overwrite the record of `request.identifier` with what the chain says
    /// `address` currently points at.
    ///
    /// This is the explicit operator step that resolves a [`DeployError::Consistency`],
    /// e.g. after a run was interrupted between an upgrade and its verification.
    /// The bytecode fingerprint is taken from the current artifact: the operator
    /// asserts that the live implementation was built from it.
    pub async fn adopt_chain_state(
        &self,
        request: &DeployRequest,
        address: Address,
    ) -> Result<DeploymentRecord, DeployError> {
        let _local = self.locks.acquire(&self.network, &request.identifier).await;
        let _key = self.registry.lock_key(&self.network, &request.identifier)?;

        let artifact = self.deployer.artifact(&request.contract_name)?;
        let binding = self
            .verifier
            .locate(request.proxy_kind, address)
            .await
            .map_err(|e| self.deployer.transport_error(&request.identifier, e))?;

        let previous = self.registry.get(&self.network, &request.identifier)?;
        let now = Utc::now();
        let record = DeploymentRecord {
            identifier: request.identifier.clone(),
            network: self.network.clone(),
            contract_name: request.contract_name.clone(),
            proxy_kind: request.proxy_kind,
            address,
            implementation_address: binding.implementation,
            beacon_address: binding.beacon,
            constructor_args: request.constructor_args.clone(),
            init_args: request.init_args.clone(),
            bytecode_fingerprint: artifact.fingerprint.clone(),
            transaction_hash: None,
            deployed_at: previous.as_ref().map_or(now, |record| record.deployed_at),
            updated_at: now,
        };

        tracing::warn!(
            identifier = %record.identifier,
            network = %self.network,
            address = %record.address,
            implementation = %record.implementation_address,
            previous_implementation = ?previous.map(|record| record.implementation_address),
            "Adopting on-chain state into the registry"
        );

        self.registry.put(&self.network, &record)?;
        Ok(record)
    }

    async fn reconcile(
        &self,
        request: &DeployRequest,
        artifact: &Artifact,
        record: DeploymentRecord,
    ) -> Result<EnsureOutcome, DeployError> {
        let plan = self.plan(request, artifact, &record)?;

        // Pre-existing drift is surfaced before anything is sent.
        self.check_consistency(&record).await?;

        match plan {
            Plan::Reuse => {
                tracing::info!(
                    identifier = %record.identifier,
                    network = %self.network,
                    address = %record.address,
                    "Deployment up to date, reusing"
                );
                Ok(EnsureOutcome::Reused(record))
            }
            Plan::Upgrade => self
                .upgrade(request, artifact, record)
                .await
                .map(EnsureOutcome::Upgraded),
            Plan::Replace => {
                tracing::warn!(
                    identifier = %record.identifier,
                    previous = %record.address,
                    "Replacing non-upgradeable contract, its address will change"
                );
                self.fresh_deploy(request, artifact)
                    .await
                    .map(EnsureOutcome::Deployed)
            }
        }
    }

    /// Decide what an existing record needs. Pure: no chain access.
    fn plan(
        &self,
        request: &DeployRequest,
        artifact: &Artifact,
        record: &DeploymentRecord,
    ) -> Result<Plan, DeployError> {
        let violation = |message: String| DeployError::PolicyViolation {
            identifier: request.identifier.clone(),
            network: self.network.clone(),
            message,
        };

        if record.proxy_kind != request.proxy_kind {
            return Err(violation(format!(
                "recorded as {} proxy, requested as {}",
                record.proxy_kind, request.proxy_kind
            )));
        }

        if record.proxy_kind.is_upgradeable() && record.init_args != request.init_args {
            return Err(violation(
                "initializer arguments changed; initializers run once, re-initialize manually"
                    .to_string(),
            ));
        }

        let code_changed = record.bytecode_fingerprint != artifact.fingerprint;
        let args_changed = !record.same_args(&request.constructor_args, &request.init_args);

        if !code_changed && !args_changed && !request.options.force {
            return Ok(Plan::Reuse);
        }

        if record.proxy_kind.is_upgradeable() {
            return Ok(Plan::Upgrade);
        }

        if request.options.force {
            Ok(Plan::Replace)
        } else {
            Err(violation(
                "non-upgradeable contract changed; redeploying moves its address, pass force to replace it"
                    .to_string(),
            ))
        }
    }

    /// Fail with [`DeployError::Consistency`] when the chain disagrees with `record`.
    ///
    /// Beacon proxies must still read from the recorded beacon, not just resolve to
    /// the recorded implementation.
    async fn check_consistency(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let verification = self
            .verifier
            .verify(record.proxy_kind, record.address, record.implementation_address)
            .await
            .map_err(|e| self.deployer.transport_error(&record.identifier, e))?;

        let drift = |subject: &'static str, recorded: Address, actual: Address| {
            DeployError::Consistency {
                identifier: record.identifier.clone(),
                network: self.network.clone(),
                proxy: record.address,
                subject,
                recorded,
                actual,
            }
        };

        let binding = match verification {
            Verification::Match(binding) => binding,
            Verification::Mismatch { binding, .. } => {
                return Err(drift(
                    "implementation",
                    record.implementation_address,
                    binding.implementation,
                ));
            }
        };

        if let Some(recorded) = record.beacon_address {
            let actual = binding.beacon.unwrap_or_default();
            if actual != recorded {
                return Err(drift("beacon", recorded, actual));
            }
        }
        Ok(())
    }

    /// Persist a verified record. Failing here leaves live contracts without a record,
    /// so the record travels with the error.
    fn record(&self, record: DeploymentRecord) -> Result<DeploymentRecord, DeployError> {
        match self.registry.put(&self.network, &record) {
            Ok(()) => Ok(record),
            Err(source) => {
                tracing::error!(
                    identifier = %record.identifier,
                    network = %self.network,
                    address = %record.address,
                    implementation = %record.implementation_address,
                    beacon = ?record.beacon_address,
                    err = %source,
                    "Verified deployment could not be recorded"
                );
                Err(DeployError::Unrecorded {
                    record: Box::new(record),
                    source,
                })
            }
        }
    }

    fn proxy_context<'a>(&'a self, identifier: &'a Identifier) -> ProxyContext<'a, C, A> {
        ProxyContext {
            deployer: &self.deployer,
            identifier,
            owner: self.owner,
        }
    }

    /// Verify that `proxy` now points at `expected`, reporting `reached` on mismatch.
    async fn confirm(
        &self,
        identifier: &Identifier,
        kind: ProxyKind,
        proxy: Address,
        expected: Address,
        reached: DeploymentState,
    ) -> Result<Option<Address>, DeployError> {
        let verification = self
            .verifier
            .verify(kind, proxy, expected)
            .await
            .map_err(|e| self.deployer.transport_error(identifier, e))?;

        match verification {
            Verification::Match(binding) => Ok(binding.beacon),
            Verification::Mismatch { binding, .. } => Err(DeployError::VerificationMismatch {
                identifier: identifier.clone(),
                network: self.network.clone(),
                proxy,
                expected,
                actual: binding.implementation,
                reached,
            }),
        }
    }

    async fn fresh_deploy(
        &self,
        request: &DeployRequest,
        artifact: &Artifact,
    ) -> Result<DeploymentRecord, DeployError> {
        let identifier = &request.identifier;

        let implementation = self
            .deployer
            .deploy_artifact(artifact, identifier, &request.constructor_args)
            .await
            .map_err(|e| e.at(DeploymentState::Undeployed, None))?;
        tracing::info!(
            identifier = %identifier,
            state = %DeploymentState::ImplementationDeployed,
            implementation = %implementation.address,
            "Implementation deployed"
        );

        let proxy = request
            .proxy_kind
            .deploy_proxy(
                &self.proxy_context(identifier),
                implementation.address,
                &request.init_args,
            )
            .await
            .map_err(|e| {
                e.at(
                    DeploymentState::ImplementationDeployed,
                    Some(implementation.address),
                )
            })?;
        tracing::info!(
            identifier = %identifier,
            state = %DeploymentState::ProxyDeployed,
            address = %proxy.address,
            proxy_kind = %request.proxy_kind,
            "Proxy deployed"
        );

        let beacon = self
            .confirm(
                identifier,
                request.proxy_kind,
                proxy.address,
                implementation.address,
                DeploymentState::ProxyDeployed,
            )
            .await?;

        let now = Utc::now();
        let record = DeploymentRecord {
            identifier: identifier.clone(),
            network: self.network.clone(),
            contract_name: request.contract_name.clone(),
            proxy_kind: request.proxy_kind,
            address: proxy.address,
            implementation_address: implementation.address,
            beacon_address: beacon.or(proxy.beacon),
            constructor_args: request.constructor_args.clone(),
            init_args: request.init_args.clone(),
            bytecode_fingerprint: implementation.bytecode_fingerprint,
            transaction_hash: Some(
                proxy
                    .transaction_hash
                    .unwrap_or(implementation.transaction_hash),
            ),
            deployed_at: now,
            updated_at: now,
        };

        let record = self.record(record)?;
        tracing::info!(
            identifier = %identifier,
            network = %self.network,
            state = %DeploymentState::Verified,
            address = %record.address,
            implementation = %record.implementation_address,
            "Deployment verified and recorded"
        );
        Ok(record)
    }

    async fn upgrade(
        &self,
        request: &DeployRequest,
        artifact: &Artifact,
        record: DeploymentRecord,
    ) -> Result<DeploymentRecord, DeployError> {
        let identifier = &request.identifier;
        tracing::info!(
            identifier = %identifier,
            network = %self.network,
            proxy = %record.address,
            from_fingerprint = %record.bytecode_fingerprint.short(),
            to_fingerprint = %artifact.fingerprint.short(),
            forced = request.options.force,
            "Upgrading deployment"
        );

        let implementation = self
            .deployer
            .deploy_artifact(artifact, identifier, &request.constructor_args)
            .await
            .map_err(|e| e.at(DeploymentState::Undeployed, None))?;
        tracing::info!(
            identifier = %identifier,
            state = %DeploymentState::ImplementationDeployed,
            implementation = %implementation.address,
            "New implementation deployed"
        );

        // A failed upgrade leaves the proxy on the previous, still valid implementation.
        let upgrade_tx = request
            .proxy_kind
            .upgrade(
                &self.proxy_context(identifier),
                record.address,
                implementation.address,
            )
            .await
            .map_err(|e| {
                e.at(
                    DeploymentState::ImplementationDeployed,
                    Some(implementation.address),
                )
            })?;
        tracing::info!(
            identifier = %identifier,
            state = %DeploymentState::Upgraded,
            tx_hash = %upgrade_tx,
            "Proxy repointed"
        );

        let beacon = self
            .confirm(
                identifier,
                record.proxy_kind,
                record.address,
                implementation.address,
                DeploymentState::Upgraded,
            )
            .await?;

        let updated = DeploymentRecord {
            implementation_address: implementation.address,
            bytecode_fingerprint: implementation.bytecode_fingerprint,
            constructor_args: request.constructor_args.clone(),
            beacon_address: beacon.or(record.beacon_address),
            transaction_hash: Some(upgrade_tx),
            updated_at: Utc::now(),
            ..record
        };

        let updated = self.record(updated)?;
        tracing::info!(
            identifier = %identifier,
            network = %self.network,
            state = %DeploymentState::Verified,
            address = %updated.address,
            implementation = %updated.implementation_address,
            "Upgrade verified and recorded"
        );
        Ok(updated)
    }
}
