//! Single-contract deployment.
//!
//! The deployer never consults the registry and never decides whether a deployment
//! is needed: it deploys whenever asked.

use std::sync::Arc;

use alloy_core::primitives::{Address, B256, Bytes};

use crate::{
    artifacts::{Artifact, ArtifactSource},
    error::{DeployError, TransportError},
    fingerprint::BytecodeFingerprint,
    network::{NetworkClient, Receipt, TransactionOutcome, TransactionRequest},
    types::{DeploymentState, Identifier, NetworkId},
};

/// A contract successfully created on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployResult {
    pub address: Address,
    pub transaction_hash: B256,
    /// Fingerprint of the creation bytecode, independent of constructor arguments.
    pub bytecode_fingerprint: BytecodeFingerprint,
    pub block_number: u64,
}

/// Deploys contracts and sends calls on one network.
pub struct ContractDeployer<C, A> {
    client: Arc<C>,
    artifacts: Arc<A>,
    network: NetworkId,
}

impl<C: NetworkClient, A: ArtifactSource> ContractDeployer<C, A> {
    pub fn new(client: Arc<C>, artifacts: Arc<A>, network: NetworkId) -> Self {
        Self {
            client,
            artifacts,
            network,
        }
    }

    pub fn network(&self) -> &NetworkId {
        &self.network
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Load the compiled artifact for `contract_name`.
    pub fn artifact(&self, contract_name: &str) -> Result<Artifact, DeployError> {
        Ok(self.artifacts.artifact(contract_name)?)
    }

    /// Deploy `contract_name` with ABI-encoded `constructor_args`.
    pub async fn deploy(
        &self,
        contract_name: &str,
        identifier: &Identifier,
        constructor_args: &Bytes,
    ) -> Result<DeployResult, DeployError> {
        let artifact = self.artifact(contract_name)?;
        self.deploy_artifact(&artifact, identifier, constructor_args)
            .await
    }

    /// Deploy an already loaded artifact.
    pub async fn deploy_artifact(
        &self,
        artifact: &Artifact,
        identifier: &Identifier,
        constructor_args: &Bytes,
    ) -> Result<DeployResult, DeployError> {
        tracing::info!(
            identifier = %identifier,
            network = %self.network,
            contract = %artifact.contract_name,
            fingerprint = %artifact.fingerprint.short(),
            "Deploying contract..."
        );

        let tx = TransactionRequest::create(artifact.init_code(constructor_args));
        let receipt = self.execute(identifier, tx).await?;

        let address = receipt.contract_address.ok_or_else(|| {
            self.transaction_failure(
                identifier,
                Some(receipt.transaction_hash),
                "receipt carries no contract address",
            )
        })?;

        tracing::info!(
            identifier = %identifier,
            contract = %artifact.contract_name,
            address = %address,
            tx_hash = %receipt.transaction_hash,
            "Contract deployed"
        );

        Ok(DeployResult {
            address,
            transaction_hash: receipt.transaction_hash,
            bytecode_fingerprint: artifact.fingerprint.clone(),
            block_number: receipt.block_number,
        })
    }

    /// Send `data` to `to` and wait for it to be mined successfully.
    pub async fn call(
        &self,
        identifier: &Identifier,
        to: Address,
        data: Bytes,
    ) -> Result<Receipt, DeployError> {
        tracing::debug!(identifier = %identifier, to = %to, "Sending call");
        self.execute(identifier, TransactionRequest::call(to, data))
            .await
    }

    async fn execute(
        &self,
        identifier: &Identifier,
        tx: TransactionRequest,
    ) -> Result<Receipt, DeployError> {
        let hash = self
            .client
            .submit_transaction(tx)
            .await
            .map_err(|e| self.transport_error(identifier, e))?;

        // Once submitted, the hash travels with every failure.
        match self.client.wait_for_transaction(hash).await {
            Ok(TransactionOutcome::Confirmed(receipt)) => Ok(receipt),
            Ok(TransactionOutcome::Reverted(receipt)) => Err(self.transaction_failure(
                identifier,
                Some(receipt.transaction_hash),
                "transaction reverted",
            )),
            Ok(TransactionOutcome::Dropped) => Err(self.transaction_failure(
                identifier,
                Some(hash),
                "transaction dropped",
            )),
            Err(e) => Err(self.transaction_failure(
                identifier,
                Some(hash),
                format!("receipt unavailable: {e}"),
            )),
        }
    }

    pub(crate) fn transport_error(
        &self,
        identifier: &Identifier,
        source: TransportError,
    ) -> DeployError {
        DeployError::Transport {
            identifier: identifier.clone(),
            network: self.network.clone(),
            source,
        }
    }

    fn transaction_failure(
        &self,
        identifier: &Identifier,
        transaction_hash: Option<B256>,
        reason: impl Into<String>,
    ) -> DeployError {
        DeployError::TransactionFailure {
            identifier: identifier.clone(),
            network: self.network.clone(),
            transaction_hash,
            reason: reason.into(),
            reached: DeploymentState::Undeployed,
            implementation: None,
            beacon: None,
        }
    }
}
