//! Narrow interface to the chain.
//!
//! Signing, gas estimation, confirmation depth and timeouts are owned by the
//! implementation of [`NetworkClient`]; the orchestrator only submits, waits and reads.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};

use crate::error::TransportError;

/// A transaction to submit. `to == None` creates a contract from `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

impl TransactionRequest {
    /// Contract creation from init code.
    pub fn create(init_code: Bytes) -> Self {
        Self {
            to: None,
            data: init_code,
            value: U256::ZERO,
        }
    }

    /// Call `to` with `data`.
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            value: U256::ZERO,
        }
    }
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
}

/// Final outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Confirmed(Receipt),
    Reverted(Receipt),
    /// Never mined within the client's waiting policy.
    Dropped,
}

/// Chain access consumed by the deployer and the verifier.
pub trait NetworkClient: Send + Sync {
    /// Submit a transaction and return its hash without waiting for inclusion.
    fn submit_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<B256, TransportError>> + Send;

    /// Block until `hash` is confirmed, reverted or considered dropped.
    fn wait_for_transaction(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<TransactionOutcome, TransportError>> + Send;

    /// Read one raw storage word.
    fn read_storage_slot(
        &self,
        address: Address,
        slot: B256,
    ) -> impl Future<Output = Result<B256, TransportError>> + Send;

    /// Runtime code deployed at `address` (empty when none).
    fn get_code(&self, address: Address) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}
