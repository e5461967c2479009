//! Persistent mapping from (network, identifier) to the last verified deployment.
//!
//! The registry is a cache of chain truth. It has no chain access itself: callers
//! only `put` records they have verified against the chain.

mod file;
mod lock;
mod memory;

pub use file::{FileKeyGuard, FileRegistry};
pub use lock::KeyLocks;
pub use memory::InMemoryRegistry;

use crate::{
    error::RegistryError,
    types::{DeploymentRecord, Identifier, NetworkId},
};

/// Storage contract of the deployment registry.
pub trait DeploymentRegistry: Send + Sync {
    /// Held for the whole duration of a deployment run on one key.
    type KeyGuard: Send;

    /// Look up a record. A corrupt or unreadable store is an error, never `None`.
    fn get(
        &self,
        network: &NetworkId,
        identifier: &Identifier,
    ) -> Result<Option<DeploymentRecord>, RegistryError>;

    /// Insert or replace the record for `record.identifier`, leaving other entries alone.
    fn put(&self, network: &NetworkId, record: &DeploymentRecord) -> Result<(), RegistryError>;

    /// All records of `network`, ordered by identifier.
    fn list(&self, network: &NetworkId) -> Result<Vec<DeploymentRecord>, RegistryError>;

    /// Claim exclusive write access to one key.
    fn lock_key(
        &self,
        network: &NetworkId,
        identifier: &Identifier,
    ) -> Result<Self::KeyGuard, RegistryError>;
}

/// Reject a record stored under the wrong network.
fn check_network(network: &NetworkId, record: &DeploymentRecord) -> Result<(), RegistryError> {
    if &record.network != network {
        return Err(RegistryError::NetworkMismatch {
            identifier: record.identifier.clone(),
            network: network.clone(),
            record_network: record.network.clone(),
        });
    }
    Ok(())
}
