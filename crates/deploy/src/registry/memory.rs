use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use crate::{
    error::RegistryError,
    types::{DeploymentRecord, Identifier, NetworkId},
};

use super::{DeploymentRegistry, check_network};

/// Registry kept in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: Mutex<BTreeMap<NetworkId, BTreeMap<Identifier, DeploymentRecord>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeploymentRegistry for InMemoryRegistry {
    type KeyGuard = ();

    fn get(
        &self,
        network: &NetworkId,
        identifier: &Identifier,
    ) -> Result<Option<DeploymentRecord>, RegistryError> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(records
            .get(network)
            .and_then(|deployments| deployments.get(identifier))
            .cloned())
    }

    fn put(&self, network: &NetworkId, record: &DeploymentRecord) -> Result<(), RegistryError> {
        check_network(network, record)?;
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(network.clone())
            .or_default()
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    fn list(&self, network: &NetworkId) -> Result<Vec<DeploymentRecord>, RegistryError> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(records
            .get(network)
            .map(|deployments| deployments.values().cloned().collect())
            .unwrap_or_default())
    }

    /// In-process exclusion is provided by [`super::KeyLocks`].
    fn lock_key(&self, _network: &NetworkId, _identifier: &Identifier) -> Result<(), RegistryError> {
        Ok(())
    }
}
