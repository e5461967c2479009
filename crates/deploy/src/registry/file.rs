//! TOML-backed registry: one human-diffable file per network.
//!
//! ```toml
//! [deployments."Vault:A"]
//! identifier = "Vault:A"
//! network = "sepolia"
//! contract_name = "Vault"
//! proxy_kind = "uups"
//! address = "0x..."
//! implementation_address = "0x..."
//! ...
//! ```

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{
    error::RegistryError,
    types::{DeploymentRecord, Identifier, NetworkId},
};

use super::{DeploymentRegistry, check_network};

/// Name of the directory holding per-key lock files.
const LOCKS_DIR: &str = ".locks";

/// On-disk layout of one network's registry file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    deployments: BTreeMap<Identifier, DeploymentRecord>,
}

/// Exclusive claim on one registry key, released on drop.
#[derive(Debug)]
pub struct FileKeyGuard {
    file: File,
    path: PathBuf,
}

impl Drop for FileKeyGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(err = %e, path = %self.path.display(), "Failed to release registry key lock");
        }
    }
}

/// Registry stored as `<dir>/<network>.toml`.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    dir: PathBuf,
}

impl FileRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the registry file for `network`.
    pub fn path(&self, network: &NetworkId) -> PathBuf {
        self.dir.join(format!("{network}.toml"))
    }

    fn io_error(path: &Path, source: std::io::Error) -> RegistryError {
        RegistryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl ToString) -> RegistryError {
        RegistryError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Read and validate the whole file. A missing file is an empty registry.
    fn read(&self, network: &NetworkId) -> Result<RegistryFile, RegistryError> {
        validate_network(network)?;
        let path = self.path(network);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryFile::default());
            }
            Err(e) => return Err(Self::io_error(&path, e)),
        };

        let file: RegistryFile =
            toml::from_str(&content).map_err(|e| Self::corrupt(&path, e))?;

        for (key, record) in &file.deployments {
            if &record.identifier != key {
                return Err(Self::corrupt(
                    &path,
                    format!("entry {key} holds a record for {}", record.identifier),
                ));
            }
            if &record.network != network {
                return Err(Self::corrupt(
                    &path,
                    format!("entry {key} belongs to network {}", record.network),
                ));
            }
        }

        Ok(file)
    }

    /// Replace the file atomically through a temporary sibling.
    fn write(&self, network: &NetworkId, file: &RegistryFile) -> Result<(), RegistryError> {
        let path = self.path(network);
        let content =
            toml::to_string_pretty(file).map_err(|e| RegistryError::Serialize(e.to_string()))?;

        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content).map_err(|e| Self::io_error(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Self::io_error(&path, e))?;
        Ok(())
    }

    fn open_lock_file(path: &Path) -> Result<File, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_error(parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Self::io_error(path, e))
    }

    fn key_lock_path(&self, network: &NetworkId, identifier: &Identifier) -> PathBuf {
        self.dir
            .join(LOCKS_DIR)
            .join(network.as_str())
            .join(format!("{}.lock", lock_file_stem(identifier)))
    }
}

/// File-name-safe, one-to-one encoding of an identifier: ASCII alphanumerics,
/// `-` and `.` are kept, every other byte becomes `_xx` (lowercase hex).
fn lock_file_stem(identifier: &Identifier) -> String {
    let mut stem = String::with_capacity(identifier.len());
    for byte in identifier.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            stem.push(char::from(byte));
        } else {
            stem.push('_');
            stem.push_str(&hex::encode([byte]));
        }
    }
    stem
}

/// Network names become file and directory names under the registry directory.
fn validate_network(network: &NetworkId) -> Result<(), RegistryError> {
    let valid = !network.is_empty()
        && !network.starts_with('.')
        && network
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidNetwork {
            network: network.clone(),
        })
    }
}

impl DeploymentRegistry for FileRegistry {
    type KeyGuard = FileKeyGuard;

    fn get(
        &self,
        network: &NetworkId,
        identifier: &Identifier,
    ) -> Result<Option<DeploymentRecord>, RegistryError> {
        Ok(self.read(network)?.deployments.remove(identifier))
    }

    fn put(&self, network: &NetworkId, record: &DeploymentRecord) -> Result<(), RegistryError> {
        check_network(network, record)?;
        validate_network(network)?;

        let path = self.path(network);
        let lock_path = path.with_extension("toml.lock");
        let lock = Self::open_lock_file(&lock_path)?;
        lock.lock_exclusive()
            .map_err(|e| Self::io_error(&lock_path, e))?;

        // Merge into whatever is on disk now, so concurrent runs on other keys survive.
        let result = self.read(network).and_then(|mut file| {
            file.deployments
                .insert(record.identifier.clone(), record.clone());
            self.write(network, &file)
        });

        if let Err(e) = FileExt::unlock(&lock) {
            tracing::warn!(err = %e, path = %lock_path.display(), "Failed to release registry file lock");
        }

        if result.is_ok() {
            tracing::debug!(
                path = %path.display(),
                identifier = %record.identifier,
                implementation = %record.implementation_address,
                "Registry record written"
            );
        }
        result
    }

    fn list(&self, network: &NetworkId) -> Result<Vec<DeploymentRecord>, RegistryError> {
        Ok(self.read(network)?.deployments.into_values().collect())
    }

    fn lock_key(
        &self,
        network: &NetworkId,
        identifier: &Identifier,
    ) -> Result<FileKeyGuard, RegistryError> {
        validate_network(network)?;
        let path = self.key_lock_path(network, identifier);
        let file = Self::open_lock_file(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(FileKeyGuard { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(RegistryError::Locked {
                    network: network.clone(),
                    identifier: identifier.clone(),
                })
            }
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fingerprint::BytecodeFingerprint, types::ProxyKind};
    use alloy_core::primitives::{Address, Bytes};
    use chrono::Utc;
    use tempdir::TempDir;

    fn record(network: &str, identifier: &str, implementation: u8) -> DeploymentRecord {
        DeploymentRecord {
            identifier: Identifier::from(identifier),
            network: NetworkId::from(network),
            contract_name: "Vault".to_string(),
            proxy_kind: ProxyKind::Uups,
            address: Address::with_last_byte(0xaa),
            implementation_address: Address::with_last_byte(implementation),
            beacon_address: None,
            constructor_args: Bytes::new(),
            init_args: Bytes::from(vec![0x81, 0x29, 0xfc, 0x1c]),
            bytecode_fingerprint: BytecodeFingerprint::of(&[implementation]),
            transaction_hash: None,
            deployed_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());
        let network = NetworkId::from("local");

        assert!(registry.get(&network, &Identifier::from("Vault")).unwrap().is_none());
        assert!(registry.list(&network).unwrap().is_empty());
    }

    #[test]
    fn test_put_and_get() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());
        let network = NetworkId::from("local");
        let original = record("local", "Vault:A", 0x01);

        registry.put(&network, &original).expect("Failed to write record");

        let loaded = registry
            .get(&network, &Identifier::from("Vault:A"))
            .unwrap()
            .expect("Record should exist");
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_put_merges_with_existing_entries() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let network = NetworkId::from("local");

        // Two independent handles, as two runs on different branches would have.
        let first = FileRegistry::new(temp_dir.path());
        let second = FileRegistry::new(temp_dir.path());

        first.put(&network, &record("local", "Vault:A", 0x01)).unwrap();
        second.put(&network, &record("local", "Vault:B", 0x02)).unwrap();
        first.put(&network, &record("local", "Vault:A", 0x03)).unwrap();

        let records = first.list(&network).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].implementation_address, Address::with_last_byte(0x03));
        assert_eq!(records[1].implementation_address, Address::with_last_byte(0x02));
    }

    #[test]
    fn test_networks_are_separate_files() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());

        registry
            .put(&NetworkId::from("sepolia"), &record("sepolia", "Vault", 0x01))
            .unwrap();

        assert!(registry.path(&NetworkId::from("sepolia")).exists());
        assert!(
            registry
                .get(&NetworkId::from("mainnet"), &Identifier::from("Vault"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_put_rejects_record_of_other_network() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());

        let result = registry.put(&NetworkId::from("mainnet"), &record("sepolia", "Vault", 0x01));
        assert!(matches!(result, Err(RegistryError::NetworkMismatch { .. })));
    }

    #[test]
    fn test_corrupt_file_fails_closed() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());
        let network = NetworkId::from("local");

        std::fs::write(registry.path(&network), "[deployments.Vault\naddress = ").unwrap();

        assert!(matches!(
            registry.get(&network, &Identifier::from("Vault")),
            Err(RegistryError::Corrupt { .. })
        ));
        // A write must not paper over the corruption either.
        assert!(matches!(
            registry.put(&network, &record("local", "Vault", 0x01)),
            Err(RegistryError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_misfiled_record_is_corrupt() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());

        registry
            .put(&NetworkId::from("sepolia"), &record("sepolia", "Vault", 0x01))
            .unwrap();
        std::fs::copy(
            registry.path(&NetworkId::from("sepolia")),
            registry.path(&NetworkId::from("mainnet")),
        )
        .unwrap();

        assert!(matches!(
            registry.list(&NetworkId::from("mainnet")),
            Err(RegistryError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_key_lock_is_exclusive() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());
        let network = NetworkId::from("local");
        let vault = Identifier::from("Vault:A");

        let guard = registry.lock_key(&network, &vault).expect("First lock should succeed");
        assert!(matches!(
            registry.lock_key(&network, &vault),
            Err(RegistryError::Locked { .. })
        ));
        assert!(registry.lock_key(&network, &Identifier::from("Vault:B")).is_ok());

        drop(guard);
        assert!(registry.lock_key(&network, &vault).is_ok());
    }

    #[test]
    fn test_similar_identifiers_lock_independently() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path());
        let network = NetworkId::from("local");

        let _colon = registry
            .lock_key(&network, &Identifier::from("Vault:A"))
            .expect("First lock should succeed");
        let _underscore = registry
            .lock_key(&network, &Identifier::from("Vault_A"))
            .expect("Vault_A is a different key");
        let _slash = registry
            .lock_key(&network, &Identifier::from("Vault/A"))
            .expect("Vault/A is a different key");
    }

    #[test]
    fn test_lock_file_stem_is_injective() {
        let ids = ["Vault:A", "Vault_A", "Vault_3aA", "Vault/A", "Vault A"];
        let stems: std::collections::HashSet<String> = ids
            .into_iter()
            .map(|id| lock_file_stem(&Identifier::from(id)))
            .collect();
        assert_eq!(stems.len(), 5);
        assert_eq!(lock_file_stem(&Identifier::from("Vault:A")), "Vault_3aA");
    }

    #[test]
    fn test_network_names_cannot_escape_registry_dir() {
        let temp_dir = TempDir::new("proxyup-registry").unwrap();
        let registry = FileRegistry::new(temp_dir.path().join("deployments"));

        for name in ["../x", "a/b", "..", ".hidden", ""] {
            let network = NetworkId::from(name);
            assert!(
                matches!(
                    registry.get(&network, &Identifier::from("Vault")),
                    Err(RegistryError::InvalidNetwork { .. })
                ),
                "{name:?} should be rejected"
            );
            assert!(matches!(
                registry.put(&network, &record(name, "Vault", 0x01)),
                Err(RegistryError::InvalidNetwork { .. })
            ));
            assert!(matches!(
                registry.lock_key(&network, &Identifier::from("Vault")),
                Err(RegistryError::InvalidNetwork { .. })
            ));
        }
        assert!(!temp_dir.path().join("x.toml").exists());
        assert!(registry.list(&NetworkId::from("op-sepolia_2.test")).unwrap().is_empty());
    }
}
