//! Compiled contract artifacts.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::{error::ArtifactError, fingerprint::BytecodeFingerprint};

/// A compiled contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub contract_name: String,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    pub abi: Value,
    pub fingerprint: BytecodeFingerprint,
}

impl Artifact {
    pub fn new(contract_name: impl Into<String>, bytecode: Bytes, abi: Value) -> Self {
        Self {
            contract_name: contract_name.into(),
            fingerprint: BytecodeFingerprint::of(&bytecode),
            bytecode,
            abi,
        }
    }

    /// Creation code with ABI-encoded constructor arguments appended.
    pub fn init_code(&self, constructor_args: &[u8]) -> Bytes {
        let mut code = Vec::with_capacity(self.bytecode.len() + constructor_args.len());
        code.extend_from_slice(&self.bytecode);
        code.extend_from_slice(constructor_args);
        code.into()
    }
}

/// Source of compiled artifacts.
pub trait ArtifactSource: Send + Sync {
    fn artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError>;
}

/// Foundry `forge build` output layout.
#[derive(Debug, Deserialize)]
struct ForgeArtifact {
    abi: Value,
    bytecode: ForgeBytecode,
}

#[derive(Debug, Deserialize)]
struct ForgeBytecode {
    object: String,
}

/// Reads artifacts from a Foundry `out/` directory: `<out>/<Name>.sol/<Name>.json`.
#[derive(Debug, Clone)]
pub struct FoundryArtifacts {
    out_dir: PathBuf,
}

impl FoundryArtifacts {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    fn artifact_path(&self, contract_name: &str) -> PathBuf {
        self.out_dir
            .join(format!("{contract_name}.sol"))
            .join(format!("{contract_name}.json"))
    }

    fn parse(contract_name: &str, path: &Path) -> Result<Artifact, ArtifactError> {
        let invalid = |reason: String| ArtifactError::Invalid {
            contract: contract_name.to_string(),
            reason,
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("failed to read {}: {e}", path.display())))?;
        let forge: ForgeArtifact =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        let bytecode = hex::decode(forge.bytecode.object.trim_start_matches("0x"))
            .map_err(|e| invalid(format!("bytecode is not hex: {e}")))?;
        if bytecode.is_empty() {
            // Interfaces and abstract contracts compile to empty bytecode.
            return Err(invalid("empty bytecode".to_string()));
        }

        Ok(Artifact::new(contract_name, bytecode.into(), forge.abi))
    }
}

impl ArtifactSource for FoundryArtifacts {
    fn artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError> {
        let path = self.artifact_path(contract_name);
        if !path.exists() {
            return Err(ArtifactError::NotFound {
                contract: contract_name.to_string(),
                path,
            });
        }
        let artifact = Self::parse(contract_name, &path)?;
        tracing::debug!(
            contract = contract_name,
            fingerprint = %artifact.fingerprint.short(),
            "Loaded artifact"
        );
        Ok(artifact)
    }
}

/// In-memory artifacts, replaceable at runtime to simulate recompilation.
#[derive(Debug, Default)]
pub struct InMemoryArtifacts {
    artifacts: std::sync::RwLock<HashMap<String, Artifact>>,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the artifact for `contract_name`.
    pub fn insert(&self, contract_name: &str, bytecode: impl Into<Bytes>) {
        let artifact = Artifact::new(contract_name, bytecode.into(), Value::Array(vec![]));
        self.artifacts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(contract_name.to_string(), artifact);
    }
}

impl ArtifactSource for InMemoryArtifacts {
    fn artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError> {
        self.artifacts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(contract_name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound {
                contract: contract_name.to_string(),
                path: PathBuf::from("<memory>"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn write_artifact(out: &Path, name: &str, bytecode: &str) {
        let dir = out.join(format!("{name}.sol"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{name}.json")),
            serde_json::json!({
                "abi": [{"type": "function", "name": "initialize", "inputs": []}],
                "bytecode": {"object": bytecode},
                "deployedBytecode": {"object": "0x00"},
            })
            .to_string(),
        )
        .unwrap();
    }

    #[test]
    fn test_load_foundry_artifact() {
        let temp_dir = TempDir::new("proxyup-artifacts").unwrap();
        write_artifact(temp_dir.path(), "Vault", "0x6080604052");

        let artifacts = FoundryArtifacts::new(temp_dir.path());
        let vault = artifacts.artifact("Vault").expect("Failed to load artifact");

        assert_eq!(vault.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
        assert_eq!(vault.fingerprint, BytecodeFingerprint::of(&vault.bytecode));
        assert!(vault.abi.is_array());
    }

    #[test]
    fn test_missing_artifact() {
        let temp_dir = TempDir::new("proxyup-artifacts").unwrap();
        let artifacts = FoundryArtifacts::new(temp_dir.path());

        assert!(matches!(
            artifacts.artifact("Vault"),
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[test]
    fn test_interface_artifact_is_invalid() {
        let temp_dir = TempDir::new("proxyup-artifacts").unwrap();
        write_artifact(temp_dir.path(), "IVault", "0x");

        let artifacts = FoundryArtifacts::new(temp_dir.path());
        assert!(matches!(
            artifacts.artifact("IVault"),
            Err(ArtifactError::Invalid { .. })
        ));
    }

    #[test]
    fn test_init_code_appends_constructor_args() {
        let artifact = Artifact::new("Token", Bytes::from(vec![0xaa, 0xbb]), Value::Null);
        assert_eq!(artifact.init_code(&[0x01]).as_ref(), &[0xaa, 0xbb, 0x01]);
    }
}
