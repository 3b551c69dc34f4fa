//! Node identity: the Ed25519 key pair behind the node's `PeerId`.
//!
//! By default a fresh identity is generated on every run. When an identity
//! file is configured, the key pair is stored there in libp2p's protobuf
//! encoding and reused on restart.

use std::fs;
use std::io::Write;
use std::path::Path;

use libp2p::identity::Keypair;
use libp2p::PeerId;
use tracing::info;

use crate::error::ConstructionError;

/// The cryptographic identity of a node.
#[derive(Clone, Debug)]
pub struct NodeIdentity {
    keypair: Keypair,
}

impl NodeIdentity {
    /// Generate a new Ed25519 identity.
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::generate_ed25519(),
        }
    }

    /// Load the identity stored at `path`, or generate one and store it there.
    pub fn load_or_generate(path: &Path) -> Result<Self, ConstructionError> {
        if path.exists() {
            let bytes = fs::read(path).map_err(|e| {
                ConstructionError::Identity(format!("failed to read {}: {}", path.display(), e))
            })?;
            let keypair = Keypair::from_protobuf_encoding(&bytes).map_err(|e| {
                ConstructionError::Identity(format!("failed to decode {}: {}", path.display(), e))
            })?;
            let identity = Self { keypair };
            info!(peer = %identity.peer_id(), path = %path.display(), "loaded node identity");
            return Ok(identity);
        }

        let identity = Self::generate();
        identity.save(path)?;
        info!(peer = %identity.peer_id(), path = %path.display(), "generated new node identity");
        Ok(identity)
    }

    fn save(&self, path: &Path) -> Result<(), ConstructionError> {
        let bytes = self
            .keypair
            .to_protobuf_encoding()
            .map_err(|e| ConstructionError::Identity(format!("failed to encode key: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ConstructionError::Identity(format!(
                    "failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut options = fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|e| {
            ConstructionError::Identity(format!("failed to create {}: {}", path.display(), e))
        })?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                ConstructionError::Identity(format!("failed to write {}: {}", path.display(), e))
            })
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.public().to_peer_id()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("node.key");

        let first = NodeIdentity::load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = NodeIdentity::load_or_generate(&path).unwrap();

        assert_eq!(first.peer_id(), second.peer_id());
    }

    #[test]
    fn test_generated_identities_differ() {
        assert_ne!(
            NodeIdentity::generate().peer_id(),
            NodeIdentity::generate().peer_id()
        );
    }

    #[test]
    fn test_corrupt_identity_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        fs::write(&path, b"definitely not a keypair").unwrap();

        let err = NodeIdentity::load_or_generate(&path).unwrap_err();
        assert!(matches!(err, ConstructionError::Identity(_)));
    }
}
