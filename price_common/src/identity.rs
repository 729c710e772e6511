//! Node identity: an ed25519 key pair derived from a persisted 32-byte seed.
//!
//! A node is addressed by its public key, not by its socket address. The seed is
//! generated once, written to the node's config store and reused on every start, so the
//! public key that clients were given stays valid across restarts.
use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::info;
use rand::Rng;

use crate::error::CacheError;
use crate::store::OrderedStore;

/// Config-store key holding the RPC server seed.
pub const RPC_SEED_KEY: &str = "rpc-seed";
/// Config-store key holding a client seed.
pub const CLIENT_SEED_KEY: &str = "client-seed";

/// Length in bytes of a seed and of a public key.
pub const KEY_LEN: usize = 32;
/// Length in bytes of a signature.
pub const SIGNATURE_LEN: usize = 64;

/// Public half of an identity; the address of a node on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicId([u8; KEY_LEN]);

impl PublicId {
    /// Wraps raw public key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Verifies `signature` over `message` against this key.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<(), CacheError> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CacheError::Identity(format!("invalid public key: {}", e)))?;
        key.verify(message, &Signature::from_bytes(signature))
            .map_err(|e| CacheError::Identity(format!("bad signature: {}", e)))
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PublicId {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CacheError::Identity(format!("public key is not hex: {}", e)))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            CacheError::Identity(format!("public key must be {} bytes, got {}", KEY_LEN, v.len()))
        })?;
        Ok(Self(bytes))
    }
}

/// Private identity of this node.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Derives the key pair from a seed.
    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Creates an identity from a fresh random seed. Nothing is persisted.
    pub fn generate() -> Self {
        Self::from_seed(&random_seed())
    }

    /// Loads the seed stored under `name`, generating and storing one if absent.
    pub fn load_or_create(store: &dyn OrderedStore, name: &str) -> Result<Self, CacheError> {
        if let Some(raw) = store.get(name.as_bytes())? {
            let seed: [u8; KEY_LEN] = raw.try_into().map_err(|v: Vec<u8>| {
                CacheError::Identity(format!(
                    "stored seed {:?} must be {} bytes, got {}",
                    name,
                    KEY_LEN,
                    v.len()
                ))
            })?;
            return Ok(Self::from_seed(&seed));
        }

        let seed = random_seed();
        store.put(name.as_bytes(), &seed)?;
        info!("Generated new seed {:?}", name);
        Ok(Self::from_seed(&seed))
    }

    /// Public key of this identity.
    pub fn public_id(&self) -> PublicId {
        PublicId(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs `message` with the private key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_id", &self.public_id())
            .finish_non_exhaustive()
    }
}

fn random_seed() -> [u8; KEY_LEN] {
    let mut seed = [0u8; KEY_LEN];
    rand::rng().fill(&mut seed);
    seed
}
