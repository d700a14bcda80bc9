use libsecp256k1::{Message, PublicKey, RecoveryId, SecretKey};
use rand::RngCore;
use zeroize::Zeroizing;

use windward_core::error::WindwardError;
use windward_core::types::{Address, Digest, Signature};

use crate::hash::keccak256;

/// A Windward identity: secp256k1 keypair with the keccak-derived address.
///
/// The secret key bytes are wiped on drop.
pub struct KeyPair {
    pub address: Address,
    public_key: PublicKey,
    secret_key: SecretKey,
    secret_bytes: Zeroizing<[u8; 32]>,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            if let Ok(kp) = Self::from_secret_bytes(&bytes) {
                return kp;
            }
        }
    }

    /// Restore a keypair from raw secret-key bytes (e.g. a key file).
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, WindwardError> {
        let secret_key = SecretKey::parse(bytes)
            .map_err(|e| WindwardError::MalformedSignature(format!("secret key: {e:?}")))?;
        let public_key = PublicKey::from_secret_key(&secret_key);
        let address = address_from_pubkey(&public_key);
        Ok(Self {
            address,
            public_key,
            secret_key,
            secret_bytes: Zeroizing::new(*bytes),
        })
    }

    /// Restore a keypair from a hex-encoded secret key.
    pub fn from_hex(s: &str) -> Result<Self, WindwardError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)
            .map_err(|e| WindwardError::MalformedSignature(format!("secret key hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(WindwardError::MalformedSignature(
                "secret key must be 32 bytes".into(),
            ));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_secret_bytes(&arr)
    }

    /// keccak256(uncompressed pubkey) — the registry stores this.
    pub fn pubkey_hash(&self) -> Digest {
        keccak256(&self.public_key.serialize()[1..])
    }

    /// Sign a 32-byte digest. Returns r ‖ s ‖ v with v ∈ {27, 28}.
    pub fn sign_digest(&self, digest: &Digest) -> Signature {
        let message = Message::parse(digest.as_bytes());
        let (sig, recovery_id) = libsecp256k1::sign(&message, &self.secret_key);
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.serialize());
        out[64] = recovery_id.serialize() + 27;
        Signature(out)
    }

    /// Read-only view of the secret key bytes.
    pub fn secret_key_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {:?} }}", self.address)
    }
}

/// Derive the 20-byte address from an uncompressed public key.
fn address_from_pubkey(pk: &PublicKey) -> Address {
    let digest = keccak256(&pk.serialize()[1..]);
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&digest.as_bytes()[12..]);
    Address::from_bytes(arr)
}

/// Recover the signer address of `signature` over `digest`.
///
/// Accepts v in {0, 1} or {27, 28}.
pub fn recover_address(digest: &Digest, signature: &Signature) -> Result<Address, WindwardError> {
    let mut rs = [0u8; 64];
    rs.copy_from_slice(&signature.0[..64]);
    let v = signature.0[64];
    let rec = if v >= 27 { v - 27 } else { v };

    let sig = libsecp256k1::Signature::parse_standard(&rs)
        .map_err(|e| WindwardError::MalformedSignature(format!("{e:?}")))?;
    let recovery_id =
        RecoveryId::parse(rec).map_err(|e| WindwardError::MalformedSignature(format!("{e:?}")))?;
    let message = Message::parse(digest.as_bytes());

    let pk = libsecp256k1::recover(&message, &sig, &recovery_id)
        .map_err(|_| WindwardError::SignatureRejected)?;
    Ok(address_from_pubkey(&pk))
}
