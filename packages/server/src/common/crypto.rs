//! Identities and signatures.
//!
//! Every entity ID is a 64-char lowercase hex string. Colony, executor and
//! user identities are derived from secp256k1 keys: the ID is the SHA3-256
//! digest of the uncompressed public key point. RPC payloads carry a
//! 65-byte recoverable signature (r || s || v, hex encoded) over the
//! SHA3-256 digest of the payload bytes, from which the server recovers the
//! caller's ID without any key registry.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::RngCore;
use sha3::{Digest, Sha3_256};

use super::error::ServerError;

/// Generate a fresh random entity ID.
pub fn random_id() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    hash_id(&buf)
}

/// SHA3-256 digest of arbitrary bytes, hex encoded.
pub fn hash_id(data: &[u8]) -> String {
    hex::encode(Sha3_256::digest(data))
}

/// The identity bound to a public key.
pub fn id_from_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    hash_id(&point.as_bytes()[1..])
}

/// Recover the caller ID from a hex recoverable signature over `payload`.
pub fn recover_id(payload: &[u8], signature_hex: &str) -> Result<String, ServerError> {
    let bytes = hex::decode(signature_hex)
        .map_err(|_| ServerError::Unauthorized("signature is not valid hex".to_string()))?;
    if bytes.len() != 65 {
        return Err(ServerError::Unauthorized(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }

    let signature = Signature::from_slice(&bytes[..64])
        .map_err(|_| ServerError::Unauthorized("malformed signature".to_string()))?;
    let recovery_id = RecoveryId::from_byte(bytes[64])
        .ok_or_else(|| ServerError::Unauthorized("invalid recovery id".to_string()))?;

    let digest = Sha3_256::digest(payload);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| ServerError::Unauthorized("signature verification failed".to_string()))?;

    Ok(id_from_key(&key))
}

/// Sign a payload with a hex private key, producing the wire signature.
///
/// The server never signs anything itself; this is the client half of the
/// contract, used by tests and by tooling built on this crate.
pub fn sign_payload(payload: &[u8], private_key_hex: &str) -> Result<String, ServerError> {
    let key_bytes = hex::decode(private_key_hex)
        .map_err(|_| ServerError::Validation("private key is not valid hex".to_string()))?;
    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|_| ServerError::Validation("invalid private key".to_string()))?;

    let digest = Sha3_256::digest(payload);
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| ServerError::Internal(format!("signing failed: {e}")))?;

    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte());
    Ok(hex::encode(bytes))
}

/// Generate a keypair, returning (private key hex, identity).
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::random(&mut rand::thread_rng());
    let id = id_from_key(signing_key.verifying_key());
    (hex::encode(signing_key.to_bytes()), id)
}
