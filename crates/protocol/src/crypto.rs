//! Signing primitives for the attestation step.
//!
//! Two strategies answer a broker challenge:
//! - shared secret: SHA-256 over the CBOR pair `[challenge, secret]`
//! - registered key: RSASSA-PKCS1-v1_5/SHA-256 over the CBOR pair
//!   `[challenge, cid]`, using a 2048-bit RSA key

use ciborium::Value;
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{RembusError, Result};

/// Modulus size of generated component keys.
pub const RSA_KEY_BITS: usize = 2048;

/// Builds the byte string that gets signed: CBOR `[bytes(challenge), text(material)]`.
pub fn signing_input(challenge: &[u8], material: &str) -> Result<Vec<u8>> {
    let pair = Value::Array(vec![
        Value::Bytes(challenge.to_vec()),
        Value::Text(material.to_string()),
    ]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&pair, &mut out)?;
    Ok(out)
}

/// Signs a challenge with a shared secret.
pub fn sign_with_secret(challenge: &[u8], secret: &str) -> Result<Vec<u8>> {
    let input = signing_input(challenge, secret)?;
    Ok(Sha256::digest(&input).to_vec())
}

/// An RSA key pair owned by a registered component.
#[derive(Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl KeyPair {
    /// Generates a fresh 2048-bit key pair from the OS random source.
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Restores a key pair from a PKCS#8 PEM private key.
    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| RembusError::Crypto(format!("invalid private key: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Encodes the private key as PKCS#8 PEM.
    ///
    /// The result is secret material; hand it straight to a key store.
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| RembusError::Crypto(format!("private key encoding: {}", e)))?;
        Ok((*pem).clone())
    }

    /// Encodes the public key as SPKI PEM, as sent in REGISTER frames.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| RembusError::Crypto(format!("public key encoding: {}", e)))
    }

    /// Signs a challenge on behalf of `cid`.
    pub fn sign(&self, challenge: &[u8], cid: &str) -> Result<Vec<u8>> {
        let input = signing_input(challenge, cid)?;
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key
            .try_sign(&input)
            .map_err(|e| RembusError::Crypto(format!("signing failed: {}", e)))?;
        Ok(signature.to_vec())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &RSA_KEY_BITS)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Verifies a registered-key signature against an SPKI PEM public key.
///
/// This is the broker-side check; the client uses it in tests and tooling.
pub fn verify_key_signature(
    public_key_pem: &str,
    challenge: &[u8],
    cid: &str,
    signature: &[u8],
) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| RembusError::Crypto(format!("invalid public key: {}", e)))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature = RsaSignature::try_from(signature)
        .map_err(|e| RembusError::Crypto(format!("malformed signature: {}", e)))?;
    let input = signing_input(challenge, cid)?;
    verifying_key
        .verify(&input, &signature)
        .map_err(|e| RembusError::Crypto(format!("invalid signature: {}", e)))
}
