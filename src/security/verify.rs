// src/security/verify.rs
//! Recipe signature verification
//!
//! Publishers sign the recipe digest (the lowercase hex string, as bytes)
//! and attach base64 signatures keyed by key id. Two schemes are accepted:
//! - Ed25519
//! - RSA PKCS#1 v1.5 with SHA-256
//!
//! Trusted keys are PEM public keys (SPKI, or PKCS#1 for RSA) or raw
//! 32-byte Ed25519 keys, either binary or base64 encoded.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::pkcs8::DecodePublicKey as _;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A trusted public key
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(VerifyingKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    /// Decode key material in any supported encoding
    pub fn parse(material: &[u8]) -> Result<Self> {
        if material.len() == 32 {
            return Self::ed25519_raw(material);
        }

        let text = std::str::from_utf8(material)
            .map_err(|_| Error::SignatureError("Key material is not PEM or base64".to_string()))?
            .trim();

        if text.starts_with("-----BEGIN") {
            if let Ok(key) = VerifyingKey::from_public_key_pem(text) {
                return Ok(Self::Ed25519(key));
            }
            if let Ok(key) = RsaPublicKey::from_public_key_pem(text) {
                return Ok(Self::Rsa(key));
            }
            if let Ok(key) = RsaPublicKey::from_pkcs1_pem(text) {
                return Ok(Self::Rsa(key));
            }
            return Err(Error::SignatureError(
                "Unsupported PEM public key".to_string(),
            ));
        }

        let raw = BASE64
            .decode(text)
            .map_err(|e| Error::SignatureError(format!("Invalid base64 key: {e}")))?;
        Self::ed25519_raw(&raw)
    }

    fn ed25519_raw(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::SignatureError(format!(
                "Invalid Ed25519 key length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self::Ed25519)
            .map_err(|e| Error::SignatureError(format!("Invalid Ed25519 key: {e}")))
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Ed25519(_) => "ed25519",
            Self::Rsa(_) => "rsa-pkcs1v15-sha256",
        }
    }

    /// Check `signature` over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false),
            Self::Rsa(key) => {
                use rsa::signature::Verifier as _;
                let verifying = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                rsa::pkcs1v15::Signature::try_from(signature)
                    .map(|sig| verifying.verify(message, &sig).is_ok())
                    .unwrap_or(false)
            }
        }
    }
}

/// Outcome of verifying one recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCheck {
    pub valid: bool,
    pub reason: String,
    /// Key that produced the valid signature
    pub key_id: Option<String>,
}

impl SignatureCheck {
    fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            reason: reason.to_string(),
            key_id: None,
        }
    }
}

/// Verifies recipe signatures against a set of trusted keys
#[derive(Debug, Default)]
pub struct SignatureVerifier {
    trusted_keys: RwLock<BTreeMap<String, PublicKey>>,
}

impl SignatureVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `material` under `key_id`, replacing any previous key
    pub fn add_trusted_key(&self, key_id: &str, material: &[u8]) -> Result<()> {
        let key = PublicKey::parse(material)?;
        info!("Trusting {} key {}", key.algorithm(), key_id);
        self.trusted_keys.write().insert(key_id.to_string(), key);
        Ok(())
    }

    /// Trust an already decoded key
    pub fn add_public_key(&self, key_id: &str, key: PublicKey) {
        self.trusted_keys.write().insert(key_id.to_string(), key);
    }

    /// Stop trusting `key_id`; returns whether it was trusted
    pub fn remove_trusted_key(&self, key_id: &str) -> bool {
        self.trusted_keys.write().remove(key_id).is_some()
    }

    pub fn trusted_key_ids(&self) -> Vec<String> {
        self.trusted_keys.read().keys().cloned().collect()
    }

    /// Verify the recipe's signatures over its current digest
    ///
    /// Signatures from unknown key ids are skipped. The first trusted key
    /// with a valid signature wins.
    pub fn verify_recipe(&self, recipe: &Recipe) -> SignatureCheck {
        if recipe.signatures.is_empty() {
            return SignatureCheck::rejected("No signatures present");
        }

        let digest = recipe.compute_digest();
        let keys = self.trusted_keys.read();

        for (key_id, encoded) in &recipe.signatures {
            let Some(key) = keys.get(key_id) else {
                debug!("Skipping signature from untrusted key {}", key_id);
                continue;
            };

            let signature = match BASE64.decode(encoded.trim()) {
                Ok(sig) => sig,
                Err(e) => {
                    warn!("Signature from {} on {} is not base64: {}", key_id, recipe.label(), e);
                    continue;
                }
            };

            if key.verify(digest.as_bytes(), &signature) {
                info!("Verified {} with key {}", recipe.label(), key_id);
                return SignatureCheck {
                    valid: true,
                    reason: format!("Verified with key {key_id}"),
                    key_id: Some(key_id.clone()),
                };
            }
            warn!("Invalid signature from {} on {}", key_id, recipe.label());
        }

        SignatureCheck::rejected("No valid signature found")
    }
}

/// Sign the recipe's digest with an Ed25519 key and attach the signature
pub fn sign_recipe(recipe: &mut Recipe, key_id: &str, key: &SigningKey) -> String {
    let digest = recipe.compute_digest();
    let signature = BASE64.encode(key.sign(digest.as_bytes()).to_bytes());
    recipe
        .signatures
        .insert(key_id.to_string(), signature.clone());
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::EncodePublicKey as _;
    use rand::rngs::OsRng;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::signature::{SignatureEncoding, Signer as _};

    fn recipe() -> Recipe {
        Recipe::new("gitea", "1.21.0", "debvisor", "Git service")
    }

    #[test]
    fn test_no_signatures() {
        let check = SignatureVerifier::new().verify_recipe(&recipe());
        assert!(!check.valid);
        assert_eq!(check.reason, "No signatures present");
    }

    #[test]
    fn test_ed25519_pem_roundtrip() {
        let signing = SigningKey::generate(&mut OsRng);
        let pem = signing
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let verifier = SignatureVerifier::new();
        verifier.add_trusted_key("debvisor", pem.as_bytes()).unwrap();

        let mut r = recipe();
        sign_recipe(&mut r, "debvisor", &signing);

        let check = verifier.verify_recipe(&r);
        assert!(check.valid, "{}", check.reason);
        assert_eq!(check.key_id.as_deref(), Some("debvisor"));

        r.description = "tampered".to_string();
        let check = verifier.verify_recipe(&r);
        assert!(!check.valid);
        assert_eq!(check.reason, "No valid signature found");
    }

    #[test]
    fn test_raw_and_base64_ed25519_keys() {
        let signing = SigningKey::generate(&mut OsRng);
        let raw = signing.verifying_key().to_bytes();

        let verifier = SignatureVerifier::new();
        verifier.add_trusted_key("raw", &raw).unwrap();
        verifier
            .add_trusted_key("b64", BASE64.encode(raw).as_bytes())
            .unwrap();
        assert_eq!(verifier.trusted_key_ids(), vec!["b64", "raw"]);

        let mut r = recipe();
        sign_recipe(&mut r, "b64", &signing);
        assert!(verifier.verify_recipe(&r).valid);
    }

    #[test]
    fn test_rsa_pkcs1v15_sha256() {
        let private = rsa::RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let verifier = SignatureVerifier::new();
        verifier.add_trusted_key("vendor", pem.as_bytes()).unwrap();

        let mut r = recipe();
        let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(private);
        let sig = signer.sign(r.compute_digest().as_bytes());
        r.signatures
            .insert("vendor".to_string(), BASE64.encode(sig.to_bytes()));

        let check = verifier.verify_recipe(&r);
        assert!(check.valid, "{}", check.reason);
    }

    #[test]
    fn test_unknown_keys_are_skipped() {
        let trusted = SigningKey::generate(&mut OsRng);
        let stranger = SigningKey::generate(&mut OsRng);

        let verifier = SignatureVerifier::new();
        verifier
            .add_trusted_key("trusted", &trusted.verifying_key().to_bytes())
            .unwrap();

        let mut r = recipe();
        sign_recipe(&mut r, "stranger", &stranger);
        assert_eq!(verifier.verify_recipe(&r).reason, "No valid signature found");

        sign_recipe(&mut r, "trusted", &trusted);
        assert!(verifier.verify_recipe(&r).valid);

        assert!(verifier.remove_trusted_key("trusted"));
        assert!(!verifier.verify_recipe(&r).valid);
    }

    #[test]
    fn test_bad_key_material() {
        let verifier = SignatureVerifier::new();
        assert!(verifier.add_trusted_key("short", b"abc").is_err());
        assert!(
            verifier
                .add_trusted_key("pem", b"-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----")
                .is_err()
        );
        assert!(verifier.trusted_key_ids().is_empty());
    }
}
