//! Raw signature verification shared by the role-token codec and the
//! signed policy/pubkey bundle verifiers (§3, §4.3).
//!
//! Access tokens go through `jsonwebtoken` end to end and never touch
//! this module; this is only for the two wire formats this crate defines
//! itself (role tokens, signed policy bundles) that are flat signed
//! strings rather than JWTs.

use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Signature algorithm used by a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigAlg {
    /// RSASSA-PKCS1-v1_5 with SHA-256, 2048-8192 bit keys.
    RsaPkcs1Sha256,
    /// ECDSA on the P-256 curve with SHA-256, fixed-length signature.
    EcdsaP256Sha256,
}

impl SigAlg {
    fn verification_algorithm(self) -> &'static dyn VerificationAlgorithm {
        match self {
            Self::RsaPkcs1Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256 as &dyn VerificationAlgorithm,
            Self::EcdsaP256Sha256 => &signature::ECDSA_P256_SHA256_FIXED as &dyn VerificationAlgorithm,
        }
    }
}

/// A public key as delivered by the authority service's key bundle.
///
/// `raw` holds bytes already in the exact form the algorithm's verifier
/// expects (PKCS#1 `RSAPublicKey` DER for RSA, an uncompressed point for
/// ECDSA). The authority service's key-bundle endpoint does any
/// SPKI-unwrapping server-side, so the core never needs its own ASN.1
/// parser for public keys.
#[derive(Debug, Clone)]
pub struct PublicKeyMaterial {
    /// Algorithm this key verifies under.
    pub alg: SigAlg,
    /// Raw key bytes (see type-level docs for the expected encoding).
    pub raw: Vec<u8>,
}

impl PublicKeyMaterial {
    /// Verify `signature` over `message` with this key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let key = UnparsedPublicKey::new(self.alg.verification_algorithm(), &self.raw);
        key.verify(message, signature)
            .map_err(|_| Error::SignatureInvalid)
    }
}
