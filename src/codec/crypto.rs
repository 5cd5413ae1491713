//! RSA PKCS#1 v1.5 body encryption
//!
//! A single PKCS#1 v1.5 operation takes at most `k - 11` bytes of plaintext,
//! where `k` is the modulus length. Bodies are split into blocks of that size,
//! each block becomes exactly `k` bytes of ciphertext, and the ciphertext
//! blocks are concatenated.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;

use crate::error::{MetricsError, Result};

const PKCS1_OVERHEAD: usize = 11;

/// Encrypts outbound bodies with the collector's public key
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Parse a PEM public key (SPKI `PUBLIC KEY` or PKCS#1 `RSA PUBLIC KEY`)
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| MetricsError::Crypto(format!("not an RSA public key: {}", e)))?;
        Ok(Self { key })
    }

    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let pem = fs::read_to_string(path).map_err(|e| {
            MetricsError::Crypto(format!("failed to read public key {}: {}", path.display(), e))
        })?;
        Self::from_pem(&pem)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let block_len = self.key.size();
        let chunk_len = block_len - PKCS1_OVERHEAD;
        let mut rng = OsRng;

        let mut out = Vec::with_capacity((plaintext.len() / chunk_len + 1) * block_len);
        for chunk in plaintext.chunks(chunk_len) {
            let block = self
                .key
                .encrypt(&mut rng, Pkcs1v15Encrypt, chunk)
                .map_err(|e| MetricsError::Crypto(format!("failed to encrypt message: {}", e)))?;
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

/// Decrypts inbound bodies with the collector's private key
#[derive(Debug, Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parse a PEM private key (PKCS#8 `PRIVATE KEY` or PKCS#1 `RSA PRIVATE KEY`)
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| MetricsError::Crypto(format!("not an RSA private key: {}", e)))?;
        Ok(Self { key })
    }

    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let pem = fs::read_to_string(path).map_err(|e| {
            MetricsError::Crypto(format!("failed to read private key {}: {}", path.display(), e))
        })?;
        Self::from_pem(&pem)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let block_len = self.key.size();
        if ciphertext.is_empty() || ciphertext.len() % block_len != 0 {
            return Err(MetricsError::Crypto(format!(
                "ciphertext length {} is not a multiple of the {}-byte key size",
                ciphertext.len(),
                block_len
            )));
        }

        let mut out = Vec::with_capacity(ciphertext.len());
        for block in ciphertext.chunks(block_len) {
            let plain = self
                .key
                .decrypt(Pkcs1v15Encrypt, block)
                .map_err(|e| MetricsError::Crypto(format!("decryption failed: {}", e)))?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }

    pub fn encryptor(&self) -> Encryptor {
        Encryptor::new(self.key.to_public_key())
    }
}
