//! Wire framing for metric snapshots
//!
//! Encoding runs serialize → gzip → sign → encrypt, every stage but the first
//! optional. The receiving side undoes the stages in exact reverse order:
//! decrypt → verify → inflate.

use log::trace;
use serde::Serialize;

use crate::codec::crypto::{Decryptor, Encryptor};
use crate::codec::{gzip, hash};
use crate::error::Result;

/// Encoded request body plus the headers describing it
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub body: Vec<u8>,
    /// `Content-Encoding` value when the body was compressed
    pub content_encoding: Option<&'static str>,
    /// Hex digest for the `HashSHA256` header
    pub hash: Option<String>,
}

impl Frame {
    /// Headers to attach to the outgoing request
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Type", "application/json".to_string())];
        if let Some(encoding) = self.content_encoding {
            headers.push(("Content-Encoding", encoding.to_string()));
        }
        if let Some(digest) = &self.hash {
            headers.push((hash::HASH_HEADER, digest.clone()));
        }
        headers
    }
}

/// Agent-side encoder
#[derive(Debug, Clone, Default)]
pub struct DeliveryFramer {
    compress: bool,
    hash_key: Option<String>,
    encryptor: Option<Encryptor>,
}

impl DeliveryFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Sign bodies with the shared key; an empty key disables signing
    pub fn with_hash_key(mut self, key: Option<String>) -> Self {
        self.hash_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_encryptor(mut self, encryptor: Option<Encryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Frame> {
        let json = serde_json::to_vec(payload)?;
        self.encode_bytes(json)
    }

    /// Run the byte stages on an already serialized body
    pub fn encode_bytes(&self, mut body: Vec<u8>) -> Result<Frame> {
        let mut content_encoding = None;
        if self.compress {
            body = gzip::compress(&body)?;
            content_encoding = Some("gzip");
        }

        let hash = self.hash_key.as_deref().map(|key| hash::sign(&body, key));

        if let Some(encryptor) = &self.encryptor {
            body = encryptor.encrypt(&body)?;
        }

        trace!(
            "Framed {} bytes (gzip: {}, signed: {}, encrypted: {})",
            body.len(),
            content_encoding.is_some(),
            hash.is_some(),
            self.encryptor.is_some()
        );

        Ok(Frame {
            body,
            content_encoding,
            hash,
        })
    }
}

/// Server-side decoder, one method per stage
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    hash_key: Option<String>,
    decryptor: Option<Decryptor>,
}

impl FrameDecoder {
    pub fn new(hash_key: Option<String>, decryptor: Option<Decryptor>) -> Self {
        Self {
            hash_key: hash_key.filter(|k| !k.is_empty()),
            decryptor,
        }
    }

    pub fn decrypts(&self) -> bool {
        self.decryptor.is_some()
    }

    pub fn verifies(&self) -> bool {
        self.hash_key.is_some()
    }

    pub fn decrypt(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        match &self.decryptor {
            Some(decryptor) => decryptor.decrypt(&body),
            None => Ok(body),
        }
    }

    /// Verify only when both a shared key and a received digest are present
    pub fn verify(&self, body: &[u8], received: Option<&str>) -> Result<()> {
        match (&self.hash_key, received) {
            (Some(key), Some(digest)) if !digest.is_empty() => hash::verify(body, key, digest),
            _ => Ok(()),
        }
    }

    pub fn inflate(&self, body: Vec<u8>, content_encoding: Option<&str>) -> Result<Vec<u8>> {
        match content_encoding {
            Some(enc) if enc.eq_ignore_ascii_case("gzip") => gzip::decompress(&body),
            _ => Ok(body),
        }
    }

    pub fn decode(&self, frame: Frame) -> Result<Vec<u8>> {
        let body = self.decrypt(frame.body)?;
        self.verify(&body, frame.hash.as_deref())?;
        self.inflate(body, frame.content_encoding)
    }
}
