use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use reqwest::blocking::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::archive::ExtractedBinary;
use super::error::{Result, UpdateError};
use super::github::{decode_json, AssetDescriptor, Release};
use crate::config::UpdateConfig;

/// Expected checksum and signature for a binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub checksum: Vec<u8>,
    /// DER-encoded ECDSA signature over the checksum
    pub signature: Vec<u8>,
}

impl Attestation {
    pub fn from_hex(checksum: &str, signature: &str) -> Result<Self> {
        let decode = |field: &str, value: &str| {
            hex::decode(value.trim()).map_err(|e| UpdateError::Decode {
                what: "attestation",
                reason: format!("{}: {}", field, e),
            })
        };
        Ok(Self {
            checksum: decode("checksum", checksum)?,
            signature: decode("signature", signature)?,
        })
    }
}

/// Supplies the attestation for the asset being installed
pub trait AttestationSource {
    fn attestation(&self, release: &Release, asset: &AssetDescriptor) -> Result<Attestation>;
}

/// An attestation handed over by the caller
#[derive(Debug, Clone)]
pub struct StaticAttestation(pub Attestation);

impl AttestationSource for StaticAttestation {
    fn attestation(&self, _release: &Release, _asset: &AssetDescriptor) -> Result<Attestation> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct AttestationDocument {
    checksum: String,
    signature: String,
}

/// Fetches `{"checksum": "<hex>", "signature": "<hex>"}` over HTTP
pub struct HttpAttestationSource<'a> {
    config: &'a UpdateConfig,
    client: Client,
}

impl<'a> HttpAttestationSource<'a> {
    pub fn new(config: &'a UpdateConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("mwdl/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpdateError::network("building HTTP client", e))?;
        Ok(Self { config, client })
    }
}

impl AttestationSource for HttpAttestationSource<'_> {
    fn attestation(&self, release: &Release, asset: &AssetDescriptor) -> Result<Attestation> {
        const ACTION: &str = "fetching attestation";

        let url = attestation_url(self.config, release, asset);
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| UpdateError::network(ACTION, e))?;
        if !response.status().is_success() {
            return Err(UpdateError::Network {
                action: ACTION,
                reason: format!("{} returned {}", url, response.status()),
            });
        }
        let body = response
            .bytes()
            .map_err(|e| UpdateError::network(ACTION, e))?;

        let doc: AttestationDocument = decode_json(&body, "attestation")?;
        Attestation::from_hex(&doc.checksum, &doc.signature)
    }
}

fn attestation_url(config: &UpdateConfig, release: &Release, asset: &AssetDescriptor) -> String {
    match &config.attestation_url {
        Some(template) => template
            .replace("{tag}", &release.tag)
            .replace("{asset}", &asset.name),
        None => format!("{}.sig", asset.download_url),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationResult {
    pub digest: [u8; 32],
    pub signature_valid: bool,
}

/// A binary whose SHA-256 matched the advertised checksum and whose ECDSA
/// signature verified. The installer accepts nothing else.
#[derive(Debug)]
pub struct VerifiedBinary {
    binary: ExtractedBinary,
    result: VerificationResult,
}

impl VerifiedBinary {
    pub fn bytes(&self) -> &[u8] {
        &self.binary.bytes
    }

    pub fn result(&self) -> &VerificationResult {
        &self.result
    }
}

pub struct IntegrityVerifier {
    key: VerifyingKey,
}

impl IntegrityVerifier {
    pub fn new(public_key_pem: &str) -> Result<Self> {
        let pem = format!("{}\n", public_key_pem.trim());
        let key = VerifyingKey::from_public_key_pem(&pem)
            .map_err(|e| UpdateError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_config(config: &UpdateConfig) -> Result<Self> {
        Self::new(&config.public_key_pem)
    }

    /// Check `binary` against `attestation`. Both checks always run; a
    /// checksum mismatch is reported ahead of a bad signature.
    pub fn verify(
        &self,
        binary: ExtractedBinary,
        attestation: &Attestation,
    ) -> Result<VerifiedBinary> {
        let digest = sha256(&binary.bytes);
        info!("Checksum is: {}", hex::encode(digest));

        let checksum_matches = attestation.checksum == digest;
        let signature_valid = Signature::from_der(&attestation.signature)
            .map(|signature| self.key.verify_prehash(&digest, &signature).is_ok())
            .unwrap_or(false);

        if !checksum_matches {
            return Err(UpdateError::ChecksumMismatch {
                expected: hex::encode(&attestation.checksum),
                actual: hex::encode(digest),
            });
        }
        if !signature_valid {
            return Err(UpdateError::SignatureInvalid {
                digest: hex::encode(digest),
            });
        }

        Ok(VerifiedBinary {
            binary,
            result: VerificationResult {
                digest,
                signature_valid,
            },
        })
    }
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(bytes));
    digest
}
