//! Self-signed certificate identity for the DTLS handshake.

use dtls::crypto::{CryptoPrivateKey, CryptoPrivateKeyKind};
use rcgen::{CertificateParams, KeyPair};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use shared::util::math_rand_alpha;

/// The local DTLS identity: an X.509 certificate with its private key and
/// the sha-256 fingerprint advertised in SDP.
#[derive(Clone)]
pub struct Certificate {
    dtls_certificate: dtls::crypto::Certificate,
}

impl Certificate {
    /// Generates a fresh ECDSA P-256 certificate with a random common name.
    pub fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::Other(e.to_string()))?;
        Self::from_key_pair(key_pair)
    }

    pub fn from_key_pair(key_pair: KeyPair) -> Result<Self> {
        if !(key_pair.is_compatible(&rcgen::PKCS_ED25519)
            || key_pair.is_compatible(&rcgen::PKCS_ECDSA_P256_SHA256))
        {
            return Err(Error::Other("Unsupported key_pair".to_owned()));
        }

        let params = CertificateParams::new(vec![math_rand_alpha(16)])
            .map_err(|e| Error::Other(e.to_string()))?;
        let x509_cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Other(e.to_string()))?;
        let serialized_der = key_pair.serialize_der();

        let private_key = if key_pair.is_compatible(&rcgen::PKCS_ED25519) {
            CryptoPrivateKey {
                kind: CryptoPrivateKeyKind::Ed25519(
                    Ed25519KeyPair::from_pkcs8(&serialized_der)
                        .map_err(|e| Error::Other(e.to_string()))?,
                ),
                serialized_der,
            }
        } else {
            CryptoPrivateKey {
                kind: CryptoPrivateKeyKind::Ecdsa256(
                    EcdsaKeyPair::from_pkcs8(
                        &ring::signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                        &serialized_der,
                        &SystemRandom::new(),
                    )
                    .map_err(|e| Error::Other(e.to_string()))?,
                ),
                serialized_der,
            }
        };

        Ok(Self {
            dtls_certificate: dtls::crypto::Certificate {
                certificate: vec![x509_cert.der().to_owned()],
                private_key,
            },
        })
    }

    pub(crate) fn dtls_certificate(&self) -> &dtls::crypto::Certificate {
        &self.dtls_certificate
    }

    /// The colon-separated sha-256 fingerprint, lowercase hex.
    pub fn fingerprint(&self) -> (String, String) {
        let mut value = String::new();
        if let Some(c) = self.dtls_certificate.certificate.first() {
            let hashed = Sha256::digest(c.as_ref());
            let bytes: Vec<String> = hashed.iter().map(|x| format!("{x:02x}")).collect();
            value = bytes.join(":");
        }
        ("sha-256".to_owned(), value)
    }

    /// Raw digest of the certificate, as the remote side would compute it.
    pub fn fingerprint_bytes(&self) -> Vec<u8> {
        self.dtls_certificate
            .certificate
            .first()
            .map(|c| Sha256::digest(c.as_ref()).to_vec())
            .unwrap_or_default()
    }
}
