//! Validation of the PEM material held in Secrets and ConfigMaps.

use base64::Engine;
use gateway_controller_core::tls::{TlsCertificate, TlsSecretError};
use ring::{
    rand::SystemRandom,
    signature::{self, EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair},
};
use rustls_pemfile::Item;
use std::{collections::BTreeMap, io::Cursor};

pub(crate) const TLS_CERT_KEY: &str = "tls.crt";
pub(crate) const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub(crate) const CA_CERT_KEY: &str = "ca.crt";

/// The type and data of a Secret.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SecretData {
    pub type_: Option<String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum PemError {
    #[error("no certificate information found")]
    NoCertificate,

    #[error("no private key found")]
    NoPrivateKey,

    #[error("failed to parse PEM: {0}")]
    Pem(String),

    #[error("failed to parse certificate: {0}")]
    Certificate(String),

    #[error("failed to parse private key")]
    PrivateKey,

    #[error("private key does not match public key")]
    KeyMismatch,
}

/// Validates a TLS Secret's certificate chain and private key, returning the
/// chain re-encoded as PEM.
///
/// A Secret holding only a `ca.crt` is accepted without a key pair.
pub(crate) fn validate_tls_secret(
    namespace: &str,
    name: &str,
    data: &BTreeMap<String, Vec<u8>>,
) -> Result<TlsCertificate, TlsSecretError> {
    let get = |key: &str| data.get(key).map(Vec::as_slice).unwrap_or_default();
    let (cert_chain, private_key, ca) = (
        get(TLS_CERT_KEY),
        get(TLS_PRIVATE_KEY_KEY),
        get(CA_CERT_KEY),
    );
    let ca = (!ca.is_empty()).then(|| String::from_utf8_lossy(ca).into_owned());

    if cert_chain.is_empty() && private_key.is_empty() && ca.is_some() {
        return Ok(TlsCertificate {
            cert_chain: String::new(),
            private_key: String::new(),
            ca,
        });
    }

    let cleaned = validate_key_pair(cert_chain, private_key).map_err(|e| TlsSecretError::Invalid {
        namespace: namespace.to_string(),
        name: name.to_string(),
        message: e.to_string(),
    })?;
    Ok(TlsCertificate {
        cert_chain: cleaned,
        private_key: String::from_utf8_lossy(private_key).into_owned(),
        ca,
    })
}

/// Parses a CA bundle, returning it re-encoded as PEM.
pub(crate) fn validate_ca_bundle(pem: &[u8]) -> Result<String, PemError> {
    let certs = parse_certs(pem)?;
    for der in &certs {
        x509_parser::parse_x509_certificate(der)
            .map_err(|e| PemError::Certificate(e.to_string()))?;
    }
    Ok(encode_certs(&certs))
}

fn validate_key_pair(cert_chain: &[u8], private_key: &[u8]) -> Result<String, PemError> {
    let certs = parse_certs(cert_chain)?;
    let leaf = certs.first().ok_or(PemError::NoCertificate)?;
    let (_, cert) = x509_parser::parse_x509_certificate(leaf)
        .map_err(|e| PemError::Certificate(e.to_string()))?;
    for der in &certs[1..] {
        x509_parser::parse_x509_certificate(der)
            .map_err(|e| PemError::Certificate(e.to_string()))?;
    }

    let key = parse_key(private_key)?;
    if let Some(public_key) = key_pair_public_key(&key)? {
        if public_key != cert.public_key().subject_public_key.data.as_ref() {
            return Err(PemError::KeyMismatch);
        }
    }

    Ok(encode_certs(&certs))
}

fn read_pem(mut pem: &[u8]) -> Result<Vec<Item>, PemError> {
    let mut reader = std::io::BufReader::new(Cursor::new(&mut pem));
    rustls_pemfile::read_all(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PemError::Pem(e.to_string()))
}

fn parse_certs(pem: &[u8]) -> Result<Vec<Vec<u8>>, PemError> {
    let certs = read_pem(pem)?
        .into_iter()
        .filter_map(|item| match item {
            Item::X509Certificate(der) => Some(der.as_ref().to_vec()),
            _ => None,
        })
        .collect::<Vec<_>>();
    if certs.is_empty() {
        return Err(PemError::NoCertificate);
    }
    Ok(certs)
}

enum PrivateKey {
    Pkcs8(Vec<u8>),
    Pkcs1(Vec<u8>),
    Sec1,
}

fn parse_key(pem: &[u8]) -> Result<PrivateKey, PemError> {
    read_pem(pem)?
        .into_iter()
        .find_map(|item| match item {
            Item::Pkcs8Key(k) => Some(PrivateKey::Pkcs8(k.secret_pkcs8_der().to_vec())),
            Item::Pkcs1Key(k) => Some(PrivateKey::Pkcs1(k.secret_pkcs1_der().to_vec())),
            Item::Sec1Key(_) => Some(PrivateKey::Sec1),
            _ => None,
        })
        .ok_or(PemError::NoPrivateKey)
}

/// Derives the public key of a private key, as encoded in a certificate's
/// subject public key info. SEC1 keys are not checked.
fn key_pair_public_key(key: &PrivateKey) -> Result<Option<Vec<u8>>, PemError> {
    match key {
        PrivateKey::Pkcs8(der) => {
            let rng = SystemRandom::new();
            for alg in [
                &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                &signature::ECDSA_P384_SHA384_ASN1_SIGNING,
            ] {
                if let Ok(pair) = EcdsaKeyPair::from_pkcs8(alg, der, &rng) {
                    return Ok(Some(pair.public_key().as_ref().to_vec()));
                }
            }
            if let Ok(pair) = RsaKeyPair::from_pkcs8(der) {
                return Ok(Some(pair.public_key().as_ref().to_vec()));
            }
            if let Ok(pair) = Ed25519KeyPair::from_pkcs8_maybe_unchecked(der) {
                return Ok(Some(pair.public_key().as_ref().to_vec()));
            }
            Err(PemError::PrivateKey)
        }
        PrivateKey::Pkcs1(der) => RsaKeyPair::from_der(der)
            .map(|pair| Some(pair.public_key().as_ref().to_vec()))
            .map_err(|_| PemError::PrivateKey),
        PrivateKey::Sec1 => Ok(None),
    }
}

fn encode_certs(certs: &[Vec<u8>]) -> String {
    let mut out = String::new();
    for der in certs {
        let b64 = base64::engine::general_purpose::STANDARD.encode(der);
        out.push_str("-----BEGIN CERTIFICATE-----\n");
        for line in b64.as_bytes().chunks(64) {
            out.push_str(&String::from_utf8_lossy(line));
            out.push('\n');
        }
        out.push_str("-----END CERTIFICATE-----\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn self_signed(name: &str) -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec![name.to_string()]).expect("certificate")
    }

    #[test]
    fn accepts_matching_key_pair() {
        let ck = self_signed("example.com");
        let data = btreemap! {
            TLS_CERT_KEY.to_string() => ck.cert.pem().into_bytes(),
            TLS_PRIVATE_KEY_KEY.to_string() => ck.key_pair.serialize_pem().into_bytes(),
        };
        let cert = validate_tls_secret("default", "tls", &data).expect("valid secret");
        assert!(cert.cert_chain.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert_eq!(cert.ca, None);
    }

    #[test]
    fn rejects_mismatched_key() {
        let a = self_signed("a.example.com");
        let b = self_signed("b.example.com");
        let data = btreemap! {
            TLS_CERT_KEY.to_string() => a.cert.pem().into_bytes(),
            TLS_PRIVATE_KEY_KEY.to_string() => b.key_pair.serialize_pem().into_bytes(),
        };
        let err = validate_tls_secret("default", "tls", &data).expect_err("mismatched key");
        assert_eq!(
            err,
            TlsSecretError::Invalid {
                namespace: "default".to_string(),
                name: "tls".to_string(),
                message: "private key does not match public key".to_string(),
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        let data = btreemap! {
            TLS_CERT_KEY.to_string() => b"not a certificate".to_vec(),
            TLS_PRIVATE_KEY_KEY.to_string() => b"not a key".to_vec(),
        };
        assert!(validate_tls_secret("default", "tls", &data).is_err());
    }

    #[test]
    fn ca_only_secrets_skip_key_validation() {
        let data = btreemap! {
            CA_CERT_KEY.to_string() => b"-----BEGIN CERTIFICATE-----".to_vec(),
        };
        let cert = validate_tls_secret("default", "ca", &data).expect("ca-only secret");
        assert!(cert.cert_chain.is_empty());
        assert!(cert.ca.is_some());
    }

    #[test]
    fn ca_bundles() {
        let a = self_signed("a");
        let b = self_signed("b");
        let bundle = format!("{}{}", a.cert.pem(), b.cert.pem());
        let cleaned = validate_ca_bundle(bundle.as_bytes()).expect("valid bundle");
        assert_eq!(cleaned.matches("BEGIN CERTIFICATE").count(), 2);
        assert_eq!(validate_ca_bundle(b""), Err(PemError::NoCertificate));
    }
}
