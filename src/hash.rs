//! TLSA certificate association data
//!
//! Picks the certificate a TLSA usage refers to from a domain's files and
//! computes the record data for its selector and matching type.

use crate::error::{DaneResult, Error};
use crate::models::{CertSource, CertTriple, TlsaSpec};
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;

/// Computes the hash a TLSA record must carry for a certificate
pub trait HashProvider {
    fn hash(&self, spec: &TlsaSpec, certs: &[CertTriple], source: CertSource)
        -> DaneResult<String>;
}

/// Hash provider reading PEM files from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct X509Hasher;

impl X509Hasher {
    pub fn new() -> Self {
        Self
    }
}

impl HashProvider for X509Hasher {
    fn hash(
        &self,
        spec: &TlsaSpec,
        certs: &[CertTriple],
        source: CertSource,
    ) -> DaneResult<String> {
        let (path, index) = select_certificate(spec.usage, certs, source)?;
        let der = read_certificate(path, index)?;
        association_data(&der, spec.selector, spec.matching)
    }
}

/// File and position of the certificate a usage asserts.
///
/// DANE-EE (3) asserts the leaf: `cert.pem`, or the first block of
/// `fullchain.pem`. DANE-TA (2) asserts the issuer: the first block of
/// `chain.pem`, or the second of `fullchain.pem`.
pub fn select_certificate<'a>(
    usage: u8,
    certs: &'a [CertTriple],
    source: CertSource,
) -> DaneResult<(&'a Path, usize)> {
    let find = |name: &str| {
        certs
            .iter()
            .find(|c| c.file_name() == Some(name))
            .map(|c| c.path(source))
    };

    let choice = match usage {
        3 => find("cert.pem")
            .map(|p| (p, 0))
            .or_else(|| find("fullchain.pem").map(|p| (p, 0))),
        2 => find("chain.pem")
            .map(|p| (p, 0))
            .or_else(|| find("fullchain.pem").map(|p| (p, 1))),
        other => {
            return Err(Error::Internal(format!(
                "no certificate selection rule for TLSA usage {}",
                other
            )))
        }
    };

    choice.ok_or_else(|| {
        Error::Internal(format!(
            "no certificate file for TLSA usage {} among {} candidates",
            usage,
            certs.len()
        ))
    })
}

/// DER bytes of the `index`-th certificate in a PEM file
fn read_certificate(path: &Path, index: usize) -> DaneResult<Vec<u8>> {
    let content = std::fs::read(path)
        .map_err(|e| Error::Internal(format!("failed to read {:?}: {}", path, e)))?;

    let blocks = pem::parse_many(&content)
        .map_err(|e| Error::Internal(format!("failed to parse PEM {:?}: {}", path, e)))?;

    blocks
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .nth(index)
        .map(|p| p.contents().to_vec())
        .ok_or_else(|| {
            Error::Internal(format!(
                "{:?} has no certificate at position {}",
                path,
                index + 1
            ))
        })
}

/// Record data for a DER certificate: selector 0 uses the whole
/// certificate, 1 its SubjectPublicKeyInfo; matching 0 leaves it as is,
/// 1 is SHA-256, 2 SHA-512. Always lowercase hex.
pub fn association_data(der: &[u8], selector: u8, matching: u8) -> DaneResult<String> {
    let selected: Vec<u8> = match selector {
        0 => der.to_vec(),
        1 => {
            let (_, cert) = x509_parser::parse_x509_certificate(der)
                .map_err(|e| Error::Internal(format!("invalid X509 certificate: {}", e)))?;
            cert.public_key().raw.to_vec()
        }
        other => return Err(Error::Internal(format!("invalid TLSA selector {}", other))),
    };

    let data = match matching {
        0 => selected,
        1 => Sha256::digest(&selected).to_vec(),
        2 => Sha512::digest(&selected).to_vec(),
        other => {
            return Err(Error::Internal(format!(
                "invalid TLSA matching type {}",
                other
            )))
        }
    };

    Ok(hex::encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn triple(dir: &Path, name: &str) -> CertTriple {
        CertTriple {
            dane: dir.join("dane").join(name),
            live: dir.join("live").join(name),
            archive: dir.join("archive").join(name),
        }
    }

    fn generate() -> (String, Vec<u8>, Vec<u8>) {
        let certified = rcgen::generate_simple_self_signed(vec!["example.com".to_string()]).unwrap();
        (
            certified.cert.pem(),
            certified.cert.der().to_vec(),
            certified.key_pair.public_key_der(),
        )
    }

    #[test]
    fn test_selection_rules() {
        let dir = PathBuf::from("/tmp/x");
        let all = vec![
            triple(&dir, "cert.pem"),
            triple(&dir, "chain.pem"),
            triple(&dir, "fullchain.pem"),
            triple(&dir, "privkey.pem"),
        ];

        let (path, idx) = select_certificate(3, &all, CertSource::Live).unwrap();
        assert_eq!(path, dir.join("live/cert.pem"));
        assert_eq!(idx, 0);

        let (path, idx) = select_certificate(2, &all, CertSource::Dane).unwrap();
        assert_eq!(path, dir.join("dane/chain.pem"));
        assert_eq!(idx, 0);

        let only_full = vec![triple(&dir, "fullchain.pem")];
        assert_eq!(select_certificate(3, &only_full, CertSource::Live).unwrap().1, 0);
        assert_eq!(select_certificate(2, &only_full, CertSource::Live).unwrap().1, 1);

        let only_key = vec![triple(&dir, "privkey.pem")];
        assert!(matches!(
            select_certificate(3, &only_key, CertSource::Live),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_association_data_variants() {
        let (_, der, spki) = generate();

        assert_eq!(association_data(&der, 0, 0).unwrap(), hex::encode(&der));
        assert_eq!(
            association_data(&der, 0, 1).unwrap(),
            hex::encode(Sha256::digest(&der))
        );
        assert_eq!(
            association_data(&der, 1, 1).unwrap(),
            hex::encode(Sha256::digest(&spki))
        );
        assert_eq!(
            association_data(&der, 1, 2).unwrap(),
            hex::encode(Sha512::digest(&spki))
        );
        assert_eq!(association_data(&der, 1, 0).unwrap(), hex::encode(&spki));
    }

    #[test]
    fn test_hash_reads_pem_files() {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("live");
        std::fs::create_dir_all(&live).unwrap();

        let (leaf_pem, _, leaf_spki) = generate();
        let (issuer_pem, _, issuer_spki) = generate();
        std::fs::write(live.join("cert.pem"), &leaf_pem).unwrap();
        std::fs::write(live.join("fullchain.pem"), format!("{}{}", leaf_pem, issuer_pem)).unwrap();

        let certs = vec![
            triple(temp.path(), "cert.pem"),
            triple(temp.path(), "fullchain.pem"),
        ];
        let hasher = X509Hasher::new();

        let ee = TlsaSpec::parse("311 443 tcp", "example.com").unwrap();
        assert_eq!(
            hasher.hash(&ee, &certs, CertSource::Live).unwrap(),
            hex::encode(Sha256::digest(&leaf_spki))
        );

        let ta = TlsaSpec::parse("211 25 tcp", "example.com").unwrap();
        assert_eq!(
            hasher.hash(&ta, &certs, CertSource::Live).unwrap(),
            hex::encode(Sha256::digest(&issuer_spki))
        );

        // nothing behind the dane paths
        assert!(hasher.hash(&ee, &certs, CertSource::Dane).is_err());
    }
}
