// Trust anchor selection and installation into a credential slot

use core::fmt::Write;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CredentialError, OtaError};
use crate::platform::{StoreError, TrustAnchorSource, TrustStore};

/// Root CAs the distribution endpoint may chain to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrustAnchorId {
    #[default]
    StarfieldServicesRootCa,
    AmazonRootCa1,
}

impl TrustAnchorId {
    pub fn label(&self) -> &'static str {
        match self {
            TrustAnchorId::StarfieldServicesRootCa => "Starfield Services Root CA",
            TrustAnchorId::AmazonRootCa1 => "Amazon Root CA 1",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialDescriptor<'a> {
    pub slot: u8,
    pub material: &'a [u8],
    pub label: &'static str,
}

/// Pick the configured anchor. Missing or empty material is an error.
pub fn select<'a>(
    source: &'a dyn TrustAnchorSource,
    id: TrustAnchorId,
    slot: u8,
) -> Result<CredentialDescriptor<'a>, OtaError> {
    let material = source.material(id).unwrap_or_default();
    if material.is_empty() {
        error!("Certificate '{}' has no material", id.label());
        return Err(OtaError::Credentials(CredentialError::EmptyMaterial(id.label())));
    }

    info!("Using {} certificate ({} bytes)", id.label(), material.len());
    Ok(CredentialDescriptor {
        slot,
        material,
        label: id.label(),
    })
}

/// Uppercase hex SHA-256 of the certificate bytes, colon separated
pub fn fingerprint(material: &[u8]) -> String {
    let digest = Sha256::digest(material);
    let mut out = String::with_capacity(digest.len() * 3);
    for (i, byte) in digest.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Replace whatever the slot holds with the descriptor's certificate.
pub fn load_certificate(
    store: &dyn TrustStore,
    descriptor: &CredentialDescriptor<'_>,
) -> Result<(), OtaError> {
    if descriptor.material.is_empty() {
        return Err(OtaError::Credentials(CredentialError::EmptyMaterial(descriptor.label)));
    }

    match store.delete(descriptor.slot) {
        Ok(()) => debug!("Cleared credential slot {}", descriptor.slot),
        Err(StoreError::NotFound) => debug!("Credential slot {} was empty", descriptor.slot),
        Err(e) => warn!("Clearing credential slot {}: {}", descriptor.slot, e),
    }

    if let Err(e) = store.set(descriptor.slot, descriptor.material) {
        match &e {
            StoreError::InvalidParameter => {
                error!("Certificate rejected: invalid parameter or format")
            }
            StoreError::Allocation => error!("Certificate rejected: out of memory"),
            StoreError::InvalidCredentials => error!("Certificate rejected: not a valid PEM/DER"),
            StoreError::NotFound | StoreError::Other(_) => error!("Certificate rejected: {}", e),
        }
        let cause = match e {
            StoreError::Allocation => CredentialError::Allocation,
            other => CredentialError::Rejected(other),
        };
        return Err(OtaError::Credentials(cause));
    }

    info!(
        "{} loaded into slot {} (sha256 {})",
        descriptor.label,
        descriptor.slot,
        fingerprint(descriptor.material)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimAnchors, SimPlatform};

    #[test]
    fn test_select_default_anchor() {
        let anchors = SimAnchors::placeholders();
        let descriptor = select(&anchors, TrustAnchorId::default(), 0).unwrap();
        assert_eq!(descriptor.label, "Starfield Services Root CA");
        assert!(!descriptor.material.is_empty());
    }

    #[test]
    fn test_select_missing_anchor_fails() {
        let anchors = SimAnchors::empty().with(TrustAnchorId::AmazonRootCa1, b"pem");
        let err = select(&anchors, TrustAnchorId::StarfieldServicesRootCa, 0).unwrap_err();
        assert!(matches!(err, OtaError::Credentials(CredentialError::EmptyMaterial(_))));
    }

    #[test]
    fn test_empty_material_leaves_slot_unchanged() {
        let sim = SimPlatform::new();
        sim.trust_store.preload(0, b"previous");
        let descriptor = CredentialDescriptor { slot: 0, material: b"", label: "empty" };

        let err = load_certificate(sim.trust_store.as_ref(), &descriptor).unwrap_err();
        assert!(matches!(err, OtaError::Credentials(_)));
        assert_eq!(sim.trust_store.slot(0).as_deref(), Some(&b"previous"[..]));
    }

    #[test]
    fn test_load_replaces_slot() {
        let sim = SimPlatform::new();
        sim.trust_store.preload(1, b"old");
        let descriptor = CredentialDescriptor { slot: 1, material: b"new", label: "new" };

        load_certificate(sim.trust_store.as_ref(), &descriptor).unwrap();
        assert_eq!(sim.trust_store.slot(1).as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_load_into_empty_slot_tolerates_not_found() {
        let sim = SimPlatform::new();
        let descriptor = CredentialDescriptor { slot: 3, material: b"pem", label: "pem" };
        load_certificate(sim.trust_store.as_ref(), &descriptor).unwrap();
        assert_eq!(sim.trust_store.sets(), 1);
    }

    #[test]
    fn test_store_rejection_is_credentials_error() {
        let sim = SimPlatform::new();
        sim.trust_store.reject_sets_with(Some(StoreError::InvalidCredentials));
        let descriptor = CredentialDescriptor { slot: 0, material: b"junk", label: "junk" };

        let err = load_certificate(sim.trust_store.as_ref(), &descriptor).unwrap_err();
        assert_eq!(
            err,
            OtaError::Credentials(CredentialError::Rejected(StoreError::InvalidCredentials))
        );

        sim.trust_store.reject_sets_with(Some(StoreError::Allocation));
        let err = load_certificate(sim.trust_store.as_ref(), &descriptor).unwrap_err();
        assert_eq!(err, OtaError::Credentials(CredentialError::Allocation));
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(b"abc");
        assert!(fp.starts_with("BA:78:16:BF"));
        assert_eq!(fp.len(), 32 * 3 - 1);
    }
}
