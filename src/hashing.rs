//! Hashing - SHA-256 digests for photos, exports and issued records
//!
//! Digests let an operator (or an auditor) confirm that a re-export or a
//! re-attached photo is byte-identical to the first one.

use sha2::{Digest, Sha256};

use crate::encoder::CredentialRecord;

pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

/// Identity of an issued credential pair, used as the issuance-log key.
///
/// Each field is length-prefixed, so shifting characters between adjacent
/// fields always changes the digest.
pub fn record_fingerprint(record: &CredentialRecord) -> String {
    let encoded_at = record.encoded_at.to_rfc3339();
    let fields = [
        record.student_id.as_str(),
        record.student_name.as_str(),
        record.system_a_serial.as_str(),
        record.system_b_serial.as_str(),
        encoded_at.as_str(),
    ];

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(student_id: &str, student_name: &str) -> CredentialRecord {
        CredentialRecord {
            student_id: student_id.into(),
            student_name: student_name.into(),
            system_a_serial: "NFC-1".into(),
            system_b_serial: "SALTO-1".into(),
            encoded_at: Utc.with_ymd_and_hms(2024, 7, 12, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = record("CS22-1234", "Jane Smith");
        assert_eq!(record_fingerprint(&a), record_fingerprint(&a.clone()));
        assert_eq!(record_fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        let a = record("CS22-1234", "Jane Smith");
        let b = record("CS22-1234J", "ane Smith");
        assert_ne!(record_fingerprint(&a), record_fingerprint(&b));
    }
}
