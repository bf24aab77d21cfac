//! Integration tests exercising the encryption service the way the secure
//! store uses it: serialize a structured value, encrypt to a string, persist,
//! and recover it later with the same key.

use carelink_common::crypto::{CryptoError, EncryptionService};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredRecord {
    member_id: String,
    display_name: String,
    diagnosis_codes: Vec<String>,
}

fn sample_record() -> StoredRecord {
    StoredRecord {
        member_id: "m-4421".to_string(),
        display_name: "Jordan Reyes".to_string(),
        diagnosis_codes: vec!["E11.9".to_string(), "I10".to_string()],
    }
}

#[test]
fn structured_value_survives_encrypt_persist_decrypt() {
    let key = EncryptionService::generate_key();
    let record = sample_record();

    let stored = {
        let service = EncryptionService::new(key.clone()).unwrap();
        let json = serde_json::to_vec(&record).unwrap();
        service.encrypt_to_string(&json).unwrap()
    };

    // A fresh service built from the same key, as after a page reload.
    let service = EncryptionService::new(key).unwrap();
    let plaintext = service.decrypt_from_string(&stored).unwrap();
    let recovered: StoredRecord = serde_json::from_slice(&plaintext).unwrap();

    assert_eq!(recovered, record);
}

#[test]
fn ciphertext_never_contains_plaintext_fragments() {
    let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();
    let json = serde_json::to_vec(&sample_record()).unwrap();

    let stored = service.encrypt_to_string(&json).unwrap();
    assert!(!stored.contains("m-4421"));
    assert!(!stored.contains("Jordan"));
    assert!(!stored.contains("E11.9"));
}

#[test]
fn identical_plaintexts_produce_distinct_ciphertexts() {
    // Fresh nonce per call, so persisted values are never correlatable.
    let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();
    let a = service.encrypt(b"repeat").unwrap();
    let b = service.encrypt(b"repeat").unwrap();

    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();
    let mut encrypted = service.encrypt(b"authentic payload").unwrap();

    let last = encrypted.ciphertext.len() - 1;
    encrypted.ciphertext[last] ^= 0xFF;

    assert!(matches!(service.decrypt(&encrypted), Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn garbage_persisted_string_is_rejected() {
    let service = EncryptionService::new(EncryptionService::generate_key()).unwrap();

    assert!(matches!(
        service.decrypt_from_string("not base64 at all!!"),
        Err(CryptoError::Encoding(_))
    ));
    assert!(matches!(
        service.decrypt_from_string("aGVsbG8gd29ybGQ="),
        Err(CryptoError::Encoding(_))
    ));
}
