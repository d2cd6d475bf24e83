//! The signed event record and its canonical identity.

use std::str::FromStr;

use lazy_static::lazy_static;
use secp256k1::{schnorr, KeyPair, Message, Secp256k1, SecretKey, VerifyOnly, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

lazy_static! {
    static ref SECP: Secp256k1<VerifyOnly> = Secp256k1::verification_only();
}

/// A signed event, the sole unit of data on the wire.
///
/// `id` is the lowercase hex SHA-256 of the canonical serialization and
/// `sig` a BIP-340 Schnorr signature over the raw id bytes, keyed by the
/// x-only `pubkey`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: i64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Canonical id: SHA-256 over the compact JSON array
    /// `[0, pubkey, "", created_at, kind, tags, content]`.
    pub fn canonical_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.pubkey,
            "",
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Fill in `pubkey`, `id` and `sig` from `key`. Any previous identity
    /// on the event is overwritten.
    pub fn sign(&mut self, key: &SecretKey) -> Result<(), Error> {
        let secp = Secp256k1::new();
        let keypair = KeyPair::from_secret_key(&secp, key);
        let (xonly, _) = XOnlyPublicKey::from_keypair(&keypair);
        self.pubkey = hex::encode(xonly.serialize());
        self.id = self.canonical_id();
        let digest = hex::decode(&self.id)?;
        let msg = Message::from_slice(&digest)?;
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &keypair);
        self.sig = sig.to_string();
        Ok(())
    }

    /// Recompute the id and verify the signature. Any decoding failure is
    /// a verification failure.
    pub fn verify(&self) -> bool {
        if self.canonical_id() != self.id {
            return false;
        }
        let Ok(pubkey) = XOnlyPublicKey::from_str(&self.pubkey) else {
            return false;
        };
        let Ok(sig) = schnorr::Signature::from_str(&self.sig) else {
            return false;
        };
        let Ok(digest) = hex::decode(&self.id) else {
            return false;
        };
        let Ok(msg) = Message::from_slice(&digest) else {
            return false;
        };
        SECP.verify_schnorr(&sig, &msg, &pubkey).is_ok()
    }

    /// Value of the first tag named `name`, if any.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_secret_key, public_key_hex};

    #[test]
    fn canonical_id_is_stable() {
        let e = Event {
            pubkey: "ab".repeat(32),
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![vec!["q".into(), "foo".into()]],
            content: "hello".into(),
            ..Default::default()
        };
        assert_eq!(e.canonical_id(), e.canonical_id());
        assert_eq!(e.canonical_id().len(), 64);

        let mut other = e.clone();
        other.content = "hello!".into();
        assert_ne!(e.canonical_id(), other.canonical_id());
    }

    #[test]
    fn canonical_uses_standard_escaping() {
        let e = Event {
            content: "<&>".into(),
            ..Default::default()
        };
        let canonical = serde_json::json!([
            0,
            e.pubkey,
            "",
            e.created_at,
            e.kind,
            e.tags,
            e.content,
        ])
        .to_string();
        assert!(canonical.contains("<&>"));
    }

    #[test]
    fn sign_then_verify() {
        let key = generate_secret_key();
        let mut e = Event {
            kind: 1,
            content: "hello".into(),
            ..Default::default()
        };
        e.sign(&key).unwrap();
        assert_eq!(e.pubkey, public_key_hex(&key));
        assert_eq!(e.id, e.canonical_id());
        assert!(e.verify());
    }

    #[test]
    fn tampering_fails_verification() {
        let key = generate_secret_key();
        let mut e = Event {
            kind: 1,
            content: "original".into(),
            ..Default::default()
        };
        e.sign(&key).unwrap();

        let mut tampered = e.clone();
        tampered.content = "forged".into();
        assert!(!tampered.verify());

        let mut bad_id = e.clone();
        bad_id.id = "00".repeat(32);
        assert!(!bad_id.verify());

        let mut bad_sig = e;
        bad_sig.sig = "not hex".into();
        assert!(!bad_sig.verify());
    }

    #[test]
    fn first_tag_value_skips_short_tags() {
        let e = Event {
            tags: vec![
                vec!["d".into()],
                vec!["d".into(), "first".into()],
                vec!["d".into(), "second".into()],
            ],
            ..Default::default()
        };
        assert_eq!(e.first_tag_value("d"), Some("first"));
        assert_eq!(e.first_tag_value("e"), None);
    }
}
