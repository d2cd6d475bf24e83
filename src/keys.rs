//! Key generation and the hex encodings the protocol speaks.

use rand::RngCore;
use secp256k1::{KeyPair, Secp256k1, SecretKey, XOnlyPublicKey};

/// Generate a fresh secret key from the thread RNG.
pub fn generate_secret_key() -> SecretKey {
    SecretKey::new(&mut rand::thread_rng())
}

/// Hex encoding of the x-only public key for `key`, as carried in
/// `Event::pubkey`.
pub fn public_key_hex(key: &SecretKey) -> String {
    let secp = Secp256k1::new();
    let keypair = KeyPair::from_secret_key(&secp, key);
    let (xonly, _) = XOnlyPublicKey::from_keypair(&keypair);
    hex::encode(xonly.serialize())
}

/// Opaque random identifier: 16 bytes, hex encoded.
pub fn rand_id() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_hex_is_x_only() {
        let key = generate_secret_key();
        let hex = public_key_hex(&key);
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn rand_ids_are_unique() {
        let a = rand_id();
        let b = rand_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
