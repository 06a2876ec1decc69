//! Password-derived envelope keys: PBKDF2-HMAC-SHA256 → AES-256-GCM.
//!
//! Used for the multi-party vault, where each holder's key share is sealed
//! under a key derived from that holder's passphrase. The salt is supplied
//! by the caller and stored alongside the sealed data; it is not secret.

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use keyshard_core::error::CustodyResult;

use crate::{envelope, KEY_SIZE};

/// PBKDF2 iteration count. Deliberately expensive: these keys protect
/// long-lived vault shares against offline guessing.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derive a 256-bit envelope key from a passphrase and salt.
pub fn derive_password_key(
    passphrase: &SecretString,
    salt: &[u8],
) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(
        passphrase.expose_secret().as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
        key.as_mut(),
    );
    key
}

/// Seal `plaintext` under a passphrase-derived key.
pub fn seal_with_password(
    passphrase: &SecretString,
    salt: &[u8],
    plaintext: &[u8],
) -> CustodyResult<String> {
    envelope::seal(&derive_password_key(passphrase, salt), plaintext)
}

/// Open an envelope sealed with [`seal_with_password`]. Fails closed like
/// any envelope open.
pub fn open_with_password(
    passphrase: &SecretString,
    salt: &[u8],
    sealed: &str,
) -> CustodyResult<Zeroizing<Vec<u8>>> {
    envelope::open(&derive_password_key(passphrase, salt), sealed)
}
