//! keyshard-crypto: cryptographic core for sharded key custody
//!
//! Layering:
//! ```text
//! Private key (caller-supplied bytes)
//!   ├── shamir: byte-wise split over GF(257), Lagrange recovery at x=0
//!   ├── envelope: AES-256-GCM, key = SHA-256(master ‖ ":user:" ‖ user_id)
//!   │     format: base64( nonce[12] ‖ tag[16] ‖ ciphertext )
//!   ├── kdf: PBKDF2-HMAC-SHA256 (100k iterations) → same envelope format
//!   └── vault: payload key split among holders, each share PBKDF2-sealed
//! ```
//!
//! Pure computation: no I/O, no clocks, no persistence.

pub mod digest;
pub mod envelope;
pub mod kdf;
pub mod shamir;
pub mod vault;

pub use digest::{ct_eq, sha256_hex};
pub use envelope::EnvelopeKeyring;
pub use shamir::{Share, SharePoint};
pub use vault::{open_vault, seal_vault, SealedVault, VaultHolder};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
