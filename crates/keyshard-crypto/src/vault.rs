//! Threshold-sealed multi-party vault.
//!
//! Sealing draws a random payload key, encrypts the payload with it, then
//! splits the payload key among the holders with the same GF(257) sharing
//! used for custody shards. Each holder's key share is sealed under that
//! holder's PBKDF2-derived key. Opening therefore requires at least
//! `threshold` holders to present their passphrases; no smaller subset
//! holds enough of the payload key to decrypt anything.

use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use keyshard_core::error::{CustodyError, CustodyResult};

use crate::{envelope, kdf, shamir, KEY_SIZE};

/// One designated key holder: an identifier plus the passphrase their key
/// share is sealed under.
pub struct VaultHolder {
    pub holder_id: String,
    pub passphrase: SecretString,
}

impl VaultHolder {
    pub fn new(holder_id: &str, passphrase: SecretString) -> Self {
        Self {
            holder_id: holder_id.to_string(),
            passphrase,
        }
    }
}

/// A holder's sealed share of the payload key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedShare {
    pub holder_id: String,
    pub sealed_share: String,
}

/// A sealed vault: payload ciphertext plus the per-holder key shares.
/// Safe to persist and to hand to any single holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedVault {
    pub ciphertext: String,
    pub threshold: u8,
    pub kdf_salt: Vec<u8>,
    pub shares: Vec<SealedShare>,
}

/// Seal `payload` so that any `threshold` of `holders` can jointly open it.
///
/// # Errors
///
/// `Configuration` if the holder count and threshold violate the sharing
/// invariants (`2 <= threshold <= holders <= 10`), or if a holder id
/// appears twice.
pub fn seal_vault(
    payload: &[u8],
    holders: &[VaultHolder],
    threshold: u8,
    kdf_salt: &[u8],
) -> CustodyResult<SealedVault> {
    for (i, holder) in holders.iter().enumerate() {
        if holders[..i].iter().any(|h| h.holder_id == holder.holder_id) {
            return Err(CustodyError::Configuration(format!(
                "duplicate vault holder {}",
                holder.holder_id
            )));
        }
    }
    let total = u8::try_from(holders.len()).map_err(|_| {
        CustodyError::Configuration(format!("too many vault holders: {}", holders.len()))
    })?;

    let mut payload_key = Zeroizing::new([0u8; KEY_SIZE]);
    rand::rngs::OsRng.fill_bytes(payload_key.as_mut());

    let ciphertext = envelope::seal(&payload_key, payload)?;
    let key_shares = shamir::split(payload_key.as_slice(), total, threshold)?;

    let mut shares = Vec::with_capacity(holders.len());
    for (holder, share) in holders.iter().zip(&key_shares) {
        let sealed = kdf::seal_with_password(
            &holder.passphrase,
            kdf_salt,
            share.encode().as_bytes(),
        )?;
        shares.push(SealedShare {
            holder_id: holder.holder_id.clone(),
            sealed_share: sealed,
        });
    }

    Ok(SealedVault {
        ciphertext,
        threshold,
        kdf_salt: kdf_salt.to_vec(),
        shares,
    })
}

/// Open a vault with the presented holders.
///
/// # Errors
///
/// `InvalidShardCount` if fewer than `threshold` holders are presented,
/// `InvalidShardFormat` for an unknown holder id, `DecryptionFailure` for a
/// wrong passphrase or corrupted material.
pub fn open_vault(
    vault: &SealedVault,
    holders: &[VaultHolder],
) -> CustodyResult<Zeroizing<Vec<u8>>> {
    if holders.len() < vault.threshold as usize {
        return Err(CustodyError::InvalidShardCount {
            expected: vault.threshold as usize,
            actual: holders.len(),
        });
    }

    let mut key_shares = Vec::with_capacity(holders.len());
    for holder in holders {
        let sealed = vault
            .shares
            .iter()
            .find(|s| s.holder_id == holder.holder_id)
            .ok_or_else(|| {
                CustodyError::InvalidShardFormat(format!(
                    "unknown vault holder {}",
                    holder.holder_id
                ))
            })?;
        let wire = kdf::open_with_password(&holder.passphrase, &vault.kdf_salt, &sealed.sealed_share)?;
        let wire_str = std::str::from_utf8(&wire)
            .map_err(|_| CustodyError::InvalidShardFormat("key share is not UTF-8".into()))?;
        key_shares.push(shamir::Share::decode(wire_str)?);
    }

    let key_bytes = Zeroizing::new(shamir::recover(&key_shares)?);
    if key_bytes.len() != KEY_SIZE {
        return Err(CustodyError::DecryptionFailure);
    }
    let mut payload_key = Zeroizing::new([0u8; KEY_SIZE]);
    payload_key.copy_from_slice(&key_bytes);

    envelope::open(&payload_key, &vault.ciphertext)
}
