//! License key verification and tier admission limits.
//!
//! Wire form: base64 of `payload(6 bytes) || signature(64 bytes)`, where
//! `payload = version(1) | tier(1) | expiry(4, LE)`. Verified against an
//! embedded Ed25519 public key the same way the rest of the crate
//! verifies snapshot/WAL integrity with an embedded check value — here
//! the check is a signature rather than a CRC, so [`ed25519_dalek`]
//! replaces the hand-rolled [`crate::crc32`] for this one structure.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::error::{Error, Result};

const PAYLOAD_LEN: usize = 6;
const SIGNATURE_LEN: usize = 64;
const SUPPORTED_VERSION: u8 = 1;

/// Embedded Ed25519 public key used to verify license keys.
///
/// Placeholder keypair for this reference implementation; production
/// deployments substitute their own at build time and never check the
/// matching private key into source control.
const PUBLIC_KEY_BYTES: [u8; 32] = [
    121, 181, 86, 46, 143, 230, 84, 249, 64, 120, 177, 18, 232, 169, 139, 167, 144, 31, 133, 58,
    230, 149, 190, 215, 224, 227, 145, 11, 173, 4, 150, 100,
];

/// License tiers, in ascending node-cap order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// No valid key: 25,000 live nodes.
    Free,
    /// 1,000,000 live nodes.
    Pro,
    /// 10,000,000 live nodes.
    Team,
    /// 50,000,000 live nodes.
    Business,
    /// Unlimited live nodes.
    Unlimited,
}

impl Tier {
    fn from_u8(tier: u8) -> Option<Self> {
        match tier {
            0 => Some(Tier::Free),
            1 => Some(Tier::Pro),
            2 => Some(Tier::Team),
            3 => Some(Tier::Business),
            4 => Some(Tier::Unlimited),
            _ => None,
        }
    }

    /// Maximum live-node count permitted at this tier.
    #[must_use]
    pub fn limit(self) -> u64 {
        match self {
            Tier::Free => 25_000,
            Tier::Pro => 1_000_000,
            Tier::Team => 10_000_000,
            Tier::Business => 50_000_000,
            Tier::Unlimited => u64::MAX,
        }
    }

    /// Numeric tier tag, as encoded in the license payload and reported
    /// in [`Error::LimitExceeded`].
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Pro => 1,
            Tier::Team => 2,
            Tier::Business => 3,
            Tier::Unlimited => 4,
        }
    }
}

/// Resolves a license key (if any) to a [`Tier`], falling back to
/// [`Tier::Free`] on any validation failure per spec: a bad key silently
/// downgrades rather than failing `open`.
///
/// `now_unix_secs` is compared against the key's expiry (`0` = no
/// expiry; exactly equal is accepted).
#[must_use]
pub fn resolve_tier(key: Option<&str>, now_unix_secs: u32) -> Tier {
    match key.map(|k| verify(k, now_unix_secs)) {
        Some(Ok(tier)) => tier,
        Some(Err(err)) => {
            tracing::warn!(%err, "license key rejected, falling back to tier 0");
            Tier::Free
        }
        None => Tier::Free,
    }
}

/// Verifies `key` (base64 `payload || signature`) and returns its tier.
///
/// # Errors
///
/// Returns [`Error::InvalidLicense`] if the key is malformed, the
/// signature does not verify, the version is unsupported, the tier is
/// out of range, or the key has expired.
pub fn verify(key: &str, now_unix_secs: u32) -> Result<Tier> {
    let bytes = BASE64
        .decode(key.trim())
        .map_err(|e| Error::InvalidLicense(format!("not valid base64: {e}")))?;

    if bytes.len() != PAYLOAD_LEN + SIGNATURE_LEN {
        return Err(Error::InvalidLicense(format!(
            "expected {} bytes, found {}",
            PAYLOAD_LEN + SIGNATURE_LEN,
            bytes.len()
        )));
    }

    let (payload, sig_bytes) = bytes.split_at(PAYLOAD_LEN);
    let signature = Signature::from_slice(sig_bytes)
        .map_err(|e| Error::InvalidLicense(format!("malformed signature: {e}")))?;

    let verifying_key = VerifyingKey::from_bytes(&PUBLIC_KEY_BYTES)
        .map_err(|e| Error::InvalidLicense(format!("embedded public key invalid: {e}")))?;
    verifying_key
        .verify(payload, &signature)
        .map_err(|e| Error::InvalidLicense(format!("signature verification failed: {e}")))?;

    let version = payload[0];
    if version != SUPPORTED_VERSION {
        return Err(Error::InvalidLicense(format!(
            "unsupported license version {version}"
        )));
    }

    let tier = Tier::from_u8(payload[1])
        .ok_or_else(|| Error::InvalidLicense(format!("unknown tier {}", payload[1])))?;

    let expiry = u32::from_le_bytes(payload[2..6].try_into().unwrap());
    if expiry != 0 && now_unix_secs > expiry {
        return Err(Error::InvalidLicense(format!(
            "license expired at {expiry}, now {now_unix_secs}"
        )));
    }

    Ok(tier)
}

/// Locates a license key from the priority chain spec §6 defines:
/// explicit argument, `LICENSE_KEY` environment variable, per-user
/// config file (`~/.config/synrix/license`), or a `license` file next
/// to the running binary.
#[must_use]
pub fn find_key(explicit: Option<&str>) -> Option<String> {
    if let Some(key) = explicit {
        return Some(key.to_string());
    }
    if let Ok(key) = std::env::var("LICENSE_KEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }
    if let Some(config_dir) = dirs_next_config_dir() {
        let path = config_dir.join("synrix").join("license");
        if let Ok(key) = std::fs::read_to_string(path) {
            let trimmed = key.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let path = dir.join("license");
            if let Ok(key) = std::fs::read_to_string(path) {
                let trimmed = key.trim().to_string();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
        }
    }
    None
}

/// Minimal `$XDG_CONFIG_HOME`/`~/.config` resolution, kept local to avoid
/// pulling the `dirs` crate into `synrix-core` for one lookup (the CLI
/// crate already depends on `dirs` for its own config resolution).
fn dirs_next_config_dir() -> Option<std::path::PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(std::path::PathBuf::from(xdg));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| std::path::PathBuf::from(home).join(".config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    /// Private half of [`PUBLIC_KEY_BYTES`], kept only here so tests can
    /// mint keys that verify against the embedded public key.
    const TEST_SIGNING_SEED: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
        26, 27, 28, 29, 30, 31, 32,
    ];

    fn sign(payload: &[u8], signing_key: &SigningKey) -> String {
        let signature = signing_key.sign(payload);
        let mut bytes = payload.to_vec();
        bytes.extend_from_slice(&signature.to_bytes());
        BASE64.encode(bytes)
    }

    fn payload(version: u8, tier: u8, expiry: u32) -> Vec<u8> {
        let mut buf = vec![version, tier];
        buf.extend_from_slice(&expiry.to_le_bytes());
        buf
    }

    fn valid_key(tier: u8, expiry: u32) -> String {
        let signing_key = SigningKey::from_bytes(&TEST_SIGNING_SEED);
        sign(&payload(1, tier, expiry), &signing_key)
    }

    #[test]
    fn valid_signature_resolves_declared_tier() {
        let key = valid_key(2, 0);
        assert_eq!(verify(&key, 1_000).unwrap(), Tier::Team);
    }

    #[test]
    fn expiry_equal_to_now_is_accepted() {
        let key = valid_key(1, 500);
        assert_eq!(verify(&key, 500).unwrap(), Tier::Pro);
    }

    #[test]
    fn expiry_one_second_past_is_rejected() {
        let key = valid_key(1, 500);
        assert!(verify(&key, 501).is_err());
    }

    #[test]
    fn zero_expiry_never_expires() {
        let key = valid_key(3, 0);
        assert_eq!(verify(&key, u32::MAX).unwrap(), Tier::Business);
    }

    #[test]
    fn unknown_tier_is_invalid() {
        let key = valid_key(9, 0);
        assert!(verify(&key, 0).is_err());
    }

    #[test]
    fn malformed_base64_is_invalid() {
        let err = verify("not base64!!", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidLicense(_)));
    }

    #[test]
    fn wrong_length_is_invalid() {
        let key = BASE64.encode(vec![0u8; 10]);
        assert!(verify(&key, 0).is_err());
    }

    #[test]
    fn signature_from_wrong_key_is_rejected() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let key = sign(&payload(1, 2, 0), &signing_key);
        // This won't verify against PUBLIC_KEY_BYTES since it's a different keypair.
        assert!(verify(&key, 0).is_err());
    }

    #[test]
    fn no_key_resolves_to_free_tier() {
        assert_eq!(resolve_tier(None, 0), Tier::Free);
    }

    #[test]
    fn invalid_key_falls_back_to_free_tier() {
        assert_eq!(resolve_tier(Some("garbage"), 0), Tier::Free);
    }

    #[test]
    fn tier_limits_match_spec_table() {
        assert_eq!(Tier::Free.limit(), 25_000);
        assert_eq!(Tier::Pro.limit(), 1_000_000);
        assert_eq!(Tier::Team.limit(), 10_000_000);
        assert_eq!(Tier::Business.limit(), 50_000_000);
        assert_eq!(Tier::Unlimited.limit(), u64::MAX);
    }
}
