use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::license::policy::Tier;

type HmacSha256 = Hmac<Sha256>;

/// Freshness window before a cached entitlement must be re-validated.
pub(crate) const ENTITLEMENT_TTL_SECS: i64 = 3600;

const SIGNING_KEY_CONTEXT: &[u8] = b"mobiscope-entitlement-cache-v1";
const CACHE_FILE_NAME: &str = "entitlement.json";

/// The cached decision of which tier this machine currently holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EntitlementRecord {
    pub(crate) tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) license_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) last_validated: DateTime<Utc>,
}

impl EntitlementRecord {
    pub(crate) fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.last_validated < Duration::seconds(ENTITLEMENT_TTL_SECS)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    data: EntitlementRecord,
    signature: String,
}

/// Signed, local, time-limited record of the last known license tier.
///
/// The envelope signature is keyed by the machine identity, which makes
/// the cache file non-portable across machines and tamper-evident. Any
/// integrity failure discards the file and resolves to no entitlement.
pub(crate) struct EntitlementCache {
    path: PathBuf,
    machine_id: String,
}

impl EntitlementCache {
    pub(crate) fn new(base_dir: PathBuf, machine_id: &str) -> Self {
        Self {
            path: base_dir.join(CACHE_FILE_NAME),
            machine_id: machine_id.to_owned(),
        }
    }

    pub(crate) fn default_base_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".mobiscope"))
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record, or `None` when it is absent, unsigned,
    /// tampered with, or signed for a different machine. Every rejected
    /// file is deleted so it cannot be retried.
    pub(crate) fn load(&self) -> Option<EntitlementRecord> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                debug!(error = %err, "Failed to read entitlement cache");
                return None;
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, "Discarding unparseable entitlement cache");
                self.clear();
                return None;
            }
        };

        if envelope.signature.is_empty() {
            debug!("Discarding unsigned entitlement cache");
            self.clear();
            return None;
        }

        let expected = match self.sign(&envelope.data) {
            Ok(signature) => signature,
            Err(err) => {
                debug!(error = %format!("{err:#}"), "Failed to recompute cache signature");
                self.clear();
                return None;
            }
        };

        if !constant_time_eq(expected.as_bytes(), envelope.signature.as_bytes()) {
            debug!("Entitlement cache signature mismatch, discarding");
            self.clear();
            return None;
        }

        Some(envelope.data)
    }

    /// Serialize, sign, and atomically persist `record` with owner-only
    /// permissions. Callers treat failures as best-effort: a missing cache
    /// only means re-validation on the next request.
    pub(crate) fn save(&self, record: &EntitlementRecord) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .context("Entitlement cache path has no parent directory")?;

        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create cache directory '{}'", dir.display()))?;
            set_owner_only(dir, 0o700)?;
        }

        let envelope = CacheEnvelope {
            signature: self.sign(record)?,
            data: record.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        // Write-then-rename so a concurrent reader never observes a torn
        // file. The temp file is created owner-only from the start; chmod
        // after the fact would leave a window with umask-default bits.
        let tmp = self.path.with_extension("json.tmp");
        let _ = std::fs::remove_file(&tmp);

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&tmp)
            .with_context(|| format!("Failed to create entitlement cache at '{}'", tmp.display()))?;
        file.write_all(&bytes)
            .with_context(|| format!("Failed to write entitlement cache to '{}'", tmp.display()))?;
        drop(file);

        std::fs::rename(&tmp, &self.path).context("Failed to move entitlement cache into place")?;

        Ok(())
    }

    /// Remove the persisted record. A missing file is not an error.
    pub(crate) fn clear(&self) {
        if let Err(err) = std::fs::remove_file(&self.path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            debug!(error = %err, "Failed to remove entitlement cache");
        }
    }

    fn signing_key(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(SIGNING_KEY_CONTEXT);
        hasher.update(self.machine_id.as_bytes());
        hasher.finalize().into()
    }

    fn sign(&self, record: &EntitlementRecord) -> anyhow::Result<String> {
        let bytes = serde_json::to_vec(record)?;

        let mut mac = HmacSha256::new_from_slice(&self.signing_key())
            .map_err(|_| anyhow!("Unexpected error: invalid HMAC key length"))?;
        mac.update(&bytes);

        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Constant-time byte comparison. Length is checked first so mismatched
/// lengths never enter the variable-length scan.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn set_owner_only(path: &Path, mode: u32) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).with_context(
            || format!("Failed to set permissions on '{}'", path.display()),
        )?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);

    Ok(())
}
