pub(crate) mod cache;
pub(crate) mod policy;
pub(crate) mod validator;

use chrono::Utc;
use tracing::debug;

use cache::EntitlementCache;
use policy::Tier;
use validator::LicenseValidator;

/// Resolve the effective tier for one request.
///
/// A fresh cached entitlement is used as-is. A stale one must re-validate;
/// if that fails the cache is discarded, so a revoked license degrades to
/// the free tier within one TTL window plus one failed round trip. Every
/// unexpected error also resolves to `free`: the policy fails closed,
/// never open.
pub(crate) async fn resolve_tier<V: LicenseValidator>(
    cache: &EntitlementCache,
    validator: &V,
    cli_license_key: Option<&str>,
) -> Tier {
    match try_resolve_tier(cache, validator, cli_license_key).await {
        Ok(tier) => tier,
        Err(err) => {
            debug!(error = %format!("{err:#}"), "Tier resolution failed, falling back to the free tier");
            Tier::Free
        }
    }
}

async fn try_resolve_tier<V: LicenseValidator>(
    cache: &EntitlementCache,
    validator: &V,
    cli_license_key: Option<&str>,
) -> anyhow::Result<Tier> {
    let now = Utc::now();

    if let Some(record) = cache.load() {
        if record.is_fresh(now) {
            return Ok(record.tier);
        }

        if let Some(key) = record.license_key.as_deref().or(cli_license_key)
            && let Some(refreshed) = validator.validate(key).await
        {
            let tier = refreshed.tier;
            if let Err(err) = cache.save(&refreshed) {
                debug!(error = %format!("{err:#}"), "Failed to persist the refreshed entitlement");
            }
            return Ok(tier);
        }

        // Stale and not re-validatable: drop the local entitlement.
        debug!("Stale entitlement could not be re-validated, reverting to the free tier");
        cache.clear();
        return Ok(Tier::Free);
    }

    if let Some(key) = cli_license_key
        && let Some(record) = validator.validate(key).await
    {
        let tier = record.tier;
        if let Err(err) = cache.save(&record) {
            debug!(error = %format!("{err:#}"), "Failed to persist the validated entitlement");
        }
        return Ok(tier);
    }

    Ok(Tier::Free)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration;

    use super::*;
    use super::cache::{ENTITLEMENT_TTL_SECS, EntitlementRecord};

    struct StubValidator {
        result: Option<EntitlementRecord>,
        calls: AtomicUsize,
    }

    impl StubValidator {
        fn returning(result: Option<EntitlementRecord>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LicenseValidator for StubValidator {
        async fn validate(&self, _license_key: &str) -> Option<EntitlementRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn record(tier: Tier, age_secs: i64) -> EntitlementRecord {
        EntitlementRecord {
            tier,
            license_key: Some("key-1234".to_owned()),
            expires_at: None,
            last_validated: Utc::now() - Duration::seconds(age_secs),
        }
    }

    fn cache_in(dir: &tempfile::TempDir) -> EntitlementCache {
        EntitlementCache::new(dir.path().to_path_buf(), "machine-a")
    }

    #[tokio::test]
    async fn fresh_cache_is_used_without_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.save(&record(Tier::Advanced, 60)).unwrap();

        let validator = StubValidator::returning(None);
        assert_eq!(resolve_tier(&cache, &validator, None).await, Tier::Advanced);
        assert_eq!(validator.call_count(), 0);
    }

    #[tokio::test]
    async fn stale_cache_with_failing_validation_reverts_to_free_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache
            .save(&record(Tier::Advanced, ENTITLEMENT_TTL_SECS + 60))
            .unwrap();

        let validator = StubValidator::returning(None);
        assert_eq!(resolve_tier(&cache, &validator, None).await, Tier::Free);
        assert_eq!(validator.call_count(), 1);
        assert!(!cache.path().exists());
    }

    #[tokio::test]
    async fn stale_cache_is_refreshed_on_successful_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache
            .save(&record(Tier::Free, ENTITLEMENT_TTL_SECS + 60))
            .unwrap();

        let validator = StubValidator::returning(Some(record(Tier::Advanced, 0)));
        assert_eq!(resolve_tier(&cache, &validator, None).await, Tier::Advanced);

        let persisted = cache.load().unwrap();
        assert_eq!(persisted.tier, Tier::Advanced);
        assert!(persisted.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn no_cache_and_no_key_resolves_to_free_without_validation() {
        let dir = tempfile::tempdir().unwrap();
        let validator = StubValidator::returning(Some(record(Tier::Advanced, 0)));

        assert_eq!(
            resolve_tier(&cache_in(&dir), &validator, None).await,
            Tier::Free
        );
        assert_eq!(validator.call_count(), 0);
    }

    #[tokio::test]
    async fn provided_key_is_validated_and_persisted_when_cache_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let validator = StubValidator::returning(Some(record(Tier::Advanced, 0)));

        assert_eq!(
            resolve_tier(&cache, &validator, Some("key-1234")).await,
            Tier::Advanced
        );
        assert_eq!(cache.load().unwrap().tier, Tier::Advanced);
    }

    #[tokio::test]
    async fn provided_key_failing_validation_resolves_to_free() {
        let dir = tempfile::tempdir().unwrap();
        let validator = StubValidator::returning(None);

        assert_eq!(
            resolve_tier(&cache_in(&dir), &validator, Some("key-1234")).await,
            Tier::Free
        );
        assert_eq!(validator.call_count(), 1);
    }
}
