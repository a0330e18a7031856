use std::time::Duration;

use anyhow::{Context as _, anyhow, bail, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tracing::debug;
use url::Url;

use crate::license::cache::EntitlementRecord;
use crate::license::policy::Tier;
use crate::machine_identity;

pub(crate) const DEFAULT_VALIDATION_ENDPOINT: &str = "https://license.mobiscope.dev/v1/validate";

const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling on the validation response body. A misbehaving or malicious
/// server must not be able to balloon memory here.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Seam between tier resolution and the validation service, so resolution
/// can be exercised without a network.
pub(crate) trait LicenseValidator {
    /// Validate `license_key` for this machine. Every failure class
    /// (network, timeout, oversized or malformed body, rejected key)
    /// collapses to `None`; the caller falls back to the free tier.
    async fn validate(&self, license_key: &str) -> Option<EntitlementRecord>;
}

#[derive(Serialize)]
struct ValidationRequest<'a> {
    license_key: &'a str,
    instance_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidationResponse {
    valid: bool,
    #[serde(default)]
    meta: Option<ResponseMeta>,
    #[serde(default)]
    license_key: Option<ResponseLicenseKey>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMeta {
    #[serde(default)]
    product_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseLicenseKey {
    #[serde(default)]
    expires_at: Option<String>,
}

pub(crate) struct RemoteValidator {
    endpoint: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteValidator {
    pub(crate) fn new(endpoint: Url) -> Self {
        Self::with_timeout(endpoint, VALIDATION_TIMEOUT)
    }

    fn with_timeout(endpoint: Url, timeout: Duration) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn request(&self, license_key: &str) -> anyhow::Result<EntitlementRecord> {
        let request = ValidationRequest {
            license_key,
            instance_id: machine_identity::resolve(),
        };

        // One deadline covers the whole exchange. A server dribbling the
        // body one byte at a time must not be able to hold the caller past
        // the timeout by resetting it per read.
        let deadline = Instant::now() + self.timeout;

        let mut response = match timeout_at(
            deadline,
            self.client.post(self.endpoint.clone()).json(&request).send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                return Err(anyhow!(err).context(format!(
                    "Failed to reach license validation service at {}",
                    self.endpoint
                )));
            }
            Err(_) => bail!(
                "License validation request to {} timed out ({:?})",
                self.endpoint,
                self.timeout
            ),
        };

        let status = response.status();
        ensure!(
            status.is_success(),
            "License validation service at {} returned {status}",
            self.endpoint
        );

        let mut body = Vec::new();
        loop {
            let chunk = match timeout_at(deadline, response.chunk()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(err)) => {
                    return Err(anyhow!(err).context("Failed to read validation response body"));
                }
                Err(_) => bail!(
                    "License validation did not complete within {:?}",
                    self.timeout
                ),
            };

            ensure!(
                body.len() + chunk.len() <= MAX_RESPONSE_BYTES,
                "License validation response exceeded the {MAX_RESPONSE_BYTES}-byte limit"
            );
            body.extend_from_slice(&chunk);
        }

        let parsed: ValidationResponse = serde_json::from_slice(&body)
            .context("Failed to parse the license validation response")?;

        interpret(parsed, license_key)
    }
}

impl LicenseValidator for RemoteValidator {
    async fn validate(&self, license_key: &str) -> Option<EntitlementRecord> {
        match self.request(license_key).await {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(error = %format!("{err:#}"), "License validation failed");
                None
            }
        }
    }
}

/// Interpret a parsed validation response. Only `valid: true` produces an
/// entitlement; the tier comes from a substring match on the product name
/// and an unparseable expiry is treated as absent.
fn interpret(response: ValidationResponse, license_key: &str) -> anyhow::Result<EntitlementRecord> {
    if !response.valid {
        let reason = response
            .error
            .map(|error| format!(": {error}"))
            .unwrap_or_default();
        bail!("License key rejected by the validation service{reason}");
    }

    let tier = response
        .meta
        .and_then(|meta| meta.product_name)
        .map(|name| Tier::from_product_name(&name))
        .unwrap_or(Tier::Free);

    let expires_at = response
        .license_key
        .and_then(|key| key.expires_at)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc));

    Ok(EntitlementRecord {
        tier,
        license_key: Some(license_key.to_owned()),
        expires_at,
        last_validated: Utc::now(),
    })
}
