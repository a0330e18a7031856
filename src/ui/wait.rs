use std::time::Duration;

use tokio::time::{Instant, sleep, timeout_at};
use tracing::debug;

use super::matcher::{self, ElementCriteria};
use super::{UiElement, parser};

/// Caller-supplied timeouts are clamped to this window to prevent both
/// busy-looping and unbounded blocking.
pub(crate) const MIN_WAIT: Duration = Duration::from_secs(1);
pub(crate) const MAX_WAIT: Duration = Duration::from_secs(30);

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Source of fresh accessibility dumps for the polling loop.
pub(crate) trait DumpSource {
    async fn acquire(&self) -> anyhow::Result<String>;
}

#[derive(Debug)]
pub(crate) struct WaitOutcome {
    pub(crate) element: Option<UiElement>,
    pub(crate) elapsed: Duration,
    pub(crate) polls: u32,
}

pub(crate) fn clamp_timeout(requested: Duration) -> Duration {
    requested.clamp(MIN_WAIT, MAX_WAIT)
}

/// Poll for an element matching `criteria` until it appears or the
/// clamped timeout elapses.
///
/// Each cycle re-acquires a fresh dump and re-runs the single-shot match.
/// Acquisition or parse failures during polling count as a miss and the
/// loop keeps going; only the deadline ends it. Elapsed time is reported
/// on both the success and the timeout path.
pub(crate) async fn wait_for<S: DumpSource>(
    source: &S,
    criteria: &ElementCriteria,
    requested_timeout: Duration,
) -> WaitOutcome {
    let timeout = clamp_timeout(requested_timeout);
    let started = Instant::now();
    let deadline = started + timeout;
    let mut polls = 0u32;

    loop {
        polls += 1;

        // Acquisition runs under the same deadline as the loop itself, so
        // a hung device command cannot stretch the wait past the clamped
        // timeout.
        match timeout_at(deadline, source.acquire()).await {
            Ok(Ok(dump)) => match parser::parse_dump(&dump) {
                Ok(elements) => {
                    if let Some(element) = matcher::find_first(&elements, criteria) {
                        return WaitOutcome {
                            element: Some(element.clone()),
                            elapsed: started.elapsed(),
                            polls,
                        };
                    }
                }
                Err(err) => {
                    debug!(error = %format!("{err:#}"), "Discarding unusable dump while waiting");
                }
            },
            Ok(Err(err)) => {
                debug!(error = %format!("{err:#}"), "Dump acquisition failed while waiting, retrying");
            }
            Err(_) => {
                debug!("Deadline expired while acquiring a dump");
                return WaitOutcome {
                    element: None,
                    elapsed: started.elapsed().min(timeout),
                    polls,
                };
            }
        }

        if Instant::now() + POLL_INTERVAL > deadline {
            return WaitOutcome {
                element: None,
                elapsed: started.elapsed(),
                polls,
            };
        }

        sleep(POLL_INTERVAL).await;
    }
}
