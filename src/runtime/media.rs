//! Media size guard for resolved page locators.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use super::Fetcher;
use crate::error::SourceError;
use crate::source::MediaGuard;

/// Probes issued at once per resolved page. The limiter still paces them.
const PROBE_CONCURRENCY: usize = 4;

/// Fetches every locator and swaps undersized media for `guard.fallback`.
/// Output order matches input order.
pub(super) async fn apply_guard(
    fetcher: &Fetcher<'_>,
    guard: &MediaGuard,
    locators: Vec<String>,
) -> Result<Vec<String>, SourceError> {
    stream::iter(locators)
        .map(|locator| async move {
            let response = fetcher.get(&locator).await?;
            if response.body.len() < guard.min_bytes {
                debug!(
                    locator = %locator,
                    bytes = response.body.len(),
                    min_bytes = guard.min_bytes,
                    "media below minimum size, using fallback"
                );
                Ok::<_, SourceError>(guard.fallback.clone())
            } else {
                Ok::<_, SourceError>(locator)
            }
        })
        .buffered(PROBE_CONCURRENCY)
        .try_collect()
        .await
}
