//! Uniform orchestration of source adapters.
//!
//! Every outbound request of every adapter goes through the same pipeline:
//! default headers → deadline check → rate limit → session cookies →
//! transport → cookie capture → challenge detection → status classification.
//! Adapters only build requests and decode responses.
//!
//! The runtime never retries. Hosts that want retries wrap an entry point
//! with [`run_with_retry`](crate::failure::run_with_retry).
//!
//! # Example
//!
//! ```no_run
//! use std::num::NonZeroU32;
//! use std::sync::Arc;
//! use sourcekit_core::ratelimit::{RateBudget, RateLimiter};
//! use sourcekit_core::runtime::{CallOptions, SourceRuntime};
//! use sourcekit_core::session::SessionStore;
//! use sourcekit_core::source::build_default_source_registry;
//! use sourcekit_core::transport::{HttpTimeouts, ReqwestTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = ReqwestTransport::new("sourcekit/0.1", HttpTimeouts::default())?;
//! let runtime = SourceRuntime::new(
//!     Arc::new(transport),
//!     Arc::new(RateLimiter::new(RateBudget::default())),
//!     Arc::new(SessionStore::new()),
//! );
//! let registry = build_default_source_registry(&runtime);
//! let desu = registry.get("desu").ok_or("desu missing")?;
//! let page = runtime
//!     .fetch_popular(desu.as_ref(), NonZeroU32::MIN, CallOptions::default())
//!     .await?;
//! println!("{} items, more: {}", page.len(), page.has_next);
//! # Ok(())
//! # }
//! ```

mod media;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::SourceError;
use crate::filter::FilterList;
use crate::model::{CatalogItem, ChapterEntry, Page, PageEntry};
use crate::ratelimit::{RateLimiter, origin_of, parse_retry_after};
use crate::session::SessionStore;
use crate::source::{ID_SEARCH_PREFIX, Source};
use crate::transport::{Request, Response, Transport, TransportError};

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Upper bound for the whole operation, including rate-limit waits and
    /// every request the operation issues.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Shared runtime state: transport, rate limiter and session store.
///
/// Cheap to share behind `Arc`; every entry point takes `&self`.
pub struct SourceRuntime {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    sessions: Arc<SessionStore>,
}

impl SourceRuntime {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            transport,
            limiter,
            sessions,
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Installs the budgets `source` declares for its own and extra origins.
    pub fn register_budgets(&self, source: &dyn Source) {
        if let Some(budget) = source.rate_budget() {
            self.limiter
                .set_budget(&origin_of(source.base_url().as_str()), budget);
        }
        for (origin, budget) in source.extra_budgets() {
            self.limiter.set_budget(&origin, budget);
        }
    }

    /// A fetcher bound to `source` whose deadline starts now.
    #[must_use]
    pub fn fetcher<'a>(&'a self, source: &'a dyn Source, options: CallOptions) -> Fetcher<'a> {
        Fetcher {
            runtime: self,
            source,
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    /// Page `page` of the popularity listing.
    ///
    /// # Errors
    ///
    /// Any [`SourceError`] from the pipeline or the adapter's decoder.
    #[instrument(skip_all, fields(source = source.id(), page = page.get()))]
    pub async fn fetch_popular(
        &self,
        source: &dyn Source,
        page: NonZeroU32,
        options: CallOptions,
    ) -> Result<Page<CatalogItem>, SourceError> {
        let fetcher = self.fetcher(source, options);
        let request = source.build_popular_request(page)?;
        let response = fetcher.execute(request).await?;
        let result = source.decode_popular_response(&response)?;
        debug!(items = result.len(), has_next = result.has_next, "popular page decoded");
        Ok(result)
    }

    /// Page `page` of the latest-updates listing.
    ///
    /// # Errors
    ///
    /// [`SourceError::Unsupported`] when the adapter has no such listing, else
    /// as [`SourceRuntime::fetch_popular`].
    #[instrument(skip_all, fields(source = source.id(), page = page.get()))]
    pub async fn fetch_latest(
        &self,
        source: &dyn Source,
        page: NonZeroU32,
        options: CallOptions,
    ) -> Result<Page<CatalogItem>, SourceError> {
        if !source.supports_latest() {
            return Err(SourceError::unsupported(source.id(), "latest"));
        }
        let fetcher = self.fetcher(source, options);
        let request = source.build_latest_request(page)?;
        let response = fetcher.execute(request).await?;
        source.decode_latest_response(&response)
    }

    /// Searches with `query` and `filters`.
    ///
    /// `id:<value>` queries go to [`Source::search_by_id`] on adapters that
    /// support it; that result is always a single final page, so later page
    /// numbers return an empty page. When the adapter's query policy says the
    /// query overrides filters, the adapter sees an empty filter list.
    ///
    /// # Errors
    ///
    /// As [`SourceRuntime::fetch_popular`].
    #[instrument(skip_all, fields(source = source.id(), page = page.get(), query = %query))]
    pub async fn search(
        &self,
        source: &dyn Source,
        page: NonZeroU32,
        query: &str,
        filters: &FilterList,
        options: CallOptions,
    ) -> Result<Page<CatalogItem>, SourceError> {
        let fetcher = self.fetcher(source, options);

        if source.supports_id_search()
            && let Some(id) = query.strip_prefix(ID_SEARCH_PREFIX)
        {
            if page.get() > 1 {
                return Ok(Page::empty());
            }
            return source.search_by_id(&fetcher, id.trim()).await;
        }

        let request = if source.query_policy().encodes_filters(query) {
            source.build_search_request(page, query, filters)?
        } else {
            debug!("query overrides filters; filter state not encoded");
            source.build_search_request(page, query, &FilterList::empty())?
        };
        let response = fetcher.execute(request).await?;
        source.decode_search_response(&response)
    }

    /// Enriched details of `item`; the returned locator is `item.locator`.
    ///
    /// # Errors
    ///
    /// As [`SourceRuntime::fetch_popular`].
    #[instrument(skip_all, fields(source = source.id(), locator = %item.locator))]
    pub async fn fetch_details(
        &self,
        source: &dyn Source,
        item: &CatalogItem,
        options: CallOptions,
    ) -> Result<CatalogItem, SourceError> {
        let fetcher = self.fetcher(source, options);
        let mut details = source.fetch_details(&fetcher, item).await?;
        details.locator.clone_from(&item.locator);
        Ok(details)
    }

    /// Chapters of `item`.
    ///
    /// # Errors
    ///
    /// [`SourceError::Unavailable`] for licensed or restricted items, else as
    /// [`SourceRuntime::fetch_popular`].
    #[instrument(skip_all, fields(source = source.id(), locator = %item.locator))]
    pub async fn fetch_chapter_list(
        &self,
        source: &dyn Source,
        item: &CatalogItem,
        options: CallOptions,
    ) -> Result<Vec<ChapterEntry>, SourceError> {
        let fetcher = self.fetcher(source, options);
        let chapters = source.fetch_chapter_list(&fetcher, item).await?;
        debug!(count = chapters.len(), "chapters decoded");
        Ok(chapters)
    }

    /// Pages of `chapter`.
    ///
    /// # Errors
    ///
    /// As [`SourceRuntime::fetch_popular`].
    #[instrument(skip_all, fields(source = source.id(), locator = %chapter.locator))]
    pub async fn fetch_page_list(
        &self,
        source: &dyn Source,
        chapter: &ChapterEntry,
        options: CallOptions,
    ) -> Result<Vec<PageEntry>, SourceError> {
        let fetcher = self.fetcher(source, options);
        source.fetch_page_list(&fetcher, chapter).await
    }

    /// Final media locators of `page`, at least one, with the adapter's
    /// media guard applied.
    ///
    /// # Errors
    ///
    /// [`SourceError::Decode`] when the adapter resolves to nothing, else as
    /// [`SourceRuntime::fetch_popular`].
    #[instrument(skip_all, fields(source = source.id(), index = page.index))]
    pub async fn resolve_page(
        &self,
        source: &dyn Source,
        page: &PageEntry,
        options: CallOptions,
    ) -> Result<Vec<String>, SourceError> {
        let fetcher = self.fetcher(source, options);
        let locators = source.resolve_page(&fetcher, page).await?;
        if locators.is_empty() {
            return Err(SourceError::decode(
                format!("{} page {}", source.id(), page.index),
                "page resolved to no media locators",
            ));
        }
        match source.media_guard() {
            Some(guard) => media::apply_guard(&fetcher, &guard, locators).await,
            None => Ok(locators),
        }
    }
}

/// Executes requests for one adapter within one operation.
///
/// Adapters receive a fetcher in their multi-request operations; every
/// request it sends shares the operation's deadline.
pub struct Fetcher<'a> {
    runtime: &'a SourceRuntime,
    source: &'a dyn Source,
    deadline: Option<Instant>,
}

impl Fetcher<'_> {
    /// Resolves `locator` against the adapter's base URL.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidUrl`] when the join fails.
    pub fn url(&self, locator: &str) -> Result<Url, SourceError> {
        self.source
            .base_url()
            .join(locator)
            .map_err(|e| TransportError::invalid_url(locator, e).into())
    }

    /// GETs `locator` (absolute, or relative to the base URL).
    ///
    /// # Errors
    ///
    /// As [`Fetcher::execute`].
    pub async fn get(&self, locator: &str) -> Result<Response, SourceError> {
        let url = self.url(locator)?;
        self.execute(Request::get(url)).await
    }

    /// Runs `request` through the shared pipeline and returns a 2xx response.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] when the deadline passes while waiting
    ///   for a permit or for the response
    /// - [`SourceError::AntibotChallenge`] when the adapter recognizes a
    ///   challenge page
    /// - [`SourceError::RateLimited`] for HTTP 429, or 503 with `Retry-After`
    /// - [`TransportError::HttpStatus`] for any other non-2xx status
    #[instrument(skip_all, fields(method = request.method.as_str(), url = %request.url))]
    pub async fn execute(&self, mut request: Request) -> Result<Response, SourceError> {
        for (name, value) in self.source.default_headers().iter() {
            if !request.headers.contains(name) {
                request.headers.insert(name, value);
            }
        }

        let url = request.url.to_string();
        let origin = origin_of(&url);

        self.runtime
            .limiter
            .acquire(&origin, self.remaining(&url)?)
            .await?;

        self.runtime.sessions.apply(&mut request);

        let response = match self.remaining(&url)? {
            Some(remaining) => {
                tokio::time::timeout(remaining, self.runtime.transport.execute(request))
                    .await
                    .map_err(|_| TransportError::timeout(&url))??
            }
            None => self.runtime.transport.execute(request).await?,
        };

        self.runtime.sessions.capture(&response.url, &response.headers);
        debug!(status = response.status, bytes = response.body.len(), "response received");

        if let Some(marker) = self.source.detect_challenge(&response) {
            warn!(marker = %marker, "challenge page detected");
            return Err(SourceError::antibot(url, marker));
        }

        self.classify(&origin, &url, response)
    }

    /// Time left before the deadline; `Timeout` once it has passed.
    fn remaining(&self, url: &str) -> Result<Option<Duration>, TransportError> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::timeout(url));
        }
        Ok(Some(deadline - now))
    }

    fn classify(&self, origin: &str, url: &str, response: Response) -> Result<Response, SourceError> {
        if response.is_success() {
            return Ok(response);
        }
        let retry_after = response.headers.get("Retry-After").and_then(parse_retry_after);
        match (response.status, retry_after) {
            (429, retry_after) | (503, retry_after @ Some(_)) => {
                if let Some(delay) = retry_after {
                    self.runtime.limiter.record_rate_limit(origin, delay);
                }
                Err(SourceError::rate_limited(url, retry_after))
            }
            (status, _) => Err(TransportError::http_status(url, status).into()),
        }
    }

    /// The adapter this fetcher sends requests for.
    #[must_use]
    pub fn source(&self) -> &dyn Source {
        self.source
    }
}
