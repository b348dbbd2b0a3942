//! Uniform content model produced by every source adapter.

use serde::{Deserialize, Serialize};

/// Publication status of a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// The site did not say, or said something unrecognized.
    #[default]
    Unknown,
    /// Still being released.
    Ongoing,
    /// Finished.
    Completed,
    /// Licensed or otherwise withdrawn from free reading.
    Licensed,
}

/// A title as listed in a catalog or detail page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Origin-relative locator, unique per adapter.
    pub locator: String,
    /// Display title.
    pub title: String,
    /// Cover image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Genre tags in site order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default)]
    pub status: ItemStatus,
}

impl CatalogItem {
    /// Creates a listing-level item with only a locator and title.
    #[must_use]
    pub fn new(locator: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the thumbnail, dropping empty strings.
    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        let thumbnail = thumbnail.into();
        self.thumbnail = (!thumbnail.trim().is_empty()).then_some(thumbnail);
        self
    }
}

/// One chapter (or episode) of a catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    /// Locator of the owning [`CatalogItem`].
    pub item_locator: String,
    /// Locator of this chapter's page list.
    pub locator: String,
    /// Display name.
    pub name: String,
    /// Chapter number; fractional values such as 12.5 are allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f32>,
    /// Upload time in epoch milliseconds, 0 when unknown.
    #[serde(default)]
    pub uploaded_at: i64,
    /// Translator / scanlator attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanlator: Option<String>,
}

impl ChapterEntry {
    #[must_use]
    pub fn new(
        item_locator: impl Into<String>,
        locator: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            item_locator: item_locator.into(),
            locator: locator.into(),
            name: name.into(),
            number: None,
            uploaded_at: 0,
            scanlator: None,
        }
    }
}

/// Where a page's media lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum MediaLocator {
    /// Final media URL.
    Direct(String),
    /// Reference that has to be fetched once to discover the real locator(s).
    Intermediate(String),
}

impl MediaLocator {
    /// Returns the underlying URL regardless of kind.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Direct(url) | Self::Intermediate(url) => url,
        }
    }
}

/// One page of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    /// Locator of the owning chapter.
    pub chapter_locator: String,
    /// Zero-based index within the chapter.
    pub index: usize,
    pub media: MediaLocator,
}

impl PageEntry {
    #[must_use]
    pub fn new(chapter_locator: impl Into<String>, index: usize, media: MediaLocator) -> Self {
        Self {
            chapter_locator: chapter_locator.into(),
            index,
            media,
        }
    }
}

/// One page of results plus the continuation signal.
///
/// When `has_next` is false, fetching the next page number is undefined for
/// callers; adapters answer such a fetch with an empty page instead of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, has_next: bool) -> Self {
        Self { items, has_next }
    }

    /// An empty final page.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next: false,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_item_drops_blank_thumbnail() {
        let item = CatalogItem::new("/1", "Title").with_thumbnail("  ");
        assert!(item.thumbnail.is_none());

        let item = CatalogItem::new("/1", "Title").with_thumbnail("https://img/1.jpg");
        assert_eq!(item.thumbnail.as_deref(), Some("https://img/1.jpg"));
    }

    #[test]
    fn test_empty_page_has_no_next() {
        let page: Page<CatalogItem> = Page::empty();
        assert!(page.is_empty());
        assert!(!page.has_next);
    }

    #[test]
    fn test_media_locator_serializes_tagged() {
        let json = serde_json::to_string(&MediaLocator::Intermediate("https://x/1".into())).unwrap();
        assert_eq!(json, r#"{"kind":"intermediate","url":"https://x/1"}"#);
    }

    #[test]
    fn test_status_default_is_unknown() {
        let item: CatalogItem = serde_json::from_str(r#"{"locator":"/1","title":"t"}"#).unwrap();
        assert_eq!(item.status, ItemStatus::Unknown);
    }
}
