//! Com-x (com-x.life): Russian comics site rendered as HTML.
//!
//! The site sits behind an anti-bot gate that answers with a 404 from its own
//! host until the visitor passes a browser check; that response is reported
//! as a challenge, not as a missing page. Requests are capped at 3 per second.
//!
//! Chapter data is embedded in the reader page as `window.__DATA__ = {...};`
//! and page images as a `"images":[...]` array. Chapters keep document order.

use std::num::NonZeroU32;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::SourceError;
use crate::filter::FilterList;
use crate::model::{CatalogItem, ChapterEntry, ItemStatus, MediaLocator, Page, PageEntry};
use crate::ratelimit::RateBudget;
use crate::runtime::Fetcher;
use crate::source::utils::{
    absolutize_url, compile_static_regex, compile_static_selector, element_text, join_url, parse_date_millis,
    primary_title, relative_locator, select_attr, select_text,
};
use crate::source::{QueryPolicy, Source};
use crate::transport::{Headers, Request, Response};

use super::parse_base_url;

const DEFAULT_BASE_URL: &str = "https://com-x.life";
const IMAGE_BASE_URL: &str = "https://img.com-x.life/comix/";
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:77.0) Gecko/20100101 Firefox/78.0";
const CHALLENGE_MARKER: &str = "com-x antibot: open the site in a browser to pass the check";

const DATA_PREFIX: &str = "window.__DATA__ = ";

static IMAGES_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#""images"\s*:\s*\[([^\]]*)\]"#));

static POPULAR_ITEM: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("div.short"));
static POPULAR_LINK: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(".readed__title a"));
static LATEST_ITEM: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("ul#content-load li.latest"));
static LATEST_LINK: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a.latest__title"));
static IMG: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("img"));
static PAGINATION_CURRENT: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(".pagination__pages span"));
static PAGINATION_LAST: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(".pagination__pages a:last-child"));

static DETAIL_GRID: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("div.page__grid"));
static DETAIL_TITLE: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(".page__title-original"));
static DETAIL_LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| compile_static_selector(".page__list li"));
static DETAIL_TAGS: LazyLock<Selector> = LazyLock::new(|| compile_static_selector(".page__tags a"));
static DETAIL_TEXT: LazyLock<Selector> = LazyLock::new(|| compile_static_selector(".page__text"));
static DETAIL_COVER: LazyLock<Selector> = LazyLock::new(|| compile_static_selector(".img-wide img"));

pub struct ComX {
    base_url: Url,
}

impl ComX {
    /// Creates the adapter for the public site.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the base URL does not parse.
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates the adapter against a custom base URL (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when `base_url` does not parse.
    pub fn with_base_url(base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
        })
    }

    fn decode_cards(&self, document: &Html, item_selector: &Selector, link_selector: &Selector) -> Vec<CatalogItem> {
        document
            .select(item_selector)
            .filter_map(|card| self.card_item(card, link_selector))
            .collect()
    }

    fn card_item(&self, card: ElementRef<'_>, link_selector: &Selector) -> Option<CatalogItem> {
        let link = card.select(link_selector).next()?;
        let locator = relative_locator(link.value().attr("href")?, &self.base_url)?;
        let mut item = CatalogItem::new(locator, primary_title(&element_text(link)));
        item.thumbnail = select_attr(card, &IMG, "src").and_then(|src| absolutize_url(&src, &self.base_url));
        Some(item)
    }
}

#[async_trait]
impl Source for ComX {
    fn id(&self) -> &str {
        "comx"
    }

    fn name(&self) -> &str {
        "Com-x"
    }

    fn lang(&self) -> &str {
        "ru"
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn supports_latest(&self) -> bool {
        true
    }

    fn query_policy(&self) -> QueryPolicy {
        QueryPolicy::QueryOverridesFilters
    }

    fn default_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("User-Agent", BROWSER_USER_AGENT);
        headers.insert("Referer", format!("{}comix-read/", self.base_url));
        headers
    }

    fn build_popular_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        Ok(Request::get(join_url(
            &self.base_url,
            &format!("/comix-read/page/{page}/"),
        )?))
    }

    fn decode_popular_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let document = Html::parse_document(&response.text());
        let items = self.decode_cards(&document, &POPULAR_ITEM, &POPULAR_LINK);
        let page_number = |selector: &Selector| {
            document
                .select(selector)
                .next()
                .and_then(|el| element_text(el).parse::<u32>().ok())
        };
        let has_next = match (page_number(&PAGINATION_CURRENT), page_number(&PAGINATION_LAST)) {
            (Some(current), Some(last)) => current <= last,
            _ => false,
        };
        Ok(Page::new(items, has_next))
    }

    fn build_latest_request(&self, _page: NonZeroU32) -> Result<Request, SourceError> {
        Ok(Request::get(self.base_url.clone()))
    }

    fn decode_latest_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let document = Html::parse_document(&response.text());
        Ok(Page::new(
            self.decode_cards(&document, &LATEST_ITEM, &LATEST_LINK),
            false,
        ))
    }

    fn build_search_request(
        &self,
        page: NonZeroU32,
        query: &str,
        _filters: &FilterList,
    ) -> Result<Request, SourceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Request::get(join_url(&self.base_url, "/comix-read/")?));
        }
        let page = page.to_string();
        let url = join_url(&self.base_url, "/index.php")?;
        let request = Request::post_form(
            url,
            &[("do", "search"), ("subaction", "search"), ("story", query)],
        )
        .with_query(&[("do", "search"), ("search_start", page.as_str())]);
        Ok(request)
    }

    fn decode_search_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let document = Html::parse_document(&response.text());
        Ok(Page::new(
            self.decode_cards(&document, &POPULAR_ITEM, &POPULAR_LINK),
            false,
        ))
    }

    async fn fetch_details(&self, fetcher: &Fetcher<'_>, item: &CatalogItem) -> Result<CatalogItem, SourceError> {
        let response = fetcher.get(&item.locator).await?;
        decode_details(&response.text(), &self.base_url, &item.locator)
    }

    async fn fetch_chapter_list(
        &self,
        fetcher: &Fetcher<'_>,
        item: &CatalogItem,
    ) -> Result<Vec<ChapterEntry>, SourceError> {
        let response = fetcher.get(&item.locator).await?;
        decode_chapters(&response.text(), &item.locator)
    }

    async fn fetch_page_list(
        &self,
        fetcher: &Fetcher<'_>,
        chapter: &ChapterEntry,
    ) -> Result<Vec<PageEntry>, SourceError> {
        let response = fetcher.get(&chapter.locator).await?;
        decode_pages(&response.text(), &chapter.locator)
    }

    /// A 404 served by the site's own host is the anti-bot gate.
    fn detect_challenge(&self, response: &Response) -> Option<String> {
        (response.status == 404 && response.url.host_str() == self.base_url.host_str())
            .then(|| CHALLENGE_MARKER.to_string())
    }

    fn rate_budget(&self) -> Option<RateBudget> {
        Some(RateBudget::per_second(3))
    }
}

fn decode_details(html: &str, base_url: &Url, locator: &str) -> Result<CatalogItem, SourceError> {
    let document = Html::parse_document(html);
    let grid = document
        .select(&DETAIL_GRID)
        .next()
        .ok_or_else(|| SourceError::decode("comx detail", "div.page__grid not found"))?;

    let title = select_text(grid, &DETAIL_TITLE)
        .map(|t| t.split(" | ").next().unwrap_or_default().trim().to_string())
        .unwrap_or_default();
    let mut item = CatalogItem::new(locator, title);

    let list_entry = |label: &str| {
        grid.select(&DETAIL_LIST_ITEM)
            .map(element_text)
            .find(|text| text.contains(label))
    };
    item.author = list_entry("Издатель").map(|text| strip_label(&text));
    item.status = list_entry("Статус").map_or(ItemStatus::Unknown, |text| parse_status(&text));
    item.genres = grid.select(&DETAIL_TAGS).map(element_text).collect();
    item.description = select_text(grid, &DETAIL_TEXT);
    item.thumbnail = select_attr(grid, &DETAIL_COVER, "src").and_then(|src| absolutize_url(&src, base_url));
    Ok(item)
}

/// `"Издатель: Marvel"` → `"Marvel"`.
fn strip_label(text: &str) -> String {
    text.split_once(':')
        .map_or(text, |(_, value)| value)
        .trim()
        .to_string()
}

fn parse_status(text: &str) -> ItemStatus {
    let text = text.to_lowercase();
    if ["продолжается", "выходит", "онгоинг"].iter().any(|m| text.contains(m)) {
        ItemStatus::Ongoing
    } else if ["завершен", "закончен", "один том", "завершено"]
        .iter()
        .any(|m| text.contains(m))
    {
        ItemStatus::Completed
    } else {
        ItemStatus::Unknown
    }
}

#[derive(Debug, Deserialize)]
struct ReaderDataDto {
    news_id: serde_json::Value,
    #[serde(default)]
    chapters: Vec<ReaderChapterDto>,
}

#[derive(Debug, Deserialize)]
struct ReaderChapterDto {
    id: serde_json::Value,
    title: String,
    #[serde(default)]
    date: Option<String>,
}

/// Renders a JSON scalar id without quotes.
fn id_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn decode_chapters(html: &str, item_locator: &str) -> Result<Vec<ChapterEntry>, SourceError> {
    let Some(start) = html.find(DATA_PREFIX) else {
        debug!(locator = item_locator, "no embedded reader data");
        return Ok(Vec::new());
    };
    let rest = &html[start + DATA_PREFIX.len()..];
    let script = rest.find("</script>").map_or(rest, |end| &rest[..end]);
    let payload = script.rfind(';').map_or(script, |end| &script[..end]);

    let data: ReaderDataDto =
        serde_json::from_str(payload.trim()).map_err(|e| SourceError::decode("comx reader data", e))?;
    let news_id = id_text(&data.news_id);
    Ok(data
        .chapters
        .into_iter()
        .map(|chapter| {
            let mut entry = ChapterEntry::new(
                item_locator,
                format!("/readcomix/{news_id}/{}.html", id_text(&chapter.id)),
                chapter.title,
            );
            entry.uploaded_at = chapter
                .date
                .as_deref()
                .map_or(0, |date| parse_date_millis(date, "%d.%m.%Y"));
            entry
        })
        .collect())
}

fn decode_pages(html: &str, chapter_locator: &str) -> Result<Vec<PageEntry>, SourceError> {
    let images = IMAGES_ARRAY
        .captures(html)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| SourceError::decode("comx pages", "images array not found"))?;

    Ok(images
        .as_str()
        .split(',')
        .map(|raw| raw.replace(['\\', '"'], ""))
        .filter(|path| !path.trim().is_empty())
        .enumerate()
        .map(|(index, path)| {
            PageEntry::new(
                chapter_locator,
                index,
                MediaLocator::Direct(format!("{IMAGE_BASE_URL}{}", path.trim())),
            )
        })
        .collect())
}
