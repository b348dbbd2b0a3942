//! MangaAlarab (mangaalarab.com): Arabic catalog rendered as HTML.
//!
//! Text search ignores filters. The catalog filters include tri-state groups,
//! but the site has no exclusion syntax: excluded members are dropped from the
//! request (and logged at debug level by the encoder). Chapters keep document
//! order.

use std::num::NonZeroU32;
use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::SourceError;
use crate::filter::{ExclusionPolicy, FilterList, FilterValue, options};
use crate::model::{CatalogItem, ChapterEntry, ItemStatus, MediaLocator, Page, PageEntry};
use crate::runtime::Fetcher;
use crate::source::utils::{
    absolutize_url, compile_static_selector, element_text, join_url, parse_date_millis,
    relative_locator, select_attr, select_text,
};
use crate::source::{QueryPolicy, Source};
use crate::transport::{Request, Response};

use super::parse_base_url;

const DEFAULT_BASE_URL: &str = "https://mangaalarab.com";

static ARTICLE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("article"));
static LINK: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("h3"));
static FIGURE_IMG: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("figure img"));
static NEXT_PAGE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a[rel=next]"));

static LATEST_ARTICLE: LazyLock<Selector> = LazyLock::new(|| {
    compile_static_selector("section:nth-child(5) > div.container > div > article")
});
static LATEST_LINK: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("figure > a"));
static IMG: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("img"));

static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("p.text-sm"));
static ALT_NAME: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("span"));
static GENRES: LazyLock<Selector> = LazyLock::new(|| {
    compile_static_selector(
        "div.text-gray-600 a, div.container > div:nth-child(1) > div:nth-child(1) > div:nth-child(2) > div:nth-child(1) > span:nth-child(2)",
    )
});
static STATUS: LazyLock<Selector> = LazyLock::new(|| {
    compile_static_selector(
        "div.container > div:nth-child(1) > div:nth-child(1) > div:nth-child(2) > div:nth-child(6) > span:nth-child(2)",
    )
});

static CHAPTER_LINK: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.chapters-container > div > a"));
static CHAPTER_NAME: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("div > span"));
static CHAPTER_TIME: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("div > time"));

static PAGE_IMG: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.container > div > div > img"));

pub struct MangaAlarab {
    base_url: Url,
}

impl MangaAlarab {
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

    fn catalog_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        let page = page.to_string();
        Ok(Request::get(join_url(&self.base_url, "/manga")?).with_query(&[("page", page.as_str())]))
    }

    fn article_item(&self, article: ElementRef<'_>) -> Option<CatalogItem> {
        let href = select_attr(article, &LINK, "href")?;
        let locator = relative_locator(&href, &self.base_url)?;
        let title = select_text(article, &HEADING).unwrap_or_default();
        let mut item = CatalogItem::new(locator, title);
        item.thumbnail = select_attr(article, &FIGURE_IMG, "data-src")
            .and_then(|src| absolutize_url(&src, &self.base_url));
        Some(item)
    }

    fn latest_item(&self, article: ElementRef<'_>) -> Option<CatalogItem> {
        let href = select_attr(article, &LATEST_LINK, "href")?;
        let locator = relative_locator(&href, &self.base_url)?;
        let title = select_attr(article, &IMG, "title").unwrap_or_default();
        let mut item = CatalogItem::new(locator, title);
        item.thumbnail =
            select_attr(article, &IMG, "data-src").and_then(|src| absolutize_url(&src, &self.base_url));
        Some(item)
    }
}

#[async_trait]
impl Source for MangaAlarab {
    fn id(&self) -> &str {
        "mangaalarab"
    }

    fn name(&self) -> &str {
        "MangaAlarab"
    }

    fn lang(&self) -> &str {
        "ar"
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

    fn build_popular_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        self.catalog_request(page)
    }

    fn decode_popular_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let document = Html::parse_document(&response.text());
        let items: Vec<CatalogItem> = document
            .select(&ARTICLE)
            .filter_map(|article| self.article_item(article))
            .collect();
        let has_next = document.select(&NEXT_PAGE).next().is_some();
        Ok(Page::new(items, has_next))
    }

    fn build_latest_request(&self, _page: NonZeroU32) -> Result<Request, SourceError> {
        Ok(Request::get(self.base_url.clone()))
    }

    fn decode_latest_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let document = Html::parse_document(&response.text());
        let items = document
            .select(&LATEST_ARTICLE)
            .filter_map(|article| self.latest_item(article))
            .collect();
        Ok(Page::new(items, false))
    }

    fn build_search_request(
        &self,
        page: NonZeroU32,
        query: &str,
        filters: &FilterList,
    ) -> Result<Request, SourceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(self.catalog_request(page)?.with_query(&filters.encode()));
        }
        let page = page.to_string();
        Ok(Request::get(join_url(&self.base_url, "/search")?)
            .with_query(&[("q", query), ("page", page.as_str())]))
    }

    async fn fetch_details(&self, fetcher: &Fetcher<'_>, item: &CatalogItem) -> Result<CatalogItem, SourceError> {
        let response = fetcher.get(&item.locator).await?;
        Ok(decode_details(&response.text(), item))
    }

    async fn fetch_chapter_list(
        &self,
        fetcher: &Fetcher<'_>,
        item: &CatalogItem,
    ) -> Result<Vec<ChapterEntry>, SourceError> {
        let response = fetcher.get(&item.locator).await?;
        Ok(decode_chapters(&response.text(), &self.base_url, &item.locator))
    }

    async fn fetch_page_list(
        &self,
        fetcher: &Fetcher<'_>,
        chapter: &ChapterEntry,
    ) -> Result<Vec<PageEntry>, SourceError> {
        let response = fetcher.get(&chapter.locator).await?;
        Ok(decode_pages(&response.text(), &self.base_url, &chapter.locator))
    }

    fn declare_filters(&self) -> FilterList {
        FilterList::new(vec![
            FilterValue::select(
                "order",
                "ترتيب حسب",
                "order",
                options(&[
                    ("latest", "آخر التحديثات"),
                    ("chapters", "عدد الفصول"),
                    ("release", "تاريخ الإصدار"),
                    ("followers", "المتابعين"),
                    ("rating", "التقييم"),
                ]),
            ),
            FilterValue::select(
                "order_type",
                "نوع الترتيب",
                "order_type",
                options(&[("desc", "تنازلي"), ("asc", "تصاعدي")]),
            ),
            FilterValue::select(
                "genres_selection",
                "مطابقة التصنيفات",
                "genresSelection",
                options(&[
                    ("and", "يجب أن يحتوي العمل على كل التصنيفات"),
                    ("or", "يكفي أن يحتوي العمل على أحد التصنيفات"),
                ]),
            ),
            FilterValue::tri_state_group(
                "statuses",
                "الحالة",
                "statuses[]",
                ExclusionPolicy::Unsupported,
                options(&[
                    ("completed", "مكتملة"),
                    ("ongoing", "مستمرة"),
                    ("cancelled", "ملغاة"),
                    ("onhold", "متوقفة"),
                ]),
            ),
            FilterValue::tri_state_group(
                "types",
                "النوع",
                "types[]",
                ExclusionPolicy::Unsupported,
                options(&[
                    ("manhua", "مانها (صينية)"),
                    ("manhwa", "مانهوا (كورية)"),
                    ("english", "إنجليزية"),
                    ("manga", "مانجا (يابانية)"),
                ]),
            ),
            FilterValue::tri_state_group(
                "genres",
                "التصنيفات",
                "genres[]",
                ExclusionPolicy::Unsupported,
                options(GENRE_OPTIONS),
            ),
        ])
    }
}

fn decode_details(html: &str, item: &CatalogItem) -> CatalogItem {
    let document = Html::parse_document(html);
    let mut details = item.clone();

    let article = document.select(&ARTICLE).next();
    let description = article
        .and_then(|a| select_text(a, &DESCRIPTION))
        .unwrap_or_default();
    let alt_name = article
        .map(|a| {
            a.select(&ALT_NAME)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    details.description = match (description.is_empty(), alt_name.is_empty()) {
        (true, true) => None,
        (false, true) => Some(description),
        (true, false) => Some(format!("Alternative Name: {alt_name}")),
        (false, false) => Some(format!("{description}\n\nAlternative Name: {alt_name}")),
    };

    details.genres = document
        .select(&GENRES)
        .map(element_text)
        .filter(|genre| !genre.is_empty())
        .collect();
    details.status = document
        .select(&STATUS)
        .next()
        .map_or(ItemStatus::Unknown, |el| parse_status(&element_text(el)));
    details
}

fn parse_status(text: &str) -> ItemStatus {
    if text.contains("مستمرة") {
        ItemStatus::Ongoing
    } else if text.contains("مكتملة") {
        ItemStatus::Completed
    } else {
        ItemStatus::Unknown
    }
}

fn decode_chapters(html: &str, base_url: &Url, item_locator: &str) -> Vec<ChapterEntry> {
    let document = Html::parse_document(html);
    document
        .select(&CHAPTER_LINK)
        .filter_map(|link| {
            let locator = relative_locator(link.value().attr("href")?, base_url)?;
            let name = select_text(link, &CHAPTER_NAME).unwrap_or_default();
            let mut chapter = ChapterEntry::new(item_locator, locator, name);
            chapter.uploaded_at = select_text(link, &CHAPTER_TIME)
                .map_or(0, |date| parse_date_millis(&date, "%Y-%m-%d"));
            Some(chapter)
        })
        .collect()
}

fn decode_pages(html: &str, base_url: &Url, chapter_locator: &str) -> Vec<PageEntry> {
    let document = Html::parse_document(html);
    document
        .select(&PAGE_IMG)
        .filter_map(|img| absolutize_url(img.value().attr("src")?, base_url))
        .enumerate()
        .map(|(index, url)| PageEntry::new(chapter_locator, index, MediaLocator::Direct(url)))
        .collect()
}

const GENRE_OPTIONS: &[(&str, &str)] = &[
    ("1", "أكشن"),
    ("2", "مغامرات"),
    ("3", "كوميديا"),
    ("4", "دراما"),
    ("5", "خيال علمي"),
    ("6", "فانتازيا"),
    ("7", "شريحة من الحياة"),
    ("8", "فنون قتالية"),
    ("9", "خارق للطبيعة"),
    ("10", "رعب"),
    ("11", "غموض"),
    ("12", "رومانسي"),
    ("13", "تاريخي"),
    ("14", "رياضي"),
    ("15", "مدرسي"),
    ("16", "نفسي"),
    ("17", "إيسيكاي"),
    ("18", "مأساة"),
    ("19", "سحر"),
    ("20", "عسكري"),
    ("21", "شونين"),
];

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::filter::TriState;
    use crate::transport::Headers;

    fn alarab() -> MangaAlarab {
        MangaAlarab::new().unwrap()
    }

    fn response(url: &str, body: &str) -> Response {
        Response::new(200, Url::parse(url).unwrap(), Headers::new(), body.as_bytes().to_vec())
    }

    fn page(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn base() -> Url {
        Url::parse(DEFAULT_BASE_URL).unwrap()
    }

    #[test]
    fn test_decode_popular_articles() {
        let html = r#"<main>
            <article><a href="https://mangaalarab.com/manga/solo-leveling"><h3>Solo Leveling</h3></a>
              <figure><img data-src="https://mangaalarab.com/covers/solo.webp"></figure></article>
            <article><a href="/manga/one-piece"><h3>One Piece</h3></a>
              <figure><img data-src="/covers/op.webp"></figure></article>
            <a rel="next" href="/manga?page=2">التالي</a>
        </main>"#;
        let result = alarab()
            .decode_popular_response(&response("https://mangaalarab.com/manga?page=1", html))
            .unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.has_next);
        assert_eq!(result.items[0].locator, "/manga/solo-leveling");
        assert_eq!(result.items[0].title, "Solo Leveling");
        assert_eq!(
            result.items[1].thumbnail.as_deref(),
            Some("https://mangaalarab.com/covers/op.webp")
        );
    }

    #[test]
    fn test_last_page_has_no_next() {
        let result = alarab()
            .decode_popular_response(&response("https://mangaalarab.com/manga?page=9", "<main></main>"))
            .unwrap();
        assert!(result.is_empty());
        assert!(!result.has_next);
    }

    #[test]
    fn test_query_search_uses_search_endpoint() {
        let request = alarab()
            .build_search_request(page(2), "naruto", &FilterList::empty())
            .unwrap();
        assert_eq!(
            request.url.as_str(),
            "https://mangaalarab.com/search?q=naruto&page=2"
        );
    }

    #[test]
    fn test_filter_search_encodes_selects_and_included_members() {
        let source = alarab();
        let mut filters = source.declare_filters();
        filters.select("order", "rating").unwrap();
        filters.set_tri_state("genres", "1", TriState::Included).unwrap();
        filters.set_tri_state("genres", "10", TriState::Excluded).unwrap();
        filters.set_tri_state("statuses", "ongoing", TriState::Included).unwrap();

        let request = source.build_search_request(page(1), "", &filters).unwrap();
        let pairs: Vec<(String, String)> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(request.url.path(), "/manga");
        assert!(pairs.contains(&("page".into(), "1".into())));
        assert!(pairs.contains(&("order".into(), "rating".into())));
        assert!(pairs.contains(&("order_type".into(), "desc".into())));
        assert!(pairs.contains(&("genresSelection".into(), "and".into())));
        assert!(pairs.contains(&("genres[]".into(), "1".into())));
        assert!(pairs.contains(&("statuses[]".into(), "ongoing".into())));
        assert!(!pairs.iter().any(|(_, v)| v == "10"));
    }

    #[test]
    fn test_decode_details_appends_alternative_name() {
        let html = r#"<body>
            <article><p class="text-sm">قصة صياد ضعيف.</p><span>나 혼자만 레벨업</span></article>
            <div class="text-gray-600"><a>أكشن</a><a>فانتازيا</a></div>
        </body>"#;
        let item = CatalogItem::new("/manga/solo-leveling", "Solo Leveling");
        let details = decode_details(html, &item);
        assert_eq!(details.title, "Solo Leveling");
        assert_eq!(
            details.description.as_deref(),
            Some("قصة صياد ضعيف.\n\nAlternative Name: 나 혼자만 레벨업")
        );
        assert_eq!(details.genres, vec!["أكشن", "فانتازيا"]);
        assert_eq!(details.status, ItemStatus::Unknown);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("مستمرة"), ItemStatus::Ongoing);
        assert_eq!(parse_status("مكتملة"), ItemStatus::Completed);
        assert_eq!(parse_status("؟"), ItemStatus::Unknown);
    }

    #[test]
    fn test_decode_chapters_document_order() {
        let html = r#"<div class="chapters-container">
            <div><a href="/manga/solo-leveling/2"><div><span>الفصل 2</span><time>2021-03-04</time></div></a></div>
            <div><a href="/manga/solo-leveling/1"><div><span>الفصل 1</span><time>قبل يومين</time></div></a></div>
        </div>"#;
        let chapters = decode_chapters(html, &base(), "/manga/solo-leveling");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].locator, "/manga/solo-leveling/2");
        assert_eq!(chapters[0].name, "الفصل 2");
        assert_eq!(chapters[0].uploaded_at, 1_614_816_000_000);
        assert_eq!(chapters[1].uploaded_at, 0);
    }

    #[test]
    fn test_decode_pages_absolutizes() {
        let html = r#"<div class="container"><div><div>
            <img src="/uploads/1.webp"><img src="https://cdn.example/2.webp">
        </div></div></div>"#;
        let pages = decode_pages(html, &base(), "/manga/solo-leveling/1");
        assert_eq!(pages.len(), 2);
        assert_eq!(
            pages[0].media,
            MediaLocator::Direct("https://mangaalarab.com/uploads/1.webp".into())
        );
        assert_eq!(pages[1].index, 1);
    }
}
