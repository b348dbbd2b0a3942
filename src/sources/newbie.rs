//! Newbie (newmanga.org): Russian catalog served by a separate JSON API host.
//!
//! Chapters belong to branches (translation teams). The detail payload lists
//! them; [`BranchCache`] keeps that list per item so the chapter fetch does
//! not need a second detail request. Pages are composite images: every page
//! is an intermediate reference whose slice count comes from the chapter's
//! page index (remembered when the page list is fetched), and each slice is
//! its own media URL. A slice of at most 320
//! bytes is the site's "image missing" stub and is replaced by the site logo.
//!
//! Chapters keep API order (`reverse=true`, oldest first).

use std::num::NonZeroU32;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::SourceError;
use crate::filter::{FilterList, FilterValue, options};
use crate::model::{CatalogItem, ChapterEntry, ItemStatus, MediaLocator, Page, PageEntry};
use crate::runtime::Fetcher;
use crate::source::utils::{decode_json, html_to_text, join_url, parse_datetime_millis};
use crate::source::{Branch, BranchCache, MediaGuard, QueryPolicy, Source};
use crate::transport::{Request, Response};

use super::{format_number, parse_base_url, rating_stars};

const DEFAULT_BASE_URL: &str = "https://newmanga.org";
const DEFAULT_API_URL: &str = "https://api.newmanga.org/v2/";
const DEFAULT_IMAGE_URL: &str = "https://storage.newmanga.org/";
const PAGE_SIZE: u32 = 30;

/// Slices up to this size are placeholder images.
const PLACEHOLDER_MAX_BYTES: usize = 320;
const PLACEHOLDER_FALLBACK_PATH: &str = "error-page/img/logo-fullsize.png";

pub struct Newbie {
    base_url: Url,
    api_url: Url,
    image_url: Url,
    branches: BranchCache,
    /// Locators whose detail payload marked them licensed.
    restricted: DashSet<String>,
    /// Slice count per intermediate page URL, filled from page indexes.
    slices: DashMap<String, u32>,
}

impl Newbie {
    /// Creates the adapter for the public site.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when a base URL does not parse.
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_urls(DEFAULT_BASE_URL, DEFAULT_API_URL, DEFAULT_IMAGE_URL)
    }

    /// Creates the adapter with custom site, API and image hosts (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when a base URL does not parse.
    pub fn with_base_urls(base_url: &str, api_url: &str, image_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            api_url: parse_base_url(&with_trailing_slash(api_url))?,
            image_url: parse_base_url(&with_trailing_slash(image_url))?,
            branches: BranchCache::new(),
            restricted: DashSet::new(),
            slices: DashMap::new(),
        })
    }

    /// Branches cached for `locator` by an earlier detail fetch.
    #[must_use]
    pub fn branch_cache(&self) -> &BranchCache {
        &self.branches
    }

    fn api(&self, path: &str) -> Result<Url, SourceError> {
        join_url(&self.api_url, path.trim_start_matches('/'))
    }

    fn listing_request(&self, path: &str, page: NonZeroU32, extra: &[(&str, &str)]) -> Result<Request, SourceError> {
        let size = PAGE_SIZE.to_string();
        let page = page.to_string();
        let mut params: Vec<(&str, &str)> = extra.to_vec();
        params.push(("size", &size));
        params.push(("page", &page));
        Ok(Request::get(self.api(path)?).with_query(&params))
    }

    fn image(&self, path: &str) -> Option<String> {
        let path = path.trim().trim_start_matches('/');
        if path.is_empty() {
            return None;
        }
        self.image_url.join(path).ok().map(String::from)
    }

    /// Fetches the detail payload and refreshes the branch cache and the
    /// restricted set for `locator`.
    async fn load_details(&self, fetcher: &Fetcher<'_>, locator: &str) -> Result<DetailDto, SourceError> {
        let url = self.api(&format!("projects/{}", locator.trim_start_matches('/')))?;
        let response = fetcher.get(url.as_str()).await?;
        let detail: DetailDto = decode_json(&response, "newbie detail")?;

        self.branches.insert(
            locator,
            detail
                .branches
                .iter()
                .map(|b| Branch::new(b.id.to_string(), b.is_default))
                .collect(),
        );
        if detail.is_restricted() {
            self.restricted.insert(locator.to_string());
        } else {
            self.restricted.remove(locator);
        }
        Ok(detail)
    }

    /// Fetches a chapter's page index and records every page's slice count.
    async fn load_page_index(
        &self,
        fetcher: &Fetcher<'_>,
        chapter_locator: &str,
    ) -> Result<Vec<(Url, u32)>, SourceError> {
        let response = fetcher.get(self.api(chapter_locator)?.as_str()).await?;
        let pages: Vec<PageDto> = decode_json(&response, "newbie page index")?;
        pages
            .iter()
            .map(|page| {
                let url = join_url(&self.api_url, &format!("{}/{}", chapter_locator.trim_matches('/'), page.id))?;
                let slices = page.slices.unwrap_or(1).max(1);
                self.slices.insert(url.to_string(), slices);
                Ok((url, slices))
            })
            .collect()
    }

    fn item_from_detail(&self, detail: DetailDto) -> CatalogItem {
        let rating = rounded_rating(detail.rating);
        let mut item = CatalogItem::new(detail.id.to_string(), detail.title.en);
        item.thumbnail = self.image(&detail.image.srcset.large);
        item.author = detail.author.map(|a| a.name);
        item.artist = detail.artist.map(|a| a.name);
        item.description = Some(format!(
            "{}\n{} {}\n{}",
            detail.title.ru,
            rating_stars(rating),
            format_number(rating),
            html_to_text(&detail.description)
        ));

        let mut genres = vec![type_label(&detail.kind)];
        if let Some(adult) = detail.adult {
            genres.push(age_label(&adult));
        }
        genres.extend(detail.genres.into_iter().map(|g| capitalize(&g.title.ru)));
        item.genres = genres;

        item.status = match detail.status.as_str() {
            "completed" => ItemStatus::Completed,
            "on_going" => ItemStatus::Ongoing,
            "licensed" => ItemStatus::Licensed,
            _ => ItemStatus::Unknown,
        };
        item
    }

    fn decode_listing(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let page: ItemsDto<Vec<LibraryDto>> = decode_json(response, "newbie listing")?;
        let items: Vec<CatalogItem> = page
            .items
            .into_iter()
            .map(|dto| {
                let thumbnail = self
                    .image(&dto.image.srcset.large)
                    .or_else(|| self.image(&dto.image.srcset.small));
                let mut item = CatalogItem::new(dto.id.to_string(), dto.title.en);
                item.thumbnail = thumbnail;
                item
            })
            .collect();
        let has_next = !items.is_empty();
        Ok(Page::new(items, has_next))
    }
}

#[async_trait]
impl Source for Newbie {
    fn id(&self) -> &str {
        "newbie"
    }

    fn name(&self) -> &str {
        "NewManga (Newbie)"
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
        QueryPolicy::Combined
    }

    fn build_popular_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        self.listing_request("projects/popular", page, &[("scale", "month")])
    }

    fn decode_popular_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        self.decode_listing(response)
    }

    fn build_latest_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        self.listing_request("projects/updates", page, &[("only_bookmarks", "false")])
    }

    fn build_search_request(
        &self,
        page: NonZeroU32,
        query: &str,
        filters: &FilterList,
    ) -> Result<Request, SourceError> {
        let query = query.trim();
        let request = if query.is_empty() {
            self.listing_request("projects/catalog", page, &[])?
        } else {
            self.listing_request("projects/search", page, &[("query", query)])?
        };
        Ok(request.with_query(&filters.encode()))
    }

    async fn fetch_details(&self, fetcher: &Fetcher<'_>, item: &CatalogItem) -> Result<CatalogItem, SourceError> {
        let detail = self.load_details(fetcher, &item.locator).await?;
        Ok(self.item_from_detail(detail))
    }

    async fn fetch_chapter_list(
        &self,
        fetcher: &Fetcher<'_>,
        item: &CatalogItem,
    ) -> Result<Vec<ChapterEntry>, SourceError> {
        let locator = item.locator.as_str();
        if self.branches.get(locator).is_none() {
            debug!(locator, "no cached branches, fetching details first");
            self.load_details(fetcher, locator).await?;
        }
        if item.status == ItemStatus::Licensed || self.restricted.contains(locator) {
            return Err(SourceError::unavailable(locator, "licensed: chapters removed from the site"));
        }
        let Some(branch) = self.branches.default_branch(locator) else {
            return Ok(Vec::new());
        };

        let url = self.api(&format!("branches/{}/chapters", branch.id))?;
        let request = Request::get(url).with_query(&[("reverse", "true"), ("size", "1000000")]);
        let response = fetcher.execute(request).await?;
        decode_chapters(&response, locator)
    }

    async fn fetch_page_list(
        &self,
        fetcher: &Fetcher<'_>,
        chapter: &ChapterEntry,
    ) -> Result<Vec<PageEntry>, SourceError> {
        let pages = self.load_page_index(fetcher, &chapter.locator).await?;
        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(index, (url, _))| {
                PageEntry::new(chapter.locator.as_str(), index, MediaLocator::Intermediate(url.to_string()))
            })
            .collect())
    }

    /// Expands an intermediate page into one `?slice=i` locator per slice.
    async fn resolve_page(&self, fetcher: &Fetcher<'_>, page: &PageEntry) -> Result<Vec<String>, SourceError> {
        let intermediate = match &page.media {
            MediaLocator::Direct(url) => return Ok(vec![url.clone()]),
            MediaLocator::Intermediate(url) => url,
        };
        let cached = self.slices.get(intermediate.as_str()).map(|entry| *entry);
        let slices = match cached {
            Some(slices) => slices,
            None => {
                debug!(page = %intermediate, "slice count not cached, fetching page index");
                self.load_page_index(fetcher, &page.chapter_locator)
                    .await?
                    .into_iter()
                    .find(|(url, _)| url.as_str() == intermediate)
                    .map(|(_, slices)| slices)
                    .ok_or_else(|| SourceError::decode("newbie page index", format!("{intermediate} missing")))?
            }
        };

        Ok((1..=slices).map(|i| format!("{intermediate}?slice={i}")).collect())
    }

    fn declare_filters(&self) -> FilterList {
        FilterList::new(vec![
            FilterValue::sort(
                "sorting",
                "Сортировка",
                "sorting",
                None,
                options(&[("rating", "По рейтингу"), ("fresh", "По новизне")]),
            ),
            FilterValue::checkbox_group("genres", "Жанры", "genres", options(GENRES)),
            FilterValue::checkbox_group(
                "types",
                "Тип",
                "types",
                options(&[
                    ("manga", "Манга"),
                    ("manhwa", "Манхва"),
                    ("manhya", "Маньхуа"),
                    ("single", "Сингл"),
                    ("oel", "OEL-манга"),
                    ("comics", "Комикс"),
                    ("russian", "Руманга"),
                ]),
            ),
            FilterValue::checkbox_group(
                "statuses",
                "Статус",
                "statuses",
                options(&[
                    ("on_going", "Продолжается"),
                    ("abandoned", "Заброшен"),
                    ("completed", "Завершён"),
                    ("suspended", "Приостановлен"),
                ]),
            ),
        ])
    }

    fn media_guard(&self) -> Option<MediaGuard> {
        let fallback = self.base_url.join(PLACEHOLDER_FALLBACK_PATH).ok()?;
        Some(MediaGuard::new(PLACEHOLDER_MAX_BYTES + 1, fallback))
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

fn decode_chapters(response: &Response, item_locator: &str) -> Result<Vec<ChapterEntry>, SourceError> {
    let wrapper: ItemsDto<Vec<BookDto>> = decode_json(response, "newbie chapter list")?;
    Ok(wrapper
        .items
        .into_iter()
        .filter(|book| book.is_available)
        .map(|book| {
            let mut name = format!("{}. Глава {}", book.tom, format_number(book.number));
            if let Some(title) = book.name.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                name.push(' ');
                name.push_str(&capitalize(title));
            }
            let mut chapter = ChapterEntry::new(item_locator, format!("/chapters/{}/pages", book.id), name);
            chapter.number = Some(book.number);
            chapter.uploaded_at = book
                .created_at
                .as_deref()
                .and_then(|raw| raw.get(..19))
                .map_or(0, |raw| parse_datetime_millis(raw, "%Y-%m-%dT%H:%M:%S"));
            chapter.scanlator = book.translator.filter(|t| !t.trim().is_empty());
            chapter
        })
        .collect())
}

/// The API rates out of 5; listings show a 0-10 score with two decimals.
fn rounded_rating(rating: f32) -> f32 {
    (rating * 200.0).round() / 100.0
}

fn type_label(kind: &str) -> String {
    match kind {
        "manga" => "Манга",
        "manhwa" => "Манхва",
        "manhya" => "Маньхуа",
        "single" => "Сингл",
        "comics" => "Комикс",
        "russian" => "Руманга",
        other => other,
    }
    .to_string()
}

fn age_label(adult: &str) -> String {
    if adult.trim().is_empty() {
        "0+".to_string()
    } else {
        format!("{}+", adult.trim())
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct ItemsDto<T> {
    items: T,
}

#[derive(Debug, Deserialize)]
struct TitleDto {
    #[serde(default)]
    en: String,
    #[serde(default)]
    ru: String,
}

#[derive(Debug, Deserialize)]
struct ImageDto {
    srcset: SrcsetDto,
}

#[derive(Debug, Deserialize)]
struct SrcsetDto {
    #[serde(default)]
    large: String,
    #[serde(default)]
    small: String,
}

#[derive(Debug, Deserialize)]
struct LibraryDto {
    id: u64,
    title: TitleDto,
    image: ImageDto,
}

#[derive(Debug, Deserialize)]
struct NameDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenreDto {
    title: TitleDto,
}

#[derive(Debug, Deserialize)]
struct BranchDto {
    id: u64,
    #[serde(default)]
    is_default: bool,
}

#[derive(Debug, Deserialize)]
struct DetailDto {
    id: u64,
    title: TitleDto,
    image: ImageDto,
    #[serde(default)]
    author: Option<NameDto>,
    #[serde(default)]
    artist: Option<NameDto>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    genres: Vec<GenreDto>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    adult: Option<String>,
    #[serde(default)]
    rating: f32,
    #[serde(default)]
    status: String,
    #[serde(default)]
    branches: Vec<BranchDto>,
}

impl DetailDto {
    fn is_restricted(&self) -> bool {
        self.status == "licensed"
    }
}

#[derive(Debug, Deserialize)]
struct BookDto {
    id: u64,
    tom: u32,
    number: f32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    translator: Option<String>,
    #[serde(default)]
    is_available: bool,
}

#[derive(Debug, Deserialize)]
struct PageDto {
    id: u64,
    #[serde(default)]
    slices: Option<u32>,
}

const GENRES: &[(&str, &str)] = &[
    ("28", "Сёнэн-ай"),
    ("17", "Боевик"),
    ("33", "Боевые искусства"),
    ("34", "Гарем"),
    ("3", "Гендерная интрига"),
    ("19", "Героическое фэнтези"),
    ("35", "Детектив"),
    ("4", "Дзёсэй"),
    ("20", "Додзинси"),
    ("36", "Драма"),
    ("5", "Исекай"),
    ("21", "Игра"),
    ("37", "История"),
    ("6", "Комедия"),
    ("22", "Киберпанк"),
    ("38", "Кодомо"),
    ("7", "Криминал"),
    ("23", "Махо-сёдзё"),
    ("39", "Меха"),
    ("8", "Мистика"),
    ("24", "Научная фантастика"),
    ("40", "Омегаверс"),
    ("9", "Повседневность"),
    ("25", "Постапокалиптика"),
    ("41", "Приключения"),
    ("10", "Психология"),
    ("26", "Романтика"),
    ("42", "Самурайский боевик"),
    ("11", "Сверхъестественное"),
    ("27", "Сёдзё"),
    ("43", "Сёдзё-ай"),
    ("13", "Сёнэн"),
    ("44", "Спорт"),
    ("12", "Сэйнэн"),
    ("29", "Трагедия"),
    ("45", "Триллер"),
    ("14", "Ужасы"),
    ("30", "Фантастика"),
    ("46", "Фэнтези"),
    ("15", "Школа"),
    ("1", "Элементы юмора"),
    ("31", "Эротика"),
    ("47", "Этти"),
    ("16", "Юри"),
    ("32", "Яой"),
];

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::Headers;

    fn newbie() -> Newbie {
        Newbie::new().unwrap()
    }

    fn response(url: &str, body: &str) -> Response {
        Response::new(200, Url::parse(url).unwrap(), Headers::new(), body.as_bytes().to_vec())
    }

    fn page(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn test_popular_request_targets_api_host() {
        let request = newbie().build_popular_request(page(2)).unwrap();
        assert_eq!(
            request.url.as_str(),
            "https://api.newmanga.org/v2/projects/popular?scale=month&size=30&page=2"
        );
    }

    #[test]
    fn test_search_with_query_keeps_filters() {
        let source = newbie();
        let mut filters = source.declare_filters();
        filters.set_checked("types", "manhwa", true).unwrap();
        let request = source.build_search_request(page(1), "solo", &filters).unwrap();
        let url = request.url.as_str();
        assert!(url.starts_with("https://api.newmanga.org/v2/projects/search?"), "{url}");
        assert!(url.contains("query=solo"));
        assert!(url.contains("sorting=rating"));
        assert!(url.contains("types=manhwa"));
    }

    #[test]
    fn test_search_without_query_uses_catalog() {
        let source = newbie();
        let request = source
            .build_search_request(page(1), "", &source.declare_filters())
            .unwrap();
        assert!(request.url.path().ends_with("/projects/catalog"));
    }

    #[test]
    fn test_sort_has_no_direction_param() {
        let filters = newbie().declare_filters();
        let encoded = filters.encode();
        assert_eq!(encoded, vec![("sorting".to_string(), "rating".to_string())]);
    }

    #[test]
    fn test_genre_ids_unique() {
        let mut ids: Vec<&str> = GENRES.iter().map(|(id, _)| *id).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_decode_listing_prefers_large_image() {
        let body = r#"{"items": [
            {"id": 7, "title": {"en": "Solo", "ru": "Соло"}, "image": {"srcset": {"large": "p/7/l.jpg", "small": "p/7/s.jpg"}}},
            {"id": 8, "title": {"en": "Duo", "ru": "Дуо"}, "image": {"srcset": {"large": "", "small": "p/8/s.jpg"}}}
        ]}"#;
        let result = newbie()
            .decode_popular_response(&response("https://api.newmanga.org/v2/projects/popular", body))
            .unwrap();
        assert!(result.has_next);
        assert_eq!(result.items[0].locator, "7");
        assert_eq!(result.items[0].thumbnail.as_deref(), Some("https://storage.newmanga.org/p/7/l.jpg"));
        assert_eq!(result.items[1].thumbnail.as_deref(), Some("https://storage.newmanga.org/p/8/s.jpg"));
    }

    #[test]
    fn test_empty_listing_is_final() {
        let result = newbie()
            .decode_popular_response(&response("https://api.newmanga.org/v2/projects/popular", r#"{"items": []}"#))
            .unwrap();
        assert!(result.is_empty());
        assert!(!result.has_next);
    }

    #[test]
    fn test_decode_chapters_filters_unavailable() {
        let body = r#"{"items": [
            {"id": 100, "tom": 1, "number": 1, "name": "начало", "created_at": "2021-03-04T10:00:00.000Z", "translator": "Team", "is_available": true},
            {"id": 101, "tom": 1, "number": 1.5, "name": null, "created_at": null, "translator": "", "is_available": true},
            {"id": 102, "tom": 1, "number": 2, "is_available": false}
        ]}"#;
        let chapters = decode_chapters(&response("https://api.newmanga.org/v2/branches/5/chapters", body), "7").unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].name, "1. Глава 1 Начало");
        assert_eq!(chapters[0].locator, "/chapters/100/pages");
        assert_eq!(chapters[0].uploaded_at, 1_614_852_000_000);
        assert_eq!(chapters[0].scanlator.as_deref(), Some("Team"));
        assert_eq!(chapters[1].name, "1. Глава 1.5");
        assert_eq!(chapters[1].number, Some(1.5));
        assert_eq!(chapters[1].uploaded_at, 0);
        assert!(chapters[1].scanlator.is_none());
    }

    #[test]
    fn test_item_from_detail_decorates_description() {
        let body = r#"{
            "id": 7, "title": {"en": "Solo", "ru": "Соло"},
            "image": {"srcset": {"large": "p/7/l.jpg", "small": ""}},
            "author": {"name": "Chugong"}, "artist": null,
            "description": "<p>Hunter <b>story</b></p>",
            "genres": [{"title": {"en": "action", "ru": "боевик"}}],
            "type": "manhwa", "adult": "16", "rating": 4.6, "status": "on_going",
            "branches": [{"id": 55, "is_default": true}]
        }"#;
        let source = newbie();
        let detail: DetailDto = serde_json::from_str(body).unwrap();
        let item = source.item_from_detail(detail);
        assert_eq!(item.title, "Solo");
        assert_eq!(item.author.as_deref(), Some("Chugong"));
        assert_eq!(item.status, ItemStatus::Ongoing);
        assert_eq!(item.genres, vec!["Манхва", "16+", "Боевик"]);
        assert_eq!(item.description.as_deref(), Some("Соло\n★★★★✬ 9.2\nHunter story"));
    }

    #[test]
    fn test_media_guard_uses_site_logo() {
        let guard = newbie().media_guard().unwrap();
        assert_eq!(guard.min_bytes, 321);
        assert_eq!(guard.fallback, "https://newmanga.org/error-page/img/logo-fullsize.png");
    }
}
