//! Desu (desu.me): Russian manga catalog with a JSON API.
//!
//! All listings come from `/manga/api/`; the detail payload carries the full
//! chapter list. Search combines the query with filters, and multi-valued
//! filters travel as one comma-joined parameter. Chapters keep API order
//! (newest first).

use std::num::NonZeroU32;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::SourceError;
use crate::filter::{FilterList, FilterValue, options};
use crate::model::{CatalogItem, ChapterEntry, ItemStatus, MediaLocator, Page, PageEntry};
use crate::runtime::Fetcher;
use crate::source::utils::{decode_json, join_url, primary_title};
use crate::source::{QueryPolicy, Source};
use crate::transport::{Request, Response};

use super::{format_number, parse_base_url, rating_stars};

const DEFAULT_BASE_URL: &str = "https://desu.me";
const API_PATH: &str = "/manga/api";
const LISTING_LIMIT: u32 = 50;
const SEARCH_LIMIT: u32 = 20;

/// Filter parameters the site expects as one comma-joined value.
const JOINED_PARAMS: [&str; 2] = ["kinds", "genres"];

pub struct Desu {
    base_url: Url,
}

impl Desu {
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

    fn api_url(&self, locator: &str) -> Result<Url, SourceError> {
        join_url(&self.base_url, &format!("{API_PATH}{locator}"))
    }

    fn listing_request(&self, page: NonZeroU32, order: &str) -> Result<Request, SourceError> {
        let limit = LISTING_LIMIT.to_string();
        let page = page.to_string();
        Ok(Request::get(self.api_url("/")?).with_query(&[
            ("limit", limit.as_str()),
            ("order", order),
            ("page", page.as_str()),
        ]))
    }

    async fn fetch_detail_dto(&self, fetcher: &Fetcher<'_>, locator: &str) -> Result<MangaDto, SourceError> {
        let response = fetcher.get(self.api_url(locator)?.as_str()).await?;
        let detail: DetailDto = decode_json(&response, "desu detail")?;
        Ok(detail.response)
    }
}

#[async_trait]
impl Source for Desu {
    fn id(&self) -> &str {
        "desu"
    }

    fn name(&self) -> &str {
        "Desu"
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

    fn supports_id_search(&self) -> bool {
        true
    }

    fn build_popular_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        self.listing_request(page, "popular")
    }

    fn decode_popular_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        decode_listing(response)
    }

    fn build_latest_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        self.listing_request(page, "updated")
    }

    fn build_search_request(
        &self,
        page: NonZeroU32,
        query: &str,
        filters: &FilterList,
    ) -> Result<Request, SourceError> {
        let mut params = vec![
            ("limit".to_string(), SEARCH_LIMIT.to_string()),
            ("page".to_string(), page.to_string()),
        ];
        params.extend(join_multi_values(filters.encode()));
        if !query.trim().is_empty() {
            params.push(("search".to_string(), query.trim().to_string()));
        }
        Ok(Request::get(self.api_url("/")?).with_query(&params))
    }

    async fn search_by_id(&self, fetcher: &Fetcher<'_>, id: &str) -> Result<Page<CatalogItem>, SourceError> {
        let locator = format!("/{id}");
        let dto = self.fetch_detail_dto(fetcher, &locator).await?;
        let mut item = dto.into_item();
        item.locator = locator;
        Ok(Page::new(vec![item], false))
    }

    async fn fetch_details(&self, fetcher: &Fetcher<'_>, item: &CatalogItem) -> Result<CatalogItem, SourceError> {
        let dto = self.fetch_detail_dto(fetcher, &item.locator).await?;
        Ok(dto.into_item())
    }

    async fn fetch_chapter_list(
        &self,
        fetcher: &Fetcher<'_>,
        item: &CatalogItem,
    ) -> Result<Vec<ChapterEntry>, SourceError> {
        let response = fetcher.get(self.api_url(&item.locator)?.as_str()).await?;
        decode_chapters(&response, &item.locator)
    }

    async fn fetch_page_list(
        &self,
        fetcher: &Fetcher<'_>,
        chapter: &ChapterEntry,
    ) -> Result<Vec<PageEntry>, SourceError> {
        let response = fetcher.get(self.api_url(&chapter.locator)?.as_str()).await?;
        decode_pages(&response, &chapter.locator)
    }

    fn declare_filters(&self) -> FilterList {
        FilterList::new(vec![
            FilterValue::select(
                "order",
                "Сортировка",
                "order",
                options(&[
                    ("popular", "Популярность"),
                    ("updated", "Дата"),
                    ("name", "Имя"),
                ]),
            ),
            FilterValue::checkbox_group(
                "kinds",
                "Тип",
                "kinds",
                options(&[
                    ("manga", "Манга"),
                    ("manhwa", "Манхва"),
                    ("manhua", "Маньхуа"),
                    ("one_shot", "Ваншот"),
                    ("comics", "Комикс"),
                ]),
            ),
            FilterValue::checkbox_group("genres", "Жанр", "genres", options(GENRES)),
        ])
    }
}

/// Merges repeated keys of [`JOINED_PARAMS`] into one comma-joined pair at
/// the position of the first occurrence.
fn join_multi_values(params: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut joined: Vec<(String, String)> = Vec::with_capacity(params.len());
    for (key, value) in params {
        if JOINED_PARAMS.contains(&key.as_str())
            && let Some((_, existing)) = joined.iter_mut().find(|(k, _)| *k == key)
        {
            existing.push(',');
            existing.push_str(&value);
            continue;
        }
        joined.push((key, value));
    }
    joined
}

fn decode_listing(response: &Response) -> Result<Page<CatalogItem>, SourceError> {
    let listing: ListingDto = decode_json(response, "desu listing")?;
    let nav = listing.page_nav;
    let has_next = nav.count > nav.page.saturating_mul(nav.limit);
    let items = listing
        .response
        .into_iter()
        .map(MangaDto::into_item)
        .collect();
    Ok(Page::new(items, has_next))
}

fn decode_chapters(response: &Response, item_locator: &str) -> Result<Vec<ChapterEntry>, SourceError> {
    let detail: ChapterHolderDto = decode_json(response, "desu chapter list")?;
    let manga_id = detail.response.id;
    Ok(detail
        .response
        .chapters
        .list
        .into_iter()
        .map(|chapter| {
            let number = format_number(chapter.ch);
            let vol = format_number(chapter.vol);
            let name = match chapter.title.as_deref().map(str::trim) {
                Some(title) if !title.is_empty() => format!("{vol}. Глава {number} {title}"),
                _ => format!("{vol}. Глава {number}"),
            };
            let mut entry = ChapterEntry::new(
                item_locator,
                format!("/{manga_id}/chapter/{}", chapter.id),
                name,
            );
            entry.number = Some(chapter.ch);
            entry.uploaded_at = chapter.date.saturating_mul(1000);
            entry
        })
        .collect())
}

fn decode_pages(response: &Response, chapter_locator: &str) -> Result<Vec<PageEntry>, SourceError> {
    let holder: PagesHolderDto = decode_json(response, "desu page list")?;
    Ok(holder
        .response
        .pages
        .list
        .into_iter()
        .enumerate()
        .map(|(index, page)| PageEntry::new(chapter_locator, index, MediaLocator::Direct(page.img)))
        .collect())
}

fn kind_label(kind: Option<&str>) -> &'static str {
    match kind {
        Some("manhwa") => "Манхва",
        Some("manhua") => "Маньхуа",
        Some("comics") => "Комикс",
        Some("one_shot") => "Ваншот",
        _ => "Манга",
    }
}

#[derive(Debug, Deserialize)]
struct ListingDto {
    response: Vec<MangaDto>,
    #[serde(rename = "pageNavParams")]
    page_nav: PageNavDto,
}

#[derive(Debug, Deserialize)]
struct PageNavDto {
    count: u32,
    limit: u32,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct DetailDto {
    response: MangaDto,
}

#[derive(Debug, Deserialize)]
struct MangaDto {
    id: u64,
    name: String,
    #[serde(default)]
    russian: Option<String>,
    image: ImageDto,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_f32_opt")]
    score: Option<f32>,
    #[serde(default)]
    score_users: Option<u32>,
    #[serde(default)]
    adult: Option<u8>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    synonyms: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    genres: Option<GenresDto>,
}

/// Listings carry genres as one joined string, details as objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenresDto {
    Joined(String),
    List(Vec<GenreDto>),
}

#[derive(Debug, Deserialize)]
struct GenreDto {
    russian: String,
}

#[derive(Debug, Deserialize)]
struct ImageDto {
    original: String,
}

impl MangaDto {
    fn into_item(self) -> CatalogItem {
        let score = self.score.unwrap_or_default();
        let mut description = format!(
            "{}\n{} {} (голосов: {})\n",
            self.russian.as_deref().unwrap_or_default(),
            rating_stars(score),
            score,
            self.score_users.unwrap_or_default()
        );
        if let Some(synonyms) = self.synonyms.as_deref().filter(|s| !s.trim().is_empty()) {
            description.push_str("Альтернативные названия:\n");
            description.push_str(&synonyms.replace('|', " / "));
            description.push_str("\n\n");
        }
        description.push_str(self.description.as_deref().unwrap_or_default());

        let mut genres: Vec<String> = match self.genres {
            Some(GenresDto::List(list)) => list.into_iter().map(|g| g.russian).collect(),
            Some(GenresDto::Joined(joined)) => joined
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        genres.push(kind_label(self.kind.as_deref()).to_string());
        genres.push(if self.adult == Some(1) { "18+" } else { "0+" }.to_string());

        let status = match self.status.as_deref() {
            Some("ongoing") => ItemStatus::Ongoing,
            Some("released") => ItemStatus::Completed,
            _ => ItemStatus::Unknown,
        };

        let mut item =
            CatalogItem::new(format!("/{}", self.id), primary_title(&self.name)).with_thumbnail(self.image.original);
        item.description = Some(description);
        item.genres = genres;
        item.status = status;
        item
    }
}

#[derive(Debug, Deserialize)]
struct ChapterHolderDto {
    response: ChapterHolderInnerDto,
}

#[derive(Debug, Deserialize)]
struct ChapterHolderInnerDto {
    id: u64,
    chapters: ChapterListDto,
}

#[derive(Debug, Deserialize)]
struct ChapterListDto {
    list: Vec<ChapterDto>,
}

#[derive(Debug, Deserialize)]
struct ChapterDto {
    id: u64,
    #[serde(deserialize_with = "lenient_f32")]
    vol: f32,
    #[serde(deserialize_with = "lenient_f32")]
    ch: f32,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: i64,
}

#[derive(Debug, Deserialize)]
struct PagesHolderDto {
    response: PagesInnerDto,
}

#[derive(Debug, Deserialize)]
struct PagesInnerDto {
    pages: PageListDto,
}

#[derive(Debug, Deserialize)]
struct PageListDto {
    list: Vec<PageDto>,
}

#[derive(Debug, Deserialize)]
struct PageDto {
    img: String,
}

/// The API sends numbers either as JSON numbers or as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

#[allow(clippy::cast_possible_truncation)]
fn lenient_f32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n as f32),
        NumberOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn lenient_f32_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f32>, D::Error> {
    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(NumberOrText::Number(n)) => Some(n as f32),
        Some(NumberOrText::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

const GENRES: &[(&str, &str)] = &[
    ("Dementia", "Безумие"),
    ("Martial Arts", "Боевые искусства"),
    ("Vampire", "Вампиры"),
    ("Military", "Военное"),
    ("Harem", "Гарем"),
    ("Demons", "Демоны"),
    ("Mystery", "Детектив"),
    ("Kids", "Детское"),
    ("Josei", "Дзёсей"),
    ("Doujinshi", "Додзинси"),
    ("Drama", "Драма"),
    ("Game", "Игры"),
    ("Historical", "Исторический"),
    ("Comedy", "Комедия"),
    ("Space", "Космос"),
    ("Magic", "Магия"),
    ("Cars", "Машины"),
    ("Mecha", "Меха"),
    ("Music", "Музыка"),
    ("Parody", "Пародия"),
    ("Slice of Life", "Повседневность"),
    ("Police", "Полиция"),
    ("Adventure", "Приключения"),
    ("Psychological", "Психологическое"),
    ("Romance", "Романтика"),
    ("Samurai", "Самураи"),
    ("Supernatural", "Сверхъестественное"),
    ("Shoujo", "Сёдзе"),
    ("Shoujo Ai", "Сёдзе Ай"),
    ("Seinen", "Сейнен"),
    ("Shounen", "Сёнен"),
    ("Shounen Ai", "Сёнен Ай"),
    ("Gender Bender", "Смена пола"),
    ("Sports", "Спорт"),
    ("Super Power", "Супер сила"),
    ("Thriller", "Триллер"),
    ("Horror", "Ужасы"),
    ("Sci-Fi", "Фантастика"),
    ("Fantasy", "Фэнтези"),
    ("Hentai", "Хентай"),
    ("School", "Школа"),
    ("Action", "Экшен"),
    ("Ecchi", "Этти"),
    ("Yuri", "Юри"),
    ("Yaoi", "Яой"),
];
