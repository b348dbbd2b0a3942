//! Baozimanhua (baozimh.com): Chinese catalog rendered as HTML.
//!
//! Listings have no pagination markers; a full page (36 cards in the catalog,
//! 12 in the latest feed) means another page may follow. Text search ignores
//! the catalog filters and returns a single page. `id:<slug>` looks a comic up
//! directly. The site lists chapters oldest first; they are returned newest
//! first.

use std::num::NonZeroU32;
use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::SourceError;
use crate::filter::{FilterList, FilterValue, options};
use crate::model::{CatalogItem, ChapterEntry, ItemStatus, MediaLocator, Page, PageEntry};
use crate::runtime::Fetcher;
use crate::source::utils::{
    absolutize_url, compile_static_selector, element_text, join_url, relative_locator, select_attr,
    select_text,
};
use crate::source::{QueryPolicy, Source};
use crate::transport::{Request, Response};

use super::parse_base_url;

const DEFAULT_BASE_URL: &str = "https://cn.baozimh.com";
const CATALOG_PAGE_SIZE: usize = 36;
const LATEST_PAGE_SIZE: usize = 12;

static CARD: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.pure-g div a.comics-card__poster"));
static CARD_IMG: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("amp-img"));

static DETAIL_TITLE: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("h1.comics-detail__title"));
static DETAIL_COVER: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.pure-g div > amp-img"));
static DETAIL_AUTHOR: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("h2.comics-detail__author"));
static DETAIL_DESC: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("p.comics-detail__desc"));
static DETAIL_STATUS: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.tag-list > span.tag"));

static CHAPTER: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.pure-g[id^=chapter] > div"));
static LINK: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a"));

static PAGE_IMG: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("section.comic-contain > amp-img"));

pub struct Baozimanhua {
    base_url: Url,
}

impl Baozimanhua {
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

    fn decode_cards(&self, response: &Response) -> Vec<CatalogItem> {
        let document = Html::parse_document(&response.text());
        document
            .select(&CARD)
            .filter_map(|card| self.card_item(card))
            .collect()
    }

    fn card_item(&self, card: ElementRef<'_>) -> Option<CatalogItem> {
        let locator = relative_locator(card.value().attr("href")?, &self.base_url)?;
        let title = card.value().attr("title").unwrap_or_default().trim();
        let mut item = CatalogItem::new(locator, title);
        item.thumbnail =
            select_attr(card, &CARD_IMG, "src").and_then(|src| absolutize_url(&src, &self.base_url));
        Some(item)
    }
}

#[async_trait]
impl Source for Baozimanhua {
    fn id(&self) -> &str {
        "baozimanhua"
    }

    fn name(&self) -> &str {
        "Baozimanhua"
    }

    fn lang(&self) -> &str {
        "zh"
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

    fn supports_id_search(&self) -> bool {
        true
    }

    /// The unfiltered catalog has a single page.
    fn build_popular_request(&self, _page: NonZeroU32) -> Result<Request, SourceError> {
        Ok(Request::get(join_url(&self.base_url, "/classify")?))
    }

    fn decode_popular_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let items = self.decode_cards(response);
        let has_next = items.len() == CATALOG_PAGE_SIZE;
        Ok(Page::new(items, has_next))
    }

    fn build_latest_request(&self, _page: NonZeroU32) -> Result<Request, SourceError> {
        Ok(Request::get(join_url(&self.base_url, "/list/new")?))
    }

    fn decode_latest_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let items = self.decode_cards(response);
        let has_next = items.len() == LATEST_PAGE_SIZE;
        Ok(Page::new(items, has_next))
    }

    fn build_search_request(
        &self,
        page: NonZeroU32,
        query: &str,
        filters: &FilterList,
    ) -> Result<Request, SourceError> {
        let query = query.trim();
        if !query.is_empty() {
            return Ok(Request::get(join_url(&self.base_url, "/search")?).with_query(&[("q", query)]));
        }
        let page = page.to_string();
        let mut params = filters.encode();
        params.push(("page".to_string(), page));
        Ok(Request::get(join_url(&self.base_url, "/classify")?).with_query(&params))
    }

    fn decode_search_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        let items = self.decode_cards(response);
        let has_next = response.url.path() != "/search" && items.len() == CATALOG_PAGE_SIZE;
        Ok(Page::new(items, has_next))
    }

    async fn search_by_id(&self, fetcher: &Fetcher<'_>, id: &str) -> Result<Page<CatalogItem>, SourceError> {
        let locator = format!("/comic/{id}");
        let response = fetcher.get(&locator).await?;
        let item = decode_details(&response.text(), &self.base_url, &locator);
        Ok(Page::new(vec![item], false))
    }

    async fn fetch_details(&self, fetcher: &Fetcher<'_>, item: &CatalogItem) -> Result<CatalogItem, SourceError> {
        let response = fetcher.get(&item.locator).await?;
        Ok(decode_details(&response.text(), &self.base_url, &item.locator))
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
            FilterValue::select("type", "类型", "type", options(TAGS)),
            FilterValue::select(
                "region",
                "地区",
                "region",
                options(&[
                    ("all", "全部"),
                    ("cn", "国漫"),
                    ("jp", "日本"),
                    ("kr", "韩国"),
                    ("en", "欧美"),
                ]),
            ),
            FilterValue::select(
                "state",
                "进度",
                "state",
                options(&[("all", "全部"), ("serial", "连载中"), ("pub", "已完结")]),
            ),
            FilterValue::select(
                "filter",
                "标题开头",
                "filter",
                options(&[
                    ("*", "全部"),
                    ("ABCD", "ABCD"),
                    ("EFGH", "EFGH"),
                    ("IJKL", "IJKL"),
                    ("MNOP", "MNOP"),
                    ("QRST", "QRST"),
                    ("UVW", "UVW"),
                    ("XYZ", "XYZ"),
                    ("0-9", "0-9"),
                ]),
            ),
        ])
    }
}

fn decode_details(html: &str, base_url: &Url, locator: &str) -> CatalogItem {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut item = CatalogItem::new(locator, select_text(root, &DETAIL_TITLE).unwrap_or_default());
    item.thumbnail =
        select_attr(root, &DETAIL_COVER, "src").and_then(|src| absolutize_url(&src, base_url));
    item.author = select_text(root, &DETAIL_AUTHOR);
    item.description = select_text(root, &DETAIL_DESC);
    item.status = select_text(root, &DETAIL_STATUS).map_or(ItemStatus::Unknown, |tag| {
        match tag.as_str() {
            "連載中" | "连载中" => ItemStatus::Ongoing,
            "已完結" | "已完结" => ItemStatus::Completed,
            _ => ItemStatus::Unknown,
        }
    });
    item
}

fn decode_chapters(html: &str, base_url: &Url, item_locator: &str) -> Vec<ChapterEntry> {
    let document = Html::parse_document(html);
    let mut chapters: Vec<ChapterEntry> = document
        .select(&CHAPTER)
        .filter_map(|entry| {
            let href = select_attr(entry, &LINK, "href")?;
            let locator = relative_locator(&href, base_url)?;
            Some(ChapterEntry::new(item_locator, locator, element_text(entry)))
        })
        .collect();
    chapters.reverse();
    chapters
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

const TAGS: &[(&str, &str)] = &[
    ("all", "全部"),
    ("dushi", "都市"),
    ("mouxian", "冒险"),
    ("rexie", "热血"),
    ("lianai", "恋爱"),
    ("danmei", "耽美"),
    ("wuxia", "武侠"),
    ("gedou", "格斗"),
    ("kehuan", "科幻"),
    ("mohuan", "魔幻"),
    ("tuili", "推理"),
    ("xuanhuan", "玄幻"),
    ("richang", "日常"),
    ("shenghuo", "生活"),
    ("gaoxiao", "搞笑"),
    ("xiaoyuan", "校园"),
    ("qihuan", "奇幻"),
    ("mengxi", "萌系"),
    ("chuanyue", "穿越"),
    ("hougong", "后宫"),
    ("zhanzheng", "战争"),
    ("lishi", "历史"),
    ("juqing", "剧情"),
    ("tongren", "同人"),
    ("jingji", "竞技"),
    ("lizhi", "励志"),
    ("zhiyu", "治愈"),
    ("jijia", "机甲"),
    ("chunai", "纯爱"),
    ("meishi", "美食"),
    ("egao", "恶搞"),
    ("nuexin", "虐心"),
    ("dongzuo", "动作"),
    ("liangxian", "惊险"),
    ("weimei", "唯美"),
    ("fuchou", "复仇"),
    ("naodong", "脑洞"),
    ("gongdou", "宫斗"),
    ("yundong", "运动"),
    ("lingyi", "灵异"),
    ("gufeng", "古风"),
    ("quanmou", "权谋"),
    ("jiecao", "节操"),
    ("mingxing", "明星"),
    ("anhei", "暗黑"),
    ("shehui", "社会"),
    ("yinlewudao", "音乐舞蹈"),
    ("dongfang", "东方"),
    ("aa", "AA"),
    ("xuanyi", "悬疑"),
    ("qingxiaoshuo", "轻小说"),
    ("bazong", "霸总"),
    ("luoli", "萝莉"),
    ("zhandou", "战斗"),
    ("liangsong", "惊悚"),
    ("yuri", "百合"),
    ("danuzhu", "大女主"),
    ("huanxiang", "幻想"),
    ("shaonu", "少女"),
    ("shaonian", "少年"),
    ("xingzhuanhuan", "性转换"),
    ("zhongsheng", "重生"),
    ("hanman", "韩漫"),
    ("qita", "其他"),
];
