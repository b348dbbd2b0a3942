//! Integration tests for the reqwest transport and adapters over real HTTP.
//!
//! Uses wiremock; tests skip when the environment cannot bind a localhost
//! socket unless `SOURCEKIT_REQUIRE_SOCKET_TESTS=1`.

use std::num::NonZeroU32;
use std::sync::Arc;

use sourcekit_core::model::{CatalogItem, ItemStatus};
use sourcekit_core::ratelimit::RateLimiter;
use sourcekit_core::runtime::{CallOptions, SourceRuntime};
use sourcekit_core::session::SessionStore;
use sourcekit_core::source::Source;
use sourcekit_core::sources::{Baozimanhua, ComX, Desu};
use sourcekit_core::transport::{HttpTimeouts, ReqwestTransport, Request, Transport};
use sourcekit_core::{FailureKind, SourceError, TransportError};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn transport() -> ReqwestTransport {
    ReqwestTransport::new("sourcekit-test/1.0", HttpTimeouts::default()).unwrap()
}

fn runtime() -> SourceRuntime {
    SourceRuntime::new(
        Arc::new(transport()),
        Arc::new(RateLimiter::disabled()),
        Arc::new(SessionStore::new()),
    )
}

// ==================== Transport ====================

#[tokio::test]
async fn test_non_success_status_is_a_response() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .mount(&mock_server)
        .await;

    let request = Request::get_str(&format!("{}/missing", mock_server.uri())).unwrap();
    let response = transport().execute(request).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(response.text(), "nope");
}

#[tokio::test]
async fn test_post_form_body_and_headers_are_sent() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/index.php"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(header("user-agent", "sourcekit-test/1.0"))
        .and(body_string("do=search&subaction=search&story=batman"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/index.php", mock_server.uri()).parse().unwrap();
    let request = Request::post_form(
        url,
        &[("do", "search"), ("subaction", "search"), ("story", "batman")],
    );
    let response = transport().execute(request).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_response_headers_keep_repeated_values() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/cookies"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "a=1; Path=/")
                .append_header("Set-Cookie", "b=2; Path=/"),
        )
        .mount(&mock_server)
        .await;

    let request = Request::get_str(&format!("{}/cookies", mock_server.uri())).unwrap();
    let response = transport().execute(request).await.unwrap();
    assert_eq!(response.headers.get_all("set-cookie").count(), 2);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Port 9 (discard) is closed on test machines.
    let request = Request::get_str("http://127.0.0.1:9/").unwrap();
    let error = transport().execute(request).await.unwrap_err();
    assert!(matches!(
        error,
        TransportError::Network { .. } | TransportError::Timeout { .. }
    ));
}

// ==================== Adapters over HTTP ====================

#[tokio::test]
async fn test_desu_popular_over_http() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/manga/api/"))
        .and(query_param("order", "popular"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"response": [{"id": 7, "name": "Monster", "russian": "Монстр",
                "image": {"original": "https://desu.me/m.jpg"}}],
                "pageNavParams": {"count": 120, "limit": 50, "page": 2}}"#,
        ))
        .mount(&mock_server)
        .await;

    let source = Desu::with_base_url(&mock_server.uri()).unwrap();
    let result = runtime()
        .fetch_popular(&source, NonZeroU32::new(2).unwrap(), CallOptions::default())
        .await
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].title, "Monster");
    assert!(result.has_next, "120 items at 50 per page leave a third page");
}

#[tokio::test]
async fn test_comx_search_posts_query() {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/index.php"))
        .and(query_param("search_start", "1"))
        .and(body_string("do=search&subaction=search&story=batman"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<div id=\"dle-content\"></div>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = ComX::with_base_url(&mock_server.uri()).unwrap();
    let result = runtime()
        .search(
            &source,
            NonZeroU32::MIN,
            "batman",
            &source.declare_filters(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert!(result.is_empty());
    assert!(!result.has_next);
}

#[tokio::test]
async fn test_baozimanhua_details_over_http() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/comic/yaoshenji"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <h1 class="comics-detail__title">妖神记</h1>
                <h2 class="comics-detail__author">发飙的蜗牛</h2>
                <p class="comics-detail__desc">一个少年的故事。</p>
                <div class="tag-list"><span class="tag">连载中</span><span class="tag">玄幻</span></div>
            </body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let source = Baozimanhua::with_base_url(&mock_server.uri()).unwrap();
    let item = CatalogItem::new("/comic/yaoshenji", "");
    let details = runtime()
        .fetch_details(&source, &item, CallOptions::default())
        .await
        .unwrap();

    assert_eq!(details.locator, "/comic/yaoshenji");
    assert_eq!(details.title, "妖神记");
    assert_eq!(details.author.as_deref(), Some("发飙的蜗牛"));
    assert_eq!(details.status, ItemStatus::Ongoing);
}

#[tokio::test]
async fn test_server_error_classified_as_transport() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let source = Desu::with_base_url(&mock_server.uri()).unwrap();
    let error = runtime()
        .fetch_popular(&source, NonZeroU32::MIN, CallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), FailureKind::Transport);
    assert!(matches!(
        error,
        SourceError::Transport(TransportError::HttpStatus { status: 500, .. })
    ));
}
