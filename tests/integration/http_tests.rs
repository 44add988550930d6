use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use seloger_watcher::config::{ClassifierConfig, NotifierConfig, ScraperConfig};
use seloger_watcher::plugins::classifiers::OpenAiClassifier;
use seloger_watcher::plugins::notifiers::TelegramNotifier;
use seloger_watcher::plugins::sources::{ScrapflyClient, SeLogerSource};

use super::*;

const SITE: &str = "https://www.seloger.com";

fn detail_url(id: &str) -> String {
    format!("{}/annonces/achat/maison/angers-49/{}.htm", SITE, id)
}

fn scraped(html: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "result": {"success": true, "status_code": 200, "content": html}
    }))
}

fn index_html(ids: &[&str]) -> String {
    let links: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<a data-testid="sl.explore.coveringLink" href="/annonces/achat/maison/angers-49/{}.htm?projects=2">x</a>"#,
                id
            )
        })
        .collect();
    format!(
        "<html><head><title>Achat maison Angers - {} annonces</title></head><body>{}</body></html>",
        ids.len(),
        links
    )
}

fn detail_html(price: u64, description: &str) -> String {
    let data = json!({"props": {"pageProps": {"listingData": {"listing": {"listingDetail": {
        "address": {"city": "Angers", "postalCode": "49100"},
        "descriptive": description,
        "featureCategories": [{"features": ["3 chambres", "Jardin"]}],
        "media": {"photos": []},
        "listingPrice": {"price": price},
        "surface": "95 m²"
    }}}}}});
    format!(r#"<html><body><script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#, data)
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("auto_scroll", "true"))
        .respond_with(scraped(index_html(&["1001", "1002"])))
        .expect(2)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", detail_url("1001").as_str()))
        .respond_with(scraped(detail_html(210_000, "Maison lumineuse proche du tramway")))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", detail_url("1002").as_str()))
        .respond_with(scraped(detail_html(640_000, "Villa avec piscine")))
        .expect(1)
        .mount(server)
        .await;
}

fn context(server: &MockServer) -> anyhow::Result<PipelineContext> {
    let scrapfly = ScrapflyClient::new(&ScraperConfig {
        api_url: server.uri(),
        api_key: Some("scrapfly-key".to_string()),
        ..Default::default()
    })?;
    let classifier = OpenAiClassifier::new(&ClassifierConfig {
        api_url: server.uri(),
        api_key: Some("sk-test".to_string()),
        summarize: false,
        ..Default::default()
    })?;
    let notifier = TelegramNotifier::new(&NotifierConfig {
        api_url: server.uri(),
        bot_token: Some("123:abc".to_string()),
        chat_id: Some("42".to_string()),
        retry_delay_ms: 1,
        ..Default::default()
    })?;

    Ok(PipelineContext {
        source: Arc::new(SeLogerSource::new(scrapfly, SITE, 25)?),
        classifier: Arc::new(classifier),
        notifier: Arc::new(notifier),
        images: None,
    })
}

#[tokio::test]
async fn test_end_to_end_run_against_http_services() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_site(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "{\"Interessante\": true, \"Titre\": \"Maison lumineuse\"}"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir()?;
    let state = dir.path().join("processed_listings.json");

    let first = Pipeline::new(context(&server)?, open_store(&state), test_criteria(), test_params(), 2);
    let summary = first.run().await?;
    assert_eq!(summary.indexed, 2);
    assert_eq!(summary.notified, 1);
    assert_eq!(summary.rejected, 1);
    drop(first);

    // Same index again: only the index page is fetched
    let second = Pipeline::new(context(&server)?, open_store(&state), test_criteria(), test_params(), 2);
    let summary = second.run().await?;
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.notified, 0);

    let store = second.into_store();
    assert_eq!(status_of(&store, "1001").as_deref(), Some("notified"));
    assert_eq!(status_of(&store, "1002").as_deref(), Some("rejected_by_filters"));
    Ok(())
}

#[tokio::test]
async fn test_blocked_index_aborts_the_run() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"success": false, "status_code": 403,
                       "error": {"code": "ERR::ASP::SHIELD_PROTECTION_FAILED", "message": "blocked"}}
        })))
        .mount(&server)
        .await;

    let dir = tempdir()?;
    let state = dir.path().join("processed_listings.json");
    let pipeline = Pipeline::new(context(&server)?, open_store(&state), test_criteria(), test_params(), 2);

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, AppError::IndexFetch(_)));
    assert!(err.to_string().contains("SHIELD_PROTECTION_FAILED"));
    assert!(pipeline.into_store().is_empty());
    Ok(())
}
