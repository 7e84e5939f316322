//! End-to-end runs of the orchestrator against a scripted web and an
//! in-memory store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use vocab_ingest::adapters::{FeedAdapter, HtmlAdapter};
use vocab_ingest::config::{
    BreakerConfig, ExtractorConfig, FetcherConfig, FrequencyConfig, PipelineConfig, SelectorConfig,
};
use vocab_ingest::fetcher::{HttpResponse, TransportError};
use vocab_ingest::orchestrator::FailureKind;
use vocab_ingest::{
    ArticleStore, Fetcher, FrequencyEngine, HttpTransport, Orchestrator, Source, WordExtractor,
};

type Reply = Result<HttpResponse, TransportError>;

/// URL-keyed responses. Each route replays its replies in order and then
/// repeats the last one; unknown URLs get a 404.
#[derive(Default)]
struct FakeWeb {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeWeb {
    fn route(&self, url: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    fn page(&self, url: &str, html: impl Into<String>) {
        self.route(url, vec![Ok(HttpResponse::new(200, html))]);
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl HttpTransport for FakeWeb {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(replies) if replies.len() > 1 => replies.pop_front().unwrap(),
            Some(replies) => replies.front().cloned().unwrap(),
            None => Ok(HttpResponse::new(404, "not found")),
        }
    }
}

fn listing(links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<li><a href="{href}">story</a></li>"#))
        .collect();
    format!("<html><body><ul>{anchors}</ul></body></html>")
}

fn article_page(title: &str, date: &str, body: &str) -> String {
    format!(
        r#"<html><head><meta property="article:published_time" content="{date}"></head>
        <body><h1>{title}</h1><article><p>{body}</p></article></body></html>"#
    )
}

fn html_source(id: &str, homepage: &str) -> Source {
    let adapter = HtmlAdapter::new(&SelectorConfig::default()).unwrap();
    Source::new(id, homepage, Box::new(adapter))
}

fn fast_fetcher_config() -> FetcherConfig {
    FetcherConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        retry_jitter_ms: 0,
        min_content_bytes: 16,
        request_delay_ms: 0,
        request_delay_jitter_ms: 0,
        ..FetcherConfig::default()
    }
}

struct Harness {
    web: Arc<FakeWeb>,
    store: ArticleStore,
    fetcher_config: FetcherConfig,
    breaker: BreakerConfig,
    pipeline: PipelineConfig,
    extractor: ExtractorConfig,
    frequency: FrequencyConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            web: Arc::new(FakeWeb::default()),
            store: ArticleStore::open_in_memory().unwrap(),
            fetcher_config: fast_fetcher_config(),
            breaker: BreakerConfig {
                failure_threshold: 5,
                cooldown_ms: 60_000,
            },
            pipeline: PipelineConfig::default(),
            extractor: ExtractorConfig::default(),
            frequency: FrequencyConfig {
                min_total_frequency: 1,
                ..FrequencyConfig::default()
            },
        }
    }

    fn orchestrator(&self) -> Orchestrator<Arc<FakeWeb>> {
        Orchestrator::new(
            Fetcher::new(
                self.web.clone(),
                self.fetcher_config.clone(),
                self.breaker.clone(),
            ),
            self.store.clone(),
            WordExtractor::new(&self.extractor),
            FrequencyEngine::new(&self.frequency),
            self.pipeline.clone(),
        )
    }
}

/// Homepage with three links: two good articles and one that always fails with HTTP 500.
fn three_url_site(web: &FakeWeb) {
    web.page("https://x.example/", listing(&["/one", "/two", "/three"]));
    web.page(
        "https://x.example/one",
        article_page("Storm hits coast", "2025-05-06", "Winds rose overnight. Crews responded quickly."),
    );
    web.page(
        "https://x.example/two",
        article_page("Markets rally", "2025-05-07", "Stocks climbed again. Traders cheered the news."),
    );
    web.route(
        "https://x.example/three",
        vec![Ok(HttpResponse::new(500, "internal server error"))],
    );
}

#[tokio::test]
async fn test_two_stored_one_transient_failure() {
    let h = Harness::new();
    three_url_site(&h.web);

    let report = h.orchestrator().run(&[html_source("x", "https://x.example/")]).await;

    assert_eq!(report.processed_count(), 2);
    assert_eq!(report.attempted_count(), 3);
    let x = report.source("x").unwrap();
    assert_eq!(x.fetch_failures, 1);
    assert_eq!(x.errors.len(), 1);
    assert_eq!(x.errors[0].url, "https://x.example/three");
    assert_eq!(x.errors[0].kind, FailureKind::Transient);
    assert!((x.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!(!x.degraded);
    assert_eq!(report.per_source_errors().get("x"), Some(&1));

    assert_eq!(h.web.calls("https://x.example/three"), 3);
    assert_eq!(h.store.article_count().unwrap(), 2);
    let titles: Vec<_> = h
        .store
        .list_articles("x")
        .unwrap()
        .into_iter()
        .map(|a| a.title)
        .collect();
    assert!(titles.contains(&"Storm hits coast".to_string()));
    assert!(titles.contains(&"Markets rally".to_string()));
}

#[tokio::test]
async fn test_rerun_skips_duplicates() {
    let h = Harness::new();
    three_url_site(&h.web);
    let sources = [html_source("x", "https://x.example/")];
    let orchestrator = h.orchestrator();

    orchestrator.run(&sources).await;
    let occurrences_after_first = h.store.occurrence_count().unwrap();
    let second = orchestrator.run(&sources).await;

    let x = second.source("x").unwrap();
    assert_eq!(x.processed, 0);
    assert_eq!(x.duplicates, 2);
    assert_eq!(x.attempted, 3);
    assert_eq!(h.store.article_count().unwrap(), 2);
    assert_eq!(h.store.occurrence_count().unwrap(), occurrences_after_first);
}

#[tokio::test]
async fn test_failing_source_does_not_affect_others() {
    let h = Harness::new();
    three_url_site(&h.web);
    h.web.route(
        "https://down.example/",
        vec![Err(TransportError::Connect("connection refused".into()))],
    );

    let report = h
        .orchestrator()
        .run(&[
            html_source("down", "https://down.example/"),
            html_source("x", "https://x.example/"),
        ])
        .await;

    let down = report.source("down").unwrap();
    assert_eq!(down.attempted, 0);
    assert!(down.discovery_error.is_some());
    assert!(down.degraded);
    assert_eq!(report.degraded_sources(), vec!["down"]);
    assert_eq!(report.per_source_errors().get("down"), Some(&1));

    let x = report.source("x").unwrap();
    assert_eq!(x.processed, 2);
    assert_eq!(x.attempted, 3);
}

#[tokio::test]
async fn test_article_stored_when_extraction_degrades() {
    let mut h = Harness::new();
    h.extractor.max_text_bytes = 32;
    h.web.page("https://x.example/", listing(&["/long"]));
    h.web.page(
        "https://x.example/long",
        article_page(
            "Long read",
            "2025-05-06",
            "This body is comfortably longer than the thirty-two byte extraction limit.",
        ),
    );

    let report = h.orchestrator().run(&[html_source("x", "https://x.example/")]).await;

    let x = report.source("x").unwrap();
    assert_eq!(x.processed, 1);
    assert_eq!(x.words, 0);
    let id = x.stored[0];
    assert!(h.store.get_article(id).unwrap().is_some());
    assert!(h.store.occurrences_for(id).unwrap().is_empty());
}

#[tokio::test]
async fn test_parse_failure_drops_article_only() {
    let h = Harness::new();
    h.web.page("https://x.example/", listing(&["/empty", "/ok"]));
    h.web.page(
        "https://x.example/empty",
        "<html><body><h1>No body here</h1></body></html>",
    );
    h.web.page(
        "https://x.example/ok",
        article_page("Fine", "2025-05-06", "Everything parsed as expected."),
    );

    let report = h.orchestrator().run(&[html_source("x", "https://x.example/")]).await;

    let x = report.source("x").unwrap();
    assert_eq!(x.attempted, 2);
    assert_eq!(x.processed, 1);
    assert_eq!(x.parse_failures, 1);
    assert_eq!(x.errors[0].kind, FailureKind::Parse);
    assert_eq!(h.store.article_count().unwrap(), 1);
}

#[tokio::test]
async fn test_open_circuit_fails_remaining_urls_fast() {
    let mut h = Harness::new();
    h.fetcher_config.max_attempts = 1;
    h.breaker.failure_threshold = 2;
    h.pipeline.concurrency_per_source = 1;

    let links = ["/1", "/2", "/3", "/4", "/5", "/6"];
    h.web.page("https://x.example/", listing(&links));
    for link in links {
        h.web.route(
            &format!("https://x.example{link}"),
            vec![Ok(HttpResponse::new(503, "service unavailable"))],
        );
    }

    let orchestrator = h.orchestrator();
    let report = orchestrator.run(&[html_source("x", "https://x.example/")]).await;

    let x = report.source("x").unwrap();
    assert_eq!(x.attempted, 6);
    assert_eq!(x.fetch_failures, 2);
    assert_eq!(x.circuit_open, 4);
    assert_eq!(x.processed, 0);
    assert!(x.degraded);

    let network_calls: usize = links
        .iter()
        .map(|link| h.web.calls(&format!("https://x.example{link}")))
        .sum();
    assert_eq!(network_calls, 2);
}

#[tokio::test]
async fn test_feed_source_and_stats_rebuild() {
    let h = Harness::new();
    h.web.page(
        "https://feed.example/rss.xml",
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Feed</title>
           <item><title>A</title><link>https://feed.example/a</link></item>
           <item><title>B</title><link>https://feed.example/b</link></item>
           </channel></rss>"#,
    );
    h.web.page(
        "https://feed.example/a",
        article_page("Le marché", "2025-05-06", "Le marché ouvre tôt. Le marché ferme tard."),
    );
    h.web.page(
        "https://feed.example/b",
        article_page("La ville", "2025-05-06", "La ville dort. Le marché attend."),
    );
    let feed = Source::new(
        "feed",
        "https://feed.example/rss.xml",
        Box::new(FeedAdapter::new(&SelectorConfig::default()).unwrap()),
    );

    let report = h.orchestrator().run(&[feed]).await;
    assert_eq!(report.processed_count(), 2);

    let stats = h.store.word_stats().unwrap();
    assert_eq!(report.word_stats, Some(stats.len()));
    let total: u64 = stats.iter().map(|s| s.total_frequency).sum();
    assert_eq!(total, h.store.occurrence_count().unwrap());

    let marche = stats.iter().find(|s| s.word == "marché").unwrap();
    assert_eq!(marche.total_frequency, 3);
    assert_eq!(marche.document_frequency, 2);
    // "le" ties with "marché" at 3 and sorts first
    assert_eq!(stats[0].word, "le");
    assert_eq!(stats[0].total_frequency, 3);
}

#[tokio::test]
async fn test_article_cap_limits_attempts() {
    let mut h = Harness::new();
    h.pipeline.max_articles_per_source = Some(2);
    three_url_site(&h.web);

    let report = h.orchestrator().run(&[html_source("x", "https://x.example/")]).await;

    assert_eq!(report.attempted_count(), 2);
    assert_eq!(h.web.calls("https://x.example/three"), 0);
}

#[tokio::test]
async fn test_redirected_homepage_resolves_links_against_final_url() {
    let h = Harness::new();
    h.web.route(
        "https://r.example/",
        vec![Ok(HttpResponse::new(200, listing(&["story"])).with_final_url("https://r.example/fr/"))],
    );
    h.web.page(
        "https://r.example/fr/story",
        article_page("Nouvelles du jour", "2025-05-06", "Le soleil brille. La ville se réveille."),
    );

    let report = h.orchestrator().run(&[html_source("r", "https://r.example/")]).await;

    let r = report.source("r").unwrap();
    assert_eq!(r.attempted, 1);
    assert_eq!(r.processed, 1);
    assert_eq!(h.web.calls("https://r.example/story"), 0);
    let stored = h.store.list_articles("r").unwrap();
    assert_eq!(stored[0].url, "https://r.example/fr/story");
}
