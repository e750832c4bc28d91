#[cfg(test)]
mod integration_tests {
    use crate::{
        collect_batch, BatchProcessor, Config, ContentResolver, HeaderSet, MediaDescriptor,
        PageContext, ResolveError, Session,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const DOMAIN: &str = "https://www.instagram.com";

    /// Canned pages and API responses, keyed by absolute URL.
    #[derive(Default)]
    struct FakeWeb {
        pages: HashMap<String, Vec<Value>>,
        api: HashMap<String, Value>,
    }

    impl FakeWeb {
        fn page(mut self, path: &str, payloads: Vec<Value>) -> Self {
            self.pages.insert(format!("{DOMAIN}{path}"), payloads);
            self
        }

        fn api(mut self, path: &str, body: Value) -> Self {
            self.api.insert(format!("{DOMAIN}{path}"), body);
            self
        }
    }

    #[derive(Default)]
    struct PageCounters {
        open: AtomicUsize,
        peak: AtomicUsize,
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeSession {
        web: Arc<FakeWeb>,
        open_delay: Duration,
        load_delay: Duration,
        counters: Arc<PageCounters>,
    }

    impl FakeSession {
        fn new(web: FakeWeb) -> Self {
            Self {
                web: Arc::new(web),
                open_delay: Duration::ZERO,
                load_delay: Duration::from_millis(10),
                counters: Arc::new(PageCounters::default()),
            }
        }
    }

    struct FakePage {
        web: Arc<FakeWeb>,
        load_delay: Duration,
        current: Mutex<Option<String>>,
        counters: Arc<PageCounters>,
    }

    #[async_trait]
    impl Session for FakeSession {
        type Page = FakePage;

        async fn open_page(&self) -> Result<Self::Page, ResolveError> {
            if !self.open_delay.is_zero() {
                tokio::time::sleep(self.open_delay).await;
            }
            let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.peak.fetch_max(open, Ordering::SeqCst);
            self.counters.opened.fetch_add(1, Ordering::SeqCst);

            Ok(FakePage {
                web: self.web.clone(),
                load_delay: self.load_delay,
                current: Mutex::new(None),
                counters: self.counters.clone(),
            })
        }
    }

    #[async_trait]
    impl PageContext for FakePage {
        async fn navigate(&self, url: &str) -> Result<(), ResolveError> {
            tokio::time::sleep(self.load_delay).await;
            if !self.web.pages.contains_key(url) {
                return Err(ResolveError::NavigationFailed(format!("{url}: 404")));
            }
            *self.current.lock().unwrap() = Some(url.to_string());
            Ok(())
        }

        async fn script_payloads(&self) -> Result<Vec<Value>, ResolveError> {
            let current = self.current.lock().unwrap().clone();
            Ok(current
                .and_then(|url| self.web.pages.get(&url).cloned())
                .unwrap_or_default())
        }

        async fn fetch_json(&self, url: &str, headers: &HeaderSet) -> Result<Value, ResolveError> {
            assert_eq!(headers.get("x-ig-www-claim"), Some("0"));
            self.web
                .api
                .get(url)
                .cloned()
                .ok_or_else(|| ResolveError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })
        }

        async fn close(&self) -> Result<(), ResolveError> {
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scheduled(routes: Vec<Value>) -> Value {
        json!({"require": [[
            "ScheduledServerJS", "handle", null,
            [{"__bbox": {"require": routes}}]
        ]]})
    }

    fn post_route(path: &str, media_id: &str, title: Option<&str>) -> Value {
        let mut route = json!({
            "url": path,
            "tracePolicy": "polaris.postPage",
            "rootView": {"props": {"media_id": media_id}}
        });
        if let Some(title) = title {
            route["meta"] = json!({"title": title});
        }
        route
    }

    fn story_route(path: &str, user_id: &str, initial_media_id: &str) -> Value {
        json!({
            "url": path,
            "tracePolicy": "polaris.StoriesPage",
            "rootView": {"props": {
                "user": {"id": user_id},
                "initial_media_id": initial_media_id
            }}
        })
    }

    fn image(url: &str) -> Value {
        json!({"image_versions2": {"candidates": [{"url": url}, {"url": "small.jpg"}]}})
    }

    fn video(url: &str) -> Value {
        json!({"video_versions": [{"url": url}]})
    }

    fn sample_web() -> FakeWeb {
        FakeWeb::default()
            .page("/p/photo/", vec![scheduled(vec![post_route("/p/photo/", "123", Some("Beach"))])])
            .api("/api/v1/media/123/info/", json!({"items": [image("a.jpg")]}))
            .page("/stories/ab/99/", vec![scheduled(vec![story_route("/stories/ab/99/", "u1", "99")])])
            .api(
                "/api/v1/feed/reels_media/?reel_ids=u1",
                json!({"reels": {"u1": {
                    "user": {"full_name": "A B", "username": "ab"},
                    "items": [
                        {"pk": "98", "video_versions": [{"url": "earlier.mp4"}]},
                        {"pk": "99", "video_versions": [{"url": "v.mp4"}]}
                    ]
                }}}),
            )
            .page("/p/album/", vec![scheduled(vec![post_route("/p/album/", "456", None)])])
            .api(
                "/api/v1/media/456/info/",
                json!({"items": [{"carousel_media": [image("b.jpg"), video("c.mp4")]}]}),
            )
            .page("/p/empty/", vec![scheduled(vec![post_route("/p/empty/", "789", None)])])
            .api("/api/v1/media/789/info/", json!({"items": []}))
            .page("/explore/", vec![json!({"require": [["SomethingElse", "handle", null, []]]})])
    }

    fn link(path: &str) -> String {
        format!("{DOMAIN}{path}")
    }

    fn resolver(session: FakeSession) -> ContentResolver<FakeSession> {
        ContentResolver::new(Arc::new(session), &Config::default())
    }

    #[tokio::test]
    async fn test_post_resolves_to_photo() {
        let resolver = resolver(FakeSession::new(sample_web()));
        let content = assert_ok!(resolver.resolve(&link("/p/photo/")).await);

        assert_eq!(content.title.as_deref(), Some("Beach"));
        assert_eq!(content.url, Some(link("/p/photo/")));
        assert_eq!(content.media, vec![MediaDescriptor::photo("a.jpg")]);
        assert_eq!(resolver.session().counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_story_resolves_to_matching_video() {
        let resolver = resolver(FakeSession::new(sample_web()));
        let content = assert_ok!(resolver.resolve(&link("/stories/ab/99/")).await);

        assert_eq!(content.title.as_deref(), Some("A B"));
        assert_eq!(content.url, Some(link("/stories/ab/99/")));
        assert_eq!(content.media, vec![MediaDescriptor::video("v.mp4")]);
    }

    #[tokio::test]
    async fn test_carousel_expands_in_order() {
        let resolver = resolver(FakeSession::new(sample_web()));
        let content = assert_ok!(resolver.resolve(&link("/p/album/")).await);

        assert_eq!(content.title, None);
        assert_eq!(
            content.media,
            vec![MediaDescriptor::photo("b.jpg"), MediaDescriptor::video("c.mp4")]
        );
    }

    #[tokio::test]
    async fn test_unrecognized_page_is_unhandled() {
        let resolver = resolver(FakeSession::new(sample_web()));
        let err = assert_err!(resolver.resolve(&link("/explore/")).await);

        assert_eq!(err.to_string(), "unhandled page type");
        assert_eq!(resolver.session().counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_items_fail_without_affecting_siblings() {
        let session = FakeSession::new(sample_web());
        let counters = session.counters.clone();
        let processor = BatchProcessor::new(resolver(session), 2);

        let links = vec![
            link("/p/photo/"),
            link("/p/empty/"),
            link("/explore/"),
            link("/stories/ab/99/"),
            link("/p/missing/"),
        ];
        let mut outcomes = processor.process_batch(links.clone()).await;
        outcomes.sort_by_key(|outcome| outcome.index);

        assert_eq!(outcomes.len(), links.len());
        for (outcome, link) in outcomes.iter().zip(&links) {
            assert_eq!(&outcome.item, link);
        }

        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1].result.as_ref().unwrap_err().to_string(),
            "no media found"
        );
        assert!(matches!(
            outcomes[2].result,
            Err(ResolveError::UnhandledPageType)
        ));
        assert!(outcomes[3].is_ok());
        assert!(matches!(
            outcomes[4].result,
            Err(ResolveError::NavigationFailed(_))
        ));

        assert_eq!(counters.opened.load(Ordering::SeqCst), 5);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 5);
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_never_exceeds_concurrency() {
        let session = FakeSession::new(sample_web());
        let counters = session.counters.clone();
        let processor = BatchProcessor::new(resolver(session), 3);

        let links: Vec<String> = (0..10).map(|_| link("/p/photo/")).collect();
        let outcomes = processor.process_batch(links).await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|outcome| outcome.is_ok()));
        assert_eq!(counters.peak.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_admits_next_item_on_completion() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Mutex::new(Vec::new()));

        // Item 0 is slow; the remaining items must flow through the other slot.
        let delays = vec![100u64, 10, 10, 10, 10];
        let outcomes = collect_batch(delays, 2, |delay| {
            let active = active.clone();
            let peak = peak.clone();
            let started = started.clone();
            async move {
                started.lock().unwrap().push(delay);
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ResolveError>(delay)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(started.lock().unwrap().len(), 5);
        // The slow item finishes last.
        assert_eq!(outcomes.last().map(|outcome| outcome.index), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_link_is_reported_and_closed() {
        let mut session = FakeSession::new(sample_web());
        session.load_delay = Duration::from_secs(120);
        let counters = session.counters.clone();

        let config = Config {
            link_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let resolver = ContentResolver::new(Arc::new(session), &config);

        let err = assert_err!(resolver.resolve(&link("/p/photo/")).await);
        assert!(matches!(err, ResolveError::Timeout(_)));
        assert_eq!(err.kind(), "timeout");
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolution_still_closes_page() {
        let mut session = FakeSession::new(sample_web());
        session.load_delay = Duration::from_secs(10);
        let counters = session.counters.clone();
        let resolver = resolver(session);

        let abandoned = tokio::time::timeout(Duration::from_secs(1), resolver.resolve("/p/photo/")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_page_open_times_out() {
        let mut session = FakeSession::new(sample_web());
        session.open_delay = Duration::from_secs(600);
        let counters = session.counters.clone();

        let config = Config {
            link_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let resolver = ContentResolver::new(Arc::new(session), &config);

        let err = assert_err!(resolver.resolve(&link("/p/photo/")).await);
        assert!(matches!(err, ResolveError::Timeout(d) if d == Duration::from_secs(30)));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_batch_stream_closes_in_flight_pages() {
        use futures::StreamExt;

        let mut session = FakeSession::new(sample_web());
        session.load_delay = Duration::from_secs(5);
        let counters = session.counters.clone();
        let processor = BatchProcessor::new(resolver(session), 2);
        let tracker = crate::ProgressTracker::new(4);

        {
            let links: Vec<String> = (0..4).map(|_| link("/p/photo/")).collect();
            let mut outcomes = std::pin::pin!(processor.process_links(links, &tracker));
            let first = outcomes.next().await;
            assert!(first.is_some_and(|outcome| outcome.is_ok()));
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            counters.opened.load(Ordering::SeqCst),
            counters.closed.load(Ordering::SeqCst)
        );
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_relative_links_are_joined_onto_the_domain() {
        let resolver = resolver(FakeSession::new(sample_web()));
        let content = assert_ok!(resolver.resolve("/p/photo/").await);
        assert_eq!(content.media, vec![MediaDescriptor::photo("a.jpg")]);
    }

    #[tokio::test]
    async fn test_missing_api_response_carries_status() {
        let web = FakeWeb::default()
            .page("/p/gone/", vec![scheduled(vec![post_route("/p/gone/", "404", None)])]);
        let resolver = resolver(FakeSession::new(web));

        match resolver.resolve(&link("/p/gone/")).await {
            Err(ResolveError::HttpStatus { status, url }) => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/api/v1/media/404/info/"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
