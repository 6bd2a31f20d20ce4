//! Deterministic stand-ins for the browser and the network.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    configuration::{BrowserSettings, EnrichmentSettings, PipelineSettings},
    domain::{
        email::EmailFilterMode,
        listing::{ListingCard, PlaceDetails},
        search_task::SearchTask,
    },
    error::{FetchError, ScrapeError},
    services::{droid::BrowserDriver, enricher::PageFetcher},
};

pub type FakePlace = (ListingCard, PlaceDetails);

pub fn browser_settings() -> BrowserSettings {
    BrowserSettings {
        webdriver_url: "http://localhost:9515".to_string(),
        headless: true,
        max_sessions: 3,
        launch_attempts: 3,
        min_request_interval_ms: 0,
        pacing_jitter_ms: 0,
        navigation_timeout_secs: 5,
        detail_timeout_secs: 5,
        max_scroll_attempts: 3,
        scroll_pause_ms: 0,
        max_results_per_search: 120,
    }
}

pub fn pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        skip_known: true,
        dedup_enabled: true,
        include_without_email: true,
        max_task_retries: 3,
        retry_backoff_ms: 1,
        persist_concurrency: 4,
        cancel_grace_period_secs: 1,
    }
}

pub fn enrichment_settings() -> EnrichmentSettings {
    EnrichmentSettings {
        enabled: true,
        max_concurrent: 4,
        timeout_secs: 5,
        max_attempts: 3,
        backoff_base_ms: 1,
        max_redirects: 5,
        email_filter_mode: EmailFilterMode::Balanced,
        contact_paths: vec!["/contact".to_string(), "/about".to_string()],
    }
}

/// A place in the feed. `seq` makes the map id unique.
pub fn place(seq: u32, name: &str, category: &str, website: Option<&str>) -> FakePlace {
    let place_url = format!(
        "https://www.google.com/maps/place/{}/data=!4m7!3m6!1s0x{:x}:0x{:x}!8m2",
        name.replace(' ', "+"),
        0x880e_0000u32 + seq,
        seq
    );
    let card = ListingCard {
        place_url,
        label: Some(name.to_string()),
    };
    let details = PlaceDetails {
        name: name.to_string(),
        address: format!("{} N State St, Chicago, IL", 100 + seq),
        phone: format!("(312) 555-{:04}", seq),
        rating: "4,5".to_string(),
        category: category.to_string(),
        website: website.unwrap_or_default().to_string(),
        ..PlaceDetails::default()
    };
    (card, details)
}

pub struct FakeHandle {
    id: usize,
    search_text: Mutex<Option<String>>,
    revealed: AtomicUsize,
}

/// Scripted browser. Every search shows `default_results` unless a search text
/// has its own result list.
pub struct FakeDriver {
    default_results: Vec<FakePlace>,
    results: HashMap<String, Vec<FakePlace>>,
    cards_per_scroll: usize,
    place_delay: Duration,
    navigation_failures: Mutex<HashMap<String, u32>>,
    place_crashes: Mutex<HashSet<String>>,
    launch_failures: AtomicU32,
    open: AtomicUsize,
    peak: AtomicUsize,
    launches: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

impl FakeDriver {
    pub fn new(default_results: Vec<FakePlace>) -> Self {
        FakeDriver {
            default_results,
            results: HashMap::new(),
            cards_per_scroll: 4,
            place_delay: Duration::ZERO,
            navigation_failures: Mutex::new(HashMap::new()),
            place_crashes: Mutex::new(HashSet::new()),
            launch_failures: AtomicU32::new(0),
            open: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            navigations: Mutex::new(vec![]),
        }
    }

    pub fn with_results(mut self, search_text: &str, results: Vec<FakePlace>) -> Self {
        self.results.insert(search_text.to_string(), results);
        self
    }

    pub fn with_place_delay(mut self, delay: Duration) -> Self {
        self.place_delay = delay;
        self
    }

    /// Loading `search_text` times out `times` times before it works.
    pub fn failing_navigation(self, search_text: &str, times: u32) -> Self {
        self.navigation_failures
            .lock()
            .unwrap()
            .insert(search_text.to_string(), times);
        self
    }

    /// Reading this place crashes the session once.
    pub fn crashing_on(self, place_url: &str) -> Self {
        self.place_crashes
            .lock()
            .unwrap()
            .insert(place_url.to_string());
        self
    }

    pub fn failing_launches(self, times: u32) -> Self {
        self.launch_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn navigations(&self, search_text: &str) -> usize {
        self.navigations
            .lock()
            .unwrap()
            .iter()
            .filter(|s| *s == search_text)
            .count()
    }

    fn results_for(&self, handle: &FakeHandle) -> &[FakePlace] {
        let search_text = handle.search_text.lock().unwrap().clone();
        search_text
            .and_then(|text| self.results.get(&text))
            .unwrap_or(&self.default_results)
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    type Handle = FakeHandle;

    async fn open_session(&self) -> Result<FakeHandle, ScrapeError> {
        let remaining = self.launch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.launch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ScrapeError::SessionCrash("chromedriver refused".to_string()));
        }

        let id = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);

        Ok(FakeHandle {
            id,
            search_text: Mutex::new(None),
            revealed: AtomicUsize::new(0),
        })
    }

    async fn open_search(&self, handle: &FakeHandle, task: &SearchTask) -> Result<(), ScrapeError> {
        self.navigations
            .lock()
            .unwrap()
            .push(task.search_text.clone());

        {
            let mut failures = self.navigation_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&task.search_text) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ScrapeError::TransientNetwork(format!(
                        "navigation timed out on session {}",
                        handle.id
                    )));
                }
            }
        }

        *handle.search_text.lock().unwrap() = Some(task.search_text.clone());
        handle
            .revealed
            .store(self.cards_per_scroll, Ordering::SeqCst);
        Ok(())
    }

    async fn visible_cards(&self, handle: &FakeHandle) -> Result<Vec<ListingCard>, ScrapeError> {
        let revealed = handle.revealed.load(Ordering::SeqCst);
        Ok(self
            .results_for(handle)
            .iter()
            .take(revealed)
            .map(|(card, _)| card.clone())
            .collect())
    }

    async fn scroll_feed(&self, handle: &FakeHandle) -> Result<bool, ScrapeError> {
        let total = self.results_for(handle).len();
        let revealed = handle
            .revealed
            .fetch_add(self.cards_per_scroll, Ordering::SeqCst)
            + self.cards_per_scroll;
        Ok(revealed >= total)
    }

    async fn read_place(
        &self,
        handle: &FakeHandle,
        card: &ListingCard,
    ) -> Result<PlaceDetails, ScrapeError> {
        if !self.place_delay.is_zero() {
            tokio::time::sleep(self.place_delay).await;
        }
        if self.place_crashes.lock().unwrap().remove(&card.place_url) {
            return Err(ScrapeError::SessionCrash(format!(
                "tab crashed on session {}",
                handle.id
            )));
        }

        self.results_for(handle)
            .iter()
            .find(|(c, _)| c.place_url == card.place_url)
            .map(|(_, details)| details.clone())
            .ok_or_else(|| ScrapeError::SessionCrash(format!("unknown place {}", card.place_url)))
    }

    async fn close_session(&self, _handle: FakeHandle) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted web server keyed by full URL. Unknown URLs are a 404.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    transient_failures: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        FakeFetcher::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// `url` answers 503 `times` times before serving its page.
    pub fn failing(self, url: &str, times: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| *r == url)
            .count()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Transient(format!("503 from {}", url)));
                }
            }
        }

        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Permanent(format!("404 from {}", url)))
    }
}
