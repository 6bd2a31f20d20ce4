use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::Utc;
use futures::{stream, StreamExt};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    configuration::{BrowserSettings, EnrichmentSettings, PipelineSettings, RunSettings},
    domain::{
        category::Classifier,
        lead::Lead,
        listing::RawListing,
        progress::{ProgressEvent, RunEvent, RunStage, RunSummary},
        search_task::{plan, SearchTask},
    },
    error::{PipelineError, ScrapeError},
    services::{
        dedup_store::LeadStore,
        droid::BrowserDriver,
        enricher::{Enricher, Enrichment},
        maps_scraper::ListingExtractor,
        session_pool::{with_grace, Session, SessionPool},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub query: String,
    pub location: String,
    pub target: usize,
    pub max_listings: Option<usize>,
}

impl RunRequest {
    /// Listings to scan for `target` new leads. `max_listings` can only raise it.
    pub fn scan_budget(&self) -> usize {
        self.max_listings
            .map_or(self.target, |max_listings| max_listings.max(self.target))
    }
}

impl From<&RunSettings> for RunRequest {
    fn from(settings: &RunSettings) -> Self {
        RunRequest {
            query: settings.search.clone(),
            location: settings.location.clone(),
            target: settings.target,
            max_listings: settings.max_listings,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub stage: RunStage,
    pub summary: RunSummary,
    /// Leads stored for the first time by this run.
    pub new_leads: Vec<Lead>,
    /// Leads that were already stored and got merged, as they are stored now.
    pub updated_leads: Vec<Lead>,
}

/// Tunables the orchestrator reads from the configuration sections it spans.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub skip_known: bool,
    pub dedup_enabled: bool,
    pub include_without_email: bool,
    pub max_task_retries: u32,
    pub retry_backoff: Duration,
    pub persist_concurrency: usize,
    pub cancel_grace_period: Duration,
    pub max_results_per_search: usize,
    pub enrichment_enabled: bool,
    pub max_concurrent_enrichments: usize,
}

impl PipelineOptions {
    pub fn new(
        pipeline: &PipelineSettings,
        browser: &BrowserSettings,
        enrichment: &EnrichmentSettings,
    ) -> Self {
        PipelineOptions {
            skip_known: pipeline.skip_known,
            dedup_enabled: pipeline.dedup_enabled,
            include_without_email: pipeline.include_without_email,
            max_task_retries: pipeline.max_task_retries.max(1),
            retry_backoff: pipeline.retry_backoff(),
            persist_concurrency: pipeline.persist_concurrency.max(1),
            cancel_grace_period: pipeline.cancel_grace_period(),
            max_results_per_search: browser.max_results_per_search.max(1),
            enrichment_enabled: enrichment.enabled,
            max_concurrent_enrichments: enrichment.max_concurrent.max(1),
        }
    }
}

pub struct Pipeline<D: BrowserDriver> {
    pool: Arc<SessionPool<D>>,
    extractor: Arc<ListingExtractor>,
    store: Arc<dyn LeadStore>,
    enricher: Arc<Enricher>,
    classifier: Classifier,
    options: PipelineOptions,
}

/// What a scrape worker reports back while it runs.
enum ScrapeUpdate {
    Listing(RawListing),
    ParseFailure(String),
    Finished { task: String, outcome: TaskOutcome },
}

enum TaskOutcome {
    Completed { listings: usize },
    Failed { attempts: u32, reason: String },
    Fatal(ScrapeError),
    Cancelled,
}

struct Candidate {
    listing: RawListing,
    enrichment: Enrichment,
    /// Already in the store when the run looked it up.
    known: bool,
}

impl<D: BrowserDriver> Pipeline<D> {
    pub fn new(
        pool: Arc<SessionPool<D>>,
        extractor: ListingExtractor,
        store: Arc<dyn LeadStore>,
        enricher: Enricher,
        classifier: Classifier,
        options: PipelineOptions,
    ) -> Self {
        Pipeline {
            pool,
            extractor: Arc::new(extractor),
            store,
            enricher: Arc::new(enricher),
            classifier,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<SessionPool<D>> {
        &self.pool
    }

    /// Runs one extraction from planning to the final summary.
    ///
    /// Per-item failures end up as summary counters. A browser pool that cannot
    /// launch or a store that cannot be reached aborts the run with a `Fatal`
    /// event and an error. A cancelled run still returns its report.
    pub async fn run(
        &self,
        request: RunRequest,
        events: mpsc::UnboundedSender<RunEvent>,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let mut run = RunState::new(events);
        run.summary.started_at = Some(Utc::now());

        run.enter(RunStage::Planning, 1);
        let tasks: Vec<SearchTask> = plan(
            &request.query,
            &request.location,
            request.scan_budget(),
            self.options.max_results_per_search,
        )
        .collect();
        log::info!(
            "Planned {} searches scanning up to {} listings for {} '{}' leads in '{}'",
            tasks.len(),
            request.scan_budget(),
            request.target,
            request.query,
            request.location
        );
        run.item_done(None);
        if cancel.is_cancelled() {
            return Ok(run.cancelled());
        }

        let listings = self.scrape(tasks, &mut run, &cancel).await?;
        if cancel.is_cancelled() {
            return Ok(run.cancelled());
        }

        let candidates = self.enrich(listings, &mut run, &cancel).await?;
        if cancel.is_cancelled() {
            return Ok(run.cancelled());
        }

        let leads = self.classify(candidates, &mut run);
        let leads = self.select(leads, request.target);
        if cancel.is_cancelled() {
            return Ok(run.cancelled());
        }

        self.persist(leads, &mut run, &cancel).await?;
        if cancel.is_cancelled() {
            return Ok(run.cancelled());
        }

        Ok(run.done())
    }

    async fn scrape(
        &self,
        tasks: Vec<SearchTask>,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawListing>, PipelineError> {
        run.enter(RunStage::Scraping, tasks.iter().map(|t| t.target).sum());

        // Cancelled on user request or when one worker hits a fatal error.
        let workers_cancel = cancel.child_token();
        let (updates_sender, mut updates) = mpsc::unbounded_channel::<ScrapeUpdate>();
        let mut workers = JoinSet::new();

        for task in tasks {
            if workers_cancel.is_cancelled() {
                break;
            }
            let worker = TaskWorker {
                pool: self.pool.clone(),
                extractor: self.extractor.clone(),
                max_task_retries: self.options.max_task_retries,
                retry_backoff: self.options.retry_backoff,
                grace: self.options.cancel_grace_period,
                updates: updates_sender.clone(),
                cancel: workers_cancel.clone(),
            };
            workers.spawn(worker.run(task));
        }
        drop(updates_sender);

        let mut unique = vec![];
        let mut fingerprints = HashSet::new();
        let mut fatal = None;

        while let Some(update) = updates.recv().await {
            match update {
                ScrapeUpdate::Listing(listing) => {
                    run.summary.listings_scraped += 1;
                    let name = listing.name.clone();
                    match fingerprints.insert(listing.fingerprint()) {
                        true => unique.push(listing),
                        false => log::debug!("{} already scraped in this run", name),
                    }
                    run.item_done(Some(name));
                }
                ScrapeUpdate::ParseFailure(message) => {
                    run.summary.parse_failures += 1;
                    run.progress(Some(message));
                }
                ScrapeUpdate::Finished { task, outcome } => match outcome {
                    TaskOutcome::Completed { listings } => {
                        log::info!("'{}' finished with {} listings", task, listings);
                    }
                    TaskOutcome::Failed { attempts, reason } => {
                        log::warn!("'{}' failed after {} attempts: {}", task, attempts, reason);
                        run.summary.failed_tasks += 1;
                        run.emit(RunEvent::TaskFailed {
                            task,
                            attempts,
                            reason,
                        });
                    }
                    TaskOutcome::Fatal(e) => {
                        fatal.get_or_insert(e);
                    }
                    TaskOutcome::Cancelled => log::info!("'{}' cancelled", task),
                },
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!("Scrape worker panicked: {}", e);
                run.summary.failed_tasks += 1;
            }
        }
        self.pool.shutdown().await;

        if let Some(e) = fatal {
            return Err(run.fatal(PipelineError::PoolExhausted(e)));
        }

        log::info!(
            "Scraped {} listings, {} unique",
            run.summary.listings_scraped,
            unique.len()
        );
        Ok(unique)
    }

    async fn enrich(
        &self,
        listings: Vec<RawListing>,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, PipelineError> {
        run.enter(RunStage::Enriching, listings.len());

        let mut pending = vec![];
        for listing in listings {
            if cancel.is_cancelled() {
                break;
            }
            let known = match self.options.dedup_enabled {
                false => false,
                true => match self.store.lookup(&listing.fingerprint()).await {
                    Ok(found) => found.is_some(),
                    Err(e) if e.is_fatal() => {
                        return Err(run.fatal(PipelineError::StoreUnavailable(e)));
                    }
                    Err(e) => {
                        log::warn!("Lookup failed, treating {} as new: {}", listing.name, e);
                        false
                    }
                },
            };
            if known && self.options.skip_known {
                run.summary.known_skipped += 1;
            }
            pending.push((listing, known));
        }

        // Known leads skip the website visit but are still merged, so their
        // place details and last_seen stay current.
        let enricher = &self.enricher;
        let enabled = self.options.enrichment_enabled;
        let skip_known = self.options.skip_known;
        let mut enriched = stream::iter(pending)
            .map(|(listing, known)| async move {
                let wanted = enabled && !(known && skip_known) && !cancel.is_cancelled();
                let enrichment = match (&listing.website, wanted) {
                    (Some(website), true) => enricher.enrich(website, cancel).await,
                    _ => Enrichment::skipped(),
                };
                Candidate {
                    listing,
                    enrichment,
                    known,
                }
            })
            .buffer_unordered(self.options.max_concurrent_enrichments);

        let mut candidates = vec![];
        while let Some(candidate) = enriched.next().await {
            if candidate.enrichment.is_failed() {
                run.summary.failed_enrichments += 1;
            }
            run.item_done(Some(candidate.listing.name.clone()));
            candidates.push(candidate);
        }

        Ok(candidates)
    }

    /// Pairs every lead with whether it was already stored.
    fn classify(&self, candidates: Vec<Candidate>, run: &mut RunState) -> Vec<(Lead, bool)> {
        run.enter(RunStage::Classifying, candidates.len());
        let now = Utc::now();

        candidates
            .into_iter()
            .map(|Candidate { listing, enrichment, known }| {
                let category = self.classifier.classify(
                    listing.category_hint.as_deref(),
                    &listing.name,
                    listing.introduction.as_deref(),
                );
                let mut lead = Lead::from_listing(listing, category, now);
                lead.emails = enrichment.emails;
                lead.social_links = enrichment.social_links;

                if !lead.emails.is_empty() {
                    run.summary.emails_found += 1;
                }
                if lead.has_social_links() {
                    run.summary.social_found += 1;
                }
                run.item_done(Some(lead.name.clone()));
                (lead, known)
            })
            .collect()
    }

    /// Keeps every known lead and at most `target` new ones. New leads without
    /// an email are dropped when `include_without_email` is off.
    fn select(&self, leads: Vec<(Lead, bool)>, target: usize) -> Vec<Lead> {
        let mut selected = vec![];
        let mut new = 0;
        let mut without_email = 0;
        let mut over_target = 0;

        for (lead, known) in leads {
            if known {
                selected.push(lead);
            } else if !self.options.include_without_email && lead.emails.is_empty() {
                without_email += 1;
            } else if new >= target {
                over_target += 1;
            } else {
                new += 1;
                selected.push(lead);
            }
        }

        if without_email + over_target > 0 {
            log::info!(
                "Not saving {} leads without an email and {} beyond the target of {}",
                without_email,
                over_target,
                target
            );
        }
        selected
    }

    async fn persist(
        &self,
        leads: Vec<Lead>,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        run.enter(RunStage::Persisting, leads.len());

        if !self.options.dedup_enabled {
            for lead in leads {
                if cancel.is_cancelled() {
                    break;
                }
                run.item_done(Some(lead.name.clone()));
                run.new_leads.push(lead);
            }
            return Ok(());
        }

        let store = &self.store;
        let mut writes = stream::iter(leads)
            .map(|lead| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let name = lead.name.clone();
                Some((name, store.upsert(lead).await))
            })
            .buffer_unordered(self.options.persist_concurrency);

        while let Some(write) = writes.next().await {
            let Some((name, result)) = write else {
                continue;
            };
            match result {
                Ok(outcome) => {
                    match outcome.is_new() {
                        true => run.new_leads.push(outcome.into_lead()),
                        false => run.updated_leads.push(outcome.into_lead()),
                    }
                    run.item_done(Some(name));
                }
                Err(e) if e.is_fatal() => {
                    return Err(run.fatal(PipelineError::StoreUnavailable(e)));
                }
                Err(e) => {
                    log::warn!("Could not store {}: {}", name, e);
                    run.summary.persistence_failures += 1;
                    run.progress(Some(name));
                }
            }
        }

        Ok(())
    }
}

struct TaskWorker<D: BrowserDriver> {
    pool: Arc<SessionPool<D>>,
    extractor: Arc<ListingExtractor>,
    max_task_retries: u32,
    retry_backoff: Duration,
    grace: Duration,
    updates: mpsc::UnboundedSender<ScrapeUpdate>,
    cancel: CancellationToken,
}

impl<D: BrowserDriver> TaskWorker<D> {
    async fn run(self, task: SearchTask) {
        let outcome = self.scrape(&task).await;
        if let TaskOutcome::Fatal(ref e) = outcome {
            log::error!("Stopping all searches: {}", e);
            self.cancel.cancel();
        }
        let _ = self.updates.send(ScrapeUpdate::Finished {
            task: task.search_text,
            outcome,
        });
    }

    /// Retries on a fresh session until `max_task_retries` attempts in a row
    /// fail. An attempt that yields new listings resets the count.
    async fn scrape(&self, task: &SearchTask) -> TaskOutcome {
        let mut seen = HashSet::new();
        let mut collected = 0;
        let mut failed_attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return TaskOutcome::Cancelled;
            }

            let mut session = match self.pool.acquire(&self.cancel).await {
                Ok(session) => session,
                Err(ScrapeError::Cancelled) => return TaskOutcome::Cancelled,
                Err(e) => return TaskOutcome::Fatal(e),
            };

            let before = collected;
            match self
                .attempt(&mut session, task, &mut seen, &mut collected)
                .await
            {
                Ok(()) => {
                    self.pool.release(session);
                    return match self.cancel.is_cancelled() {
                        true => TaskOutcome::Cancelled,
                        false => TaskOutcome::Completed {
                            listings: collected,
                        },
                    };
                }
                Err(ScrapeError::Cancelled) => {
                    self.pool.discard(session).await;
                    return TaskOutcome::Cancelled;
                }
                Err(e) => {
                    self.pool.discard(session).await;
                    if collected > before {
                        failed_attempts = 0;
                    }
                    failed_attempts += 1;

                    if !e.is_retryable() || failed_attempts >= self.max_task_retries {
                        return TaskOutcome::Failed {
                            attempts: failed_attempts,
                            reason: e.to_string(),
                        };
                    }

                    log::warn!(
                        "'{}' attempt {}/{} failed, retrying on a new session: {}",
                        task.search_text,
                        failed_attempts,
                        self.max_task_retries,
                        e
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return TaskOutcome::Cancelled,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        session: &mut Session<D::Handle>,
        task: &SearchTask,
        seen: &mut HashSet<String>,
        collected: &mut usize,
    ) -> Result<(), ScrapeError> {
        let remaining = task.target.saturating_sub(*collected);
        let skip = seen.clone();
        let listings = self
            .extractor
            .extract(self.pool.driver(), session, task, remaining, &skip);
        futures::pin_mut!(listings);

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let next = with_grace(&self.cancel, self.grace, async {
                Ok::<_, ScrapeError>(listings.next().await)
            })
            .await?;

            match next {
                None => return Ok(()),
                Some(Ok(listing)) => {
                    seen.insert(listing.map_id.clone());
                    *collected += 1;
                    let _ = self.updates.send(ScrapeUpdate::Listing(listing));
                }
                Some(Err(ScrapeError::Parse { map_id, message })) => {
                    // Unreadable places are not retried on the next attempt either.
                    let _ = self
                        .updates
                        .send(ScrapeUpdate::ParseFailure(format!("{}: {}", map_id, message)));
                    seen.insert(map_id);
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }
}

struct RunState {
    events: mpsc::UnboundedSender<RunEvent>,
    stage: RunStage,
    items_done: usize,
    items_total: usize,
    summary: RunSummary,
    new_leads: Vec<Lead>,
    updated_leads: Vec<Lead>,
}

impl RunState {
    fn new(events: mpsc::UnboundedSender<RunEvent>) -> Self {
        RunState {
            events,
            stage: RunStage::Planning,
            items_done: 0,
            items_total: 0,
            summary: RunSummary::default(),
            new_leads: vec![],
            updated_leads: vec![],
        }
    }

    fn emit(&self, event: RunEvent) {
        if self.events.send(event).is_err() {
            log::debug!("No one is listening for run events");
        }
    }

    fn enter(&mut self, stage: RunStage, items_total: usize) {
        log::info!("{} ({} items)", stage, items_total);
        self.stage = stage;
        self.items_done = 0;
        self.items_total = items_total;
        self.progress(None);
    }

    fn item_done(&mut self, current_item: Option<String>) {
        self.items_done += 1;
        self.progress(current_item);
    }

    fn progress(&self, current_item: Option<String>) {
        self.emit(RunEvent::Progress(ProgressEvent {
            stage: self.stage,
            items_done: self.items_done,
            items_total: self.items_total,
            current_item,
            failure_count: self.summary.failure_count(),
        }));
    }

    fn fatal(&mut self, error: PipelineError) -> PipelineError {
        log::error!("Run aborted during {}: {}", self.stage, error);
        self.summary.finished_at = Some(Utc::now());
        self.emit(RunEvent::Fatal(error.to_string()));
        error
    }

    fn cancelled(mut self) -> RunReport {
        log::warn!("Run cancelled during {}", self.stage);
        self.summary.cancelled = true;
        self.finish(RunStage::Cancelled)
    }

    fn done(mut self) -> RunReport {
        self.enter(RunStage::Reporting, 1);
        self.finish(RunStage::Done)
    }

    fn finish(mut self, stage: RunStage) -> RunReport {
        self.summary.new_leads = self.new_leads.len();
        self.summary.total_leads = self.new_leads.len() + self.updated_leads.len();
        self.summary.finished_at = Some(Utc::now());
        self.emit(RunEvent::Summary(self.summary.clone()));

        self.stage = stage;
        self.items_done = self.items_total;
        self.progress(None);

        RunReport {
            stage,
            summary: self.summary,
            new_leads: self.new_leads,
            updated_leads: self.updated_leads,
        }
    }
}
