use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};

use futures::{stream, Stream};

use crate::{
    configuration::BrowserSettings,
    domain::{
        listing::{ListingCard, RawListing},
        search_task::SearchTask,
    },
    error::ScrapeError,
    services::{droid::BrowserDriver, session_pool::Session},
};

pub struct ListingExtractor {
    max_scroll_attempts: u32,
    scroll_pause: Duration,
    navigation_timeout: Duration,
    detail_timeout: Duration,
}

struct Cursor<'a, D: BrowserDriver> {
    driver: &'a D,
    session: &'a mut Session<D::Handle>,
    cards: Option<VecDeque<ListingCard>>,
    yielded: usize,
    finished: bool,
}

impl ListingExtractor {
    pub fn new(settings: &BrowserSettings) -> Self {
        ListingExtractor {
            max_scroll_attempts: settings.max_scroll_attempts,
            scroll_pause: settings.scroll_pause(),
            navigation_timeout: settings.navigation_timeout(),
            detail_timeout: settings.detail_timeout(),
        }
    }

    /// Lazily yields up to `target` listings for a search.
    ///
    /// Cards whose map id is in `seen` are skipped. A `Parse` error is yielded
    /// for a card that could not be read and extraction moves on; any other
    /// error is yielded once and ends the stream.
    pub fn extract<'a, D: BrowserDriver>(
        &'a self,
        driver: &'a D,
        session: &'a mut Session<D::Handle>,
        task: &'a SearchTask,
        target: usize,
        seen: &'a HashSet<String>,
    ) -> impl Stream<Item = Result<RawListing, ScrapeError>> + 'a {
        let cursor = Cursor {
            driver,
            session,
            cards: None,
            yielded: 0,
            finished: target == 0,
        };

        stream::unfold(cursor, move |mut cursor| async move {
            if cursor.finished || cursor.yielded >= target {
                return None;
            }

            if cursor.cards.is_none() {
                match self
                    .reveal_cards(cursor.driver, cursor.session, task, target, seen)
                    .await
                {
                    Ok(cards) => {
                        log::info!(
                            "{} unseen listings revealed for '{}'",
                            cards.len(),
                            task.search_text
                        );
                        cursor.cards = Some(cards.into());
                    }
                    Err(e) => {
                        cursor.finished = true;
                        return Some((Err(e), cursor));
                    }
                }
            }

            let card = cursor.cards.as_mut()?.pop_front()?;
            match self.read_listing(cursor.driver, cursor.session, &card).await {
                Ok(listing) => {
                    cursor.yielded += 1;
                    Some((Ok(listing), cursor))
                }
                Err(e @ ScrapeError::Parse { .. }) => {
                    log::warn!("Skipping listing: {}", e);
                    Some((Err(e), cursor))
                }
                Err(e) => {
                    cursor.finished = true;
                    Some((Err(e), cursor))
                }
            }
        })
    }

    async fn reveal_cards<D: BrowserDriver>(
        &self,
        driver: &D,
        session: &mut Session<D::Handle>,
        task: &SearchTask,
        target: usize,
        seen: &HashSet<String>,
    ) -> Result<Vec<ListingCard>, ScrapeError> {
        session.pace().await;
        tokio::time::timeout(
            self.navigation_timeout,
            driver.open_search(session.handle(), task),
        )
        .await
        .map_err(|_| {
            ScrapeError::TransientNetwork(format!("timed out loading '{}'", task.search_text))
        })??;

        let mut previous = 0;
        let mut stale_scrolls = 0;
        let mut reached_end = false;

        loop {
            let cards: Vec<ListingCard> = driver
                .visible_cards(session.handle())
                .await?
                .into_iter()
                .filter(|card| !seen.contains(&card.map_id()))
                .collect();

            stale_scrolls = match cards.len() > previous {
                true => 0,
                false => stale_scrolls + 1,
            };
            previous = cards.len();

            if cards.len() >= target || reached_end || stale_scrolls > self.max_scroll_attempts {
                return Ok(cards);
            }

            reached_end = driver.scroll_feed(session.handle()).await?;
            if !self.scroll_pause.is_zero() {
                tokio::time::sleep(self.scroll_pause).await;
            }
        }
    }

    async fn read_listing<D: BrowserDriver>(
        &self,
        driver: &D,
        session: &mut Session<D::Handle>,
        card: &ListingCard,
    ) -> Result<RawListing, ScrapeError> {
        session.pace().await;
        let details = tokio::time::timeout(
            self.detail_timeout,
            driver.read_place(session.handle(), card),
        )
        .await
        .map_err(|_| {
            ScrapeError::TransientNetwork(format!("timed out reading {}", card.place_url))
        })??;

        RawListing::from_details(card, details)
    }
}
