use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{header::USER_AGENT, redirect::Policy, Client};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    configuration::EnrichmentSettings,
    domain::{
        email::{EmailAddress, EmailExtractor},
        html_tag::{collect_anchor_tags, extract_domain, extract_social_link, HtmlTag, SocialNetwork},
    },
    error::FetchError,
};

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Body of the page at `url`.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &EnrichmentSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .connect_timeout(settings.timeout())
            .redirect(Policy::limited(settings.max_redirects))
            .cookie_store(true)
            .build()?;

        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let res = self
            .client
            .get(url)
            .header(USER_AGENT, fake_user_agent::get_rua())
            .send()
            .await?
            .error_for_status()?;

        Ok(res.text().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentStatus {
    /// The homepage was read.
    Complete,
    /// The homepage could not be read; whatever was found is kept.
    Partial,
    /// Nothing was attempted.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub emails: BTreeSet<EmailAddress>,
    pub social_links: BTreeMap<SocialNetwork, String>,
    pub status: EnrichmentStatus,
}

impl Enrichment {
    pub fn skipped() -> Self {
        Enrichment {
            emails: BTreeSet::new(),
            social_links: BTreeMap::new(),
            status: EnrichmentStatus::Skipped,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == EnrichmentStatus::Partial
    }
}

pub struct Enricher {
    fetcher: Arc<dyn PageFetcher>,
    extractor: EmailExtractor,
    contact_paths: Vec<String>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl Enricher {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: &EnrichmentSettings) -> Self {
        Enricher {
            fetcher,
            extractor: EmailExtractor::new(settings.email_filter_mode),
            contact_paths: settings.contact_paths.clone(),
            max_attempts: settings.max_attempts.max(1),
            backoff_base: settings.backoff_base(),
        }
    }

    /// Scrapes the business website for emails and social profiles.
    ///
    /// The homepage is read first, then the contact pages until an email turns
    /// up. Failures never propagate: a homepage that cannot be read gives a
    /// `Partial` result.
    pub async fn enrich(&self, website: &str, cancel: &CancellationToken) -> Enrichment {
        let Some(homepage) = normalize_website(website) else {
            log::debug!("Not enriching unusable website {:?}", website);
            return Enrichment::skipped();
        };
        if cancel.is_cancelled() {
            return Enrichment::skipped();
        }

        let mut enrichment = Enrichment {
            emails: BTreeSet::new(),
            social_links: BTreeMap::new(),
            status: EnrichmentStatus::Complete,
        };

        match self.fetch_with_retry(&homepage, cancel).await {
            Ok(html) => self.absorb(&mut enrichment, &html, &homepage),
            Err(e) => {
                log::warn!("Could not read {}: {}", homepage, e);
                enrichment.status = match cancel.is_cancelled() {
                    true => EnrichmentStatus::Skipped,
                    false => EnrichmentStatus::Partial,
                };
                return enrichment;
            }
        }

        for path in self.contact_paths.iter() {
            if !enrichment.emails.is_empty() || cancel.is_cancelled() {
                break;
            }
            let Ok(page) = homepage.join(path) else {
                continue;
            };
            match self.fetch_with_retry(&page, cancel).await {
                Ok(html) => self.absorb(&mut enrichment, &html, &page),
                Err(e) => log::debug!("No contact page at {}: {}", page, e),
            }
        }

        log::info!(
            "{}: {} emails, {} social links",
            homepage,
            enrichment.emails.len(),
            enrichment.social_links.len()
        );
        enrichment
    }

    async fn fetch_with_retry(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetcher.fetch(url.as_str()).await {
                Ok(html) => return Ok(html),
                Err(FetchError::Transient(message)) if attempt < self.max_attempts => {
                    let backoff = self.backoff_base * 2u32.pow(attempt - 1);
                    log::debug!(
                        "Retrying {} in {:?} after attempt {}: {}",
                        url,
                        backoff,
                        attempt,
                        message
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Transient(message)),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn absorb(&self, enrichment: &mut Enrichment, html: &str, page: &Url) {
        let tags = collect_anchor_tags(html);

        let mailto = tags.iter().filter_map(|tag| match tag {
            HtmlTag::MailtoTag(address) => Some(address.as_str()),
            HtmlTag::ATag(_) => None,
        });
        enrichment.emails.extend(self.extractor.filter(mailto));
        enrichment.emails.extend(self.extractor.extract(html));

        for (network, url) in tags.iter().filter_map(|tag| extract_social_link(tag, page)) {
            enrichment.social_links.entry(network).or_insert(url);
        }
    }
}

/// Absolute http(s) URL of a listing's website, or `None` when it is not a
/// business site (for instance a link back into Google).
pub fn normalize_website(website: &str) -> Option<Url> {
    let website = website.trim();
    if website.is_empty() {
        return None;
    }

    let candidate = match website.contains("://") {
        true => website.to_string(),
        false => format!("https://{}", website.trim_start_matches("//")),
    };
    let url = Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    extract_domain(&HtmlTag::ATag(url.to_string()))?;

    Some(url)
}
