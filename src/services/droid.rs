use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use thirtyfour::prelude::*;

use crate::{
    configuration::BrowserSettings,
    domain::{
        listing::{is_place_url, ListingCard, PlaceDetails},
        search_task::SearchTask,
    },
    error::ScrapeError,
};

const PLACE_LINK_XPATH: &str = r#"//a[contains(@href, "https://www.google.com/maps/place")]"#;
const END_OF_LIST_XPATH: &str = r#"//span[contains(text(), "reached the end of the list")]"#;

const CONSENT_BUTTON_XPATHS: [&str; 4] = [
    r#"//button[@aria-label="Accept all"]"#,
    r#"//button[.//span[text()="Accept all"]]"#,
    r#"//button[.//span[text()="I agree"]]"#,
    r#"//button[@id="L2AGLb"]"#,
];

const NAME_XPATH: &str = r#"//h1[contains(@class, "DUwDvf")]"#;
const ADDRESS_XPATH: &str =
    r#"//button[@data-item-id="address"]//div[contains(@class, "fontBodyMedium")]"#;
const PHONE_XPATH: &str =
    r#"//button[contains(@data-item-id, "phone:tel:")]//div[contains(@class, "fontBodyMedium")]"#;
const RATING_XPATH: &str = r#"//div[contains(@class, "F7nice")]//span[@aria-hidden="true"]"#;
const CATEGORY_XPATH: &str = r#"//button[contains(@class, "DkEaL")]"#;
const WEBSITE_XPATH: &str = r#"//a[@data-item-id="authority"]"#;
const REVIEWS_XPATH: &str = r#"//div[contains(@class, "F7nice")]//span[@aria-label][contains(@aria-label, "review")]"#;
const OPENS_AT_XPATHS: [&str; 2] = [
    r#"//button[contains(@data-item-id, "oh")]//div[contains(@class, "fontBodyMedium")]"#,
    r#"//div[@class="MkV9"]//span[@class="ZDu9vd"]//span[2]"#,
];
const INFO_LINES_XPATH: &str = r#"//div[@class="LTs0Rc"]"#;
const INTRODUCTION_XPATH: &str = r#"//div[@class="WeS02d fontBodyMedium"]//div[@class="PYvSYb "]"#;

const SCROLL_FEED_SCRIPT: &str = r#"
    const feed = document.querySelector('div[role="feed"]');
    if (feed) { feed.scrollTop = feed.scrollHeight; }
"#;

/// The handful of browser operations the scraper needs.
#[async_trait]
pub trait BrowserDriver: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    async fn open_session(&self) -> Result<Self::Handle, ScrapeError>;

    /// Loads the search results for a task, getting past the consent wall if shown.
    async fn open_search(&self, handle: &Self::Handle, task: &SearchTask)
        -> Result<(), ScrapeError>;

    /// Result cards currently rendered in the feed, in feed order.
    async fn visible_cards(&self, handle: &Self::Handle) -> Result<Vec<ListingCard>, ScrapeError>;

    /// Scrolls the feed once. Returns true when the feed reports its end.
    async fn scroll_feed(&self, handle: &Self::Handle) -> Result<bool, ScrapeError>;

    async fn read_place(
        &self,
        handle: &Self::Handle,
        card: &ListingCard,
    ) -> Result<PlaceDetails, ScrapeError>;

    async fn close_session(&self, handle: Self::Handle);
}

/// Chrome over WebDriver.
pub struct Droid {
    webdriver_url: String,
    headless: bool,
    navigation_timeout: Duration,
    detail_timeout: Duration,
}

impl Droid {
    pub fn new(settings: &BrowserSettings) -> Self {
        Droid {
            webdriver_url: settings.webdriver_url.clone(),
            headless: settings.headless,
            navigation_timeout: settings.navigation_timeout(),
            detail_timeout: settings.detail_timeout(),
        }
    }

    async fn dismiss_consent(&self, driver: &WebDriver) -> Result<(), ScrapeError> {
        for xpath in CONSENT_BUTTON_XPATHS {
            if let Some(button) = driver.find_all(By::XPath(xpath)).await?.into_iter().next() {
                button.click().await?;
                log::info!("Dismissed consent dialog with {}", xpath);
                tokio::time::sleep(Duration::from_secs(2)).await;
                break;
            }
        }
        Ok(())
    }

    async fn first_text(&self, driver: &WebDriver, xpath: &str) -> Result<String, ScrapeError> {
        match driver.find_all(By::XPath(xpath)).await?.into_iter().next() {
            Some(element) => Ok(element.text().await?),
            None => Ok(String::new()),
        }
    }

    async fn reviews_label(&self, driver: &WebDriver) -> Result<String, ScrapeError> {
        match driver
            .find_all(By::XPath(REVIEWS_XPATH))
            .await?
            .into_iter()
            .next()
        {
            Some(element) => Ok(element.attr("aria-label").await?.unwrap_or_default()),
            None => Ok(String::new()),
        }
    }

    async fn opens_at(&self, driver: &WebDriver) -> Result<String, ScrapeError> {
        for xpath in OPENS_AT_XPATHS {
            let text = self.first_text(driver, xpath).await?;
            if !text.trim().is_empty() {
                return Ok(text);
            }
        }
        Ok(String::new())
    }
}

#[async_trait]
impl BrowserDriver for Droid {
    type Handle = WebDriver;

    async fn open_session(&self) -> Result<WebDriver, ScrapeError> {
        let mut caps = DesiredCapabilities::chrome();
        if self.headless {
            caps.set_headless()?;
        }
        caps.add_arg("--lang=en-US")?;
        caps.add_arg("--window-size=1280,720")?;
        caps.add_arg(&format!("--user-agent={}", fake_user_agent::get_chrome_rua()))?;

        let driver = WebDriver::new(self.webdriver_url.as_str(), caps).await?;
        driver.set_page_load_timeout(self.navigation_timeout).await?;

        Ok(driver)
    }

    async fn open_search(&self, driver: &WebDriver, task: &SearchTask) -> Result<(), ScrapeError> {
        driver.goto(task.search_url().as_str()).await?;
        self.dismiss_consent(driver).await?;

        let has_results = driver
            .query(By::XPath(PLACE_LINK_XPATH))
            .wait(self.detail_timeout, Duration::from_millis(500))
            .exists()
            .await?;
        if !has_results {
            log::warn!("No results rendered for '{}'", task.search_text);
        }

        Ok(())
    }

    async fn visible_cards(&self, driver: &WebDriver) -> Result<Vec<ListingCard>, ScrapeError> {
        let mut cards = vec![];
        for a_tag in driver.find_all(By::XPath(PLACE_LINK_XPATH)).await? {
            let Some(href) = a_tag.attr("href").await? else {
                continue;
            };
            if !is_place_url(&href) {
                continue;
            }
            cards.push(ListingCard {
                place_url: href,
                label: a_tag.attr("aria-label").await?,
            });
        }

        Ok(cards
            .into_iter()
            .unique_by(|card| card.place_url.clone())
            .collect())
    }

    async fn scroll_feed(&self, driver: &WebDriver) -> Result<bool, ScrapeError> {
        driver.execute(SCROLL_FEED_SCRIPT, Vec::new()).await?;
        Ok(!driver
            .find_all(By::XPath(END_OF_LIST_XPATH))
            .await?
            .is_empty())
    }

    async fn read_place(
        &self,
        driver: &WebDriver,
        card: &ListingCard,
    ) -> Result<PlaceDetails, ScrapeError> {
        driver.goto(card.place_url.as_str()).await?;

        let name = match driver
            .query(By::XPath(NAME_XPATH))
            .wait(self.detail_timeout, Duration::from_millis(250))
            .first()
            .await
        {
            Ok(element) => element.text().await?,
            Err(e) => {
                log::warn!("Place name never rendered on {}: {}", card.place_url, e);
                String::new()
            }
        };

        let website = match driver
            .find_all(By::XPath(WEBSITE_XPATH))
            .await?
            .into_iter()
            .next()
        {
            Some(a_tag) => a_tag.attr("href").await?.unwrap_or_default(),
            None => String::new(),
        };

        let mut service_lines = vec![];
        for line in driver.find_all(By::XPath(INFO_LINES_XPATH)).await? {
            service_lines.push(line.text().await?);
        }

        Ok(PlaceDetails {
            name,
            address: self.first_text(driver, ADDRESS_XPATH).await?,
            phone: self.first_text(driver, PHONE_XPATH).await?,
            rating: self.first_text(driver, RATING_XPATH).await?,
            category: self.first_text(driver, CATEGORY_XPATH).await?,
            website,
            reviews_count: self.reviews_label(driver).await?,
            opens_at: self.opens_at(driver).await?,
            service_lines,
            introduction: self.first_text(driver, INTRODUCTION_XPATH).await?,
        })
    }

    async fn close_session(&self, driver: WebDriver) {
        if let Err(e) = driver.quit().await {
            log::warn!("Failed to quit browser session: {}", e);
        }
    }
}
