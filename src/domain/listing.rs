use serde::Serialize;

use crate::{domain::fingerprint::Fingerprint, error::ScrapeError};

/// Raw field text read off a place page, before any validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceDetails {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub rating: String,
    pub category: String,
    pub website: String,
    pub reviews_count: String,
    pub opens_at: String,
    /// The "Dine-in · Takeout · Delivery" style info lines under the header.
    pub service_lines: Vec<String>,
    pub introduction: String,
}

/// What a place advertises in its service info lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceOptions {
    pub in_store_shopping: bool,
    pub in_store_pickup: bool,
    pub delivery: bool,
}

impl ServiceOptions {
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut options = ServiceOptions::default();
        for offered in lines.into_iter().flat_map(|line| line.split('·').skip(1)) {
            let offered = offered.trim().to_lowercase();
            if offered.starts_with("no ") {
                continue;
            }
            options.in_store_shopping |= offered.contains("shop");
            options.in_store_pickup |= offered.contains("pickup");
            options.delivery |= offered.contains("delivery");
        }
        options
    }
}

/// A result card in the search feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingCard {
    pub place_url: String,
    pub label: Option<String>,
}

impl ListingCard {
    pub fn map_id(&self) -> String {
        map_id_from_url(&self.place_url).unwrap_or_else(|| self.place_url.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawListing {
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
    pub rating: Option<f32>,
    pub category_hint: Option<String>,
    pub website: Option<String>,
    pub reviews_count: Option<u32>,
    pub opens_at: Option<String>,
    pub service_options: ServiceOptions,
    pub introduction: Option<String>,
    pub source_url: String,
    pub map_id: String,
}

impl RawListing {
    pub fn from_details(card: &ListingCard, details: PlaceDetails) -> Result<Self, ScrapeError> {
        let name = clean_text(&details.name)
            .or_else(|| card.label.as_deref().and_then(clean_text))
            .ok_or_else(|| ScrapeError::Parse {
                map_id: card.map_id(),
                message: format!("no name on {}", card.place_url),
            })?;

        let rating = match clean_text(&details.rating) {
            Some(raw) => match parse_rating(&raw) {
                Some(rating) => Some(rating),
                None => {
                    log::warn!("Unparsable rating {:?} for {}", raw, name);
                    None
                }
            },
            None => None,
        };

        Ok(RawListing {
            name,
            address: clean_text(&details.address).unwrap_or_default(),
            phone: clean_text(&details.phone),
            rating,
            category_hint: clean_text(&details.category),
            website: clean_text(&details.website).filter(|w| w != "None Found"),
            reviews_count: parse_reviews_count(&details.reviews_count),
            opens_at: parse_opens_at(&details.opens_at),
            service_options: ServiceOptions::from_lines(
                details.service_lines.iter().map(|l| l.as_str()),
            ),
            introduction: clean_text(&details.introduction).filter(|i| i != "None Found"),
            source_url: card.place_url.clone(),
            map_id: card.map_id(),
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.name, &self.address)
    }
}

fn clean_text(value: &str) -> Option<String> {
    let value = value
        .replace(['\u{a0}', '\u{202f}'], " ")
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ");
    match value.is_empty() {
        true => None,
        false => Some(value),
    }
}

/// Handles both `4.5` and the comma-decimal `4,5` some locales render.
pub fn parse_rating(raw: &str) -> Option<f32> {
    let rating: f32 = raw
        .trim()
        .split_whitespace()
        .next()?
        .replace(',', ".")
        .parse()
        .ok()?;
    (0.0..=5.0).contains(&rating).then_some(rating)
}

/// `(1,234)` and `1.234` both read as 1234.
pub fn parse_reviews_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// `Open ⋅ Closes 10 PM` keeps the part after the separator.
pub fn parse_opens_at(raw: &str) -> Option<String> {
    let raw = raw.replace('\u{202f}', " ");
    let hours = match raw.split_once('⋅') {
        Some((_, hours)) => hours,
        None => raw.as_str(),
    };
    clean_text(hours)
}

/// Feature id of a place URL, e.g. `0x880e2cb8f4d4e0a1:0x2c8d7b3a7e54cdb`.
pub fn map_id_from_url(url: &str) -> Option<String> {
    let start = url.find("!1s")? + 3;
    let id: String = url[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit() || *c == 'x' || *c == ':')
        .collect();
    match id.contains(':') {
        true => Some(id),
        false => None,
    }
}

pub fn is_place_url(href: &str) -> bool {
    href.starts_with("https://www.google.com/maps/place")
}

#[cfg(test)]
mod tests {
    use super::{
        is_place_url, map_id_from_url, parse_opens_at, parse_rating, parse_reviews_count,
        ListingCard, PlaceDetails, RawListing, ServiceOptions,
    };
    use crate::error::ScrapeError;

    const PLACE_URL: &str = "https://www.google.com/maps/place/Lou+Malnati's/data=!4m7!3m6!1s0x880e2cb8f4d4e0a1:0x2c8d7b3a7e54cdb!8m2!3d41.89!4d-87.63";

    fn card() -> ListingCard {
        ListingCard {
            place_url: PLACE_URL.to_string(),
            label: Some("Lou Malnati's Pizzeria".to_string()),
        }
    }

    #[test]
    fn map_id_is_read_from_place_url() {
        assert_eq!(
            map_id_from_url(PLACE_URL),
            Some("0x880e2cb8f4d4e0a1:0x2c8d7b3a7e54cdb".to_string())
        );
        assert_eq!(map_id_from_url("https://www.google.com/maps/place/Foo"), None);
        assert_eq!(card().map_id(), "0x880e2cb8f4d4e0a1:0x2c8d7b3a7e54cdb");
    }

    #[test]
    fn ratings_parse_in_both_decimal_styles() {
        assert_eq!(parse_rating("4.5"), Some(4.5));
        assert_eq!(parse_rating("4,7"), Some(4.7));
        assert_eq!(parse_rating(" 3.9 stars"), Some(3.9));
        assert_eq!(parse_rating("7.0"), None);
        assert_eq!(parse_rating("n/a"), None);
    }

    #[test]
    fn listing_is_built_from_details() {
        let details = PlaceDetails {
            name: "Lou Malnati's\u{a0}Pizzeria".to_string(),
            address: " 439 N Wells St,  Chicago ".to_string(),
            phone: "(312) 828-9800".to_string(),
            rating: "4,5".to_string(),
            category: "Pizza restaurant".to_string(),
            website: "loumalnatis.com".to_string(),
            reviews_count: "(12,408)".to_string(),
            opens_at: "Open ⋅ Closes 11\u{202f}PM".to_string(),
            service_lines: vec![
                "Dine-in · Takeout · Delivery".to_string(),
                "Serves vegetarian dishes".to_string(),
            ],
            introduction: "Chicago-style deep-dish pizza since 1971.".to_string(),
        };

        let listing = RawListing::from_details(&card(), details).unwrap();

        assert_eq!(listing.name, "Lou Malnati's Pizzeria");
        assert_eq!(listing.address, "439 N Wells St, Chicago");
        assert_eq!(listing.phone.as_deref(), Some("(312) 828-9800"));
        assert_eq!(listing.rating, Some(4.5));
        assert_eq!(listing.category_hint.as_deref(), Some("Pizza restaurant"));
        assert_eq!(listing.website.as_deref(), Some("loumalnatis.com"));
        assert_eq!(listing.map_id, "0x880e2cb8f4d4e0a1:0x2c8d7b3a7e54cdb");
        assert_eq!(listing.reviews_count, Some(12408));
        assert_eq!(listing.opens_at.as_deref(), Some("Closes 11 PM"));
        assert!(listing.service_options.delivery);
        assert!(!listing.service_options.in_store_pickup);
        assert_eq!(
            listing.introduction.as_deref(),
            Some("Chicago-style deep-dish pizza since 1971.")
        );
    }

    #[test]
    fn review_counts_and_hours_are_cleaned() {
        assert_eq!(parse_reviews_count("(1,234)"), Some(1234));
        assert_eq!(parse_reviews_count("1.234"), Some(1234));
        assert_eq!(parse_reviews_count(""), None);
        assert_eq!(parse_opens_at("Opens 11 AM"), Some("Opens 11 AM".to_string()));
        assert_eq!(parse_opens_at(""), None);
    }

    #[test]
    fn service_options_come_from_the_parts_after_the_first_dot() {
        let options = ServiceOptions::from_lines([
            "Service options · In-store shopping · In-store pickup",
            "Shop online",
            "Delivery · No delivery",
        ]);

        assert!(options.in_store_shopping);
        assert!(options.in_store_pickup);
        assert!(!options.delivery);
    }

    #[test]
    fn card_label_fills_in_missing_name() {
        let listing = RawListing::from_details(&card(), PlaceDetails::default()).unwrap();

        assert_eq!(listing.name, "Lou Malnati's Pizzeria");
        assert_eq!(listing.phone, None);
        assert_eq!(listing.website, None);
    }

    #[test]
    fn listing_without_any_name_is_a_parse_error() {
        let card = ListingCard {
            place_url: PLACE_URL.to_string(),
            label: None,
        };

        let result = RawListing::from_details(&card, PlaceDetails::default());

        assert!(matches!(
            result,
            Err(ScrapeError::Parse { ref map_id, .. }) if map_id == "0x880e2cb8f4d4e0a1:0x2c8d7b3a7e54cdb"
        ));
    }

    #[test]
    fn only_place_links_count_as_listings() {
        assert!(is_place_url(PLACE_URL));
        assert!(!is_place_url("https://www.google.com/maps/search/pizza"));
    }
}
