use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    category::Category,
    email::EmailAddress,
    fingerprint::Fingerprint,
    html_tag::SocialNetwork,
    listing::{RawListing, ServiceOptions},
};

/// A deduplicated, enriched, classified business.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lead {
    pub fingerprint: Fingerprint,
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f32>,
    pub reviews_count: Option<u32>,
    pub opens_at: Option<String>,
    pub service_options: ServiceOptions,
    pub introduction: Option<String>,
    pub map_id: Option<String>,
    pub source_url: Option<String>,
    pub emails: BTreeSet<EmailAddress>,
    pub social_links: BTreeMap<SocialNetwork, String>,
    pub category: Category,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Lead {
    pub fn from_listing(listing: RawListing, category: Category, now: DateTime<Utc>) -> Self {
        Lead {
            fingerprint: listing.fingerprint(),
            name: listing.name,
            address: listing.address,
            phone: listing.phone,
            website: listing.website,
            rating: listing.rating,
            reviews_count: listing.reviews_count,
            opens_at: listing.opens_at,
            service_options: listing.service_options,
            introduction: listing.introduction,
            map_id: Some(listing.map_id),
            source_url: Some(listing.source_url),
            emails: BTreeSet::new(),
            social_links: BTreeMap::new(),
            category,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn social_link(&self, network: SocialNetwork) -> Option<&str> {
        self.social_links.get(&network).map(|s| s.as_str())
    }

    pub fn has_social_links(&self) -> bool {
        !self.social_links.is_empty()
    }

    /// Folds a fresh observation of the same business into the stored record.
    ///
    /// Emails are unioned, social links keep the stored URL per network and gain
    /// new networks, a non-default incoming category replaces the stored one.
    /// Non-empty business fields are refreshed, service options are taken from
    /// the new observation, and `first_seen` never moves.
    pub fn merge(mut self, incoming: Lead, now: DateTime<Utc>) -> Lead {
        self.emails.extend(incoming.emails);
        for (network, url) in incoming.social_links {
            self.social_links.entry(network).or_insert(url);
        }
        if !incoming.category.is_default() {
            self.category = incoming.category;
        }

        if !incoming.name.is_empty() {
            self.name = incoming.name;
        }
        if !incoming.address.is_empty() {
            self.address = incoming.address;
        }
        self.phone = incoming.phone.or(self.phone);
        self.website = incoming.website.or(self.website);
        self.rating = incoming.rating.or(self.rating);
        self.reviews_count = incoming.reviews_count.or(self.reviews_count);
        self.opens_at = incoming.opens_at.or(self.opens_at);
        self.service_options = incoming.service_options;
        self.introduction = incoming.introduction.or(self.introduction);
        self.map_id = incoming.map_id.or(self.map_id);
        self.source_url = incoming.source_url.or(self.source_url);
        self.last_seen = now;

        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::Lead;
    use crate::domain::{
        category::Category,
        email::EmailAddress,
        html_tag::SocialNetwork,
        listing::{RawListing, ServiceOptions},
    };

    fn listing() -> RawListing {
        RawListing {
            name: "Pequod's Pizza".to_string(),
            address: "2207 N Clybourn Ave, Chicago".to_string(),
            phone: Some("(773) 327-1512".to_string()),
            rating: Some(4.6),
            category_hint: Some("Pizza restaurant".to_string()),
            website: Some("pequodspizza.com".to_string()),
            source_url: "https://www.google.com/maps/place/Pequods".to_string(),
            map_id: "0x1:0x2".to_string(),
            reviews_count: Some(2950),
            opens_at: Some("Closes 11 PM".to_string()),
            service_options: ServiceOptions {
                delivery: true,
                ..ServiceOptions::default()
            },
            introduction: Some("Caramelized-crust deep dish.".to_string()),
        }
    }

    fn email(raw: &str) -> EmailAddress {
        EmailAddress::parse(raw).unwrap()
    }

    #[test]
    fn merge_unions_contact_data_and_keeps_first_seen() {
        let first_seen = Utc::now() - Duration::days(3);
        let mut stored = Lead::from_listing(listing(), Category::Restaurant, first_seen);
        stored.emails.insert(email("owner@pequods.com"));
        stored
            .social_links
            .insert(SocialNetwork::Facebook, "https://www.facebook.com/pequods".to_string());

        let now = Utc::now();
        let mut incoming = Lead::from_listing(listing(), Category::Uncategorized, now);
        incoming.emails.insert(email("events@pequods.com"));
        incoming.emails.insert(email("owner@pequods.com"));
        incoming
            .social_links
            .insert(SocialNetwork::Facebook, "https://www.facebook.com/other".to_string());
        incoming
            .social_links
            .insert(SocialNetwork::Instagram, "https://www.instagram.com/pequods".to_string());

        let merged = stored.merge(incoming, now);

        assert_eq!(merged.emails.len(), 2);
        assert_eq!(
            merged.social_link(SocialNetwork::Facebook),
            Some("https://www.facebook.com/pequods")
        );
        assert_eq!(
            merged.social_link(SocialNetwork::Instagram),
            Some("https://www.instagram.com/pequods")
        );
        assert_eq!(merged.category, Category::Restaurant);
        assert_eq!(merged.first_seen, first_seen);
        assert_eq!(merged.last_seen, now);
    }

    #[test]
    fn merge_takes_newer_non_default_category() {
        let now = Utc::now();
        let stored = Lead::from_listing(listing(), Category::Uncategorized, now);
        let incoming = Lead::from_listing(listing(), Category::Retail, now);

        assert_eq!(stored.merge(incoming, now).category, Category::Retail);
    }

    #[test]
    fn merge_keeps_stored_fields_the_new_observation_lacks() {
        let now = Utc::now();
        let stored = Lead::from_listing(listing(), Category::Restaurant, now);
        let mut incoming = Lead::from_listing(listing(), Category::Restaurant, now);
        incoming.phone = None;
        incoming.website = None;
        incoming.reviews_count = None;

        let merged = stored.merge(incoming, now);

        assert_eq!(merged.phone.as_deref(), Some("(773) 327-1512"));
        assert_eq!(merged.website.as_deref(), Some("pequodspizza.com"));
        assert_eq!(merged.reviews_count, Some(2950));
    }

    #[test]
    fn merge_refreshes_place_details() {
        let now = Utc::now();
        let stored = Lead::from_listing(listing(), Category::Restaurant, now);
        let mut fresh = listing();
        fresh.reviews_count = Some(3012);
        fresh.opens_at = None;
        fresh.service_options = ServiceOptions::default();
        let incoming = Lead::from_listing(fresh, Category::Restaurant, now);

        let merged = stored.merge(incoming, now);

        assert_eq!(merged.reviews_count, Some(3012));
        assert_eq!(merged.opens_at.as_deref(), Some("Closes 11 PM"));
        assert!(!merged.service_options.delivery);
    }
}
