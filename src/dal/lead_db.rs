use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use sqlx::SqliteConnection;

use crate::domain::{
    category::Category, email::EmailAddress, fingerprint::Fingerprint, html_tag::SocialNetwork,
    lead::Lead,
    listing::ServiceOptions,
};

const EMAIL_DELIMITER: &str = ";";

#[derive(sqlx::FromRow)]
struct LeadRow {
    fingerprint: String,
    name: String,
    address: String,
    phone: Option<String>,
    website: Option<String>,
    category: String,
    emails: String,
    facebook: Option<String>,
    instagram: Option<String>,
    twitter: Option<String>,
    linkedin: Option<String>,
    rating: Option<f64>,
    reviews_count: Option<i64>,
    opens_at: Option<String>,
    in_store_shopping: bool,
    in_store_pickup: bool,
    delivery: bool,
    introduction: Option<String>,
    map_id: Option<String>,
    source_url: Option<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl From<LeadRow> for Lead {
    fn from(row: LeadRow) -> Self {
        let emails: BTreeSet<EmailAddress> = row
            .emails
            .split(EMAIL_DELIMITER)
            .filter(|e| !e.is_empty())
            .filter_map(|e| EmailAddress::parse(e).ok())
            .collect();

        let social_links: BTreeMap<SocialNetwork, String> = [
            (SocialNetwork::Facebook, row.facebook),
            (SocialNetwork::Instagram, row.instagram),
            (SocialNetwork::Twitter, row.twitter),
            (SocialNetwork::Linkedin, row.linkedin),
        ]
        .into_iter()
        .filter_map(|(network, url)| url.map(|url| (network, url)))
        .collect();

        let category = row.category.parse().unwrap_or_else(|e| {
            log::warn!("Stored lead {} has {}", row.fingerprint, e);
            Category::Uncategorized
        });

        Lead {
            fingerprint: Fingerprint::from_stored(row.fingerprint),
            name: row.name,
            address: row.address,
            phone: row.phone,
            website: row.website,
            rating: row.rating.map(|r| r as f32),
            reviews_count: row.reviews_count.and_then(|c| u32::try_from(c).ok()),
            opens_at: row.opens_at,
            service_options: ServiceOptions {
                in_store_shopping: row.in_store_shopping,
                in_store_pickup: row.in_store_pickup,
                delivery: row.delivery,
            },
            introduction: row.introduction,
            map_id: row.map_id,
            source_url: row.source_url,
            emails,
            social_links,
            category,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        }
    }
}

pub async fn get_lead(
    con: &mut SqliteConnection,
    fingerprint: &Fingerprint,
) -> Result<Option<Lead>, sqlx::Error> {
    let row = sqlx::query_as::<_, LeadRow>(
        r"
        select
            *
        from
            leads
        where
            fingerprint = $1
        ",
    )
    .bind(fingerprint.as_str())
    .fetch_optional(&mut *con)
    .await?;

    Ok(row.map(Lead::from))
}

/// Writes the full record, replacing whatever is stored under its fingerprint.
pub async fn upsert_lead(con: &mut SqliteConnection, lead: &Lead) -> Result<(), sqlx::Error> {
    let emails = lead.emails.iter().map(|e| e.as_str()).join(EMAIL_DELIMITER);

    sqlx::query(
        r"
        insert into leads
            (fingerprint, name, address, phone, website, category, emails,
             facebook, instagram, twitter, linkedin, rating, reviews_count, opens_at,
             in_store_shopping, in_store_pickup, delivery, introduction, map_id,
             source_url, first_seen, last_seen)
        values
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
             $17, $18, $19, $20, $21, $22)
        on conflict (fingerprint) do update set
            name = excluded.name,
            address = excluded.address,
            phone = excluded.phone,
            website = excluded.website,
            category = excluded.category,
            emails = excluded.emails,
            facebook = excluded.facebook,
            instagram = excluded.instagram,
            twitter = excluded.twitter,
            linkedin = excluded.linkedin,
            rating = excluded.rating,
            reviews_count = excluded.reviews_count,
            opens_at = excluded.opens_at,
            in_store_shopping = excluded.in_store_shopping,
            in_store_pickup = excluded.in_store_pickup,
            delivery = excluded.delivery,
            introduction = excluded.introduction,
            map_id = excluded.map_id,
            source_url = excluded.source_url,
            last_seen = excluded.last_seen
        ",
    )
    .bind(lead.fingerprint.as_str())
    .bind(&lead.name)
    .bind(&lead.address)
    .bind(&lead.phone)
    .bind(&lead.website)
    .bind(lead.category.as_str())
    .bind(emails)
    .bind(lead.social_link(SocialNetwork::Facebook))
    .bind(lead.social_link(SocialNetwork::Instagram))
    .bind(lead.social_link(SocialNetwork::Twitter))
    .bind(lead.social_link(SocialNetwork::Linkedin))
    .bind(lead.rating.map(f64::from))
    .bind(lead.reviews_count.map(i64::from))
    .bind(&lead.opens_at)
    .bind(lead.service_options.in_store_shopping)
    .bind(lead.service_options.in_store_pickup)
    .bind(lead.service_options.delivery)
    .bind(&lead.introduction)
    .bind(&lead.map_id)
    .bind(&lead.source_url)
    .bind(lead.first_seen)
    .bind(lead.last_seen)
    .execute(&mut *con)
    .await?;

    Ok(())
}

pub async fn count_leads(con: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("select count(*) from leads")
        .fetch_one(&mut *con)
        .await
}

pub async fn get_all_leads(con: &mut SqliteConnection) -> Result<Vec<Lead>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LeadRow>(
        r"
        select
            *
        from
            leads
        order by
            first_seen, name
        ",
    )
    .fetch_all(&mut *con)
    .await?;

    Ok(rows.into_iter().map(Lead::from).collect())
}

pub async fn delete_all_leads(con: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("delete from leads").execute(&mut *con).await?;
    Ok(result.rows_affected())
}
