use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::{
    configuration::DatabaseSettings,
    dal::lead_db,
    domain::{fingerprint::Fingerprint, lead::Lead},
    error::StoreError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(Lead),
    Merged(Lead),
}

impl UpsertOutcome {
    pub fn lead(&self) -> &Lead {
        match self {
            UpsertOutcome::Inserted(lead) | UpsertOutcome::Merged(lead) => lead,
        }
    }

    pub fn into_lead(self) -> Lead {
        match self {
            UpsertOutcome::Inserted(lead) | UpsertOutcome::Merged(lead) => lead,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Persistent fingerprint to lead mapping shared by every run.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Lead>, StoreError>;

    /// Inserts the lead, or merges it into the record stored under its fingerprint.
    async fn upsert(&self, lead: Lead) -> Result<UpsertOutcome, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn all(&self) -> Result<Vec<Lead>, StoreError>;

    /// Deletes every stored lead. Returns how many were removed.
    async fn reset(&self) -> Result<usize, StoreError>;
}

/// One async mutex per fingerprint. Entries are dropped once nobody holds them.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn lock_for(&self, fingerprint: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(fingerprint.clone()).or_default().clone()
    }
}

fn merge_or_insert(stored: Option<Lead>, incoming: Lead) -> UpsertOutcome {
    let now = Utc::now();
    match stored {
        Some(stored) => UpsertOutcome::Merged(stored.merge(incoming, now)),
        None => UpsertOutcome::Inserted(Lead {
            first_seen: now,
            last_seen: now,
            ..incoming
        }),
    }
}

pub struct SqliteLeadStore {
    pool: SqlitePool,
    locks: KeyedLocks,
    /// SQLite takes one writer at a time. A deferred transaction that reads
    /// first cannot wait for the write lock, so writers queue here instead.
    writes: tokio::sync::Mutex<()>,
}

impl SqliteLeadStore {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        if let Some(parent) = settings.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect_with(settings.connect_options())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        log::info!("Lead store ready at {}", settings.path.display());
        Ok(SqliteLeadStore {
            pool,
            locks: KeyedLocks::default(),
            writes: tokio::sync::Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn connection(
        &self,
        fingerprint: &str,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StoreError::from_sqlx(fingerprint, e))
    }
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Lead>, StoreError> {
        let mut con = self.connection(fingerprint.as_str()).await?;
        lead_db::get_lead(&mut con, fingerprint)
            .await
            .map_err(|e| StoreError::from_sqlx(fingerprint.as_str(), e))
    }

    async fn upsert(&self, lead: Lead) -> Result<UpsertOutcome, StoreError> {
        let key = lead.fingerprint.clone();
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock().await;
        let _write = self.writes.lock().await;

        let to_store_error = |e: sqlx::Error| StoreError::from_sqlx(key.as_str(), e);
        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        let stored = lead_db::get_lead(&mut *tx, &key)
            .await
            .map_err(to_store_error)?;
        let outcome = merge_or_insert(stored, lead);
        lead_db::upsert_lead(&mut *tx, outcome.lead())
            .await
            .map_err(to_store_error)?;

        tx.commit().await.map_err(to_store_error)?;
        Ok(outcome)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut con = self.connection("").await?;
        let count = lead_db::count_leads(&mut con)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(count as usize)
    }

    async fn all(&self) -> Result<Vec<Lead>, StoreError> {
        let mut con = self.connection("").await?;
        lead_db::get_all_leads(&mut con)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn reset(&self) -> Result<usize, StoreError> {
        let _write = self.writes.lock().await;
        let mut con = self.connection("").await?;
        let deleted = lead_db::delete_all_leads(&mut con)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        log::warn!("Lead store reset, {} leads deleted", deleted);
        Ok(deleted as usize)
    }
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: tokio::sync::Mutex<HashMap<Fingerprint, Lead>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        MemoryLeadStore::default()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Lead>, StoreError> {
        Ok(self.leads.lock().await.get(fingerprint).cloned())
    }

    async fn upsert(&self, lead: Lead) -> Result<UpsertOutcome, StoreError> {
        let mut leads = self.leads.lock().await;
        let key = lead.fingerprint.clone();
        let outcome = merge_or_insert(leads.remove(&key), lead);
        leads.insert(key, outcome.lead().clone());
        Ok(outcome)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.leads.lock().await.len())
    }

    async fn all(&self) -> Result<Vec<Lead>, StoreError> {
        let mut leads: Vec<Lead> = self.leads.lock().await.values().cloned().collect();
        leads.sort_by(|a, b| (a.first_seen, &a.name).cmp(&(b.first_seen, &b.name)));
        Ok(leads)
    }

    async fn reset(&self) -> Result<usize, StoreError> {
        let mut leads = self.leads.lock().await;
        let deleted = leads.len();
        leads.clear();
        Ok(deleted)
    }
}
