use std::sync::Arc;

use anyhow::Context;

use crate::{
    configuration::Settings,
    domain::category::Classifier,
    services::{
        Droid, Enricher, HttpFetcher, LeadStore, ListingExtractor, Pipeline, PipelineOptions,
        SessionPool, SqliteLeadStore,
    },
};

/// Wires the store, the browser pool and the enricher into a ready pipeline.
pub async fn build(configuration: &Settings) -> anyhow::Result<Pipeline<Droid>> {
    let store = SqliteLeadStore::connect(&configuration.database)
        .await
        .with_context(|| {
            format!(
                "Failed to open lead store at {}",
                configuration.database.path.display()
            )
        })?;
    let store: Arc<dyn LeadStore> = Arc::new(store);
    log::info!(
        "Lead store at {} holds {} leads",
        configuration.database.path.display(),
        store.count().await?
    );

    let droid = Arc::new(Droid::new(&configuration.browser));
    let pool = Arc::new(SessionPool::new(droid, &configuration.browser));
    let extractor = ListingExtractor::new(&configuration.browser);

    let fetcher = HttpFetcher::new(&configuration.enrichment)
        .context("Failed to build the http client")?;
    let enricher = Enricher::new(Arc::new(fetcher), &configuration.enrichment);

    let classifier = match configuration.classifier.rules.clone() {
        Some(rules) => {
            log::info!("Using {} configured category rules", rules.len());
            Classifier::from_rules(rules)
        }
        None => Classifier::default(),
    };

    let options = PipelineOptions::new(
        &configuration.pipeline,
        &configuration.browser,
        &configuration.enrichment,
    );

    Ok(Pipeline::new(pool, extractor, store, enricher, classifier, options))
}
