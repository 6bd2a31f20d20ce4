pub mod dedup_store;
pub mod droid;
pub mod enricher;
#[cfg(test)]
pub mod fakes;
pub mod maps_scraper;
pub mod pipeline;
pub mod session_pool;

pub use dedup_store::*;
pub use droid::*;
pub use enricher::*;
pub use maps_scraper::*;
pub use pipeline::*;
pub use session_pool::*;
