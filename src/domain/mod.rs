pub mod category;
pub mod email;
pub mod fingerprint;
pub mod html_tag;
pub mod lead;
pub mod listing;
pub mod progress;
pub mod search_task;
