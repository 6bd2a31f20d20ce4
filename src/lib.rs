pub mod configuration;
pub mod dal;
pub mod domain;
pub mod error;
pub mod export;
pub mod services;
pub mod startup;
