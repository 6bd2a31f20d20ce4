pub mod lead_db;
