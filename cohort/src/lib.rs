pub mod cohort;
pub mod config;
