pub mod cache;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod language;
pub mod logger;
pub mod metrics;
pub mod models;
pub mod reconcile;
pub mod service;
pub mod source;
pub mod submissions;
