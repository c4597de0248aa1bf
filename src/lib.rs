pub mod artifact;
pub mod config;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod pacing;
pub mod routes;
pub mod strategy;
