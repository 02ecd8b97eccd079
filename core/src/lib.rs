//! Customer propensity pipeline.
//!
//! Raw source tables flow through normalize → resolve → aggregate → score
//! (see pipeline.rs); the classifier then trains on the finished feature
//! table and the store persists each run's outputs.

pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod features;
pub mod identity;
pub mod normalizer;
pub mod pipeline;
pub mod rng;
pub mod scoring;
pub mod stage;
pub mod store;
pub mod table;
pub mod types;
