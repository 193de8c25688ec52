//! storewatch library - store uptime/downtime estimation
//!
//! This module exports internal components for integration testing.

pub mod calendar;
pub mod cli;
pub mod config;
pub mod estimator;
pub mod health;
pub mod ingest;
pub mod model;
pub mod registry;
pub mod report;
pub mod samples;
pub mod server;
pub mod service;
