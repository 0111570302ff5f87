//! jobs_crm: jobs and customer-relationship REST backend in Rust
//!
//! Sled document store with typed collections, DataFusion aggregation over
//! an Arrow projection of jobs for the dashboard, and an Axum REST API with
//! JWT bearer auth. The board and client modules hold the pipeline board
//! state used by `jobs-cli`.

pub mod auth;
pub mod board;
pub mod client;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod models;
// Dashboard metrics via DataFusion SQL over an Arrow projection of jobs
pub mod query;
pub mod rest;
pub mod storage;
