//! Document Classification Pipeline
//!
//! This library provides the core of the document-classifier system: an HTTP
//! API that accepts documents and returns a job id immediately, a pool of
//! workers that extract text and classify documents asynchronously, and a
//! reconciliation sweep that recovers jobs lost between the two.

pub mod app_state;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod services;
