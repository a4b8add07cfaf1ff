//! AI Prospect Engine
//!
//! B2B lead generation service: campaigns discover businesses through a
//! places search, a language model scores them as leads and writes outreach
//! copy, and usage is metered in credits sold through PayPal.
//!
//! # Modules
//!
//! - `auth`: API key hashing and the authenticated-caller extractor.
//! - `campaigns`: Campaign creation flow (charge, discover, store leads).
//! - `circuit_breaker`: Breaker around the places search.
//! - `config`: Configuration management.
//! - `credits`: Credit ledger arithmetic and the pack catalog.
//! - `db`: Database connection pool and migrations.
//! - `errors`: Error handling types.
//! - `gemini`: Text-generation client.
//! - `handlers`: HTTP request handlers, router and OpenAPI document.
//! - `messaging`: Outreach copy generation.
//! - `models`: Database and API models.
//! - `payments`: Checkout and idempotent capture of credit packs.
//! - `paypal`: PayPal Orders client.
//! - `places`: Places text search client.
//! - `scoring`: Lead scoring and the batch scorer.
//! - `store`: Persistence trait with Postgres and in-memory backends.
//! - `views`: Cached per-user read views.

pub mod auth;
pub mod campaigns;
pub mod circuit_breaker;
pub mod config;
pub mod credits;
pub mod db;
pub mod errors;
pub mod gemini;
pub mod handlers;
pub mod messaging;
pub mod models;
pub mod payments;
pub mod paypal;
pub mod places;
pub mod scoring;
pub mod store;
pub mod views;
