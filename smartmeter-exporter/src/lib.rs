//! Prometheus exporter for low-voltage smart electric energy meters.
//!
//! The exporter polls the meter over the Wi-SUN B-route on a fixed interval
//! and keeps the latest readings in memory. Scraping `/metrics` only reads
//! that state; it never talks to the meter.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │    Scheduler    │────>│  Orchestrator   │────>│  Device Client  │
//! │ (fixed period)  │     │ (state machine) │     │ (SKSTACK-IP)    │
//! └─────────────────┘     └────────┬────────┘     └─────────────────┘
//!                                  │ decode
//!                                  v
//!                         ┌─────────────────┐     ┌─────────────────┐
//!                         │  Metrics Sink   │<────│   HTTP Server   │
//!                         │   (registry)    │     │   (/metrics)    │
//!                         └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! smartmeter-exporter --id <B-route ID> --password <password> --device /dev/ttyACM0
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] and [`args::ExporterArgs`].

pub mod args;
pub mod config;
pub mod decoder;
pub mod http;
pub mod scheduler;
pub mod scrape;
pub mod sink;

pub use args::ExporterArgs;
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use scheduler::{ScrapeScheduler, effective_interval};
pub use scrape::{DeviceSession, ScrapeOrchestrator, ScrapeOutcome};
pub use sink::{MetricsSink, SharedSink};
