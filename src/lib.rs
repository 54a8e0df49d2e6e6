//! # Aether
//!
//! A discoverability ranking engine for a used-car marketplace.
//!
//! Aether audits marketplace pages across five diagnostic categories,
//! learns which categories actually move outcomes through an
//! exponentially-smoothed weight store, scores candidate content topics
//! by blending SEO and AI-visibility opportunity into a single win
//! score, and turns declarative rules plus live page metrics into a
//! ranked top-5 action list per city.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ MetricsProvider│──▶│ Checkers (×5) │──▶│ Audit        │
//! │ + PageSnapshot │   │ concurrent,   │   │ Orchestrator │
//! └───────────────┘   │ time-bounded  │   └──────┬───────┘
//!                     └───────────────┘          │ issues, score
//!                                                ▼
//!                     ┌───────────────┐   ┌──────────────┐
//!                     │ Topic Scorer  │◀──│ Weight Store │
//!                     └──────┬────────┘   │ (smoothed)   │
//!                            │            └──────┬───────┘
//!                            ▼                   ▼
//!                     ┌──────────────────────────────────┐
//!                     │      Recommendation Ranker       │
//!                     └──────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! aether init                            # create database
//! aether audit run https://example.com   # run a page audit
//! aether weights show                    # current category weights
//! aether topic explore "used cars under 5 lakh" --city Hyderabad
//! aether actions rank --city Hyderabad   # top-5 recommended actions
//! aether serve                           # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fetch`] | Page snapshot fetching and HTML scanning |
//! | [`checkers`] | Checker/metrics-provider seams and registry |
//! | [`audit`] | Audit orchestrator |
//! | [`weights`] | Weight store and learning updater |
//! | [`topics`] | Topic scorer and exploration jobs |
//! | [`signals`] | Topic signal providers |
//! | [`rules`] | Action rule sets and condition evaluation |
//! | [`actions`] | Recommendation ranker |
//! | [`progress`] | Exploration progress reporting |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod actions;
pub mod audit;
pub mod checker_content;
pub mod checker_geo;
pub mod checker_indexability;
pub mod checker_performance;
pub mod checker_schema;
pub mod checkers;
pub mod config;
pub mod db;
pub mod fetch;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod rules;
pub mod server;
pub mod signals;
pub mod topics;
pub mod weights;
