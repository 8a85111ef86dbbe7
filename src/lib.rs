//! swimview - FAA SWIM air traffic integration service.
//!
//! Consumes the en-route (SFDPS), surface (SMES), terminal (TAIS), and tower
//! (TDES) feeds plus a public ADS-B service, merges them into one coherent
//! per-flight state model, and fans incremental updates out to live map and
//! scope-display subscribers.

pub mod adsb;
pub mod broadcast;
pub mod broker;
pub mod commands;
pub mod config;
pub mod correlate;
pub mod flights;
pub mod geometry;
pub mod ingest;
pub mod merge;
pub mod nasr;
pub mod persist;
pub mod route;
pub mod scope_proto;
pub mod sfdps;
pub mod smes;
pub mod stats;
pub mod store;
pub mod surface;
pub mod tais;
pub mod tdes;
pub mod telemetry;
pub mod terminal;
pub mod tower;
pub mod web;
pub mod xmltree;
