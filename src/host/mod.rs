//! Collector hosting: run settings, the plugin surface and the host manager.
//!
//! ## Contents
//! - [`CollectorHostManager`] lifecycle orchestration over dispatcher and attachment manager
//! - [`DataCollector`], [`CollectorLoader`], [`CollectorInit`] plugin contracts
//! - [`DataCollectionSink`], [`CollectorLogger`] handles given to collectors
//! - [`RunSettings`], [`CollectorSettings`] which collectors to load

mod collector;
mod manager;
mod settings;

pub use collector::{CollectorInit, CollectorLoader, CollectorLogger, DataCollectionSink, DataCollector};
pub use manager::CollectorHostManager;
pub use settings::{CollectorSettings, RunSettings};
