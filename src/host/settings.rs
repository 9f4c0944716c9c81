//! # Run settings: which collectors to load and where results go.
//!
//! The runner's settings document is reduced to [`RunSettings`], read from
//! JSON with [`RunSettings::from_json`].
//!
//! ```json
//! {
//!   "resultsDirectory": "~/TestResults",
//!   "collectors": [
//!     { "typeName": "Blame.Collector", "friendlyName": "Blame",
//!       "uri": "datacollector://microsoft/blame", "configuration": { "collectDump": true } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::sink::CollectorIdentity;

/// Settings of one configured collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorSettings {
    /// Type name handed to the loader.
    pub type_name: String,
    /// Display name.
    pub friendly_name: String,
    /// Identifying uri.
    pub uri: String,
    /// Collector-specific configuration blob.
    #[serde(default)]
    pub configuration: serde_json::Value,
    /// Disabled entries are ignored.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl CollectorSettings {
    /// Enabled collector with an empty configuration.
    pub fn new(
        type_name: impl Into<String>,
        friendly_name: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            friendly_name: friendly_name.into(),
            uri: uri.into(),
            configuration: serde_json::Value::Null,
            enabled: true,
        }
    }

    /// Identity used in messages and attachment sets.
    pub fn identity(&self) -> CollectorIdentity {
        CollectorIdentity::new(self.uri.as_str(), self.friendly_name.as_str())
    }
}

/// Collector section of the run settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    /// Base output directory hint (expanded and made absolute by the attachment manager).
    #[serde(default)]
    pub results_directory: Option<PathBuf>,
    /// Collectors in configuration order.
    #[serde(default)]
    pub collectors: Vec<CollectorSettings>,
}

impl RunSettings {
    /// Parses a JSON settings document.
    pub fn from_json(text: &str) -> Result<Self, HostError> {
        serde_json::from_str(text).map_err(|err| HostError::InvalidSettings {
            reason: err.to_string(),
        })
    }

    /// Enabled collectors with duplicates removed.
    ///
    /// An entry repeating an earlier uri (case-insensitive) or type name is
    /// dropped and reported as [`HostError::DuplicateCollector`]; the first
    /// occurrence wins.
    pub fn enabled_collectors(&self) -> (Vec<CollectorSettings>, Vec<HostError>) {
        let mut uris = HashSet::new();
        let mut types = HashSet::new();
        let mut kept = Vec::new();
        let mut duplicates = Vec::new();

        for entry in self.collectors.iter().filter(|c| c.enabled) {
            let uri = entry.uri.to_ascii_lowercase();
            if !uris.contains(&uri) && !types.contains(&entry.type_name) {
                uris.insert(uri);
                types.insert(entry.type_name.clone());
                kept.push(entry.clone());
            } else {
                duplicates.push(HostError::DuplicateCollector {
                    name: entry.friendly_name.clone(),
                });
            }
        }
        (kept, duplicates)
    }
}
