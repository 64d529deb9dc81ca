//! Serializable snapshot of every domain record and region mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use knk_core::error::Result;
use knk_core::types::{District, DomainRef, Street, Structure, Town};

/// Complete domain data set, as stored on disk.
///
/// ```json
/// {
///   "towns": [{ "id": 1, "name": "Kingsport", "region_id": "region-town-1" }],
///   "districts": [{ "id": 5, "name": "Harbor", "town_id": 1 }],
///   "regions": { "region-district-5": { "domain_type": "district", "id": 5 } }
/// }
/// ```
///
/// Records carrying a `region_id` are indexed under it automatically when
/// loaded; `regions` adds or overrides mappings explicitly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDataset {
    /// Towns
    #[serde(default)]
    pub towns: Vec<Town>,
    /// Districts
    #[serde(default)]
    pub districts: Vec<District>,
    /// Streets
    #[serde(default)]
    pub streets: Vec<Street>,
    /// Structures
    #[serde(default)]
    pub structures: Vec<Structure>,
    /// Explicit region mappings
    #[serde(default)]
    pub regions: BTreeMap<String, DomainRef>,
}

impl DomainDataset {
    /// Parses a data set from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders the data set as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total number of domain records.
    pub fn record_count(&self) -> usize {
        self.towns.len() + self.districts.len() + self.streets.len() + self.structures.len()
    }
}
