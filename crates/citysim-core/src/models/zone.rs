use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::geometry::Geometry;
use crate::error::CitysimError;

/// Unique identifier for a zone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u64);

/// Unique identifier for a zone configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigurationId(pub u64);

/// Unique identifier for a geographic feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub u64);

/// Category of geographic feature served by the geometry store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureCategory {
    Zone,
    Landuse,
    Landcover,
    Building,
    Vegetation,
    Network,
}

/// How an area-of-interest filter treats a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaPolicy {
    /// Keep only features fully contained in the area
    Contain,
    /// Replace the feature by its intersection with the area
    Crop,
}

impl FeatureCategory {
    pub const ALL: [FeatureCategory; 6] = [
        FeatureCategory::Zone,
        FeatureCategory::Landuse,
        FeatureCategory::Landcover,
        FeatureCategory::Building,
        FeatureCategory::Vegetation,
        FeatureCategory::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureCategory::Zone => "zone",
            FeatureCategory::Landuse => "landuse",
            FeatureCategory::Landcover => "landcover",
            FeatureCategory::Building => "building",
            FeatureCategory::Vegetation => "vegetation",
            FeatureCategory::Network => "network",
        }
    }

    /// Discrete features are dropped when partially outside the area,
    /// continuous ones are cropped to it.
    pub fn area_policy(&self) -> AreaPolicy {
        match self {
            FeatureCategory::Building | FeatureCategory::Vegetation => AreaPolicy::Contain,
            FeatureCategory::Zone
            | FeatureCategory::Landuse
            | FeatureCategory::Landcover
            | FeatureCategory::Network => AreaPolicy::Crop,
        }
    }
}

impl FromStr for FeatureCategory {
    type Err = CitysimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CitysimError::UnknownGeometryType { name: s.to_string() })
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A geographic feature owned by exactly one zone configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoFeature {
    pub id: FeatureId,
    pub category: FeatureCategory,
    /// None when the source record carried no usable geometry
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl GeoFeature {
    pub fn new(id: FeatureId, category: FeatureCategory, geometry: Geometry) -> Self {
        Self { id, category, geometry: Some(geometry), properties: serde_json::Map::new() }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// A named administrative area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub geometry: Geometry,
    pub default_configuration: ConfigurationId,
    pub configuration_count: u32,
}

/// One alternative set of features for a zone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneConfiguration {
    pub id: ConfigurationId,
    pub zone_id: ZoneId,
    pub name: String,
    pub landuse_ids: BTreeSet<FeatureId>,
    pub landcover_ids: BTreeSet<FeatureId>,
    pub building_ids: BTreeSet<FeatureId>,
    pub vegetation_ids: BTreeSet<FeatureId>,
    pub network_ids: BTreeSet<FeatureId>,
}

impl ZoneConfiguration {
    /// Feature ids of a category, None for zone outlines which are not owned by configurations
    pub fn feature_ids(&self, category: FeatureCategory) -> Option<&BTreeSet<FeatureId>> {
        match category {
            FeatureCategory::Zone => None,
            FeatureCategory::Landuse => Some(&self.landuse_ids),
            FeatureCategory::Landcover => Some(&self.landcover_ids),
            FeatureCategory::Building => Some(&self.building_ids),
            FeatureCategory::Vegetation => Some(&self.vegetation_ids),
            FeatureCategory::Network => Some(&self.network_ids),
        }
    }

    /// Record a feature id under its category
    pub fn assign(&mut self, feature: &GeoFeature) {
        let ids = match feature.category {
            FeatureCategory::Zone => return,
            FeatureCategory::Landuse => &mut self.landuse_ids,
            FeatureCategory::Landcover => &mut self.landcover_ids,
            FeatureCategory::Building => &mut self.building_ids,
            FeatureCategory::Vegetation => &mut self.vegetation_ids,
            FeatureCategory::Network => &mut self.network_ids,
        };
        ids.insert(feature.id);
    }

    /// Every feature id owned by this configuration
    pub fn all_feature_ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.landuse_ids
            .iter()
            .chain(&self.landcover_ids)
            .chain(&self.building_ids)
            .chain(&self.vegetation_ids)
            .chain(&self.network_ids)
            .copied()
    }
}

/// Selection of the active configuration per zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZonesConfigurationMapping {
    pub selection: BTreeMap<ZoneId, ConfigurationId>,
}

impl ZonesConfigurationMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, zone: ZoneId, config: ConfigurationId) -> Self {
        self.selection.insert(zone, config);
        self
    }

    pub fn get(&self, zone: ZoneId) -> Option<ConfigurationId> {
        self.selection.get(&zone).copied()
    }
}
