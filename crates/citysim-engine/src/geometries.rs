//! Geometry service: feature collections for a scene's configuration mapping.
//!
//! Queries are resolved against the zones known to the store, so the same
//! query asked after a zone was added resolves to a different fingerprint.
//! Composed collections are memoized per fingerprint and their JSON is kept in
//! the artifact cache for upload to the compute network. A memoized collection
//! lives only as long as its cached artifact, so idle eviction bounds both.
//!
//! This module uses `.unwrap()` on `RwLock` and `Mutex` operations. Lock
//! poisoning only occurs if a thread panics while holding the lock, which
//! indicates a bug.

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{
    ConfigurationId, FeatureCategory, FeatureId, GeoFeature, Geometry, Zone, ZoneConfiguration,
    ZoneId, ZonesConfigurationMapping,
};
use citysim_geo::mask::{RasterSpec, ZoneMask, ZoneMaskCache};
use citysim_geo::models::to_geojson_geometry;
use citysim_geo::normalize::compose_feature_collection;
use citysim_geo::spatial::AreaFilter;
use citysim_store::cache::{Cache, CacheKey, CachedKind, CachedObject};
use citysim_store::ports::GeometryStore;
use geojson::FeatureCollection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

/// A request for the features of one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureQuery {
    pub category: FeatureCategory,
    /// Zones to draw from, all zones when None
    pub zones: Option<BTreeSet<ZoneId>>,
    /// Area-of-interest filter
    pub area: Option<Geometry>,
    pub mapping: ZonesConfigurationMapping,
}

impl FeatureQuery {
    pub fn new(category: FeatureCategory, mapping: ZonesConfigurationMapping) -> Self {
        Self {
            category,
            zones: None,
            area: None,
            mapping,
        }
    }

    pub fn with_zones(mut self, zones: impl IntoIterator<Item = ZoneId>) -> Self {
        self.zones = Some(zones.into_iter().collect());
        self
    }

    pub fn with_area(mut self, area: Geometry) -> Self {
        self.area = Some(area);
        self
    }
}

/// What a query fingerprint is computed over
#[derive(Serialize)]
struct ResolvedQuery<'a> {
    category: FeatureCategory,
    selection: Vec<(ZoneId, ConfigurationId)>,
    area: Option<&'a Geometry>,
}

/// A zone paired with the configuration selected for it
type Selected = Vec<(Zone, ZoneConfiguration)>;

pub struct GeometryService {
    store: Arc<dyn GeometryStore>,
    cache: Arc<Cache>,
    collections: RwLock<HashMap<CacheKey, Arc<FeatureCollection>>>,
    masks: Mutex<HashMap<CacheKey, Arc<ZoneMaskCache>>>,
}

impl GeometryService {
    pub fn new(store: Arc<dyn GeometryStore>, cache: Arc<Cache>) -> Self {
        Self {
            store,
            cache,
            collections: RwLock::new(HashMap::new()),
            masks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn GeometryStore> {
        &self.store
    }

    /// Resolve the configuration of every zone under `mapping`
    ///
    /// Zones without an entry use their default configuration. Entries naming
    /// an unknown zone, or a configuration the zone does not own, are errors.
    pub async fn resolve_mapping(
        &self,
        mapping: &ZonesConfigurationMapping,
    ) -> Result<BTreeMap<ZoneId, ZoneConfiguration>> {
        Ok(self
            .select(mapping, None)
            .await?
            .into_iter()
            .map(|(zone, configuration)| (zone.id, configuration))
            .collect())
    }

    async fn select(
        &self,
        mapping: &ZonesConfigurationMapping,
        zones: Option<&BTreeSet<ZoneId>>,
    ) -> Result<Selected> {
        let known: BTreeMap<ZoneId, Zone> = self
            .store
            .list_zones()
            .await?
            .into_iter()
            .map(|zone| (zone.id, zone))
            .collect();

        let requested = mapping.selection.keys().chain(zones.into_iter().flatten());
        if let Some(unknown) = requested.into_iter().find(|id| !known.contains_key(id)) {
            return Err(CitysimError::ZoneNotFound { zone_id: unknown.0 });
        }

        let mut selected = Vec::new();
        for (id, zone) in known {
            if zones.is_some_and(|wanted| !wanted.contains(&id)) {
                continue;
            }

            let config_id = mapping.get(id).unwrap_or(zone.default_configuration);
            let configuration = self
                .store
                .get_configuration(id, config_id)
                .await?
                .ok_or(CitysimError::ZoneConfigurationNotFound {
                    zone_id: id.0,
                    config_id: config_id.0,
                })?;
            selected.push((zone, configuration));
        }

        Ok(selected)
    }

    fn fingerprint(query: &FeatureQuery, selected: &Selected) -> Result<CacheKey> {
        CacheKey::fingerprint(&ResolvedQuery {
            category: query.category,
            selection: selected.iter().map(|(z, c)| (z.id, c.id)).collect(),
            area: query.area.as_ref(),
        })
    }

    /// Features of a query as a GeoJSON feature collection
    pub async fn feature_collection(&self, query: &FeatureQuery) -> Result<Arc<FeatureCollection>> {
        let selected = self.select(&query.mapping, query.zones.as_ref()).await?;
        let key = Self::fingerprint(query, &selected)?;

        if let Some(collection) = self.memoized(&key) {
            tracing::debug!(key = %key, "Feature collection memo hit");
            return Ok(collection);
        }

        let collection = match self.load_cached(&key) {
            Some(collection) => collection,
            None => {
                let collection = self.compose(query, &selected).await?;
                let content = serde_json::to_vec(&collection)?;
                if let Err(e) = self.cache.insert(key.clone(), CachedKind::Json, &content) {
                    tracing::warn!(key = %key, error = %e, "Failed to cache feature collection");
                }
                collection
            }
        };

        let collection = Arc::new(collection);
        let mut memo = self.collections.write().unwrap();
        memo.retain(|memo_key, _| self.cache.contains(memo_key));
        memo.insert(key, Arc::clone(&collection));
        Ok(collection)
    }

    /// Memoized collection whose artifact is still cached; touches the artifact
    fn memoized(&self, key: &CacheKey) -> Option<Arc<FeatureCollection>> {
        let collection = self.collections.read().unwrap().get(key).cloned()?;
        if self.cache.lookup(key).is_some() {
            return Some(collection);
        }

        self.collections.write().unwrap().remove(key);
        None
    }

    /// Cached JSON artifact of a query, for upload
    pub async fn cached_collection(&self, query: &FeatureQuery) -> Result<Arc<CachedObject>> {
        let selected = self.select(&query.mapping, query.zones.as_ref()).await?;
        let key = Self::fingerprint(query, &selected)?;

        if let Some(object) = self.cache.lookup(&key) {
            return Ok(object);
        }

        let collection = self.feature_collection(query).await?;
        let content = serde_json::to_vec(collection.as_ref())?;
        self.cache.insert(key, CachedKind::Json, &content)
    }

    /// Cached GeoJSON artifact of an area of interest
    pub fn area_artifact(&self, area: &Geometry) -> Result<Arc<CachedObject>> {
        let key = CacheKey::fingerprint(&("area-of-interest", area))?;
        self.cache.get_or_insert_with(key, CachedKind::Json, || {
            Ok(serde_json::to_vec(&to_geojson_geometry(area))?)
        })
    }

    /// Zone mask of the zones selected under `mapping` for a raster
    pub async fn zone_mask(
        &self,
        mapping: &ZonesConfigurationMapping,
        spec: &RasterSpec,
    ) -> Result<Arc<ZoneMask>> {
        let selected = self.select(mapping, None).await?;
        let key = CacheKey::fingerprint(&selected.iter().map(|(z, c)| (z.id, c.id)).collect::<Vec<_>>())?;

        let masks = {
            let mut all = self.masks.lock().unwrap();
            Arc::clone(all.entry(key).or_insert_with(|| {
                Arc::new(ZoneMaskCache::new(
                    selected.iter().map(|(z, _)| (z.id, z.geometry.clone())).collect(),
                ))
            }))
        };

        Ok(masks.mask(spec))
    }

    /// Create a zone and drop memoized results
    pub async fn create_zone(
        &self,
        name: &str,
        geometry: &Geometry,
        features: Vec<GeoFeature>,
    ) -> Result<Zone> {
        let zone = self.store.create_zone(name, geometry, features).await?;
        self.invalidate();
        Ok(zone)
    }

    /// Import an alternative configuration and drop memoized results
    pub async fn import_configuration(
        &self,
        zone: ZoneId,
        name: &str,
        features: Vec<GeoFeature>,
    ) -> Result<ZoneConfiguration> {
        let configuration = self.store.import_configuration(zone, name, features).await?;
        self.invalidate();
        Ok(configuration)
    }

    /// Delete a configuration and drop memoized results
    pub async fn delete_configuration(&self, zone: ZoneId, config: ConfigurationId) -> Result<()> {
        self.store.delete_configuration(zone, config).await?;
        self.invalidate();
        Ok(())
    }

    /// Drop every memoized collection and zone mask
    pub fn invalidate(&self) {
        self.collections.write().unwrap().clear();
        self.masks.lock().unwrap().clear();
        tracing::debug!("Invalidated geometry memos");
    }

    fn load_cached(&self, key: &CacheKey) -> Option<FeatureCollection> {
        let object = self.cache.lookup(key)?;
        let parsed = object
            .content()
            .and_then(|bytes| Ok(serde_json::from_slice::<FeatureCollection>(&bytes)?));

        match parsed {
            Ok(collection) => Some(collection),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Unreadable cache entry, recomputing");
                None
            }
        }
    }

    async fn compose(&self, query: &FeatureQuery, selected: &Selected) -> Result<FeatureCollection> {
        let filter = query.area.as_ref().map(AreaFilter::new).transpose()?;

        let features = match query.category {
            FeatureCategory::Zone => selected
                .iter()
                .map(|(zone, _)| {
                    GeoFeature::new(FeatureId(zone.id.0), FeatureCategory::Zone, zone.geometry.clone())
                        .with_property("name", zone.name.clone().into())
                })
                .collect(),
            category => {
                let ids: Vec<FeatureId> = selected
                    .iter()
                    .filter_map(|(_, configuration)| configuration.feature_ids(category))
                    .flatten()
                    .copied()
                    .collect();
                self.store.get_features(&ids).await?
            }
        };

        let collection = compose_feature_collection(filter_by_area(filter.as_ref(), features));
        tracing::debug!(
            category = query.category.as_str(),
            zones = selected.len(),
            features = collection.features.len(),
            "Composed features"
        );
        Ok(collection)
    }
}

/// Apply the area policy to features that carry coordinates
///
/// Features without coordinates pass through untouched so that composition
/// drops them with its warning.
fn filter_by_area(filter: Option<&AreaFilter>, features: Vec<GeoFeature>) -> Vec<GeoFeature> {
    let Some(filter) = filter else {
        return features;
    };

    features
        .into_iter()
        .filter_map(|feature| match &feature.geometry {
            Some(geometry) if geometry.has_coordinates() => filter.filter_feature(&feature),
            _ => Some(feature),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use citysim_store::cache::CacheConfig;
    use citysim_store::memory::MemoryGeometryStore;
    use std::time::Duration;

    fn building(x: f64, y: f64) -> GeoFeature {
        GeoFeature::new(
            FeatureId(0),
            FeatureCategory::Building,
            Geometry::rectangle(x, y, x + 1.0, y + 1.0),
        )
    }

    async fn service(root: &std::path::Path) -> (GeometryService, Zone) {
        let store = Arc::new(MemoryGeometryStore::new());
        let cache = Arc::new(Cache::new(CacheConfig::new(
            root,
            Duration::from_secs(60),
            Duration::from_secs(600),
        )));
        let service = GeometryService::new(store, cache);
        let zone = service
            .create_zone(
                "centre",
                &Geometry::rectangle(0.0, 0.0, 10.0, 10.0),
                vec![building(1.0, 1.0), building(8.5, 8.5)],
            )
            .await
            .unwrap();
        (service, zone)
    }

    #[tokio::test]
    async fn test_missing_zone_entry_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let (service, zone) = service(dir.path()).await;

        let resolved = service
            .resolve_mapping(&ZonesConfigurationMapping::new())
            .await
            .unwrap();

        assert_eq!(resolved[&zone.id].id, zone.default_configuration);
    }

    #[tokio::test]
    async fn test_unknown_zone_and_foreign_configuration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (service, zone) = service(dir.path()).await;

        let unknown_zone = ZonesConfigurationMapping::new().with(ZoneId(99), ConfigurationId(1));
        assert!(matches!(
            service.resolve_mapping(&unknown_zone).await,
            Err(CitysimError::ZoneNotFound { zone_id: 99 })
        ));

        let unknown_config = ZonesConfigurationMapping::new().with(zone.id, ConfigurationId(99));
        assert!(matches!(
            service.resolve_mapping(&unknown_config).await,
            Err(CitysimError::ZoneConfigurationNotFound { config_id: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_area_filter_excludes_straddling_buildings() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path()).await;

        let query = FeatureQuery::new(FeatureCategory::Building, ZonesConfigurationMapping::new())
            .with_area(Geometry::rectangle(0.0, 0.0, 9.0, 9.0));
        let collection = service.feature_collection(&query).await.unwrap();

        assert_eq!(collection.features.len(), 1);
    }

    #[tokio::test]
    async fn test_collection_is_memoized_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path()).await;
        let query = FeatureQuery::new(FeatureCategory::Building, ZonesConfigurationMapping::new());

        let first = service.feature_collection(&query).await.unwrap();
        let second = service.feature_collection(&query).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let artifact = service.cached_collection(&query).await.unwrap();
        let stored: FeatureCollection =
            serde_json::from_slice(&artifact.content().unwrap()).unwrap();
        assert_eq!(stored.features.len(), 2);
    }

    #[tokio::test]
    async fn test_memo_follows_cache_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path()).await;
        let near = FeatureQuery::new(FeatureCategory::Building, ZonesConfigurationMapping::new())
            .with_area(Geometry::rectangle(0.0, 0.0, 5.0, 5.0));
        let wide = FeatureQuery::new(FeatureCategory::Building, ZonesConfigurationMapping::new())
            .with_area(Geometry::rectangle(0.0, 0.0, 10.0, 10.0));

        let first = service.feature_collection(&near).await.unwrap();
        service.feature_collection(&wide).await.unwrap();
        assert_eq!(service.collections.read().unwrap().len(), 2);

        let evicted = service
            .cache
            .prune(tokio::time::Instant::now() + Duration::from_secs(601));
        assert_eq!(evicted, 2);

        let again = service.feature_collection(&near).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &again));
        assert_eq!(again.features.len(), first.features.len());
        assert_eq!(service.collections.read().unwrap().len(), 1);
    }

    #[test]
    fn test_area_filter_leaves_coordinate_less_features_to_composition() {
        let filter = AreaFilter::new(&Geometry::rectangle(0.0, 0.0, 9.0, 9.0)).unwrap();
        let mut missing = building(1.0, 1.0);
        missing.id = FeatureId(1);
        missing.geometry = None;
        let mut empty = building(1.0, 1.0);
        empty.id = FeatureId(2);
        empty.geometry = Some(Geometry::polygon(vec![]));
        let straddling = building(8.5, 8.5);

        let kept = filter_by_area(Some(&filter), vec![missing, empty, straddling]);
        let ids: Vec<u64> = kept.iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![1, 2]);

        assert!(compose_feature_collection(kept).features.is_empty());
    }

    #[tokio::test]
    async fn test_new_configuration_changes_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (service, zone) = service(dir.path()).await;

        let alternative = service
            .import_configuration(zone.id, "densified", vec![building(2.0, 2.0), building(4.0, 4.0), building(6.0, 6.0)])
            .await
            .unwrap();

        let query = FeatureQuery::new(
            FeatureCategory::Building,
            ZonesConfigurationMapping::new().with(zone.id, alternative.id),
        );
        assert_eq!(service.feature_collection(&query).await.unwrap().features.len(), 3);

        service.delete_configuration(zone.id, alternative.id).await.unwrap();
        assert!(service.feature_collection(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_zone_collection_carries_names() {
        let dir = tempfile::tempdir().unwrap();
        let (service, zone) = service(dir.path()).await;

        let query = FeatureQuery::new(FeatureCategory::Zone, ZonesConfigurationMapping::new())
            .with_zones([zone.id]);
        let collection = service.feature_collection(&query).await.unwrap();

        let properties = collection.features[0].properties.as_ref().unwrap();
        assert_eq!(properties["name"], "centre");
        assert_eq!(properties["category"], "zone");
    }

    #[tokio::test]
    async fn test_zone_mask_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let (service, zone) = service(dir.path()).await;
        let spec = RasterSpec::new(
            citysim_core::models::BoundingBox::new(0.0, 0.0, 20.0, 20.0),
            4,
            4,
        )
        .unwrap();

        let mapping = ZonesConfigurationMapping::new();
        let first = service.zone_mask(&mapping, &spec).await.unwrap();
        let second = service.zone_mask(&mapping, &spec).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.cell_counts()[&zone.id], 4);
    }
}
