use async_trait::async_trait;
use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{
    ConfigurationId, FeatureCategory, FeatureId, GeoFeature, Geometry, Zone, ZoneConfiguration,
    ZoneId,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};

use super::{db_error, PostgresStore};
use crate::ports::GeometryStore;

fn zone_from_row(row: &PgRow) -> Result<Zone> {
    let decode = |e: sqlx::Error| db_error("decode zone", e);
    let Json(geometry): Json<Geometry> = row.try_get("geometry").map_err(decode)?;
    let default: Option<i64> = row.try_get("default_configuration").map_err(decode)?;
    let count: i32 = row.try_get("configuration_count").map_err(decode)?;

    Ok(Zone {
        id: ZoneId(row.try_get::<i64, _>("id").map_err(decode)? as u64),
        name: row.try_get("name").map_err(decode)?,
        geometry,
        default_configuration: ConfigurationId(default.unwrap_or_default() as u64),
        configuration_count: count.max(0) as u32,
    })
}

/// Insert features into a configuration inside an open transaction
async fn insert_features(
    conn: &mut PgConnection,
    configuration: &mut ZoneConfiguration,
    features: Vec<GeoFeature>,
) -> Result<()> {
    for mut feature in features {
        if feature.category == FeatureCategory::Zone {
            tracing::warn!(
                zone_id = configuration.zone_id.0,
                "Ignoring zone outline among configuration features"
            );
            continue;
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO features (configuration_id, category, geometry, properties)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(configuration.id.0 as i64)
        .bind(feature.category.as_str())
        .bind(feature.geometry.as_ref().map(Json))
        .bind(Json(&feature.properties))
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error("insert feature", e))?;

        feature.id = FeatureId(id as u64);
        configuration.assign(&feature);
    }

    Ok(())
}

/// Create an empty configuration row inside an open transaction
async fn insert_configuration(
    conn: &mut PgConnection,
    zone: ZoneId,
    name: &str,
) -> Result<ZoneConfiguration> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO zone_configurations (zone_id, name) VALUES ($1, $2) RETURNING id",
    )
    .bind(zone.0 as i64)
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("insert zone configuration", e))?;

    Ok(ZoneConfiguration {
        id: ConfigurationId(id as u64),
        zone_id: zone,
        name: name.to_string(),
        ..Default::default()
    })
}

impl PostgresStore {
    /// Fill the feature id sets of a configuration row
    async fn hydrate_configuration(&self, row: &PgRow) -> Result<ZoneConfiguration> {
        let decode = |e: sqlx::Error| db_error("decode zone configuration", e);
        let mut configuration = ZoneConfiguration {
            id: ConfigurationId(row.try_get::<i64, _>("id").map_err(decode)? as u64),
            zone_id: ZoneId(row.try_get::<i64, _>("zone_id").map_err(decode)? as u64),
            name: row.try_get("name").map_err(decode)?,
            ..Default::default()
        };

        let rows = sqlx::query("SELECT id, category FROM features WHERE configuration_id = $1")
            .bind(configuration.id.0 as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list configuration features", e))?;

        for row in rows {
            let id: i64 = row.try_get("id").map_err(decode)?;
            let category: String = row.try_get("category").map_err(decode)?;
            let category: FeatureCategory = category.parse()?;

            let ids = match category {
                FeatureCategory::Zone => continue,
                FeatureCategory::Landuse => &mut configuration.landuse_ids,
                FeatureCategory::Landcover => &mut configuration.landcover_ids,
                FeatureCategory::Building => &mut configuration.building_ids,
                FeatureCategory::Vegetation => &mut configuration.vegetation_ids,
                FeatureCategory::Network => &mut configuration.network_ids,
            };
            ids.insert(FeatureId(id as u64));
        }

        Ok(configuration)
    }
}

#[async_trait]
impl GeometryStore for PostgresStore {
    async fn create_zone(
        &self,
        name: &str,
        geometry: &Geometry,
        features: Vec<GeoFeature>,
    ) -> Result<Zone> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin transaction", e))?;

        let zone_id: i64 = sqlx::query_scalar(
            "INSERT INTO zones (name, geometry, configuration_count) VALUES ($1, $2, 1) RETURNING id",
        )
        .bind(name)
        .bind(Json(geometry))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("insert zone", e))?;
        let zone_id = ZoneId(zone_id as u64);

        let mut default = insert_configuration(&mut tx, zone_id, "default").await?;
        insert_features(&mut tx, &mut default, features).await?;

        sqlx::query("UPDATE zones SET default_configuration = $2 WHERE id = $1")
            .bind(zone_id.0 as i64)
            .bind(default.id.0 as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("set default configuration", e))?;

        tx.commit().await.map_err(|e| db_error("commit zone creation", e))?;

        tracing::info!(zone_id = zone_id.0, config_id = default.id.0, "Created zone");
        Ok(Zone {
            id: zone_id,
            name: name.to_string(),
            geometry: geometry.clone(),
            default_configuration: default.id,
            configuration_count: 1,
        })
    }

    async fn get_zone(&self, id: ZoneId) -> Result<Option<Zone>> {
        let row = sqlx::query(
            "SELECT id, name, geometry, default_configuration, configuration_count FROM zones WHERE id = $1",
        )
        .bind(id.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get zone", e))?;

        row.as_ref().map(zone_from_row).transpose()
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let rows = sqlx::query(
            "SELECT id, name, geometry, default_configuration, configuration_count FROM zones ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list zones", e))?;

        rows.iter().map(zone_from_row).collect()
    }

    async fn import_configuration(
        &self,
        zone: ZoneId,
        name: &str,
        features: Vec<GeoFeature>,
    ) -> Result<ZoneConfiguration> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin transaction", e))?;

        let updated = sqlx::query(
            "UPDATE zones SET configuration_count = configuration_count + 1 WHERE id = $1",
        )
        .bind(zone.0 as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("increment configuration count", e))?;
        if updated.rows_affected() == 0 {
            return Err(CitysimError::ZoneNotFound { zone_id: zone.0 });
        }

        let mut configuration = insert_configuration(&mut tx, zone, name).await?;
        insert_features(&mut tx, &mut configuration, features).await?;

        tx.commit().await.map_err(|e| db_error("commit configuration import", e))?;

        tracing::info!(zone_id = zone.0, config_id = configuration.id.0, "Imported zone configuration");
        Ok(configuration)
    }

    async fn get_configuration(
        &self,
        zone: ZoneId,
        config: ConfigurationId,
    ) -> Result<Option<ZoneConfiguration>> {
        let row = sqlx::query(
            "SELECT id, zone_id, name FROM zone_configurations WHERE id = $1 AND zone_id = $2",
        )
        .bind(config.0 as i64)
        .bind(zone.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get zone configuration", e))?;

        match row {
            Some(row) => Ok(Some(self.hydrate_configuration(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_configurations(&self, zone: ZoneId) -> Result<Vec<ZoneConfiguration>> {
        if self.get_zone(zone).await?.is_none() {
            return Err(CitysimError::ZoneNotFound { zone_id: zone.0 });
        }

        let rows = sqlx::query(
            "SELECT id, zone_id, name FROM zone_configurations WHERE zone_id = $1 ORDER BY id",
        )
        .bind(zone.0 as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list zone configurations", e))?;

        let mut configurations = Vec::with_capacity(rows.len());
        for row in &rows {
            configurations.push(self.hydrate_configuration(row).await?);
        }
        Ok(configurations)
    }

    async fn delete_configuration(&self, zone: ZoneId, config: ConfigurationId) -> Result<()> {
        // Dropping the transaction on any early return rolls everything back
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin transaction", e))?;

        let default: Option<Option<i64>> =
            sqlx::query_scalar("SELECT default_configuration FROM zones WHERE id = $1 FOR UPDATE")
                .bind(zone.0 as i64)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("lock zone", e))?;
        let default = default.ok_or(CitysimError::ZoneNotFound { zone_id: zone.0 })?;

        if default == Some(config.0 as i64) {
            return Err(CitysimError::DefaultConfigurationRequired {
                zone_id: zone.0,
                config_id: config.0,
            });
        }

        let features = sqlx::query(
            r#"
            DELETE FROM features
            WHERE configuration_id = (
                SELECT id FROM zone_configurations WHERE id = $1 AND zone_id = $2
            )
            "#,
        )
        .bind(config.0 as i64)
        .bind(zone.0 as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("delete configuration features", e))?;

        let deleted = sqlx::query("DELETE FROM zone_configurations WHERE id = $1 AND zone_id = $2")
            .bind(config.0 as i64)
            .bind(zone.0 as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete zone configuration", e))?;
        if deleted.rows_affected() == 0 {
            return Err(CitysimError::ZoneConfigurationNotFound {
                zone_id: zone.0,
                config_id: config.0,
            });
        }

        sqlx::query(
            "UPDATE zones SET configuration_count = configuration_count - 1 WHERE id = $1",
        )
        .bind(zone.0 as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("decrement configuration count", e))?;

        tx.commit().await.map_err(|e| db_error("commit configuration deletion", e))?;

        tracing::info!(
            zone_id = zone.0,
            config_id = config.0,
            features = features.rows_affected(),
            "Deleted zone configuration"
        );
        Ok(())
    }

    async fn get_features(&self, ids: &[FeatureId]) -> Result<Vec<GeoFeature>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0 as i64).collect();

        let rows = sqlx::query(
            "SELECT id, category, geometry, properties FROM features WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("get features", e))?;

        let decode = |e: sqlx::Error| db_error("decode feature", e);
        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            let id = FeatureId(row.try_get::<i64, _>("id").map_err(decode)? as u64);
            let category: String = row.try_get("category").map_err(decode)?;
            let raw: Option<Json<serde_json::Value>> = row.try_get("geometry").map_err(decode)?;
            let Json(properties): Json<serde_json::Map<String, serde_json::Value>> =
                row.try_get("properties").map_err(decode)?;

            // Malformed geometries are kept as features without geometry
            let geometry = raw.and_then(|Json(value)| {
                let parsed = Geometry::from_geojson(&value);
                if parsed.is_none() {
                    tracing::warn!(feature_id = id.0, "Unreadable feature geometry");
                }
                parsed
            });

            features.push(GeoFeature { id, category: category.parse()?, geometry, properties });
        }

        Ok(features)
    }
}
