use sqlx::{Row, SqlitePool};

use mailsieve_core::DetectorConfig;

use crate::error::StateError;

/// Repository for the dynamic-detector configuration, stored as one JSON
/// value per key so unknown keys written by other versions survive
/// round-trips.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the configuration, falling back to defaults when the table is
    /// empty. Keys this version does not recognize land in
    /// [`DetectorConfig::extra`].
    pub async fn load(&self) -> Result<DetectorConfig, StateError> {
        let rows = sqlx::query("SELECT key, value FROM detector_config")
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(DetectorConfig::default());
        }

        let mut map = serde_json::Map::new();
        for row in &rows {
            let key: String = row.try_get("key")?;
            let raw: String = row.try_get("value")?;
            let value = serde_json::from_str(&raw)
                .map_err(|e| StateError::Serialization(format!("config key {key}: {e}")))?;
            map.insert(key, value);
        }

        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Persist the configuration, replacing the stored key set (including
    /// preserved unknown keys) atomically.
    pub async fn save(&self, config: &DetectorConfig) -> Result<(), StateError> {
        let value = serde_json::to_value(config)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        let serde_json::Value::Object(map) = value else {
            return Err(StateError::Serialization(
                "detector config did not serialize to an object".to_owned(),
            ));
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM detector_config")
            .execute(&mut *tx)
            .await?;
        for (key, value) in &map {
            let raw = serde_json::to_string(value)
                .map_err(|e| StateError::Serialization(e.to_string()))?;
            sqlx::query("INSERT INTO detector_config (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(raw)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn empty_table_yields_defaults() {
        let config = SqliteStore::open_in_memory()
            .await
            .unwrap()
            .detector_config();
        let loaded = config.load().await.unwrap();
        assert_eq!(loaded, DetectorConfig::default());
    }

    #[tokio::test]
    async fn save_load_roundtrip_preserves_every_field() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let repo = store.detector_config();

        let mut config = DetectorConfig {
            enabled: false,
            time_window_minutes: 60,
            threshold_count: 10,
            time_span_threshold_minutes: 2.5,
            expiration_hours: 24,
            last_hit_threshold_hours: 96,
            ..DetectorConfig::default()
        };
        config
            .extra
            .insert("futureKnob".to_owned(), serde_json::json!({"a": [1, 2]}));

        repo.save(&config).await.unwrap();
        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded, config);

        // Saving the loaded value is a fixed point.
        repo.save(&loaded).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), config);
    }
}
