//! JSON-file domain data provider.
//!
//! Reads a [`DomainDataset`] snapshot once and serves it from memory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use knk_core::error::{KnkError, Result};
use knk_core::traits::DomainDataProvider;
use knk_core::types::{District, DomainId, DomainRef, Street, Structure, Town};

use crate::dataset::DomainDataset;
use crate::MemoryProvider;

/// Provider backed by a JSON snapshot on disk.
///
/// Uses a [`MemoryProvider`] internally; edits made through
/// [`memory`](Self::memory) persist only when [`save`](Self::save) is called.
pub struct FileProvider {
    /// Path to the snapshot
    path: PathBuf,
    /// In-memory tables
    memory: MemoryProvider,
}

impl FileProvider {
    /// Loads the snapshot at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = fs::read_to_string(&path)
            .await
            .map_err(|e| KnkError::IoError(format!("failed to read {}: {}", path.display(), e)))?;

        let dataset = DomainDataset::from_json(&contents)?;
        info!(
            records = dataset.record_count(),
            regions = dataset.regions.len(),
            "Loaded domain data"
        );

        Ok(Self {
            memory: MemoryProvider::from_dataset(&dataset),
            path,
        })
    }

    /// Writes the current tables back to the snapshot file.
    ///
    /// Writes to a temporary file first, then renames it into place.
    #[instrument(skip(self))]
    pub async fn save(&self) -> Result<()> {
        let json = self.memory.to_dataset().to_json_pretty()?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(path = ?self.path, "Domain data saved");
        Ok(())
    }

    /// Returns the snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the underlying memory provider for direct access.
    pub fn memory(&self) -> &MemoryProvider {
        &self.memory
    }
}

#[async_trait]
impl DomainDataProvider for FileProvider {
    async fn fetch_town(&self, id: DomainId) -> Result<Town> {
        self.memory.fetch_town(id).await
    }

    async fn fetch_district(&self, id: DomainId) -> Result<District> {
        self.memory.fetch_district(id).await
    }

    async fn fetch_street(&self, id: DomainId) -> Result<Street> {
        self.memory.fetch_street(id).await
    }

    async fn fetch_structure(&self, id: DomainId) -> Result<Structure> {
        self.memory.fetch_structure(id).await
    }

    async fn resolve_region(&self, region_id: &str) -> Result<Option<DomainRef>> {
        self.memory.resolve_region(region_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "towns": [{ "id": 1, "name": "Kingsport", "region_id": "region-town-1" }],
        "districts": [{ "id": 5, "name": "Harbor", "town_id": 1, "allow_entry": false }],
        "regions": { "region-district-5": { "domain_type": "district", "id": 5 } }
    }"#;

    #[tokio::test]
    async fn test_load_and_serve() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let provider = FileProvider::load(&path).await.unwrap();

        assert_eq!(provider.fetch_town(1).await.unwrap().name, "Kingsport");
        assert!(!provider.fetch_district(5).await.unwrap().allow_entry);
        assert_eq!(
            provider.resolve_region("region-district-5").await.unwrap(),
            Some(DomainRef::district(5))
        );
        assert_eq!(provider.memory().calls().regions, 1);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempdir().unwrap();
        let result = FileProvider::load(dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(KnkError::IoError(_))));
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ \"towns\": 3 }").unwrap();

        assert!(matches!(FileProvider::load(&path).await, Err(KnkError::JsonError(_))));
    }

    #[tokio::test]
    async fn test_save_persists_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let provider = FileProvider::load(&path).await.unwrap();
        provider.memory().map_region("old-gate", DomainRef::town(1));
        provider.save().await.unwrap();

        let reloaded = FileProvider::load(&path).await.unwrap();
        assert_eq!(
            reloaded.resolve_region("old-gate").await.unwrap(),
            Some(DomainRef::town(1))
        );
        assert_eq!(reloaded.memory().record_count(), 2);
    }
}
