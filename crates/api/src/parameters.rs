//! Mode parameter registry shared by submission validation, the job
//! executor and the parameter save endpoint.

use std::path::PathBuf;

use cellcast_core::error::CoreError;
use cellcast_core::parameters::{ModeParameters, ParameterCatalog, ParameterUpdate, SAVED_MODE};
use tokio::sync::RwLock;

pub struct ParameterRegistry {
    catalog: RwLock<ParameterCatalog>,
    path: Option<PathBuf>,
}

impl ParameterRegistry {
    /// The builtin catalog, never persisted.
    pub fn builtin() -> Self {
        Self {
            catalog: RwLock::new(ParameterCatalog::builtin()),
            path: None,
        }
    }

    /// Start from the builtin catalog and overlay the modes stored at
    /// `path`, if the file exists. Saved parameters are written back there.
    pub async fn load(path: Option<PathBuf>) -> Result<Self, CoreError> {
        let mut catalog = ParameterCatalog::builtin();

        if let Some(path) = &path {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => {
                    let stored = ParameterCatalog::from_json(&text)?;
                    for mode in stored.mode_names() {
                        if let Some(params) = stored.get(mode) {
                            catalog.insert(mode, params.clone());
                        }
                    }
                    tracing::info!(path = %path.display(), modes = stored.len(), "Loaded mode parameters");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!(path = %path.display(), "No parameter file yet, using builtin modes");
                }
                Err(e) => {
                    return Err(CoreError::Internal(format!(
                        "failed to read {}: {e}",
                        path.display()
                    )))
                }
            }
        }

        Ok(Self {
            catalog: RwLock::new(catalog),
            path,
        })
    }

    pub async fn get(&self, mode: &str) -> Option<ModeParameters> {
        self.catalog.read().await.get(mode).cloned()
    }

    pub async fn contains(&self, mode: &str) -> bool {
        self.catalog.read().await.contains(mode)
    }

    pub async fn mode_count(&self) -> usize {
        self.catalog.read().await.len()
    }

    /// Validate `update`, store it as the `saved` mode and persist the
    /// catalog when a path is configured.
    pub async fn save(&self, update: ParameterUpdate) -> Result<ModeParameters, CoreError> {
        let params = update.into_parameters()?;

        let mut catalog = self.catalog.write().await;
        catalog.insert(SAVED_MODE, params.clone());

        if let Some(path) = &self.path {
            let text = catalog.to_json()?;
            tokio::fs::write(path, text).await.map_err(|e| {
                CoreError::Internal(format!("failed to write {}: {e}", path.display()))
            })?;
        }

        tracing::info!(mode = SAVED_MODE, "Saved mode parameters");
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn update(radius: u8) -> ParameterUpdate {
        serde_json::from_value(json!({
            "radius": radius,
            "fdb": [0, 0, 0, 0, 1, 0, 0, 0, 0],
            "ctrl": [0, 0, 0, 0, 2, 0, 0, 0, 0],
            "bias": "-0.5",
            "tspan": "1",
            "initial": "0",
            "stepsize": "0.5"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn save_replaces_saved_mode() {
        let registry = ParameterRegistry::builtin();
        let saved = registry.save(update(1)).await.unwrap();
        assert_eq!(saved.ib, -0.5);
        assert_eq!(registry.get(SAVED_MODE).await, Some(saved));
    }

    #[tokio::test]
    async fn invalid_update_leaves_catalog_untouched() {
        let registry = ParameterRegistry::builtin();
        let before = registry.get(SAVED_MODE).await;
        assert_matches!(registry.save(update(0)).await, Err(CoreError::Validation(_)));
        assert_eq!(registry.get(SAVED_MODE).await, before);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_builtin() {
        let path = std::env::temp_dir().join(format!("cellcast-missing-{}.json", uuid::Uuid::new_v4()));
        let registry = ParameterRegistry::load(Some(path)).await.unwrap();
        assert!(registry.contains("edge_detect").await);
    }

    #[tokio::test]
    async fn saved_parameters_survive_reload() {
        let path = std::env::temp_dir().join(format!("cellcast-params-{}.json", uuid::Uuid::new_v4()));

        let registry = ParameterRegistry::load(Some(path.clone())).await.unwrap();
        let saved = registry.save(update(1)).await.unwrap();

        let reloaded = ParameterRegistry::load(Some(path.clone())).await.unwrap();
        assert_eq!(reloaded.get(SAVED_MODE).await, Some(saved));
        assert!(reloaded.contains("inversion").await);

        let _ = std::fs::remove_file(path);
    }
}
