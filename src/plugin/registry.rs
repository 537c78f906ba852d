//! Registry of loaded model modules, one factory per model name.

use super::loader::LoaderConfig;
use crate::error::{Error, Result};
use crate::model::{ModelDescriptor, PluginModel, PluginModelFactory};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry for loaded model modules.
///
/// The registry provides a central place to:
/// - Load and unload model modules
/// - Query available models
/// - Create model instances by name
pub struct ModelRegistry {
    /// Factories indexed by model name.
    factories: RwLock<HashMap<String, PluginModelFactory>>,
    loader: LoaderConfig,
}

impl ModelRegistry {
    /// Create an empty registry searching the default paths.
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    /// Create an empty registry with custom search paths.
    pub fn with_config(loader: LoaderConfig) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            loader,
        }
    }

    /// The loader configuration used for name lookups and scans.
    pub fn loader(&self) -> &LoaderConfig {
        &self.loader
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PluginModelFactory>> {
        self.factories.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PluginModelFactory>> {
        self.factories.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a module from a specific path and register it.
    ///
    /// Returns the model name. A module with an already registered name
    /// replaces the previous one, which is unloaded.
    ///
    /// # Safety
    ///
    /// Loading executes code from the library; see
    /// [`PluginModelFactory::load`].
    pub unsafe fn load_plugin(&self, path: impl AsRef<Path>) -> Result<String> {
        // SAFETY: Caller guarantees the module is trusted.
        let factory = unsafe { PluginModelFactory::open(path)? };
        self.register(factory)
    }

    /// Resolve `name` through the loader configuration and register it.
    ///
    /// # Safety
    ///
    /// See [`load_plugin`](Self::load_plugin).
    pub unsafe fn load_plugin_by_name(&self, name: &str) -> Result<String> {
        let factory = PluginModelFactory::new();
        // SAFETY: Caller guarantees the module is trusted.
        unsafe { factory.load_by_name(name, &self.loader)? };
        self.register(factory)
    }

    /// Register an already loaded factory under its model name.
    pub fn register(&self, factory: PluginModelFactory) -> Result<String> {
        let name = factory.get_model_info()?.name().to_string();
        let previous = self.write().insert(name.clone(), factory);
        if let Some(previous) = previous {
            tracing::info!(model = %name, "replacing registered model");
            previous.unload();
        }
        Ok(name)
    }

    /// Unload a model by name.
    ///
    /// Returns true if the model was found and unloaded.
    pub fn unload_plugin(&self, name: &str) -> bool {
        let factory = self.write().remove(name);
        match factory {
            Some(factory) => {
                factory.unload();
                true
            }
            None => false,
        }
    }

    /// Unload every registered model.
    pub fn unload_all(&self) {
        let factories: Vec<_> = self.write().drain().map(|(_, f)| f).collect();
        for factory in factories {
            factory.unload();
        }
    }

    /// Descriptor of a registered model.
    pub fn model_info(&self, name: &str) -> Option<Arc<ModelDescriptor>> {
        self.read().get(name).and_then(|f| f.get_model_info().ok())
    }

    /// Factory of a registered model.
    pub fn factory(&self, name: &str) -> Option<PluginModelFactory> {
        self.read().get(name).cloned()
    }

    /// Check if a model is registered.
    pub fn has_model(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered model names, sorted.
    pub fn list_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a model instance by name.
    pub fn create_model(&self, name: &str) -> Result<PluginModel> {
        let factory = self.factory(name).ok_or_else(|| Error::ModuleNotFound {
            name: name.to_string(),
        })?;
        factory.create_model()
    }

    /// Scan a directory and load every module found.
    ///
    /// Returns the number of successfully registered modules. Failures are
    /// logged and skipped.
    ///
    /// # Safety
    ///
    /// All modules in the directory must be trusted.
    pub unsafe fn load_all_from_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut count = 0;
        for path in self.loader.scan(dir)? {
            // SAFETY: Caller guarantees all modules are trusted.
            match unsafe { self.load_plugin(&path) } {
                Ok(_) => count += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping module"),
            }
        }
        Ok(count)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.list_models())
            .field("loader", &self.loader)
            .finish()
    }
}
