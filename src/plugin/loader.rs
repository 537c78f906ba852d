//! Locating model modules on disk.

use crate::error::Result;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Environment variable holding extra search directories.
pub const MODEL_PATH_ENV: &str = "SASPLUGIN_MODEL_PATH";

/// Where to look for model modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    search_paths: Vec<PathBuf>,
}

impl LoaderConfig {
    /// Search the current directory only.
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from(".")],
        }
    }

    /// No search paths at all.
    pub fn empty() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    /// Defaults with every entry of `SASPLUGIN_MODEL_PATH` searched first.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(value) = env::var_os(MODEL_PATH_ENV) {
            let mut paths: Vec<PathBuf> = env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            paths.append(&mut config.search_paths);
            config.search_paths = paths;
        }
        config
    }

    /// Append a search path (builder style).
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Append a search path.
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    /// Search paths in probe order.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the module file for `name`.
    ///
    /// A name containing a path separator is checked as given. A bare file
    /// name with an extension is looked up as-is in each search path;
    /// anything else is expanded to the platform library file name first
    /// (`sphere` becomes `libsphere.so` on Linux). The first existing file
    /// wins.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let given = Path::new(name);
        if given.components().count() > 1 {
            return given.is_file().then(|| given.to_path_buf());
        }

        let file_name = if given.extension().is_some() {
            given.as_os_str().to_os_string()
        } else {
            libloading::library_filename(name)
        };

        let found = self
            .search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file());
        tracing::trace!(name, ?found, "resolved module name");
        found
    }

    /// Every dynamic library in `dir`, sorted by path.
    pub fn scan(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension() == Some(OsStr::new(env::consts::DLL_EXTENSION)) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}
