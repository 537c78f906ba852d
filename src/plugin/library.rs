//! Native library handles and symbol sources.

use super::abi::{
    CalculateQFn, CalculateQxQyFn, CalculateQxQyQzFn, CalculateScalarFn, CreateModelFn,
    DestroyModelFn, GetModelInfoFn, symbols,
};
use crate::error::{Error, Result};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_void};
use std::fmt;
use std::path::{Path, PathBuf};

/// A source of exported entry points.
///
/// The factory resolves every entry point through this trait, so a module
/// can come from a shared library on disk ([`LibraryHandle`]) or be linked
/// into the host ([`StaticModule`]).
pub trait NativeModule: Send {
    /// Address of the exported symbol `name`, or `None` if it is absent.
    fn symbol(&self, name: &CStr) -> Option<*const c_void>;

    /// Release the module. Must be idempotent and must not panic.
    fn close(&mut self);

    /// Path the module was loaded from, if any.
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Short label for logs and spans.
    fn label(&self) -> String {
        self.path()
            .map_or_else(|| "<in-process>".to_string(), |p| p.display().to_string())
    }
}

/// Owns zero or one loaded shared library.
///
/// Opening while already open closes the previous library first. Closing
/// is a no-op when nothing is open, and dropping the handle closes it.
#[derive(Default)]
pub struct LibraryHandle {
    library: Option<Library>,
    path: Option<PathBuf>,
}

impl LibraryHandle {
    /// Create a closed handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the shared library at `path`.
    ///
    /// # Safety
    ///
    /// Loading a library runs its initialisers. The library must be trusted.
    pub unsafe fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.close();

        let path = path.as_ref();
        // SAFETY: Caller guarantees the library is trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| Error::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), "opened native module");
        self.library = Some(library);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Release the library if one is held.
    pub fn close(&mut self) {
        self.path = None;
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                tracing::warn!(error = %e, "failed to close native module");
            }
        }
    }

    /// Whether a library is currently held.
    pub fn is_open(&self) -> bool {
        self.library.is_some()
    }
}

impl NativeModule for LibraryHandle {
    fn symbol(&self, name: &CStr) -> Option<*const c_void> {
        let library = self.library.as_ref()?;
        // SAFETY: Symbols are looked up as untyped addresses; the caller
        // casts them to the matching entry-point type.
        let symbol = unsafe { library.get::<*const c_void>(name.to_bytes_with_nul()) }.ok()?;
        let address = *symbol;
        (!address.is_null()).then_some(address)
    }

    fn close(&mut self) {
        LibraryHandle::close(self);
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// An in-process symbol table for modules linked into the host.
///
/// # Example
///
/// ```ignore
/// let module = StaticModule::new("sphere")
///     .with_get_model_info(sphere::get_model_info)
///     .with_create_model(sphere::create_model)
///     .with_destroy_model(sphere::destroy_model)
///     .with_calculate_q(sphere::calculate_q)
///     .with_calculate_er(sphere::calculate_ER)
///     .with_calculate_vr(sphere::calculate_VR);
/// unsafe { factory.load_module(module)? };
/// ```
#[derive(Clone)]
pub struct StaticModule {
    name: String,
    symbols: HashMap<CString, usize>,
    closed: bool,
}

impl StaticModule {
    /// Create an empty table. `name` is only used for diagnostics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
            closed: false,
        }
    }

    /// Export an arbitrary address under `name`.
    pub fn with_symbol(mut self, name: &CStr, address: *const c_void) -> Self {
        self.symbols.insert(name.to_owned(), address as usize);
        self
    }

    /// Export `get_model_info`.
    pub fn with_get_model_info(self, f: GetModelInfoFn) -> Self {
        self.with_symbol(symbols::GET_MODEL_INFO, f as *const c_void)
    }

    /// Export `create_model`.
    pub fn with_create_model(self, f: CreateModelFn) -> Self {
        self.with_symbol(symbols::CREATE_MODEL, f as *const c_void)
    }

    /// Export `destroy_model`.
    pub fn with_destroy_model(self, f: DestroyModelFn) -> Self {
        self.with_symbol(symbols::DESTROY_MODEL, f as *const c_void)
    }

    /// Export `calculate_q`.
    pub fn with_calculate_q(self, f: CalculateQFn) -> Self {
        self.with_symbol(symbols::CALCULATE_Q, f as *const c_void)
    }

    /// Export `calculate_qxqy`.
    pub fn with_calculate_qxqy(self, f: CalculateQxQyFn) -> Self {
        self.with_symbol(symbols::CALCULATE_QXQY, f as *const c_void)
    }

    /// Export `calculate_qxqyqz`.
    pub fn with_calculate_qxqyqz(self, f: CalculateQxQyQzFn) -> Self {
        self.with_symbol(symbols::CALCULATE_QXQYQZ, f as *const c_void)
    }

    /// Export `calculate_ER`.
    pub fn with_calculate_er(self, f: CalculateScalarFn) -> Self {
        self.with_symbol(symbols::CALCULATE_ER, f as *const c_void)
    }

    /// Export `calculate_VR`.
    pub fn with_calculate_vr(self, f: CalculateScalarFn) -> Self {
        self.with_symbol(symbols::CALCULATE_VR, f as *const c_void)
    }

    /// Remove an export.
    pub fn without(mut self, name: &CStr) -> Self {
        self.symbols.remove(name);
        self
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl NativeModule for StaticModule {
    fn symbol(&self, name: &CStr) -> Option<*const c_void> {
        if self.closed {
            return None;
        }
        self.symbols.get(name).map(|&address| address as *const c_void)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Debug for StaticModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticModule")
            .field("name", &self.name)
            .field("symbols", &self.symbols.len())
            .field("closed", &self.closed)
            .finish()
    }
}
