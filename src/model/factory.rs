//! The plugin model factory: module lifecycle, instantiation and dispatch.

use super::descriptor::ModelDescriptor;
use super::parameters::ParameterSet;
use super::plugin_model::PluginModel;
use super::wire::{self, EncodedParameters};
use crate::error::{Error, Result};
use crate::observability;
use crate::plugin::LoaderConfig;
use crate::plugin::abi::{
    CalculateQFn, CalculateQxQyFn, CalculateQxQyQzFn, CalculateScalarFn, CreateModelFn,
    DestroyModelFn, GetModelInfoFn, symbols,
};
use crate::plugin::library::{LibraryHandle, NativeModule};
use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Load generations are unique across all factories in the process.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A calculation entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Calculation {
    /// I(q).
    Q,
    /// I(qx, qy).
    QxQy,
    /// I(qx, qy, qz).
    QxQyQz,
    /// Effective radius.
    EffectiveRadius,
    /// Volume ratio.
    VolumeRatio,
}

impl Calculation {
    /// Every calculation, in entry-point order.
    pub const ALL: [Calculation; 5] = [
        Calculation::Q,
        Calculation::QxQy,
        Calculation::QxQyQz,
        Calculation::EffectiveRadius,
        Calculation::VolumeRatio,
    ];

    /// Exported symbol implementing this calculation.
    pub fn symbol(self) -> &'static CStr {
        match self {
            Calculation::Q => symbols::CALCULATE_Q,
            Calculation::QxQy => symbols::CALCULATE_QXQY,
            Calculation::QxQyQz => symbols::CALCULATE_QXQYQZ,
            Calculation::EffectiveRadius => symbols::CALCULATE_ER,
            Calculation::VolumeRatio => symbols::CALCULATE_VR,
        }
    }

    /// Short label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Calculation::Q => "q",
            Calculation::QxQy => "qxqy",
            Calculation::QxQyQz => "qxqyqz",
            Calculation::EffectiveRadius => "er",
            Calculation::VolumeRatio => "vr",
        }
    }
}

impl fmt::Display for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol().to_string_lossy())
    }
}

/// Opaque token for one native model instance.
///
/// The bits are never interpreted; validity is decided solely by the
/// owning factory's live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeModelHandle {
    raw: usize,
    generation: u64,
}

impl NativeModelHandle {
    /// Load generation that issued this handle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn as_ptr(self) -> *mut c_void {
        self.raw as *mut c_void
    }
}

/// Entry points resolved from the loaded module.
#[derive(Default, Clone, Copy)]
struct EntryPoints {
    get_model_info: Option<GetModelInfoFn>,
    create_model: Option<CreateModelFn>,
    destroy_model: Option<DestroyModelFn>,
    calculate_q: Option<CalculateQFn>,
    calculate_qxqy: Option<CalculateQxQyFn>,
    calculate_qxqyqz: Option<CalculateQxQyQzFn>,
    calculate_er: Option<CalculateScalarFn>,
    calculate_vr: Option<CalculateScalarFn>,
}

impl EntryPoints {
    /// Resolve every entry point, failing on the first missing required one.
    ///
    /// # Safety
    ///
    /// Each exported symbol must have the signature declared in
    /// [`crate::plugin::abi`].
    unsafe fn resolve(module: &dyn NativeModule) -> Result<Self> {
        // SAFETY: Caller guarantees the exported signatures.
        unsafe {
            Ok(Self {
                get_model_info: Some(required(module, symbols::GET_MODEL_INFO)?),
                create_model: Some(required(module, symbols::CREATE_MODEL)?),
                destroy_model: Some(required(module, symbols::DESTROY_MODEL)?),
                calculate_q: Some(required(module, symbols::CALCULATE_Q)?),
                calculate_qxqy: optional(module, symbols::CALCULATE_QXQY),
                calculate_qxqyqz: optional(module, symbols::CALCULATE_QXQYQZ),
                calculate_er: Some(required(module, symbols::CALCULATE_ER)?),
                calculate_vr: Some(required(module, symbols::CALCULATE_VR)?),
            })
        }
    }

    fn supports(&self, calculation: Calculation) -> bool {
        match calculation {
            Calculation::Q => self.calculate_q.is_some(),
            Calculation::QxQy => self.calculate_qxqy.is_some(),
            Calculation::QxQyQz => self.calculate_qxqyqz.is_some(),
            Calculation::EffectiveRadius => self.calculate_er.is_some(),
            Calculation::VolumeRatio => self.calculate_vr.is_some(),
        }
    }

    fn resolved(&self) -> Vec<&'static CStr> {
        let lifecycle = [
            (self.get_model_info.is_some(), symbols::GET_MODEL_INFO),
            (self.create_model.is_some(), symbols::CREATE_MODEL),
            (self.destroy_model.is_some(), symbols::DESTROY_MODEL),
        ];
        let calculations = Calculation::ALL.map(|c| (self.supports(c), c.symbol()));
        lifecycle
            .into_iter()
            .chain(calculations)
            .filter_map(|(present, name)| present.then_some(name))
            .collect()
    }
}

/// # Safety
///
/// `F` must be a function pointer type matching the exported symbol.
unsafe fn optional<F: Copy>(module: &dyn NativeModule, name: &CStr) -> Option<F> {
    let address = module.symbol(name)?;
    debug_assert_eq!(size_of::<F>(), size_of::<*const c_void>());
    // SAFETY: Function pointers and data pointers share a representation on
    // every supported platform; the caller picks the matching signature.
    Some(unsafe { std::mem::transmute_copy::<*const c_void, F>(&address) })
}

/// # Safety
///
/// Same as [`optional`].
unsafe fn required<F: Copy>(module: &dyn NativeModule, name: &CStr) -> Result<F> {
    // SAFETY: Forwarded caller guarantee.
    unsafe { optional(module, name) }
        .ok_or_else(|| Error::MissingRequiredSymbol(name.to_string_lossy().into_owned()))
}

/// Mutable state behind a factory.
#[derive(Default)]
struct FactoryState {
    module: Option<Box<dyn NativeModule>>,
    entry_points: EntryPoints,
    descriptor: Option<Arc<ModelDescriptor>>,
    /// Live native handles with the number of models bound to each.
    live: HashMap<NativeModelHandle, usize>,
    generation: u64,
}

impl FactoryState {
    fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    fn is_live(&self, handle: NativeModelHandle) -> bool {
        self.live.contains_key(&handle)
    }

    fn live_count(&self) -> usize {
        self.live.values().sum()
    }

    /// Install `module` and bind it, rolling back on any failure.
    ///
    /// # Safety
    ///
    /// See [`EntryPoints::resolve`].
    unsafe fn attach(&mut self, module: Box<dyn NativeModule>) -> Result<()> {
        self.module = Some(module);
        self.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);

        // SAFETY: Forwarded caller guarantee.
        match unsafe { self.bind() } {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "module load failed, rolling back");
                self.unload();
                Err(e)
            }
        }
    }

    /// # Safety
    ///
    /// See [`EntryPoints::resolve`].
    unsafe fn bind(&mut self) -> Result<()> {
        let module = self.module.as_deref().ok_or(Error::NotLoaded)?;
        // SAFETY: Forwarded caller guarantee.
        let entry_points = unsafe { EntryPoints::resolve(module)? };
        let get_model_info = entry_points.get_model_info.ok_or(Error::NotLoaded)?;

        // SAFETY: The symbol was resolved with the documented signature and
        // the module stays loaded for the duration of the call.
        let descriptor = unsafe { ModelDescriptor::from_raw(get_model_info())? };

        self.entry_points = entry_points;
        self.descriptor = Some(Arc::new(descriptor));
        Ok(())
    }

    /// Destroy every live model, forget all entry points and close the module.
    fn unload(&mut self) {
        let destroy = self.entry_points.destroy_model;
        let leaked = self.live_count();
        if leaked > 0 {
            tracing::warn!(models = leaked, "destroying live models before unload");
        }

        for (handle, count) in self.live.drain() {
            if let Some(destroy) = destroy {
                for _ in 0..count {
                    // SAFETY: The handle came from this module's create entry
                    // point and the module is still loaded.
                    unsafe { destroy(handle.as_ptr()) };
                }
            }
        }
        if leaked > 0 {
            observability::record_model_destroyed(leaked);
        }

        self.entry_points = EntryPoints::default();
        self.descriptor = None;
        if let Some(mut module) = self.module.take() {
            module.close();
        }
    }

    fn release(&mut self, handle: NativeModelHandle) {
        if let Some(count) = self.live.get_mut(&handle) {
            *count -= 1;
            if *count == 0 {
                self.live.remove(&handle);
            }
        }
    }
}

impl Drop for FactoryState {
    fn drop(&mut self) {
        if self.is_loaded() {
            self.unload();
        }
    }
}

/// Loads one native model module and brokers every call into it.
///
/// The factory is a cheap, cloneable handle; clones share the same module,
/// live set and entry points. Every [`PluginModel`] keeps its factory
/// alive, and the module is unloaded when the last handle goes away or
/// when [`unload`](Self::unload) is called explicitly. Calls into one
/// factory are serialised.
#[derive(Clone, Default)]
pub struct PluginModelFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl PluginModelFactory {
    /// Create an unloaded factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory and load the module at `path`.
    ///
    /// # Safety
    ///
    /// See [`load`](Self::load).
    pub unsafe fn open(path: impl AsRef<Path>) -> Result<Self> {
        let factory = Self::new();
        // SAFETY: Forwarded caller guarantee.
        unsafe { factory.load(path)? };
        Ok(factory)
    }

    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the shared library at `path`, unloading any current module first.
    ///
    /// On failure the factory is left unloaded.
    ///
    /// # Safety
    ///
    /// Loading executes code from the library. It must be trusted and
    /// export its entry points with the signatures in [`crate::plugin::abi`].
    pub unsafe fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let _span = observability::instrument_load(path.display());

        let mut state = self.lock();
        if state.is_loaded() {
            state.unload();
        }

        let mut library = LibraryHandle::new();
        // SAFETY: Forwarded caller guarantee.
        unsafe {
            library.open(path)?;
            state.attach(Box::new(library))?;
        }
        Self::log_loaded(&state);
        Ok(())
    }

    /// Resolve `name` through `config` and load it. Returns the loaded path.
    ///
    /// # Safety
    ///
    /// See [`load`](Self::load).
    pub unsafe fn load_by_name(&self, name: &str, config: &LoaderConfig) -> Result<PathBuf> {
        let path = config.resolve(name).ok_or_else(|| Error::ModuleNotFound {
            name: name.to_string(),
        })?;
        // SAFETY: Forwarded caller guarantee.
        unsafe { self.load(&path)? };
        Ok(path)
    }

    /// Load an already-opened module, unloading any current module first.
    ///
    /// # Safety
    ///
    /// See [`load`](Self::load).
    pub unsafe fn load_module(&self, module: impl NativeModule + 'static) -> Result<()> {
        let _span = observability::instrument_load(module.label());

        let mut state = self.lock();
        if state.is_loaded() {
            state.unload();
        }
        // SAFETY: Forwarded caller guarantee.
        unsafe { state.attach(Box::new(module))? };
        Self::log_loaded(&state);
        Ok(())
    }

    fn log_loaded(state: &FactoryState) {
        observability::record_module_loaded();
        if let Some(descriptor) = &state.descriptor {
            tracing::info!(
                path = ?state.module.as_deref().and_then(|m| m.path()),
                model = descriptor.name(),
                parameters = descriptor.parameters().len(),
                qxqy = state.entry_points.supports(Calculation::QxQy),
                qxqyqz = state.entry_points.supports(Calculation::QxQyQz),
                "loaded plugin model"
            );
        }
    }

    /// Destroy all live models and close the module. Safe to call when unloaded.
    pub fn unload(&self) {
        let mut state = self.lock();
        if state.is_loaded() {
            let name = state.descriptor.as_ref().map(|d| d.name().to_string());
            state.unload();
            tracing::info!(model = ?name, "unloaded plugin model");
        }
    }

    /// Whether a module is loaded.
    pub fn is_loaded(&self) -> bool {
        self.lock().is_loaded()
    }

    /// Path of the loaded module, if it came from disk.
    pub fn path(&self) -> Option<PathBuf> {
        let state = self.lock();
        state
            .module
            .as_deref()
            .and_then(|m| m.path())
            .map(Path::to_path_buf)
    }

    /// Number of live native models.
    pub fn live_models(&self) -> usize {
        self.lock().live_count()
    }

    /// Entry points currently resolved. Empty when unloaded.
    pub fn resolved_symbols(&self) -> Vec<&'static CStr> {
        self.lock().entry_points.resolved()
    }

    /// Whether the loaded module implements `calculation`.
    pub fn supports(&self, calculation: Calculation) -> bool {
        self.lock().entry_points.supports(calculation)
    }

    /// Descriptor of the loaded module.
    pub fn get_model_info(&self) -> Result<Arc<ModelDescriptor>> {
        self.lock().descriptor.clone().ok_or(Error::NotLoaded)
    }

    /// Instantiate a native model with default parameters.
    pub fn create_model(&self) -> Result<PluginModel> {
        // SAFETY: A null data pointer is always accepted by the ABI.
        unsafe { self.create_model_with_data(ptr::null_mut()) }
    }

    /// Instantiate a native model, passing `data` to the module untouched.
    ///
    /// # Safety
    ///
    /// `data` must be whatever the module's `create_model` expects.
    pub unsafe fn create_model_with_data(&self, data: *mut c_void) -> Result<PluginModel> {
        let mut state = self.lock();
        let create = state.entry_points.create_model.ok_or(Error::NotLoaded)?;
        let descriptor = state.descriptor.clone().ok_or(Error::NotLoaded)?;

        // SAFETY: Resolved with the documented signature; caller vouches for `data`.
        let raw = unsafe { create(data) };
        if raw.is_null() {
            return Err(Error::CreationFailed);
        }

        let handle = NativeModelHandle {
            raw: raw as usize,
            generation: state.generation,
        };
        *state.live.entry(handle).or_insert(0) += 1;
        let live = state.live_count();
        drop(state);

        observability::record_model_created();
        tracing::debug!(model = descriptor.name(), live, "created model");

        Ok(PluginModel::new(
            self.clone(),
            handle,
            ParameterSet::defaults(descriptor),
        ))
    }

    /// Destroy the native model bound to `model` and detach it.
    ///
    /// Fails with [`Error::UnknownHandle`] if the handle is not live here.
    /// Once the native destroy has been issued the handle is forgotten and
    /// `model` is cleared, so it can no longer be used.
    pub fn destroy_model(&self, model: &mut PluginModel) -> Result<()> {
        let handle = model.handle().ok_or(Error::UnknownHandle)?;

        let live = {
            let mut state = self.lock();
            if !state.is_live(handle) {
                return Err(Error::UnknownHandle);
            }
            let destroy = state.entry_points.destroy_model.ok_or(Error::NotLoaded)?;

            // SAFETY: The handle is live, so it came from this module's
            // create entry point and has not been destroyed.
            unsafe { destroy(handle.as_ptr()) };
            state.release(handle);
            state.live_count()
        };
        model.clear();

        observability::record_model_destroyed(1);
        tracing::debug!(live, "destroyed model");
        Ok(())
    }

    /// I(q) for every point in `q`.
    ///
    /// `None` issues a zero-length probe call and returns no values.
    pub fn calculate_q(&self, model: &PluginModel, q: Option<&[f64]>) -> Result<Vec<f64>> {
        let points = q.map_or(0, <[f64]>::len);
        self.dispatch(model, Calculation::Q, points, |entry, raw, params| {
            let Some(calculate) = entry.calculate_q else {
                return Err(Error::UnsupportedOperation(Calculation::Q));
            };
            let Some(q) = q else {
                // SAFETY: A zero-length call with null buffers is defined.
                unsafe { calculate(raw, params.as_ptr(), 0, ptr::null_mut(), ptr::null()) };
                return Ok(Vec::new());
            };

            let mut iq = vec![0.0; q.len()];
            // SAFETY: Both buffers hold `q.len()` elements.
            unsafe { calculate(raw, params.as_ptr(), q.len(), iq.as_mut_ptr(), q.as_ptr()) };
            Ok(iq)
        })
    }

    /// I(qx, qy) for every point pair.
    ///
    /// If either array is `None` a zero-length probe call is issued.
    pub fn calculate_qxqy(
        &self,
        model: &PluginModel,
        qx: Option<&[f64]>,
        qy: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        let points = match (qx, qy) {
            (Some(qx), Some(_)) => qx.len(),
            _ => 0,
        };
        self.dispatch(model, Calculation::QxQy, points, |entry, raw, params| {
            let Some(calculate) = entry.calculate_qxqy else {
                return Err(Error::UnsupportedOperation(Calculation::QxQy));
            };
            let (Some(qx), Some(qy)) = (qx, qy) else {
                // SAFETY: A zero-length call with null buffers is defined.
                unsafe {
                    calculate(raw, params.as_ptr(), 0, ptr::null_mut(), ptr::null(), ptr::null())
                };
                return Ok(Vec::new());
            };
            check_lengths(qx.len(), &[qy.len()])?;

            let n = qx.len();
            let mut iq = vec![0.0; n];
            // SAFETY: All buffers hold `n` elements.
            unsafe {
                calculate(raw, params.as_ptr(), n, iq.as_mut_ptr(), qx.as_ptr(), qy.as_ptr())
            };
            Ok(iq)
        })
    }

    /// I(qx, qy, qz) for every point triple.
    ///
    /// If any array is `None` a zero-length probe call is issued.
    pub fn calculate_qxqyqz(
        &self,
        model: &PluginModel,
        qx: Option<&[f64]>,
        qy: Option<&[f64]>,
        qz: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        let points = match (qx, qy, qz) {
            (Some(qx), Some(_), Some(_)) => qx.len(),
            _ => 0,
        };
        self.dispatch(model, Calculation::QxQyQz, points, |entry, raw, params| {
            let Some(calculate) = entry.calculate_qxqyqz else {
                return Err(Error::UnsupportedOperation(Calculation::QxQyQz));
            };
            let (Some(qx), Some(qy), Some(qz)) = (qx, qy, qz) else {
                // SAFETY: A zero-length call with null buffers is defined.
                unsafe {
                    calculate(
                        raw,
                        params.as_ptr(),
                        0,
                        ptr::null_mut(),
                        ptr::null(),
                        ptr::null(),
                        ptr::null(),
                    )
                };
                return Ok(Vec::new());
            };
            check_lengths(qx.len(), &[qy.len(), qz.len()])?;

            let n = qx.len();
            let mut iq = vec![0.0; n];
            // SAFETY: All buffers hold `n` elements.
            unsafe {
                calculate(
                    raw,
                    params.as_ptr(),
                    n,
                    iq.as_mut_ptr(),
                    qx.as_ptr(),
                    qy.as_ptr(),
                    qz.as_ptr(),
                )
            };
            Ok(iq)
        })
    }

    /// Effective radius.
    pub fn calculate_er(&self, model: &PluginModel) -> Result<f64> {
        self.dispatch(model, Calculation::EffectiveRadius, 1, |entry, raw, params| {
            let Some(calculate) = entry.calculate_er else {
                return Err(Error::UnsupportedOperation(Calculation::EffectiveRadius));
            };
            // SAFETY: Resolved with the documented signature.
            Ok(unsafe { calculate(raw, params.as_ptr()) })
        })
    }

    /// Volume ratio.
    pub fn calculate_vr(&self, model: &PluginModel) -> Result<f64> {
        self.dispatch(model, Calculation::VolumeRatio, 1, |entry, raw, params| {
            let Some(calculate) = entry.calculate_vr else {
                return Err(Error::UnsupportedOperation(Calculation::VolumeRatio));
            };
            // SAFETY: Resolved with the documented signature.
            Ok(unsafe { calculate(raw, params.as_ptr()) })
        })
    }

    /// Validate `model` and `calculation`, encode the parameters and run `call`
    /// with the lock held. The encoded buffer is dropped when `call` returns.
    fn dispatch<R>(
        &self,
        model: &PluginModel,
        calculation: Calculation,
        points: usize,
        call: impl FnOnce(&EntryPoints, *mut c_void, &EncodedParameters) -> Result<R>,
    ) -> Result<R> {
        let handle = model.handle().ok_or(Error::UnknownHandle)?;
        let parameters = model.parameters().map_err(|_| Error::UnknownHandle)?;

        let state = self.lock();
        if !state.is_live(handle) {
            return Err(Error::UnknownHandle);
        }
        if !state.entry_points.supports(calculation) {
            return Err(Error::UnsupportedOperation(calculation));
        }

        let descriptor = state.descriptor.clone().ok_or(Error::NotLoaded)?;
        if !Arc::ptr_eq(&descriptor, parameters.descriptor()) {
            return Err(Error::ForeignParameters {
                expected: descriptor.name().to_string(),
                actual: parameters.descriptor().name().to_string(),
            });
        }
        let encoded = wire::encode(&descriptor, parameters)?;

        let _span = observability::span_calculation(descriptor.name(), calculation).entered();
        let started = Instant::now();
        let result = call(&state.entry_points, handle.as_ptr(), &encoded)?;
        let elapsed = started.elapsed();
        drop(encoded);
        drop(state);

        tracing::trace!(
            model = descriptor.name(),
            calculation = calculation.as_str(),
            points,
            ?elapsed,
            "calculation finished"
        );
        observability::record_calculation(calculation, points, elapsed);
        Ok(result)
    }
}

fn check_lengths(expected: usize, others: &[usize]) -> Result<()> {
    match others.iter().find(|&&actual| actual != expected) {
        Some(&actual) => Err(Error::LengthMismatch { expected, actual }),
        None => Ok(()),
    }
}

impl fmt::Debug for PluginModelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PluginModelFactory")
            .field("loaded", &state.is_loaded())
            .field("model", &state.descriptor.as_ref().map(|d| d.name().to_string()))
            .field("live_models", &state.live_count())
            .finish()
    }
}
