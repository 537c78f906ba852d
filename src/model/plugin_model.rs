//! A native model instance bound to its factory.

use super::descriptor::ModelDescriptor;
use super::factory::{NativeModelHandle, PluginModelFactory};
use super::parameters::{ParameterSet, ParameterValue};
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

struct Binding {
    factory: PluginModelFactory,
    handle: NativeModelHandle,
    parameters: ParameterSet,
}

/// One native model with its own parameter values.
///
/// Created only by [`PluginModelFactory::create_model`]. All calculations
/// are delegated to the factory. Dropping the model destroys the native
/// instance; after [`destroy`](Self::destroy) every operation fails with
/// [`Error::ModelDestroyed`].
pub struct PluginModel {
    binding: Option<Binding>,
}

impl PluginModel {
    pub(crate) fn new(
        factory: PluginModelFactory,
        handle: NativeModelHandle,
        parameters: ParameterSet,
    ) -> Self {
        Self {
            binding: Some(Binding {
                factory,
                handle,
                parameters,
            }),
        }
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding.as_ref().ok_or(Error::ModelDestroyed)
    }

    fn binding_mut(&mut self) -> Result<&mut Binding> {
        self.binding.as_mut().ok_or(Error::ModelDestroyed)
    }

    /// Descriptor of the model.
    pub fn get_model_info(&self) -> Result<Arc<ModelDescriptor>> {
        Ok(self.binding()?.parameters.descriptor().clone())
    }

    /// Current parameter values.
    pub fn parameters(&self) -> Result<&ParameterSet> {
        Ok(&self.binding()?.parameters)
    }

    /// Current value of one parameter.
    pub fn parameter(&self, name: &str) -> Result<&ParameterValue> {
        self.binding()?.parameters.get(name)
    }

    /// Mutable value of one parameter. The set itself cannot be replaced.
    pub fn parameter_mut(&mut self, name: &str) -> Result<&mut ParameterValue> {
        self.binding_mut()?.parameters.get_mut(name)
    }

    /// Replace the value of one parameter.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<()> {
        self.binding_mut()?.parameters.set(name, value)
    }

    /// Native handle, or `None` once destroyed.
    pub fn handle(&self) -> Option<NativeModelHandle> {
        self.binding.as_ref().map(|b| b.handle)
    }

    /// The owning factory, or `None` once destroyed.
    pub fn factory(&self) -> Option<&PluginModelFactory> {
        self.binding.as_ref().map(|b| &b.factory)
    }

    /// Whether the model has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.binding.is_none()
    }

    /// Destroy the native instance. A no-op if already destroyed.
    ///
    /// If the factory no longer tracks the handle (it was unloaded in the
    /// meantime) the model is detached and [`Error::UnknownHandle`] returned.
    pub fn destroy(&mut self) -> Result<()> {
        let Some(binding) = &self.binding else {
            return Ok(());
        };
        let factory = binding.factory.clone();
        match factory.destroy_model(self) {
            Err(Error::UnknownHandle) => {
                self.clear();
                Err(Error::UnknownHandle)
            }
            other => other,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.binding = None;
    }

    /// I(q). See [`PluginModelFactory::calculate_q`].
    pub fn calculate_q(&self, q: Option<&[f64]>) -> Result<Vec<f64>> {
        self.binding()?.factory.calculate_q(self, q)
    }

    /// I(qx, qy). See [`PluginModelFactory::calculate_qxqy`].
    pub fn calculate_qxqy(&self, qx: Option<&[f64]>, qy: Option<&[f64]>) -> Result<Vec<f64>> {
        self.binding()?.factory.calculate_qxqy(self, qx, qy)
    }

    /// I(qx, qy, qz). See [`PluginModelFactory::calculate_qxqyqz`].
    pub fn calculate_qxqyqz(
        &self,
        qx: Option<&[f64]>,
        qy: Option<&[f64]>,
        qz: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        self.binding()?.factory.calculate_qxqyqz(self, qx, qy, qz)
    }

    /// Effective radius.
    pub fn calculate_er(&self) -> Result<f64> {
        self.binding()?.factory.calculate_er(self)
    }

    /// Volume ratio.
    pub fn calculate_vr(&self) -> Result<f64> {
        self.binding()?.factory.calculate_vr(self)
    }
}

impl Drop for PluginModel {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::debug!(error = %e, "model already released by its factory");
        }
    }
}

impl fmt::Debug for PluginModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binding {
            Some(binding) => f
                .debug_struct("PluginModel")
                .field("model", &binding.parameters.descriptor().name())
                .field("handle", &binding.handle)
                .finish(),
            None => f.write_str("PluginModel(destroyed)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::testing::LiveGaugeRecorder;
    use crate::plugin::StaticModule;
    use crate::plugin::abi::{RawModelInfo, RawParameterInfo};
    use std::cell::Cell;
    use std::ffi::c_void;

    const PARAMS: &[RawParameterInfo] = &[
        RawParameterInfo::new(c"scale", c"", c"", 1.0, 0.0, f64::INFINITY, 0),
        RawParameterInfo::new(c"background", c"", c"", 0.5, 0.0, 1.0, 0),
    ];

    static INFO: RawModelInfo = RawModelInfo::new(c"Flat", c"constant intensity", PARAMS);

    thread_local! {
        static NATIVE_CALLS: Cell<usize> = const { Cell::new(0) };
    }

    unsafe extern "C" fn get_info() -> *const RawModelInfo {
        &INFO
    }

    unsafe extern "C" fn create(_data: *mut c_void) -> *mut c_void {
        Box::into_raw(Box::new(0u8)).cast()
    }

    unsafe extern "C" fn destroy(model: *mut c_void) {
        drop(unsafe { Box::from_raw(model.cast::<u8>()) });
    }

    unsafe extern "C" fn calculate_q(
        _model: *mut c_void,
        _params: *const *const c_void,
        n: usize,
        iq: *mut f64,
        _q: *const f64,
    ) {
        NATIVE_CALLS.with(|calls| calls.set(calls.get() + 1));
        for i in 0..n {
            unsafe { *iq.add(i) = 1.0 };
        }
    }

    unsafe extern "C" fn scalar(_model: *mut c_void, _params: *const *const c_void) -> f64 {
        NATIVE_CALLS.with(|calls| calls.set(calls.get() + 1));
        1.0
    }

    fn flat_factory() -> PluginModelFactory {
        let module = StaticModule::new("flat")
            .with_get_model_info(get_info)
            .with_create_model(create)
            .with_destroy_model(destroy)
            .with_calculate_q(calculate_q)
            .with_calculate_er(scalar)
            .with_calculate_vr(scalar);
        let factory = PluginModelFactory::new();
        unsafe { factory.load_module(module).unwrap() };
        factory
    }

    #[test]
    fn test_set_parameter_by_name() {
        let factory = flat_factory();
        let mut model = factory.create_model().unwrap();
        model.set_parameter("scale", 3.0).unwrap();
        *model.parameter_mut("background").unwrap() = ParameterValue::Simple(0.25);

        assert_eq!(model.parameter("scale").unwrap(), &ParameterValue::Simple(3.0));
        assert_eq!(model.parameter("background").unwrap().as_simple(), Some(0.25));
        assert!(matches!(model.parameter_mut("radius"), Err(Error::UnknownParameter(_))));
    }

    #[test]
    fn test_parameters_from_other_descriptor_rejected() {
        let factory = flat_factory();
        let mut model = factory.create_model().unwrap();
        let empty = Arc::new(ModelDescriptor::new("Empty", "", Vec::new()).unwrap());
        if let Some(binding) = model.binding.as_mut() {
            binding.parameters = ParameterSet::defaults(empty);
        }
        NATIVE_CALLS.with(|calls| calls.set(0));

        let result = model.calculate_q(Some(&[1.0]));
        let rejected = matches!(
            result,
            Err(Error::ForeignParameters { ref expected, ref actual })
                if expected == "Flat" && actual == "Empty"
        );
        assert!(rejected);
        assert!(matches!(model.calculate_er(), Err(Error::ForeignParameters { .. })));
        assert_eq!(NATIVE_CALLS.with(Cell::get), 0);
    }

    #[test]
    fn test_parameters_with_equal_schema_still_rejected() {
        let factory = flat_factory();
        let mut model = factory.create_model().unwrap();
        let copy = Arc::new((*factory.get_model_info().unwrap()).clone());
        if let Some(binding) = model.binding.as_mut() {
            binding.parameters = ParameterSet::defaults(copy);
        }
        NATIVE_CALLS.with(|calls| calls.set(0));

        assert!(matches!(model.calculate_vr(), Err(Error::ForeignParameters { .. })));
        assert_eq!(NATIVE_CALLS.with(Cell::get), 0);
    }

    #[test]
    fn test_own_parameters_reach_module() {
        let factory = flat_factory();
        let model = factory.create_model().unwrap();
        NATIVE_CALLS.with(|calls| calls.set(0));

        assert_eq!(model.calculate_q(Some(&[0.1, 0.2])).unwrap(), [1.0, 1.0]);
        assert_eq!(model.calculate_er().unwrap(), 1.0);
        assert_eq!(NATIVE_CALLS.with(Cell::get), 2);
    }

    #[test]
    fn test_destroyed_model() {
        let factory = flat_factory();
        let mut model = factory.create_model().unwrap();
        model.destroy().unwrap();
        model.destroy().unwrap();

        assert!(model.is_destroyed());
        assert!(matches!(model.parameter("scale"), Err(Error::ModelDestroyed)));
        assert!(matches!(model.set_parameter("scale", 2.0), Err(Error::ModelDestroyed)));
        assert_eq!(format!("{model:?}"), "PluginModel(destroyed)");
        assert_eq!(factory.live_models(), 0);
    }

    #[test]
    fn test_live_gauge_spans_factories() {
        let recorder = LiveGaugeRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            let first = flat_factory();
            let second = flat_factory();
            let _a = first.create_model().unwrap();
            let _b = second.create_model().unwrap();
            let _c = second.create_model().unwrap();
            assert_eq!(recorder.live(), 3.0);

            first.unload();
            assert_eq!(recorder.live(), 2.0);
        });
        assert_eq!(recorder.live(), 0.0);
    }

    #[derive(Clone, Default)]
    struct LoadSpans(Arc<std::sync::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LoadSpans {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Module(Option<String>);
            impl tracing::field::Visit for Module {
                fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
                    if field.name() == "module" {
                        self.0 = Some(format!("{value:?}"));
                    }
                }
            }

            if attrs.metadata().name() == "load_module" {
                let mut module = Module(None);
                attrs.record(&mut module);
                if let Some(label) = module.0 {
                    self.0.lock().unwrap().push(label);
                }
            }
        }
    }

    #[test]
    fn test_in_process_load_is_spanned() {
        use tracing_subscriber::layer::SubscriberExt;

        let spans = LoadSpans::default();
        let subscriber = tracing_subscriber::registry().with(spans.clone());
        let factory = tracing::subscriber::with_default(subscriber, flat_factory);

        assert!(factory.is_loaded());
        assert_eq!(*spans.0.lock().unwrap(), ["flat"]);
    }
}
