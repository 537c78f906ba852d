//! Integration tests for the factory load/unload state machine and the
//! live-handle bookkeeping.

mod common;

use common::{Call, take_calls};
use sasplugin::model::{Calculation, PluginModelFactory};
use sasplugin::plugin::abi::symbols;
use sasplugin::{Error, Result};

fn loaded(module: sasplugin::plugin::StaticModule) -> Result<PluginModelFactory> {
    let factory = PluginModelFactory::new();
    unsafe { factory.load_module(module)? };
    Ok(factory)
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_resolves_entry_points() {
    let factory = loaded(common::full_module()).unwrap();
    assert!(factory.is_loaded());
    assert!(factory.path().is_none());
    assert_eq!(factory.resolved_symbols().len(), 8);
    for calculation in Calculation::ALL {
        assert!(factory.supports(calculation), "{calculation} should resolve");
    }

    let info = factory.get_model_info().unwrap();
    assert_eq!(info.version(), 1);
    assert_eq!(info.name(), "Mock");
    assert_eq!(info.parameters().len(), 3);
    assert_eq!(info.polydisperse(), ["radius"]);
}

#[test]
fn test_load_then_unload_clears_state() {
    let factory = loaded(common::full_module()).unwrap();
    factory.unload();

    assert!(!factory.is_loaded());
    assert_eq!(factory.live_models(), 0);
    assert!(factory.resolved_symbols().is_empty());
    for calculation in Calculation::ALL {
        assert!(!factory.supports(calculation));
    }
    assert!(matches!(factory.get_model_info(), Err(Error::NotLoaded)));
}

#[test]
fn test_missing_optional_entry_points() {
    let factory = loaded(common::required_only_module()).unwrap();
    assert!(factory.supports(Calculation::Q));
    assert!(!factory.supports(Calculation::QxQy));
    assert!(!factory.supports(Calculation::QxQyQz));

    let model = factory.create_model().unwrap();
    take_calls();

    let result = model.calculate_qxqy(Some(&[0.1]), Some(&[0.2]));
    assert!(matches!(result, Err(Error::UnsupportedOperation(Calculation::QxQy))));
    let result = model.calculate_qxqyqz(None, None, None);
    assert!(matches!(result, Err(Error::UnsupportedOperation(Calculation::QxQyQz))));
    assert!(take_calls().is_empty());
}

#[test]
fn test_missing_effective_radius_fails_load() {
    let module = common::full_module().without(symbols::CALCULATE_ER);
    let factory = PluginModelFactory::new();
    let result = unsafe { factory.load_module(module) };

    let missing = matches!(
        result,
        Err(Error::MissingRequiredSymbol(ref name)) if name == "calculate_ER"
    );
    assert!(missing);
    assert!(!factory.is_loaded());
    assert!(factory.resolved_symbols().is_empty());
}

#[test]
fn test_missing_create_fails_load() {
    let module = common::full_module().without(symbols::CREATE_MODEL);
    let result = loaded(module);
    let missing = matches!(
        result,
        Err(Error::MissingRequiredSymbol(ref name)) if name == "create_model"
    );
    assert!(missing);
}

#[test]
fn test_incompatible_abi_leaves_factory_unloaded() {
    let factory = PluginModelFactory::new();
    let result = unsafe { factory.load_module(common::future_abi_module()) };

    assert!(matches!(
        result,
        Err(Error::IncompatibleAbi {
            expected: 1,
            actual: 2
        })
    ));
    assert!(!factory.is_loaded());
    assert!(matches!(factory.create_model(), Err(Error::NotLoaded)));
}

#[test]
fn test_null_model_info_rejected() {
    let result = loaded(common::null_info_module());
    assert!(matches!(result, Err(Error::InvalidDescriptor(_))));
}

#[test]
fn test_failed_reload_leaves_factory_unloaded() {
    let factory = loaded(common::full_module()).unwrap();
    let result = unsafe { factory.load("/nonexistent/libsasplugin_missing.so") };

    assert!(matches!(result, Err(Error::LoadFailed { .. })));
    assert!(!factory.is_loaded());
}

// ============================================================================
// Instantiation and destruction
// ============================================================================

#[test]
fn test_create_model_defaults() {
    let factory = loaded(common::full_module()).unwrap();
    let model = factory.create_model().unwrap();
    assert_eq!(factory.live_models(), 1);

    let info = model.get_model_info().unwrap();
    let parameters = model.parameters().unwrap();
    let keys: Vec<&str> = parameters.iter().map(|(name, _)| name).collect();
    let declared: Vec<&str> = info.parameters().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(keys, declared);

    let radius = parameters.get("radius").unwrap().as_distribution().unwrap();
    assert_eq!(radius.values, [20.0]);
    assert_eq!(radius.weights, [1.0]);
    assert_eq!(parameters.get("scale").unwrap().as_simple(), Some(1.0));
}

#[test]
fn test_create_null_handle_fails() {
    let factory = loaded(common::failing_create_module()).unwrap();
    let result = factory.create_model();
    assert!(matches!(result, Err(Error::CreationFailed)));
    assert_eq!(factory.live_models(), 0);
}

#[test]
fn test_destroy_twice_is_noop() {
    let factory = loaded(common::full_module()).unwrap();
    let mut model = factory.create_model().unwrap();
    take_calls();

    model.destroy().unwrap();
    model.destroy().unwrap();
    drop(model);

    assert_eq!(take_calls(), [Call::Destroy]);
    assert_eq!(factory.live_models(), 0);
}

#[test]
fn test_destroyed_model_is_unusable() {
    let factory = loaded(common::full_module()).unwrap();
    let mut model = factory.create_model().unwrap();
    model.destroy().unwrap();

    assert!(model.is_destroyed());
    assert!(model.handle().is_none());
    assert!(matches!(model.calculate_q(Some(&[0.1])), Err(Error::ModelDestroyed)));
    assert!(matches!(model.calculate_er(), Err(Error::ModelDestroyed)));
    assert!(matches!(model.get_model_info(), Err(Error::ModelDestroyed)));
    assert!(matches!(model.set_parameter("scale", 2.0), Err(Error::ModelDestroyed)));
    assert!(matches!(factory.destroy_model(&mut model), Err(Error::UnknownHandle)));
    assert!(matches!(factory.calculate_q(&model, None), Err(Error::UnknownHandle)));
}

#[test]
fn test_drop_destroys_native_model() {
    let factory = loaded(common::full_module()).unwrap();
    {
        let _model = factory.create_model().unwrap();
        assert_eq!(common::live_instances(), 1);
    }
    assert_eq!(common::live_instances(), 0);
    assert_eq!(factory.live_models(), 0);
}

#[test]
fn test_unload_destroys_live_models() {
    let factory = loaded(common::full_module()).unwrap();
    let mut first = factory.create_model().unwrap();
    let second = factory.create_model().unwrap();
    take_calls();

    factory.unload();
    assert_eq!(take_calls(), [Call::Destroy, Call::Destroy]);
    assert_eq!(common::live_instances(), 0);

    assert!(matches!(second.calculate_q(Some(&[0.1])), Err(Error::UnknownHandle)));
    assert!(matches!(first.destroy(), Err(Error::UnknownHandle)));
    assert!(first.is_destroyed());

    drop(second);
    assert!(take_calls().is_empty());
}

#[test]
fn test_reload_invalidates_old_models() {
    let factory = loaded(common::full_module()).unwrap();
    let stale = factory.create_model().unwrap();
    let old_generation = stale.handle().unwrap().generation();

    unsafe { factory.load_module(common::full_module()).unwrap() };
    assert_eq!(factory.live_models(), 0);

    let fresh = factory.create_model().unwrap();
    assert_ne!(fresh.handle().unwrap().generation(), old_generation);
    assert!(matches!(stale.calculate_q(Some(&[0.1])), Err(Error::UnknownHandle)));
    assert_eq!(fresh.calculate_q(Some(&[0.1])).unwrap().len(), 1);
}

#[test]
fn test_foreign_model_rejected() {
    let ours = loaded(common::full_module()).unwrap();
    let theirs = loaded(common::full_module()).unwrap();
    let mut model = theirs.create_model().unwrap();
    take_calls();

    assert!(matches!(ours.calculate_q(&model, Some(&[0.1])), Err(Error::UnknownHandle)));
    assert!(matches!(ours.destroy_model(&mut model), Err(Error::UnknownHandle)));
    assert!(take_calls().is_empty());
    assert!(!model.is_destroyed());
}

#[test]
fn test_factory_outlives_clones_until_last_model() {
    let factory = loaded(common::full_module()).unwrap();
    let model = factory.create_model().unwrap();
    drop(factory);

    // The model keeps the module loaded.
    assert_eq!(model.calculate_vr().unwrap(), 1.0);
    let handle = model.factory().unwrap().clone();
    drop(model);
    assert_eq!(handle.live_models(), 0);
    assert!(handle.is_loaded());
}
