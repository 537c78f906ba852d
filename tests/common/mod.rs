//! In-process mock model modules for integration tests.
//!
//! The mock implements I(q) = scale * q + background, ER as the weighted
//! mean radius and VR = 1. Every native call is logged to a thread-local
//! recorder so tests can check exactly what crossed the boundary.

#![allow(dead_code)]

use sasplugin::model::{ParameterValue, wire};
use sasplugin::plugin::StaticModule;
use sasplugin::plugin::abi::{RawModelInfo, RawParameterInfo, symbols};
use std::cell::RefCell;
use std::ffi::c_void;
use std::ptr;

/// One recorded native call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create,
    Destroy,
    Q {
        points: usize,
        null_buffers: bool,
        parameters: Vec<ParameterValue>,
    },
    QxQy {
        points: usize,
        null_buffers: bool,
    },
    QxQyQz {
        points: usize,
        null_buffers: bool,
    },
    EffectiveRadius {
        parameters: Vec<ParameterValue>,
    },
    VolumeRatio,
}

thread_local! {
    static CALLS: RefCell<Vec<Call>> = const { RefCell::new(Vec::new()) };
    static LIVE: RefCell<usize> = const { RefCell::new(0) };
}

fn record(call: Call) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

/// Drain the calls recorded on this thread.
pub fn take_calls() -> Vec<Call> {
    CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
}

/// Number of native mock instances alive on this thread.
pub fn live_instances() -> usize {
    LIVE.with(|live| *live.borrow())
}

const PARAMETERS: &[RawParameterInfo] = &[
    RawParameterInfo::new(c"scale", c"scale factor", c"", 1.0, 0.0, f64::INFINITY, 0),
    RawParameterInfo::new(c"radius", c"radius", c"A", 20.0, 0.0, f64::INFINITY, 0x10),
    RawParameterInfo::new(c"background", c"flat background", c"1/cm", 0.0, 0.0, 1.0, 0),
];

static INFO: RawModelInfo = RawModelInfo::new(c"Mock", c"linear mock model", PARAMETERS);
static OTHER_INFO: RawModelInfo = RawModelInfo::new(c"Other", c"second mock model", PARAMETERS);
static INFO_V2: RawModelInfo =
    RawModelInfo::new(c"Future", c"from a newer ABI", PARAMETERS).with_version(2);

unsafe extern "C" fn get_info() -> *const RawModelInfo {
    &INFO
}

unsafe extern "C" fn get_other_info() -> *const RawModelInfo {
    &OTHER_INFO
}

unsafe extern "C" fn get_info_v2() -> *const RawModelInfo {
    &INFO_V2
}

unsafe extern "C" fn get_null_info() -> *const RawModelInfo {
    ptr::null()
}

struct Instance {
    _payload: [u8; 16],
}

unsafe extern "C" fn create(_data: *mut c_void) -> *mut c_void {
    record(Call::Create);
    LIVE.with(|live| *live.borrow_mut() += 1);
    Box::into_raw(Box::new(Instance { _payload: [0; 16] })) as *mut c_void
}

unsafe extern "C" fn create_null(_data: *mut c_void) -> *mut c_void {
    record(Call::Create);
    ptr::null_mut()
}

unsafe extern "C" fn destroy(model: *mut c_void) {
    record(Call::Destroy);
    LIVE.with(|live| {
        let mut live = live.borrow_mut();
        *live = live.saturating_sub(1);
    });
    // SAFETY: Only handles from `create` reach here.
    drop(unsafe { Box::from_raw(model as *mut Instance) });
}

fn decode(parameters: *const *const c_void) -> Vec<ParameterValue> {
    // SAFETY: The host always passes a terminated array.
    unsafe { wire::decode(parameters) }.unwrap_or_default()
}

fn scalar(values: &[ParameterValue], index: usize) -> f64 {
    values.get(index).and_then(ParameterValue::as_simple).unwrap_or(0.0)
}

unsafe extern "C" fn calculate_q(
    _model: *mut c_void,
    parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    q: *const f64,
) {
    let values = decode(parameters);
    let (scale, background) = (scalar(&values, 0), scalar(&values, 2));
    for i in 0..n {
        // SAFETY: The host guarantees `n` elements in both buffers.
        unsafe { *iq.add(i) = scale * *q.add(i) + background };
    }
    record(Call::Q {
        points: n,
        null_buffers: iq.is_null() && q.is_null(),
        parameters: values,
    });
}

unsafe extern "C" fn calculate_qxqy(
    _model: *mut c_void,
    _parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    qx: *const f64,
    qy: *const f64,
) {
    for i in 0..n {
        // SAFETY: The host guarantees `n` elements in every buffer.
        unsafe { *iq.add(i) = (*qx.add(i)).hypot(*qy.add(i)) };
    }
    record(Call::QxQy {
        points: n,
        null_buffers: iq.is_null() && qx.is_null() && qy.is_null(),
    });
}

unsafe extern "C" fn calculate_qxqyqz(
    _model: *mut c_void,
    _parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    qx: *const f64,
    qy: *const f64,
    qz: *const f64,
) {
    for i in 0..n {
        // SAFETY: The host guarantees `n` elements in every buffer.
        unsafe { *iq.add(i) = *qx.add(i) + *qy.add(i) + *qz.add(i) };
    }
    record(Call::QxQyQz {
        points: n,
        null_buffers: iq.is_null() && qx.is_null() && qy.is_null() && qz.is_null(),
    });
}

unsafe extern "C" fn calculate_er(_model: *mut c_void, parameters: *const *const c_void) -> f64 {
    let values = decode(parameters);
    let radius = values
        .get(1)
        .map(ParameterValue::to_distribution)
        .map(|d| {
            let norm: f64 = d.weights.iter().sum();
            let sum: f64 = d.values.iter().zip(&d.weights).map(|(v, w)| v * w).sum();
            sum / norm
        })
        .unwrap_or(0.0);
    record(Call::EffectiveRadius { parameters: values });
    radius
}

unsafe extern "C" fn calculate_vr(_model: *mut c_void, _parameters: *const *const c_void) -> f64 {
    record(Call::VolumeRatio);
    1.0
}

/// A module exporting every entry point.
pub fn full_module() -> StaticModule {
    StaticModule::new("mock")
        .with_get_model_info(get_info)
        .with_create_model(create)
        .with_destroy_model(destroy)
        .with_calculate_q(calculate_q)
        .with_calculate_qxqy(calculate_qxqy)
        .with_calculate_qxqyqz(calculate_qxqyqz)
        .with_calculate_er(calculate_er)
        .with_calculate_vr(calculate_vr)
}

/// A module exporting only the required entry points.
pub fn required_only_module() -> StaticModule {
    full_module()
        .without(symbols::CALCULATE_QXQY)
        .without(symbols::CALCULATE_QXQYQZ)
}

/// Same entry points, reporting the model name "Other".
pub fn other_module() -> StaticModule {
    full_module().with_get_model_info(get_other_info)
}

/// A module reporting ABI version 2.
pub fn future_abi_module() -> StaticModule {
    full_module().with_get_model_info(get_info_v2)
}

/// A module whose info export returns null.
pub fn null_info_module() -> StaticModule {
    full_module().with_get_model_info(get_null_info)
}

/// A module whose create entry point always fails.
pub fn failing_create_module() -> StaticModule {
    full_module().with_create_model(create_null)
}
