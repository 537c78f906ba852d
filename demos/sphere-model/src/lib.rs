//! Sphere form factor packaged as a native model module.
//!
//! Build with `cargo build -p sphere-model` and point a
//! [`PluginModelFactory`](sasplugin::model::PluginModelFactory) at the
//! resulting `libsphere_model.so` (or `sphere_model.dll`). The module
//! exports 1-D and 2-D intensities, the effective radius and the volume
//! ratio; it deliberately leaves out `calculate_qxqyqz`.

use sasplugin::model::{Distribution, ModelDescriptor, ParameterFlags, wire};
use std::f64::consts::PI;
use std::ffi::c_void;
use std::slice;
use std::sync::OnceLock;

sasplugin::declare_model! {
    name: "Sphere",
    description: "P(q) = analytic sphere + bkg",
    parameters: [
        { name: "scale", description: "scale factor", unit: "",
          default: 1.0, min: 0.0, max: f64::INFINITY, flags: ParameterFlags::NONE },
        { name: "radius", description: "radius of sphere", unit: "A",
          default: 20.0, min: 0.0, max: f64::INFINITY, flags: ParameterFlags::POLYDISPERSE },
        { name: "sldSph", description: "sphere SLD", unit: "1/A^2",
          default: 4.0e-6, min: -10.0e-6, max: 20.0e-6, flags: ParameterFlags::NONE },
        { name: "sldSolv", description: "solvent SLD", unit: "1/A^2",
          default: 4.0e-6, min: -10.0e-6, max: 20.0e-6, flags: ParameterFlags::NONE },
        { name: "background", description: "constant background", unit: "1/cm",
          default: 0.0, min: 0.0, max: f64::INFINITY, flags: ParameterFlags::NONE },
    ]
}

fn descriptor() -> Option<&'static ModelDescriptor> {
    static DESCRIPTOR: OnceLock<Option<ModelDescriptor>> = OnceLock::new();
    DESCRIPTOR
        // SAFETY: Points at this module's own static record.
        .get_or_init(|| unsafe { ModelDescriptor::from_raw(get_model_info()) }.ok())
        .as_ref()
}

/// Normalised sphere form factor in 1/cm, with scale and background left
/// to the caller.
pub fn sphere_form(radius: f64, delta_rho: f64, q: f64) -> f64 {
    let qr = q * radius;
    let bessel = if qr == 0.0 {
        1.0
    } else {
        3.0 * (qr.sin() - qr * qr.cos()) / (qr * qr * qr)
    };
    let volume = 4.0 * PI / 3.0 * radius.powi(3);
    let amplitude = volume * bessel * delta_rho;
    amplitude * amplitude / volume * 1.0e8
}

/// Parameter values decoded from one call.
#[derive(Debug, Clone, PartialEq)]
pub struct SphereParameters {
    /// Scale factor.
    pub scale: f64,
    /// Radius distribution in A.
    pub radius: Distribution,
    /// Sphere SLD minus solvent SLD.
    pub delta_rho: f64,
    /// Flat background in 1/cm.
    pub background: f64,
}

impl SphereParameters {
    /// Decode a host parameter array.
    ///
    /// # Safety
    ///
    /// `parameters` must be null or a terminated wire array.
    pub unsafe fn read(parameters: *const *const c_void) -> Option<Self> {
        let descriptor = descriptor()?;
        // SAFETY: Forwarded caller guarantee.
        let values = unsafe { wire::decode_for(parameters, descriptor) }.ok()?;
        let [scale, radius, sld_sphere, sld_solvent, background] = values.as_slice() else {
            return None;
        };
        Some(Self {
            scale: scale.as_simple()?,
            radius: radius.to_distribution(),
            delta_rho: sld_sphere.as_simple()? - sld_solvent.as_simple()?,
            background: background.as_simple()?,
        })
    }

    /// I(q), averaged over the radius distribution and renormalised by the
    /// mean particle volume.
    pub fn intensity(&self, q: f64) -> f64 {
        let mut sum = 0.0;
        let mut norm = 0.0;
        let mut volume = 0.0;
        for (&r, &w) in self.radius.values.iter().zip(&self.radius.weights) {
            let r3 = r * r * r;
            sum += w * sphere_form(r, self.delta_rho, q) * r3;
            volume += w * r3;
            norm += w;
        }
        if norm == 0.0 {
            return self.background;
        }
        if volume != 0.0 {
            sum /= volume / norm;
        }
        self.scale * sum / norm + self.background
    }

    /// Weighted mean radius.
    pub fn effective_radius(&self) -> f64 {
        let weights = &self.radius.weights;
        let sum: f64 = self.radius.values.iter().zip(weights).map(|(r, w)| r * w).sum();
        let norm: f64 = weights.iter().sum();
        if norm != 0.0 { sum / norm } else { sum }
    }
}

/// Per-instance state.
#[derive(Debug, Default)]
pub struct SphereModel {
    evaluated: u64,
}

impl SphereModel {
    /// Points evaluated by this instance.
    pub fn evaluated(&self) -> u64 {
        self.evaluated
    }
}

/// Allocate a model instance.
#[unsafe(no_mangle)]
pub extern "C" fn create_model(_data: *mut c_void) -> *mut c_void {
    Box::into_raw(Box::<SphereModel>::default()) as *mut c_void
}

/// Free a model instance.
///
/// # Safety
///
/// `model` must come from [`create_model`] and not be freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn destroy_model(model: *mut c_void) {
    if !model.is_null() {
        // SAFETY: Caller guarantees `model` is a live instance.
        drop(unsafe { Box::from_raw(model as *mut SphereModel) });
    }
}

/// # Safety
///
/// `model` must be null or a live instance.
unsafe fn record(model: *mut c_void, points: usize) {
    // SAFETY: Caller guarantees `model` is null or live.
    if let Some(model) = unsafe { (model as *mut SphereModel).as_mut() } {
        model.evaluated += points as u64;
    }
}

/// I(q) for `n` points.
///
/// # Safety
///
/// Host calling convention: `iq` and `q` hold `n` elements or are null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn calculate_q(
    model: *mut c_void,
    parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    q: *const f64,
) {
    // SAFETY: Forwarded caller guarantee.
    let Some(p) = (unsafe { SphereParameters::read(parameters) }) else {
        return;
    };
    if n == 0 || iq.is_null() || q.is_null() {
        return;
    }
    // SAFETY: Both buffers hold `n` elements.
    let (iq, q) = unsafe { (slice::from_raw_parts_mut(iq, n), slice::from_raw_parts(q, n)) };
    for (out, &qi) in iq.iter_mut().zip(q) {
        *out = p.intensity(qi);
    }
    // SAFETY: Forwarded caller guarantee.
    unsafe { record(model, n) };
}

/// I(qx, qy) for `n` points. The sphere is isotropic.
///
/// # Safety
///
/// Host calling convention: every buffer holds `n` elements or is null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn calculate_qxqy(
    model: *mut c_void,
    parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    qx: *const f64,
    qy: *const f64,
) {
    // SAFETY: Forwarded caller guarantee.
    let Some(p) = (unsafe { SphereParameters::read(parameters) }) else {
        return;
    };
    if n == 0 || iq.is_null() || qx.is_null() || qy.is_null() {
        return;
    }
    // SAFETY: All buffers hold `n` elements.
    let (iq, qx, qy) = unsafe {
        (
            slice::from_raw_parts_mut(iq, n),
            slice::from_raw_parts(qx, n),
            slice::from_raw_parts(qy, n),
        )
    };
    for ((out, &x), &y) in iq.iter_mut().zip(qx).zip(qy) {
        *out = p.intensity(x.hypot(y));
    }
    // SAFETY: Forwarded caller guarantee.
    unsafe { record(model, n) };
}

/// Effective radius; NaN if the parameters cannot be read.
///
/// # Safety
///
/// `parameters` must be null or a terminated wire array.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn calculate_ER(
    _model: *mut c_void,
    parameters: *const *const c_void,
) -> f64 {
    // SAFETY: Forwarded caller guarantee.
    match unsafe { SphereParameters::read(parameters) } {
        Some(p) => p.effective_radius(),
        None => f64::NAN,
    }
}

/// Volume ratio; always 1 for a solid sphere.
///
/// # Safety
///
/// `parameters` must be null or a terminated wire array.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn calculate_VR(
    _model: *mut c_void,
    parameters: *const *const c_void,
) -> f64 {
    if parameters.is_null() {
        return f64::NAN;
    }
    1.0
}
