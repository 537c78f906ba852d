//! C-compatible records and entry points shared with native model modules.
//!
//! A conforming module exports the symbols listed in [`symbols`]. The info
//! record and every parameter record are laid out exactly as the structs in
//! this module; all word-sized fields are `size_t` on the native side.

use std::ffi::{CStr, c_char, c_void};

/// ABI version understood by this bridge. Modules must report exactly this.
pub const API_VERSION: usize = 1;

/// Names of the entry points a module may export.
pub mod symbols {
    use std::ffi::CStr;

    /// `() -> *const RawModelInfo`
    pub const GET_MODEL_INFO: &CStr = c"get_model_info";
    /// `(data) -> handle`
    pub const CREATE_MODEL: &CStr = c"create_model";
    /// `(handle)`
    pub const DESTROY_MODEL: &CStr = c"destroy_model";
    /// `(handle, params, n, iq, q)`
    pub const CALCULATE_Q: &CStr = c"calculate_q";
    /// `(handle, params, n, iq, qx, qy)`
    pub const CALCULATE_QXQY: &CStr = c"calculate_qxqy";
    /// `(handle, params, n, iq, qx, qy, qz)`
    pub const CALCULATE_QXQYQZ: &CStr = c"calculate_qxqyqz";
    /// `(handle, params) -> double`
    pub const CALCULATE_ER: &CStr = c"calculate_ER";
    /// `(handle, params) -> double`
    pub const CALCULATE_VR: &CStr = c"calculate_VR";
}

/// Returns a pointer to the module's static info record.
pub type GetModelInfoFn = unsafe extern "C" fn() -> *const RawModelInfo;

/// Instantiates a native model. `data` is opaque and may be null.
pub type CreateModelFn = unsafe extern "C" fn(data: *mut c_void) -> *mut c_void;

/// Releases a native model created by [`CreateModelFn`].
pub type DestroyModelFn = unsafe extern "C" fn(model: *mut c_void);

/// I(q) for `n` points.
pub type CalculateQFn = unsafe extern "C" fn(
    model: *mut c_void,
    parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    q: *const f64,
);

/// I(qx, qy) for `n` points.
pub type CalculateQxQyFn = unsafe extern "C" fn(
    model: *mut c_void,
    parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    qx: *const f64,
    qy: *const f64,
);

/// I(qx, qy, qz) for `n` points.
pub type CalculateQxQyQzFn = unsafe extern "C" fn(
    model: *mut c_void,
    parameters: *const *const c_void,
    n: usize,
    iq: *mut f64,
    qx: *const f64,
    qy: *const f64,
    qz: *const f64,
);

/// Effective radius or volume ratio.
pub type CalculateScalarFn =
    unsafe extern "C" fn(model: *mut c_void, parameters: *const *const c_void) -> f64;

/// Discriminator at the start of every parameter wire record.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireTag {
    /// Terminates the parameter array.
    End = 0x0000_0000,
    /// [`SimpleParameter`].
    Simple = 0xAAAA_AAA1,
    /// [`PolydisperseParameter`].
    Polydisperse = 0xAAAA_AAA2,
}

impl WireTag {
    /// Map a raw discriminator back to a tag.
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0x0000_0000 => Some(Self::End),
            0xAAAA_AAA1 => Some(Self::Simple),
            0xAAAA_AAA2 => Some(Self::Polydisperse),
            _ => None,
        }
    }
}

/// Per-parameter record inside [`RawModelInfo`].
#[repr(C)]
#[derive(Debug)]
pub struct RawParameterInfo {
    /// Null-terminated parameter name. Must not be null.
    pub name: *const c_char,
    /// Null-terminated description, may be null.
    pub description: *const c_char,
    /// Null-terminated unit, may be null.
    pub unit: *const c_char,
    /// Default value.
    pub default: f64,
    /// Lower display bound.
    pub dispmin: f64,
    /// Upper display bound.
    pub dispmax: f64,
    /// Capability flag bitmask.
    pub flags: usize,
}

// SAFETY: RawParameterInfo only points at static, immutable strings.
unsafe impl Send for RawParameterInfo {}
unsafe impl Sync for RawParameterInfo {}

impl RawParameterInfo {
    /// Build a record from static strings.
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        name: &'static CStr,
        description: &'static CStr,
        unit: &'static CStr,
        default: f64,
        dispmin: f64,
        dispmax: f64,
        flags: usize,
    ) -> Self {
        Self {
            name: name.as_ptr(),
            description: description.as_ptr(),
            unit: unit.as_ptr(),
            default,
            dispmin,
            dispmax,
            flags,
        }
    }
}

/// Model-level record returned by `get_model_info`.
#[repr(C)]
#[derive(Debug)]
pub struct RawModelInfo {
    /// ABI version - must equal [`API_VERSION`].
    pub version: usize,
    /// Null-terminated model name.
    pub name: *const c_char,
    /// Null-terminated description, may be null.
    pub description: *const c_char,
    /// Number of entries in `parameters`.
    pub parameter_count: usize,
    /// Array of `parameter_count` parameter records.
    pub parameters: *const RawParameterInfo,
}

// SAFETY: RawModelInfo only points at static, immutable data.
unsafe impl Send for RawModelInfo {}
unsafe impl Sync for RawModelInfo {}

impl RawModelInfo {
    /// Build a record at the current [`API_VERSION`].
    pub const fn new(
        name: &'static CStr,
        description: &'static CStr,
        parameters: &'static [RawParameterInfo],
    ) -> Self {
        Self {
            version: API_VERSION,
            name: name.as_ptr(),
            description: description.as_ptr(),
            parameter_count: parameters.len(),
            parameters: parameters.as_ptr(),
        }
    }

    /// Override the reported ABI version.
    pub const fn with_version(mut self, version: usize) -> Self {
        self.version = version;
        self
    }

    /// Get the slice of parameter records.
    ///
    /// # Safety
    ///
    /// `parameters` must point to `parameter_count` valid records.
    pub unsafe fn parameters(&self) -> &[RawParameterInfo] {
        if self.parameters.is_null() || self.parameter_count == 0 {
            &[]
        } else {
            // SAFETY: Caller guarantees `parameters` points to a valid array.
            unsafe { std::slice::from_raw_parts(self.parameters, self.parameter_count) }
        }
    }
}

/// Wire record terminating the parameter array.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EndParameter {
    /// Always [`WireTag::End`].
    pub tag: usize,
}

/// Wire record for a parameter carrying one value.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SimpleParameter {
    /// Always [`WireTag::Simple`].
    pub tag: usize,
    /// The value.
    pub value: f64,
}

/// Wire record for a parameter carrying a weighted distribution.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PolydisperseParameter {
    /// Always [`WireTag::Polydisperse`].
    pub tag: usize,
    /// Number of elements in both `values` and `weights`.
    pub length: usize,
    /// Sample values.
    pub values: *const f64,
    /// Weights, one per sample value.
    pub weights: *const f64,
}

/// Emit a static model info record and its `get_model_info` export.
///
/// Intended for modules written in Rust. Flags are
/// [`ParameterFlags`](crate::model::ParameterFlags) values.
///
/// # Example
///
/// ```ignore
/// use sasplugin::model::ParameterFlags;
///
/// sasplugin::declare_model! {
///     name: "Sphere",
///     description: "P(q) = analytic sphere + bkg",
///     parameters: [
///         { name: "scale", description: "scale factor", unit: "",
///           default: 1.0, min: 0.0, max: f64::INFINITY, flags: ParameterFlags::NONE },
///         { name: "radius", description: "radius of sphere", unit: "A",
///           default: 20.0, min: 0.0, max: f64::INFINITY, flags: ParameterFlags::POLYDISPERSE },
///     ]
/// }
/// ```
#[macro_export]
macro_rules! declare_model {
    (
        name: $name:literal,
        description: $desc:literal,
        parameters: [
            $(
                {
                    name: $p_name:literal,
                    description: $p_desc:literal,
                    unit: $p_unit:literal,
                    default: $p_default:expr,
                    min: $p_min:expr,
                    max: $p_max:expr,
                    flags: $p_flags:expr $(,)?
                }
            ),* $(,)?
        ]
    ) => {
        const __SASPLUGIN_PARAMETERS: &[$crate::plugin::abi::RawParameterInfo] = &[
            $(
                $crate::plugin::abi::RawParameterInfo::new(
                    $crate::__static_cstr!($p_name),
                    $crate::__static_cstr!($p_desc),
                    $crate::__static_cstr!($p_unit),
                    $p_default,
                    $p_min,
                    $p_max,
                    $crate::model::ParameterFlags::bits($p_flags),
                ),
            )*
        ];

        static __SASPLUGIN_MODEL_INFO: $crate::plugin::abi::RawModelInfo =
            $crate::plugin::abi::RawModelInfo::new(
                $crate::__static_cstr!($name),
                $crate::__static_cstr!($desc),
                __SASPLUGIN_PARAMETERS,
            );

        /// Module info entry point.
        #[unsafe(no_mangle)]
        pub extern "C" fn get_model_info() -> *const $crate::plugin::abi::RawModelInfo {
            &__SASPLUGIN_MODEL_INFO
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __static_cstr {
    ($s:literal) => {
        match ::std::ffi::CStr::from_bytes_with_nul(concat!($s, "\0").as_bytes()) {
            Ok(s) => s,
            Err(_) => panic!("string literal contains an interior nul"),
        }
    };
}
