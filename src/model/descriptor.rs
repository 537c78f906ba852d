//! Host-side copies of the native model info record.

use crate::error::{Error, Result};
use crate::plugin::abi::{API_VERSION, RawModelInfo, RawParameterInfo};
use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Capability flags attached to a parameter.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ParameterFlags(usize);

impl ParameterFlags {
    /// No flags.
    pub const NONE: Self = Self(0x00);
    /// Orientation angle.
    pub const ORIENTATION: Self = Self(0x01);
    /// Magnetic parameter.
    pub const MAGNETIC: Self = Self(0x02);
    /// Not a fit parameter.
    pub const UNFITTABLE: Self = Self(0x04);
    /// Integer-valued.
    pub const INTEGER: Self = Self(0x08);
    /// Carries a weighted distribution instead of a single value.
    pub const POLYDISPERSE: Self = Self(0x10);
    /// Multiplicity of repeated parameters (implies unfittable).
    pub const REPEAT_COUNT: Self = Self(0x20 | 0x04);
    /// Repeated according to a repeat count.
    pub const REPEATED: Self = Self(0x40);

    /// Wrap a raw bitmask.
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    /// The raw bitmask.
    pub const fn bits(self) -> usize {
        self.0
    }

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ParameterFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParameterFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ParameterFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ParameterFlags, &str); 7] = [
            (ParameterFlags::REPEAT_COUNT, "REPEAT_COUNT"),
            (ParameterFlags::ORIENTATION, "ORIENTATION"),
            (ParameterFlags::MAGNETIC, "MAGNETIC"),
            (ParameterFlags::UNFITTABLE, "UNFITTABLE"),
            (ParameterFlags::INTEGER, "INTEGER"),
            (ParameterFlags::POLYDISPERSE, "POLYDISPERSE"),
            (ParameterFlags::REPEATED, "REPEATED"),
        ];

        let mut remaining = self.0;
        let mut names = Vec::new();
        for (flag, name) in NAMES {
            if self.contains(flag) && remaining & flag.0 != 0 {
                names.push(name);
                remaining &= !flag.0;
            }
        }
        if remaining != 0 {
            return write!(f, "ParameterFlags({:#x})", self.0);
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "ParameterFlags({})", names.join(" | "))
    }
}

/// Decoded description of one model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    /// Parameter name, unique within the model.
    pub name: String,
    /// Human readable description (empty if the module gave none).
    pub description: String,
    /// Unit string (empty if the module gave none).
    pub unit: String,
    /// Default value.
    pub default: f64,
    /// Lower display bound.
    pub dispmin: f64,
    /// Upper display bound.
    pub dispmax: f64,
    /// Capability flags.
    pub flags: ParameterFlags,
}

impl ParameterDescriptor {
    /// Whether the parameter takes a distribution.
    pub fn is_polydisperse(&self) -> bool {
        self.flags.intersects(ParameterFlags::POLYDISPERSE)
    }

    /// Copy a native parameter record.
    ///
    /// # Safety
    ///
    /// Every non-null string pointer in `raw` must be null-terminated.
    unsafe fn from_raw(raw: &RawParameterInfo) -> Result<Self> {
        if raw.name.is_null() {
            return Err(Error::InvalidDescriptor("parameter name is null".into()));
        }

        // SAFETY: Caller guarantees the strings are valid.
        unsafe {
            Ok(Self {
                name: copy_str(raw.name),
                description: copy_str(raw.description),
                unit: copy_str(raw.unit),
                default: raw.default,
                dispmin: raw.dispmin,
                dispmax: raw.dispmax,
                flags: ParameterFlags::from_bits(raw.flags),
            })
        }
    }
}

/// Decoded, string-owning description of a native model.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    version: usize,
    name: String,
    description: String,
    parameters: Vec<ParameterDescriptor>,
    index: HashMap<String, usize>,
    orientation: Vec<String>,
    magnetic: Vec<String>,
    unfittable: Vec<String>,
    integer: Vec<String>,
    polydisperse: Vec<String>,
}

impl ModelDescriptor {
    /// Build a descriptor, deriving the per-flag name lists.
    ///
    /// Fails if two parameters share a name.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParameterDescriptor>,
    ) -> Result<Self> {
        let mut index = HashMap::with_capacity(parameters.len());
        for (position, parameter) in parameters.iter().enumerate() {
            if index.insert(parameter.name.clone(), position).is_some() {
                return Err(Error::InvalidDescriptor(format!(
                    "duplicate parameter '{}'",
                    parameter.name
                )));
            }
        }

        let names_with = |flag: ParameterFlags| -> Vec<String> {
            parameters
                .iter()
                .filter(|p| p.flags.intersects(flag))
                .map(|p| p.name.clone())
                .collect()
        };

        Ok(Self {
            version: API_VERSION,
            name: name.into(),
            description: description.into(),
            orientation: names_with(ParameterFlags::ORIENTATION),
            magnetic: names_with(ParameterFlags::MAGNETIC),
            unfittable: names_with(ParameterFlags::UNFITTABLE),
            integer: names_with(ParameterFlags::INTEGER),
            polydisperse: names_with(ParameterFlags::POLYDISPERSE),
            parameters,
            index,
        })
    }

    /// Decode the record returned by a module's `get_model_info`.
    ///
    /// Fails with [`Error::IncompatibleAbi`] unless the version equals
    /// [`API_VERSION`]. All strings are copied.
    ///
    /// # Safety
    ///
    /// `raw` must be null or point to a valid [`RawModelInfo`] whose
    /// parameter array holds `parameter_count` records.
    pub unsafe fn from_raw(raw: *const RawModelInfo) -> Result<Self> {
        if raw.is_null() {
            return Err(Error::InvalidDescriptor("model info is null".into()));
        }

        // SAFETY: Non-null, and the caller guarantees validity.
        let info = unsafe { &*raw };
        if info.version != API_VERSION {
            return Err(Error::IncompatibleAbi {
                expected: API_VERSION,
                actual: info.version,
            });
        }
        if info.name.is_null() {
            return Err(Error::InvalidDescriptor("model name is null".into()));
        }
        if info.parameters.is_null() && info.parameter_count != 0 {
            return Err(Error::InvalidDescriptor("parameter array is null".into()));
        }

        // SAFETY: Caller guarantees the array and its strings are valid.
        let parameters = unsafe {
            info.parameters()
                .iter()
                .map(|p| ParameterDescriptor::from_raw(p))
                .collect::<Result<Vec<_>>>()?
        };

        // SAFETY: Name checked non-null above; description may be null.
        let (name, description) = unsafe { (copy_str(info.name), copy_str(info.description)) };
        let mut descriptor = Self::new(name, description, parameters)?;
        descriptor.version = info.version;
        Ok(descriptor)
    }

    /// ABI version reported by the module.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.position(name).map(|i| &self.parameters[i])
    }

    /// Declaration index of a parameter.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Names of orientation parameters.
    pub fn orientation(&self) -> &[String] {
        &self.orientation
    }

    /// Names of magnetic parameters.
    pub fn magnetic(&self) -> &[String] {
        &self.magnetic
    }

    /// Names of unfittable parameters (including repeat counts).
    pub fn unfittable(&self) -> &[String] {
        &self.unfittable
    }

    /// Names of integer parameters.
    pub fn integer(&self) -> &[String] {
        &self.integer
    }

    /// Names of polydisperse parameters.
    pub fn polydisperse(&self) -> &[String] {
        &self.polydisperse
    }
}

/// Copy a possibly-null C string; null becomes empty.
///
/// # Safety
///
/// A non-null `ptr` must be null-terminated.
unsafe fn copy_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        // SAFETY: Caller guarantees the string is null-terminated.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}
