//! Encoding parameter sets into the tagged-union array modules consume.
//!
//! The array handed to a calculation entry point is a sequence of pointers,
//! one per declared parameter, each pointing at a [`SimpleParameter`] or a
//! [`PolydisperseParameter`], followed by a pointer to an [`EndParameter`].
//! The encoded form only lives for the duration of one native call.

use super::descriptor::ModelDescriptor;
use super::parameters::{Distribution, ParameterSet, ParameterValue};
use crate::error::{Error, Result};
use crate::plugin::abi::{EndParameter, PolydisperseParameter, SimpleParameter, WireTag};
use std::ffi::c_void;

/// One heap-pinned wire record.
///
/// Boxed so the addresses handed out stay valid when the record list moves.
enum Record {
    End(Box<EndParameter>),
    Simple(Box<SimpleParameter>),
    Polydisperse {
        header: Box<PolydisperseParameter>,
        // Referenced by `header`.
        _values: Box<[f64]>,
        _weights: Box<[f64]>,
    },
}

impl Record {
    fn as_ptr(&self) -> *const c_void {
        match self {
            Record::End(record) => &**record as *const EndParameter as *const c_void,
            Record::Simple(record) => &**record as *const SimpleParameter as *const c_void,
            Record::Polydisperse { header, .. } => {
                &**header as *const PolydisperseParameter as *const c_void
            }
        }
    }
}

/// A parameter array ready to be passed to a calculation entry point.
pub struct EncodedParameters {
    _records: Vec<Record>,
    pointers: Box<[*const c_void]>,
}

impl EncodedParameters {
    /// Pointer to the first element of the pointer array.
    ///
    /// Valid for as long as `self` is alive.
    pub fn as_ptr(&self) -> *const *const c_void {
        self.pointers.as_ptr()
    }

    /// Number of records including the `End` terminator.
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    /// Always false: the terminator is always present.
    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}

impl std::fmt::Debug for EncodedParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedParameters")
            .field("records", &self.pointers.len())
            .finish()
    }
}

/// Encode `parameters` in the declaration order of `descriptor`.
///
/// A scalar assigned to a polydisperse parameter is sent as a single point
/// with weight `1.0`. A distribution assigned to a non-polydisperse
/// parameter, or a distribution whose arrays differ in length, is rejected
/// with [`Error::InvalidValue`].
pub fn encode(
    descriptor: &ModelDescriptor,
    parameters: &ParameterSet,
) -> Result<EncodedParameters> {
    let mut records = Vec::with_capacity(descriptor.parameters().len() + 1);

    for parameter in descriptor.parameters() {
        let value = parameters.get(&parameter.name)?;
        let record = if parameter.is_polydisperse() {
            match value {
                ParameterValue::Simple(v) => polydisperse_record(&Distribution::single(*v)),
                ParameterValue::Polydisperse(distribution) => {
                    distribution.check().map_err(|reason| Error::InvalidValue {
                        parameter: parameter.name.clone(),
                        reason,
                    })?;
                    polydisperse_record(distribution)
                }
            }
        } else {
            match value {
                ParameterValue::Simple(v) => Record::Simple(Box::new(SimpleParameter {
                    tag: WireTag::Simple as usize,
                    value: *v,
                })),
                ParameterValue::Polydisperse(_) => {
                    return Err(Error::InvalidValue {
                        parameter: parameter.name.clone(),
                        reason: "parameter does not accept a distribution",
                    });
                }
            }
        };
        records.push(record);
    }

    records.push(Record::End(Box::new(EndParameter {
        tag: WireTag::End as usize,
    })));

    let pointers = records.iter().map(Record::as_ptr).collect();
    Ok(EncodedParameters {
        _records: records,
        pointers,
    })
}

fn polydisperse_record(distribution: &Distribution) -> Record {
    let values: Box<[f64]> = distribution.values.as_slice().into();
    let weights: Box<[f64]> = distribution.weights.as_slice().into();
    let header = Box::new(PolydisperseParameter {
        tag: WireTag::Polydisperse as usize,
        length: values.len(),
        values: values.as_ptr(),
        weights: weights.as_ptr(),
    });
    Record::Polydisperse {
        header,
        _values: values,
        _weights: weights,
    }
}

/// Read a parameter array back into host values, stopping at `End`.
///
/// A null array decodes to no values.
///
/// # Safety
///
/// `parameters` must be null or point to a pointer array terminated by an
/// `End` record, with every record laid out as in [`crate::plugin::abi`].
pub unsafe fn decode(parameters: *const *const c_void) -> Result<Vec<ParameterValue>> {
    let mut values = Vec::new();
    if parameters.is_null() {
        return Ok(values);
    }

    for i in 0.. {
        // SAFETY: Caller guarantees the array is terminated, so every index
        // up to and including the terminator is in bounds.
        let record = unsafe { *parameters.add(i) };
        if record.is_null() {
            break;
        }

        // SAFETY: Every record starts with a word-sized tag.
        let tag = unsafe { *(record as *const usize) };
        match WireTag::from_raw(tag) {
            Some(WireTag::End) => break,
            Some(WireTag::Simple) => {
                // SAFETY: The tag identifies the record layout.
                let simple = unsafe { &*(record as *const SimpleParameter) };
                values.push(ParameterValue::Simple(simple.value));
            }
            Some(WireTag::Polydisperse) => {
                // SAFETY: The tag identifies the record layout.
                let header = unsafe { &*(record as *const PolydisperseParameter) };
                // SAFETY: The module contract gives `length` elements in both arrays.
                let (v, w) = unsafe {
                    (
                        slice_or_empty(header.values, header.length),
                        slice_or_empty(header.weights, header.length),
                    )
                };
                values.push(ParameterValue::Polydisperse(Distribution {
                    values: v.to_vec(),
                    weights: w.to_vec(),
                }));
            }
            None => return Err(Error::UnknownWireTag(tag)),
        }
    }

    Ok(values)
}

/// Like [`decode`], and also check the array matches `descriptor`: one
/// record per declared parameter, polydisperse exactly where flagged.
///
/// # Safety
///
/// Same requirements as [`decode`].
pub unsafe fn decode_for(
    parameters: *const *const c_void,
    descriptor: &ModelDescriptor,
) -> Result<Vec<ParameterValue>> {
    // SAFETY: Forwarded caller guarantee.
    let values = unsafe { decode(parameters)? };
    let declared = descriptor.parameters();
    if values.len() != declared.len() {
        return Err(Error::LengthMismatch {
            expected: declared.len(),
            actual: values.len(),
        });
    }

    for (parameter, value) in declared.iter().zip(&values) {
        let polydisperse = matches!(value, ParameterValue::Polydisperse(_));
        if polydisperse != parameter.is_polydisperse() {
            return Err(Error::InvalidValue {
                parameter: parameter.name.clone(),
                reason: "record kind does not match parameter flags",
            });
        }
    }
    Ok(values)
}

/// # Safety
///
/// A non-null `ptr` must point to `len` readable values.
unsafe fn slice_or_empty<'a>(ptr: *const f64, len: usize) -> &'a [f64] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: Caller guarantees `len` readable values.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}
