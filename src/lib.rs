//! # sasplugin
//!
//! Host-side bridge to native small-angle scattering model modules.
//!
//! A model module is a shared library exporting a C ABI: a static model
//! descriptor, create/destroy entry points and intensity calculations.
//! This crate loads such modules, checks their ABI version, marshals
//! parameter values (scalars and weighted polydispersity distributions)
//! into the module's tagged-union wire format and dispatches calculations,
//! while tracking every live native model so a module is never unloaded
//! underneath one.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sasplugin::prelude::*;
//!
//! let factory = unsafe { PluginModelFactory::open("libsphere_model.so")? };
//! let info = factory.get_model_info()?;
//! println!("{}: {} parameters", info.name(), info.parameters().len());
//!
//! let mut model = factory.create_model()?;
//! model.set_parameter("radius", Distribution::uniform(vec![55.0, 60.0, 65.0]))?;
//! let iq = model.calculate_q(Some(&[0.001, 0.01, 0.1]))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod model;
pub mod observability;
pub mod plugin;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::model::{
        Calculation, Distribution, ModelDescriptor, ParameterFlags, ParameterSet, ParameterValue,
        PluginModel, PluginModelFactory,
    };
    pub use crate::plugin::{LoaderConfig, ModelRegistry};
}

pub use error::{Error, Result};
