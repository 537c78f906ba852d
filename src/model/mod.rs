//! Plugin models: descriptors, parameter values and the factory bridge.
//!
//! A [`PluginModelFactory`] owns one loaded native module. It reads the
//! module's [`ModelDescriptor`] once at load time, hands out
//! [`PluginModel`]s, and forwards every calculation to the module with the
//! model's parameters encoded by [`wire`].
//!
//! ```ignore
//! use sasplugin::model::PluginModelFactory;
//!
//! let factory = unsafe { PluginModelFactory::open("libsphere_model.so")? };
//! let mut model = factory.create_model()?;
//! model.set_parameter("radius", 60.0)?;
//! let iq = model.calculate_q(Some(&[0.001, 0.01, 0.1]))?;
//! ```

mod descriptor;
mod factory;
mod parameters;
mod plugin_model;
pub mod wire;

pub use descriptor::{ModelDescriptor, ParameterDescriptor, ParameterFlags};
pub use factory::{Calculation, NativeModelHandle, PluginModelFactory};
pub use parameters::{Distribution, ParameterSet, ParameterValue};
pub use plugin_model::PluginModel;
