//! Loading native model modules.
//!
//! A model module is a shared library (`.so`, `.dll` or `.dylib`) that
//! exports a fixed set of C entry points:
//!
//! ```c
//! ModelInfo* get_model_info();
//! void*  create_model(void* data);
//! void   destroy_model(void* model);
//! void   calculate_q(void* model, Parameter** params, size_t n, double* iq, double* q);
//! void   calculate_qxqy(void* model, Parameter** params, size_t n,
//!                       double* iq, double* qx, double* qy);
//! void   calculate_qxqyqz(...);
//! double calculate_ER(void* model, Parameter** params);
//! double calculate_VR(void* model, Parameter** params);
//! ```
//!
//! `calculate_qxqy` and `calculate_qxqyqz` are optional. The record layouts
//! live in [`abi`]; Rust modules can use [`declare_model!`](crate::declare_model)
//! to export their descriptor.

pub mod abi;
pub mod library;
mod loader;
mod registry;

pub use library::{LibraryHandle, NativeModule, StaticModule};
pub use loader::{LoaderConfig, MODEL_PATH_ENV};
pub use registry::ModelRegistry;
