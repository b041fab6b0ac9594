//! Core types for the stoat deep-learning engine: the flat `Tensor`
//! buffer, `Shape`, the `Device` placement tag, the library-wide error
//! type, and parameter initializers.
//!
//! Everything above this crate (layer graphs, nets, optimizers) consumes
//! tensors through the narrow kernel API defined here. The kernels are
//! deliberately plain loops; placement on GPU/FPGA devices is a tag that
//! drives synchronization policy, not a dispatch table.

pub mod device;
pub mod error;
pub mod init;
pub mod shape;
pub mod tensor;

pub use device::Device;
pub use error::{Error, Result};
pub use shape::Shape;
pub use tensor::Tensor;
