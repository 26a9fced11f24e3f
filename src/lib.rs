extern crate alloc;

// Alias burn-core as `burn` so derive macros and internal paths match expectations.
use burn_core as burn;

pub mod error;
pub mod config;
pub mod cache;
pub mod inputs;
pub mod wrapper;
pub mod attention;
pub mod models;
pub mod sampling;
pub mod sequences;
pub mod generate;

pub use cache::{GeneratorState, PastState};
pub use config::{MaskDType, PadToken, WrapperConfig};
pub use error::{Result, WrapperError};
pub use inputs::{preprocess_inputs, ModelInputs};
pub use wrapper::{CausalLm, ForwardOutput, ModelWrapper};
