//! Domain models for the Fourier verifier.
//!
//! - `RunRequest`: immutable input of one run
//! - `CodeArtifacts`: validated output of the translation stage
//! - `FourierError`: crate-level error taxonomy

pub mod artifacts;
pub mod error;
pub mod request;

pub use artifacts::{CodeArtifacts, Coefficients, Reconstruction};
pub use error::{FourierError, Result, TranslationError};
pub use request::RunRequest;
