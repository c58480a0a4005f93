// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod client;
pub mod config;
pub mod connectors;
pub mod converter;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod sighting;
pub mod template;
pub mod transforms;

// ---- Re-exports for stable public API ----
pub use crate::client::{AlertSink, Idmefv2Client};
pub use crate::converter::Converter;
pub use crate::driver::{ConnectorContext, Outcome};
pub use crate::error::{CompileError, EvaluationError, TransformError};
pub use crate::sighting::{SightingCache, SightingConfig};
pub use crate::template::{compile, evaluate, Template, Transform};
