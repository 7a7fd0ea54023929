//! Supervisor configuration.
//!
//! - `settings` - `SupervisorConfig`, `Credentials`, `Timings`
//! - `duration` - human duration strings
//! - `env` - environment overrides
//! - `parser` - `vsup.yaml` discovery and loading

mod duration;
mod env;
mod parser;
mod settings;

pub use duration::*;
pub use parser::*;
pub use settings::*;
