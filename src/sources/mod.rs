//! Input source module: discovery, the cycling ring, and switching
//!
//! The registry filters and orders what the provider reports; the
//! executor is the only place that asks the OS to change sources.

mod executor;
mod provider;
mod registry;
mod source;

pub use executor::{SwitchError, SwitchExecutor};
pub use provider::{ActivationError, InputSourceProvider};
pub use registry::SourceRegistry;
pub use source::{InputSource, SourceCategory, SourceId, SourceKind};

#[cfg(test)]
pub use provider::fake;
