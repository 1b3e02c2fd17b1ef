//! Refract passes — backend optimizations over the refract operation graph
//!
//! Currently home to the speculative early-exit optimization
//! ([`early_out`]): a CFG transformation that guards expensive computation
//! behind a runtime zero-check when a recognized pattern proves the result
//! is zero whenever a small seed set of values is zero.
//!
//! Passes receive all configuration as explicit values ([`EarlyOutConfig`])
//! and share nothing across function boundaries except read-only
//! configuration and advisory statistics.

pub mod config;
pub mod early_out;

pub use config::{EarlyOutConfig, PatternMask, ShaderStage};
pub use early_out::{EarlyOut, EarlyOutStats};
