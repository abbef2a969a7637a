//! OnDrift Conflict - Conflict detection and resolution
//!
//! Provides:
//! - Hash-based conflict detection
//! - Configurable resolution strategies
//! - Automatic resolution for configured patterns
//! - Manual resolution UI integration

pub mod detector;
pub mod error;
pub mod namer;
pub mod policy;
pub mod resolver;
pub mod use_cases;

pub use detector::{ConflictDetector, DetectionResult};
pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use policy::{ConflictRule, PolicyEngine};
pub use resolver::{BatchResult, ConflictResolver};
pub use use_cases::{DetectConflictUseCase, ResolveConflictUseCase};
