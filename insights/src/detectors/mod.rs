//! The three scoring detectors.
//!
//! Each detector holds its typed settings, optionally binds to a trained
//! remote model, and always keeps a deterministic rule-based path. A
//! provider failure is logged and absorbed by the fallback; it never
//! surfaces as a scoring failure.

pub mod dropout;
pub mod quality;
pub mod sentiment;

pub use dropout::DropoutDetector;
pub use quality::QualityDetector;
pub use sentiment::SentimentAnalyzer;

use crate::providers::ModelProvider;
use std::sync::Arc;
use std::time::Duration;

/// Marker used as `model_version` on results produced by a rule-based path.
pub const RULE_BASED: &str = "rule-based";

/// A detector's handle onto a remote model.
#[derive(Clone)]
pub struct ProviderBinding {
    pub provider: Arc<dyn ModelProvider>,
    pub model_name: String,
    /// Per-config ceiling for a single scoring call.
    pub timeout: Duration,
}
