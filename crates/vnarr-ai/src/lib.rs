//! AI collaborators of the narration pipeline.
//!
//! The workflow depends only on the traits in [`traits`]; [`HttpAiClient`]
//! implements all of them against a model service over HTTP.

pub mod error;
pub mod http;
pub mod traits;
pub mod types;

pub use error::{AiError, AiResult};
pub use http::{AiClientConfig, HttpAiClient};
pub use traits::{NarrationWriter, SceneAnalyzer, SpeechSynthesizer};
pub use types::{AnalysisVideo, AnalyzedScene, SynthesizedAudio};
