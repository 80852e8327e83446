//! Remote generation collaborator.
//!
//! One operation: render a compiled prompt into an [`AudioHandle`]. The
//! service makes no idempotency promise for identical inputs, which is
//! exactly why the client-side [`crate::cache::GenerationCache`] exists.

use std::future::Future;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::audio::AudioHandle;
use crate::prompt::CompiledPrompt;
use crate::Result;

/// Asynchronous AI rendering service.
///
/// Implementations are shared with a spawned task per call, hence the
/// `Send + Sync + 'static` bound and the `Send` future.
pub trait RemoteGenerationService: Send + Sync + 'static {
    /// Render `prompt` into roughly `duration_s` seconds of audio.
    fn generate(
        &self,
        prompt: &str,
        duration_s: f64,
    ) -> impl Future<Output = Result<AudioHandle>> + Send;
}

/// A successfully rendered segment. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSegment {
    /// Engine-scoped id, unique for the lifetime of the engine instance.
    pub id: u64,
    pub prompt: CompiledPrompt,
    pub handle: AudioHandle,
    pub created_at: SystemTime,
}

impl GeneratedSegment {
    pub fn cache_key(&self) -> &str {
        &self.prompt.cache_key
    }
}
