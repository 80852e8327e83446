//! Live session orchestration.
//!
//! [`LiveSessionController`] is the single source of truth for session
//! state. It owns the parameter registry, the compiled prompt, the
//! generation cache, the regeneration scheduler, the crossfade output and
//! the preview chain, and it is the only component allowed to start, stop
//! or dispose a player.
//!
//! ## Control model
//!
//! Everything runs on one logical control thread. The only concurrent
//! pieces are the armed debounce deadline, gain ramps on the audio clock,
//! and the in-flight remote call, which is spawned onto the runtime and
//! handed back through a oneshot channel that
//! [`tick`](LiveSessionController::tick) polls. Stopping the session marks the in-flight record
//! discard-on-arrival: its eventual result still lands in the cache but
//! never mutates session state or starts a crossfade.
//!
//! ## State machine
//!
//! ```text
//! idle ──start──▶ generating ──ok──▶ playing ◀─────────────┐
//!   ▲                │                  │                  │
//!   │               fail         debounce fires       fade done
//!   │                │                  ▼                  │
//!   │                ▼             generating ──ok──▶ transitioning
//!   └──────────── stop (from any state; cache survives)
//! ```
//!
//! A cache-hit regeneration skips `generating` entirely and goes straight
//! to `transitioning`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::audio::{AudioEngine, AudioHandle};
use crate::cache::{self, GenerationCache};
use crate::channel::{Channel, ChannelPatch, ChannelRegistry, SettingsPatch};
use crate::crossfade::{CrossfadeTransitionManager, DEFAULT_FADE};
use crate::preview::{LocalPreviewSynthesizer, PreviewChain};
use crate::prompt::{self, CompiledPrompt};
use crate::remote::{GeneratedSegment, RemoteGenerationService};
use crate::scheduler::{RegenerationScheduler, DEFAULT_DEBOUNCE};
use crate::store::{Preset, SessionSnapshot};
use crate::{Error, Result};

/// Where the session is in its lifecycle. Owned exclusively by the
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Generating,
    Playing,
    Transitioning,
}

/// Notices surfaced to the embedding UI/daemon. All non-fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LiveStarted,
    GenerationStarted { key: String },
    SegmentReady { key: String, cached: bool },
    CrossfadeStarted,
    NowPlaying { segment_id: u64 },
    GenerationFailed { message: String },
    Stopped,
}

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet window after the last parameter change before regenerating.
    pub debounce: Duration,
    /// Crossfade length between segments.
    pub fade: Duration,
    /// Remote call budget; a timeout is treated as a generation failure.
    pub generation_timeout: Duration,
    /// Generation cache capacity in entries.
    pub cache_capacity: usize,
    /// Played segments kept in the history log.
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            fade: DEFAULT_FADE,
            generation_timeout: Duration::from_secs(120),
            cache_capacity: cache::DEFAULT_CAPACITY,
            history_limit: 10,
        }
    }
}

/// One outstanding remote call.
struct InFlight {
    key: String,
    prompt: CompiledPrompt,
    rx: oneshot::Receiver<Result<AudioHandle>>,
}

pub struct LiveSessionController<R, E, P>
where
    R: RemoteGenerationService,
    E: AudioEngine,
    P: LocalPreviewSynthesizer,
{
    remote: Arc<R>,
    engine: E,
    preview: PreviewChain<P>,
    config: SessionConfig,

    registry: ChannelRegistry,
    /// Recomputed on every mutation, memoized by cache-key equality.
    compiled: CompiledPrompt,

    cache: GenerationCache,
    scheduler: RegenerationScheduler,
    output: CrossfadeTransitionManager<E>,

    state: SessionState,
    current: Option<GeneratedSegment>,
    history: VecDeque<GeneratedSegment>,
    presets: Vec<Preset>,

    in_flight: Option<InFlight>,
    /// Stopped sessions' in-flight calls, kept so late results still land
    /// in the cache.
    discarded: Vec<InFlight>,

    next_segment_id: u64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl<R, E, P> LiveSessionController<R, E, P>
where
    R: RemoteGenerationService,
    E: AudioEngine,
    P: LocalPreviewSynthesizer,
{
    pub fn new(remote: Arc<R>, engine: E, preview: PreviewChain<P>, config: SessionConfig) -> Self {
        let registry = ChannelRegistry::default();
        let compiled = prompt::compile(registry.channels(), registry.settings());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            remote,
            engine,
            preview,
            cache: GenerationCache::with_capacity(config.cache_capacity),
            scheduler: RegenerationScheduler::new(config.debounce),
            output: CrossfadeTransitionManager::new(),
            config,
            registry,
            compiled,
            state: SessionState::Idle,
            current: None,
            history: VecDeque::new(),
            presets: Vec::new(),
            in_flight: None,
            discarded: Vec::new(),
            next_segment_id: 0,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    // ── Observation ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn compiled_prompt(&self) -> &CompiledPrompt {
        &self.compiled
    }

    pub fn current_segment(&self) -> Option<&GeneratedSegment> {
        self.current.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &GeneratedSegment> {
        self.history.iter()
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn cache(&self) -> &GenerationCache {
        &self.cache
    }

    /// Drop every cached segment (the only path besides eviction).
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// The event stream. Yields `Some` once; later calls return `None`.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Next moment the controller wants a [`tick`](Self::tick), if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    // ── Parameter mutation ───────────────────────────────────────────────

    pub fn update_channel(&mut self, id: &str, patch: ChannelPatch) -> Result<()> {
        self.registry.update_channel(id, patch)?;
        self.after_mutation();
        Ok(())
    }

    pub fn replace_channels(&mut self, channels: Vec<Channel>) {
        self.registry.replace_channels(channels);
        self.after_mutation();
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) {
        self.registry.update_settings(patch);
        self.after_mutation();
    }

    /// Capture the current board as a named preset (replacing a same-named
    /// one).
    pub fn save_preset(&mut self, name: &str) {
        let preset = Preset {
            name: name.to_string(),
            channels: self.registry.channels().to_vec(),
            settings: self.registry.settings().clone(),
        };
        if let Some(existing) = self.presets.iter_mut().find(|p| p.name == name) {
            *existing = preset;
        } else {
            self.presets.push(preset);
        }
    }

    /// Apply a named preset through the normal mutation path; debounce and
    /// preview behave exactly as for a manual edit.
    pub fn apply_preset(&mut self, name: &str) -> Result<()> {
        let preset = self
            .presets
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("unknown preset {name:?}")))?;
        self.registry.replace_channels(preset.channels);
        self.registry.set_settings(preset.settings);
        self.after_mutation();
        Ok(())
    }

    /// Recompute the derived prompt and fan the change out.
    ///
    /// The preview synthesizer is reconfigured synchronously. The live path
    /// is only notified when the cache key actually changed; weight
    /// quantization absorbs sub-perceptual knob jitter.
    fn after_mutation(&mut self) {
        self.preview.apply(&self.registry);
        let compiled = prompt::compile(self.registry.channels(), self.registry.settings());
        if compiled.cache_key == self.compiled.cache_key {
            return;
        }
        tracing::debug!(key = %compiled.cache_key, "compiled prompt changed");
        self.compiled = compiled;
        if self.state != SessionState::Idle {
            self.scheduler.note_change(self.compiled.clone(), Instant::now());
        }
    }

    // ── Preview path ─────────────────────────────────────────────────────

    pub fn start_preview(&mut self) {
        self.preview.start(&self.registry);
    }

    pub fn stop_preview(&mut self) {
        self.preview.stop();
    }

    pub fn preview_active(&self) -> bool {
        self.preview.is_active()
    }

    // ── Live session lifecycle ───────────────────────────────────────────

    /// Begin live playback from the current board.
    ///
    /// Fails fast with [`Error::Validation`] when nothing would contribute
    /// to the prompt; the remote service is never called in that case.
    pub async fn start_live_session(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::Validation("live session already running".into()));
        }
        if !self.registry.has_active_channels() {
            return Err(Error::Validation(
                "no enabled channels with a value and weight ≥ 0.1".into(),
            ));
        }

        let prompt = self.compiled.clone();
        tracing::info!(key = %prompt.cache_key, "live session starting");
        self.emit(SessionEvent::LiveStarted);

        if let Some(handle) = self.cache.get(&prompt.cache_key).cloned() {
            tracing::info!("cache hit on session start, no remote call");
            self.emit(SessionEvent::SegmentReady {
                key: prompt.cache_key.clone(),
                cached: true,
            });
            self.apply_segment(prompt, handle).await;
            return Ok(());
        }

        self.state = SessionState::Generating;
        self.emit(SessionEvent::GenerationStarted {
            key: prompt.cache_key.clone(),
        });
        self.spawn_generation(prompt);
        Ok(())
    }

    /// Tear the session down from any state.
    ///
    /// Cancels the armed debounce, marks the in-flight call
    /// discard-on-arrival, disposes both output slots and clears the
    /// current segment. The cache and history survive; the controller can
    /// be restarted.
    pub fn stop_live_session(&mut self) {
        self.scheduler.cancel();
        if let Some(in_flight) = self.in_flight.take() {
            tracing::debug!(key = %in_flight.key, "in-flight generation marked discard-on-arrival");
            self.discarded.push(in_flight);
        }
        self.output.stop_all();
        self.current = None;
        if self.state != SessionState::Idle {
            self.state = SessionState::Idle;
            self.emit(SessionEvent::Stopped);
            tracing::info!("live session stopped");
        }
    }

    /// Advance the session: collect a resolved remote call, then evaluate
    /// the debounce deadline. Call whenever the event loop wakes up (see
    /// [`next_deadline`](Self::next_deadline)).
    pub async fn tick(&mut self) -> Result<()> {
        self.drain_discarded();
        self.poll_in_flight().await?;
        self.poll_scheduler().await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn spawn_generation(&mut self, prompt: CompiledPrompt) {
        let (tx, rx) = oneshot::channel();
        let remote = Arc::clone(&self.remote);
        let duration_s = self.registry.settings().duration_s;
        let budget = self.config.generation_timeout;
        let text = prompt.text.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(budget, remote.generate(&text, duration_s)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Generation(format!(
                    "remote call exceeded {}s budget",
                    budget.as_secs()
                ))),
            };
            // Ignore send errors: the controller may have been dropped.
            let _ = tx.send(result);
        });
        self.in_flight = Some(InFlight {
            key: prompt.cache_key.clone(),
            prompt,
            rx,
        });
    }

    /// Collect results of calls whose session was stopped. They still feed
    /// the cache but never touch session state.
    fn drain_discarded(&mut self) {
        let cache = &mut self.cache;
        self.discarded.retain_mut(|in_flight| match in_flight.rx.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => true,
            Ok(Ok(handle)) => {
                tracing::debug!(key = %in_flight.key, "discarded generation cached for reuse");
                cache.put(&in_flight.key, handle);
                false
            }
            Ok(Err(e)) => {
                tracing::debug!(key = %in_flight.key, error = %e, "discarded generation failed");
                false
            }
            Err(oneshot::error::TryRecvError::Closed) => false,
        });
    }

    async fn poll_in_flight(&mut self) -> Result<()> {
        let Some(mut in_flight) = self.in_flight.take() else {
            return Ok(());
        };
        match in_flight.rx.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => {
                self.in_flight = Some(in_flight);
                Ok(())
            }
            Ok(result) => self.resolve_generation(in_flight, result).await,
            Err(oneshot::error::TryRecvError::Closed) => {
                let gone = Err(Error::Generation("generation task vanished".into()));
                self.resolve_generation(in_flight, gone).await
            }
        }
    }

    async fn resolve_generation(
        &mut self,
        in_flight: InFlight,
        result: Result<AudioHandle>,
    ) -> Result<()> {
        match result {
            Ok(handle) => {
                self.cache.put(&in_flight.key, handle.clone());
                self.emit(SessionEvent::SegmentReady {
                    key: in_flight.key.clone(),
                    cached: false,
                });
                self.apply_segment(in_flight.prompt, handle).await;
            }
            Err(e) => {
                tracing::warn!(key = %in_flight.key, error = %e, "generation failed");
                self.emit(SessionEvent::GenerationFailed {
                    message: e.to_string(),
                });
                // Back to the prior stable state.
                self.state = if self.current.is_some() {
                    SessionState::Playing
                } else {
                    SessionState::Idle
                };
            }
        }
        // A change that arrived mid-flight is waiting; re-evaluate now.
        self.poll_scheduler().await
    }

    async fn poll_scheduler(&mut self) -> Result<()> {
        if self.state == SessionState::Idle {
            return Ok(());
        }
        let busy = self.in_flight.is_some() || self.state == SessionState::Transitioning;
        let current_key = self.current.as_ref().map(|s| s.cache_key());
        let Some(pending) = self.scheduler.poll(Instant::now(), current_key, busy) else {
            return Ok(());
        };

        if let Some(handle) = self.cache.get(&pending.key).cloned() {
            // Fast path: no remote call, no generating state.
            tracing::info!(key = %pending.key, "regeneration served from cache");
            self.emit(SessionEvent::SegmentReady {
                key: pending.key.clone(),
                cached: true,
            });
            self.apply_segment(pending.prompt, handle).await;
        } else {
            self.state = SessionState::Generating;
            self.emit(SessionEvent::GenerationStarted {
                key: pending.key.clone(),
            });
            self.spawn_generation(pending.prompt);
        }
        Ok(())
    }

    /// Route a ready segment to the output: direct bind for the first one,
    /// crossfade afterwards. Failures recover to the prior stable state.
    async fn apply_segment(&mut self, prompt: CompiledPrompt, handle: AudioHandle) {
        if !self.output.has_output() {
            match self.output.bind_first(&mut self.engine, &handle) {
                Ok(()) => self.promote(prompt, handle),
                Err(e) => {
                    tracing::warn!(error = %e, "first segment failed to load");
                    self.emit(SessionEvent::GenerationFailed {
                        message: e.to_string(),
                    });
                    self.state = SessionState::Idle;
                }
            }
            return;
        }

        self.state = SessionState::Transitioning;
        self.emit(SessionEvent::CrossfadeStarted);
        match self
            .output
            .crossfade_to(&mut self.engine, &handle, self.config.fade)
            .await
        {
            Ok(()) => self.promote(prompt, handle),
            Err(e) => {
                tracing::warn!(error = %e, "crossfade aborted, previous segment keeps playing");
                self.emit(SessionEvent::GenerationFailed {
                    message: e.to_string(),
                });
                self.state = SessionState::Playing;
            }
        }
    }

    fn promote(&mut self, prompt: CompiledPrompt, handle: AudioHandle) {
        let segment = GeneratedSegment {
            id: self.next_segment_id,
            prompt,
            handle,
            created_at: SystemTime::now(),
        };
        self.next_segment_id += 1;
        self.history.push_back(segment.clone());
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        tracing::info!(segment = segment.id, key = %segment.cache_key(), "now playing");
        self.emit(SessionEvent::NowPlaying {
            segment_id: segment.id,
        });
        self.current = Some(segment);
        self.state = SessionState::Playing;
    }

    // ── Persistence ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            channels: self.registry.channels().to_vec(),
            settings: self.registry.settings().clone(),
            history: self.history.iter().cloned().collect(),
            presets: self.presets.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.registry.replace_channels(snapshot.channels);
        self.registry.set_settings(snapshot.settings);
        self.history = snapshot.history.into();
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        self.presets = snapshot.presets;
        self.after_mutation();
    }
}
