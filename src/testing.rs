//! Shared test doubles for the collaborator seams.
//!
//! Compiled only for tests. The mock audio graph counts every allocation and
//! disposal so leak/click invariants are assertable; the mock remote service
//! counts calls so dedup and debounce properties are observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::{AudioEngine, AudioHandle, AudioPlayer, GainNode};
use crate::preview::{LocalPreviewSynthesizer, StepUnit, SynthParams};
use crate::remote::RemoteGenerationService;
use crate::{Error, Result};

// ── Mock audio graph ─────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockGraph {
    live: AtomicUsize,
    max_live: AtomicUsize,
    created: AtomicUsize,
    disposed: AtomicUsize,
    fail_next_load: AtomicBool,
    next_id: AtomicU32,
    /// Live gain levels by node id.
    gains: Mutex<HashMap<u32, f32>>,
    /// Live players' looping flag by node id.
    looping: Mutex<HashMap<u32, bool>>,
    /// Gain level observed at each dispose, in dispose order.
    disposed_gain_levels: Mutex<Vec<f32>>,
}

impl MockGraph {
    pub fn live_players(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn max_live_players(&self) -> usize {
        self.max_live.load(Ordering::Relaxed)
    }

    pub fn players_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn players_disposed(&self) -> usize {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Make the next `create_player` fail with a load error.
    pub fn fail_next_load(&self) {
        self.fail_next_load.store(true, Ordering::Relaxed);
    }

    pub fn all_players_looping(&self) -> bool {
        self.looping.lock().unwrap().values().all(|l| *l)
    }

    /// Gain level of the single live slot. Panics unless exactly one gain
    /// node is live.
    pub fn gain_level_of_live_slot(&self) -> f32 {
        let gains = self.gains.lock().unwrap();
        assert_eq!(gains.len(), 1, "expected exactly one live gain node");
        *gains.values().next().unwrap()
    }

    pub fn disposed_gain_levels(&self) -> Vec<f32> {
        self.disposed_gain_levels.lock().unwrap().clone()
    }

    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) struct MockEngine {
    graph: Arc<MockGraph>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            graph: Arc::new(MockGraph::default()),
        }
    }

    pub fn graph(&self) -> Arc<MockGraph> {
        Arc::clone(&self.graph)
    }
}

pub(crate) struct MockPlayer {
    id: u32,
    graph: Arc<MockGraph>,
}

impl AudioPlayer for MockPlayer {
    fn set_looping(&mut self, looping: bool) {
        self.graph.looping.lock().unwrap().insert(self.id, looping);
    }

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn dispose(self) {
        self.graph.looping.lock().unwrap().remove(&self.id);
        self.graph.live.fetch_sub(1, Ordering::Relaxed);
        self.graph.disposed.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) struct MockGain {
    id: u32,
    graph: Arc<MockGraph>,
}

impl GainNode for MockGain {
    fn set(&mut self, level: f32) {
        self.graph.gains.lock().unwrap().insert(self.id, level);
    }

    fn ramp_to(&mut self, target: f32, _over: Duration) {
        // The mock clock lands ramps immediately; the caller models the
        // elapsed fade as a timed completion.
        self.graph.gains.lock().unwrap().insert(self.id, target);
    }

    fn dispose(self) {
        let level = self.graph.gains.lock().unwrap().remove(&self.id).unwrap_or(0.0);
        self.graph.disposed_gain_levels.lock().unwrap().push(level);
    }
}

impl AudioEngine for MockEngine {
    type Player = MockPlayer;
    type Gain = MockGain;

    fn create_gain(&mut self, initial: f32) -> Result<MockGain> {
        let id = self.graph.alloc_id();
        self.graph.gains.lock().unwrap().insert(id, initial);
        Ok(MockGain {
            id,
            graph: Arc::clone(&self.graph),
        })
    }

    fn create_player(&mut self, handle: &AudioHandle, _out: &MockGain) -> Result<MockPlayer> {
        if self.graph.fail_next_load.swap(false, Ordering::Relaxed) {
            return Err(Error::Load(format!("mock refused to load {}", handle.uri)));
        }
        let id = self.graph.alloc_id();
        self.graph.looping.lock().unwrap().insert(id, false);
        self.graph.created.fetch_add(1, Ordering::Relaxed);
        let live = self.graph.live.fetch_add(1, Ordering::Relaxed) + 1;
        self.graph.max_live.fetch_max(live, Ordering::Relaxed);
        Ok(MockPlayer {
            id,
            graph: Arc::clone(&self.graph),
        })
    }
}

// ── Mock remote service ──────────────────────────────────────────────────

pub(crate) struct MockRemote {
    calls: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
}

impl MockRemote {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

impl RemoteGenerationService for MockRemote {
    fn generate(
        &self,
        prompt: &str,
        duration_s: f64,
    ) -> impl std::future::Future<Output = Result<AudioHandle>> + Send {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let fail = self.fail.load(Ordering::Relaxed);
        let uri = format!("gen:{prompt}");
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            if fail {
                Err(Error::Generation("mock generation failure".into()))
            } else {
                Ok(AudioHandle { uri, duration_s })
            }
        }
    }
}

// ── Mock preview synthesizer ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct SynthLog {
    pub configures: usize,
    pub last_params: Option<SynthParams>,
    pub pattern_len: usize,
    pub unit: Option<StepUnit>,
    pub started_bpm: Option<u16>,
    pub running: bool,
    pub disposed: bool,
}

#[derive(Default)]
pub(crate) struct MockSynth {
    log: Arc<Mutex<SynthLog>>,
}

impl MockSynth {
    pub fn log(&self) -> Arc<Mutex<SynthLog>> {
        Arc::clone(&self.log)
    }
}

impl LocalPreviewSynthesizer for MockSynth {
    fn configure(&mut self, params: SynthParams) {
        let mut log = self.log.lock().unwrap();
        log.configures += 1;
        log.last_params = Some(params);
    }

    fn load_pattern(&mut self, steps: &[Option<u8>], unit: StepUnit) {
        let mut log = self.log.lock().unwrap();
        log.pattern_len = steps.len();
        log.unit = Some(unit);
    }

    fn start(&mut self, bpm: u16) {
        let mut log = self.log.lock().unwrap();
        log.started_bpm = Some(bpm);
        log.running = true;
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().running = false;
    }

    fn dispose(&mut self) {
        self.log.lock().unwrap().disposed = true;
    }
}
