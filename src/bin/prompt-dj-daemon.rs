//! Prompt-DJ session daemon — stdin/stdout, line-delimited text.
//!
//! Drives a full live session against *stub* collaborators: the remote
//! service fabricates handles after a configurable latency and the audio
//! graph only logs, so every state transition, debounce window, cache hit
//! and crossfade can be exercised end-to-end without a model or a device.
//!
//! # Protocol (newline-delimited)
//!
//! Client → daemon:
//!   set <channel> <value...>        — set a channel's value (and enable it)
//!   weight <channel> <0..1>         — set a channel's weight
//!   on <channel> / off <channel>    — enable / disable a channel
//!   bpm <40..220>                   — tempo
//!   key <C|C#|Db|...>               — pitch class
//!   scale <major|minor|dorian|pentatonic>
//!   density <0..1> / brightness <0..1> / duration <seconds>
//!   start / stop                    — live session lifecycle
//!   preview on / preview off       — local preview chain
//!   preset save <name> / preset load <name>
//!   save / load                     — snapshot to/from the JSON store
//!   prompt / state                  — inspection
//!   q | quit | exit                 — shut down
//!
//! Daemon → client:
//!   event:live_started
//!   event:generating key=<k>
//!   event:segment_ready key=<k> cached=<bool>
//!   event:crossfade
//!   event:now_playing segment=<id>
//!   event:generation_failed <message>
//!   event:stopped
//!   event:ok <ack> / event:error <message>

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use prompt_dj_rs::audio::{AudioEngine, AudioHandle, AudioPlayer, GainNode};
use prompt_dj_rs::channel::{ChannelPatch, PitchClass, ScaleMode, SettingsPatch};
use prompt_dj_rs::preview::{LocalPreviewSynthesizer, PreviewChain, StepUnit, SynthParams};
use prompt_dj_rs::remote::RemoteGenerationService;
use prompt_dj_rs::session::{LiveSessionController, SessionConfig, SessionEvent, SessionState};
use prompt_dj_rs::store::{JsonFileStore, PreferenceStore};

// ── CLI ──────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "prompt-dj-daemon",
    about = "Live session daemon over stub collaborators — stdin protocol"
)]
struct Args {
    /// Simulated remote generation latency in milliseconds.
    #[arg(long, default_value_t = 1500)]
    latency_ms: u64,

    /// Debounce window in milliseconds.
    #[arg(long, default_value_t = 2000)]
    debounce_ms: u64,

    /// Crossfade length in milliseconds.
    #[arg(long, default_value_t = 2000)]
    fade_ms: u64,

    /// Snapshot file. Defaults to the platform config directory.
    #[arg(long)]
    store: Option<std::path::PathBuf>,
}

// ── Stub collaborators ───────────────────────────────────────────────────

/// Fabricates one handle per call after the configured latency.
struct StubRemote {
    latency: Duration,
    renders: AtomicU64,
}

impl RemoteGenerationService for StubRemote {
    fn generate(
        &self,
        prompt: &str,
        duration_s: f64,
    ) -> impl std::future::Future<Output = prompt_dj_rs::Result<AudioHandle>> + Send {
        let n = self.renders.fetch_add(1, Ordering::Relaxed);
        tracing::info!(render = n, prompt, "stub render started");
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            Ok(AudioHandle {
                uri: format!("stub:render-{n}"),
                duration_s,
            })
        }
    }
}

/// Audio graph that only logs. Node ids make player/gain lifecycles
/// traceable in the output.
struct LogEngine {
    next_id: u64,
}

struct LogPlayer {
    id: u64,
}

struct LogGain {
    id: u64,
}

impl AudioPlayer for LogPlayer {
    fn set_looping(&mut self, looping: bool) {
        tracing::debug!(player = self.id, looping, "player loop");
    }

    fn start(&mut self) {
        tracing::info!(player = self.id, "player started");
    }

    fn stop(&mut self) {
        tracing::info!(player = self.id, "player stopped");
    }

    fn dispose(self) {
        tracing::info!(player = self.id, "player disposed");
    }
}

impl GainNode for LogGain {
    fn set(&mut self, level: f32) {
        tracing::debug!(gain = self.id, level, "gain set");
    }

    fn ramp_to(&mut self, target: f32, over: Duration) {
        tracing::info!(gain = self.id, target, over_ms = over.as_millis() as u64, "gain ramp");
    }

    fn dispose(self) {
        tracing::debug!(gain = self.id, "gain disposed");
    }
}

impl AudioEngine for LogEngine {
    type Player = LogPlayer;
    type Gain = LogGain;

    fn create_gain(&mut self, initial: f32) -> prompt_dj_rs::Result<LogGain> {
        self.next_id += 1;
        tracing::debug!(gain = self.next_id, initial, "gain created");
        Ok(LogGain { id: self.next_id })
    }

    fn create_player(
        &mut self,
        handle: &AudioHandle,
        _out: &LogGain,
    ) -> prompt_dj_rs::Result<LogPlayer> {
        self.next_id += 1;
        tracing::info!(player = self.next_id, uri = %handle.uri, "player loaded");
        Ok(LogPlayer { id: self.next_id })
    }
}

/// Preview synthesizer that only logs.
struct LogSynth;

impl LocalPreviewSynthesizer for LogSynth {
    fn configure(&mut self, params: SynthParams) {
        tracing::info!(?params, "preview configured");
    }

    fn load_pattern(&mut self, steps: &[Option<u8>], unit: StepUnit) {
        let hits = steps.iter().flatten().count();
        tracing::info!(steps = steps.len(), hits, ?unit, "preview pattern");
    }

    fn start(&mut self, bpm: u16) {
        tracing::info!(bpm, "preview running");
    }

    fn stop(&mut self) {
        tracing::info!("preview silent");
    }

    fn dispose(&mut self) {}
}

type Controller = LiveSessionController<StubRemote, LogEngine, LogSynth>;

// ── Command handling ─────────────────────────────────────────────────────

/// `Some(ack)` to keep going, `None` to shut down.
fn process_cmd(line: &str, controller: &mut Controller, store: &JsonFileStore) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return Some(String::new());
    }
    let mut parts = line.splitn(3, ' ');
    let cmd = parts.next().unwrap_or_default().to_lowercase();
    let arg1 = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    let ack = |msg: String| Some(format!("event:ok {msg}"));
    let err = |msg: String| Some(format!("event:error {msg}"));

    match cmd.as_str() {
        "quit" | "q" | "exit" => None,
        "set" => match controller.update_channel(
            arg1,
            ChannelPatch {
                value: Some(rest.to_string()),
                enabled: Some(true),
                ..Default::default()
            },
        ) {
            Ok(()) => ack(format!("{arg1} = {rest:?}")),
            Err(e) => err(e.to_string()),
        },
        "weight" => match rest.parse::<f32>() {
            Ok(w) => match controller.update_channel(
                arg1,
                ChannelPatch {
                    weight: Some(w),
                    ..Default::default()
                },
            ) {
                Ok(()) => ack(format!("{arg1} weight = {w}")),
                Err(e) => err(e.to_string()),
            },
            Err(_) => err(format!("bad weight {rest:?}")),
        },
        "on" | "off" => match controller.update_channel(
            arg1,
            ChannelPatch {
                enabled: Some(cmd == "on"),
                ..Default::default()
            },
        ) {
            Ok(()) => ack(format!("{arg1} {cmd}")),
            Err(e) => err(e.to_string()),
        },
        "bpm" => match arg1.parse::<u16>() {
            Ok(bpm) => {
                controller.update_settings(SettingsPatch {
                    bpm: Some(bpm),
                    ..Default::default()
                });
                ack(format!("bpm = {}", controller.registry().settings().bpm))
            }
            Err(_) => err(format!("bad bpm {arg1:?}")),
        },
        "key" => match PitchClass::parse(arg1) {
            Some(key) => {
                controller.update_settings(SettingsPatch {
                    key: Some(key),
                    ..Default::default()
                });
                ack(format!("key = {key}"))
            }
            None => err(format!("bad key {arg1:?}")),
        },
        "scale" => {
            let scale = match arg1.to_lowercase().as_str() {
                "major" => Some(ScaleMode::Major),
                "minor" => Some(ScaleMode::Minor),
                "dorian" => Some(ScaleMode::Dorian),
                "pentatonic" => Some(ScaleMode::Pentatonic),
                _ => None,
            };
            match scale {
                Some(scale) => {
                    controller.update_settings(SettingsPatch {
                        scale: Some(scale),
                        ..Default::default()
                    });
                    ack(format!("scale = {scale}"))
                }
                None => err(format!("bad scale {arg1:?}")),
            }
        }
        "density" | "brightness" => match arg1.parse::<f32>() {
            Ok(v) => {
                let patch = if cmd == "density" {
                    SettingsPatch {
                        density: Some(v),
                        ..Default::default()
                    }
                } else {
                    SettingsPatch {
                        brightness: Some(v),
                        ..Default::default()
                    }
                };
                controller.update_settings(patch);
                ack(format!("{cmd} = {v}"))
            }
            Err(_) => err(format!("bad {cmd} {arg1:?}")),
        },
        "duration" => match arg1.parse::<f64>() {
            Ok(d) => {
                controller.update_settings(SettingsPatch {
                    duration_s: Some(d),
                    ..Default::default()
                });
                ack(format!(
                    "duration = {}s",
                    controller.registry().settings().duration_s
                ))
            }
            Err(_) => err(format!("bad duration {arg1:?}")),
        },
        "preview" => {
            if arg1 == "off" {
                controller.stop_preview();
                ack("preview off".to_string())
            } else {
                controller.start_preview();
                ack("preview on".to_string())
            }
        }
        "preset" => match (arg1, rest) {
            ("save", name) if !name.is_empty() => {
                controller.save_preset(name);
                ack(format!("preset {name:?} saved"))
            }
            ("load", name) => match controller.apply_preset(name) {
                Ok(()) => ack(format!("preset {name:?} applied")),
                Err(e) => err(e.to_string()),
            },
            _ => err("usage: preset save <name> | preset load <name>".to_string()),
        },
        "save" => match store.save(&controller.snapshot()) {
            Ok(()) => ack(format!("saved to {}", store.path().display())),
            Err(e) => err(e.to_string()),
        },
        "load" => match store.load() {
            Ok(Some(snapshot)) => {
                controller.restore(snapshot);
                ack("snapshot restored".to_string())
            }
            Ok(None) => err("nothing saved yet".to_string()),
            Err(e) => err(e.to_string()),
        },
        "prompt" => ack(format!("{:?}", controller.compiled_prompt().text)),
        "state" => ack(state_line(controller)),
        "stop" => {
            controller.stop_live_session();
            ack("stopped".to_string())
        }
        _ => err(format!("unknown command {cmd:?}")),
    }
}

fn state_line(controller: &Controller) -> String {
    let state = match controller.state() {
        SessionState::Idle => "idle",
        SessionState::Generating => "generating",
        SessionState::Playing => "playing",
        SessionState::Transitioning => "transitioning",
    };
    let current = controller
        .current_segment()
        .map(|s| format!("segment={} {:?}", s.id, truncate(&s.prompt.text, 60)))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "state={state} current={current} cached={} history={} preview={}",
        controller.cache().len(),
        controller.history().count(),
        controller.preview_active(),
    )
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn event_line(event: &SessionEvent) -> String {
    match event {
        SessionEvent::LiveStarted => "event:live_started".to_string(),
        SessionEvent::GenerationStarted { key } => {
            format!("event:generating key={}", truncate(key, 60))
        }
        SessionEvent::SegmentReady { key, cached } => {
            format!("event:segment_ready key={} cached={cached}", truncate(key, 60))
        }
        SessionEvent::CrossfadeStarted => "event:crossfade".to_string(),
        SessionEvent::NowPlaying { segment_id } => {
            format!("event:now_playing segment={segment_id}")
        }
        SessionEvent::GenerationFailed { message } => {
            format!("event:generation_failed {message}")
        }
        SessionEvent::Stopped => "event:stopped".to_string(),
    }
}

// ── Main loop ────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let remote = Arc::new(StubRemote {
        latency: Duration::from_millis(args.latency_ms),
        renders: AtomicU64::new(0),
    });
    let config = SessionConfig {
        debounce: Duration::from_millis(args.debounce_ms),
        fade: Duration::from_millis(args.fade_ms),
        ..SessionConfig::default()
    };
    let mut controller: Controller = LiveSessionController::new(
        remote,
        LogEngine { next_id: 0 },
        PreviewChain::new(LogSynth),
        config,
    );
    let mut events = controller
        .take_event_receiver()
        .expect("event receiver taken once at startup");

    let store = args
        .store
        .map(JsonFileStore::new)
        .unwrap_or_else(JsonFileStore::default_location);

    // Blocking stdin reader on its own thread, feeding the async loop.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("event:ready");
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if line.trim() == "start" {
                    // Async entry point; everything else is synchronous.
                    if let Err(e) = controller.start_live_session().await {
                        println!("event:error {e}");
                    }
                    continue;
                }
                match process_cmd(&line, &mut controller, &store) {
                    None => break,
                    Some(ack) if !ack.is_empty() => println!("{ack}"),
                    Some(_) => {}
                }
            }
            event = events.recv() => {
                if let Some(event) = event {
                    println!("{}", event_line(&event));
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = controller.tick().await {
                    println!("event:error {e}");
                }
            }
        }
    }

    controller.stop_live_session();
    println!("event:stopped");
    Ok(())
}
