//! Instant local preview.
//!
//! The preview path gives zero-latency audible feedback while parameters
//! move: every mutation reconfigures the [`LocalPreviewSynthesizer`]
//! synchronously and deterministically from the current settings. It never
//! touches the network or the generation cache, and it runs on an output
//! chain independent of the live session.
//!
//! Parameter derivation:
//! - oscillator shape by brightness tier (sawtooth / triangle / sine)
//! - filter cutoff = `200 + brightness * 4000` Hz
//! - reverb/delay wet raised for dreamy/airy/ambient moods and textures
//! - 16 sixteenth steps for high-energy boards, 8 eighth steps otherwise
//! - per-step Bernoulli note draws against the diatonic scale of key+scale

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::channel::{Channel, ChannelRegistry, ChannelType, GlobalSettings, PitchClass, ScaleMode};

/// Oscillator shapes offered by the preview synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillatorShape {
    Sine,
    Triangle,
    Sawtooth,
}

/// Step grid resolution for the preview pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUnit {
    Eighth,
    Sixteenth,
}

/// One reconfiguration of the preview synthesizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthParams {
    pub oscillator: OscillatorShape,
    pub filter_cutoff_hz: f32,
    pub reverb_mix: f32,
    pub delay_mix: f32,
}

/// Local synthesis collaborator: side effects only.
pub trait LocalPreviewSynthesizer {
    fn configure(&mut self, params: SynthParams);
    /// `steps`: MIDI note per step, `None` = rest.
    fn load_pattern(&mut self, steps: &[Option<u8>], unit: StepUnit);
    fn start(&mut self, bpm: u16);
    fn stop(&mut self);
    fn dispose(&mut self);
}

/// Values that mark a mood/texture as atmospheric.
const ATMOSPHERIC_MARKERS: [&str; 3] = ["dreamy", "airy", "ambient"];
/// Values that mark the energy channel as high.
const HIGH_ENERGY_MARKERS: [&str; 2] = ["high", "intense"];

/// Derive synth parameters from the current board.
pub fn derive_synth_params(channels: &[Channel], settings: &GlobalSettings) -> SynthParams {
    let oscillator = if settings.brightness > 0.6 {
        OscillatorShape::Sawtooth
    } else if settings.brightness > 0.3 {
        OscillatorShape::Triangle
    } else {
        OscillatorShape::Sine
    };
    let atmospheric = channels.iter().any(|c| {
        c.enabled
            && matches!(c.kind, ChannelType::Mood | ChannelType::Texture)
            && contains_any(&c.value, &ATMOSPHERIC_MARKERS)
    });
    SynthParams {
        oscillator,
        filter_cutoff_hz: 200.0 + settings.brightness * 4000.0,
        reverb_mix: if atmospheric { 0.6 } else { 0.2 },
        delay_mix: if atmospheric { 0.25 } else { 0.0 },
    }
}

/// Step count + grid unit from the energy channel.
pub fn pattern_shape(channels: &[Channel]) -> (usize, StepUnit) {
    let high_energy = channels.iter().any(|c| {
        c.enabled && c.kind == ChannelType::Energy && contains_any(&c.value, &HIGH_ENERGY_MARKERS)
    });
    if high_energy {
        (16, StepUnit::Sixteenth)
    } else {
        (8, StepUnit::Eighth)
    }
}

/// Probability of a note on each step.
pub fn note_density(settings: &GlobalSettings) -> f64 {
    0.2 + settings.density as f64 * 0.6
}

/// Diatonic scale of key+scale as MIDI notes around octave 4.
pub fn scale_notes(key: PitchClass, scale: ScaleMode) -> Vec<u8> {
    const C4: u8 = 60;
    scale
        .intervals()
        .iter()
        .map(|interval| C4 + key.semitone() + interval)
        .collect()
}

/// Independent Bernoulli draw per step; hits pick a uniform scale degree.
pub fn generate_pattern(
    rng: &mut impl Rng,
    notes: &[u8],
    steps: usize,
    density: f64,
) -> Vec<Option<u8>> {
    (0..steps)
        .map(|_| {
            if rng.gen_bool(density.clamp(0.0, 1.0)) {
                Some(notes[rng.gen_range(0..notes.len())])
            } else {
                None
            }
        })
        .collect()
}

fn contains_any(value: &str, markers: &[&str]) -> bool {
    let value = value.to_lowercase();
    markers.iter().any(|m| value.contains(m))
}

/// The preview output chain: one synthesizer plus the pattern RNG.
///
/// Independent of the live session; the controller pushes every mutation
/// here while the preview is active.
pub struct PreviewChain<P: LocalPreviewSynthesizer> {
    synth: P,
    rng: StdRng,
    active: bool,
}

impl<P: LocalPreviewSynthesizer> PreviewChain<P> {
    pub fn new(synth: P) -> Self {
        Self {
            synth,
            rng: StdRng::from_entropy(),
            active: false,
        }
    }

    /// Deterministic pattern draws, for tests and reproducible sessions.
    pub fn with_seed(synth: P, seed: u64) -> Self {
        Self {
            synth,
            rng: StdRng::seed_from_u64(seed),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start previewing the given board.
    pub fn start(&mut self, registry: &ChannelRegistry) {
        self.active = true;
        self.reconfigure(registry);
        tracing::info!("preview started");
    }

    /// Push the current board into the synthesizer. No-op while inactive.
    pub fn apply(&mut self, registry: &ChannelRegistry) {
        if self.active {
            self.reconfigure(registry);
        }
    }

    pub fn stop(&mut self) {
        if self.active {
            self.synth.stop();
            self.active = false;
            tracing::info!("preview stopped");
        }
    }

    /// Release the synthesizer.
    pub fn dispose(mut self) {
        self.synth.stop();
        self.synth.dispose();
    }

    fn reconfigure(&mut self, registry: &ChannelRegistry) {
        let channels = registry.channels();
        let settings = registry.settings();
        let params = derive_synth_params(channels, settings);
        let (steps, unit) = pattern_shape(channels);
        let notes = scale_notes(settings.key, settings.scale);
        let pattern = generate_pattern(&mut self.rng, &notes, steps, note_density(settings));

        self.synth.configure(params);
        self.synth.load_pattern(&pattern, unit);
        self.synth.start(settings.bpm);
        tracing::debug!(
            steps,
            cutoff_hz = params.filter_cutoff_hz,
            bpm = settings.bpm,
            "preview reconfigured"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelPatch, SettingsPatch};
    use crate::testing::MockSynth;

    fn board(brightness: f32, density: f32) -> ChannelRegistry {
        let mut reg = ChannelRegistry::default();
        reg.update_settings(SettingsPatch {
            brightness: Some(brightness),
            density: Some(density),
            ..Default::default()
        });
        reg
    }

    #[test]
    fn oscillator_follows_brightness_tiers() {
        let reg = board(0.8, 0.5);
        let p = derive_synth_params(reg.channels(), reg.settings());
        assert_eq!(p.oscillator, OscillatorShape::Sawtooth);

        let reg = board(0.5, 0.5);
        let p = derive_synth_params(reg.channels(), reg.settings());
        assert_eq!(p.oscillator, OscillatorShape::Triangle);

        let reg = board(0.1, 0.5);
        let p = derive_synth_params(reg.channels(), reg.settings());
        assert_eq!(p.oscillator, OscillatorShape::Sine);
    }

    #[test]
    fn cutoff_formula() {
        let reg = board(0.5, 0.5);
        let p = derive_synth_params(reg.channels(), reg.settings());
        assert!((p.filter_cutoff_hz - 2200.0).abs() < 1e-3);
    }

    #[test]
    fn atmospheric_moods_open_the_wet_mix() {
        let mut reg = board(0.5, 0.5);
        let p = derive_synth_params(reg.channels(), reg.settings());
        assert_eq!(p.reverb_mix, 0.2);
        assert_eq!(p.delay_mix, 0.0);

        reg.update_channel(
            "mood",
            ChannelPatch {
                value: Some("Dreamy".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let p = derive_synth_params(reg.channels(), reg.settings());
        assert_eq!(p.reverb_mix, 0.6);
        assert_eq!(p.delay_mix, 0.25);
    }

    #[test]
    fn energy_channel_selects_pattern_shape() {
        let mut reg = ChannelRegistry::default();
        assert_eq!(pattern_shape(reg.channels()), (8, StepUnit::Eighth));

        reg.update_channel(
            "energy",
            ChannelPatch {
                value: Some("High".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pattern_shape(reg.channels()), (16, StepUnit::Sixteenth));
    }

    #[test]
    fn scale_notes_are_diatonic_from_the_key() {
        let notes = scale_notes(PitchClass::D, ScaleMode::Minor);
        // D4 = 62; minor = [0,2,3,5,7,8,10]
        assert_eq!(notes, vec![62, 64, 65, 67, 69, 70, 72]);
    }

    #[test]
    fn pattern_density_extremes() {
        let notes = scale_notes(PitchClass::C, ScaleMode::Major);
        let mut rng = StdRng::seed_from_u64(7);

        let silent = generate_pattern(&mut rng, &notes, 16, 0.0);
        assert!(silent.iter().all(Option::is_none));

        let full = generate_pattern(&mut rng, &notes, 16, 1.0);
        assert!(full.iter().all(Option::is_some));
        assert!(full.iter().flatten().all(|n| notes.contains(n)));
    }

    #[test]
    fn chain_reconfigures_on_apply_only_while_active() {
        let synth = MockSynth::default();
        let log = synth.log();
        let mut chain = PreviewChain::with_seed(synth, 42);
        let reg = ChannelRegistry::default();

        chain.apply(&reg); // inactive: nothing happens
        assert_eq!(log.lock().unwrap().configures, 0);

        chain.start(&reg);
        {
            let log = log.lock().unwrap();
            assert_eq!(log.configures, 1);
            assert_eq!(log.started_bpm, Some(120));
            assert_eq!(log.pattern_len, 8);
            assert_eq!(log.unit, Some(StepUnit::Eighth));
            let params = log.last_params.unwrap();
            assert_eq!(params.oscillator, OscillatorShape::Triangle);
        }

        chain.apply(&reg);
        assert_eq!(log.lock().unwrap().configures, 2);

        chain.stop();
        assert!(!log.lock().unwrap().running);
        chain.apply(&reg);
        assert_eq!(log.lock().unwrap().configures, 2);

        chain.dispose();
        assert!(log.lock().unwrap().disposed);
    }
}
