//! Weighted prompt channels and global musical settings.
//!
//! The [`ChannelRegistry`] is the engine's parameter surface: an ordered set
//! of weighted creative channels plus the [`GlobalSettings`] shared by the
//! prompt compiler and the preview synthesizer. It is pure data: all
//! mutation goes through patch records that clamp values into synthesis-safe
//! ranges. The registry never destroys a channel individually; channels are
//! mutated in place or replaced wholesale.

use serde::{Deserialize, Serialize};

/// What a channel contributes to the compiled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Genre,
    Instrument,
    Mood,
    Energy,
    Texture,
    Style,
    Vocal,
    Custom,
}

impl ChannelType {
    /// All types in declaration order. The prompt compiler groups in this
    /// order so output text is stable under channel reordering.
    pub const ALL: [ChannelType; 8] = [
        ChannelType::Genre,
        ChannelType::Instrument,
        ChannelType::Mood,
        ChannelType::Energy,
        ChannelType::Texture,
        ChannelType::Style,
        ChannelType::Vocal,
        ChannelType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Genre => "genre",
            ChannelType::Instrument => "instrument",
            ChannelType::Mood => "mood",
            ChannelType::Energy => "energy",
            ChannelType::Texture => "texture",
            ChannelType::Style => "style",
            ChannelType::Vocal => "vocal",
            ChannelType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One weighted creative parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Unique id within the registry.
    pub id: String,
    /// Which prompt group this channel feeds.
    pub kind: ChannelType,
    /// Free text or preset label. Empty = contributes nothing.
    pub value: String,
    /// Contribution weight in [0, 1]. Below 0.1 the channel is ignored.
    pub weight: f32,
    /// Disabled channels contribute nothing regardless of weight.
    pub enabled: bool,
}

impl Channel {
    pub fn new(id: &str, kind: ChannelType, value: &str, weight: f32, enabled: bool) -> Self {
        Self {
            id: id.to_string(),
            kind,
            value: value.to_string(),
            weight: weight.clamp(0.0, 1.0),
            enabled,
        }
    }

    /// Whether this channel contributes to the compiled prompt.
    pub fn is_active(&self) -> bool {
        self.enabled && self.weight >= 0.1 && !self.value.trim().is_empty()
    }
}

/// A partial update to a channel.
///
/// All fields are optional — `None` means "keep the previous value."
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
    pub kind: Option<ChannelType>,
    pub value: Option<String>,
    pub weight: Option<f32>,
    pub enabled: Option<bool>,
}

/// The 12 pitch classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// Semitone offset from C.
    pub fn semitone(&self) -> u8 {
        match self {
            PitchClass::C => 0,
            PitchClass::CSharp => 1,
            PitchClass::D => 2,
            PitchClass::DSharp => 3,
            PitchClass::E => 4,
            PitchClass::F => 5,
            PitchClass::FSharp => 6,
            PitchClass::G => 7,
            PitchClass::GSharp => 8,
            PitchClass::A => 9,
            PitchClass::ASharp => 10,
            PitchClass::B => 11,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Parse "C", "C#", "Db"-style names (case-insensitive, flats accepted).
    pub fn parse(s: &str) -> Option<PitchClass> {
        let s = s.trim();
        let normalized = match s.to_ascii_uppercase().as_str() {
            "C" => PitchClass::C,
            "C#" | "DB" => PitchClass::CSharp,
            "D" => PitchClass::D,
            "D#" | "EB" => PitchClass::DSharp,
            "E" => PitchClass::E,
            "F" => PitchClass::F,
            "F#" | "GB" => PitchClass::FSharp,
            "G" => PitchClass::G,
            "G#" | "AB" => PitchClass::GSharp,
            "A" => PitchClass::A,
            "A#" | "BB" => PitchClass::ASharp,
            "B" => PitchClass::B,
            _ => return None,
        };
        Some(normalized)
    }
}

impl std::fmt::Display for PitchClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scale mode for both prompt text and preview pattern derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    Major,
    Minor,
    Dorian,
    Pentatonic,
}

impl ScaleMode {
    /// Scale degrees as semitone intervals from the root.
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            ScaleMode::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleMode::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleMode::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleMode::Pentatonic => &[0, 2, 4, 7, 9],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleMode::Major => "major",
            ScaleMode::Minor => "minor",
            ScaleMode::Dorian => "dorian",
            ScaleMode::Pentatonic => "pentatonic",
        }
    }
}

impl std::fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthesis-safe bounds for tempo and segment duration.
pub const BPM_RANGE: std::ops::RangeInclusive<u16> = 40..=220;
pub const DURATION_RANGE_S: std::ops::RangeInclusive<f64> = 5.0..=600.0;

/// Global musical settings shared by the prompt compiler and the preview
/// synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Tempo, clamped to [40, 220].
    pub bpm: u16,
    pub key: PitchClass,
    pub scale: ScaleMode,
    /// Rhythmic/textural density in [0, 1].
    pub density: f32,
    /// Timbral brightness in [0, 1].
    pub brightness: f32,
    /// Target segment duration in seconds, clamped to [5, 600].
    pub duration_s: f64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            bpm: 120,
            key: PitchClass::C,
            scale: ScaleMode::Minor,
            density: 0.5,
            brightness: 0.5,
            duration_s: 20.0,
        }
    }
}

impl GlobalSettings {
    /// Clamp every field into its synthesis-safe range.
    pub fn clamped(mut self) -> Self {
        self.bpm = self.bpm.clamp(*BPM_RANGE.start(), *BPM_RANGE.end());
        self.density = self.density.clamp(0.0, 1.0);
        self.brightness = self.brightness.clamp(0.0, 1.0);
        self.duration_s = self
            .duration_s
            .clamp(*DURATION_RANGE_S.start(), *DURATION_RANGE_S.end());
        self
    }
}

/// A partial update to the global settings. `None` = keep previous.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub bpm: Option<u16>,
    pub key: Option<PitchClass>,
    pub scale: Option<ScaleMode>,
    pub density: Option<f32>,
    pub brightness: Option<f32>,
    pub duration_s: Option<f64>,
}

/// Ordered channel set + global settings. Pure data and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    settings: GlobalSettings,
}

impl Default for ChannelRegistry {
    /// The stock eight-channel board.
    fn default() -> Self {
        Self {
            channels: vec![
                Channel::new("genre", ChannelType::Genre, "", 0.5, true),
                Channel::new("instrument1", ChannelType::Instrument, "", 0.5, true),
                Channel::new("instrument2", ChannelType::Instrument, "", 0.3, false),
                Channel::new("mood", ChannelType::Mood, "", 0.5, true),
                Channel::new("texture", ChannelType::Texture, "", 0.3, false),
                Channel::new("energy", ChannelType::Energy, "", 0.5, true),
                Channel::new("style", ChannelType::Style, "", 0.3, false),
                Channel::new("custom", ChannelType::Custom, "", 0.5, false),
            ],
            settings: GlobalSettings::default(),
        }
    }
}

impl ChannelRegistry {
    pub fn new(channels: Vec<Channel>, settings: GlobalSettings) -> Self {
        Self {
            channels,
            settings: settings.clamped(),
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Apply a patch to one channel in place.
    pub fn update_channel(&mut self, id: &str, patch: ChannelPatch) -> crate::Result<()> {
        let channel = self
            .channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| crate::Error::Validation(format!("unknown channel id {id:?}")))?;
        if let Some(kind) = patch.kind {
            channel.kind = kind;
        }
        if let Some(value) = patch.value {
            channel.value = value;
        }
        if let Some(weight) = patch.weight {
            channel.weight = weight.clamp(0.0, 1.0);
        }
        if let Some(enabled) = patch.enabled {
            channel.enabled = enabled;
        }
        Ok(())
    }

    /// Replace the whole channel set (the only way channels go away).
    pub fn replace_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
    }

    /// Replace the settings wholesale, clamping into synthesis-safe ranges.
    pub fn set_settings(&mut self, settings: GlobalSettings) {
        self.settings = settings.clamped();
    }

    /// Apply a settings patch, clamping into synthesis-safe ranges.
    pub fn update_settings(&mut self, patch: SettingsPatch) {
        let mut next = self.settings.clone();
        if let Some(bpm) = patch.bpm {
            next.bpm = bpm;
        }
        if let Some(key) = patch.key {
            next.key = key;
        }
        if let Some(scale) = patch.scale {
            next.scale = scale;
        }
        if let Some(density) = patch.density {
            next.density = density;
        }
        if let Some(brightness) = patch.brightness {
            next.brightness = brightness;
        }
        if let Some(duration_s) = patch.duration_s {
            next.duration_s = duration_s;
        }
        self.settings = next.clamped();
    }

    /// Whether anything would contribute to a compiled prompt.
    pub fn has_active_channels(&self) -> bool {
        self.channels.iter().any(Channel::is_active)
    }
}
