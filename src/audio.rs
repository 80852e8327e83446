//! Audio-engine collaborator traits.
//!
//! The engine never touches samples. Playback goes through these seams:
//! an [`AudioEngine`] allocates players and gain nodes, a player loops one
//! loaded [`AudioHandle`], and a gain node is settable or ramped on the
//! audio clock. Real implementations bind a device graph; tests substitute
//! counting mocks.
//!
//! Resource discipline: `dispose` consumes the node, so a superseded player
//! can be released exactly once, and only after its gain ramp has landed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Opaque reference to a rendered audio segment.
///
/// Only the audio-engine collaborator interprets the URI; the session engine
/// caches and compares handles without ever decoding them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioHandle {
    pub uri: String,
    pub duration_s: f64,
}

/// A playback node bound to one loaded handle.
pub trait AudioPlayer {
    fn set_looping(&mut self, looping: bool);
    fn start(&mut self);
    fn stop(&mut self);
    /// Release the node. Consuming so release happens exactly once.
    fn dispose(self);
}

/// A rampable gain stage.
pub trait GainNode {
    /// Jump to a level immediately.
    fn set(&mut self, level: f32);
    /// Linear ramp to `target` over `over`, scheduled on the audio clock.
    /// Returns immediately; completion is a timed event.
    fn ramp_to(&mut self, target: f32, over: Duration);
    fn dispose(self);
}

/// Factory for players and gain stages.
///
/// Loading a handle may fail (decode error, unreachable URI); that surfaces
/// as [`crate::Error::Load`] and is never fatal to the session.
pub trait AudioEngine {
    type Player: AudioPlayer;
    type Gain: GainNode;

    /// Allocate a gain node at an initial level.
    fn create_gain(&mut self, initial: f32) -> Result<Self::Gain>;

    /// Allocate a player with `handle` loaded, routed through `out`.
    fn create_player(&mut self, handle: &AudioHandle, out: &Self::Gain) -> Result<Self::Player>;
}
