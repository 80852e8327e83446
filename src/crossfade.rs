//! Two-slot crossfade transitions.
//!
//! [`CrossfadeTransitionManager`] owns the live session's output: a current
//! slot and, during a transition, one incoming slot. Swapping is a pair of
//! linear gain ramps; the superseded player is disposed exactly once, only
//! after its gain has landed at zero, so a swap never clicks and never leaks.
//!
//! At most two live players exist at any instant.

use std::time::Duration;

use tokio::time::sleep;

use crate::audio::{AudioEngine, AudioHandle, AudioPlayer, GainNode};
use crate::{Error, Result};

/// Default fade length.
pub const DEFAULT_FADE: Duration = Duration::from_secs(2);

/// One output slot: a looping player routed through its own gain stage.
struct OutputSlot<E: AudioEngine> {
    player: E::Player,
    gain: E::Gain,
}

impl<E: AudioEngine> OutputSlot<E> {
    fn dispose(mut self) {
        self.player.stop();
        self.player.dispose();
        self.gain.dispose();
    }
}

pub struct CrossfadeTransitionManager<E: AudioEngine> {
    current: Option<OutputSlot<E>>,
    /// Occupied only while a fade is in progress.
    incoming: Option<OutputSlot<E>>,
}

impl<E: AudioEngine> Default for CrossfadeTransitionManager<E> {
    fn default() -> Self {
        Self {
            current: None,
            incoming: None,
        }
    }
}

impl<E: AudioEngine> CrossfadeTransitionManager<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live player instances (0, 1, or 2 mid-fade).
    pub fn live_players(&self) -> usize {
        self.current.is_some() as usize + self.incoming.is_some() as usize
    }

    pub fn has_output(&self) -> bool {
        self.current.is_some()
    }

    /// Bind the first segment directly: full gain, no fade. Used when
    /// nothing was playing before.
    pub fn bind_first(&mut self, engine: &mut E, handle: &AudioHandle) -> Result<()> {
        if let Some(old) = self.current.take() {
            // Should not happen (the controller crossfades once output
            // exists), but never leak a player.
            tracing::warn!("bind_first with live output, disposing previous slot");
            old.dispose();
        }
        let gain = engine.create_gain(1.0)?;
        let mut player = engine
            .create_player(handle, &gain)
            .map_err(|e| Error::Load(format!("first segment failed to load: {e}")))?;
        player.set_looping(true);
        player.start();
        self.current = Some(OutputSlot { player, gain });
        tracing::info!(uri = %handle.uri, "output bound");
        Ok(())
    }

    /// Swap playback to `handle` with a linear crossfade of length `fade`.
    ///
    /// On a load failure the incoming resources are released, the current
    /// slot's gain is restored to full, and [`Error::Load`] is returned;
    /// the previous segment keeps playing.
    pub async fn crossfade_to(
        &mut self,
        engine: &mut E,
        handle: &AudioHandle,
        fade: Duration,
    ) -> Result<()> {
        if self.current.is_none() {
            return self.bind_first(engine, handle);
        }

        let gain = engine.create_gain(0.0)?;
        let mut player = match engine.create_player(handle, &gain) {
            Ok(p) => p,
            Err(e) => {
                gain.dispose();
                if let Some(cur) = self.current.as_mut() {
                    cur.gain.set(1.0);
                }
                return Err(Error::Load(format!("incoming segment failed to load: {e}")));
            }
        };
        player.set_looping(true);
        player.start(); // silent: gain is 0 until the ramp begins
        self.incoming = Some(OutputSlot { player, gain });

        tracing::info!(uri = %handle.uri, fade_ms = fade.as_millis() as u64, "crossfade started");
        if let Some(cur) = self.current.as_mut() {
            cur.gain.ramp_to(0.0, fade);
        }
        if let Some(inc) = self.incoming.as_mut() {
            inc.gain.ramp_to(1.0, fade);
        }

        // The ramp is a timed completion on the audio clock.
        sleep(fade).await;

        if let Some(old) = self.current.take() {
            old.dispose();
        }
        self.current = self.incoming.take();
        tracing::info!("crossfade complete, incoming slot promoted");
        Ok(())
    }

    /// Dispose both slots. Zero live players afterwards.
    pub fn stop_all(&mut self) {
        if let Some(slot) = self.incoming.take() {
            slot.dispose();
        }
        if let Some(slot) = self.current.take() {
            slot.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEngine, MockGraph};
    use std::sync::Arc;

    fn handle(uri: &str) -> AudioHandle {
        AudioHandle {
            uri: uri.to_string(),
            duration_s: 20.0,
        }
    }

    fn engine() -> (MockEngine, Arc<MockGraph>) {
        let engine = MockEngine::new();
        let graph = engine.graph();
        (engine, graph)
    }

    #[tokio::test(start_paused = true)]
    async fn bind_first_starts_looping_at_full_gain() {
        let (mut engine, graph) = engine();
        let mut xfade = CrossfadeTransitionManager::new();
        xfade.bind_first(&mut engine, &handle("a")).unwrap();

        assert_eq!(xfade.live_players(), 1);
        assert_eq!(graph.live_players(), 1);
        assert!(graph.all_players_looping());
    }

    #[tokio::test(start_paused = true)]
    async fn crossfade_swaps_and_disposes_superseded_player_once() {
        let (mut engine, graph) = engine();
        let mut xfade = CrossfadeTransitionManager::new();
        xfade.bind_first(&mut engine, &handle("a")).unwrap();

        xfade
            .crossfade_to(&mut engine, &handle("b"), Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(xfade.live_players(), 1);
        assert_eq!(graph.live_players(), 1);
        assert_eq!(graph.players_created(), 2);
        assert_eq!(graph.players_disposed(), 1);
        // The superseded slot's gain had landed at 0 when it was released.
        assert_eq!(graph.disposed_gain_levels(), vec![0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_two_live_players() {
        let (mut engine, graph) = engine();
        let mut xfade = CrossfadeTransitionManager::new();
        xfade.bind_first(&mut engine, &handle("a")).unwrap();

        for i in 0..5 {
            xfade
                .crossfade_to(&mut engine, &handle(&format!("s{i}")), Duration::from_millis(100))
                .await
                .unwrap();
            assert!(graph.max_live_players() <= 2);
        }
        assert_eq!(graph.live_players(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn load_failure_restores_current_gain_and_keeps_playing() {
        let (mut engine, graph) = engine();
        let mut xfade = CrossfadeTransitionManager::new();
        xfade.bind_first(&mut engine, &handle("a")).unwrap();

        graph.fail_next_load();
        let err = xfade
            .crossfade_to(&mut engine, &handle("b"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Load(_)));

        assert_eq!(xfade.live_players(), 1);
        assert_eq!(graph.live_players(), 1);
        assert_eq!(graph.gain_level_of_live_slot(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn crossfade_with_no_output_binds_directly() {
        let (mut engine, graph) = engine();
        let mut xfade = CrossfadeTransitionManager::new();
        xfade
            .crossfade_to(&mut engine, &handle("a"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(graph.live_players(), 1);
        assert_eq!(graph.gain_level_of_live_slot(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_disposes_everything() {
        let (mut engine, graph) = engine();
        let mut xfade = CrossfadeTransitionManager::new();
        xfade.bind_first(&mut engine, &handle("a")).unwrap();
        xfade
            .crossfade_to(&mut engine, &handle("b"), Duration::from_millis(50))
            .await
            .unwrap();

        xfade.stop_all();
        assert_eq!(xfade.live_players(), 0);
        assert_eq!(graph.live_players(), 0);
        // One disposed by the swap, one by stop_all.
        assert_eq!(graph.players_disposed(), 2);
    }
}
