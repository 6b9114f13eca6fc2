//! Audio router: abstract cues to DAW wire messages.
//!
//! The DAW session lays tracks out sequentially, one per (row, option),
//! with each option's clip at slot 0. Transitions mute rather than stop so
//! the loop never glitches audibly. This is the only subsystem that emits
//! outbound audio traffic.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use log::{debug, info, warn};
use rosc::OscType;

use yggdrasil_types::{AudioCue, ShowEvent, OPTIONS_PER_ROW};

use crate::bridge::DawBridge;

pub struct AudioRouter {
    bridge: Arc<dyn DawBridge>,
    options_per_row: usize,
    /// Tracks whose clip has been fired at least once this show.
    fired: BTreeSet<usize>,
    /// The currently audible set.
    unmuted: BTreeSet<usize>,
}

impl AudioRouter {
    pub fn new(bridge: Arc<dyn DawBridge>) -> Self {
        Self {
            bridge,
            options_per_row: OPTIONS_PER_ROW,
            fired: BTreeSet::new(),
            unmuted: BTreeSet::new(),
        }
    }

    fn track(&self, row: usize, option: usize) -> usize {
        row * self.options_per_row + option
    }

    fn row_tracks(&self, row: usize) -> Range<usize> {
        let start = row * self.options_per_row;
        start..start + self.options_per_row
    }

    fn send(&self, addr: &str, args: Vec<OscType>) {
        if let Err(e) = self.bridge.send(addr, args) {
            warn!("daw send failed for {}: {}", addr, e);
        }
    }

    fn set_mute(&mut self, track: usize, mute: bool) {
        self.send(
            "/live/track/set/mute",
            vec![OscType::Int(track as i32), OscType::Int(mute as i32)],
        );
        if mute {
            self.unmuted.remove(&track);
        } else {
            self.unmuted.insert(track);
        }
    }

    fn fire_clip(&mut self, track: usize) {
        self.send(
            "/live/clip/fire",
            vec![OscType::Int(track as i32), OscType::Int(0)],
        );
        self.fired.insert(track);
    }

    fn stop_clip(&self, track: usize) {
        self.send(
            "/live/clip/stop",
            vec![OscType::Int(track as i32), OscType::Int(0)],
        );
    }

    /// Route any audio cues out of a command's event list.
    pub fn handle_events(&mut self, events: &[ShowEvent]) {
        for event in events {
            if let ShowEvent::Audio(cue) = event {
                self.handle_cue(cue);
            }
        }
    }

    pub fn handle_cue(&mut self, cue: &AudioCue) {
        match cue {
            AudioCue::PlayOption { row, option } => self.play_option(*row, *option),
            AudioCue::StopOption { row, option } => {
                let track = self.track(*row, *option);
                self.set_mute(track, true);
            }
            AudioCue::CommitLayer { row, option } => {
                let winner = self.track(*row, *option);
                for track in self.row_tracks(*row) {
                    self.set_mute(track, track != winner);
                }
            }
            AudioCue::UncommitLayer { row } => {
                for track in self.row_tracks(*row) {
                    self.set_mute(track, true);
                    self.stop_clip(track);
                    // Cleared so the next audition re-fires the clip.
                    self.fired.remove(&track);
                }
            }
            AudioCue::PlayTimeline { path, user_id } => self.play_timeline(path, user_id.as_deref()),
            AudioCue::TransportStop => self.send("/live/song/stop_playing", vec![]),
            AudioCue::TransportContinue => self.send("/live/song/continue_playing", vec![]),
            AudioCue::ResetAll => self.reset_all(),
        }
    }

    fn play_option(&mut self, row: usize, option: usize) {
        let active = self.track(row, option);
        let first_audition = !self.row_tracks(row).any(|t| self.fired.contains(&t));
        if first_audition {
            // Fire the whole row muted, then open the active track, so the
            // four loops stay phase-locked for the rest of the row.
            for track in self.row_tracks(row) {
                self.set_mute(track, true);
            }
            for track in self.row_tracks(row) {
                self.fire_clip(track);
            }
            self.set_mute(active, false);
        } else {
            let to_mute: Vec<usize> = self
                .row_tracks(row)
                .filter(|t| *t != active && self.unmuted.contains(t))
                .collect();
            for track in to_mute {
                self.set_mute(track, true);
            }
            self.set_mute(active, false);
        }
    }

    fn play_timeline(&mut self, path: &[(usize, usize)], user_id: Option<&str>) {
        match user_id {
            Some(user) => debug!("playing individual timeline for {}", user),
            None => info!("playing popular path ({} rows)", path.len()),
        }
        let audible: Vec<usize> = self.unmuted.iter().copied().collect();
        for track in audible {
            self.set_mute(track, true);
        }
        for &(row, option) in path {
            let track = self.track(row, option);
            if !self.fired.contains(&track) {
                self.fire_clip(track);
            }
            self.set_mute(track, false);
        }
    }

    fn reset_all(&mut self) {
        let audible: Vec<usize> = self.unmuted.iter().copied().collect();
        for track in audible {
            self.set_mute(track, true);
        }
        let fired: Vec<usize> = self.fired.iter().copied().collect();
        for track in fired {
            self.stop_clip(track);
        }
        self.fired.clear();
        self.unmuted.clear();
        self.send("/live/song/stop_playing", vec![]);
        self.send(
            "/live/song/set/current_song_time",
            vec![OscType::Float(0.0)],
        );
    }

    /// Ask the DAW how many tracks the live session has and log a mismatch
    /// against the configured layout. The reply comes back on the same
    /// address.
    pub fn probe_track_count(&self, expected: usize) {
        self.bridge.subscribe_once(
            "/live/song/get/num_tracks",
            Box::new(move |args| match args.first() {
                Some(OscType::Int(n)) if *n as usize >= expected => {
                    info!("daw session has {} tracks ({} required)", n, expected);
                }
                Some(OscType::Int(n)) => {
                    warn!("daw session has {} tracks but the show needs {}", n, expected);
                }
                _ => warn!("unexpected num_tracks reply: {:?}", args),
            }),
        );
        self.send("/live/song/get/num_tracks", vec![]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    /// Records every outbound message for assertions.
    struct RecordingBridge {
        sent: Mutex<Vec<(String, Vec<OscType>)>>,
    }

    impl RecordingBridge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<(String, Vec<OscType>)> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl DawBridge for RecordingBridge {
        fn send(&self, addr: &str, args: Vec<OscType>) -> io::Result<()> {
            self.sent.lock().unwrap().push((addr.to_string(), args));
            Ok(())
        }
    }

    fn mute_msg(track: i32, mute: i32) -> (String, Vec<OscType>) {
        (
            "/live/track/set/mute".to_string(),
            vec![OscType::Int(track), OscType::Int(mute)],
        )
    }

    fn fire_msg(track: i32) -> (String, Vec<OscType>) {
        (
            "/live/clip/fire".to_string(),
            vec![OscType::Int(track), OscType::Int(0)],
        )
    }

    #[test]
    fn first_audition_fires_whole_row_muted() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());

        router.handle_cue(&AudioCue::PlayOption { row: 1, option: 0 });
        let sent = bridge.take();
        // Row 1 occupies tracks 4..8: all muted, all fired, track 4 opened.
        for t in 4..8 {
            assert!(sent.contains(&mute_msg(t, 1)), "expected mute of {t}");
            assert!(sent.contains(&fire_msg(t)), "expected fire of {t}");
        }
        assert_eq!(sent.last(), Some(&mute_msg(4, 0)));
    }

    #[test]
    fn later_audition_steps_swap_mutes_without_refiring() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 0 });
        bridge.take();

        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 2 });
        let sent = bridge.take();
        assert!(sent.contains(&mute_msg(0, 1)));
        assert!(sent.contains(&mute_msg(2, 0)));
        assert!(!sent.iter().any(|(addr, _)| addr == "/live/clip/fire"));
    }

    #[test]
    fn commit_layer_opens_winner_and_closes_rest() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 1 });
        bridge.take();

        router.handle_cue(&AudioCue::CommitLayer { row: 0, option: 3 });
        let sent = bridge.take();
        assert!(sent.contains(&mute_msg(0, 1)));
        assert!(sent.contains(&mute_msg(1, 1)));
        assert!(sent.contains(&mute_msg(2, 1)));
        assert!(sent.contains(&mute_msg(3, 0)));
    }

    #[test]
    fn commit_leaves_other_rows_untouched() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 0 });
        router.handle_cue(&AudioCue::CommitLayer { row: 0, option: 0 });
        bridge.take();

        router.handle_cue(&AudioCue::CommitLayer { row: 1, option: 1 });
        let sent = bridge.take();
        assert!(sent.iter().all(|(_, args)| {
            !matches!(args.first(), Some(OscType::Int(t)) if *t < 4)
        }));
    }

    #[test]
    fn uncommit_stops_clips_and_refires_on_next_audition() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 0 });
        bridge.take();

        router.handle_cue(&AudioCue::UncommitLayer { row: 0 });
        let sent = bridge.take();
        for t in 0..4 {
            assert!(sent.contains(&mute_msg(t, 1)));
            assert!(sent.contains(&(
                "/live/clip/stop".to_string(),
                vec![OscType::Int(t), OscType::Int(0)]
            )));
        }

        // The next audition of this row fires the clips again.
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 0 });
        let sent = bridge.take();
        assert!(sent.contains(&fire_msg(0)));
        assert!(sent.contains(&fire_msg(3)));
    }

    #[test]
    fn timeline_mutes_everything_then_opens_path() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 0 });
        router.handle_cue(&AudioCue::CommitLayer { row: 0, option: 0 });
        bridge.take();

        router.handle_cue(&AudioCue::PlayTimeline {
            path: vec![(0, 1), (1, 2)],
            user_id: None,
        });
        let sent = bridge.take();
        // Previously audible track 0 closes; path tracks 1 and 6 open.
        assert!(sent.contains(&mute_msg(0, 1)));
        assert!(sent.contains(&mute_msg(1, 0)));
        assert!(sent.contains(&mute_msg(6, 0)));
        // Track 6 was never fired before the timeline.
        assert!(sent.contains(&fire_msg(6)));
        // Track 1 was fired during the row audition; no re-fire.
        assert!(!sent.contains(&fire_msg(1)));
    }

    #[test]
    fn reset_clears_state_and_rewinds_transport() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 0 });
        bridge.take();

        router.handle_cue(&AudioCue::ResetAll);
        let sent = bridge.take();
        assert!(sent.iter().any(|(addr, _)| addr == "/live/song/stop_playing"));
        assert!(sent.contains(&(
            "/live/song/set/current_song_time".to_string(),
            vec![OscType::Float(0.0)]
        )));

        // State is clean: the next audition behaves like a first audition.
        router.handle_cue(&AudioCue::PlayOption { row: 0, option: 0 });
        let sent = bridge.take();
        assert!(sent.contains(&fire_msg(0)));
    }

    #[test]
    fn transport_cues_map_to_song_messages() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        router.handle_cue(&AudioCue::TransportStop);
        router.handle_cue(&AudioCue::TransportContinue);
        let sent = bridge.take();
        assert_eq!(sent[0].0, "/live/song/stop_playing");
        assert_eq!(sent[1].0, "/live/song/continue_playing");
    }

    #[test]
    fn handle_events_routes_only_audio_cues() {
        let bridge = RecordingBridge::new();
        let mut router = AudioRouter::new(bridge.clone());
        let events = vec![
            ShowEvent::ForceReconnect,
            ShowEvent::Audio(AudioCue::StopOption { row: 0, option: 2 }),
        ];
        router.handle_events(&events);
        let sent = bridge.take();
        assert_eq!(sent, vec![mute_msg(2, 1)]);
    }
}
