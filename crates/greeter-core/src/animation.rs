//! Frame sequencing for multi-frame animations.
//!
//! Maps time elapsed since an animation started to a frame index. Playback
//! length is a property of the animation, independent of how long the
//! surrounding state lasts.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Timing parameters of one animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationSpec {
    pub frame_count: u32,
    pub frame_duration_ms: u64,
    /// Number of full cycles; 1 means play once.
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    /// Extra time spent on the last frame of a single-cycle animation.
    #[serde(default)]
    pub extra_hold_ms: u64,
}

fn default_loop_count() -> u32 {
    1
}

/// Three-frame wave with a settle beat on the last frame.
pub const WAVE: AnimationSpec = AnimationSpec::new(3, 150).hold(750);
/// Six-frame "fun" loop, played twice.
pub const FUN: AnimationSpec = AnimationSpec::new(6, 120).looped(2);

/// What to show at a given point in an animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    Frame(u32),
    Finished,
}

impl AnimationSpec {
    /// A single-cycle animation with no hold.
    pub const fn new(frame_count: u32, frame_duration_ms: u64) -> Self {
        Self {
            frame_count,
            frame_duration_ms,
            loop_count: 1,
            extra_hold_ms: 0,
        }
    }

    pub const fn looped(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub const fn hold(mut self, extra_hold_ms: u64) -> Self {
        self.extra_hold_ms = extra_hold_ms;
        self
    }

    /// Length of one pass through every frame.
    pub fn cycle_ms(&self) -> u64 {
        u64::from(self.frame_count) * self.frame_duration_ms
    }

    /// Time until the animation reports [`FramePosition::Finished`].
    pub fn total_ms(&self) -> u64 {
        if self.loop_count <= 1 {
            self.cycle_ms() + self.extra_hold_ms
        } else {
            self.cycle_ms() * u64::from(self.loop_count)
        }
    }

    /// Frame to display `elapsed` after the animation started.
    pub fn frame_at(&self, elapsed: Duration) -> FramePosition {
        if self.frame_count == 0 || self.frame_duration_ms == 0 {
            return FramePosition::Finished;
        }

        let elapsed = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let cycle = self.cycle_ms();

        if self.loop_count <= 1 {
            if elapsed < cycle {
                FramePosition::Frame((elapsed / self.frame_duration_ms) as u32)
            } else if elapsed < cycle.saturating_add(self.extra_hold_ms) {
                FramePosition::Frame(self.frame_count - 1)
            } else {
                FramePosition::Finished
            }
        } else {
            let current_loop = elapsed / cycle;
            if current_loop < u64::from(self.loop_count) {
                FramePosition::Frame(((elapsed % cycle) / self.frame_duration_ms) as u32)
            } else {
                FramePosition::Finished
            }
        }
    }

    /// Full cycles completed by `elapsed`, capped at the loop count.
    pub fn loops_at(&self, elapsed: Duration) -> u32 {
        let loops = self.loop_count.max(1);
        match self.frame_at(elapsed) {
            FramePosition::Finished => loops,
            FramePosition::Frame(_) if loops == 1 => 0,
            FramePosition::Frame(_) => {
                let elapsed = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                (elapsed / self.cycle_ms()) as u32
            }
        }
    }
}

/// A running animation.
#[derive(Debug, Clone)]
pub struct AnimationPlayback {
    spec: AnimationSpec,
    started: Instant,
    frame_index: u32,
    loops_completed: u32,
}

impl AnimationPlayback {
    pub fn start(spec: AnimationSpec, now: Instant) -> Self {
        Self {
            spec,
            started: now,
            frame_index: 0,
            loops_completed: 0,
        }
    }

    /// Position at `now` without updating the playback.
    pub fn position(&self, now: Instant) -> FramePosition {
        self.spec.frame_at(now.saturating_duration_since(self.started))
    }

    /// Move playback to `now` and return the position.
    pub fn advance(&mut self, now: Instant) -> FramePosition {
        let elapsed = now.saturating_duration_since(self.started);
        let position = self.spec.frame_at(elapsed);
        if let FramePosition::Frame(index) = position {
            self.frame_index = index;
        }
        self.loops_completed = self.spec.loops_at(elapsed);
        position
    }

    pub fn spec(&self) -> AnimationSpec {
        self.spec
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Frame shown at the last [`advance`](Self::advance).
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn loops_completed(&self) -> u32 {
        self.loops_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_wave_with_hold() {
        let spec = AnimationSpec::new(3, 150).hold(750);
        assert_eq!(spec.frame_at(ms(0)), FramePosition::Frame(0));
        assert_eq!(spec.frame_at(ms(149)), FramePosition::Frame(0));
        assert_eq!(spec.frame_at(ms(150)), FramePosition::Frame(1));
        assert_eq!(spec.frame_at(ms(449)), FramePosition::Frame(2));
        assert_eq!(spec.frame_at(ms(460)), FramePosition::Frame(2));
        assert_eq!(spec.frame_at(ms(1199)), FramePosition::Frame(2));
        assert_eq!(spec.frame_at(ms(1200)), FramePosition::Finished);
        assert_eq!(spec, WAVE);
    }

    #[test]
    fn test_single_cycle_without_hold_finishes_at_cycle_end() {
        let spec = AnimationSpec::new(4, 100);
        assert_eq!(spec.frame_at(ms(399)), FramePosition::Frame(3));
        assert_eq!(spec.frame_at(ms(400)), FramePosition::Finished);
    }

    #[test]
    fn test_looping_wraps_and_finishes() {
        let spec = AnimationSpec::new(3, 100).looped(2);
        assert_eq!(spec.frame_at(ms(250)), FramePosition::Frame(2));
        assert_eq!(spec.frame_at(ms(300)), FramePosition::Frame(0));
        assert_eq!(spec.frame_at(ms(410)), FramePosition::Frame(1));
        assert_eq!(spec.frame_at(ms(599)), FramePosition::Frame(2));
        assert_eq!(spec.frame_at(ms(600)), FramePosition::Finished);
        assert_eq!(spec.total_ms(), 600);
    }

    #[test]
    fn test_looping_ignores_hold() {
        let spec = AnimationSpec::new(2, 100).looped(3).hold(1000);
        assert_eq!(spec.total_ms(), 600);
        assert_eq!(spec.frame_at(ms(600)), FramePosition::Finished);
    }

    #[test]
    fn test_degenerate_specs_finish_immediately() {
        assert_eq!(AnimationSpec::new(0, 100).frame_at(ms(0)), FramePosition::Finished);
        assert_eq!(AnimationSpec::new(3, 0).frame_at(ms(0)), FramePosition::Finished);
    }

    #[test]
    fn test_loop_count_zero_plays_once() {
        let spec = AnimationSpec::new(2, 100).looped(0);
        assert_eq!(spec.frame_at(ms(150)), FramePosition::Frame(1));
        assert_eq!(spec.frame_at(ms(200)), FramePosition::Finished);
    }

    #[test]
    fn test_playback_tracks_frame_and_loops() {
        let start = Instant::now();
        let mut playback = AnimationPlayback::start(FUN, start);
        assert_eq!(playback.advance(start + ms(130)), FramePosition::Frame(1));
        assert_eq!(playback.frame_index(), 1);
        assert_eq!(playback.loops_completed(), 0);

        assert_eq!(playback.advance(start + ms(725)), FramePosition::Frame(0));
        assert_eq!(playback.loops_completed(), 1);

        assert_eq!(playback.advance(start + ms(1440)), FramePosition::Finished);
        assert_eq!(playback.loops_completed(), 2);
        assert_eq!(playback.frame_index(), 0);
    }

    #[test]
    fn test_position_before_start_is_first_frame() {
        let start = Instant::now() + ms(50);
        let playback = AnimationPlayback::start(WAVE, start);
        assert_eq!(playback.position(start - ms(50)), FramePosition::Frame(0));
    }

    #[test]
    fn test_spec_deserialize_defaults() {
        let spec: AnimationSpec =
            serde_json::from_str(r#"{"frame_count": 3, "frame_duration_ms": 150}"#).unwrap();
        assert_eq!(spec, AnimationSpec::new(3, 150));
    }
}
