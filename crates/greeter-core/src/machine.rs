//! Presence-triggered interaction state machine.
//!
//! Consumes one detection batch per render tick and emits [`Effect`]s for the
//! caller to carry out. Timed states store an absolute deadline that is
//! compared against the tick's clock, so checking an expired timer twice is
//! harmless. Within one tick, writers are applied in a fixed order:
//! audio completion, timer expiry, silence early-clear, presence trigger,
//! queued touch.

use crate::animation::{AnimationPlayback, AnimationSpec, FramePosition, FUN, WAVE};
use crate::content::ContentPools;
use crate::filter::{count_valid, FilterConfig};
use crate::picker::{ContentPicker, Picked, Selection};
use crate::scene::Scene;
use crate::stability::StabilityTracker;
use crate::types::{Compliment, DetectionBatch, Surface};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Externally visible interaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateKind {
    Idle,
    GreetingWave,
    Talking,
    Cooldown,
    Silence,
    TouchWave,
    TouchFun,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Idle => write!(f, "idle"),
            StateKind::GreetingWave => write!(f, "greeting-wave"),
            StateKind::Talking => write!(f, "talking"),
            StateKind::Cooldown => write!(f, "cooldown"),
            StateKind::Silence => write!(f, "silence"),
            StateKind::TouchWave => write!(f, "touch-wave"),
            StateKind::TouchFun => write!(f, "touch-fun"),
        }
    }
}

/// Decorative animations; touch input picks one, greetings always wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gesture {
    Wave,
    Fun,
}

impl FromStr for Gesture {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wave" => Ok(Gesture::Wave),
            "fun" => Ok(Gesture::Fun),
            other => Err(ParseSettingError::new("gesture", other)),
        }
    }
}

/// What ends the `talking` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TalkEnd {
    /// A display timer derived from the text length.
    Timer,
    /// Playback completion, with the display timer plus a grace period as fallback.
    Audio,
}

impl FromStr for TalkEnd {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timer" => Ok(TalkEnd::Timer),
            "audio" => Ok(TalkEnd::Audio),
            other => Err(ParseSettingError::new("talk end policy", other)),
        }
    }
}

/// Where `talking` goes when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AfterTalk {
    Idle,
    Cooldown,
    Silence,
}

impl FromStr for AfterTalk {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(AfterTalk::Idle),
            "cooldown" => Ok(AfterTalk::Cooldown),
            "silence" => Ok(AfterTalk::Silence),
            other => Err(ParseSettingError::new("after-talk policy", other)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseSettingError {
    kind: &'static str,
    value: String,
}

impl ParseSettingError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Behavior knobs for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub filter: FilterConfig,
    /// Presence window length in ticks.
    pub stable_frames: usize,
    /// Anticipation beat between stable presence and the greeting line.
    pub wave_ms: u64,
    /// Shortest time a line stays on screen.
    pub min_talk_ms: u64,
    /// Display time per character of the line.
    pub talk_ms_per_char: u64,
    pub talk_end: TalkEnd,
    /// With [`TalkEnd::Audio`], how long past the display time to wait for
    /// playback completion before the timer takes over.
    pub audio_grace_ms: u64,
    pub after_talk: AfterTalk,
    pub cooldown_ms: u64,
    pub silence_ms: u64,
    /// End `silence` as soon as no valid face is in view.
    pub silence_clears_on_absence: bool,
    /// Consecutive detecting ticks after which the long-dwell category is used.
    pub long_dwell_ticks: u32,
    /// Category pinned by the deployment, used when its pool is non-empty.
    pub category_override: Option<String>,
    /// Touch input is ignored for this long after a touch animation ends.
    pub input_cooldown_ms: u64,
    pub wave_animation: AnimationSpec,
    pub fun_animation: AnimationSpec,
    /// Idle blink period; 0 disables blinking.
    pub blink_interval_ms: u64,
    pub blink_ms: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            stable_frames: 15,
            wave_ms: 400,
            min_talk_ms: 3500,
            talk_ms_per_char: 240,
            talk_end: TalkEnd::Timer,
            audio_grace_ms: 5000,
            after_talk: AfterTalk::Silence,
            cooldown_ms: 3500,
            silence_ms: 20_000,
            silence_clears_on_absence: true,
            long_dwell_ticks: 100,
            category_override: None,
            input_cooldown_ms: 1500,
            wave_animation: WAVE,
            fun_animation: FUN,
            blink_interval_ms: 4000,
            blink_ms: 150,
        }
    }
}

impl MachineConfig {
    /// Minimum display time for `text`: `max(min_talk_ms, chars × talk_ms_per_char)`.
    pub fn talk_duration(&self, text: &str) -> Duration {
        let by_length = (text.chars().count() as u64).saturating_mul(self.talk_ms_per_char);
        Duration::from_millis(self.min_talk_ms.max(by_length))
    }

    fn animation(&self, gesture: Gesture) -> AnimationSpec {
        match gesture {
            Gesture::Wave => self.wave_animation,
            Gesture::Fun => self.fun_animation,
        }
    }
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Transition { from: StateKind, to: StateKind },
    StartAnimation(Gesture),
    /// Play a named clip; report completion with [`InteractionStateMachine::notify_audio_finished`].
    PlayClip { greeting: u64, clip: String },
    /// Best-effort playback keyed by the line's text.
    PlayByKey { greeting: u64, text: String },
    /// Add one greeting to the stats for `day`.
    RecordGreeting { day: NaiveDate },
}

/// Why a touch request was not queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchRejected {
    #[error("busy ({0})")]
    Busy(StateKind),
    #[error("touch input cooling down")]
    InputCooldown,
    #[error("a touch is already queued")]
    AlreadyQueued,
}

/// Inputs for one render tick.
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    /// Monotonic clock used for every deadline.
    pub now: Instant,
    /// Local wall-clock time, for category selection and stats.
    pub local: NaiveDateTime,
    pub batch: &'a DetectionBatch,
    pub surface: Surface,
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: StateKind,
    pub valid_count: usize,
    pub consecutive: u32,
    pub history_hits: usize,
    pub history_len: usize,
    pub stable: bool,
    pub greetings: u64,
    pub line: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
enum State {
    Idle {
        since: Instant,
    },
    GreetingWave {
        started: Instant,
        until: Instant,
        /// Largest valid count seen while waving.
        peak_count: usize,
    },
    Talking {
        greeting: u64,
        line: Picked,
        until: Instant,
    },
    Cooldown {
        until: Instant,
    },
    Silence {
        until: Instant,
    },
    Touch {
        gesture: Gesture,
        playback: AnimationPlayback,
    },
}

impl State {
    fn kind(&self) -> StateKind {
        match self {
            State::Idle { .. } => StateKind::Idle,
            State::GreetingWave { .. } => StateKind::GreetingWave,
            State::Talking { .. } => StateKind::Talking,
            State::Cooldown { .. } => StateKind::Cooldown,
            State::Silence { .. } => StateKind::Silence,
            State::Touch {
                gesture: Gesture::Wave,
                ..
            } => StateKind::TouchWave,
            State::Touch {
                gesture: Gesture::Fun,
                ..
            } => StateKind::TouchFun,
        }
    }

    fn until(&self) -> Option<Instant> {
        match self {
            State::Idle { .. } => None,
            State::GreetingWave { until, .. }
            | State::Talking { until, .. }
            | State::Cooldown { until }
            | State::Silence { until } => Some(*until),
            State::Touch { playback, .. } => Some(
                playback.started() + Duration::from_millis(playback.spec().total_ms()),
            ),
        }
    }
}

enum Due {
    Talk,
    EndTalk,
    Idle,
    TouchDone,
}

/// The interaction state machine. One instance owns every piece of mutable
/// interaction state; nothing here is shared.
pub struct InteractionStateMachine {
    config: MachineConfig,
    tracker: StabilityTracker,
    picker: ContentPicker,
    state: State,
    valid_count: usize,
    greetings: u64,
    audio_done: Option<u64>,
    pending_touch: Option<Gesture>,
    input_cooldown_until: Option<Instant>,
}

impl InteractionStateMachine {
    pub fn new(config: MachineConfig, pools: ContentPools, now: Instant) -> Self {
        Self::with_picker(config, ContentPicker::new(pools), now)
    }

    pub fn with_picker(config: MachineConfig, picker: ContentPicker, now: Instant) -> Self {
        Self {
            tracker: StabilityTracker::new(config.stable_frames),
            config,
            picker,
            state: State::Idle { since: now },
            valid_count: 0,
            greetings: 0,
            audio_done: None,
            pending_touch: None,
            input_cooldown_until: None,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn state(&self) -> StateKind {
        self.state.kind()
    }

    /// Deadline of the current timed state, if any.
    pub fn state_until(&self) -> Option<Instant> {
        self.state.until()
    }

    /// Valid detections in the most recent tick.
    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    pub fn picker(&self) -> &ContentPicker {
        &self.picker
    }

    /// The line being shown, while talking.
    pub fn current_line(&self) -> Option<&Compliment> {
        match &self.state {
            State::Talking { line, .. } => Some(&line.compliment),
            _ => None,
        }
    }

    /// Replace the content pools (clears recent history).
    pub fn set_pools(&mut self, pools: ContentPools) {
        self.picker.set_pools(pools);
    }

    /// Clear every history and return to idle.
    pub fn reset(&mut self, now: Instant) {
        self.tracker.reset();
        self.picker.reset();
        self.valid_count = 0;
        self.audio_done = None;
        self.pending_touch = None;
        self.input_cooldown_until = None;
        tracing::info!(from = %self.state.kind(), "state machine reset");
        self.state = State::Idle { since: now };
    }

    /// Report that playback for `greeting` completed. Only honored in
    /// [`TalkEnd::Audio`] mode and only for the line currently being spoken;
    /// applied on the next tick.
    pub fn notify_audio_finished(&mut self, greeting: u64) {
        if self.config.talk_end != TalkEnd::Audio {
            tracing::trace!(greeting, "audio completion ignored: timer mode");
            return;
        }
        match self.state {
            State::Talking { greeting: current, .. } if current == greeting => {
                self.audio_done = Some(greeting);
            }
            _ => tracing::debug!(greeting, "stale audio completion ignored"),
        }
    }

    /// Queue a touch-triggered animation for the next tick. Only accepted
    /// while idle and outside the input cooldown; a greeting triggered in the
    /// same tick still takes precedence.
    pub fn request_touch(&mut self, gesture: Gesture, now: Instant) -> Result<(), TouchRejected> {
        if !matches!(self.state, State::Idle { .. }) {
            return Err(TouchRejected::Busy(self.state.kind()));
        }
        if self.input_cooldown_until.is_some_and(|until| now < until) {
            return Err(TouchRejected::InputCooldown);
        }
        if self.pending_touch.is_some() {
            return Err(TouchRejected::AlreadyQueued);
        }
        self.pending_touch = Some(gesture);
        Ok(())
    }

    /// Advance the machine by one render tick.
    pub fn tick(&mut self, tick: Tick<'_>) -> Vec<Effect> {
        let now = tick.now;
        let mut effects = Vec::new();

        let valid = count_valid(&tick.batch.detections, tick.surface, &self.config.filter);
        self.valid_count = valid;
        self.tracker.push(valid);
        if let State::GreetingWave { peak_count, .. } = &mut self.state {
            *peak_count = (*peak_count).max(valid);
        }

        if let Some(done) = self.audio_done.take() {
            if matches!(self.state, State::Talking { greeting, .. } if greeting == done) {
                tracing::debug!(greeting = done, "playback finished");
                self.finish_talking(now, &mut effects);
            }
        }

        self.expire_into(now, tick.local, &mut effects);

        // Absence must outlast the presence vote, so one dropped frame keeps
        // a lingering person silenced.
        if valid == 0
            && self.config.silence_clears_on_absence
            && !self.tracker.is_stable()
            && matches!(self.state, State::Silence { .. })
        {
            tracing::debug!("nobody in view; ending silence early");
            self.tracker.clear_history();
            self.transition(State::Idle { since: now }, &mut effects);
        }

        let mut greeted = false;
        if matches!(self.state, State::Idle { .. }) && self.tracker.is_stable() {
            self.tracker.clear_history();
            let until = now + Duration::from_millis(self.config.wave_ms);
            self.transition(
                State::GreetingWave {
                    started: now,
                    until,
                    peak_count: valid,
                },
                &mut effects,
            );
            effects.push(Effect::StartAnimation(Gesture::Wave));
            greeted = true;
        }

        if let Some(gesture) = self.pending_touch.take() {
            if greeted {
                tracing::debug!(?gesture, "touch dropped: greeting took precedence");
            } else if matches!(self.state, State::Idle { .. }) {
                let playback = AnimationPlayback::start(self.config.animation(gesture), now);
                self.transition(State::Touch { gesture, playback }, &mut effects);
                effects.push(Effect::StartAnimation(gesture));
            } else {
                tracing::debug!(?gesture, state = %self.state.kind(), "touch dropped: no longer idle");
            }
        }

        effects
    }

    /// Apply any due timer. Calling this again with the same clock does
    /// nothing further.
    pub fn expire(&mut self, now: Instant, local: NaiveDateTime) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.expire_into(now, local, &mut effects);
        effects
    }

    fn expire_into(&mut self, now: Instant, local: NaiveDateTime, effects: &mut Vec<Effect>) {
        let due = match &mut self.state {
            State::GreetingWave { until, .. } if now >= *until => Some(Due::Talk),
            State::Talking { until, .. } if now >= *until => Some(Due::EndTalk),
            State::Cooldown { until } | State::Silence { until } if now >= *until => Some(Due::Idle),
            State::Touch { playback, .. } => match playback.advance(now) {
                FramePosition::Finished => Some(Due::TouchDone),
                FramePosition::Frame(_) => None,
            },
            _ => None,
        };

        match due {
            Some(Due::Talk) => self.begin_talking(now, local, effects),
            Some(Due::EndTalk) => {
                if self.config.talk_end == TalkEnd::Audio {
                    tracing::warn!("no playback completion before deadline; ending talk on timer");
                }
                self.finish_talking(now, effects);
            }
            Some(Due::Idle) => self.transition(State::Idle { since: now }, effects),
            Some(Due::TouchDone) => {
                self.input_cooldown_until =
                    Some(now + Duration::from_millis(self.config.input_cooldown_ms));
                self.transition(State::Idle { since: now }, effects);
            }
            None => {}
        }
    }

    fn begin_talking(&mut self, now: Instant, local: NaiveDateTime, effects: &mut Vec<Effect>) {
        let peak_count = match self.state {
            State::GreetingWave { peak_count, .. } => peak_count,
            _ => self.valid_count,
        };
        let long_dwell = self.tracker.consecutive() > self.config.long_dwell_ticks;
        let selection = Selection {
            explicit: self.config.category_override.as_deref(),
            valid_count: peak_count,
            long_dwell,
            hour: local.hour(),
        };
        let picked = self.picker.pick(&selection);
        if long_dwell {
            self.tracker.reset_consecutive();
        }

        self.greetings += 1;
        let greeting = self.greetings;
        let shown_for = self.config.talk_duration(&picked.compliment.text);
        let until = match self.config.talk_end {
            TalkEnd::Timer => now + shown_for,
            TalkEnd::Audio => now + shown_for + Duration::from_millis(self.config.audio_grace_ms),
        };
        let display_ms = u64::try_from(shown_for.as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            greeting,
            category = picked.category.as_deref().unwrap_or("any"),
            text = %picked.compliment.text,
            people = peak_count,
            display_ms,
            "greeting"
        );

        let playback = match &picked.compliment.audio {
            Some(clip) => Effect::PlayClip {
                greeting,
                clip: clip.clone(),
            },
            None => Effect::PlayByKey {
                greeting,
                text: picked.compliment.text.clone(),
            },
        };

        self.transition(
            State::Talking {
                greeting,
                line: picked,
                until,
            },
            effects,
        );
        effects.push(Effect::RecordGreeting { day: local.date() });
        effects.push(playback);
    }

    fn finish_talking(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let next = match self.config.after_talk {
            AfterTalk::Idle => State::Idle { since: now },
            AfterTalk::Cooldown => State::Cooldown {
                until: now + Duration::from_millis(self.config.cooldown_ms),
            },
            AfterTalk::Silence => State::Silence {
                until: now + Duration::from_millis(self.config.silence_ms),
            },
        };
        self.transition(next, effects);
    }

    fn transition(&mut self, next: State, effects: &mut Vec<Effect>) {
        let from = self.state.kind();
        let to = next.kind();
        tracing::info!(%from, %to, "state transition");
        self.state = next;
        effects.push(Effect::Transition { from, to });
    }

    /// What the renderer should draw at `now`.
    pub fn scene(&self, now: Instant) -> Scene {
        match &self.state {
            State::Idle { since } => {
                let interval = self.config.blink_interval_ms;
                let blink = self.config.blink_ms;
                if interval > 0 && blink > 0 {
                    let phase = now.saturating_duration_since(*since).as_millis() as u64 % interval;
                    if phase >= interval.saturating_sub(blink) {
                        return Scene::Blink;
                    }
                }
                Scene::Idle
            }
            State::GreetingWave { started, .. } => {
                let spec = self.config.wave_animation;
                Scene::Wave(frame_or_last(
                    spec,
                    spec.frame_at(now.saturating_duration_since(*started)),
                ))
            }
            State::Talking { line, .. } => Scene::Speak(line.compliment.text.clone()),
            State::Cooldown { .. } | State::Silence { .. } => Scene::Idle,
            State::Touch { gesture, playback } => {
                let frame = frame_or_last(playback.spec(), playback.position(now));
                match gesture {
                    Gesture::Wave => Scene::Wave(frame),
                    Gesture::Fun => Scene::Fun(frame),
                }
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let (line, category) = match &self.state {
            State::Talking { line, .. } => (
                Some(line.compliment.text.clone()),
                line.category.clone(),
            ),
            _ => (None, None),
        };
        Snapshot {
            state: self.state.kind(),
            valid_count: self.valid_count,
            consecutive: self.tracker.consecutive(),
            history_hits: self.tracker.hits(),
            history_len: self.tracker.len(),
            stable: self.tracker.is_stable(),
            greetings: self.greetings,
            line,
            category,
        }
    }
}

fn frame_or_last(spec: AnimationSpec, position: FramePosition) -> u32 {
    match position {
        FramePosition::Frame(index) => index,
        FramePosition::Finished => spec.frame_count.saturating_sub(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::category;
    use crate::types::Detection;
    use std::collections::BTreeMap;

    const SURFACE: Surface = Surface::new(640, 480);
    const STEP_MS: u64 = 33;

    fn face() -> Detection {
        Detection::new((280.0, 200.0), (360.0, 280.0), 0.9)
    }

    fn batch(people: usize) -> DetectionBatch {
        DetectionBatch::new(vec![face(); people])
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
    }

    fn pools() -> ContentPools {
        let mut map = BTreeMap::new();
        map.insert(
            category::GENERAL.to_string(),
            (0..8).map(|i| Compliment::new(format!("general {i}"))).collect(),
        );
        map.insert(
            category::GROUP.to_string(),
            vec![
                Compliment::new("Hello, all of you!"),
                Compliment::with_audio("What a team!", "team.mp3"),
            ],
        );
        map.insert(
            category::LONG_DWELL.to_string(),
            vec![Compliment::new("Still here? Lovely.")],
        );
        ContentPools::from_categories(map)
    }

    fn config() -> MachineConfig {
        MachineConfig {
            stable_frames: 5,
            ..MachineConfig::default()
        }
    }

    struct Harness {
        machine: InteractionStateMachine,
        now: Instant,
        local: NaiveDateTime,
    }

    impl Harness {
        fn new(config: MachineConfig) -> Self {
            let now = Instant::now();
            Self {
                machine: InteractionStateMachine::with_picker(
                    config,
                    ContentPicker::seeded(pools(), 11),
                    now,
                ),
                now,
                local: noon(),
            }
        }

        fn tick(&mut self, people: usize) -> Vec<Effect> {
            self.now += Duration::from_millis(STEP_MS);
            let batch = batch(people);
            self.machine.tick(Tick {
                now: self.now,
                local: self.local,
                batch: &batch,
                surface: SURFACE,
            })
        }

        fn ticks(&mut self, n: usize, people: usize) -> Vec<Effect> {
            (0..n).flat_map(|_| self.tick(people)).collect()
        }

        /// Tick with `people` until the machine leaves `state` (bounded).
        fn run_while(&mut self, state: StateKind, people: usize) -> Vec<Effect> {
            let mut effects = Vec::new();
            for _ in 0..10_000 {
                if self.machine.state() != state {
                    return effects;
                }
                effects.extend(self.tick(people));
            }
            panic!("machine stuck in {state}");
        }

        fn greet(&mut self, people: usize) -> Vec<Effect> {
            let mut effects = self.ticks(5, people);
            assert_eq!(self.machine.state(), StateKind::GreetingWave);
            effects.extend(self.run_while(StateKind::GreetingWave, people));
            assert_eq!(self.machine.state(), StateKind::Talking);
            effects
        }
    }

    fn transitions(effects: &[Effect]) -> Vec<(StateKind, StateKind)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Transition { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_stable_presence_triggers_greeting_wave() {
        let mut h = Harness::new(config());
        h.ticks(4, 1);
        assert_eq!(h.machine.state(), StateKind::Idle);

        let effects = h.tick(1);
        assert_eq!(h.machine.state(), StateKind::GreetingWave);
        assert!(effects.contains(&Effect::StartAnimation(Gesture::Wave)));
        assert!(h.machine.tracker().is_empty(), "history cleared on trigger");
    }

    #[test]
    fn test_wave_expiry_starts_talking_and_records_greeting() {
        let mut h = Harness::new(config());
        let effects = h.greet(1);

        let line = h.machine.current_line().expect("line while talking");
        assert!(!line.text.is_empty());

        let records: Vec<_> = effects
            .iter()
            .filter(|e| matches!(e, Effect::RecordGreeting { .. }))
            .collect();
        assert_eq!(
            records,
            vec![&Effect::RecordGreeting {
                day: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
            }]
        );
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::PlayByKey { greeting: 1, text } if text == &line.text
        )));
        assert_eq!(
            transitions(&effects),
            vec![
                (StateKind::Idle, StateKind::GreetingWave),
                (StateKind::GreetingWave, StateKind::Talking),
            ]
        );
    }

    #[test]
    fn test_wave_lasts_configured_delay() {
        let mut h = Harness::new(config());
        h.ticks(5, 1);
        let until = h.machine.state_until().unwrap();
        h.machine.expire(until - Duration::from_millis(1), h.local);
        assert_eq!(h.machine.state(), StateKind::GreetingWave);
        h.machine.expire(until, h.local);
        assert_eq!(h.machine.state(), StateKind::Talking);
    }

    #[test]
    fn test_group_category_when_two_people_trigger() {
        let mut h = Harness::new(config());
        h.ticks(4, 1);
        h.tick(2);
        assert_eq!(h.machine.state(), StateKind::GreetingWave);
        // Second person steps out during the wave; the group was still seen.
        h.run_while(StateKind::GreetingWave, 1);

        let snapshot = h.machine.snapshot();
        assert_eq!(snapshot.category.as_deref(), Some(category::GROUP));
        let group = h.machine.picker().pools().category(category::GROUP);
        assert!(group.iter().any(|c| Some(&c.text) == snapshot.line.as_ref()));
    }

    #[test]
    fn test_clip_audio_requests_clip_playback() {
        let mut h = Harness::new(config());
        // With two people both group lines are candidates; greet until the clip one shows.
        for _ in 0..20 {
            let effects = h.greet(2);
            if let Some(Effect::PlayClip { clip, .. }) =
                effects.iter().find(|e| matches!(e, Effect::PlayClip { .. }))
            {
                assert_eq!(clip, "team.mp3");
                return;
            }
            h.machine.reset(h.now);
        }
        panic!("clip line never picked");
    }

    #[test]
    fn test_expire_is_idempotent() {
        let mut h = Harness::new(config());
        h.ticks(5, 1);
        let until = h.machine.state_until().unwrap();

        let first = h.machine.expire(until, h.local);
        let second = h.machine.expire(until, h.local);
        assert_eq!(transitions(&first), vec![(StateKind::GreetingWave, StateKind::Talking)]);
        assert!(second.is_empty());
        assert_eq!(h.machine.snapshot().greetings, 1);
    }

    #[test]
    fn test_talk_duration_scales_with_text() {
        let config = MachineConfig::default();
        assert_eq!(config.talk_duration("Hi"), Duration::from_millis(3500));
        let long = "x".repeat(20);
        assert_eq!(config.talk_duration(&long), Duration::from_millis(4800));
    }

    #[test]
    fn test_timer_talk_then_cooldown_then_idle() {
        let mut h = Harness::new(MachineConfig {
            after_talk: AfterTalk::Cooldown,
            ..config()
        });
        h.greet(1);
        let text = h.machine.current_line().unwrap().text.clone();
        let talk_started = h.now;
        h.run_while(StateKind::Talking, 1);
        assert_eq!(h.machine.state(), StateKind::Cooldown);
        assert!(h.now - talk_started >= h.machine.config().talk_duration(&text));

        h.run_while(StateKind::Cooldown, 0);
        assert_eq!(h.machine.state(), StateKind::Idle);
    }

    #[test]
    fn test_after_talk_idle_goes_straight_to_idle() {
        let mut h = Harness::new(MachineConfig {
            after_talk: AfterTalk::Idle,
            ..config()
        });
        h.greet(1);
        let effects = h.run_while(StateKind::Talking, 0);
        assert_eq!(transitions(&effects), vec![(StateKind::Talking, StateKind::Idle)]);
    }

    #[test]
    fn test_silence_blocks_lingering_person() {
        let mut h = Harness::new(MachineConfig {
            silence_ms: 2000,
            ..config()
        });
        h.greet(1);
        h.run_while(StateKind::Talking, 1);
        assert_eq!(h.machine.state(), StateKind::Silence);

        // Stable presence the whole time, still no greeting until silence ends.
        h.ticks(30, 1);
        assert!(h.machine.tracker().is_stable());
        assert_eq!(h.machine.state(), StateKind::Silence);

        let effects = h.run_while(StateKind::Silence, 1);
        assert_eq!(
            transitions(&effects),
            vec![
                (StateKind::Silence, StateKind::Idle),
                (StateKind::Idle, StateKind::GreetingWave),
            ]
        );
    }

    #[test]
    fn test_silence_clears_early_when_person_leaves() {
        let mut h = Harness::new(config());
        h.greet(1);
        h.run_while(StateKind::Talking, 1);
        assert_eq!(h.machine.state(), StateKind::Silence);

        h.tick(0);
        assert_eq!(h.machine.state(), StateKind::Silence);
        h.tick(0);
        assert_eq!(h.machine.state(), StateKind::Idle);

        // Presence has to be re-earned after the early clear.
        h.ticks(4, 1);
        assert_eq!(h.machine.state(), StateKind::Idle);
        h.tick(1);
        assert_eq!(h.machine.state(), StateKind::GreetingWave);
    }

    #[test]
    fn test_dropped_frames_do_not_end_silence() {
        let mut h = Harness::new(config());
        h.greet(1);
        h.run_while(StateKind::Talking, 1);
        assert_eq!(h.machine.state(), StateKind::Silence);

        // One missed frame every couple of seconds while the person lingers.
        let mut effects = Vec::new();
        for _ in 0..8 {
            effects.extend(h.tick(0));
            effects.extend(h.ticks(60, 1));
        }
        assert_eq!(h.machine.state(), StateKind::Silence);
        assert!(transitions(&effects).is_empty());
        assert_eq!(h.machine.snapshot().greetings, 1);
    }

    #[test]
    fn test_silence_kept_on_absence_when_configured() {
        let mut h = Harness::new(MachineConfig {
            silence_clears_on_absence: false,
            ..config()
        });
        h.greet(1);
        h.run_while(StateKind::Talking, 1);
        h.ticks(10, 0);
        assert_eq!(h.machine.state(), StateKind::Silence);
    }

    #[test]
    fn test_audio_completion_ends_talk() {
        let mut h = Harness::new(MachineConfig {
            talk_end: TalkEnd::Audio,
            after_talk: AfterTalk::Cooldown,
            ..config()
        });
        h.greet(1);
        h.machine.notify_audio_finished(1);
        assert_eq!(h.machine.state(), StateKind::Talking, "applied on next tick");

        let effects = h.tick(1);
        assert_eq!(transitions(&effects), vec![(StateKind::Talking, StateKind::Cooldown)]);
    }

    #[test]
    fn test_stale_audio_completion_ignored() {
        let mut h = Harness::new(MachineConfig {
            talk_end: TalkEnd::Audio,
            ..config()
        });
        h.greet(1);
        h.machine.notify_audio_finished(7);
        h.tick(1);
        assert_eq!(h.machine.state(), StateKind::Talking);
    }

    #[test]
    fn test_audio_mode_falls_back_to_timer() {
        let mut h = Harness::new(MachineConfig {
            talk_end: TalkEnd::Audio,
            audio_grace_ms: 1000,
            after_talk: AfterTalk::Cooldown,
            ..config()
        });
        h.greet(1);
        let text = h.machine.current_line().unwrap().text.clone();
        let started = h.now;
        h.run_while(StateKind::Talking, 1);
        let expected = h.machine.config().talk_duration(&text) + Duration::from_millis(1000);
        assert!(h.now - started >= expected);
        assert_eq!(h.machine.state(), StateKind::Cooldown);
    }

    #[test]
    fn test_timer_mode_ignores_audio_completion() {
        let mut h = Harness::new(config());
        h.greet(1);
        h.machine.notify_audio_finished(1);
        h.tick(1);
        assert_eq!(h.machine.state(), StateKind::Talking);
    }

    #[test]
    fn test_greeting_beats_touch_in_same_tick() {
        let mut h = Harness::new(config());
        h.ticks(4, 1);
        h.machine
            .request_touch(Gesture::Fun, h.now)
            .expect("idle machine accepts touch");

        let effects = h.tick(1);
        assert_eq!(h.machine.state(), StateKind::GreetingWave);
        assert!(!effects.contains(&Effect::StartAnimation(Gesture::Fun)));

        // The dropped touch does not resurface later.
        h.run_while(StateKind::GreetingWave, 1);
        assert_eq!(h.machine.state(), StateKind::Talking);
    }

    #[test]
    fn test_touch_wave_plays_then_input_cooldown() {
        let mut h = Harness::new(config());
        h.machine.request_touch(Gesture::Wave, h.now).unwrap();
        let effects = h.tick(0);
        assert_eq!(h.machine.state(), StateKind::TouchWave);
        assert!(effects.contains(&Effect::StartAnimation(Gesture::Wave)));

        let started = h.now;
        h.run_while(StateKind::TouchWave, 0);
        assert_eq!(h.machine.state(), StateKind::Idle);
        assert!(h.now - started >= Duration::from_millis(WAVE.total_ms()));

        assert_eq!(
            h.machine.request_touch(Gesture::Fun, h.now),
            Err(TouchRejected::InputCooldown)
        );
        let cooldown = Duration::from_millis(h.machine.config().input_cooldown_ms);
        assert_eq!(h.machine.request_touch(Gesture::Fun, h.now + cooldown), Ok(()));
    }

    #[test]
    fn test_touch_blocks_presence_until_finished() {
        let mut h = Harness::new(config());
        h.machine.request_touch(Gesture::Fun, h.now).unwrap();
        h.tick(1);
        assert_eq!(h.machine.state(), StateKind::TouchFun);

        h.ticks(10, 1);
        assert!(h.machine.tracker().is_stable());
        assert_eq!(h.machine.state(), StateKind::TouchFun);

        let effects = h.run_while(StateKind::TouchFun, 1);
        assert_eq!(
            transitions(&effects),
            vec![
                (StateKind::TouchFun, StateKind::Idle),
                (StateKind::Idle, StateKind::GreetingWave),
            ]
        );
    }

    #[test]
    fn test_touch_rejected_while_busy_or_queued() {
        let mut h = Harness::new(config());
        h.machine.request_touch(Gesture::Wave, h.now).unwrap();
        assert_eq!(
            h.machine.request_touch(Gesture::Fun, h.now),
            Err(TouchRejected::AlreadyQueued)
        );
        h.tick(0);
        assert_eq!(
            h.machine.request_touch(Gesture::Fun, h.now),
            Err(TouchRejected::Busy(StateKind::TouchWave))
        );
    }

    #[test]
    fn test_long_dwell_category() {
        let mut h = Harness::new(MachineConfig {
            long_dwell_ticks: 40,
            after_talk: AfterTalk::Idle,
            ..config()
        });
        h.greet(1);
        assert_ne!(h.machine.snapshot().category.as_deref(), Some(category::LONG_DWELL));

        // The same person stays in view through the line and is greeted again.
        h.run_while(StateKind::Talking, 1);
        assert_eq!(h.machine.state(), StateKind::GreetingWave);
        h.run_while(StateKind::GreetingWave, 1);
        assert_eq!(h.machine.snapshot().category.as_deref(), Some(category::LONG_DWELL));
        assert_eq!(h.machine.tracker().consecutive(), 0);
    }

    #[test]
    fn test_empty_and_malformed_batches_mean_nobody() {
        let mut h = Harness::new(config());
        let junk = DetectionBatch {
            count: 4,
            detections: vec![Detection {
                top_left: (0.0, 0.0),
                bottom_right: (2.0, 2.0),
                probability: None,
            }],
        };
        for _ in 0..20 {
            h.now += Duration::from_millis(STEP_MS);
            let effects = h.machine.tick(Tick {
                now: h.now,
                local: h.local,
                batch: &junk,
                surface: SURFACE,
            });
            assert!(effects.is_empty());
        }
        assert_eq!(h.machine.valid_count(), 0);
        assert_eq!(h.machine.state(), StateKind::Idle);
    }

    #[test]
    fn test_scenes_follow_state() {
        let mut h = Harness::new(MachineConfig {
            blink_interval_ms: 1000,
            blink_ms: 100,
            ..config()
        });
        let start = h.now;
        assert_eq!(h.machine.scene(start), Scene::Idle);
        assert_eq!(h.machine.scene(start + Duration::from_millis(950)), Scene::Blink);

        h.ticks(5, 1);
        assert_eq!(h.machine.scene(h.now), Scene::Wave(0));
        assert_eq!(
            h.machine.scene(h.now + Duration::from_millis(160)),
            Scene::Wave(1)
        );

        h.run_while(StateKind::GreetingWave, 1);
        let text = h.machine.current_line().unwrap().text.clone();
        assert_eq!(h.machine.scene(h.now), Scene::Speak(text));
    }

    #[test]
    fn test_reset_returns_to_idle_and_clears_history() {
        let mut h = Harness::new(config());
        h.greet(1);
        h.machine.reset(h.now);
        assert_eq!(h.machine.state(), StateKind::Idle);
        assert!(h.machine.tracker().is_empty());
        assert_eq!(h.machine.tracker().consecutive(), 0);
        assert!(h.machine.picker().recent().is_empty());
        assert_eq!(h.machine.state_until(), None);
    }

    #[test]
    fn test_setting_parsers() {
        assert_eq!("Audio".parse::<TalkEnd>(), Ok(TalkEnd::Audio));
        assert_eq!("silence".parse::<AfterTalk>(), Ok(AfterTalk::Silence));
        assert_eq!(" fun ".parse::<Gesture>(), Ok(Gesture::Fun));
        assert!("dance".parse::<Gesture>().is_err());
    }

    #[test]
    fn test_config_deserializes_partial_toml_shape() {
        let config: MachineConfig = serde_json::from_str(
            r#"{"stable_frames": 12, "after_talk": "cooldown", "filter": {"use_roi": false}}"#,
        )
        .unwrap();
        assert_eq!(config.stable_frames, 12);
        assert_eq!(config.after_talk, AfterTalk::Cooldown);
        assert!(!config.filter.use_roi);
        assert_eq!(config.filter.min_probability, 0.65);
        assert_eq!(config.wave_ms, 400);
    }
}
