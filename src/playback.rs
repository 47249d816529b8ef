//! Driving an arm through a loaded track.
//!
//! Dense tracks are replayed open-loop against their recorded timestamps.
//! Sparse tracks are interpolated linearly between control points at the
//! control rate. Either way the [`Player`] first runs the pre-flight safety
//! check and glides to the track's first pose if the arm is not already
//! there, and it always leaves the arm in standby when it is done,
//! cancelled, or failed.
//!
//! Two signals reach into a running loop: the [`StopToken`], checked every
//! control cycle, and the [`PauseSentinel`], which freezes the loop in place
//! (trajectory time included) and disengages motion until released.

use crate::arm::{ArmError, ArmHandle, ModeCommand, ALL_MOTORS};
use crate::config::Config;
use crate::pause::PauseSentinel;
use crate::pose::{Pose, GRIPPER};
use crate::position::PoseReader;
use crate::rate::{sleep_interruptible, Ticker};
use crate::safety::{preflight, SafetyError, SafetyPolicy};
use crate::track::{ControlPoint, Track, TrackError, TrackPoint, TrackStore};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Shared cancellation flag for one arm's playback.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// A token that has not been stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every loop holding this token to stop at its next checkpoint.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous stop before starting new work.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a playback ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayOutcome {
    /// Every point was sent.
    Completed,
    /// The stop token fired.
    Cancelled,
    /// There was nothing to play.
    Empty,
}

/// A nice little error for playback.
#[derive(Debug)]
pub enum PlaybackError {
    /// The hardware link failed.
    Arm(ArmError),
    /// A track could not be loaded.
    Track(TrackError),
    /// The pre-flight check refused.
    Safety(SafetyError),
    /// A point's time offset is not a usable wait.
    Timing {
        /// Track at fault.
        name: String,
        #[allow(missing_docs)]
        point: usize,
        #[allow(missing_docs)]
        offset: f64,
    },
    /// A glide ended too far from its target.
    NotConverged {
        #[allow(missing_docs)]
        target: Pose,
        #[allow(missing_docs)]
        actual: Pose,
    },
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use PlaybackError as PE;
        let msg = match self {
            PE::Arm(error) => Cow::from(format!("arm: {}", error)),
            PE::Track(error) => Cow::from(format!("track: {}", error)),
            PE::Safety(error) => Cow::from(format!("safety: {}", error)),
            PE::Timing {
                name,
                point,
                offset,
            } => Cow::from(format!(
                "{} point {} is {}s from the start; not a usable offset",
                name, point, offset
            )),
            PE::NotConverged { target, actual } => Cow::from(format!(
                "not close to target: wanted {}, arm is at {}",
                target, actual
            )),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for PlaybackError {}

impl From<ArmError> for PlaybackError {
    fn from(value: ArmError) -> Self {
        Self::Arm(value)
    }
}

impl From<TrackError> for PlaybackError {
    fn from(value: TrackError) -> Self {
        Self::Track(value)
    }
}

impl From<SafetyError> for PlaybackError {
    fn from(value: SafetyError) -> Self {
        Self::Safety(value)
    }
}

/// Number of interpolation steps for a segment: the effective duration
/// `duration * (1 - speed_up)` times the control rate, floored, at least one.
pub fn segment_steps(duration: f64, speed_up: f64, hz: f64) -> usize {
    let raw = duration.max(0.0) * (1.0 - speed_up) * hz;
    // Durations like 2.3 s at 50 Hz come out a hair under the integer.
    ((raw + 1e-9).floor() as usize).max(1)
}

/// Gripper targets are closed a little beyond what was recorded, to take up
/// mechanical slack.
pub fn tighten_gripper(pose: &Pose, tighten: f64) -> Pose {
    if tighten <= 0.0 {
        return *pose;
    }
    pose.with_gripper((pose.gripper() as f64 * (1.0 - tighten)) as i32)
}

/// Timing and gripper parameters of a [`Player`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSettings {
    #[allow(missing_docs)]
    pub hz: f64,
    #[allow(missing_docs)]
    pub glide_steps: usize,
    #[allow(missing_docs)]
    pub timed_glide_steps: usize,
    #[allow(missing_docs)]
    pub speed_pct: u8,
    #[allow(missing_docs)]
    pub delay_between_tracks: Duration,
    /// How long a finished glide may take to settle within tolerance.
    pub settle_after_glide: Duration,
    #[allow(missing_docs)]
    pub pause_poll: Duration,
    #[allow(missing_docs)]
    pub gripper_effort: u16,
    #[allow(missing_docs)]
    pub gripper_tighten: f64,
}

impl From<&Config> for PlaybackSettings {
    fn from(config: &Config) -> Self {
        PlaybackSettings {
            hz: config.control.hz,
            glide_steps: config.control.glide_steps,
            timed_glide_steps: config.control.timed_glide_steps,
            speed_pct: config.control.speed_pct,
            delay_between_tracks: config.control.delay_between_tracks(),
            settle_after_glide: config.control.settle_after_glide(),
            pause_poll: config.control.pause_poll(),
            gripper_effort: config.gripper.effort,
            gripper_tighten: config.gripper.tighten,
        }
    }
}

impl PlaybackSettings {
    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.hz)
    }
}

/// Called with every pose the player commands, before gripper tightening.
pub type PointHook = Arc<dyn Fn(&Pose) + Send + Sync>;

enum Hold {
    Clear,
    Resumed(Duration),
    Cancelled,
}

/// Plays tracks on one arm.
pub struct Player {
    reader: PoseReader,
    tracks: TrackStore,
    safe: TrackStore,
    policy: SafetyPolicy,
    settings: PlaybackSettings,
    pause: PauseSentinel,
    stop: StopToken,
    hook: Option<PointHook>,
}

impl Player {
    /// A player for `arm`, configured from `config`, cancelled by `stop`.
    pub fn new(arm: ArmHandle, config: &Config, stop: StopToken) -> Self {
        Player {
            reader: PoseReader::new(arm),
            tracks: TrackStore::new(&config.tracks_dir).with_speed_up(config.speed_up.clone()),
            safe: TrackStore::new(config.safe_dir()),
            policy: SafetyPolicy::from(&config.safety),
            settings: PlaybackSettings::from(config),
            pause: PauseSentinel::new(&config.pause_file),
            stop,
            hook: None,
        }
    }

    /// Observe every commanded pose.
    pub fn with_hook(self, hook: PointHook) -> Self {
        Player {
            hook: Some(hook),
            ..self
        }
    }

    /// The store tracks are loaded from.
    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    /// The stop token this player obeys.
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// The pose accessor.
    pub fn reader(&self) -> &PoseReader {
        &self.reader
    }

    fn arm(&self) -> &ArmHandle {
        self.reader.arm()
    }

    /// The pose actually sent for a recorded `pose`.
    pub fn effective_target(&self, pose: &Pose) -> Pose {
        tighten_gripper(pose, self.settings.gripper_tighten)
    }

    fn send(&self, pose: &Pose) -> Result<(), ArmError> {
        let target = self.effective_target(pose);
        self.arm().send_pose(&target, self.settings.gripper_effort)?;
        if let Some(hook) = &self.hook {
            hook(pose);
        }
        Ok(())
    }

    /// Enable every motor and switch to joint control.
    pub fn prepare(&self) -> Result<(), ArmError> {
        self.arm().with(|arm| {
            arm.enable(ALL_MOTORS)?;
            arm.set_mode(ModeCommand::joint(self.settings.speed_pct))
        })?;
        thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    /// Disengage motion.
    pub fn standby(&self) -> Result<(), ArmError> {
        self.arm().set_mode(ModeCommand::standby())
    }

    fn finish<T>(&self, result: Result<T, PlaybackError>) -> Result<T, PlaybackError> {
        if let Err(e) = self.standby() {
            warn!("failed to return arm to standby: {}", e);
        }
        result
    }

    fn hold_while_paused(&self) -> Result<Hold, ArmError> {
        if !self.pause.is_active() {
            return Ok(Hold::Clear);
        }
        let started = Instant::now();
        info!("[PAUSE] {} is set, holding", self.pause.path().display());
        self.standby()?;
        while self.pause.is_active() {
            if self.stop.is_stopped() {
                return Ok(Hold::Cancelled);
            }
            thread::sleep(self.settings.pause_poll);
        }
        if self.stop.is_stopped() {
            return Ok(Hold::Cancelled);
        }
        self.arm()
            .set_mode(ModeCommand::joint(self.settings.speed_pct))?;
        info!("[PAUSE] released after {:.1}s", started.elapsed().as_secs_f64());
        Ok(Hold::Resumed(started.elapsed()))
    }

    /// Interpolate from the current pose to `target` over `steps` control
    /// periods, ending exactly on it, then wait for the arm to settle within
    /// the strict tolerance. Leaves the arm in joint mode.
    pub fn glide(&self, target: &Pose, steps: usize) -> Result<PlayOutcome, PlaybackError> {
        let start = self.reader.current_pose()?;
        let steps = steps.max(1);
        self.prepare()?;
        debug!("[GLIDE] {} -> {} in {} steps", start, target, steps);
        let mut ticker = Ticker::new(self.settings.period());
        let mut step = 1;
        while step <= steps {
            if self.stop.is_stopped() {
                return Ok(PlayOutcome::Cancelled);
            }
            match self.hold_while_paused()? {
                Hold::Cancelled => return Ok(PlayOutcome::Cancelled),
                Hold::Resumed(_) => ticker = Ticker::new(self.settings.period()),
                Hold::Clear => {}
            }
            self.send(&start.lerp(target, step, steps))?;
            ticker.tick();
            step += 1;
        }

        let expected = self.effective_target(target);
        let deadline = Instant::now() + self.settings.settle_after_glide;
        loop {
            let actual = self.reader.current_pose()?;
            if self.policy.is_close_strict(&actual, &expected) {
                return Ok(PlayOutcome::Completed);
            }
            if Instant::now() >= deadline {
                return Err(PlaybackError::NotConverged {
                    target: expected,
                    actual,
                });
            }
            thread::sleep(self.settings.period());
        }
    }

    /// Glide to `target` and drop into standby.
    pub fn move_to(&self, target: &Pose) -> Result<PlayOutcome, PlaybackError> {
        let result = self.glide(target, self.settings.glide_steps);
        self.finish(result)
    }

    /// Run the pre-flight safety check against the current pose.
    pub fn preflight(&self) -> Result<(), PlaybackError> {
        let current = self.reader.current_pose()?;
        preflight(&self.safe, &current, &self.policy)?;
        Ok(())
    }

    fn move_to_start(&self, track: &Track) -> Result<PlayOutcome, PlaybackError> {
        let Some(first) = track.first_pose() else {
            return Ok(PlayOutcome::Empty);
        };
        let current = self.reader.current_pose()?;
        if self.policy.is_close(&current, &first) {
            return Ok(PlayOutcome::Completed);
        }
        let deviation = self.policy.deviation(&current, &first);
        info!(
            "[PLAY] {} starts {} away (joint {:?}), gliding there first",
            track.name(),
            deviation.delta,
            deviation.worst
        );
        let steps = match track {
            Track::SparseTimed(_) => self.settings.timed_glide_steps,
            Track::DenseUntimed(_) | Track::DenseTimed(_) => self.settings.glide_steps,
        };
        let outcome = self.glide(&first, steps)?;
        if outcome == PlayOutcome::Completed {
            thread::sleep(self.settings.settle_after_glide);
        }
        Ok(outcome)
    }

    /// Play one loaded track: pre-flight, glide to start, play.
    pub fn play_track(&self, track: &Track) -> Result<PlayOutcome, PlaybackError> {
        if track.is_empty() {
            warn!("[PLAY] {} has no points", track.name());
            return Ok(PlayOutcome::Empty);
        }
        let result = self.preflight().and_then(|_| self.play_checked(track));
        self.finish(result)
    }

    fn play_checked(&self, track: &Track) -> Result<PlayOutcome, PlaybackError> {
        if self.move_to_start(track)? == PlayOutcome::Cancelled {
            return Ok(PlayOutcome::Cancelled);
        }
        match track {
            Track::DenseUntimed(t) | Track::DenseTimed(t) => self.run_dense(&t.name, &t.points),
            Track::SparseTimed(t) => self.run_sparse(&t.name, &t.points, t.speed_up),
        }
    }

    /// Load and play tracks back to back. Every track is loaded before the
    /// arm moves, so a bad name fails without motion.
    pub fn play_sequence(&self, names: &[String]) -> Result<PlayOutcome, PlaybackError> {
        let tracks = names
            .iter()
            .map(|name| self.tracks.read_track(name))
            .collect::<Result<Vec<Track>, TrackError>>()?;
        let result = self.preflight().and_then(|_| {
            let mut outcome = PlayOutcome::Empty;
            for (i, track) in tracks.iter().enumerate() {
                if i > 0 {
                    info!(
                        "[PLAY] waiting {:.1}s before {}",
                        self.settings.delay_between_tracks.as_secs_f64(),
                        track.name()
                    );
                    let stop = &self.stop;
                    if sleep_interruptible(
                        self.settings.delay_between_tracks,
                        Duration::from_millis(100),
                        || stop.is_stopped(),
                    ) {
                        return Ok(PlayOutcome::Cancelled);
                    }
                }
                if track.is_empty() {
                    warn!("[PLAY] {} has no points", track.name());
                    continue;
                }
                match self.play_checked(track)? {
                    PlayOutcome::Cancelled => return Ok(PlayOutcome::Cancelled),
                    PlayOutcome::Completed => outcome = PlayOutcome::Completed,
                    PlayOutcome::Empty => {}
                }
                // Each run ends in standby; the next one re-engages.
                self.standby()?;
            }
            Ok(outcome)
        });
        self.finish(result)
    }

    fn log_progress(name: &str, sent: usize, total: usize, last_decile: &mut usize) {
        let decile = sent * 10 / total.max(1);
        if decile > *last_decile {
            *last_decile = decile;
            info!("[PLAY] {}: {}% ({}/{})", name, decile * 10, sent, total);
        }
    }

    /// Replay dense points against their timestamps. Each point goes out once
    /// its offset from the first point has elapsed; nothing waits for the
    /// arm to arrive.
    pub fn run_dense(&self, name: &str, points: &[TrackPoint]) -> Result<PlayOutcome, PlaybackError> {
        let Some(first) = points.first() else {
            warn!("[PLAY] {} has no points", name);
            return Ok(PlayOutcome::Empty);
        };
        let offsets = points
            .iter()
            .enumerate()
            .map(|(i, point)| {
                let offset = point.timestamp - first.timestamp;
                Duration::try_from_secs_f64(offset.max(0.0)).map_err(|_| PlaybackError::Timing {
                    name: name.to_owned(),
                    point: i,
                    offset,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("[PLAY] {}: {} dense points", name, points.len());
        self.prepare()?;
        let mut started = Instant::now();
        let mut last_decile = 0;

        for (i, (point, offset)) in points.iter().zip(offsets).enumerate() {
            loop {
                if self.stop.is_stopped() {
                    info!("[PLAY] {} cancelled at point {}", name, i);
                    return Ok(PlayOutcome::Cancelled);
                }
                match self.hold_while_paused()? {
                    Hold::Cancelled => return Ok(PlayOutcome::Cancelled),
                    Hold::Resumed(paused) => started += paused,
                    Hold::Clear => {}
                }
                let elapsed = started.elapsed();
                if elapsed >= offset {
                    break;
                }
                spin_sleep::sleep((offset - elapsed).min(Duration::from_millis(1)));
            }
            self.send(&point.pose)?;
            Self::log_progress(name, i + 1, points.len(), &mut last_decile);
        }
        Ok(PlayOutcome::Completed)
    }

    /// Interpolate between control points. Segment `i` runs from point
    /// `i - 1` to point `i` in [`segment_steps`] steps, the last of which is
    /// exactly point `i`.
    pub fn run_sparse(
        &self,
        name: &str,
        points: &[ControlPoint],
        speed_up: f64,
    ) -> Result<PlayOutcome, PlaybackError> {
        match points {
            [] => {
                warn!("[PLAY] {} has no points", name);
                Ok(PlayOutcome::Empty)
            }
            [only] => {
                info!("[PLAY] {}: single point, gliding", name);
                self.glide(&only.pose, self.settings.timed_glide_steps)
            }
            _ => {
                info!(
                    "[PLAY] {}: {} control points, speed-up {}",
                    name,
                    points.len(),
                    speed_up
                );
                self.prepare()?;
                let mut ticker = Ticker::new(self.settings.period());
                for (idx, pair) in points.windows(2).enumerate() {
                    let (from, to) = (pair[0].pose, pair[1].pose);
                    let steps = segment_steps(pair[1].duration, speed_up, self.settings.hz);
                    debug!(
                        "[PLAY] {} segment {}: {} steps, gripper {} -> {}",
                        name,
                        idx + 1,
                        steps,
                        from.0[GRIPPER],
                        to.0[GRIPPER]
                    );
                    for step in 1..=steps {
                        if self.stop.is_stopped() {
                            info!("[PLAY] {} cancelled in segment {}", name, idx + 1);
                            return Ok(PlayOutcome::Cancelled);
                        }
                        match self.hold_while_paused()? {
                            Hold::Cancelled => return Ok(PlayOutcome::Cancelled),
                            Hold::Resumed(_) => ticker = Ticker::new(self.settings.period()),
                            Hold::Clear => {}
                        }
                        self.send(&from.lerp(&to, step, steps))?;
                        ticker.tick();
                    }
                }
                info!("[PLAY] {} done", name);
                Ok(PlayOutcome::Completed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::safe_track_name;
    use crate::sim_arm::{SimArm, SimProbe};
    use std::sync::Mutex;

    // Rest pose of the simulated arm. Not all zero, so pose reads never wait.
    const START: Pose = Pose([0, 0, 0, 0, 0, 0, 1000]);

    struct Rig {
        _dir: tempfile::TempDir,
        config: Config,
        arm: ArmHandle,
        probe: SimProbe,
    }

    fn rig() -> Rig {
        let start = START;
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.tracks_dir = dir.path().join("tracks");
        config.scenes_dir = dir.path().join("scenes");
        config.pause_file = dir.path().join("pause.txt");
        config.speed_up.clear();
        config.control.hz = 500.0;
        config.control.glide_steps = 10;
        config.control.timed_glide_steps = 5;
        config.control.settle_after_glide = 0.05;
        config.control.delay_between_tracks = 0.0;
        config.control.pause_poll = 0.01;
        let sim = SimArm::builder().start_pose(start).build();
        let probe = sim.probe();
        let arm = ArmHandle::new(sim);
        arm.with(|arm| arm.connect()).unwrap();
        TrackStore::new(config.safe_dir())
            .write_dense_untimed(&safe_track_name("home"), &[TrackPoint::new(start, 0.0)])
            .unwrap();
        Rig {
            _dir: dir,
            config,
            arm,
            probe,
        }
    }

    fn recorder_hook() -> (PointHook, Arc<Mutex<Vec<Pose>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: PointHook = Arc::new(move |p: &Pose| sink.lock().unwrap().push(*p));
        (hook, seen)
    }

    #[test]
    fn step_counts() {
        assert_eq!(segment_steps(2.0, 0.5, 50.0), 50);
        assert_eq!(segment_steps(2.0, 0.0, 50.0), 100);
        assert_eq!(segment_steps(2.3, 0.0, 50.0), 115);
        assert_eq!(segment_steps(0.0, 0.0, 50.0), 1);
        assert_eq!(segment_steps(0.01, 0.0, 50.0), 1);
    }

    #[test]
    fn gripper_is_tightened() {
        let p = Pose([0, 0, 0, 0, 0, 0, 40000]);
        assert_eq!(tighten_gripper(&p, 0.075).gripper(), 37000);
        assert_eq!(tighten_gripper(&p, 0.0), p);
    }

    #[test]
    fn sparse_segment_ends_on_target() {
        let rig = rig();
        let mut config = rig.config.clone();
        config.control.hz = 50.0;
        let (hook, seen) = recorder_hook();
        let player = Player::new(rig.arm.clone(), &config, StopToken::new()).with_hook(hook);
        let points = [
            ControlPoint {
                pose: Pose::ZERO,
                duration: 0.0,
            },
            ControlPoint {
                pose: Pose([0, 0, 0, 0, 0, 0, 50000]),
                duration: 2.0,
            },
        ];
        let started = Instant::now();
        let outcome = player.run_sparse("right__grab", &points, 0.5).unwrap();
        assert_eq!(outcome, PlayOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_millis(950));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 50);
        assert_eq!(seen.last().unwrap().gripper(), 50000);
        assert_eq!(seen[24].gripper(), 25000);
        // What reached the hardware was tightened.
        assert_eq!(rig.probe.commanded_poses().last().unwrap().gripper(), 46250);
    }

    #[test]
    fn dense_playback_sends_every_point_and_ends_in_standby() {
        let rig = rig();
        let store = TrackStore::new(&rig.config.tracks_dir);
        let points: Vec<TrackPoint> = (0..20)
            .map(|i| TrackPoint::new(Pose([i * 10, 0, 0, 0, 0, 0, 0]), 50.0 + i as f64 * 0.002))
            .collect();
        store.write_dense_timed("left__wave", &points).unwrap();
        let (hook, seen) = recorder_hook();
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new()).with_hook(hook);
        let track = store.read_track("left__wave").unwrap();
        assert_eq!(player.play_track(&track).unwrap(), PlayOutcome::Completed);
        let expected: Vec<Pose> = points.iter().map(|p| p.pose).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(rig.probe.modes().last(), Some(&ModeCommand::standby()));
    }

    #[test]
    fn glides_to_start_when_far() {
        let rig = rig();
        let store = TrackStore::new(&rig.config.tracks_dir);
        let far = Pose([30000, 0, 0, 0, 0, 0, 1000]);
        store
            .write_sparse_timed(
                "left__reach",
                &[
                    ControlPoint {
                        pose: far,
                        duration: 0.0,
                    },
                    ControlPoint {
                        pose: Pose([31000, 0, 0, 0, 0, 0, 1000]),
                        duration: 0.01,
                    },
                ],
                0.0,
            )
            .unwrap();
        let (hook, seen) = recorder_hook();
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new()).with_hook(hook);
        let track = store.read_track("left__reach").unwrap();
        assert_eq!(player.play_track(&track).unwrap(), PlayOutcome::Completed);
        let seen = seen.lock().unwrap();
        // Five glide steps ending on the first point, then the segment.
        assert_eq!(seen[4], far);
        assert_eq!(seen[0], Pose([6000, 0, 0, 0, 0, 0, 1000]));
        assert_eq!(*seen.last().unwrap(), Pose([31000, 0, 0, 0, 0, 0, 1000]));
        assert_eq!(rig.probe.actual(), Pose([31000, 0, 0, 0, 0, 0, 925]));
    }

    #[test]
    fn glide_that_does_not_converge_aborts() {
        let rig = rig();
        // The arm never moves: slow enough that nothing happens in time.
        let sim = SimArm::builder().start_pose(START).tracking(0.0).build();
        let arm = ArmHandle::new(sim);
        arm.with(|arm| arm.connect()).unwrap();
        let player = Player::new(arm, &rig.config, StopToken::new());
        let err = player
            .move_to(&Pose([20000, 0, 0, 0, 0, 0, 0]))
            .unwrap_err();
        assert!(matches!(err, PlaybackError::NotConverged { .. }));
    }

    #[test]
    fn stop_cancels_and_leaves_standby() {
        let rig = rig();
        let stop = StopToken::new();
        let player = Player::new(rig.arm.clone(), &rig.config, stop.clone());
        stop.stop();
        let points = [
            ControlPoint {
                pose: Pose::ZERO,
                duration: 0.0,
            },
            ControlPoint {
                pose: Pose([100, 0, 0, 0, 0, 0, 0]),
                duration: 1.0,
            },
        ];
        let track = Track::SparseTimed(crate::track::SparseTrack {
            name: "left__x".to_owned(),
            points: points.to_vec(),
            speed_up: 0.0,
        });
        assert_eq!(player.play_track(&track).unwrap(), PlayOutcome::Cancelled);
        assert_eq!(rig.probe.modes().last(), Some(&ModeCommand::standby()));
        assert!(rig.probe.commanded_poses().is_empty());
    }

    #[test]
    fn missing_safe_tracks_block_playback() {
        let rig = rig();
        std::fs::remove_dir_all(rig.config.safe_dir()).unwrap();
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new());
        let track = Track::SparseTimed(crate::track::SparseTrack {
            name: "left__x".to_owned(),
            points: vec![ControlPoint {
                pose: Pose::ZERO,
                duration: 0.0,
            }],
            speed_up: 0.0,
        });
        assert!(matches!(
            player.play_track(&track),
            Err(PlaybackError::Safety(SafetyError::NoSafeTracks(_)))
        ));
        assert!(rig.probe.commanded_poses().is_empty());
    }

    #[test]
    fn pause_freezes_dense_time() {
        let rig = rig();
        let sentinel = PauseSentinel::new(&rig.config.pause_file);
        sentinel.set(true).unwrap();
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new());
        let points = vec![
            TrackPoint::new(Pose::ZERO, 0.0),
            TrackPoint::new(Pose([10, 0, 0, 0, 0, 0, 0]), 0.01),
        ];
        let release = {
            let sentinel = sentinel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                sentinel.set(false).unwrap();
            })
        };
        let started = Instant::now();
        assert_eq!(
            player.run_dense("left__x", &points).unwrap(),
            PlayOutcome::Completed
        );
        release.join().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        // Motion was disengaged for the pause and re-engaged after it.
        let modes = rig.probe.modes();
        let standby_at = modes
            .iter()
            .position(|m| *m == ModeCommand::standby())
            .unwrap();
        assert_eq!(modes[standby_at + 1], ModeCommand::joint(50));
        assert_eq!(rig.probe.commanded_poses().len(), 2);
    }

    #[test]
    fn dense_points_wait_for_their_offsets() {
        let rig = rig();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let hook: PointHook = Arc::new(move |p: &Pose| sink.lock().unwrap().push((Instant::now(), *p)));
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new()).with_hook(hook);
        let points: Vec<TrackPoint> = (0..3)
            .map(|i| TrackPoint::new(Pose([i * 100, 0, 0, 0, 0, 0, 0]), 10.0 + i as f64 * 0.1))
            .collect();
        let begin = Instant::now();
        assert_eq!(
            player.run_dense("left__slow", &points).unwrap(),
            PlayOutcome::Completed
        );
        assert!(begin.elapsed() >= Duration::from_millis(200));
        let sent = sent.lock().unwrap();
        let poses: Vec<Pose> = sent.iter().map(|(_, p)| *p).collect();
        assert_eq!(poses, points.iter().map(|p| p.pose).collect::<Vec<_>>());
        assert!(sent[1].0 - begin >= Duration::from_millis(100));
        assert!(sent[2].0 - begin >= Duration::from_millis(200));
    }

    #[test]
    fn unusable_dense_offset_fails_before_motion() {
        let rig = rig();
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new());
        let points = vec![
            TrackPoint::new(Pose::ZERO, 0.0),
            TrackPoint::new(Pose([10, 0, 0, 0, 0, 0, 0]), 1e20),
        ];
        assert!(matches!(
            player.run_dense("left__far", &points),
            Err(PlaybackError::Timing { point: 1, .. })
        ));
        assert!(rig.probe.commanded_poses().is_empty());
    }

    #[test]
    fn pause_freezes_sparse_time() {
        let rig = rig();
        let sentinel = PauseSentinel::new(&rig.config.pause_file);
        sentinel.set(true).unwrap();
        let (hook, seen) = recorder_hook();
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new()).with_hook(hook);
        let target = Pose([200, 0, 0, 0, 0, 0, 0]);
        let points = [
            ControlPoint {
                pose: Pose::ZERO,
                duration: 0.0,
            },
            ControlPoint {
                pose: target,
                duration: 0.02,
            },
        ];
        let release = {
            let sentinel = sentinel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                sentinel.set(false).unwrap();
            })
        };
        let started = Instant::now();
        assert_eq!(
            player.run_sparse("left__x", &points, 0.0).unwrap(),
            PlayOutcome::Completed
        );
        release.join().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        // No step went out while paused; the segment resumed where it was.
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[0], Pose([20, 0, 0, 0, 0, 0, 0]));
        assert_eq!(*seen.last().unwrap(), target);
        let modes = rig.probe.modes();
        let standby_at = modes
            .iter()
            .position(|m| *m == ModeCommand::standby())
            .unwrap();
        assert_eq!(modes[standby_at + 1], ModeCommand::joint(50));
    }

    #[test]
    fn sequence_fails_before_motion_on_bad_name() {
        let rig = rig();
        let player = Player::new(rig.arm.clone(), &rig.config, StopToken::new());
        let err = player
            .play_sequence(&["left__missing".to_owned()])
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Track(TrackError::NotFound(_))));
        assert!(rig.probe.commanded_poses().is_empty());
    }
}
