//! The command surface of one arm.
//!
//! An [`ArmController`] owns everything that touches its arm: the recorder,
//! the player and its stop token, and the direct-motion and reset helpers.
//! Workers host exactly one controller each; the orchestrator reaches it
//! through [`crate::rpc`].

use crate::arm::{
    ArmError, ArmHandle, GripperCode, GripperCommand, ModeCommand, MotionControl, ALL_MOTORS,
};
use crate::config::{ArmBackend, Config};
use crate::naming::{NameError, Side, TrackName};
use crate::playback::{PlayOutcome, PlaybackError, Player, StopToken};
use crate::pose::{Pose, POSE_LEN};
use crate::position::PoseReader;
use crate::recorder::{RecordError, RecordSummary, Recorder, RecordingKind};
use crate::safety::{
    load_zero_pose, nearest_safe_point, save_zero_pose, SafetyError, SafetyPolicy,
};
use crate::sim_arm::SimArm;
use crate::track::{ControlPoint, TrackError, TrackStore};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

/// Where a freshly started simulated arm rests: gripper half open, wrist
/// folded.
pub const SIM_REST_POSE: Pose = Pose([0, 0, 0, 0, 17000, 0, 50000]);

/// A nice little error for arm commands.
#[derive(Debug)]
pub enum ControllerError {
    /// The arm is not configured.
    Unavailable(Side),
    /// A track of the other arm was handed to this one.
    WrongArm {
        #[allow(missing_docs)]
        name: String,
        #[allow(missing_docs)]
        side: Side,
    },
    /// A recording is running; motion commands must wait for it.
    Busy(String),
    /// Pose index out of range.
    InvalidJoint(usize),
    #[allow(missing_docs)]
    Name(NameError),
    #[allow(missing_docs)]
    Record(RecordError),
    #[allow(missing_docs)]
    Playback(PlaybackError),
    #[allow(missing_docs)]
    Safety(SafetyError),
    #[allow(missing_docs)]
    Track(TrackError),
    #[allow(missing_docs)]
    Arm(ArmError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ControllerError as CE;
        let msg = match self {
            CE::Unavailable(side) => Cow::from(format!("{} arm is not configured", side)),
            CE::WrongArm { name, side } => {
                Cow::from(format!("{} does not belong to the {} arm", name, side))
            }
            CE::Busy(name) => Cow::from(format!("recording {} in progress; stop it first", name)),
            CE::InvalidJoint(idx) => Cow::from(format!(
                "joint index {} out of range 0-{}",
                idx,
                POSE_LEN - 1
            )),
            CE::Name(error) => Cow::from(error.to_string()),
            CE::Record(error) => Cow::from(error.to_string()),
            CE::Playback(error) => Cow::from(error.to_string()),
            CE::Safety(error) => Cow::from(error.to_string()),
            CE::Track(error) => Cow::from(error.to_string()),
            CE::Arm(error) => Cow::from(error.to_string()),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ControllerError {}

impl From<NameError> for ControllerError {
    fn from(value: NameError) -> Self {
        Self::Name(value)
    }
}

impl From<RecordError> for ControllerError {
    fn from(value: RecordError) -> Self {
        Self::Record(value)
    }
}

impl From<PlaybackError> for ControllerError {
    fn from(value: PlaybackError) -> Self {
        Self::Playback(value)
    }
}

impl From<SafetyError> for ControllerError {
    fn from(value: SafetyError) -> Self {
        Self::Safety(value)
    }
}

impl From<TrackError> for ControllerError {
    fn from(value: TrackError) -> Self {
        Self::Track(value)
    }
}

impl From<ArmError> for ControllerError {
    fn from(value: ArmError) -> Self {
        Self::Arm(value)
    }
}

/// How far the arm is from a reference pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityReport {
    /// What was compared against, e.g. `zero_position` or
    /// `zero_track_home[12]`.
    pub reference: String,
    /// The reference pose.
    pub pose: Pose,
    /// Largest deviation over the considered joints.
    pub delta: i64,
    /// The joint that produced it.
    pub worst_joint: Option<usize>,
    #[allow(missing_docs)]
    pub tolerance: i32,
}

impl ProximityReport {
    /// Whether the deviation is within tolerance.
    pub fn within(&self) -> bool {
        self.delta <= self.tolerance as i64
    }

    /// Distance from the tolerance boundary, either way.
    pub fn margin(&self) -> i64 {
        (self.tolerance as i64 - self.delta).abs()
    }
}

impl fmt::Display for ProximityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let within = self.within();
        write!(
            f,
            "{}: delta {} units (~{:.3} deg) {} | tolerance {} units, {} by {} units | worst joint {}",
            self.reference,
            self.delta,
            self.delta as f64 / 1000.0,
            if within { "SUCCESS" } else { "FAIL" },
            self.tolerance,
            if within { "margin" } else { "exceeded" },
            self.margin(),
            self.worst_joint
                .map_or_else(|| "-".to_owned(), |j| format!("#{}", j)),
        )
    }
}

/// What the arm is busy with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStatus {
    #[allow(missing_docs)]
    pub side: Side,
    /// Name and kind of the running recording.
    pub recording: Option<(String, RecordingKind)>,
    /// Default control-point duration.
    pub default_duration: f64,
}

/// Build the driver named by the configuration for `side`.
pub fn open_arm(side: Side, config: &Config) -> Result<ArmHandle, ControllerError> {
    let arm_config = config.arm(side).ok_or(ControllerError::Unavailable(side))?;
    info!(
        "[{}] opening {:?} arm on {}",
        side, arm_config.backend, arm_config.interface
    );
    let arm = match arm_config.backend {
        ArmBackend::Simulated => SimArm::builder().start_pose(SIM_REST_POSE).build(),
    };
    Ok(ArmHandle::new(arm))
}

/// One arm's command surface.
pub struct ArmController {
    side: Side,
    reader: PoseReader,
    safe: TrackStore,
    policy: SafetyPolicy,
    config: Config,
    player: Player,
    recorder: Recorder,
    stop: StopToken,
}

impl ArmController {
    /// Connect `arm` and build its controller.
    pub fn connect(side: Side, arm: ArmHandle, config: &Config) -> Result<Self, ControllerError> {
        arm.with(|arm| arm.connect())?;
        info!("[{}] connected", side);
        let stop = StopToken::new();
        Ok(ArmController {
            side,
            reader: PoseReader::new(arm.clone()),
            safe: TrackStore::new(config.safe_dir()),
            policy: SafetyPolicy::from(&config.safety),
            config: config.clone(),
            player: Player::new(arm.clone(), config, stop.clone()),
            recorder: Recorder::new(arm, config),
            stop,
        })
    }

    /// The arm this controller drives.
    pub fn side(&self) -> Side {
        self.side
    }

    /// A clone of the playback stop token, for cancelling from another
    /// thread.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    fn arm(&self) -> &ArmHandle {
        self.reader.arm()
    }

    fn own_track(&self, raw: &str) -> Result<TrackName, ControllerError> {
        let name = TrackName::parse(raw)?;
        if name.side() != self.side {
            return Err(ControllerError::WrongArm {
                name: name.to_string(),
                side: self.side,
            });
        }
        Ok(name)
    }

    fn ensure_idle(&self) -> Result<(), ControllerError> {
        match self.recorder.active() {
            Some((name, _)) => Err(ControllerError::Busy(name.to_owned())),
            None => Ok(()),
        }
    }

    /// Current activity.
    pub fn status(&self) -> ArmStatus {
        ArmStatus {
            side: self.side,
            recording: self
                .recorder
                .active()
                .map(|(name, kind)| (name.to_owned(), kind)),
            default_duration: self.recorder.default_duration(),
        }
    }

    /// Start a continuous recording.
    pub fn record(&mut self, name: &str, overwrite: bool) -> Result<String, ControllerError> {
        let name = self.own_track(name)?;
        self.recorder.start_continuous(&name, overwrite)?;
        Ok(name.to_string())
    }

    /// Start a control-point recording.
    pub fn record_timed(&mut self, name: &str, overwrite: bool) -> Result<String, ControllerError> {
        let name = self.own_track(name)?;
        self.recorder.start_control_points(&name, overwrite)?;
        Ok(name.to_string())
    }

    /// Confirm the current pose as a control point.
    pub fn add_point(&mut self, duration: Option<f64>) -> Result<(usize, ControlPoint), ControllerError> {
        Ok(self.recorder.confirm_point(duration)?)
    }

    /// Change the default control-point duration.
    pub fn set_default_duration(&mut self, seconds: f64) -> Result<(), ControllerError> {
        Ok(self.recorder.set_default_duration(seconds)?)
    }

    /// Finish whatever is being recorded.
    pub fn stop_record(&mut self) -> Result<RecordSummary, ControllerError> {
        Ok(self.recorder.stop()?)
    }

    /// Start recording a safe track; returns its stored name.
    pub fn record_safe(
        &mut self,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<String, ControllerError> {
        Ok(self.recorder.start_safe(name, overwrite)?)
    }

    /// Save the current pose as the zero pose.
    pub fn save_zero_pose(&self) -> Result<(Pose, PathBuf), ControllerError> {
        let pose = self.reader.current_pose()?;
        let path = save_zero_pose(self.safe.dir(), &pose)?;
        info!("[ZERO-POS] saved {} -> {}", pose, path.display());
        Ok((pose, path))
    }

    /// Compare the current pose with the saved zero pose.
    pub fn check_zero_pose(&self) -> Result<ProximityReport, ControllerError> {
        let zero = load_zero_pose(self.safe.dir())?;
        let current = self.reader.current_pose()?;
        let deviation = self.policy.deviation(&current, &zero);
        let report = ProximityReport {
            reference: "zero_position".to_owned(),
            pose: zero,
            delta: deviation.delta,
            worst_joint: deviation.worst,
            tolerance: self.policy.tolerance,
        };
        info!("[CHECK-0-POS] {}", report);
        Ok(report)
    }

    /// Find the safe-track point nearest to the current pose.
    pub fn check_safe_tracks(&self) -> Result<ProximityReport, ControllerError> {
        let current = self.reader.current_pose()?;
        let nearest = nearest_safe_point(&self.safe, &current, &self.policy)?
            .ok_or_else(|| SafetyError::NoSafeTracks(self.safe.dir().to_path_buf()))?;
        let report = ProximityReport {
            reference: format!("{}[{}]", nearest.track, nearest.index),
            pose: nearest.pose,
            delta: nearest.deviation.delta,
            worst_joint: nearest.deviation.worst,
            tolerance: self.policy.tolerance,
        };
        info!("[CHECK-0-TRACK] {}", report);
        Ok(report)
    }

    /// Play tracks back to back. Every name must belong to this arm.
    pub fn play(&mut self, names: &[String]) -> Result<PlayOutcome, ControllerError> {
        self.ensure_idle()?;
        let names = names
            .iter()
            .map(|raw| self.own_track(raw).map(|n| n.to_string()))
            .collect::<Result<Vec<String>, ControllerError>>()?;
        self.stop.reset();
        let outcome = self.player.play_sequence(&names)?;
        info!("[{}] play {:?}: {:?}", self.side, names, outcome);
        Ok(outcome)
    }

    /// Length of a track in seconds, as it would play.
    pub fn track_duration(&self, name: &str) -> Result<f64, ControllerError> {
        Ok(self.player.tracks().read_track(name)?.duration())
    }

    /// Ask a running playback to stop.
    pub fn stop_play(&self) {
        self.stop.stop();
    }

    /// The current pose.
    pub fn get(&self) -> Result<Pose, ControllerError> {
        Ok(self.reader.current_pose()?)
    }

    fn move_to(&self, target: Pose, label: &str) -> Result<bool, ControllerError> {
        self.ensure_idle()?;
        self.stop.reset();
        match self.player.move_to(&target) {
            Ok(outcome) => {
                let ok = outcome == PlayOutcome::Completed;
                info!("[{}] {} {} -> {}", self.side, label, target, ok);
                Ok(ok)
            }
            Err(PlaybackError::NotConverged { target, actual }) => {
                warn!(
                    "[{}] {}: wanted {}, arm is at {}",
                    self.side, label, target, actual
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Glide one pose component to `value`. True when the arm got there.
    pub fn set_joint(&self, joint: usize, value: i32) -> Result<bool, ControllerError> {
        if joint >= POSE_LEN {
            return Err(ControllerError::InvalidJoint(joint));
        }
        let current = self.reader.current_pose()?;
        self.move_to(current.with_component(joint, value), "SET")
    }

    /// Glide the whole pose.
    pub fn set_all(&self, target: Pose) -> Result<bool, ControllerError> {
        self.move_to(target, "SET_ALL")
    }

    /// Glide one component by `delta`.
    pub fn nudge(&self, joint: usize, delta: i32) -> Result<bool, ControllerError> {
        let current = self.reader.current_pose()?;
        let value = current
            .get(joint)
            .ok_or(ControllerError::InvalidJoint(joint))?;
        self.move_to(current.with_component(joint, value.saturating_add(delta)), "NUDGE")
    }

    /// Hard reset: clear every latched state, reconnect, cycle the motors and
    /// gripper, and come back up in joint mode. Returns whether every motor
    /// reported enabled before the timeout.
    pub fn reset(&self) -> Result<bool, ControllerError> {
        self.ensure_idle()?;
        let control = &self.config.control;
        let arm = self.arm();
        info!("[{}] hard reset", self.side);
        arm.with(|arm| {
            arm.motion_control(MotionControl::ExitTeach)?;
            arm.motion_control(MotionControl::ClearTrajectory)?;
            arm.motion_control(MotionControl::ResumeEmergencyStop)?;
            arm.disconnect()
        })?;
        thread::sleep(control.reset_settle());
        arm.with(|arm| arm.connect())?;

        for _ in 0..10 {
            arm.with(|arm| {
                arm.disable(ALL_MOTORS)?;
                arm.send_gripper_target(GripperCommand {
                    position: 0,
                    effort: 1000,
                    code: GripperCode::DisableClearError,
                    set_zero: 0,
                })
            })?;
            thread::sleep(Duration::from_millis(10));
        }

        let started = Instant::now();
        let enabled = loop {
            let all_on = arm.with(|arm| {
                let status = arm.read_low_speed_telemetry()?;
                arm.enable(ALL_MOTORS)?;
                arm.send_gripper_target(GripperCommand {
                    position: 50_000,
                    effort: 1000,
                    code: GripperCode::Enable,
                    set_zero: 0,
                })?;
                Ok(status.enabled.iter().all(|&on| on))
            })?;
            if all_on {
                break true;
            }
            if started.elapsed() >= control.enable_timeout() {
                warn!(
                    "[{}] motors still not enabled after {:?}",
                    self.side,
                    control.enable_timeout()
                );
                break false;
            }
            thread::sleep(Duration::from_millis(100));
        };

        arm.with(|arm| {
            arm.set_mode(ModeCommand::joint(control.speed_pct))?;
            arm.send_gripper_target(GripperCommand::move_to(50_000, 1000))?;
            arm.set_mode(ModeCommand::joint(control.speed_pct))
        })?;
        thread::sleep(control.reset_settle());
        info!("[{}] reset done, enabled: {}", self.side, enabled);
        Ok(enabled)
    }

    /// Stop playback, save any running recording, and let go of the arm.
    pub fn shutdown(&mut self) -> Result<(), ControllerError> {
        self.stop.stop();
        if self.recorder.is_recording() {
            let summary = self.recorder.stop()?;
            info!("[{}] saved {} on shutdown", self.side, summary.name);
        }
        self.arm().with(|arm| {
            arm.set_mode(ModeCommand::standby())?;
            arm.disconnect()
        })?;
        info!("[{}] disconnected", self.side);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::safe_track_name;
    use crate::sim_arm::{SimCommand, SimProbe};
    use crate::track::TrackPoint;

    const START: Pose = Pose([1000, 0, 0, 0, 0, 0, 10000]);

    fn setup() -> (tempfile::TempDir, Config, ArmController, SimProbe) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.tracks_dir = dir.path().join("tracks");
        config.pause_file = dir.path().join("pause.txt");
        config.control.hz = 500.0;
        config.control.glide_steps = 10;
        config.control.settle_after_glide = 0.05;
        config.control.reset_settle = 0.0;
        config.gripper.tighten = 0.0;
        let sim = SimArm::builder().start_pose(START).build();
        let probe = sim.probe();
        let controller = ArmController::connect(Side::Left, ArmHandle::new(sim), &config).unwrap();
        (dir, config, controller, probe)
    }

    #[test]
    fn tracks_of_the_other_arm_are_refused() {
        let (_dir, _config, mut controller, probe) = setup();
        probe.clear_commands();
        let err = controller.play(&["right__grab".to_owned()]).unwrap_err();
        assert!(matches!(err, ControllerError::WrongArm { side: Side::Left, .. }));
        let err = controller.play(&["grab".to_owned()]).unwrap_err();
        assert!(matches!(err, ControllerError::Name(NameError::MissingSidePrefix(_))));
        assert!(probe.commands().is_empty());
    }

    #[test]
    fn set_joint_glides_and_reports() {
        let (_dir, _config, controller, probe) = setup();
        assert!(controller.set_joint(0, 3000).unwrap());
        assert_eq!(probe.actual().0[0], 3000);
        assert!(controller.nudge(6, -2000).unwrap());
        assert_eq!(probe.actual().gripper(), 8000);
        assert_eq!(probe.modes().last(), Some(&ModeCommand::standby()));
        assert!(matches!(
            controller.set_joint(7, 0),
            Err(ControllerError::InvalidJoint(7))
        ));
    }

    #[test]
    fn motion_waits_for_recording() {
        let (_dir, _config, mut controller, _probe) = setup();
        controller.record_timed("l_steps", false).unwrap();
        assert!(matches!(
            controller.set_all(START),
            Err(ControllerError::Busy(_))
        ));
        let status = controller.status();
        assert_eq!(
            status.recording,
            Some(("left__steps".to_owned(), RecordingKind::ControlPoints))
        );
        controller.add_point(None).unwrap();
        let summary = controller.stop_record().unwrap();
        assert_eq!(summary.points, 1);
        assert!(controller.set_all(START).unwrap());
    }

    #[test]
    fn zero_pose_roundtrip_and_check() {
        let (_dir, _config, controller, probe) = setup();
        let (saved, path) = controller.save_zero_pose().unwrap();
        assert_eq!(saved, START);
        assert!(path.ends_with("zero_position.json"));
        probe.drag_to(Pose([7000, 0, 0, 0, 0, 0, 10000]));
        let report = controller.check_zero_pose().unwrap();
        assert_eq!(report.delta, 6000);
        assert_eq!(report.worst_joint, Some(0));
        assert!(!report.within());
        assert_eq!(report.margin(), 1000);
    }

    #[test]
    fn safe_track_check_finds_nearest() {
        let (_dir, config, controller, _probe) = setup();
        assert!(matches!(
            controller.check_safe_tracks(),
            Err(ControllerError::Safety(SafetyError::NoSafeTracks(_)))
        ));
        TrackStore::new(config.safe_dir())
            .write_dense_untimed(
                &safe_track_name("home"),
                &[
                    TrackPoint::new(Pose([9000, 0, 0, 0, 0, 0, 0]), 0.0),
                    TrackPoint::new(Pose([0, 0, 0, 0, 0, 0, 0]), 0.1),
                ],
            )
            .unwrap();
        let report = controller.check_safe_tracks().unwrap();
        assert_eq!(report.reference, "zero_track_home[1]");
        assert_eq!(report.delta, 1000);
        assert!(report.within());
    }

    #[test]
    fn reset_runs_the_full_sequence() {
        let (_dir, _config, controller, probe) = setup();
        probe.clear_commands();
        assert!(controller.reset().unwrap());
        let commands = probe.commands();
        assert_eq!(
            &commands[..4],
            &[
                SimCommand::Motion(MotionControl::ExitTeach),
                SimCommand::Motion(MotionControl::ClearTrajectory),
                SimCommand::Motion(MotionControl::ResumeEmergencyStop),
                SimCommand::Disconnect,
            ]
        );
        let disables = commands
            .iter()
            .filter(|c| matches!(c, SimCommand::Disable(ALL_MOTORS)))
            .count();
        assert_eq!(disables, 10);
        assert!(probe.enabled());
        assert_eq!(probe.modes().last(), Some(&ModeCommand::joint(50)));
    }

    #[test]
    fn shutdown_saves_running_recording() {
        let (_dir, config, mut controller, probe) = setup();
        controller.record("left__wave", false).unwrap();
        thread::sleep(Duration::from_millis(50));
        controller.shutdown().unwrap();
        assert!(TrackStore::new(&config.tracks_dir).exists("left__wave"));
        assert!(!probe.in_teach());
        assert_eq!(probe.commands().last(), Some(&SimCommand::Disconnect));
    }
}
