//! Recording tracks from an arm moved by hand.
//!
//! Three kinds of recording exist, and a [`Recorder`] runs at most one at a
//! time:
//!
//! - continuous: a background thread samples pose and telemetry at a fixed
//!   rate until stopped, then saves a dense-timed track;
//! - safe: the same sampling without telemetry, saved as a dense-untimed
//!   safe track used by the pre-flight check;
//! - control points: the operator poses the arm and confirms each pose with
//!   the time it should take to get there, saved as a sparse-timed track.
//!
//! Every kind puts the arm into teach mode when it starts and takes it back
//! out when it stops, whether or not anything was captured.

use crate::arm::{
    ArmError, ArmHandle, HighSpeedTelemetry, LowSpeedTelemetry, ModeCommand, MotionControl,
    ALL_MOTORS,
};
use crate::config::Config;
use crate::naming::{validate_safe_name, NameError, TrackName};
use crate::pose::Pose;
use crate::position::{PoseReader, WarnLimiter};
use crate::rate::Ticker;
use crate::safety::safe_track_name;
use crate::track::{
    ControlPoint, Telemetry, TrackError, TrackPoint, TrackStore, MAX_TRACK_SECONDS,
};

use chrono::{Local, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    path::PathBuf,
    sync::mpsc::{self, TryRecvError},
    thread,
    time::{Duration, Instant},
};

/// What is being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingKind {
    /// Dense-timed capture with telemetry.
    Continuous,
    /// Dense-untimed capture into the safe-track directory.
    Safe,
    /// Operator-confirmed control points.
    ControlPoints,
}

impl fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordingKind::Continuous => "continuous",
            RecordingKind::Safe => "safe",
            RecordingKind::ControlPoints => "control-point",
        };
        write!(f, "{}", s)
    }
}

/// What a finished recording produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    /// Track name as stored.
    pub name: String,
    #[allow(missing_docs)]
    pub kind: RecordingKind,
    /// Points saved.
    pub points: usize,
    /// The main track file.
    pub path: PathBuf,
}

/// A nice little error for the recorder.
#[derive(Debug)]
pub enum RecordError {
    /// Another recording is running; carries its name.
    AlreadyRecording(String),
    /// Nothing is being recorded.
    NotRecording,
    /// The running recording does not take control points.
    NotControlPoints,
    /// The target exists and overwriting was not confirmed.
    AlreadyExists(PathBuf),
    /// Durations must be between zero and [`MAX_TRACK_SECONDS`].
    InvalidDuration(f64),
    #[allow(missing_docs)]
    Name(NameError),
    #[allow(missing_docs)]
    Arm(ArmError),
    #[allow(missing_docs)]
    Track(TrackError),
    /// The sampling thread panicked; its samples are lost.
    WorkerPanicked,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RecordError as RE;
        let msg = match self {
            RE::AlreadyRecording(name) => Cow::from(format!(
                "already recording {}; stop it first",
                name
            )),
            RE::NotRecording => Cow::from("nothing is being recorded"),
            RE::NotControlPoints => {
                Cow::from("the running recording does not take control points")
            }
            RE::AlreadyExists(path) => {
                Cow::from(format!("{} exists; confirm to overwrite", path.display()))
            }
            RE::InvalidDuration(d) => Cow::from(format!(
                "duration must be between 0 and {} seconds, got {}",
                MAX_TRACK_SECONDS, d
            )),
            RE::Name(error) => Cow::from(error.to_string()),
            RE::Arm(error) => Cow::from(format!("arm: {}", error)),
            RE::Track(error) => Cow::from(format!("track: {}", error)),
            RE::WorkerPanicked => Cow::from("the recording thread panicked"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for RecordError {}

impl From<NameError> for RecordError {
    fn from(value: NameError) -> Self {
        Self::Name(value)
    }
}

impl From<ArmError> for RecordError {
    fn from(value: ArmError) -> Self {
        Self::Arm(value)
    }
}

impl From<TrackError> for RecordError {
    fn from(value: TrackError) -> Self {
        Self::Track(value)
    }
}

/// Recording parameters, taken from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSettings {
    #[allow(missing_docs)]
    pub sample_hz: f64,
    #[allow(missing_docs)]
    pub zero_grace: Duration,
    #[allow(missing_docs)]
    pub safe_zero_grace: Duration,
    #[allow(missing_docs)]
    pub default_point_duration: f64,
    /// Speed of the joint/point mode restored after recording.
    pub speed_pct: u8,
}

impl From<&Config> for RecordSettings {
    fn from(config: &Config) -> Self {
        RecordSettings {
            sample_hz: config.recording.sample_hz,
            zero_grace: Duration::from_secs_f64(config.recording.zero_grace),
            safe_zero_grace: Duration::from_secs_f64(config.recording.safe_zero_grace),
            default_point_duration: config.recording.default_point_duration,
            speed_pct: config.control.speed_pct,
        }
    }
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

fn telemetry_of(hs: &HighSpeedTelemetry, ls: &LowSpeedTelemetry) -> Telemetry {
    Telemetry {
        motor_speed_rpm: hs.speed_rpm,
        motor_current_ma: hs.current_ma,
        motor_pos_deg001: hs.position_deg001,
        motor_effort_mnm: hs.effort_mnm,
        voltage_mv: ls.voltage_mv,
        foc_temp_c: ls.foc_temp_c,
        motor_temp_c: ls.motor_temp_c,
        bus_current_ma: ls.bus_current_ma,
    }
}

/// Take the arm out of teach mode and leave it enabled under CAN control.
fn finalize(arm: &ArmHandle, speed_pct: u8) -> Result<(), ArmError> {
    arm.with(|arm| {
        arm.motion_control(MotionControl::ExitTeach)?;
        arm.enable(ALL_MOTORS)?;
        arm.set_mode(ModeCommand::point(speed_pct))
    })
}

/// Tracks how long the link has been reporting all-zero poses.
struct ZeroWatch {
    grace: Duration,
    repeat: Option<Duration>,
    since: Option<Instant>,
    warned_at: Option<Instant>,
}

impl ZeroWatch {
    /// With `repeat`, complaints recur at that interval; without, once per
    /// run of zeros.
    fn new(grace: Duration, repeat: Option<Duration>) -> Self {
        ZeroWatch {
            grace,
            repeat,
            since: None,
            warned_at: None,
        }
    }

    /// Note a zero sample; true when it is time to complain.
    fn zero(&mut self) -> bool {
        let now = Instant::now();
        let since = *self.since.get_or_insert(now);
        if now - since <= self.grace {
            return false;
        }
        let due = match (self.warned_at, self.repeat) {
            (None, _) => true,
            (Some(at), Some(repeat)) => now - at >= repeat,
            (Some(_), None) => false,
        };
        if due {
            self.warned_at = Some(now);
        }
        due
    }

    fn clear(&mut self) {
        self.since = None;
        self.warned_at = None;
    }
}

fn capture(arm: &ArmHandle, with_telemetry: bool) -> Result<Option<TrackPoint>, ArmError> {
    arm.with(|arm| {
        let joints = arm.read_joint_feedback()?;
        let gripper = arm.read_gripper_feedback()?;
        let pose = Pose::new(joints, gripper);
        if pose.is_all_zero() {
            return Ok(None);
        }
        let point = TrackPoint::new(pose, now_epoch());
        if !with_telemetry {
            return Ok(Some(point));
        }
        let hs = arm.read_high_speed_telemetry()?;
        let ls = arm.read_low_speed_telemetry()?;
        Ok(Some(point.with_telemetry(telemetry_of(&hs, &ls))))
    })
}

enum Signal {
    Stop,
}

struct SamplerJob {
    arm: ArmHandle,
    store: TrackStore,
    name: String,
    kind: RecordingKind,
    hz: f64,
    grace: Duration,
    speed_pct: u8,
}

impl SamplerJob {
    fn tag(&self) -> &'static str {
        match self.kind {
            RecordingKind::Safe => "REC-SAFE",
            _ => "REC",
        }
    }

    fn sample(&self, rx: &mpsc::Receiver<Signal>) -> Vec<TrackPoint> {
        let with_telemetry = self.kind == RecordingKind::Continuous;
        let repeat = with_telemetry.then_some(Duration::from_secs(1));
        let mut zeros = ZeroWatch::new(self.grace, repeat);
        let bus_warn = WarnLimiter::new(Duration::from_secs(1));
        let mut ticker = Ticker::from_hz(self.hz);
        let mut points = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(Signal::Stop) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }
            match capture(&self.arm, with_telemetry) {
                Ok(Some(point)) => {
                    zeros.clear();
                    points.push(point);
                }
                Ok(None) => {
                    if zeros.zero() {
                        error!(
                            "[{}] all-zero pose for over {:?}; check the connection",
                            self.tag(),
                            self.grace
                        );
                    }
                }
                Err(e) => {
                    if bus_warn.ready() {
                        warn!("[{}] sample failed: {}", self.tag(), e);
                    }
                }
            }
            ticker.tick();
        }
        points
    }

    fn run(self, rx: mpsc::Receiver<Signal>) -> Result<RecordSummary, RecordError> {
        let points = self.sample(&rx);
        if let Err(e) = finalize(&self.arm, self.speed_pct) {
            error!("[{}] failed to leave teach mode: {}", self.tag(), e);
        }
        match self.kind {
            RecordingKind::Safe => self.store.write_dense_untimed(&self.name, &points)?,
            _ => self.store.write_dense_timed(&self.name, &points)?,
        }
        let path = self.store.path(&self.name);
        info!(
            "[{}] saved {} points -> {}",
            self.tag(),
            points.len(),
            path.display()
        );
        Ok(RecordSummary {
            name: self.name,
            kind: self.kind,
            points: points.len(),
            path,
        })
    }
}

struct Sampler {
    name: String,
    kind: RecordingKind,
    tx: mpsc::Sender<Signal>,
    handle: Option<thread::JoinHandle<Result<RecordSummary, RecordError>>>,
}

impl Sampler {
    fn spawn(job: SamplerJob) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let name = job.name.clone();
        let kind = job.kind;
        let handle = thread::spawn(move || job.run(rx));
        Sampler {
            name,
            kind,
            tx,
            handle: Some(handle),
        }
    }

    fn stop(&mut self) -> Result<RecordSummary, RecordError> {
        let _ = self.tx.send(Signal::Stop);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| RecordError::WorkerPanicked)?,
            None => Err(RecordError::NotRecording),
        }
    }
}

enum Session {
    Sampling(Sampler),
    ControlPoints {
        name: String,
        points: Vec<ControlPoint>,
    },
}

impl Session {
    fn name(&self) -> &str {
        match self {
            Session::Sampling(sampler) => &sampler.name,
            Session::ControlPoints { name, .. } => name,
        }
    }

    fn kind(&self) -> RecordingKind {
        match self {
            Session::Sampling(sampler) => sampler.kind,
            Session::ControlPoints { .. } => RecordingKind::ControlPoints,
        }
    }
}

/// One arm's recorder.
pub struct Recorder {
    reader: PoseReader,
    tracks: TrackStore,
    safe: TrackStore,
    settings: RecordSettings,
    default_duration: f64,
    session: Option<Session>,
}

impl Recorder {
    /// A recorder for `arm`, saving where `config` says.
    pub fn new(arm: ArmHandle, config: &Config) -> Self {
        let settings = RecordSettings::from(config);
        Recorder {
            reader: PoseReader::new(arm),
            tracks: TrackStore::new(&config.tracks_dir),
            safe: TrackStore::new(config.safe_dir()),
            default_duration: settings.default_point_duration,
            settings,
            session: None,
        }
    }

    fn arm(&self) -> &ArmHandle {
        self.reader.arm()
    }

    /// Name and kind of the running recording.
    pub fn active(&self) -> Option<(&str, RecordingKind)> {
        self.session.as_ref().map(|s| (s.name(), s.kind()))
    }

    /// Whether anything is being recorded.
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Whether control points are being collected.
    pub fn is_collecting_points(&self) -> bool {
        matches!(self.session, Some(Session::ControlPoints { .. }))
    }

    fn ensure_idle(&self) -> Result<(), RecordError> {
        match &self.session {
            Some(session) => Err(RecordError::AlreadyRecording(session.name().to_owned())),
            None => Ok(()),
        }
    }

    fn ensure_writable(store: &TrackStore, name: &str, overwrite: bool) -> Result<(), RecordError> {
        if store.exists(name) && !overwrite {
            return Err(RecordError::AlreadyExists(store.path(name)));
        }
        Ok(())
    }

    fn start_sampling(
        &mut self,
        store: TrackStore,
        name: String,
        kind: RecordingKind,
        grace: Duration,
    ) -> Result<(), RecordError> {
        self.arm().with(|arm| arm.motion_control(MotionControl::EnterTeach))?;
        let job = SamplerJob {
            arm: self.arm().clone(),
            store,
            name,
            kind,
            hz: self.settings.sample_hz,
            grace,
            speed_pct: self.settings.speed_pct,
        };
        self.session = Some(Session::Sampling(Sampler::spawn(job)));
        Ok(())
    }

    /// Start a continuous recording of `name`.
    pub fn start_continuous(&mut self, name: &TrackName, overwrite: bool) -> Result<(), RecordError> {
        self.ensure_idle()?;
        Self::ensure_writable(&self.tracks, name.as_str(), overwrite)?;
        info!("[REC] {}: move the arm, stop when done", name);
        self.start_sampling(
            self.tracks.clone(),
            name.to_string(),
            RecordingKind::Continuous,
            self.settings.zero_grace,
        )
    }

    /// Start recording a safe track. Without a name, the local time
    /// `YYYYmmdd_HHMMSS` is used. Returns the stored track name.
    pub fn start_safe(&mut self, name: Option<&str>, overwrite: bool) -> Result<String, RecordError> {
        self.ensure_idle()?;
        let name = match name {
            Some(name) => name.trim().to_owned(),
            None => Local::now().format("%Y%m%d_%H%M%S").to_string(),
        };
        validate_safe_name(&name)?;
        let stored = safe_track_name(&name);
        Self::ensure_writable(&self.safe, &stored, overwrite)?;
        info!("[REC-SAFE] {}: move the arm, stop when done", stored);
        self.start_sampling(
            self.safe.clone(),
            stored.clone(),
            RecordingKind::Safe,
            self.settings.safe_zero_grace,
        )?;
        Ok(stored)
    }

    /// Start collecting control points for `name`.
    pub fn start_control_points(
        &mut self,
        name: &TrackName,
        overwrite: bool,
    ) -> Result<(), RecordError> {
        self.ensure_idle()?;
        Self::ensure_writable(&self.tracks, name.as_str(), overwrite)?;
        self.arm().with(|arm| arm.motion_control(MotionControl::EnterTeach))?;
        info!(
            "[HYB-REC] {}: pose the arm and confirm each point, default {}s",
            name, self.default_duration
        );
        self.session = Some(Session::ControlPoints {
            name: name.to_string(),
            points: Vec::new(),
        });
        Ok(())
    }

    /// Segment duration used when a point is confirmed without one.
    pub fn default_duration(&self) -> f64 {
        self.default_duration
    }

    /// Change the default segment duration.
    pub fn set_default_duration(&mut self, seconds: f64) -> Result<(), RecordError> {
        if !(0.0..=MAX_TRACK_SECONDS).contains(&seconds) {
            return Err(RecordError::InvalidDuration(seconds));
        }
        self.default_duration = seconds;
        info!("[HYB-REC] default duration is now {}s", seconds);
        Ok(())
    }

    /// Capture the current pose as the next control point. Returns the
    /// point and its 1-based number.
    pub fn confirm_point(
        &mut self,
        duration: Option<f64>,
    ) -> Result<(usize, ControlPoint), RecordError> {
        let duration = duration.unwrap_or(self.default_duration);
        if !(0.0..=MAX_TRACK_SECONDS).contains(&duration) {
            return Err(RecordError::InvalidDuration(duration));
        }
        if !self.is_collecting_points() {
            return Err(match self.session {
                Some(_) => RecordError::NotControlPoints,
                None => RecordError::NotRecording,
            });
        }
        let pose = self.reader.current_pose()?;
        let Some(Session::ControlPoints { points, .. }) = self.session.as_mut() else {
            return Err(RecordError::NotRecording);
        };
        let point = ControlPoint { pose, duration };
        points.push(point);
        info!(
            "[HYB-REC] point #{} recorded, duration={}s, pt={}",
            points.len(),
            duration,
            pose
        );
        Ok((points.len(), point))
    }

    /// Finish the running recording and save it.
    pub fn stop(&mut self) -> Result<RecordSummary, RecordError> {
        match self.session.take() {
            None => Err(RecordError::NotRecording),
            Some(Session::Sampling(mut sampler)) => sampler.stop(),
            Some(Session::ControlPoints { name, points }) => {
                if let Err(e) = finalize(self.arm(), self.settings.speed_pct) {
                    error!("[HYB-REC] failed to leave teach mode: {}", e);
                }
                self.tracks.write_sparse_timed(&name, &points, 0.0)?;
                let path = self.tracks.path(&name);
                info!(
                    "[HYB-REC] saved {} points -> {}",
                    points.len(),
                    path.display()
                );
                Ok(RecordSummary {
                    name,
                    kind: RecordingKind::ControlPoints,
                    points: points.len(),
                    path,
                })
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.stop() {
                warn!("recording lost on shutdown: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_arm::{SimArm, SimProbe};
    use crate::track::Track;

    const START: Pose = Pose([1000, 2000, 3000, 0, 0, 0, 10000]);

    fn setup() -> (tempfile::TempDir, Config, Recorder, SimProbe) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.tracks_dir = dir.path().join("tracks");
        config.recording.sample_hz = 200.0;
        let sim = SimArm::builder().start_pose(START).build();
        let probe = sim.probe();
        let arm = ArmHandle::new(sim);
        arm.with(|arm| arm.connect()).unwrap();
        let recorder = Recorder::new(arm, &config);
        (dir, config, recorder, probe)
    }

    #[test]
    fn continuous_recording_saves_dense_timed_with_telemetry() {
        let (_dir, config, mut recorder, probe) = setup();
        let name = TrackName::parse("left__wave").unwrap();
        recorder.start_continuous(&name, false).unwrap();
        assert!(probe.in_teach());
        thread::sleep(Duration::from_millis(60));
        let moved = Pose([5000, 2000, 3000, 0, 0, 0, 10000]);
        probe.drag_to(moved);
        thread::sleep(Duration::from_millis(60));
        let summary = recorder.stop().unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(summary.kind, RecordingKind::Continuous);
        assert!(summary.points >= 4);
        assert!(!probe.in_teach());
        assert_eq!(probe.modes().last(), Some(&ModeCommand::point(50)));

        let track = TrackStore::new(&config.tracks_dir)
            .read_track("left__wave")
            .unwrap();
        let Track::DenseTimed(dense) = track else {
            panic!("expected a dense-timed track");
        };
        assert_eq!(dense.points.len(), summary.points);
        assert_eq!(dense.points[0].pose, START);
        assert_eq!(dense.points.last().unwrap().pose, moved);
        assert!(dense.points.iter().all(|p| p.telemetry.is_some()));
        assert!(dense
            .points
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn zero_samples_are_dropped() {
        let (_dir, config, mut recorder, probe) = setup();
        let name = TrackName::parse("left__gap").unwrap();
        recorder.start_continuous(&name, false).unwrap();
        probe.blackout(10);
        thread::sleep(Duration::from_millis(120));
        recorder.stop().unwrap();
        let track = TrackStore::new(&config.tracks_dir)
            .read_track("left__gap")
            .unwrap();
        assert!(!track.is_empty());
        assert!(track.poses().iter().all(|p| !p.is_all_zero()));
    }

    #[test]
    fn one_recording_at_a_time() {
        let (_dir, _config, mut recorder, _probe) = setup();
        let name = TrackName::parse("left__a").unwrap();
        recorder.start_continuous(&name, false).unwrap();
        let other = TrackName::parse("left__b").unwrap();
        assert!(matches!(
            recorder.start_control_points(&other, false),
            Err(RecordError::AlreadyRecording(n)) if n == "left__a"
        ));
        recorder.stop().unwrap();
        assert!(matches!(recorder.stop(), Err(RecordError::NotRecording)));
    }

    #[test]
    fn existing_track_needs_overwrite() {
        let (_dir, config, mut recorder, _probe) = setup();
        let store = TrackStore::new(&config.tracks_dir);
        store
            .write_dense_timed("left__a", &[TrackPoint::new(START, 1.0)])
            .unwrap();
        let name = TrackName::parse("left__a").unwrap();
        assert!(matches!(
            recorder.start_continuous(&name, false),
            Err(RecordError::AlreadyExists(_))
        ));
        recorder.start_control_points(&name, true).unwrap();
        recorder.stop().unwrap();
    }

    #[test]
    fn control_points_collect_durations() {
        let (_dir, config, mut recorder, probe) = setup();
        let name = TrackName::parse("right__grab").unwrap();
        assert!(matches!(
            recorder.confirm_point(None),
            Err(RecordError::NotRecording)
        ));
        recorder.start_control_points(&name, false).unwrap();
        assert!(probe.in_teach());

        let a = Pose([1000, 0, 0, 0, 0, 0, 10000]);
        let b = Pose([1000, 0, 0, 0, 0, 0, 50000]);
        probe.drag_to(a);
        assert_eq!(recorder.confirm_point(None).unwrap().0, 1);
        probe.drag_to(b);
        recorder.confirm_point(Some(0.5)).unwrap();
        recorder.set_default_duration(1.5).unwrap();
        let (n, point) = recorder.confirm_point(None).unwrap();
        assert_eq!((n, point.duration, point.pose), (3, 1.5, b));
        assert!(matches!(
            recorder.confirm_point(Some(-1.0)),
            Err(RecordError::InvalidDuration(_))
        ));
        assert!(matches!(
            recorder.set_default_duration(1e20),
            Err(RecordError::InvalidDuration(_))
        ));

        let summary = recorder.stop().unwrap();
        assert_eq!(summary.points, 3);
        assert!(!probe.in_teach());
        let Track::SparseTimed(sparse) = TrackStore::new(&config.tracks_dir)
            .read_track("right__grab")
            .unwrap()
        else {
            panic!("expected a sparse track");
        };
        let durations: Vec<f64> = sparse.points.iter().map(|p| p.duration).collect();
        assert_eq!(durations, vec![2.0, 0.5, 1.5]);
        assert_eq!(sparse.points[0].pose, a);
    }

    #[test]
    fn control_points_refused_during_continuous() {
        let (_dir, _config, mut recorder, _probe) = setup();
        recorder
            .start_continuous(&TrackName::parse("left__a").unwrap(), false)
            .unwrap();
        assert!(matches!(
            recorder.confirm_point(None),
            Err(RecordError::NotControlPoints)
        ));
        recorder.stop().unwrap();
    }

    #[test]
    fn safe_recording_lands_in_safe_dir() {
        let (_dir, config, mut recorder, _probe) = setup();
        assert!(matches!(
            recorder.start_safe(Some("a__b"), false),
            Err(RecordError::Name(_))
        ));
        let stored = recorder.start_safe(Some("home"), false).unwrap();
        assert_eq!(stored, "zero_track_home");
        thread::sleep(Duration::from_millis(40));
        let summary = recorder.stop().unwrap();
        assert_eq!(summary.kind, RecordingKind::Safe);
        let track = TrackStore::new(config.safe_dir())
            .read_track("zero_track_home")
            .unwrap();
        assert!(matches!(track, Track::DenseUntimed(_)));
        assert_eq!(track.len(), summary.points);
        assert_eq!(track.first_pose(), Some(START));
    }

    #[test]
    fn safe_names_default_to_a_timestamp() {
        let (_dir, _config, mut recorder, _probe) = setup();
        let stored = recorder.start_safe(None, false).unwrap();
        let stamp = stored.strip_prefix("zero_track_").unwrap();
        assert_eq!(stamp.len(), "20240101_120000".len());
        assert_eq!(&stamp[8..9], "_");
        recorder.stop().unwrap();
    }

    #[test]
    fn zero_watch_grace_and_repeat() {
        let mut once = ZeroWatch::new(Duration::ZERO, None);
        once.zero();
        thread::sleep(Duration::from_millis(2));
        assert!(once.zero());
        assert!(!once.zero());
        once.clear();
        once.zero();
        thread::sleep(Duration::from_millis(2));
        assert!(once.zero());

        let mut patient = ZeroWatch::new(Duration::from_secs(60), Some(Duration::ZERO));
        assert!(!patient.zero());
        assert!(!patient.zero());
    }
}
