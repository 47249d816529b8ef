//! Both arms behind one surface.
//!
//! [`DualArm`] owns up to two [`ArmProxy`]s and routes every track-qualified
//! operation by the name's `left__`/`right__` prefix. Queries that only
//! touch files (listing, ranges, scene timelines) are answered locally
//! without bothering the workers.

use crate::config::Config;
use crate::naming::{NameError, SceneName, Side, SideSelector, TrackName};
use crate::pause::PauseSentinel;
use crate::playback::{PlayOutcome, StopToken};
use crate::pose::Pose;
use crate::recorder::RecordSummary;
use crate::rpc::{ArmProxy, Method, RpcError};
use crate::scene::{Scene, SceneElement, SceneError, SceneStore, TimelineEntry};
use crate::track::{ControlPoint, Track, TrackError, TrackStore};
use crate::controller::{ArmStatus, ProximityReport};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// A nice little error for dual-arm operations.
#[derive(Debug)]
pub enum OrchestratorError {
    /// A bad track, scene or side name.
    Name(NameError),
    /// The named arm has no worker.
    Unavailable(Side),
    /// The command was malformed.
    Usage(String),
    /// Talking to a worker failed, or the worker reported an error.
    Rpc(Side, RpcError),
    #[allow(missing_docs)]
    Track(TrackError),
    #[allow(missing_docs)]
    Scene(SceneError),
    /// One arm's scene timeline broke off.
    Timeline(Side, String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use OrchestratorError as OE;
        let msg = match self {
            OE::Name(error) => Cow::from(error.to_string()),
            OE::Unavailable(side) => Cow::from(format!("{} arm not initialised", side)),
            OE::Usage(usage) => Cow::from(usage.as_str()),
            OE::Rpc(side, error) => Cow::from(format!("{} arm: {}", side, error)),
            OE::Track(error) => Cow::from(error.to_string()),
            OE::Scene(error) => Cow::from(error.to_string()),
            OE::Timeline(side, reason) => Cow::from(format!("{} timeline: {}", side, reason)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for OrchestratorError {}

impl From<NameError> for OrchestratorError {
    fn from(value: NameError) -> Self {
        Self::Name(value)
    }
}

impl From<TrackError> for OrchestratorError {
    fn from(value: TrackError) -> Self {
        Self::Track(value)
    }
}

impl From<SceneError> for OrchestratorError {
    fn from(value: SceneError) -> Self {
        Self::Scene(value)
    }
}

/// One line of `list_timed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedTrackInfo {
    #[allow(missing_docs)]
    pub name: String,
    /// Number of control points.
    pub points: usize,
    /// Seconds the track takes to play, speed-up applied.
    pub duration: f64,
    #[allow(missing_docs)]
    pub speed_up: f64,
}

/// Where the arm workers live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMode {
    /// A thread per arm in this process.
    Threads,
    /// A `piper worker` child process per arm, handed this config file.
    Processes(Option<PathBuf>),
}

/// Wait out a scene pause of `duration`. Time spent while `pause` is active
/// does not count. Returns false when `stop` cut the wait short.
pub fn hold_scene_pause(
    duration: Duration,
    poll: Duration,
    pause: &PauseSentinel,
    stop: &StopToken,
) -> bool {
    let mut waited = Duration::ZERO;
    while waited < duration {
        if stop.is_stopped() {
            return false;
        }
        if pause.is_active() {
            thread::sleep(poll);
            continue;
        }
        let step = poll.min(duration - waited);
        let started = Instant::now();
        spin_sleep::sleep(step);
        waited += started.elapsed().min(step);
    }
    !stop.is_stopped()
}

/// The two arms.
pub struct DualArm {
    left: Option<ArmProxy>,
    right: Option<ArmProxy>,
    tracks: TrackStore,
    scenes: SceneStore,
    pause: PauseSentinel,
    pause_poll: Duration,
    stop: StopToken,
}

impl DualArm {
    /// Wrap already running workers.
    pub fn new(config: &Config, left: Option<ArmProxy>, right: Option<ArmProxy>) -> Self {
        DualArm {
            left,
            right,
            tracks: TrackStore::new(&config.tracks_dir).with_speed_up(config.speed_up.clone()),
            scenes: SceneStore::new(&config.scenes_dir),
            pause: PauseSentinel::new(&config.pause_file),
            pause_poll: config.control.pause_poll(),
            stop: StopToken::new(),
        }
    }

    /// Start a worker for every configured arm.
    pub fn spawn(config: &Config, mode: &WorkerMode) -> Result<Self, OrchestratorError> {
        let start = |side: Side| -> Result<Option<ArmProxy>, OrchestratorError> {
            if config.arm(side).is_none() {
                info!("{} arm not configured", side);
                return Ok(None);
            }
            let proxy = match mode {
                WorkerMode::Threads => ArmProxy::spawn_thread(side, config),
                WorkerMode::Processes(path) => ArmProxy::spawn_process(side, path.as_deref())
                    .map_err(|e| OrchestratorError::Rpc(side, e))?,
            };
            Ok(Some(proxy))
        };
        let left = start(Side::Left)?;
        let right = start(Side::Right)?;
        Ok(Self::new(config, left, right))
    }

    /// The worker for `side`.
    pub fn arm(&self, side: Side) -> Result<&ArmProxy, OrchestratorError> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
        .ok_or(OrchestratorError::Unavailable(side))
    }

    fn configured(&self, selector: SideSelector) -> Vec<&ArmProxy> {
        selector
            .sides()
            .into_iter()
            .filter_map(|side| self.arm(side).ok())
            .collect()
    }

    fn call<T: serde::de::DeserializeOwned>(
        &self,
        side: Side,
        method: Method,
    ) -> Result<T, OrchestratorError> {
        self.arm(side)?
            .call_as(method)
            .map_err(|e| OrchestratorError::Rpc(side, e))
    }

    /// The shared track directory.
    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    /// The shared scene directory.
    pub fn scenes(&self) -> &SceneStore {
        &self.scenes
    }

    /// Tracks owned by the selected arms.
    pub fn list(&self, selector: SideSelector) -> Result<Vec<String>, OrchestratorError> {
        let sides = selector.sides();
        Ok(self
            .tracks
            .list()?
            .into_iter()
            .filter(|name| sides.iter().any(|side| name.starts_with(side.prefix())))
            .collect())
    }

    /// Every sparse-timed track with its point count and playing time.
    pub fn list_timed(&self) -> Result<Vec<TimedTrackInfo>, OrchestratorError> {
        let mut out = Vec::new();
        for name in self.tracks.list()? {
            match self.tracks.read_track(&name) {
                Ok(Track::SparseTimed(track)) => out.push(TimedTrackInfo {
                    points: track.points.len(),
                    duration: track.effective_duration(),
                    speed_up: track.speed_up,
                    name,
                }),
                Ok(_) => {}
                Err(e) => warn!("skipping {}: {}", name, e),
            }
        }
        Ok(out)
    }

    /// Per-component minimum and maximum of a track.
    pub fn track_range(&self, raw: &str) -> Result<(Pose, Pose), OrchestratorError> {
        let name = TrackName::parse(raw)?;
        let track = self.tracks.read_track(name.as_str())?;
        track
            .range()
            .ok_or_else(|| OrchestratorError::Usage(format!("{} has no points", name)))
    }

    /// Seconds the track plays for, or `None` if it cannot be read.
    pub fn track_duration(&self, name: &str) -> Option<f64> {
        self.tracks.read_track(name).ok().map(|t| t.duration())
    }

    /// Worker status for each configured arm.
    pub fn status(&self) -> Vec<(Side, Result<ArmStatus, OrchestratorError>)> {
        Side::BOTH
            .into_iter()
            .filter(|side| self.arm(*side).is_ok())
            .map(|side| (side, self.call(side, Method::Status)))
            .collect()
    }

    /// Start a continuous recording on the arm that owns `raw`.
    pub fn record(&self, raw: &str, overwrite: bool) -> Result<String, OrchestratorError> {
        let name = TrackName::parse(raw)?;
        self.call(
            name.side(),
            Method::Record {
                name: name.to_string(),
                overwrite,
            },
        )
    }

    /// Start a control-point recording on the arm that owns `raw`.
    pub fn record_timed(&self, raw: &str, overwrite: bool) -> Result<String, OrchestratorError> {
        let name = TrackName::parse(raw)?;
        self.call(
            name.side(),
            Method::RecordTimed {
                name: name.to_string(),
                overwrite,
            },
        )
    }

    /// Confirm a control point on `side`.
    pub fn add_point(
        &self,
        side: Side,
        duration: Option<f64>,
    ) -> Result<(usize, ControlPoint), OrchestratorError> {
        self.call(side, Method::AddPoint { duration })
    }

    /// Change the default control-point duration on `side`.
    pub fn set_default_duration(&self, side: Side, seconds: f64) -> Result<(), OrchestratorError> {
        self.call(side, Method::SetDefaultDuration { seconds })
    }

    /// Stop whatever the selected arms are recording. Arms that are not
    /// recording are skipped.
    pub fn stop_record(&self, selector: SideSelector) -> Result<Vec<RecordSummary>, OrchestratorError> {
        let mut out = Vec::new();
        for side in selector.sides() {
            if self.arm(side).is_err() {
                continue;
            }
            let status: ArmStatus = self.call(side, Method::Status)?;
            if status.recording.is_some() {
                out.push(self.call(side, Method::StopRecord)?);
            }
        }
        Ok(out)
    }

    /// Record a safe track on `side`.
    pub fn record_safe(
        &self,
        side: Side,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<String, OrchestratorError> {
        self.call(
            side,
            Method::RecordSafe {
                name: name.map(str::to_owned),
                overwrite,
            },
        )
    }

    /// Save `side`'s current pose as the zero pose.
    pub fn save_zero_pose(&self, side: Side) -> Result<(Pose, PathBuf), OrchestratorError> {
        self.call(side, Method::SaveZeroPose)
    }

    /// Compare `side`'s pose with the zero pose.
    pub fn check_zero_pose(&self, side: Side) -> Result<ProximityReport, OrchestratorError> {
        self.call(side, Method::CheckZeroPose)
    }

    /// Compare `side`'s pose with every safe-track point.
    pub fn check_safe_tracks(&self, side: Side) -> Result<ProximityReport, OrchestratorError> {
        self.call(side, Method::CheckSafeTracks)
    }

    /// Play tracks. Tracks are grouped by arm; each arm plays its group in
    /// order while the two arms run at the same time.
    pub fn play(&self, raw: &[String]) -> Result<Vec<(Side, PlayOutcome)>, OrchestratorError> {
        if raw.is_empty() {
            return Err(OrchestratorError::Usage("play: at least one track".to_owned()));
        }
        let mut groups: Vec<(Side, Vec<String>)> = Vec::new();
        for raw in raw {
            let name = TrackName::parse(raw)?;
            match groups.iter_mut().find(|(side, _)| *side == name.side()) {
                Some((_, names)) => names.push(name.to_string()),
                None => groups.push((name.side(), vec![name.to_string()])),
            }
        }
        for (side, _) in &groups {
            self.arm(*side)?;
        }
        self.run_groups(groups)
    }

    /// Play one left and one right track at the same time.
    pub fn play_parallel(
        &self,
        left: &str,
        right: &str,
    ) -> Result<Vec<(Side, PlayOutcome)>, OrchestratorError> {
        let left = TrackName::parse(left)?;
        let right = TrackName::parse(right)?;
        if left.side() != Side::Left || right.side() != Side::Right {
            return Err(OrchestratorError::Usage(
                "pp: give a left__ track, then a right__ track".to_owned(),
            ));
        }
        self.play(&[left.to_string(), right.to_string()])
    }

    fn run_groups(
        &self,
        groups: Vec<(Side, Vec<String>)>,
    ) -> Result<Vec<(Side, PlayOutcome)>, OrchestratorError> {
        let results: Vec<(Side, Result<PlayOutcome, OrchestratorError>)> = thread::scope(|s| {
            let handles: Vec<_> = groups
                .into_iter()
                .map(|(side, names)| {
                    (side, s.spawn(move || self.call(side, Method::Play { names })))
                })
                .collect();
            handles
                .into_iter()
                .map(|(side, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(OrchestratorError::Usage(format!("{} play thread panicked", side)))
                    });
                    (side, result)
                })
                .collect()
        });
        let mut outcomes = Vec::new();
        let mut first_error = None;
        for (side, result) in results {
            match result {
                Ok(outcome) => outcomes.push((side, outcome)),
                Err(e) => {
                    error!("[{}] play failed: {}", side, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Save a scene.
    pub fn scene_add(&self, raw: &str, scene: &Scene) -> Result<PathBuf, OrchestratorError> {
        let name = SceneName::parse(raw)?;
        self.scenes.save(&name, scene)?;
        let path = self.scenes.path(&name);
        info!("scene saved: {}", path.display());
        Ok(path)
    }

    /// Both arms' timelines of a scene.
    pub fn scene_show(&self, raw: &str) -> Result<Vec<(Side, Vec<TimelineEntry>)>, OrchestratorError> {
        let name = SceneName::parse(raw)?;
        let scene = self.scenes.load(&name)?;
        Ok(Side::BOTH
            .into_iter()
            .map(|side| (side, scene.timeline(side, |track| self.track_duration(track))))
            .collect())
    }

    /// Play scenes back to back. Every scene is loaded before anything moves.
    pub fn scene_play(&self, raw: &[String]) -> Result<PlayOutcome, OrchestratorError> {
        if raw.is_empty() {
            return Err(OrchestratorError::Usage("scene_play: at least one scene".to_owned()));
        }
        let scenes = raw
            .iter()
            .map(|raw| {
                let name = SceneName::parse(raw)?;
                let scene = self.scenes.load(&name)?;
                Ok((name, scene))
            })
            .collect::<Result<Vec<_>, OrchestratorError>>()?;
        self.stop.reset();
        for (idx, (name, scene)) in scenes.iter().enumerate() {
            info!("[SCENE PLAY] {}/{} {}", idx + 1, scenes.len(), name);
            let results: Vec<Result<(), OrchestratorError>> = thread::scope(|s| {
                let handles: Vec<_> = Side::BOTH
                    .into_iter()
                    .filter(|side| !scene.side(*side).is_empty())
                    .map(|side| (side, s.spawn(move || self.run_scene_side(side, scene.side(side)))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(side, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            Err(OrchestratorError::Timeline(side, "thread panicked".to_owned()))
                        })
                    })
                    .collect()
            });
            if let Some(e) = results.into_iter().find_map(Result::err) {
                error!("[SCENE PLAY] {} failed: {}", name, e);
                return Err(e);
            }
            if self.stop.is_stopped() {
                info!("[SCENE PLAY] stopped during {}", name);
                return Ok(PlayOutcome::Cancelled);
            }
        }
        Ok(PlayOutcome::Completed)
    }

    /// Run one arm's elements in order. The first track that fails ends
    /// this arm's timeline; the other arm carries on with its own.
    fn run_scene_side(&self, side: Side, elements: &[SceneElement]) -> Result<(), OrchestratorError> {
        let Ok(arm) = self.arm(side) else {
            warn!("[SCENE] {} arm not initialised; skipping its timeline", side);
            return Ok(());
        };
        for element in elements {
            if self.stop.is_stopped() {
                return Ok(());
            }
            match element {
                SceneElement::Pause { duration } => {
                    let wait = Duration::try_from_secs_f64(duration.max(0.0)).map_err(|_| {
                        OrchestratorError::Timeline(
                            side,
                            format!("pause of {}s is not a usable duration", duration),
                        )
                    })?;
                    if !hold_scene_pause(wait, self.pause_poll, &self.pause, &self.stop) {
                        return Ok(());
                    }
                }
                SceneElement::Track { name } => {
                    info!("[SCENE] {} {}", side, name);
                    let outcome = arm
                        .call_as::<PlayOutcome>(Method::Play {
                            names: vec![name.clone()],
                        })
                        .map_err(|e| OrchestratorError::Rpc(side, e))?;
                    if outcome == PlayOutcome::Cancelled {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Stop every running playback and scene.
    pub fn stop(&self) {
        self.stop.stop();
        for arm in self.configured(SideSelector::Both) {
            if let Err(e) = arm.cancel() {
                warn!("[{}] cancel: {}", arm.side(), e);
            }
        }
    }

    /// Current pose of `side`.
    pub fn get(&self, side: Side) -> Result<Pose, OrchestratorError> {
        self.call(side, Method::Get)
    }

    /// Glide one component of `side`.
    pub fn set_joint(&self, side: Side, joint: usize, value: i32) -> Result<bool, OrchestratorError> {
        self.call(side, Method::SetJoint { joint, value })
    }

    /// Glide `side` to `pose`.
    pub fn set_all(&self, side: Side, pose: Pose) -> Result<bool, OrchestratorError> {
        self.call(side, Method::SetAll { pose })
    }

    /// Glide one component of `side` by `delta`.
    pub fn nudge(&self, side: Side, joint: usize, delta: i32) -> Result<bool, OrchestratorError> {
        self.call(side, Method::Nudge { joint, delta })
    }

    /// Hard-reset the selected arms. The whole sequence runs twice, since a
    /// single pass does not always clear a latched fault.
    pub fn reset(&self, selector: SideSelector) -> Result<Vec<(Side, bool)>, OrchestratorError> {
        let mut out = Vec::new();
        for side in selector.sides() {
            if self.arm(side).is_err() {
                if let SideSelector::One(side) = selector {
                    return Err(OrchestratorError::Unavailable(side));
                }
                warn!("{} arm not initialised", side);
                continue;
            }
            let _: bool = self.call(side, Method::Reset)?;
            out.push((side, self.call(side, Method::Reset)?));
        }
        Ok(out)
    }

    /// Shut every worker down, letting go of the arms.
    pub fn shutdown(&self) {
        self.stop();
        for arm in self.configured(SideSelector::Both) {
            arm.shutdown();
        }
    }

    /// The pause sentinel watched by scenes.
    pub fn pause_file(&self) -> &Path {
        self.pause.path()
    }
}
