//! This module provides an API to read and write tracks, the recorded
//! trajectories the arms play back. A track named `left__wave` lives in
//! `<tracks_dir>/left__wave.json`, optionally next to a telemetry sidecar
//! `<tracks_dir>/left__wave.details.json`. Three layouts exist:
//!
//! - Dense-untimed, the oldest: the main file is a bare list of poses, and
//!   the sidecar (required, one entry per pose) carries the timestamps.
//!
//!   ```text
//!   [[j1, j2, j3, j4, j5, j6, g], ...]
//!   ```
//!
//! - Dense-timed: every pose carries its capture timestamp. The sidecar is
//!   optional.
//!
//!   ```text
//!   {"version": "v2.0", "points": [{"pt": [...], "ts": 1712.5}, ...]}
//!   ```
//!
//! - Sparse-timed: a few control points, each with the time in seconds to
//!   travel to it from the previous point. The first duration is ignored.
//!
//!   ```text
//!   {"version": "v3.0", "points": [{"pt": [...], "duration": 2.0}, ...]}
//!   ```
//!
//! [`TrackStore::read_track`] figures out which layout a file uses from its
//! `version` tag; an unknown tag is an error, never a guess.

use crate::pose::{Pose, JOINT_COUNT};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt, fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

/// Version tag of dense-timed tracks.
pub const DENSE_TIMED_VERSION: &str = "v2.0";

/// Version tag of sparse-timed tracks.
pub const SPARSE_TIMED_VERSION: &str = "v3.0";

/// Longest span a track may cover, in seconds: a segment duration, or the
/// distance of a timestamp from the track's first one.
pub const MAX_TRACK_SECONDS: f64 = 86_400.0;

const TRACK_EXT: &str = ".json";
const DETAILS_EXT: &str = ".details.json";

/// Per-motor telemetry captured alongside a pose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    #[allow(missing_docs)]
    pub motor_speed_rpm: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub motor_current_ma: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub motor_pos_deg001: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    #[serde(rename = "motor_effort_mNm")]
    pub motor_effort_mnm: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub voltage_mv: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub foc_temp_c: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub motor_temp_c: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub bus_current_ma: [i32; JOINT_COUNT],
}

/// One entry of a `.details.json` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DetailEntry {
    ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    joints_deg001: Option<[i32; JOINT_COUNT]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gripper_deg001: Option<i32>,
    #[serde(flatten)]
    telemetry: Option<Telemetry>,
}

impl DetailEntry {
    /// Sidecars holding only timestamps deserialize to all-default
    /// telemetry; that is no telemetry at all.
    fn recorded_telemetry(self) -> Option<Telemetry> {
        self.telemetry.filter(|t| *t != Telemetry::default())
    }

    fn from_point(point: &TrackPoint) -> Self {
        DetailEntry {
            ts: point.details_timestamp,
            joints_deg001: point.telemetry.as_ref().map(|_| point.pose.joints()),
            gripper_deg001: point.telemetry.as_ref().map(|_| point.pose.gripper()),
            telemetry: point.telemetry.clone(),
        }
    }
}

/// A pose with its timing and, when recorded, its telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    #[allow(missing_docs)]
    pub pose: Pose,
    /// When the pose was captured, in seconds.
    pub timestamp: f64,
    /// When the telemetry was captured; equal to `timestamp` unless the
    /// sidecar says otherwise.
    pub details_timestamp: f64,
    /// Absent for tracks that never stored telemetry.
    pub telemetry: Option<Telemetry>,
}

impl TrackPoint {
    /// A point without telemetry.
    pub fn new(pose: Pose, timestamp: f64) -> Self {
        TrackPoint {
            pose,
            timestamp,
            details_timestamp: timestamp,
            telemetry: None,
        }
    }

    /// Attach telemetry.
    pub fn with_telemetry(self, telemetry: Telemetry) -> Self {
        TrackPoint {
            telemetry: Some(telemetry),
            ..self
        }
    }
}

/// A sparse control point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Where to be at the end of the segment.
    #[serde(rename = "pt")]
    pub pose: Pose,
    /// Seconds to travel here from the previous point.
    pub duration: f64,
}

/// A dense track, timed or not.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTrack {
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub points: Vec<TrackPoint>,
}

/// A sparse, control-point track.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTrack {
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub points: Vec<ControlPoint>,
    /// Fraction by which every segment is shortened at playback, in [0, 1].
    pub speed_up: f64,
}

impl SparseTrack {
    /// Cumulative timestamps, the first point's duration included.
    pub fn timestamps(&self) -> Vec<f64> {
        self.points
            .iter()
            .scan(0.0, |acc, p| {
                *acc += p.duration;
                Some(*acc)
            })
            .collect()
    }

    /// Sum of every duration after the first, before speed-up.
    pub fn nominal_duration(&self) -> f64 {
        self.points.iter().skip(1).map(|p| p.duration).sum()
    }

    /// Sum of every duration after the first, after speed-up.
    pub fn effective_duration(&self) -> f64 {
        self.nominal_duration() * (1.0 - self.speed_up)
    }
}

/// The three on-disk layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFormat {
    #[allow(missing_docs)]
    DenseUntimed,
    #[allow(missing_docs)]
    DenseTimed,
    #[allow(missing_docs)]
    SparseTimed,
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            TrackFormat::DenseUntimed => "v1",
            TrackFormat::DenseTimed => DENSE_TIMED_VERSION,
            TrackFormat::SparseTimed => SPARSE_TIMED_VERSION,
        };
        write!(f, "{}", tag)
    }
}

/// A loaded track.
#[derive(Debug, Clone, PartialEq)]
pub enum Track {
    #[allow(missing_docs)]
    DenseUntimed(DenseTrack),
    #[allow(missing_docs)]
    DenseTimed(DenseTrack),
    #[allow(missing_docs)]
    SparseTimed(SparseTrack),
}

impl Track {
    /// The track's name.
    pub fn name(&self) -> &str {
        match self {
            Track::DenseUntimed(t) | Track::DenseTimed(t) => &t.name,
            Track::SparseTimed(t) => &t.name,
        }
    }

    /// The layout it was stored in.
    pub fn format(&self) -> TrackFormat {
        match self {
            Track::DenseUntimed(_) => TrackFormat::DenseUntimed,
            Track::DenseTimed(_) => TrackFormat::DenseTimed,
            Track::SparseTimed(_) => TrackFormat::SparseTimed,
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        match self {
            Track::DenseUntimed(t) | Track::DenseTimed(t) => t.points.len(),
            Track::SparseTimed(t) => t.points.len(),
        }
    }

    /// True when the track has no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Just the poses.
    pub fn poses(&self) -> Vec<Pose> {
        match self {
            Track::DenseUntimed(t) | Track::DenseTimed(t) => {
                t.points.iter().map(|p| p.pose).collect()
            }
            Track::SparseTimed(t) => t.points.iter().map(|p| p.pose).collect(),
        }
    }

    /// The first pose, if any.
    pub fn first_pose(&self) -> Option<Pose> {
        match self {
            Track::DenseUntimed(t) | Track::DenseTimed(t) => t.points.first().map(|p| p.pose),
            Track::SparseTimed(t) => t.points.first().map(|p| p.pose),
        }
    }

    /// Uniform view over every layout. Sparse tracks get cumulative
    /// timestamps and no telemetry.
    pub fn track_points(&self) -> Vec<TrackPoint> {
        match self {
            Track::DenseUntimed(t) | Track::DenseTimed(t) => t.points.clone(),
            Track::SparseTimed(t) => t
                .timestamps()
                .into_iter()
                .zip(&t.points)
                .map(|(ts, p)| TrackPoint::new(p.pose, ts))
                .collect(),
        }
    }

    /// How long the track plays, in seconds. Dense tracks span first to
    /// last timestamp; sparse tracks sum their sped-up segments.
    pub fn duration(&self) -> f64 {
        match self {
            Track::DenseUntimed(t) | Track::DenseTimed(t) => match (t.points.first(), t.points.last()) {
                (Some(first), Some(last)) => (last.timestamp - first.timestamp).max(0.0),
                _ => 0.0,
            },
            Track::SparseTimed(t) => t.effective_duration(),
        }
    }

    /// Per-component minimum and maximum over the whole track.
    pub fn range(&self) -> Option<(Pose, Pose)> {
        let poses = self.poses();
        let first = *poses.first()?;
        Some(poses.iter().fold((first, first), |(mut lo, mut hi), p| {
            for i in 0..p.0.len() {
                lo.0[i] = lo.0[i].min(p.0[i]);
                hi.0[i] = hi.0[i].max(p.0[i]);
            }
            (lo, hi)
        }))
    }
}

/// A nice little error that we can return if things go wrong while reading
/// or writing tracks.
#[derive(Debug)]
pub enum TrackError {
    /// There is no `<name>.json`.
    NotFound(PathBuf),
    /// Reading or writing failed.
    IoError(PathBuf, io::Error),
    /// The file is not JSON at all.
    Malformed(PathBuf, serde_json::Error),
    /// The file is JSON but not shaped like a track.
    Validation {
        /// File at fault.
        path: PathBuf,
        /// Which field is wrong and how.
        detail: String,
    },
    /// The `version` tag names a layout this build does not know.
    UnknownVersion(PathBuf, String),
    /// Points and sidecar entries do not line up.
    LengthMismatch {
        #[allow(missing_docs)]
        name: String,
        #[allow(missing_docs)]
        points: usize,
        #[allow(missing_docs)]
        details: usize,
    },
    /// The name cannot be turned into a file name.
    InvalidName(String),
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TrackError as TE;
        let msg = match self {
            TE::NotFound(path) => Cow::from(format!("track not found: {}", path.display())),
            TE::IoError(path, error) => {
                Cow::from(format!("io error on {}: {}", path.display(), error))
            }
            TE::Malformed(path, error) => {
                Cow::from(format!("malformed json in {}: {}", path.display(), error))
            }
            TE::Validation { path, detail } => {
                Cow::from(format!("invalid track {}: {}", path.display(), detail))
            }
            TE::UnknownVersion(path, version) => Cow::from(format!(
                "unknown track version {:?} in {}",
                version,
                path.display()
            )),
            TE::LengthMismatch {
                name,
                points,
                details,
            } => Cow::from(format!(
                "track {} has {} points but {} details entries",
                name, points, details
            )),
            TE::InvalidName(name) => Cow::from(format!("invalid track name: {:?}", name)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for TrackError {}

fn json_error(path: &Path, error: serde_json::Error) -> TrackError {
    use serde_json::error::Category;
    match error.classify() {
        Category::Data => TrackError::Validation {
            path: path.to_path_buf(),
            detail: error.to_string(),
        },
        Category::Io | Category::Syntax | Category::Eof => {
            TrackError::Malformed(path.to_path_buf(), error)
        }
    }
}

/// Playback waits on `ts - first_ts`, so every offset has to be a sane
/// number of seconds.
fn check_timestamps(
    path: &Path,
    field: &str,
    stamps: impl IntoIterator<Item = f64>,
) -> Result<(), TrackError> {
    let mut first = None;
    for (idx, ts) in stamps.into_iter().enumerate() {
        let base = *first.get_or_insert(ts);
        if !ts.is_finite() || (ts - base).abs() > MAX_TRACK_SECONDS {
            return Err(TrackError::Validation {
                path: path.to_path_buf(),
                detail: format!(
                    "{}[{}].ts {} is more than {}s from the first timestamp",
                    field, idx, ts, MAX_TRACK_SECONDS
                ),
            });
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct DenseTimedDoc {
    points: Vec<DenseTimedEntry>,
}

#[derive(Serialize, Deserialize)]
struct DenseTimedEntry {
    pt: Pose,
    ts: f64,
}

#[derive(Serialize)]
struct DenseTimedDocOut<'a> {
    version: &'a str,
    points: Vec<DenseTimedEntry>,
}

#[derive(Deserialize)]
struct SparseDoc {
    points: Vec<ControlPoint>,
    #[serde(default)]
    speed_up: Option<f64>,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

#[derive(Serialize)]
struct SparseDocOut<'a> {
    version: &'a str,
    #[serde(skip_serializing_if = "is_zero")]
    speed_up: f64,
    points: &'a [ControlPoint],
}

/// A directory of tracks.
#[derive(Debug, Clone)]
pub struct TrackStore {
    dir: PathBuf,
    speed_up: HashMap<String, f64>,
}

impl TrackStore {
    /// A store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TrackStore {
            dir: dir.into(),
            speed_up: HashMap::new(),
        }
    }

    /// Attach a speed-up table. Entries override whatever a sparse track
    /// file says about itself.
    pub fn with_speed_up(self, speed_up: HashMap<String, f64>) -> Self {
        TrackStore { speed_up, ..self }
    }

    /// The store's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check_name(name: &str) -> Result<(), TrackError> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.starts_with('.')
            || name.ends_with(".details")
        {
            return Err(TrackError::InvalidName(name.to_owned()));
        }
        Ok(())
    }

    /// `<dir>/<name>.json`
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, TRACK_EXT))
    }

    /// `<dir>/<name>.details.json`
    pub fn details_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, DETAILS_EXT))
    }

    /// Whether a track file exists under `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Load a track, detecting its layout.
    pub fn read_track(&self, name: &str) -> Result<Track, TrackError> {
        Self::check_name(name)?;
        let path = self.path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(TrackError::NotFound(path)),
            Err(e) => return Err(TrackError::IoError(path, e)),
        };
        let doc: Value = serde_json::from_str(&text).map_err(|e| json_error(&path, e))?;

        match &doc {
            Value::Object(map) => match map.get("version") {
                Some(Value::String(v)) if v == SPARSE_TIMED_VERSION => {
                    self.load_sparse(name, &path, doc)
                }
                Some(Value::String(v)) if v == DENSE_TIMED_VERSION => {
                    self.load_dense_timed(name, &path, doc)
                }
                Some(Value::String(v)) => Err(TrackError::UnknownVersion(path, v.clone())),
                Some(other) => Err(TrackError::Validation {
                    path,
                    detail: format!("field `version` must be a string, found {}", other),
                }),
                None => Err(TrackError::Validation {
                    path,
                    detail: "object without a `version` field".to_owned(),
                }),
            },
            Value::Array(_) => self.load_dense_untimed(name, &path, doc),
            _ => Err(TrackError::Validation {
                path,
                detail: "expected a list of poses or a versioned object".to_owned(),
            }),
        }
    }

    fn load_sparse(&self, name: &str, path: &Path, doc: Value) -> Result<Track, TrackError> {
        let doc: SparseDoc = serde_json::from_value(doc).map_err(|e| json_error(path, e))?;
        if let Some((idx, p)) = doc
            .points
            .iter()
            .enumerate()
            .find(|(_, p)| !(0.0..=MAX_TRACK_SECONDS).contains(&p.duration))
        {
            return Err(TrackError::Validation {
                path: path.to_path_buf(),
                detail: format!(
                    "points[{}].duration {} is outside [0, {}]",
                    idx, p.duration, MAX_TRACK_SECONDS
                ),
            });
        }
        let speed_up = self
            .speed_up
            .get(name)
            .copied()
            .or(doc.speed_up)
            .unwrap_or(0.0);
        if !(0.0..=1.0).contains(&speed_up) {
            return Err(TrackError::Validation {
                path: path.to_path_buf(),
                detail: format!("speed_up {} is outside [0, 1]", speed_up),
            });
        }
        Ok(Track::SparseTimed(SparseTrack {
            name: name.to_owned(),
            points: doc.points,
            speed_up,
        }))
    }

    fn load_dense_timed(&self, name: &str, path: &Path, doc: Value) -> Result<Track, TrackError> {
        let doc: DenseTimedDoc = serde_json::from_value(doc).map_err(|e| json_error(path, e))?;
        check_timestamps(path, "points", doc.points.iter().map(|e| e.ts))?;
        let details = self.read_details(name)?;
        let mut points: Vec<TrackPoint> = doc
            .points
            .into_iter()
            .map(|e| TrackPoint::new(e.pt, e.ts))
            .collect();
        if let Some(details) = details {
            if details.len() < points.len() {
                return Err(TrackError::LengthMismatch {
                    name: name.to_owned(),
                    points: points.len(),
                    details: details.len(),
                });
            }
            for (point, detail) in points.iter_mut().zip(details) {
                point.details_timestamp = detail.ts;
                point.telemetry = detail.recorded_telemetry();
            }
        }
        Ok(Track::DenseTimed(DenseTrack {
            name: name.to_owned(),
            points,
        }))
    }

    fn load_dense_untimed(
        &self,
        name: &str,
        path: &Path,
        doc: Value,
    ) -> Result<Track, TrackError> {
        let poses: Vec<Pose> = serde_json::from_value(doc).map_err(|e| json_error(path, e))?;
        let details = self.read_details(name)?.unwrap_or_default();
        check_timestamps(&self.details_path(name), "details", details.iter().map(|d| d.ts))?;
        if details.len() != poses.len() {
            return Err(TrackError::LengthMismatch {
                name: name.to_owned(),
                points: poses.len(),
                details: details.len(),
            });
        }
        let points = poses
            .into_iter()
            .zip(details)
            .map(|(pose, detail)| TrackPoint {
                pose,
                timestamp: detail.ts,
                details_timestamp: detail.ts,
                telemetry: detail.recorded_telemetry(),
            })
            .collect();
        Ok(Track::DenseUntimed(DenseTrack {
            name: name.to_owned(),
            points,
        }))
    }

    fn read_details(&self, name: &str) -> Result<Option<Vec<DetailEntry>>, TrackError> {
        let path = self.details_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrackError::IoError(path, e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| json_error(&path, e))
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), TrackError> {
        fs::create_dir_all(&self.dir).map_err(|e| TrackError::IoError(self.dir.clone(), e))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, contents).map_err(|e| TrackError::IoError(tmp.clone(), e))?;
        fs::rename(&tmp, path).map_err(|e| TrackError::IoError(path.to_path_buf(), e))
    }

    fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
        pretty: bool,
    ) -> Result<(), TrackError> {
        let bytes = if pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|e| json_error(path, e))?;
        self.write_atomic(path, &bytes)
    }

    /// Write the legacy layout: a pose list plus a sidecar holding the
    /// timestamps (and telemetry, where present).
    pub fn write_dense_untimed(&self, name: &str, points: &[TrackPoint]) -> Result<(), TrackError> {
        Self::check_name(name)?;
        let poses: Vec<Pose> = points.iter().map(|p| p.pose).collect();
        let details: Vec<DetailEntry> = points.iter().map(DetailEntry::from_point).collect();
        self.write_json(&self.path(name), &poses, false)?;
        self.write_json(&self.details_path(name), &details, false)
    }

    /// Write the dense-timed layout. The sidecar is written when any point
    /// carries telemetry, and a stale one is removed otherwise.
    pub fn write_dense_timed(&self, name: &str, points: &[TrackPoint]) -> Result<(), TrackError> {
        Self::check_name(name)?;
        let doc = DenseTimedDocOut {
            version: DENSE_TIMED_VERSION,
            points: points
                .iter()
                .map(|p| DenseTimedEntry {
                    pt: p.pose,
                    ts: p.timestamp,
                })
                .collect(),
        };
        self.write_json(&self.path(name), &doc, false)?;
        if points.iter().any(|p| p.telemetry.is_some()) {
            let details: Vec<DetailEntry> = points.iter().map(DetailEntry::from_point).collect();
            self.write_json(&self.details_path(name), &details, false)
        } else {
            self.remove_file(&self.details_path(name))
        }
    }

    /// Write the sparse layout. A zero `speed_up` is left out of the file.
    pub fn write_sparse_timed(
        &self,
        name: &str,
        points: &[ControlPoint],
        speed_up: f64,
    ) -> Result<(), TrackError> {
        Self::check_name(name)?;
        let doc = SparseDocOut {
            version: SPARSE_TIMED_VERSION,
            speed_up,
            points,
        };
        self.write_json(&self.path(name), &doc, true)?;
        self.remove_file(&self.details_path(name))
    }

    fn remove_file(&self, path: &Path) -> Result<(), TrackError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TrackError::IoError(path.to_path_buf(), e)),
        }
    }

    /// Delete a track and its sidecar. Missing files are fine.
    pub fn remove(&self, name: &str) -> Result<(), TrackError> {
        Self::check_name(name)?;
        self.remove_file(&self.path(name))?;
        self.remove_file(&self.details_path(name))
    }

    /// Every track name in the store, sorted. Sidecars are not tracks.
    pub fn list(&self) -> Result<Vec<String>, TrackError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TrackError::IoError(self.dir.clone(), e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TrackError::IoError(self.dir.clone(), e))?;
            if !entry.path().is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(DETAILS_EXT) {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(TRACK_EXT) {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, TrackStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackStore::new(dir.path());
        (dir, store)
    }

    fn pose(v: i32) -> Pose {
        Pose([v, 0, 0, 0, 0, 0, v * 10])
    }

    #[test]
    fn sparse_round_trip() {
        let (_dir, store) = store();
        let points = vec![
            ControlPoint {
                pose: pose(0),
                duration: 0.0,
            },
            ControlPoint {
                pose: pose(5),
                duration: 2.5,
            },
        ];
        store.write_sparse_timed("right__grab", &points, 0.0).unwrap();
        let track = store.read_track("right__grab").unwrap();
        assert_eq!(track.format(), TrackFormat::SparseTimed);
        match &track {
            Track::SparseTimed(t) => {
                assert_eq!(t.points, points);
                assert_eq!(t.speed_up, 0.0);
            }
            other => panic!("wrong variant {:?}", other),
        }
        assert_eq!(track, store.read_track("right__grab").unwrap());
    }

    #[test]
    fn dense_timed_round_trip() {
        let (_dir, store) = store();
        let points: Vec<TrackPoint> = (0..4)
            .map(|i| TrackPoint::new(pose(i), 100.0 + i as f64 * 0.02))
            .collect();
        store.write_dense_timed("left__wave", &points).unwrap();
        assert!(!store.details_path("left__wave").exists());
        let track = store.read_track("left__wave").unwrap();
        assert_eq!(track.format(), TrackFormat::DenseTimed);
        assert_eq!(track.track_points(), points);
    }

    #[test]
    fn dense_timed_keeps_telemetry() {
        let (_dir, store) = store();
        let telemetry = Telemetry {
            motor_current_ma: [1, 2, 3, 4, 5, 6],
            ..Default::default()
        };
        let points = vec![
            TrackPoint::new(pose(1), 1.0).with_telemetry(telemetry.clone()),
            TrackPoint::new(pose(2), 2.0).with_telemetry(telemetry.clone()),
        ];
        store.write_dense_timed("left__wave", &points).unwrap();
        let raw = fs::read_to_string(store.details_path("left__wave")).unwrap();
        assert!(raw.contains("motor_effort_mNm"));
        assert!(raw.contains("joints_deg001"));
        let track = store.read_track("left__wave").unwrap();
        assert_eq!(track.track_points()[1].telemetry, Some(telemetry));
    }

    #[test]
    fn dense_untimed_needs_matching_details() {
        let (_dir, store) = store();
        fs::write(
            store.path("left__wave"),
            "[[1,0,0,0,0,0,0],[2,0,0,0,0,0,0],[3,0,0,0,0,0,0]]",
        )
        .unwrap();
        fs::write(
            store.details_path("left__wave"),
            r#"[{"ts": 1.0}, {"ts": 1.5}, {"ts": 2.0}]"#,
        )
        .unwrap();
        let track = store.read_track("left__wave").unwrap();
        assert_eq!(track.format(), TrackFormat::DenseUntimed);
        assert_eq!(track.len(), 3);
        assert_eq!(track.duration(), 1.0);

        fs::write(
            store.details_path("left__wave"),
            r#"[{"ts": 1.0}, {"ts": 1.5}]"#,
        )
        .unwrap();
        assert!(matches!(
            store.read_track("left__wave"),
            Err(TrackError::LengthMismatch {
                points: 3,
                details: 2,
                ..
            })
        ));
    }

    #[test]
    fn dense_untimed_round_trip_through_writer() {
        let (_dir, store) = store();
        let points = vec![TrackPoint::new(pose(1), 5.0), TrackPoint::new(pose(2), 6.0)];
        store.write_dense_untimed("zero_track_a", &points).unwrap();
        let raw = fs::read_to_string(store.details_path("zero_track_a")).unwrap();
        assert_eq!(raw, r#"[{"ts":5.0},{"ts":6.0}]"#);
        let track = store.read_track("zero_track_a").unwrap();
        assert_eq!(track.poses(), vec![pose(1), pose(2)]);
    }

    #[test]
    fn detail_without_timestamp_is_invalid() {
        let (_dir, store) = store();
        fs::write(store.path("left__x"), "[[1,0,0,0,0,0,0]]").unwrap();
        fs::write(store.details_path("left__x"), r#"[{"voltage_mv": [0,0,0,0,0,0]}]"#).unwrap();
        match store.read_track("left__x") {
            Err(TrackError::Validation { detail, .. }) => assert!(detail.contains("ts")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn absurd_times_are_rejected_on_load() {
        let (_dir, store) = store();
        fs::write(
            store.path("left__far"),
            r#"{"version": "v2.0", "points": [{"pt": [0,0,0,0,0,0,0], "ts": 0.0},
                                              {"pt": [1,0,0,0,0,0,0], "ts": 1e20}]}"#,
        )
        .unwrap();
        match store.read_track("left__far") {
            Err(TrackError::Validation { detail, .. }) => assert!(detail.contains("points[1].ts")),
            other => panic!("expected validation error, got {:?}", other),
        }

        fs::write(store.path("left__old"), "[[1,0,0,0,0,0,0],[2,0,0,0,0,0,0]]").unwrap();
        fs::write(store.details_path("left__old"), r#"[{"ts": 5.0}, {"ts": -1e12}]"#).unwrap();
        match store.read_track("left__old") {
            Err(TrackError::Validation { detail, .. }) => {
                assert!(detail.contains("details[1].ts"))
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        fs::write(
            store.path("right__slow"),
            r#"{"version": "v3.0", "points": [{"pt": [0,0,0,0,0,0,0], "duration": 0.0},
                                              {"pt": [1,0,0,0,0,0,0], "duration": 1e20}]}"#,
        )
        .unwrap();
        match store.read_track("right__slow") {
            Err(TrackError::Validation { detail, .. }) => {
                assert!(detail.contains("points[1].duration"))
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        // Epoch timestamps are fine as long as they sit close together.
        let points = vec![
            TrackPoint::new(pose(1), 1.7e9),
            TrackPoint::new(pose(2), 1.7e9 + 3600.0),
        ];
        store.write_dense_timed("left__epoch", &points).unwrap();
        assert_eq!(store.read_track("left__epoch").unwrap().duration(), 3600.0);
    }

    #[test]
    fn unknown_version_is_fatal() {
        let (_dir, store) = store();
        fs::write(store.path("left__x"), r#"{"version": "v9.0", "points": []}"#).unwrap();
        assert!(matches!(
            store.read_track("left__x"),
            Err(TrackError::UnknownVersion(_, v)) if v == "v9.0"
        ));
    }

    #[test]
    fn structural_errors_name_the_field() {
        let (_dir, store) = store();
        fs::write(
            store.path("left__x"),
            r#"{"version": "v3.0", "points": [{"pt": [1,2,3]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            store.read_track("left__x"),
            Err(TrackError::Validation { .. })
        ));
        fs::write(store.path("left__x"), "{not json").unwrap();
        assert!(matches!(
            store.read_track("left__x"),
            Err(TrackError::Malformed(..))
        ));
    }

    #[test]
    fn missing_track_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.read_track("left__nope"),
            Err(TrackError::NotFound(_))
        ));
    }

    #[test]
    fn config_speed_up_overrides_file() {
        let (dir, store) = store();
        let points = vec![ControlPoint {
            pose: pose(1),
            duration: 0.0,
        }];
        store.write_sparse_timed("right__tomat", &points, 0.1).unwrap();
        let track = store.read_track("right__tomat").unwrap();
        assert!(matches!(&track, Track::SparseTimed(t) if t.speed_up == 0.1));

        let store = TrackStore::new(dir.path())
            .with_speed_up(HashMap::from([("right__tomat".to_owned(), 0.47)]));
        let track = store.read_track("right__tomat").unwrap();
        assert!(matches!(&track, Track::SparseTimed(t) if t.speed_up == 0.47));
    }

    #[test]
    fn sparse_durations_and_timestamps() {
        let track = SparseTrack {
            name: "left__x".to_owned(),
            points: vec![
                ControlPoint {
                    pose: pose(0),
                    duration: 1.0,
                },
                ControlPoint {
                    pose: pose(1),
                    duration: 2.0,
                },
                ControlPoint {
                    pose: pose(2),
                    duration: 2.0,
                },
            ],
            speed_up: 0.5,
        };
        assert_eq!(track.timestamps(), vec![1.0, 3.0, 5.0]);
        assert_eq!(track.nominal_duration(), 4.0);
        assert_eq!(track.effective_duration(), 2.0);
    }

    #[test]
    fn list_skips_sidecars_and_sorts() {
        let (_dir, store) = store();
        store
            .write_dense_untimed("left__b", &[TrackPoint::new(pose(1), 0.0)])
            .unwrap();
        store
            .write_sparse_timed("left__a", &[], 0.0)
            .unwrap();
        assert_eq!(store.list().unwrap(), vec!["left__a", "left__b"]);
        store.remove("left__b").unwrap();
        assert!(!store.details_path("left__b").exists());
        assert_eq!(store.list().unwrap(), vec!["left__a"]);
    }

    #[test]
    fn range_covers_every_component() {
        let track = Track::DenseTimed(DenseTrack {
            name: "left__x".to_owned(),
            points: vec![
                TrackPoint::new(Pose([1, -5, 0, 0, 0, 0, 10]), 0.0),
                TrackPoint::new(Pose([-3, 2, 0, 0, 0, 0, 70]), 0.1),
            ],
        });
        let (lo, hi) = track.range().unwrap();
        assert_eq!(lo, Pose([-3, -5, 0, 0, 0, 0, 10]));
        assert_eq!(hi, Pose([1, 2, 0, 0, 0, 0, 70]));
    }
}
