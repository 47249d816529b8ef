//! Joint-space proximity checks, and the pre-flight check against the safe
//! tracks recorded under `<safe_dir>/zero_track_<name>.json`.

use crate::config::SafetyConfig;
use crate::pose::{Pose, GRIPPER, POSE_LEN};
use crate::track::{TrackError, TrackPoint, TrackStore};

use log::{info, warn};
use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// File-name prefix of safe tracks.
pub const SAFE_TRACK_PREFIX: &str = "zero_track_";

/// File name of the saved zero pose inside the safe directory.
pub const ZERO_POSE_FILE: &str = "zero_position.json";

/// Largest per-component difference between two poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deviation {
    /// Absolute difference, in raw units.
    pub delta: i64,
    /// Which component produced it; `None` when every component is ignored.
    pub worst: Option<usize>,
}

/// Maximum absolute difference over the components not in `ignored`.
/// Ties go to the lowest index.
pub fn max_deviation(a: &Pose, b: &Pose, ignored: &[usize]) -> Deviation {
    let mut best = Deviation {
        delta: 0,
        worst: None,
    };
    for i in (0..POSE_LEN).filter(|i| !ignored.contains(i)) {
        let delta = (a.0[i] as i64 - b.0[i] as i64).abs();
        if best.worst.is_none() || delta > best.delta {
            best = Deviation {
                delta,
                worst: Some(i),
            };
        }
    }
    best
}

/// `max_deviation(a, b, ignored).delta <= tolerance`
pub fn is_close(a: &Pose, b: &Pose, tolerance: i32, ignored: &[usize]) -> bool {
    max_deviation(a, b, ignored).delta <= tolerance as i64
}

/// Every joint within `tolerance` and the gripper within
/// `gripper_tolerance`; nothing is ignored.
pub fn is_close_strict(a: &Pose, b: &Pose, tolerance: i32, gripper_tolerance: i32) -> bool {
    (0..POSE_LEN).all(|i| {
        let limit = if i == GRIPPER {
            gripper_tolerance
        } else {
            tolerance
        };
        (a.0[i] as i64 - b.0[i] as i64).abs() <= limit as i64
    })
}

/// The safety thresholds in force.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyPolicy {
    #[allow(missing_docs)]
    pub tolerance: i32,
    #[allow(missing_docs)]
    pub ignored: Vec<usize>,
    #[allow(missing_docs)]
    pub strict_tolerance: i32,
    #[allow(missing_docs)]
    pub strict_gripper_tolerance: i32,
    #[allow(missing_docs)]
    pub require_safe_tracks: bool,
    #[allow(missing_docs)]
    pub enforce_safe_distance: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::from(&SafetyConfig::default())
    }
}

impl From<&SafetyConfig> for SafetyPolicy {
    fn from(config: &SafetyConfig) -> Self {
        SafetyPolicy {
            tolerance: config.tolerance,
            ignored: config.ignored_joints.clone(),
            strict_tolerance: config.strict_tolerance,
            strict_gripper_tolerance: config
                .strict_gripper_tolerance
                .unwrap_or(config.strict_tolerance),
            require_safe_tracks: config.require_safe_tracks,
            enforce_safe_distance: config.enforce_safe_distance,
        }
    }
}

impl SafetyPolicy {
    /// Deviation with the ignored components left out.
    pub fn deviation(&self, a: &Pose, b: &Pose) -> Deviation {
        max_deviation(a, b, &self.ignored)
    }

    /// Closeness with the ignored components left out.
    pub fn is_close(&self, a: &Pose, b: &Pose) -> bool {
        is_close(a, b, self.tolerance, &self.ignored)
    }

    /// Closeness over every component.
    pub fn is_close_strict(&self, a: &Pose, b: &Pose) -> bool {
        is_close_strict(a, b, self.strict_tolerance, self.strict_gripper_tolerance)
    }
}

/// The safe-track point nearest to some pose.
#[derive(Debug, Clone, PartialEq)]
pub struct SafeMatch {
    /// Safe track the point belongs to.
    pub track: String,
    /// Index of the point in that track.
    pub index: usize,
    #[allow(missing_docs)]
    pub pose: Pose,
    #[allow(missing_docs)]
    pub deviation: Deviation,
}

/// Outcome of a successful pre-flight check.
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightReport {
    /// Nearest safe point, absent when there are no safe tracks and they
    /// are not required.
    pub nearest: Option<SafeMatch>,
}

/// A nice little error for safety checks.
#[derive(Debug)]
pub enum SafetyError {
    /// No safe track exists and one is required.
    NoSafeTracks(PathBuf),
    /// The arm is farther from every safe point than the tolerance allows.
    TooFarFromSafe {
        #[allow(missing_docs)]
        nearest: SafeMatch,
        #[allow(missing_docs)]
        tolerance: i32,
    },
    /// There is no saved zero pose.
    NoZeroPose(PathBuf),
    /// A safe track could not be loaded.
    Track(TrackError),
    /// The zero pose could not be read or written.
    IoError(PathBuf, io::Error),
    /// The zero pose file is not a pose.
    Json(PathBuf, serde_json::Error),
}

impl fmt::Display for SafetyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SafetyError as SE;
        let msg = match self {
            SE::NoSafeTracks(dir) => Cow::from(format!(
                "no safe tracks in {}; record one with r-0-track",
                dir.display()
            )),
            SE::TooFarFromSafe { nearest, tolerance } => Cow::from(format!(
                "nearest safe point {}[{}] deviates {} on joint {:?}, tolerance {}",
                nearest.track,
                nearest.index,
                nearest.deviation.delta,
                nearest.deviation.worst,
                tolerance
            )),
            SE::NoZeroPose(path) => Cow::from(format!("no zero pose at {}", path.display())),
            SE::Track(error) => Cow::from(format!("safe track: {}", error)),
            SE::IoError(path, error) => {
                Cow::from(format!("io error on {}: {}", path.display(), error))
            }
            SE::Json(path, error) => {
                Cow::from(format!("invalid zero pose {}: {}", path.display(), error))
            }
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for SafetyError {}

impl From<TrackError> for SafetyError {
    fn from(value: TrackError) -> Self {
        Self::Track(value)
    }
}

/// Track name under which the safe track `name` is stored.
pub fn safe_track_name(name: &str) -> String {
    format!("{}{}", SAFE_TRACK_PREFIX, name)
}

/// Names of every safe track in `store`, sorted.
pub fn safe_tracks(store: &TrackStore) -> Result<Vec<String>, TrackError> {
    Ok(store
        .list()?
        .into_iter()
        .filter(|name| name.starts_with(SAFE_TRACK_PREFIX))
        .collect())
}

/// Scan every safe track for the point nearest to `current`. `None` when no
/// readable safe track has any point. A safe track that fails to load is
/// logged and skipped.
pub fn nearest_safe_point(
    store: &TrackStore,
    current: &Pose,
    policy: &SafetyPolicy,
) -> Result<Option<SafeMatch>, TrackError> {
    let mut nearest: Option<SafeMatch> = None;
    for name in safe_tracks(store)? {
        let track = match store.read_track(&name) {
            Ok(track) => track,
            Err(e) => {
                warn!("[SAFE] skipping {}: {}", name, e);
                continue;
            }
        };
        for (index, TrackPoint { pose, .. }) in track.track_points().into_iter().enumerate() {
            let deviation = policy.deviation(current, &pose);
            let better = nearest
                .as_ref()
                .map_or(true, |best| deviation.delta < best.deviation.delta);
            if better {
                nearest = Some(SafeMatch {
                    track: name.clone(),
                    index,
                    pose,
                    deviation,
                });
            }
        }
    }
    Ok(nearest)
}

/// Check the arm's configuration against the safe tracks before automated
/// motion. Reports the nearest safe point; refuses only when safe tracks
/// are required but missing, or when distance enforcement is switched on
/// and the nearest point is out of tolerance.
pub fn preflight(
    store: &TrackStore,
    current: &Pose,
    policy: &SafetyPolicy,
) -> Result<PreflightReport, SafetyError> {
    let nearest = nearest_safe_point(store, current, policy)?;
    let Some(nearest) = nearest else {
        if policy.require_safe_tracks {
            return Err(SafetyError::NoSafeTracks(store.dir().to_path_buf()));
        }
        info!("[SAFE] no safe tracks in {}", store.dir().display());
        return Ok(PreflightReport { nearest: None });
    };
    let within = nearest.deviation.delta <= policy.tolerance as i64;
    info!(
        "[SAFE] nearest safe point {}[{}] deviation {} (joint {:?}), {}",
        nearest.track,
        nearest.index,
        nearest.deviation.delta,
        nearest.deviation.worst,
        if within { "within tolerance" } else { "beyond tolerance" }
    );
    if !within && policy.enforce_safe_distance {
        return Err(SafetyError::TooFarFromSafe {
            nearest,
            tolerance: policy.tolerance,
        });
    }
    Ok(PreflightReport {
        nearest: Some(nearest),
    })
}

/// `<safe_dir>/zero_position.json`
pub fn zero_pose_path(safe_dir: &Path) -> PathBuf {
    safe_dir.join(ZERO_POSE_FILE)
}

/// Save `pose` as the zero pose.
pub fn save_zero_pose(safe_dir: &Path, pose: &Pose) -> Result<PathBuf, SafetyError> {
    fs::create_dir_all(safe_dir).map_err(|e| SafetyError::IoError(safe_dir.to_path_buf(), e))?;
    let path = zero_pose_path(safe_dir);
    let text = serde_json::to_string(pose).map_err(|e| SafetyError::Json(path.clone(), e))?;
    fs::write(&path, text).map_err(|e| SafetyError::IoError(path.clone(), e))?;
    Ok(path)
}

/// Load the saved zero pose.
pub fn load_zero_pose(safe_dir: &Path) -> Result<Pose, SafetyError> {
    let path = zero_pose_path(safe_dir);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SafetyError::NoZeroPose(path))
        }
        Err(e) => return Err(SafetyError::IoError(path, e)),
    };
    serde_json::from_str(&text).map_err(|e| SafetyError::Json(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IGNORED: [usize; 3] = [3, 5, 6];

    #[test]
    fn identical_poses_have_zero_deviation() {
        let p = Pose([5, -3, 7, 1, 2, 3, 4]);
        assert_eq!(
            max_deviation(&p, &p, &[]),
            Deviation {
                delta: 0,
                worst: Some(0)
            }
        );
        assert_eq!(max_deviation(&p, &p, &[0, 1, 2, 3, 4, 5, 6]).worst, None);
    }

    #[test]
    fn ignored_joints_do_not_count() {
        let a = Pose([0, 0, 0, 90000, 0, 90000, 90000]);
        let b = Pose::ZERO;
        assert_eq!(max_deviation(&a, &b, &IGNORED).delta, 0);
        assert_eq!(max_deviation(&a, &b, &[]).worst, Some(3));
    }

    #[test]
    fn ties_go_to_the_first_joint() {
        let a = Pose([0, 100, 0, 0, 100, 0, 0]);
        assert_eq!(
            max_deviation(&a, &Pose::ZERO, &IGNORED),
            Deviation {
                delta: 100,
                worst: Some(1)
            }
        );
    }

    #[test]
    fn closeness_matches_deviation() {
        let current = Pose([1000, 0, 0, 0, 0, 0, 0]);
        assert!(is_close(&current, &Pose::ZERO, 5000, &IGNORED));
        assert!(!is_close(
            &Pose([5001, 0, 0, 0, 0, 0, 0]),
            &Pose::ZERO,
            5000,
            &IGNORED
        ));
        for (a, b) in [
            (Pose([1, 2, 3, 4, 5, 6, 7]), Pose([7000, 2, 3, 4, 5, 6, 7])),
            (Pose([0, 4999, 0, 0, 0, 0, 0]), Pose::ZERO),
        ] {
            assert_eq!(
                is_close(&a, &b, 5000, &IGNORED),
                max_deviation(&a, &b, &IGNORED).delta <= 5000
            );
        }
    }

    #[test]
    fn strict_check_includes_gripper() {
        let a = Pose([0, 0, 0, 0, 0, 0, 3000]);
        assert!(is_close_strict(&a, &Pose::ZERO, 5000, 5000));
        assert!(!is_close_strict(&a, &Pose::ZERO, 5000, 1000));
        assert!(!is_close_strict(
            &Pose([0, 0, 0, 6000, 0, 0, 0]),
            &Pose::ZERO,
            5000,
            5000
        ));
    }

    fn safe_store() -> (tempfile::TempDir, TrackStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn preflight_finds_nearest_point() {
        let (_dir, store) = safe_store();
        store
            .write_dense_untimed(
                &safe_track_name("home"),
                &[
                    TrackPoint::new(Pose([20000, 0, 0, 0, 0, 0, 0]), 0.0),
                    TrackPoint::new(Pose::ZERO, 0.02),
                ],
            )
            .unwrap();
        store
            .write_dense_untimed("left__not_safe", &[TrackPoint::new(Pose::ZERO, 0.0)])
            .unwrap();
        let report = preflight(
            &store,
            &Pose([1000, 0, 0, 0, 0, 0, 0]),
            &SafetyPolicy::default(),
        )
        .unwrap();
        let nearest = report.nearest.unwrap();
        assert_eq!(nearest.track, "zero_track_home");
        assert_eq!(nearest.index, 1);
        assert_eq!(nearest.deviation.delta, 1000);
    }

    #[test]
    fn unreadable_safe_track_is_skipped() {
        let (_dir, store) = safe_store();
        std::fs::write(store.path(&safe_track_name("broken")), "{not json").unwrap();
        assert!(matches!(
            preflight(&store, &Pose::ZERO, &SafetyPolicy::default()),
            Err(SafetyError::NoSafeTracks(_))
        ));
        store
            .write_dense_untimed(&safe_track_name("home"), &[TrackPoint::new(Pose::ZERO, 0.0)])
            .unwrap();
        let report = preflight(&store, &Pose::ZERO, &SafetyPolicy::default()).unwrap();
        assert_eq!(report.nearest.unwrap().track, "zero_track_home");
    }

    #[test]
    fn preflight_requires_safe_tracks() {
        let (_dir, store) = safe_store();
        assert!(matches!(
            preflight(&store, &Pose::ZERO, &SafetyPolicy::default()),
            Err(SafetyError::NoSafeTracks(_))
        ));
        let lenient = SafetyPolicy {
            require_safe_tracks: false,
            ..SafetyPolicy::default()
        };
        assert_eq!(
            preflight(&store, &Pose::ZERO, &lenient).unwrap().nearest,
            None
        );
    }

    #[test]
    fn preflight_only_refuses_distance_when_enforced() {
        let (_dir, store) = safe_store();
        store
            .write_dense_untimed(&safe_track_name("a"), &[TrackPoint::new(Pose::ZERO, 0.0)])
            .unwrap();
        let far = Pose([90000, 0, 0, 0, 0, 0, 0]);
        assert!(preflight(&store, &far, &SafetyPolicy::default()).is_ok());
        let strict = SafetyPolicy {
            enforce_safe_distance: true,
            ..SafetyPolicy::default()
        };
        assert!(matches!(
            preflight(&store, &far, &strict),
            Err(SafetyError::TooFarFromSafe { .. })
        ));
    }

    #[test]
    fn zero_pose_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_zero_pose(dir.path()),
            Err(SafetyError::NoZeroPose(_))
        ));
        let pose = Pose([1, 2, 3, 4, 5, 6, 7]);
        save_zero_pose(dir.path(), &pose).unwrap();
        assert_eq!(load_zero_pose(dir.path()).unwrap(), pose);
    }
}
