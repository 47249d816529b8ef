//! Runtime configuration, read from a [ron] file.
//!
//! Every field has a default, so an empty file (or no file at all) gives
//! the stock setup. A file only needs to name what it changes:
//!
//! ```text
//! (
//!     tracks_dir: "tracks",
//!     safety: (tolerance: 3000),
//!     speed_up: {"right__tomat": 0.47},
//! )
//! ```

use crate::naming::Side;

use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

/// Name of the configuration file picked up from the working directory when
/// none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "piper.ron";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `<name>.json` tracks and their sidecars.
    pub tracks_dir: PathBuf,
    /// Directory of safe tracks and the zero pose; `tracks_dir/_safe` if unset.
    pub safe_dir: Option<PathBuf>,
    /// Directory holding scenes.
    pub scenes_dir: PathBuf,
    /// The pause sentinel file.
    pub pause_file: PathBuf,
    #[allow(missing_docs)]
    pub safety: SafetyConfig,
    #[allow(missing_docs)]
    pub control: ControlConfig,
    #[allow(missing_docs)]
    pub gripper: GripperConfig,
    #[allow(missing_docs)]
    pub recording: RecordingConfig,
    /// Per-track playback speed-up fraction, keyed by canonical track name.
    pub speed_up: HashMap<String, f64>,
    #[allow(missing_docs)]
    pub arms: ArmsConfig,
}

/// Proximity thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Closeness tolerance over the considered joints.
    pub tolerance: i32,
    /// Pose components left out of proximity checks.
    pub ignored_joints: Vec<usize>,
    /// Tolerance for the all-components convergence check after a glide.
    pub strict_tolerance: i32,
    /// Gripper tolerance for the strict check; `strict_tolerance` if unset.
    pub strict_gripper_tolerance: Option<i32>,
    /// Refuse to play when no safe track exists.
    pub require_safe_tracks: bool,
    /// Refuse to play when the nearest safe point is beyond `tolerance`.
    pub enforce_safe_distance: bool,
}

/// Control-loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control rate for sparse playback and glides.
    pub hz: f64,
    /// Steps of the glide to the start of a dense track, and of direct moves.
    pub glide_steps: usize,
    /// Steps of the glide to the start of a sparse track.
    pub timed_glide_steps: usize,
    /// Speed limit sent with every joint-mode command.
    pub speed_pct: u8,
    /// Seconds between consecutive tracks of a sequence.
    pub delay_between_tracks: f64,
    /// Seconds to settle after the glide to the first point.
    pub settle_after_glide: f64,
    /// Seconds between polls of the pause sentinel while paused.
    pub pause_poll: f64,
    /// Seconds to wait around the reconnect of a hard reset.
    pub reset_settle: f64,
    /// Seconds the hard reset waits for every motor to report enabled.
    pub enable_timeout: f64,
}

/// Gripper behaviour during playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperConfig {
    /// Grip effort sent with every gripper target.
    pub effort: u16,
    /// Fraction by which recorded gripper targets are closed further.
    /// Changing this changes how hard objects are held.
    pub tighten: f64,
}

/// Recording behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Sampling rate of continuous recordings.
    pub sample_hz: f64,
    /// Segment duration used when a control point is confirmed without one.
    pub default_point_duration: f64,
    /// How long all-zero samples may last before a continuous recording
    /// starts complaining.
    pub zero_grace: f64,
    /// Same, for safe-track recordings.
    pub safe_zero_grace: f64,
}

/// Which arms exist and how to reach them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmsConfig {
    #[allow(missing_docs)]
    pub left: Option<ArmConfig>,
    #[allow(missing_docs)]
    pub right: Option<ArmConfig>,
}

/// One arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    /// CAN interface the arm hangs off.
    pub interface: String,
    /// Driver backing the arm.
    pub backend: ArmBackend,
}

/// Available arm drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmBackend {
    /// The in-process [`SimArm`](crate::sim_arm::SimArm).
    Simulated,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tracks_dir: PathBuf::from("tracks"),
            safe_dir: None,
            scenes_dir: PathBuf::from("scenes"),
            pause_file: PathBuf::from("pause.txt"),
            safety: SafetyConfig::default(),
            control: ControlConfig::default(),
            gripper: GripperConfig::default(),
            recording: RecordingConfig::default(),
            speed_up: default_speed_up(),
            arms: ArmsConfig::default(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            tolerance: 5000,
            ignored_joints: vec![3, 5, 6],
            strict_tolerance: 5000,
            strict_gripper_tolerance: None,
            require_safe_tracks: true,
            enforce_safe_distance: false,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            hz: 50.0,
            glide_steps: 100,
            timed_glide_steps: 25,
            speed_pct: 50,
            delay_between_tracks: 3.0,
            settle_after_glide: 0.2,
            pause_poll: 0.2,
            reset_settle: 1.0,
            enable_timeout: 5.0,
        }
    }
}

impl Default for GripperConfig {
    fn default() -> Self {
        GripperConfig {
            effort: 5000,
            tighten: 0.075,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        RecordingConfig {
            sample_hz: 50.0,
            default_point_duration: 2.0,
            zero_grace: 1.0,
            safe_zero_grace: 0.1,
        }
    }
}

impl Default for ArmsConfig {
    fn default() -> Self {
        ArmsConfig {
            left: Some(ArmConfig {
                interface: "can_left".to_owned(),
                backend: ArmBackend::Simulated,
            }),
            right: Some(ArmConfig {
                interface: "can_right".to_owned(),
                backend: ArmBackend::Simulated,
            }),
        }
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        ArmConfig {
            interface: "can0".to_owned(),
            backend: ArmBackend::Simulated,
        }
    }
}

/// The speed-up fractions the kitchen demo tracks were tuned with.
fn default_speed_up() -> HashMap<String, f64> {
    [
        ("left__lopatka1", 0.15),
        ("right__open_door", 0.3),
        ("right__meat", 0.2),
        ("right__tomat", 0.47),
        ("right__salt", 0.2),
        ("right__lapsha", 0.3),
        ("right__cheese", 0.15),
        ("right__close_door", 0.1),
        ("left__close_door", 0.25),
        ("left__colba1", 0.3),
        ("left__lopatka2_1", 0.6),
        ("left__lopatka2_2", 0.6),
        ("left__lopatka2_3", 0.6),
    ]
    .into_iter()
    .map(|(name, fraction)| (name.to_owned(), fraction))
    .collect()
}

/// A nice little error for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    IoError(std::io::Error),
    /// The file is not valid RON for [`Config`].
    RonSpannedError(ron::de::SpannedError),
    /// A value is out of range.
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron error: {}", error)),
            CE::Invalid { field, reason } => {
                Cow::from(format!("invalid config field {}: {}", field, reason))
            }
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::de::SpannedError> for ConfigError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

impl Config {
    /// Read and validate a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut handle = File::open(path)?;
        Self::from_file(&mut handle)
    }

    /// Read and validate a configuration from any reader.
    pub fn from_file(file: &mut impl Read) -> Result<Self, ConfigError> {
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let config: Config = ron::de::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// `path` if given, else [`DEFAULT_CONFIG_FILE`] if it exists, else the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_path(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_path(DEFAULT_CONFIG_FILE)
            }
            None => Ok(Self::default()),
        }
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(j) = self.safety.ignored_joints.iter().find(|j| **j > 6) {
            return Err(invalid(
                "safety.ignored_joints",
                format!("index {} is past the gripper", j),
            ));
        }
        if self.safety.tolerance < 0 || self.safety.strict_tolerance < 0 {
            return Err(invalid("safety.tolerance", "must not be negative"));
        }
        if !(self.control.hz > 0.0) {
            return Err(invalid("control.hz", "must be positive"));
        }
        if !(self.recording.sample_hz > 0.0) {
            return Err(invalid("recording.sample_hz", "must be positive"));
        }
        if self.control.glide_steps == 0 || self.control.timed_glide_steps == 0 {
            return Err(invalid("control.glide_steps", "must be at least one"));
        }
        if !(0.0..1.0).contains(&self.gripper.tighten) {
            return Err(invalid("gripper.tighten", "must be in [0, 1)"));
        }
        if self.recording.default_point_duration < 0.0 {
            return Err(invalid(
                "recording.default_point_duration",
                "must not be negative",
            ));
        }
        if let Some((name, fraction)) = self
            .speed_up
            .iter()
            .find(|(_, f)| !(0.0..=1.0).contains(*f))
        {
            return Err(invalid(
                &format!("speed_up.{}", name),
                format!("{} is outside [0, 1]", fraction),
            ));
        }
        Ok(())
    }

    /// The safe-track directory.
    pub fn safe_dir(&self) -> PathBuf {
        self.safe_dir
            .clone()
            .unwrap_or_else(|| self.tracks_dir.join("_safe"))
    }

    /// The configured speed-up of a track, if any.
    pub fn speed_up_for(&self, track: &str) -> Option<f64> {
        self.speed_up.get(track).copied()
    }

    /// Configuration of one arm, if that arm is in use.
    pub fn arm(&self, side: Side) -> Option<&ArmConfig> {
        match side {
            Side::Left => self.arms.left.as_ref(),
            Side::Right => self.arms.right.as_ref(),
        }
    }
}

impl ControlConfig {
    /// One control period.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.hz)
    }

    /// Pause between tracks of a sequence.
    pub fn delay_between_tracks(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_tracks.max(0.0))
    }

    /// Settle time after a glide.
    pub fn settle_after_glide(&self) -> Duration {
        Duration::from_secs_f64(self.settle_after_glide.max(0.0))
    }

    /// Pause-sentinel polling interval.
    pub fn pause_poll(&self) -> Duration {
        Duration::from_secs_f64(self.pause_poll.max(0.001))
    }

    /// Settle time around a reconnect.
    pub fn reset_settle(&self) -> Duration {
        Duration::from_secs_f64(self.reset_settle.max(0.0))
    }

    /// Time limit on waiting for motors to enable.
    pub fn enable_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.enable_timeout.max(0.0))
    }
}
