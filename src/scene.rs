//! Scenes choreograph both arms. A scene is two independent element lists,
//! one per arm; each element either plays a track by name or waits.
//!
//! ```text
//! {
//!   "version": "scene_v1",
//!   "left":  [{"type": "track", "name": "left__open"}, {"type": "pause", "duration": 1.5}],
//!   "right": [{"type": "pause", "duration": 3.0}, {"type": "track", "name": "right__grab"}]
//! }
//! ```
//!
//! Track references are weak: a scene naming a missing track saves fine and
//! only fails when played.

use crate::naming::{SceneName, Side};
use crate::track::MAX_TRACK_SECONDS;

use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt, fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

/// Version tag written into every scene.
pub const SCENE_VERSION: &str = "scene_v1";

/// One step of an arm's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SceneElement {
    /// Play the named track.
    Track {
        #[allow(missing_docs)]
        name: String,
    },
    /// Hold still for `duration` seconds.
    Pause {
        #[allow(missing_docs)]
        duration: f64,
    },
}

impl fmt::Display for SceneElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneElement::Track { name } => write!(f, "track {}", name),
            SceneElement::Pause { duration } => write!(f, "pause {}s", duration),
        }
    }
}

/// Both arms' timelines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Format tag, [`SCENE_VERSION`].
    pub version: String,
    #[allow(missing_docs)]
    #[serde(default)]
    pub left: Vec<SceneElement>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub right: Vec<SceneElement>,
}

/// An element placed on the time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    #[allow(missing_docs)]
    pub element: SceneElement,
    /// Seconds from scene start.
    pub start: f64,
    /// Seconds from scene start, when the element's length is known.
    pub end: Option<f64>,
}

impl Scene {
    /// An empty scene.
    pub fn new() -> Self {
        Scene {
            version: SCENE_VERSION.to_owned(),
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// One arm's elements.
    pub fn side(&self, side: Side) -> &[SceneElement] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// One arm's elements, mutably.
    pub fn side_mut(&mut self, side: Side) -> &mut Vec<SceneElement> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Lay one arm's elements out in time. `track_duration` supplies the
    /// length of a track; when it cannot, that element has no end and the
    /// clock does not advance past it.
    pub fn timeline<F>(&self, side: Side, mut track_duration: F) -> Vec<TimelineEntry>
    where
        F: FnMut(&str) -> Option<f64>,
    {
        let mut t = 0.0;
        self.side(side)
            .iter()
            .map(|element| {
                let start = t;
                let end = match element {
                    SceneElement::Pause { duration } => Some(start + duration.max(0.0)),
                    SceneElement::Track { name } => track_duration(name).map(|d| start + d),
                };
                if let Some(end) = end {
                    t = end;
                }
                TimelineEntry {
                    element: element.clone(),
                    start,
                    end,
                }
            })
            .collect()
    }
}

/// A nice little error for scene files.
#[derive(Debug)]
pub enum SceneError {
    /// There is no such scene file.
    NotFound(PathBuf),
    /// Reading or writing failed.
    IoError(PathBuf, io::Error),
    /// Not JSON, or not shaped like a scene.
    Json(PathBuf, serde_json::Error),
    /// The `version` tag is not [`SCENE_VERSION`].
    UnknownVersion(PathBuf, String),
    /// A pause is negative or absurdly long.
    Validation {
        /// File at fault.
        path: PathBuf,
        /// Which element is wrong and how.
        detail: String,
    },
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SceneError as SE;
        let msg = match self {
            SE::NotFound(path) => Cow::from(format!("scene not found: {}", path.display())),
            SE::IoError(path, error) => {
                Cow::from(format!("io error on {}: {}", path.display(), error))
            }
            SE::Json(path, error) => {
                Cow::from(format!("invalid scene {}: {}", path.display(), error))
            }
            SE::UnknownVersion(path, version) => Cow::from(format!(
                "unknown scene version {:?} in {}",
                version,
                path.display()
            )),
            SE::Validation { path, detail } => {
                Cow::from(format!("invalid scene {}: {}", path.display(), detail))
            }
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for SceneError {}

/// A directory of scenes.
#[derive(Debug, Clone)]
pub struct SceneStore {
    dir: PathBuf,
}

impl SceneStore {
    /// A store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SceneStore { dir: dir.into() }
    }

    /// `<dir>/<name>.json`
    pub fn path(&self, name: &SceneName) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Whether the scene exists.
    pub fn exists(&self, name: &SceneName) -> bool {
        self.path(name).is_file()
    }

    /// Load a scene.
    pub fn load(&self, name: &SceneName) -> Result<Scene, SceneError> {
        let path = self.path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(SceneError::NotFound(path)),
            Err(e) => return Err(SceneError::IoError(path, e)),
        };
        let scene: Scene =
            serde_json::from_str(&text).map_err(|e| SceneError::Json(path.clone(), e))?;
        if scene.version != SCENE_VERSION {
            return Err(SceneError::UnknownVersion(path, scene.version));
        }
        check_pauses(&path, &scene)?;
        Ok(scene)
    }

    /// Write a scene, replacing any previous one of the same name.
    pub fn save(&self, name: &SceneName, scene: &Scene) -> Result<(), SceneError> {
        let path = self.path(name);
        check_pauses(&path, scene)?;
        fs::create_dir_all(&self.dir).map_err(|e| SceneError::IoError(self.dir.clone(), e))?;
        let scene = Scene {
            version: SCENE_VERSION.to_owned(),
            ..scene.clone()
        };
        let text =
            serde_json::to_string_pretty(&scene).map_err(|e| SceneError::Json(path.clone(), e))?;
        fs::write(&path, text).map_err(|e| SceneError::IoError(path, e))
    }

    /// Every scene name, sorted.
    pub fn list(&self) -> Result<Vec<String>, SceneError> {
        list_json(&self.dir).map_err(|e| SceneError::IoError(self.dir.clone(), e))
    }
}

fn check_pauses(path: &Path, scene: &Scene) -> Result<(), SceneError> {
    for side in Side::BOTH {
        for (idx, element) in scene.side(side).iter().enumerate() {
            if let SceneElement::Pause { duration } = element {
                if !(0.0..=MAX_TRACK_SECONDS).contains(duration) {
                    return Err(SceneError::Validation {
                        path: path.to_path_buf(),
                        detail: format!(
                            "{}[{}].duration {} is outside [0, {}]",
                            side, idx, duration, MAX_TRACK_SECONDS
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

fn list_json(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) {
            names.push(name.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Scene {
        Scene {
            left: vec![
                SceneElement::Track {
                    name: "left__open".to_owned(),
                },
                SceneElement::Pause { duration: 1.5 },
                SceneElement::Track {
                    name: "left__close".to_owned(),
                },
            ],
            right: vec![SceneElement::Pause { duration: 3.0 }],
            ..Scene::new()
        }
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path());
        let name = SceneName::parse("scene_demo").unwrap();
        store.save(&name, &sample()).unwrap();
        assert!(store.exists(&name));
        assert_eq!(store.load(&name).unwrap(), sample());
        assert_eq!(store.list().unwrap(), vec!["scene__demo"]);
        let raw = fs::read_to_string(store.path(&name)).unwrap();
        assert!(raw.contains(r#""type": "pause""#));
    }

    #[test]
    fn unknown_element_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path());
        let name = SceneName::parse("scene__x").unwrap();
        fs::write(
            store.path(&name),
            r#"{"version": "scene_v1", "left": [{"type": "dance"}], "right": []}"#,
        )
        .unwrap();
        assert!(matches!(store.load(&name), Err(SceneError::Json(..))));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path());
        let name = SceneName::parse("scene__x").unwrap();
        fs::write(store.path(&name), r#"{"version": "scene_v9"}"#).unwrap();
        assert!(matches!(
            store.load(&name),
            Err(SceneError::UnknownVersion(..))
        ));
    }

    #[test]
    fn absurd_pauses_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path());
        let name = SceneName::parse("scene__long").unwrap();
        fs::write(
            store.path(&name),
            r#"{"version": "scene_v1", "left": [], "right": [{"type": "pause", "duration": 1e20}]}"#,
        )
        .unwrap();
        match store.load(&name) {
            Err(SceneError::Validation { detail, .. }) => {
                assert!(detail.contains("right[0].duration"))
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let scene = Scene {
            left: vec![SceneElement::Pause { duration: -1.0 }],
            ..Scene::new()
        };
        let name = SceneName::parse("scene__neg").unwrap();
        assert!(matches!(
            store.save(&name, &scene),
            Err(SceneError::Validation { .. })
        ));
        assert!(!store.exists(&name));
    }

    #[test]
    fn timeline_accumulates() {
        let scene = sample();
        let timeline = scene.timeline(Side::Left, |name| match name {
            "left__open" => Some(2.0),
            _ => None,
        });
        let spans: Vec<(f64, Option<f64>)> = timeline.iter().map(|e| (e.start, e.end)).collect();
        assert_eq!(spans, vec![(0.0, Some(2.0)), (2.0, Some(3.5)), (3.5, None)]);
    }
}
