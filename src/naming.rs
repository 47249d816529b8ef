//! Track and scene names carry routing information: a track belongs to the
//! arm named by its `left__`/`right__` prefix, and scenes live under
//! `scene__`. Operators may type the short forms (`l_wave`, `right_wave`),
//! which are canonicalised here before anything touches the disk.

use std::{borrow::Cow, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Separator between a prefix or parent name and the rest of a name.
pub const SEPARATOR: &str = "__";

/// Prefix every scene name carries.
pub const SCENE_PREFIX: &str = "scene__";

/// One of the two arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[allow(missing_docs)]
    Left,
    #[allow(missing_docs)]
    Right,
}

impl Side {
    /// Both sides, left first.
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// The lowercase name of the side.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// The track-name prefix owned by this side.
    pub fn prefix(&self) -> &'static str {
        match self {
            Side::Left => "left__",
            Side::Right => "right__",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Side {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "left" => Ok(Side::Left),
            "r" | "right" => Ok(Side::Right),
            _ => Err(NameError::UnknownSide(s.to_owned())),
        }
    }
}

/// A side selector that may also mean both arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideSelector {
    /// Exactly one arm.
    One(Side),
    /// Both arms, left first.
    Both,
}

impl SideSelector {
    /// The sides this selector covers.
    pub fn sides(&self) -> Vec<Side> {
        match self {
            SideSelector::One(side) => vec![*side],
            SideSelector::Both => Side::BOTH.to_vec(),
        }
    }
}

impl FromStr for SideSelector {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "all" | "both" => Ok(SideSelector::Both),
            other => other.parse().map(SideSelector::One),
        }
    }
}

/// Everything that can be wrong with a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The track name has neither a `left__` nor a `right__` prefix.
    MissingSidePrefix(String),
    /// The name has nothing after its prefix.
    Empty(String),
    /// The name contains a character that cannot appear in a file name.
    IllegalCharacter(String),
    /// A child name passed to a join contains the separator itself.
    NestedChild(String),
    /// The scene name lacks the `scene__` prefix.
    MissingScenePrefix(String),
    /// Not one of `l`, `left`, `r`, `right` (or `a`, `all`, `both`).
    UnknownSide(String),
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use NameError as NE;
        let msg = match self {
            NE::MissingSidePrefix(name) => Cow::from(format!(
                "track name must start with 'left__' or 'right__': {}",
                name
            )),
            NE::Empty(name) => Cow::from(format!("name is empty after its prefix: {}", name)),
            NE::IllegalCharacter(name) => {
                Cow::from(format!("name contains a path separator or dot: {}", name))
            }
            NE::NestedChild(name) => {
                Cow::from(format!("child name may not contain '__': {}", name))
            }
            NE::MissingScenePrefix(name) => {
                Cow::from(format!("scene name must start with 'scene__': {}", name))
            }
            NE::UnknownSide(side) => Cow::from(format!("unknown arm side: {}", side)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for NameError {}

/// Expand the short operator prefixes: `l_`/`left_` become `left__`,
/// `r_`/`right_` become `right__` and `scene_` becomes `scene__`. Names that
/// already use the long form pass through untouched.
pub fn canonicalize(raw: &str) -> String {
    const SHORT: [(&str, &str); 5] = [
        ("left_", "left__"),
        ("right_", "right__"),
        ("scene_", "scene__"),
        ("l_", "left__"),
        ("r_", "right__"),
    ];
    let raw = raw.trim();
    for (short, long) in SHORT {
        if raw.starts_with(long) {
            return raw.to_owned();
        }
        if let Some(rest) = raw.strip_prefix(short) {
            return format!("{}{}", long, rest);
        }
    }
    raw.to_owned()
}

fn check_characters(name: &str) -> Result<(), NameError> {
    if name.contains('/') || name.contains('\\') || name.contains('.') {
        return Err(NameError::IllegalCharacter(name.to_owned()));
    }
    Ok(())
}

/// A validated, canonical track name with its owning arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackName {
    name: String,
    side: Side,
}

impl TrackName {
    /// Canonicalise `raw` and require a side prefix.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let name = canonicalize(raw);
        check_characters(&name)?;
        let side = Side::BOTH
            .into_iter()
            .find(|side| name.starts_with(side.prefix()))
            .ok_or_else(|| NameError::MissingSidePrefix(name.clone()))?;
        if name.len() == side.prefix().len() {
            return Err(NameError::Empty(name));
        }
        Ok(TrackName { name, side })
    }

    /// Build `parent__child`, as the `record <parent> <child>` form does.
    pub fn join(parent: &str, child: &str) -> Result<Self, NameError> {
        let child = child.trim();
        if child.contains(SEPARATOR) {
            return Err(NameError::NestedChild(child.to_owned()));
        }
        if child.is_empty() {
            return Err(NameError::Empty(parent.to_owned()));
        }
        let parent = canonicalize(parent);
        Self::parse(&format!("{}{}{}", parent, SEPARATOR, child))
    }

    /// The arm that owns the track.
    pub fn side(&self) -> Side {
        self.side
    }

    /// The full canonical name.
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TrackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl FromStr for TrackName {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A validated, canonical scene name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SceneName(String);

impl SceneName {
    /// Canonicalise `raw` and require the `scene__` prefix.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let name = canonicalize(raw);
        check_characters(&name)?;
        if !name.starts_with(SCENE_PREFIX) {
            return Err(NameError::MissingScenePrefix(name));
        }
        if name.len() == SCENE_PREFIX.len() {
            return Err(NameError::Empty(name));
        }
        Ok(SceneName(name))
    }

    /// The full canonical name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SceneName {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Names for safe tracks are free-form but must stay a single path segment.
pub fn validate_safe_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty(name.to_owned()));
    }
    if name.contains(SEPARATOR) {
        return Err(NameError::NestedChild(name.to_owned()));
    }
    check_characters(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_prefixes_expand() {
        assert_eq!(canonicalize("l_wave"), "left__wave");
        assert_eq!(canonicalize("left_wave"), "left__wave");
        assert_eq!(canonicalize("left__wave"), "left__wave");
        assert_eq!(canonicalize("r_grab"), "right__grab");
        assert_eq!(canonicalize("right_grab"), "right__grab");
        assert_eq!(canonicalize("scene_dance"), "scene__dance");
        assert_eq!(canonicalize("wave"), "wave");
    }

    #[test]
    fn track_name_routes_by_prefix() {
        let name = TrackName::parse("right__grab").unwrap();
        assert_eq!(name.side(), Side::Right);
        assert_eq!(name.as_str(), "right__grab");
        assert_eq!(TrackName::parse("l_x").unwrap().side(), Side::Left);
    }

    #[test]
    fn unprefixed_track_names_are_rejected() {
        assert_eq!(
            TrackName::parse("grab"),
            Err(NameError::MissingSidePrefix("grab".to_owned()))
        );
        assert!(matches!(
            TrackName::parse("left__"),
            Err(NameError::Empty(_))
        ));
        assert!(matches!(
            TrackName::parse("left__../x"),
            Err(NameError::IllegalCharacter(_))
        ));
    }

    #[test]
    fn join_builds_parent_child() {
        let name = TrackName::join("l_open_door", "step1").unwrap();
        assert_eq!(name.as_str(), "left__open_door__step1");
        assert!(matches!(
            TrackName::join("left__a", "b__c"),
            Err(NameError::NestedChild(_))
        ));
    }

    #[test]
    fn sides_and_selectors_parse() {
        assert_eq!("L".parse::<Side>().unwrap(), Side::Left);
        assert_eq!("right".parse::<Side>().unwrap(), Side::Right);
        assert!("up".parse::<Side>().is_err());
        assert_eq!("a".parse::<SideSelector>().unwrap(), SideSelector::Both);
        assert_eq!(
            "r".parse::<SideSelector>().unwrap(),
            SideSelector::One(Side::Right)
        );
    }

    #[test]
    fn scene_names_need_prefix() {
        assert_eq!(SceneName::parse("scene_x").unwrap().as_str(), "scene__x");
        assert!(SceneName::parse("x").is_err());
    }
}
