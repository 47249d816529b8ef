//! Operator command lines.
//!
//! The first word picks the command (dashes and underscores are
//! interchangeable, so `r-0-track` and `r_0_track` are the same), the rest
//! are its arguments. Names are kept as typed; they are canonicalised and
//! validated when the command runs.

use crate::naming::{Side, SideSelector};
use crate::pose::{Pose, GRIPPER, POSE_LEN};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, i32, space0, space1, u32},
    combinator::{all_consuming, eof, map, map_res, opt, peek, value},
    error::{Error, ErrorKind},
    multi::{many1, separated_list1},
    number::complete::double,
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish, IResult,
};
use std::str::FromStr;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `record <name>` or `record <parent> <child>`; `record_v2` when timed.
    Record {
        #[allow(missing_docs)]
        name: String,
        #[allow(missing_docs)]
        child: Option<String>,
        /// Collect control points instead of sampling continuously.
        timed: bool,
    },
    /// `r-0-track [name]`
    RecordSafe(Option<String>),
    /// `r-0-pos`
    SaveZeroPose,
    /// `check-0-pos`
    CheckZeroPose,
    /// `check-0-track`
    CheckSafeTracks,
    /// `s`: finish the running recordings.
    StopRecord,
    /// `stop`: cancel running playbacks and scenes.
    Stop,
    /// `play <track>...`
    Play(Vec<String>),
    /// `pp <left track> <right track>`
    PlayParallel(String, String),
    /// `list [side]`
    List(SideSelector),
    /// `list_timed`
    ListTimed,
    /// `get_track_range <track>`
    TrackRange(String),
    /// `scene_add <scene>`
    SceneAdd(String),
    /// `scene_show <scene>`
    SceneShow(String),
    /// `scene_play <scene>...`
    ScenePlay(Vec<String>),
    /// `get [side [joint]]`
    Get(Option<Side>, Option<usize>),
    /// `set <side> <joint> <value>`
    Set(Side, usize, i32),
    /// `set <side> <7 values>` or `set_all <side> <7 values>`
    SetAll(Side, Pose),
    /// `incr <side> [joint] <delta>`; `decr` negates the delta.
    Nudge(Side, usize, i32),
    /// `reset [all|left|right]`
    Reset(SideSelector),
    /// `help`
    Help,
    /// `exit`
    Quit,
}

/// Usage text for `help`.
pub const HELP: &str = "\
record|r <name> [child]         record continuously (teach mode); 's' stops
record_v2|r2 <name> [child]     record control points; Enter adds a point
r-0-track [name]                record a safe track
r-0-pos | check-0-pos           save / check the zero pose
check-0-track                   distance to the nearest safe-track point
play|p <track>...               play tracks, each arm its own in order
pp <left> <right>               play two tracks at once
stop                            cancel running playbacks and scenes
list [l|r|a] | list_timed|lt    list tracks
get_track_range <track>         per-component min/max of a track
scene_add|scene_show <scene>    author or inspect a scene
scene_play <scene>...           play scenes back to back
get|g [side [joint]]            read the pose
set|s <side> <joint> <value>    glide one component
set|set_all <side> <7 values>   glide the whole pose
incr|i / decr|d <side> [joint] <delta>
reset [all|left|right]          hard reset
_ / __ / ...                    repeat the n-th previous command
exit";

fn word(s: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(s)
}

fn arg(s: &str) -> IResult<&str, &str> {
    preceded(space1, word)(s)
}

fn owned_arg(s: &str) -> IResult<&str, String> {
    map(arg, str::to_owned)(s)
}

fn names(s: &str) -> IResult<&str, Vec<String>> {
    many1(owned_arg)(s)
}

fn side(s: &str) -> IResult<&str, Side> {
    map_res(arg, Side::from_str)(s)
}

fn selector(s: &str) -> IResult<&str, SideSelector> {
    map(opt(map_res(arg, SideSelector::from_str)), |sel| {
        sel.unwrap_or(SideSelector::Both)
    })(s)
}

fn end(s: &str) -> IResult<&str, &str> {
    preceded(space0, eof)(s)
}

fn number<'a, O, F>(parser: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(space1, terminated(parser, peek(alt((space1, eof)))))
}

fn joint(s: &str) -> IResult<&str, usize> {
    map(number(u32), |j| j as usize)(s)
}

fn comma(s: &str) -> IResult<&str, ()> {
    value((), delimited(space0, char(','), space0))(s)
}

fn pose_values(s: &str) -> IResult<&str, Vec<i32>> {
    alt((
        delimited(
            pair(char('['), space0),
            separated_list1(comma, i32),
            pair(space0, char(']')),
        ),
        separated_list1(alt((comma, value((), space1))), i32),
    ))(s)
}

fn pose(s: &str) -> IResult<&str, Pose> {
    map_res(preceded(space1, pose_values), |values| {
        <[i32; POSE_LEN]>::try_from(values).map(Pose)
    })(s)
}

fn record(s: &str, timed: bool) -> IResult<&str, Command> {
    map(pair(owned_arg, opt(owned_arg)), |(name, child)| Command::Record {
        name,
        child,
        timed,
    })(s)
}

fn set(s: &str) -> IResult<&str, Command> {
    alt((
        map(terminated(tuple((side, joint, number(i32))), end), |(side, joint, value)| {
            Command::Set(side, joint, value)
        }),
        map(pair(side, pose), |(side, pose)| Command::SetAll(side, pose)),
    ))(s)
}

fn nudge(s: &str, sign: i32) -> IResult<&str, Command> {
    alt((
        map(terminated(tuple((side, joint, number(i32))), end), |(side, joint, delta)| {
            Command::Nudge(side, joint, sign * delta)
        }),
        map(pair(side, number(i32)), |(side, delta)| {
            Command::Nudge(side, GRIPPER, sign * delta)
        }),
    ))(s)
}

fn get(s: &str) -> IResult<&str, Command> {
    map(opt(pair(side, opt(joint))), |args| match args {
        Some((side, joint)) => Command::Get(Some(side), joint),
        None => Command::Get(None, None),
    })(s)
}

fn unknown(s: &str) -> IResult<&str, Command> {
    Err(nom::Err::Error(Error::new(s, ErrorKind::Tag)))
}

fn parse_command(s: &str) -> IResult<&str, Command> {
    let (rest, keyword) = preceded(space0, word)(s)?;
    let keyword = keyword.replace('-', "_").to_ascii_lowercase();
    let (rest, command) = match keyword.as_str() {
        "record" | "r" => record(rest, false),
        "record_v2" | "r2" => record(rest, true),
        "r_0_track" => map(opt(owned_arg), Command::RecordSafe)(rest),
        "r_0_pos" => Ok((rest, Command::SaveZeroPose)),
        "check_0_pos" => Ok((rest, Command::CheckZeroPose)),
        "check_0_track" => Ok((rest, Command::CheckSafeTracks)),
        "s" => alt((set, value(Command::StopRecord, end)))(rest),
        "stop" => Ok((rest, Command::Stop)),
        "play" | "p" | "play_v2" | "p2" => map(names, Command::Play)(rest),
        "play_parallel" | "pp" => map(pair(owned_arg, owned_arg), |(l, r)| {
            Command::PlayParallel(l, r)
        })(rest),
        "list" | "ls" => map(selector, Command::List)(rest),
        "list_timed" | "lt" => Ok((rest, Command::ListTimed)),
        "get_track_range" => map(owned_arg, Command::TrackRange)(rest),
        "scene_add" => map(owned_arg, Command::SceneAdd)(rest),
        "scene_show" => map(owned_arg, Command::SceneShow)(rest),
        "scene_play" => map(names, Command::ScenePlay)(rest),
        "get" | "g" => get(rest),
        "set" => set(rest),
        "set_all" => map(pair(side, pose), |(side, pose)| Command::SetAll(side, pose))(rest),
        "incr" | "i" => nudge(rest, 1),
        "decr" | "d" => nudge(rest, -1),
        "reset" => map(selector, Command::Reset)(rest),
        "help" | "?" => Ok((rest, Command::Help)),
        "exit" | "quit" | "q" => Ok((rest, Command::Quit)),
        _ => unknown(s),
    }?;
    let (rest, _) = end(rest)?;
    Ok((rest, command))
}

impl FromStr for Command {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_command(s).finish() {
            Ok((_remaining, command)) => Ok(command),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

/// Input while a control-point recording is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HybridInput {
    /// Empty line or a bare number: confirm a point, with the default
    /// duration or the given one.
    Confirm(Option<f64>),
    /// `default <sec>`
    Default(f64),
    /// `s` or `stop`
    Stop,
}

fn parse_hybrid(s: &str) -> IResult<&str, HybridInput> {
    all_consuming(delimited(
        space0,
        alt((
            value(HybridInput::Stop, alt((tag("stop"), tag("s")))),
            map(preceded(pair(tag("default"), space1), double), HybridInput::Default),
            map(double, |d| HybridInput::Confirm(Some(d))),
            value(HybridInput::Confirm(None), eof),
        )),
        space0,
    ))(s)
}

impl HybridInput {
    /// Interpret `line`, or `None` if it is an ordinary command.
    pub fn parse(line: &str) -> Option<Self> {
        parse_hybrid(line).finish().ok().map(|(_, input)| input)
    }
}

/// One line of interactive scene authoring.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneLine {
    /// `track <name>`
    Track(String),
    /// `pause <sec>`
    Pause(f64),
    /// `done`
    Done,
}

fn parse_scene_line(s: &str) -> IResult<&str, SceneLine> {
    all_consuming(delimited(
        space0,
        alt((
            map(preceded(tag("track"), owned_arg), SceneLine::Track),
            map(preceded(pair(tag("pause"), space1), double), SceneLine::Pause),
            value(SceneLine::Done, tag("done")),
        )),
        space0,
    ))(s)
}

impl FromStr for SceneLine {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_scene_line(s).finish() {
            Ok((_remaining, line)) => Ok(line),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

/// For a line made only of underscores, how far back in history it points.
pub fn repeat_depth(line: &str) -> Option<usize> {
    let line = line.trim();
    (!line.is_empty() && line.chars().all(|c| c == '_')).then_some(line.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Command {
        s.parse().unwrap()
    }

    #[test]
    fn recording_commands() {
        assert_eq!(
            parse("r l_wave"),
            Command::Record {
                name: "l_wave".to_owned(),
                child: None,
                timed: false
            }
        );
        assert_eq!(
            parse("record_v2 right__grab  cup"),
            Command::Record {
                name: "right__grab".to_owned(),
                child: Some("cup".to_owned()),
                timed: true
            }
        );
        assert_eq!(parse("r-0-track"), Command::RecordSafe(None));
        assert_eq!(
            parse("r_0_track morning"),
            Command::RecordSafe(Some("morning".to_owned()))
        );
        assert_eq!(parse("check-0-pos"), Command::CheckZeroPose);
        assert_eq!(parse("s"), Command::StopRecord);
        assert!("r".parse::<Command>().is_err());
        assert!("r a b c".parse::<Command>().is_err());
    }

    #[test]
    fn playback_commands() {
        assert_eq!(
            parse("p l_a r_b left__c"),
            Command::Play(vec!["l_a".to_owned(), "r_b".to_owned(), "left__c".to_owned()])
        );
        assert_eq!(
            parse("pp l_a r_b"),
            Command::PlayParallel("l_a".to_owned(), "r_b".to_owned())
        );
        assert!("pp l_a".parse::<Command>().is_err());
        assert!("play".parse::<Command>().is_err());
        assert_eq!(parse("list"), Command::List(SideSelector::Both));
        assert_eq!(parse("list r"), Command::List(SideSelector::One(Side::Right)));
        assert_eq!(parse("lt"), Command::ListTimed);
        assert_eq!(
            parse("scene_play scene_a scene_b"),
            Command::ScenePlay(vec!["scene_a".to_owned(), "scene_b".to_owned()])
        );
        assert_eq!(parse("  stop  "), Command::Stop);
    }

    #[test]
    fn motion_commands() {
        assert_eq!(parse("get"), Command::Get(None, None));
        assert_eq!(parse("g r 3"), Command::Get(Some(Side::Right), Some(3)));
        assert_eq!(parse("set left 2 -1500"), Command::Set(Side::Left, 2, -1500));
        assert_eq!(parse("s l 6 30000"), Command::Set(Side::Left, 6, 30000));
        let pose = Pose([1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(parse("set r [1, 2, 3, 4, 5, 6, 7]"), Command::SetAll(Side::Right, pose));
        assert_eq!(parse("set r 1 2 3 4 5 6 7"), Command::SetAll(Side::Right, pose));
        assert_eq!(parse("set_all l 1,2,3,4,5,6,7"), Command::SetAll(Side::Left, pose));
        assert!("set r [1, 2, 3]".parse::<Command>().is_err());
        assert_eq!(parse("incr l 500"), Command::Nudge(Side::Left, GRIPPER, 500));
        assert_eq!(parse("d r 1 250"), Command::Nudge(Side::Right, 1, -250));
        assert_eq!(parse("reset"), Command::Reset(SideSelector::Both));
        assert_eq!(parse("reset left"), Command::Reset(SideSelector::One(Side::Left)));
        assert!("set up 1 2".parse::<Command>().is_err());
    }

    #[test]
    fn unknown_words_are_errors() {
        let err = "dance l".parse::<Command>().unwrap_err();
        assert_eq!(err.code, ErrorKind::Tag);
        assert!(err.input.starts_with("dance"));
    }

    #[test]
    fn hybrid_input() {
        assert_eq!(HybridInput::parse(""), Some(HybridInput::Confirm(None)));
        assert_eq!(HybridInput::parse("  "), Some(HybridInput::Confirm(None)));
        assert_eq!(HybridInput::parse("1.5"), Some(HybridInput::Confirm(Some(1.5))));
        assert_eq!(HybridInput::parse("default 0.5"), Some(HybridInput::Default(0.5)));
        assert_eq!(HybridInput::parse("stop"), Some(HybridInput::Stop));
        assert_eq!(HybridInput::parse("s"), Some(HybridInput::Stop));
        assert_eq!(HybridInput::parse("get l"), None);
        assert_eq!(HybridInput::parse("s l 1 2"), None);
    }

    #[test]
    fn scene_lines() {
        assert_eq!(
            "track l_wave".parse::<SceneLine>().unwrap(),
            SceneLine::Track("l_wave".to_owned())
        );
        assert_eq!("pause 2.5".parse::<SceneLine>().unwrap(), SceneLine::Pause(2.5));
        assert_eq!("done".parse::<SceneLine>().unwrap(), SceneLine::Done);
        assert!("pause soon".parse::<SceneLine>().is_err());
    }

    #[test]
    fn history_repeat() {
        assert_eq!(repeat_depth("__"), Some(2));
        assert_eq!(repeat_depth(" _ "), Some(1));
        assert_eq!(repeat_depth("_a"), None);
        assert_eq!(repeat_depth(""), None);
    }
}
