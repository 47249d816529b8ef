//! The operator terminal: a line REPL over a [`DualArm`].
//!
//! Playbacks and scenes run on a background thread so that `stop` can be
//! typed while the arms move. Everything else runs in the REPL itself.

use crate::command::{repeat_depth, Command, HybridInput, SceneLine, HELP};
use crate::config::Config;
use crate::naming::{canonicalize, Side, SideSelector, TrackName};
use crate::orchestrator::{DualArm, OrchestratorError};
use crate::pose::Pose;
use crate::recorder::RecordSummary;
use crate::safety::safe_track_name;
use crate::scene::{Scene, SceneElement};
use crate::track::TrackStore;

use log::{error, info, warn};
use std::{
    collections::VecDeque,
    io::{self, BufRead, Write},
    sync::Arc,
    thread::{self, JoinHandle},
};

/// How many previous commands `_`, `__`, ... can reach.
pub const HISTORY_LEN: usize = 10;

/// Safe tracks and the zero pose are handled by this arm.
pub const ZERO_ARM: Side = Side::Left;

/// Whether the REPL keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    #[allow(missing_docs)]
    Continue,
    #[allow(missing_docs)]
    Quit,
}

fn read_line(input: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

fn confirm(input: &mut impl BufRead, out: &mut impl Write, question: &str) -> io::Result<bool> {
    write!(out, "{} [y/N] ", question)?;
    out.flush()?;
    Ok(read_line(input)?.is_some_and(|answer| answer.trim().eq_ignore_ascii_case("y")))
}

/// The operator terminal.
pub struct Terminal {
    arms: Arc<DualArm>,
    safe: TrackStore,
    history: VecDeque<String>,
    hybrid: Option<Side>,
    job: Option<JoinHandle<()>>,
}

impl Terminal {
    /// A terminal driving `arms`.
    pub fn new(arms: DualArm, config: &Config) -> Self {
        Terminal {
            arms: Arc::new(arms),
            safe: TrackStore::new(config.safe_dir()),
            history: VecDeque::with_capacity(HISTORY_LEN),
            hybrid: None,
            job: None,
        }
    }

    /// The arms behind the terminal.
    pub fn arms(&self) -> &DualArm {
        &self.arms
    }

    /// Previous commands, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    fn remember(&mut self, line: &str) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(line.to_owned());
    }

    fn busy(&self) -> bool {
        self.job.as_ref().is_some_and(|job| !job.is_finished())
    }

    /// Wait for the running playback, if any.
    pub fn wait_for_job(&mut self) {
        if let Some(job) = self.job.take() {
            if job.join().is_err() {
                error!("playback thread panicked");
            }
        }
    }

    fn spawn_job<F>(&mut self, label: String, job: F)
    where
        F: FnOnce(&DualArm) -> Result<String, OrchestratorError> + Send + 'static,
    {
        self.wait_for_job();
        let arms = Arc::clone(&self.arms);
        self.job = Some(thread::spawn(move || match job(&arms) {
            Ok(summary) => info!("[{}] {}", label, summary),
            Err(e) => error!("[{}] {}", label, e),
        }));
    }

    /// Read commands from `input` until it ends or `exit` is typed, then
    /// shut the arms down.
    pub fn run(&mut self, mut input: impl BufRead, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "Piper terminal. 'help' lists commands, Ctrl+D exits.")?;
        loop {
            write!(out, "{}> ", self.hybrid.map_or("piper", |side| side.as_str()))?;
            out.flush()?;
            let Some(line) = read_line(&mut input)? else {
                writeln!(out)?;
                self.wait_for_job();
                break;
            };
            if self.handle_line(&line, &mut input, &mut out)? == Flow::Quit {
                self.arms.stop();
                self.wait_for_job();
                break;
            }
        }
        self.arms.shutdown();
        Ok(())
    }

    /// Handle one line: history repeats, control-point input, then commands.
    pub fn handle_line(
        &mut self,
        line: &str,
        input: &mut impl BufRead,
        out: &mut impl Write,
    ) -> io::Result<Flow> {
        let line = match repeat_depth(line) {
            Some(n) if n <= self.history.len() => {
                let repeated = self.history[self.history.len() - n].clone();
                writeln!(out, "repeat: {}", repeated)?;
                repeated
            }
            Some(n) => {
                writeln!(out, "no command #{} in history", n)?;
                return Ok(Flow::Continue);
            }
            None => line.to_owned(),
        };

        if let Some(side) = self.hybrid {
            if let Some(hybrid) = HybridInput::parse(&line) {
                self.handle_hybrid(side, hybrid, out)?;
                return Ok(Flow::Continue);
            }
        }
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        let flow = match line.parse::<Command>() {
            Ok(command) => self.execute(command, input, out)?,
            Err(e) => {
                warn!("unparsed command {:?}: {:?}", line, e);
                writeln!(out, "unknown command or bad arguments: {} ('help' lists commands)", line.trim())?;
                Flow::Continue
            }
        };
        self.remember(line.trim());
        Ok(flow)
    }

    fn handle_hybrid(&mut self, side: Side, input: HybridInput, out: &mut impl Write) -> io::Result<()> {
        let result = match input {
            HybridInput::Confirm(duration) => self.arms.add_point(side, duration).map(|(n, point)| {
                format!("+ point #{} ({:.3}s) {}", n, point.duration, point.pose)
            }),
            HybridInput::Default(seconds) => self
                .arms
                .set_default_duration(side, seconds)
                .map(|()| format!("default duration = {:.3}s", seconds)),
            HybridInput::Stop => {
                self.hybrid = None;
                self.arms
                    .stop_record(SideSelector::One(side))
                    .map(|summaries| summaries.iter().map(saved_line).collect::<Vec<_>>().join("\n"))
            }
        };
        report(out, "HYB-REC", result)
    }

    /// Run one parsed command.
    pub fn execute(
        &mut self,
        command: Command,
        input: &mut impl BufRead,
        out: &mut impl Write,
    ) -> io::Result<Flow> {
        use Command as C;
        let read_only = matches!(
            command,
            C::Stop | C::Help | C::Quit | C::List(_) | C::ListTimed | C::TrackRange(_) | C::SceneShow(_)
        );
        if self.busy() && !read_only {
            writeln!(out, "playback running; type 'stop' first")?;
            return Ok(Flow::Continue);
        }
        match command {
            C::Record { name, child, timed } => self.record(&name, child.as_deref(), timed, input, out)?,
            C::RecordSafe(name) => {
                let mut overwrite = false;
                if let Some(name) = &name {
                    let file = safe_track_name(name);
                    if self.safe.exists(&file) {
                        let question = format!("{} exists. Overwrite?", self.safe.path(&file).display());
                        if !confirm(input, out, &question)? {
                            writeln!(out, "cancelled")?;
                            return Ok(Flow::Continue);
                        }
                        overwrite = true;
                    }
                }
                let result = self
                    .arms
                    .record_safe(ZERO_ARM, name.as_deref(), overwrite)
                    .map(|name| format!("{}: move the arm through safe poses, 's' to stop", name));
                report(out, "REC-0", result)?;
            }
            C::SaveZeroPose => {
                let result = self
                    .arms
                    .save_zero_pose(ZERO_ARM)
                    .map(|(pose, path)| format!("saved {} -> {}", pose, path.display()));
                report(out, "ZERO-POS", result)?;
            }
            C::CheckZeroPose => {
                report(out, "CHECK-0-POS", self.arms.check_zero_pose(ZERO_ARM).map(|r| r.to_string()))?
            }
            C::CheckSafeTracks => report(
                out,
                "CHECK-0-TRACK",
                self.arms.check_safe_tracks(ZERO_ARM).map(|r| r.to_string()),
            )?,
            C::StopRecord => {
                self.hybrid = None;
                let result = self.arms.stop_record(SideSelector::Both).map(|summaries| {
                    if summaries.is_empty() {
                        "nothing was recording".to_owned()
                    } else {
                        summaries.iter().map(saved_line).collect::<Vec<_>>().join("\n")
                    }
                });
                report(out, "REC", result)?;
            }
            C::Stop => {
                self.arms.stop();
                writeln!(out, "stop requested")?;
            }
            C::Play(names) => {
                writeln!(out, "playing {}", names.join(" "))?;
                self.spawn_job("PLAY".to_owned(), move |arms| {
                    arms.play(&names).map(|outcomes| format!("{:?}", outcomes))
                });
            }
            C::PlayParallel(left, right) => {
                writeln!(out, "playing {} | {}", left, right)?;
                self.spawn_job("PP".to_owned(), move |arms| {
                    arms.play_parallel(&left, &right).map(|outcomes| format!("{:?}", outcomes))
                });
            }
            C::List(selector) => {
                let result = self.arms.list(selector).map(|names| names.join("\n"));
                report(out, "LIST", result)?;
            }
            C::ListTimed => {
                let result = self.arms.list_timed().map(|tracks| {
                    if tracks.is_empty() {
                        return "no timed tracks".to_owned();
                    }
                    tracks
                        .iter()
                        .map(|t| {
                            format!(
                                "{:<32} {:>4} pts {:>8.2}s  speed_up {:.2}",
                                t.name, t.points, t.duration, t.speed_up
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                });
                report(out, "LIST_TIMED", result)?;
            }
            C::TrackRange(name) => {
                let result = self
                    .arms
                    .track_range(&name)
                    .map(|(lo, hi)| format!("min {}\nmax {}", lo, hi));
                report(out, "RANGE", result)?;
            }
            C::SceneAdd(name) => self.scene_add(&name, input, out)?,
            C::SceneShow(name) => {
                let result = self.arms.scene_show(&name).map(|timelines| {
                    let mut text = Vec::new();
                    for (side, entries) in timelines {
                        text.push(format!("--- {} ---", side.as_str().to_ascii_uppercase()));
                        for entry in entries {
                            let end = entry
                                .end
                                .map_or_else(|| "?".to_owned(), |end| format!("{:.2}", end));
                            text.push(format!("{} (t={:.2}->{})", entry.element, entry.start, end));
                        }
                    }
                    text.join("\n")
                });
                report(out, "SCENE", result)?;
            }
            C::ScenePlay(names) => {
                writeln!(out, "playing scenes {}", names.join(" "))?;
                self.spawn_job("SCENE PLAY".to_owned(), move |arms| {
                    arms.scene_play(&names).map(|outcome| format!("{:?}", outcome))
                });
            }
            C::Get(side, joint) => self.get(side, joint, out)?,
            C::Set(side, joint, value) => {
                report(out, "SET", self.arms.set_joint(side, joint, value).map(reached))?
            }
            C::SetAll(side, pose) => report(out, "SET", self.arms.set_all(side, pose).map(reached))?,
            C::Nudge(side, joint, delta) => {
                report(out, "INCR", self.arms.nudge(side, joint, delta).map(reached))?
            }
            C::Reset(selector) => {
                let result = self.arms.reset(selector).map(|results| {
                    results
                        .iter()
                        .map(|(side, enabled)| {
                            format!("{}: {}", side, if *enabled { "enabled" } else { "NOT all motors enabled" })
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                });
                report(out, "RESET", result)?;
            }
            C::Help => writeln!(out, "{}", HELP)?,
            C::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn record(
        &mut self,
        name: &str,
        child: Option<&str>,
        timed: bool,
        input: &mut impl BufRead,
        out: &mut impl Write,
    ) -> io::Result<()> {
        let name = match child {
            Some(child) => TrackName::join(name, child),
            None => TrackName::parse(name),
        };
        let name = match name {
            Ok(name) => name,
            Err(e) => return report::<String>(out, "REC", Err(e.into())),
        };
        let mut overwrite = false;
        if self.arms.tracks().exists(name.as_str()) {
            let question = format!("{} exists. Overwrite?", self.arms.tracks().path(name.as_str()).display());
            if !confirm(input, out, &question)? {
                return writeln!(out, "cancelled");
            }
            overwrite = true;
        }
        let result = if timed {
            self.arms.record_timed(name.as_str(), overwrite).map(|name| {
                format!("{}: pose the arm, Enter adds a point, <sec> sets its duration, 's' stops", name)
            })
        } else {
            self.arms
                .record(name.as_str(), overwrite)
                .map(|name| format!("{}: move the arm, 's' to stop", name))
        };
        if timed && result.is_ok() {
            self.hybrid = Some(name.side());
        }
        report(out, "REC", result)
    }

    fn scene_add(&mut self, name: &str, input: &mut impl BufRead, out: &mut impl Write) -> io::Result<()> {
        let mut scene = Scene::new();
        for side in Side::BOTH {
            writeln!(
                out,
                "building {} timeline: 'track <name>', 'pause <sec>', 'done'",
                side.as_str().to_ascii_uppercase()
            )?;
            loop {
                write!(out, "{}> ", side.as_str().to_ascii_uppercase())?;
                out.flush()?;
                let Some(line) = read_line(input)? else {
                    return writeln!(out, "input ended; scene not saved");
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<SceneLine>() {
                    Ok(SceneLine::Done) => break,
                    Ok(SceneLine::Track(track)) => scene.side_mut(side).push(SceneElement::Track {
                        name: canonicalize(&track),
                    }),
                    Ok(SceneLine::Pause(duration)) if duration >= 0.0 => {
                        scene.side_mut(side).push(SceneElement::Pause { duration })
                    }
                    _ => writeln!(out, "use 'track <name>', 'pause <sec>' or 'done'")?,
                }
            }
        }
        let result = self
            .arms
            .scene_add(name, &scene)
            .map(|path| format!("saved -> {}", path.display()));
        report(out, "SCENE ADD", result)
    }

    fn get(&self, side: Option<Side>, joint: Option<usize>, out: &mut impl Write) -> io::Result<()> {
        let sides = match side {
            Some(side) => vec![side],
            None => Side::BOTH
                .into_iter()
                .filter(|side| self.arms.arm(*side).is_ok())
                .collect(),
        };
        for side in sides {
            let label = side.as_str().to_ascii_uppercase();
            let result = self.arms.get(side).and_then(|pose: Pose| match joint {
                None => Ok(format!("{} {}", label, pose)),
                Some(joint) => pose
                    .get(joint)
                    .map(|value| format!("{} joint[{}] = {}", label, joint, value))
                    .ok_or_else(|| OrchestratorError::Usage(format!("no joint {}", joint))),
            });
            report(out, "GET", result)?;
        }
        Ok(())
    }
}

fn reached(ok: bool) -> String {
    if ok {
        "reached".to_owned()
    } else {
        "NOT reached (outside strict tolerance)".to_owned()
    }
}

fn saved_line(summary: &RecordSummary) -> String {
    format!(
        "saved {} ({} recording, {} points) -> {}",
        summary.name,
        summary.kind,
        summary.points,
        summary.path.display()
    )
}

fn report<T: std::fmt::Display>(
    out: &mut impl Write,
    tag: &str,
    result: Result<T, OrchestratorError>,
) -> io::Result<()> {
    match result {
        Ok(text) => {
            let text = text.to_string();
            if !text.is_empty() {
                writeln!(out, "{}", text)?;
            }
            info!("[{}] ok", tag);
        }
        Err(e) => {
            error!("[{}] {}", tag, e);
            writeln!(out, "error: {}", e)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::WorkerMode;
    use crate::controller::SIM_REST_POSE;
    use crate::track::{ControlPoint, TrackPoint};
    use std::io::Cursor;
    use std::path::Path;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.tracks_dir = dir.join("tracks");
        config.scenes_dir = dir.join("scenes");
        config.pause_file = dir.join("pause.txt");
        config.control.hz = 200.0;
        config.control.glide_steps = 10;
        config.control.timed_glide_steps = 5;
        config.control.delay_between_tracks = 0.0;
        config.control.settle_after_glide = 0.05;
        config.control.pause_poll = 0.01;
        config.speed_up.clear();
        config
    }

    fn session(config: &Config, script: &str) -> String {
        let arms = DualArm::spawn(config, &WorkerMode::Threads).unwrap();
        let mut terminal = Terminal::new(arms, config);
        let mut out = Vec::new();
        terminal.run(Cursor::new(script.to_owned()), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn underscores_repeat_history() {
        let dir = tempfile::tempdir().unwrap();
        let out = session(&config(dir.path()), "get l\n_\n___\n");
        assert_eq!(out.matches(&format!("LEFT {}", SIM_REST_POSE)).count(), 2);
        assert!(out.contains("repeat: get l"));
        assert!(out.contains("no command #3 in history"));
    }

    #[test]
    fn history_keeps_the_last_ten() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut terminal = Terminal::new(DualArm::new(&config, None, None), &config);
        let mut input = Cursor::new(String::new());
        let mut out = Vec::new();
        for i in 0..12 {
            terminal
                .handle_line(&format!("list_timed {}", i), &mut input, &mut out)
                .unwrap();
        }
        let history: Vec<&str> = terminal.history().collect();
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history[0], "list_timed 2");
    }

    #[test]
    fn control_points_through_the_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let out = session(&config, "r2 l_steps\n\n1.5\ndefault 0.5\n\ns\nlt\n");
        assert!(out.contains("+ point #1 (2.000s)"), "{}", out);
        assert!(out.contains("+ point #2 (1.500s)"));
        assert!(out.contains("default duration = 0.500s"));
        assert!(out.contains("saved left__steps (control-point recording, 3 points)"));
        assert!(out.contains("left__steps"));
        let track = TrackStore::new(&config.tracks_dir)
            .read_track("left__steps")
            .unwrap();
        assert_eq!(track.len(), 3);
        assert!((track.duration() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn existing_tracks_need_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        TrackStore::new(&config.tracks_dir)
            .write_dense_timed("left__wave", &[TrackPoint::new(SIM_REST_POSE, 0.0)])
            .unwrap();
        let out = session(&config, "r l_wave\nn\nget l\n");
        assert!(out.contains("exists. Overwrite? [y/N] cancelled"));
        assert!(out.contains("LEFT"));
        // The existing file is untouched.
        let track = TrackStore::new(&config.tracks_dir).read_track("left__wave").unwrap();
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn scenes_are_authored_interactively() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        TrackStore::new(&config.tracks_dir)
            .write_sparse_timed(
                "left__a",
                &[
                    ControlPoint {
                        pose: SIM_REST_POSE,
                        duration: 0.0,
                    },
                    ControlPoint {
                        pose: SIM_REST_POSE,
                        duration: 1.0,
                    },
                ],
                0.0,
            )
            .unwrap();
        let arms = DualArm::new(&config, None, None);
        let mut terminal = Terminal::new(arms, &config);
        let mut input = Cursor::new("track l_a\npause x\npause 1\ndone\ndone\n".to_owned());
        let mut out = Vec::new();
        terminal
            .handle_line("scene_add scene_x", &mut input, &mut out)
            .unwrap();
        terminal
            .handle_line("scene_show scene__x", &mut input, &mut out)
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("use 'track <name>'"));
        assert!(out.contains("saved -> "));
        assert!(out.contains("track left__a (t=0.00->1.00)"), "{}", out);
        assert!(out.contains("pause 1s (t=1.00->2.00)"));
    }

    #[test]
    fn bad_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut terminal = Terminal::new(DualArm::new(&config, None, None), &config);
        let mut input = Cursor::new(String::new());
        let mut out = Vec::new();
        terminal.handle_line("dance", &mut input, &mut out).unwrap();
        terminal.handle_line("play wave", &mut input, &mut out).unwrap();
        terminal.wait_for_job();
        terminal.handle_line("get l", &mut input, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("unknown command or bad arguments: dance"));
        assert!(out.contains("error: left arm not initialised"));
        assert_eq!(
            terminal.handle_line("exit", &mut input, &mut Vec::new()).unwrap(),
            Flow::Quit
        );
    }
}
