//! Command-line arguments of the `piper` binary.

use crate::naming::Side;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
#[allow(missing_docs)]
pub struct PiperArgs {
    /// RON configuration file; `piper.ron` is used when present
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<PiperCommand>,
}

#[derive(Debug, Subcommand, Clone)]
#[allow(missing_docs)]
pub enum PiperCommand {
    /// Interactive operator terminal (the default)
    #[command(about)]
    Terminal(TerminalCommand),

    /// Serve one arm over stdin/stdout; started by the terminal
    #[command(about)]
    Worker(WorkerCommand),

    /// Play tracks and exit
    #[command(about)]
    Play(PlayCommand),

    /// Record a track until a key is pressed
    #[command(about)]
    Record(RecordCommand),

    /// List sparse timed tracks with their durations
    #[command(about)]
    ListTimed,

    /// Report how far an arm is from the nearest safe-track point
    #[command(about)]
    CheckSafe(SideArg),
}

#[derive(Debug, Args, Clone, Default)]
pub struct TerminalCommand {
    /// Host the arms on threads of this process instead of worker processes
    #[arg(long)]
    pub in_process: bool,
}

#[derive(Debug, Args, Clone)]
#[allow(missing_docs)]
pub struct WorkerCommand {
    /// Arm to serve
    #[arg(short, long)]
    pub side: Side,
}

#[derive(Debug, Args, Clone)]
pub struct PlayCommand {
    /// Pick the track from a list instead of naming it
    #[arg(long)]
    pub pick: bool,

    /// Tracks to play, `left__`/`right__` prefixed (or `l_`/`r_`)
    #[clap(num_args = 0..)]
    pub names: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RecordCommand {
    /// Track to record
    pub name: String,

    /// Replace an existing track of the same name
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Args, Clone)]
#[allow(missing_docs)]
pub struct SideArg {
    /// Arm to check
    #[arg(short, long, default_value = "left")]
    pub side: Side,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse() {
        let args = PiperArgs::parse_from(["piper", "worker", "--side", "right", "--config", "x.ron"]);
        assert_eq!(args.config, Some(PathBuf::from("x.ron")));
        assert!(matches!(
            args.command,
            Some(PiperCommand::Worker(WorkerCommand { side: Side::Right }))
        ));

        let args = PiperArgs::parse_from(["piper", "play", "l_wave", "r_grab"]);
        let Some(PiperCommand::Play(play)) = args.command else {
            panic!("expected play");
        };
        assert_eq!(play.names, vec!["l_wave", "r_grab"]);
        assert!(!play.pick);

        assert!(PiperArgs::parse_from(["piper"]).command.is_none());
        assert!(PiperArgs::try_parse_from(["piper", "worker", "--side", "up"]).is_err());
    }
}
