//! `piper`: record and play back tracks on a pair of Piper arms.

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use piper_tracks::{
    args::{PiperArgs, PiperCommand, PlayCommand, RecordCommand, TerminalCommand},
    config::Config,
    controller::{open_arm, ArmController},
    gui::{run_until_key, track_selector},
    naming::{SideSelector, TrackName},
    orchestrator::{DualArm, WorkerMode},
    rpc::serve_stdio,
    terminal::Terminal,
};
use std::{
    error::Error,
    io,
    process::ExitCode,
    thread::sleep,
    time::Duration,
};

fn main() -> ExitCode {
    // Logs go to stderr; a worker's stdout carries the protocol.
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = PiperArgs::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: PiperArgs) -> Result<(), Box<dyn Error>> {
    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    match args.command.unwrap_or(PiperCommand::Terminal(TerminalCommand::default())) {
        PiperCommand::Terminal(cmd) => {
            let mode = if cmd.in_process {
                WorkerMode::Threads
            } else {
                WorkerMode::Processes(args.config.clone())
            };
            let arms = DualArm::spawn(&config, &mode)?;
            Terminal::new(arms, &config).run(io::stdin().lock(), io::stdout())?;
        }
        PiperCommand::Worker(cmd) => {
            let controller = open_arm(cmd.side, &config)
                .and_then(|arm| ArmController::connect(cmd.side, arm, &config));
            serve_stdio(cmd.side, controller)?;
        }
        PiperCommand::Play(cmd) => play(&config, cmd)?,
        PiperCommand::Record(cmd) => record(&config, cmd)?,
        PiperCommand::ListTimed => {
            let arms = DualArm::new(&config, None, None);
            for track in arms.list_timed()? {
                println!(
                    "{:<32} {:>4} pts {:>8.2}s  speed_up {:.2}",
                    track.name, track.points, track.duration, track.speed_up
                );
            }
        }
        PiperCommand::CheckSafe(cmd) => {
            let arms = DualArm::spawn(&config, &WorkerMode::Threads)?;
            let report = arms.check_safe_tracks(cmd.side);
            arms.shutdown();
            println!("{}", report?);
        }
    }
    Ok(())
}

fn play(config: &Config, cmd: PlayCommand) -> Result<(), Box<dyn Error>> {
    let arms = DualArm::spawn(config, &WorkerMode::Threads)?;
    let names = if cmd.pick {
        match track_selector(arms.list(SideSelector::Both)?)? {
            Some(name) => vec![name],
            None => {
                info!("nothing picked");
                arms.shutdown();
                return Ok(());
            }
        }
    } else {
        cmd.names
    };
    let outcomes = arms.play(&names);
    arms.shutdown();
    for (side, outcome) in outcomes? {
        println!("{}: {:?}", side, outcome);
    }
    Ok(())
}

fn record(config: &Config, cmd: RecordCommand) -> Result<(), Box<dyn Error>> {
    let name = TrackName::parse(&cmd.name)?;
    let arms = DualArm::spawn(config, &WorkerMode::Threads)?;
    arms.record(name.as_str(), cmd.overwrite)?;

    let label = name.to_string();
    let elapsed = run_until_key(
        &format!("Recording {}", name),
        Duration::ZERO,
        move |elapsed| {
            let tick = Duration::from_millis(100);
            sleep(tick);
            let elapsed = elapsed + tick;
            let status = format!("{}: {:.1}s", label, elapsed.as_secs_f64());
            (elapsed, status)
        },
    );

    let saved = arms.stop_record(SideSelector::One(name.side()));
    arms.shutdown();
    info!("recorded for {:.1}s", elapsed?.as_secs_f64());
    for summary in saved? {
        println!(
            "saved {} ({} points) -> {}",
            summary.name,
            summary.points,
            summary.path.display()
        );
    }
    Ok(())
}
