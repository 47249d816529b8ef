//! Track recording and playback for a pair of Piper robot arms.
//!
//! An operator drags an arm through a motion (or poses it point by point)
//! and the motion is saved as a *track*; later the track is played back,
//! either on its own or choreographed with the other arm in a *scene*.
//! Before anything moves, the arm's pose is checked against known-safe
//! reference tracks, and the arm glides to the start of the track.
//!
//! The pieces, leaves first:
//!
//! - [`track`] reads and writes the three on-disk track formats.
//! - [`position`] reads the arm's pose, riding out the all-zero readings a
//!   fresh CAN link produces.
//! - [`safety`] measures how far two poses are apart.
//! - [`recorder`] and [`playback`] are the state machines that drive one
//!   arm.
//! - [`controller`] puts one arm's operations behind one type, which
//!   [`rpc`] serves to [`orchestrator`], possibly from another process.
//! - [`terminal`] is the operator REPL on top of it all.
//!
//! The hardware itself sits behind the [`arm::PiperArm`] trait;
//! [`sim_arm::SimArm`] stands in for it in tests and demos.

#![warn(missing_docs)]
pub mod args;
pub mod arm;
pub mod command;
pub mod config;
pub mod controller;
pub mod gui;
pub mod naming;
pub mod orchestrator;
pub mod pause;
pub mod playback;
pub mod pose;
pub mod position;
pub mod rate;
pub mod recorder;
pub mod rpc;
pub mod safety;
pub mod scene;
pub mod sim_arm;
pub mod terminal;
pub mod track;
