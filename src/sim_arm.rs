//! A simulated Piper arm, for running the tooling without hardware and for
//! tests. The arm's "actual" pose chases the commanded targets on a
//! background thread, optionally with a bit of sensor noise, and every
//! command it receives is logged so tests can inspect what was sent.

use crate::arm::*;
use crate::pose::{Pose, JOINT_COUNT, POSE_LEN};

use rand::prelude::*;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Everything the simulated arm was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    #[allow(missing_docs)]
    Connect,
    #[allow(missing_docs)]
    Disconnect,
    #[allow(missing_docs)]
    Enable(u8),
    #[allow(missing_docs)]
    Disable(u8),
    #[allow(missing_docs)]
    Mode(ModeCommand),
    #[allow(missing_docs)]
    Motion(MotionControl),
    #[allow(missing_docs)]
    Joints([i32; JOINT_COUNT]),
    #[allow(missing_docs)]
    Gripper(GripperCommand),
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    enabled: bool,
    teach: bool,
    mode: ModeCommand,
    actual: Pose,
    target: Pose,
    tracking: f64,
    noise: i32,
    zero_reads_after_connect: usize,
    zero_reads_left: usize,
    log: Vec<SimCommand>,
}

impl SimState {
    fn follows_commands(&self) -> bool {
        self.connected
            && self.enabled
            && !self.teach
            && self.mode.ctrl_mode == CtrlMode::CanCommand
    }

    fn snap_if_instant(&mut self) {
        if self.tracking >= 1.0 && self.follows_commands() {
            self.actual = self.target;
        }
    }
}

enum Signal {
    Tracking(f64),
    Noise(i32),
    Stop,
}

/// The simulated arm. Move it into an [`ArmHandle`] and keep a [`SimProbe`]
/// to look inside.
pub struct SimArm {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    state: Arc<Mutex<SimState>>,
}

/// A window into a [`SimArm`] that stays usable after the arm itself has
/// been handed off to an [`ArmHandle`].
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    // The simulator never panics while holding its own lock, but a test
    // assertion might; the state is still meaningful afterwards.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimArm {
    /// Start configuring a simulated arm.
    pub fn builder() -> SimArmBuilder {
        SimArmBuilder::default()
    }

    /// A probe sharing this arm's state.
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Arc::clone(&self.state),
        }
    }

    /// Change how quickly the actual pose follows the target; 1.0 is instant.
    pub fn set_tracking(&self, tracking: f64) {
        let _ = self.tx.send(Signal::Tracking(tracking));
    }

    /// Change the amplitude of the feedback noise, in raw units.
    pub fn set_noise(&self, noise: i32) {
        let _ = self.tx.send(Signal::Noise(noise));
    }

    /// Stop the background thread and wait for it.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            let _ = thread.join();
        }
    }

    fn record(&self, command: SimCommand) -> MutexGuard<'_, SimState> {
        let mut state = lock(&self.state);
        state.log.push(command);
        state
    }

    fn require_connection(state: &SimState) -> Result<(), ArmError> {
        if state.connected {
            Ok(())
        } else {
            Err(ArmError::NotConnected)
        }
    }
}

impl Drop for SimArm {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PiperArm for SimArm {
    fn connect(&mut self) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Connect);
        state.connected = true;
        state.zero_reads_left = state.zero_reads_after_connect;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Disconnect);
        state.connected = false;
        Ok(())
    }

    fn enable(&mut self, mask: u8) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Enable(mask));
        Self::require_connection(&state)?;
        state.enabled = true;
        state.snap_if_instant();
        Ok(())
    }

    fn disable(&mut self, mask: u8) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Disable(mask));
        Self::require_connection(&state)?;
        state.enabled = false;
        Ok(())
    }

    fn set_mode(&mut self, mode: ModeCommand) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Mode(mode));
        Self::require_connection(&state)?;
        state.mode = mode;
        Ok(())
    }

    fn motion_control(&mut self, action: MotionControl) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Motion(action));
        Self::require_connection(&state)?;
        match action {
            MotionControl::EnterTeach => state.teach = true,
            MotionControl::ExitTeach => {
                state.teach = false;
                // Whatever the hand left it at becomes the new hold target.
                state.target = state.actual;
            }
            MotionControl::ClearTrajectory | MotionControl::ResumeEmergencyStop => {}
        }
        Ok(())
    }

    fn send_joint_targets(&mut self, joints: [i32; JOINT_COUNT]) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Joints(joints));
        Self::require_connection(&state)?;
        state.target = Pose::new(joints, state.target.gripper());
        state.snap_if_instant();
        Ok(())
    }

    fn send_gripper_target(&mut self, command: GripperCommand) -> Result<(), ArmError> {
        let mut state = self.record(SimCommand::Gripper(command));
        Self::require_connection(&state)?;
        if matches!(
            command.code,
            GripperCode::Enable | GripperCode::EnableClearError
        ) {
            state.target = state.target.with_gripper(command.position);
            state.snap_if_instant();
        }
        Ok(())
    }

    fn read_joint_feedback(&mut self) -> Result<[i32; JOINT_COUNT], ArmError> {
        let state = lock(&self.state);
        Self::require_connection(&state)?;
        if state.zero_reads_left > 0 {
            return Ok([0; JOINT_COUNT]);
        }
        let mut joints = state.actual.joints();
        if state.noise > 0 {
            let mut rng = thread_rng();
            for joint in joints.iter_mut() {
                *joint += rng.gen_range(-state.noise..=state.noise);
            }
        }
        Ok(joints)
    }

    // A blacked-out read is a joints read followed by a gripper read, so the
    // countdown ticks on the gripper side.
    fn read_gripper_feedback(&mut self) -> Result<i32, ArmError> {
        let mut state = lock(&self.state);
        Self::require_connection(&state)?;
        if state.zero_reads_left > 0 {
            state.zero_reads_left -= 1;
            return Ok(0);
        }
        Ok(state.actual.gripper())
    }

    fn read_high_speed_telemetry(&mut self) -> Result<HighSpeedTelemetry, ArmError> {
        let state = lock(&self.state);
        Self::require_connection(&state)?;
        Ok(HighSpeedTelemetry {
            position_deg001: state.actual.joints(),
            ..Default::default()
        })
    }

    fn read_low_speed_telemetry(&mut self) -> Result<LowSpeedTelemetry, ArmError> {
        let state = lock(&self.state);
        Self::require_connection(&state)?;
        Ok(LowSpeedTelemetry {
            voltage_mv: [24_000; JOINT_COUNT],
            enabled: [state.enabled; JOINT_COUNT],
            ..Default::default()
        })
    }
}

impl SimProbe {
    /// Every command received so far.
    pub fn commands(&self) -> Vec<SimCommand> {
        lock(&self.state).log.clone()
    }

    /// Forget the command log.
    pub fn clear_commands(&self) {
        lock(&self.state).log.clear();
    }

    /// Every pose commanded so far, reassembled from joint and gripper
    /// commands sent back to back.
    pub fn commanded_poses(&self) -> Vec<Pose> {
        let log = self.commands();
        log.windows(2)
            .filter_map(|w| match (&w[0], &w[1]) {
                (SimCommand::Joints(joints), SimCommand::Gripper(g)) => {
                    Some(Pose::new(*joints, g.position))
                }
                _ => None,
            })
            .collect()
    }

    /// Every mode change so far.
    pub fn modes(&self) -> Vec<ModeCommand> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                SimCommand::Mode(mode) => Some(mode),
                _ => None,
            })
            .collect()
    }

    /// Where the arm really is.
    pub fn actual(&self) -> Pose {
        lock(&self.state).actual
    }

    /// Move the arm by hand, as an operator in teach mode would.
    pub fn drag_to(&self, pose: Pose) {
        let mut state = lock(&self.state);
        state.actual = pose;
        if !state.teach {
            state.target = pose;
        }
    }

    /// Whether teach mode is active.
    pub fn in_teach(&self) -> bool {
        lock(&self.state).teach
    }

    /// Whether the motors are enabled.
    pub fn enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    /// Make the next `reads` feedback reads come back all zero.
    pub fn blackout(&self, reads: usize) {
        lock(&self.state).zero_reads_left = reads;
    }
}

/// Builder for [`SimArm`].
#[derive(Debug, Clone)]
pub struct SimArmBuilder {
    start: Pose,
    tracking: f64,
    noise: i32,
    zero_reads_after_connect: usize,
    tick: Duration,
}

impl Default for SimArmBuilder {
    fn default() -> Self {
        SimArmBuilder {
            start: Pose::ZERO,
            tracking: 1.0,
            noise: 0,
            zero_reads_after_connect: 0,
            tick: Duration::from_millis(5),
        }
    }
}

impl SimArmBuilder {
    /// Where the arm rests when the simulation starts.
    pub fn start_pose(self, start: Pose) -> Self {
        SimArmBuilder { start, ..self }
    }

    /// Fraction of the remaining distance covered per tick; 1.0 is instant.
    pub fn tracking(self, tracking: f64) -> Self {
        SimArmBuilder { tracking, ..self }
    }

    /// Feedback noise amplitude in raw units.
    pub fn noise(self, noise: i32) -> Self {
        SimArmBuilder { noise, ..self }
    }

    /// How many feedback reads come back all zero after each connect.
    pub fn zero_reads_after_connect(self, zero_reads_after_connect: usize) -> Self {
        SimArmBuilder {
            zero_reads_after_connect,
            ..self
        }
    }

    /// Period of the simulation thread.
    pub fn tick(self, tick: Duration) -> Self {
        SimArmBuilder { tick, ..self }
    }

    /// Start the simulation thread.
    pub fn build(self) -> SimArm {
        let (tx, rx) = mpsc::channel::<Signal>();
        let state = Arc::new(Mutex::new(SimState {
            connected: false,
            enabled: false,
            teach: false,
            mode: ModeCommand::standby(),
            actual: self.start,
            target: self.start,
            tracking: self.tracking,
            noise: self.noise,
            zero_reads_after_connect: self.zero_reads_after_connect,
            zero_reads_left: 0,
            log: Vec::new(),
        }));
        let th_state = Arc::clone(&state);
        let tick = self.tick;

        let handle = thread::spawn(move || {
            loop {
                match rx.try_recv() {
                    Ok(Signal::Tracking(tracking)) => lock(&th_state).tracking = tracking,
                    Ok(Signal::Noise(noise)) => lock(&th_state).noise = noise,
                    Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                    Err(mpsc::TryRecvError::Empty) => {}
                }
                {
                    let mut state = lock(&th_state);
                    if state.follows_commands() {
                        let tracking = state.tracking.clamp(0.0, 1.0);
                        let mut next = [0; POSE_LEN];
                        for (i, slot) in next.iter_mut().enumerate() {
                            let actual = state.actual.0[i] as f64;
                            let target = state.target.0[i] as f64;
                            *slot = (actual + (target - actual) * tracking).round() as i32;
                        }
                        state.actual = Pose(next);
                    }
                }
                thread::sleep(tick);
            }
        });

        SimArm {
            handle: Some(handle),
            tx,
            state,
        }
    }
}
