//! `PiperArm`
//!
//! The hardware seam. Everything that talks to a Piper arm goes through this
//! trait, so the real CAN driver and the [`SimArm`](crate::sim_arm::SimArm)
//! are interchangeable. Units follow the vendor SDK: angles in 0.001 degree,
//! gripper in 0.001 mm, current in mA, torque in 0.001 N·m.

use crate::pose::{Pose, JOINT_COUNT};

use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, Mutex},
};

/// Bit mask selecting every motor for enable/disable.
pub const ALL_MOTORS: u8 = 7;

/// Controller source selected by [`ModeCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlMode {
    /// No motion commands are accepted; the arm holds still.
    Standby = 0x00,
    /// Motion commands arrive over CAN.
    CanCommand = 0x01,
}

/// Interpretation of motion commands selected by [`ModeCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// Cartesian point moves.
    Point = 0x00,
    /// Joint-space moves.
    Joint = 0x01,
}

/// Arguments to the vendor `ModeCtrl` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeCommand {
    /// Where motion commands come from.
    pub ctrl_mode: CtrlMode,
    /// How motion commands are interpreted.
    pub move_mode: MoveMode,
    /// Speed limit as a percentage of the maximum.
    pub speed_pct: u8,
    /// MIT impedance mode flag.
    pub mit: bool,
}

impl ModeCommand {
    /// Motion disengaged; the arm holds its current pose.
    pub fn standby() -> Self {
        ModeCommand {
            ctrl_mode: CtrlMode::Standby,
            move_mode: MoveMode::Point,
            speed_pct: 0,
            mit: false,
        }
    }

    /// Joint-space control over CAN at the given speed.
    pub fn joint(speed_pct: u8) -> Self {
        ModeCommand {
            ctrl_mode: CtrlMode::CanCommand,
            move_mode: MoveMode::Joint,
            speed_pct,
            mit: false,
        }
    }

    /// CAN control with point moves, the state the arm is left in after
    /// leaving teach mode.
    pub fn point(speed_pct: u8) -> Self {
        ModeCommand {
            ctrl_mode: CtrlMode::CanCommand,
            move_mode: MoveMode::Point,
            speed_pct,
            mit: false,
        }
    }
}

/// Arguments to the vendor `MotionCtrl_1` call, one action at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionControl {
    /// Make the arm back-drivable by hand.
    EnterTeach,
    /// Leave the back-drivable mode.
    ExitTeach,
    /// Drop the trajectory the controller is currently executing.
    ClearTrajectory,
    /// Release a latched emergency stop.
    ResumeEmergencyStop,
}

/// Gripper control code for [`GripperCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripperCode {
    #[allow(missing_docs)]
    Disable = 0x00,
    #[allow(missing_docs)]
    Enable = 0x01,
    #[allow(missing_docs)]
    DisableClearError = 0x02,
    #[allow(missing_docs)]
    EnableClearError = 0x03,
}

/// Arguments to the vendor `GripperCtrl` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripperCommand {
    /// Target opening.
    pub position: i32,
    /// Grip effort in 0.001 N·m.
    pub effort: u16,
    /// Enable/disable and error-clear code.
    pub code: GripperCode,
    /// Set-zero flag, always zero in normal operation.
    pub set_zero: u8,
}

impl GripperCommand {
    /// Move to `position` with `effort`, gripper enabled.
    pub fn move_to(position: i32, effort: u16) -> Self {
        GripperCommand {
            position,
            effort,
            code: GripperCode::Enable,
            set_zero: 0,
        }
    }
}

/// Per-motor fast telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighSpeedTelemetry {
    #[allow(missing_docs)]
    pub speed_rpm: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub current_ma: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub position_deg001: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub effort_mnm: [i32; JOINT_COUNT],
}

/// Per-motor slow telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LowSpeedTelemetry {
    #[allow(missing_docs)]
    pub voltage_mv: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub foc_temp_c: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub motor_temp_c: [i32; JOINT_COUNT],
    #[allow(missing_docs)]
    pub bus_current_ma: [i32; JOINT_COUNT],
    /// Driver enable state of each motor.
    pub enabled: [bool; JOINT_COUNT],
}

/// The errors a hardware link can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmError {
    /// A command was issued before `connect` or after `disconnect`.
    NotConnected,
    /// The bus rejected or dropped a frame.
    Bus(String),
    /// Another thread panicked while holding the arm.
    Poisoned,
}

impl fmt::Display for ArmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ArmError as AE;
        let msg = match self {
            AE::NotConnected => Cow::from("arm is not connected"),
            AE::Bus(reason) => Cow::from(format!("bus error: {}", reason)),
            AE::Poisoned => Cow::from("arm lock poisoned by a panicked thread"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ArmError {}

/// The hardware collaborator. One value drives one physical arm.
pub trait PiperArm: Send {
    /// Open the link.
    fn connect(&mut self) -> Result<(), ArmError>;
    /// Close the link.
    fn disconnect(&mut self) -> Result<(), ArmError>;
    /// Enable the motors selected by `mask`.
    fn enable(&mut self, mask: u8) -> Result<(), ArmError>;
    /// Disable the motors selected by `mask`.
    fn disable(&mut self, mask: u8) -> Result<(), ArmError>;
    /// Select control source and motion interpretation.
    fn set_mode(&mut self, mode: ModeCommand) -> Result<(), ArmError>;
    /// Teach-mode, trajectory and emergency-stop control.
    fn motion_control(&mut self, action: MotionControl) -> Result<(), ArmError>;
    /// Command all six joints at once.
    fn send_joint_targets(&mut self, joints: [i32; JOINT_COUNT]) -> Result<(), ArmError>;
    /// Command the gripper.
    fn send_gripper_target(&mut self, command: GripperCommand) -> Result<(), ArmError>;
    /// Latest joint angles.
    fn read_joint_feedback(&mut self) -> Result<[i32; JOINT_COUNT], ArmError>;
    /// Latest gripper opening.
    fn read_gripper_feedback(&mut self) -> Result<i32, ArmError>;
    #[allow(missing_docs)]
    fn read_high_speed_telemetry(&mut self) -> Result<HighSpeedTelemetry, ArmError>;
    #[allow(missing_docs)]
    fn read_low_speed_telemetry(&mut self) -> Result<LowSpeedTelemetry, ArmError>;
}

/// A clonable, thread-safe handle on one arm.
///
/// The recorder's sampling thread, the player, and direct operator queries
/// all reach the same hardware through clones of this handle.
#[derive(Clone)]
pub struct ArmHandle {
    inner: Arc<Mutex<Box<dyn PiperArm>>>,
}

impl ArmHandle {
    /// Wrap an arm driver.
    pub fn new(arm: impl PiperArm + 'static) -> Self {
        ArmHandle {
            inner: Arc::new(Mutex::new(Box::new(arm))),
        }
    }

    /// Run `f` with exclusive access to the driver.
    pub fn with<F, R>(&self, f: F) -> Result<R, ArmError>
    where
        F: FnOnce(&mut dyn PiperArm) -> Result<R, ArmError>,
    {
        let mut guard = self.inner.lock().map_err(|_| ArmError::Poisoned)?;
        f(guard.as_mut())
    }

    /// Read joints and gripper in one locked section. No retry; see
    /// [`PoseReader`](crate::position::PoseReader) for that.
    pub fn read_pose(&self) -> Result<Pose, ArmError> {
        self.with(|arm| {
            let joints = arm.read_joint_feedback()?;
            let gripper = arm.read_gripper_feedback()?;
            Ok(Pose::new(joints, gripper))
        })
    }

    /// Send a full pose: six joints followed by the gripper.
    pub fn send_pose(&self, pose: &Pose, effort: u16) -> Result<(), ArmError> {
        self.with(|arm| {
            arm.send_joint_targets(pose.joints())?;
            arm.send_gripper_target(GripperCommand::move_to(pose.gripper(), effort))
        })
    }

    /// Select a control mode.
    pub fn set_mode(&self, mode: ModeCommand) -> Result<(), ArmError> {
        self.with(|arm| arm.set_mode(mode))
    }
}

impl fmt::Debug for ArmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArmHandle").finish_non_exhaustive()
    }
}
