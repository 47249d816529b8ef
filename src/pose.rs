//! The [`Pose`] is the unit everything else in this crate moves around: six
//! joint angles and one gripper opening, all integers in thousandths of a
//! degree (or of a millimetre for the gripper).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of joints on a Piper arm.
pub const JOINT_COUNT: usize = 6;

/// Number of components in a [`Pose`].
pub const POSE_LEN: usize = JOINT_COUNT + 1;

/// Index of the gripper component inside a [`Pose`].
pub const GRIPPER: usize = JOINT_COUNT;

/// A snapshot of the six joints and the gripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pose(pub [i32; POSE_LEN]);

impl Pose {
    /// The all-zero pose. Hardware reports this while the link is still
    /// coming up, so it is never treated as a real reading.
    pub const ZERO: Pose = Pose([0; POSE_LEN]);

    /// Assemble a pose from joint angles and a gripper opening.
    pub fn new(joints: [i32; JOINT_COUNT], gripper: i32) -> Self {
        let mut values = [0; POSE_LEN];
        values[..JOINT_COUNT].copy_from_slice(&joints);
        values[GRIPPER] = gripper;
        Pose(values)
    }

    /// The six joint angles.
    pub fn joints(&self) -> [i32; JOINT_COUNT] {
        let mut joints = [0; JOINT_COUNT];
        joints.copy_from_slice(&self.0[..JOINT_COUNT]);
        joints
    }

    /// The gripper opening.
    pub fn gripper(&self) -> i32 {
        self.0[GRIPPER]
    }

    /// A copy of this pose with the gripper replaced.
    pub fn with_gripper(mut self, gripper: i32) -> Self {
        self.0[GRIPPER] = gripper;
        self
    }

    /// A copy of this pose with one component replaced.
    pub fn with_component(mut self, index: usize, value: i32) -> Self {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
        self
    }

    /// Component `index`, or `None` past the gripper.
    pub fn get(&self, index: usize) -> Option<i32> {
        self.0.get(index).copied()
    }

    /// True when every component reads zero.
    pub fn is_all_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0)
    }

    /// Linear interpolation from `self` to `end`, `step` out of `steps`.
    ///
    /// The arithmetic stays in integers so that `step == steps` lands exactly
    /// on `end` and `step == 0` exactly on `self`.
    pub fn lerp(&self, end: &Pose, step: usize, steps: usize) -> Pose {
        if steps == 0 || step >= steps {
            return *end;
        }
        let mut out = [0; POSE_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            let start = self.0[i] as i64;
            let diff = end.0[i] as i64 - start;
            *slot = (start + diff * step as i64 / steps as i64) as i32;
        }
        Pose(out)
    }
}

impl From<[i32; POSE_LEN]> for Pose {
    fn from(values: [i32; POSE_LEN]) -> Self {
        Pose(values)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}
