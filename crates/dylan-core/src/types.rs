//! Skeleton and encoding-domain types shared by the model crates.

use serde::{Deserialize, Serialize};

/// Axis along which positional indices vary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Position index is the frame number, replicated across joints
    Temporal,
    /// Position index is the joint's cell in a 2D layout, replicated across frames
    Spatial,
}

/// Finger of a hand skeleton, ordered thumb to little finger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Finger {
    Thumb = 0,
    Index = 1,
    Middle = 2,
    Ring = 3,
    Pinky = 4,
}

/// 22-joint hand skeleton (wrist, palm, then four joints per finger from base to tip)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HandJoint {
    Wrist = 0,
    Palm = 1,
    ThumbBase = 2,
    ThumbFirst = 3,
    ThumbSecond = 4,
    ThumbTip = 5,
    IndexBase = 6,
    IndexFirst = 7,
    IndexSecond = 8,
    IndexTip = 9,
    MiddleBase = 10,
    MiddleFirst = 11,
    MiddleSecond = 12,
    MiddleTip = 13,
    RingBase = 14,
    RingFirst = 15,
    RingSecond = 16,
    RingTip = 17,
    PinkyBase = 18,
    PinkyFirst = 19,
    PinkySecond = 20,
    PinkyTip = 21,
}

impl HandJoint {
    pub const COUNT: usize = 22;

    const ALL: [HandJoint; Self::COUNT] = [
        Self::Wrist,
        Self::Palm,
        Self::ThumbBase,
        Self::ThumbFirst,
        Self::ThumbSecond,
        Self::ThumbTip,
        Self::IndexBase,
        Self::IndexFirst,
        Self::IndexSecond,
        Self::IndexTip,
        Self::MiddleBase,
        Self::MiddleFirst,
        Self::MiddleSecond,
        Self::MiddleTip,
        Self::RingBase,
        Self::RingFirst,
        Self::RingSecond,
        Self::RingTip,
        Self::PinkyBase,
        Self::PinkyFirst,
        Self::PinkySecond,
        Self::PinkyTip,
    ];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn finger(&self) -> Option<Finger> {
        match *self as u8 {
            0 | 1 => None,
            i => Some(match (i - 2) / 4 {
                0 => Finger::Thumb,
                1 => Finger::Index,
                2 => Finger::Middle,
                3 => Finger::Ring,
                _ => Finger::Pinky,
            }),
        }
    }

    /// Position along the finger chain, 0 at the base and 3 at the tip
    pub fn depth(&self) -> Option<usize> {
        self.finger().map(|_| (*self as usize - 2) % 4)
    }

    /// Cell of the 6x5 hand grid: fingers are columns, the chain runs down the rows,
    /// wrist and palm sit above the middle finger.
    pub fn grid_cell(&self) -> GridCell {
        match (self.finger(), self.depth()) {
            (Some(finger), Some(depth)) => GridCell::new(2 + depth, finger as usize),
            _ => GridCell::new(*self as usize, Finger::Middle as usize),
        }
    }
}

/// Row/column cell in a 2D joint layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

impl GridCell {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Placement of joints on the grid used by the spatial positional encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointLayout {
    /// Anatomical hand layout for the 22-joint skeleton
    Hand,
    /// Joints filled row by row into a `rows x cols` grid
    RowMajor { rows: usize, cols: usize },
}

impl JointLayout {
    const HAND_ROWS: usize = 6;
    const HAND_COLS: usize = 5;

    /// Hand layout for 22 joints, otherwise the smallest near-square row-major grid
    pub fn for_joint_count(joints: usize) -> Self {
        if joints == HandJoint::COUNT {
            return Self::Hand;
        }
        let cols = ((joints as f64).sqrt().ceil() as usize).max(1);
        let rows = joints.div_ceil(cols).max(1);
        Self::RowMajor { rows, cols }
    }

    /// Grid size as (rows, cols)
    pub fn grid_dims(&self) -> (usize, usize) {
        match *self {
            Self::Hand => (Self::HAND_ROWS, Self::HAND_COLS),
            Self::RowMajor { rows, cols } => (rows, cols),
        }
    }

    pub fn capacity(&self) -> usize {
        let (rows, cols) = self.grid_dims();
        rows * cols
    }

    pub fn cell(&self, joint: usize) -> Option<GridCell> {
        match *self {
            Self::Hand => HandJoint::from_index(joint).map(|j| j.grid_cell()),
            Self::RowMajor { rows, cols } => {
                (joint < rows * cols).then(|| GridCell::new(joint / cols, joint % cols))
            }
        }
    }
}
