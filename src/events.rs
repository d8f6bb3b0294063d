//! Format-neutral chart events.
//!
//! Inputs arrive as an ordered stream of [`NoteEvent`]s; outputs leave as
//! position-ordered [`ChartOutputNote`]s. Parsing simfile formats into these
//! shapes is a collaborator's job, not this crate's.

use crate::step_types::InstanceStepType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Tap,
    HoldStart,
    RollStart,
    HoldEnd,
    Fake,
    Lift,
    Mine,
}

/// One note of the source chart. Events must be ordered by
/// `(position, time)`; events sharing a position form one chart row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub position: i32,
    pub time: f64,
    pub lane: usize,
    pub kind: NoteKind,
    pub player: u8,
}

impl NoteEvent {
    #[must_use]
    pub const fn new(position: i32, time: f64, lane: usize, kind: NoteKind) -> Self {
        Self {
            position,
            time,
            lane,
            kind,
            player: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneTapNote {
    pub position: i32,
    pub lane: usize,
    /// Default, Fake or Lift.
    pub flavor: InstanceStepType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneHoldStartNote {
    pub position: i32,
    pub lane: usize,
    pub roll: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneHoldEndNote {
    pub position: i32,
    pub lane: usize,
}

/// A mine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneNote {
    pub position: i32,
    pub lane: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartOutputNote {
    Tap(LaneTapNote),
    HoldStart(LaneHoldStartNote),
    HoldEnd(LaneHoldEndNote),
    Mine(LaneNote),
}

impl ChartOutputNote {
    #[inline(always)]
    #[must_use]
    pub const fn position(&self) -> i32 {
        match self {
            Self::Tap(n) => n.position,
            Self::HoldStart(n) => n.position,
            Self::HoldEnd(n) => n.position,
            Self::Mine(n) => n.position,
        }
    }

    #[inline(always)]
    #[must_use]
    pub const fn lane(&self) -> usize {
        match self {
            Self::Tap(n) => n.lane,
            Self::HoldStart(n) => n.lane,
            Self::HoldEnd(n) => n.lane,
            Self::Mine(n) => n.lane,
        }
    }
}
