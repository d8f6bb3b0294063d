//! Step-type vocabulary and per-step metadata.
//!
//! Every transition in a step graph is labeled per foot portion with a
//! [`StepType`] and a [`FootAction`]. The ordinals of these enums are a
//! compatibility surface of the binary graph format: any reordering or
//! insertion requires bumping [`crate::graph_io::STEP_GRAPH_VERSION`].

use std::str::FromStr;
use std::sync::LazyLock;

pub const NUM_FEET: usize = 2;
pub const NUM_FOOT_PORTIONS: usize = 2;
pub const DEFAULT_PORTION: usize = 0;
pub const INVALID_ARROW: isize = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum Foot {
    Left = 0,
    Right = 1,
}

pub const FEET: [Foot; NUM_FEET] = [Foot::Left, Foot::Right];

impl Foot {
    #[inline(always)]
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    #[inline(always)]
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        if index == 0 { Self::Left } else { Self::Right }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum FootPortion {
    Heel = 0,
    Toe = 1,
}

pub const FOOT_PORTIONS: [FootPortion; NUM_FOOT_PORTIONS] = [FootPortion::Heel, FootPortion::Toe];

impl FootPortion {
    #[inline(always)]
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Heel => Self::Toe,
            Self::Toe => Self::Heel,
        }
    }
}

/// What a foot portion is doing to its arrow during one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum FootAction {
    #[default]
    Tap = 0,
    Hold = 1,
    Release = 2,
}

pub const NUM_FOOT_ACTIONS: usize = 3;

/// Where a foot portion stands relative to an arrow inside a graph node.
///
/// `Lifted` is a memory of footing, never a contact: the portion hovers over
/// an arrow the other foot has swapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum GraphArrowState {
    #[default]
    Resting = 0,
    Held = 1,
    Lifted = 2,
}

pub const NUM_GRAPH_ARROW_STATES: usize = 3;

/// The arrow state a portion ends in after performing an action.
#[inline(always)]
#[must_use]
pub const fn state_after_action(action: FootAction) -> GraphArrowState {
    match action {
        FootAction::Tap | FootAction::Release => GraphArrowState::Resting,
        FootAction::Hold => GraphArrowState::Held,
    }
}

/// Surface-level flavor of a performed step. Annotates transitions without
/// changing the search topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum InstanceStepType {
    #[default]
    Default = 0,
    Roll = 1,
    Fake = 2,
    Lift = 3,
}

/// Labels for every classified transition of one foot.
///
/// Bracket step types occupy both portion slots of their foot in a
/// [`crate::graph::GraphLink`]; one-arrow brackets occupy the acting portion;
/// all other types occupy the default portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum StepType {
    #[default]
    SameArrow = 0,
    NewArrow = 1,
    NewArrowStretch = 2,
    CrossoverFront = 3,
    CrossoverBehind = 4,
    CrossoverFrontStretch = 5,
    CrossoverBehindStretch = 6,
    InvertFront = 7,
    InvertBehind = 8,
    InvertFrontStretch = 9,
    InvertBehindStretch = 10,
    FootSwap = 11,
    FootSwapCrossoverFront = 12,
    FootSwapCrossoverBehind = 13,
    FootSwapInvertFront = 14,
    FootSwapInvertBehind = 15,
    Swing = 16,
    BracketOneArrowHeelSame = 17,
    BracketOneArrowHeelNew = 18,
    BracketOneArrowHeelSwap = 19,
    BracketOneArrowToeSame = 20,
    BracketOneArrowToeNew = 21,
    BracketOneArrowToeSwap = 22,
    BracketHeelNewToeNew = 23,
    BracketHeelNewToeSame = 24,
    BracketHeelNewToeSwap = 25,
    BracketHeelSameToeNew = 26,
    BracketHeelSameToeSame = 27,
    BracketHeelSameToeSwap = 28,
    BracketHeelSwapToeNew = 29,
    BracketHeelSwapToeSame = 30,
    BracketHeelSwapToeSwap = 31,
    BracketCrossoverFrontHeelNewToeNew = 32,
    BracketCrossoverFrontHeelNewToeSame = 33,
    BracketCrossoverFrontHeelSameToeNew = 34,
    BracketCrossoverBehindHeelNewToeNew = 35,
    BracketCrossoverBehindHeelNewToeSame = 36,
    BracketCrossoverBehindHeelSameToeNew = 37,
    BracketInvertFrontHeelNewToeNew = 38,
    BracketInvertFrontHeelNewToeSame = 39,
    BracketInvertFrontHeelSameToeNew = 40,
    BracketInvertBehindHeelNewToeNew = 41,
    BracketInvertBehindHeelNewToeSame = 42,
    BracketInvertBehindHeelSameToeNew = 43,
    BracketStretchHeelNewToeNew = 44,
    BracketStretchHeelNewToeSame = 45,
    BracketStretchHeelSameToeNew = 46,
    BracketSwing = 47,
}

pub const NUM_STEP_TYPES: usize = 48;

pub const STEP_TYPES: [StepType; NUM_STEP_TYPES] = [
    StepType::SameArrow,
    StepType::NewArrow,
    StepType::NewArrowStretch,
    StepType::CrossoverFront,
    StepType::CrossoverBehind,
    StepType::CrossoverFrontStretch,
    StepType::CrossoverBehindStretch,
    StepType::InvertFront,
    StepType::InvertBehind,
    StepType::InvertFrontStretch,
    StepType::InvertBehindStretch,
    StepType::FootSwap,
    StepType::FootSwapCrossoverFront,
    StepType::FootSwapCrossoverBehind,
    StepType::FootSwapInvertFront,
    StepType::FootSwapInvertBehind,
    StepType::Swing,
    StepType::BracketOneArrowHeelSame,
    StepType::BracketOneArrowHeelNew,
    StepType::BracketOneArrowHeelSwap,
    StepType::BracketOneArrowToeSame,
    StepType::BracketOneArrowToeNew,
    StepType::BracketOneArrowToeSwap,
    StepType::BracketHeelNewToeNew,
    StepType::BracketHeelNewToeSame,
    StepType::BracketHeelNewToeSwap,
    StepType::BracketHeelSameToeNew,
    StepType::BracketHeelSameToeSame,
    StepType::BracketHeelSameToeSwap,
    StepType::BracketHeelSwapToeNew,
    StepType::BracketHeelSwapToeSame,
    StepType::BracketHeelSwapToeSwap,
    StepType::BracketCrossoverFrontHeelNewToeNew,
    StepType::BracketCrossoverFrontHeelNewToeSame,
    StepType::BracketCrossoverFrontHeelSameToeNew,
    StepType::BracketCrossoverBehindHeelNewToeNew,
    StepType::BracketCrossoverBehindHeelNewToeSame,
    StepType::BracketCrossoverBehindHeelSameToeNew,
    StepType::BracketInvertFrontHeelNewToeNew,
    StepType::BracketInvertFrontHeelNewToeSame,
    StepType::BracketInvertFrontHeelSameToeNew,
    StepType::BracketInvertBehindHeelNewToeNew,
    StepType::BracketInvertBehindHeelNewToeSame,
    StepType::BracketInvertBehindHeelSameToeNew,
    StepType::BracketStretchHeelNewToeNew,
    StepType::BracketStretchHeelNewToeSame,
    StepType::BracketStretchHeelSameToeNew,
    StepType::BracketSwing,
];

impl StepType {
    #[inline(always)]
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    #[must_use]
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        STEP_TYPES.get(ordinal as usize).copied()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        STEP_TYPE_NAMES[self as usize]
    }
}

const STEP_TYPE_NAMES: [&str; NUM_STEP_TYPES] = [
    "SameArrow",
    "NewArrow",
    "NewArrowStretch",
    "CrossoverFront",
    "CrossoverBehind",
    "CrossoverFrontStretch",
    "CrossoverBehindStretch",
    "InvertFront",
    "InvertBehind",
    "InvertFrontStretch",
    "InvertBehindStretch",
    "FootSwap",
    "FootSwapCrossoverFront",
    "FootSwapCrossoverBehind",
    "FootSwapInvertFront",
    "FootSwapInvertBehind",
    "Swing",
    "BracketOneArrowHeelSame",
    "BracketOneArrowHeelNew",
    "BracketOneArrowHeelSwap",
    "BracketOneArrowToeSame",
    "BracketOneArrowToeNew",
    "BracketOneArrowToeSwap",
    "BracketHeelNewToeNew",
    "BracketHeelNewToeSame",
    "BracketHeelNewToeSwap",
    "BracketHeelSameToeNew",
    "BracketHeelSameToeSame",
    "BracketHeelSameToeSwap",
    "BracketHeelSwapToeNew",
    "BracketHeelSwapToeSame",
    "BracketHeelSwapToeSwap",
    "BracketCrossoverFrontHeelNewToeNew",
    "BracketCrossoverFrontHeelNewToeSame",
    "BracketCrossoverFrontHeelSameToeNew",
    "BracketCrossoverBehindHeelNewToeNew",
    "BracketCrossoverBehindHeelNewToeSame",
    "BracketCrossoverBehindHeelSameToeNew",
    "BracketInvertFrontHeelNewToeNew",
    "BracketInvertFrontHeelNewToeSame",
    "BracketInvertFrontHeelSameToeNew",
    "BracketInvertBehindHeelNewToeNew",
    "BracketInvertBehindHeelNewToeSame",
    "BracketInvertBehindHeelSameToeNew",
    "BracketStretchHeelNewToeNew",
    "BracketStretchHeelNewToeSame",
    "BracketStretchHeelSameToeNew",
    "BracketSwing",
];

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STEP_TYPE_NAMES
            .iter()
            .position(|&name| name == s)
            .map(|i| STEP_TYPES[i])
            .ok_or_else(|| format!("unknown StepType {s:?}"))
    }
}

/// What one foot portion does to its arrow for a given step type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortionMove {
    /// The portion does not act.
    None,
    /// The portion acts on the arrow it already occupies.
    Same,
    /// The portion acts on an arrow it was not occupying.
    New,
    /// The portion acts on an arrow occupied by the other foot, lifting it.
    Swap,
}

/// Static per-step-type metadata consulted by graph construction and both
/// chart searches.
#[derive(Debug, Clone, Copy)]
pub struct StepData {
    pub step_type: StepType,
    /// What each portion of the acting foot does. Non-bracket types use only
    /// the default portion.
    pub portion_moves: [PortionMove; NUM_FOOT_PORTIONS],
    /// Both portions act on two arrows at once.
    pub is_bracket: bool,
    /// One portion acts while the other stays planted.
    pub is_one_arrow_bracket: bool,
    pub can_be_used_in_jump: bool,
    pub is_crossover: bool,
    pub is_invert: bool,
    pub is_stretch: bool,
    pub is_swing: bool,
    pub is_swap: bool,
}

impl StepData {
    #[inline(always)]
    #[must_use]
    pub fn num_acting_portions(&self) -> usize {
        self.portion_moves
            .iter()
            .filter(|m| !matches!(m, PortionMove::None))
            .count()
    }
}

fn build_step_data(step_type: StepType) -> StepData {
    use PortionMove::{New, None, Same, Swap};
    use StepType as S;

    let portion_moves = match step_type {
        S::SameArrow => [Same, None],
        S::NewArrow
        | S::NewArrowStretch
        | S::CrossoverFront
        | S::CrossoverBehind
        | S::CrossoverFrontStretch
        | S::CrossoverBehindStretch
        | S::InvertFront
        | S::InvertBehind
        | S::InvertFrontStretch
        | S::InvertBehindStretch
        | S::Swing => [New, None],
        S::FootSwap
        | S::FootSwapCrossoverFront
        | S::FootSwapCrossoverBehind
        | S::FootSwapInvertFront
        | S::FootSwapInvertBehind => [Swap, None],
        S::BracketOneArrowHeelSame => [Same, None],
        S::BracketOneArrowHeelNew => [New, None],
        S::BracketOneArrowHeelSwap => [Swap, None],
        S::BracketOneArrowToeSame => [None, Same],
        S::BracketOneArrowToeNew => [None, New],
        S::BracketOneArrowToeSwap => [None, Swap],
        S::BracketHeelNewToeNew
        | S::BracketCrossoverFrontHeelNewToeNew
        | S::BracketCrossoverBehindHeelNewToeNew
        | S::BracketInvertFrontHeelNewToeNew
        | S::BracketInvertBehindHeelNewToeNew
        | S::BracketStretchHeelNewToeNew
        | S::BracketSwing => [New, New],
        S::BracketHeelNewToeSame
        | S::BracketCrossoverFrontHeelNewToeSame
        | S::BracketCrossoverBehindHeelNewToeSame
        | S::BracketInvertFrontHeelNewToeSame
        | S::BracketInvertBehindHeelNewToeSame
        | S::BracketStretchHeelNewToeSame => [New, Same],
        S::BracketHeelNewToeSwap => [New, Swap],
        S::BracketHeelSameToeNew
        | S::BracketCrossoverFrontHeelSameToeNew
        | S::BracketCrossoverBehindHeelSameToeNew
        | S::BracketInvertFrontHeelSameToeNew
        | S::BracketInvertBehindHeelSameToeNew
        | S::BracketStretchHeelSameToeNew => [Same, New],
        S::BracketHeelSameToeSame => [Same, Same],
        S::BracketHeelSameToeSwap => [Same, Swap],
        S::BracketHeelSwapToeNew => [Swap, New],
        S::BracketHeelSwapToeSame => [Swap, Same],
        S::BracketHeelSwapToeSwap => [Swap, Swap],
    };

    let is_one_arrow_bracket = matches!(
        step_type,
        S::BracketOneArrowHeelSame
            | S::BracketOneArrowHeelNew
            | S::BracketOneArrowHeelSwap
            | S::BracketOneArrowToeSame
            | S::BracketOneArrowToeNew
            | S::BracketOneArrowToeSwap
    );
    let is_bracket = !is_one_arrow_bracket
        && portion_moves
            .iter()
            .all(|m| !matches!(m, PortionMove::None));

    let is_crossover = matches!(
        step_type,
        S::CrossoverFront
            | S::CrossoverBehind
            | S::CrossoverFrontStretch
            | S::CrossoverBehindStretch
            | S::FootSwapCrossoverFront
            | S::FootSwapCrossoverBehind
            | S::BracketCrossoverFrontHeelNewToeNew
            | S::BracketCrossoverFrontHeelNewToeSame
            | S::BracketCrossoverFrontHeelSameToeNew
            | S::BracketCrossoverBehindHeelNewToeNew
            | S::BracketCrossoverBehindHeelNewToeSame
            | S::BracketCrossoverBehindHeelSameToeNew
    );
    let is_invert = matches!(
        step_type,
        S::InvertFront
            | S::InvertBehind
            | S::InvertFrontStretch
            | S::InvertBehindStretch
            | S::FootSwapInvertFront
            | S::FootSwapInvertBehind
            | S::BracketInvertFrontHeelNewToeNew
            | S::BracketInvertFrontHeelNewToeSame
            | S::BracketInvertFrontHeelSameToeNew
            | S::BracketInvertBehindHeelNewToeNew
            | S::BracketInvertBehindHeelNewToeSame
            | S::BracketInvertBehindHeelSameToeNew
    );
    let is_stretch = matches!(
        step_type,
        S::NewArrowStretch
            | S::CrossoverFrontStretch
            | S::CrossoverBehindStretch
            | S::InvertFrontStretch
            | S::InvertBehindStretch
            | S::BracketStretchHeelNewToeNew
            | S::BracketStretchHeelNewToeSame
            | S::BracketStretchHeelSameToeNew
    );
    let is_swing = matches!(step_type, S::Swing | S::BracketSwing);
    let is_swap = portion_moves.iter().any(|m| matches!(m, PortionMove::Swap));

    // Crossed, swung and swapping steps need the whole body; they cannot be
    // half of a jump.
    let can_be_used_in_jump = !is_crossover && !is_invert && !is_swing && !is_swap;

    StepData {
        step_type,
        portion_moves,
        is_bracket,
        is_one_arrow_bracket,
        can_be_used_in_jump,
        is_crossover,
        is_invert,
        is_stretch,
        is_swing,
        is_swap,
    }
}

static STEP_DATA: LazyLock<[StepData; NUM_STEP_TYPES]> =
    LazyLock::new(|| std::array::from_fn(|i| build_step_data(STEP_TYPES[i])));

/// Metadata for one step type. The table is computed once at first use and
/// never mutated.
#[inline(always)]
#[must_use]
pub fn step_data(step_type: StepType) -> &'static StepData {
    &STEP_DATA[step_type as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_round_trip_through_the_table() {
        for (i, &step_type) in STEP_TYPES.iter().enumerate() {
            assert_eq!(step_type.ordinal() as usize, i);
            assert_eq!(StepType::from_ordinal(i as u8), Some(step_type));
        }
        assert_eq!(StepType::from_ordinal(NUM_STEP_TYPES as u8), None);
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for &step_type in &STEP_TYPES {
            assert_eq!(step_type.name().parse::<StepType>(), Ok(step_type));
        }
        assert!("NotAStep".parse::<StepType>().is_err());
    }

    #[test]
    fn brackets_act_on_both_portions() {
        for &step_type in &STEP_TYPES {
            let data = step_data(step_type);
            if data.is_bracket {
                assert_eq!(data.num_acting_portions(), NUM_FOOT_PORTIONS);
            }
            if data.is_one_arrow_bracket {
                assert_eq!(data.num_acting_portions(), 1);
            }
        }
    }

    #[test]
    fn crossed_steps_are_never_jump_halves() {
        for &step_type in &STEP_TYPES {
            let data = step_data(step_type);
            if data.is_crossover || data.is_invert || data.is_swing || data.is_swap {
                assert!(!data.can_be_used_in_jump, "{}", step_type.name());
            }
        }
    }
}
