//! Static pad-layout geometry.
//!
//! A [`PadData`] is loaded once from JSON and immutable thereafter. The
//! relation tables (bracketable pairs, crossover/invert/stretch pairings) are
//! an input to the engine; nothing here synthesizes them from coordinates.

use serde::Deserialize;

use crate::error::Error;
use crate::step_types::{Foot, INVALID_ARROW, NUM_FEET};

/// Vertical displacements count less than horizontal ones: a foot is long and
/// pivots forward/backward more easily than it slides sideways.
pub const Y_TRAVEL_COMPENSATION: f32 = 0.5;

pub const DANCE_SINGLE: &str = "dance-single";
pub const DANCE_DOUBLE: &str = "dance-double";

static DANCE_SINGLE_JSON: &str = include_str!("../data/dance-single.json");
static DANCE_DOUBLE_JSON: &str = include_str!("../data/dance-double.json");

/// How two feet on two distinct arrows relate, read from the relation tables.
///
/// Front/behind is always phrased from the left foot's row: "other in front"
/// means the right foot crosses in front of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    Normal,
    NormalStretch,
    CrossoverOtherInFront,
    CrossoverOtherBehind,
    CrossoverOtherInFrontStretch,
    CrossoverOtherBehindStretch,
    Invert,
    InvertStretch,
    Illegal,
}

impl PairKind {
    #[inline(always)]
    #[must_use]
    pub const fn is_crossover(self) -> bool {
        matches!(
            self,
            Self::CrossoverOtherInFront
                | Self::CrossoverOtherBehind
                | Self::CrossoverOtherInFrontStretch
                | Self::CrossoverOtherBehindStretch
        )
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_invert(self) -> bool {
        matches!(self, Self::Invert | Self::InvertStretch)
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_stretch(self) -> bool {
        matches!(
            self,
            Self::NormalStretch
                | Self::CrossoverOtherInFrontStretch
                | Self::CrossoverOtherBehindStretch
                | Self::InvertStretch
        )
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_crossed(self) -> bool {
        self.is_crossover() || self.is_invert()
    }
}

/// Per-arrow geometry and pairing relations. Every table is indexed
/// `[foot][other_lane]` where `foot` occupies this arrow.
#[derive(Debug, Clone)]
pub struct ArrowData {
    pub lane: usize,
    pub mirrored_lane: usize,
    pub flipped_lane: usize,
    pub x: f32,
    pub y: f32,
    /// Legacy adjacency: lanes a foot on this arrow may step to next.
    pub valid_next_arrows: Vec<bool>,
    /// With `foot` holding this arrow as its toe, lanes its heel may pair with.
    pub bracketable_other_heel: [Vec<bool>; NUM_FEET],
    /// With `foot` holding this arrow as its heel, lanes its toe may pair with.
    pub bracketable_other_toe: [Vec<bool>; NUM_FEET],
    pub other_foot_pairings: [Vec<bool>; NUM_FEET],
    pub other_foot_pairings_stretch: [Vec<bool>; NUM_FEET],
    pub crossover_front: [Vec<bool>; NUM_FEET],
    pub crossover_behind: [Vec<bool>; NUM_FEET],
    pub crossover_front_stretch: [Vec<bool>; NUM_FEET],
    pub crossover_behind_stretch: [Vec<bool>; NUM_FEET],
    pub inverted: [Vec<bool>; NUM_FEET],
    pub inverted_stretch: [Vec<bool>; NUM_FEET],
}

#[derive(Debug, Clone)]
pub struct PadData {
    pub name: String,
    pub arrows: Vec<ArrowData>,
    pub max_bracket_separation: f32,
    /// Default root arrows for Left and Right.
    pub starting_arrows: [usize; NUM_FEET],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ArrowDataJson {
    x: f32,
    y: f32,
    #[serde(default)]
    valid_next_arrows: Option<Vec<bool>>,
    #[serde(default)]
    bracketable_pairings_other_heel: Vec<Vec<bool>>,
    #[serde(default)]
    bracketable_pairings_other_toe: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings_stretch: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings_other_foot_crossover_front: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings_other_foot_crossover_behind: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings_other_foot_crossover_front_stretch: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings_other_foot_crossover_behind_stretch: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings_inverted: Vec<Vec<bool>>,
    #[serde(default)]
    other_foot_pairings_inverted_stretch: Vec<Vec<bool>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PadDataJson {
    name: String,
    #[serde(default)]
    max_bracket_separation: Option<f32>,
    #[serde(default)]
    starting_arrows: Option<[usize; NUM_FEET]>,
    arrows: Vec<ArrowDataJson>,
}

fn table_from_json(
    raw: Vec<Vec<bool>>,
    lanes: usize,
    arrow: usize,
    field: &str,
) -> Result<[Vec<bool>; NUM_FEET], Error> {
    if raw.is_empty() {
        return Ok([vec![false; lanes], vec![false; lanes]]);
    }
    if raw.len() != NUM_FEET {
        return Err(Error::PadData(format!(
            "arrow {arrow}: {field} must have one row per foot, found {}",
            raw.len()
        )));
    }
    let mut out = [vec![false; lanes], vec![false; lanes]];
    for (foot, row) in raw.into_iter().enumerate() {
        if row.len() != lanes {
            return Err(Error::PadData(format!(
                "arrow {arrow}: {field}[{foot}] must have one entry per lane, found {}",
                row.len()
            )));
        }
        out[foot] = row;
    }
    Ok(out)
}

/// Finds the lane whose coordinates match `(x, y)` exactly; falls back to the
/// arrow's own lane when the layout is asymmetric.
fn lane_at(arrows: &[ArrowDataJson], x: f32, y: f32, own: usize) -> usize {
    arrows
        .iter()
        .position(|a| (a.x - x).abs() < f32::EPSILON && (a.y - y).abs() < f32::EPSILON)
        .unwrap_or(own)
}

impl PadData {
    /// Loads one of the stock layouts shipped with the crate.
    pub fn stock(name: &str) -> Result<Self, Error> {
        match name {
            DANCE_SINGLE => Self::from_json(DANCE_SINGLE_JSON),
            DANCE_DOUBLE => Self::from_json(DANCE_DOUBLE_JSON),
            other => Err(Error::PadData(format!("unknown stock pad {other:?}"))),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let raw: PadDataJson = serde_json::from_str(json)?;
        let lanes = raw.arrows.len();
        if lanes == 0 {
            return Err(Error::PadData("a pad needs at least one arrow".into()));
        }

        let max_x = raw.arrows.iter().map(|a| a.x).fold(f32::MIN, f32::max);
        let max_y = raw.arrows.iter().map(|a| a.y).fold(f32::MIN, f32::max);

        let mut arrows = Vec::with_capacity(lanes);
        for (lane, _) in raw.arrows.iter().enumerate() {
            let a = &raw.arrows[lane];
            let mirrored_lane = lane_at(&raw.arrows, max_x - a.x, a.y, lane);
            let flipped_lane = lane_at(&raw.arrows, a.x, max_y - a.y, lane);
            let valid_next_arrows = match &a.valid_next_arrows {
                Some(v) if v.len() == lanes => v.clone(),
                Some(v) => {
                    return Err(Error::PadData(format!(
                        "arrow {lane}: ValidNextArrows must have one entry per lane, found {}",
                        v.len()
                    )));
                }
                None => vec![true; lanes],
            };
            arrows.push(ArrowData {
                lane,
                mirrored_lane,
                flipped_lane,
                x: a.x,
                y: a.y,
                valid_next_arrows,
                bracketable_other_heel: [vec![], vec![]],
                bracketable_other_toe: [vec![], vec![]],
                other_foot_pairings: [vec![], vec![]],
                other_foot_pairings_stretch: [vec![], vec![]],
                crossover_front: [vec![], vec![]],
                crossover_behind: [vec![], vec![]],
                crossover_front_stretch: [vec![], vec![]],
                crossover_behind_stretch: [vec![], vec![]],
                inverted: [vec![], vec![]],
                inverted_stretch: [vec![], vec![]],
            });
        }
        for (lane, a) in raw.arrows.into_iter().enumerate() {
            let slot = &mut arrows[lane];
            slot.bracketable_other_heel = table_from_json(
                a.bracketable_pairings_other_heel,
                lanes,
                lane,
                "BracketablePairingsOtherHeel",
            )?;
            slot.bracketable_other_toe = table_from_json(
                a.bracketable_pairings_other_toe,
                lanes,
                lane,
                "BracketablePairingsOtherToe",
            )?;
            slot.other_foot_pairings =
                table_from_json(a.other_foot_pairings, lanes, lane, "OtherFootPairings")?;
            slot.other_foot_pairings_stretch = table_from_json(
                a.other_foot_pairings_stretch,
                lanes,
                lane,
                "OtherFootPairingsStretch",
            )?;
            slot.crossover_front = table_from_json(
                a.other_foot_pairings_other_foot_crossover_front,
                lanes,
                lane,
                "OtherFootPairingsOtherFootCrossoverFront",
            )?;
            slot.crossover_behind = table_from_json(
                a.other_foot_pairings_other_foot_crossover_behind,
                lanes,
                lane,
                "OtherFootPairingsOtherFootCrossoverBehind",
            )?;
            slot.crossover_front_stretch = table_from_json(
                a.other_foot_pairings_other_foot_crossover_front_stretch,
                lanes,
                lane,
                "OtherFootPairingsOtherFootCrossoverFrontStretch",
            )?;
            slot.crossover_behind_stretch = table_from_json(
                a.other_foot_pairings_other_foot_crossover_behind_stretch,
                lanes,
                lane,
                "OtherFootPairingsOtherFootCrossoverBehindStretch",
            )?;
            slot.inverted = table_from_json(
                a.other_foot_pairings_inverted,
                lanes,
                lane,
                "OtherFootPairingsInverted",
            )?;
            slot.inverted_stretch = table_from_json(
                a.other_foot_pairings_inverted_stretch,
                lanes,
                lane,
                "OtherFootPairingsInvertedStretch",
            )?;
        }

        let starting_arrows = match raw.starting_arrows {
            Some(pair) => {
                for &arrow in &pair {
                    if arrow >= lanes {
                        return Err(Error::PadData(format!(
                            "starting arrow {arrow} out of range for {lanes} lanes"
                        )));
                    }
                }
                pair
            }
            None => default_starting_arrows(&arrows),
        };

        let max_bracket_separation = raw
            .max_bracket_separation
            .unwrap_or_else(|| computed_bracket_separation(&arrows));

        Ok(Self {
            name: raw.name,
            arrows,
            max_bracket_separation,
            starting_arrows,
        })
    }

    #[inline(always)]
    #[must_use]
    pub fn num_arrows(&self) -> usize {
        self.arrows.len()
    }

    /// Distance between two points with Y displacement discounted.
    #[inline(always)]
    #[must_use]
    pub fn distance(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
        let dx = x2 - x1;
        let dy = (y2 - y1) * Y_TRAVEL_COMPENSATION;
        (dx * dx + dy * dy).sqrt()
    }

    #[inline(always)]
    #[must_use]
    pub fn arrow_distance(&self, a: usize, b: usize) -> f32 {
        let pa = &self.arrows[a];
        let pb = &self.arrows[b];
        self.distance(pa.x, pa.y, pb.x, pb.y)
    }

    /// Whether `foot` may bracket with its heel on `heel_arrow` and its toe on
    /// `toe_arrow`.
    #[inline(always)]
    #[must_use]
    pub fn is_bracketable_pair(&self, foot: Foot, heel_arrow: usize, toe_arrow: usize) -> bool {
        heel_arrow != toe_arrow
            && self.arrows[heel_arrow].bracketable_other_toe[foot as usize][toe_arrow]
    }

    /// Whether a foot resting on `from` may step to `to` per the legacy
    /// adjacency table. Feet entering from off the pad may go anywhere.
    #[inline(always)]
    #[must_use]
    pub fn is_valid_next(&self, from: isize, to: usize) -> bool {
        from == INVALID_ARROW || self.arrows[from as usize].valid_next_arrows[to]
    }

    /// Classifies the relation of the left foot on `left_arrow` and the right
    /// foot on `right_arrow`, reading the left foot's tables.
    #[must_use]
    pub fn classify_pair(&self, left_arrow: isize, right_arrow: isize) -> PairKind {
        if left_arrow == INVALID_ARROW || right_arrow == INVALID_ARROW {
            return PairKind::Normal;
        }
        if left_arrow == right_arrow {
            // Shared arrows occur mid-swap; the pair itself is not crossed.
            return PairKind::Normal;
        }
        let t = &self.arrows[left_arrow as usize];
        let f = Foot::Left as usize;
        let b = right_arrow as usize;
        if t.other_foot_pairings[f][b] {
            PairKind::Normal
        } else if t.other_foot_pairings_stretch[f][b] {
            PairKind::NormalStretch
        } else if t.crossover_front[f][b] {
            PairKind::CrossoverOtherInFront
        } else if t.crossover_behind[f][b] {
            PairKind::CrossoverOtherBehind
        } else if t.crossover_front_stretch[f][b] {
            PairKind::CrossoverOtherInFrontStretch
        } else if t.crossover_behind_stretch[f][b] {
            PairKind::CrossoverOtherBehindStretch
        } else if t.inverted[f][b] {
            PairKind::Invert
        } else if t.inverted_stretch[f][b] {
            PairKind::InvertStretch
        } else {
            PairKind::Illegal
        }
    }
}

fn default_starting_arrows(arrows: &[ArrowData]) -> [usize; NUM_FEET] {
    let mut left = 0;
    let mut right = 0;
    for (lane, a) in arrows.iter().enumerate() {
        if a.x < arrows[left].x {
            left = lane;
        }
        if a.x > arrows[right].x {
            right = lane;
        }
    }
    [left, right]
}

fn computed_bracket_separation(arrows: &[ArrowData]) -> f32 {
    let mut max = 0.0f32;
    for a in arrows {
        for foot in 0..NUM_FEET {
            for (other, &ok) in a.bracketable_other_toe[foot].iter().enumerate() {
                if ok {
                    let o = &arrows[other];
                    let dx = o.x - a.x;
                    let dy = (o.y - a.y) * Y_TRAVEL_COMPENSATION;
                    max = max.max((dx * dx + dy * dy).sqrt());
                }
            }
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dance_single_loads_with_mirrors_and_flips() {
        let pad = PadData::stock(DANCE_SINGLE).unwrap();
        assert_eq!(pad.num_arrows(), 4);
        // Left <-> Right under mirroring, Down <-> Up under flipping.
        assert_eq!(pad.arrows[0].mirrored_lane, 3);
        assert_eq!(pad.arrows[3].mirrored_lane, 0);
        assert_eq!(pad.arrows[1].flipped_lane, 2);
        assert_eq!(pad.arrows[2].flipped_lane, 1);
        assert_eq!(pad.starting_arrows, [0, 3]);
    }

    #[test]
    fn dance_single_pair_classification() {
        let pad = PadData::stock(DANCE_SINGLE).unwrap();
        // Home position is a normal pairing.
        assert_eq!(pad.classify_pair(0, 3), PairKind::Normal);
        // Fully crossed feet are inverted.
        assert_eq!(pad.classify_pair(3, 0), PairKind::Invert);
        // Left foot on Down with right foot on Left is a crossover; the right
        // foot sits in front of the left (Down is behind Left).
        assert!(pad.classify_pair(1, 0).is_crossover());
        // No stretch pairs exist on a single pad.
        for a in 0..4isize {
            for b in 0..4isize {
                assert!(!pad.classify_pair(a, b).is_stretch());
            }
        }
    }

    #[test]
    fn dance_single_brackets_are_the_four_corner_pairs() {
        let pad = PadData::stock(DANCE_SINGLE).unwrap();
        for foot in crate::step_types::FEET {
            // Heel on Left may pair with toe on Up; heel on Down with toe on
            // Left or Right; heel on Right with toe on Up.
            assert!(pad.is_bracketable_pair(foot, 0, 2));
            assert!(pad.is_bracketable_pair(foot, 1, 0));
            assert!(pad.is_bracketable_pair(foot, 1, 3));
            assert!(pad.is_bracketable_pair(foot, 3, 2));
            // Left/Right and Down/Up are too far apart to bracket.
            assert!(!pad.is_bracketable_pair(foot, 0, 3));
            assert!(!pad.is_bracketable_pair(foot, 1, 2));
        }
    }

    #[test]
    fn dance_double_loads_with_stretch_pairs() {
        let pad = PadData::stock(DANCE_DOUBLE).unwrap();
        assert_eq!(pad.num_arrows(), 8);
        // Left-pad Left to right-pad Left is the classic stretch.
        assert_eq!(pad.classify_pair(0, 4), PairKind::NormalStretch);
        // Across the middle is a normal pairing.
        assert_eq!(pad.classify_pair(3, 4), PairKind::Normal);
    }
}
