//! Body-state graph construction.
//!
//! A [`StepGraph`] enumerates every physically valid two-foot state on a pad
//! and labels the transitions between them with [`StepType`]s and
//! [`FootAction`]s. Construction is exhaustive: candidate states are walked as
//! base-M numerals, invalid ones rejected, and every ordered pair of surviving
//! nodes classified for reachable transitions.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::info;

use crate::error::Error;
use crate::pad::{PadData, PairKind};
use crate::step_types::{
    Foot, FootAction, GraphArrowState, InstanceStepType, PortionMove, StepType, FEET,
    INVALID_ARROW, NUM_FEET, NUM_FOOT_PORTIONS,
};

const HEEL: usize = 0;
const TOE: usize = 1;

/// One foot portion's relation to the pad inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FootArrowState {
    pub arrow: isize,
    pub state: GraphArrowState,
}

impl Default for FootArrowState {
    fn default() -> Self {
        Self {
            arrow: INVALID_ARROW,
            state: GraphArrowState::Resting,
        }
    }
}

impl FootArrowState {
    #[inline(always)]
    #[must_use]
    pub const fn new(arrow: isize, state: GraphArrowState) -> Self {
        Self { arrow, state }
    }

    /// Resting or Held on a valid arrow. Lifted portions hover and never
    /// count as contact.
    #[inline(always)]
    #[must_use]
    pub const fn is_contact(&self) -> bool {
        self.arrow != INVALID_ARROW
            && matches!(self.state, GraphArrowState::Resting | GraphArrowState::Held)
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.arrow != INVALID_ARROW
    }
}

/// Foot-by-portion matrix describing where the body stands.
pub type StateMatrix = [[FootArrowState; NUM_FOOT_PORTIONS]; NUM_FEET];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BodyOrientation {
    #[default]
    Normal = 0,
    InvertedLeftOverRight = 1,
    InvertedRightOverLeft = 2,
}

impl BodyOrientation {
    #[inline(always)]
    #[must_use]
    pub const fn is_inverted(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// One slot of a [`GraphLink`]: what a single foot portion does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GraphLinkStep {
    pub valid: bool,
    pub step: StepType,
    pub action: FootAction,
}

/// The labeled transition between two nodes: a step/action per foot portion.
/// A blank link (no valid slots) represents a deliberately dropped step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GraphLink {
    pub steps: [[GraphLinkStep; NUM_FOOT_PORTIONS]; NUM_FEET],
}

impl GraphLink {
    #[inline(always)]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.steps.iter().flatten().all(|s| !s.valid)
    }

    #[must_use]
    pub fn foot_is_valid(&self, foot: Foot) -> bool {
        self.steps[foot as usize].iter().any(|s| s.valid)
    }

    /// Both feet carry valid steps.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        self.foot_is_valid(Foot::Left) && self.foot_is_valid(Foot::Right)
    }

    /// Every valid slot is a release.
    #[must_use]
    pub fn is_release(&self) -> bool {
        let mut any = false;
        for s in self.steps.iter().flatten() {
            if s.valid {
                if s.action != FootAction::Release {
                    return false;
                }
                any = true;
            }
        }
        any
    }

    /// The step type of a foot, taken from its first valid slot.
    #[must_use]
    pub fn foot_step_type(&self, foot: Foot) -> Option<StepType> {
        self.steps[foot as usize]
            .iter()
            .find(|s| s.valid)
            .map(|s| s.step)
    }

    #[must_use]
    pub fn num_valid_slots(&self) -> usize {
        self.steps.iter().flatten().filter(|s| s.valid).count()
    }

    /// Smallest step ordinal among valid slots, used by search tie-breaking.
    #[must_use]
    pub fn min_step_ordinal(&self) -> u8 {
        self.steps
            .iter()
            .flatten()
            .filter(|s| s.valid)
            .map(|s| s.step.ordinal())
            .min()
            .unwrap_or(u8::MAX)
    }
}

/// A [`GraphLink`] plus surface flavor per portion (roll/fake/lift). The
/// annotation never changes search topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GraphLinkInstance {
    pub link: GraphLink,
    pub instance_types: [[InstanceStepType; NUM_FOOT_PORTIONS]; NUM_FEET],
}

impl GraphLinkInstance {
    #[inline(always)]
    #[must_use]
    pub const fn new(link: GraphLink) -> Self {
        Self {
            link,
            instance_types: [[InstanceStepType::Default; NUM_FOOT_PORTIONS]; NUM_FEET],
        }
    }
}

/// A body state plus its outgoing labeled edges. Equality is structural over
/// (matrix, orientation); edges are keyed by link and may fan out to several
/// children when different future-state resolutions exist.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub state: StateMatrix,
    pub orientation: BodyOrientation,
    /// Sorted by link for deterministic traversal.
    pub links: Vec<(GraphLink, Vec<usize>)>,
}

impl GraphNode {
    #[inline(always)]
    #[must_use]
    pub fn key(&self) -> (StateMatrix, BodyOrientation) {
        (self.state, self.orientation)
    }

    #[must_use]
    pub fn children_for(&self, link: &GraphLink) -> Option<&[usize]> {
        self.links
            .binary_search_by(|(l, _)| l.cmp(link))
            .ok()
            .map(|i| self.links[i].1.as_slice())
    }

    /// Whether `foot` is holding any arrow.
    #[must_use]
    pub fn foot_is_holding(&self, foot: Foot) -> bool {
        self.state[foot as usize]
            .iter()
            .any(|p| p.is_valid() && p.state == GraphArrowState::Held)
    }

    /// Whether both portions of `foot` occupy valid arrows.
    #[must_use]
    pub fn foot_is_bracketing(&self, foot: Foot) -> bool {
        self.state[foot as usize].iter().all(FootArrowState::is_valid)
    }

    /// The portion of `foot` in contact with `arrow`, if any.
    #[must_use]
    pub fn contact_portion_on(&self, foot: Foot, arrow: usize) -> Option<usize> {
        self.state[foot as usize]
            .iter()
            .position(|p| p.arrow == arrow as isize && p.is_contact())
    }
}

/// The full enumeration of reachable states for one pad, rooted at a starting
/// stance. Immutable once built; share freely between threads.
#[derive(Debug, Clone)]
pub struct StepGraph {
    pub pad: PadData,
    nodes: Vec<GraphNode>,
    root: usize,
}

impl StepGraph {
    /// Builds the graph for `pad` with the feet starting on the given arrows.
    ///
    /// Fails if the root state is not constructible or if any enumerated state
    /// is unreachable from the root (a broken transition model).
    pub fn build(
        pad: PadData,
        left_starting_arrow: usize,
        right_starting_arrow: usize,
    ) -> Result<Self, Error> {
        let lanes = pad.num_arrows();
        if left_starting_arrow >= lanes || right_starting_arrow >= lanes {
            return Err(Error::GraphBuild {
                pad: pad.name.clone(),
                reason: "starting arrows out of range".into(),
            });
        }

        let mut nodes = enumerate_nodes(&pad);
        let mut index = HashMap::with_capacity(nodes.len());
        for (id, node) in nodes.iter().enumerate() {
            index.insert(node.key(), id);
        }

        let root_key = (
            root_matrix(left_starting_arrow, right_starting_arrow),
            BodyOrientation::Normal,
        );
        let Some(&root) = index.get(&root_key) else {
            return Err(Error::GraphBuild {
                pad: pad.name.clone(),
                reason: format!(
                    "root state (L on {left_starting_arrow}, R on {right_starting_arrow}) is not a valid stance"
                ),
            });
        };

        fill_transitions(&pad, &mut nodes);

        let reachable = reachable_count(&nodes, root);
        if reachable != nodes.len() {
            return Err(Error::GraphBuild {
                pad: pad.name.clone(),
                reason: format!(
                    "{} of {} states unreachable from the root",
                    nodes.len() - reachable,
                    nodes.len()
                ),
            });
        }

        let graph = Self { pad, nodes, root };
        info!(
            component = "StepGraph",
            pad = graph.pad.name.as_str(),
            nodes = graph.node_count(),
            links = graph.link_count(),
            "built step graph"
        );
        Ok(graph)
    }

    /// Reassembles a graph from deserialized parts; used by the binary loader.
    pub(crate) fn from_parts(pad: PadData, nodes: Vec<GraphNode>, root: usize) -> Self {
        Self { pad, nodes, root }
    }

    #[inline(always)]
    #[must_use]
    pub fn root(&self) -> usize {
        self.root
    }

    #[inline(always)]
    #[must_use]
    pub fn node(&self, id: usize) -> &GraphNode {
        &self.nodes[id]
    }

    #[inline(always)]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.nodes.iter().map(|n| n.links.len()).sum()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (usize, &GraphNode)> {
        self.nodes.iter().enumerate()
    }

    /// BFS from the root for the node whose default portions match the given
    /// foot states, with toes unused and normal orientation.
    #[must_use]
    pub fn find_node(
        &self,
        left_arrow: usize,
        left_state: GraphArrowState,
        right_arrow: usize,
        right_state: GraphArrowState,
    ) -> Option<usize> {
        let mut target = root_matrix(left_arrow, right_arrow);
        target[Foot::Left as usize][HEEL].state = left_state;
        target[Foot::Right as usize][HEEL].state = right_state;

        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        visited[self.root] = true;
        queue.push_back(self.root);
        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id];
            if node.state == target && node.orientation == BodyOrientation::Normal {
                return Some(id);
            }
            for (_, children) in &node.links {
                for &child in children {
                    if !visited[child] {
                        visited[child] = true;
                        queue.push_back(child);
                    }
                }
            }
        }
        None
    }

    /// Every distinct link labeling in the graph.
    #[must_use]
    pub fn find_all_links(&self) -> HashSet<GraphLink> {
        let mut out = HashSet::new();
        for node in &self.nodes {
            for (link, _) in &node.links {
                out.insert(*link);
            }
        }
        out
    }

    /// Where a foot stands: the average of its valid portions' coordinates.
    #[must_use]
    pub fn foot_position(&self, node_id: usize, foot: Foot) -> (f32, f32) {
        let mut x = 0.0;
        let mut y = 0.0;
        let mut count = 0;
        for portion in &self.nodes[node_id].state[foot as usize] {
            if portion.is_valid() {
                let arrow = &self.pad.arrows[portion.arrow as usize];
                x += arrow.x;
                y += arrow.y;
                count += 1;
            }
        }
        if count == 0 {
            (0.0, 0.0)
        } else {
            (x / count as f32, y / count as f32)
        }
    }

    /// Distance between the two feet at a node.
    #[must_use]
    pub fn feet_distance(&self, node_id: usize) -> f32 {
        let (lx, ly) = self.foot_position(node_id, Foot::Left);
        let (rx, ry) = self.foot_position(node_id, Foot::Right);
        self.pad.distance(lx, ly, rx, ry)
    }
}

fn root_matrix(left_arrow: usize, right_arrow: usize) -> StateMatrix {
    let mut matrix = StateMatrix::default();
    matrix[Foot::Left as usize][HEEL] =
        FootArrowState::new(left_arrow as isize, GraphArrowState::Resting);
    matrix[Foot::Right as usize][HEEL] =
        FootArrowState::new(right_arrow as isize, GraphArrowState::Resting);
    matrix
}

// --- State enumeration ---

/// The aggregate relation of the two feet in a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StateClass {
    crossover: bool,
    /// Right foot in front within the crossover, from the canonical tables.
    crossover_other_in_front: bool,
    invert: bool,
    stretch: bool,
}

/// Classifies every cross-foot portion pair; `None` when any pair is illegal.
fn classify_state(pad: &PadData, matrix: &StateMatrix) -> Option<StateClass> {
    let mut class = StateClass {
        crossover: false,
        crossover_other_in_front: false,
        invert: false,
        stretch: false,
    };
    for lp in &matrix[Foot::Left as usize] {
        if !lp.is_valid() {
            continue;
        }
        for rp in &matrix[Foot::Right as usize] {
            if !rp.is_valid() {
                continue;
            }
            let kind = pad.classify_pair(lp.arrow, rp.arrow);
            match kind {
                PairKind::Illegal => return None,
                PairKind::Invert | PairKind::InvertStretch => class.invert = true,
                PairKind::CrossoverOtherInFront | PairKind::CrossoverOtherInFrontStretch => {
                    class.crossover = true;
                    class.crossover_other_in_front = true;
                }
                PairKind::CrossoverOtherBehind | PairKind::CrossoverOtherBehindStretch => {
                    class.crossover = true;
                }
                PairKind::Normal | PairKind::NormalStretch => {}
            }
            if kind.is_stretch() {
                class.stretch = true;
            }
        }
    }
    Some(class)
}

fn state_is_valid(pad: &PadData, matrix: &StateMatrix) -> Option<StateClass> {
    let lanes = pad.num_arrows() as isize;

    for foot in FEET {
        let heel = matrix[foot as usize][HEEL];
        let toe = matrix[foot as usize][TOE];
        // The default portion must always stand on a valid arrow; unused
        // portions rest off the pad.
        if !heel.is_valid() {
            return None;
        }
        for portion in [heel, toe] {
            if portion.arrow >= lanes {
                return None;
            }
            if !portion.is_valid() && portion.state != GraphArrowState::Resting {
                return None;
            }
        }
        if toe.is_valid() {
            if toe.arrow == heel.arrow {
                return None;
            }
            if !pad.is_bracketable_pair(foot, heel.arrow as usize, toe.arrow as usize) {
                return None;
            }
        }
    }

    // Per-arrow occupancy: one contact at most, and a second portion only as
    // the lifted memory of a swap.
    for arrow in 0..lanes {
        let mut contacts = 0;
        let mut lifted = 0;
        for foot_state in matrix {
            for portion in foot_state {
                if portion.arrow != arrow {
                    continue;
                }
                if portion.is_contact() {
                    contacts += 1;
                } else {
                    lifted += 1;
                }
            }
        }
        match (contacts, lifted) {
            (0, 0) | (1, 0) | (1, 1) => {}
            _ => return None,
        }
    }

    let class = classify_state(pad, matrix)?;

    // Stretch brackets exist, but not layered under a crossover or invert.
    let both_bracketing = FEET
        .iter()
        .all(|&f| matrix[f as usize].iter().all(FootArrowState::is_valid));
    if both_bracketing && class.stretch && (class.crossover || class.invert) {
        return None;
    }

    Some(class)
}

/// Which orientations a state matrix may carry.
fn orientations_for(
    pad: &PadData,
    matrix: &StateMatrix,
    class: &StateClass,
) -> Vec<BodyOrientation> {
    if !class.invert {
        return vec![BodyOrientation::Normal];
    }
    let pos_y = |foot: Foot| -> f32 {
        let mut y = 0.0;
        let mut count = 0;
        for portion in &matrix[foot as usize] {
            if portion.is_valid() {
                y += pad.arrows[portion.arrow as usize].y;
                count += 1;
            }
        }
        y / count.max(1) as f32
    };
    let ly = pos_y(Foot::Left);
    let ry = pos_y(Foot::Right);
    if ly > ry + f32::EPSILON {
        vec![BodyOrientation::InvertedLeftOverRight]
    } else if ry > ly + f32::EPSILON {
        vec![BodyOrientation::InvertedRightOverLeft]
    } else {
        vec![
            BodyOrientation::InvertedLeftOverRight,
            BodyOrientation::InvertedRightOverLeft,
        ]
    }
}

/// Walks all candidate matrices as base-M numerals, M = (lanes + 1) * 3.
fn enumerate_nodes(pad: &PadData) -> Vec<GraphNode> {
    let lanes = pad.num_arrows();
    let m = ((lanes + 1) * 3) as u64;
    let total = m.pow(4);
    let mut nodes = Vec::new();

    for numeral in 0..total {
        let mut digits = [0u64; 4];
        let mut rest = numeral;
        for d in &mut digits {
            *d = rest % m;
            rest /= m;
        }
        let portion = |d: u64| -> FootArrowState {
            let arrow_part = d / 3;
            let state = match d % 3 {
                0 => GraphArrowState::Resting,
                1 => GraphArrowState::Held,
                _ => GraphArrowState::Lifted,
            };
            let arrow = if arrow_part == 0 {
                INVALID_ARROW
            } else {
                (arrow_part - 1) as isize
            };
            FootArrowState::new(arrow, state)
        };
        let matrix: StateMatrix = [
            [portion(digits[0]), portion(digits[1])],
            [portion(digits[2]), portion(digits[3])],
        ];
        let Some(class) = state_is_valid(pad, &matrix) else {
            continue;
        };
        for orientation in orientations_for(pad, &matrix, &class) {
            nodes.push(GraphNode {
                state: matrix,
                orientation,
                links: Vec::new(),
            });
        }
    }
    nodes
}

// --- Transition classification ---

/// One acting portion's contribution to a transition.
#[derive(Debug, Clone, Copy)]
struct PortionEntry {
    portion: usize,
    action: FootAction,
    move_kind: PortionMove,
    to_arrow: isize,
}

/// One way a foot can participate in a transition.
#[derive(Debug, Clone)]
enum FootMove {
    /// No action; `lifted_arrows` lists arrows where this foot's contact is
    /// replaced by a lifted memory and must be swap targets of the other foot.
    Passive { lifted_arrows: Vec<isize> },
    Acting {
        entries: Vec<PortionEntry>,
        lifted_arrows: Vec<isize>,
    },
}

/// Options for one portion during an acting transition.
#[derive(Debug, Clone, Copy)]
enum PortionOption {
    Passive { lifted: Option<isize> },
    Entry(PortionEntry),
    /// Resting on the same arrow: the portion may either stand still or tap.
    PassiveOrEntry(PortionEntry),
}

fn portion_option(
    pad: &PadData,
    foot_from: &[FootArrowState; NUM_FOOT_PORTIONS],
    portion: usize,
    from_p: FootArrowState,
    to_p: FootArrowState,
) -> Option<PortionOption> {
    use GraphArrowState as G;

    if !to_p.is_valid() {
        // Withdrawn portion: a held portion cannot silently vanish.
        return match from_p.state {
            G::Held if from_p.is_valid() => None,
            _ => Some(PortionOption::Passive { lifted: None }),
        };
    }

    if from_p.arrow == to_p.arrow {
        return match (from_p.state, to_p.state) {
            (G::Resting, G::Resting) => Some(PortionOption::PassiveOrEntry(PortionEntry {
                portion,
                action: FootAction::Tap,
                move_kind: PortionMove::Same,
                to_arrow: to_p.arrow,
            })),
            (G::Resting, G::Held) => Some(PortionOption::Entry(PortionEntry {
                portion,
                action: FootAction::Hold,
                move_kind: PortionMove::Same,
                to_arrow: to_p.arrow,
            })),
            (G::Held, G::Resting) => Some(PortionOption::Entry(PortionEntry {
                portion,
                action: FootAction::Release,
                move_kind: PortionMove::Same,
                to_arrow: to_p.arrow,
            })),
            (G::Held, G::Held) | (G::Lifted, G::Lifted) => {
                Some(PortionOption::Passive { lifted: None })
            }
            // Contact replaced by a lifted memory: only as a swap victim.
            (G::Resting | G::Held, G::Lifted) => Some(PortionOption::Passive {
                lifted: Some(to_p.arrow),
            }),
            (G::Lifted, G::Resting) => Some(PortionOption::Entry(PortionEntry {
                portion,
                action: FootAction::Tap,
                move_kind: PortionMove::Same,
                to_arrow: to_p.arrow,
            })),
            (G::Lifted, G::Held) => Some(PortionOption::Entry(PortionEntry {
                portion,
                action: FootAction::Hold,
                move_kind: PortionMove::Same,
                to_arrow: to_p.arrow,
            })),
        };
    }

    // Moving to a different arrow. A held portion must release first, and a
    // fresh arrow can only be tapped or held, never entered lifted or
    // released.
    if from_p.is_valid() && from_p.state == G::Held {
        return None;
    }
    let action = match to_p.state {
        G::Resting => FootAction::Tap,
        G::Held => FootAction::Hold,
        G::Lifted => return None,
    };
    let travel_from = if from_p.is_valid() {
        from_p.arrow
    } else {
        foot_from[HEEL].arrow
    };
    if !pad.is_valid_next(travel_from, to_p.arrow as usize) {
        return None;
    }
    // Stepping onto an arrow the foot already covered reads as a same-arrow
    // move even when the portions shuffle.
    let covered = foot_from
        .iter()
        .any(|p| p.is_valid() && p.arrow == to_p.arrow);
    let move_kind = if covered {
        PortionMove::Same
    } else {
        PortionMove::New
    };
    Some(PortionOption::Entry(PortionEntry {
        portion,
        action,
        move_kind,
        to_arrow: to_p.arrow,
    }))
}

/// All the ways `foot` can participate in the transition `from -> to`.
fn foot_moves(pad: &PadData, from: &StateMatrix, to: &StateMatrix, foot: Foot) -> Vec<FootMove> {
    let foot_from = &from[foot as usize];
    let foot_to = &to[foot as usize];

    let mut per_portion: [Vec<PortionOption>; NUM_FOOT_PORTIONS] = [Vec::new(), Vec::new()];
    for portion in 0..NUM_FOOT_PORTIONS {
        let Some(option) =
            portion_option(pad, foot_from, portion, foot_from[portion], foot_to[portion])
        else {
            return Vec::new();
        };
        match option {
            PortionOption::PassiveOrEntry(entry) => {
                per_portion[portion].push(PortionOption::Passive { lifted: None });
                per_portion[portion].push(PortionOption::Entry(entry));
            }
            other => per_portion[portion].push(other),
        }
    }

    let mut moves = Vec::new();
    for heel_option in &per_portion[HEEL] {
        for toe_option in &per_portion[TOE] {
            let mut entries = Vec::new();
            let mut lifted_arrows = Vec::new();
            for option in [heel_option, toe_option] {
                match option {
                    PortionOption::Passive { lifted } => {
                        if let Some(arrow) = lifted {
                            lifted_arrows.push(*arrow);
                        }
                    }
                    PortionOption::Entry(entry) => entries.push(*entry),
                    PortionOption::PassiveOrEntry(_) => unreachable!(),
                }
            }
            if entries.is_empty() {
                // A passive foot must be structurally unchanged: portions
                // only vanish while the foot itself acts.
                let withdrawn = (0..NUM_FOOT_PORTIONS)
                    .any(|p| foot_from[p].is_valid() && !foot_to[p].is_valid());
                if withdrawn {
                    continue;
                }
                moves.push(FootMove::Passive { lifted_arrows });
            } else {
                // A foot never mixes releases with fresh actions.
                let releases = entries
                    .iter()
                    .filter(|e| e.action == FootAction::Release)
                    .count();
                if releases > 0 && releases != entries.len() {
                    continue;
                }
                moves.push(FootMove::Acting {
                    entries,
                    lifted_arrows,
                });
            }
        }
    }
    moves
}

/// Signed crossing polarity of a state: positive when the right foot crosses
/// in front, negative behind; magnitude 2 for inversion.
fn state_polarity(class: &StateClass, orientation: BodyOrientation) -> i32 {
    if class.invert {
        match orientation {
            BodyOrientation::InvertedRightOverLeft => 2,
            BodyOrientation::InvertedLeftOverRight => -2,
            // An inverted matrix observed while entering from normal; lean on
            // the crossover tables.
            BodyOrientation::Normal => {
                if class.crossover_other_in_front {
                    2
                } else {
                    -2
                }
            }
        }
    } else if class.crossover {
        if class.crossover_other_in_front { 1 } else { -1 }
    } else {
        0
    }
}

struct LabelContext<'a> {
    pad: &'a PadData,
    from_class: StateClass,
    from_orientation: BodyOrientation,
    to_class: StateClass,
    to_orientation: BodyOrientation,
}

impl LabelContext<'_> {
    fn is_swing(&self) -> bool {
        let from_pol = state_polarity(&self.from_class, self.from_orientation);
        let to_pol = state_polarity(&self.to_class, self.to_orientation);
        from_pol != 0 && to_pol != 0 && from_pol.signum() != to_pol.signum()
    }

    /// Invert-to-normal sweep: the acting foot flips from the front of the
    /// crossed stance to the back of the normal one, or vice versa.
    fn is_uninvert_swing(&self, foot: Foot, from: &StateMatrix, to: &StateMatrix) -> bool {
        if !self.from_class.invert || self.to_class.invert || self.to_class.crossover {
            return false;
        }
        let acting_was_front = match self.from_orientation {
            BodyOrientation::InvertedLeftOverRight => foot == Foot::Left,
            BodyOrientation::InvertedRightOverLeft => foot == Foot::Right,
            BodyOrientation::Normal => return false,
        };
        let foot_y = |matrix: &StateMatrix, f: Foot| -> f32 {
            let mut y = 0.0;
            let mut count = 0;
            for p in &matrix[f as usize] {
                if p.is_valid() {
                    y += self.pad.arrows[p.arrow as usize].y;
                    count += 1;
                }
            }
            y / count.max(1) as f32
        };
        let act_from = foot_y(from, foot);
        let act_to = foot_y(to, foot);
        let other_to = foot_y(to, foot.other());
        let acting_now_front = act_to > other_to + f32::EPSILON;
        let acting_now_behind = act_to < other_to - f32::EPSILON;
        let moved = (act_to - act_from).abs() > f32::EPSILON;
        moved
            && ((acting_was_front && acting_now_behind)
                || (!acting_was_front && acting_now_front))
    }

    /// Crossover label from the acting foot's side of the stance.
    fn crossover_label(&self, foot: Foot, stretch: bool) -> StepType {
        // The tables phrase crossovers as "the right foot in front"; translate
        // to the acting foot's perspective.
        let acting_in_front = if foot == Foot::Right {
            self.to_class.crossover_other_in_front
        } else {
            !self.to_class.crossover_other_in_front
        };
        match (acting_in_front, stretch) {
            (true, false) => StepType::CrossoverFront,
            (false, false) => StepType::CrossoverBehind,
            (true, true) => StepType::CrossoverFrontStretch,
            (false, true) => StepType::CrossoverBehindStretch,
        }
    }

    fn invert_label(&self, foot: Foot, stretch: bool) -> StepType {
        let acting_in_front = match self.to_orientation {
            BodyOrientation::InvertedLeftOverRight => foot == Foot::Left,
            BodyOrientation::InvertedRightOverLeft => foot == Foot::Right,
            BodyOrientation::Normal => false,
        };
        match (acting_in_front, stretch) {
            (true, false) => StepType::InvertFront,
            (false, false) => StepType::InvertBehind,
            (true, true) => StepType::InvertFrontStretch,
            (false, true) => StepType::InvertBehindStretch,
        }
    }

    /// Swap labels keep the flavor of the stance being swapped out of.
    fn pre_swap_label(&self, foot: Foot) -> StepType {
        if self.from_class.invert {
            let acting_in_front = match self.from_orientation {
                BodyOrientation::InvertedLeftOverRight => foot == Foot::Left,
                BodyOrientation::InvertedRightOverLeft => foot == Foot::Right,
                BodyOrientation::Normal => false,
            };
            if acting_in_front {
                StepType::FootSwapInvertFront
            } else {
                StepType::FootSwapInvertBehind
            }
        } else if self.from_class.crossover {
            let acting_in_front = if foot == Foot::Right {
                self.from_class.crossover_other_in_front
            } else {
                !self.from_class.crossover_other_in_front
            };
            if acting_in_front {
                StepType::FootSwapCrossoverFront
            } else {
                StepType::FootSwapCrossoverBehind
            }
        } else {
            StepType::FootSwap
        }
    }
}

/// Labels one acting foot; returns the step type shared by its entries.
fn label_foot(
    ctx: &LabelContext<'_>,
    from: &StateMatrix,
    to: &StateMatrix,
    foot: Foot,
    entries: &[PortionEntry],
) -> Option<StepType> {
    use PortionMove as M;
    use StepType as S;

    let foot_to = &to[foot as usize];
    debug_assert!(!entries.is_empty());

    if entries.len() == 2 {
        let heel = entries.iter().find(|e| e.portion == HEEL)?;
        let toe = entries.iter().find(|e| e.portion == TOE)?;
        let plain = match (heel.move_kind, toe.move_kind) {
            (M::New, M::New) => S::BracketHeelNewToeNew,
            (M::New, M::Same) => S::BracketHeelNewToeSame,
            (M::New, M::Swap) => S::BracketHeelNewToeSwap,
            (M::Same, M::New) => S::BracketHeelSameToeNew,
            (M::Same, M::Same) => S::BracketHeelSameToeSame,
            (M::Same, M::Swap) => S::BracketHeelSameToeSwap,
            (M::Swap, M::New) => S::BracketHeelSwapToeNew,
            (M::Swap, M::Same) => S::BracketHeelSwapToeSame,
            (M::Swap, M::Swap) => S::BracketHeelSwapToeSwap,
            _ => return None,
        };
        // Only the new/same lattice picks up crossover, invert, stretch and
        // swing flavors; swap brackets keep their plain labels.
        let flavored = |plain: StepType, cf: S, cb: S, ivf: S, ivb: S, st: S| -> StepType {
            if ctx.is_swing() {
                return S::BracketSwing;
            }
            if ctx.to_class.invert {
                return match ctx.invert_label(foot, false) {
                    S::InvertFront => ivf,
                    _ => ivb,
                };
            }
            if ctx.to_class.crossover {
                return match ctx.crossover_label(foot, false) {
                    S::CrossoverFront => cf,
                    _ => cb,
                };
            }
            if ctx.to_class.stretch {
                return st;
            }
            plain
        };
        return Some(match plain {
            S::BracketHeelNewToeNew => flavored(
                plain,
                S::BracketCrossoverFrontHeelNewToeNew,
                S::BracketCrossoverBehindHeelNewToeNew,
                S::BracketInvertFrontHeelNewToeNew,
                S::BracketInvertBehindHeelNewToeNew,
                S::BracketStretchHeelNewToeNew,
            ),
            S::BracketHeelNewToeSame => flavored(
                plain,
                S::BracketCrossoverFrontHeelNewToeSame,
                S::BracketCrossoverBehindHeelNewToeSame,
                S::BracketInvertFrontHeelNewToeSame,
                S::BracketInvertBehindHeelNewToeSame,
                S::BracketStretchHeelNewToeSame,
            ),
            S::BracketHeelSameToeNew => flavored(
                plain,
                S::BracketCrossoverFrontHeelSameToeNew,
                S::BracketCrossoverBehindHeelSameToeNew,
                S::BracketInvertFrontHeelSameToeNew,
                S::BracketInvertBehindHeelSameToeNew,
                S::BracketStretchHeelSameToeNew,
            ),
            other => other,
        });
    }

    let entry = entries[0];
    let both_portions_remain = foot_to.iter().all(FootArrowState::is_valid);
    if both_portions_remain {
        // One portion acts while the other stays planted.
        return Some(match (entry.portion, entry.move_kind) {
            (HEEL, M::Same) => S::BracketOneArrowHeelSame,
            (HEEL, M::New) => S::BracketOneArrowHeelNew,
            (HEEL, M::Swap) => S::BracketOneArrowHeelSwap,
            (_, M::Same) => S::BracketOneArrowToeSame,
            (_, M::New) => S::BracketOneArrowToeNew,
            (_, M::Swap) => S::BracketOneArrowToeSwap,
            (_, M::None) => return None,
        });
    }

    // Plain single step; after the transition the foot stands on its default
    // portion alone.
    match entry.move_kind {
        M::Same => Some(S::SameArrow),
        M::Swap => Some(ctx.pre_swap_label(foot)),
        M::New => {
            if ctx.is_swing() || ctx.is_uninvert_swing(foot, from, to) {
                return Some(S::Swing);
            }
            if ctx.to_class.invert {
                return Some(ctx.invert_label(foot, ctx.to_class.stretch));
            }
            if ctx.to_class.crossover {
                return Some(ctx.crossover_label(foot, ctx.to_class.stretch));
            }
            if ctx.to_class.stretch {
                return Some(S::NewArrowStretch);
            }
            Some(S::NewArrow)
        }
        M::None => None,
    }
}

/// Detects swaps: entries landing on arrows whose previous contact belongs to
/// the other foot and survives as a lifted memory.
fn mark_swaps(from: &StateMatrix, to: &StateMatrix, foot: Foot, entries: &mut [PortionEntry]) {
    let other = foot.other() as usize;
    for entry in entries {
        let arrow = entry.to_arrow;
        let was_other_contact = from[other]
            .iter()
            .any(|p| p.arrow == arrow && p.is_contact());
        let now_other_lifted = to[other]
            .iter()
            .any(|p| p.arrow == arrow && p.state == GraphArrowState::Lifted);
        if was_other_contact && now_other_lifted {
            entry.move_kind = PortionMove::Swap;
        }
    }
}

/// Every lifted arrow of one foot must be the swap target of the other foot's
/// entries.
fn lifts_satisfied(lifted: &[isize], other_entries: &[PortionEntry]) -> bool {
    lifted.iter().all(|&arrow| {
        other_entries
            .iter()
            .any(|e| e.to_arrow == arrow && e.move_kind == PortionMove::Swap)
    })
}

fn link_from_entries(
    left: Option<(StepType, &[PortionEntry])>,
    right: Option<(StepType, &[PortionEntry])>,
) -> GraphLink {
    let mut link = GraphLink::default();
    for (foot, labeled) in [(Foot::Left, left), (Foot::Right, right)] {
        if let Some((step, entries)) = labeled {
            for entry in entries {
                link.steps[foot as usize][entry.portion] = GraphLinkStep {
                    valid: true,
                    step,
                    action: entry.action,
                };
            }
        }
    }
    link
}

/// Classifies all transitions `from -> to`, returning the labeled links.
fn classify_transitions(
    pad: &PadData,
    from_state: &StateMatrix,
    from_orientation: BodyOrientation,
    to_state: &StateMatrix,
    to_orientation: BodyOrientation,
    from_class: &StateClass,
    to_class: &StateClass,
) -> Vec<GraphLink> {
    // Direct rotation between the two inverted orientations is impossible.
    if from_orientation.is_inverted()
        && to_orientation.is_inverted()
        && from_orientation != to_orientation
    {
        return Vec::new();
    }

    let ctx = LabelContext {
        pad,
        from_class: *from_class,
        from_orientation,
        to_class: *to_class,
        to_orientation,
    };

    let left_moves = foot_moves(pad, from_state, to_state, Foot::Left);
    if left_moves.is_empty() {
        return Vec::new();
    }
    let right_moves = foot_moves(pad, from_state, to_state, Foot::Right);
    if right_moves.is_empty() {
        return Vec::new();
    }

    let mut links = Vec::new();
    for lm in &left_moves {
        for rm in &right_moves {
            match (lm, rm) {
                (FootMove::Passive { .. }, FootMove::Passive { .. }) => {}
                (
                    FootMove::Acting {
                        entries,
                        lifted_arrows,
                    },
                    FootMove::Passive {
                        lifted_arrows: other_lifted,
                    },
                ) => {
                    let mut entries = entries.clone();
                    mark_swaps(from_state, to_state, Foot::Left, &mut entries);
                    if !lifts_satisfied(other_lifted, &entries) || !lifted_arrows.is_empty() {
                        continue;
                    }
                    if let Some(step) = label_foot(&ctx, from_state, to_state, Foot::Left, &entries)
                    {
                        links.push(link_from_entries(Some((step, &entries)), None));
                    }
                }
                (
                    FootMove::Passive {
                        lifted_arrows: other_lifted,
                    },
                    FootMove::Acting {
                        entries,
                        lifted_arrows,
                    },
                ) => {
                    let mut entries = entries.clone();
                    mark_swaps(from_state, to_state, Foot::Right, &mut entries);
                    if !lifts_satisfied(other_lifted, &entries) || !lifted_arrows.is_empty() {
                        continue;
                    }
                    if let Some(step) =
                        label_foot(&ctx, from_state, to_state, Foot::Right, &entries)
                    {
                        links.push(link_from_entries(None, Some((step, &entries))));
                    }
                }
                (
                    FootMove::Acting {
                        entries: left_entries,
                        lifted_arrows: left_lifted,
                    },
                    FootMove::Acting {
                        entries: right_entries,
                        lifted_arrows: right_lifted,
                    },
                ) => {
                    let mut le = left_entries.clone();
                    let mut re = right_entries.clone();
                    mark_swaps(from_state, to_state, Foot::Left, &mut le);
                    mark_swaps(from_state, to_state, Foot::Right, &mut re);
                    if !lifts_satisfied(left_lifted, &re) || !lifts_satisfied(right_lifted, &le) {
                        continue;
                    }
                    let Some(left_step) = label_foot(&ctx, from_state, to_state, Foot::Left, &le)
                    else {
                        continue;
                    };
                    let Some(right_step) = label_foot(&ctx, from_state, to_state, Foot::Right, &re)
                    else {
                        continue;
                    };
                    // Jumps only combine jump-eligible halves, and all feet
                    // release together or none do.
                    if !crate::step_types::step_data(left_step).can_be_used_in_jump
                        || !crate::step_types::step_data(right_step).can_be_used_in_jump
                    {
                        continue;
                    }
                    let left_release = le.iter().all(|e| e.action == FootAction::Release);
                    let right_release = re.iter().all(|e| e.action == FootAction::Release);
                    if left_release != right_release {
                        continue;
                    }
                    links.push(link_from_entries(
                        Some((left_step, &le)),
                        Some((right_step, &re)),
                    ));
                }
            }
        }
    }
    links
}

fn fill_transitions(pad: &PadData, nodes: &mut [GraphNode]) {
    let classes: Vec<StateClass> = nodes
        .iter()
        .map(|n| classify_state(pad, &n.state).expect("enumerated node no longer classifies"))
        .collect();
    let snapshots: Vec<(StateMatrix, BodyOrientation)> =
        nodes.iter().map(GraphNode::key).collect();

    for from_id in 0..nodes.len() {
        let (from_state, from_orientation) = snapshots[from_id];
        let mut edges: HashMap<GraphLink, Vec<usize>> = HashMap::new();
        for (to_id, (to_state, to_orientation)) in snapshots.iter().enumerate() {
            let found = classify_transitions(
                pad,
                &from_state,
                from_orientation,
                to_state,
                *to_orientation,
                &classes[from_id],
                &classes[to_id],
            );
            for link in found {
                let children = edges.entry(link).or_default();
                if !children.contains(&to_id) {
                    children.push(to_id);
                }
            }
        }
        let mut links: Vec<(GraphLink, Vec<usize>)> = edges.into_iter().collect();
        for (_, children) in &mut links {
            children.sort_unstable();
        }
        links.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        nodes[from_id].links = links;
    }
}

fn reachable_count(nodes: &[GraphNode], root: usize) -> usize {
    let mut visited = vec![false; nodes.len()];
    let mut queue = VecDeque::new();
    visited[root] = true;
    queue.push_back(root);
    let mut count = 1;
    while let Some(id) = queue.pop_front() {
        for (_, children) in &nodes[id].links {
            for &child in children {
                if !visited[child] {
                    visited[child] = true;
                    count += 1;
                    queue.push_back(child);
                }
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;
    use crate::pad::DANCE_SINGLE;

    fn single_graph() -> &'static StepGraph {
        static GRAPH: OnceLock<StepGraph> = OnceLock::new();
        GRAPH.get_or_init(|| {
            let pad = PadData::stock(DANCE_SINGLE).unwrap();
            StepGraph::build(pad, 0, 3).unwrap()
        })
    }

    #[test]
    fn build_succeeds_and_roots_at_the_starting_stance() {
        let graph = single_graph();
        assert!(graph.node_count() > 0);
        let root = graph.node(graph.root());
        assert_eq!(root.state[0][HEEL].arrow, 0);
        assert_eq!(root.state[1][HEEL].arrow, 3);
        assert_eq!(root.orientation, BodyOrientation::Normal);
    }

    #[test]
    fn nodes_respect_universal_invariants() {
        let graph = single_graph();
        for (_, node) in graph.nodes() {
            for foot in FEET {
                let heel = node.state[foot as usize][HEEL];
                let toe = node.state[foot as usize][TOE];
                assert!(heel.is_valid(), "default portion must be on the pad");
                if toe.is_valid() {
                    assert!(graph.pad.is_bracketable_pair(
                        foot,
                        heel.arrow as usize,
                        toe.arrow as usize
                    ));
                }
            }
            for arrow in 0..graph.pad.num_arrows() as isize {
                let contacts = node
                    .state
                    .iter()
                    .flatten()
                    .filter(|p| p.arrow == arrow && p.is_contact())
                    .count();
                assert!(contacts <= 1);
            }
            let class = classify_state(&graph.pad, &node.state).unwrap();
            assert_eq!(class.invert, node.orientation.is_inverted());
        }
    }

    #[test]
    fn links_respect_action_legality() {
        let graph = single_graph();
        for (id, node) in graph.nodes() {
            for (link, children) in &node.links {
                assert!(!children.is_empty());
                for &child in children {
                    let to = graph.node(child);
                    for foot in FEET {
                        for portion in 0..NUM_FOOT_PORTIONS {
                            let slot = link.steps[foot as usize][portion];
                            if !slot.valid {
                                continue;
                            }
                            let from_p = node.state[foot as usize][portion];
                            let to_p = to.state[foot as usize][portion];
                            match slot.action {
                                FootAction::Release => {
                                    assert_eq!(from_p.arrow, to_p.arrow, "node {id}");
                                    assert_eq!(from_p.state, GraphArrowState::Held);
                                    assert_eq!(to_p.state, GraphArrowState::Resting);
                                }
                                FootAction::Hold => {
                                    assert_eq!(to_p.state, GraphArrowState::Held);
                                }
                                FootAction::Tap => {
                                    assert_eq!(to_p.state, GraphArrowState::Resting);
                                }
                            }
                            assert!(
                                !(from_p.state == GraphArrowState::Held
                                    && to_p.state == GraphArrowState::Held)
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn no_edge_rotates_between_the_two_inversions() {
        let graph = single_graph();
        for (_, node) in graph.nodes() {
            if node.orientation == BodyOrientation::Normal {
                continue;
            }
            for (_, children) in &node.links {
                for &child in children {
                    let to = graph.node(child);
                    if to.orientation.is_inverted() {
                        assert_eq!(node.orientation, to.orientation);
                    }
                }
            }
        }
    }

    #[test]
    fn find_node_locates_resting_states() {
        let graph = single_graph();
        let found = graph.find_node(1, GraphArrowState::Resting, 2, GraphArrowState::Resting);
        let id = found.expect("L on Down, R on Up is a reachable stance");
        let node = graph.node(id);
        assert_eq!(node.state[0][HEEL].arrow, 1);
        assert_eq!(node.state[1][HEEL].arrow, 2);
    }

    #[test]
    fn foot_position_averages_bracket_portions() {
        let graph = single_graph();
        let (x, y) = graph.foot_position(graph.root(), Foot::Left);
        assert!((x - 0.0).abs() < f32::EPSILON);
        assert!((y - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn all_links_include_plain_alternation_steps() {
        let graph = single_graph();
        let links = graph.find_all_links();
        let has = |step: StepType| {
            links
                .iter()
                .any(|l| l.steps.iter().flatten().any(|s| s.valid && s.step == step))
        };
        assert!(has(StepType::SameArrow));
        assert!(has(StepType::NewArrow));
        assert!(has(StepType::FootSwap));
        assert!(has(StepType::CrossoverFront) || has(StepType::CrossoverBehind));
        assert!(has(StepType::InvertFront) || has(StepType::InvertBehind));
        assert!(has(StepType::BracketHeelNewToeNew));
    }
}
