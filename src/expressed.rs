//! Expressed-chart search: reconstructing foot intent from literal notes.
//!
//! The searcher walks the source chart position by position, carrying a
//! frontier of candidate body states through the step graph and keeping only
//! the cheapest path to each state. Costs are scheduled in widely separated
//! bands so categorical judgements (don't double-step, don't crossover when an
//! alternation exists) always dominate subtler preferences.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::config::{BracketParsingDetermination, BracketParsingMethod, ExpressedChartConfig};
use crate::error::Error;
use crate::events::{NoteEvent, NoteKind};
use crate::graph::{GraphLink, GraphLinkInstance, StepGraph};
use crate::mines::{self, FootArrowEvent};
use crate::step_types::{
    step_data, Foot, FootAction, GraphArrowState, InstanceStepType, StepType, FEET, NUM_FEET,
    NUM_FOOT_PORTIONS,
};

// --- Cost schedule ---
// Ordered in bands: releases, then natural steps, then technique, then the
// heavy penalties that a search should only cross when the chart demands it.
const COST_RELEASE: f64 = 0.0;
const COST_SAME_ARROW: f64 = 1.0;
const COST_NEW_ARROW: f64 = 2.0;
const COST_JUMP: f64 = 6.0;
const COST_FOOT_SWAP: f64 = 7.0;
const COST_ONE_ARROW_BRACKET: f64 = 8.0;
const COST_SAME_ARROW_JACK: f64 = 9.0;
const COST_ONE_ARROW_BRACKET_AGGRESSIVE: f64 = 3.0;
const COST_BRACKET: f64 = 14.0;
const COST_BRACKET_AGGRESSIVE: f64 = 4.0;
const COST_JUMP_FOOT_FORCED_OFF: f64 = 25.0;
const COST_NEW_ARROW_STRETCH: f64 = 40.0;
const COST_FOOT_SWAP_REPEAT: f64 = 70.0;
const COST_FOOT_SWAP_AFTER_BRACKET: f64 = 90.0;
const COST_FOOT_SWAP_AFTER_BRACKET_AGGRESSIVE: f64 = 18.0;
const COST_CROSSOVER: f64 = 120.0;
const COST_CROSSOVER_STRETCH: f64 = 170.0;
const COST_INVERT: f64 = 240.0;
const COST_INVERT_STRETCH: f64 = 320.0;
const COST_BRACKET_CROSSOVER: f64 = 400.0;
const COST_BRACKET_INVERT: f64 = 500.0;
const COST_SWING: f64 = 600.0;
const COST_DOUBLE_STEP: f64 = 1000.0;
const COST_DOUBLE_STEP_MINE_INDICATED: f64 = 12.0;
const COST_TRIPLE_STEP: f64 = 4000.0;

/// A mine shortly before a step hints that the mined foot must vacate.
const MINE_INDICATION_WINDOW_SECONDS: f64 = 0.4;

const ORIENTATION_COST_CROSSOVER: f64 = 1.0;
const ORIENTATION_COST_INVERTED: f64 = 2.0;

/// Per-lane parser state while walking the source chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchState {
    #[default]
    Empty,
    Tap,
    Fake,
    Lift,
    Hold,
    Holding,
    Roll,
    Rolling,
}

impl SearchState {
    #[inline(always)]
    const fn is_sustained(self) -> bool {
        matches!(self, Self::Holding | Self::Rolling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MineType {
    AfterArrow,
    BeforeArrow,
    NoArrow,
}

/// One expressed transition: the foot intent arriving at this position.
#[derive(Debug, Clone)]
pub struct StepEvent {
    pub position: i32,
    pub time: f64,
    pub link: GraphLinkInstance,
    /// Graph node arrived at; retained for downstream arrow lookups.
    pub node: usize,
    /// Source arrows acted on by this transition, sorted. Lets a performance
    /// onto a same-sized pad prefer the literal source lanes.
    pub acted_arrows: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct MineEvent {
    pub position: i32,
    pub time: f64,
    pub original_arrow: usize,
    pub mine_type: MineType,
    /// Ordinal recency of the associated arrow; jumps share one ordinal.
    pub arrow_is_nth_closest: usize,
    pub foot_associated: Option<Foot>,
}

/// The lane-agnostic foot-intent stream of one chart.
#[derive(Debug, Clone)]
pub struct ExpressedChart {
    pub step_events: Vec<StepEvent>,
    pub mine_events: Vec<MineEvent>,
    /// The bracket parsing method the final search ran with.
    pub bracket_parsing_method: BracketParsingMethod,
}

impl ExpressedChart {
    /// Expresses `events` over `graph`. `difficulty_rating` feeds the dynamic
    /// bracket-parsing choice; `chart_id` tags log output.
    pub fn build(
        events: &[NoteEvent],
        graph: &StepGraph,
        config: &ExpressedChartConfig,
        difficulty_rating: u32,
        chart_id: &str,
    ) -> Result<Self, Error> {
        config.validate()?;
        let lanes = graph.pad.num_arrows();
        if let Some(bad) = events.iter().find(|e| e.lane >= lanes) {
            return Err(Error::InvalidConfig(vec![format!(
                "note at position {} references lane {} on a {lanes}-lane pad",
                bad.position, bad.lane
            )]));
        }

        let method = match config.bracket_parsing_determination {
            BracketParsingDetermination::UseDefaultMethod => config.default_bracket_parsing_method,
            BracketParsingDetermination::ChooseMethodDynamically => {
                choose_method_dynamically(events, graph, config, difficulty_rating, chart_id)?
            }
        };

        let (step_events, mines) = search(events, graph, method, chart_id)?;
        let mine_events = resolve_mines(graph, &step_events, &mines);
        info!(
            component = "ExpressedChart",
            chart = chart_id,
            steps = step_events.len(),
            mines = mine_events.len(),
            "expressed chart"
        );
        Ok(Self {
            step_events,
            mine_events,
            bracket_parsing_method: method,
        })
    }
}

fn choose_method_dynamically(
    events: &[NoteEvent],
    graph: &StepGraph,
    config: &ExpressedChartConfig,
    difficulty_rating: u32,
    chart_id: &str,
) -> Result<BracketParsingMethod, Error> {
    if difficulty_rating < config.min_level_for_brackets {
        return Ok(BracketParsingMethod::NoBrackets);
    }
    if config
        .use_aggressive_brackets_when_more_simultaneous_notes_than_can_be_covered_without_brackets
        && has_more_simultaneous_notes_than_feet(events)
    {
        return Ok(BracketParsingMethod::Aggressive);
    }
    // Preliminary balanced pass; its bracket density decides the redo.
    let (preliminary, _) = search(events, graph, BracketParsingMethod::Balanced, chart_id)?;
    let bpm = brackets_per_minute(&preliminary);
    if bpm > config.balanced_brackets_per_minute_for_aggressive_brackets {
        Ok(BracketParsingMethod::Aggressive)
    } else if bpm < config.balanced_brackets_per_minute_for_no_brackets {
        Ok(BracketParsingMethod::NoBrackets)
    } else {
        Ok(BracketParsingMethod::Balanced)
    }
}

/// Whether any position needs more simultaneous taps and holds than feet.
#[must_use]
pub fn has_more_simultaneous_notes_than_feet(events: &[NoteEvent]) -> bool {
    let mut holding: HashSet<usize> = HashSet::new();
    let mut i = 0;
    while i < events.len() {
        let position = events[i].position;
        let mut steps = 0;
        let mut ends = Vec::new();
        let mut starts = Vec::new();
        while i < events.len() && events[i].position == position {
            match events[i].kind {
                NoteKind::Tap | NoteKind::Fake | NoteKind::Lift => steps += 1,
                NoteKind::HoldStart | NoteKind::RollStart => {
                    steps += 1;
                    starts.push(events[i].lane);
                }
                NoteKind::HoldEnd => ends.push(events[i].lane),
                NoteKind::Mine => {}
            }
            i += 1;
        }
        for lane in ends {
            holding.remove(&lane);
        }
        if steps + holding.len() > NUM_FEET {
            return true;
        }
        holding.extend(starts);
    }
    false
}

fn brackets_per_minute(step_events: &[StepEvent]) -> f64 {
    let bracket_count = step_events
        .iter()
        .filter(|e| link_has_full_bracket(&e.link.link))
        .count();
    if step_events.is_empty() {
        return 0.0;
    }
    let duration = step_events.last().unwrap().time - step_events.first().unwrap().time;
    if duration <= f64::EPSILON {
        return bracket_count as f64;
    }
    bracket_count as f64 / (duration / 60.0)
}

fn link_has_full_bracket(link: &GraphLink) -> bool {
    link.steps
        .iter()
        .flatten()
        .any(|s| s.valid && step_data(s.step).is_bracket)
}

fn link_has_any_bracket(link: &GraphLink) -> bool {
    link.steps.iter().flatten().any(|s| {
        s.valid && {
            let data = step_data(s.step);
            data.is_bracket || data.is_one_arrow_bracket
        }
    })
}

// --- Search internals ---

struct ChartSearchNode {
    graph_node: usize,
    position: i32,
    time: f64,
    total_cost: f64,
    total_orientation_cost: f64,
    local_cost: f64,
    local_min_ordinal: u8,
    prev: Option<usize>,
    link: GraphLinkInstance,
    last_foot: Option<Foot>,
    prev_last_foot: Option<Foot>,
    last_link_was_bracket: bool,
    num_children: u32,
}

struct Search<'a> {
    graph: &'a StepGraph,
    method: BracketParsingMethod,
    arena: Vec<ChartSearchNode>,
    orientation_costs: HashMap<usize, f64>,
    /// Recent mines as (lane, time), pruned to the indication window.
    recent_mines: Vec<(usize, f64)>,
}

impl<'a> Search<'a> {
    fn new(graph: &'a StepGraph, method: BracketParsingMethod) -> Self {
        Self {
            graph,
            method,
            arena: Vec::new(),
            orientation_costs: HashMap::new(),
            recent_mines: Vec::new(),
        }
    }

    fn orientation_cost(&mut self, node_id: usize) -> f64 {
        if let Some(&cost) = self.orientation_costs.get(&node_id) {
            return cost;
        }
        let node = self.graph.node(node_id);
        let cost = if node.orientation.is_inverted() {
            ORIENTATION_COST_INVERTED
        } else {
            let mut crossover = false;
            'outer: for lp in &node.state[Foot::Left as usize] {
                if !lp.is_valid() {
                    continue;
                }
                for rp in &node.state[Foot::Right as usize] {
                    if rp.is_valid() && self.graph.pad.classify_pair(lp.arrow, rp.arrow).is_crossover()
                    {
                        crossover = true;
                        break 'outer;
                    }
                }
            }
            if crossover {
                ORIENTATION_COST_CROSSOVER
            } else {
                0.0
            }
        };
        self.orientation_costs.insert(node_id, cost);
        cost
    }

    fn detach(&mut self, idx: usize) {
        let mut cur = idx;
        loop {
            let Some(parent) = self.arena[cur].prev else {
                break;
            };
            self.arena[parent].num_children -= 1;
            if self.arena[parent].num_children > 0 {
                break;
            }
            cur = parent;
        }
    }

    /// Lexicographic comparison of two same-depth paths: totals first, then
    /// the locally-greedy divergence rule, then step-type ordinals.
    fn candidate_beats(
        &self,
        cand_cost: f64,
        cand_orientation: f64,
        cand_local: f64,
        cand_ordinal: u8,
        cand_prev: Option<usize>,
        incumbent: usize,
    ) -> bool {
        let inc = &self.arena[incumbent];
        if cand_cost != inc.total_cost {
            return cand_cost < inc.total_cost;
        }
        if cand_orientation != inc.total_orientation_cost {
            return cand_orientation < inc.total_orientation_cost;
        }

        let mut a_levels = vec![(cand_local, cand_ordinal)];
        let mut b_levels = vec![(inc.local_cost, inc.local_min_ordinal)];
        let mut a = cand_prev;
        let mut b = inc.prev;
        while a != b {
            let (Some(ai), Some(bi)) = (a, b) else { break };
            a_levels.push((self.arena[ai].local_cost, self.arena[ai].local_min_ordinal));
            b_levels.push((self.arena[bi].local_cost, self.arena[bi].local_min_ordinal));
            a = self.arena[ai].prev;
            b = self.arena[bi].prev;
        }
        // Earliest divergence first.
        for ((a_cost, _), (b_cost, _)) in a_levels.iter().rev().zip(b_levels.iter().rev()) {
            if a_cost < b_cost {
                return true;
            }
            if a_cost > b_cost {
                return false;
            }
        }
        for ((_, a_ordinal), (_, b_ordinal)) in a_levels.iter().rev().zip(b_levels.iter().rev()) {
            if a_ordinal != b_ordinal {
                return a_ordinal < b_ordinal;
            }
        }
        false
    }

    fn note_mines(&mut self, mines: &[(usize, f64)], now: f64) {
        self.recent_mines.extend_from_slice(mines);
        self.recent_mines
            .retain(|&(_, t)| now - t <= MINE_INDICATION_WINDOW_SECONDS);
    }

    fn mine_indicates_foot_must_vacate(&self, parent_graph_node: usize, stepping: Foot) -> bool {
        let other = stepping.other();
        let node = self.graph.node(parent_graph_node);
        node.state[other as usize].iter().any(|p| {
            p.is_contact()
                && self
                    .recent_mines
                    .iter()
                    .any(|&(lane, _)| lane as isize == p.arrow)
        })
    }

    fn transition_cost(&self, parent_idx: usize, link: &GraphLink, child_id: usize) -> f64 {
        if link.is_release() {
            return COST_RELEASE;
        }
        let parent = &self.arena[parent_idx];
        let parent_node = self.graph.node(parent.graph_node);
        let jump = link.is_jump();
        let aggressive = self.method == BracketParsingMethod::Aggressive;

        let mut cost = 0.0;
        for foot in FEET {
            let Some(step) = link.foot_step_type(foot) else {
                continue;
            };
            let data = step_data(step);

            let mut foot_cost = if data.is_bracket {
                let mut c = if aggressive {
                    COST_BRACKET_AGGRESSIVE
                } else {
                    COST_BRACKET
                };
                if data.is_crossover {
                    c += COST_BRACKET_CROSSOVER;
                }
                if data.is_invert {
                    c += COST_BRACKET_INVERT;
                }
                if data.is_stretch {
                    c += COST_NEW_ARROW_STRETCH;
                }
                if data.is_swing {
                    c += COST_SWING;
                }
                c
            } else if data.is_one_arrow_bracket {
                if aggressive {
                    COST_ONE_ARROW_BRACKET_AGGRESSIVE
                } else {
                    COST_ONE_ARROW_BRACKET
                }
            } else if data.is_swap {
                let mut c = if parent.last_foot == Some(foot) {
                    COST_FOOT_SWAP_REPEAT
                } else {
                    COST_FOOT_SWAP
                };
                if parent.last_link_was_bracket {
                    c += if aggressive {
                        COST_FOOT_SWAP_AFTER_BRACKET_AGGRESSIVE
                    } else {
                        COST_FOOT_SWAP_AFTER_BRACKET
                    };
                }
                if data.is_crossover {
                    c += COST_CROSSOVER;
                }
                if data.is_invert {
                    c += COST_INVERT;
                }
                c
            } else if data.is_swing {
                COST_SWING
            } else if data.is_invert {
                if data.is_stretch {
                    COST_INVERT_STRETCH
                } else {
                    COST_INVERT
                }
            } else if data.is_crossover {
                if data.is_stretch {
                    COST_CROSSOVER_STRETCH
                } else {
                    COST_CROSSOVER
                }
            } else if step == StepType::SameArrow {
                // A jack: the same foot re-striking its arrow. An alternating
                // swap reads easier at speed, so jacks sit above swap cost.
                if !jump && parent.last_foot == Some(foot) {
                    COST_SAME_ARROW_JACK
                } else {
                    COST_SAME_ARROW
                }
            } else if data.is_stretch {
                COST_NEW_ARROW_STRETCH
            } else {
                COST_NEW_ARROW
            };

            // Double and triple stepping: the same foot moving to fresh
            // arrows in a row while the other foot is free to alternate.
            let moves_to_new_arrow = !data.is_bracket
                && !data.is_one_arrow_bracket
                && !data.is_swap
                && step != StepType::SameArrow;
            if !jump && moves_to_new_arrow && parent.last_foot == Some(foot) {
                let other_holding = parent_node.foot_is_holding(foot.other());
                if !other_holding {
                    foot_cost += if parent.prev_last_foot == Some(foot) {
                        COST_TRIPLE_STEP
                    } else if self.mine_indicates_foot_must_vacate(parent.graph_node, foot) {
                        COST_DOUBLE_STEP_MINE_INDICATED
                    } else {
                        COST_DOUBLE_STEP
                    };
                }
            }

            cost += foot_cost;
        }

        if jump {
            cost += COST_JUMP;
            // A jump that forces a planted foot off one of its own target
            // arrows reads worse than a bracket would.
            cost += self.jump_forced_off_cost(parent.graph_node, link, child_id);
        }
        cost
    }

    /// Extra cost when a jump pushes a planted foot off an arrow the jump
    /// itself still needs, handing that arrow to the other foot.
    fn jump_forced_off_cost(
        &self,
        parent_graph_node: usize,
        link: &GraphLink,
        child_id: usize,
    ) -> f64 {
        let parent_node = self.graph.node(parent_graph_node);
        let child_node = self.graph.node(child_id);
        let mut total = 0.0;
        for foot in FEET {
            let other = foot.other() as usize;
            for portion in &parent_node.state[foot as usize] {
                if !portion.is_contact() {
                    continue;
                }
                let arrow = portion.arrow;
                let still_there = child_node.state[foot as usize]
                    .iter()
                    .any(|p| p.arrow == arrow && p.is_contact());
                if still_there {
                    continue;
                }
                let other_acts_there = (0..NUM_FOOT_PORTIONS).any(|p| {
                    link.steps[other][p].valid
                        && child_node.state[other][p].arrow == arrow
                });
                if other_acts_there {
                    total += COST_JUMP_FOOT_FORCED_OFF;
                }
            }
        }
        total
    }

    fn best_of(&self, frontier: &[usize]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for &idx in frontier {
            match best {
                None => best = Some(idx),
                Some(current) => {
                    let node = &self.arena[idx];
                    if self.candidate_beats(
                        node.total_cost,
                        node.total_orientation_cost,
                        node.local_cost,
                        node.local_min_ordinal,
                        node.prev,
                        current,
                    ) {
                        best = Some(idx);
                    }
                }
            }
        }
        best
    }
}

/// What one chart position requires of a transition.
struct PositionDemand {
    position: i32,
    time: f64,
    /// lane -> required instantaneous state.
    steps: Vec<(usize, SearchState)>,
    releases: Vec<usize>,
    sustained: Vec<usize>,
}

fn expand_phase(
    search: &mut Search<'_>,
    frontier: &[usize],
    demand: &PositionDemand,
    release_phase: bool,
) -> Vec<usize> {
    let mut best_per_node: HashMap<usize, usize> = HashMap::new();

    for &parent_idx in frontier {
        let parent_graph_node = search.arena[parent_idx].graph_node;
        let parent_node = search.graph.node(parent_graph_node);
        for (link, children) in &parent_node.links {
            if release_phase {
                if !link.is_release() {
                    continue;
                }
            } else {
                if link.is_release() || link.is_blank() {
                    continue;
                }
                if link
                    .steps
                    .iter()
                    .flatten()
                    .any(|s| s.valid && s.action == FootAction::Release)
                {
                    continue;
                }
                if search.method == BracketParsingMethod::NoBrackets && link_has_any_bracket(link) {
                    continue;
                }
            }

            for &child_id in children {
                let Some(instance) = match_demand(search.graph, parent_graph_node, link, child_id, demand, release_phase)
                else {
                    continue;
                };

                let orientation_add = search.orientation_cost(child_id);
                let local_cost = search.transition_cost(parent_idx, link, child_id);
                let parent = &search.arena[parent_idx];
                let total_cost = parent.total_cost + local_cost;
                let orientation = parent.total_orientation_cost + orientation_add;
                let ordinal = link.min_step_ordinal();

                let replace = match best_per_node.get(&child_id) {
                    Some(&incumbent) => {
                        if search.candidate_beats(
                            total_cost,
                            orientation,
                            local_cost,
                            ordinal,
                            Some(parent_idx),
                            incumbent,
                        ) {
                            Some(incumbent)
                        } else {
                            None
                        }
                    }
                    None => None,
                };
                if best_per_node.contains_key(&child_id) && replace.is_none() {
                    continue;
                }

                let (last_foot, prev_last_foot) = if release_phase {
                    (parent.last_foot, parent.prev_last_foot)
                } else if link.is_jump() {
                    (None, parent.last_foot)
                } else {
                    let foot = FEET
                        .into_iter()
                        .find(|&f| link.foot_is_valid(f));
                    (foot, parent.last_foot)
                };
                let node = ChartSearchNode {
                    graph_node: child_id,
                    position: demand.position,
                    time: demand.time,
                    total_cost,
                    total_orientation_cost: orientation,
                    local_cost,
                    local_min_ordinal: ordinal,
                    prev: Some(parent_idx),
                    link: instance,
                    last_foot,
                    prev_last_foot,
                    last_link_was_bracket: if release_phase {
                        parent.last_link_was_bracket
                    } else {
                        link_has_full_bracket(link)
                    },
                    num_children: 0,
                };
                let new_idx = search.arena.len();
                search.arena.push(node);
                search.arena[parent_idx].num_children += 1;
                if let Some(old) = replace {
                    search.detach(old);
                }
                best_per_node.insert(child_id, new_idx);
            }
        }
    }

    best_per_node.into_values().collect()
}

/// Validates a transition against a position's demands and annotates it.
fn match_demand(
    graph: &StepGraph,
    parent_graph_node: usize,
    link: &GraphLink,
    child_id: usize,
    demand: &PositionDemand,
    release_phase: bool,
) -> Option<GraphLinkInstance> {
    let child = graph.node(child_id);
    let parent = graph.node(parent_graph_node);

    if release_phase {
        // Exactly the released lanes, nothing else.
        let mut remaining: Vec<usize> = demand.releases.clone();
        for foot in FEET {
            for portion in 0..NUM_FOOT_PORTIONS {
                let slot = link.steps[foot as usize][portion];
                if !slot.valid {
                    continue;
                }
                let arrow = parent.state[foot as usize][portion].arrow;
                let Some(i) = remaining.iter().position(|&l| l as isize == arrow) else {
                    return None;
                };
                remaining.swap_remove(i);
            }
        }
        if !remaining.is_empty() {
            return None;
        }
        return Some(GraphLinkInstance::new(*link));
    }

    let mut instance = GraphLinkInstance::new(*link);
    let mut remaining: Vec<(usize, SearchState)> = demand.steps.clone();

    for foot in FEET {
        for portion in 0..NUM_FOOT_PORTIONS {
            let slot = link.steps[foot as usize][portion];
            if !slot.valid {
                continue;
            }
            let arrow = child.state[foot as usize][portion].arrow;
            if arrow < 0 {
                return None;
            }
            let lane = arrow as usize;
            if demand.sustained.contains(&lane) {
                return None;
            }
            let Some(i) = remaining.iter().position(|&(l, _)| l == lane) else {
                return None;
            };
            let (_, state) = remaining.swap_remove(i);
            match state {
                SearchState::Tap => {
                    if slot.action != FootAction::Tap {
                        return None;
                    }
                }
                SearchState::Fake => {
                    if slot.action != FootAction::Tap {
                        return None;
                    }
                    instance.instance_types[foot as usize][portion] = InstanceStepType::Fake;
                }
                SearchState::Lift => {
                    if slot.action != FootAction::Tap {
                        return None;
                    }
                    instance.instance_types[foot as usize][portion] = InstanceStepType::Lift;
                }
                SearchState::Hold => {
                    if slot.action != FootAction::Hold {
                        return None;
                    }
                }
                SearchState::Roll => {
                    if slot.action != FootAction::Hold {
                        return None;
                    }
                    instance.instance_types[foot as usize][portion] = InstanceStepType::Roll;
                }
                _ => return None,
            }
        }
    }
    if !remaining.is_empty() {
        return None;
    }

    // Sustained holds must survive the transition, and nothing else may be
    // held afterwards.
    for &lane in &demand.sustained {
        let held = child
            .state
            .iter()
            .flatten()
            .any(|p| p.arrow == lane as isize && p.state == GraphArrowState::Held);
        if !held {
            return None;
        }
    }
    for foot_state in &child.state {
        for p in foot_state {
            if p.is_valid() && p.state == GraphArrowState::Held {
                let lane = p.arrow as usize;
                let fresh_hold = demand
                    .steps
                    .iter()
                    .any(|&(l, s)| l == lane && matches!(s, SearchState::Hold | SearchState::Roll));
                if !fresh_hold && !demand.sustained.contains(&lane) {
                    return None;
                }
            }
        }
    }
    Some(instance)
}

type RecordedMine = (i32, f64, usize);

fn search(
    events: &[NoteEvent],
    graph: &StepGraph,
    method: BracketParsingMethod,
    chart_id: &str,
) -> Result<(Vec<StepEvent>, Vec<RecordedMine>), Error> {
    let lanes = graph.pad.num_arrows();
    let mut search = Search::new(graph, method);
    let start_time = events.first().map_or(0.0, |e| e.time - 1.0);
    search.arena.push(ChartSearchNode {
        graph_node: graph.root(),
        position: events.first().map_or(0, |e| e.position.saturating_sub(1)),
        time: start_time,
        total_cost: 0.0,
        total_orientation_cost: 0.0,
        local_cost: 0.0,
        local_min_ordinal: 0,
        prev: None,
        link: GraphLinkInstance::default(),
        last_foot: None,
        prev_last_foot: None,
        last_link_was_bracket: false,
        num_children: 0,
    });
    let mut frontier = vec![0usize];
    let mut lane_states = vec![SearchState::Empty; lanes];
    let mut mines: Vec<RecordedMine> = Vec::new();

    let mut i = 0;
    while i < events.len() {
        let position = events[i].position;
        let time = events[i].time;
        let mut releases = Vec::new();
        let mut step_notes: Vec<(usize, SearchState)> = Vec::new();
        let mut mine_lanes: Vec<(usize, f64)> = Vec::new();
        while i < events.len() && events[i].position == position {
            let event = events[i];
            match event.kind {
                NoteKind::HoldEnd => releases.push(event.lane),
                NoteKind::Mine => {
                    mines.push((position, event.time, event.lane));
                    mine_lanes.push((event.lane, event.time));
                }
                NoteKind::Tap => step_notes.push((event.lane, SearchState::Tap)),
                NoteKind::Fake => step_notes.push((event.lane, SearchState::Fake)),
                NoteKind::Lift => step_notes.push((event.lane, SearchState::Lift)),
                NoteKind::HoldStart => step_notes.push((event.lane, SearchState::Hold)),
                NoteKind::RollStart => step_notes.push((event.lane, SearchState::Roll)),
            }
            i += 1;
        }

        // Releases resolve before mines register and steps land.
        if !releases.is_empty() {
            let demand = PositionDemand {
                position,
                time,
                steps: Vec::new(),
                releases: releases.clone(),
                sustained: Vec::new(),
            };
            frontier = expand_phase(&mut search, &frontier, &demand, true);
            if frontier.is_empty() {
                warn!(
                    component = "ExpressedChart",
                    chart = chart_id,
                    position,
                    "search exhausted while matching releases"
                );
                return Err(Error::ExpressionFailure {
                    chart: chart_id.to_string(),
                    position,
                });
            }
            for &lane in &releases {
                lane_states[lane] = SearchState::Empty;
            }
        }

        search.note_mines(&mine_lanes, time);

        if !step_notes.is_empty() {
            for &(lane, state) in &step_notes {
                lane_states[lane] = state;
            }
            let sustained: Vec<usize> = lane_states
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_sustained())
                .map(|(lane, _)| lane)
                .collect();
            let demand = PositionDemand {
                position,
                time,
                steps: step_notes.clone(),
                releases: Vec::new(),
                sustained,
            };
            frontier = expand_phase(&mut search, &frontier, &demand, false);
            if frontier.is_empty() {
                warn!(
                    component = "ExpressedChart",
                    chart = chart_id,
                    position,
                    "search exhausted while matching steps"
                );
                return Err(Error::ExpressionFailure {
                    chart: chart_id.to_string(),
                    position,
                });
            }
            for state in &mut lane_states {
                *state = match *state {
                    SearchState::Hold => SearchState::Holding,
                    SearchState::Roll => SearchState::Rolling,
                    SearchState::Tap | SearchState::Fake | SearchState::Lift => SearchState::Empty,
                    other => other,
                };
            }
        }
    }

    // Keep the single cheapest path; detach every competitor.
    let best = search
        .best_of(&frontier)
        .expect("frontier cannot be empty after a successful walk");
    for &idx in &frontier {
        if idx != best {
            search.detach(idx);
        }
    }

    let mut path = Vec::new();
    let mut cursor = Some(best);
    while let Some(idx) = cursor {
        let node = &search.arena[idx];
        if node.prev.is_some() {
            let graph_node = graph.node(node.graph_node);
            let mut acted_arrows = Vec::new();
            for foot in FEET {
                for portion in 0..NUM_FOOT_PORTIONS {
                    if node.link.link.steps[foot as usize][portion].valid {
                        let arrow = graph_node.state[foot as usize][portion].arrow;
                        if arrow >= 0 {
                            acted_arrows.push(arrow as usize);
                        }
                    }
                }
            }
            acted_arrows.sort_unstable();
            path.push(StepEvent {
                position: node.position,
                time: node.time,
                link: node.link,
                node: node.graph_node,
                acted_arrows,
            });
        }
        cursor = node.prev;
    }
    path.reverse();
    Ok((path, mines))
}

/// Associates each mine with the Nth most recent (or upcoming) arrow.
fn resolve_mines(
    graph: &StepGraph,
    step_events: &[StepEvent],
    mines: &[RecordedMine],
) -> Vec<MineEvent> {
    // Flatten the chosen path into per-position step occurrences.
    let transitions: Vec<mines::ChartTransition> = step_events
        .iter()
        .map(|e| (e.position, graph.node(e.node).state, e.link.link))
        .collect();
    let (_, occurrences) = mines::releases_and_steps(&transitions);

    let mut out = Vec::with_capacity(mines.len());
    for &(position, time, lane) in mines {
        let before: Vec<FootArrowEvent> = occurrences
            .iter()
            .filter(|e| e.position < position)
            .rev()
            .copied()
            .collect();
        if let Some((n, foot)) = mines::how_recent(&before, lane) {
            out.push(MineEvent {
                position,
                time,
                original_arrow: lane,
                mine_type: MineType::AfterArrow,
                arrow_is_nth_closest: n,
                foot_associated: Some(foot),
            });
            continue;
        }
        let after: Vec<FootArrowEvent> = occurrences
            .iter()
            .filter(|e| e.position > position)
            .copied()
            .collect();
        if let Some((n, foot)) = mines::how_recent(&after, lane) {
            out.push(MineEvent {
                position,
                time,
                original_arrow: lane,
                mine_type: MineType::BeforeArrow,
                arrow_is_nth_closest: n,
                foot_associated: Some(foot),
            });
            continue;
        }
        out.push(MineEvent {
            position,
            time,
            original_arrow: lane,
            mine_type: MineType::NoArrow,
            arrow_is_nth_closest: 0,
            foot_associated: None,
        });
    }
    out
}
