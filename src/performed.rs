//! Performed-chart search: realizing expressed intent on a target pad.
//!
//! Each expressed link expands into an ordered list of acceptable replacement
//! links (configurable fallbacks, with per-foot blanks always available), and
//! a prune-per-state search walks the target graph under a lexicographic cost
//! vector: fidelity first, then readability, then distributional shaping, and
//! a seeded random weight last so equal charts stay reproducible.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::config::PerformedChartConfig;
use crate::error::Error;
use crate::events::{
    ChartOutputNote, LaneHoldEndNote, LaneHoldStartNote, LaneNote, LaneTapNote,
};
use crate::expressed::{ExpressedChart, MineType, StepEvent};
use crate::graph::{GraphLink, GraphLinkInstance, GraphLinkStep, StepGraph};
use crate::mines::{self, FootArrowEvent};
use crate::step_types::{
    step_data, Foot, FootAction, GraphArrowState, InstanceStepType, StepType, FEET, NUM_FEET,
    NUM_FOOT_PORTIONS,
};

const BLANK_STEP_COST: f64 = 1000.0;
const BLANK_SINGLE_STEP_COST: f64 = 100.0;
const INDIVIDUAL_DROPPED_ARROW_STEP_COST: f64 = 10.0;

// --- Fallback replacement links ---

/// One acceptable stand-in for an expressed link on the target graph.
#[derive(Debug, Clone)]
pub struct LinkReplacement {
    pub link: GraphLink,
    pub blank: bool,
    pub single_foot_blank: bool,
    pub dropped_portions: usize,
    pub fallback_index: usize,
    pub num_fallbacks: usize,
}

impl LinkReplacement {
    fn sort_key(&self) -> (bool, bool, usize, usize, GraphLink) {
        (
            self.blank,
            self.single_foot_blank,
            self.dropped_portions,
            self.fallback_index,
            self.link,
        )
    }
}

/// Process-wide replacement cache keyed by (config identity, source link).
/// Resolution is deterministic, so concurrent charts sharing a config reuse
/// entries freely.
static REPLACEMENT_CACHE: LazyLock<
    RwLock<HashMap<(u64, GraphLink), Arc<Vec<LinkReplacement>>>>,
> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Per-foot variant generated from one fallback entry.
#[derive(Debug, Clone)]
struct FootVariant {
    /// Slots for this foot only.
    slots: [GraphLinkStep; NUM_FOOT_PORTIONS],
    step_type: Option<StepType>,
    blank: bool,
    dropped_portions: usize,
    fallback_index: usize,
}

fn source_foot_actions(link: &GraphLink, foot: Foot) -> Vec<FootAction> {
    link.steps[foot as usize]
        .iter()
        .filter(|s| s.valid)
        .map(|s| s.action)
        .collect()
}

fn foot_variants(
    link: &GraphLink,
    foot: Foot,
    fallbacks: &HashMap<StepType, Vec<StepType>>,
) -> Vec<FootVariant> {
    let mut variants = Vec::new();
    let Some(source_step) = link.foot_step_type(foot) else {
        // Foot absent in the source: it stays absent.
        variants.push(FootVariant {
            slots: [GraphLinkStep::default(); NUM_FOOT_PORTIONS],
            step_type: None,
            blank: false,
            dropped_portions: 0,
            fallback_index: 0,
        });
        return variants;
    };

    let source_actions = source_foot_actions(link, foot);
    let source_portions = source_actions.len();
    let list = fallbacks
        .get(&source_step)
        .cloned()
        .unwrap_or_else(|| vec![source_step]);

    for (index, replacement) in list.iter().enumerate() {
        let data = step_data(*replacement);
        let mut slots = [GraphLinkStep::default(); NUM_FOOT_PORTIONS];
        let acting: Vec<usize> = data
            .portion_moves
            .iter()
            .enumerate()
            .filter(|(_, m)| !matches!(m, crate::step_types::PortionMove::None))
            .map(|(portion, _)| portion)
            .collect();
        for (slot_index, &portion) in acting.iter().enumerate() {
            let action = source_actions
                .get(slot_index)
                .or_else(|| source_actions.first())
                .copied()
                .unwrap_or(FootAction::Tap);
            slots[portion] = GraphLinkStep {
                valid: true,
                step: *replacement,
                action,
            };
        }
        variants.push(FootVariant {
            slots,
            step_type: Some(*replacement),
            blank: false,
            dropped_portions: source_portions.saturating_sub(acting.len()),
            fallback_index: index,
        });
    }

    // A blank variant for this foot is always available.
    variants.push(FootVariant {
        slots: [GraphLinkStep::default(); NUM_FOOT_PORTIONS],
        step_type: None,
        blank: true,
        dropped_portions: source_portions,
        fallback_index: list.len(),
    });
    variants
}

/// Resolves the ordered replacement list for one expressed link, consulting
/// and populating the process-wide cache.
pub(crate) fn resolve_replacements(
    config_identity: u64,
    fallbacks: &HashMap<StepType, Vec<StepType>>,
    link: &GraphLink,
) -> Arc<Vec<LinkReplacement>> {
    let key = (config_identity, *link);
    if let Some(found) = REPLACEMENT_CACHE.read().expect("cache poisoned").get(&key) {
        return Arc::clone(found);
    }

    let left_variants = foot_variants(link, Foot::Left, fallbacks);
    let right_variants = foot_variants(link, Foot::Right, fallbacks);
    let source_is_jump = link.is_jump();

    let mut out: Vec<LinkReplacement> = Vec::new();
    for lv in &left_variants {
        for rv in &right_variants {
            // Jumps only accept jump-eligible halves on both sides.
            if source_is_jump && !lv.blank && !rv.blank {
                let eligible = |v: &FootVariant| {
                    v.step_type
                        .is_none_or(|t| step_data(t).can_be_used_in_jump)
                };
                if !eligible(lv) || !eligible(rv) {
                    continue;
                }
            }
            let mut replacement_link = GraphLink::default();
            replacement_link.steps[Foot::Left as usize] = lv.slots;
            replacement_link.steps[Foot::Right as usize] = rv.slots;

            let blank = replacement_link.is_blank();
            let left_present = link.foot_is_valid(Foot::Left);
            let right_present = link.foot_is_valid(Foot::Right);
            let single_foot_blank = !blank
                && ((left_present && lv.blank) || (right_present && rv.blank));
            let replacement = LinkReplacement {
                link: replacement_link,
                blank,
                single_foot_blank,
                dropped_portions: lv.dropped_portions + rv.dropped_portions,
                fallback_index: lv.fallback_index + rv.fallback_index,
                num_fallbacks: left_variants.len() + right_variants.len(),
            };
            if !out.iter().any(|r| r.link == replacement.link) {
                out.push(replacement);
            }
        }
    }
    out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let arc = Arc::new(out);
    REPLACEMENT_CACHE
        .write()
        .expect("cache poisoned")
        .insert(key, Arc::clone(&arc));
    arc
}

// --- Cost vector ---

/// Accumulated search costs, compared lexicographically in field order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CostVector {
    fallback_step: f64,
    misleading: u32,
    ambiguous: u32,
    over_max_same_arrow: u32,
    stretch: f64,
    travel_distance: f64,
    travel_speed: f64,
    section_step_type: f64,
    facing: f64,
    lateral_speed: f64,
    distribution: f64,
    source_mismatch: u32,
    random_weight: f64,
}

#[inline(always)]
fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

impl CostVector {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_f64(self.fallback_step, other.fallback_step)
            .then(self.misleading.cmp(&other.misleading))
            .then(self.ambiguous.cmp(&other.ambiguous))
            .then(self.over_max_same_arrow.cmp(&other.over_max_same_arrow))
            .then(cmp_f64(self.stretch, other.stretch))
            .then(cmp_f64(self.travel_distance, other.travel_distance))
            .then(cmp_f64(self.travel_speed, other.travel_speed))
            .then(cmp_f64(self.section_step_type, other.section_step_type))
            .then(cmp_f64(self.facing, other.facing))
            .then(cmp_f64(self.lateral_speed, other.lateral_speed))
            .then(cmp_f64(self.distribution, other.distribution))
            .then(self.source_mismatch.cmp(&other.source_mismatch))
            .then(cmp_f64(self.random_weight, other.random_weight))
    }
}

// --- Performance nodes ---

/// A node of the final doubly linked performance chain.
#[derive(Debug, Clone)]
pub enum PerformanceNode {
    Step {
        position: i32,
        time: f64,
        graph_node: usize,
        link: GraphLinkInstance,
        prev: Option<usize>,
        next: Option<usize>,
    },
    Mine {
        position: i32,
        arrow: usize,
        prev: Option<usize>,
        next: Option<usize>,
    },
}

impl PerformanceNode {
    #[must_use]
    pub const fn position(&self) -> i32 {
        match self {
            Self::Step { position, .. } | Self::Mine { position, .. } => *position,
        }
    }
}

/// A concrete foot-by-foot playthrough of an expressed chart on a target pad.
#[derive(Debug, Clone)]
pub struct PerformedChart {
    nodes: Vec<PerformanceNode>,
    first: Option<usize>,
    /// How many positions exceeded `MaxSameArrowsInARowPerFoot` on the chosen
    /// path; a diagnostic for jack-limiting configs.
    pub over_max_same_arrow_steps: u32,
}

impl PerformedChart {
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.first
    }

    #[must_use]
    pub fn node(&self, id: usize) -> &PerformanceNode {
        &self.nodes[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformanceNode> {
        let mut cursor = self.first;
        std::iter::from_fn(move || {
            let id = cursor?;
            let node = &self.nodes[id];
            cursor = match node {
                PerformanceNode::Step { next, .. } | PerformanceNode::Mine { next, .. } => *next,
            };
            Some(node)
        })
    }

    /// Builds a performance of `expressed` on `graph`.
    ///
    /// `random_seed` drives every random decision, making output reproducible.
    pub fn build(
        expressed: &ExpressedChart,
        graph: &StepGraph,
        config: &PerformedChartConfig,
        random_seed: u64,
        chart_id: &str,
    ) -> Result<Self, Error> {
        config.validate()?;
        let fallbacks = config
            .resolve_fallbacks()
            .map_err(Error::InvalidConfig)?;
        let weights = config.normalized_arrow_weights(&graph.pad.name, graph.pad.num_arrows())?;

        let searcher = Searcher {
            graph,
            config,
            config_identity: config.fallback_identity(),
            fallbacks,
            weights,
            avg_nps: average_nps(&expressed.step_events),
        };

        let mut furthest_position = expressed
            .step_events
            .first()
            .map_or(0, |e| e.position);
        for (tier, roots) in root_tiers(graph).into_iter().enumerate() {
            for root in roots {
                let mut rng = StdRng::seed_from_u64(random_seed);
                match searcher.search(expressed, root, &mut rng) {
                    Ok((steps, over_max_same_arrow_steps)) => {
                        let mut chart = assemble(steps);
                        chart.over_max_same_arrow_steps = over_max_same_arrow_steps;
                        place_mines(&mut chart, expressed, graph, &mut rng, chart_id);
                        info!(
                            component = "PerformedChart",
                            chart = chart_id,
                            tier,
                            root,
                            "performed chart"
                        );
                        return Ok(chart);
                    }
                    Err(reached) => furthest_position = furthest_position.max(reached),
                }
            }
        }
        warn!(
            component = "PerformedChart",
            chart = chart_id,
            position = furthest_position,
            "every root tier exhausted"
        );
        Err(Error::PerformanceFailure {
            chart: chart_id.to_string(),
            position: furthest_position,
        })
    }

    /// Flattens the chain into output notes, preserving fake/lift/roll
    /// flavors.
    #[must_use]
    pub fn to_events(&self, graph: &StepGraph) -> Vec<ChartOutputNote> {
        let mut out = Vec::new();
        for node in self.iter() {
            match node {
                PerformanceNode::Mine { position, arrow, .. } => {
                    out.push(ChartOutputNote::Mine(LaneNote {
                        position: *position,
                        lane: *arrow,
                    }));
                }
                PerformanceNode::Step {
                    position,
                    graph_node,
                    link,
                    ..
                } => {
                    let state = &graph.node(*graph_node).state;
                    for foot in FEET {
                        for portion in 0..NUM_FOOT_PORTIONS {
                            let slot = link.link.steps[foot as usize][portion];
                            if !slot.valid {
                                continue;
                            }
                            let arrow = state[foot as usize][portion].arrow;
                            if arrow < 0 {
                                continue;
                            }
                            let lane = arrow as usize;
                            let flavor = link.instance_types[foot as usize][portion];
                            match slot.action {
                                FootAction::Tap => out.push(ChartOutputNote::Tap(LaneTapNote {
                                    position: *position,
                                    lane,
                                    flavor,
                                })),
                                FootAction::Hold => {
                                    out.push(ChartOutputNote::HoldStart(LaneHoldStartNote {
                                        position: *position,
                                        lane,
                                        roll: flavor == InstanceStepType::Roll,
                                    }));
                                }
                                FootAction::Release => {
                                    out.push(ChartOutputNote::HoldEnd(LaneHoldEndNote {
                                        position: *position,
                                        lane,
                                    }));
                                }
                            }
                        }
                    }
                }
            }
        }
        out.sort_by_key(ChartOutputNote::position);
        out
    }
}

fn average_nps(steps: &[StepEvent]) -> f64 {
    if steps.len() < 2 {
        return 0.0;
    }
    let duration = steps.last().unwrap().time - steps.first().unwrap().time;
    if duration <= f64::EPSILON {
        return 0.0;
    }
    (steps.len() - 1) as f64 / duration
}

/// Root candidates in preference tiers: the graph root first, then any simple
/// resting stance.
fn root_tiers(graph: &StepGraph) -> Vec<Vec<usize>> {
    let mut permissive = Vec::new();
    for (id, node) in graph.nodes() {
        if id == graph.root() {
            continue;
        }
        if node.orientation.is_inverted() {
            continue;
        }
        let simple = FEET.iter().all(|&foot| {
            let state = &node.state[foot as usize];
            state[0].is_valid()
                && state[0].state == GraphArrowState::Resting
                && !state[1].is_valid()
        });
        if !simple {
            continue;
        }
        let crossed = {
            let left = node.state[Foot::Left as usize][0].arrow;
            let right = node.state[Foot::Right as usize][0].arrow;
            graph.pad.classify_pair(left, right).is_crossed()
        };
        if !crossed {
            permissive.push(id);
        }
    }
    vec![vec![graph.root()], permissive]
}

// --- Search ---

#[derive(Clone, Default)]
struct LateralTracker {
    /// Recent `(body_x, time)` samples, newest last, capped at the configured
    /// pattern length.
    history: Vec<(f64, f64)>,
}

impl LateralTracker {
    fn push(&mut self, body_x: f64, time: f64, cap: usize) {
        self.history.push((body_x, time));
        if self.history.len() > cap {
            self.history.remove(0);
        }
    }

    /// Steps per second and lateral arrows per second over a full
    /// unidirectional window, if one exists.
    fn unidirectional_rates(&self, cap: usize) -> Option<(f64, f64)> {
        if cap < 2 || self.history.len() < cap {
            return None;
        }
        let increasing = self.history.windows(2).all(|w| w[1].0 > w[0].0);
        let decreasing = self.history.windows(2).all(|w| w[1].0 < w[0].0);
        if !increasing && !decreasing {
            return None;
        }
        let (x0, t0) = self.history[0];
        let (x1, t1) = *self.history.last().unwrap();
        let dt = t1 - t0;
        if dt <= f64::EPSILON {
            return None;
        }
        Some((
            (self.history.len() - 1) as f64 / dt,
            (x1 - x0).abs() / dt,
        ))
    }
}

#[derive(Clone)]
struct PerfSearchNode {
    graph_node: usize,
    position: i32,
    time: f64,
    link_used: Option<GraphLinkInstance>,
    prev: Option<usize>,
    num_children: u32,
    costs: CostVector,
    last_foot: Option<Foot>,
    same_arrow_streak: [u32; NUM_FEET],
    lane_counts: Vec<u32>,
    /// same-arrow, new-arrow, bracketable-new-arrow step counts.
    step_kind_counts: [u32; 3],
    facing_inward: u32,
    facing_outward: u32,
    facing_total: u32,
    lateral: LateralTracker,
    /// Arrows released at `position`, for same-position step rejection.
    released_arrows: Vec<usize>,
}

struct Searcher<'a> {
    graph: &'a StepGraph,
    config: &'a PerformedChartConfig,
    config_identity: u64,
    fallbacks: HashMap<StepType, Vec<StepType>>,
    weights: Option<Vec<f64>>,
    avg_nps: f64,
}

impl Searcher<'_> {
    /// Runs the prune-each-level search from one root. On failure returns the
    /// furthest position reached.
    fn search(
        &self,
        expressed: &ExpressedChart,
        root: usize,
        rng: &mut StdRng,
    ) -> Result<(Vec<ChosenStep>, u32), i32> {
        let lanes = self.graph.pad.num_arrows();
        let mut arena: Vec<PerfSearchNode> = vec![PerfSearchNode {
            graph_node: root,
            position: expressed.step_events.first().map_or(0, |e| e.position),
            time: expressed.step_events.first().map_or(0.0, |e| e.time),
            link_used: None,
            prev: None,
            num_children: 0,
            costs: CostVector::default(),
            last_foot: None,
            same_arrow_streak: [0; NUM_FEET],
            lane_counts: vec![0; lanes],
            step_kind_counts: [0; 3],
            facing_inward: 0,
            facing_outward: 0,
            facing_total: 0,
            lateral: LateralTracker::default(),
            released_arrows: Vec::new(),
        }];
        let mut frontier = vec![0usize];
        let mut furthest = arena[0].position;

        for event in &expressed.step_events {
            let replacements =
                resolve_replacements(self.config_identity, &self.fallbacks, &event.link.link);
            let mut best: HashMap<usize, usize> = HashMap::new();

            for &parent_idx in &frontier {
                for replacement in replacements.iter() {
                    if replacement.blank {
                        let parent = &arena[parent_idx];
                        let mut costs = parent.costs;
                        costs.fallback_step += BLANK_STEP_COST
                            + replacement.fallback_index as f64
                                / replacement.num_fallbacks.max(1) as f64;
                        costs.random_weight += rng.random::<f64>();
                        let child = PerfSearchNode {
                            graph_node: parent.graph_node,
                            position: event.position,
                            time: event.time,
                            link_used: None,
                            prev: Some(parent_idx),
                            num_children: 0,
                            costs,
                            last_foot: parent.last_foot,
                            same_arrow_streak: parent.same_arrow_streak,
                            lane_counts: parent.lane_counts.clone(),
                            step_kind_counts: parent.step_kind_counts,
                            facing_inward: parent.facing_inward,
                            facing_outward: parent.facing_outward,
                            facing_total: parent.facing_total,
                            lateral: parent.lateral.clone(),
                            released_arrows: if parent.position == event.position {
                                parent.released_arrows.clone()
                            } else {
                                Vec::new()
                            },
                        };
                        record_candidate(&mut arena, &mut best, parent_idx, child);
                        continue;
                    }

                    let parent_graph_node = arena[parent_idx].graph_node;
                    let Some(children) = self
                        .graph
                        .node(parent_graph_node)
                        .children_for(&replacement.link)
                    else {
                        continue;
                    };
                    for &child_graph in children {
                        let Some(child) = self.step_candidate(
                            &arena, parent_idx, event, replacement, child_graph, rng,
                        ) else {
                            continue;
                        };
                        record_candidate(&mut arena, &mut best, parent_idx, child);
                    }
                }
            }

            let mut next_frontier: Vec<usize> = best.into_values().collect();
            next_frontier.sort_unstable();
            if next_frontier.is_empty() {
                return Err(furthest);
            }
            furthest = event.position;
            frontier = next_frontier;
        }

        let best = frontier
            .iter()
            .copied()
            .min_by(|&a, &b| arena[a].costs.cmp(&arena[b].costs))
            .expect("non-empty frontier");

        let over_max_same_arrow = arena[best].costs.over_max_same_arrow;
        let mut out = Vec::new();
        let mut cursor = Some(best);
        while let Some(idx) = cursor {
            let node = &arena[idx];
            if node.prev.is_some() {
                let blank = node.link_used.is_none();
                out.push((
                    node.position,
                    node.time,
                    node.graph_node,
                    node.link_used.unwrap_or_default(),
                    blank,
                ));
            }
            cursor = node.prev;
        }
        out.reverse();
        Ok((out, over_max_same_arrow))
    }

    /// Builds the candidate search node for stepping `replacement` into
    /// `child_graph`, or rejects it.
    #[allow(clippy::too_many_arguments)]
    fn step_candidate(
        &self,
        arena: &[PerfSearchNode],
        parent_idx: usize,
        event: &StepEvent,
        replacement: &LinkReplacement,
        child_graph: usize,
        rng: &mut StdRng,
    ) -> Option<PerfSearchNode> {
        let parent = &arena[parent_idx];
        let link = &replacement.link;
        let child_node = self.graph.node(child_graph);
        let is_release = link.is_release();

        // Acted arrows, per foot.
        let mut acted: Vec<(Foot, usize)> = Vec::new();
        for foot in FEET {
            for portion in 0..NUM_FOOT_PORTIONS {
                if link.steps[foot as usize][portion].valid {
                    let arrow = child_node.state[foot as usize][portion].arrow;
                    if arrow < 0 {
                        return None;
                    }
                    acted.push((foot, arrow as usize));
                }
            }
        }

        // Steps cannot land on arrows this same position just released.
        if !is_release && parent.position == event.position {
            if acted
                .iter()
                .any(|&(_, arrow)| parent.released_arrows.contains(&arrow))
            {
                return None;
            }
        }

        let mut costs = parent.costs;
        let foot_drop_cost = if replacement.single_foot_blank {
            BLANK_SINGLE_STEP_COST
        } else {
            replacement.dropped_portions as f64 * INDIVIDUAL_DROPPED_ARROW_STEP_COST
        };
        costs.fallback_step += foot_drop_cost
            + replacement.fallback_index as f64 / replacement.num_fallbacks.max(1) as f64;

        let mut same_arrow_streak = parent.same_arrow_streak;
        let mut step_kind_counts = parent.step_kind_counts;
        let mut lane_counts = parent.lane_counts.clone();
        let mut lateral = parent.lateral.clone();
        let mut facing_inward = parent.facing_inward;
        let mut facing_outward = parent.facing_outward;
        let mut facing_total = parent.facing_total;
        let mut last_foot = parent.last_foot;

        if !is_release {
            for &(_, arrow) in &acted {
                lane_counts[arrow] += 1;
            }

            // Readability counters.
            if self.is_misleading_jump(parent.graph_node, link, &acted) {
                costs.misleading += 1;
            }
            if self.is_ambiguous_step(parent, link, &acted) {
                costs.ambiguous += 1;
            }

            // Same-arrow streaks per foot.
            let max_streak = self.config.max_same_arrows_in_a_row_per_foot;
            for foot in FEET {
                let Some(step) = link.foot_step_type(foot) else {
                    continue;
                };
                if step == StepType::SameArrow {
                    same_arrow_streak[foot as usize] += 1;
                    if max_streak > 0 && same_arrow_streak[foot as usize] > max_streak {
                        costs.over_max_same_arrow += 1;
                    }
                } else {
                    same_arrow_streak[foot as usize] = 0;
                }
            }

            // Stretch between the feet after the step.
            let st = &self.config.step_tightening;
            let feet_distance = f64::from(self.graph.feet_distance(child_graph));
            costs.stretch +=
                normalized_overshoot(feet_distance, st.stretch_distance_min, st.stretch_distance_max);

            // Travel distance and speed per moving foot.
            let dt = event.time - parent.time;
            for foot in FEET {
                if !link.foot_is_valid(foot) {
                    continue;
                }
                let (px, py) = self.graph.foot_position(parent.graph_node, foot);
                let (cx, cy) = self.graph.foot_position(child_graph, foot);
                let moved = f64::from(self.graph.pad.distance(px, py, cx, cy));
                if moved <= f64::EPSILON {
                    continue;
                }
                costs.travel_distance +=
                    normalized_overshoot(moved, st.travel_distance_min, st.travel_distance_max);
                if dt > f64::EPSILON && dt < st.travel_speed_max_time_seconds {
                    let span = (st.travel_speed_max_time_seconds
                        - st.travel_speed_min_time_seconds)
                        .max(f64::EPSILON);
                    let factor =
                        ((st.travel_speed_max_time_seconds - dt) / span).clamp(0.0, 1.0);
                    costs.travel_speed += moved * factor;
                }
            }

            // Section composition.
            let kind = self.step_kind(parent.graph_node, link, child_graph);
            step_kind_counts[kind] += 1;
            if let Some(weights) = &self.config.section_step_type_weights {
                let total: u32 = step_kind_counts.iter().sum();
                if total > 0 {
                    let weight_total =
                        weights.same_arrow + weights.new_arrow + weights.bracketable_new_arrow;
                    if weight_total > f64::EPSILON {
                        let targets = [
                            weights.same_arrow / weight_total,
                            weights.new_arrow / weight_total,
                            weights.bracketable_new_arrow / weight_total,
                        ];
                        costs.section_step_type = step_kind_counts
                            .iter()
                            .zip(targets)
                            .map(|(&count, target)| {
                                (f64::from(count) / f64::from(total) - target).abs()
                            })
                            .sum();
                    }
                }
            }

            // Facing shape: a vertically offset stance reads as angled
            // inward (left foot forward) or outward (right foot forward).
            let (_, ly) = self.graph.foot_position(child_graph, Foot::Left);
            let (_, ry) = self.graph.foot_position(child_graph, Foot::Right);
            facing_total += 1;
            if ly > ry + f32::EPSILON {
                facing_inward += 1;
            } else if ry > ly + f32::EPSILON {
                facing_outward += 1;
            }
            if facing_total > 0 {
                let inward = f64::from(facing_inward) / f64::from(facing_total);
                let outward = f64::from(facing_outward) / f64::from(facing_total);
                costs.facing = (inward - self.config.facing.max_inward_percentage).max(0.0)
                    + (outward - self.config.facing.max_outward_percentage).max(0.0);
            }

            // Lateral body movement over a sliding window.
            let (lx, _) = self.graph.foot_position(child_graph, Foot::Left);
            let (rx, _) = self.graph.foot_position(child_graph, Foot::Right);
            let lt = &self.config.lateral_tightening;
            lateral.push(f64::from(lx + rx) / 2.0, event.time, lt.pattern_length);
            if let Some((nps, speed)) = lateral.unidirectional_rates(lt.pattern_length) {
                let nps_trigger = nps > lt.absolute_nps
                    || (self.avg_nps > f64::EPSILON && nps > lt.relative_nps * self.avg_nps);
                if nps_trigger && speed > lt.speed {
                    costs.lateral_speed += speed - lt.speed;
                }
            }

            // Lane distribution against the configured weights.
            if let Some(weights) = &self.weights {
                let total: u32 = lane_counts.iter().sum();
                if total > 0 {
                    costs.distribution = lane_counts
                        .iter()
                        .zip(weights)
                        .map(|(&count, &target)| {
                            (f64::from(count) / f64::from(total) - target).abs()
                        })
                        .sum();
                }
            }

            // Prefer the literal source lanes when they exist on this pad.
            let mut acted_arrows: Vec<usize> = acted.iter().map(|&(_, a)| a).collect();
            acted_arrows.sort_unstable();
            if acted_arrows != event.acted_arrows {
                costs.source_mismatch += 1;
            }

            last_foot = if link.is_jump() {
                None
            } else {
                FEET.into_iter().find(|&f| link.foot_is_valid(f))
            };
        }

        costs.random_weight += rng.random::<f64>();

        let instance = map_instance(event, replacement);
        let released_arrows = if is_release {
            acted.iter().map(|&(_, a)| a).collect()
        } else if parent.position == event.position {
            parent.released_arrows.clone()
        } else {
            Vec::new()
        };
        Some(PerfSearchNode {
            graph_node: child_graph,
            position: event.position,
            time: event.time,
            link_used: Some(instance),
            prev: Some(parent_idx),
            num_children: 0,
            costs,
            last_foot,
            same_arrow_streak,
            lane_counts,
            step_kind_counts,
            facing_inward,
            facing_outward,
            facing_total,
            lateral,
            released_arrows,
        })
    }

    /// A NewArrow+NewArrow jump that a reasonable player would read as
    /// containing a same-arrow: a sibling link substituting SameArrow on one
    /// foot covers the same arrows.
    fn is_misleading_jump(
        &self,
        parent_graph_node: usize,
        link: &GraphLink,
        acted: &[(Foot, usize)],
    ) -> bool {
        if !link.is_jump() {
            return false;
        }
        let all_new = FEET.iter().all(|&f| {
            link.foot_step_type(f)
                .is_some_and(|t| t == StepType::NewArrow)
        });
        if !all_new {
            return false;
        }
        let mut ours: Vec<usize> = acted.iter().map(|&(_, a)| a).collect();
        ours.sort_unstable();

        let parent = self.graph.node(parent_graph_node);
        for (sibling, children) in &parent.links {
            if sibling == link || !sibling.is_jump() {
                continue;
            }
            let has_same = FEET.iter().any(|&f| {
                sibling
                    .foot_step_type(f)
                    .is_some_and(|t| t == StepType::SameArrow)
            });
            if !has_same {
                continue;
            }
            for &child in children {
                let mut theirs = acted_arrows_of(self.graph, child, sibling);
                theirs.sort_unstable();
                if theirs == ours {
                    return true;
                }
            }
        }
        false
    }

    /// A single new-arrow step with no alternation cue whose mirrored foot
    /// assignment covers the same arrows from the same parent.
    fn is_ambiguous_step(
        &self,
        parent: &PerfSearchNode,
        link: &GraphLink,
        acted: &[(Foot, usize)],
    ) -> bool {
        if link.is_jump() || parent.last_foot.is_some() {
            return false;
        }
        let Some(foot) = FEET.into_iter().find(|&f| link.foot_is_valid(f)) else {
            return false;
        };
        if link.foot_step_type(foot) != Some(StepType::NewArrow) {
            return false;
        }
        let mut ours: Vec<usize> = acted.iter().map(|&(_, a)| a).collect();
        ours.sort_unstable();

        let parent_node = self.graph.node(parent.graph_node);
        let other = foot.other();
        for (sibling, children) in &parent_node.links {
            if sibling == link || !sibling.foot_is_valid(other) || sibling.foot_is_valid(foot) {
                continue;
            }
            if sibling.foot_step_type(other) != Some(StepType::NewArrow) {
                continue;
            }
            for &child in children {
                let mut theirs = acted_arrows_of(self.graph, child, sibling);
                theirs.sort_unstable();
                if theirs == ours {
                    return true;
                }
            }
        }
        false
    }

    /// 0 = same arrow, 1 = new arrow, 2 = bracketable new arrow.
    fn step_kind(&self, parent_graph_node: usize, link: &GraphLink, child_graph: usize) -> usize {
        let mut kind = 0;
        for foot in FEET {
            let Some(step) = link.foot_step_type(foot) else {
                continue;
            };
            if step == StepType::SameArrow {
                continue;
            }
            kind = 1;
            // A new arrow adjacent enough to the foot's previous arrow to
            // bracket with it shapes future bracket opportunities.
            let prev = self.graph.node(parent_graph_node).state[foot as usize][0].arrow;
            let now = self.graph.node(child_graph).state[foot as usize][0].arrow;
            if prev >= 0 && now >= 0 && prev != now {
                let (a, b) = (prev as usize, now as usize);
                if self.graph.pad.is_bracketable_pair(foot, a, b)
                    || self.graph.pad.is_bracketable_pair(foot, b, a)
                {
                    return 2;
                }
            }
        }
        kind
    }
}

/// Carries the source's roll/fake/lift flavors onto the replacement.
fn map_instance(event: &StepEvent, replacement: &LinkReplacement) -> GraphLinkInstance {
    let mut instance = GraphLinkInstance::new(replacement.link);
    for foot in FEET {
        let source_flavor = event.link.instance_types[foot as usize]
            .iter()
            .find(|&&t| t != InstanceStepType::Default)
            .copied()
            .unwrap_or(InstanceStepType::Default);
        if source_flavor == InstanceStepType::Default {
            continue;
        }
        for portion in 0..NUM_FOOT_PORTIONS {
            if replacement.link.steps[foot as usize][portion].valid {
                instance.instance_types[foot as usize][portion] = source_flavor;
            }
        }
    }
    instance
}

fn acted_arrows_of(graph: &StepGraph, child: usize, link: &GraphLink) -> Vec<usize> {
    let node = graph.node(child);
    let mut out = Vec::new();
    for foot in FEET {
        for portion in 0..NUM_FOOT_PORTIONS {
            if link.steps[foot as usize][portion].valid {
                let arrow = node.state[foot as usize][portion].arrow;
                if arrow >= 0 {
                    out.push(arrow as usize);
                }
            }
        }
    }
    out
}

#[inline(always)]
fn normalized_overshoot(value: f64, min: f64, max: f64) -> f64 {
    if value <= min {
        return 0.0;
    }
    let span = (max - min).max(f64::EPSILON);
    ((value - min) / span).min(1.0)
}

/// Prune-per-state bookkeeping: keep only the cheapest candidate per graph
/// node, unlinking dead ancestors of the losers.
fn record_candidate(
    arena: &mut Vec<PerfSearchNode>,
    best: &mut HashMap<usize, usize>,
    parent_idx: usize,
    child: PerfSearchNode,
) {
    let key = child.graph_node;
    if let Some(&incumbent) = best.get(&key) {
        if child.costs.cmp(&arena[incumbent].costs) != Ordering::Less {
            return;
        }
        detach(arena, incumbent);
    }
    let idx = arena.len();
    arena.push(child);
    arena[parent_idx].num_children += 1;
    best.insert(key, idx);
}

fn detach(arena: &mut [PerfSearchNode], idx: usize) {
    let mut cur = idx;
    loop {
        let Some(parent) = arena[cur].prev else {
            break;
        };
        arena[parent].num_children -= 1;
        if arena[parent].num_children > 0 {
            break;
        }
        cur = parent;
    }
}

type ChosenStep = (i32, f64, usize, GraphLinkInstance, bool);

/// Builds the doubly linked chain from the chosen step sequence, dropping
/// blank placeholders.
fn assemble(steps: Vec<ChosenStep>) -> PerformedChart {
    let mut nodes = Vec::new();
    for (position, time, graph_node, link, blank) in steps {
        if blank {
            continue;
        }
        nodes.push(PerformanceNode::Step {
            position,
            time,
            graph_node,
            link,
            prev: None,
            next: None,
        });
    }
    let mut chart = PerformedChart {
        nodes,
        first: None,
        over_max_same_arrow_steps: 0,
    };
    relink(&mut chart);
    chart
}

/// Recomputes prev/next pointers after nodes are inserted or reordered.
fn relink(chart: &mut PerformedChart) {
    let mut order: Vec<usize> = (0..chart.nodes.len()).collect();
    order.sort_by_key(|&i| chart.nodes[i].position());
    for (rank, &id) in order.iter().enumerate() {
        let prev = if rank > 0 { Some(order[rank - 1]) } else { None };
        let next = order.get(rank + 1).copied();
        match &mut chart.nodes[id] {
            PerformanceNode::Step {
                prev: p, next: n, ..
            }
            | PerformanceNode::Mine {
                prev: p, next: n, ..
            } => {
                *p = prev;
                *n = next;
            }
        }
    }
    chart.first = order.first().copied();
}

/// Places expressed mines onto the performed chain.
fn place_mines(
    chart: &mut PerformedChart,
    expressed: &ExpressedChart,
    graph: &StepGraph,
    rng: &mut StdRng,
    chart_id: &str,
) {
    let lanes = graph.pad.num_arrows();

    // Step occurrences and hold spans of the settled chain.
    let transitions: Vec<mines::ChartTransition> = chart
        .iter()
        .filter_map(|node| match node {
            PerformanceNode::Step {
                position,
                graph_node,
                link,
                ..
            } => Some((*position, graph.node(*graph_node).state, link.link)),
            PerformanceNode::Mine { .. } => None,
        })
        .collect();
    let (releases, occurrences) = mines::releases_and_steps(&transitions);
    let hold_spans = mines::hold_spans(&releases, &occurrences);

    let mut mines_at: HashMap<i32, Vec<usize>> = HashMap::new();
    let mut placed: Vec<(i32, usize)> = Vec::new();

    for mine in &expressed.mine_events {
        let position = mine.position;
        let occupied_by_mines = mines_at.entry(position).or_default().clone();
        let free: Vec<bool> = (0..lanes)
            .map(|lane| {
                if occupied_by_mines.contains(&lane) {
                    return false;
                }
                let stepped = occurrences
                    .iter()
                    .any(|e| e.position == position && e.arrow == lane);
                if stepped {
                    return false;
                }
                let held = hold_spans
                    .iter()
                    .any(|&(l, start, end)| l == lane && start <= position && position < end);
                !held
            })
            .collect();

        let choice = match mine.mine_type {
            MineType::NoArrow => {
                let mut order: Vec<usize> = (0..lanes).collect();
                order.shuffle(rng);
                order.into_iter().find(|&lane| free[lane])
            }
            MineType::AfterArrow => {
                let before: Vec<FootArrowEvent> = occurrences
                    .iter()
                    .filter(|e| e.position < position)
                    .rev()
                    .copied()
                    .collect();
                mines::find_best_nth_most_recent_arrow(
                    &before,
                    mine.arrow_is_nth_closest,
                    mine.foot_associated,
                    &free,
                    rng,
                )
            }
            MineType::BeforeArrow => {
                let after: Vec<FootArrowEvent> = occurrences
                    .iter()
                    .filter(|e| e.position > position)
                    .copied()
                    .collect();
                mines::find_best_nth_most_recent_arrow(
                    &after,
                    mine.arrow_is_nth_closest,
                    mine.foot_associated,
                    &free,
                    rng,
                )
            }
        };

        match choice {
            Some(lane) => {
                mines_at.entry(position).or_default().push(lane);
                placed.push((position, lane));
            }
            None => {
                // One unplaceable mine is dropped, not a failure.
                warn!(
                    component = "PerformedChart",
                    chart = chart_id,
                    position,
                    "mine could not be placed; dropping it"
                );
            }
        }
    }

    for (position, lane) in placed {
        chart.nodes.push(PerformanceNode::Mine {
            position,
            arrow: lane,
            prev: None,
            next: None,
        });
    }
    relink(chart);
}
