//! Shared mine-placement logic.
//!
//! Mines associate with the Nth most recent arrow relative to their position.
//! Events sharing a position (jumps, brackets) share one ordinal so a mine
//! after a jump treats both landing arrows as equally recent.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::graph::{GraphLink, StateMatrix};
use crate::step_types::{Foot, FootAction, FEET, NUM_FOOT_PORTIONS};

/// One foot touching or leaving one arrow at one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FootArrowEvent {
    pub position: i32,
    pub arrow: usize,
    pub foot: Foot,
}

/// One settled transition of a chart: the position, the body state arrived
/// at, and the link that produced it.
pub type ChartTransition = (i32, StateMatrix, GraphLink);

/// Expands a settled transition sequence into per-foot, per-lane step and
/// release events.
///
/// A hold start is a step; a hold end is a release; a tap is a step and an
/// immediate release. The arriving links are consulted alongside the node
/// states because a same-arrow tap leaves the state matrix unchanged and is
/// invisible to a pure diff. Swapped-off portions turn Lifted and emit
/// nothing; the swapping foot's step covers the arrow.
#[must_use]
pub fn releases_and_steps(
    transitions: &[ChartTransition],
) -> (Vec<FootArrowEvent>, Vec<FootArrowEvent>) {
    let mut releases = Vec::new();
    let mut steps = Vec::new();

    for &(position, state, link) in transitions {
        for foot in FEET {
            for portion in 0..NUM_FOOT_PORTIONS {
                let slot = link.steps[foot as usize][portion];
                if !slot.valid {
                    continue;
                }
                let arrow = state[foot as usize][portion].arrow;
                if arrow < 0 {
                    continue;
                }
                let event = FootArrowEvent {
                    position,
                    arrow: arrow as usize,
                    foot,
                };
                match slot.action {
                    FootAction::Release => releases.push(event),
                    FootAction::Hold => steps.push(event),
                    FootAction::Tap => {
                        steps.push(event);
                        releases.push(event);
                    }
                }
            }
        }
    }
    (releases, steps)
}

/// Hold intervals `(lane, start, end)` implied by the event lists, with open
/// holds running to `i32::MAX`. A step without a release at its own position
/// opened a hold; the next release on that lane closes it.
#[must_use]
pub fn hold_spans(
    releases: &[FootArrowEvent],
    steps: &[FootArrowEvent],
) -> Vec<(usize, i32, i32)> {
    let mut spans = Vec::new();
    for step in steps {
        let tapped = releases
            .iter()
            .any(|r| r.position == step.position && r.arrow == step.arrow && r.foot == step.foot);
        if tapped {
            continue;
        }
        let end = releases
            .iter()
            .find(|r| r.arrow == step.arrow && r.position > step.position)
            .map_or(i32::MAX, |r| r.position);
        spans.push((step.arrow, step.position, end));
    }
    spans
}

/// Ordinal depth of the first occurrence of `arrow` in `events`, which must be
/// ordered nearest-first. Events sharing a position share an ordinal.
#[must_use]
pub fn how_recent(events: &[FootArrowEvent], arrow: usize) -> Option<(usize, Foot)> {
    let mut ordinal = 0;
    let mut current_position = None;
    for event in events {
        match current_position {
            None => current_position = Some(event.position),
            Some(p) if p != event.position => {
                ordinal += 1;
                current_position = Some(event.position);
            }
            Some(_) => {}
        }
        if event.arrow == arrow {
            return Some((ordinal, event.foot));
        }
    }
    None
}

/// Groups events into ordinal-depth buckets, nearest first.
fn depth_buckets(events: &[FootArrowEvent]) -> Vec<Vec<FootArrowEvent>> {
    let mut buckets: Vec<Vec<FootArrowEvent>> = Vec::new();
    let mut current_position = None;
    for event in events {
        match current_position {
            Some(p) if p == event.position => {}
            _ => {
                buckets.push(Vec::new());
                current_position = Some(event.position);
            }
        }
        buckets.last_mut().unwrap().push(*event);
    }
    buckets
}

fn pick_in_bucket(
    bucket: &[FootArrowEvent],
    desired_foot: Option<Foot>,
    free: &[bool],
) -> Option<usize> {
    if let Some(foot) = desired_foot {
        if let Some(event) = bucket.iter().find(|e| e.foot == foot && free[e.arrow]) {
            return Some(event.arrow);
        }
    }
    bucket.iter().find(|e| free[e.arrow]).map(|e| e.arrow)
}

/// Finds the best arrow at the desired recency depth.
///
/// Tries the exact depth first (preferring the desired foot), then steps the
/// depth down toward the most recent, then outward past the desired depth,
/// and finally falls back to a random free lane.
#[must_use]
pub fn find_best_nth_most_recent_arrow(
    events: &[FootArrowEvent],
    desired_n: usize,
    desired_foot: Option<Foot>,
    free: &[bool],
    rng: &mut StdRng,
) -> Option<usize> {
    let buckets = depth_buckets(events);

    if let Some(bucket) = buckets.get(desired_n) {
        if let Some(arrow) = pick_in_bucket(bucket, desired_foot, free) {
            return Some(arrow);
        }
    }
    for n in (0..desired_n.min(buckets.len())).rev() {
        if let Some(arrow) = pick_in_bucket(&buckets[n], desired_foot, free) {
            return Some(arrow);
        }
    }
    for bucket in buckets.iter().skip(desired_n + 1) {
        if let Some(arrow) = pick_in_bucket(bucket, desired_foot, free) {
            return Some(arrow);
        }
    }

    let mut lanes: Vec<usize> = (0..free.len()).collect();
    lanes.shuffle(rng);
    lanes.into_iter().find(|&lane| free[lane])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn event(position: i32, arrow: usize, foot: Foot) -> FootArrowEvent {
        FootArrowEvent {
            position,
            arrow,
            foot,
        }
    }

    #[test]
    fn events_sharing_a_position_share_an_ordinal() {
        // A jump at position 96, then a tap at 48, nearest first.
        let events = vec![
            event(96, 1, Foot::Left),
            event(96, 2, Foot::Right),
            event(48, 0, Foot::Left),
        ];
        assert_eq!(how_recent(&events, 1), Some((0, Foot::Left)));
        assert_eq!(how_recent(&events, 2), Some((0, Foot::Right)));
        assert_eq!(how_recent(&events, 0), Some((1, Foot::Left)));
        assert_eq!(how_recent(&events, 3), None);
    }

    #[test]
    fn best_nth_prefers_the_desired_foot_then_any_free_arrow() {
        let events = vec![
            event(96, 1, Foot::Left),
            event(96, 2, Foot::Right),
            event(48, 0, Foot::Left),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let free = vec![true; 4];
        assert_eq!(
            find_best_nth_most_recent_arrow(&events, 0, Some(Foot::Right), &free, &mut rng),
            Some(2)
        );
        // Right foot's arrow occupied: settle for the left one at that depth.
        let free = vec![true, true, false, true];
        assert_eq!(
            find_best_nth_most_recent_arrow(&events, 0, Some(Foot::Right), &free, &mut rng),
            Some(1)
        );
    }

    #[test]
    fn best_nth_reduces_depth_before_going_random() {
        let events = vec![
            event(96, 1, Foot::Left),
            event(48, 0, Foot::Right),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        // Depth 1 (arrow 0) is occupied; depth 0 still has a free arrow.
        let free = vec![false, true, true, true];
        assert_eq!(
            find_best_nth_most_recent_arrow(&events, 1, None, &free, &mut rng),
            Some(1)
        );
        // Nothing stepped is free: any free lane will do.
        let free = vec![false, false, true, true];
        let picked =
            find_best_nth_most_recent_arrow(&events, 1, None, &free, &mut rng).unwrap();
        assert!(picked == 2 || picked == 3);
        // No lane free at all.
        let free = vec![false; 4];
        assert_eq!(
            find_best_nth_most_recent_arrow(&events, 1, None, &free, &mut rng),
            None
        );
    }

    #[test]
    fn releases_and_steps_expand_holds_taps_and_swaps() {
        use crate::graph::{FootArrowState, GraphLinkStep};
        use crate::step_types::{GraphArrowState as G, StepType};

        let slot_link = |foot: Foot, action: FootAction| -> GraphLink {
            let mut link = GraphLink::default();
            link.steps[foot as usize][0] = GraphLinkStep {
                valid: true,
                step: StepType::NewArrow,
                action,
            };
            link
        };

        // Left holds Down while right rests on Right.
        let mut a = StateMatrix::default();
        a[0][0] = FootArrowState::new(1, G::Held);
        a[1][0] = FootArrowState::new(3, G::Resting);

        // Left releases the hold.
        let mut b = a;
        b[0][0] = FootArrowState::new(1, G::Resting);

        // Right taps Up.
        let mut c = b;
        c[1][0] = FootArrowState::new(2, G::Resting);

        // Right swaps onto Down; left lifted.
        let mut d = c;
        d[0][0] = FootArrowState::new(1, G::Lifted);
        d[1][0] = FootArrowState::new(1, G::Resting);

        let transitions = vec![
            (48, a, slot_link(Foot::Left, FootAction::Hold)),
            (96, b, slot_link(Foot::Left, FootAction::Release)),
            (96, c, slot_link(Foot::Right, FootAction::Tap)),
            (144, d, slot_link(Foot::Right, FootAction::Tap)),
        ];
        let (releases, steps) = releases_and_steps(&transitions);

        // Hold start at 48 is a step without a release.
        assert!(steps.contains(&event(48, 1, Foot::Left)));
        assert!(!releases.contains(&event(48, 1, Foot::Left)));
        // The hold end shows up as a release at 96.
        assert!(releases.contains(&event(96, 1, Foot::Left)));
        // The tap is both.
        assert!(steps.contains(&event(96, 2, Foot::Right)));
        assert!(releases.contains(&event(96, 2, Foot::Right)));
        // The swap emits only the swapping foot's step.
        assert!(steps.contains(&event(144, 1, Foot::Right)));
        assert!(!steps.iter().any(|e| e.position == 144 && e.foot == Foot::Left));

        // Only the hold opens a span, from its start to its release; the
        // taps release immediately and span nothing.
        let spans = hold_spans(&releases, &steps);
        assert_eq!(spans, vec![(1, 48, 96)]);
    }
}
