//! End-to-end scenarios on a 4-lane pad, Left=0 Down=1 Up=2 Right=3, rooted
//! with the left foot on Left and the right foot on Right.

use stepgraph::step_types::{FEET, NUM_FOOT_PORTIONS};
use stepgraph::{
    ChartOutputNote, ExpressedChart, ExpressedChartConfig, Foot, FootAction, NoteEvent, NoteKind,
    PadData, PerformedChart, PerformedChartConfig, StepGraph, StepType,
};

fn single_graph() -> &'static StepGraph {
    static GRAPH: std::sync::OnceLock<StepGraph> = std::sync::OnceLock::new();
    GRAPH.get_or_init(|| {
        let pad = PadData::stock("dance-single").unwrap();
        StepGraph::build(pad, 0, 3).unwrap()
    })
}

fn tap(position: i32, lane: usize) -> NoteEvent {
    NoteEvent::new(position, f64::from(position) / 96.0, lane, NoteKind::Tap)
}

fn express(graph: &StepGraph, events: &[NoteEvent], id: &str) -> ExpressedChart {
    ExpressedChart::build(events, graph, &ExpressedChartConfig::default(), 10, id).unwrap()
}

fn perform(graph: &StepGraph, expressed: &ExpressedChart, id: &str) -> PerformedChart {
    PerformedChart::build(expressed, graph, &PerformedChartConfig::default(), 1, id).unwrap()
}

fn single_step_of(event: &stepgraph::StepEvent) -> (Foot, StepType, FootAction) {
    for foot in FEET {
        for portion in 0..NUM_FOOT_PORTIONS {
            let slot = event.link.link.steps[foot as usize][portion];
            if slot.valid {
                return (foot, slot.step, slot.action);
            }
        }
    }
    panic!("step event carries no valid slot");
}

fn tap_lanes(notes: &[ChartOutputNote]) -> Vec<(i32, usize)> {
    notes
        .iter()
        .filter_map(|n| match n {
            ChartOutputNote::Tap(t) => Some((t.position, t.lane)),
            _ => None,
        })
        .collect()
}

#[test]
fn scenario_1_alternating_same_arrows() {
    let graph = single_graph();
    let events = vec![tap(0, 0), tap(48, 3), tap(96, 0), tap(144, 3)];
    let expressed = express(&graph, &events, "scenario-1");

    assert_eq!(expressed.step_events.len(), 4);
    let mut feet = Vec::new();
    for event in &expressed.step_events {
        let (foot, step, action) = single_step_of(event);
        assert_eq!(step, StepType::SameArrow);
        assert_eq!(action, FootAction::Tap);
        feet.push(foot);
    }
    assert_eq!(feet, vec![Foot::Left, Foot::Right, Foot::Left, Foot::Right]);

    let performed = perform(&graph, &expressed, "scenario-1");
    assert_eq!(
        tap_lanes(&performed.to_events(&graph)),
        vec![(0, 0), (48, 3), (96, 0), (144, 3)]
    );
}

#[test]
fn scenario_2_same_arrows_then_new_arrows_without_crossovers() {
    let graph = single_graph();
    let events = vec![tap(0, 0), tap(48, 3), tap(96, 2), tap(144, 1)];
    let expressed = express(&graph, &events, "scenario-2");

    let steps: Vec<(Foot, StepType, FootAction)> = expressed
        .step_events
        .iter()
        .map(single_step_of)
        .collect();
    assert_eq!(steps[0], (Foot::Left, StepType::SameArrow, FootAction::Tap));
    assert_eq!(steps[1], (Foot::Right, StepType::SameArrow, FootAction::Tap));
    // The pad run onto Up and Down stays alternation: fresh arrows, no
    // crossovers, each foot stepping once.
    assert_eq!(steps[2].1, StepType::NewArrow);
    assert_eq!(steps[3].1, StepType::NewArrow);
    assert_ne!(steps[2].0, steps[3].0, "the new arrows alternate feet");
    assert_ne!(steps[1].0, steps[2].0, "no double step into the run");
}

#[test]
fn scenario_3_stepping_on_the_other_foots_arrow_is_a_swap_not_a_crossover() {
    let graph = single_graph();
    let events = vec![tap(0, 0), tap(48, 3), tap(96, 3)];
    let expressed = express(&graph, &events, "scenario-3");

    let (foot, step, _) = single_step_of(&expressed.step_events[2]);
    assert_eq!(step, StepType::FootSwap);
    assert_eq!(foot, Foot::Left);
}

#[test]
fn scenario_4_wide_jumps_are_new_arrow_pairs_not_brackets() {
    let graph = single_graph();
    let events = vec![tap(0, 1), tap(0, 2)];
    let expressed = express(&graph, &events, "scenario-4");

    assert_eq!(expressed.step_events.len(), 1);
    let link = &expressed.step_events[0].link.link;
    assert!(link.is_jump());
    for foot in FEET {
        assert_eq!(link.foot_step_type(foot), Some(StepType::NewArrow));
        for portion in 0..NUM_FOOT_PORTIONS {
            let slot = link.steps[foot as usize][portion];
            if slot.valid {
                assert_eq!(slot.action, FootAction::Tap);
            }
        }
    }
}

#[test]
fn scenario_5_holds_release_on_schedule() {
    let graph = single_graph();
    let events = vec![
        NoteEvent::new(0, 0.0, 0, NoteKind::HoldStart),
        tap(48, 3),
        NoteEvent::new(96, 1.0, 0, NoteKind::HoldEnd),
    ];
    let expressed = express(&graph, &events, "scenario-5");

    assert_eq!(expressed.step_events.len(), 3);
    let (hold_foot, _, hold_action) = single_step_of(&expressed.step_events[0]);
    assert_eq!((hold_foot, hold_action), (Foot::Left, FootAction::Hold));
    let (tap_foot, _, tap_action) = single_step_of(&expressed.step_events[1]);
    assert_eq!((tap_foot, tap_action), (Foot::Right, FootAction::Tap));
    let (release_foot, _, release_action) = single_step_of(&expressed.step_events[2]);
    assert_eq!(
        (release_foot, release_action),
        (Foot::Left, FootAction::Release)
    );
    assert_eq!(expressed.step_events[2].position, 96);
}

#[test]
fn scenario_6_mines_follow_the_arrow_they_chase() {
    let graph = single_graph();
    let events = vec![
        tap(0, 3),
        NoteEvent::new(24, 0.25, 3, NoteKind::Mine),
    ];
    let expressed = express(&graph, &events, "scenario-6");

    assert_eq!(expressed.mine_events.len(), 1);
    let mine = expressed.mine_events[0];
    assert_eq!(mine.mine_type, stepgraph::MineType::AfterArrow);
    assert_eq!(mine.arrow_is_nth_closest, 0);
    assert_eq!(mine.foot_associated, Some(Foot::Right));

    let performed = perform(&graph, &expressed, "scenario-6");
    let notes = performed.to_events(&graph);
    assert!(notes.iter().any(|n| matches!(
        n,
        ChartOutputNote::Mine(m) if m.position == 24 && m.lane == 3
    )));
}
