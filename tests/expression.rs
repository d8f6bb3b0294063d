//! ExpressedChart search properties on the stock dance-single layout.

use stepgraph::expressed::has_more_simultaneous_notes_than_feet;
use stepgraph::step_types::{step_data, FEET, NUM_FOOT_PORTIONS};
use stepgraph::{
    BracketParsingDetermination, Error, ExpressedChart, ExpressedChartConfig, Foot, FootAction,
    GraphLinkInstance, NoteEvent, NoteKind, PadData, StepGraph, StepType,
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

fn acting_feet(link: &GraphLinkInstance) -> Vec<Foot> {
    FEET.into_iter()
        .filter(|&f| link.link.foot_is_valid(f))
        .collect()
}

fn step_types_of(link: &GraphLinkInstance) -> Vec<StepType> {
    let mut out = Vec::new();
    for foot in FEET {
        for portion in 0..NUM_FOOT_PORTIONS {
            let slot = link.link.steps[foot as usize][portion];
            if slot.valid && !out.contains(&slot.step) {
                out.push(slot.step);
            }
        }
    }
    out
}

#[test]
fn alternating_runs_express_as_new_arrow_taps_without_crossovers() {
    let graph = single_graph();
    let lanes = [1usize, 2, 0, 3, 1, 2, 0, 3];
    let events: Vec<NoteEvent> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| tap(i as i32 * 48, lane))
        .collect();

    let expressed = ExpressedChart::build(
        &events,
        &graph,
        &ExpressedChartConfig::default(),
        10,
        "alternating-run",
    )
    .unwrap();

    assert_eq!(expressed.step_events.len(), lanes.len());
    let mut previous_foot = None;
    for event in &expressed.step_events {
        let feet = acting_feet(&event.link);
        assert_eq!(feet.len(), 1, "every step is a single-foot step");
        assert_ne!(previous_foot, Some(feet[0]), "feet alternate");
        previous_foot = Some(feet[0]);
        for step in step_types_of(&event.link) {
            assert_eq!(step, StepType::NewArrow);
            let data = step_data(step);
            assert!(!data.is_crossover && !data.is_invert && !data.is_swap);
        }
        for foot in FEET {
            for portion in 0..NUM_FOOT_PORTIONS {
                let slot = event.link.link.steps[foot as usize][portion];
                if slot.valid {
                    assert_eq!(slot.action, FootAction::Tap);
                }
            }
        }
    }
}

#[test]
fn expressing_the_lane_mirror_swaps_feet_and_mirrors_arrows() {
    let graph = single_graph();
    let lanes = [0usize, 1, 2, 3, 0, 1, 2, 3];
    let events: Vec<NoteEvent> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| tap(i as i32 * 48, lane))
        .collect();
    let mirrored_events: Vec<NoteEvent> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| tap(i as i32 * 48, graph.pad.arrows[lane].mirrored_lane))
        .collect();

    let config = ExpressedChartConfig::default();
    let original = ExpressedChart::build(&events, &graph, &config, 10, "mirror-a").unwrap();
    let mirrored =
        ExpressedChart::build(&mirrored_events, &graph, &config, 10, "mirror-b").unwrap();

    assert_eq!(original.step_events.len(), mirrored.step_events.len());
    for (a, b) in original.step_events.iter().zip(&mirrored.step_events) {
        // Feet swap under mirroring.
        let feet_a = acting_feet(&a.link);
        let feet_b = acting_feet(&b.link);
        assert_eq!(feet_a.len(), feet_b.len());
        for foot in &feet_a {
            assert!(feet_b.contains(&foot.other()));
        }
        // Arrows map through MirroredLane.
        let mut mirrored_arrows: Vec<usize> = a
            .acted_arrows
            .iter()
            .map(|&arrow| graph.pad.arrows[arrow].mirrored_lane)
            .collect();
        mirrored_arrows.sort_unstable();
        assert_eq!(mirrored_arrows, b.acted_arrows);
    }
}

#[test]
fn triple_taps_trip_the_simultaneous_note_detection() {
    let events = vec![tap(0, 0), tap(0, 1), tap(0, 2)];
    assert!(has_more_simultaneous_notes_than_feet(&events));

    let pair = vec![tap(0, 0), tap(0, 3)];
    assert!(!has_more_simultaneous_notes_than_feet(&pair));

    // A sustained hold under a jump also exceeds two feet.
    let with_hold = vec![
        NoteEvent::new(0, 0.0, 0, NoteKind::HoldStart),
        tap(48, 1),
        tap(48, 2),
        NoteEvent::new(96, 1.0, 0, NoteKind::HoldEnd),
    ];
    assert!(has_more_simultaneous_notes_than_feet(&with_hold));
}

#[test]
fn dynamic_determination_goes_aggressive_for_dense_charts() {
    let graph = single_graph();
    let config = ExpressedChartConfig {
        bracket_parsing_determination: BracketParsingDetermination::ChooseMethodDynamically,
        ..ExpressedChartConfig::default()
    };
    let events = vec![tap(0, 0), tap(0, 1), tap(0, 2), tap(48, 3)];
    let expressed =
        ExpressedChart::build(&events, &graph, &config, 12, "dense-chart").unwrap();
    assert_eq!(
        expressed.bracket_parsing_method,
        stepgraph::BracketParsingMethod::Aggressive
    );
}

#[test]
fn dynamic_determination_disables_brackets_below_the_level_floor() {
    let graph = single_graph();
    let config = ExpressedChartConfig {
        bracket_parsing_determination: BracketParsingDetermination::ChooseMethodDynamically,
        min_level_for_brackets: 9,
        ..ExpressedChartConfig::default()
    };
    let events = vec![tap(0, 0), tap(48, 3)];
    let expressed = ExpressedChart::build(&events, &graph, &config, 3, "easy-chart").unwrap();
    assert_eq!(
        expressed.bracket_parsing_method,
        stepgraph::BracketParsingMethod::NoBrackets
    );
}

#[test]
fn a_release_without_a_hold_fails_expression() {
    let graph = single_graph();
    let events = vec![
        tap(0, 0),
        NoteEvent::new(48, 0.5, 3, NoteKind::HoldEnd),
    ];
    let err = ExpressedChart::build(
        &events,
        &graph,
        &ExpressedChartConfig::default(),
        10,
        "broken-release",
    )
    .unwrap_err();
    match err {
        Error::ExpressionFailure { position, .. } => assert_eq!(position, 48),
        other => panic!("expected expression failure, got {other}"),
    }
}

#[test]
fn holds_express_with_hold_and_release_actions() {
    let graph = single_graph();
    let events = vec![
        NoteEvent::new(0, 0.0, 0, NoteKind::HoldStart),
        tap(48, 3),
        NoteEvent::new(96, 1.0, 0, NoteKind::HoldEnd),
    ];
    let expressed = ExpressedChart::build(
        &events,
        &graph,
        &ExpressedChartConfig::default(),
        10,
        "hold-chart",
    )
    .unwrap();

    assert_eq!(expressed.step_events.len(), 3);
    let hold = &expressed.step_events[0];
    assert!(hold
        .link
        .link
        .steps
        .iter()
        .flatten()
        .any(|s| s.valid && s.action == FootAction::Hold));
    let middle = &expressed.step_events[1];
    assert_eq!(middle.acted_arrows, vec![3]);
    let release = &expressed.step_events[2];
    assert!(release.link.link.is_release());
    assert_eq!(release.position, 96);
}

#[test]
fn rolls_fakes_and_lifts_keep_their_instance_flavor() {
    let graph = single_graph();
    let events = vec![
        NoteEvent::new(0, 0.0, 1, NoteKind::RollStart),
        NoteEvent::new(48, 0.5, 2, NoteKind::Fake),
        NoteEvent::new(96, 1.0, 1, NoteKind::HoldEnd),
        NoteEvent::new(144, 1.5, 3, NoteKind::Lift),
    ];
    let expressed = ExpressedChart::build(
        &events,
        &graph,
        &ExpressedChartConfig::default(),
        10,
        "flavored-chart",
    )
    .unwrap();

    use stepgraph::InstanceStepType;
    let flavors: Vec<InstanceStepType> = expressed
        .step_events
        .iter()
        .flat_map(|e| {
            e.link
                .instance_types
                .iter()
                .flatten()
                .copied()
                .filter(|&t| t != InstanceStepType::Default)
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(flavors.contains(&InstanceStepType::Roll));
    assert!(flavors.contains(&InstanceStepType::Fake));
    assert!(flavors.contains(&InstanceStepType::Lift));
}
