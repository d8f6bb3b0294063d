//! PerformedChart search properties on the stock dance-single layout.

use stepgraph::{
    BracketParsingMethod, ChartOutputNote, ExpressedChart, ExpressedChartConfig, NoteEvent,
    NoteKind, PadData, PerformanceNode, PerformedChart, PerformedChartConfig, StepGraph,
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
fn performing_onto_the_same_graph_reproduces_the_arrows() {
    let graph = single_graph();
    let lanes = [0usize, 3, 2, 1, 0, 3];
    let events: Vec<NoteEvent> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| tap(i as i32 * 48, lane))
        .collect();
    let expressed = express(&graph, &events, "reproduce");

    let performed = PerformedChart::build(
        &expressed,
        &graph,
        &PerformedChartConfig::default(),
        42,
        "reproduce",
    )
    .unwrap();

    let produced = tap_lanes(&performed.to_events(&graph));
    let expected: Vec<(i32, usize)> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| (i as i32 * 48, lane))
        .collect();
    assert_eq!(produced, expected);
}

#[test]
fn step_positions_never_decrease() {
    let graph = single_graph();
    let lanes = [1usize, 2, 3, 0, 2, 1, 3, 0];
    let events: Vec<NoteEvent> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| tap(i as i32 * 24, lane))
        .collect();
    let expressed = express(&graph, &events, "monotonic");
    let performed = PerformedChart::build(
        &expressed,
        &graph,
        &PerformedChartConfig::default(),
        7,
        "monotonic",
    )
    .unwrap();

    let mut last = i32::MIN;
    for node in performed.iter() {
        if let PerformanceNode::Step { position, .. } = node {
            assert!(*position >= last);
            last = *position;
        }
    }
}

#[test]
fn bracketless_charts_transfer_lanes_exactly() {
    let graph = single_graph();
    let lanes = [0usize, 1, 2, 3, 1, 2];
    let events: Vec<NoteEvent> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| tap(i as i32 * 48, lane))
        .collect();

    let config = ExpressedChartConfig {
        default_bracket_parsing_method: BracketParsingMethod::NoBrackets,
        ..ExpressedChartConfig::default()
    };
    let expressed =
        ExpressedChart::build(&events, &graph, &config, 10, "bracketless").unwrap();
    let performed = PerformedChart::build(
        &expressed,
        &graph,
        &PerformedChartConfig::default(),
        11,
        "bracketless",
    )
    .unwrap();

    let produced = tap_lanes(&performed.to_events(&graph));
    let expected: Vec<(i32, usize)> = lanes
        .iter()
        .enumerate()
        .map(|(i, &lane)| (i as i32 * 48, lane))
        .collect();
    assert_eq!(produced, expected);
}

#[test]
fn jack_streaks_over_the_limit_are_counted() {
    let graph = single_graph();
    // A hold pins one foot so the taps on Down can only be jacked by the
    // other: one approach step, then six same-arrow strikes.
    let mut events = vec![NoteEvent::new(0, 0.0, 0, NoteKind::HoldStart)];
    for i in 1..8 {
        events.push(tap(i * 48, 1));
    }
    events.push(NoteEvent::new(8 * 48, 4.0, 0, NoteKind::HoldEnd));
    let expressed = express(&graph, &events, "jacks");
    let config = PerformedChartConfig {
        max_same_arrows_in_a_row_per_foot: 2,
        ..PerformedChartConfig::default()
    };
    let performed =
        PerformedChart::build(&expressed, &graph, &config, 3, "jacks").unwrap();

    // Six same-arrow steps with a limit of two must trip the counter at
    // least four times.
    assert!(performed.over_max_same_arrow_steps >= 4);
}

#[test]
fn after_arrow_mines_land_on_the_stepped_lane() {
    let graph = single_graph();
    let events = vec![
        tap(0, 3),
        NoteEvent::new(24, 0.25, 3, NoteKind::Mine),
    ];
    let expressed = express(&graph, &events, "mined");
    assert_eq!(expressed.mine_events.len(), 1);
    let mine = expressed.mine_events[0];
    assert_eq!(mine.mine_type, stepgraph::MineType::AfterArrow);
    assert_eq!(mine.arrow_is_nth_closest, 0);
    assert_eq!(mine.foot_associated, Some(stepgraph::Foot::Right));

    let performed = PerformedChart::build(
        &expressed,
        &graph,
        &PerformedChartConfig::default(),
        5,
        "mined",
    )
    .unwrap();
    let mines: Vec<(i32, usize)> = performed
        .to_events(&graph)
        .iter()
        .filter_map(|n| match n {
            ChartOutputNote::Mine(m) => Some((m.position, m.lane)),
            _ => None,
        })
        .collect();
    assert_eq!(mines, vec![(24, 3)]);
}

#[test]
fn holds_and_releases_survive_performance() {
    let graph = single_graph();
    let events = vec![
        NoteEvent::new(0, 0.0, 0, NoteKind::HoldStart),
        tap(48, 3),
        NoteEvent::new(96, 1.0, 0, NoteKind::HoldEnd),
    ];
    let expressed = express(&graph, &events, "held");
    let performed = PerformedChart::build(
        &expressed,
        &graph,
        &PerformedChartConfig::default(),
        9,
        "held",
    )
    .unwrap();
    let notes = performed.to_events(&graph);

    assert!(notes.iter().any(|n| matches!(
        n,
        ChartOutputNote::HoldStart(h) if h.position == 0 && h.lane == 0 && !h.roll
    )));
    assert!(notes.iter().any(|n| matches!(
        n,
        ChartOutputNote::HoldEnd(h) if h.position == 96 && h.lane == 0
    )));
    assert!(notes.iter().any(|n| matches!(
        n,
        ChartOutputNote::Tap(t) if t.position == 48 && t.lane == 3
    )));
}

#[test]
fn an_incomplete_fallback_table_is_rejected_before_searching() {
    let graph = single_graph();
    let events = vec![tap(0, 0), tap(48, 3)];
    let expressed = express(&graph, &events, "doomed");

    // Supplying any table replaces the built-in defaults wholesale, so a
    // one-entry table is missing every other step type.
    let mut config = PerformedChartConfig::default();
    config
        .step_type_fallbacks
        .insert("NewArrow".to_string(), vec!["NewArrow".to_string()]);
    let err = PerformedChart::build(&expressed, &graph, &config, 1, "doomed").unwrap_err();
    assert!(matches!(err, stepgraph::Error::InvalidConfig(_)));
}
