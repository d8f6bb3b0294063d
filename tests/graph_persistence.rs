//! Step graph save/load round-trips through real files.

use stepgraph::{load_step_graph, save_step_graph, Error, PadData, StepGraph};

fn single_graph() -> &'static StepGraph {
    static GRAPH: std::sync::OnceLock<StepGraph> = std::sync::OnceLock::new();
    GRAPH.get_or_init(|| {
        let pad = PadData::stock("dance-single").unwrap();
        StepGraph::build(pad, 0, 3).unwrap()
    })
}

#[test]
fn file_round_trip_preserves_structure() {
    let graph = single_graph();
    let pad = graph.pad.clone();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dance-single.sg");
    save_step_graph(graph, &path).unwrap();

    let reloaded = load_step_graph(pad, &path).unwrap();
    assert_eq!(reloaded.node_count(), graph.node_count());
    assert_eq!(reloaded.link_count(), graph.link_count());
    assert_eq!(reloaded.root(), graph.root());
    assert_eq!(
        reloaded.node(reloaded.root()).key(),
        graph.node(graph.root()).key()
    );
    assert_eq!(reloaded.find_all_links(), graph.find_all_links());
}

#[test]
fn missing_files_surface_io_errors() {
    let pad = PadData::stock("dance-single").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let err = load_step_graph(pad, &dir.path().join("absent.sg")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn worker_thread_save_and_load_complete() {
    use std::sync::Arc;

    let graph = Arc::new(single_graph().clone());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threaded.sg");
    stepgraph::graph_io::save_on_thread(Arc::clone(&graph), path.clone())
        .join()
        .unwrap()
        .unwrap();
    let reloaded = stepgraph::graph_io::load_on_thread(graph.pad.clone(), path)
        .join()
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.node_count(), graph.node_count());
}
