//! Binary persistence for step graphs.
//!
//! The format is versioned and the enum ordinals it relies on are a frozen
//! compatibility surface: a writer asserts the expected enumerator counts into
//! the header, and a reader refuses files whose assumptions differ. The whole
//! payload is zstd-compressed.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::info;

use crate::error::Error;
use crate::graph::{
    BodyOrientation, FootArrowState, GraphLink, GraphLinkStep, GraphNode, StateMatrix, StepGraph,
};
use crate::pad::PadData;
use crate::step_types::{
    FootAction, GraphArrowState, StepType, INVALID_ARROW, NUM_FOOT_ACTIONS,
    NUM_GRAPH_ARROW_STATES, NUM_STEP_TYPES,
};

pub const STEP_GRAPH_VERSION: u32 = 1;

const INVALID_ARROW_BYTE: u8 = 0xFF;
const COMPRESSION_LEVEL: i32 = 3;

fn arrow_to_byte(arrow: isize) -> u8 {
    if arrow == INVALID_ARROW {
        INVALID_ARROW_BYTE
    } else {
        arrow as u8
    }
}

fn arrow_from_byte(byte: u8, lanes: usize) -> Result<isize, Error> {
    if byte == INVALID_ARROW_BYTE {
        return Ok(INVALID_ARROW);
    }
    if (byte as usize) < lanes {
        Ok(byte as isize)
    } else {
        Err(Error::GraphLoad(format!(
            "arrow {byte} out of range for a {lanes}-lane pad"
        )))
    }
}

/// Serializes `graph` into `writer`.
pub fn write_to<W: Write>(graph: &StepGraph, writer: W) -> Result<(), Error> {
    let mut out = zstd::stream::Encoder::new(writer, COMPRESSION_LEVEL)?;

    out.write_u32::<LittleEndian>(STEP_GRAPH_VERSION)?;
    // Frozen ordinal guards.
    out.write_u8(NUM_STEP_TYPES as u8)?;
    out.write_u8(NUM_FOOT_ACTIONS as u8)?;
    out.write_u8(NUM_GRAPH_ARROW_STATES as u8)?;

    out.write_u32::<LittleEndian>(graph.root() as u32)?;
    out.write_u32::<LittleEndian>(graph.node_count() as u32)?;

    for (id, node) in graph.nodes() {
        out.write_u32::<LittleEndian>(id as u32)?;
        out.write_u8(node.orientation as u8)?;
        for foot_state in &node.state {
            for portion in foot_state {
                out.write_u8(arrow_to_byte(portion.arrow))?;
                out.write_u8(portion.state as u8)?;
            }
        }
    }

    for (_, node) in graph.nodes() {
        out.write_u32::<LittleEndian>(node.links.len() as u32)?;
        for (link, children) in &node.links {
            for foot_steps in &link.steps {
                for slot in foot_steps {
                    out.write_u8(u8::from(slot.valid))?;
                    out.write_u8(slot.step.ordinal())?;
                    out.write_u8(slot.action as u8)?;
                }
            }
            out.write_u32::<LittleEndian>(children.len() as u32)?;
            for &child in children {
                out.write_u32::<LittleEndian>(child as u32)?;
            }
        }
    }

    out.finish()?;
    Ok(())
}

/// Deserializes a graph from `reader`, validating version, ordinal guards and
/// structural bounds. The caller supplies the pad the graph was built for.
pub fn read_from<R: Read>(pad: PadData, reader: R) -> Result<StepGraph, Error> {
    let mut input = zstd::stream::Decoder::new(reader)?;
    let lanes = pad.num_arrows();

    let version = input.read_u32::<LittleEndian>()?;
    if version != STEP_GRAPH_VERSION {
        return Err(Error::GraphVersionMismatch {
            found: version,
            expected: STEP_GRAPH_VERSION,
        });
    }
    let step_types = input.read_u8()? as usize;
    let actions = input.read_u8()? as usize;
    let arrow_states = input.read_u8()? as usize;
    if step_types != NUM_STEP_TYPES
        || actions != NUM_FOOT_ACTIONS
        || arrow_states != NUM_GRAPH_ARROW_STATES
    {
        return Err(Error::SerializedEnumMismatch);
    }

    let root = input.read_u32::<LittleEndian>()? as usize;
    let node_count = input.read_u32::<LittleEndian>()? as usize;
    if root >= node_count {
        return Err(Error::GraphLoad(format!(
            "root {root} out of range for {node_count} nodes"
        )));
    }

    let mut nodes = Vec::with_capacity(node_count);
    for expected_id in 0..node_count {
        let id = input.read_u32::<LittleEndian>()? as usize;
        if id != expected_id {
            return Err(Error::GraphLoad(format!(
                "node id {id} out of order, expected {expected_id}"
            )));
        }
        let orientation = match input.read_u8()? {
            0 => BodyOrientation::Normal,
            1 => BodyOrientation::InvertedLeftOverRight,
            2 => BodyOrientation::InvertedRightOverLeft,
            other => {
                return Err(Error::GraphLoad(format!("unknown orientation byte {other}")));
            }
        };
        let mut state = StateMatrix::default();
        for foot_state in &mut state {
            for portion in foot_state.iter_mut() {
                let arrow = arrow_from_byte(input.read_u8()?, lanes)?;
                let arrow_state = match input.read_u8()? {
                    0 => GraphArrowState::Resting,
                    1 => GraphArrowState::Held,
                    2 => GraphArrowState::Lifted,
                    other => {
                        return Err(Error::GraphLoad(format!(
                            "unknown arrow state byte {other}"
                        )));
                    }
                };
                *portion = FootArrowState::new(arrow, arrow_state);
            }
        }
        nodes.push(GraphNode {
            state,
            orientation,
            links: Vec::new(),
        });
    }

    for node in &mut nodes {
        let link_count = input.read_u32::<LittleEndian>()? as usize;
        let mut links = Vec::with_capacity(link_count);
        for _ in 0..link_count {
            let mut link = GraphLink::default();
            for foot_steps in &mut link.steps {
                for slot in foot_steps.iter_mut() {
                    let valid = input.read_u8()? != 0;
                    let step_byte = input.read_u8()?;
                    let step = StepType::from_ordinal(step_byte).ok_or(
                        Error::SerializedEnumMismatch,
                    )?;
                    let action = match input.read_u8()? {
                        0 => FootAction::Tap,
                        1 => FootAction::Hold,
                        2 => FootAction::Release,
                        _ => return Err(Error::SerializedEnumMismatch),
                    };
                    *slot = GraphLinkStep {
                        valid,
                        step,
                        action,
                    };
                }
            }
            let child_count = input.read_u32::<LittleEndian>()? as usize;
            let mut children = Vec::with_capacity(child_count);
            for _ in 0..child_count {
                let child = input.read_u32::<LittleEndian>()? as usize;
                if child >= node_count {
                    return Err(Error::GraphLoad(format!(
                        "child id {child} out of range for {node_count} nodes"
                    )));
                }
                children.push(child);
            }
            links.push((link, children));
        }
        links.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        node.links = links;
    }

    Ok(StepGraph::from_parts(pad, nodes, root))
}

pub fn save(graph: &StepGraph, path: &Path) -> Result<(), Error> {
    let file = File::create(path)?;
    write_to(graph, file)?;
    info!(
        component = "StepGraph",
        pad = graph.pad.name.as_str(),
        path = %path.display(),
        "saved step graph"
    );
    Ok(())
}

pub fn load(pad: PadData, path: &Path) -> Result<StepGraph, Error> {
    let file = File::open(path)?;
    let graph = read_from(pad, file)?;
    info!(
        component = "StepGraph",
        pad = graph.pad.name.as_str(),
        path = %path.display(),
        nodes = graph.node_count(),
        "loaded step graph"
    );
    Ok(graph)
}

/// Saves on a worker thread; join the handle to await completion.
#[must_use]
pub fn save_on_thread(graph: Arc<StepGraph>, path: PathBuf) -> JoinHandle<Result<(), Error>> {
    std::thread::spawn(move || save(&graph, &path))
}

/// Loads on a worker thread; join the handle to await completion.
#[must_use]
pub fn load_on_thread(pad: PadData, path: PathBuf) -> JoinHandle<Result<StepGraph, Error>> {
    std::thread::spawn(move || load(pad, &path))
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
    fn round_trip_preserves_nodes_links_and_root() {
        let graph = single_graph();

        let mut buffer = Vec::new();
        write_to(graph, &mut buffer).unwrap();
        let reloaded = read_from(graph.pad.clone(), buffer.as_slice()).unwrap();

        assert_eq!(reloaded.node_count(), graph.node_count());
        assert_eq!(reloaded.link_count(), graph.link_count());
        assert_eq!(reloaded.root(), graph.root());
        assert_eq!(
            reloaded.node(reloaded.root()).key(),
            graph.node(graph.root()).key()
        );
    }

    #[test]
    fn wrong_version_is_rejected() {
        let graph = single_graph();
        let mut buffer = Vec::new();
        write_to(graph, &mut buffer).unwrap();

        // Rewrite the version field inside the compressed stream.
        let mut raw = Vec::new();
        zstd::stream::Decoder::new(buffer.as_slice())
            .unwrap()
            .read_to_end(&mut raw)
            .unwrap();
        raw[0] = 0xFE;
        let mut tampered = Vec::new();
        let mut encoder =
            zstd::stream::Encoder::new(&mut tampered, COMPRESSION_LEVEL).unwrap();
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap();

        let err = read_from(graph.pad.clone(), tampered.as_slice()).unwrap_err();
        assert!(matches!(err, Error::GraphVersionMismatch { .. }));
    }

    #[test]
    fn tampered_ordinal_guards_are_rejected() {
        let graph = single_graph();
        let mut buffer = Vec::new();
        write_to(graph, &mut buffer).unwrap();

        let mut raw = Vec::new();
        zstd::stream::Decoder::new(buffer.as_slice())
            .unwrap()
            .read_to_end(&mut raw)
            .unwrap();
        // Byte 4 holds the step-type count guard.
        raw[4] = raw[4].wrapping_add(1);
        let mut tampered = Vec::new();
        let mut encoder =
            zstd::stream::Encoder::new(&mut tampered, COMPRESSION_LEVEL).unwrap();
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap();

        let err = read_from(graph.pad.clone(), tampered.as_slice()).unwrap_err();
        assert!(matches!(err, Error::SerializedEnumMismatch));
    }
}
