pub mod config;
pub mod error;
pub mod events;
pub mod expressed;
pub mod graph;
pub mod graph_io;
pub mod mines;
pub mod pad;
pub mod performed;
pub mod step_types;

pub const STEPGRAPH_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{
    BracketParsingDetermination, BracketParsingMethod, ExpressedChartConfig, PerformedChartConfig,
};
pub use error::Error;
pub use events::{ChartOutputNote, NoteEvent, NoteKind};
pub use expressed::{ExpressedChart, MineEvent, MineType, StepEvent};
pub use graph::{
    BodyOrientation, FootArrowState, GraphLink, GraphLinkInstance, GraphNode, StepGraph,
};
pub use graph_io::{load as load_step_graph, save as save_step_graph, STEP_GRAPH_VERSION};
pub use pad::{ArrowData, PadData};
pub use performed::{PerformanceNode, PerformedChart};
pub use step_types::{Foot, FootAction, GraphArrowState, InstanceStepType, StepType};
