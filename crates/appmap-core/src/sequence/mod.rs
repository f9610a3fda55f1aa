//! Sequence diagrams: construction from traces, filtering, structural diff
//! and text rendering.

pub mod diagram;
pub mod diff;
pub mod filter;
pub mod format;

pub use diagram::{
    build_diagram, read_diagram, read_diagram_file, Action, ActionKind, Actor, Diagram, DiffMode,
};
pub use diff::{build_diff_diagram, diff, DiffOptions, DiffResult, Move, MoveType};
pub use filter::{action_name, ActionFilter, DiagramDiffer};
pub use format::format_text;
