//! Demand-driven USD stage composition node graph engine.
//!
//! A host embeds a [`GraphContainer`], edits the node graph through it, and
//! reads the resolved stage off the Output node. Evaluation is pull-based
//! and memoized: each node computes at most once per generation, and edits
//! propagate as resets that invalidate and eagerly rebuild the affected
//! downstream subtree. Actual USD work happens behind the [`UsdEngine`]
//! boundary; the graph core only moves opaque stage handles around.

pub mod cache;
pub mod container;
pub mod delegates;
pub mod engine;
pub mod evaluator;
pub mod graph;
pub mod hooks;
pub mod inspect;
pub mod kinds;
pub mod node;
pub mod port;

pub use cache::{CacheStatistics, StageHandleCache};
pub use container::GraphContainer;
pub use delegates::{DelegateInstaller, DelegateRegistry};
pub use engine::{EngineArg, PrimInfo, StageHandle, UsdEngine};
pub use evaluator::{Evaluator, NodeState};
pub use graph::{Connection, NodeGraph};
pub use hooks::{HostHooks, NoopHooks};
pub use inspect::{PrimTreeItem, PrimTreeState};
pub use kinds::EvalContext;
pub use node::{Node, NodeId, NodeKind, NodeParams, PrimType};
pub use port::{Port, PortId};
