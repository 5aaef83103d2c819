//! Node kinds and core node functionality

use super::port::Port;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a node, assigned by the graph at creation time
pub type NodeId = usize;

/// The closed set of node kinds understood by the evaluator.
///
/// `Reroute` and `Frame` are transparent: they have no compute effect and are
/// traversed through when walking links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Loads a USD file from disk, optionally filtered by a path pattern
    FileSource,
    /// Snapshots the current host scene/view layer
    SceneSource,
    /// Keeps only sub-trees whose paths match a glob-like pattern
    Filter,
    /// Combines 2..N input stages into one
    Merge,
    /// Wraps the input under a new named root primitive
    Root,
    /// Wraps the input under a transform primitive built from explicit TRS
    Transform,
    /// Wraps the input under a transform taken from a host object
    TransformByProxy,
    /// Holds the resolved stage for the graph and notifies the host
    Output,
    /// Pass-through pseudo-node
    Reroute,
    /// Grouping pseudo-node, no compute effect
    Frame,
}

impl NodeKind {
    /// Kind identifier used when dispatching to the external engine
    pub fn engine_id(self) -> &'static str {
        match self {
            NodeKind::FileSource => "Source-File",
            NodeKind::SceneSource => "Source-SceneData",
            NodeKind::Filter => "Filter",
            NodeKind::Merge => "Merge",
            NodeKind::Root => "Root",
            NodeKind::Transform => "Transform",
            NodeKind::TransformByProxy => "TransformByProxy",
            NodeKind::Output => "Output",
            NodeKind::Reroute => "Reroute",
            NodeKind::Frame => "Frame",
        }
    }

    /// Transparent nodes are skipped by link traversal and reset propagation
    pub fn is_transparent(self) -> bool {
        matches!(self, NodeKind::Reroute | NodeKind::Frame)
    }

    /// Whether a soft reset sweep always proceeds for this kind.
    ///
    /// Only kinds whose result depends on live host state recompute under a
    /// soft sweep on their own. Kinds that are pure functions of their
    /// parameters and inputs keep their warm cache until a hard reset, or
    /// until a producer resolves to a different stage within a sweep.
    pub fn use_hard_reset(self) -> bool {
        matches!(
            self,
            NodeKind::SceneSource | NodeKind::TransformByProxy | NodeKind::Output
        )
    }

    /// Number of input ports a fresh node of this kind carries
    pub fn default_input_count(self) -> usize {
        match self {
            NodeKind::FileSource | NodeKind::SceneSource => 0,
            NodeKind::Merge => 2,
            _ => 1,
        }
    }

    /// Whether nodes of this kind expose an output port
    pub fn has_output(self) -> bool {
        !matches!(self, NodeKind::Output)
    }
}

/// Primitive type tag for the Root node, passed through to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimType {
    None,
    Xform,
    Scope,
    SkelRoot,
}

impl PrimType {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimType::None => "None",
            PrimType::Xform => "Xform",
            PrimType::Scope => "Scope",
            PrimType::SkelRoot => "SkelRoot",
        }
    }
}

/// Kind-specific node parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeParams {
    FileSource {
        /// Path of the USD file on disk; empty means "nothing to load"
        path: PathBuf,
        /// Prim path pattern applied at load time
        filter_pattern: String,
    },
    SceneSource {
        /// Host view layer the snapshot is taken from
        view_layer: String,
    },
    Filter {
        /// Glob-like prim path pattern: `*` matches one segment, `**` one or more
        pattern: String,
    },
    Merge {
        /// Number of input ports shown; never drops below the highest linked input
        inputs_number: usize,
    },
    Root {
        /// Name of the new root primitive; empty passes the input through
        name: String,
        prim_type: PrimType,
    },
    Transform {
        name: String,
        translate: Vec3,
        /// Euler angles in radians, XYZ order
        rotate: Vec3,
        scale: Vec3,
    },
    TransformByProxy {
        name: String,
        /// Host object whose world transform is applied
        object: String,
    },
    Output,
    Reroute,
    Frame,
}

impl NodeParams {
    /// Default parameters for a freshly created node of the given kind
    pub fn default_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::FileSource => NodeParams::FileSource {
                path: PathBuf::new(),
                filter_pattern: "/*".to_string(),
            },
            NodeKind::SceneSource => NodeParams::SceneSource {
                view_layer: String::new(),
            },
            NodeKind::Filter => NodeParams::Filter {
                pattern: "/*".to_string(),
            },
            NodeKind::Merge => NodeParams::Merge { inputs_number: 2 },
            NodeKind::Root => NodeParams::Root {
                name: "Root".to_string(),
                prim_type: PrimType::Xform,
            },
            NodeKind::Transform => NodeParams::Transform {
                name: "Transform".to_string(),
                translate: Vec3::ZERO,
                rotate: Vec3::ZERO,
                scale: Vec3::ONE,
            },
            NodeKind::TransformByProxy => NodeParams::TransformByProxy {
                name: "Transform".to_string(),
                object: String::new(),
            },
            NodeKind::Output => NodeParams::Output,
            NodeKind::Reroute => NodeParams::Reroute,
            NodeKind::Frame => NodeParams::Frame,
        }
    }

    /// The kind these parameters belong to
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeParams::FileSource { .. } => NodeKind::FileSource,
            NodeParams::SceneSource { .. } => NodeKind::SceneSource,
            NodeParams::Filter { .. } => NodeKind::Filter,
            NodeParams::Merge { .. } => NodeKind::Merge,
            NodeParams::Root { .. } => NodeKind::Root,
            NodeParams::Transform { .. } => NodeKind::Transform,
            NodeParams::TransformByProxy { .. } => NodeKind::TransformByProxy,
            NodeParams::Output => NodeKind::Output,
            NodeParams::Reroute => NodeKind::Reroute,
            NodeParams::Frame => NodeKind::Frame,
        }
    }
}

/// Core node structure: identity, display name, parameters and ports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub params: NodeParams,
    pub inputs: Vec<Port>,
    pub output: Option<Port>,
}

impl Node {
    /// Creates a node of the given kind with default parameters.
    ///
    /// The id is a placeholder until the graph assigns one.
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self::with_params(NodeParams::default_for(kind), name)
    }

    /// Creates a node from explicit parameters
    pub fn with_params(params: NodeParams, name: impl Into<String>) -> Self {
        let kind = params.kind();
        let input_count = match &params {
            NodeParams::Merge { inputs_number } => *inputs_number,
            _ => kind.default_input_count(),
        };
        let inputs = (0..input_count)
            .map(|i| Port::new(i, format!("Input {}", i + 1)))
            .collect();
        let output = kind.has_output().then(|| Port::new(0, "Stage"));
        Self {
            id: 0,
            name: name.into(),
            params,
            inputs,
            output,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.params.kind()
    }

    /// Grows or shrinks the Merge input ports.
    ///
    /// `min_ports` is the lowest legal count given currently linked inputs;
    /// the caller derives it from the connection set.
    pub fn set_merge_inputs(&mut self, count: usize, min_ports: usize) {
        if let NodeParams::Merge { inputs_number } = &mut self.params {
            let count = count.max(min_ports).max(2);
            *inputs_number = count;
            while self.inputs.len() < count {
                let id = self.inputs.len();
                self.inputs.push(Port::new(id, format!("Input {}", id + 1)));
            }
            self.inputs.truncate(count);
        }
    }
}
