//! External USD engine boundary
//!
//! All of the actual USD work (stage composition, Hydra dispatch) lives
//! behind this trait. The evaluator only marshals handles and parameters
//! across it and never inspects stage contents itself.

pub mod mock;

use glam::Mat4;
use serde::{Deserialize, Serialize};

/// Opaque, engine-owned reference to a composed USD stage.
///
/// Two handles with the same id refer to the same underlying resource;
/// release accounting compares this identity, not the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageHandle(pub u64);

/// Positional, kind-specific argument marshalled to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineArg {
    Handle(StageHandle),
    Str(String),
    Float(f64),
    Matrix(Mat4),
}

/// Primitive info returned by the engine's stage query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimInfo {
    pub name: String,
    pub prim_type: String,
    pub children: Vec<String>,
    pub visible: bool,
    pub path: String,
}

/// The stable interface to the native USD engine.
///
/// `compute` dispatches by node-kind identifier and either returns a handle,
/// `None` when the requested composition produces nothing, or an error for a
/// native failure. Handle lifetime is the caller's responsibility: every
/// handle handed out stays valid until `stage_free` is called for it.
pub trait UsdEngine {
    /// Runs the kind-specific native compute
    fn compute(&self, kind: &str, args: &[EngineArg]) -> Result<Option<StageHandle>, String>;

    /// Releases a stage. Only the handle cache calls this.
    fn stage_free(&self, handle: StageHandle);

    /// Serializes a stage to usda text, optionally flattened
    fn stage_export_to_str(&self, handle: StageHandle, flatten: bool) -> Result<String, String>;

    /// Queries a primitive of a stage by path
    fn stage_prim_get_info(&self, handle: StageHandle, path: &str) -> Result<PrimInfo, String>;
}
