//! Kind-specific compute dispatch
//!
//! One pure function per node kind: each takes the node's parameters and the
//! already-resolved producer handles and either short-circuits (pass-through,
//! missing parameter) or marshals a call across the engine boundary. Nothing
//! in here touches the cache; caching is the evaluator's job.

use crate::engine::{EngineArg, StageHandle, UsdEngine};
use crate::node::{Node, NodeParams};
use glam::{EulerRot, Mat4, Quat};
use std::collections::HashMap;

/// Ambient host state a compute may read: the scene snapshot identity and
/// the world transforms of proxy objects.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub scene_name: String,
    pub frame: f64,
    pub object_transforms: HashMap<String, Mat4>,
}

/// Computes a node's stage from its parameters and resolved inputs.
///
/// Returns `Ok(None)` when a required parameter is unset or an input branch
/// produced nothing; that absence propagates downstream instead of failing.
pub fn compute(
    node: &Node,
    inputs: &[Option<StageHandle>],
    engine: &dyn UsdEngine,
    ctx: &EvalContext,
) -> Result<Option<StageHandle>, String> {
    let input0 = inputs.first().copied().flatten();
    match &node.params {
        NodeParams::FileSource {
            path,
            filter_pattern,
        } => {
            if path.as_os_str().is_empty() || !path.is_file() {
                return Ok(None);
            }
            engine.compute(
                node.kind().engine_id(),
                &[
                    EngineArg::Str(path.to_string_lossy().into_owned()),
                    EngineArg::Str(filter_pattern.clone()),
                ],
            )
        }

        NodeParams::SceneSource { view_layer } => engine.compute(
            node.kind().engine_id(),
            &[
                EngineArg::Str(ctx.scene_name.clone()),
                EngineArg::Str(view_layer.clone()),
                EngineArg::Float(ctx.frame),
            ],
        ),

        NodeParams::Filter { pattern } => {
            let Some(handle) = input0 else {
                return Ok(None);
            };
            if pattern.is_empty() {
                return Ok(None);
            }
            engine.compute(
                node.kind().engine_id(),
                &[EngineArg::Handle(handle), EngineArg::Str(pattern.clone())],
            )
        }

        NodeParams::Merge { .. } => {
            let connected: Vec<StageHandle> = inputs.iter().filter_map(|h| *h).collect();
            match connected.as_slice() {
                [] => Ok(None),
                // A lone input passes through unchanged, same underlying stage
                [only] => Ok(Some(*only)),
                many => {
                    let args: Vec<EngineArg> =
                        many.iter().map(|&h| EngineArg::Handle(h)).collect();
                    engine.compute(node.kind().engine_id(), &args)
                }
            }
        }

        NodeParams::Root { name, prim_type } => {
            let Some(handle) = input0 else {
                return Ok(None);
            };
            if name.is_empty() {
                return Ok(Some(handle));
            }
            engine.compute(
                node.kind().engine_id(),
                &[
                    EngineArg::Handle(handle),
                    EngineArg::Str(name.clone()),
                    EngineArg::Str(prim_type.as_str().to_string()),
                ],
            )
        }

        NodeParams::Transform {
            name,
            translate,
            rotate,
            scale,
        } => {
            let Some(handle) = input0 else {
                return Ok(None);
            };
            let rotation = Quat::from_euler(EulerRot::XYZ, rotate.x, rotate.y, rotate.z);
            let matrix = Mat4::from_scale_rotation_translation(*scale, rotation, *translate);
            engine.compute(
                node.kind().engine_id(),
                &[
                    EngineArg::Handle(handle),
                    EngineArg::Str(name.clone()),
                    EngineArg::Matrix(matrix),
                ],
            )
        }

        NodeParams::TransformByProxy { name, object } => {
            let Some(handle) = input0 else {
                return Ok(None);
            };
            let Some(&matrix) = ctx.object_transforms.get(object) else {
                // Unset or vanished proxy object: nothing to apply
                return Ok(None);
            };
            engine.compute(
                node.kind().engine_id(),
                &[
                    EngineArg::Handle(handle),
                    EngineArg::Str(name.clone()),
                    EngineArg::Matrix(matrix),
                ],
            )
        }

        // The output's stage is whatever its input resolved to
        NodeParams::Output => Ok(input0),

        // Transparent kinds are traversed through before dispatch; if one is
        // evaluated directly it behaves as a plain pass-through
        NodeParams::Reroute | NodeParams::Frame => Ok(input0),
    }
}
