//! End-to-end evaluation scenarios over a full container

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use stagegraph::engine::mock::MockEngine;
use stagegraph::{
    GraphContainer, HostHooks, Node, NodeId, NodeKind, NodeParams, PrimType, StageHandle,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Hook that records every compute notification; clones share the log
#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Vec<(NodeId, NodeKind, Option<StageHandle>)>>>);

impl Recorder {
    fn events(&self) -> Vec<(NodeId, NodeKind, Option<StageHandle>)> {
        self.0.borrow().clone()
    }
}

impl HostHooks for Recorder {
    fn node_computed(&mut self, node_id: NodeId, kind: NodeKind, stage: Option<StageHandle>) {
        self.0.borrow_mut().push((node_id, kind, stage));
    }
}

fn scratch_usd_file(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "stagegraph-exec-{}-{}.usda",
        tag,
        std::process::id()
    ));
    fs::write(&path, b"#usda 1.0\n").unwrap();
    path
}

#[test]
fn test_file_to_root_to_output_computes_each_node_once() {
    init_logging();
    let engine = MockEngine::new();
    let recorder = Recorder::default();
    let mut container =
        GraphContainer::with_hooks(Box::new(engine.clone()), Box::new(recorder.clone()));

    let usd_file = scratch_usd_file("chain");
    let file = container
        .add_node(Node::with_params(
            NodeParams::FileSource {
                path: usd_file.clone(),
                filter_pattern: "/*".to_string(),
            },
            "file",
        ))
        .unwrap();
    let root = container
        .add_node(Node::with_params(
            NodeParams::Root {
                name: "Asset".to_string(),
                prim_type: PrimType::Xform,
            },
            "root",
        ))
        .unwrap();
    let output = container.add_node(Node::new(NodeKind::Output, "out")).unwrap();
    container.connect(file, root, 0).unwrap();
    container.connect(root, output, 0).unwrap();

    assert_eq!(engine.compute_count("Source-File"), 1);
    assert_eq!(engine.compute_count("Root"), 1);

    // The resolved stage is Root's wrapped result, not the raw file stage
    let resolved = container.resolved_stage().unwrap();
    assert_eq!(resolved, container.cached_stage(root).unwrap());
    assert_ne!(resolved, container.cached_stage(file).unwrap());

    // Each node notified exactly once, in dependency order
    let kinds: Vec<NodeKind> = recorder.events().iter().map(|&(_, k, _)| k).collect();
    assert_eq!(
        kinds,
        vec![NodeKind::FileSource, NodeKind::Root, NodeKind::Output]
    );

    let _ = fs::remove_file(&usd_file);
}

#[test]
fn test_empty_root_name_soft_reset_keeps_pass_through() {
    init_logging();
    let engine = MockEngine::new();
    let mut container = GraphContainer::new(Box::new(engine.clone()));

    let source = container
        .add_node(Node::new(NodeKind::SceneSource, "scene"))
        .unwrap();
    let root = container
        .add_node(Node::with_params(
            NodeParams::Root {
                name: String::new(),
                prim_type: PrimType::Xform,
            },
            "root",
        ))
        .unwrap();
    let output = container.add_node(Node::new(NodeKind::Output, "out")).unwrap();
    container.connect(source, root, 0).unwrap();
    container.connect(root, output, 0).unwrap();

    // Empty name passes the source stage through untouched
    let source_stage = container.cached_stage(source).unwrap();
    assert_eq!(container.cached_stage(root), Some(source_stage));
    assert_eq!(container.resolved_stage(), Some(source_stage));
    assert_eq!(engine.compute_count("Root"), 0);

    // A soft reset leaves the pure Root node's warm cache alone
    container.reset_node(root, false).unwrap();
    assert_eq!(engine.compute_count("Root"), 0);
    assert_eq!(container.cached_stage(root), Some(source_stage));

    // Naming the root forces real engine work and a fresh stage
    container
        .set_params(
            root,
            NodeParams::Root {
                name: "Asset".to_string(),
                prim_type: PrimType::Xform,
            },
        )
        .unwrap();
    assert_eq!(engine.compute_count("Root"), 1);
    let wrapped = container.cached_stage(root).unwrap();
    assert_ne!(wrapped, source_stage);
    assert_eq!(container.cached_stage(output), Some(wrapped));
    // The shared pass-through stage is still held by the source entry
    assert_eq!(engine.free_count(source_stage), 0);
}

#[test]
fn test_shared_pass_through_handle_freed_once() {
    init_logging();
    let engine = MockEngine::new();
    let mut container = GraphContainer::new(Box::new(engine.clone()));

    let source = container
        .add_node(Node::new(NodeKind::SceneSource, "scene"))
        .unwrap();
    let root = container
        .add_node(Node::with_params(
            NodeParams::Root {
                name: String::new(),
                prim_type: PrimType::Xform,
            },
            "root",
        ))
        .unwrap();
    let output = container.add_node(Node::new(NodeKind::Output, "out")).unwrap();
    container.connect(source, root, 0).unwrap();
    container.connect(root, output, 0).unwrap();

    // Source, Root and Output all cache the identical underlying stage
    let shared = container.cached_stage(source).unwrap();
    assert_eq!(container.cached_stage(root), Some(shared));
    assert_eq!(container.cached_stage(output), Some(shared));

    container.free_all();
    assert_eq!(engine.free_count(shared), 1);
}

#[test]
fn test_absent_source_propagates_to_output() {
    init_logging();
    let engine = MockEngine::new();
    let recorder = Recorder::default();
    let mut container =
        GraphContainer::with_hooks(Box::new(engine.clone()), Box::new(recorder.clone()));

    // Empty path: the file source resolves to nothing
    let file = container
        .add_node(Node::new(NodeKind::FileSource, "file"))
        .unwrap();
    let filter = container
        .add_node(Node::new(NodeKind::Filter, "filter"))
        .unwrap();
    let output = container.add_node(Node::new(NodeKind::Output, "out")).unwrap();
    container.connect(file, filter, 0).unwrap();
    container.connect(filter, output, 0).unwrap();

    assert_eq!(container.resolved_stage(), None);
    assert_eq!(engine.total_compute_count(), 0);

    // The output was still notified so the host can clear dependent state
    let last = *recorder.events().last().unwrap();
    assert_eq!(last.1, NodeKind::Output);
    assert_eq!(last.2, None);
}

#[test]
fn test_file_source_picks_up_new_path() {
    init_logging();
    let engine = MockEngine::new();
    let mut container = GraphContainer::new(Box::new(engine.clone()));

    let (file, _output) = container.add_basic_nodes(NodeKind::FileSource).unwrap();
    // Starter file source has no path yet
    assert_eq!(container.resolved_stage(), None);

    let usd_file = scratch_usd_file("repoint");
    container
        .set_params(
            file,
            NodeParams::FileSource {
                path: usd_file.clone(),
                filter_pattern: "/*".to_string(),
            },
        )
        .unwrap();
    assert_eq!(engine.compute_count("Source-File"), 1);
    assert!(container.resolved_stage().is_some());
    assert_eq!(container.resolved_stage(), container.cached_stage(file));

    let _ = fs::remove_file(&usd_file);
}

#[test]
fn test_merge_single_input_passes_through_after_disconnect() {
    init_logging();
    let engine = MockEngine::new();
    let mut container = GraphContainer::new(Box::new(engine.clone()));

    let a = container
        .add_node(Node::new(NodeKind::SceneSource, "a"))
        .unwrap();
    let b = container
        .add_node(Node::new(NodeKind::SceneSource, "b"))
        .unwrap();
    let merge = container.add_node(Node::new(NodeKind::Merge, "merge")).unwrap();
    let output = container.add_node(Node::new(NodeKind::Output, "out")).unwrap();
    container.connect(a, merge, 0).unwrap();
    container.connect(b, merge, 1).unwrap();
    container.connect(merge, output, 0).unwrap();

    // Both scene sources snapshot identical ambient state, so the native
    // engine deduplicates them to one stage; the merge still runs
    assert_eq!(engine.compute_count("Merge"), 1);
    let merged = container.cached_stage(merge).unwrap();

    // Dropping one branch turns the merge into a pass-through
    container.disconnect(merge, 1).unwrap();
    assert_eq!(engine.compute_count("Merge"), 1);
    let passed = container.cached_stage(merge).unwrap();
    assert_eq!(passed, container.cached_stage(a).unwrap());
    assert_ne!(passed, merged);
    assert_eq!(container.resolved_stage(), Some(passed));
}

#[test]
fn test_update_sweep_refreshes_scene_but_not_file() {
    init_logging();
    let engine = MockEngine::new();
    let mut container = GraphContainer::new(Box::new(engine.clone()));

    let usd_file = scratch_usd_file("sweep");
    let file = container
        .add_node(Node::with_params(
            NodeParams::FileSource {
                path: usd_file.clone(),
                filter_pattern: "/*".to_string(),
            },
            "file",
        ))
        .unwrap();
    let scene = container
        .add_node(Node::new(NodeKind::SceneSource, "scene"))
        .unwrap();
    let merge = container.add_node(Node::new(NodeKind::Merge, "merge")).unwrap();
    let output = container.add_node(Node::new(NodeKind::Output, "out")).unwrap();
    container.connect(file, merge, 0).unwrap();
    container.connect(scene, merge, 1).unwrap();
    container.connect(merge, output, 0).unwrap();

    assert_eq!(engine.compute_count("Source-File"), 1);
    assert_eq!(engine.compute_count("Source-SceneData"), 1);

    // The generic host notification only refreshes host-state-derived nodes
    container.update().unwrap();
    assert_eq!(engine.compute_count("Source-File"), 1);
    assert_eq!(engine.compute_count("Source-SceneData"), 2);

    let _ = fs::remove_file(&usd_file);
}
