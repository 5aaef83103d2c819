//! In-memory engine used by the test suite and headless operation
//!
//! Allocates sequential handles, records every boundary call, and keeps a
//! per-invocation memo so recomputing identical arguments yields the same
//! handle, the way the native engine deduplicates unchanged stages.

use super::{EngineArg, PrimInfo, StageHandle, UsdEngine};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
struct MockState {
    next_handle: Cell<u64>,
    calls: RefCell<Vec<(String, Vec<EngineArg>)>>,
    freed: RefCell<Vec<StageHandle>>,
    memo: RefCell<HashMap<String, StageHandle>>,
    prims: RefCell<HashMap<String, PrimInfo>>,
    fail_kinds: RefCell<Vec<String>>,
}

/// Scripted stand-in for the native USD engine.
///
/// Clones share their recorded state, so a test can hand one clone to a
/// container and keep another to inspect calls afterwards.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Rc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every compute of the given kind fail, for error-path tests
    pub fn fail_kind(&self, kind: &str) {
        self.state.fail_kinds.borrow_mut().push(kind.to_string());
    }

    /// Scripts the response of `stage_prim_get_info` for a path
    pub fn set_prim(&self, path: &str, info: PrimInfo) {
        self.state.prims.borrow_mut().insert(path.to_string(), info);
    }

    /// Number of compute calls dispatched for the given kind
    pub fn compute_count(&self, kind: &str) -> usize {
        self.state
            .calls
            .borrow()
            .iter()
            .filter(|(k, _)| k == kind)
            .count()
    }

    /// Total compute calls across all kinds
    pub fn total_compute_count(&self) -> usize {
        self.state.calls.borrow().len()
    }

    /// Every handle released so far, in release order
    pub fn freed(&self) -> Vec<StageHandle> {
        self.state.freed.borrow().clone()
    }

    /// How many times the given handle was released
    pub fn free_count(&self, handle: StageHandle) -> usize {
        self.state
            .freed
            .borrow()
            .iter()
            .filter(|&&h| h == handle)
            .count()
    }

    /// Arguments of the most recent compute call for a kind
    pub fn last_args(&self, kind: &str) -> Option<Vec<EngineArg>> {
        self.state
            .calls
            .borrow()
            .iter()
            .rev()
            .find(|(k, _)| k == kind)
            .map(|(_, args)| args.clone())
    }
}

impl UsdEngine for MockEngine {
    fn compute(&self, kind: &str, args: &[EngineArg]) -> Result<Option<StageHandle>, String> {
        self.state
            .calls
            .borrow_mut()
            .push((kind.to_string(), args.to_vec()));
        if self.state.fail_kinds.borrow().iter().any(|k| k == kind) {
            return Err(format!("native compute failed for {}", kind));
        }

        let memo_key = format!("{}:{:?}", kind, args);
        let mut memo = self.state.memo.borrow_mut();
        if let Some(&handle) = memo.get(&memo_key) {
            return Ok(Some(handle));
        }
        let handle = StageHandle(self.state.next_handle.get() + 1);
        self.state.next_handle.set(handle.0);
        memo.insert(memo_key, handle);
        Ok(Some(handle))
    }

    fn stage_free(&self, handle: StageHandle) {
        self.state.freed.borrow_mut().push(handle);
    }

    fn stage_export_to_str(&self, handle: StageHandle, flatten: bool) -> Result<String, String> {
        Ok(format!(
            "#usda 1.0\n# stage {} flatten={}\n",
            handle.0, flatten
        ))
    }

    fn stage_prim_get_info(&self, _handle: StageHandle, path: &str) -> Result<PrimInfo, String> {
        if let Some(info) = self.state.prims.borrow().get(path) {
            return Ok(info.clone());
        }
        let name = path.rsplit('/').next().unwrap_or("").to_string();
        Ok(PrimInfo {
            name: if name.is_empty() { "/".to_string() } else { name },
            prim_type: "Xform".to_string(),
            children: Vec::new(),
            visible: true,
            path: path.to_string(),
        })
    }
}
