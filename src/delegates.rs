//! Hydra render delegate installation and loading
//!
//! Delegates ship as a directory of shared libraries plus resources. The
//! installer copies a package into the per-user delegates directory on a
//! worker thread, publishing progress for the host UI, and the registry
//! loads the shared libraries it finds there.

use libloading::Library;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Per-user directory delegate packages are installed into
pub fn delegates_dir() -> Result<PathBuf, String> {
    let base = dirs::data_dir().ok_or_else(|| "no user data directory available".to_string())?;
    Ok(base.join("stagegraph").join("delegates"))
}

fn is_delegate_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("so") | Some("dll") | Some("dylib")
    )
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), String> {
    let entries =
        fs::read_dir(dir).map_err(|e| format!("failed to read {}: {}", dir.display(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| format!("failed to read {}: {}", dir.display(), e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// A delegate shared library kept loaded for the session.
///
/// The library must stay alive as long as the render engine may call into
/// it, so the registry never unloads individual entries.
pub struct LoadedDelegate {
    pub name: String,
    _library: Library,
}

/// Loaded delegate libraries
#[derive(Default)]
pub struct DelegateRegistry {
    delegates: Vec<LoadedDelegate>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads one shared library as a delegate
    pub fn load(&mut self, path: &Path) -> Result<(), String> {
        if !is_delegate_library(path) {
            return Err(format!("{} is not a shared library", path.display()));
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("delegate")
            .to_string();
        // Loading runs arbitrary initialization code from the library
        let library = unsafe { Library::new(path) }
            .map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        info!("loaded delegate {}", name);
        self.delegates.push(LoadedDelegate {
            name,
            _library: library,
        });
        Ok(())
    }

    /// Loads every shared library found under the delegates directory.
    ///
    /// Packages that fail to load are skipped with a warning; one broken
    /// delegate must not take down the rest.
    pub fn load_all(&mut self, dir: &Path) -> Result<usize, String> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut files = Vec::new();
        collect_files(dir, &mut files)?;
        files.sort();
        let mut loaded = 0;
        for path in files.iter().filter(|p| is_delegate_library(p)) {
            match self.load(path) {
                Ok(()) => loaded += 1,
                Err(err) => warn!("skipping delegate: {}", err),
            }
        }
        Ok(loaded)
    }

    pub fn names(&self) -> Vec<&str> {
        self.delegates.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}

/// Clears the shared progress slot when the worker exits, even on panic
struct ProgressGuard(Arc<Mutex<Option<f32>>>);

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if let Ok(mut progress) = self.0.lock() {
            *progress = None;
        }
    }
}

/// Background installer for delegate packages.
///
/// `progress()` yields `Some(fraction)` while a copy is running; the host
/// polls it from its draw loop and calls `finish()` once it turns `None`.
#[derive(Default)]
pub struct DelegateInstaller {
    progress: Arc<Mutex<Option<f32>>>,
    worker: Option<JoinHandle<Result<PathBuf, String>>>,
}

impl DelegateInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts copying a package directory into the destination on a worker
    /// thread. Errors if an installation is already running.
    pub fn install_into(&mut self, package: PathBuf, dest_root: PathBuf) -> Result<(), String> {
        if self.is_installing() {
            return Err("a delegate installation is already running".to_string());
        }
        if !package.is_dir() {
            return Err(format!("{} is not a package directory", package.display()));
        }
        let name = package
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| format!("{} has no package name", package.display()))?
            .to_string();

        let progress = Arc::clone(&self.progress);
        if let Ok(mut slot) = progress.lock() {
            *slot = Some(0.0);
        }
        self.worker = Some(thread::spawn(move || {
            let _guard = ProgressGuard(Arc::clone(&progress));
            let dest = dest_root.join(&name);
            copy_package(&package, &dest, &progress)?;
            info!("installed delegate package {} to {}", name, dest.display());
            Ok(dest)
        }));
        Ok(())
    }

    /// Starts installing into the per-user delegates directory
    pub fn install(&mut self, package: PathBuf) -> Result<(), String> {
        let dest_root = delegates_dir()?;
        self.install_into(package, dest_root)
    }

    /// Fraction copied so far, `None` when no installation is running
    pub fn progress(&self) -> Option<f32> {
        self.progress.lock().ok().and_then(|p| *p)
    }

    pub fn is_installing(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Joins the worker and returns the installed package directory.
    ///
    /// Returns `None` when no installation was started. Blocks if the
    /// worker is still copying.
    pub fn finish(&mut self) -> Option<Result<PathBuf, String>> {
        let worker = self.worker.take()?;
        Some(match worker.join() {
            Ok(result) => result,
            Err(_) => Err("delegate installation worker panicked".to_string()),
        })
    }
}

fn copy_package(
    package: &Path,
    dest: &Path,
    progress: &Arc<Mutex<Option<f32>>>,
) -> Result<(), String> {
    let mut files = Vec::new();
    collect_files(package, &mut files)?;
    if files.is_empty() {
        return Err(format!("package {} is empty", package.display()));
    }
    let total = files.len();
    for (index, file) in files.iter().enumerate() {
        let relative = file
            .strip_prefix(package)
            .map_err(|e| format!("bad package layout: {}", e))?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        fs::copy(file, &target)
            .map_err(|e| format!("failed to copy {}: {}", file.display(), e))?;
        if let Ok(mut slot) = progress.lock() {
            *slot = Some((index + 1) as f32 / total as f32);
        }
    }
    Ok(())
}
