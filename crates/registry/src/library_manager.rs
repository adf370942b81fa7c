//! The library manager.
//!
//! Scans `<libraries_root>/<library_id>/`, reads and validates
//! `library.manifest.json`, and for a `node-library` manifest dynamically
//! loads the package's compiled entry point (a `cdylib`) and calls its
//! exported `register_nodes` hook — the Rust-native equivalent of a
//! JavaScript `index.js` / `registerNodes(registry, {library, db})`
//! contract. `extension` manifests are recorded but never touch the node
//! registry; their `extension/routes.*` wiring belongs to the
//! (out-of-scope) `api` crate.
//!
//! The manager owns only metadata and the loaded `libloading::Library`
//! handles that keep a library's code resident; it never owns node
//! instances — those live in [`crate::NodeRegistry`]. The manager itself
//! holds only metadata; it does not own node instances.

use std::collections::HashMap;
use std::ffi::c_int;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::manifest::{self, LibraryManifest, LibraryType};
use crate::node_registry::NodeRegistry;

const MANIFEST_FILE: &str = "library.manifest.json";

/// Passed to a library's `register_nodes` hook — the Rust shape of the
/// spec's `{library, db}` second argument. `db` is deliberately absent: a
/// library registers *types*, not live data access; any DB needs a type's
/// instances have flow through [`nodes::ExecutionContext`] at execution
/// time instead, so this never grows into a backdoor around the context
/// facade.
#[repr(C)]
pub struct LibraryContext<'a> {
    pub library_id: &'a str,
}

/// The symbol every `node-library` entry point must export:
///
/// ```ignore
/// #[no_mangle]
/// pub extern "C" fn register_nodes(registry: &registry::NodeRegistry, ctx: registry::LibraryContext) -> i32
/// ```
///
/// Returns `0` on success, any other value is folded into
/// [`RegistryError::HookFailed`]. Passing a live `&NodeRegistry` across the
/// FFI boundary ties a loaded library to this crate's exact compiled
/// layout — the same trade-off the wider Rust plugin ecosystem accepts
/// (pinning host and plugin to one toolchain/version) in exchange for not
/// needing a serialisation boundary for every node registration.
type RegisterNodesFn = unsafe extern "C" fn(&NodeRegistry, LibraryContext) -> c_int;

struct LoadedLibrary {
    manifest: LibraryManifest,
    path: PathBuf,
    /// Kept alive for as long as the library's node types remain
    /// registered — dropping it would unmap code that registered trait
    /// object vtables still point into.
    #[allow(dead_code)]
    handle: Option<libloading::Library>,
    registered_types: Vec<String>,
    last_loaded_at: Option<DateTime<Utc>>,
}

/// Outcome of a bulk load, mirroring a `loadAllLibraries` return shape.
#[derive(Debug, Default, Clone)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

/// The result of a single [`LibraryManager::load_library`] call.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub library_id: String,
    pub node_types: Vec<String>,
}

pub struct LibraryManager {
    libraries_root: PathBuf,
    registry: Arc<NodeRegistry>,
    loaded: Mutex<HashMap<String, LoadedLibrary>>,
}

impl LibraryManager {
    #[must_use]
    pub fn new(libraries_root: impl Into<PathBuf>, registry: Arc<NodeRegistry>) -> Self {
        Self { libraries_root: libraries_root.into(), registry, loaded: Mutex::new(HashMap::new()) }
    }

    /// The on-disk directory `load_library` expects for a given id — the
    /// same `<libraries_root>/<library_id>` join `load_all_libraries` uses
    /// internally, exposed so callers driving a single library by id (the
    /// CLI's `library load` subcommand, the API's `/libraries/:id/load`)
    /// don't have to know the root.
    #[must_use]
    pub fn library_path(&self, library_id: &str) -> PathBuf {
        self.libraries_root.join(library_id)
    }

    /// The `library_id` of every subdirectory under the libraries root that
    /// carries a readable manifest, regardless of load state.
    pub fn scan_available(&self) -> Result<Vec<String>, RegistryError> {
        let mut ids = Vec::new();
        if !self.libraries_root.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.libraries_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join(MANIFEST_FILE).exists() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every library under the libraries root. When `enabled_ids` is
    /// `Some`, only libraries whose `libraryId` appears in it are
    /// considered — the caller (the engine's bootstrap step) is expected to
    /// have already queried `node_libraries` for the `enabled` flag, since
    /// this crate never talks to the control store directly. A failure on
    /// one library is recorded in `failed` and
    /// loading continues with the next — library load errors never take
    /// down the process.
    pub fn load_all_libraries(&self, enabled_ids: Option<&[String]>) -> Result<LoadSummary, RegistryError> {
        let mut summary = LoadSummary::default();
        for library_id in self.scan_available()? {
            if let Some(enabled) = enabled_ids {
                if !enabled.iter().any(|id| id == &library_id) {
                    summary.skipped.push(library_id);
                    continue;
                }
            }
            let path = self.libraries_root.join(&library_id);
            match self.load_library(&path) {
                Ok(outcome) => summary.loaded.push(outcome.library_id),
                Err(err) => {
                    warn!(library_id = %library_id, error = %err, "library load failed, continuing with next");
                    summary.failed.push((library_id, err.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Load a single library from `path` (a directory containing
    /// `library.manifest.json` and, for a `node-library`, a compiled entry
    /// point). Refuses — without error — libraries already loaded; see
    /// `already_loaded` on the returned error message for that case, or
    /// check [`LibraryManager::is_loaded`] first.
    pub fn load_library(&self, path: &Path) -> Result<LoadOutcome, RegistryError> {
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(RegistryError::ManifestMissing(manifest_path));
        }
        let raw = fs::read_to_string(&manifest_path)?;
        let manifest: LibraryManifest = serde_json::from_str(&raw)?;
        manifest::validate(&manifest)?;

        if self.is_loaded(&manifest.library_id) {
            return Err(RegistryError::AlreadyLoaded(manifest.library_id));
        }

        let (handle, registered_types) = match manifest.library_type {
            LibraryType::Extension => (None, Vec::new()),
            LibraryType::NodeLibrary => {
                let (handle, types) = self.load_node_library(path, &manifest)?;
                (Some(handle), types)
            }
        };

        info!(library_id = %manifest.library_id, node_types = ?registered_types, "library loaded");

        let outcome = LoadOutcome { library_id: manifest.library_id.clone(), node_types: registered_types.clone() };
        self.loaded.lock().expect("library manager lock poisoned").insert(
            manifest.library_id.clone(),
            LoadedLibrary {
                manifest,
                path: path.to_path_buf(),
                handle,
                registered_types,
                last_loaded_at: Some(Utc::now()),
            },
        );
        Ok(outcome)
    }

    fn load_node_library(
        &self,
        path: &Path,
        manifest: &LibraryManifest,
    ) -> Result<(libloading::Library, Vec<String>), RegistryError> {
        let entry_point = path.join(libloading::library_filename(&manifest.library_id));
        if !entry_point.exists() {
            return Err(RegistryError::EntryPointMissing(entry_point));
        }

        // Cache-busting: the dynamic linker caches by inode/path, so a
        // rebuilt `.so` at the same path would otherwise be invisible to a
        // reload. Copying to a uniquely-named temp path forces a fresh map
        // every time.
        let busted = std::env::temp_dir().join(format!(
            "flowcore-{}-{}.{}",
            manifest.library_id,
            uuid::Uuid::new_v4(),
            entry_point.extension().and_then(|e| e.to_str()).unwrap_or("so"),
        ));
        fs::copy(&entry_point, &busted)?;

        // SAFETY: the entry point is a library published under this
        // contract — loading arbitrary, untrusted code is
        // out of scope; the caller is responsible for only installing
        // libraries it trusts.
        let library = unsafe { libloading::Library::new(&busted)? };
        let before = self.registry.get_all().len();

        // SAFETY: `register_nodes` is looked up by the exact name/signature
        // the contract requires; a library built against a mismatched
        // `registry` crate version is a misconfiguration, not something
        // this call can detect.
        let code = unsafe {
            let register_nodes: libloading::Symbol<RegisterNodesFn> = library.get(b"register_nodes\0")?;
            register_nodes(&self.registry, LibraryContext { library_id: &manifest.library_id })
        };
        if code != 0 {
            return Err(RegistryError::HookFailed { library_id: manifest.library_id.clone(), code });
        }

        let after = self.registry.get_all().len();
        if after < before {
            warn!(library_id = %manifest.library_id, "register_nodes reported success but the registry shrank");
        }

        Ok((library, manifest.provides.node_types.clone()))
    }

    #[must_use]
    pub fn is_loaded(&self, library_id: &str) -> bool {
        self.loaded.lock().expect("library manager lock poisoned").contains_key(library_id)
    }

    /// Remove every type this library registered from the node registry and
    /// drop its in-memory metadata. Returns the names removed.
    pub fn unload_library(&self, library_id: &str) -> Result<Vec<String>, RegistryError> {
        let mut loaded = self.loaded.lock().expect("library manager lock poisoned");
        if !loaded.contains_key(library_id) {
            return Err(RegistryError::NotLoaded(library_id.to_string()));
        }
        let removed = self.registry.unregister_library_nodes(library_id);
        loaded.remove(library_id);
        info!(library_id, removed = ?removed, "library unloaded");
        Ok(removed)
    }

    /// Unload then load again from the library's original on-disk path —
    /// the only way to observe a rebuilt entry point without a process
    /// restart.
    pub fn reload_library(&self, library_id: &str) -> Result<LoadOutcome, RegistryError> {
        let path = {
            let loaded = self.loaded.lock().expect("library manager lock poisoned");
            loaded.get(library_id).map(|l| l.path.clone()).ok_or_else(|| RegistryError::NotLoaded(library_id.to_string()))?
        };
        self.unload_library(library_id)?;
        self.load_library(&path)
    }

    #[must_use]
    pub fn last_loaded_at(&self, library_id: &str) -> Option<DateTime<Utc>> {
        self.loaded.lock().expect("library manager lock poisoned").get(library_id).and_then(|l| l.last_loaded_at)
    }

    #[must_use]
    pub fn registered_types_of(&self, library_id: &str) -> Option<Vec<String>> {
        self.loaded.lock().expect("library manager lock poisoned").get(library_id).map(|l| l.registered_types.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, body: &str) {
        fs::create_dir_all(dir).unwrap();
        let mut f = fs::File::create(dir.join(MANIFEST_FILE)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn scan_available_lists_directories_with_manifests() {
        let tmp = tempdir();
        write_manifest(&tmp.join("lib-a"), r#"{"libraryId":"lib-a","schemaVersion":1,"name":"A","version":"1.0.0","type":"extension"}"#);
        fs::create_dir_all(tmp.join("not-a-library")).unwrap();

        let manager = LibraryManager::new(tmp.clone(), Arc::new(NodeRegistry::new()));
        let ids = manager.scan_available().unwrap();
        assert_eq!(ids, vec!["lib-a".to_string()]);
    }

    #[test]
    fn loading_an_extension_manifest_registers_no_node_types() {
        let tmp = tempdir();
        write_manifest(&tmp.join("lib-ext"), r#"{"libraryId":"lib-ext","schemaVersion":1,"name":"Ext","version":"1.0.0","type":"extension"}"#);

        let registry = Arc::new(NodeRegistry::new());
        let manager = LibraryManager::new(tmp.clone(), registry.clone());
        let outcome = manager.load_library(&tmp.join("lib-ext")).unwrap();
        assert!(outcome.node_types.is_empty());
        assert!(manager.is_loaded("lib-ext"));
    }

    #[test]
    fn loading_twice_is_refused() {
        let tmp = tempdir();
        write_manifest(&tmp.join("lib-ext"), r#"{"libraryId":"lib-ext","schemaVersion":1,"name":"Ext","version":"1.0.0","type":"extension"}"#);
        let manager = LibraryManager::new(tmp.clone(), Arc::new(NodeRegistry::new()));
        manager.load_library(&tmp.join("lib-ext")).unwrap();
        let err = manager.load_library(&tmp.join("lib-ext")).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyLoaded(_)));
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let tmp = tempdir();
        fs::create_dir_all(tmp.join("empty")).unwrap();
        let manager = LibraryManager::new(tmp.clone(), Arc::new(NodeRegistry::new()));
        let err = manager.load_library(&tmp.join("empty")).unwrap_err();
        assert!(matches!(err, RegistryError::ManifestMissing(_)));
    }

    #[test]
    fn node_library_missing_entry_point_is_an_error() {
        let tmp = tempdir();
        write_manifest(
            &tmp.join("lib-x"),
            r#"{"libraryId":"lib-x","schemaVersion":1,"name":"X","version":"1.0.0","provides":{"nodeTypes":["foo"]}}"#,
        );
        let manager = LibraryManager::new(tmp.clone(), Arc::new(NodeRegistry::new()));
        let err = manager.load_library(&tmp.join("lib-x")).unwrap_err();
        assert!(matches!(err, RegistryError::EntryPointMissing(_)));
    }

    #[test]
    fn load_all_libraries_respects_enabled_filter() {
        let tmp = tempdir();
        write_manifest(&tmp.join("lib-a"), r#"{"libraryId":"lib-a","schemaVersion":1,"name":"A","version":"1.0.0","type":"extension"}"#);
        write_manifest(&tmp.join("lib-b"), r#"{"libraryId":"lib-b","schemaVersion":1,"name":"B","version":"1.0.0","type":"extension"}"#);

        let manager = LibraryManager::new(tmp.clone(), Arc::new(NodeRegistry::new()));
        let summary = manager.load_all_libraries(Some(&["lib-a".to_string()])).unwrap();
        assert_eq!(summary.loaded, vec!["lib-a".to_string()]);
        assert_eq!(summary.skipped, vec!["lib-b".to_string()]);
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("registry-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
