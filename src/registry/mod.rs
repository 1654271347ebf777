//! The Plugin Registry (§4.B): discovers plugins on disk, builds the binding index, and
//! publishes immutable snapshots that in-flight requests may keep holding across a reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::events::{Event, EventSink};
use crate::script::pool::ContextPool;
use crate::script::{LoadError, PluginContext, PluginMetadata};

/// One successfully loaded plugin: its metadata plus the pooled execution contexts that
/// serve requests for it.
pub struct LoadedPlugin {
    pub source_path: PathBuf,
    pub metadata: PluginMetadata,
    pool: Arc<ContextPool>,
}

impl LoadedPlugin {
    pub async fn process(&self, query: &str) -> Result<String, crate::script::ProcessError> {
        let lease = self.pool.checkout().await.map_err(|e| {
            crate::script::ProcessError::Script(format!("no execution context available: {e}"))
        })?;
        lease.process(query)
    }
}

/// An immutable, point-in-time view of the registry: the binding → plugin index built
/// from the loaded plugin set. Readers keep an `Arc` to this for the lifetime of a
/// single request; a reload never mutates it in place.
pub struct RegistrySnapshot {
    index: HashMap<String, Vec<Arc<LoadedPlugin>>>,
}

impl RegistrySnapshot {
    fn empty() -> Self {
        Self {
            index: HashMap::new(),
        }
    }

    /// The active plugin for `binding`, or `None` if nothing claims it. Lookup is
    /// case-insensitive; `binding` should already be lowercased by the caller's tokenizer,
    /// but this re-lowercases defensively since it's cheap and this is the load-bearing
    /// lookup of the whole system.
    pub fn resolve(&self, binding: &str) -> Option<Arc<LoadedPlugin>> {
        self.index.get(&binding.to_lowercase()).and_then(|v| v.first()).cloned()
    }

    /// All active plugins — the first (i.e. non-shadowed) element of every binding index
    /// entry, deduplicated by source path since a multi-binding plugin's active context
    /// appears once per binding it claims — sorted by first declared binding, for the
    /// bindings index page (§4.D).
    pub fn list(&self) -> Vec<Arc<LoadedPlugin>> {
        let mut seen = std::collections::HashSet::new();
        let mut actives: Vec<Arc<LoadedPlugin>> = self
            .index
            .values()
            .filter_map(|plugins| plugins.first())
            .filter(|plugin| seen.insert(plugin.source_path.clone()))
            .cloned()
            .collect();
        actives.sort_by(|a, b| a.metadata.bindings[0].cmp(&b.metadata.bindings[0]));
        actives
    }
}

/// Owns the current [`RegistrySnapshot`] and knows how to rebuild one from disk.
pub struct Registry {
    plugin_dirs: Vec<PathBuf>,
    plugin_timeout: Duration,
    pool_capacity: usize,
    sink: Arc<dyn EventSink>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl Registry {
    /// Builds the registry and performs its first load synchronously (blocking on plugin
    /// I/O and Lua loading, same as the teacher's `AppState::new` loading config before
    /// serving a single request).
    pub fn load(
        plugin_dirs: Vec<PathBuf>,
        plugin_timeout: Duration,
        pool_capacity: usize,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let snapshot = build_snapshot(&plugin_dirs, plugin_timeout, pool_capacity, sink.as_ref());
        Self {
            plugin_dirs,
            plugin_timeout,
            pool_capacity,
            sink,
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The currently published snapshot. Cheap: clones an `Arc`.
    pub fn current(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read().expect("registry snapshot lock poisoned"))
    }

    /// Rebuilds from disk and atomically publishes the new snapshot. Building is
    /// structurally non-destructive: nothing under `self.snapshot` changes until the new
    /// snapshot is fully assembled, so a reload that discovers nothing new (or that hits
    /// errors scanning a directory) simply republishes an equivalent-or-smaller plugin
    /// set rather than ever leaving the registry in a half-built state.
    pub fn reload(&self) {
        let snapshot = build_snapshot(
            &self.plugin_dirs,
            self.plugin_timeout,
            self.pool_capacity,
            self.sink.as_ref(),
        );
        *self.snapshot.write().expect("registry snapshot lock poisoned") = Arc::new(snapshot);
    }
}

fn build_snapshot(
    plugin_dirs: &[PathBuf],
    plugin_timeout: Duration,
    pool_capacity: usize,
    sink: &dyn EventSink,
) -> RegistrySnapshot {
    let mut candidates = Vec::new();
    for dir in plugin_dirs {
        collect_plugin_files(dir, &mut candidates);
    }
    candidates.sort();

    let mut plugins = Vec::new();
    for path in candidates {
        match PluginContext::load(&path, plugin_timeout) {
            Ok(ctx) => match ctx.info() {
                Ok(metadata) => {
                    sink.emit(Event::PluginLoaded {
                        path: path.clone(),
                        bindings: metadata.bindings.clone(),
                    });
                    let pool = Arc::new(ContextPool::with_capacity(
                        path.clone(),
                        plugin_timeout,
                        pool_capacity,
                    ));
                    plugins.push(Arc::new(LoadedPlugin {
                        source_path: path,
                        metadata,
                        pool,
                    }));
                }
                Err(err) => sink.emit(Event::PluginLoadError {
                    path,
                    reason: err.to_string(),
                }),
            },
            Err(err) => sink.emit(Event::PluginLoadError {
                path,
                reason: load_error_message(err),
            }),
        }
    }

    let mut index: HashMap<String, Vec<Arc<LoadedPlugin>>> = HashMap::new();
    for plugin in &plugins {
        for binding in &plugin.metadata.bindings {
            let key = binding.to_lowercase();
            let entry = index.entry(key.clone()).or_default();
            entry.push(Arc::clone(plugin));
            if entry.len() == 2 {
                sink.emit(Event::PluginShadowed {
                    binding: key,
                    active: entry[0].source_path.clone(),
                    shadowed: entry[1].source_path.clone(),
                });
            }
        }
    }

    if index.is_empty() {
        return RegistrySnapshot::empty();
    }

    RegistrySnapshot { index }
}

fn load_error_message(err: LoadError) -> String {
    err.to_string()
}

/// Recursively collects files with the plugin extension under `dir`. A missing directory
/// (the common case before any user plugins are installed) is silently treated as empty;
/// any other I/O error scanning a subdirectory is skipped rather than aborting the whole
/// discovery pass, so one unreadable directory cannot prevent every other plugin from
/// loading.
fn collect_plugin_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_plugin_files(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some(crate::constants::PLUGIN_FILE_EXTENSION) {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingEventSink;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, source: &str) {
        std::fs::write(dir.path().join(name), source).unwrap();
    }

    const PLUGIN_TEMPLATE: &str = r#"
        function info() return { bindings = {"{binding}"}, description = "d", example = "e" } end
        function process(q) return "https://example.com/{binding}" end
    "#;

    #[test]
    fn discovers_and_resolves_plugins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "gh.lua", &PLUGIN_TEMPLATE.replace("{binding}", "gh"));
        write(&dir, "yt.lua", &PLUGIN_TEMPLATE.replace("{binding}", "yt"));

        let registry = Registry::load(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(200),
            2,
            Arc::new(TracingEventSink),
        );
        let snapshot = registry.current();
        assert!(snapshot.resolve("gh").is_some());
        assert!(snapshot.resolve("GH").is_some());
        assert!(snapshot.resolve("yt").is_some());
        assert!(snapshot.resolve("nope").is_none());
        assert_eq!(snapshot.list().len(), 2);
    }

    #[test]
    fn missing_directory_yields_empty_snapshot() {
        let registry = Registry::load(
            vec![PathBuf::from("/nonexistent/bunnylol/commands")],
            Duration::from_millis(200),
            2,
            Arc::new(TracingEventSink),
        );
        assert_eq!(registry.current().list().len(), 0);
    }

    #[test]
    fn conflicting_bindings_resolve_to_lexicographically_first_path() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a_first.lua", &PLUGIN_TEMPLATE.replace("{binding}", "dup"));
        write(&dir, "b_second.lua", &PLUGIN_TEMPLATE.replace("{binding}", "dup"));

        let registry = Registry::load(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(200),
            2,
            Arc::new(TracingEventSink),
        );
        let active = registry.current().resolve("dup").unwrap();
        assert!(active.source_path.ends_with("a_first.lua"));
    }

    #[test]
    fn reload_picks_up_new_plugins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "gh.lua", &PLUGIN_TEMPLATE.replace("{binding}", "gh"));

        let registry = Registry::load(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(200),
            2,
            Arc::new(TracingEventSink),
        );
        assert_eq!(registry.current().list().len(), 1);

        write(&dir, "yt.lua", &PLUGIN_TEMPLATE.replace("{binding}", "yt"));
        registry.reload();
        assert_eq!(registry.current().list().len(), 2);
    }

    #[test]
    fn list_excludes_shadowed_plugins_and_sorts_by_first_binding() {
        let dir = TempDir::new().unwrap();
        // Source-path order ("aa_zebra" < "zz_aardvark") is the reverse of binding order
        // ("aardvark" < "zebra"), so this also exercises that list() sorts by binding,
        // not by the discovery order its candidates were loaded in.
        write(
            &dir,
            "aa_zebra.lua",
            r#"function info() return { bindings = {"zebra"}, description = "d", example = "e" } end
               function process(q) return "https://example.com/zebra" end"#,
        );
        write(
            &dir,
            "zz_aardvark.lua",
            r#"function info() return { bindings = {"aardvark"}, description = "d", example = "e" } end
               function process(q) return "https://example.com/aardvark" end"#,
        );
        // Two plugins claim "dup"; only the lexicographically-first source path is active
        // and should be the only one that shows up in list().
        write(&dir, "a_first.lua", &PLUGIN_TEMPLATE.replace("{binding}", "dup"));
        write(&dir, "b_second.lua", &PLUGIN_TEMPLATE.replace("{binding}", "dup"));

        let registry = Registry::load(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(200),
            2,
            Arc::new(TracingEventSink),
        );
        let list = registry.current().list();

        // 3 active plugins: zebra, aardvark, and the winner of the "dup" conflict.
        assert_eq!(list.len(), 3);
        let bindings: Vec<&str> = list.iter().map(|p| p.metadata.bindings[0].as_str()).collect();
        assert_eq!(bindings, vec!["aardvark", "dup", "zebra"]);
        let dup_entry = list.iter().find(|p| p.metadata.bindings[0] == "dup").unwrap();
        assert!(dup_entry.source_path.ends_with("a_first.lua"));
    }

    #[test]
    fn invalid_plugin_is_skipped_without_aborting_the_build() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.lua", "this is not even lua (((");
        write(&dir, "gh.lua", &PLUGIN_TEMPLATE.replace("{binding}", "gh"));

        let registry = Registry::load(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(200),
            2,
            Arc::new(TracingEventSink),
        );
        assert_eq!(registry.current().list().len(), 1);
        assert!(registry.current().resolve("gh").is_some());
    }
}
