use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::bus::{AppEvent, Command};
use crate::error::{CommandError, PluginError};
use crate::plugin::adapter::{
    PluginInstance, PluginResourceHandler, command_handler, hook_handler,
};
use crate::plugin::api::PluginApi;

/// What one committed plugin contributed to the host.
pub struct PluginRecord {
    pub instance: Arc<PluginInstance>,
    pub kinds: Vec<String>,
    pub commands: Vec<String>,
    pub hooks: usize,
    pub injections: usize,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, String)>,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        match (self.loaded.len(), self.failed.len()) {
            (0, 0) => "no plugins found".to_string(),
            (loaded, 0) => format!("{loaded} plugin(s) loaded"),
            (loaded, failed) => format!("{loaded} plugin(s) loaded, {failed} failed"),
        }
    }
}

pub struct PluginManager {
    api: Arc<PluginApi>,
    plugins: BTreeMap<String, PluginRecord>,
    stems: HashSet<String>,
}

impl PluginManager {
    pub fn new(api: Arc<PluginApi>) -> Self {
        Self {
            api,
            plugins: BTreeMap::new(),
            stems: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn api(&self) -> &Arc<PluginApi> {
        &self.api
    }

    /// `.lua` files under `root`, in path order. A missing directory has none.
    pub fn discover(root: &Path) -> Vec<PathBuf> {
        if !root.is_dir() {
            return Vec::new();
        }

        let mut files = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!(error = %error, "skipping unreadable plugin path");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|extension| extension.eq_ignore_ascii_case("lua"))
            })
            .collect::<Vec<_>>();
        files.sort();
        files
    }

    /// Loads every plugin under `root`. One broken plugin never stops the rest.
    pub fn load_dir(&mut self, root: &Path) -> LoadReport {
        let mut report = LoadReport::default();
        for path in Self::discover(root) {
            match self.load_file(&path) {
                Ok(name) => report.loaded.push(name),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "plugin skipped");
                    report.failed.push((path, error.to_string()));
                }
            }
        }
        info!(
            root = %root.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "plugin discovery finished"
        );
        report
    }

    /// Validates a plugin completely before registering anything it contributes.
    pub fn load_file(&mut self, path: &Path) -> Result<String, PluginError> {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.stems.contains(&stem) {
            return Err(PluginError::DuplicateName(stem));
        }

        let (instance, contributions) = PluginInstance::open(path, &self.api)?;
        let name = instance.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginError::DuplicateName(name));
        }

        let mut seen = HashSet::new();
        for command in &contributions.commands {
            if self.api.commands().contains(&command.name) || !seen.insert(command.name.as_str()) {
                return Err(CommandError::Duplicate(command.name.clone()).into());
            }
        }
        let mut kinds = HashSet::new();
        for kind in &contributions.kinds {
            if !kinds.insert(kind.id.as_str()) {
                return Err(PluginError::Protocol {
                    export: "GetResourceTypes".to_string(),
                    reason: format!("kind '{}' declared twice", kind.id),
                });
            }
        }

        let instance = Arc::new(instance);
        instance.scope().bind(Arc::downgrade(&instance));

        let mut record = PluginRecord {
            instance: Arc::clone(&instance),
            kinds: Vec::new(),
            commands: Vec::new(),
            hooks: contributions.hooks.len(),
            injections: contributions.injections.len(),
        };

        for info in contributions.kinds {
            let id = info.id.clone();
            let handler = Arc::new(PluginResourceHandler::new(info, Arc::clone(&instance)));
            if self.api.registry().register(id.clone(), handler).is_some() {
                warn!(plugin = %name, kind = %id, "plugin replaced an existing resource handler");
            }
            record.kinds.push(id);
        }

        for spec in contributions.commands {
            let command = Command::new(
                spec.name.clone(),
                spec.description,
                command_handler(Arc::downgrade(&instance), spec.key),
            );
            match self.api.commands().register(command) {
                Ok(()) => record.commands.push(spec.name),
                Err(error) => warn!(plugin = %name, error = %error, "command not registered"),
            }
        }

        for injection in contributions.injections {
            self.api.injections().add(injection);
        }

        for hook in contributions.hooks {
            self.api
                .events()
                .subscribe(hook.event, hook_handler(Arc::downgrade(&instance), hook.key));
        }

        instance.scope().mark_committed();
        info!(
            plugin = %name,
            version = instance.meta().version.as_deref().unwrap_or("-"),
            path = %instance.path().display(),
            capabilities = %instance.capabilities(),
            kinds = record.kinds.len(),
            commands = record.commands.len(),
            "plugin loaded"
        );

        self.stems.insert(stem);
        self.plugins.insert(name.clone(), record);
        Ok(name)
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&Arc<PluginInstance>> {
        self.plugins.get(name).map(|record| &record.instance)
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &PluginRecord)> {
        self.plugins.iter()
    }

    /// Fires `app-shutdown`, then closes every plugin. Failures are collected, never
    /// fatal.
    pub fn shutdown(&mut self) -> Vec<String> {
        let mut errors = self.api.events().trigger(AppEvent::AppShutdown, &Value::Null);
        for (name, record) in &self.plugins {
            if let Err(error) = record.instance.shutdown() {
                warn!(plugin = %name, error = %error, "plugin shutdown failed");
                errors.push(format!("{name}: {error}"));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::PluginManager;
    use crate::bus::AppEvent;
    use crate::k8s::testing::FakeCluster;
    use crate::model::{BuiltinKind, ResourceRow};
    use crate::plugin::api::PluginApi;
    use crate::registry::ResourceRegistry;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    const WIDGETS: &str = r#"
        function Name() return "widgets" end
        function Initialize() end
        function GetResourceTypes()
            return { { Name = "Widgets", Type = "widget", Columns = { { Title = "Name", Width = 20 } } } }
        end
        function GetResourceData(kind, ns)
            return { { Name = "w1" }, { Name = "w2" } }
        end
    "#;

    fn manager(cluster: Arc<FakeCluster>) -> PluginManager {
        PluginManager::new(Arc::new(PluginApi::new(
            Arc::new(ResourceRegistry::new(Duration::from_secs(5))),
            cluster,
            tokio::runtime::Handle::current(),
            "default",
        )))
    }

    fn write(dir: &Path, file: &str, source: &str) {
        std::fs::write(dir.join(file), source).expect("write plugin");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_and_classify_keeps_good_plugins_and_reports_bad_ones() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(
            dir.path(),
            "good.lua",
            r#"
            function Name() return "g" end
            function Initialize() end
            function GetResourceTypes()
                return { { Name = "Widgets", Type = "widget", Namespaced = true,
                           RefreshIntervalSeconds = 5, Columns = { { Title = "Name", Width = 20 } } } }
            end
            function GetResourceData(kind, ns)
                return { { Name = "w1" }, { Name = "w2" } }
            end
            "#,
        );
        write(dir.path(), "bad.lua", "function Initialize() end");
        write(dir.path(), "notes.txt", "not a plugin");

        let cluster = Arc::new(FakeCluster::new());
        let mut manager = manager(Arc::clone(&cluster));
        let report = manager.load_dir(dir.path());

        assert_eq!(report.loaded, vec!["g".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("bad.lua"));

        let registry = manager.api().registry();
        assert!(registry.supported().contains("widget"));
        let info = registry.kind_info("widget").expect("widget info");
        assert!(info.namespaced);
        assert_eq!(info.refresh, Duration::from_secs(5));

        let rows = registry
            .list(cluster.as_ref(), "widget", "ns")
            .await
            .expect("widget rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "w2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn plugin_can_take_over_a_builtin_kind() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(
            dir.path(),
            "pods.lua",
            r#"
            function Name() return "fake-pods" end
            function Initialize() end
            function GetResourceTypes()
                return { { Name = "Pods", Type = "Pod", Columns = {
                    { Title = "Namespace" }, { Title = "Name" }, { Title = "Ready" },
                    { Title = "Status" }, { Title = "Restarts" },
                } } }
            end
            function GetResourceData(kind, ns)
                return { { Name = "fake-0", Namespace = ns, Ready = "1/1", Status = "Running", Restarts = 0 } }
            end
            "#,
        );

        let cluster = Arc::new(FakeCluster::new().with_rows(
            BuiltinKind::Pod,
            vec![ResourceRow::new("real-0", None, Vec::new())],
        ));
        let mut manager = manager(Arc::clone(&cluster));
        manager.load_dir(dir.path());

        let rows = manager
            .api()
            .registry()
            .list(cluster.as_ref(), "Pod", "shop")
            .await
            .expect("pod rows");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns, ["shop", "fake-0", "1/1", "Running", "0", "-"]);
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_name_export_skips_only_that_file() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(dir.path(), "a_anon.lua", "function Initialize() end");
        write(dir.path(), "b_syntax.lua", "function Name( return");
        write(dir.path(), "c_widgets.lua", WIDGETS);

        let mut manager = manager(Arc::new(FakeCluster::new()));
        let report = manager.load_dir(dir.path());

        assert_eq!(report.loaded, vec!["widgets".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(
            report.failed[0].1,
            "plugin does not export required function 'Name'"
        );
        assert!(report.failed[1].0.ends_with("b_syntax.lua"));
        assert!(manager.get("widgets").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_refresh_interval_rejects_only_that_plugin() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(dir.path(), "a_widgets.lua", WIDGETS);
        write(
            dir.path(),
            "b_huge.lua",
            r#"
            function Name() return "huge" end
            function Initialize() end
            function GetResourceTypes()
                return { { Name = "Slow", Type = "slow", RefreshIntervalSeconds = 1e30 } }
            end
            function GetResourceData() return {} end
            "#,
        );
        write(
            dir.path(),
            "c_after.lua",
            r#"
            function Name() return "after" end
            function Initialize() end
            "#,
        );

        let mut manager = manager(Arc::new(FakeCluster::new()));
        let report = manager.load_dir(dir.path());

        assert_eq!(report.loaded, vec!["widgets".to_string(), "after".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("b_huge.lua"));
        assert!(report.failed[0].1.contains("invalid refresh interval"));
        assert!(!manager.api().registry().supports("slow"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cluster_scoped_override_never_sees_a_namespace() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(
            dir.path(),
            "nodes.lua",
            r#"
            function Name() return "fake-nodes" end
            function Initialize() end
            function GetResourceTypes()
                return { { Name = "Nodes", Type = "Node" } }
            end
            function GetResourceData(kind, ns)
                kubeboard.set_status("asked for '" .. ns .. "'")
                return { { Name = "node-a" } }
            end
            "#,
        );

        let cluster = Arc::new(FakeCluster::new());
        let mut manager = manager(Arc::clone(&cluster));
        manager.load_dir(dir.path());
        let api = manager.api();

        assert!(!api.registry().kind_info("Node").expect("node info").namespaced);
        let rows = api
            .registry()
            .list(cluster.as_ref(), "Node", "kube-system")
            .await
            .expect("node rows");

        assert_eq!(rows[0].name, "node-a");
        assert_eq!(rows[0].namespace, None);
        assert_eq!(api.take_status().as_deref(), Some("asked for ''"));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_plugin_leaves_nothing_registered() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(
            dir.path(),
            "a_first.lua",
            r#"
            function Name() return "first" end
            function Initialize() kubeboard.register_command("sync", "sync things", function() return "ok" end) end
            "#,
        );
        write(
            dir.path(),
            "b_second.lua",
            r#"
            function Name() return "second" end
            function Initialize()
                kubeboard.add_footer("second was here")
                kubeboard.register_command("other", "", function() end)
            end
            function Commands() return { { Name = "sync", Handler = function() end } } end
            function Hooks() return { { Event = "app-started", Handler = function() end } } end
            function GetResourceTypes() return { { Name = "Gadgets", Type = "gadget" } } end
            function GetResourceData() return {} end
            "#,
        );

        let mut manager = manager(Arc::new(FakeCluster::new()));
        let report = manager.load_dir(dir.path());
        let api = manager.api();

        assert_eq!(report.loaded, vec!["first".to_string()]);
        assert_eq!(report.failed[0].1, "command 'sync' is already registered");
        assert!(!api.commands().contains("other"));
        assert!(!api.registry().supports("gadget"));
        assert!(api.injections().is_empty());
        assert_eq!(api.events().subscriber_count(AppEvent::AppStarted), 0);
        assert_eq!(api.commands().execute("sync", &[]).expect("sync"), "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_plugin_names_are_rejected() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(dir.path(), "one.lua", WIDGETS);
        write(dir.path(), "two.lua", WIDGETS);

        let mut manager = manager(Arc::new(FakeCluster::new()));
        let report = manager.load_dir(dir.path());

        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.failed[0].1, "plugin name 'widgets' is already loaded");
        assert!(manager.get("widgets").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hooks_receive_event_payloads() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(
            dir.path(),
            "watcher.lua",
            r#"
            function Name() return "watcher" end
            function Initialize() end
            function Hooks()
                return {
                    { Event = "namespace-changed", Handler = function(ev)
                        kubeboard.set_status("now in " .. ev.namespace)
                    end },
                    { Event = "resource-selected", Handler = "OnSelect" },
                }
            end
            function OnSelect(ev) return "cannot select " .. ev.name end
            "#,
        );

        let mut manager = manager(Arc::new(FakeCluster::new()));
        manager.load_dir(dir.path());
        let api = manager.api();

        assert!(api.set_namespace("payments").is_empty());
        assert_eq!(api.take_status().as_deref(), Some("now in payments"));

        let errors = api
            .events()
            .trigger(AppEvent::ResourceSelected, &json!({ "kind": "Pod", "name": "api-0" }));
        assert_eq!(errors, vec!["watcher: cannot select api-0".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_visits_every_plugin_and_collects_errors() {
        let dir = tempfile::tempdir().expect("plugin dir");
        write(
            dir.path(),
            "a.lua",
            r#"
            function Name() return "a" end
            function Initialize() end
            function Shutdown() error("flush failed") end
            "#,
        );
        write(
            dir.path(),
            "b.lua",
            r#"
            function Name() return "b" end
            function Initialize() end
            function Shutdown() kubeboard.set_status("b stopped") end
            "#,
        );

        let mut manager = manager(Arc::new(FakeCluster::new()));
        manager.load_dir(dir.path());
        let errors = manager.shutdown();

        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("a: "));
        assert!(errors[0].contains("flush failed"));
        assert_eq!(manager.api().take_status().as_deref(), Some("b stopped"));
        assert!(manager.records().all(|(_, record)| record.instance.is_closed()));
    }
}
