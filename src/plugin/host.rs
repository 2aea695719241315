use mlua::{Function, Lua, LuaSerdeExt, Table, Value as LuaValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tracing::{debug, error, info, trace, warn};

use crate::bus::Command;
use crate::error::{PluginError, ResourceError};
use crate::injection::{Component, FOOTER, HEADER, Injection};
use crate::model::{BuiltinKind, ResourceRow};
use crate::plugin::adapter::{PluginInstance, command_handler};
use crate::plugin::api::PluginApi;

/// Lua registry table holding command and hook functions by key.
pub(crate) const HANDLERS: &str = "kubeboard.handlers";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandSpec {
    pub name: String,
    pub description: String,
    pub key: String,
}

#[derive(Debug, Default)]
struct Staged {
    commands: Vec<CommandSpec>,
    injections: Vec<Injection>,
}

/// Host-side view of one plugin: where its calls go and what it has asked for.
///
/// Until the plugin is committed, registrations are only recorded, so a plugin
/// that fails validation leaves nothing behind.
pub(crate) struct PluginScope {
    label: Mutex<String>,
    api: Weak<PluginApi>,
    committed: AtomicBool,
    staged: Mutex<Staged>,
    instance: OnceLock<Weak<PluginInstance>>,
}

impl PluginScope {
    pub(crate) fn new(label: impl Into<String>, api: Weak<PluginApi>) -> Self {
        Self {
            label: Mutex::new(label.into()),
            api,
            committed: AtomicBool::new(false),
            staged: Mutex::new(Staged::default()),
            instance: OnceLock::new(),
        }
    }

    pub(crate) fn label(&self) -> String {
        self.label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_label(&self, label: impl Into<String>) {
        *self.label.lock().unwrap_or_else(PoisonError::into_inner) = label.into();
    }

    pub(crate) fn api(&self) -> Result<Arc<PluginApi>, PluginError> {
        self.api
            .upgrade()
            .ok_or_else(|| PluginError::Script("host is shutting down".to_string()))
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self, instance: Weak<PluginInstance>) {
        let _ = self.instance.set(instance);
    }

    pub(crate) fn mark_committed(&self) {
        self.committed.store(true, Ordering::Release);
    }

    pub(crate) fn stage_command(&self, spec: CommandSpec) {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .push(spec);
    }

    pub(crate) fn take_staged(&self) -> (Vec<CommandSpec>, Vec<Injection>) {
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        (
            std::mem::take(&mut staged.commands),
            std::mem::take(&mut staged.injections),
        )
    }

    fn add_injection(&self, location: &str, content: String, priority: i64) -> Result<(), PluginError> {
        let injection = Injection {
            location: location.to_string(),
            priority,
            component: Component::text(content),
            source: self.label(),
        };

        if self.is_committed() {
            self.api()?.injections().add(injection);
        } else {
            self.staged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .injections
                .push(injection);
        }
        Ok(())
    }

    fn register_command(
        &self,
        lua: &Lua,
        name: String,
        description: Option<String>,
        handler: Option<Function>,
    ) -> Result<(), PluginError> {
        let handler = match handler {
            Some(handler) => handler,
            None => lua
                .globals()
                .get::<Option<Function>>(name.as_str())?
                .ok_or_else(|| PluginError::Protocol {
                    export: "register_command".to_string(),
                    reason: format!("no handler given and no global function '{name}'"),
                })?,
        };
        let key = format!("command:{name}");
        store_handler(lua, &key, handler)?;

        let spec = CommandSpec {
            name,
            description: description.unwrap_or_default(),
            key,
        };

        if !self.is_committed() {
            self.stage_command(spec);
            return Ok(());
        }

        let instance = self
            .instance
            .get()
            .cloned()
            .ok_or_else(|| PluginError::Closed(self.label()))?;
        self.api()?
            .commands()
            .register(Command::new(
                spec.name.clone(),
                spec.description.clone(),
                command_handler(instance, spec.key),
            ))
            .map_err(PluginError::from)
    }
}

pub(crate) fn store_handler(lua: &Lua, key: &str, handler: Function) -> Result<(), PluginError> {
    let handlers = lua.named_registry_value::<Table>(HANDLERS)?;
    handlers.set(key, handler)?;
    Ok(())
}

/// Installs the `kubeboard` global (aliased as `host`) into a fresh interpreter.
pub(crate) fn install(lua: &Lua, scope: &Arc<PluginScope>) -> mlua::Result<()> {
    lua.set_named_registry_value(HANDLERS, lua.create_table()?)?;
    let host = lua.create_table()?;

    let get_namespace = {
        let scope = Arc::clone(scope);
        lua.create_function(move |_, ()| {
            Ok(scope.api().map(|api| api.namespace()).unwrap_or_default())
        })?
    };
    host.set("get_namespace", get_namespace)?;

    let set_status = {
        let scope = Arc::clone(scope);
        lua.create_function(move |_, message: String| {
            scope.api().map_err(mlua::Error::external)?.set_status(message);
            Ok(())
        })?
    };
    host.set("set_status", set_status)?;

    for (field, location) in [("add_header", HEADER), ("add_footer", FOOTER)] {
        let scope = Arc::clone(scope);
        let add = lua.create_function(move |_, (content, priority): (String, Option<i64>)| {
            scope
                .add_injection(location, content, priority.unwrap_or(0))
                .map_err(mlua::Error::external)
        })?;
        host.set(field, add)?;
    }

    let register_command = {
        let scope = Arc::clone(scope);
        lua.create_function(
            move |lua, (name, description, handler): (String, Option<String>, Option<Function>)| {
                Ok(write_outcome(scope.register_command(
                    lua,
                    name,
                    description,
                    handler,
                )))
            },
        )?
    };
    host.set("register_command", register_command)?;

    let get_config = {
        let scope = Arc::clone(scope);
        lua.create_function(move |lua, key: String| {
            match scope.api().ok().and_then(|api| api.config(&key)) {
                Some(value) => lua.to_value(&value),
                None => Ok(LuaValue::Nil),
            }
        })?
    };
    host.set("get_config", get_config)?;

    let set_config = {
        let scope = Arc::clone(scope);
        lua.create_function(move |lua, (key, value): (String, LuaValue)| {
            let value: serde_json::Value = lua.from_value(value)?;
            scope.api().map_err(mlua::Error::external)?.set_config(key, value);
            Ok("ok")
        })?
    };
    host.set("set_config", set_config)?;

    let log = {
        let scope = Arc::clone(scope);
        lua.create_function(move |_, (level, message): (String, String)| {
            let plugin = scope.label();
            match level.to_ascii_lowercase().as_str() {
                "error" => error!(plugin = %plugin, "{message}"),
                "warn" | "warning" => warn!(plugin = %plugin, "{message}"),
                "debug" => debug!(plugin = %plugin, "{message}"),
                "trace" => trace!(plugin = %plugin, "{message}"),
                _ => info!(plugin = %plugin, "{message}"),
            }
            Ok(())
        })?
    };
    host.set("log", log)?;

    for kind in BuiltinKind::ALL {
        let getter = {
            let scope = Arc::clone(scope);
            lua.create_function(move |lua, namespace: Option<String>| {
                let result = scope.api().map_err(ResourceError::from).and_then(|api| {
                    let namespace = namespace.unwrap_or_else(|| api.namespace());
                    api.list_builtin(kind, &namespace)
                });
                rows_outcome(lua, kind.columns(), result)
            })?
        };
        host.set(format!("get_{}", kind.plural()), getter)?;

        let deleter = {
            let scope = Arc::clone(scope);
            lua.create_function(move |_, (namespace, name): (Option<String>, String)| {
                let result = scope.api().map_err(ResourceError::from).and_then(|api| {
                    let namespace = namespace.unwrap_or_else(|| api.namespace());
                    api.delete_builtin(kind, &namespace, &name)
                });
                Ok(write_outcome(result))
            })?
        };
        host.set(format!("delete_{}", kind.plural()), deleter)?;

        // Manifest text on success, `nil, error` on failure.
        let describer = {
            let scope = Arc::clone(scope);
            lua.create_function(move |_, (namespace, name): (Option<String>, String)| {
                let result = scope.api().map_err(ResourceError::from).and_then(|api| {
                    let namespace = namespace.unwrap_or_else(|| api.namespace());
                    api.describe_builtin(kind, &namespace, &name)
                });
                Ok(match result {
                    Ok(manifest) => (Some(manifest), None),
                    Err(error) => (None, Some(error.to_string())),
                })
            })?
        };
        host.set(format!("describe_{}", kind.plural()), describer)?;
    }

    let get_endpoints = {
        let scope = Arc::clone(scope);
        lua.create_function(move |lua, namespace: Option<String>| {
            let result = scope.api().map_err(ResourceError::from).and_then(|api| {
                let namespace = namespace.unwrap_or_else(|| api.namespace());
                api.list_endpoints(&namespace)
            });
            rows_outcome(lua, &crate::k8s::ENDPOINT_COLUMNS, result)
        })?
    };
    host.set("get_endpoints", get_endpoints)?;

    let globals = lua.globals();
    globals.set("kubeboard", host.clone())?;
    globals.set("host", host)?;
    Ok(())
}

fn write_outcome<E: std::fmt::Display>(result: Result<(), E>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(error) => error.to_string(),
    }
}

/// Rows become tables with `Name`, `Namespace` and one field per column title;
/// failures come back as a plain error string.
fn rows_outcome(
    lua: &Lua,
    columns: &[&str],
    result: Result<Vec<ResourceRow>, ResourceError>,
) -> mlua::Result<LuaValue> {
    let rows = match result {
        Ok(rows) => rows,
        Err(error) => return Ok(LuaValue::String(lua.create_string(error.to_string())?)),
    };

    let list = lua.create_table_with_capacity(rows.len(), 0)?;
    for row in rows {
        let entry = lua.create_table()?;
        for (title, value) in columns.iter().zip(row.columns) {
            entry.set(*title, value)?;
        }
        entry.set("Name", row.name)?;
        if let Some(namespace) = row.namespace {
            entry.set("Namespace", namespace)?;
        }
        list.push(entry)?;
    }
    Ok(LuaValue::Table(list))
}

impl From<PluginError> for mlua::Error {
    fn from(error: PluginError) -> Self {
        mlua::Error::external(error)
    }
}

#[cfg(test)]
mod tests {
    use super::{PluginScope, install};
    use crate::k8s::testing::{Call, FakeCluster};
    use crate::model::{BuiltinKind, ResourceRow};
    use crate::plugin::api::PluginApi;
    use crate::registry::ResourceRegistry;
    use mlua::Lua;
    use std::sync::Arc;
    use std::time::Duration;

    fn host(cluster: Arc<FakeCluster>) -> (Arc<PluginApi>, Arc<PluginScope>, Lua) {
        let api = Arc::new(PluginApi::new(
            Arc::new(ResourceRegistry::new(Duration::from_secs(5))),
            cluster,
            tokio::runtime::Handle::current(),
            "shop",
        ));
        let scope = Arc::new(PluginScope::new("inline", Arc::downgrade(&api)));
        let lua = Lua::new();
        install(&lua, &scope).expect("install host table");
        (api, scope, lua)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn getters_return_row_tables_keyed_by_column() {
        let cluster = Arc::new(FakeCluster::new().with_rows(
            BuiltinKind::Pod,
            vec![ResourceRow::new(
                "api-0",
                Some("shop".to_string()),
                ["shop", "api-0", "1/1", "Running", "3", "5m"]
                    .map(str::to_string)
                    .to_vec(),
            )],
        ));
        let (_api, _scope, lua) = host(Arc::clone(&cluster));

        let summary: String = lua
            .load(
                r#"
                local pods = kubeboard.get_pods()
                local pod = pods[1]
                return #pods .. ":" .. pod.Name .. ":" .. pod.Status .. ":" .. pod.Restarts
                "#,
            )
            .eval()
            .expect("lua getter");

        assert_eq!(summary, "1:api-0:Running:3");
        assert_eq!(
            cluster.calls(),
            vec![Call::List(BuiltinKind::Pod, Some("shop".to_string()))]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failures_come_back_as_strings() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail_with(crate::error::ResourceError::Denied("pods is forbidden".into()));
        let (_api, _scope, lua) = host(Arc::clone(&cluster));

        let (listed, deleted): (String, String) = lua
            .load(r#"return host.get_pods("prod"), host.delete_pods("prod", "api-0")"#)
            .eval()
            .expect("lua calls");

        assert_eq!(listed, "access denied: pods is forbidden");
        assert_eq!(deleted, "access denied: pods is forbidden");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn describe_returns_manifest_or_nil_and_error() {
        let cluster = Arc::new(FakeCluster::new());
        let (_api, _scope, lua) = host(Arc::clone(&cluster));

        let manifest: String = lua
            .load(r#"return kubeboard.describe_nodes(nil, "node-a")"#)
            .eval()
            .expect("describe node");
        assert_eq!(manifest, "kind: Node\nname: node-a\n");
        assert_eq!(
            cluster.calls(),
            vec![Call::Describe(BuiltinKind::Node, None, "node-a".to_string())]
        );

        cluster.fail_with(crate::error::ResourceError::NotFound("api-9".into()));
        let (missing, error): (Option<String>, String) = lua
            .load(r#"return kubeboard.describe_pods("shop", "api-9")"#)
            .eval()
            .expect("describe pod");
        assert_eq!(missing, None);
        assert_eq!(error, "not found: api-9");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_and_config_reach_the_bridge() {
        let (api, _scope, lua) = host(Arc::new(FakeCluster::new()));

        lua.load(
            r#"
            kubeboard.set_status("hello from lua")
            kubeboard.set_config("limits", { cpu = 2 })
            assert(kubeboard.get_config("missing") == nil)
            assert(kubeboard.get_namespace() == "shop")
            "#,
        )
        .exec()
        .expect("lua script");

        assert_eq!(api.take_status().as_deref(), Some("hello from lua"));
        assert_eq!(api.config("limits"), Some(serde_json::json!({ "cpu": 2 })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registrations_stay_staged_until_commit() {
        let (api, scope, lua) = host(Arc::new(FakeCluster::new()));

        let reply: String = lua
            .load(
                r#"
                kubeboard.add_header("cpu 12%", 5)
                kubeboard.add_footer("plugin ready")
                return kubeboard.register_command("hello", "say hi", function() return "hi" end)
                "#,
            )
            .eval()
            .expect("lua script");

        assert_eq!(reply, "ok");
        assert!(api.injections().is_empty());
        assert!(!api.commands().contains("hello"));

        let (commands, injections) = scope.take_staged();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "hello");
        assert_eq!(injections.len(), 2);
        assert_eq!(injections[0].priority, 5);
    }
}
