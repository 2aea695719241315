use futures::future::BoxFuture;
use mlua::{Function, Lua, LuaSerdeExt, MultiValue, Table, Value as LuaValue};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::debug;

use crate::bus::{AppEvent, CommandHandler, EventHandler};
use crate::error::{PluginError, ResourceError};
use crate::injection::{Component, Injection};
use crate::k8s::ClusterClient;
use crate::model::{
    BuiltinKind, ColumnDef, DEFAULT_REFRESH, DisplayStyle, KindInfo, PLACEHOLDER, ResourceRow,
};
use crate::plugin::api::PluginApi;
use crate::plugin::host::{self, CommandSpec, HANDLERS, PluginScope, store_handler};

const DEFAULT_KIND_ICON: &str = "󰏗";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginMeta {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub resources: bool,
    pub ui: bool,
    pub commands: bool,
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut labels = Vec::new();
        if self.resources {
            labels.push("resources");
        }
        if self.ui {
            labels.push("ui");
        }
        if self.commands {
            labels.push("commands");
        }
        if labels.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&labels.join(","))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HookSpec {
    pub event: AppEvent,
    pub key: String,
}

/// Everything a plugin asked to register, held back until the manager commits it.
#[derive(Debug, Default)]
pub(crate) struct Contributions {
    pub kinds: Vec<KindInfo>,
    pub injections: Vec<Injection>,
    pub commands: Vec<CommandSpec>,
    pub hooks: Vec<HookSpec>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KindSpec {
    name: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default = "default_namespaced")]
    namespaced: bool,
    #[serde(default)]
    refresh_interval_seconds: Option<f64>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnSpec>,
}

fn default_namespaced() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ColumnSpec {
    title: String,
    #[serde(default)]
    width: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExtensionSpec {
    name: String,
    #[serde(default)]
    injections: Vec<InjectionSpec>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InjectionSpec {
    location: String,
    #[serde(default)]
    priority: i64,
    #[serde(flatten)]
    component: Component,
    #[serde(default)]
    content: Option<String>,
}

/// One loaded script: its interpreter plus what it declared about itself.
pub struct PluginInstance {
    path: PathBuf,
    meta: PluginMeta,
    capabilities: Capabilities,
    state: Mutex<Option<Lua>>,
    scope: Arc<PluginScope>,
}

impl PluginInstance {
    /// Evaluates the script, validates its required exports and runs `Initialize`.
    /// Nothing is registered with the host yet.
    pub(crate) fn open(
        path: &Path,
        api: &Arc<PluginApi>,
    ) -> Result<(Self, Contributions), PluginError> {
        let source = std::fs::read_to_string(path).map_err(|error| PluginError::Read {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let scope = Arc::new(PluginScope::new(label, Arc::downgrade(api)));

        let lua = Lua::new();
        host::install(&lua, &scope)?;
        lua.load(source.as_str())
            .set_name(format!("@{}", path.display()))
            .exec()?;

        let globals = lua.globals();
        let name_fn = globals
            .get::<Option<Function>>("Name")?
            .ok_or(PluginError::MissingExport("Name"))?;
        let init_fn = globals
            .get::<Option<Function>>("Initialize")?
            .ok_or(PluginError::MissingExport("Initialize"))?;

        let name = name_fn.call::<String>(())?.trim().to_string();
        if name.is_empty() {
            return Err(PluginError::Protocol {
                export: "Name".to_string(),
                reason: "plugin name is empty".to_string(),
            });
        }
        scope.set_label(&name);

        if let Err(reason) = outcome(init_fn.call::<MultiValue>(())?) {
            return Err(PluginError::Initialize {
                plugin: name,
                reason,
            });
        }

        let meta = PluginMeta {
            version: optional_text(&lua, "Version")?,
            description: optional_text(&lua, "Description")?,
            name,
        };
        let has = |export: &str| {
            globals
                .get::<Option<Function>>(export)
                .map(|function| function.is_some())
        };
        let capabilities = Capabilities {
            resources: has("GetResourceTypes")? && has("GetResourceData")?,
            ui: has("GetUIExtensions")?,
            commands: has("Commands")? || has("Hooks")?,
        };

        let (staged_commands, staged_injections) = scope.take_staged();
        let mut contributions = Contributions {
            commands: staged_commands,
            injections: staged_injections,
            ..Contributions::default()
        };
        if capabilities.resources {
            contributions.kinds = read_kinds(&lua)?;
        }
        if capabilities.ui {
            contributions.injections.extend(read_extensions(&lua, &meta.name)?);
        }
        if has("Commands")? {
            contributions.commands.extend(read_commands(&lua)?);
        }
        if has("Hooks")? {
            contributions.hooks = read_hooks(&lua)?;
        }
        drop(globals);

        debug!(
            plugin = %meta.name,
            capabilities = %capabilities,
            kinds = contributions.kinds.len(),
            commands = contributions.commands.len(),
            "plugin initialized"
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                meta,
                capabilities,
                state: Mutex::new(Some(lua)),
                scope,
            },
            contributions,
        ))
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub(crate) fn scope(&self) -> &Arc<PluginScope> {
        &self.scope
    }

    /// Rows for a plugin kind, shaped to the kind's declared columns.
    pub fn data(&self, info: &KindInfo, namespace: &str) -> Result<Vec<ResourceRow>, PluginError> {
        self.with_lua(|lua| {
            let function = required_export(lua, "GetResourceData")?;
            let value = outcome(function.call::<MultiValue>((info.id.as_str(), namespace))?)
                .map_err(PluginError::Script)?;
            parse_rows(value, info).map_err(|reason| PluginError::Protocol {
                export: "GetResourceData".to_string(),
                reason,
            })
        })
    }

    pub fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), PluginError> {
        self.with_lua(|lua| {
            let function = required_export(lua, "DeleteResource")?;
            outcome(function.call::<MultiValue>((kind, namespace, name))?)
                .map(|_| ())
                .map_err(PluginError::Script)
        })
    }

    /// `GetResourceInfo` result rendered as YAML text.
    pub fn info(&self, kind: &str, namespace: &str, name: &str) -> Result<String, PluginError> {
        self.with_lua(|lua| {
            let function = required_export(lua, "GetResourceInfo")?;
            let value = outcome(function.call::<MultiValue>((kind, namespace, name))?)
                .map_err(PluginError::Script)?;
            let protocol = |reason: String| PluginError::Protocol {
                export: "GetResourceInfo".to_string(),
                reason,
            };
            match value {
                LuaValue::Table(_) => {
                    let json: serde_json::Value =
                        lua.from_value(value).map_err(|error| protocol(error.to_string()))?;
                    serde_yaml::to_string(&json).map_err(|error| protocol(error.to_string()))
                }
                LuaValue::Nil => Err(protocol(format!("no information for {name}"))),
                other => Err(protocol(format!("expected a table, got {}", other.type_name()))),
            }
        })
    }

    /// Runs a command function. A returned string is the command's output; a raised
    /// error or a `nil, message` pair is a failure.
    pub(crate) fn call_command(&self, key: &str, args: &[String]) -> Result<String, PluginError> {
        self.with_lua(|lua| {
            let function = stored_handler(lua, key)?;
            let args = args
                .iter()
                .map(|arg| lua.create_string(arg).map(LuaValue::String))
                .collect::<mlua::Result<MultiValue>>()?;
            let mut values = function.call::<MultiValue>(args)?.into_iter();
            match (values.next(), values.next()) {
                (None | Some(LuaValue::Nil), Some(LuaValue::String(message))) => {
                    Err(PluginError::Script(lua_text(&message)))
                }
                (None | Some(LuaValue::Nil), _) => Ok(String::new()),
                (Some(value), _) => Ok(cell_text(&value)),
            }
        })
    }

    pub(crate) fn call_hook(&self, key: &str, payload: &serde_json::Value) -> Result<(), PluginError> {
        self.with_lua(|lua| {
            let function = stored_handler(lua, key)?;
            let payload = if payload.is_null() {
                LuaValue::Nil
            } else {
                lua.to_value(payload)?
            };
            outcome(function.call::<MultiValue>(payload)?)
                .map(|_| ())
                .map_err(PluginError::Script)
        })
    }

    /// Calls `Shutdown` when exported, then closes the interpreter whatever it returned.
    pub fn shutdown(&self) -> Result<(), PluginError> {
        let Some(lua) = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        let result = match lua.globals().get::<Option<Function>>("Shutdown") {
            Ok(Some(function)) => function
                .call::<MultiValue>(())
                .map_err(PluginError::from)
                .and_then(|values| outcome(values).map(|_| ()).map_err(PluginError::Script)),
            Ok(None) => Ok(()),
            Err(error) => Err(error.into()),
        };
        drop(lua);
        debug!(plugin = %self.meta.name, "plugin interpreter closed");
        result
    }

    fn with_lua<R>(
        &self,
        call: impl FnOnce(&Lua) -> Result<R, PluginError>,
    ) -> Result<R, PluginError> {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let lua = guard
            .as_ref()
            .ok_or_else(|| PluginError::Closed(self.meta.name.clone()))?;
        call(lua)
    }
}

pub(crate) fn command_handler(instance: Weak<PluginInstance>, key: String) -> CommandHandler {
    Arc::new(move |args: &[String]| {
        let plugin = instance
            .upgrade()
            .ok_or_else(|| "plugin is no longer loaded".to_string())?;
        plugin
            .call_command(&key, args)
            .map_err(|error| error.to_string())
    })
}

pub(crate) fn hook_handler(instance: Weak<PluginInstance>, key: String) -> EventHandler {
    Arc::new(move |payload: &serde_json::Value| {
        let plugin = instance
            .upgrade()
            .ok_or_else(|| "plugin is no longer loaded".to_string())?;
        plugin
            .call_hook(&key, payload)
            .map_err(|error| format!("{}: {error}", plugin.name()))
    })
}

/// Registry handler that forwards a kind to the plugin that declared it.
pub struct PluginResourceHandler {
    info: KindInfo,
    plugin: Arc<PluginInstance>,
}

impl PluginResourceHandler {
    pub fn new(info: KindInfo, plugin: Arc<PluginInstance>) -> Self {
        Self { info, plugin }
    }

    fn scoped_namespace(&self, namespace: &str) -> String {
        if self.info.namespaced {
            namespace.trim().to_string()
        } else {
            String::new()
        }
    }
}

async fn run_plugin<T, F>(call: F) -> Result<T, ResourceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PluginError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|error| ResourceError::Plugin(error.to_string()))?
        .map_err(ResourceError::from)
}

impl crate::registry::ResourceHandler for PluginResourceHandler {
    fn info(&self) -> &KindInfo {
        &self.info
    }

    fn list<'a>(
        &'a self,
        _client: &'a dyn ClusterClient,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ResourceRow>, ResourceError>> {
        let plugin = Arc::clone(&self.plugin);
        let info = self.info.clone();
        let namespace = self.scoped_namespace(namespace);
        Box::pin(run_plugin(move || plugin.data(&info, &namespace)))
    }

    fn delete<'a>(
        &'a self,
        _client: &'a dyn ClusterClient,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), ResourceError>> {
        let plugin = Arc::clone(&self.plugin);
        let kind = self.info.id.clone();
        let namespace = self.scoped_namespace(namespace);
        let name = name.to_string();
        Box::pin(run_plugin(move || plugin.delete(&kind, &namespace, &name)))
    }

    fn describe<'a>(
        &'a self,
        _client: &'a dyn ClusterClient,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<String, ResourceError>> {
        let plugin = Arc::clone(&self.plugin);
        let kind = self.info.id.clone();
        let namespace = self.scoped_namespace(namespace);
        let name = name.to_string();
        Box::pin(run_plugin(move || plugin.info(&kind, &namespace, &name)))
    }
}

/// Applies the plugin return convention: a string, or `nil` followed by a string,
/// is an error message.
fn outcome(values: MultiValue) -> Result<LuaValue, String> {
    let mut values = values.into_iter();
    match values.next() {
        Some(LuaValue::String(message)) => Err(lua_text(&message)),
        Some(LuaValue::Nil) | None => match values.next() {
            Some(LuaValue::String(message)) => Err(lua_text(&message)),
            _ => Ok(LuaValue::Nil),
        },
        Some(other) => Ok(other),
    }
}

fn lua_text(value: &mlua::String) -> String {
    value.to_string_lossy().to_string()
}

fn optional_text(lua: &Lua, export: &str) -> Result<Option<String>, PluginError> {
    let Some(function) = lua.globals().get::<Option<Function>>(export)? else {
        return Ok(None);
    };
    Ok(function
        .call::<Option<String>>(())?
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty()))
}

fn required_export(lua: &Lua, export: &'static str) -> Result<Function, PluginError> {
    lua.globals()
        .get::<Option<Function>>(export)?
        .ok_or(PluginError::MissingExport(export))
}

fn stored_handler(lua: &Lua, key: &str) -> Result<Function, PluginError> {
    lua.named_registry_value::<Table>(HANDLERS)?
        .get::<Option<Function>>(key)?
        .ok_or_else(|| PluginError::Script(format!("no handler stored for {key}")))
}

/// Calls a listing export and returns its entries.
fn listing(lua: &Lua, export: &'static str) -> Result<Vec<LuaValue>, PluginError> {
    let protocol = |reason: String| PluginError::Protocol {
        export: export.to_string(),
        reason,
    };
    let function = required_export(lua, export)?;
    let value = outcome(function.call::<MultiValue>(())?).map_err(protocol)?;
    match value {
        LuaValue::Nil => Ok(Vec::new()),
        LuaValue::Table(table) => table
            .sequence_values::<LuaValue>()
            .collect::<mlua::Result<Vec<_>>>()
            .map_err(|error| protocol(error.to_string())),
        other => Err(protocol(format!(
            "expected a list, got {}",
            other.type_name()
        ))),
    }
}

fn read_kinds(lua: &Lua) -> Result<Vec<KindInfo>, PluginError> {
    let protocol = |reason: String| PluginError::Protocol {
        export: "GetResourceTypes".to_string(),
        reason,
    };

    listing(lua, "GetResourceTypes")?
        .into_iter()
        .map(|entry| {
            let spec: KindSpec = lua
                .from_value(entry)
                .map_err(|error| protocol(error.to_string()))?;
            kind_info(spec).map_err(protocol)
        })
        .collect()
}

fn kind_info(spec: KindSpec) -> Result<KindInfo, String> {
    let id = spec.kind.trim().to_string();
    if id.is_empty() {
        return Err(format!("kind '{}' has an empty Type", spec.name));
    }

    let refresh = match spec.refresh_interval_seconds {
        None => DEFAULT_REFRESH,
        Some(seconds) => Duration::try_from_secs_f64(seconds)
            .map_err(|_| format!("kind '{id}' has invalid refresh interval {seconds}"))?,
    };
    // Overrides of built-in kinds keep the built-in scope.
    let namespaced = BuiltinKind::from_id(&id).map_or(spec.namespaced, BuiltinKind::namespaced);

    let mut columns = spec
        .columns
        .into_iter()
        .map(|column| ColumnDef::new(column.title, column.width))
        .collect::<Vec<_>>();
    if columns.is_empty() {
        if namespaced {
            columns.push(ColumnDef::new("Namespace", 0));
        }
        columns.push(ColumnDef::new("Name", 0));
    }

    Ok(KindInfo {
        title: if spec.name.trim().is_empty() {
            id.clone()
        } else {
            spec.name
        },
        id,
        icon: spec
            .icon
            .filter(|icon| !icon.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_KIND_ICON.to_string()),
        namespaced,
        style: spec
            .style
            .as_deref()
            .map(DisplayStyle::from_hint)
            .unwrap_or_default(),
        columns,
        refresh,
    })
}

fn read_extensions(lua: &Lua, plugin: &str) -> Result<Vec<Injection>, PluginError> {
    let protocol = |reason: String| PluginError::Protocol {
        export: "GetUIExtensions".to_string(),
        reason,
    };

    let mut injections = Vec::new();
    for entry in listing(lua, "GetUIExtensions")? {
        let spec: ExtensionSpec = lua
            .from_value(entry)
            .map_err(|error| protocol(error.to_string()))?;
        for point in spec.injections {
            let location = point.location.trim().to_ascii_lowercase();
            if location.is_empty() {
                return Err(protocol(format!(
                    "extension '{}' has an injection without a Location",
                    spec.name
                )));
            }
            let mut component = point.component;
            if let Some(content) = point.content {
                component
                    .config
                    .entry("content".to_string())
                    .or_insert(serde_json::Value::String(content));
            }
            injections.push(Injection {
                location,
                priority: point.priority,
                component,
                source: format!("{plugin}/{}", spec.name),
            });
        }
    }
    Ok(injections)
}

fn read_commands(lua: &Lua) -> Result<Vec<CommandSpec>, PluginError> {
    let protocol = |reason: String| PluginError::Protocol {
        export: "Commands".to_string(),
        reason,
    };

    let mut commands = Vec::new();
    for entry in listing(lua, "Commands")? {
        let LuaValue::Table(entry) = entry else {
            return Err(protocol(format!(
                "expected a command table, got {}",
                entry.type_name()
            )));
        };
        let name = entry
            .get::<Option<String>>("Name")?
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| protocol("command without a Name".to_string()))?;
        let description = entry.get::<Option<String>>("Description")?.unwrap_or_default();
        let handler = resolve_handler(lua, entry.get::<LuaValue>("Handler")?, &name)
            .map_err(protocol)?;
        let key = format!("command:{name}");
        store_handler(lua, &key, handler)?;
        commands.push(CommandSpec {
            name,
            description,
            key,
        });
    }
    Ok(commands)
}

fn read_hooks(lua: &Lua) -> Result<Vec<HookSpec>, PluginError> {
    let protocol = |reason: String| PluginError::Protocol {
        export: "Hooks".to_string(),
        reason,
    };

    let mut hooks = Vec::new();
    for (index, entry) in listing(lua, "Hooks")?.into_iter().enumerate() {
        let LuaValue::Table(entry) = entry else {
            return Err(protocol(format!(
                "expected a hook table, got {}",
                entry.type_name()
            )));
        };
        let tag = entry.get::<Option<String>>("Event")?.unwrap_or_default();
        let event = AppEvent::from_tag(&tag)
            .ok_or_else(|| protocol(format!("unknown event '{tag}'")))?;
        let handler = resolve_handler(lua, entry.get::<LuaValue>("Handler")?, &tag)
            .map_err(protocol)?;
        let key = format!("hook:{index}:{event}");
        store_handler(lua, &key, handler)?;
        hooks.push(HookSpec { event, key });
    }
    Ok(hooks)
}

/// A handler is a function, the name of a global function, or absent (global
/// function named after the entry).
fn resolve_handler(lua: &Lua, handler: LuaValue, fallback: &str) -> Result<Function, String> {
    let global = |name: &str| {
        lua.globals()
            .get::<Option<Function>>(name)
            .map_err(|error| error.to_string())?
            .ok_or_else(|| format!("no global function '{name}'"))
    };
    match handler {
        LuaValue::Function(function) => Ok(function),
        LuaValue::String(name) => global(&lua_text(&name)),
        LuaValue::Nil => global(fallback),
        other => Err(format!("invalid handler of type {}", other.type_name())),
    }
}

fn parse_rows(value: LuaValue, info: &KindInfo) -> Result<Vec<ResourceRow>, String> {
    let table = match value {
        LuaValue::Nil => return Ok(Vec::new()),
        LuaValue::Table(table) => table,
        other => return Err(format!("expected a list of rows, got {}", other.type_name())),
    };

    let mut rows = Vec::new();
    for (index, entry) in table.sequence_values::<LuaValue>().enumerate() {
        let entry = entry.map_err(|error| error.to_string())?;
        let LuaValue::Table(entry) = entry else {
            return Err(format!("row {} is not a table", index + 1));
        };
        rows.push(parse_row(&entry, info).map_err(|reason| format!("row {}: {reason}", index + 1))?);
    }
    Ok(rows)
}

/// Rows are either keyed by column title or positional lists in schema order.
fn parse_row(entry: &Table, info: &KindInfo) -> Result<ResourceRow, String> {
    let titles = info.headers();

    if entry.raw_len() > 0 {
        let columns = entry
            .sequence_values::<LuaValue>()
            .map(|value| value.map(|value| cell_text(&value)))
            .collect::<mlua::Result<Vec<_>>>()
            .map_err(|error| error.to_string())?;
        let position = |wanted: &str| {
            titles
                .iter()
                .position(|title| title.eq_ignore_ascii_case(wanted))
        };
        let name = position("Name")
            .and_then(|index| columns.get(index))
            .or_else(|| columns.first())
            .cloned()
            .unwrap_or_default();
        let namespace = position("Namespace")
            .and_then(|index| columns.get(index))
            .filter(|value| !value.is_empty() && value.as_str() != PLACEHOLDER)
            .cloned();
        return Ok(ResourceRow::new(name, namespace, columns));
    }

    let mut fields = HashMap::new();
    for pair in entry.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair.map_err(|error| error.to_string())?;
        if let LuaValue::String(key) = key {
            fields.insert(field_key(&lua_text(&key)), cell_text(&value));
        }
    }

    let name = fields
        .get("name")
        .filter(|name| !name.is_empty())
        .cloned()
        .ok_or_else(|| "row has no Name".to_string())?;
    let namespace = fields
        .get("namespace")
        .filter(|value| !value.is_empty() && value.as_str() != PLACEHOLDER)
        .cloned();
    let columns = titles
        .iter()
        .map(|title| {
            fields
                .get(&field_key(title))
                .cloned()
                .unwrap_or_else(|| PLACEHOLDER.to_string())
        })
        .collect();

    Ok(ResourceRow::new(name, namespace, columns))
}

fn field_key(title: &str) -> String {
    title
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

fn cell_text(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => PLACEHOLDER.to_string(),
        LuaValue::Boolean(flag) => flag.to_string(),
        LuaValue::Integer(number) => number.to_string(),
        LuaValue::Number(number) if number.is_finite() && number.fract() == 0.0 => {
            format!("{number:.0}")
        }
        LuaValue::Number(number) => number.to_string(),
        LuaValue::String(text) => lua_text(text),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{PluginInstance, outcome, parse_rows};
    use crate::k8s::testing::FakeCluster;
    use crate::model::{ColumnDef, DisplayStyle, KindInfo};
    use crate::plugin::api::PluginApi;
    use crate::registry::ResourceRegistry;
    use mlua::{Lua, MultiValue, Value as LuaValue};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    fn api() -> Arc<PluginApi> {
        Arc::new(PluginApi::new(
            Arc::new(ResourceRegistry::new(Duration::from_secs(5))),
            Arc::new(FakeCluster::new()),
            tokio::runtime::Handle::current(),
            "default",
        ))
    }

    fn script(source: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".lua")
            .tempfile()
            .expect("temp plugin");
        file.write_all(source.as_bytes()).expect("write plugin");
        file
    }

    fn widget_info(columns: &[&str]) -> KindInfo {
        KindInfo {
            id: "widget".to_string(),
            title: "Widgets".to_string(),
            icon: "W".to_string(),
            namespaced: true,
            style: DisplayStyle::Table,
            columns: columns.iter().map(|title| ColumnDef::new(*title, 0)).collect(),
            refresh: Duration::from_secs(5),
        }
    }

    #[test]
    fn outcome_treats_strings_as_errors() {
        let lua = Lua::new();
        let text = LuaValue::String(lua.create_string("boom").expect("string"));

        assert_eq!(outcome(MultiValue::new()), Ok(LuaValue::Nil));
        assert_eq!(
            outcome(MultiValue::from_vec(vec![text.clone()])),
            Err("boom".to_string())
        );
        assert_eq!(
            outcome(MultiValue::from_vec(vec![LuaValue::Nil, text])),
            Err("boom".to_string())
        );
        assert!(matches!(
            outcome(MultiValue::from_vec(vec![LuaValue::Integer(3)])),
            Ok(LuaValue::Integer(3))
        ));
    }

    #[test]
    fn rows_map_named_fields_and_positional_lists() {
        let lua = Lua::new();
        let value: LuaValue = lua
            .load(
                r#"return {
                    { Name = "w1", Namespace = "shop", Status = "Ready", ["Up-to-date"] = 3 },
                    { "shop", "w2", "Pending", 1.0 },
                }"#,
            )
            .eval()
            .expect("rows");

        let rows = parse_rows(value, &widget_info(&["Namespace", "Name", "Status", "Up To Date"]))
            .expect("parsed rows");

        assert_eq!(rows[0].name, "w1");
        assert_eq!(rows[0].columns, ["shop", "w1", "Ready", "3"]);
        assert_eq!(rows[1].name, "w2");
        assert_eq!(rows[1].namespace.as_deref(), Some("shop"));
        assert_eq!(rows[1].columns, ["shop", "w2", "Pending", "1"]);
    }

    #[test]
    fn rows_without_name_are_protocol_errors() {
        let lua = Lua::new();
        let value: LuaValue = lua
            .load(r#"return { { Status = "Ready" } }"#)
            .eval()
            .expect("rows");

        assert_eq!(
            parse_rows(value, &widget_info(&["Name"])),
            Err("row 1: row has no Name".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_reads_metadata_capabilities_and_contributions() {
        let file = script(
            r##"
            function Name() return "inventory" end
            function Version() return "1.2.0" end
            function Initialize()
                kubeboard.add_header("inventory loaded")
            end
            function GetResourceTypes()
                return {
                    { Name = "Widgets", Type = "widget", Namespaced = true,
                      RefreshIntervalSeconds = 0, Style = "chart",
                      Columns = { { Title = "Name", Width = 20 }, { Title = "Count" } } },
                }
            end
            function GetResourceData(kind, ns)
                return { { Name = "a", Count = 1 } }
            end
            function GetUIExtensions()
                return { { Name = "badge", Injections = {
                    { Location = "Footer", Priority = 2, Type = "badge", Config = { content = "3 widgets", color = "green" } },
                } } }
            end
            function Commands()
                return { { Name = "count", Description = "count widgets" } }
            end
            function count(...) return "counted " .. select("#", ...) end
            function Hooks()
                return { { Event = "namespace-changed", Handler = function(ev) end } }
            end
            "##,
        );

        let (plugin, contributions) = PluginInstance::open(file.path(), &api()).expect("plugin");

        assert_eq!(plugin.name(), "inventory");
        assert_eq!(plugin.meta().version.as_deref(), Some("1.2.0"));
        assert!(plugin.capabilities().resources);
        assert!(plugin.capabilities().ui);
        assert!(plugin.capabilities().commands);

        let kind = &contributions.kinds[0];
        assert_eq!(kind.id, "widget");
        assert_eq!(kind.refresh, Duration::ZERO);
        assert_eq!(kind.style, DisplayStyle::Chart);
        assert_eq!(kind.columns[0].width, 20);

        assert_eq!(contributions.injections.len(), 2);
        assert_eq!(contributions.injections[0].component.content(), "inventory loaded");
        assert_eq!(contributions.injections[1].location, "footer");
        assert_eq!(contributions.injections[1].component.color(), Some("green"));
        assert_eq!(contributions.injections[1].component.kind, "badge");
        assert_eq!(contributions.injections[0].component.kind, "text");
        assert_eq!(contributions.commands[0].name, "count");
        assert_eq!(contributions.hooks.len(), 1);

        let rows = plugin.data(kind, "shop").expect("rows");
        assert_eq!(rows[0].columns, ["a", "1"]);
        assert_eq!(
            plugin
                .call_command(&contributions.commands[0].key, &["x".to_string(), "y".to_string()])
                .expect("command"),
            "counted 2"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initialize_string_return_is_a_failure() {
        let file = script(
            r#"
            function Name() return "broken" end
            function Initialize() return "missing credentials" end
            "#,
        );

        let error = PluginInstance::open(file.path(), &api()).err().expect("load error");
        assert_eq!(
            error.to_string(),
            "plugin 'broken' failed to initialize: missing credentials"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_closes_even_when_plugin_complains() {
        let file = script(
            r#"
            function Name() return "grumpy" end
            function Initialize() end
            function Shutdown() return "not ready to go" end
            "#,
        );
        let (plugin, _) = PluginInstance::open(file.path(), &api()).expect("plugin");

        assert!(plugin.shutdown().is_err());
        assert!(plugin.is_closed());
        assert!(plugin.shutdown().is_ok());
        assert!(matches!(
            plugin.delete("widget", "", "a"),
            Err(crate::error::PluginError::Closed(_))
        ));
    }
}
