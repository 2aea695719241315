use crossterm::event::KeyEvent;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::bus::AppEvent;
use crate::error::{CommandError, ResourceError};
use crate::input::{Action, KeyBindings};
use crate::model::{BuiltinKind, ResourceRow, RowKey, namespace_label};
use crate::plugin::PluginApi;
use crate::screens::{DetailKind, DetailTarget, ListScreen, Screen, ScreenId};
use crate::tabs::{Route, TabManager};

const COMPLETION_LIMIT: usize = 12;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Command,
    Filter,
}

/// Work the runtime performs on behalf of `App::update`. Results come back as `Msg`s.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    None,
    Batch(Vec<AppCommand>),
    FetchRows {
        screen: ScreenId,
        kind: String,
        namespace: String,
    },
    ScheduleTick {
        screen: ScreenId,
        generation: u64,
        after: Duration,
    },
    Describe {
        screen: ScreenId,
        kind: String,
        namespace: String,
        name: String,
    },
    PodLogs {
        screen: ScreenId,
        namespace: String,
        name: String,
    },
    Delete {
        kind: String,
        targets: Vec<RowKey>,
    },
    Edit {
        kind: BuiltinKind,
        namespace: String,
        name: String,
    },
    RunCommand {
        name: String,
        args: Vec<String>,
    },
    SwitchNamespace {
        namespace: String,
    },
    SwitchContext {
        context: String,
    },
    Emit {
        event: AppEvent,
        payload: Value,
    },
}

impl AppCommand {
    /// Drops no-ops and flattens a single survivor.
    pub fn batch(commands: Vec<AppCommand>) -> Self {
        let mut commands = commands
            .into_iter()
            .filter(|command| *command != AppCommand::None)
            .collect::<Vec<_>>();
        match commands.len() {
            0 => AppCommand::None,
            1 => commands.remove(0),
            _ => AppCommand::Batch(commands),
        }
    }
}

#[derive(Debug)]
pub enum Msg {
    Key(KeyEvent),
    #[cfg(test)]
    Action(Action),
    Resize(u16, u16),
    Tick {
        screen: ScreenId,
        generation: u64,
    },
    Rows {
        screen: ScreenId,
        result: Result<Vec<ResourceRow>, ResourceError>,
    },
    Detail {
        screen: ScreenId,
        result: Result<String, ResourceError>,
    },
    Deleted {
        kind: String,
        results: Vec<(RowKey, Result<(), ResourceError>)>,
    },
    /// `Ok(None)` when the editor closed without changes.
    Edited {
        target: String,
        result: Result<Option<String>, String>,
    },
    CommandFinished {
        name: String,
        result: Result<String, CommandError>,
    },
    NamespaceSwitched {
        errors: Vec<String>,
    },
    ContextSwitched {
        result: Result<String, String>,
    },
    Status(String),
    Error {
        title: String,
        message: String,
    },
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Header {
    pub context: String,
    pub namespace: String,
    pub contexts: Vec<String>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Popup {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingConfirmation {
    prompt: String,
    command: AppCommand,
}

/// Root model. All state changes go through `update`; side effects leave as `AppCommand`s.
pub struct App {
    api: Arc<PluginApi>,
    bindings: KeyBindings,
    tabs: TabManager,
    header: Header,
    mode: InputMode,
    input: String,
    completion_index: usize,
    pending_confirmation: Option<PendingConfirmation>,
    popup: Option<Popup>,
    show_help: bool,
    status: String,
    running: bool,
}

impl App {
    pub fn new(api: Arc<PluginApi>, bindings: KeyBindings, header: Header) -> Self {
        Self {
            api,
            bindings,
            tabs: TabManager::default(),
            header,
            mode: InputMode::Normal,
            input: String::new(),
            completion_index: 0,
            pending_confirmation: None,
            popup: None,
            show_help: false,
            status: "Ready".to_string(),
            running: true,
        }
    }

    /// Opens the first tab on `kind`. Plugins must already be loaded so their kinds resolve.
    pub fn start(&mut self, kind: &str) -> AppCommand {
        let kind = self.resolve_kind(kind).unwrap_or_else(|| BuiltinKind::Pod.id().to_string());
        let open = self.open_tab(&kind);
        AppCommand::batch(vec![
            open,
            AppCommand::Emit {
                event: AppEvent::AppStarted,
                payload: Value::Null,
            },
        ])
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn api(&self) -> &Arc<PluginApi> {
        &self.api
    }

    pub fn bindings(&self) -> &KeyBindings {
        &self.bindings
    }

    pub fn tabs(&self) -> &TabManager {
        &self.tabs
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn popup(&self) -> Option<&Popup> {
        self.popup.as_ref()
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn pending_confirmation_prompt(&self) -> Option<&str> {
        self.pending_confirmation
            .as_ref()
            .map(|pending| pending.prompt.as_str())
    }

    pub fn completion_index(&self) -> usize {
        self.completion_index
    }

    pub fn completion_candidates(&self) -> Vec<String> {
        match self.mode {
            InputMode::Normal | InputMode::Filter => Vec::new(),
            InputMode::Command => self.command_completions(),
        }
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }

    pub fn update(&mut self, msg: Msg) -> AppCommand {
        let command = match msg {
            Msg::Key(key) => match self.bindings.map(self.mode, key) {
                Some(action) => self.apply_action(action),
                None => AppCommand::None,
            },
            #[cfg(test)]
            Msg::Action(action) => self.apply_action(action),
            Msg::Resize(width, height) => {
                self.tabs.resize_all(width, height);
                AppCommand::None
            }
            Msg::Tick { screen, generation } => match self.tabs.find_screen_mut(screen) {
                Some(Screen::List(list)) => list.on_tick(generation),
                _ => AppCommand::None,
            },
            Msg::Rows { screen, result } => {
                self.apply_rows(screen, result);
                AppCommand::None
            }
            Msg::Detail { screen, result } => {
                self.apply_detail(screen, result);
                AppCommand::None
            }
            Msg::Deleted { kind, results } => self.apply_deleted(&kind, results),
            Msg::Edited { target, result } => match result {
                Ok(Some(applied)) => {
                    self.set_status(format!("Applied {target}: {applied}"));
                    self.refresh_active()
                }
                Ok(None) => {
                    self.set_status(format!("No changes to {target}"));
                    AppCommand::None
                }
                Err(error) => {
                    self.set_status(format!("Edit of {target} failed: {error}"));
                    AppCommand::None
                }
            },
            Msg::CommandFinished { name, result } => {
                self.apply_command_output(&name, result);
                AppCommand::None
            }
            Msg::NamespaceSwitched { errors } => {
                if let Some(first) = errors.first() {
                    self.set_status(format!(
                        "namespace-changed handler failed ({} errors): {first}",
                        errors.len()
                    ));
                }
                AppCommand::None
            }
            Msg::ContextSwitched { result } => match result {
                Ok(context) => {
                    info!(context = %context, "switched kubeconfig context");
                    self.set_status(format!("Context: {context}"));
                    self.header.context = context;
                    self.tabs.restart_active()
                }
                Err(error) => {
                    self.popup = Some(Popup {
                        title: "Context switch failed".to_string(),
                        message: error,
                    });
                    AppCommand::None
                }
            },
            Msg::Status(status) => {
                self.set_status(status);
                AppCommand::None
            }
            Msg::Error { title, message } => {
                self.popup = Some(Popup { title, message });
                AppCommand::None
            }
        };
        self.sync_status();
        command
    }

    /// Pulls the latest plugin `set_status` message into the status line.
    pub fn sync_status(&mut self) {
        if let Some(status) = self.api.take_status() {
            self.set_status(status);
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if let Some(pending) = self.pending_confirmation.take() {
            return match action {
                Action::ConfirmYes | Action::Enter => {
                    self.set_status(format!("Confirmed: {}", pending.prompt));
                    pending.command
                }
                Action::ConfirmNo | Action::Dismiss | Action::CancelInput => {
                    self.set_status("Action cancelled");
                    AppCommand::None
                }
                _ => {
                    self.pending_confirmation = Some(pending);
                    self.set_status("Pending confirmation: press y to confirm or n to cancel");
                    AppCommand::None
                }
            };
        }

        if self.popup.is_some() {
            match action {
                Action::Dismiss | Action::Enter | Action::CancelInput => {
                    self.popup = None;
                    return AppCommand::None;
                }
                Action::Quit => {}
                _ => return AppCommand::None,
            }
        }

        if self.show_help {
            self.show_help = false;
            if matches!(action, Action::ToggleHelp | Action::Dismiss) {
                return AppCommand::None;
            }
        }

        if self.mode != InputMode::Normal {
            return self.apply_input_action(action);
        }

        if let Some(route) = self.tabs.route(action) {
            return match route {
                Route::Quit => {
                    self.running = false;
                    self.set_status("Exit requested");
                    AppCommand::None
                }
                Route::NewTab => {
                    let kind = self
                        .tabs
                        .active()
                        .map(|tab| tab.kind().to_string())
                        .unwrap_or_else(|| BuiltinKind::Pod.id().to_string());
                    self.open_tab(&kind)
                }
                Route::Handled(command) => {
                    if matches!(
                        action,
                        Action::CloseTab
                            | Action::NextTab
                            | Action::PrevTab
                            | Action::ActivateTab(_)
                    ) {
                        AppCommand::batch(vec![command, self.ui_update()])
                    } else {
                        command
                    }
                }
            };
        }

        match action {
            Action::Down => self.move_by(1),
            Action::Up => self.move_by(-1),
            Action::PageDown => self.move_by_page(1),
            Action::PageUp => self.move_by_page(-1),
            Action::Top => {
                match self.tabs.active_screen_mut() {
                    Some(Screen::List(list)) => list.inner_mut().select_first(),
                    Some(Screen::Detail(detail)) => detail.scroll_top(),
                    None => {}
                }
                AppCommand::None
            }
            Action::Bottom => {
                match self.tabs.active_screen_mut() {
                    Some(Screen::List(list)) => list.inner_mut().select_last(),
                    Some(Screen::Detail(detail)) => detail.scroll_bottom(),
                    None => {}
                }
                AppCommand::None
            }
            Action::Enter => self.enter_selected(),
            Action::Describe => self.open_detail(DetailKind::Describe),
            Action::Logs => self.open_detail(DetailKind::Logs),
            Action::Edit => self.edit_selected(),
            Action::Delete => self.prepare_delete(),
            Action::ToggleMark => {
                if let Some(list) = self.active_list_mut() {
                    match list.toggle_mark() {
                        Some(_) => {
                            let count = list.mark_count();
                            self.set_status(format!("{count} marked"));
                        }
                        None => self.set_status("Nothing to mark"),
                    }
                }
                AppCommand::None
            }
            Action::Refresh => self.refresh_active(),
            Action::StartCommand => {
                self.mode = InputMode::Command;
                self.input.clear();
                self.completion_index = 0;
                self.set_status("Command mode (kind, ns <name>, ctx <name>, run <command>, q)");
                AppCommand::None
            }
            Action::StartFilter => {
                self.mode = InputMode::Filter;
                self.input = self
                    .active_list()
                    .map(|list| list.filter().to_string())
                    .unwrap_or_default();
                self.completion_index = 0;
                self.set_status("Filter mode");
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = true;
                AppCommand::None
            }
            Action::Dismiss => {
                if let Some(list) = self.active_list_mut()
                    && !list.filter().is_empty()
                {
                    list.set_filter("");
                    self.set_status("Filter cleared");
                }
                AppCommand::None
            }
            Action::ConfirmYes | Action::ConfirmNo => {
                self.set_status("No pending confirmation");
                AppCommand::None
            }
            Action::SubmitInput
            | Action::CompleteInput
            | Action::CancelInput
            | Action::Backspace
            | Action::InputChar(_) => AppCommand::None,
            Action::Quit
            | Action::NewTab
            | Action::CloseTab
            | Action::NextTab
            | Action::PrevTab
            | Action::Back
            | Action::Forward
            | Action::ActivateTab(_) => AppCommand::None,
        }
    }

    fn apply_input_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::SubmitInput => self.submit_input(),
            Action::CompleteInput => {
                self.apply_completion();
                AppCommand::None
            }
            Action::CancelInput | Action::Dismiss => {
                self.mode = InputMode::Normal;
                self.input.clear();
                self.completion_index = 0;
                self.set_status("Input cancelled");
                AppCommand::None
            }
            Action::Backspace => {
                self.input.pop();
                self.completion_index = 0;
                AppCommand::None
            }
            Action::InputChar(c) => {
                self.input.push(c);
                self.completion_index = 0;
                AppCommand::None
            }
            _ => AppCommand::None,
        }
    }

    fn submit_input(&mut self) -> AppCommand {
        let line = self.input.trim().to_string();
        let mode = std::mem::replace(&mut self.mode, InputMode::Normal);
        self.input.clear();
        self.completion_index = 0;

        match mode {
            InputMode::Normal => AppCommand::None,
            InputMode::Filter => {
                if let Some(list) = self.active_list_mut() {
                    list.set_filter(line.clone());
                }
                if line.is_empty() {
                    self.set_status("Filter cleared");
                } else {
                    self.set_status(format!("Filter: '{line}'"));
                }
                AppCommand::None
            }
            InputMode::Command => self.execute_command_line(&line),
        }
    }

    fn execute_command_line(&mut self, line: &str) -> AppCommand {
        let normalized = normalize_mode_prefixed_input(line);
        let mut parts = normalized.split_whitespace();
        let Some(head) = parts.next() else {
            self.set_status("No command entered");
            return AppCommand::None;
        };

        match head.to_ascii_lowercase().as_str() {
            "q" | "quit" | "exit" => {
                self.running = false;
                self.set_status("Exit requested");
                AppCommand::None
            }
            "ns" | "namespace" => {
                let target = parts.next().unwrap_or_default();
                let namespace = match target {
                    "all" | "-" | "*" => "",
                    other => other,
                };
                self.switch_namespace(namespace)
            }
            "ctx" | "context" => {
                let Some(context) = parts.next() else {
                    self.set_status("Usage: ctx <context-name>");
                    return AppCommand::None;
                };
                self.set_status(format!("Switching context to '{context}'"));
                AppCommand::SwitchContext {
                    context: context.to_string(),
                }
            }
            "run" => {
                let Some(name) = parts.next() else {
                    self.set_status("Usage: run <command> [args]");
                    return AppCommand::None;
                };
                if !self.api.commands().contains(name) {
                    self.set_status(CommandError::Unknown(name.to_string()).to_string());
                    return AppCommand::None;
                }
                self.set_status(format!("Running '{name}'"));
                AppCommand::RunCommand {
                    name: name.to_string(),
                    args: parts.map(str::to_string).collect(),
                }
            }
            _ => match self.resolve_kind(head) {
                Some(kind) => self.push_list(&kind),
                None => {
                    self.set_status(format!("Unknown kind or command: {head}"));
                    AppCommand::None
                }
            },
        }
    }

    /// Registry ids match case-insensitively; built-in aliases come second.
    fn resolve_kind(&self, token: &str) -> Option<String> {
        let supported = self.api.registry().supported();
        if let Some(kind) = supported
            .iter()
            .find(|kind| kind.eq_ignore_ascii_case(token))
        {
            return Some(kind.clone());
        }
        BuiltinKind::from_token(token)
            .map(|kind| kind.id().to_string())
            .filter(|kind| supported.contains(kind))
    }

    fn open_tab(&mut self, kind: &str) -> AppCommand {
        let info = match self.api.registry().kind_info(kind) {
            Ok(info) => info,
            Err(error) => {
                self.set_status(error.to_string());
                return AppCommand::None;
            }
        };
        let screen = Screen::list(info, self.header.namespace.clone());
        let (_, command) = self.tabs.open(kind, kind, screen);
        AppCommand::batch(vec![command, self.ui_update()])
    }

    fn push_list(&mut self, kind: &str) -> AppCommand {
        match self.api.registry().kind_info(kind) {
            Ok(info) => {
                let screen = Screen::list(info, self.header.namespace.clone());
                self.set_status(format!("Viewing {kind}"));
                self.tabs.push(screen, kind)
            }
            Err(error) => {
                self.set_status(error.to_string());
                AppCommand::None
            }
        }
    }

    fn switch_namespace(&mut self, namespace: &str) -> AppCommand {
        if self.header.namespace == namespace {
            self.set_status(format!("Already in namespace {}", namespace_label(namespace)));
            return AppCommand::None;
        }
        self.header.namespace = namespace.to_string();
        self.tabs.set_namespace(namespace);
        self.set_status(format!("Namespace: {}", namespace_label(namespace)));
        AppCommand::batch(vec![
            self.tabs.restart_active(),
            AppCommand::SwitchNamespace {
                namespace: namespace.to_string(),
            },
        ])
    }

    fn ui_update(&self) -> AppCommand {
        let titles = self.tabs.tabs().iter().map(|tab| tab.title()).collect::<Vec<_>>();
        AppCommand::Emit {
            event: AppEvent::UiUpdate,
            payload: json!({ "tabs": titles, "active": self.tabs.active_index() }),
        }
    }

    fn active_list(&self) -> Option<&ListScreen> {
        self.tabs.active_screen().and_then(Screen::as_list)
    }

    fn active_list_mut(&mut self) -> Option<&mut ListScreen> {
        self.tabs.active_screen_mut().and_then(Screen::as_list_mut)
    }

    fn selected_target(&self) -> Option<DetailTarget> {
        let list = self.active_list()?;
        let row = list.selected_row()?;
        Some(DetailTarget {
            kind: list.kind().to_string(),
            namespace: row.namespace.clone().unwrap_or_default(),
            name: row.name.clone(),
        })
    }

    fn move_by(&mut self, delta: isize) -> AppCommand {
        match self.tabs.active_screen_mut() {
            Some(Screen::List(list)) => list.inner_mut().move_selection(delta),
            Some(Screen::Detail(detail)) => detail.scroll_by(delta),
            None => {}
        }
        AppCommand::None
    }

    fn move_by_page(&mut self, direction: isize) -> AppCommand {
        match self.tabs.active_screen_mut() {
            Some(Screen::List(list)) => {
                let step = list.inner().page_step();
                list.inner_mut().move_selection(step * direction);
            }
            Some(Screen::Detail(detail)) => detail.scroll_by(detail.page_step() * direction),
            None => {}
        }
        AppCommand::None
    }

    fn refresh_active(&mut self) -> AppCommand {
        match self.tabs.active_screen_mut() {
            Some(Screen::List(list)) => list.refresh_now(),
            Some(Screen::Detail(detail)) => detail.load(),
            None => AppCommand::None,
        }
    }

    fn selected_event(target: &DetailTarget) -> AppCommand {
        AppCommand::Emit {
            event: AppEvent::ResourceSelected,
            payload: json!({
                "kind": target.kind,
                "namespace": target.namespace,
                "name": target.name,
            }),
        }
    }

    /// Namespace rows switch namespace and drill into its pods; other rows open a description.
    fn enter_selected(&mut self) -> AppCommand {
        let Some(target) = self.selected_target() else {
            return AppCommand::None;
        };
        if target.kind == BuiltinKind::Namespace.id() {
            let switched = self.switch_namespace(&target.name);
            let pods = self.push_list(BuiltinKind::Pod.id());
            return AppCommand::batch(vec![switched, pods, Self::selected_event(&target)]);
        }
        self.open_detail(DetailKind::Describe)
    }

    fn open_detail(&mut self, mode: DetailKind) -> AppCommand {
        let Some(target) = self.selected_target() else {
            self.set_status("No resource selected");
            return AppCommand::None;
        };
        if mode == DetailKind::Logs && target.kind != BuiltinKind::Pod.id() {
            self.set_status("Logs are only available for pods");
            return AppCommand::None;
        }
        let event = Self::selected_event(&target);
        let screen = Screen::detail(mode, target);
        let crumb = screen.crumb();
        let push = self.tabs.push(screen, crumb);
        AppCommand::batch(vec![push, event])
    }

    fn edit_selected(&mut self) -> AppCommand {
        let Some(target) = self.selected_target() else {
            self.set_status("No resource selected");
            return AppCommand::None;
        };
        let Some(kind) = BuiltinKind::from_id(&target.kind) else {
            self.set_status(format!("{} cannot be edited", target.kind));
            return AppCommand::None;
        };
        self.set_status(format!("Editing {target}"));
        AppCommand::Edit {
            kind,
            namespace: target.namespace,
            name: target.name,
        }
    }

    fn prepare_delete(&mut self) -> AppCommand {
        let Some(list) = self.active_list() else {
            self.set_status("Nothing to delete here");
            return AppCommand::None;
        };
        let targets = list.targets();
        if targets.is_empty() {
            self.set_status("No resource selected");
            return AppCommand::None;
        }
        let kind = list.kind().to_string();
        let prompt = match targets.as_slice() {
            [single] => format!("Delete {kind} {single}?"),
            many => format!("Delete {} {kind} resources?", many.len()),
        };
        self.set_status(format!("{prompt} (y/n)"));
        self.pending_confirmation = Some(PendingConfirmation {
            prompt,
            command: AppCommand::Delete { kind, targets },
        });
        AppCommand::None
    }

    fn apply_rows(&mut self, screen: ScreenId, result: Result<Vec<ResourceRow>, ResourceError>) {
        let Some(list) = self
            .tabs
            .find_screen_mut(screen)
            .and_then(Screen::as_list_mut)
        else {
            debug!(?screen, "discarded rows for a screen that is gone");
            return;
        };
        match result {
            Ok(rows) => list.apply_rows(rows),
            Err(error) => {
                list.apply_error(&error);
                let kind = list.kind().to_string();
                self.report_error(&format!("Listing {kind} failed"), &error);
            }
        }
    }

    fn apply_detail(&mut self, screen: ScreenId, result: Result<String, ResourceError>) {
        let Some(Screen::Detail(detail)) = self.tabs.find_screen_mut(screen) else {
            debug!(?screen, "discarded detail for a screen that is gone");
            return;
        };
        let failure = result.as_ref().err().cloned();
        let title = detail.title();
        detail.apply(result);
        if let Some(error) = failure {
            self.report_error(&format!("Loading {title} failed"), &error);
        }
    }

    fn apply_deleted(
        &mut self,
        kind: &str,
        results: Vec<(RowKey, Result<(), ResourceError>)>,
    ) -> AppCommand {
        let mut deleted = 0usize;
        let mut failure = None;
        for (target, result) in results {
            match result {
                Ok(()) => {
                    deleted += 1;
                    if let Some(list) = self.active_list_mut()
                        && list.kind() == kind
                    {
                        list.unmark(&target);
                    }
                }
                Err(error) => {
                    if failure.is_none() {
                        failure = Some((target, error));
                    }
                }
            }
        }

        match failure {
            Some((target, error)) if error.is_fatal_for_view() => {
                self.report_error(&format!("Deleting {kind} {target} failed"), &error)
            }
            Some((target, error)) => self.set_status(format!(
                "Deleted {deleted}; {kind} {target} failed: {error}"
            )),
            None => self.set_status(format!("Deleted {deleted} {kind}")),
        }
        self.refresh_active()
    }

    fn apply_command_output(&mut self, name: &str, result: Result<String, CommandError>) {
        match result {
            Ok(output) if output.trim().is_empty() => {
                self.set_status(format!("Command '{name}' finished"));
            }
            Ok(output) if output.lines().count() > 1 => {
                self.popup = Some(Popup {
                    title: name.to_string(),
                    message: output,
                });
            }
            Ok(output) => self.set_status(output),
            Err(error) => self.set_status(error.to_string()),
        }
    }

    /// Transport failures take over the screen; everything else is a status line.
    fn report_error(&mut self, title: &str, error: &ResourceError) {
        if error.is_fatal_for_view() {
            self.popup = Some(Popup {
                title: title.to_string(),
                message: error.to_string(),
            });
        } else {
            self.set_status(format!("{title}: {error}"));
        }
    }

    fn apply_completion(&mut self) {
        let completions = self.completion_candidates();
        if completions.is_empty() {
            return;
        }

        let index = self
            .completion_index
            .min(completions.len().saturating_sub(1));
        if let Some(choice) = completions.get(index) {
            self.input = choice.clone();
            self.completion_index = (index + 1) % completions.len();
        }
    }

    fn command_completions(&self) -> Vec<String> {
        let mut candidates = vec!["q".to_string(), "ns ".to_string(), "ns all".to_string()];
        candidates.extend(
            self.api
                .registry()
                .supported()
                .into_iter()
                .map(|kind| kind.to_ascii_lowercase()),
        );
        candidates.extend(
            BuiltinKind::ALL
                .into_iter()
                .map(|kind| kind.short_token().to_string()),
        );
        candidates.extend(
            self.header
                .contexts
                .iter()
                .map(|context| format!("ctx {context}")),
        );
        candidates.extend(
            self.api
                .commands()
                .list()
                .into_iter()
                .map(|(name, _)| format!("run {name}")),
        );
        filter_completions(candidates, &self.input, COMPLETION_LIMIT)
    }
}

fn filter_completions(mut candidates: Vec<String>, input: &str, limit: usize) -> Vec<String> {
    candidates.sort();
    candidates.dedup();

    let query = normalize_mode_prefixed_input(input).to_ascii_lowercase();
    if !query.is_empty() {
        candidates = candidates
            .into_iter()
            .filter(|candidate| completion_matches(candidate, &query))
            .collect::<Vec<_>>();
    }

    candidates.truncate(limit);
    candidates
}

fn normalize_mode_prefixed_input(input: &str) -> String {
    let mut query = input.trim();
    while let Some(stripped) = query.strip_prefix(':') {
        query = stripped.trim_start();
    }
    query.to_string()
}

fn completion_matches(candidate: &str, query: &str) -> bool {
    let lower = candidate.to_ascii_lowercase();
    if lower.starts_with(query) {
        return true;
    }

    let words = lower
        .split(|ch: char| ch.is_ascii_whitespace() || matches!(ch, '/' | ':' | '-' | '.'))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>();
    query
        .split_whitespace()
        .all(|token| words.iter().any(|word| word.starts_with(token)))
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    let status = status
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or(status);
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}
