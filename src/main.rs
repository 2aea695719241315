mod app;
mod bus;
mod cli;
mod config;
mod editor;
mod error;
mod injection;
mod input;
mod k8s;
mod logging;
mod model;
mod plugin;
mod refresh;
mod registry;
mod screens;
mod tabs;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand, Header, Msg};
use clap::Parser;
use cli::CliArgs;
use config::Settings;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use futures::StreamExt;
use k8s::{ClusterClient, KubeGateway};
use model::BuiltinKind;
use plugin::{PluginApi, PluginManager};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use registry::ResourceRegistry;
use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const INITIAL_KIND: &str = "Pod";

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let settings = Settings::load(&args).context("failed to load settings")?;
    let _log_guard = logging::init_tracing(
        &settings.log_filter,
        &settings.log_dir,
        settings.log_max_files,
    )?;
    info!(config = ?settings.source, plugins = %settings.plugins_dir.display(), "starting kubeboard");

    let gateway = KubeGateway::connect(args.kubeconfig.as_deref(), args.context.clone()).await?;
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| gateway.default_namespace().to_string());
    let header = Header {
        context: gateway.context().to_string(),
        namespace: namespace.clone(),
        contexts: gateway.contexts().to_vec(),
    };

    let registry = Arc::new(ResourceRegistry::new(settings.refresh));
    let api = Arc::new(PluginApi::new(
        registry,
        Arc::new(gateway),
        Handle::current(),
        namespace,
    ));
    for (key, value) in &settings.plugin_config {
        api.set_config(key.clone(), value.clone());
    }

    let plugins_dir = settings.plugins_dir.clone();
    let mut manager = PluginManager::new(Arc::clone(&api));
    let (manager, report) = tokio::task::spawn_blocking(move || {
        let report = manager.load_dir(&plugins_dir);
        (manager, report)
    })
    .await
    .context("plugin loader stopped unexpectedly")?;
    for (name, record) in manager.records() {
        info!(
            plugin = %name,
            kinds = ?record.kinds,
            commands = ?record.commands,
            hooks = record.hooks,
            injections = record.injections,
            "plugin ready"
        );
    }

    let mut app = App::new(Arc::clone(&api), settings.keybindings.clone(), header);
    app.set_status(report.summary());

    let executor = Executor::new(api, args.kubeconfig.clone());
    let run_result = run(&mut app, executor).await;
    shutdown_plugins(manager).await;
    run_result
}

async fn shutdown_plugins(mut manager: PluginManager) {
    match tokio::task::spawn_blocking(move || manager.shutdown()).await {
        Ok(errors) if errors.is_empty() => info!("plugins shut down"),
        Ok(errors) => warn!(?errors, "plugins reported errors during shutdown"),
        Err(error) => warn!(%error, "plugin shutdown stopped unexpectedly"),
    }
}

async fn run(app: &mut App, executor: Executor) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, executor).await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(terminal: &mut TuiTerminal, app: &mut App, mut executor: Executor) -> Result<()> {
    let mut inbox = executor.take_inbox();
    let size = terminal.size().context("failed to read terminal size")?;
    let command = AppCommand::batch(vec![
        app.update(Msg::Resize(size.width, size.height)),
        app.start(INITIAL_KIND),
    ]);
    executor.execute(terminal, app, command).await?;

    let mut reader = EventStream::new();
    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        let command = tokio::select! {
            maybe_event = reader.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    app.update(Msg::Key(key))
                }
                Some(Ok(Event::Resize(width, height))) => app.update(Msg::Resize(width, height)),
                Some(Ok(_)) => AppCommand::None,
                Some(Err(error)) => app.update(Msg::Status(format!("terminal event error: {error}"))),
                None => {
                    warn!("terminal event stream closed");
                    break;
                }
            },
            Some(msg) = inbox.recv() => app.update(msg),
        };

        if command != AppCommand::None {
            terminal
                .draw(|frame| ui::render(frame, app))
                .context("failed to render terminal frame")?;
            executor.execute(terminal, app, command).await?;
        }
    }

    Ok(())
}

/// Runs `AppCommand`s off the model and posts their results back as `Msg`s.
struct Executor {
    api: Arc<PluginApi>,
    kubeconfig: Option<PathBuf>,
    tx: mpsc::UnboundedSender<Msg>,
    rx: Option<mpsc::UnboundedReceiver<Msg>>,
}

impl Executor {
    fn new(api: Arc<PluginApi>, kubeconfig: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            api,
            kubeconfig,
            tx,
            rx: Some(rx),
        }
    }

    fn take_inbox(&mut self) -> mpsc::UnboundedReceiver<Msg> {
        match self.rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.tx = tx;
                rx
            }
        }
    }

    async fn execute(
        &self,
        terminal: &mut TuiTerminal,
        app: &mut App,
        command: AppCommand,
    ) -> Result<()> {
        let mut queue = VecDeque::from([command]);
        while let Some(command) = queue.pop_front() {
            match command {
                AppCommand::None => {}
                AppCommand::Batch(commands) => queue.extend(commands),
                AppCommand::Edit {
                    kind,
                    namespace,
                    name,
                } => {
                    let target = format!("{kind} {namespace}/{name}");
                    let result = self.edit_resource(terminal, kind, &namespace, &name).await;
                    terminal.clear().context("failed to clear terminal")?;
                    let result = result.map_err(|error| compact_error(&error));
                    queue.push_back(app.update(Msg::Edited { target, result }));
                }
                other => self.spawn(other),
            }
        }
        Ok(())
    }

    fn spawn(&self, command: AppCommand) {
        debug!(?command, "dispatching command");
        let api = Arc::clone(&self.api);
        let (label, handle): (&'static str, JoinHandle<Option<Msg>>) = match command {
            AppCommand::None | AppCommand::Batch(_) | AppCommand::Edit { .. } => return,
            AppCommand::FetchRows {
                screen,
                kind,
                namespace,
            } => (
                "Refresh",
                tokio::spawn(async move {
                    let client = api.client();
                    let result = api
                        .registry()
                        .list(client.as_ref(), &kind, &namespace)
                        .await;
                    Some(Msg::Rows { screen, result })
                }),
            ),
            AppCommand::ScheduleTick {
                screen,
                generation,
                after,
            } => (
                "Refresh timer",
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    Some(Msg::Tick { screen, generation })
                }),
            ),
            AppCommand::Describe {
                screen,
                kind,
                namespace,
                name,
            } => (
                "Describe",
                tokio::spawn(async move {
                    let client = api.client();
                    let result = api
                        .registry()
                        .describe(client.as_ref(), &kind, &namespace, &name)
                        .await;
                    Some(Msg::Detail { screen, result })
                }),
            ),
            AppCommand::PodLogs {
                screen,
                namespace,
                name,
            } => (
                "Logs",
                tokio::spawn(async move {
                    let result = api.client().pod_logs(namespace, name).await;
                    Some(Msg::Detail { screen, result })
                }),
            ),
            AppCommand::Delete { kind, targets } => (
                "Delete",
                tokio::spawn(async move {
                    let client = api.client();
                    let mut results = Vec::with_capacity(targets.len());
                    for target in targets {
                        let namespace = target.namespace.clone().unwrap_or_default();
                        let result = api
                            .registry()
                            .delete(client.as_ref(), &kind, &namespace, &target.name)
                            .await;
                        match &result {
                            Err(error) if error.is_transient() => {
                                debug!(kind = %kind, target = %target, %error, "delete skipped")
                            }
                            Err(error) => warn!(kind = %kind, target = %target, %error, "delete failed"),
                            Ok(()) => info!(kind = %kind, target = %target, "deleted"),
                        }
                        results.push((target, result));
                    }
                    Some(Msg::Deleted { kind, results })
                }),
            ),
            AppCommand::RunCommand { name, args } => (
                "Plugin command",
                tokio::task::spawn_blocking(move || {
                    let result = api.commands().execute(&name, &args);
                    Some(Msg::CommandFinished { name, result })
                }),
            ),
            AppCommand::SwitchNamespace { namespace } => (
                "Namespace switch",
                tokio::task::spawn_blocking(move || {
                    let errors = api.set_namespace(&namespace);
                    Some(Msg::NamespaceSwitched { errors })
                }),
            ),
            AppCommand::SwitchContext { context } => {
                let kubeconfig = self.kubeconfig.clone();
                (
                    "Context switch",
                    tokio::spawn(async move {
                        let result =
                            match KubeGateway::connect(kubeconfig.as_deref(), Some(context)).await {
                                Ok(gateway) => {
                                    let context = gateway.context().to_string();
                                    api.set_client(Arc::new(gateway));
                                    Ok(context)
                                }
                                Err(error) => Err(compact_error(&error)),
                            };
                        Some(Msg::ContextSwitched { result })
                    }),
                )
            }
            AppCommand::Emit { event, payload } => (
                "Event handlers",
                tokio::task::spawn_blocking(move || {
                    let errors = api.events().trigger(event, &payload);
                    errors
                        .first()
                        .map(|first| Msg::Status(format!("{event} handler failed: {first}")))
                }),
            ),
        };

        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Some(msg) = task_outcome(label, handle.await) {
                let _ = tx.send(msg);
            }
        });
    }

    /// Opens the live manifest in `$EDITOR` and applies it when it changed.
    async fn edit_resource(
        &self,
        terminal: &mut TuiTerminal,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>> {
        let client: Arc<dyn ClusterClient> = self.api.client();
        let manifest = self
            .api
            .registry()
            .describe_builtin(client.as_ref(), kind, namespace, name)
            .await
            .with_context(|| format!("failed to fetch {kind} {name}"))?;

        suspend_terminal_for_subprocess(terminal)?;
        let edited = editor::edit_text(&manifest, ".yaml").await;
        resume_terminal_after_subprocess(terminal)?;

        let Some(edited) = edited? else {
            return Ok(None);
        };
        let applied = client
            .apply_yaml(edited)
            .await
            .with_context(|| format!("failed to apply {kind} {name}"))?;
        info!(kind = %kind, namespace, name, "applied edited manifest");
        Ok(Some(applied))
    }
}

fn suspend_terminal_for_subprocess(terminal: &mut TuiTerminal) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode for subprocess")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen for subprocess")?;
    terminal
        .show_cursor()
        .context("failed to show cursor for subprocess")?;
    Ok(())
}

fn resume_terminal_after_subprocess(terminal: &mut TuiTerminal) -> Result<()> {
    enable_raw_mode().context("failed to re-enable raw mode after subprocess")?;
    execute!(terminal.backend_mut(), EnterAlternateScreen)
        .context("failed to re-enter alternate screen after subprocess")?;
    terminal
        .clear()
        .context("failed to clear terminal after subprocess")?;
    Ok(())
}

/// A task that panicked or was cancelled surfaces as an error popup.
fn task_outcome(label: &str, joined: Result<Option<Msg>, JoinError>) -> Option<Msg> {
    match joined {
        Ok(msg) => msg,
        Err(error) => {
            warn!(task = label, %error, "background task failed");
            Some(Msg::Error {
                title: format!("{label} failed"),
                message: error.to_string(),
            })
        }
    }
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{compact_error, task_outcome};
    use crate::app::Msg;
    use anyhow::Context;

    #[tokio::test]
    async fn panicking_task_becomes_an_error_popup() {
        let joined = tokio::spawn(async {
            if true {
                panic!("handler blew up");
            }
            None::<Msg>
        })
        .await;

        match task_outcome("Plugin command", joined) {
            Some(Msg::Error { title, message }) => {
                assert_eq!(title, "Plugin command failed");
                assert!(message.contains("panic"));
            }
            other => panic!("expected an error popup, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finished_task_passes_its_message_through() {
        let joined = tokio::spawn(async { Some(Msg::Status("done".to_string())) }).await;
        assert!(matches!(
            task_outcome("Refresh", joined),
            Some(Msg::Status(status)) if status == "done"
        ));

        let quiet = tokio::spawn(async { None::<Msg> }).await;
        assert!(task_outcome("Event handlers", quiet).is_none());
    }

    #[test]
    fn compact_error_keeps_two_causes() {
        let error = Err::<(), _>(std::io::Error::other("connection reset"))
            .context("failed to list pods")
            .context("refresh failed")
            .context("outer")
            .expect_err("error chain");

        assert_eq!(
            compact_error(&error),
            "outer\ncaused by: refresh failed\ncaused by: failed to list pods"
        );
    }
}
