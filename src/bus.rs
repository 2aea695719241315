use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::error::CommandError;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum AppEvent {
    AppStarted,
    AppShutdown,
    NamespaceChanged,
    ResourceSelected,
    UiUpdate,
}

impl AppEvent {
    pub const ALL: [Self; 5] = [
        Self::AppStarted,
        Self::AppShutdown,
        Self::NamespaceChanged,
        Self::ResourceSelected,
        Self::UiUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppStarted => "app-started",
            Self::AppShutdown => "app-shutdown",
            Self::NamespaceChanged => "namespace-changed",
            Self::ResourceSelected => "resource-selected",
            Self::UiUpdate => "ui-update",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str().eq_ignore_ascii_case(tag.trim()))
    }
}

impl Display for AppEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type EventHandler = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<AppEvent, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn subscribe(&self, event: AppEvent, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(handler);
    }

    /// Runs every subscriber in registration order. A failing handler does not
    /// stop the ones after it; its error is logged and returned.
    pub fn trigger(&self, event: AppEvent, payload: &Value) -> Vec<String> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .cloned()
            .unwrap_or_default();
        debug!(event = %event, subscribers = handlers.len(), "triggering event");

        let mut errors = Vec::new();
        for handler in handlers {
            if let Err(error) = handler(payload) {
                warn!(event = %event, error = %error, "event handler failed");
                errors.push(error);
            }
        }
        errors
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, event: AppEvent) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .map_or(0, Vec::len)
    }
}

pub type CommandHandler = Arc<dyn Fn(&[String]) -> Result<String, String> + Send + Sync>;

#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    handler: CommandHandler,
}

impl Command {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: CommandHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler,
        }
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<BTreeMap<String, Command>>,
}

impl CommandRegistry {
    pub fn register(&self, command: Command) -> Result<(), CommandError> {
        let mut commands = self
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if commands.contains_key(&command.name) {
            return Err(CommandError::Duplicate(command.name));
        }
        debug!(command = %command.name, "registered command");
        commands.insert(command.name.clone(), command);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn execute(&self, name: &str, args: &[String]) -> Result<String, CommandError> {
        // Clone the handler out so a command may register or run other commands.
        let handler = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|command| Arc::clone(&command.handler))
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;

        handler(args).map_err(|reason| CommandError::Failed {
            name: name.to_string(),
            reason,
        })
    }

    /// `(name, description)` pairs sorted by name.
    pub fn list(&self) -> Vec<(String, String)> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|command| (command.name.clone(), command.description.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{AppEvent, Command, CommandRegistry, EventBus};
    use crate::error::CommandError;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn handlers_run_in_order_and_failures_do_not_stop_iteration() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["h1", "h2", "h3"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                AppEvent::NamespaceChanged,
                Arc::new(move |payload: &serde_json::Value| {
                    seen.lock().expect("seen lock").push(format!(
                        "{label}:{}",
                        payload["namespace"].as_str().unwrap_or_default()
                    ));
                    if label == "h2" {
                        Err("h2 exploded".to_string())
                    } else {
                        Ok(())
                    }
                }),
            );
        }

        let errors = bus.trigger(AppEvent::NamespaceChanged, &json!({ "namespace": "prod" }));

        assert_eq!(errors, vec!["h2 exploded".to_string()]);
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec!["h1:prod", "h2:prod", "h3:prod"]
        );
    }

    #[test]
    fn events_without_subscribers_are_quiet() {
        let bus = EventBus::default();
        assert!(bus.trigger(AppEvent::UiUpdate, &json!(null)).is_empty());
        assert_eq!(bus.subscriber_count(AppEvent::UiUpdate), 0);
    }

    #[test]
    fn event_tags_round_trip() {
        for event in AppEvent::ALL {
            assert_eq!(AppEvent::from_tag(event.as_str()), Some(event));
        }
        assert_eq!(AppEvent::from_tag("pod-exploded"), None);
    }

    #[test]
    fn commands_reject_duplicates_and_unknown_names() {
        let commands = CommandRegistry::default();
        commands
            .register(Command::new(
                "greet",
                "say hello",
                Arc::new(|args: &[String]| {
                    Ok::<_, String>(format!("hello {}", args.join(" ")))
                }),
            ))
            .expect("first registration");

        let duplicate = commands.register(Command::new(
            "greet",
            "again",
            Arc::new(|_: &[String]| Ok::<_, String>(String::new())),
        ));
        assert_eq!(duplicate, Err(CommandError::Duplicate("greet".to_string())));

        assert_eq!(
            commands.execute("greet", &["team".to_string()]),
            Ok("hello team".to_string())
        );
        assert_eq!(
            commands.execute("missing", &[]),
            Err(CommandError::Unknown("missing".to_string()))
        );
        assert_eq!(
            commands.list(),
            vec![("greet".to_string(), "say hello".to_string())]
        );
    }

    #[test]
    fn failing_command_reports_its_name() {
        let commands = CommandRegistry::default();
        commands
            .register(Command::new(
                "boom",
                "",
                Arc::new(|_: &[String]| Err::<String, _>("nope".to_string())),
            ))
            .expect("register");

        assert_eq!(
            commands.execute("boom", &[]),
            Err(CommandError::Failed {
                name: "boom".to_string(),
                reason: "nope".to_string()
            })
        );
    }
}
