use crate::app::InputMode;
use crate::error::ConfigError;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Quit,
    NewTab,
    CloseTab,
    NextTab,
    PrevTab,
    Back,
    Forward,
    ActivateTab(u8),
    Down,
    Up,
    PageDown,
    PageUp,
    Top,
    Bottom,
    Enter,
    Describe,
    Logs,
    Edit,
    Delete,
    ToggleMark,
    Refresh,
    StartCommand,
    StartFilter,
    ToggleHelp,
    Dismiss,
    SubmitInput,
    CompleteInput,
    CancelInput,
    Backspace,
    InputChar(char),
    ConfirmYes,
    ConfirmNo,
}

/// Actions that can be rebound from the settings file, with their default keys.
const BINDABLE: &[(&str, Action, &[&str])] = &[
    ("quit", Action::Quit, &["q", "ctrl+c"]),
    ("new_tab", Action::NewTab, &["ctrl+t"]),
    ("close_tab", Action::CloseTab, &["ctrl+w"]),
    ("next_tab", Action::NextTab, &["tab", "right"]),
    ("prev_tab", Action::PrevTab, &["backtab", "shift+backtab", "left"]),
    ("back", Action::Back, &["backspace", "["]),
    ("forward", Action::Forward, &["]"]),
    ("down", Action::Down, &["j", "down"]),
    ("up", Action::Up, &["k", "up"]),
    ("page_down", Action::PageDown, &["pagedown", "ctrl+d"]),
    ("page_up", Action::PageUp, &["pageup", "ctrl+u"]),
    ("top", Action::Top, &["g", "home"]),
    ("bottom", Action::Bottom, &["shift+g", "end"]),
    ("enter", Action::Enter, &["enter"]),
    ("describe", Action::Describe, &["d"]),
    ("logs", Action::Logs, &["l"]),
    ("edit", Action::Edit, &["e"]),
    ("delete", Action::Delete, &["ctrl+k", "x"]),
    ("toggle_mark", Action::ToggleMark, &["space"]),
    ("refresh", Action::Refresh, &["r", "f5"]),
    ("command", Action::StartCommand, &[":"]),
    ("filter", Action::StartFilter, &["/"]),
    ("help", Action::ToggleHelp, &["?"]),
    ("dismiss", Action::Dismiss, &["esc"]),
    ("confirm_yes", Action::ConfirmYes, &["y", "shift+y"]),
    ("confirm_no", Action::ConfirmNo, &["n", "shift+n"]),
];

/// Normal-mode key table keyed by normalised key signature.
#[derive(Debug, Clone)]
pub struct KeyBindings {
    normal: HashMap<String, Action>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut normal = HashMap::new();
        for (_, action, keys) in BINDABLE {
            for key in *keys {
                if let Some(signature) = normalize_hotkey_spec(key) {
                    normal.insert(signature, *action);
                }
            }
        }
        for digit in 1..=9u8 {
            normal.insert(digit.to_string(), Action::ActivateTab(digit));
        }
        Self { normal }
    }
}

impl KeyBindings {
    /// Defaults with `action -> key` overrides applied. An override replaces every
    /// default key of that action.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut bindings = Self::default();
        for (name, spec) in overrides {
            let action = BINDABLE
                .iter()
                .find(|(candidate, _, _)| candidate.eq_ignore_ascii_case(name.trim()))
                .map(|(_, action, _)| *action)
                .ok_or_else(|| ConfigError::Binding {
                    action: name.clone(),
                    key: spec.clone(),
                })?;

            let mut signatures = Vec::new();
            for key in spec.split(',').map(str::trim).filter(|key| !key.is_empty()) {
                let signature = normalize_hotkey_spec(key).ok_or_else(|| ConfigError::Binding {
                    action: name.clone(),
                    key: key.to_string(),
                })?;
                signatures.push(signature);
            }
            if signatures.is_empty() {
                return Err(ConfigError::Binding {
                    action: name.clone(),
                    key: spec.clone(),
                });
            }

            bindings.normal.retain(|_, bound| *bound != action);
            for signature in signatures {
                bindings.normal.insert(signature, action);
            }
        }
        Ok(bindings)
    }

    pub fn map(&self, mode: InputMode, key: KeyEvent) -> Option<Action> {
        match mode {
            InputMode::Normal => self.map_normal(key),
            InputMode::Command | InputMode::Filter => map_input_mode_key(key),
        }
    }

    fn map_normal(&self, key: KeyEvent) -> Option<Action> {
        let signature = key_event_signature(key)?;
        self.normal.get(&signature).copied()
    }

    /// First key bound to `action`, for the help overlay.
    pub fn key_for(&self, action: Action) -> Option<String> {
        let mut keys = self
            .normal
            .iter()
            .filter(|(_, bound)| **bound == action)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        keys.sort_by_key(|key| (key.len(), key.clone()));
        keys.into_iter().next()
    }

    /// `(action name, key)` pairs in table order, skipping unbound actions.
    pub fn help_entries(&self) -> Vec<(&'static str, String)> {
        BINDABLE
            .iter()
            .filter_map(|(name, action, _)| Some((*name, self.key_for(*action)?)))
            .collect()
    }
}

fn map_input_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Char('m') | KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Action::SubmitInput)
        }
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::CancelInput)
        }
        KeyCode::Tab => Some(Action::CompleteInput),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

pub fn key_event_signature(key: KeyEvent) -> Option<String> {
    let mut shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let key_name = match key.code {
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char('+') => "plus".to_string(),
        KeyCode::Char(c) if c.is_ascii_alphabetic() => {
            shift |= c.is_ascii_uppercase();
            c.to_ascii_lowercase().to_string()
        }
        // Symbols already carry their shift state.
        KeyCode::Char(c) => {
            shift = false;
            c.to_string()
        }
        KeyCode::Enter => "enter".to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::BackTab => "backtab".to_string(),
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Delete => "delete".to_string(),
        KeyCode::Insert => "insert".to_string(),
        KeyCode::Esc => "esc".to_string(),
        KeyCode::Left => "left".to_string(),
        KeyCode::Right => "right".to_string(),
        KeyCode::Up => "up".to_string(),
        KeyCode::Down => "down".to_string(),
        KeyCode::Home => "home".to_string(),
        KeyCode::End => "end".to_string(),
        KeyCode::PageUp => "pageup".to_string(),
        KeyCode::PageDown => "pagedown".to_string(),
        KeyCode::F(n) => format!("f{n}"),
        _ => return None,
    };

    let mut parts = Vec::new();
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        parts.push("ctrl".to_string());
    }
    if key.modifiers.contains(KeyModifiers::ALT) {
        parts.push("alt".to_string());
    }
    if shift {
        parts.push("shift".to_string());
    }
    parts.push(key_name);
    Some(parts.join("+"))
}

pub fn normalize_hotkey_spec(spec: &str) -> Option<String> {
    let mut ctrl = false;
    let mut alt = false;
    let mut shift = false;
    let mut key: Option<String> = None;

    // A bare "+" is the plus key, not a separator.
    if spec.trim() == "+" {
        return Some("plus".to_string());
    }

    for token in spec
        .split('+')
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
    {
        let lower = token.to_ascii_lowercase();
        match lower.as_str() {
            "ctrl" | "control" => ctrl = true,
            "alt" | "meta" => alt = true,
            "shift" => shift = true,
            _ => {
                if token.len() == 1 && token.chars().all(|c| c.is_ascii_uppercase()) {
                    shift = true;
                }
                key = normalize_hotkey_key_token(&lower);
            }
        }
    }

    let key = key?;
    if key.len() == 1 && !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        shift = false;
    }

    let mut parts = Vec::new();
    if ctrl {
        parts.push("ctrl".to_string());
    }
    if alt {
        parts.push("alt".to_string());
    }
    if shift {
        parts.push("shift".to_string());
    }
    parts.push(key);
    Some(parts.join("+"))
}

fn normalize_hotkey_key_token(token: &str) -> Option<String> {
    match token {
        "esc" | "escape" => Some("esc".to_string()),
        "return" => Some("enter".to_string()),
        "pgup" => Some("pageup".to_string()),
        "pgdn" => Some("pagedown".to_string()),
        "del" => Some("delete".to_string()),
        "ins" => Some("insert".to_string()),
        "space" | "plus" | "tab" | "backtab" | "enter" | "backspace" | "delete" | "insert"
        | "left" | "right" | "up" | "down" | "home" | "end" | "pageup" | "pagedown" => {
            Some(token.to_string())
        }
        _ if token.chars().count() == 1 => Some(token.to_string()),
        _ if token.starts_with('f') => {
            let number = token.trim_start_matches('f').parse::<u8>().ok()?;
            if (1..=24).contains(&number) {
                Some(format!("f{number}"))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, KeyBindings, key_event_signature, normalize_hotkey_spec};
    use crate::app::InputMode;
    use crate::error::ConfigError;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::collections::BTreeMap;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn normal_mode_maps_navigation_defaults() {
        let bindings = KeyBindings::default();
        let normal = |code, modifiers| bindings.map(InputMode::Normal, key(code, modifiers));

        assert_eq!(normal(KeyCode::Char('q'), KeyModifiers::NONE), Some(Action::Quit));
        assert_eq!(normal(KeyCode::Char('t'), KeyModifiers::CONTROL), Some(Action::NewTab));
        assert_eq!(normal(KeyCode::Char('w'), KeyModifiers::CONTROL), Some(Action::CloseTab));
        assert_eq!(normal(KeyCode::Char('3'), KeyModifiers::NONE), Some(Action::ActivateTab(3)));
        assert_eq!(normal(KeyCode::Backspace, KeyModifiers::NONE), Some(Action::Back));
        assert_eq!(normal(KeyCode::Char(']'), KeyModifiers::NONE), Some(Action::Forward));
        assert_eq!(normal(KeyCode::Char(' '), KeyModifiers::NONE), Some(Action::ToggleMark));
    }

    #[test]
    fn shifted_letters_and_symbols_normalise_consistently() {
        let bindings = KeyBindings::default();

        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::Char('G'), KeyModifiers::SHIFT)),
            Some(Action::Bottom)
        );
        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::Char('G'), KeyModifiers::NONE)),
            Some(Action::Bottom)
        );
        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::Char(':'), KeyModifiers::SHIFT)),
            Some(Action::StartCommand)
        );
        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::Char('?'), KeyModifiers::SHIFT)),
            Some(Action::ToggleHelp)
        );
    }

    #[test]
    fn input_mode_captures_characters() {
        let bindings = KeyBindings::default();

        assert_eq!(
            bindings.map(InputMode::Command, key(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(Action::InputChar('q'))
        );
        assert_eq!(
            bindings.map(InputMode::Filter, key(KeyCode::Esc, KeyModifiers::NONE)),
            Some(Action::CancelInput)
        );
        assert_eq!(
            bindings.map(InputMode::Filter, key(KeyCode::Char('x'), KeyModifiers::ALT)),
            None
        );
    }

    #[test]
    fn overrides_replace_default_keys() {
        let overrides = BTreeMap::from([
            ("new_tab".to_string(), "alt+n".to_string()),
            ("quit".to_string(), "ctrl+q, F10".to_string()),
        ]);
        let bindings = KeyBindings::with_overrides(&overrides).expect("bindings");

        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::Char('n'), KeyModifiers::ALT)),
            Some(Action::NewTab)
        );
        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::Char('t'), KeyModifiers::CONTROL)),
            None
        );
        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::F(10), KeyModifiers::NONE)),
            Some(Action::Quit)
        );
        assert_eq!(
            bindings.map(InputMode::Normal, key(KeyCode::Char('q'), KeyModifiers::NONE)),
            None
        );
        assert_eq!(bindings.key_for(Action::Quit).as_deref(), Some("f10"));
    }

    #[test]
    fn bad_overrides_are_config_errors() {
        let unknown = BTreeMap::from([("teleport".to_string(), "t".to_string())]);
        assert!(matches!(
            KeyBindings::with_overrides(&unknown),
            Err(ConfigError::Binding { action, .. }) if action == "teleport"
        ));

        let bad_key = BTreeMap::from([("quit".to_string(), "ctrl+nope".to_string())]);
        assert!(matches!(
            KeyBindings::with_overrides(&bad_key),
            Err(ConfigError::Binding { key, .. }) if key == "ctrl+nope"
        ));
    }

    #[test]
    fn hotkey_signature_normalizes_modifiers() {
        let event = key(KeyCode::Char('P'), KeyModifiers::CONTROL | KeyModifiers::SHIFT);
        assert_eq!(key_event_signature(event), Some("ctrl+shift+p".to_string()));
    }

    #[test]
    fn hotkey_spec_parses_common_tokens() {
        assert_eq!(
            normalize_hotkey_spec("shift+ctrl+F5"),
            Some("ctrl+shift+f5".to_string())
        );
        assert_eq!(normalize_hotkey_spec("G"), Some("shift+g".to_string()));
        assert_eq!(normalize_hotkey_spec("ctrl+pgup"), Some("ctrl+pageup".to_string()));
        assert_eq!(normalize_hotkey_spec("shift+?"), Some("?".to_string()));
        assert_eq!(normalize_hotkey_spec("ctrl+"), None);
    }
}
