use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by resource handlers and the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource kind '{0}' is not supported")]
    UnknownKind(String),
    #[error("cluster request failed: {0}")]
    Transport(String),
    #[error("access denied: {0}")]
    Denied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("plugin error: {0}")]
    Plugin(String),
    #[error("{0}")]
    Unsupported(String),
}

impl ResourceError {
    /// Transport failures take over the screen; everything else stays inline.
    pub fn is_fatal_for_view(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Per-operation failures that only deserve a transient status line.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Denied(_))
    }
}

impl From<kube::Error> for ResourceError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) => match response.code {
                401 | 403 => Self::Denied(response.message.clone()),
                404 => Self::NotFound(response.message.clone()),
                _ => Self::Transport(format!("{} ({})", response.message, response.code)),
            },
            kube::Error::SerdeError(error) => Self::Decode(error.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<PluginError> for ResourceError {
    fn from(error: PluginError) -> Self {
        match error {
            PluginError::MissingExport(export) => {
                Self::Unsupported(format!("plugin does not implement {export}"))
            }
            other => Self::Plugin(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("failed to read plugin {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("plugin does not export required function '{0}'")]
    MissingExport(&'static str),
    #[error("plugin '{plugin}' failed to initialize: {reason}")]
    Initialize { plugin: String, reason: String },
    #[error("protocol error in {export}: {reason}")]
    Protocol { export: String, reason: String },
    #[error("{0}")]
    Script(String),
    #[error("plugin name '{0}' is already loaded")]
    DuplicateName(String),
    #[error("plugin '{0}' is closed")]
    Closed(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl From<mlua::Error> for PluginError {
    fn from(error: mlua::Error) -> Self {
        Self::Script(error.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("command '{0}' is already registered")]
    Duplicate(String),
    #[error("command '{name}' failed: {reason}")]
    Failed { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid key binding '{key}' for action '{action}'")]
    Binding { action: String, key: String },
}

#[cfg(test)]
mod tests {
    use super::ResourceError;

    #[test]
    fn only_transport_errors_take_over_the_view() {
        assert!(ResourceError::Transport("dial tcp".into()).is_fatal_for_view());
        assert!(!ResourceError::Denied("pods".into()).is_fatal_for_view());
        assert!(ResourceError::NotFound("pod/a".into()).is_transient());
        assert!(!ResourceError::Plugin("boom".into()).is_transient());
    }
}
