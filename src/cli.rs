use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubeboard",
    version,
    about = "A pluggable Kubernetes terminal dashboard."
)]
pub struct CliArgs {
    /// Path to a kubeconfig file (defaults to KUBECONFIG or ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to connect with
    #[arg(long)]
    pub context: Option<String>,

    /// Start in a specific namespace (empty string for all namespaces)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Directory scanned for Lua plugins
    #[arg(long, env = "KUBEBOARD_PLUGINS_DIR")]
    pub plugins_dir: Option<PathBuf>,

    /// Settings file (defaults to KUBEBOARD_CONFIG or the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List refresh interval in milliseconds
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// tracing filter (for example: info,kubeboard=debug)
    #[arg(long)]
    pub log_filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn parses_connection_flags() {
        let args = CliArgs::parse_from([
            "kubeboard",
            "--context",
            "staging",
            "-n",
            "payments",
            "--refresh-ms",
            "1500",
        ]);

        assert_eq!(args.context.as_deref(), Some("staging"));
        assert_eq!(args.namespace.as_deref(), Some("payments"));
        assert_eq!(args.refresh_ms, Some(1500));
        assert!(args.plugins_dir.is_none());
    }
}
