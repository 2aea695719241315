use anyhow::{Context, Result, bail};
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

const FALLBACK_EDITOR: &str = "vi";

/// `$VISUAL`, then `$EDITOR`, split into program and leading arguments.
pub fn resolve_editor() -> (String, Vec<String>) {
    let raw = ["VISUAL", "EDITOR"]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_EDITOR.to_string());
    split_command_line(&raw)
}

fn split_command_line(raw: &str) -> (String, Vec<String>) {
    let mut parts = raw.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .unwrap_or_else(|| FALLBACK_EDITOR.to_string());
    (program, parts.collect())
}

/// Opens `text` in the user's editor and returns the saved contents, or `None`
/// when nothing changed. The caller owns the terminal and must release it first.
pub async fn edit_text(text: &str, suffix: &str) -> Result<Option<String>> {
    let mut file = tempfile::Builder::new()
        .prefix("kubeboard-")
        .suffix(suffix)
        .tempfile()
        .context("failed to create temporary file for editing")?;
    file.write_all(text.as_bytes())
        .context("failed to write temporary file for editing")?;
    file.flush().context("failed to flush temporary file")?;

    let (program, args) = resolve_editor();
    let status = TokioCommand::new(&program)
        .args(&args)
        .arg(file.path())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("failed to run editor '{program}'"))?;
    if !status.success() {
        bail!("editor '{program}' exited with {status}");
    }

    let edited = tokio::fs::read_to_string(file.path())
        .await
        .context("failed to read edited file")?;
    if edited.trim() == text.trim() {
        return Ok(None);
    }
    Ok(Some(edited))
}

#[cfg(test)]
mod tests {
    use super::split_command_line;

    #[test]
    fn editor_command_line_keeps_arguments() {
        assert_eq!(
            split_command_line("code --wait"),
            ("code".to_string(), vec!["--wait".to_string()])
        );
        assert_eq!(split_command_line("   "), ("vi".to_string(), Vec::new()));
    }
}
