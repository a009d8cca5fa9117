use crate::error::ReproError;
use std::fs;
use std::io::Write;
use std::process::Command;
use tracing::debug;

const DEFAULT_EDITOR: &str = "vi";
const COMMENT_MARKER: char = '#';

/// Lets the user rewrite a piece of text before it is used.
pub trait Editor {
    /// `comment` is shown to the user and stripped from the result.
    fn edit(&mut self, content: &str, prefix: &str, comment: &str) -> Result<String, ReproError>;
}

/// Returns the content untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughEditor;

impl Editor for PassThroughEditor {
    fn edit(&mut self, content: &str, _prefix: &str, _comment: &str) -> Result<String, ReproError> {
        Ok(content.to_string())
    }
}

/// Opens the text in `$EDITOR` (or `vi`) through a scratch file.
#[derive(Debug, Clone)]
pub struct ExternalEditor {
    command: Vec<String>,
}

impl ExternalEditor {
    pub fn from_env() -> Result<Self, ReproError> {
        let raw = std::env::var("EDITOR")
            .ok()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EDITOR.to_string());
        Self::new(&raw)
    }

    /// `editor` may carry arguments, e.g. `code --wait`.
    pub fn new(editor: &str) -> Result<Self, ReproError> {
        let command = shell_words::split(editor)
            .map_err(|e| ReproError::Config(format!("invalid editor command {editor:?}: {e}")))?;
        let program = command
            .first()
            .ok_or_else(|| ReproError::Config("empty editor command".into()))?;
        which::which(program).map_err(|_| ReproError::NotInstalled(program.clone()))?;
        Ok(Self { command })
    }
}

impl Editor for ExternalEditor {
    fn edit(&mut self, content: &str, prefix: &str, comment: &str) -> Result<String, ReproError> {
        let mut file = tempfile::Builder::new().prefix(prefix).tempfile()?;
        file.write_all(add_comment(content, comment).as_bytes())?;
        file.flush()?;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ReproError::Config("empty editor command".into()))?;
        debug!(editor = %program, file = %file.path().display(), "Opening editor");
        let status = Command::new(program).args(args).arg(file.path()).status()?;
        if !status.success() {
            return Err(ReproError::command_failed(
                self.command.join(" "),
                status.code().unwrap_or(-1),
                "",
            ));
        }

        let edited = fs::read_to_string(file.path())?;
        Ok(remove_comment(&edited))
    }
}

/// Appends `comment` as `#`-prefixed lines after a blank line.
pub fn add_comment(content: &str, comment: &str) -> String {
    let commented = comment
        .lines()
        .map(|line| format!("{COMMENT_MARKER} {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{content}\n\n{commented}\n")
}

/// Drops every line starting with `#` and trims the rest.
pub fn remove_comment(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with(COMMENT_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_round_trip() {
        let with_comment = add_comment("--flag a.html", "Edit arguments\nbefore running");
        assert_eq!(
            with_comment,
            "--flag a.html\n\n# Edit arguments\n# before running\n"
        );
        assert_eq!(remove_comment(&with_comment), "--flag a.html");
    }

    #[test]
    fn remove_comment_keeps_inner_lines() {
        assert_eq!(
            remove_comment("  # header\nline one\n# mid\nline two\n\n"),
            "line one\nline two"
        );
    }

    #[test]
    fn pass_through_returns_content() {
        let mut editor = PassThroughEditor;
        assert_eq!(editor.edit("--a --b", "edit-args-", "c").unwrap(), "--a --b");
    }

    #[test]
    fn external_editor_uses_edited_file() {
        // `sed -i` stands in for an interactive editor.
        let mut editor = ExternalEditor::new("sed -i s/--old/--new/").unwrap();
        let edited = editor
            .edit("--old --keep", "edit-args-", "Edit arguments")
            .unwrap();
        assert_eq!(edited, "--new --keep");
    }

    #[test]
    fn failing_editor_is_reported() {
        let mut editor = ExternalEditor::new("false").unwrap();
        assert!(matches!(
            editor.edit("x", "edit-args-", "c"),
            Err(ReproError::CommandFailed { returncode: 1, .. })
        ));
    }

    #[test]
    fn missing_editor_is_not_installed() {
        assert!(matches!(
            ExternalEditor::new("no-such-editor-binary-12345"),
            Err(ReproError::NotInstalled(_))
        ));
    }
}
