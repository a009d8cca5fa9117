use crate::error::ReproError;
use crate::signature::CrashSignature;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Lines starting with this token open a new stacktrace block.
pub const BLOCK_SEPARATOR: &str = "+----";

// Only anchors are emitted by the crash-report UI.
static ANCHOR_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[/a][^<]+?>").expect("anchor tag pattern is valid")
});

/// Decodes the entities the crash-report service escapes.
///
/// `&amp;` is decoded last so `&amp;lt;` becomes `&lt;`, not `<`.
pub fn unescape_html(line: &str) -> String {
    line.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Removes anchor tags and unescapes every line.
pub fn strip_html<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    lines
        .iter()
        .map(|line| unescape_html(&ANCHOR_TAG.replace_all(line.as_ref(), "")))
        .collect()
}

/// Keeps only the first stacktrace block.
///
/// Several blocks (e.g. symbolized and unsymbolized) would confuse the parser.
/// A separator only ends the block once something has been collected, and
/// leading blank lines are dropped.
pub fn get_only_first_stacktrace<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for line in lines {
        let line = line.as_ref().trim_end();
        if line.starts_with(BLOCK_SEPARATOR) && !kept.is_empty() {
            break;
        }
        if !kept.is_empty() || !line.is_empty() {
            kept.push(line.to_string());
        }
    }
    kept
}

/// Builds the text submitted for the reported crash.
pub fn prepare_original_stacktrace<S: AsRef<str>>(raw_lines: &[S]) -> String {
    get_only_first_stacktrace(&strip_html(raw_lines)).join("\n")
}

/// Turns raw process output into a crash signature.
pub trait StacktraceParser {
    fn parse(&self, job_type: &str, stacktrace: &str) -> Result<CrashSignature, ReproError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseStacktraceRequest<'a> {
    pub job: &'a str,
    pub stacktrace: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParseStacktraceResponse {
    pub crash_state: String,
    pub crash_type: String,
}

impl ParseStacktraceResponse {
    /// Splits the newline-joined state into lines, dropping empty ones, and
    /// flattens the crash type onto one line.
    pub fn into_signature(self) -> CrashSignature {
        let lines = self
            .crash_state
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        CrashSignature::new(self.crash_type.replace('\n', " "), lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_anchor_tags_and_entities() {
        assert_eq!(
            strip_html(&["aa <a href=\"sadfsd\">test</a> &amp;"]),
            vec!["aa test &".to_string()]
        );
    }

    #[test]
    fn ampersand_is_unescaped_last() {
        assert_eq!(unescape_html("&amp;lt;"), "&lt;");
        assert_eq!(unescape_html("&lt;int&gt; &quot;x&quot; &apos;y&apos;"), "<int> \"x\" 'y'");
    }

    #[test]
    fn first_stacktrace_truncation() {
        assert_eq!(
            get_only_first_stacktrace(&["", "a", "+----x", "b"]),
            vec!["a".to_string()]
        );
    }

    #[test]
    fn one_trace_is_trimmed() {
        assert_eq!(
            get_only_first_stacktrace(&["  ", "aa  ", "bb"]),
            vec!["aa".to_string(), "bb".to_string()]
        );
    }

    #[test]
    fn leading_separator_does_not_terminate() {
        assert_eq!(
            get_only_first_stacktrace(&[
                "   ",
                "+------- fake trace ----+",
                "aa",
                "bb",
                "+------Release Build Unsymbolized Stacktrace (diff)------+",
                "cc",
            ]),
            vec!["+------- fake trace ----+", "aa", "bb"]
        );
    }

    #[test]
    fn inner_blank_lines_are_kept() {
        assert_eq!(
            get_only_first_stacktrace(&["a", "", "b"]),
            vec!["a", "", "b"]
        );
    }

    #[test]
    fn prepare_original_joins_lines() {
        let lines = ["", "<a href=\"x\">#0</a> foo&lt;int&gt;", "#1 bar", "+---- second", "#0 baz"];
        assert_eq!(prepare_original_stacktrace(&lines), "#0 foo<int>\n#1 bar");
    }

    #[test]
    fn response_becomes_signature() {
        let response: ParseStacktraceResponse = serde_json::from_str(
            r#"{"crash_state": "frame1\nframe2\n\n", "crash_type": "Heap-buffer-overflow\nREAD 4"}"#,
        )
        .unwrap();
        let sig = response.into_signature();
        assert_eq!(sig.crash_type(), "Heap-buffer-overflow READ 4");
        assert_eq!(sig.crash_state_lines(), ["frame1", "frame2"]);
    }
}
