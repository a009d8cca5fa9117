use serde::Serialize;

/// Upper bound on retained process output, in characters.
pub const MAX_OUTPUT_CHARS: usize = 100_000;

/// The identity of a crash as reported by the stacktrace parser.
///
/// `crash_state_lines` is fixed at construction. Two signatures are equal only
/// when type, state and output all match; that equality is meant for
/// bookkeeping, the reproduction check goes through [`crate::oracle::is_similar`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CrashSignature {
    #[serde(rename = "type")]
    crash_type: String,
    #[serde(rename = "state")]
    crash_state_lines: Box<[String]>,
    output: String,
}

impl CrashSignature {
    pub fn new<S: Into<String>>(
        crash_type: impl Into<String>,
        crash_state_lines: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            crash_type: crash_type.into(),
            crash_state_lines: crash_state_lines.into_iter().map(Into::into).collect(),
            output: String::new(),
        }
    }

    /// Attaches the raw output, truncated to [`MAX_OUTPUT_CHARS`].
    pub fn with_output(mut self, output: &str) -> Self {
        self.output = truncate_chars(output, MAX_OUTPUT_CHARS).to_string();
        self
    }

    pub fn crash_type(&self) -> &str {
        &self.crash_type
    }

    pub fn crash_state_lines(&self) -> &[String] {
        &self.crash_state_lines
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// True when there is no crash state to compare against.
    pub fn is_vacuous(&self) -> bool {
        self.crash_state_lines.is_empty()
    }

    /// MD5 over all three fields, used to count distinct signatures.
    pub fn digest(&self) -> [u8; 16] {
        let mut context = md5::Context::new();
        context.consume(self.crash_type.as_bytes());
        context.consume([0u8]);
        for line in self.crash_state_lines.iter() {
            context.consume(line.as_bytes());
            context.consume([b'\n']);
        }
        context.consume([0u8]);
        context.consume(self.output.as_bytes());
        context.compute().0
    }
}

/// Returns the prefix of `s` holding at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_includes_output() {
        let a = CrashSignature::new("T", ["a", "b"]).with_output("x");
        let b = CrashSignature::new("T", ["a", "b"]).with_output("x");
        let c = CrashSignature::new("T", ["a", "b"]).with_output("y");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn state_line_order_is_part_of_identity() {
        let a = CrashSignature::new("T", ["a", "b"]);
        let b = CrashSignature::new("T", ["b", "a"]);
        assert_ne!(a, b);
    }

    #[test]
    fn output_is_truncated() {
        let long = "é".repeat(MAX_OUTPUT_CHARS + 10);
        let sig = CrashSignature::new("T", ["a"]).with_output(&long);
        assert_eq!(sig.output().chars().count(), MAX_OUTPUT_CHARS);
    }

    #[test]
    fn truncate_chars_short_input_is_untouched() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 2), "ab");
        assert_eq!(truncate_chars("", 0), "");
    }
}
