use crate::signature::CrashSignature;

/// The outcome of comparing a fresh crash against the reported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Points earned by the new signature: one for an identical crash type,
    /// plus one per new state line found in the original state.
    pub score: usize,
    /// Points required, i.e. the number of original state lines.
    pub threshold: usize,
}

impl Verdict {
    /// Whether the score reaches the threshold.
    pub fn is_match(&self) -> bool {
        self.score >= self.threshold
    }
}

/// Scores `new` against `original`.
///
/// The scan walks the *new* state lines and looks each one up in the original
/// state, so extra noise frames in the new run never lower the score, and a
/// differing crash type can be compensated by matching frames.
pub fn score(new: &CrashSignature, original: &CrashSignature) -> Verdict {
    let mut score = 0;
    if new.crash_type() == original.crash_type() {
        score += 1;
    }

    let original_lines = original.crash_state_lines();
    score += new
        .crash_state_lines()
        .iter()
        .filter(|line| original_lines.contains(*line))
        .count();

    Verdict {
        score,
        threshold: original_lines.len(),
    }
}

/// Checks if the new signature is similar enough to the original one.
///
/// An original signature without state lines has a threshold of zero and
/// therefore matches anything.
pub fn is_similar(new: &CrashSignature, original: &CrashSignature) -> bool {
    score(new, original).is_match()
}

/// An `Oracle` decides whether a reproduced crash is the crash that was
/// originally reported.
///
/// The reproduction loop consults its oracle once per attempt; implementations
/// must be pure so that a retried attempt is judged exactly like the first one.
pub trait Oracle: Send + Sync {
    /// Compares the signature observed in this attempt with the reported one.
    ///
    /// # Arguments
    /// * `new`: The signature parsed from the latest run's output.
    /// * `original`: The signature parsed from the historical stacktrace.
    ///
    /// # Returns
    /// The [`Verdict`] for this pair. Callers act on [`Verdict::is_match`].
    fn examine(&self, new: &CrashSignature, original: &CrashSignature) -> Verdict;
}

/// The forgiving containment rule used for every job type.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimilarityOracle;

impl SimilarityOracle {
    /// Creates a new `SimilarityOracle`.
    pub fn new() -> Self {
        SimilarityOracle
    }
}

impl Oracle for SimilarityOracle {
    fn examine(&self, new: &CrashSignature, original: &CrashSignature) -> Verdict {
        score(new, original)
    }
}
