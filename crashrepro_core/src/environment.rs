//! Environment construction for a reproduction run.
//!
//! The environment recorded with a testcase points at symbolizers and
//! suppression files on the fuzzing bots. [`EnvironmentNormalizer`] rewrites it
//! for the local machine as a chain of pure stages:
//! `base -> normalize_sanitizers -> inject_display -> inject_symbolizer`.
//! Every stage returns a new mapping, and the chain is idempotent.

use crate::error::ReproError;
use crate::resources::{ResourceLocator, suppressions_filename};
use crate::sanitizer::{Sanitizer, SanitizerOptions, suppressions_name};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variables handed to the reproduced binary.
pub type Environment = BTreeMap<String, String>;

pub const DEFAULT_DISPLAY: &str = ":0.0";

const OPTIONS_MARKER: &str = "_OPTIONS";
const EXTERNAL_SYMBOLIZER_OPTION: &str = "external_symbolizer_path";
const COVERAGE_DIR_OPTION: &str = "coverage_dir";
const SUPPRESSIONS_OPTION: &str = "suppressions";

#[derive(Debug, Clone)]
pub struct EnvironmentNormalizer {
    symbolizer_path: PathBuf,
    suppressions_dir: PathBuf,
}

impl EnvironmentNormalizer {
    pub fn new(symbolizer_path: impl Into<PathBuf>, suppressions_dir: impl Into<PathBuf>) -> Self {
        Self {
            symbolizer_path: symbolizer_path.into(),
            suppressions_dir: suppressions_dir.into(),
        }
    }

    /// Resolves the bundled symbolizer and fixes the modes of whichever
    /// suppression lists are shipped.
    pub fn from_resources(resources: &ResourceLocator) -> Result<Self, ReproError> {
        let symbolizer_path = resources.symbolizer()?;
        for name in ["ubsan", "lsan", "tsan"] {
            if resources
                .suppressions_dir()
                .join(suppressions_filename(name))
                .exists()
            {
                resources.suppressions(name)?;
            }
        }
        Ok(Self::new(symbolizer_path, resources.suppressions_dir()))
    }

    pub fn symbolizer_path(&self) -> &Path {
        &self.symbolizer_path
    }

    pub fn normalize(
        &self,
        base: &Environment,
        sanitizer: Sanitizer,
    ) -> Result<Environment, ReproError> {
        let env = self.normalize_sanitizers(base)?;
        let env = inject_display(env);
        Ok(self.inject_symbolizer(env, sanitizer))
    }

    /// Rewrites every `*_OPTIONS` variable for local symbolization.
    pub fn normalize_sanitizers(&self, base: &Environment) -> Result<Environment, ReproError> {
        let mut env = base.clone();
        for (variable, value) in env.iter_mut() {
            if !variable.contains(OPTIONS_MARKER) {
                continue;
            }
            let mut options = SanitizerOptions::parse(value)?;

            if options.contains(EXTERNAL_SYMBOLIZER_OPTION) {
                options.set(
                    EXTERNAL_SYMBOLIZER_OPTION,
                    self.symbolizer_path.to_string_lossy(),
                );
            }
            options.remove(COVERAGE_DIR_OPTION);
            if options.contains(SUPPRESSIONS_OPTION) {
                // Variables without a bundled list keep their original value.
                if let Some(name) = suppressions_name(variable) {
                    options.set(
                        SUPPRESSIONS_OPTION,
                        self.suppressions_path(name).to_string_lossy(),
                    );
                }
            }

            let normalized = options.serialize();
            debug!(%variable, from = %value, to = %normalized, "Normalized sanitizer options");
            *value = normalized;
        }
        Ok(env)
    }

    pub fn inject_symbolizer(&self, mut env: Environment, sanitizer: Sanitizer) -> Environment {
        env.insert(
            sanitizer.symbolizer_variable(),
            self.symbolizer_path.to_string_lossy().into_owned(),
        );
        env
    }

    pub fn suppressions_path(&self, name: &str) -> PathBuf {
        self.suppressions_dir.join(suppressions_filename(name))
    }
}

pub fn inject_display(mut env: Environment) -> Environment {
    env.insert("DISPLAY".to_string(), DEFAULT_DISPLAY.to_string());
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalizer() -> EnvironmentNormalizer {
        EnvironmentNormalizer::new(
            "/fake/resources/llvm-symbolizer",
            "/fake/resources/suppressions",
        )
    }

    fn env(pairs: &[(&str, &str)]) -> Environment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn options_of(env: &Environment, key: &str) -> BTreeMap<String, String> {
        SanitizerOptions::parse(&env[key])
            .unwrap()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sets_up_symbolizers_and_suppressions() {
        let base = env(&[
            (
                "UBSAN_OPTIONS",
                "external_symbolizer_path=/not/correct/path:other_option=1:\
                 suppressions=/not/correct/path:coverage_dir=test",
            ),
            ("LSAN_OPTIONS", "other=0:suppressions=not/correct/path:option=1"),
        ]);
        let result = normalizer().normalize(&base, Sanitizer::Ubsan).unwrap();

        assert_eq!(result.len(), 4);
        assert_eq!(result["UBSAN_SYMBOLIZER_PATH"], "/fake/resources/llvm-symbolizer");
        assert_eq!(result["DISPLAY"], ":0.0");

        let ubsan = options_of(&result, "UBSAN_OPTIONS");
        assert_eq!(ubsan.len(), 3);
        assert_eq!(ubsan["external_symbolizer_path"], "/fake/resources/llvm-symbolizer");
        assert_eq!(ubsan["other_option"], "1");
        assert_eq!(
            ubsan["suppressions"],
            "/fake/resources/suppressions/ubsan_suppressions.txt"
        );

        let lsan = options_of(&result, "LSAN_OPTIONS");
        assert_eq!(lsan["other"], "0");
        assert_eq!(lsan["option"], "1");
        assert_eq!(
            lsan["suppressions"],
            "/fake/resources/suppressions/lsan_suppressions.txt"
        );
    }

    #[test]
    fn unknown_suppressions_variable_is_left_alone() {
        let base = env(&[("ASAN_OPTIONS", "suppressions=/bot/asan.txt:coverage_dir=/x")]);
        let result = normalizer().normalize_sanitizers(&base).unwrap();
        assert_eq!(result["ASAN_OPTIONS"], "suppressions=/bot/asan.txt");
    }

    #[test]
    fn non_option_variables_pass_through() {
        let base = env(&[("CHROME_HEADLESS", "1"), ("DISPLAY", ":5")]);
        let result = normalizer().normalize(&base, Sanitizer::Asan).unwrap();
        assert_eq!(result["CHROME_HEADLESS"], "1");
        assert_eq!(result["DISPLAY"], DEFAULT_DISPLAY);
        assert!(result.contains_key("ASAN_SYMBOLIZER_PATH"));
    }

    #[test]
    fn malformed_options_fail_setup() {
        let base = env(&[("ASAN_OPTIONS", "symbolize=1:oops")]);
        assert!(matches!(
            normalizer().normalize(&base, Sanitizer::Asan),
            Err(ReproError::SanitizerOptions { .. })
        ));
    }

    #[test]
    fn stages_do_not_mutate_their_input() {
        let base = env(&[("UBSAN_OPTIONS", "coverage_dir=/x:symbolize=1")]);
        let before = base.clone();
        let _ = normalizer().normalize(&base, Sanitizer::Ubsan).unwrap();
        assert_eq!(base, before);
    }

    #[test]
    fn normalization_is_idempotent() {
        let base = env(&[
            (
                "UBSAN_OPTIONS",
                "external_symbolizer_path=/a:suppressions=/b:coverage_dir=/c:halt_on_error=1",
            ),
            ("TSAN_OPTIONS", "suppressions=/t"),
        ]);
        let n = normalizer();
        let once = n.normalize(&base, Sanitizer::Tsan).unwrap();
        let twice = n.normalize(&once, Sanitizer::Tsan).unwrap();
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent_for_arbitrary_options(
            keys in prop::collection::vec(
                prop::sample::select(vec![
                    "external_symbolizer_path", "coverage_dir", "suppressions",
                    "symbolize", "detect_leaks", "halt_on_error",
                ]),
                0..6,
            ),
            variable in prop::sample::select(vec![
                "ASAN_OPTIONS", "UBSAN_OPTIONS", "LSAN_OPTIONS", "TSAN_OPTIONS", "MSAN_OPTIONS",
            ]),
        ) {
            let value = keys
                .iter()
                .enumerate()
                .map(|(i, k)| format!("{k}=v{i}"))
                .collect::<Vec<_>>()
                .join(":");
            let base = env(&[(variable, value.as_str()), ("OTHER", "x")]);
            let n = normalizer();
            let once = n.normalize(&base, Sanitizer::Asan).unwrap();
            let twice = n.normalize(&once, Sanitizer::Asan).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
