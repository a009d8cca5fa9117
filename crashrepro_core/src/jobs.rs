use crate::error::ReproError;
use crate::sanitizer::Sanitizer;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Reproduction behaviour selected by the job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproducerKind {
    Base,
    LinuxChrome,
    Libfuzzer,
}

/// Which checkout builds the binary for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Builder {
    Pdfium,
    V8,
    Chromium,
    MsanChromium,
    CfiChromium,
    LibfuzzerMsan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Download,
    Chromium,
    Standalone,
}

impl FromStr for BuildMode {
    type Err = ReproError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(BuildMode::Download),
            "chromium" => Ok(BuildMode::Chromium),
            "standalone" => Ok(BuildMode::Standalone),
            other => Err(ReproError::Config(format!("unknown build mode {other:?}"))),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildMode::Download => "download",
            BuildMode::Chromium => "chromium",
            BuildMode::Standalone => "standalone",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDefinition {
    pub job_type: &'static str,
    pub builder: Builder,
    /// Environment variable naming the source checkout, e.g. `CHROMIUM_SRC`.
    pub source_var: &'static str,
    pub reproducer: ReproducerKind,
    /// `None` means the name comes from the testcase's recorded command.
    pub binary_name: Option<&'static str>,
    pub sanitizer: &'static str,
    pub require_user_data_dir: bool,
    pub target: Option<&'static str>,
}

impl JobDefinition {
    pub fn sanitizer(&self) -> Result<Sanitizer, ReproError> {
        if self.sanitizer.is_empty() {
            return Err(ReproError::SanitizerNotProvided);
        }
        self.sanitizer.parse()
    }

    /// Rejects definitions the reproducer cannot act on.
    pub fn validate(&self) -> Result<(), ReproError> {
        let malformed = self.source_var.is_empty()
            || (self.reproducer == ReproducerKind::LinuxChrome && self.binary_name.is_none());
        if malformed {
            return Err(ReproError::BadJobTypeDefinition(self.job_type.to_string()));
        }
        self.sanitizer().map(|_| ())
    }
}

const fn standalone(
    job_type: &'static str,
    builder: Builder,
    source_var: &'static str,
    binary_name: &'static str,
    sanitizer: &'static str,
) -> JobDefinition {
    JobDefinition {
        job_type,
        builder,
        source_var,
        reproducer: ReproducerKind::Base,
        binary_name: Some(binary_name),
        sanitizer,
        require_user_data_dir: false,
        target: None,
    }
}

const fn libfuzzer(job_type: &'static str, builder: Builder, sanitizer: &'static str) -> JobDefinition {
    JobDefinition {
        job_type,
        builder,
        source_var: "CHROMIUM_SRC",
        reproducer: ReproducerKind::Libfuzzer,
        binary_name: None,
        sanitizer,
        require_user_data_dir: false,
        target: None,
    }
}

const fn linux_chrome(job_type: &'static str, builder: Builder, sanitizer: &'static str) -> JobDefinition {
    JobDefinition {
        job_type,
        builder,
        source_var: "CHROMIUM_SRC",
        reproducer: ReproducerKind::LinuxChrome,
        binary_name: Some("chrome"),
        sanitizer,
        require_user_data_dir: true,
        target: Some("chromium_builder_asan"),
    }
}

pub static STANDALONE_JOBS: &[JobDefinition] = &[
    standalone("linux_asan_pdfium", Builder::Pdfium, "PDFIUM_SRC", "pdfium_test", "ASAN"),
    standalone("linux_msan_pdfium", Builder::Pdfium, "PDFIUM_SRC", "pdfium_test", "MSAN"),
    standalone("linux_asan_d8_dbg", Builder::V8, "V8_SRC", "d8", "ASAN"),
    standalone("linux_asan_d8", Builder::V8, "V8_SRC", "d8", "ASAN"),
    standalone("linux_asan_d8_v8_mipsel_db", Builder::V8, "V8_SRC", "d8", "ASAN"),
    standalone("linux_v8_d8_tot", Builder::V8, "V8_SRC", "d8", "ASAN"),
];

pub static CHROMIUM_JOBS: &[JobDefinition] = &[
    standalone("linux_asan_pdfium", Builder::Chromium, "CHROMIUM_SRC", "pdfium_test", "ASAN"),
    standalone("linux_msan_pdfium", Builder::Chromium, "CHROMIUM_SRC", "pdfium_test", "MSAN"),
    libfuzzer("libfuzzer_chrome_asan", Builder::Chromium, "ASAN"),
    libfuzzer("libfuzzer_chrome_asan_debug", Builder::Chromium, "ASAN"),
    libfuzzer("libfuzzer_chrome_msan", Builder::LibfuzzerMsan, "MSAN"),
    libfuzzer("libfuzzer_chrome_ubsan", Builder::Chromium, "UBSAN"),
    linux_chrome("linux_ubsan_chrome", Builder::Chromium, "UBSAN"),
    linux_chrome("linux_msan_chrome", Builder::MsanChromium, "MSAN"),
    linux_chrome("linux_asan_chrome_mp", Builder::Chromium, "ASAN"),
    linux_chrome("linux_asan_chrome_chromeos", Builder::Chromium, "ASAN"),
    linux_chrome("linux_asan_chrome_media", Builder::Chromium, "ASAN"),
    linux_chrome("linux_cfi_chrome", Builder::CfiChromium, "ASAN"),
    linux_chrome("linux_asan_chrome_gpu", Builder::Chromium, "ASAN"),
];

fn find(table: &'static [JobDefinition], job_type: &str) -> Option<&'static JobDefinition> {
    table.iter().find(|definition| definition.job_type == job_type)
}

/// Finds the definition for `job_type`. Downloaded builds accept jobs from
/// either table, preferring Chromium.
pub fn lookup(job_type: &str, mode: BuildMode) -> Result<&'static JobDefinition, ReproError> {
    let found = match mode {
        BuildMode::Download => find(CHROMIUM_JOBS, job_type).or_else(|| find(STANDALONE_JOBS, job_type)),
        BuildMode::Chromium => find(CHROMIUM_JOBS, job_type),
        BuildMode::Standalone => find(STANDALONE_JOBS, job_type),
    };
    let definition = found.ok_or_else(|| ReproError::JobTypeNotSupported(job_type.to_string()))?;
    definition.validate()?;
    Ok(definition)
}

/// Job types per build mode, as printed by `supported-job-types`.
pub fn supported_job_types() -> serde_json::Value {
    let names = |table: &[JobDefinition]| table.iter().map(|d| d.job_type).collect::<Vec<_>>();
    serde_json::json!({
        "chromium": names(CHROMIUM_JOBS),
        "standalone": names(STANDALONE_JOBS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_prefers_chromium_definition() {
        let def = lookup("linux_asan_pdfium", BuildMode::Download).unwrap();
        assert_eq!(def.builder, Builder::Chromium);
        let def = lookup("linux_asan_d8", BuildMode::Download).unwrap();
        assert_eq!(def.builder, Builder::V8);
    }

    #[test]
    fn build_mode_restricts_table() {
        assert!(lookup("linux_asan_d8", BuildMode::Standalone).is_ok());
        assert!(matches!(
            lookup("linux_asan_d8", BuildMode::Chromium),
            Err(ReproError::JobTypeNotSupported(job)) if job == "linux_asan_d8"
        ));
        assert!(lookup("windows_asan_chrome", BuildMode::Download).is_err());
    }

    #[test]
    fn chrome_jobs_use_linux_chrome_reproducer() {
        let def = lookup("linux_msan_chrome", BuildMode::Chromium).unwrap();
        assert_eq!(def.reproducer, ReproducerKind::LinuxChrome);
        assert!(def.require_user_data_dir);
        assert_eq!(def.binary_name, Some("chrome"));
        assert_eq!(def.sanitizer().unwrap(), Sanitizer::Msan);
    }

    #[test]
    fn libfuzzer_jobs_take_binary_from_testcase() {
        let def = lookup("libfuzzer_chrome_ubsan", BuildMode::Download).unwrap();
        assert_eq!(def.reproducer, ReproducerKind::Libfuzzer);
        assert_eq!(def.binary_name, None);
        assert_eq!(def.sanitizer().unwrap(), Sanitizer::Ubsan);
    }

    #[test]
    fn every_definition_names_a_sanitizer() {
        for def in STANDALONE_JOBS.iter().chain(CHROMIUM_JOBS) {
            assert!(def.sanitizer().is_ok(), "{} has no sanitizer", def.job_type);
        }
        let broken = JobDefinition {
            sanitizer: "",
            ..STANDALONE_JOBS[0].clone()
        };
        assert!(matches!(broken.sanitizer(), Err(ReproError::SanitizerNotProvided)));
        assert!(matches!(broken.validate(), Err(ReproError::SanitizerNotProvided)));
    }

    #[test]
    fn chrome_definition_without_binary_is_malformed() {
        let broken = JobDefinition {
            binary_name: None,
            ..CHROMIUM_JOBS[6].clone()
        };
        assert!(matches!(
            broken.validate(),
            Err(ReproError::BadJobTypeDefinition(job)) if job == "linux_ubsan_chrome"
        ));
    }

    #[test]
    fn supported_job_types_lists_both_tables() {
        let json = supported_job_types();
        assert_eq!(json["standalone"].as_array().unwrap().len(), STANDALONE_JOBS.len());
        assert_eq!(json["chromium"][2], "libfuzzer_chrome_asan");
    }

    #[test]
    fn build_mode_parses() {
        assert_eq!("download".parse::<BuildMode>().unwrap(), BuildMode::Download);
        assert!("ninja".parse::<BuildMode>().is_err());
        assert_eq!(BuildMode::Standalone.to_string(), "standalone");
    }
}
