//! Client for the crash-report service.
//!
//! Every request carries the stored `Authorization` header. The service may
//! hand back a refreshed header in [`AUTH_HEADER_RESPONSE`], which replaces the
//! stored one. Obtaining the first header (the OAuth flow) happens elsewhere.

use crate::error::ReproError;
use crate::signature::CrashSignature;
use crate::stacktrace::{ParseStacktraceRequest, ParseStacktraceResponse, StacktraceParser};
use crate::testcase::Testcase;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_DISPOSITION};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const AUTH_HEADER_RESPONSE: &str = "x-clusterfuzz-authorization";
pub const USER_AGENT: &str = "clusterfuzz-tools";

const TESTCASE_INFO_PATH: &str = "/v2/testcase-detail/refresh";
const TESTCASE_DOWNLOAD_PATH: &str = "/v2/testcase-detail/download-testcase";
const PARSE_STACKTRACE_PATH: &str = "/v2/parse_stacktrace";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const AUTH_FILE_MODE: u32 = 0o600;

/// The locally persisted `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthHeaderStore {
    path: PathBuf,
}

impl AuthHeaderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the header, refusing files that group or others can access.
    pub fn load(&self) -> Result<Option<String>, ReproError> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let mode = fs::metadata(&self.path)?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(ReproError::PermissionsTooPermissive {
                path: self.path.clone(),
                mode: mode & 0o777,
            });
        }
        let header = fs::read_to_string(&self.path)?.trim().to_string();
        Ok((!header.is_empty()).then_some(header))
    }

    pub fn store(&self, header: &str) -> Result<(), ReproError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(AUTH_FILE_MODE)
            .open(&self.path)?;
        // `mode` only applies on creation.
        file.set_permissions(fs::Permissions::from_mode(AUTH_FILE_MODE))?;
        file.write_all(header.as_bytes())?;
        debug!(path = %self.path.display(), "Stored auth header");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestcaseInfoRequest<'a> {
    testcase_id: &'a str,
}

pub struct ServiceClient {
    base_url: String,
    http: Client,
    auth: AuthHeaderStore,
}

impl ServiceClient {
    pub fn new(base_url: &str, auth: AuthHeaderStore) -> Result<Self, ReproError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReproError::Service(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, ReproError> {
        let header = self.auth.load()?.ok_or_else(|| ReproError::ClusterfuzzAuth {
            response: format!(
                "No stored authorization header at {}",
                self.auth.path().display()
            ),
        })?;
        let response = request.header(AUTHORIZATION, header).send()?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ReproError::ClusterfuzzAuth {
                    response: response.text().unwrap_or_default(),
                });
            }
            status => {
                return Err(ReproError::Service(format!(
                    "HTTP {status}: {}",
                    response.text().unwrap_or_default()
                )));
            }
        }

        if let Some(refreshed) = response
            .headers()
            .get(AUTH_HEADER_RESPONSE)
            .and_then(|v| v.to_str().ok())
        {
            self.auth.store(refreshed)?;
        }
        Ok(response)
    }

    /// Fetches the testcase record.
    pub fn testcase_info(&self, testcase_id: &str) -> Result<Testcase, ReproError> {
        info!(testcase_id, "Downloading testcase information");
        let response = self.send(
            self.http
                .post(self.url(TESTCASE_INFO_PATH))
                .json(&TestcaseInfoRequest { testcase_id }),
        )?;
        Testcase::from_json(&response.text()?)
    }

    /// Saves the testcase file into `dir` under the name the service
    /// announces, falling back to `testcase`.
    pub fn download_testcase(&self, testcase_id: u64, dir: &Path) -> Result<PathBuf, ReproError> {
        info!(testcase_id, dir = %dir.display(), "Downloading testcase data");
        let response = self.send(
            self.http
                .get(self.url(TESTCASE_DOWNLOAD_PATH))
                .query(&[("id", testcase_id.to_string())]),
        )?;
        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| "testcase".to_string());
        let path = dir.join(filename);
        fs::write(&path, response.bytes()?)?;
        Ok(path)
    }

    pub fn parse_stacktrace(
        &self,
        job_type: &str,
        stacktrace: &str,
    ) -> Result<CrashSignature, ReproError> {
        let response = self.send(
            self.http
                .post(self.url(PARSE_STACKTRACE_PATH))
                .json(&ParseStacktraceRequest {
                    job: job_type,
                    stacktrace,
                }),
        )?;
        let parsed: ParseStacktraceResponse = response.json()?;
        Ok(parsed.into_signature())
    }
}

impl StacktraceParser for ServiceClient {
    fn parse(&self, job_type: &str, stacktrace: &str) -> Result<CrashSignature, ReproError> {
        self.parse_stacktrace(job_type, stacktrace)
    }
}

/// Extracts a bare file name from a `Content-Disposition` value.
pub fn content_disposition_filename(value: &str) -> Option<String> {
    let raw = value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?;
    let name = raw.trim_matches('"');
    let name = Path::new(name).file_name()?.to_string_lossy().into_owned();
    (!name.is_empty()).then_some(name)
}
