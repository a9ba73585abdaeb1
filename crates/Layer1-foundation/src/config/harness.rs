//! Harness Configuration - 재현 실행 설정
//!
//! 이미지, 명령어, 시행 횟수, 대기 시간, 프로브 소스를 설정합니다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const CONFIG_FILE: &str = "config.toml";

/// 설정 디렉토리명
pub const CONFIG_DIR: &str = "execleak";

/// Name prefix marking a background stream-reader thread
pub const DEFAULT_READER_PREFIX: &str = "stream-reader-";

/// Bytes of a thread name the Linux kernel keeps in `comm`
pub const MAX_THREAD_NAME_LEN: usize = 15;

/// Where the leak probe takes its census from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeSource {
    /// In-process registry of reader threads spawned by the harness
    #[default]
    Registry,
    /// `/proc/self/task/*/comm` (Linux only)
    Proc,
}

impl std::str::FromStr for ProbeSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "registry" => Ok(Self::Registry),
            "proc" => Ok(Self::Proc),
            other => Err(Error::Config(format!("unknown probe source '{}'", other))),
        }
    }
}

/// 재현 하네스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Image the long-running container is created from
    pub image: String,
    /// Main process of the container
    pub container_command: Vec<String>,
    /// Trials per run
    pub trials: u32,
    /// Wait after starting an exec before closing it
    pub settle_secs: u64,
    /// Wait after closing before probing
    pub drain_secs: u64,
    /// Command that never writes output
    pub silent_command: Vec<String>,
    /// Command that writes output periodically (control case)
    pub periodic_command: Vec<String>,
    /// TTY mode for exec create and start
    pub tty: bool,
    /// Copy this process's stdin into the exec's attached input
    pub forward_stdin: bool,
    pub probe_source: ProbeSource,
    pub reader_prefix: String,
    /// Grace period handed to the engine when stopping the container
    pub stop_timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            image: "alpine:3".to_string(),
            container_command: argv(&["tail", "-f", "/dev/null"]),
            trials: 10,
            settle_secs: 3,
            drain_secs: 2,
            silent_command: argv(&["tail", "-f", "/dev/null"]),
            periodic_command: argv(&["watch", "-n", "1", "date"]),
            tty: true,
            forward_stdin: false,
            probe_source: ProbeSource::default(),
            reader_prefix: DEFAULT_READER_PREFIX.to_string(),
            stop_timeout_secs: 5,
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl HarnessConfig {
    /// 기본 설정 파일 경로 (`<config_dir>/execleak/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// 설정 로드
    ///
    /// An explicit path must exist. Without one, the default path is used
    /// when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(p),
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::load_from(&p),
                _ => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// 파일에서 설정 로드
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded harness config");
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::Config("image must not be empty".into()));
        }
        if self.trials == 0 {
            return Err(Error::Config("trials must be at least 1".into()));
        }
        for (name, cmd) in [
            ("container_command", &self.container_command),
            ("silent_command", &self.silent_command),
            ("periodic_command", &self.periodic_command),
        ] {
            if cmd.is_empty() {
                return Err(Error::Config(format!("{} must not be empty", name)));
            }
        }
        if self.reader_prefix.is_empty() {
            return Err(Error::Config("reader_prefix must not be empty".into()));
        }
        if self.reader_prefix.contains('\0') {
            return Err(Error::Config("reader_prefix must not contain NUL".into()));
        }
        // /proc truncates names, so a longer prefix never matches
        if self.probe_source == ProbeSource::Proc && self.reader_prefix.len() > MAX_THREAD_NAME_LEN
        {
            return Err(Error::Config(format!(
                "reader_prefix '{}' is longer than {} bytes and cannot be seen through /proc",
                self.reader_prefix, MAX_THREAD_NAME_LEN
            )));
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
