//! # execleak-foundation
//!
//! Foundation layer for execleak:
//! - Error: 에러 분류 (Pull, Engine, Io, Config)
//! - Config: 하네스 설정 (HarnessConfig, ProbeSource)

pub mod config;
pub mod error;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{HarnessConfig, ProbeSource, DEFAULT_READER_PREFIX};
