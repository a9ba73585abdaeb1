//! Config - 하네스 설정 관리
//!
//! - `harness.rs` - HarnessConfig (이미지, 명령어, 대기 시간, 프로브)

mod harness;

pub use harness::{HarnessConfig, ProbeSource, CONFIG_DIR, CONFIG_FILE, DEFAULT_READER_PREFIX};
