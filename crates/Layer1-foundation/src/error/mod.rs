//! Error types for execleak
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// execleak 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 이미지 Pull 관련
    // ========================================================================
    #[error("Pull failed: {0}")]
    Pull(String),

    #[error("Pull was canceled")]
    PullCanceled,

    // ========================================================================
    // 컨테이너 엔진 관련
    // ========================================================================
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Container is not running: {0}")]
    ContainerNotRunning(String),

    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Interrupted")]
    Interrupted,

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 실행 전체를 중단해야 하는 에러인지 확인
    ///
    /// I/O errors raised while closing a stream and interrupts are handled
    /// locally by the orchestrator.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Interrupted)
    }

    /// 프로세스 종료 코드
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            Error::Interrupted => 130,
            _ => 1,
        }
    }

    /// Engine 에러 생성 헬퍼
    pub fn engine(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Engine(format!("{}: {}", context, err))
    }
}
