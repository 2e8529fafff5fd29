//! 에러 처리
//!
//! ## 지원하는 에러 상황
//! - 설치 디렉터리 중복 (설정/데이터 불일치, 재시도 불가)
//! - 릴리즈 피드 접근 실패 / 타임아웃 / 다운로드 미완료
//! - 패키지 압축 해제 실패
//! - 파일 시스템 오류 (권한, 디스크)

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 업데이터 에러 타입
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// 버전 패턴에 맞는 설치 디렉터리가 두 개 이상
    #[error("Multiple installation directories found: {}", .candidates.join(", "))]
    ConfigInconsistency { candidates: Vec<String> },

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("Archive '{}' is corrupt: {message}", .path.display())]
    ArchiveCorrupt { path: PathBuf, message: String },

    #[error("'{}' does not exist", .path.display())]
    NotFound { path: PathBuf },

    #[error("File system error during {operation} on '{}': {source}", .path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UpdaterError {
    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: io::Error, operation: &str, path: &Path) -> Self {
        UpdaterError::Io {
            operation: operation.to_string(),
            path: path.to_path_buf(),
            source: err,
        }
    }

    pub fn corrupt(path: &Path, message: impl ToString) -> Self {
        UpdaterError::ArchiveCorrupt {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    /// 전체 실행을 다시 돌려서 복구 가능한 에러인지 확인
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdaterError::ConfigInconsistency { .. } => false,
            UpdaterError::Retrieval(_) => true,
            // 재다운로드로 복구 가능
            UpdaterError::ArchiveCorrupt { .. } => true,
            UpdaterError::NotFound { .. } => false,
            UpdaterError::Io { .. } => false,
        }
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            UpdaterError::ConfigInconsistency { .. } => FailureCategory::ConfigInconsistency,
            UpdaterError::Retrieval(_) => FailureCategory::Retrieval,
            UpdaterError::ArchiveCorrupt { .. } => FailureCategory::ArchiveCorrupt,
            UpdaterError::NotFound { .. } | UpdaterError::Io { .. } => FailureCategory::Io,
        }
    }

    /// 사용자에게 표시할 메시지
    pub fn user_message(&self) -> String {
        match self {
            UpdaterError::ConfigInconsistency { .. } => {
                "More than one server directory was found. Keep exactly one and run again.".to_string()
            }
            UpdaterError::Retrieval(RetrievalError::NotFound { prefix }) => {
                format!("No release starting with '{}' was found on the feed.", prefix)
            }
            UpdaterError::Retrieval(RetrievalError::InvalidRelease { name }) => {
                format!("The feed listed an unusable release name '{}'. Nothing was downloaded.", name)
            }
            UpdaterError::Retrieval(_) => {
                "Could not fetch the new server files. Check the connection and run again.".to_string()
            }
            UpdaterError::ArchiveCorrupt { .. } => {
                "The downloaded package is damaged. Delete it and run again.".to_string()
            }
            UpdaterError::NotFound { path } => {
                format!("'{}' could not be found.", path.display())
            }
            UpdaterError::Io { .. } => {
                "A file could not be written. Check permissions and free disk space.".to_string()
            }
        }
    }
}

/// 릴리즈 피드 / 다운로드 세션 에러
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum RetrievalError {
    /// 접두사에 맞는 릴리즈가 없음
    #[error("No release entry starting with '{prefix}' found")]
    NotFound { prefix: String },

    #[error("Timeout after {duration_secs}s: {operation}")]
    Timeout { operation: String, duration_secs: u64 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("HTTP error ({status_code}) for {url}")]
    Http { status_code: u16, url: String },

    #[error("Retrieval session error: {message}")]
    Session { message: String },

    /// 릴리즈 이름을 파일 이름으로 쓸 수 없음 (경로 구분자, `..` 등)
    #[error("Release name '{name}' is not a plain file name")]
    InvalidRelease { name: String },

    /// 다운로드가 제한 시간 내에 완료되지 않음
    #[error("Download of '{file_name}' did not complete within {duration_secs}s")]
    DownloadTimeout { file_name: String, duration_secs: u64 },
}

impl RetrievalError {
    /// reqwest 에러를 RetrievalError로 변환
    pub fn from_reqwest(err: &reqwest::Error, operation: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            RetrievalError::Timeout {
                operation: operation.to_string(),
                duration_secs: timeout_secs,
            }
        } else if let Some(status) = err.status() {
            RetrievalError::Http {
                status_code: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            RetrievalError::Network {
                message: err.to_string(),
            }
        }
    }
}

/// 실패 분류 (리포트/종료 코드용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ConfigInconsistency,
    Retrieval,
    ArchiveCorrupt,
    Io,
}

/// 권한 계열 IO 에러인지 확인: 백업 병합에서 치명적 에러로 취급
pub fn is_permission_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
}
