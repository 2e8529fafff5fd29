//! # server-files 업데이터 라이브러리
//!
//! 작업 디렉터리의 서버 파일 설치본(`Server-Files-<major>.<minor>`) 버전을
//! 원격 릴리즈 피드와 비교하고, 새 패키지를 받아 압축 해제한 뒤
//! 사용자 데이터(설정, 화이트리스트/밴 목록, 세이브 폴더)를 옮기고
//! 이전 설치본을 zip으로 보관합니다.
//!
//! ## 동작 순서
//! 1. **버전 확인** (`locator.rs`): 현재 설치본 탐색. 2개 이상이면 즉시 중단
//! 2. **다운로드** (`feed.rs`, `monitor.rs`): 최신 릴리즈 조회, 다운로드 시작, 완료 대기
//! 3. **압축 해제** (`archive.rs`): 패키지를 `<패키지 이름>/` 디렉터리로 해제
//! 4. **데이터 이전** (`backup.rs`): 설정된 파일/폴더를 새 설치본으로 복사
//! 5. **보관** (`archive.rs`): 이전 설치본을 `<이름>.zip`으로 압축, 받은 패키지 삭제
//!
//! 전체 순서와 실패 처리는 `orchestrator.rs`의 [`UpdateOrchestrator`]가 담당합니다.
//!
//! ## 설정 예시 (`config/updater.toml`)
//! ```toml
//! work_dir = "."
//! feed_url = "https://www.curseforge.com/minecraft/modpacks/all-the-mods-10/files/all?page=1&pageSize=10"
//! release_prefix = "Server-Files"
//! download_timeout_secs = 300
//! baseline_policy = "allow_fresh_install"
//! retire_old_installation = "keep"
//!
//! [backup_items]
//! "server.properties" = { type = "file" }
//! journeymap = { type = "folder" }
//! ```

// ══════════════════════════════════════════════════════
// 모듈
// ══════════════════════════════════════════════════════

pub mod archive;
pub mod backup;
pub mod error;
pub mod feed;
pub mod locator;
pub mod monitor;
pub mod orchestrator;
pub mod version;


// Re-exports for convenience
pub use backup::{BackupItemSpec, BackupItems, BackupKind, MergeOutcome, MergeReport};
pub use error::{FailureCategory, RetrievalError, UpdaterError};
pub use feed::{HttpRetrievalClient, ReleaseCandidate, RetrievalClient};
pub use locator::{Installation, VersionLocator};
pub use monitor::{DownloadMonitor, DownloadPhase};
pub use orchestrator::{
    CheckReport, FailedStep, FailureReason, SessionGuard, TransactionState, UpdateOrchestrator,
    UpdateOutcome, UpdateReport, UpdateStep,
};
pub use version::ReleaseVersion;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 패키지와 보관 아카이브의 확장자
pub const ARCHIVE_EXTENSION: &str = "zip";

pub const DEFAULT_RELEASE_PREFIX: &str = "Server-Files";

pub const DEFAULT_FEED_URL: &str =
    "https://www.curseforge.com/minecraft/modpacks/all-the-mods-10/files/all?page=1&pageSize=10";

pub const DEFAULT_DOWNLOAD_BASE_URL: &str =
    "https://www.curseforge.com/minecraft/modpacks/all-the-mods-10/download";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 브라우저별 다운로드 진행 중 표시 확장자 (Chrome: crdownload, Firefox: part)
pub fn default_in_progress_markers() -> Vec<String> {
    vec!["crdownload".to_string(), "part".to_string()]
}

/// 업데이트 간 유지되는 기본 항목
pub fn default_backup_items() -> BackupItems {
    [
        ("server.properties", BackupItemSpec::FILE),
        ("ops.json", BackupItemSpec::FILE),
        ("whitelist.json", BackupItemSpec::FILE),
        ("journeymap", BackupItemSpec::FOLDER),
        ("fluffyworld", BackupItemSpec::FOLDER),
        ("eula.txt", BackupItemSpec::FILE),
        ("user_jvm_args.txt", BackupItemSpec::FILE),
        ("banned-ips.json", BackupItemSpec::FILE),
        ("banned-players.json", BackupItemSpec::FILE),
        ("servericon.png", BackupItemSpec::FILE),
    ]
    .into_iter()
    .map(|(name, spec)| (name.to_string(), spec))
    .collect()
}

/// 기존 설치본이 없을 때의 처리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselinePolicy {
    /// 신규 설치로 진행
    #[default]
    AllowFreshInstall,
    /// "no baseline"으로 보고하고 중단 (에러 아님)
    RequireExisting,
}

/// 보관 후 이전 설치 디렉터리 처리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetirePolicy {
    #[default]
    Keep,
    /// 아카이브 생성에 성공한 경우에만 삭제
    Delete,
}

/// 업데이트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// 설치본을 찾고 압축 해제하는 작업 디렉터리
    pub work_dir: PathBuf,
    /// 다운로드 디렉터리 (None이면 work_dir)
    pub download_dir: Option<PathBuf>,
    pub feed_url: String,
    pub download_base_url: String,
    /// 릴리즈/설치 디렉터리 이름 접두사
    pub release_prefix: String,
    pub user_agent: String,
    pub page_load_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub in_progress_markers: Vec<String>,
    pub baseline_policy: BaselinePolicy,
    pub retire_old_installation: RetirePolicy,
    pub backup_items: BackupItems,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            download_dir: None,
            feed_url: DEFAULT_FEED_URL.to_string(),
            download_base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
            release_prefix: DEFAULT_RELEASE_PREFIX.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_load_timeout_secs: 60,
            download_timeout_secs: 300,
            poll_interval_ms: 1000,
            in_progress_markers: default_in_progress_markers(),
            baseline_policy: BaselinePolicy::default(),
            retire_old_installation: RetirePolicy::default(),
            backup_items: default_backup_items(),
        }
    }
}

impl UpdateConfig {
    /// TOML 문자열에서 설정 로드 (없는 키는 기본값)
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| self.work_dir.clone())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn monitor(&self) -> DownloadMonitor {
        DownloadMonitor::new(self.download_dir())
            .with_poll_interval(self.poll_interval())
            .with_markers(self.in_progress_markers.clone())
    }

    pub fn locator(&self) -> VersionLocator {
        VersionLocator::new(&self.work_dir, &self.release_prefix)
    }
}
