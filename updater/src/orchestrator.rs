//! 업데이트 트랜잭션 상태 머신
//!
//! ```text
//! Init → VersionChecked → Fetched → Extracted → Merged → Archived → Done
//!          │                                                        ▲
//!          └──────────────── (최신 버전 / 기준 설치본 없음) ────────────┘
//! 모든 단계 → Failed (흡수 상태)
//! ```
//!
//! 조회 세션은 [`SessionGuard`]로 감싸 성공/실패/패닉/취소 모든 경로에서 해제됩니다.
//! 실패는 재시도하지 않고 [`FailureReason`]으로 보고합니다.

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive;
use crate::backup::{self, MergeReport};
use crate::error::{FailureCategory, RetrievalError, UpdaterError};
use crate::feed::{ReleaseCandidate, RetrievalClient};
use crate::locator::{Installation, VersionLocator};
use crate::monitor::DownloadMonitor;
use crate::{BaselinePolicy, RetirePolicy, UpdateConfig, ARCHIVE_EXTENSION};

// ═══════════════════════════════════════════════════════
// 상태
// ═══════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStep {
    #[default]
    Init,
    VersionChecked,
    Fetched,
    Extracted,
    Merged,
    Archived,
    Done,
    Failed,
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(UpdateStep, UpdateStep),
}

impl UpdateStep {
    pub fn can_transition(&self, to: &UpdateStep) -> bool {
        use UpdateStep::*;
        matches!(
            (self, to),
            (Init, VersionChecked)
                | (VersionChecked, Fetched)
                | (VersionChecked, Done)
                | (Fetched, Extracted)
                | (Extracted, Merged)
                | (Merged, Archived)
                | (Archived, Done)
                | (Init, Failed)
                | (VersionChecked, Failed)
                | (Fetched, Failed)
                | (Extracted, Failed)
                | (Merged, Failed)
                | (Archived, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateStep::Done | UpdateStep::Failed)
    }
}

/// 실패가 발생한 작업 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStep {
    VersionCheck,
    Fetch,
    Extract,
    Merge,
    Archive,
}

/// 한 번의 실행 동안의 트랜잭션 상태. 오케스트레이터 인스턴스 소유, 저장하지 않음.
#[derive(Debug, Clone, Default)]
pub struct TransactionState {
    pub current: Option<Installation>,
    pub candidate: Option<ReleaseCandidate>,
    /// 다운로드 완료된 패키지 경로
    pub release_zip: Option<PathBuf>,
    /// 압축 해제된 새 설치 디렉터리
    pub installed: Option<PathBuf>,
    pub step: UpdateStep,
}

impl TransactionState {
    pub fn transition(&mut self, to: UpdateStep) -> Result<(), TransitionError> {
        if self.step.can_transition(&to) {
            tracing::info!("[Updater] State transition: {:?} -> {:?}", self.step, to);
            self.step = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.step, to))
        }
    }
}

// ═══════════════════════════════════════════════════════
// 보고서
// ═══════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReason {
    pub step: FailedStep,
    pub category: FailureCategory,
    pub message: String,
    /// 사용자에게 보여줄 안내 문구
    pub hint: String,
    /// 다시 실행하면 복구될 수 있는지
    pub recoverable: bool,
}

impl FailureReason {
    fn new(step: FailedStep, err: &UpdaterError) -> Self {
        Self {
            step,
            category: err.category(),
            message: err.to_string(),
            hint: err.user_message(),
            recoverable: err.is_recoverable(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// 기존 설치본에서 업그레이드 완료
    Updated,
    FreshInstall,
    /// 업그레이드는 됐지만 이전 설치본 보관 실패
    UpdatedDegraded { archive_error: String },
    UpToDate,
    /// 기준 설치본이 없고 신규 설치가 허용되지 않음
    NoBaseline,
    Failed(FailureReason),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReport {
    #[serde(flatten)]
    pub outcome: UpdateOutcome,
    pub final_step: UpdateStep,
    pub current: Option<Installation>,
    pub candidate: Option<ReleaseCandidate>,
    pub installed: Option<PathBuf>,
    pub merge: Option<MergeReport>,
    pub archive_path: Option<PathBuf>,
    pub started_at: String,
    pub finished_at: String,
}

impl UpdateReport {
    pub fn success(&self) -> bool {
        !matches!(self.outcome, UpdateOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            UpdateOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// 0: 업데이트/신규 설치, 1: 실패, 2: 할 일 없음, 3: 보관 실패
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            UpdateOutcome::Updated | UpdateOutcome::FreshInstall => 0,
            UpdateOutcome::Failed(_) => 1,
            UpdateOutcome::UpToDate | UpdateOutcome::NoBaseline => 2,
            UpdateOutcome::UpdatedDegraded { .. } => 3,
        }
    }
}

/// `check()` 결과 (다운로드 없음)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub current: Option<Installation>,
    pub candidate: ReleaseCandidate,
    pub update_available: bool,
}

impl CheckReport {
    pub fn exit_code(&self) -> i32 {
        if self.update_available {
            0
        } else {
            2
        }
    }
}

// ═══════════════════════════════════════════════════════
// 세션 가드
// ═══════════════════════════════════════════════════════

/// 스코프를 벗어나면 조회 세션을 닫는다
pub struct SessionGuard<'a, C: RetrievalClient> {
    client: &'a mut C,
}

impl<'a, C: RetrievalClient> SessionGuard<'a, C> {
    pub fn new(client: &'a mut C) -> Self {
        Self { client }
    }
}

impl<C: RetrievalClient> Deref for SessionGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.client
    }
}

impl<C: RetrievalClient> DerefMut for SessionGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.client
    }
}

impl<C: RetrievalClient> Drop for SessionGuard<'_, C> {
    fn drop(&mut self) {
        self.client.close();
    }
}

// ═══════════════════════════════════════════════════════
// 오케스트레이터
// ═══════════════════════════════════════════════════════

enum FetchResult {
    UpToDate,
    Downloaded(PathBuf),
}

struct ArchiveResult {
    archive_path: Option<PathBuf>,
    archive_error: Option<String>,
}

struct StepFailure {
    step: FailedStep,
    error: UpdaterError,
}

impl StepFailure {
    fn at(step: FailedStep) -> impl FnOnce(UpdaterError) -> StepFailure {
        move |error| StepFailure { step, error }
    }
}

pub struct UpdateOrchestrator<C: RetrievalClient> {
    config: UpdateConfig,
    client: C,
    locator: VersionLocator,
    monitor: DownloadMonitor,
    state: TransactionState,
}

impl<C: RetrievalClient> UpdateOrchestrator<C> {
    pub fn new(config: UpdateConfig, client: C) -> Self {
        let locator = config.locator();
        let monitor = config.monitor();
        Self {
            config,
            client,
            locator,
            monitor,
            state: TransactionState::default(),
        }
    }

    pub fn with_locator(mut self, locator: VersionLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_monitor(mut self, monitor: DownloadMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// 업데이트 한 번 실행. 실패해도 패닉/에러 없이 보고서로 반환.
    pub async fn run(&mut self) -> UpdateReport {
        let started_at = chrono::Utc::now().to_rfc3339();
        self.state = TransactionState::default();
        tracing::info!("[Updater] Starting update in {}", self.config.work_dir.display());

        let mut merge = None;
        let mut archive_path = None;

        let outcome = match self.execute(&mut merge, &mut archive_path).await {
            Ok(outcome) => {
                self.enter(UpdateStep::Done);
                outcome
            }
            Err(StepFailure { step, error }) => {
                tracing::error!("[Updater] {:?} step failed: {}", step, error);
                self.enter(UpdateStep::Failed);
                UpdateOutcome::Failed(FailureReason::new(step, &error))
            }
        };

        match &outcome {
            UpdateOutcome::Updated | UpdateOutcome::FreshInstall => {
                tracing::info!("[Updater] Update complete")
            }
            UpdateOutcome::UpdatedDegraded { archive_error } => {
                tracing::warn!("[Updater] Update complete, old installation not archived: {}", archive_error)
            }
            UpdateOutcome::UpToDate => tracing::info!("[Updater] Already up to date"),
            UpdateOutcome::NoBaseline => {
                tracing::warn!("[Updater] No existing installation and fresh install is disabled")
            }
            UpdateOutcome::Failed(_) => {}
        }

        UpdateReport {
            outcome,
            final_step: self.state.step,
            current: self.state.current.clone(),
            candidate: self.state.candidate.clone(),
            installed: self.state.installed.clone(),
            merge,
            archive_path,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// 현재 설치본과 최신 릴리즈만 확인 (다운로드 없음)
    pub async fn check(&mut self) -> Result<CheckReport, UpdaterError> {
        let current = self.locator.locate_current_installation()?;

        let candidate = {
            let mut session = SessionGuard::new(&mut self.client);
            session.open().await?;
            session.fetch_latest_release(&self.config.feed_url).await?
        };

        let update_available = needs_update(current.as_ref(), &candidate, &self.config.release_prefix);
        tracing::info!(
            "[Updater] Current: {}, latest: {}, update available: {}",
            current.as_ref().map(|c| c.name.as_str()).unwrap_or("none"),
            candidate.name,
            update_available
        );

        Ok(CheckReport {
            current,
            candidate,
            update_available,
        })
    }

    async fn execute(
        &mut self,
        merge_out: &mut Option<MergeReport>,
        archive_out: &mut Option<PathBuf>,
    ) -> Result<UpdateOutcome, StepFailure> {
        // ── 1. 버전 확인 ──
        let current = self
            .locator
            .locate_current_installation()
            .map_err(StepFailure::at(FailedStep::VersionCheck))?;
        match &current {
            Some(installation) => {
                tracing::info!("[Updater] Current installation: {}", installation.name)
            }
            None => tracing::info!("[Updater] No existing installation found"),
        }
        self.state.current = current.clone();
        self.enter(UpdateStep::VersionChecked);

        if current.is_none() && self.config.baseline_policy == BaselinePolicy::RequireExisting {
            return Ok(UpdateOutcome::NoBaseline);
        }

        // ── 2. 조회 + 다운로드 ──
        let package = match self.fetch().await.map_err(StepFailure::at(FailedStep::Fetch))? {
            FetchResult::UpToDate => return Ok(UpdateOutcome::UpToDate),
            FetchResult::Downloaded(path) => path,
        };
        self.state.release_zip = Some(package.clone());
        self.enter(UpdateStep::Fetched);

        // ── 3. 압축 해제 ──
        let installed = self
            .extract(&package)
            .map_err(StepFailure::at(FailedStep::Extract))?;
        self.state.installed = Some(installed.clone());
        self.enter(UpdateStep::Extracted);

        // ── 4. 사용자 데이터 이전 ──
        if let Some(old) = &current {
            let report = backup::merge(&old.path, &installed, &self.config.backup_items)
                .map_err(StepFailure::at(FailedStep::Merge))?;
            for (item, message) in report.warnings() {
                tracing::warn!("[Updater] Backup item '{}' not carried over: {}", item, message);
            }
            *merge_out = Some(report);
        } else {
            tracing::info!("[Updater] Fresh install, nothing to carry over");
        }
        self.enter(UpdateStep::Merged);

        // ── 5. 보관 + 정리 ──
        let archived = self
            .archive(current.as_ref(), &package)
            .map_err(StepFailure::at(FailedStep::Archive))?;
        *archive_out = archived.archive_path;
        self.enter(UpdateStep::Archived);

        Ok(match (current, archived.archive_error) {
            (None, _) => UpdateOutcome::FreshInstall,
            (Some(_), Some(archive_error)) => UpdateOutcome::UpdatedDegraded { archive_error },
            (Some(_), None) => UpdateOutcome::Updated,
        })
    }

    async fn fetch(&mut self) -> Result<FetchResult, UpdaterError> {
        let mut session = SessionGuard::new(&mut self.client);
        session.open().await?;

        let candidate = session.fetch_latest_release(&self.config.feed_url).await?;
        self.state.candidate = Some(candidate.clone());
        // 이름이 다운로드/압축 해제 경로가 되므로 파일시스템을 건드리기 전에 확인
        if !candidate.has_plain_name() {
            return Err(RetrievalError::InvalidRelease { name: candidate.name }.into());
        }

        if let Some(current) = &self.state.current {
            if !needs_update(Some(current), &candidate, &self.config.release_prefix) {
                return Ok(FetchResult::UpToDate);
            }
        }

        let url = session.build_download_target(&candidate)?;
        let file_name = candidate.archive_name();
        let package = self.monitor.dir().join(&file_name);

        // 이전 실행에서 남은 같은 이름의 패키지를 완료된 다운로드로 오인하지 않도록
        if package.is_file() {
            tracing::info!("[Updater] Removing stale package {}", package.display());
            std::fs::remove_file(&package)
                .map_err(|e| UpdaterError::from_io(e, "remove stale package", &package))?;
        }

        session.begin_download(&url, &file_name).await?;

        let timeout = self.config.download_timeout();
        if !self.monitor.await_download(&file_name, timeout).await {
            return Err(RetrievalError::DownloadTimeout {
                file_name,
                duration_secs: timeout.as_secs(),
            }
            .into());
        }
        Ok(FetchResult::Downloaded(package))
    }

    fn extract(&self, package: &Path) -> Result<PathBuf, UpdaterError> {
        let stem = package
            .file_stem()
            .ok_or_else(|| UpdaterError::NotFound { path: package.to_path_buf() })?;
        let target = self.config.work_dir.join(stem);

        if target.exists() {
            return Err(UpdaterError::from_io(
                io::Error::new(io::ErrorKind::AlreadyExists, "target directory already exists"),
                "extract package",
                &target,
            ));
        }

        if let Err(e) = archive::extract(package, &target) {
            if target.exists() {
                tracing::warn!("[Updater] Removing partially extracted {}", target.display());
                if let Err(cleanup) = std::fs::remove_dir_all(&target) {
                    tracing::error!("[Updater] Cleanup of {} failed: {}", target.display(), cleanup);
                }
            }
            return Err(e);
        }
        Ok(target)
    }

    fn archive(&self, current: Option<&Installation>, package: &Path) -> Result<ArchiveResult, UpdaterError> {
        let mut result = ArchiveResult {
            archive_path: None,
            archive_error: None,
        };

        if let Some(old) = current {
            let archive_path = archive_destination(&old.path)?;
            match archive::compress_to(&old.path, &archive_path) {
                Ok(entries) => {
                    tracing::info!(
                        "[Updater] Archived {} ({} entries) -> {}",
                        old.name,
                        entries,
                        archive_path.display()
                    );
                    result.archive_path = Some(archive_path);
                }
                Err(e) => {
                    tracing::warn!("[Updater] Could not archive {}: {}", old.name, e);
                    result.archive_error = Some(e.to_string());
                }
            }
        }

        match std::fs::remove_file(package) {
            Ok(()) => tracing::info!("[Updater] Removed package {}", package.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(UpdaterError::from_io(e, "remove package", package)),
        }

        if let Some(old) = current {
            if self.config.retire_old_installation == RetirePolicy::Delete && result.archive_path.is_some() {
                std::fs::remove_dir_all(&old.path)
                    .map_err(|e| UpdaterError::from_io(e, "remove old installation", &old.path))?;
                tracing::info!("[Updater] Removed old installation {}", old.path.display());
            }
        }

        Ok(result)
    }

    fn enter(&mut self, to: UpdateStep) {
        if let Err(e) = self.state.transition(to) {
            tracing::error!("[Updater] {}", e);
        }
    }
}

/// 설치본 보관 경로. `<name>.zip`이 이미 있으면 `<name>-<YYYYmmddHHMMSS>.zip`.
pub fn archive_destination(installation: &Path) -> Result<PathBuf, UpdaterError> {
    let default = archive::default_archive_path(installation)?;
    if !default.exists() {
        return Ok(default);
    }
    let name = installation
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamped = installation.with_file_name(format!(
        "{}-{}.{}",
        name,
        chrono::Local::now().format("%Y%m%d%H%M%S"),
        ARCHIVE_EXTENSION
    ));
    tracing::info!(
        "[Updater] {} already exists, archiving to {}",
        default.display(),
        stamped.display()
    );
    Ok(stamped)
}

/// 후보가 현재 설치본보다 새 버전인지. 후보 버전을 해석할 수 없으면 이름이 다를 때 업데이트.
pub fn needs_update(current: Option<&Installation>, candidate: &ReleaseCandidate, prefix: &str) -> bool {
    let Some(current) = current else {
        return true;
    };
    match candidate.version(prefix) {
        Some(version) => version.is_newer_than(&current.version),
        None => {
            tracing::warn!("[Updater] Cannot parse a version from '{}'", candidate.name);
            candidate.name != current.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ReleaseVersion;

    #[test]
    fn valid_transitions() {
        let mut state = TransactionState::default();
        for step in [
            UpdateStep::VersionChecked,
            UpdateStep::Fetched,
            UpdateStep::Extracted,
            UpdateStep::Merged,
            UpdateStep::Archived,
            UpdateStep::Done,
        ] {
            assert!(state.transition(step).is_ok(), "-> {:?}", step);
        }
        assert!(state.step.is_terminal());
    }

    #[test]
    fn invalid_transitions() {
        let mut state = TransactionState::default();
        // Init에서 바로 Fetched로 갈 수 없음
        assert!(state.transition(UpdateStep::Fetched).is_err());
        assert!(state.transition(UpdateStep::Failed).is_ok());
        // Failed는 흡수 상태
        assert!(state.transition(UpdateStep::Init).is_err());
        assert!(state.transition(UpdateStep::Done).is_err());
        assert!(!UpdateStep::Done.can_transition(&UpdateStep::Failed));
        assert!(UpdateStep::VersionChecked.can_transition(&UpdateStep::Done));
        assert!(!UpdateStep::Fetched.can_transition(&UpdateStep::Done));
    }

    fn installation(name: &str, version: &str) -> Installation {
        Installation {
            name: name.to_string(),
            path: PathBuf::from(name),
            version: ReleaseVersion::parse(version).unwrap(),
        }
    }

    fn candidate(name: &str) -> ReleaseCandidate {
        ReleaseCandidate {
            name: name.to_string(),
            link: "/files/1".to_string(),
        }
    }

    #[test]
    fn update_decision() {
        let current = installation("Server-Files-1.3", "1.3");
        assert!(needs_update(None, &candidate("Server-Files-1.3"), "Server-Files"));
        assert!(needs_update(Some(&current), &candidate("Server-Files-1.4"), "Server-Files"));
        assert!(needs_update(Some(&current), &candidate("Server-Files-1.10"), "Server-Files"));
        assert!(!needs_update(Some(&current), &candidate("Server-Files-1.3"), "Server-Files"));
        assert!(!needs_update(Some(&current), &candidate("Server-Files-1.2"), "Server-Files"));
        // 버전 해석 불가 → 이름 비교
        assert!(needs_update(Some(&current), &candidate("Server-Files-1.4-hotfix"), "Server-Files"));
    }

    #[test]
    fn archive_destination_avoids_collision() {
        let dir = tempfile::TempDir::new().unwrap();
        let install = dir.path().join("Server-Files-1.3");
        std::fs::create_dir(&install).unwrap();

        let first = archive_destination(&install).unwrap();
        assert_eq!(first, dir.path().join("Server-Files-1.3.zip"));

        std::fs::write(&first, b"older archive").unwrap();
        let second = archive_destination(&install).unwrap();
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Server-Files-1.3-"), "{}", name);
        assert!(name.ends_with(".zip"));
        // Server-Files-1.3- + 14자리 타임스탬프 + .zip
        assert_eq!(name.len(), "Server-Files-1.3-".len() + 14 + ".zip".len());
    }

    #[test]
    fn exit_codes() {
        let report = |outcome| UpdateReport {
            outcome,
            final_step: UpdateStep::Done,
            current: None,
            candidate: None,
            installed: None,
            merge: None,
            archive_path: None,
            started_at: String::new(),
            finished_at: String::new(),
        };
        assert_eq!(report(UpdateOutcome::Updated).exit_code(), 0);
        assert_eq!(report(UpdateOutcome::FreshInstall).exit_code(), 0);
        assert_eq!(report(UpdateOutcome::UpToDate).exit_code(), 2);
        assert_eq!(report(UpdateOutcome::NoBaseline).exit_code(), 2);
        assert_eq!(
            report(UpdateOutcome::UpdatedDegraded { archive_error: "x".into() }).exit_code(),
            3
        );
        let failed = report(UpdateOutcome::Failed(FailureReason {
            step: FailedStep::Fetch,
            category: FailureCategory::Retrieval,
            message: "timeout".into(),
            hint: "run again".into(),
            recoverable: true,
        }));
        assert!(!failed.success());
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(failed.failure().unwrap().step, FailedStep::Fetch);
    }

    #[test]
    fn report_serializes_outcome_tag() {
        let json = serde_json::to_value(UpdateOutcome::UpdatedDegraded {
            archive_error: "disk full".into(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "updated_degraded");
        assert_eq!(json["archive_error"], "disk full");
    }
}
