//! 다운로드 완료 감지
//!
//! 다운로드 세션은 파일 쓰기를 시작만 하고 완료를 알려주지 않으므로
//! 파일시스템을 주기적으로 확인합니다.
//!
//! 완료 조건:
//! 1. 대상 파일이 존재
//! 2. 진행 중 표시 파일(`<name>.crdownload`, `<name>.part` 등)이 없음
//! 3. 한 주기 간격으로 두 번 잰 크기가 같음 (느린 쓰기 대비)

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// 다운로드 파일의 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Absent,
    InProgress,
    /// 진행 중 표시가 없고 파일이 존재 (크기 안정 여부는 await_download에서 확인)
    Complete,
}

#[derive(Debug, Clone)]
pub struct DownloadMonitor {
    dir: PathBuf,
    poll_interval: Duration,
    /// 진행 중 표시 확장자 (점 제외)
    markers: Vec<String>,
}

impl DownloadMonitor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: Duration::from_secs(1),
            markers: crate::default_in_progress_markers(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 현재 상태를 한 번 관찰 (크기 안정 확인 없음)
    pub fn probe(&self, expected_filename: &str) -> DownloadPhase {
        if self.has_marker(expected_filename) {
            return DownloadPhase::InProgress;
        }
        if self.dir.join(expected_filename).is_file() {
            DownloadPhase::Complete
        } else {
            DownloadPhase::Absent
        }
    }

    /// 다운로드가 끝날 때까지 대기. 제한 시간이 지나면 `false` (에러 아님).
    pub async fn await_download(&self, expected_filename: &str, timeout: Duration) -> bool {
        let target = self.dir.join(expected_filename);
        let start = Instant::now();
        let mut last_phase = None;

        tracing::info!(
            "[Monitor] Waiting for {} (timeout {}s)",
            target.display(),
            timeout.as_secs()
        );

        while start.elapsed() < timeout {
            let phase = self.probe(expected_filename);
            if last_phase != Some(phase) {
                tracing::debug!("[Monitor] {}: {:?}", expected_filename, phase);
                last_phase = Some(phase);
            }

            if phase == DownloadPhase::Complete {
                if let Some(initial_size) = file_size(&target) {
                    tokio::time::sleep(self.poll_interval).await;
                    let stable = file_size(&target) == Some(initial_size)
                        && !self.has_marker(expected_filename);
                    if stable {
                        tracing::info!(
                            "[Monitor] Download complete: {} ({} bytes)",
                            expected_filename,
                            initial_size
                        );
                        return true;
                    }
                    tracing::debug!("[Monitor] {} still growing", expected_filename);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        tracing::warn!(
            "[Monitor] Download of {} did not complete within {}s",
            expected_filename,
            timeout.as_secs()
        );
        false
    }

    fn has_marker(&self, expected_filename: &str) -> bool {
        self.markers.iter().any(|ext| {
            self.dir
                .join(format!("{}.{}", expected_filename, ext.trim_start_matches('.')))
                .exists()
        })
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
