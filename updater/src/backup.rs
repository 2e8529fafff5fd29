//! 이전 설치본 → 새 설치본 사용자 데이터 이전
//!
//! 설정 파일(server.properties, ops.json 등)과 세이브 폴더를 새 디렉터리로 복사합니다.
//! 원본에 없는 항목은 건너뛸 뿐 실패로 취급하지 않습니다.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{is_permission_error, UpdaterError};

/// 백업 항목 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    File,
    Folder,
}

/// `"server.properties" = { type = "file" }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupItemSpec {
    #[serde(rename = "type")]
    pub kind: BackupKind,
}

impl BackupItemSpec {
    pub const FILE: Self = Self { kind: BackupKind::File };
    pub const FOLDER: Self = Self { kind: BackupKind::Folder };
}

/// 항목 이름 → 종류
pub type BackupItems = BTreeMap<String, BackupItemSpec>;

/// 항목별 처리 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    Copied { files: usize },
    /// 원본 설치본에 없음 (에러 아님)
    SkippedMissing,
    /// 해당 항목만 실패: 경고로 기록하고 계속 진행
    Failed { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub items: BTreeMap<String, MergeOutcome>,
}

impl MergeReport {
    pub fn copied(&self) -> usize {
        self.items
            .values()
            .filter(|o| matches!(o, MergeOutcome::Copied { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .values()
            .filter(|o| matches!(o, MergeOutcome::SkippedMissing))
            .count()
    }

    pub fn warnings(&self) -> Vec<(&str, &str)> {
        self.items
            .iter()
            .filter_map(|(name, o)| match o {
                MergeOutcome::Failed { message } => Some((name.as_str(), message.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// 설정된 항목을 source에서 destination으로 복사
///
/// 권한 계열 IO 에러만 전체 병합을 중단시킨다.
pub fn merge(
    source_dir: &Path,
    destination_dir: &Path,
    items: &BackupItems,
) -> Result<MergeReport, UpdaterError> {
    tracing::info!(
        "[Backup] Transferring {} configured items from {} to {}",
        items.len(),
        source_dir.display(),
        destination_dir.display()
    );

    let mut report = MergeReport::default();

    for (name, spec) in items {
        if !is_plain_relative(name) {
            tracing::warn!("[Backup] Refusing item with unsafe name: {}", name);
            report.items.insert(
                name.clone(),
                MergeOutcome::Failed {
                    message: "item name must be a relative path inside the installation".to_string(),
                },
            );
            continue;
        }

        let src = source_dir.join(name);
        let dst = destination_dir.join(name);

        let present = match spec.kind {
            BackupKind::File => src.is_file(),
            BackupKind::Folder => src.is_dir(),
        };
        if !present {
            tracing::info!("[Backup] {} not found in {}, skipping", name, source_dir.display());
            report.items.insert(name.clone(), MergeOutcome::SkippedMissing);
            continue;
        }

        let result = match spec.kind {
            BackupKind::File => copy_file(&src, &dst).map(|_| 1),
            BackupKind::Folder => copy_dir_recursive(&src, &dst),
        };

        match result {
            Ok(files) => {
                tracing::info!(
                    "[Backup] Transferred {} ({} file{})",
                    name,
                    files,
                    if files == 1 { "" } else { "s" }
                );
                report.items.insert(name.clone(), MergeOutcome::Copied { files });
            }
            Err((err, path)) if is_permission_error(&err) => {
                tracing::error!("[Backup] Permission denied on {}: {}", path.display(), err);
                return Err(UpdaterError::from_io(err, "transfer backup item", &path));
            }
            Err((err, path)) => {
                tracing::warn!("[Backup] Failed to transfer {} ({}): {}", name, path.display(), err);
                report.items.insert(
                    name.clone(),
                    MergeOutcome::Failed {
                        message: format!("{}: {}", path.display(), err),
                    },
                );
            }
        }
    }

    tracing::info!(
        "[Backup] Done: {} copied, {} skipped, {} warnings",
        report.copied(),
        report.skipped(),
        report.warnings().len()
    );
    Ok(report)
}

fn is_plain_relative(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

type CopyResult<T> = Result<T, (io::Error, std::path::PathBuf)>;

/// 단일 파일 복사 (덮어쓰기), 수정 시각 유지
fn copy_file(src: &Path, dst: &Path) -> CopyResult<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| (e, parent.to_path_buf()))?;
    }
    std::fs::copy(src, dst).map_err(|e| (e, dst.to_path_buf()))?;
    preserve_mtime(src, dst);
    Ok(())
}

/// 플랫폼이 허용하는 범위에서 수정 시각 복원
fn preserve_mtime(src: &Path, dst: &Path) {
    let modified = match std::fs::metadata(src).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return,
    };
    let result = File::options()
        .write(true)
        .open(dst)
        .and_then(|f| f.set_modified(modified));
    if let Err(e) = result {
        tracing::debug!("[Backup] Could not preserve mtime of {}: {}", dst.display(), e);
    }
}

/// 폴더 병합 복사: 대상 폴더의 기존 내용은 유지하고 같은 이름만 덮어씀
fn copy_dir_recursive(src: &Path, dst: &Path) -> CopyResult<usize> {
    std::fs::create_dir_all(dst).map_err(|e| (e, dst.to_path_buf()))?;
    let mut files = 0;
    for entry in std::fs::read_dir(src).map_err(|e| (e, src.to_path_buf()))? {
        let entry = entry.map_err(|e| (e, src.to_path_buf()))?;
        let path = entry.path();
        let dest = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| (e, path.clone()))?;
        if file_type.is_dir() {
            files += copy_dir_recursive(&path, &dest)?;
        } else if file_type.is_symlink() && !path.is_file() {
            // 디렉터리 링크는 따라가지 않음 (순환 방지), 깨진 링크도 건너뜀
            tracing::warn!("[Backup] Skipping link {}", path.display());
        } else {
            copy_file(&path, &dest)?;
            files += 1;
        }
    }
    Ok(files)
}
