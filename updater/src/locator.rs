//! 현재 설치된 서버 파일 디렉터리 탐색
//!
//! 작업 디렉터리 바로 아래에서 `<prefix>-<major>.<minor>` 이름의 디렉터리를 찾습니다.
//! 0개면 신규 설치, 1개면 현재 설치본, 2개 이상이면 치명적 불일치입니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::UpdaterError;
use crate::version::{name_pattern, ReleaseVersion};
use crate::ARCHIVE_EXTENSION;

/// 버전이 붙은 서버 파일 설치 디렉터리
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    /// 디렉터리 이름 (버전 식별자 겸용, 예: "Server-Files-1.3")
    pub name: String,
    pub path: PathBuf,
    pub version: ReleaseVersion,
}

impl Installation {
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }
}

pub struct VersionLocator {
    root: PathBuf,
    prefix: String,
    /// 실행 파일이 위치한 디렉터리: 탐색 대상에서 제외
    own_dir: Option<PathBuf>,
}

impl VersionLocator {
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Self {
        let own_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
            .and_then(|d| d.canonicalize().ok());

        Self {
            root: root.into(),
            prefix: prefix.to_string(),
            own_dir,
        }
    }

    /// 제외할 디렉터리를 직접 지정 (테스트용)
    pub fn with_own_dir(mut self, own_dir: Option<PathBuf>) -> Self {
        self.own_dir = own_dir.and_then(|d| d.canonicalize().ok());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 현재 설치본 탐색. 파일시스템은 읽기만 함.
    pub fn locate_current_installation(&self) -> Result<Option<Installation>, UpdaterError> {
        let pattern = name_pattern(&self.prefix);
        let archive_suffix = format!(".{}", ARCHIVE_EXTENSION);

        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| UpdaterError::from_io(e, "scan working directory", &self.root))?;

        let mut found: Vec<Installation> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(&archive_suffix) || !pattern.is_match(&name) {
                continue;
            }

            if self.is_own_dir(&path) {
                tracing::debug!("[Locator] Skipping executable directory {}", path.display());
                continue;
            }

            if let Some(version) = ReleaseVersion::from_name(&self.prefix, &name) {
                found.push(Installation { name, path, version });
            }
        }

        match found.len() {
            0 => {
                tracing::info!("[Locator] No existing installation under {}", self.root.display());
                Ok(None)
            }
            1 => {
                let installation = found.remove(0);
                tracing::info!("[Locator] Current installation: {}", installation.name);
                Ok(Some(installation))
            }
            _ => {
                let mut candidates: Vec<String> = found.into_iter().map(|i| i.name).collect();
                candidates.sort();
                tracing::error!(
                    "[Locator] Multiple installation directories found: {}",
                    candidates.join(", ")
                );
                Err(UpdaterError::ConfigInconsistency { candidates })
            }
        }
    }

    fn is_own_dir(&self, path: &Path) -> bool {
        match (&self.own_dir, path.canonicalize()) {
            (Some(own), Ok(p)) => own == &p,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn locator(dir: &TempDir) -> VersionLocator {
        VersionLocator::new(dir.path(), "Server-Files").with_own_dir(None)
    }

    #[test]
    fn empty_directory_is_fresh_install() {
        let dir = TempDir::new().unwrap();
        assert!(locator(&dir).locate_current_installation().unwrap().is_none());
    }

    #[test]
    fn finds_single_installation() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Server-Files-1.3")).unwrap();
        std::fs::create_dir(dir.path().join("mods")).unwrap();

        let inst = locator(&dir).locate_current_installation().unwrap().unwrap();
        assert_eq!(inst.name, "Server-Files-1.3");
        assert_eq!(inst.version, ReleaseVersion { major: 1, minor: 3 });
        assert!(inst.exists());
    }

    #[test]
    fn ignores_files_and_archives() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Server-Files-1.3")).unwrap();
        // 이전 실행에서 남은 아카이브와 다운로드 파일
        std::fs::write(dir.path().join("Server-Files-1.2.zip"), b"zip").unwrap();
        std::fs::write(dir.path().join("Server-Files-1.4"), b"not a dir").unwrap();
        std::fs::create_dir(dir.path().join("Server-Files-1.1.zip")).unwrap();

        let inst = locator(&dir).locate_current_installation().unwrap().unwrap();
        assert_eq!(inst.name, "Server-Files-1.3");
    }

    #[test]
    fn multiple_installations_are_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Server-Files-1.3")).unwrap();
        std::fs::create_dir(dir.path().join("Server-Files-1.4")).unwrap();

        let before: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().map(|e| e.file_name()).collect();
        let err = locator(&dir).locate_current_installation().unwrap_err();
        match err {
            UpdaterError::ConfigInconsistency { candidates } => {
                assert_eq!(candidates, vec!["Server-Files-1.3", "Server-Files-1.4"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let after: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().map(|e| e.file_name()).collect();
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn skips_own_directory() {
        let dir = TempDir::new().unwrap();
        let own = dir.path().join("Server-Files-1.3");
        std::fs::create_dir(&own).unwrap();

        let locator = VersionLocator::new(dir.path(), "Server-Files").with_own_dir(Some(own));
        assert!(locator.locate_current_installation().unwrap().is_none());
    }

    #[test]
    fn missing_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        let locator = VersionLocator::new(dir.path().join("nope"), "Server-Files").with_own_dir(None);
        assert!(matches!(
            locator.locate_current_installation(),
            Err(UpdaterError::Io { .. })
        ));
    }
}
