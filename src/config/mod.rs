//! 업데이터 설정 파일 관리
//!
//! `config/updater.toml`에서 [`UpdateConfig`]를 로드하고 명령줄 옵션을 덮어씁니다.
//!
//! ## 탐색 순서
//! 1. `--config <path>`
//! 2. `SERVER_UPDATER_CONFIG` 환경 변수
//! 3. 실행 파일 옆 `config/updater.toml`
//! 4. CWD의 `config/updater.toml`
//! 5. 없으면 기본값

use anyhow::{bail, Context, Result};
use server_updater_lib::{BaselinePolicy, RetirePolicy, UpdateConfig};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "SERVER_UPDATER_CONFIG";

/// 명령줄에서 설정 파일보다 우선하는 값
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub work_dir: Option<PathBuf>,
    pub require_baseline: bool,
    pub delete_old: bool,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut UpdateConfig) {
        if let Some(dir) = &self.work_dir {
            cfg.work_dir = dir.clone();
        }
        if self.require_baseline {
            cfg.baseline_policy = BaselinePolicy::RequireExisting;
        }
        if self.delete_old {
            cfg.retire_old_installation = RetirePolicy::Delete;
        }
    }
}

/// 설정 파일 경로 결정. 명시한 경로가 없으면 에러, 기본 위치에 없으면 `None`.
pub fn config_file_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.to_path_buf()));
    resolve_config_path(explicit, from_env.as_deref(), exe_dir.as_deref(), Path::new("."))
}

fn resolve_config_path(
    explicit: Option<&Path>,
    from_env: Option<&Path>,
    exe_dir: Option<&Path>,
    cwd: &Path,
) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit.or(from_env) {
        if !path.is_file() {
            bail!("config file not found: {}", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    // 실행 파일 옆 config/updater.toml
    if let Some(dir) = exe_dir {
        let cfg = dir.join("config").join("updater.toml");
        if cfg.is_file() {
            return Ok(Some(cfg));
        }
    }

    let cwd_cfg = cwd.join("config").join("updater.toml");
    if cwd_cfg.is_file() {
        return Ok(Some(cwd_cfg));
    }

    Ok(None)
}

/// TOML 파일에서 설정 로드 (없으면 기본값) 후 명령줄 옵션 적용
pub fn load_updater_config(explicit: Option<&Path>, overrides: &Overrides) -> Result<UpdateConfig> {
    let mut cfg = match config_file_path(explicit)? {
        Some(path) => {
            let cfg = load_from_file(&path)?;
            tracing::info!("[Config] Loaded {}", path.display());
            cfg
        }
        None => {
            tracing::info!("[Config] No config/updater.toml found, using defaults");
            UpdateConfig::default()
        }
    };
    overrides.apply(&mut cfg);
    Ok(cfg)
}

pub fn load_from_file(path: &Path) -> Result<UpdateConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config in {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<UpdateConfig> {
    let cfg = UpdateConfig::from_toml_str(content)?;
    if cfg.release_prefix.trim().is_empty() {
        bail!("release_prefix must not be empty");
    }
    if cfg.download_timeout_secs == 0 {
        bail!("download_timeout_secs must be greater than 0");
    }
    Ok(cfg)
}
