//! 명령줄 인자 처리
//!
//! ## 사용법
//! ```text
//! server-updater                           # 업데이트 실행 (run과 같음)
//! server-updater run --delete-old          # 보관 후 이전 설치본 삭제
//! server-updater run --require-baseline    # 기존 설치본이 없으면 중단
//! server-updater check --json              # 최신 버전 확인만
//! server-updater --config ./updater.toml --work-dir /srv/atm10
//! ```
//!
//! ## 종료 코드
//! run: `0` 업데이트/신규 설치, `1` 실패/중단, `2` 할 일 없음, `3` 이전 설치본 보관 실패
//! check: `0` 업데이트 있음, `1` 에러, `2` 최신 상태

use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

use crate::config::Overrides;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    #[default]
    Run,
    Check,
    Help,
    Version,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub json: bool,
    pub overrides: Overrides,
}

pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut parsed = CliArgs::default();
    let mut command_seen = false;
    let mut iter = args.into_iter().map(Into::into);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "help" | "--help" | "-h" => parsed.command = Command::Help,
            "--version" | "-V" => parsed.command = Command::Version,
            "--json" => parsed.json = true,
            "--require-baseline" => parsed.overrides.require_baseline = true,
            "--delete-old" => parsed.overrides.delete_old = true,
            "--config" | "-c" => {
                let value = iter.next().ok_or_else(|| anyhow!("--config requires a path"))?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--work-dir" | "-w" => {
                let value = iter.next().ok_or_else(|| anyhow!("--work-dir requires a path"))?;
                parsed.overrides.work_dir = Some(PathBuf::from(value));
            }
            "run" | "check" if !command_seen => {
                command_seen = true;
                if parsed.command == Command::Run {
                    parsed.command = if arg == "run" { Command::Run } else { Command::Check };
                }
            }
            other if other.starts_with('-') => bail!("Unknown option: {}", other),
            other => bail!("Unknown command: {}", other),
        }
    }

    Ok(parsed)
}

pub fn print_help() {
    println!(
        r#"server-updater {}

Updates a Server-Files installation to the latest published release,
carrying configuration and world data over and archiving the old version.

USAGE:
    server-updater [run|check] [OPTIONS]

COMMANDS:
    run        Download, extract, merge and archive (default)
    check      Only report the installed and latest versions

OPTIONS:
    -c, --config <path>     Config file (default: config/updater.toml)
    -w, --work-dir <path>   Directory holding the installation
        --require-baseline  Stop if no installation exists instead of installing fresh
        --delete-old        Remove the old installation after it has been archived
        --json              Print the report as JSON on stdout
    -h, --help              Show this help
    -V, --version           Show version

ENVIRONMENT:
    SERVER_UPDATER_CONFIG   Config file path when --config is not given
    RUST_LOG                Log filter (default: info)

EXIT CODES (run):
    0 updated or freshly installed, 1 failed or interrupted,
    2 nothing to do, 3 updated but the old installation was not archived"#,
        env!("CARGO_PKG_VERSION")
    );
}
