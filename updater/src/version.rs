//! 서버 파일 버전 비교 유틸리티
//!
//! 설치 디렉터리와 릴리즈 이름은 `<prefix>-<major>.<minor>` 형식을 따릅니다.
//! (예: `Server-Files-1.4`)

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 릴리즈 버전 (major.minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
}

impl ReleaseVersion {
    /// "1.4" 형식을 파싱
    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.trim().split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// `<prefix>-<major>.<minor>` 이름에서 버전을 추출
    pub fn from_name(prefix: &str, name: &str) -> Option<Self> {
        let caps = name_pattern(prefix).captures(name)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
        })
    }

    pub fn is_newer_than(&self, other: &ReleaseVersion) -> bool {
        self > other
    }
}

/// 설치 디렉터리 이름 패턴: `^<prefix>-(\d+)\.(\d+)$`
pub fn name_pattern(prefix: &str) -> Regex {
    Regex::new(&format!(r"^{}-(\d+)\.(\d+)$", regex::escape(prefix)))
        .expect("escaped prefix always yields a valid pattern")
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
