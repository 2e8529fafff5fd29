//! 릴리즈 피드 클라이언트
//!
//! 릴리즈 목록 페이지에서 접두사(기본 `Server-Files`)로 시작하는 최신 항목을 찾고,
//! 다운로드 URL을 만들어 다운로드 디렉터리로 파일 쓰기를 시작합니다.
//! 완료 확인은 [`DownloadMonitor`](crate::monitor::DownloadMonitor)가 담당합니다.
//!
//! ## 피드 형식
//! ```html
//! <a class="file-card" href="/minecraft/modpacks/all-the-mods-10/files/6543210">
//!   <div class="name">Server-Files-1.4</div>
//! </a>
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::error::RetrievalError;
use crate::version::ReleaseVersion;
use crate::{UpdateConfig, ARCHIVE_EXTENSION};

/// 피드에서 찾은 최신 릴리즈
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCandidate {
    /// 표시 이름 (예: "Server-Files-1.4")
    pub name: String,
    /// 릴리즈 상세 페이지 링크
    pub link: String,
}

impl ReleaseCandidate {
    /// 다운로드될 패키지 파일 이름: `<name>.zip`
    pub fn archive_name(&self) -> String {
        format!("{}.{}", self.name, ARCHIVE_EXTENSION)
    }

    pub fn version(&self, prefix: &str) -> Option<ReleaseVersion> {
        ReleaseVersion::from_name(prefix, &self.name)
    }

    /// 이름이 다운로드/작업 디렉터리 안의 파일 하나만 가리키는지 확인
    pub fn has_plain_name(&self) -> bool {
        is_plain_file_name(&self.name)
    }
}

/// 경로 구분자나 `.`/`..` 없이 정확히 한 조각으로 된 이름인지 확인
pub fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// 릴리즈 목록 페이지의 한 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub name: String,
    pub href: String,
}

/// 웹 릴리즈 조회 세션
///
/// 한 번의 실행 동안 오케스트레이터가 독점하며, 모든 종료 경로에서 `close`된다.
#[allow(async_fn_in_trait)]
pub trait RetrievalClient {
    /// 세션 획득
    async fn open(&mut self) -> Result<(), RetrievalError>;

    /// 접두사에 맞는 최신 릴리즈 조회
    async fn fetch_latest_release(&mut self, feed_url: &str) -> Result<ReleaseCandidate, RetrievalError>;

    fn build_download_target(&self, candidate: &ReleaseCandidate) -> Result<String, RetrievalError>;

    /// 다운로드 디렉터리에 `file_name` 쓰기를 시작. 완료를 기다리지 않음.
    async fn begin_download(&mut self, url: &str, file_name: &str) -> Result<(), RetrievalError>;

    /// 세션 해제 (여러 번 호출해도 안전)
    fn close(&mut self);
}

/// HTTP 기반 릴리즈 조회 클라이언트
///
/// 다운로드는 `<file>.part`에 스트리밍한 뒤 완료 시 rename하므로
/// 브라우저 다운로드와 같은 방식으로 완료 여부를 판단할 수 있다.
pub struct HttpRetrievalClient {
    download_dir: PathBuf,
    download_base_url: String,
    release_prefix: String,
    user_agent: String,
    page_load_timeout: Duration,
    http: Option<reqwest::Client>,
    download: Option<(JoinHandle<()>, PathBuf)>,
}

impl HttpRetrievalClient {
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            download_dir: config.download_dir(),
            download_base_url: config.download_base_url.clone(),
            release_prefix: config.release_prefix.clone(),
            user_agent: config.user_agent.clone(),
            page_load_timeout: Duration::from_secs(config.page_load_timeout_secs),
            http: None,
            download: None,
        }
    }

    fn http(&self) -> Result<&reqwest::Client, RetrievalError> {
        self.http.as_ref().ok_or_else(|| RetrievalError::Session {
            message: "retrieval session is not open".to_string(),
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.page_load_timeout.as_secs()
    }
}

impl RetrievalClient for HttpRetrievalClient {
    async fn open(&mut self) -> Result<(), RetrievalError> {
        if self.http.is_some() {
            return Ok(());
        }
        let http = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.page_load_timeout)
            .build()
            .map_err(|e| RetrievalError::Session {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        tracing::info!("[Feed] Retrieval session opened");
        self.http = Some(http);
        Ok(())
    }

    async fn fetch_latest_release(&mut self, feed_url: &str) -> Result<ReleaseCandidate, RetrievalError> {
        let timeout_secs = self.timeout_secs();
        tracing::info!("[Feed] Loading release listing: {}", feed_url);

        let response = self
            .http()?
            .get(feed_url)
            .timeout(self.page_load_timeout)
            .send()
            .await
            .map_err(|e| RetrievalError::from_reqwest(&e, "load release listing", timeout_secs))?;

        if !response.status().is_success() {
            return Err(RetrievalError::Http {
                status_code: response.status().as_u16(),
                url: feed_url.to_string(),
            });
        }

        let base = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| RetrievalError::from_reqwest(&e, "read release listing", timeout_secs))?;

        let entries = parse_release_listing(&html);
        tracing::debug!("[Feed] {} entries on listing", entries.len());

        let entry = entries
            .into_iter()
            .find(|e| e.name.starts_with(&self.release_prefix))
            .ok_or_else(|| RetrievalError::NotFound {
                prefix: self.release_prefix.clone(),
            })?;
        if !is_plain_file_name(&entry.name) {
            return Err(RetrievalError::InvalidRelease { name: entry.name });
        }

        let link = base
            .join(&entry.href)
            .map(|u| u.to_string())
            .unwrap_or(entry.href);

        tracing::info!("[Feed] Found latest server file: {}", entry.name);
        Ok(ReleaseCandidate { name: entry.name, link })
    }

    fn build_download_target(&self, candidate: &ReleaseCandidate) -> Result<String, RetrievalError> {
        build_download_url(&self.download_base_url, &candidate.link)
    }

    async fn begin_download(&mut self, url: &str, file_name: &str) -> Result<(), RetrievalError> {
        let timeout_secs = self.timeout_secs();
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| RetrievalError::Session {
                message: format!("cannot create {}: {}", self.download_dir.display(), e),
            })?;

        tracing::info!("[Feed] Downloading from: {}", url);
        // 본문 스트리밍은 모니터가 시간 제한을 걸고, 여기서는 응답 헤더까지만 제한
        let response = tokio::time::timeout(self.page_load_timeout, self.http()?.get(url).send())
            .await
            .map_err(|_| RetrievalError::Timeout {
                operation: "start download".to_string(),
                duration_secs: timeout_secs,
            })?
            .map_err(|e| RetrievalError::from_reqwest(&e, "start download", timeout_secs))?;

        if !response.status().is_success() {
            return Err(RetrievalError::Http {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let final_path = self.download_dir.join(file_name);
        let part_path = self.download_dir.join(format!("{}.part", file_name));
        // 표시 파일은 반환 전에 만들어 두어야 모니터가 진행 중으로 인식
        let file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| RetrievalError::Session {
                message: format!("cannot create {}: {}", part_path.display(), e),
            })?;
        let task_part = part_path.clone();

        let handle = tokio::spawn(async move {
            match stream_to_file(response, file).await {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::rename(&task_part, &final_path).await {
                        tracing::error!("[Feed] Cannot finalize {}: {}", final_path.display(), e);
                        return;
                    }
                    tracing::info!("[Feed] Wrote {} ({} bytes)", final_path.display(), bytes);
                }
                Err(e) => {
                    tracing::error!("[Feed] Download to {} failed: {}", task_part.display(), e);
                    tokio::fs::remove_file(&task_part).await.ok();
                }
            }
        });

        self.download = Some((handle, part_path));
        Ok(())
    }

    fn close(&mut self) {
        if let Some((handle, part_path)) = self.download.take() {
            if !handle.is_finished() {
                tracing::warn!("[Feed] Aborting unfinished download");
                handle.abort();
                std::fs::remove_file(&part_path).ok();
            }
        }
        if self.http.take().is_some() {
            tracing::info!("[Feed] Retrieval session closed");
        }
    }
}

async fn stream_to_file(response: reqwest::Response, mut file: tokio::fs::File) -> anyhow::Result<u64> {
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// 릴리즈 목록 HTML에서 `a.file-card` 항목을 페이지 순서대로 추출
pub fn parse_release_listing(html: &str) -> Vec<FeedEntry> {
    let document = Html::parse_document(html);
    let card_selector = Selector::parse("a.file-card").expect("valid card selector");
    let name_selector = Selector::parse("div.name").expect("valid name selector");

    document
        .select(&card_selector)
        .filter_map(|card| {
            let href = card.value().attr("href")?.to_string();
            let name = card
                .select(&name_selector)
                .next()?
                .text()
                .collect::<String>()
                .trim()
                .to_string();
            if name.is_empty() {
                return None;
            }
            Some(FeedEntry { name, href })
        })
        .collect()
}

/// 릴리즈 링크의 마지막 경로 조각(파일 ID)으로 다운로드 URL 생성
pub fn build_download_url(download_base_url: &str, link: &str) -> Result<String, RetrievalError> {
    let path = link.split(['?', '#']).next().unwrap_or(link);
    let file_id = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RetrievalError::Session {
            message: format!("cannot derive a file id from '{}'", link),
        })?;
    Ok(format!("{}/{}", download_base_url.trim_end_matches('/'), file_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
        <div class="files">
          <a class="file-card" href="/minecraft/modpacks/all-the-mods-10/files/7000001">
            <div class="name">All the Mods 10-1.4</div>
            <div class="meta">Release</div>
          </a>
          <a class="file-card highlighted" href="/minecraft/modpacks/all-the-mods-10/files/7000002?page=1">
            <div class="details"><div class="name"><span>Server-Files-1.4</span></div></div>
          </a>
          <a class="file-card" href="/minecraft/modpacks/all-the-mods-10/files/6999990">
            <div class="name">Server-Files-1.3</div>
          </a>
          <a class="nav" href="/next"><div class="name">Server-Files-9.9</div></a>
        </div>
        </body></html>
    "#;

    #[test]
    fn parses_file_cards_in_page_order() {
        let entries = parse_release_listing(LISTING);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["All the Mods 10-1.4", "Server-Files-1.4", "Server-Files-1.3"]);
        assert_eq!(entries[1].href, "/minecraft/modpacks/all-the-mods-10/files/7000002?page=1");
    }

    #[test]
    fn skips_cards_without_name() {
        let html = r#"<a class="file-card" href="/files/1"><div class="size">1 MB</div></a>"#;
        assert!(parse_release_listing(html).is_empty());
    }

    #[test]
    fn decodes_entities() {
        let html = r#"<a class="file-card" href="/files/1?a=1&amp;b=2"><div class="name">Server-Files-1.0 &amp; more</div></a>"#;
        let entries = parse_release_listing(html);
        assert_eq!(entries[0].href, "/files/1?a=1&b=2");
        assert_eq!(entries[0].name, "Server-Files-1.0 & more");
    }

    #[test]
    fn accepts_single_quotes_and_numeric_entities() {
        let html = "<a href='/files/42' class='file-card'>\
                    <div class='name'>Server&#45;Files&#x2D;1.4</div></a>";
        let entries = parse_release_listing(html);
        assert_eq!(
            entries,
            vec![FeedEntry {
                name: "Server-Files-1.4".into(),
                href: "/files/42".into(),
            }]
        );
    }

    #[test]
    fn plain_file_names() {
        assert!(is_plain_file_name("Server-Files-1.4"));
        assert!(is_plain_file_name("Server Files 1.4 (hotfix)"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name("."));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("Server-Files-1.3/../../victim"));
        assert!(!is_plain_file_name("..\\victim"));
        assert!(!is_plain_file_name("/etc/passwd"));
    }

    #[test]
    fn download_url_uses_last_segment() {
        let base = "https://www.curseforge.com/minecraft/modpacks/all-the-mods-10/download";
        assert_eq!(
            build_download_url(base, "https://www.curseforge.com/minecraft/modpacks/all-the-mods-10/files/7000002").unwrap(),
            format!("{}/7000002", base)
        );
        assert_eq!(
            build_download_url(&format!("{}/", base), "/files/7000002/?page=1").unwrap(),
            format!("{}/7000002", base)
        );
        assert!(build_download_url(base, "").is_err());
    }

    #[test]
    fn candidate_archive_name_and_version() {
        let c = ReleaseCandidate {
            name: "Server-Files-1.4".into(),
            link: "/files/1".into(),
        };
        assert_eq!(c.archive_name(), "Server-Files-1.4.zip");
        assert_eq!(c.version("Server-Files"), ReleaseVersion::parse("1.4"));
    }

    #[tokio::test]
    async fn fetch_requires_open_session() {
        let mut client = HttpRetrievalClient::new(&UpdateConfig::default());
        let err = client.fetch_latest_release("http://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Session { .. }));
        // 열리지 않은 세션 close는 no-op
        client.close();
    }
}
