//! zip 패키지 압축 해제 / 디렉터리 압축
//!
//! - 새 릴리즈 패키지를 설치 디렉터리로 압축 해제
//! - 교체된 이전 설치본을 `<name>.zip` 하나로 보관

use std::fs::File;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;

use crate::error::UpdaterError;
use crate::ARCHIVE_EXTENSION;

/// 압축 해제 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    /// 패키지 최상위의 `<name>/` 폴더를 걷어냈는지 여부
    pub stripped_root: bool,
}

/// zip 패키지를 대상 디렉터리에 압축 해제
///
/// 모든 엔트리가 대상 디렉터리와 같은 이름의 최상위 폴더 아래에 있으면
/// 그 폴더 단계는 건너뛴다 (`Server-Files-1.4.zip` → `Server-Files-1.4/...`).
pub fn extract(archive_path: &Path, destination_dir: &Path) -> Result<ExtractSummary, UpdaterError> {
    let file = File::open(archive_path).map_err(|e| UpdaterError::corrupt(archive_path, e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| UpdaterError::corrupt(archive_path, e))?;

    tracing::info!(
        "[Archive] Extracting {} ({} entries) -> {}",
        archive_path.display(),
        archive.len(),
        destination_dir.display()
    );

    // 경로 검증을 먼저 끝내고 나서 쓰기 시작
    let mut names: Vec<PathBuf> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| UpdaterError::corrupt(archive_path, e))?;
        let name = entry.enclosed_name().map(|p| p.to_path_buf()).ok_or_else(|| {
            UpdaterError::corrupt(
                archive_path,
                format!("entry '{}' escapes the destination", entry.name()),
            )
        })?;
        names.push(name);
    }

    let strip = wrapping_root(&names, destination_dir);

    std::fs::create_dir_all(destination_dir)
        .map_err(|e| UpdaterError::from_io(e, "create extract directory", destination_dir))?;

    let mut summary = ExtractSummary {
        stripped_root: strip.is_some(),
        ..Default::default()
    };

    for (i, name) in names.iter().enumerate() {
        let relative = match &strip {
            Some(root) => match name.strip_prefix(root) {
                Ok(rest) if rest.as_os_str().is_empty() => continue,
                Ok(rest) => rest.to_path_buf(),
                Err(_) => name.clone(),
            },
            None => name.clone(),
        };
        let out_path = destination_dir.join(&relative);

        let mut entry = archive
            .by_index(i)
            .map_err(|e| UpdaterError::corrupt(archive_path, e))?;

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| UpdaterError::from_io(e, "create directory", &out_path))?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| UpdaterError::from_io(e, "create directory", parent))?;
        }
        let mut outfile = File::create(&out_path)
            .map_err(|e| UpdaterError::from_io(e, "create file", &out_path))?;
        // 엔트리 읽기 실패(CRC 불일치 등)는 패키지 손상으로 취급
        io::copy(&mut entry, &mut outfile).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => UpdaterError::from_io(e, "write file", &out_path),
            _ => UpdaterError::corrupt(archive_path, format!("{}: {}", name.display(), e)),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode)).ok();
            }
        }

        summary.files += 1;
    }

    tracing::info!(
        "[Archive] Extracted {} files, {} directories{}",
        summary.files,
        summary.directories,
        if summary.stripped_root { " (root folder stripped)" } else { "" }
    );
    Ok(summary)
}

/// 모든 엔트리가 `<destination 이름>/` 아래에 있으면 그 폴더 이름을 반환
fn wrapping_root(names: &[PathBuf], destination_dir: &Path) -> Option<PathBuf> {
    let dest_name = destination_dir.file_name()?;
    let mut nested = false;

    for name in names {
        let mut components = name.components();
        match components.next() {
            Some(Component::Normal(first)) if first == dest_name => {}
            _ => return None,
        }
        if components.next().is_some() {
            nested = true;
        }
    }

    nested.then(|| PathBuf::from(dest_name))
}

/// 디렉터리를 `<directory>.zip`으로 압축하고 아카이브 경로를 반환
pub fn compress(directory: &Path) -> Result<PathBuf, UpdaterError> {
    let archive_path = default_archive_path(directory)?;
    compress_to(directory, &archive_path)?;
    Ok(archive_path)
}

/// `<directory>.zip` 경로 계산
pub fn default_archive_path(directory: &Path) -> Result<PathBuf, UpdaterError> {
    let name = directory
        .file_name()
        .ok_or_else(|| UpdaterError::NotFound { path: directory.to_path_buf() })?;
    Ok(directory.with_file_name(format!(
        "{}.{}",
        name.to_string_lossy(),
        ARCHIVE_EXTENSION
    )))
}

/// 디렉터리 트리를 지정한 경로의 zip으로 압축. 엔트리는 디렉터리 기준 상대 경로.
pub fn compress_to(directory: &Path, archive_path: &Path) -> Result<usize, UpdaterError> {
    if !directory.is_dir() {
        return Err(UpdaterError::NotFound { path: directory.to_path_buf() });
    }

    tracing::info!(
        "[Archive] Compressing {} -> {}",
        directory.display(),
        archive_path.display()
    );

    let result = write_archive(directory, archive_path);
    if result.is_err() {
        // 실패한 아카이브는 남기지 않음
        std::fs::remove_file(archive_path).ok();
    }
    let count = result?;

    tracing::info!("[Archive] Stored {} files in {}", count, archive_path.display());
    Ok(count)
}

fn write_archive(directory: &Path, archive_path: &Path) -> Result<usize, UpdaterError> {
    let file = File::create(archive_path)
        .map_err(|e| UpdaterError::from_io(e, "create archive", archive_path))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut count = 0usize;

    for entry in WalkDir::new(directory).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(directory).to_path_buf();
            UpdaterError::from_io(e.into(), "walk directory", &path)
        })?;
        let path = entry.path();
        if path == archive_path {
            continue;
        }

        let rel = path.strip_prefix(directory).unwrap_or(path);
        let rel_text = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(rel_text, options)
                .map_err(|e| zip_error(e, archive_path))?;
            continue;
        }
        if !entry.file_type().is_file() {
            // 심볼릭 링크, 소켓 등은 따라가지 않음
            tracing::warn!("[Archive] Skipping non-regular entry {}", path.display());
            continue;
        }

        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            match entry.metadata() {
                Ok(meta) => options.unix_permissions(meta.permissions().mode()),
                Err(_) => options,
            }
        };

        zip.start_file(rel_text, options)
            .map_err(|e| zip_error(e, archive_path))?;
        let mut source =
            File::open(path).map_err(|e| UpdaterError::from_io(e, "read file", path))?;
        io::copy(&mut source, &mut zip)
            .map_err(|e| UpdaterError::from_io(e, "write archive", archive_path))?;
        count += 1;
    }

    let mut file = zip.finish().map_err(|e| zip_error(e, archive_path))?;
    file.flush()
        .map_err(|e| UpdaterError::from_io(e, "flush archive", archive_path))?;
    Ok(count)
}

fn zip_error(err: ZipError, archive_path: &Path) -> UpdaterError {
    match err {
        ZipError::Io(e) => UpdaterError::from_io(e, "write archive", archive_path),
        other => UpdaterError::corrupt(archive_path, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in files {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    /// 상대 경로 → 내용 (디렉터리는 None)
    fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
        let mut map = BTreeMap::new();
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry.unwrap();
            let rel = entry.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            let content = if entry.file_type().is_file() {
                Some(std::fs::read(entry.path()).unwrap())
            } else {
                None
            };
            map.insert(rel, content);
        }
        map
    }

    #[test]
    fn extract_flat_package() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("Server-Files-1.4.zip");
        write_zip(&pkg, &[("startserver.sh", b"#!/bin/sh"), ("config/a.toml", b"a=1")]);

        let dest = dir.path().join("Server-Files-1.4");
        let summary = extract(&pkg, &dest).unwrap();
        assert_eq!(summary.files, 2);
        assert!(!summary.stripped_root);
        assert_eq!(std::fs::read(dest.join("config/a.toml")).unwrap(), b"a=1");
    }

    #[test]
    fn extract_strips_wrapping_folder() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("Server-Files-1.4.zip");
        write_zip(
            &pkg,
            &[
                ("Server-Files-1.4/", b""),
                ("Server-Files-1.4/startserver.sh", b"run"),
                ("Server-Files-1.4/mods/x.jar", b"jar"),
            ],
        );

        let dest = dir.path().join("Server-Files-1.4");
        let summary = extract(&pkg, &dest).unwrap();
        assert!(summary.stripped_root);
        assert_eq!(std::fs::read(dest.join("startserver.sh")).unwrap(), b"run");
        assert_eq!(std::fs::read(dest.join("mods/x.jar")).unwrap(), b"jar");
        assert!(!dest.join("Server-Files-1.4").exists());
    }

    #[test]
    fn extract_keeps_unrelated_root_folder() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("pkg.zip");
        write_zip(&pkg, &[("inner/file.txt", b"x")]);

        let dest = dir.path().join("Server-Files-1.4");
        extract(&pkg, &dest).unwrap();
        assert!(dest.join("inner/file.txt").is_file());
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("broken.zip");
        std::fs::write(&pkg, b"this is not a zip file").unwrap();

        let err = extract(&pkg, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, UpdaterError::ArchiveCorrupt { .. }));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn missing_archive_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let err = extract(&dir.path().join("none.zip"), &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, UpdaterError::ArchiveCorrupt { .. }));
    }

    #[test]
    fn escaping_entries_are_rejected() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("evil.zip");
        write_zip(&pkg, &[("ok.txt", b"ok"), ("../escape.txt", b"evil")]);

        let dest = dir.path().join("out");
        let err = extract(&pkg, &dest).unwrap_err();
        assert!(matches!(err, UpdaterError::ArchiveCorrupt { .. }));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn compress_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = compress(&dir.path().join("Server-Files-1.3")).unwrap_err();
        assert!(matches!(err, UpdaterError::NotFound { .. }));
    }

    #[test]
    fn compress_names_archive_after_directory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("Server-Files-1.3");
        std::fs::create_dir_all(src.join("world/region")).unwrap();
        std::fs::write(src.join("server.properties"), b"motd=hi").unwrap();
        std::fs::write(src.join("world/region/r.0.0.mca"), vec![3u8; 10_000]).unwrap();

        let archive = compress(&src).unwrap();
        assert_eq!(archive, dir.path().join("Server-Files-1.3.zip"));

        let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<_> = zip.file_names().map(|s| s.to_string()).collect();
        names.sort();
        assert!(names.contains(&"server.properties".to_string()));
        assert!(names.contains(&"world/region/r.0.0.mca".to_string()));
        assert!(names.iter().all(|n| !n.starts_with("Server-Files-1.3")));
    }

    #[test]
    fn round_trip_preserves_layout_and_bytes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("Server-Files-1.3");
        std::fs::create_dir_all(src.join("journeymap/data")).unwrap();
        std::fs::create_dir_all(src.join("empty")).unwrap();
        std::fs::write(src.join("ops.json"), b"[]").unwrap();
        std::fs::write(src.join("journeymap/data/map.bin"), (0..=255u8).collect::<Vec<_>>()).unwrap();

        let first = compress(&src).unwrap();
        let restored = dir.path().join("restored").join("Server-Files-1.3");
        extract(&first, &restored).unwrap();
        assert_eq!(snapshot(&src), snapshot(&restored));

        // 다시 압축해도 같은 상대 경로 / 같은 내용
        let second = dir.path().join("second.zip");
        compress_to(&restored, &second).unwrap();
        let again = dir.path().join("again");
        extract(&second, &again).unwrap();
        assert_eq!(snapshot(&src), snapshot(&again));
    }

    #[cfg(unix)]
    #[test]
    fn compress_skips_symlinks() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("Server-Files-1.3");
        std::fs::create_dir_all(src.join("world")).unwrap();
        std::fs::write(src.join("world/level.dat"), b"level").unwrap();
        std::fs::write(dir.path().join("outside.txt"), b"outside").unwrap();
        std::os::unix::fs::symlink(dir.path().join("outside.txt"), src.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(&src, src.join("world/loop")).unwrap();

        let archive = dir.path().join("Server-Files-1.3.zip");
        let count = compress_to(&src, &archive).unwrap();
        assert_eq!(count, 1);

        let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let names: Vec<_> = zip.file_names().collect();
        assert!(names.contains(&"world/level.dat"));
        assert!(!names.iter().any(|n| n.contains("link.txt") || n.contains("loop")));
    }
}
