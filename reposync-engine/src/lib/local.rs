//! Enumeration of the local project directory.

use std::collections::BTreeSet;

use async_stream::stream;
use byte_unit::{Byte, UnitType};
use camino::{Utf8Path, Utf8PathBuf};
use futures::{Stream, StreamExt};
use reposync::{FileMode, LocalFile, Rules};

/// Extensions of files sent as base64.
const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "avif", "tif", "tiff", "psd",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // media
    "mp3", "mp4", "m4a", "wav", "ogg", "oga", "webm", "mov", "avi", "flac",
    // archives
    "zip", "gz", "tgz", "bz2", "xz", "zst", "7z", "rar", "tar", "jar",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // compiled
    "exe", "dll", "so", "dylib", "a", "o", "obj", "class", "wasm", "bin", "pyc",
    // data
    "sqlite", "db", "dat",
];

/// Whether `path` is treated as binary, judging from its extension only.
pub fn is_binary_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => BINARY_EXTENSIONS
            .iter()
            .any(|bin| bin.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// A file selected by the walk, not read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Relative to the root, `/`-separated
    pub path: String,
    pub fs_path: Utf8PathBuf,
    pub size: u64,
    pub mode: FileMode,
}

/// What the walk found at one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Walked {
    File(Candidate),
    /// A file that exists but was left out
    SkippedFile(String),
    /// A directory whose content was left out, entirely or partly
    SkippedDir(String),
}

/// Paths that exist locally but are missing from the enumeration
/// for another reason than the exclusion rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skipped {
    files: BTreeSet<String>,
    dirs: BTreeSet<String>,
}

impl Skipped {
    pub fn add_file(&mut self, path: impl Into<String>) {
        self.files.insert(path.into());
    }

    pub fn add_dir(&mut self, path: impl Into<String>) {
        self.dirs.insert(path.into());
    }

    /// Whether `path` may still exist in the local directory.
    pub fn covers(&self, path: &str) -> bool {
        if self.files.contains(path) || self.dirs.contains(path) || self.dirs.contains("") {
            return true;
        }
        let mut parent = path;
        while let Some((dir, _)) = parent.rsplit_once('/') {
            if self.dirs.contains(dir) {
                return true;
            }
            parent = dir;
        }
        false
    }
}

/// The files of the local directory, read and sorted by path.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub files: Vec<LocalFile>,
    pub skipped: Skipped,
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;

    if metadata.permissions().mode() & 0o111 != 0 {
        FileMode::Executable
    } else {
        FileMode::Regular
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> FileMode {
    FileMode::Regular
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Walks `root` depth first with an explicit stack and yields the files
/// the rules let through, in no particular order.
///
/// Entries that cannot be read are skipped with a warning and yielded as such.
/// Symlinks to files are followed, symlinks to directories are not.
pub fn walk<'a>(root: &'a Utf8Path, rules: &'a Rules) -> impl Stream<Item = Walked> + Send + 'a {
    stream! {
        let mut stack = vec![(root.to_owned(), String::new())];

        while let Some((dir, rel)) = stack.pop() {
            log::trace!("listing entries of {dir}");
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(err) => {
                    log::warn!("skipping directory {dir}: {err}");
                    yield Walked::SkippedDir(rel);
                    continue;
                }
            };
            loop {
                let entry = match read_dir.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("error while listing {dir}: {err}");
                        yield Walked::SkippedDir(rel.clone());
                        break;
                    }
                };
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(name) => {
                        log::warn!("skipping non UTF-8 name {name:?} in {dir}");
                        continue;
                    }
                };
                let path = join(&rel, &name);
                let fs_path = dir.join(&name);

                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(err) => {
                        log::warn!("skipping {path}: {err}");
                        yield Walked::SkippedDir(path);
                        continue;
                    }
                };
                if file_type.is_dir() {
                    if rules.excludes_dir(&name) {
                        log::debug!("excluded directory {path}");
                    } else {
                        stack.push((fs_path, path));
                    }
                    continue;
                }
                if rules.excludes_file(&name) {
                    log::debug!("excluded file {path}");
                    continue;
                }

                // follows symlinks
                let metadata = match tokio::fs::metadata(&fs_path).await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        log::warn!("skipping {path}: {err}");
                        yield Walked::SkippedFile(path);
                        continue;
                    }
                };
                if metadata.is_dir() {
                    log::warn!("not following symlinked directory {path}");
                    yield Walked::SkippedDir(path);
                    continue;
                }
                if !metadata.is_file() {
                    log::debug!("skipping special file {path}");
                    yield Walked::SkippedFile(path);
                    continue;
                }
                if metadata.len() > rules.max_file_size() {
                    let size =
                        Byte::from_u64(metadata.len()).get_appropriate_unit(UnitType::Binary);
                    log::warn!("skipping {path}: too large ({size:#.2})");
                    yield Walked::SkippedFile(path);
                    continue;
                }

                yield Walked::File(Candidate {
                    path,
                    fs_path,
                    size: metadata.len(),
                    mode: file_mode(&metadata),
                });
            }
        }
    }
}

async fn check_root(root: &Utf8Path) -> reposync::Result<()> {
    let metadata = tokio::fs::metadata(root)
        .await
        .map_err(|err| reposync::config_error!("cannot access sync root {root}: {err}"))?;
    if !metadata.is_dir() {
        reposync::config_bail!("sync root {root} is not a directory");
    }
    Ok(())
}

/// Walks the paths of the files under `root`, sorted.
pub async fn list(root: &Utf8Path, rules: &Rules) -> reposync::Result<(Vec<Candidate>, Skipped)> {
    check_root(root).await?;
    let walk = walk(root, rules);
    futures::pin_mut!(walk);

    let mut candidates = Vec::new();
    let mut skipped = Skipped::default();
    while let Some(walked) = walk.next().await {
        match walked {
            Walked::File(candidate) => candidates.push(candidate),
            Walked::SkippedFile(path) => skipped.add_file(path),
            Walked::SkippedDir(path) => skipped.add_dir(path),
        }
    }
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((candidates, skipped))
}

/// Reads every file under `root` the rules let through, sorted by path.
pub async fn enumerate(root: &Utf8Path, rules: &Rules) -> reposync::Result<Enumeration> {
    let (candidates, mut skipped) = list(root, rules).await?;

    let mut files = Vec::with_capacity(candidates.len());
    let mut total = 0;
    for candidate in candidates {
        let content = match tokio::fs::read(&candidate.fs_path).await {
            Ok(content) => content,
            Err(err) => {
                log::warn!("skipping {}: {err}", candidate.path);
                skipped.add_file(candidate.path);
                continue;
            }
        };
        total += content.len() as u64;
        let is_binary = is_binary_path(&candidate.path);
        files.push(LocalFile::new(
            candidate.path,
            content,
            is_binary,
            candidate.mode,
        ));
    }

    let total = Byte::from_u64(total).get_appropriate_unit(UnitType::Binary);
    log::info!("found {} files ({total:#.2}) in {root}", files.len());
    Ok(Enumeration { files, skipped })
}
