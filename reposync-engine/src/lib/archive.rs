//! The whole project as a single archive blob.

use byte_unit::{Byte, UnitType};
use camino::Utf8Path;
use flate2::{write::GzEncoder, Compression};
use reposync::{config::ArchiveConfig, FileMode, LocalFile, Rules};

use crate::local;

/// Packs `files` into a tar.gz.
///
/// The output only depends on paths, contents and modes:
/// entries are sorted, owners and timestamps are zeroed.
pub fn pack(files: &[LocalFile]) -> reposync::Result<Vec<u8>> {
    let mut sorted: Vec<&LocalFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.path().cmp(b.path()));

    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(gz);
    tar.mode(tar::HeaderMode::Deterministic);

    for file in sorted {
        let mut header = tar::Header::new_gnu();
        header.set_size(file.size());
        header.set_mode(match file.mode() {
            FileMode::Regular => 0o644,
            FileMode::Executable => 0o755,
        });
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);
        tar.append_data(&mut header, file.path(), file.content())
            .map_err(|err| reposync::io_error!("cannot archive {}: {err}", file.path()))?;
    }

    let gz = tar.into_inner()?;
    Ok(gz.finish()?)
}

/// Produces the archive blob of a run, committed at `config.path`.
///
/// A prebuilt `config.source` is used as is. Otherwise `root` is
/// enumerated with `rules` and packed.
pub async fn build(
    root: &Utf8Path,
    rules: &Rules,
    config: &ArchiveConfig,
) -> reposync::Result<LocalFile> {
    let content = match &config.source {
        Some(source) => {
            log::info!("using prebuilt archive {source}");
            tokio::fs::read(source)
                .await
                .map_err(|err| reposync::config_error!("cannot read archive {source}: {err}"))?
        }
        None => {
            let files: Vec<LocalFile> = local::enumerate(root, rules)
                .await?
                .files
                .into_iter()
                .filter(|f| f.path() != config.path)
                .collect();
            let count = files.len();
            let content = tokio::task::spawn_blocking(move || pack(&files))
                .await
                .map_err(|err| reposync::Error::Bug(format!("archive task failed: {err}")))??;
            log::info!("packed {count} files");
            content
        }
    };

    let size = Byte::from_u64(content.len() as u64).get_appropriate_unit(UnitType::Binary);
    log::info!("archive {} is {size:#.2}", config.path);
    if content.len() as u64 > rules.max_file_size() {
        reposync::config_bail!(
            "archive is {size:#.2}, larger than the limit of a single file"
        );
    }
    Ok(LocalFile::new(
        config.path.clone(),
        content,
        true,
        FileMode::Regular,
    ))
}
