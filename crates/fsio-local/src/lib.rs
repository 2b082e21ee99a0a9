//! Local directory backend.
//!
//! Files live under a root directory, one path component per location
//! segment. Writes land in a hidden sibling first and are renamed into place
//! once complete, so a failed or cancelled write never leaves a readable file
//! at the target path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use fsio_core::io::copy_with_context;
use fsio_core::{
    cheap_checksum, content_checksum, entry_stream, Context, Entry, EntryStream, FileReader,
    Filesystem, FsError, Location, ENTRY_QUEUE_CAPACITY,
};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

const PARTIAL_SUFFIX: &str = ".partial";

/// Backend bound to one local directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
    dir_mode: u32,
    file_mode: u32,
}

impl LocalFs {
    /// Create a backend rooted at `root`.
    ///
    /// # Arguments
    /// * `root` - Directory every location is resolved against
    /// * `dir_mode` - Permission bits for directories created by writes (unix only)
    /// * `file_mode` - Permission bits for files created by writes (unix only)
    pub fn new(root: impl Into<PathBuf>, dir_mode: u32, file_mode: u32) -> Self {
        Self {
            root: root.into(),
            dir_mode,
            file_mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a location, refusing segments that would escape the root.
    fn path_for(&self, location: &Location) -> Result<PathBuf, FsError> {
        let mut path = self.root.clone();
        for segment in location.segments() {
            if segment == "." || segment == ".." || segment.contains(['/', '\\', '\0']) {
                return Err(FsError::InvalidLocation(format!(
                    "segment {segment:?} cannot be stored on a local filesystem"
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<(), FsError> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.dir_mode);
        builder.create(dir).await?;
        Ok(())
    }

    async fn create_file(&self, path: &Path) -> Result<fs::File, FsError> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(self.file_mode);
        Ok(options.open(path).await?)
    }

    /// Copy `src` into `partial`, stamp it with `mod_time` and rename it to `target`.
    async fn write_partial(
        &self,
        ctx: &Context,
        partial: &Path,
        target: &Path,
        src: &mut (dyn AsyncRead + Send + Unpin),
        mod_time: DateTime<Utc>,
    ) -> Result<u64, FsError> {
        let file = self.create_file(partial).await?;
        let mut writer = BufWriter::with_capacity(fsio_core::io::DEFAULT_BUFFER_SIZE, file);
        let written = copy_with_context(ctx, src, &mut writer).await?;
        writer.shutdown().await?;
        drop(writer);

        let mtime = FileTime::from_unix_time(mod_time.timestamp(), mod_time.timestamp_subsec_nanos());
        filetime::set_file_mtime(partial, mtime)?;

        ctx.check()?;
        fs::rename(partial, target).await?;
        Ok(written)
    }
}

/// Matches names produced by `write_file`: `.<name>.<uuid>.partial`.
fn is_partial(name: &str) -> bool {
    let Some(inner) = name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(PARTIAL_SUFFIX))
    else {
        return false;
    };
    match inner.rsplit_once('.') {
        Some((target, id)) => !target.is_empty() && uuid::Uuid::parse_str(id).is_ok(),
        None => false,
    }
}

fn location_for(root: &Path, path: &Path) -> Option<Location> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Location::new(segments).ok()
}

#[async_trait]
impl Filesystem for LocalFs {
    #[instrument(skip(self, ctx), level = "debug")]
    async fn checksum_cheap(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        ctx.check()?;
        let path = self.path_for(location)?;
        let meta = fs::metadata(&path).await.map_err(|e| FsError::from(e).at(location))?;
        if !meta.is_file() {
            return Err(FsError::NotFound(format!("{} is not a file", path.display())).at(location));
        }
        let modified: DateTime<Utc> = meta.modified()?.into();
        Ok(cheap_checksum(modified, meta.len()))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn checksum_content(&self, ctx: &Context, location: &Location) -> Result<String, FsError> {
        let mut file = self.open(ctx, location).await?;
        content_checksum(ctx, &mut file, None)
            .await
            .map_err(|e| e.at(location))
    }

    fn files(&self, ctx: &Context) -> EntryStream {
        let (tx, rx) = tokio::sync::mpsc::channel(ENTRY_QUEUE_CAPACITY);
        let root = self.root.clone();
        let producer_ctx = ctx.clone();

        tokio::task::spawn_blocking(move || {
            for next in WalkDir::new(&root).follow_links(false) {
                if producer_ctx.is_done() {
                    return;
                }
                let entry = match next {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!(error = %err, "skipping unreadable path during walk");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if is_partial(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                let Some(location) = location_for(&root, entry.path()) else {
                    continue;
                };
                let mod_time: DateTime<Utc> = match entry.metadata().map(|m| m.modified()) {
                    Ok(Ok(modified)) => modified.into(),
                    _ => {
                        warn!(path = %entry.path().display(), "cannot read modification time");
                        continue;
                    }
                };
                if tx.blocking_send(Entry::new(location, mod_time)).is_err() {
                    debug!("entry consumer went away, stopping walk");
                    return;
                }
            }
        });

        entry_stream(ctx, rx)
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn open(&self, ctx: &Context, location: &Location) -> Result<FileReader, FsError> {
        ctx.check()?;
        let path = self.path_for(location)?;
        let meta = fs::metadata(&path).await.map_err(|e| FsError::from(e).at(location))?;
        if !meta.is_file() {
            return Err(FsError::NotFound(format!("{} is not a file", path.display())).at(location));
        }
        let file = fs::File::open(&path).await.map_err(|e| FsError::from(e).at(location))?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self, ctx, src), level = "debug")]
    async fn write_file(
        &self,
        ctx: &Context,
        location: &Location,
        src: &mut (dyn AsyncRead + Send + Unpin),
        mod_time: DateTime<Utc>,
    ) -> Result<Location, FsError> {
        ctx.check()?;
        let target = self.path_for(location)?;
        let Some(parent) = target.parent() else {
            return Err(FsError::InvalidLocation(location.to_string()));
        };
        self.create_dir_all(parent)
            .await
            .map_err(|e| e.at(location))?;

        let partial = parent.join(format!(
            ".{}.{}{}",
            location.file_name(),
            uuid::Uuid::new_v4(),
            PARTIAL_SUFFIX
        ));

        match self.write_partial(ctx, &partial, &target, src, mod_time).await {
            Ok(written) => {
                debug!(bytes = written, path = %target.display(), "wrote file");
                Ok(location.clone())
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %cleanup, "failed to remove partial file");
                    }
                }
                Err(err.at(location))
            }
        }
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn remove_all(&self, ctx: &Context, location: &Location) -> Result<(), FsError> {
        ctx.check()?;
        let path = self.path_for(location)?;
        let meta = match fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(FsError::from(e).at(location)),
        };
        let res = if meta.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FsError::from(e).at(location)),
        }
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn move_file(
        &self,
        ctx: &Context,
        old: &Location,
        new: &Location,
    ) -> Result<Location, FsError> {
        ctx.check()?;
        let from = self.path_for(old)?;
        let to = self.path_for(new)?;
        if let Some(parent) = to.parent() {
            self.create_dir_all(parent).await.map_err(|e| e.at(new))?;
        }
        fs::rename(&from, &to).await.map_err(|e| FsError::from(e).at(old))?;
        Ok(new.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_rejects_escapes() {
        let fs = LocalFs::new("/srv/data", 0o755, 0o644);
        for bad in [vec!["..", "etc"], vec!["a", "."], vec!["a/b"]] {
            let location = Location::new(bad).unwrap();
            assert!(fs.path_for(&location).is_err());
        }
        let ok = Location::parse("a/b.txt").unwrap();
        assert_eq!(fs.path_for(&ok).unwrap(), PathBuf::from("/srv/data/a/b.txt"));
    }

    #[test]
    fn test_partial_names() {
        let id = uuid::Uuid::new_v4();
        assert!(is_partial(&format!(".report.pdf.{id}.partial")));
        assert!(!is_partial(&format!(".{id}.partial")));
        assert!(!is_partial(".report.pdf.0a1b.partial"));
        assert!(!is_partial(".notes.partial"));
        assert!(!is_partial("report.partial"));
        assert!(!is_partial(".hidden"));
    }

    #[test]
    fn test_location_for() {
        let root = Path::new("/srv/data");
        let location = location_for(root, Path::new("/srv/data/x/y.bin")).unwrap();
        assert_eq!(location.segments(), ["x", "y.bin"]);
        assert!(location_for(root, root).is_none());
    }
}
