//! File Intake: extension allow-list, storage-name assignment and the byte
//! store under the storage root.
//!
//! Size limits are enforced by the HTTP boundary while bytes are staged.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ReelError, ReelResult};
use crate::security::short_hex_token;

/// Video containers accepted for upload. Anything else is refused so the
/// storage root never holds arbitrary executable or script content.
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "wmv", "flv", "webm"];

/// Default cap applied by the upload boundary.
pub const MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// Longest file name the common filesystems accept.
pub const MAX_STORAGE_NAME_BYTES: usize = 255;

const STORAGE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Returns the lowercased extension when it is on the allow-list.
pub fn allowed_extension(original_name: &str) -> Option<String> {
    let (_, ext) = original_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

pub fn validate_extension(original_name: &str) -> ReelResult<String> {
    if original_name.trim().is_empty() {
        return Err(ReelError::validation("no file selected"));
    }
    allowed_extension(original_name).ok_or_else(|| {
        ReelError::validation(format!(
            "invalid file type; allowed extensions are {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))
    })
}

/// Reduces a client-supplied filename to `[A-Za-z0-9_.-]`. Path separators
/// become word breaks, whitespace runs become `_`, and leading or trailing
/// dots and underscores are stripped, so `../../etc/passwd.mp4` turns into
/// `etc_passwd.mp4`.
pub fn sanitize_filename(original_name: &str) -> String {
    let spaced: String = original_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Assigns a unique storage name: `YYYYMMDD_HHMMSS_<8 hex>_<sanitized>`.
/// The random token keeps two uploads of the same name within one second
/// apart. Long names are shortened so the result fits in
/// [`MAX_STORAGE_NAME_BYTES`].
pub fn assign_storage_name(original_name: &str) -> ReelResult<String> {
    assign_storage_name_at(original_name, Utc::now())
}

pub fn assign_storage_name_at(original_name: &str, now: DateTime<Utc>) -> ReelResult<String> {
    let ext = validate_extension(original_name)?;
    let mut sanitized = sanitize_filename(original_name);
    // Names made entirely of unsafe characters lose their stem or extension.
    if allowed_extension(&sanitized).is_none() || sanitized.starts_with('.') {
        sanitized = format!("video.{ext}");
    }
    let prefix = format!(
        "{}_{}_",
        now.format(STORAGE_TIMESTAMP_FORMAT),
        short_hex_token()
    );
    let name = truncate_stem(&sanitized, MAX_STORAGE_NAME_BYTES - prefix.len());
    Ok(format!("{prefix}{name}"))
}

/// Cuts the stem of a sanitized (ASCII) `stem.ext` name down to `max` bytes
/// in total, keeping the extension.
fn truncate_stem(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return name[..max].to_string();
    };
    let keep = max.saturating_sub(ext.len() + 1).min(stem.len());
    let stem = stem[..keep].trim_end_matches(['.', '_']);
    let stem = if stem.is_empty() { "video" } else { stem };
    format!("{stem}.{ext}")
}

/// An upload in flight: a hidden temporary file in the storage root that the
/// HTTP boundary fills chunk by chunk. Dropping it without
/// [`FileIntake::commit`] removes the partial file.
#[derive(Debug)]
pub struct StagedFile {
    tmp: NamedTempFile,
    len: u64,
}

impl StagedFile {
    pub fn write_chunk(&mut self, chunk: &[u8]) -> ReelResult<()> {
        self.tmp.write_all(chunk)?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Byte store rooted at one directory. Every name is checked to resolve to a
/// direct child of the root.
#[derive(Debug, Clone)]
pub struct FileIntake {
    root: PathBuf,
}

impl FileIntake {
    /// Creates the storage root if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> ReelResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a storage name to its path, refusing anything that is not a single
    /// plain path component.
    pub fn resolve(&self, storage_name: &str) -> ReelResult<PathBuf> {
        let invalid = || ReelError::validation(format!("invalid storage name `{storage_name}`"));
        if storage_name.is_empty() || storage_name.contains('\\') || storage_name.starts_with('.') {
            return Err(invalid());
        }
        let mut components = Path::new(storage_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(storage_name)),
            _ => Err(invalid()),
        }
    }

    /// Opens a staged file next to the final location, so committing it is a
    /// rename within one filesystem.
    pub fn stage(&self) -> ReelResult<StagedFile> {
        Ok(StagedFile {
            tmp: NamedTempFile::new_in(&self.root)?,
            len: 0,
        })
    }

    /// Syncs the staged bytes and moves them into place without clobbering an
    /// existing file. Readers never observe a partially written video.
    pub fn commit(&self, staged: StagedFile, storage_name: &str) -> ReelResult<PathBuf> {
        let target = self.resolve(storage_name)?;
        let bytes = staged.len;
        staged.tmp.as_file().sync_all()?;
        staged
            .tmp
            .persist_noclobber(&target)
            .map_err(|err| err.error)?;
        debug!(storage_name, bytes, "stored upload");
        Ok(target)
    }

    /// Stores an in-memory payload under `storage_name`.
    pub fn store(&self, bytes: &[u8], storage_name: &str) -> ReelResult<PathBuf> {
        self.resolve(storage_name)?;
        let mut staged = self.stage()?;
        staged.write_chunk(bytes)?;
        self.commit(staged, storage_name)
    }

    /// Removes a stored file. A name that is already gone is not an error.
    pub fn delete(&self, storage_name: &str) -> ReelResult<()> {
        let path = self.resolve(storage_name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn exists(&self, storage_name: &str) -> bool {
        self.resolve(storage_name)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Names of the regular files directly under the root, sorted. Hidden
    /// entries (including in-flight temporary files) are skipped.
    pub fn stored_names(&self) -> ReelResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                ReelError::Io(
                    err.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walking storage root")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
