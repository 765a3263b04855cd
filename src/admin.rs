//! Mutating admin flows. Each one needs an [`Authenticated`] proof from the
//! session gate and touches the storage root and the video table in a fixed
//! order:
//!
//! - upload writes the file first and only then inserts the record; if the
//!   insert fails the file is removed again;
//! - delete removes the file first and deletes the record even when the file
//!   removal fails, so a stray file can be left behind but never a record.

use tracing::{info, warn};

use crate::error::{ReelError, ReelResult};
use crate::intake::{FileIntake, StagedFile, assign_storage_name};
use crate::session::Authenticated;
use crate::store::{NewVideo, VideoRecord, VideoStore};

/// One upload as delivered by the HTTP boundary: the payload is already
/// staged in the storage root and under the size cap.
#[derive(Debug)]
pub struct Upload<'a> {
    pub original_name: &'a str,
    pub file: StagedFile,
    pub title: &'a str,
    pub description: &'a str,
    pub featured: bool,
}

#[derive(Debug, Clone)]
pub struct AdminActions {
    store: VideoStore,
    intake: FileIntake,
}

impl AdminActions {
    pub fn new(store: VideoStore, intake: FileIntake) -> Self {
        Self { store, intake }
    }

    /// A rejected upload drops its staged file, so nothing stays on disk.
    pub fn upload(&self, _auth: &Authenticated, upload: Upload<'_>) -> ReelResult<VideoRecord> {
        if upload.title.trim().is_empty() {
            return Err(ReelError::validation("title is required"));
        }
        let storage_name = assign_storage_name(upload.original_name)?;

        let bytes = upload.file.len();
        self.intake.commit(upload.file, &storage_name)?;

        let inserted = self.store.insert(&NewVideo {
            title: upload.title.trim(),
            description: upload.description,
            filename: &storage_name,
            featured: upload.featured,
        });
        let id = match inserted {
            Ok(id) => id,
            Err(err) => {
                if let Err(cleanup) = self.intake.delete(&storage_name) {
                    warn!(
                        storage_name = %storage_name,
                        error = %cleanup,
                        "could not remove file after failed insert"
                    );
                }
                return Err(err);
            }
        };

        info!(
            video_id = id,
            storage_name = %storage_name,
            bytes,
            featured = upload.featured,
            "video uploaded"
        );
        self.store.get(id)
    }

    /// Returns the removed record.
    pub fn delete(&self, _auth: &Authenticated, id: i64) -> ReelResult<VideoRecord> {
        let record = self.store.get(id)?;
        if let Err(err) = self.intake.delete(&record.filename) {
            warn!(
                video_id = id,
                storage_name = %record.filename,
                error = %err,
                "could not remove video file; deleting record anyway"
            );
        }
        self.store.delete(id)?;
        info!(video_id = id, "video deleted");
        Ok(record)
    }

    /// Returns the new value of the flag.
    pub fn toggle_featured(&self, _auth: &Authenticated, id: i64) -> ReelResult<bool> {
        let featured = self.store.toggle_featured(id)?;
        info!(video_id = id, featured, "featured flag toggled");
        Ok(featured)
    }
}
