//! Rendering boundary: turns stored records into display cards.
//!
//! Formatting never fails; a missing or unparseable upload date renders as a
//! neutral label and a record whose file has gone missing is flagged rather
//! than dropped.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::intake::FileIntake;
use crate::listing::{AdminView, HighlightsView, HomeView};
use crate::store::{UPLOAD_DATE_FORMAT, VideoRecord};

pub const DATE_FALLBACK: &str = "Recently uploaded";
pub const DISPLAY_DATE_FORMAT: &str = "%B %d, %Y";
pub const MEDIA_URL_PREFIX: &str = "/uploads";

pub fn display_date(raw: Option<&str>) -> String {
    raw.and_then(|value| NaiveDateTime::parse_from_str(value.trim(), UPLOAD_DATE_FORMAT).ok())
        .map(|date| date.format(DISPLAY_DATE_FORMAT).to_string())
        .unwrap_or_else(|| DATE_FALLBACK.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoCard {
    #[serde(flatten)]
    pub record: VideoRecord,
    pub display_date: String,
    pub media_url: String,
    pub file_available: bool,
}

impl VideoCard {
    pub fn new(record: VideoRecord, intake: &FileIntake) -> Self {
        let file_available = intake.exists(&record.filename);
        Self {
            display_date: display_date(record.upload_date.as_deref()),
            media_url: format!("{MEDIA_URL_PREFIX}/{}", record.filename),
            file_available,
            record,
        }
    }
}

fn cards(records: Vec<VideoRecord>, intake: &FileIntake) -> Vec<VideoCard> {
    records
        .into_iter()
        .map(|record| VideoCard::new(record, intake))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct HomePage {
    pub featured_videos: Vec<VideoCard>,
    pub recent_videos: Vec<VideoCard>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HighlightsPage {
    pub featured_videos: Vec<VideoCard>,
    pub other_videos: Vec<VideoCard>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardPage {
    pub videos: Vec<VideoCard>,
}

impl HomePage {
    pub fn render(view: HomeView, intake: &FileIntake) -> Self {
        Self {
            featured_videos: cards(view.featured, intake),
            recent_videos: cards(view.recent, intake),
        }
    }
}

impl HighlightsPage {
    pub fn render(view: HighlightsView, intake: &FileIntake) -> Self {
        Self {
            featured_videos: cards(view.featured, intake),
            other_videos: cards(view.others, intake),
        }
    }
}

impl DashboardPage {
    pub fn render(view: AdminView, intake: &FileIntake) -> Self {
        Self {
            videos: cards(view.videos, intake),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn record(filename: &str, upload_date: Option<&str>) -> VideoRecord {
        VideoRecord {
            id: 7,
            title: "Intro".into(),
            description: String::new(),
            filename: filename.into(),
            upload_date: upload_date.map(str::to_string),
            featured: true,
        }
    }

    #[test]
    fn formats_stored_dates() {
        assert_eq!(display_date(Some("2024-01-05 13:45:00")), "January 05, 2024");
    }

    #[test]
    fn falls_back_on_missing_or_bad_dates() {
        for raw in [None, Some(""), Some("yesterday"), Some("2024-13-40 99:00:00")] {
            assert_eq!(display_date(raw), DATE_FALLBACK);
        }
    }

    #[test]
    fn card_flags_missing_files() -> Result<()> {
        let dir = tempdir()?;
        let intake = FileIntake::new(dir.path())?;
        intake.store(b"bytes", "present.mp4")?;

        let present = VideoCard::new(record("present.mp4", None), &intake);
        assert!(present.file_available);
        assert_eq!(present.media_url, "/uploads/present.mp4");
        assert_eq!(present.display_date, DATE_FALLBACK);

        let dangling = VideoCard::new(record("gone.mp4", Some("2024-01-05 13:45:00")), &intake);
        assert!(!dangling.file_available);
        Ok(())
    }

    #[test]
    fn card_serializes_flat() -> Result<()> {
        let dir = tempdir()?;
        let intake = FileIntake::new(dir.path())?;
        let card = VideoCard::new(record("a.mp4", Some("2024-01-05 13:45:00")), &intake);
        let json = serde_json::to_value(&card)?;
        assert_eq!(json["title"], "Intro");
        assert_eq!(json["display_date"], "January 05, 2024");
        assert_eq!(json["file_available"], false);
        Ok(())
    }
}
