//! Video Store: the SQLite table of uploaded videos plus the single
//! administrative credential row.
//!
//! The store is a cheap, cloneable handle that opens a short-lived connection
//! for each call, so request handlers can move it into blocking tasks without
//! sharing a connection across threads. Every mutation is a single autocommit
//! statement with `synchronous = FULL`, so it is durable once the call returns.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::{ReelError, ReelResult};

/// Storage format of `upload_date`. Lexicographic order matches time order.
pub const UPLOAD_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of the `videos` table.
///
/// `upload_date` is passed through exactly as stored; rows written by older
/// tools may carry a null or an unparseable value, which the presentation
/// layer has to tolerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub filename: String,
    pub upload_date: Option<String>,
    pub featured: bool,
}

/// Fields supplied by the caller when creating a record.
#[derive(Debug, Clone)]
pub struct NewVideo<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub filename: &'a str,
    pub featured: bool,
}

/// The stored administrative identity. `password_hash` is a PHC string.
#[derive(Debug, Clone)]
pub struct AdminCredential {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct VideoStore {
    db_path: PathBuf,
}

impl VideoStore {
    /// Opens (and if necessary creates) the database and ensures the schema
    /// exists. WAL mode keeps readers from blocking the occasional writer.
    pub fn open(path: impl AsRef<Path>) -> ReelResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let mut conn = store.connect()?;
        conn.pragma_update(None, "journal_mode", &"WAL")?;
        ensure_tables(&mut conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> ReelResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "synchronous", &"FULL")?;
        Ok(conn)
    }

    fn with_connection<F, T>(&self, f: F) -> ReelResult<T>
    where
        F: FnOnce(&Connection) -> ReelResult<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    /// Creates a record stamped with the current time and returns its id.
    pub fn insert(&self, video: &NewVideo<'_>) -> ReelResult<i64> {
        self.insert_with_date(video, Utc::now())
    }

    /// Same as [`VideoStore::insert`] with an explicit upload time, for
    /// imports and tests.
    pub fn insert_with_date(&self, video: &NewVideo<'_>, uploaded: DateTime<Utc>) -> ReelResult<i64> {
        if video.title.trim().is_empty() {
            return Err(ReelError::validation("title is required"));
        }
        if video.filename.trim().is_empty() {
            return Err(ReelError::validation("filename is required"));
        }

        let upload_date = uploaded.format(UPLOAD_DATE_FORMAT).to_string();
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO videos (title, description, filename, upload_date, featured)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    video.title,
                    video.description,
                    video.filename,
                    upload_date,
                    video.featured as i64,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get(&self, id: i64) -> ReelResult<VideoRecord> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    r#"
                    SELECT id, title, description, filename, upload_date, featured
                    FROM videos
                    WHERE id = ?1
                    "#,
                    [id],
                    row_to_video,
                )
                .optional()?;
            record.ok_or(ReelError::NotFound(id))
        })
    }

    /// Removes the metadata row only. Removing the backing file is the
    /// caller's job.
    pub fn delete(&self, id: i64) -> ReelResult<()> {
        self.with_connection(|conn| {
            let affected = conn.execute("DELETE FROM videos WHERE id = ?1", [id])?;
            if affected == 0 {
                return Err(ReelError::NotFound(id));
            }
            Ok(())
        })
    }

    pub fn set_featured(&self, id: i64, featured: bool) -> ReelResult<()> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE videos SET featured = ?1 WHERE id = ?2",
                params![featured as i64, id],
            )?;
            if affected == 0 {
                return Err(ReelError::NotFound(id));
            }
            Ok(())
        })
    }

    /// Flips the flag in place and returns the new value.
    pub fn toggle_featured(&self, id: i64) -> ReelResult<bool> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE videos SET featured = 1 - featured WHERE id = ?1",
                [id],
            )?;
            if affected == 0 {
                return Err(ReelError::NotFound(id));
            }
            let featured: i64 =
                conn.query_row("SELECT featured FROM videos WHERE id = ?1", [id], |row| {
                    row.get(0)
                })?;
            Ok(featured != 0)
        })
    }

    pub fn list_featured(&self, limit: usize) -> ReelResult<Vec<VideoRecord>> {
        self.query_videos("WHERE featured = 1", Some(limit))
    }

    pub fn list_recent(&self, limit: usize) -> ReelResult<Vec<VideoRecord>> {
        self.query_videos("", Some(limit))
    }

    pub fn list_all(&self) -> ReelResult<Vec<VideoRecord>> {
        self.query_videos("", None)
    }

    pub fn list_non_featured(&self) -> ReelResult<Vec<VideoRecord>> {
        self.query_videos("WHERE featured = 0", None)
    }

    /// Every stored filename, used by the storage audit.
    pub fn filenames(&self) -> ReelResult<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT filename FROM videos")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }

    /// Shared SELECT for the ordered listings. Ties on `upload_date` fall back
    /// to descending id so results stay deterministic.
    fn query_videos(&self, filter: &str, limit: Option<usize>) -> ReelResult<Vec<VideoRecord>> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |value| i64::try_from(value).unwrap_or(i64::MAX));
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT id, title, description, filename, upload_date, featured
                FROM videos
                {filter}
                ORDER BY upload_date DESC, id DESC
                LIMIT ?1
                "#
            ))?;

            let mut rows = stmt.query([limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_video(row)?);
            }
            Ok(records)
        })
    }

    pub fn admin_credential(&self) -> ReelResult<Option<AdminCredential>> {
        self.with_connection(|conn| {
            let credential = conn
                .query_row(
                    "SELECT username, password_hash FROM admin_credential WHERE id = 1",
                    [],
                    |row| {
                        Ok(AdminCredential {
                            username: row.get(0)?,
                            password_hash: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(credential)
        })
    }

    /// Stores the one administrative credential, replacing any previous one.
    pub fn set_admin_credential(&self, username: &str, password_hash: &str) -> ReelResult<()> {
        if username.trim().is_empty() {
            return Err(ReelError::validation("username is required"));
        }
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO admin_credential (id, username, password_hash)
                VALUES (1, ?1, ?2)
                ON CONFLICT(id) DO UPDATE SET
                    username = excluded.username,
                    password_hash = excluded.password_hash
                "#,
                params![username, password_hash],
            )?;
            Ok(())
        })
    }
}

/// Creates the tables if they do not already exist, inside one transaction
/// so a failure leaves the database untouched. AUTOINCREMENT keeps ids from
/// ever being reused after a delete.
fn ensure_tables(conn: &mut Connection) -> ReelResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            filename TEXT NOT NULL UNIQUE,
            upload_date TEXT DEFAULT CURRENT_TIMESTAMP,
            featured INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_videos_upload_date ON videos(upload_date);

        CREATE TABLE IF NOT EXISTS admin_credential (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            username TEXT NOT NULL,
            password_hash TEXT NOT NULL
        );
        "#,
    )?;
    tx.commit()?;
    Ok(())
}

/// Converts a SQL row into a `VideoRecord`, normalizing the INTEGER flag.
fn row_to_video(row: &Row<'_>) -> rusqlite::Result<VideoRecord> {
    Ok(VideoRecord {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row
            .get::<_, Option<String>>("description")?
            .unwrap_or_default(),
        filename: row.get("filename")?,
        upload_date: row.get("upload_date")?,
        featured: row.get::<_, i64>("featured").map(|value| value != 0)?,
    })
}
