//! SQLite persistence for library tracks and their match candidates.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::protocol::{
    LocalTrack, MatchCandidate, MatchType, MatchedFields, TechnicalMetadata, TrackDraft,
    TrackStatus, TrackTags, TracklistEntry,
};

const DATA_DIR_NAME: &str = "djset-tagger";
const DATABASE_FILE_NAME: &str = "library.db";

/// Failure of a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not encode stored JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("track {0} not found")]
    TrackNotFound(i64),
    #[error("candidate {0} not found")]
    CandidateNotFound(i64),
    #[error("could not prepare database directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no data directory available")]
    NoDataDir,
}

/// Track and candidate persistence used by matching, tagging and scanning.
pub trait TrackStore: Send + Sync {
    fn load_track(&self, track_id: i64) -> Result<LocalTrack, StoreError>;
    fn list_tracks(&self, status: Option<TrackStatus>) -> Result<Vec<LocalTrack>, StoreError>;
    fn list_ids_by_status(&self, status: TrackStatus) -> Result<Vec<i64>, StoreError>;
    /// The subset of `track_ids` known to the store, in the given order.
    fn existing_ids(&self, track_ids: &[i64]) -> Result<Vec<i64>, StoreError>;
    fn status_counts(&self) -> Result<Vec<(TrackStatus, usize)>, StoreError>;
    fn has_path(&self, path: &Path) -> Result<bool, StoreError>;
    /// Inserts a scanned file, or refreshes tags and properties of a known path.
    fn upsert_draft(&self, draft: &TrackDraft) -> Result<i64, StoreError>;
    fn update_tags(&self, track_id: i64, tags: &TrackTags) -> Result<(), StoreError>;
    fn set_status(
        &self,
        track_id: i64,
        status: TrackStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;
    /// Stores accepted metadata and marks the track matched.
    fn set_matched(&self, track_id: i64, matched: &MatchedFields) -> Result<(), StoreError>;
    /// Replaces all candidates of a track, keeping the given rank order.
    fn replace_candidates(
        &self,
        track_id: i64,
        candidates: &[MatchCandidate],
    ) -> Result<Vec<i64>, StoreError>;
    fn candidates_for_track(&self, track_id: i64) -> Result<Vec<MatchCandidate>, StoreError>;
    /// Returns the owning track id and the candidate.
    fn load_candidate(&self, candidate_id: i64) -> Result<(i64, MatchCandidate), StoreError>;
}

pub struct DbManager {
    conn: Mutex<Connection>,
}

const TRACK_COLUMNS: &str = "id, path, filename, directory, title, artist, album, genre, year, \
     has_cover, duration_secs, bitrate_kbps, sample_rate_hz, format, file_size, status, \
     error_message, matched_title, matched_artist, matched_album, matched_genre, matched_year, \
     matched_cover_url, matched_tracklist_url, matched_dj, matched_event, matched_source, \
     match_confidence";

const CANDIDATE_COLUMNS: &str = "id, track_id, title, artist, dj, genre, genres_json, cover_url, \
     tracklist_url, tracklist_id, event, date_recorded, source, confidence, match_type, \
     tracks_json, num_tracks";

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<LocalTrack> {
    let status: String = row.get(15)?;
    let confidence: Option<f64> = row.get(27)?;
    let matched = match confidence {
        Some(confidence) => Some(MatchedFields {
            title: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
            artist: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
            album: row.get::<_, Option<String>>(19)?.unwrap_or_default(),
            genre: row.get::<_, Option<String>>(20)?.unwrap_or_default(),
            year: row.get::<_, Option<String>>(21)?.unwrap_or_default(),
            cover_url: row.get::<_, Option<String>>(22)?.unwrap_or_default(),
            tracklist_url: row.get::<_, Option<String>>(23)?.unwrap_or_default(),
            dj: row.get::<_, Option<String>>(24)?.unwrap_or_default(),
            event: row.get::<_, Option<String>>(25)?.unwrap_or_default(),
            source: row.get::<_, Option<String>>(26)?.unwrap_or_default(),
            confidence,
        }),
        None => None,
    };
    Ok(LocalTrack {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        filename: row.get(2)?,
        directory: row.get(3)?,
        tags: TrackTags {
            title: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            artist: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            album: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            genre: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            year: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            has_cover: row.get::<_, i64>(9)? != 0,
        },
        technical: TechnicalMetadata {
            duration_secs: row.get(10)?,
            bitrate_kbps: row.get(11)?,
            sample_rate_hz: row.get(12)?,
            format: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
            file_size: row.get::<_, i64>(14)?.max(0) as u64,
        },
        status: TrackStatus::parse(&status).unwrap_or_default(),
        error_message: row.get(16)?,
        matched,
    })
}

struct CandidateRow {
    track_id: i64,
    candidate: MatchCandidate,
    genres_json: String,
    tracks_json: String,
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<CandidateRow> {
    let id: i64 = row.get(0)?;
    let match_type: String = row.get(14)?;
    Ok(CandidateRow {
        track_id: row.get(1)?,
        candidate: MatchCandidate {
            id: Some(id),
            title: row.get(2)?,
            artist: row.get(3)?,
            dj: row.get(4)?,
            genre: row.get(5)?,
            genres: Vec::new(),
            cover_url: row.get(7)?,
            tracklist_url: row.get(8)?,
            tracklist_id: row.get(9)?,
            event: row.get(10)?,
            date_recorded: row.get(11)?,
            source: row.get(12)?,
            confidence: row.get(13)?,
            match_type: MatchType::parse(&match_type),
            tracks: Vec::new(),
            num_tracks: row.get::<_, i64>(16)?.max(0) as usize,
        },
        genres_json: row.get(6)?,
        tracks_json: row.get(15)?,
    })
}

impl CandidateRow {
    fn decode(self) -> Result<(i64, MatchCandidate), StoreError> {
        let mut candidate = self.candidate;
        candidate.genres = serde_json::from_str::<Vec<String>>(&self.genres_json)?;
        candidate.tracks = serde_json::from_str::<Vec<TracklistEntry>>(&self.tracks_json)?;
        Ok((self.track_id, candidate))
    }
}

impl DbManager {
    /// Opens the database at `path`, or in the platform data directory when empty.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db_path = if path.trim().is_empty() {
            let data_dir = dirs::data_dir()
                .ok_or(StoreError::NoDataDir)?
                .join(DATA_DIR_NAME);
            data_dir.join(DATABASE_FILE_NAME)
        } else {
            PathBuf::from(path)
        };
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        info!("Opening library database at {}", db_path.display());
        Self::from_connection(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let db_manager = Self {
            conn: Mutex::new(conn),
        };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database connection lock poisoned")
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                directory TEXT NOT NULL,
                title TEXT,
                artist TEXT,
                album TEXT,
                genre TEXT,
                year TEXT,
                has_cover INTEGER NOT NULL DEFAULT 0,
                duration_secs REAL,
                bitrate_kbps INTEGER,
                sample_rate_hz INTEGER,
                format TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                matched_title TEXT,
                matched_artist TEXT,
                matched_album TEXT,
                matched_genre TEXT,
                matched_year TEXT,
                matched_cover_url TEXT,
                matched_tracklist_url TEXT,
                matched_dj TEXT,
                matched_event TEXT,
                matched_source TEXT,
                match_confidence REAL
            );
            CREATE INDEX IF NOT EXISTS idx_tracks_status ON tracks(status);
            CREATE TABLE IF NOT EXISTS match_candidates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                rank INTEGER NOT NULL,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                dj TEXT NOT NULL,
                genre TEXT NOT NULL,
                genres_json TEXT NOT NULL,
                cover_url TEXT NOT NULL,
                tracklist_url TEXT NOT NULL,
                tracklist_id TEXT NOT NULL,
                event TEXT NOT NULL,
                date_recorded TEXT NOT NULL,
                source TEXT NOT NULL,
                confidence REAL NOT NULL,
                match_type TEXT NOT NULL,
                tracks_json TEXT NOT NULL,
                num_tracks INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_candidates_track ON match_candidates(track_id, rank);",
        )?;
        Ok(())
    }
}

impl TrackStore for DbManager {
    fn load_track(&self, track_id: i64) -> Result<LocalTrack, StoreError> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"),
            params![track_id],
            track_from_row,
        )
        .optional()?
        .ok_or(StoreError::TrackNotFound(track_id))
    }

    fn list_tracks(&self, status: Option<TrackStatus>) -> Result<Vec<LocalTrack>, StoreError> {
        let conn = self.lock();
        let mut tracks = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TRACK_COLUMNS} FROM tracks WHERE status = ?1 ORDER BY id ASC"
                ))?;
                for track in stmt.query_map(params![status.as_str()], track_from_row)? {
                    tracks.push(track?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY id ASC"))?;
                for track in stmt.query_map([], track_from_row)? {
                    tracks.push(track?);
                }
            }
        }
        Ok(tracks)
    }

    fn list_ids_by_status(&self, status: TrackStatus) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id FROM tracks WHERE status = ?1 ORDER BY id ASC")?;
        let ids = stmt.query_map(params![status.as_str()], |row| row.get::<_, i64>(0))?;
        let mut result = Vec::new();
        for id in ids {
            result.push(id?);
        }
        Ok(result)
    }

    fn existing_ids(&self, track_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT 1 FROM tracks WHERE id = ?1")?;
        let mut result = Vec::new();
        for &track_id in track_ids {
            if stmt.exists(params![track_id])? && !result.contains(&track_id) {
                result.push(track_id);
            }
        }
        Ok(result)
    }

    fn status_counts(&self) -> Result<Vec<(TrackStatus, usize)>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM tracks GROUP BY status ORDER BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = TrackStatus::parse(&status) {
                counts.push((status, count.max(0) as usize));
            }
        }
        Ok(counts)
    }

    fn has_path(&self, path: &Path) -> Result<bool, StoreError> {
        let conn = self.lock();
        let exists = conn
            .prepare("SELECT 1 FROM tracks WHERE path = ?1")?
            .exists(params![path.to_string_lossy()])?;
        Ok(exists)
    }

    fn upsert_draft(&self, draft: &TrackDraft) -> Result<i64, StoreError> {
        let conn = self.lock();
        let path = draft.path.to_string_lossy();
        conn.execute(
            "INSERT INTO tracks (path, filename, directory, title, artist, album, genre, year,
                has_cover, duration_secs, bitrate_kbps, sample_rate_hz, format, file_size, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'pending')
             ON CONFLICT(path) DO UPDATE SET
                filename = excluded.filename,
                directory = excluded.directory,
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                genre = excluded.genre,
                year = excluded.year,
                has_cover = excluded.has_cover,
                duration_secs = excluded.duration_secs,
                bitrate_kbps = excluded.bitrate_kbps,
                sample_rate_hz = excluded.sample_rate_hz,
                format = excluded.format,
                file_size = excluded.file_size",
            params![
                path,
                draft.filename,
                draft.directory,
                draft.tags.title,
                draft.tags.artist,
                draft.tags.album,
                draft.tags.genre,
                draft.tags.year,
                draft.tags.has_cover as i64,
                draft.technical.duration_secs,
                draft.technical.bitrate_kbps,
                draft.technical.sample_rate_hz,
                draft.technical.format,
                draft.technical.file_size as i64,
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM tracks WHERE path = ?1",
            params![path],
            |row| row.get::<_, i64>(0),
        )?;
        debug!("Store: upserted track {} for {}", id, path);
        Ok(id)
    }

    fn update_tags(&self, track_id: i64, tags: &TrackTags) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tracks SET title = ?1, artist = ?2, album = ?3, genre = ?4, year = ?5,
                has_cover = ?6 WHERE id = ?7",
            params![
                tags.title,
                tags.artist,
                tags.album,
                tags.genre,
                tags.year,
                tags.has_cover as i64,
                track_id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::TrackNotFound(track_id));
        }
        Ok(())
    }

    fn set_status(
        &self,
        track_id: i64,
        status: TrackStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tracks SET status = ?1, error_message = ?2 WHERE id = ?3",
            params![status.as_str(), error_message, track_id],
        )?;
        if changed == 0 {
            return Err(StoreError::TrackNotFound(track_id));
        }
        Ok(())
    }

    fn set_matched(&self, track_id: i64, matched: &MatchedFields) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tracks SET matched_title = ?1, matched_artist = ?2, matched_album = ?3,
                matched_genre = ?4, matched_year = ?5, matched_cover_url = ?6,
                matched_tracklist_url = ?7, matched_dj = ?8, matched_event = ?9,
                matched_source = ?10, match_confidence = ?11, status = 'matched',
                error_message = NULL
             WHERE id = ?12",
            params![
                matched.title,
                matched.artist,
                matched.album,
                matched.genre,
                matched.year,
                matched.cover_url,
                matched.tracklist_url,
                matched.dj,
                matched.event,
                matched.source,
                matched.confidence,
                track_id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::TrackNotFound(track_id));
        }
        Ok(())
    }

    fn replace_candidates(
        &self,
        track_id: i64,
        candidates: &[MatchCandidate],
    ) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM match_candidates WHERE track_id = ?1",
            params![track_id],
        )?;
        let mut ids = Vec::with_capacity(candidates.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO match_candidates (track_id, rank, title, artist, dj, genre,
                    genres_json, cover_url, tracklist_url, tracklist_id, event, date_recorded,
                    source, confidence, match_type, tracks_json, num_tracks)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;
            for (rank, candidate) in candidates.iter().enumerate() {
                stmt.execute(params![
                    track_id,
                    rank as i64,
                    candidate.title,
                    candidate.artist,
                    candidate.dj,
                    candidate.genre,
                    serde_json::to_string(&candidate.genres)?,
                    candidate.cover_url,
                    candidate.tracklist_url,
                    candidate.tracklist_id,
                    candidate.event,
                    candidate.date_recorded,
                    candidate.source,
                    candidate.confidence,
                    candidate.match_type.as_str(),
                    serde_json::to_string(&candidate.tracks)?,
                    candidate.num_tracks as i64,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    fn candidates_for_track(&self, track_id: i64) -> Result<Vec<MatchCandidate>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM match_candidates WHERE track_id = ?1
             ORDER BY rank ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![track_id], candidate_from_row)?;
        let mut candidates = Vec::new();
        for row in rows {
            let (_, candidate) = row?.decode()?;
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    fn load_candidate(&self, candidate_id: i64) -> Result<(i64, MatchCandidate), StoreError> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {CANDIDATE_COLUMNS} FROM match_candidates WHERE id = ?1"),
            params![candidate_id],
            candidate_from_row,
        )
        .optional()?
        .ok_or(StoreError::CandidateNotFound(candidate_id))?
        .decode()
    }
}

#[cfg(test)]
pub mod test_support {
    use std::path::PathBuf;

    use crate::protocol::{TechnicalMetadata, TrackDraft, TrackTags};

    pub fn draft(filename: &str, artist: &str, title: &str) -> TrackDraft {
        TrackDraft {
            path: PathBuf::from(format!("/music/{filename}")),
            filename: filename.to_string(),
            directory: "/music".to_string(),
            tags: TrackTags {
                title: title.to_string(),
                artist: artist.to_string(),
                ..TrackTags::default()
            },
            technical: TechnicalMetadata {
                duration_secs: Some(3_600.0),
                format: "MP3".to_string(),
                ..TechnicalMetadata::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::test_support::draft;
    use super::{DbManager, StoreError, TrackStore};
    use crate::protocol::{
        MatchCandidate, MatchType, MatchedFields, TrackStatus, TrackTags, TracklistEntry,
    };

    fn candidate(title: &str, confidence: f64) -> MatchCandidate {
        MatchCandidate {
            title: title.to_string(),
            dj: "Carl Cox".to_string(),
            genres: vec!["Techno".to_string()],
            tracklist_url: format!("https://example.com/{title}"),
            confidence,
            match_type: MatchType::DirectSource,
            tracks: vec![TracklistEntry {
                position: 1,
                artist: "Joris Voorn".to_string(),
                title: "Incident".to_string(),
                time: "00:00".to_string(),
            }],
            num_tracks: 1,
            ..MatchCandidate::default()
        }
    }

    #[test]
    fn test_upsert_draft_is_keyed_by_path() {
        let db = DbManager::open_in_memory().expect("db");
        let first = db
            .upsert_draft(&draft("a.mp3", "Carl Cox", "Space"))
            .expect("insert");
        db.set_status(first, TrackStatus::Matched, None)
            .expect("status");
        let second = db
            .upsert_draft(&draft("a.mp3", "Carl Cox", "Space Closing"))
            .expect("update");
        assert_eq!(first, second);

        let track = db.load_track(first).expect("track");
        assert_eq!(track.tags.title, "Space Closing");
        assert_eq!(track.status, TrackStatus::Matched);
        assert_eq!(track.technical.duration_secs, Some(3_600.0));
        assert!(db.has_path(Path::new("/music/a.mp3")).expect("has path"));
        assert!(!db.has_path(Path::new("/music/b.mp3")).expect("has path"));
    }

    #[test]
    fn test_missing_track_is_reported() {
        let db = DbManager::open_in_memory().expect("db");
        assert!(matches!(
            db.load_track(42),
            Err(StoreError::TrackNotFound(42))
        ));
        assert!(matches!(
            db.set_status(42, TrackStatus::Error, Some("x")),
            Err(StoreError::TrackNotFound(42))
        ));
    }

    #[test]
    fn test_replace_candidates_keeps_rank_order_and_json_fields() {
        let db = DbManager::open_in_memory().expect("db");
        let id = db.upsert_draft(&draft("a.mp3", "", "")).expect("insert");
        db.replace_candidates(id, &[candidate("old", 99.0)])
            .expect("first");
        let ids = db
            .replace_candidates(id, &[candidate("best", 90.0), candidate("second", 75.0)])
            .expect("second");
        assert_eq!(ids.len(), 2);

        let stored = db.candidates_for_track(id).expect("candidates");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].title, "best");
        assert_eq!(stored[0].id, Some(ids[0]));
        assert_eq!(stored[0].genres, vec!["Techno"]);
        assert_eq!(stored[0].tracks[0].title, "Incident");
        assert_eq!(stored[0].match_type, MatchType::DirectSource);

        let (owner, loaded) = db.load_candidate(ids[1]).expect("candidate");
        assert_eq!(owner, id);
        assert_eq!(loaded.title, "second");
    }

    #[test]
    fn test_set_matched_round_trips_fields_and_clears_error() {
        let db = DbManager::open_in_memory().expect("db");
        let id = db.upsert_draft(&draft("a.mp3", "", "")).expect("insert");
        db.set_status(id, TrackStatus::Error, Some("boom"))
            .expect("status");
        let fields = MatchedFields {
            title: "Space Closing".to_string(),
            artist: "Carl Cox".to_string(),
            confidence: 91.5,
            ..MatchedFields::default()
        };
        db.set_matched(id, &fields).expect("matched");

        let track = db.load_track(id).expect("track");
        assert_eq!(track.status, TrackStatus::Matched);
        assert_eq!(track.error_message, None);
        assert_eq!(track.matched, Some(fields));
    }

    #[test]
    fn test_status_queries_filter_and_count() {
        let db = DbManager::open_in_memory().expect("db");
        let a = db.upsert_draft(&draft("a.mp3", "", "")).expect("a");
        let b = db.upsert_draft(&draft("b.mp3", "", "")).expect("b");
        let c = db.upsert_draft(&draft("c.mp3", "", "")).expect("c");
        db.set_status(b, TrackStatus::Tagged, None).expect("status");

        assert_eq!(
            db.list_ids_by_status(TrackStatus::Pending).expect("ids"),
            vec![a, c]
        );
        assert_eq!(db.existing_ids(&[c, 999, a, c]).expect("ids"), vec![c, a]);
        let counts = db.status_counts().expect("counts");
        assert!(counts.contains(&(TrackStatus::Pending, 2)));
        assert!(counts.contains(&(TrackStatus::Tagged, 1)));
        assert_eq!(db.list_tracks(Some(TrackStatus::Tagged)).expect("list").len(), 1);
        assert_eq!(db.list_tracks(None).expect("list").len(), 3);
    }

    #[test]
    fn test_update_tags_refreshes_current_tags() {
        let db = DbManager::open_in_memory().expect("db");
        let id = db.upsert_draft(&draft("a.mp3", "", "")).expect("insert");
        let tags = TrackTags {
            title: "Set".to_string(),
            has_cover: true,
            ..TrackTags::default()
        };
        db.update_tags(id, &tags).expect("tags");
        assert_eq!(db.load_track(id).expect("track").tags, tags);
    }
}
