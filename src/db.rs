//! Metadata store: file records and per-folder watermarks
//!
//! The scanner only needs the [`MetadataStore`] contract. [`ScanDatabase`]
//! is the SQLite implementation; the extra query methods on it serve
//! list/info/delete readers.
//!
//! Readers running while a folder is being rescanned may see zero or a
//! partial set of rows for that folder. Writers are expected to be a single
//! scan pass at a time.

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::path::Path;

use crate::error::ScanError;
use crate::models::{FileRecord, FileType, FolderWatermark, SortKey, SortOrder};

/// Store contract consumed by the scan orchestrator
pub trait MetadataStore: Send {
    /// Delete every record of `folder`, then insert `records`, as one unit.
    /// Returns the number of records inserted.
    fn replace_folder_records(
        &mut self,
        folder: &str,
        records: &[FileRecord],
    ) -> Result<usize, ScanError>;

    /// Set the folder's watermark
    fn upsert_watermark(&mut self, folder: &str, mtime: f64) -> Result<(), ScanError>;

    /// Read the folder's watermark, if one was ever written
    fn get_watermark(&self, folder: &str) -> Result<Option<f64>, ScanError>;

    /// Forget the folder's watermark
    fn remove_watermark(&mut self, folder: &str) -> Result<(), ScanError>;

    /// Every folder with records or a watermark, sorted
    fn known_folders(&self) -> Result<Vec<String>, ScanError>;
}

/// SQLite-backed metadata store
pub struct ScanDatabase {
    conn: Connection,
}

impl std::fmt::Debug for ScanDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDatabase")
            .field("path", &self.conn.path())
            .finish()
    }
}

const RECORD_COLUMNS: &str =
    "file_path, root_folder, file_name, file_type, file_size, content_hash, width, height";

fn record_from_row(row: &Row<'_>) -> SqliteResult<FileRecord> {
    Ok(FileRecord {
        file_path: row.get(0)?,
        root_folder: row.get(1)?,
        file_name: row.get(2)?,
        file_type: FileType::parse(&row.get::<_, String>(3)?),
        file_size: row.get::<_, i64>(4)? as u64,
        content_hash: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
    })
}

impl ScanDatabase {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        let conn = Connection::open(path).map_err(|e| ScanError::from(e).with_path(path))?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                file_path TEXT PRIMARY KEY,
                root_folder TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                width INTEGER,
                height INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_files_root_folder ON files(root_folder);
            CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash);

            CREATE TABLE IF NOT EXISTS folder_mtime (
                folder TEXT PRIMARY KEY,
                last_mtime REAL NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Records of one folder, ordered by `key` then path
    pub fn list_folder_records(
        &self,
        folder: &str,
        key: SortKey,
        order: SortOrder,
    ) -> Result<Vec<FileRecord>, ScanError> {
        // Column and direction come from closed enums, never from input text
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM files WHERE root_folder = ?1 ORDER BY {} {}, file_path ASC",
            key.column(),
            order.keyword()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([folder], record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Look up one record by absolute path
    pub fn get_record(&self, file_path: &str) -> Result<Option<FileRecord>, ScanError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files WHERE file_path = ?1");
        let record = self
            .conn
            .query_row(&sql, [file_path], record_from_row)
            .optional()?;
        Ok(record)
    }

    /// Remove one record; returns whether a row existed
    pub fn delete_record(&mut self, file_path: &str) -> Result<bool, ScanError> {
        let removed = self
            .conn
            .execute("DELETE FROM files WHERE file_path = ?1", [file_path])?;
        Ok(removed > 0)
    }

    /// Get file count
    pub fn file_count(&self) -> Result<u64, ScanError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Record count of one folder
    pub fn folder_record_count(&self, folder: &str) -> Result<u64, ScanError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM files WHERE root_folder = ?1",
            [folder],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// All watermarks, ordered by folder name
    pub fn list_watermarks(&self) -> Result<Vec<FolderWatermark>, ScanError> {
        let mut stmt = self
            .conn
            .prepare("SELECT folder, last_mtime FROM folder_mtime ORDER BY folder")?;
        let rows = stmt.query_map([], |row| {
            Ok(FolderWatermark {
                folder: row.get(0)?,
                last_mtime: row.get(1)?,
            })
        })?;

        let mut marks = Vec::new();
        for row in rows {
            marks.push(row?);
        }
        Ok(marks)
    }
}

impl MetadataStore for ScanDatabase {
    fn replace_folder_records(
        &mut self,
        folder: &str,
        records: &[FileRecord],
    ) -> Result<usize, ScanError> {
        let tx = self.conn.transaction()?;
        {
            tx.execute("DELETE FROM files WHERE root_folder = ?1", [folder])?;

            // Upsert by path so a record that moved folders is replaced, not duplicated
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO files
                 (file_path, root_folder, file_name, file_type, file_size, content_hash, width, height)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for record in records {
                stmt.execute(params![
                    record.file_path,
                    record.root_folder,
                    record.file_name,
                    record.file_type.as_str(),
                    record.file_size as i64,
                    record.content_hash,
                    record.width,
                    record.height,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn upsert_watermark(&mut self, folder: &str, mtime: f64) -> Result<(), ScanError> {
        self.conn.execute(
            "INSERT INTO folder_mtime (folder, last_mtime) VALUES (?1, ?2)
             ON CONFLICT(folder) DO UPDATE SET last_mtime = excluded.last_mtime",
            params![folder, mtime],
        )?;
        Ok(())
    }

    fn get_watermark(&self, folder: &str) -> Result<Option<f64>, ScanError> {
        let mtime = self
            .conn
            .query_row(
                "SELECT last_mtime FROM folder_mtime WHERE folder = ?1",
                [folder],
                |row| row.get(0),
            )
            .optional()?;
        Ok(mtime)
    }

    fn remove_watermark(&mut self, folder: &str) -> Result<(), ScanError> {
        self.conn
            .execute("DELETE FROM folder_mtime WHERE folder = ?1", [folder])?;
        Ok(())
    }

    fn known_folders(&self) -> Result<Vec<String>, ScanError> {
        let mut stmt = self.conn.prepare(
            "SELECT root_folder FROM files
             UNION
             SELECT folder FROM folder_mtime
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut folders: Vec<String> = Vec::new();
        for row in rows {
            folders.push(row?);
        }
        Ok(folders)
    }
}
