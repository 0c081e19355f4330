use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use depot_types::{Payload, StoredObject};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, trace, warn};

use crate::cursor::ResultCursor;
use crate::error::{StoreError, StoreResult};
use crate::layout::{escape_file_name, prune_empty_dirs, ShardLayout};
use crate::range::ByteRange;
use crate::traits::{ObjectStore, PayloadReader};

const DB_FILE: &str = "objects.db";
const PAYLOADS_DIR: &str = "payloads";
const PAGE_SIZE: usize = 256;

/// Distinguishes staging files of concurrent creates within one process.
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Disk-backed object store.
///
/// Records live in an SQLite table keyed by id (`<dir>/objects.db`). Payload
/// bytes live in individual files under a hash-sharded tree rooted at
/// `<dir>/payloads`, one leaf directory per object. A single writing process
/// per data directory is assumed; payload files are not locked.
pub struct DurableStore {
    base_dir: PathBuf,
    payloads_dir: PathBuf,
    layout: ShardLayout,
    conn: Mutex<Option<Connection>>,
}

impl DurableStore {
    /// Open (or initialise) a store in `dir` with the default shard layout.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_layout(dir, ShardLayout::default())
    }

    pub fn open_with_layout(dir: impl AsRef<Path>, layout: ShardLayout) -> StoreResult<Self> {
        let base_dir = dir.as_ref().to_path_buf();
        let payloads_dir = base_dir.join(PAYLOADS_DIR);
        fs::create_dir_all(&payloads_dir)?;

        let conn = Connection::open(base_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS objects (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                record TEXT NOT NULL
            )",
            [],
        )?;

        debug!(dir = %base_dir.display(), ?layout, "durable store opened");
        Ok(Self {
            base_dir,
            payloads_dir,
            layout,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn payloads_dir(&self) -> &Path {
        &self.payloads_dir
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// Leaf directory holding the payload files of `id`.
    pub fn object_dir(&self, id: &str) -> PathBuf {
        self.layout.object_dir(&self.payloads_dir, id)
    }

    fn payload_path(&self, id: &str, name: &str) -> PathBuf {
        self.object_dir(id).join(escape_file_name(name))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.conn.lock().expect("lock poisoned");
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    fn read_record(&self, id: &str) -> StoreResult<Option<StoredObject>> {
        let json: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT record FROM objects WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?)
        })?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn count(&self) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }

    /// Stream a payload's source to its file and record the byte count.
    fn write_payload(&self, id: &str, payload: &mut Payload) -> StoreResult<()> {
        let path = self.payload_path(id, &payload.name);
        self.write_payload_to(id, payload, &path)
    }

    fn write_payload_to(&self, id: &str, payload: &mut Payload, path: &Path) -> StoreResult<()> {
        let Some(mut source) = payload.take_source() else {
            return Ok(());
        };
        let dir = self.object_dir(id);
        let write_err = |source: io::Error| StoreError::PayloadWrite {
            id: id.to_string(),
            name: payload.name.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(write_err)?;
        let file = match File::create(path) {
            Ok(file) => file,
            // A concurrent delete may have pruned the fresh directory.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&dir).map_err(write_err)?;
                File::create(path).map_err(write_err)?
            }
            Err(e) => return Err(write_err(e)),
        };

        let mut writer = BufWriter::new(file);
        let size = io::copy(&mut source, &mut writer).map_err(write_err)?;
        writer.flush().map_err(write_err)?;
        payload.size = size;
        Ok(())
    }

    /// A file name in the object directory that no escaped payload name can
    /// collide with (escaping never emits `~`).
    fn staging_path(&self, id: &str, name: &str) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.object_dir(id).join(format!(
            "~{}-{seq}~{}",
            std::process::id(),
            escape_file_name(name)
        ))
    }

    /// Write every sourced payload of a new object to staging files, then
    /// insert its record. `staged` receives each file before it is written,
    /// so a failure leaves it listing everything to discard.
    fn stage_and_insert(
        &self,
        object: &mut StoredObject,
        staged: &mut Vec<StagedPayload>,
    ) -> StoreResult<()> {
        let id = object.id.clone();
        for payload in object.payloads.iter_mut().flatten() {
            if !payload.has_source() {
                continue;
            }
            let staging = self.staging_path(&id, &payload.name);
            staged.push(StagedPayload {
                name: payload.name.clone(),
                staging: staging.clone(),
                target: self.payload_path(&id, &payload.name),
            });
            self.write_payload_to(&id, payload, &staging)?;
        }
        object.normalize_payloads();
        let record = serde_json::to_string(&*object)?;

        let inserted = self.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO objects (id, type, record) VALUES (?1, ?2, ?3)",
                params![id, object.object_type, record],
            )?)
        })?;
        if inserted == 0 {
            return Err(StoreError::Conflict(id));
        }
        Ok(())
    }

    /// Move staged files to their payload names once the record exists.
    fn publish_staged(&self, id: &str, staged: Vec<StagedPayload>) -> StoreResult<()> {
        for file in staged {
            fs::rename(&file.staging, &file.target).map_err(|source| StoreError::PayloadWrite {
                id: id.to_string(),
                name: file.name,
                source,
            })?;
        }
        Ok(())
    }

    /// Remove the staging files of a failed create and any shard directory
    /// left empty. Failures here are logged; the create's own error wins.
    fn discard_staged(&self, id: &str, staged: &[StagedPayload]) {
        for file in staged {
            if let Err(e) = fs::remove_file(&file.staging) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(id = %id, path = %file.staging.display(), error = %e, "staging file not removed");
                }
            }
        }
        if let Err(e) = prune_empty_dirs(&self.object_dir(id), &self.payloads_dir) {
            warn!(id = %id, error = %e, "pruning after failed create");
        }
    }

    /// Remove the leaf directory of `id` and every ancestor it leaves empty.
    fn remove_object_dir(&self, id: &str) -> StoreResult<usize> {
        let dir = self.object_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(match dir.parent() {
            Some(parent) => prune_empty_dirs(parent, &self.payloads_dir)?,
            None => 0,
        })
    }

    fn write_payloads(&self, object: &mut StoredObject) -> StoreResult<usize> {
        let mut written = 0;
        for payload in object.payloads.iter_mut().flatten() {
            if payload.has_source() {
                self.write_payload(&object.id, payload)?;
                written += 1;
            }
        }
        object.normalize_payloads();
        Ok(written)
    }

    fn remove_payload_file(&self, id: &str, name: &str) -> StoreResult<()> {
        match fs::remove_file(self.payload_path(id, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn open_payload(&self, id: &str, name: &str) -> StoreResult<Option<File>> {
        match File::open(self.payload_path(id, name)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn pages<T>(&self, sql: &'static str, read: RowReader<T>) -> StoreResult<Pages<'_, T>> {
        // Fail fast on a closed store rather than on the first element.
        self.with_conn(|_| Ok(()))?;
        Ok(Pages {
            store: self,
            sql,
            read,
            after: String::new(),
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }
}

impl ObjectStore for DurableStore {
    fn get(&self, id: &str) -> StoreResult<StoredObject> {
        self.read_record(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn exists(&self, id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT 1 FROM objects WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some())
        })
    }

    fn get_payload(&self, id: &str, name: &str) -> StoreResult<Option<PayloadReader>> {
        Ok(self
            .open_payload(id, name)?
            .map(|file| Box::new(BufReader::new(file)) as PayloadReader))
    }

    fn get_payload_range(
        &self,
        id: &str,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreResult<Option<PayloadReader>> {
        let Some(mut file) = self.open_payload(id, name)? else {
            return Ok(None);
        };
        let range = ByteRange::resolve(start, end, file.metadata()?.len());
        file.seek(SeekFrom::Start(range.offset))?;
        Ok(Some(Box::new(BufReader::new(file).take(range.length))))
    }

    fn create(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        object.validate_id()?;
        if self.exists(&object.id)? {
            return Err(StoreError::Conflict(object.id));
        }

        object.take_payloads_to_delete();
        let mut staged = Vec::new();
        if let Err(e) = self.stage_and_insert(&mut object, &mut staged) {
            self.discard_staged(&object.id, &staged);
            return Err(e);
        }
        let written = staged.len();
        self.publish_staged(&object.id, staged)?;

        debug!(id = %object.id, payloads = written, "object created");
        self.get(&object.id)
    }

    fn update(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        object.validate_id()?;
        if !self.exists(&object.id)? {
            return Err(StoreError::NotFound(object.id));
        }

        let staged = object.take_payloads_to_delete();
        for name in &staged {
            self.remove_payload_file(&object.id, name)?;
        }
        let written = self.write_payloads(&mut object)?;
        let record = serde_json::to_string(&object)?;

        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE objects SET type = ?2, record = ?3 WHERE id = ?1",
                params![object.id, object.object_type, record],
            )?)
        })?;
        if updated == 0 {
            return Err(StoreError::NotFound(object.id));
        }

        debug!(
            id = %object.id,
            payloads = written,
            deleted = staged.len(),
            "object updated"
        );
        self.get(&object.id)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let deleted = self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM objects WHERE id = ?1", [id])?)
        })?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let pruned = self.remove_object_dir(id)?;

        debug!(id = %id, pruned, "object deleted");
        Ok(())
    }

    fn list(&self) -> StoreResult<ResultCursor<'_, StoredObject>> {
        let size = self.count()?;
        let pages = self.pages::<String>(
            "SELECT id, record FROM objects WHERE id > ?1 ORDER BY id LIMIT ?2",
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let items = pages.map(|row| -> StoreResult<StoredObject> {
            let (_, record) = row?;
            Ok(serde_json::from_str(&record)?)
        });
        Ok(ResultCursor::sized(size, items).on_close(|| trace!("object listing closed")))
    }

    fn list_handles(&self) -> StoreResult<ResultCursor<'_, String>> {
        let size = self.count()?;
        let pages = self.pages::<()>(
            "SELECT id, NULL FROM objects WHERE id > ?1 ORDER BY id LIMIT ?2",
            |row| Ok((row.get(0)?, ())),
        )?;
        let items = pages.map(|row| row.map(|(id, ())| id));
        Ok(ResultCursor::sized(size, items).on_close(|| trace!("handle listing closed")))
    }

    fn close(&self) -> StoreResult<()> {
        let conn = self
            .conn
            .lock()
            .expect("lock poisoned")
            .take()
            .ok_or(StoreError::Closed)?;
        conn.close().map_err(|(_, e)| StoreError::Database(e))?;
        debug!(dir = %self.base_dir.display(), "durable store closed");
        Ok(())
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("base_dir", &self.base_dir)
            .field("layout", &self.layout)
            .finish()
    }
}

/// A payload of an object being created, written under a temporary name.
struct StagedPayload {
    name: String,
    staging: PathBuf,
    target: PathBuf,
}

// ---------------------------------------------------------------------------
// Keyset pagination
// ---------------------------------------------------------------------------

type RowReader<T> = fn(&Row<'_>) -> rusqlite::Result<(String, T)>;

/// Walks the `objects` table in id order one page at a time, so no more than
/// `PAGE_SIZE` rows are held and the connection is not locked between pages.
struct Pages<'a, T> {
    store: &'a DurableStore,
    sql: &'static str,
    read: RowReader<T>,
    after: String,
    buffer: VecDeque<(String, T)>,
    exhausted: bool,
}

impl<T> Pages<'_, T> {
    fn fetch(&mut self) -> StoreResult<()> {
        let (sql, read, after) = (self.sql, self.read, self.after.as_str());
        let page: Vec<(String, T)> = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params![after, PAGE_SIZE as i64], read)?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })?;
        if page.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.after = last.clone();
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<T> Iterator for Pages<'_, T> {
    type Item = StoreResult<(String, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
