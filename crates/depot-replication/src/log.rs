//! A partitioned, ordered, append-only log on the local filesystem.
//!
//! Each topic is a directory under the log root and each partition a single
//! segment file:
//!
//! ```text
//! <root>/<topic>/<partition>.log
//! ```
//!
//! Records are framed as:
//!
//! ```text
//! [4 bytes: record length (little-endian u32)]
//! [4 bytes: CRC32 of record (little-endian u32)]
//! [N bytes: bincode-serialized LogRecord]
//! ```
//!
//! A key always maps to the same partition and every partition is written by
//! one worker thread draining a FIFO queue, so records sharing a key are
//! appended and acknowledged in send order.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{mpsc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::channel::SendHandle;
use crate::error::{ChannelError, ChannelResult};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

pub const DEFAULT_PARTITIONS: u32 = 4;

/// The only encoder accepted for keys and values.
pub const STRING_SERIALIZER: &str = "string";

/// Client for a partitioned log.
pub trait LogProducer: Send + Sync {
    /// Append `value` under `key` to `topic`.
    fn send(&self, topic: &str, key: &str, value: &str) -> SendHandle;

    /// Flush outstanding records and stop accepting new ones.
    fn close(&self) -> ChannelResult<()>;
}

/// One entry in a partition segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub key: String,
    pub value: String,
    pub timestamp_ms: i64,
}

/// When a send is acknowledged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Acks {
    /// As soon as the record is queued.
    None,
    /// Once the record is written to the segment file.
    Leader,
    /// Once the record is written and synced to disk.
    #[default]
    All,
}

impl FromStr for Acks {
    type Err = ChannelError;

    fn from_str(s: &str) -> ChannelResult<Self> {
        match s.trim() {
            "0" => Ok(Self::None),
            "1" => Ok(Self::Leader),
            "all" | "-1" => Ok(Self::All),
            other => Err(ChannelError::Config(format!("unknown acks mode: {other}"))),
        }
    }
}

/// The partition a key is routed to.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    crc32fast::hash(key.as_bytes()) % partitions.max(1)
}

/// Path of a partition segment file.
pub fn segment_path(root: &Path, topic: &str, partition: u32) -> PathBuf {
    root.join(topic).join(format!("{partition}.log"))
}

/// Read every valid record of one partition, front to back.
///
/// Records failing the CRC check are skipped; a truncated record ends the
/// scan. A partition that was never written is empty.
pub fn read_partition(root: &Path, topic: &str, partition: u32) -> ChannelResult<Vec<LogRecord>> {
    let path = segment_path(root, topic, partition);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut file = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, path = %path.display(), "truncated log record");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload)?;
        offset += HEADER_SIZE as u64 + length as u64;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping log record"
            );
            continue;
        }

        match bincode::deserialize::<LogRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => warn!(offset, error = %e, "undecodable log record; skipping"),
        }
    }

    Ok(records)
}

// ---------------------------------------------------------------------------
// FileLogProducer
// ---------------------------------------------------------------------------

struct Append {
    topic: String,
    record: LogRecord,
    done: Option<oneshot::Sender<ChannelResult<()>>>,
}

struct Workers {
    queues: Vec<mpsc::Sender<Append>>,
    threads: Vec<JoinHandle<()>>,
}

/// [`LogProducer`] writing to segment files under a local root directory.
pub struct FileLogProducer {
    root: PathBuf,
    partitions: u32,
    acks: Acks,
    workers: Mutex<Option<Workers>>,
}

impl FileLogProducer {
    /// Start one worker per partition under `root`.
    pub fn open(root: impl AsRef<Path>, partitions: u32, acks: Acks) -> ChannelResult<Self> {
        if partitions == 0 {
            return Err(ChannelError::Config("num.partitions must be positive".into()));
        }
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut queues = Vec::with_capacity(partitions as usize);
        let mut threads = Vec::with_capacity(partitions as usize);
        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel();
            let worker_root = root.clone();
            let thread = thread::Builder::new()
                .name(format!("depot-log-{partition}"))
                .spawn(move || run_partition(worker_root, partition, acks, rx))?;
            queues.push(tx);
            threads.push(thread);
        }

        debug!(root = %root.display(), partitions, ?acks, "log producer started");
        Ok(Self {
            root,
            partitions,
            acks,
            workers: Mutex::new(Some(Workers { queues, threads })),
        })
    }

    /// Build a producer from client properties.
    ///
    /// The first `bootstrap.servers` entry names the log root, optionally
    /// with a `file://` prefix.
    pub fn from_properties(props: &BTreeMap<String, String>) -> ChannelResult<Self> {
        let root = props
            .get("bootstrap.servers")
            .and_then(|servers| servers.split(',').map(str::trim).find(|s| !s.is_empty()))
            .map(|server| server.strip_prefix("file://").unwrap_or(server))
            .ok_or_else(|| ChannelError::Config("bootstrap.servers is required".into()))?;

        for key in ["key.serializer", "value.serializer"] {
            if let Some(serializer) = props.get(key) {
                if serializer != STRING_SERIALIZER {
                    return Err(ChannelError::Config(format!(
                        "{key} must be {STRING_SERIALIZER:?}, got {serializer:?}"
                    )));
                }
            }
        }

        let acks = match props.get("acks") {
            Some(acks) => acks.parse()?,
            None => Acks::default(),
        };
        let partitions = match props.get("num.partitions") {
            Some(n) => n.trim().parse().map_err(|_| {
                ChannelError::Config(format!("num.partitions is not a number: {n}"))
            })?,
            None => DEFAULT_PARTITIONS,
        };

        let producer = Self::open(root, partitions, acks)?;
        if let Some(client_id) = props.get("client.id") {
            debug!(client_id = %client_id, "log client configured");
        }
        Ok(producer)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn acks(&self) -> Acks {
        self.acks
    }
}

impl LogProducer for FileLogProducer {
    fn send(&self, topic: &str, key: &str, value: &str) -> SendHandle {
        let workers = self.workers.lock().expect("lock poisoned");
        let Some(workers) = workers.as_ref() else {
            return SendHandle::ready(Err(ChannelError::Shutdown));
        };

        let partition = partition_for(key, self.partitions);
        let record = LogRecord {
            key: key.to_string(),
            value: value.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        let (done, handle) = match self.acks {
            Acks::None => (None, SendHandle::ready(Ok(()))),
            Acks::Leader | Acks::All => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), SendHandle::from_receiver(rx))
            }
        };

        let append = Append {
            topic: topic.to_string(),
            record,
            done,
        };
        if workers.queues[partition as usize].send(append).is_err() {
            return SendHandle::ready(Err(ChannelError::Shutdown));
        }
        handle
    }

    fn close(&self) -> ChannelResult<()> {
        let Workers { queues, threads } = self
            .workers
            .lock()
            .expect("lock poisoned")
            .take()
            .ok_or(ChannelError::Shutdown)?;

        // Workers drain their queues and exit once every sender is gone.
        drop(queues);
        let mut result = Ok(());
        for thread in threads {
            if thread.join().is_err() {
                result = Err(ChannelError::WorkerPanicked);
            }
        }
        debug!(root = %self.root.display(), "log producer closed");
        result
    }
}

impl Drop for FileLogProducer {
    fn drop(&mut self) {
        let open = self
            .workers
            .get_mut()
            .map(|workers| workers.is_some())
            .unwrap_or(false);
        if open {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for FileLogProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLogProducer")
            .field("root", &self.root)
            .field("partitions", &self.partitions)
            .field("acks", &self.acks)
            .finish()
    }
}

fn run_partition(root: PathBuf, partition: u32, acks: Acks, queue: mpsc::Receiver<Append>) {
    let mut segments: HashMap<String, BufWriter<File>> = HashMap::new();

    for append in queue {
        let result = append_record(&root, partition, acks, &mut segments, &append);
        if let Err(e) = &result {
            warn!(topic = %append.topic, partition, error = %e, "log append failed");
        }
        if let Some(done) = append.done {
            let _ = done.send(result);
        }
    }

    for (topic, mut segment) in segments {
        if let Err(e) = segment.flush() {
            warn!(topic = %topic, partition, error = %e, "log flush failed");
        }
    }
    debug!(partition, "log partition worker stopped");
}

fn append_record(
    root: &Path,
    partition: u32,
    acks: Acks,
    segments: &mut HashMap<String, BufWriter<File>>,
    append: &Append,
) -> ChannelResult<()> {
    let payload = bincode::serialize(&append.record)
        .map_err(|e| ChannelError::Serialization(e.to_string()))?;
    let length = payload.len() as u32;
    let crc = crc32fast::hash(&payload);

    let segment = match segments.entry(append.topic.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let path = segment_path(root, &append.topic, partition);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            entry.insert(BufWriter::new(file))
        }
    };

    segment.write_all(&length.to_le_bytes())?;
    segment.write_all(&crc.to_le_bytes())?;
    segment.write_all(&payload)?;

    match acks {
        Acks::All => {
            segment.flush()?;
            segment.get_ref().sync_data()?;
        }
        Acks::Leader => segment.flush()?,
        Acks::None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "CordraReplication-test";

    fn props(root: &Path) -> BTreeMap<String, String> {
        BTreeMap::from([("bootstrap.servers".to_string(), root.display().to_string())])
    }

    // -----------------------------------------------------------------------
    // Routing and configuration
    // -----------------------------------------------------------------------

    #[test]
    fn partition_is_stable_and_bounded() {
        for key in ["a", "object/1", "20.500/xyz"] {
            let p = partition_for(key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(key, 4));
        }
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[test]
    fn acks_parsing() {
        assert_eq!("all".parse::<Acks>().unwrap(), Acks::All);
        assert_eq!("-1".parse::<Acks>().unwrap(), Acks::All);
        assert_eq!("1".parse::<Acks>().unwrap(), Acks::Leader);
        assert_eq!("0".parse::<Acks>().unwrap(), Acks::None);
        assert!("2".parse::<Acks>().is_err());
    }

    #[test]
    fn properties_select_root_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut props = BTreeMap::new();
        props.insert(
            "bootstrap.servers".to_string(),
            format!(" file://{}, /elsewhere", dir.path().display()),
        );
        props.insert("acks".to_string(), "1".to_string());
        props.insert("num.partitions".to_string(), "2".to_string());

        let producer = FileLogProducer::from_properties(&props).unwrap();
        assert_eq!(producer.root(), dir.path());
        assert_eq!(producer.partitions(), 2);
        assert_eq!(producer.acks(), Acks::Leader);
        producer.close().unwrap();
    }

    #[test]
    fn properties_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileLogProducer::from_properties(&BTreeMap::new()).is_err());

        let mut bad_serializer = props(dir.path());
        bad_serializer.insert("value.serializer".into(), "bytes".into());
        assert!(matches!(
            FileLogProducer::from_properties(&bad_serializer),
            Err(ChannelError::Config(_))
        ));

        let mut zero = props(dir.path());
        zero.insert("num.partitions".into(), "0".into());
        assert!(FileLogProducer::from_properties(&zero).is_err());
    }

    // -----------------------------------------------------------------------
    // Append and read back
    // -----------------------------------------------------------------------

    #[test]
    fn same_key_records_keep_send_order() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileLogProducer::open(dir.path(), 4, Acks::All).unwrap();

        let handles: Vec<_> = (0..50)
            .map(|i| producer.send(TOPIC, "obj/1", &format!("v{i}")))
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }

        let records = read_partition(dir.path(), TOPIC, partition_for("obj/1", 4)).unwrap();
        let values: Vec<_> = records.iter().map(|r| r.value.as_str()).collect();
        let expected: Vec<_> = (0..50).map(|i| format!("v{i}")).collect();
        assert_eq!(values, expected);
        assert!(records.iter().all(|r| r.key == "obj/1"));
    }

    #[test]
    fn keys_spread_over_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileLogProducer::open(dir.path(), 3, Acks::Leader).unwrap();
        for i in 0..30 {
            producer.send(TOPIC, &format!("k{i}"), "v").wait().unwrap();
        }
        producer.close().unwrap();

        let total: usize = (0..3)
            .map(|p| read_partition(dir.path(), TOPIC, p).unwrap().len())
            .sum();
        assert_eq!(total, 30);
    }

    #[test]
    fn fire_and_forget_is_written_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileLogProducer::open(dir.path(), 1, Acks::None).unwrap();
        producer.send(TOPIC, "k", "v").wait().unwrap();
        producer.close().unwrap();
        assert_eq!(read_partition(dir.path(), TOPIC, 0).unwrap().len(), 1);
    }

    #[test]
    fn send_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileLogProducer::open(dir.path(), 1, Acks::All).unwrap();
        producer.close().unwrap();
        assert!(matches!(
            producer.send(TOPIC, "k", "v").wait(),
            Err(ChannelError::Shutdown)
        ));
        assert!(matches!(producer.close(), Err(ChannelError::Shutdown)));
    }

    #[test]
    fn unwritten_partition_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_partition(dir.path(), TOPIC, 7).unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Damaged segments
    // -----------------------------------------------------------------------

    #[test]
    fn crc_mismatch_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileLogProducer::open(dir.path(), 1, Acks::All).unwrap();
        producer.send(TOPIC, "k", "first").wait().unwrap();
        producer.send(TOPIC, "k", "second").wait().unwrap();
        producer.close().unwrap();

        let path = segment_path(dir.path(), TOPIC, 0);
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0xFF;
        file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
        file.write_all(&byte).unwrap();
        file.sync_all().unwrap();

        let records = read_partition(dir.path(), TOPIC, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "second");
    }

    #[test]
    fn truncated_tail_stops_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileLogProducer::open(dir.path(), 1, Acks::All).unwrap();
        producer.send(TOPIC, "k", "first").wait().unwrap();
        producer.send(TOPIC, "k", "second").wait().unwrap();
        producer.close().unwrap();

        let path = segment_path(dir.path(), TOPIC, 0);
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        let records = read_partition(dir.path(), TOPIC, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "first");
    }
}
