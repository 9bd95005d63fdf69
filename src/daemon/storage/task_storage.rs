use std::{
    collections::{HashMap, HashSet},
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::PathBuf,
};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::fs::operations::final_line_offset;

use super::entities::TaskEntity;

const JOURNAL_FILE: &str = "targets";

/// A journal is considered bloated once it holds noticeably more lines than live targets.
const COMPACT_SLACK: usize = 16;

/// Interface for abstracting storage of targets.
///
/// Every mutation goes through [TaskStorage::transact], which serializes read-modify-write
/// cycles across all writers of the journal: the per-second ticker, the coarse background job
/// and any number of one-shot cli invocations. The reconciliation logic itself tolerates
/// duplicate observation, the transaction only has to keep writers from clobbering each other's
/// state transitions.
pub trait TaskStorage {
    /// Snapshot of every stored target, ordered by creation time.
    fn load_all(&self) -> impl Future<Output = Result<Vec<TaskEntity>>> + Send;

    /// Runs `apply` over the full target set under an exclusive file lock and persists whatever
    /// it changed. Nothing is written when `apply` fails or touches nothing.
    fn transact<T, F>(&self, apply: F) -> impl Future<Output = Result<T>> + Send
    where
        F: FnOnce(&mut TaskSet) -> Result<T> + Send,
        T: Send;

    /// Rewrites the journal down to one line per live target once it has accumulated enough
    /// superseded snapshots to be worth the rewrite.
    fn compact(&self) -> impl Future<Output = Result<()>> + Send;
}

impl<S: Deref + Sync> TaskStorage for S
where
    S::Target: TaskStorage + Sync,
{
    fn load_all(&self) -> impl Future<Output = Result<Vec<TaskEntity>>> + Send {
        self.deref().load_all()
    }

    fn transact<T, F>(&self, apply: F) -> impl Future<Output = Result<T>> + Send
    where
        F: FnOnce(&mut TaskSet) -> Result<T> + Send,
        T: Send,
    {
        self.deref().transact(apply)
    }

    fn compact(&self) -> impl Future<Output = Result<()>> + Send {
        self.deref().compact()
    }
}

/// Mutable view over the stored targets handed out by [TaskStorage::transact]. Access through
/// the `_mut` methods marks a record dirty, only dirty records get written back.
pub struct TaskSet {
    tasks: Vec<TaskEntity>,
    dirty: HashSet<Uuid>,
    removed: bool,
}

impl TaskSet {
    fn new(tasks: Vec<TaskEntity>) -> Self {
        Self {
            tasks,
            dirty: HashSet::new(),
            removed: false,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskEntity> {
        self.tasks.iter()
    }

    pub fn insert(&mut self, task: TaskEntity) {
        self.dirty.insert(task.id);
        self.tasks.push(task);
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut TaskEntity> {
        let task = self.tasks.iter_mut().find(|v| v.id == id)?;
        self.dirty.insert(id);
        Some(task)
    }

    /// All targets whose timer is currently running. Each one is marked dirty, callers are
    /// expected to reconcile what they take out.
    pub fn running_mut(&mut self) -> impl Iterator<Item = &mut TaskEntity> {
        let TaskSet { tasks, dirty, .. } = self;
        tasks.iter_mut().filter(|v| v.is_running()).map(|v| {
            dirty.insert(v.id);
            v
        })
    }

    pub fn remove(&mut self, id: Uuid) -> Option<TaskEntity> {
        let index = self.tasks.iter().position(|v| v.id == id)?;
        self.removed = true;
        self.dirty.remove(&id);
        Some(self.tasks.remove(index))
    }

    fn dirty_snapshots(&self) -> Vec<TaskEntity> {
        self.tasks
            .iter()
            .filter(|v| self.dirty.contains(&v.id))
            .cloned()
            .collect()
    }
}

/// The main realization of [TaskStorage]. Targets live in a single journal file of JSON lines,
/// one snapshot of one target per line, replayed last-write-wins. Writes collapse the journal
/// tail so the once-a-second reconciliation of a running target keeps rewriting one line
/// instead of growing the file.
pub struct TaskStorageImpl {
    journal_path: PathBuf,
}

impl TaskStorageImpl {
    pub fn new(app_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&app_dir)?;

        Ok(Self {
            journal_path: app_dir.join(JOURNAL_FILE),
        })
    }

    async fn open_journal(&self) -> Result<File, std::io::Error> {
        File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(&self.journal_path)
            .await
    }

    async fn transact_locked<T, F>(file: &mut File, apply: F) -> Result<T>
    where
        F: FnOnce(&mut TaskSet) -> Result<T>,
    {
        file.rewind().await?;
        let replay = replay_journal(file).await?;
        let mut set = TaskSet::new(replay.into_tasks());

        let value = apply(&mut set)?;

        if set.removed {
            rewrite_journal(file, &set.tasks).await?;
        } else if !set.dirty.is_empty() {
            append_snapshots(file, &set.dirty_snapshots()).await?;
        }
        Ok(value)
    }
}

impl TaskStorage for TaskStorageImpl {
    async fn load_all(&self) -> Result<Vec<TaskEntity>> {
        let mut file = match File::open(&self.journal_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => Err(e)?,
        };
        file.lock_shared()?;
        let replay = replay_journal(&mut file).await;
        file.unlock_async().await?;
        Ok(replay?.into_tasks())
    }

    async fn transact<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut TaskSet) -> Result<T> + Send,
        T: Send,
    {
        let mut file = self.open_journal().await?;
        // Semi-safe acquire-release for a file
        file.lock_exclusive()?;
        let result = Self::transact_locked(&mut file, apply).await;
        file.unlock_async().await?;
        result
    }

    async fn compact(&self) -> Result<()> {
        let mut file = self.open_journal().await?;
        file.lock_exclusive()?;
        let result = async {
            let replay = replay_journal(&mut file).await?;
            if replay.lines <= replay.tasks.len() * 2 + COMPACT_SLACK {
                return Ok(());
            }
            debug!(
                "Compacting journal from {} lines to {} targets",
                replay.lines,
                replay.tasks.len()
            );
            rewrite_journal(&mut file, &replay.into_tasks()).await
        }
        .await;
        file.unlock_async().await?;
        result
    }
}

struct JournalReplay {
    tasks: HashMap<Uuid, TaskEntity>,
    lines: usize,
}

impl JournalReplay {
    /// Live targets ordered by creation time.
    fn into_tasks(self) -> Vec<TaskEntity> {
        let mut tasks = self.tasks.into_values().collect::<Vec<_>>();
        tasks.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        tasks
    }
}

async fn replay_journal(
    file: &mut (impl tokio::io::AsyncRead + Unpin),
) -> Result<JournalReplay, std::io::Error> {
    let mut lines = BufReader::new(file).lines();
    let mut tasks = HashMap::new();
    let mut count = 0usize;
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        count += 1;
        match serde_json::from_str::<TaskEntity>(&line) {
            Ok(task) => {
                tasks.insert(task.id, task);
            }
            Err(e) => {
                // ignore illegal values. Might happen after shutdowns
                warn!("Found illegal json line in the journal {}: {e}", &line);
            }
        }
    }
    Ok(JournalReplay {
        tasks,
        lines: count,
    })
}

/// Appends fresh snapshots to the journal. When the final line already belongs to one of the
/// written targets it is overwritten instead, which is what keeps a single running target's
/// journal from growing under per-second reconciliation.
async fn append_snapshots(file: &mut File, snapshots: &[TaskEntity]) -> Result<()> {
    let offset = final_line_offset(file).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut tail = String::new();
    file.read_to_string(&mut tail).await?;

    let mut needs_newline = false;
    let trimmed = tail.trim_end();
    let write_from = if trimmed.is_empty() {
        offset
    } else {
        match serde_json::from_str::<TaskEntity>(trimmed) {
            Ok(last) if snapshots.iter().any(|v| v.id == last.id) => offset,
            Ok(_) => {
                needs_newline = !tail.ends_with('\n');
                offset + tail.len() as u64
            }
            Err(e) => {
                // A torn write from a previous shutdown, fresher data replaces it.
                warn!("Final journal line was corrupted, overwriting it: {e}");
                offset
            }
        }
    };

    file.set_len(write_from).await?;
    file.seek(std::io::SeekFrom::Start(write_from)).await?;

    let mut buffer = Vec::<u8>::new();
    if needs_newline {
        buffer.push(b'\n');
    }
    for snapshot in snapshots {
        serde_json::to_writer(&mut buffer, snapshot)?;
        buffer.push(b'\n');
    }

    file.write_all(&buffer).await?;
    file.flush().await?;
    Ok(())
}

async fn rewrite_journal(file: &mut File, tasks: &[TaskEntity]) -> Result<()> {
    let mut buffer = Vec::<u8>::new();
    for task in tasks {
        serde_json::to_writer(&mut buffer, task)?;
        buffer.push(b'\n');
    }

    file.set_len(0).await?;
    file.rewind().await?;
    file.write_all(&buffer).await?;
    file.flush().await?;
    Ok(())
}
