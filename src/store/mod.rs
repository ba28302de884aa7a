pub mod entry;

use crate::command::parser::{ParsedCommand, SetArgs, ZaddArgs};
use crate::durability::{log::LogWriter, snapshot};
use crate::error::{EngineError, EngineResult};
use crate::types::Value;
use entry::{now_millis, Cell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Where a dataset's on-disk files live.
#[derive(Debug, Clone)]
pub struct Paths {
    pub database_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Paths {
    pub fn rdb_path(&self, name: &str) -> PathBuf {
        self.database_dir.join(format!("{name}.rdb"))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.log"))
    }

    pub fn backup_log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.log.bkp"))
    }
}

/// Outcome of a `SET`, distinguishing "aborted by -NX/-XX" from "applied".
pub enum SetOutcome {
    Applied,
    Aborted,
}

/// Outcome of a `ZADD`.
pub enum ZaddOutcome {
    Count(usize),
    NewScore(f64),
    Aborted,
}

/// One named, independently-durable key space. One instance exists per
/// unique name for the lifetime of the process (see `Registry`).
///
/// Generalized from "one of 16 fixed-index databases" to "one of
/// arbitrarily many named datasets", with each dataset owning its own
/// command log and snapshot state.
pub struct Dataset {
    pub name: String,
    data: Mutex<HashMap<String, Cell>>,
    log: Mutex<Option<LogWriter>>,
    snapshot_lock: Mutex<()>,
    paths: Paths,
    rdb_enabled: bool,
}

impl Dataset {
    /// Loads the snapshot (if any), drains any backup log left over from a
    /// previous run's unfinished cut-over, seals whatever log the previous
    /// run left active, drains that too, and only then opens a fresh log
    /// for new writes.
    ///
    /// `aof_enabled`/`rdb_enabled` mirror `--AOF_persistence`/
    /// `--RDB_persistence`: when the log is disabled, no log is opened and
    /// no replay is attempted (a lingering backup is left untouched rather
    /// than silently consumed); when the snapshot is disabled, the initial
    /// snapshot is still loaded for continuity but `snapshot()` becomes a
    /// no-op so nothing new is ever written.
    async fn recover(name: &str, paths: &Paths, aof_enabled: bool, rdb_enabled: bool) -> EngineResult<Self> {
        let rdb_path = paths.rdb_path(name);
        let log_path = paths.log_path(name);
        let backup_log_path = paths.backup_log_path(name);

        let mut map = snapshot::load(&rdb_path)?;
        info!(dataset = name, loaded = map.len(), "loaded snapshot");

        let log = if aof_enabled {
            // A backup log surviving from a crash mid cut-over must be
            // drained first — sealing the current log on top of it would
            // otherwise silently overwrite its unreplayed commands.
            if backup_log_path.exists() {
                let replayed = replay_log(&backup_log_path, &mut map)?;
                info!(dataset = name, replayed, "replayed stale backup log");
                std::fs::remove_file(&backup_log_path).ok();
            }

            if crate::durability::log::seal(&log_path, &backup_log_path)? {
                let replayed = replay_log(&backup_log_path, &mut map)?;
                info!(dataset = name, replayed, "replayed sealed log");
                std::fs::remove_file(&backup_log_path).ok();
            }

            Some(LogWriter::open(&log_path)?)
        } else {
            None
        };

        Ok(Dataset {
            name: name.to_string(),
            data: Mutex::new(map),
            log: Mutex::new(log),
            snapshot_lock: Mutex::new(()),
            paths: paths.clone(),
            rdb_enabled,
        })
    }

    /// Removes `key` if it is present but expired, returning whether it was
    /// evicted. The caller is responsible for logging the synthesized
    /// `DEL` once it has released the data lock.
    fn evict_if_expired(map: &mut HashMap<String, Cell>, key: &str) -> bool {
        if let Some(cell) = map.get(key) {
            if !cell.is_live() {
                map.remove(key);
                return true;
            }
        }
        false
    }

    /// Appends one command line if AOF logging is enabled for this
    /// dataset; a no-op under `--AOF_persistence False`.
    async fn append_log(&self, cmd: &str, args: &[String]) {
        let mut log = self.log.lock().await;
        if let Some(writer) = log.as_mut() {
            if let Err(e) = writer.append(&self.name, cmd, args) {
                warn!(dataset = %self.name, command = cmd, error = %e, "failed to append to log");
            }
        }
    }

    async fn log_del(&self, key: &str) {
        self.append_log("DEL", std::slice::from_ref(&key.to_string())).await;
    }

    pub async fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let mut data = self.data.lock().await;
        let evicted = Self::evict_if_expired(&mut data, key);
        let result = match data.get(key) {
            None => Ok(None),
            Some(cell) => match &cell.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::SortedSet(_) => Err(EngineError::NotAString(key.to_string())),
            },
        };
        drop(data);
        if evicted {
            self.log_del(key).await;
        }
        result
    }

    pub async fn set(&self, args: &SetArgs) -> SetOutcome {
        let mut data = self.data.lock().await;
        let evicted = Self::evict_if_expired(&mut data, &args.key);
        let was_live = data.contains_key(&args.key);

        if (args.nx && was_live) || (args.xx && !was_live) {
            drop(data);
            if evicted {
                self.log_del(&args.key).await;
            }
            return SetOutcome::Aborted;
        }

        let expires_at = if args.keepttl && was_live {
            data.get(&args.key).and_then(|c| c.expires_at)
        } else if let Some(seconds) = args.ex {
            Some(now_millis() + (seconds.max(0) as u64) * 1000)
        } else if let Some(millis) = args.px {
            Some(now_millis() + millis.max(0) as u64)
        } else {
            None
        };

        let cell = match expires_at {
            Some(e) => Cell::with_expiry(Value::Str(args.value.clone()), e),
            None => Cell::new(Value::Str(args.value.clone())),
        };
        data.insert(args.key.clone(), cell);
        drop(data);

        if evicted {
            self.log_del(&args.key).await;
        }
        self.log_resolved_set(&args.key, &args.value, expires_at).await;
        SetOutcome::Applied
    }

    /// Logs the *resolved effect* of a `SET`, not the caller's flags: a
    /// plain `SET key value [-PX remaining-ms]`. Logging the resolved
    /// expiry keeps every log line inside the existing grammar while
    /// bounding replay drift to restart latency instead of the full
    /// crash-to-restart gap.
    async fn log_resolved_set(&self, key: &str, value: &[u8], expires_at: Option<u64>) {
        let mut args = vec![key.to_string(), String::from_utf8_lossy(value).into_owned()];
        if let Some(exp) = expires_at {
            let remaining_ms = exp.saturating_sub(now_millis());
            args.push("-PX".to_string());
            args.push(remaining_ms.to_string());
        }
        self.append_log("SET", &args).await;
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> bool {
        let mut data = self.data.lock().await;
        let evicted = Self::evict_if_expired(&mut data, key);
        let live = data.contains_key(key);
        if !live {
            drop(data);
            if evicted {
                self.log_del(key).await;
            }
            return false;
        }
        let new_expiry = now_millis() + (seconds.max(0) as u64) * 1000;
        if let Some(cell) = data.get_mut(key) {
            cell.expires_at = Some(new_expiry);
        }
        drop(data);
        if evicted {
            self.log_del(key).await;
        }

        let remaining = new_expiry.saturating_sub(now_millis()) / 1000;
        self.append_log("EXPIRE", &[key.to_string(), remaining.to_string()]).await;
        true
    }

    pub async fn ttl(&self, key: &str) -> i64 {
        let mut data = self.data.lock().await;
        let evicted = Self::evict_if_expired(&mut data, key);
        let result = match data.get(key) {
            None => -2,
            Some(cell) => cell.ttl_seconds().unwrap_or(-1),
        };
        drop(data);
        if evicted {
            self.log_del(key).await;
        }
        result
    }

    pub async fn del(&self, keys: &[String]) -> usize {
        let mut data = self.data.lock().await;
        let mut removed = Vec::new();
        for key in keys {
            if data.remove(key).is_some() {
                removed.push(key.clone());
            }
        }
        drop(data);
        if !removed.is_empty() {
            self.append_log("DEL", &removed).await;
        }
        removed.len()
    }

    pub async fn zadd(&self, args: &ZaddArgs) -> EngineResult<ZaddOutcome> {
        let mut data = self.data.lock().await;
        let evicted = Self::evict_if_expired(&mut data, &args.key);
        let live = data.contains_key(&args.key);

        if live && data.get(&args.key).unwrap().value.as_sorted_set().is_none() {
            drop(data);
            if evicted {
                self.log_del(&args.key).await;
            }
            return Err(EngineError::NotASortedSet(args.key.clone()));
        }

        if (args.nx && live) || (args.xx && !live) {
            drop(data);
            if evicted {
                self.log_del(&args.key).await;
            }
            return Ok(ZaddOutcome::Aborted);
        }

        let outcome = if !live {
            let mut z = crate::types::sorted_set::SortedSet::new();
            let added = z.update(&args.pairs, false);
            data.insert(args.key.clone(), Cell::new(Value::SortedSet(z)));
            ZaddOutcome::Count(added)
        } else {
            let cell = data.get_mut(&args.key).unwrap();
            let z = cell.value.as_sorted_set_mut().unwrap();
            if args.incr {
                let (delta, member) = args.pairs[0].clone();
                ZaddOutcome::NewScore(z.incr_update(delta, member))
            } else {
                ZaddOutcome::Count(z.update(&args.pairs, args.ch))
            }
        };

        let resolved_pairs = match &outcome {
            ZaddOutcome::NewScore(score) => vec![(*score, args.pairs[0].1.clone())],
            _ => args.pairs.clone(),
        };
        drop(data);
        if evicted {
            self.log_del(&args.key).await;
        }
        self.log_resolved_zadd(&args.key, &resolved_pairs).await;
        Ok(outcome)
    }

    /// Logs the resolved final (score, member) pairs with no flags, so
    /// replay doesn't need to re-derive `-NX`/`-XX`/`-INCR` outcomes.
    async fn log_resolved_zadd(&self, key: &str, pairs: &[(f64, Vec<u8>)]) {
        let mut args = vec![key.to_string()];
        for (score, member) in pairs {
            args.push(score.to_string());
            args.push(String::from_utf8_lossy(member).into_owned());
        }
        self.append_log("ZADD", &args).await;
    }

    pub async fn zrank(&self, key: &str, member: &[u8]) -> EngineResult<Option<usize>> {
        let mut data = self.data.lock().await;
        let evicted = Self::evict_if_expired(&mut data, key);
        let result = match data.get(key) {
            None => Ok(None),
            Some(cell) => match &cell.value {
                Value::SortedSet(z) => Ok(z.rank(member)),
                Value::Str(_) => Err(EngineError::NotASortedSet(key.to_string())),
            },
        };
        drop(data);
        if evicted {
            self.log_del(key).await;
        }
        result
    }

    pub async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        with_scores: bool,
    ) -> EngineResult<Vec<(Vec<u8>, Option<f64>)>> {
        let mut data = self.data.lock().await;
        let evicted = Self::evict_if_expired(&mut data, key);
        let result = match data.get(key) {
            None => Ok(Vec::new()),
            Some(cell) => match &cell.value {
                Value::SortedSet(z) => Ok(z.range(start, stop, with_scores)),
                Value::Str(_) => Err(EngineError::NotASortedSet(key.to_string())),
            },
        };
        drop(data);
        if evicted {
            self.log_del(key).await;
        }
        result
    }

    /// Point-in-time snapshot cut-over: seal the active log, hand a copy
    /// of the current map to a background worker that writes the new
    /// `.rdb` atomically, then — only once the worker has actually
    /// finished — delete the sealed backup. Deleting the backup only
    /// after the worker completes means a crash mid-write never loses
    /// both the old snapshot's coverage and the commands it superseded.
    pub async fn snapshot(&self) {
        if !self.rdb_enabled {
            return;
        }
        let _serialize_guard = self.snapshot_lock.lock().await;

        let log_path = self.paths.log_path(&self.name);
        let backup_log_path = self.paths.backup_log_path(&self.name);

        let sealed = {
            let mut log = self.log.lock().await;
            if log.is_none() {
                false
            } else {
                match crate::durability::log::seal(&log_path, &backup_log_path) {
                    Ok(sealed) => {
                        if let Ok(fresh) = LogWriter::open(&log_path) {
                            *log = Some(fresh);
                        }
                        sealed
                    }
                    Err(e) => {
                        warn!(dataset = %self.name, error = %e, "failed to seal log for snapshot");
                        false
                    }
                }
            }
        };

        let map_copy = { self.data.lock().await.clone() };
        let rdb_path = self.paths.rdb_path(&self.name);

        let worker = tokio::task::spawn_blocking(move || {
            let bytes = snapshot::serialize(&map_copy);
            snapshot::save_atomic(&rdb_path, &bytes)
        });

        match worker.await {
            Ok(Ok(())) => {
                debug!(dataset = %self.name, "snapshot written");
                if sealed {
                    std::fs::remove_file(&backup_log_path).ok();
                }
            }
            Ok(Err(e)) => {
                warn!(dataset = %self.name, error = %e, "snapshot write failed, keeping backup log");
            }
            Err(e) => {
                warn!(dataset = %self.name, error = %e, "snapshot worker panicked, keeping backup log");
            }
        }
    }
}

/// Replays a sealed backup log against `map`, applying the *resolved*
/// effect each line records without writing to any log itself — the
/// backup log is being consumed, not re-created.
fn replay_log(path: &Path, map: &mut HashMap<String, Cell>) -> EngineResult<usize> {
    use crate::command::{parser, tokenizer};

    let contents = std::fs::read_to_string(path)?;
    let mut applied = 0;

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let tokens = match tokenizer::tokenize(line) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if tokens.len() < 3 {
            continue;
        }
        // tokens[0] = timestamp, tokens[1] = dataset name, tokens[2..] = the
        // command itself, reparseable under the ordinary command grammar.
        let cmd_name = tokens[2].to_uppercase();
        let args = &tokens[3..];
        let Ok(parsed) = parser::parse(&cmd_name, args) else {
            continue;
        };
        apply_replayed(map, parsed);
        applied += 1;
    }

    Ok(applied)
}

fn apply_replayed(map: &mut HashMap<String, Cell>, parsed: ParsedCommand) {
    match parsed {
        ParsedCommand::Set(args) => {
            let cell = match args.px {
                Some(remaining_ms) => {
                    Cell::with_expiry(Value::Str(args.value), now_millis() + remaining_ms.max(0) as u64)
                }
                None => Cell::new(Value::Str(args.value)),
            };
            map.insert(args.key, cell);
        }
        ParsedCommand::Expire { key, seconds } => {
            if let Some(cell) = map.get_mut(&key) {
                cell.expires_at = Some(now_millis() + seconds.max(0) as u64 * 1000);
            }
        }
        ParsedCommand::Del(keys) => {
            for key in keys {
                map.remove(&key);
            }
        }
        ParsedCommand::Zadd(args) => {
            let entry = map.entry(args.key).or_insert_with(|| {
                Cell::new(Value::SortedSet(crate::types::sorted_set::SortedSet::new()))
            });
            if let Some(z) = entry.value.as_sorted_set_mut() {
                z.update(&args.pairs, false);
            }
        }
        _ => {}
    }
}

/// Process-wide map of dataset name -> live `Dataset`, keyed so that every
/// `SELECT <name>` from any connection shares the same instance for the
/// lifetime of the process. Shaped as explicit dependency injection (one
/// `Registry` per server process, handed in rather than a bare global)
/// so tests can run isolated registries in parallel.
pub struct Registry {
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
    paths: Paths,
    aof_enabled: bool,
    rdb_enabled: bool,
}

impl Registry {
    pub fn new(paths: Paths, aof_enabled: bool, rdb_enabled: bool) -> Self {
        Registry {
            datasets: RwLock::new(HashMap::new()),
            paths,
            aof_enabled,
            rdb_enabled,
        }
    }

    /// Returns the dataset named `name`, creating (and recovering) it if
    /// this is the first `SELECT` to ever name it in this process. The
    /// fast path only takes a read lock; the creation lock is only taken
    /// when the dataset is actually missing.
    pub async fn select(&self, name: &str) -> EngineResult<Arc<Dataset>> {
        if let Some(ds) = self.datasets.read().await.get(name) {
            return Ok(ds.clone());
        }

        let mut datasets = self.datasets.write().await;
        if let Some(ds) = datasets.get(name) {
            return Ok(ds.clone());
        }

        std::fs::create_dir_all(&self.paths.database_dir)?;
        std::fs::create_dir_all(&self.paths.log_dir)?;

        let dataset = Arc::new(Dataset::recover(name, &self.paths, self.aof_enabled, self.rdb_enabled).await?);
        datasets.insert(name.to_string(), dataset.clone());
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parser::{SetArgs, ZaddArgs};

    fn paths(dir: &tempfile::TempDir) -> Paths {
        Paths {
            database_dir: dir.path().join("databases"),
            log_dir: dir.path().join("logs"),
        }
    }

    fn set_args(key: &str, value: &[u8]) -> SetArgs {
        SetArgs {
            key: key.to_string(),
            value: value.to_vec(),
            ex: None,
            px: None,
            nx: false,
            xx: false,
            keepttl: false,
        }
    }

    #[tokio::test]
    async fn get_set_and_del_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(paths(&dir), true, true);
        let ds = registry.select("mydb").await.unwrap();

        assert_eq!(ds.get("k").await.unwrap(), None);
        ds.set(&set_args("k", b"v")).await;
        assert_eq!(ds.get("k").await.unwrap(), Some(b"v".to_vec()));

        ds.del(&["k".to_string()]).await;
        assert_eq!(ds.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_aborts_on_live_key() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(paths(&dir), true, true);
        let ds = registry.select("mydb").await.unwrap();

        ds.set(&set_args("k", b"v1")).await;
        let mut nx = set_args("k", b"v2");
        nx.nx = true;
        matches!(ds.set(&nx).await, SetOutcome::Aborted);
        assert_eq!(ds.get("k").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn expire_and_ttl_and_lazy_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(paths(&dir), true, true);
        let ds = registry.select("mydb").await.unwrap();

        ds.set(&set_args("k", b"v")).await;
        assert_eq!(ds.ttl("k").await, -1);
        assert!(!ds.expire("missing", 10).await);
        assert!(ds.expire("k", 0).await);

        // A 0-second expiry is already in the past by the time we check.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(ds.get("k").await.unwrap(), None);
        assert_eq!(ds.ttl("k").await, -2);
    }

    #[tokio::test]
    async fn zadd_zrank_zrange_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(paths(&dir), true, true);
        let ds = registry.select("mydb").await.unwrap();

        let args = ZaddArgs {
            key: "z".to_string(),
            nx: false,
            xx: false,
            ch: false,
            incr: false,
            pairs: vec![(1.0, b"a".to_vec()), (2.0, b"b".to_vec())],
        };
        match ds.zadd(&args).await.unwrap() {
            ZaddOutcome::Count(n) => assert_eq!(n, 2),
            _ => panic!("expected Count"),
        }
        assert_eq!(ds.zrank("z", b"a").await.unwrap(), Some(0));
        let range = ds.zrange("z", 0, 2, false).await.unwrap();
        assert_eq!(range.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_then_recover_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = Registry::new(paths(&dir), true, true);
            let ds = registry.select("mydb").await.unwrap();
            ds.set(&set_args("k", b"v")).await;
            ds.snapshot().await;
        }
        {
            let registry = Registry::new(paths(&dir), true, true);
            let ds = registry.select("mydb").await.unwrap();
            assert_eq!(ds.get("k").await.unwrap(), Some(b"v".to_vec()));
        }
    }

    #[tokio::test]
    async fn sealed_log_replays_on_recovery_without_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = Registry::new(paths(&dir), true, true);
            let ds = registry.select("mydb").await.unwrap();
            ds.set(&set_args("k", b"v")).await;
            // No snapshot() call: the command only exists in the log.
        }
        {
            let registry = Registry::new(paths(&dir), true, true);
            let ds = registry.select("mydb").await.unwrap();
            assert_eq!(ds.get("k").await.unwrap(), Some(b"v".to_vec()));
        }
    }

    #[tokio::test]
    async fn disabled_aof_persistence_keeps_no_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = Registry::new(paths(&dir), false, true);
            let ds = registry.select("mydb").await.unwrap();
            ds.set(&set_args("k", b"v")).await;
        }
        {
            // No log was written, so a fresh process sees nothing without
            // an explicit snapshot.
            let registry = Registry::new(paths(&dir), false, true);
            let ds = registry.select("mydb").await.unwrap();
            assert_eq!(ds.get("k").await.unwrap(), None);
        }
    }
}
