use crate::command::tokenizer::quote_token;
use crate::store::entry::now_millis;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Append-only writer for a dataset's command log.
///
/// Each line is `<timestamp-ms> <dataset-name> <COMMAND> <args...>`, with
/// args individually quoted so the line round-trips through
/// `command::tokenizer::tokenize`. Writes are buffered but flushed after
/// every append — bytes reach the OS on every line, but there is no
/// per-line `fsync`, so a handful of the most recent commands can still be
/// lost on a hard crash (the trade-off the durability story accepts).
pub struct LogWriter {
    file: BufWriter<std::fs::File>,
}

impl LogWriter {
    /// Opens `path` for appending, creating it if absent.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogWriter {
            file: BufWriter::new(file),
        })
    }

    /// Appends one state-changing command, already in canonical form.
    pub fn append(&mut self, dataset_name: &str, cmd: &str, args: &[String]) -> io::Result<()> {
        let mut line = format!("{} {} {}", now_millis(), dataset_name, cmd);
        for arg in args {
            line.push(' ');
            line.push_str(&quote_token(arg));
        }
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }
}

/// Renames the active log to its backup name, if it exists. This is the
/// cut-over synchronization point: once sealed, no further command lines
/// are appended to the backup, and anything it holds is either already in
/// the snapshot being built or must be replayed on top of it.
pub fn seal(log_path: &Path, backup_log_path: &Path) -> io::Result<bool> {
    if log_path.exists() {
        std::fs::rename(log_path, backup_log_path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
