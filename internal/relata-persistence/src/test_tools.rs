//! Test utilities: loggers and temporary directories.

use std::fmt::{self, Write as _};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use slog::{Drain, Logger, OwnedKVList, Record, KV};
use slog_async::Async;
use slog_term::{CompactFormat, PlainDecorator};

/// Loggers for tests.
pub struct TestLogger;

impl TestLogger {
    fn from_writer<W: io::Write + Send + 'static>(writer: W) -> Logger {
        let decorator = PlainDecorator::new(writer);
        let drain = CompactFormat::new(decorator).build().fuse();
        let drain = Async::new(drain).build().fuse();
        Logger::root(Arc::new(drain), slog::o!())
    }

    /// Logger writing to the test output.
    pub fn stdout() -> Logger {
        Self::from_writer(slog_term::TestStdoutWriter)
    }

    /// Logger keeping every message in memory, along with a handle to read them.
    pub fn memory() -> (Logger, MemoryLogs) {
        let logs = MemoryLogs::default();
        let drain = MemoryDrain { logs: logs.clone() };

        (Logger::root(drain, slog::o!()), logs)
    }
}

/// Messages captured by [TestLogger::memory], one line per message with its key values.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogs {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLogs {
    /// Copy of the captured lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Number of captured lines containing all the given fragments.
    pub fn count_matching(&self, fragments: &[&str]) -> usize {
        self.lines()
            .iter()
            .filter(|line| fragments.iter().all(|fragment| line.contains(fragment)))
            .count()
    }

    /// Return true if at least one line contains the fragment.
    pub fn contains(&self, fragment: &str) -> bool {
        self.count_matching(&[fragment]) > 0
    }

    /// Forget the captured lines.
    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

struct MemoryDrain {
    logs: MemoryLogs,
}

impl Drain for MemoryDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &Record, values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        let mut collector = KeyValueCollector(format!("{}", record.msg()));
        let _ = record.kv().serialize(record, &mut collector);
        let _ = values.serialize(record, &mut collector);

        if let Ok(mut lines) = self.logs.lines.lock() {
            lines.push(collector.0);
        }

        Ok(())
    }
}

struct KeyValueCollector(String);

impl slog::Serializer for KeyValueCollector {
    fn emit_arguments(&mut self, key: slog::Key, val: &fmt::Arguments) -> slog::Result {
        let _ = write!(self.0, ", {key}={val}");
        Ok(())
    }
}

/// Create (or empty) a directory dedicated to a test under the system temporary directory.
pub fn temp_dir(module: &str, name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("relata_test")
        .join(module)
        .join(name);
    reset_dir(&dir);

    dir
}

fn reset_dir(dir: &Path) {
    if dir.exists() {
        let _ = std::fs::remove_dir_all(dir);
    }
    let _ = std::fs::create_dir_all(dir);
}
