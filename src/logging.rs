//! Console logger behind the `log` facade.
//!
//! `info!` and `debug!` go to stdout, `warn!` and `error!` to stderr. `debug!` is the
//! verbose channel and only prints with `--verbose`; `--quiet` silences everything.
//! Every printed line can also be appended to a log file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

type Sink = Mutex<Box<dyn Write + Send>>;

/// Build the process logger from the CLI switches and install it.
pub fn init(quiet: bool, verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let mut logger = ConsoleLogger::new(quiet, verbose);
    if let Some(path) = log_file {
        logger = logger
            .with_log_file(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
    }
    logger.install().context("logger already installed")
}

/// Leveled logger writing plain lines, as printed, with no timestamp or level prefix.
pub struct ConsoleLogger {
    level: LevelFilter,
    out: Sink,
    err: Sink,
    tee: Option<Mutex<File>>,
}

impl ConsoleLogger {
    /// Logger over the process stdout and stderr.
    #[must_use]
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self::with_writers(quiet, verbose, io::stdout(), io::stderr())
    }

    /// Logger over arbitrary sinks.
    pub fn with_writers<O, E>(quiet: bool, verbose: bool, out: O, err: E) -> Self
    where
        O: Write + Send + 'static,
        E: Write + Send + 'static,
    {
        let level = match (quiet, verbose) {
            (true, _) => LevelFilter::Off,
            (false, true) => LevelFilter::Debug,
            (false, false) => LevelFilter::Info,
        };
        Self {
            level,
            out: Mutex::new(Box::new(out)),
            err: Mutex::new(Box::new(err)),
            tee: None,
        }
    }

    /// Also append every line to `path`, creating it if needed.
    pub fn with_log_file(mut self, path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.tee = Some(Mutex::new(file));
        Ok(self)
    }

    #[must_use]
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Install as the global logger.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    fn write_line(&self, sink: &Sink, line: &str) {
        if let Ok(mut writer) = sink.lock() {
            let _ = writer.write_all(line.as_bytes());
            let _ = writer.flush();
        }
        if let Some(tee) = &self.tee {
            if let Ok(mut file) = tee.lock() {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("{}\n", record.args());
        match record.level() {
            Level::Error | Level::Warn => self.write_line(&self.err, &line),
            Level::Info | Level::Debug | Level::Trace => self.write_line(&self.out, &line),
        }
    }

    fn flush(&self) {
        for sink in [&self.out, &self.err] {
            if let Ok(mut writer) = sink.lock() {
                let _ = writer.flush();
            }
        }
        if let Some(tee) = &self.tee {
            if let Ok(file) = tee.lock() {
                let _ = file.sync_data();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn emit(logger: &ConsoleLogger, level: Level, message: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .args(format_args!("{message}"))
                .build(),
        );
    }

    fn logger(quiet: bool, verbose: bool) -> (ConsoleLogger, Shared, Shared) {
        let (out, err) = (Shared::default(), Shared::default());
        let logger = ConsoleLogger::with_writers(quiet, verbose, out.clone(), err.clone());
        (logger, out, err)
    }

    #[test]
    fn routes_channels() {
        let (logger, out, err) = logger(false, false);
        emit(&logger, Level::Info, "info line");
        emit(&logger, Level::Debug, "verbose line");
        emit(&logger, Level::Error, "error line");
        assert_eq!(out.text(), "info line\n");
        assert_eq!(err.text(), "error line\n");
    }

    #[test]
    fn verbose_enables_debug() {
        let (logger, out, _) = logger(false, true);
        emit(&logger, Level::Debug, "detail");
        assert_eq!(out.text(), "detail\n");
    }

    #[test]
    fn quiet_wins_over_verbose() {
        let (logger, out, err) = logger(true, true);
        emit(&logger, Level::Info, "info");
        emit(&logger, Level::Error, "error");
        assert!(out.text().is_empty() && err.text().is_empty());
        assert_eq!(logger.level(), LevelFilter::Off);
    }

    #[test]
    fn tees_into_log_file() -> io::Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("run.log");
        fs::write(&path, "earlier\n")?;
        let (logger, _, _) = logger(false, false);
        let logger = logger.with_log_file(&path)?;
        emit(&logger, Level::Info, "found");
        emit(&logger, Level::Error, "failed");
        emit(&logger, Level::Debug, "hidden");
        assert_eq!(fs::read_to_string(&path)?, "earlier\nfound\nfailed\n");
        Ok(())
    }
}
