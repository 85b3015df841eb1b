//! Logrotate runner: archive log files by renaming them with a mark.
//!
//! A file `name.ext` archived under mark `M` is stored as `name.ROT<M>.ext`
//! (`name.ROT<M>` without an extension). Daily marks are dates
//! (`2020-06-02`), size marks are 12-digit sequence numbers
//! (`000000000001`).
//!
//! Nothing is persisted between passes: every pass expands the globs and
//! recovers each file's marks from the names found on disk.

use super::schedule::Schedule;
use super::{Runner, RunnerContext};
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::process::ProcessSupervisor;
use crate::unit::Unit;
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Prefix of the mark segment in archived file names.
pub const ROT: &str = "ROT";

/// Interval between rotation passes.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(60);

/// Size at which a file is rotated in size mode.
pub const ROTATION_FILESIZE: u64 = 256 * 1024 * 1024;

/// Date layout of daily marks.
pub const DAILY_LAYOUT: &str = "%Y-%m-%d";

/// How files are rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMode {
    /// Once per day, marked with yesterday's date
    Daily,
    /// Once the file reaches [`ROTATION_FILESIZE`], marked with a sequence id
    Filesize,
}

impl RotationMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "daily" => Some(RotationMode::Daily),
            "filesize" | "size" => Some(RotationMode::Filesize),
            _ => None,
        }
    }

    /// Whether `mark` is well-formed for this mode.
    ///
    /// A size mark must also leave room for a successor id.
    pub fn is_valid_mark(&self, mark: &str) -> bool {
        static DAILY: OnceLock<Regex> = OnceLock::new();
        static FILESIZE: OnceLock<Regex> = OnceLock::new();

        let pattern = match self {
            RotationMode::Daily => DAILY.get_or_init(|| {
                Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("daily mark pattern is valid")
            }),
            RotationMode::Filesize => FILESIZE
                .get_or_init(|| Regex::new(r"^\d+$").expect("filesize mark pattern is valid")),
        };
        match self {
            RotationMode::Daily => pattern.is_match(mark),
            RotationMode::Filesize => {
                pattern.is_match(mark) && mark.parse::<u64>().is_ok_and(|id| id < u64::MAX)
            }
        }
    }
}

/// Split a file name into its original name and its mark.
///
/// The mark is empty for unmarked files.
pub fn mark_extract(path: &Path) -> (PathBuf, String) {
    let unmarked = || (path.to_path_buf(), String::new());

    let Some(base) = path.file_name().and_then(|b| b.to_str()) else {
        return unmarked();
    };
    let segments: Vec<&str> = base.split('.').collect();
    if segments.len() < 2 {
        return unmarked();
    }

    let mark = match segments[segments.len() - 2].strip_prefix(ROT) {
        Some(mark) if !mark.is_empty() => mark,
        _ => return unmarked(),
    };

    let mut original: Vec<&str> = segments[..segments.len() - 2].to_vec();
    original.push(segments[segments.len() - 1]);

    (with_file_name(path, &original.join(".")), mark.to_string())
}

/// Whether an unmarked name still carries a `ROT` segment, as archives of
/// extensionless files do. Such files are never rotated again.
fn has_rot_segment(path: &Path) -> bool {
    let Some(base) = path.file_name().and_then(|b| b.to_str()) else {
        return false;
    };
    base.split('.')
        .skip(1)
        .any(|segment| segment.len() > ROT.len() && segment.starts_with(ROT))
}

/// Name of `path` archived under `mark`.
pub fn mark_add(path: &Path, mark: &str) -> PathBuf {
    let base = path
        .file_name()
        .map(|b| b.to_string_lossy().into_owned())
        .unwrap_or_default();
    let segments: Vec<&str> = base.split('.').collect();

    let marked = if segments.len() < 2 {
        format!("{}.{}{}", base, ROT, mark)
    } else {
        let (stem, ext) = segments.split_at(segments.len() - 1);
        format!("{}.{}{}.{}", stem.join("."), ROT, mark, ext[0])
    };

    with_file_name(path, &marked)
}

fn with_file_name(path: &Path, name: &str) -> PathBuf {
    match path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Rotates the files matched by a set of globs.
#[derive(Debug, Clone)]
pub struct Rotator {
    files: Vec<String>,
    mode: RotationMode,
    keep: usize,
    threshold: u64,
}

impl Rotator {
    /// `keep == 0` disables retention.
    pub fn new(files: Vec<String>, mode: RotationMode, keep: usize) -> Self {
        Self {
            files,
            mode,
            keep,
            threshold: ROTATION_FILESIZE,
        }
    }

    /// Override the size at which files rotate in size mode.
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Expand the globs and group matches by original name.
    fn collect(&self, journal: &Journal) -> BTreeMap<PathBuf, BTreeSet<String>> {
        let mut groups: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
        let cwd = std::env::current_dir().unwrap_or_default();

        for pattern in &self.files {
            let paths = match glob::glob(pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    journal.error(format!("invalid pattern {}: {}", pattern, e));
                    continue;
                }
            };

            for path in paths.flatten() {
                let path = cwd.join(path);
                let (original, mark) = mark_extract(&path);
                if mark.is_empty() && has_rot_segment(&original) {
                    continue;
                }
                let marks = groups.entry(original).or_default();
                if !mark.is_empty() {
                    marks.insert(mark);
                }
            }
        }

        groups
    }

    /// Run one rotation pass. `today` is the current UTC date.
    pub fn rotate(&self, today: NaiveDate, journal: &Journal) {
        for (original, marks) in self.collect(journal) {
            if let Err(e) = self.rotate_group(&original, marks, today, journal) {
                journal.error(format!("failed to rotate {}: {}", original.display(), e));
            }
        }
    }

    fn rotate_group(
        &self,
        original: &Path,
        marks: BTreeSet<String>,
        today: NaiveDate,
        journal: &Journal,
    ) -> io::Result<()> {
        // malformed marks are debris from a mode change or someone else
        let mut valid = Vec::with_capacity(marks.len());
        for mark in marks {
            if self.mode.is_valid_mark(&mark) {
                valid.push(mark);
            } else {
                remove(&mark_add(original, &mark), journal)?;
            }
        }

        // BTreeSet iteration already yields ascending order
        self.enforce_keep(original, &mut valid, journal)?;

        if let Some(mark) = self.next_mark(original, &valid, today, journal)? {
            let target = mark_add(original, &mark);
            if std::fs::symlink_metadata(&target).is_ok() {
                journal.error(format!(
                    "{} already exists, not rotating {}",
                    target.display(),
                    original.display()
                ));
                return Ok(());
            }
            std::fs::rename(original, &target)?;
            journal.print(format!("rotated {} to {}", original.display(), target.display()));

            valid.push(mark);
            valid.sort();
            self.enforce_keep(original, &mut valid, journal)?;
        }

        Ok(())
    }

    /// Delete the oldest marks beyond `keep`.
    fn enforce_keep(
        &self,
        original: &Path,
        marks: &mut Vec<String>,
        journal: &Journal,
    ) -> io::Result<()> {
        if self.keep == 0 || marks.len() <= self.keep {
            return Ok(());
        }

        let excess = marks.len() - self.keep;
        for mark in marks.drain(..excess) {
            remove(&mark_add(original, &mark), journal)?;
        }
        Ok(())
    }

    /// Mark to archive the live file under, if it is due.
    fn next_mark(
        &self,
        original: &Path,
        marks: &[String],
        today: NaiveDate,
        journal: &Journal,
    ) -> io::Result<Option<String>> {
        let metadata = match std::fs::metadata(original) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        match self.mode {
            RotationMode::Daily => {
                let yesterday = today
                    .checked_sub_days(Days::new(1))
                    .unwrap_or(today)
                    .format(DAILY_LAYOUT)
                    .to_string();

                match std::fs::metadata(mark_add(original, &yesterday)) {
                    Ok(_) => {
                        journal.print(format!(
                            "{} already rotated for {}",
                            original.display(),
                            yesterday
                        ));
                        Ok(None)
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Some(yesterday)),
                    Err(e) => Err(e),
                }
            }
            RotationMode::Filesize => {
                if metadata.len() < self.threshold {
                    return Ok(None);
                }

                // invalid marks were purged, so every id parses and has a successor
                let last = marks
                    .iter()
                    .filter_map(|mark| mark.parse::<u64>().ok())
                    .max()
                    .unwrap_or(0);
                let next = last.checked_add(1).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "sequence ids exhausted")
                })?;

                Ok(Some(format!("{:012}", next)))
            }
        }
    }
}

fn remove(path: &Path, journal: &Journal) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            journal.print(format!("removed {}", path.display()));
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Periodic rotation runner.
pub struct LogrotateRunner {
    unit: Unit,
    journal: Arc<Journal>,
    supervisor: Arc<ProcessSupervisor>,
    rotator: Rotator,
}

impl LogrotateRunner {
    pub fn new(ctx: RunnerContext) -> Result<Self> {
        let mode = RotationMode::parse(&ctx.unit.mode).ok_or_else(|| Error::UnknownRotationMode {
            name: ctx.unit.name.clone(),
            mode: ctx.unit.mode.clone(),
        })?;
        let rotator = Rotator::new(ctx.unit.files.clone(), mode, ctx.unit.keep);

        Ok(Self {
            unit: ctx.unit,
            journal: ctx.journal,
            supervisor: ctx.supervisor,
            rotator,
        })
    }

    /// One pass: rotate, then run the unit's command if it has one.
    pub async fn pass(&self) {
        self.journal.print("rotation started");

        let rotator = self.rotator.clone();
        let journal = Arc::clone(&self.journal);
        let today = Utc::now().date_naive();
        if let Err(e) = tokio::task::spawn_blocking(move || rotator.rotate(today, &journal)).await {
            self.journal.error(format!("rotation pass aborted: {}", e));
        }

        if !self.unit.exec.command.is_empty() {
            self.supervisor.execute(&self.unit.exec, &self.journal).await;
        }
        self.journal.print("rotation finished");
    }
}

#[async_trait]
impl Runner for LogrotateRunner {
    fn name(&self) -> &str {
        &self.unit.name
    }

    async fn run(&self, token: CancellationToken) {
        self.journal.print("runner started");

        let mut ticker = Schedule::Every(ROTATION_INTERVAL).ticker();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.pass().await,
            }
        }

        self.journal.print("runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal(dir: &Path) -> Journal {
        Journal::new(dir, "logrotate/rotate", "rotate")
            .unwrap()
            .without_console()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_mark_extract() {
        let (o, m) = mark_extract(Path::new("test/hello.ROT2020-02-32.log"));
        assert_eq!(o, PathBuf::from("test/hello.log"));
        assert_eq!(m, "2020-02-32");

        let (o, m) = mark_extract(Path::new("hello.ROT2020022.log"));
        assert_eq!(o, PathBuf::from("hello.log"));
        assert_eq!(m, "2020022");

        let (o, m) = mark_extract(Path::new("hello/helloOT2020022.log"));
        assert_eq!(o, PathBuf::from("hello/helloOT2020022.log"));
        assert_eq!(m, "");

        let (o, m) = mark_extract(Path::new("/var/log/plain"));
        assert_eq!(o, PathBuf::from("/var/log/plain"));
        assert_eq!(m, "");
    }

    #[test]
    fn test_mark_add() {
        assert_eq!(
            mark_add(Path::new("test/hello.log"), "*"),
            PathBuf::from("test/hello.ROT*.log")
        );
        assert_eq!(mark_add(Path::new("test/hello"), "*"), PathBuf::from("test/hello.ROT*"));
        assert_eq!(mark_add(Path::new(".hello"), "*"), PathBuf::from(".ROT*.hello"));
        assert_eq!(
            mark_add(Path::new("hello.log"), &format!("{:012}", 11)),
            PathBuf::from("hello.ROT000000000011.log")
        );
    }

    #[test]
    fn test_mark_round_trip() {
        for name in ["/var/log/app.log", "a.b.c.txt", ".hidden", "rel/app.out"] {
            for mark in ["2021-01-31", "000000000042", "x"] {
                let marked = mark_add(Path::new(name), mark);
                assert_eq!(
                    mark_extract(&marked),
                    (PathBuf::from(name), mark.to_string())
                );
            }
        }
    }

    #[test]
    fn test_mode_marks() {
        assert!(RotationMode::Daily.is_valid_mark("2020-06-02"));
        assert!(!RotationMode::Daily.is_valid_mark("000000000001"));
        assert!(RotationMode::Filesize.is_valid_mark("000000000001"));
        assert!(!RotationMode::Filesize.is_valid_mark("2020-06-02"));
        assert!(RotationMode::Filesize.is_valid_mark("18446744073709551614"));
        assert!(!RotationMode::Filesize.is_valid_mark("18446744073709551615"));
        assert!(!RotationMode::Filesize.is_valid_mark("123456789012345678901"));
        assert_eq!(RotationMode::parse("size"), Some(RotationMode::Filesize));
        assert_eq!(RotationMode::parse("weekly"), None);
    }

    #[test]
    fn test_daily_idempotent() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let journal = journal(dir.path());
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let pattern = format!("{}/*.log", logs.display());
        let rotator = Rotator::new(vec![pattern], RotationMode::Daily, 0);

        std::fs::write(logs.join("app.log"), "day one").unwrap();
        rotator.rotate(today, &journal);
        assert_eq!(names(&logs), vec!["app.ROT2024-02-29.log"]);

        std::fs::write(logs.join("app.log"), "same day").unwrap();
        rotator.rotate(today, &journal);
        assert_eq!(names(&logs), vec!["app.ROT2024-02-29.log", "app.log"]);
        assert_eq!(
            std::fs::read_to_string(logs.join("app.ROT2024-02-29.log")).unwrap(),
            "day one"
        );
    }

    #[test]
    fn test_daily_removes_malformed_and_keeps() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let journal = journal(dir.path());
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        for name in [
            "app.log",
            "app.ROT2024-03-05.log",
            "app.ROT2024-03-06.log",
            "app.ROT2024-03-07.log",
            "app.ROT000000000001.log",
        ] {
            std::fs::write(logs.join(name), name).unwrap();
        }

        let pattern = format!("{}/*.log", logs.display());
        Rotator::new(vec![pattern], RotationMode::Daily, 2).rotate(today, &journal);

        assert_eq!(
            names(&logs),
            vec!["app.ROT2024-03-07.log", "app.ROT2024-03-09.log"]
        );
    }

    #[test]
    fn test_filesize_below_threshold() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let journal = journal(dir.path());

        std::fs::write(logs.join("app.log"), "small").unwrap();
        let pattern = format!("{}/app*.log", logs.display());
        Rotator::new(vec![pattern], RotationMode::Filesize, 2)
            .rotate(Utc::now().date_naive(), &journal);

        assert_eq!(names(&logs), vec!["app.log"]);
    }

    #[test]
    fn test_extensionless_archive_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let journal = journal(dir.path());

        let pattern = format!("{}/app*", logs.display());
        let rotator = Rotator::new(vec![pattern], RotationMode::Filesize, 5).with_threshold(1);
        let today = Utc::now().date_naive();

        std::fs::write(logs.join("app"), "FIRST").unwrap();
        rotator.rotate(today, &journal);
        assert_eq!(names(&logs), vec!["app.ROT000000000001"]);

        std::fs::write(logs.join("app"), "SECOND").unwrap();
        rotator.rotate(today, &journal);
        assert_eq!(names(&logs), vec!["app", "app.ROT000000000001"]);
        assert_eq!(
            std::fs::read_to_string(logs.join("app.ROT000000000001")).unwrap(),
            "FIRST"
        );
        assert_eq!(std::fs::read_to_string(logs.join("app")).unwrap(), "SECOND");

        let err = std::fs::read_to_string(dir.path().join("rotate.err.log")).unwrap();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_unmatched_archive_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let journal = journal(dir.path());

        std::fs::write(logs.join("app.ROT000000000001.log"), "kept").unwrap();
        std::fs::write(logs.join("app.log"), "live").unwrap();

        // the glob only matches the live file, so no marks are known
        let pattern = format!("{}/app.log", logs.display());
        Rotator::new(vec![pattern], RotationMode::Filesize, 0)
            .with_threshold(1)
            .rotate(Utc::now().date_naive(), &journal);

        assert_eq!(
            std::fs::read_to_string(logs.join("app.ROT000000000001.log")).unwrap(),
            "kept"
        );
        assert_eq!(std::fs::read_to_string(logs.join("app.log")).unwrap(), "live");
    }

    #[test]
    fn test_exhausted_size_marks_are_purged() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let journal = journal(dir.path());

        for name in [
            "app.log",
            "app.ROT18446744073709551615.log",
            "app.ROT123456789012345678901.log",
        ] {
            std::fs::write(logs.join(name), name).unwrap();
        }

        let pattern = format!("{}/*.log", logs.display());
        Rotator::new(vec![pattern], RotationMode::Filesize, 0)
            .with_threshold(1)
            .rotate(Utc::now().date_naive(), &journal);

        assert_eq!(names(&logs), vec!["app.ROT000000000001.log"]);
        assert_eq!(
            std::fs::read_to_string(logs.join("app.ROT000000000001.log")).unwrap(),
            "app.log"
        );
    }

    fn rotate_unit(logs: &Path, command: Vec<String>) -> Unit {
        let mut unit = Unit::new("rotate", crate::unit::UnitKind::Logrotate, command);
        unit.mode = "daily".into();
        unit.files = vec![format!("{}/*.log", logs.display())];
        unit.exec.dir = Some(logs.to_path_buf());
        unit
    }

    fn create_test_runner(dir: &Path, unit: Unit) -> LogrotateRunner {
        LogrotateRunner::new(RunnerContext {
            unit,
            journal: Arc::new(journal(dir)),
            supervisor: Arc::new(ProcessSupervisor::new()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_command_runs_once_per_pass() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        std::fs::write(logs.join("a.log"), "a").unwrap();
        std::fs::write(logs.join("b.log"), "b").unwrap();

        let command = vec!["sh".into(), "-c".into(), "echo pass >> marker".into()];
        let runner = create_test_runner(dir.path(), rotate_unit(&logs, command));

        runner.pass().await;
        let marker = std::fs::read_to_string(logs.join("marker")).unwrap();
        assert_eq!(marker.lines().count(), 1);

        // nothing left to rotate, the command still runs
        runner.pass().await;
        let marker = std::fs::read_to_string(logs.join("marker")).unwrap();
        assert_eq!(marker.lines().count(), 2);

        let archived: Vec<String> = names(&logs)
            .into_iter()
            .filter(|name| name.contains(".ROT"))
            .collect();
        assert_eq!(archived.len(), 2);
        assert!(archived[0].starts_with("a.ROT"));
        assert!(archived[1].starts_with("b.ROT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_every_minute_and_stops() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        std::fs::write(logs.join("app.log"), "app").unwrap();

        let runner = Arc::new(create_test_runner(dir.path(), rotate_unit(&logs, Vec::new())));
        let token = CancellationToken::new();
        let handle = {
            let runner = Arc::clone(&runner);
            let token = token.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        tokio::time::sleep(ROTATION_INTERVAL / 2).await;
        assert_eq!(names(&logs), vec!["app.log"]);

        tokio::time::sleep(ROTATION_INTERVAL).await;
        assert!(!logs.join("app.log").exists());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("runner did not stop after cancel")
            .unwrap();

        let out = std::fs::read_to_string(dir.path().join("rotate.out.log")).unwrap();
        assert_eq!(out.matches("rotation finished").count(), 1);
        assert!(out.contains("runner stopped"));
    }

    #[test]
    fn test_invalid_glob_is_logged() {
        let dir = TempDir::new().unwrap();
        let journal = journal(dir.path());

        Rotator::new(vec!["[".into()], RotationMode::Daily, 0)
            .rotate(Utc::now().date_naive(), &journal);

        let err = std::fs::read_to_string(dir.path().join("rotate.err.log")).unwrap();
        assert!(err.contains("invalid pattern"));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let dir = TempDir::new().unwrap();
        let mut unit = Unit::new("rotate", crate::unit::UnitKind::Logrotate, Vec::new());
        unit.mode = "hourly".into();
        let result = LogrotateRunner::new(RunnerContext {
            unit,
            journal: Arc::new(journal(dir.path())),
            supervisor: Arc::new(ProcessSupervisor::new()),
        });
        assert!(matches!(result, Err(Error::UnknownRotationMode { .. })));
    }
}
