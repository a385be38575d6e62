//! Carving safety monitor
//!
//! Carving tools write every signature hit to disk and can fill a volume.
//! `CarvingMonitor` runs such a tool while polling its output directory:
//!
//! 1. Before spawning: stale output already over a cap means `Limited`, and
//!    the tool is never started.
//! 2. While running: every poll interval the directory is measured in one
//!    pass; over a cap (or on cancellation) the tool gets SIGTERM, then a
//!    hard kill after the terminate timeout.
//! 3. After exit: the directory is measured once more, since the tool may
//!    have crossed a cap between polls.
//!
//! Carving tools exit non-zero on partial success, so a non-zero exit within
//! limits is still `Completed` and carries its exit code. `Limited` output is
//! truncated but trustworthy; a `Failed` run (spawn or wait error) is not.

use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tracing::{debug, info, warn};

use super::callbacks::{ExtractorCallbacks, LogLevel};
use crate::common::audit;
use crate::config::{keys, CarvingSettings, RunConfig};

/// Granularity of exit/cancellation checks between limit polls
const WAIT_SLICE: Duration = Duration::from_millis(50);

// ============================================================================
// Limits
// ============================================================================

/// Output caps for one carving run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CarvingLimits {
    pub max_bytes: u64,
    pub max_files: u64,
}

impl CarvingLimits {
    pub fn new(max_bytes: u64, max_files: u64) -> Self {
        Self { max_bytes, max_files }
    }

    pub fn from_settings(settings: &CarvingSettings) -> Self {
        Self::new(settings.max_output_mb.saturating_mul(1024 * 1024), settings.max_files)
    }

    /// Settings defaults overridden by `max_carved_size_mb` / `max_carved_files`
    pub fn from_config(config: &RunConfig, settings: &CarvingSettings) -> Self {
        let max_mb = config.get_u64(keys::MAX_CARVED_SIZE_MB, settings.max_output_mb);
        let max_files = config.get_u64(keys::MAX_CARVED_FILES, settings.max_files);
        Self::new(max_mb.saturating_mul(1024 * 1024), max_files)
    }
}

/// Totals measured in an output directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputUsage {
    pub total_bytes: u64,
    pub file_count: u64,
}

/// Result of one limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitCheck {
    Within(OutputUsage),
    Exceeded { usage: OutputUsage, reason: String },
}

impl LimitCheck {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, LimitCheck::Exceeded { .. })
    }
}

/// Measure `dir` in one pass, stopping as soon as a cap is crossed
///
/// A missing directory is empty.
pub fn check_carve_limits(dir: &Path, limits: &CarvingLimits) -> LimitCheck {
    let mut usage = OutputUsage::default();
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if file_type.is_dir() {
                pending.push(entry.path());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            usage.file_count += 1;
            usage.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);

            if usage.file_count > limits.max_files {
                return LimitCheck::Exceeded {
                    usage,
                    reason: format!("File count ({}) exceeded limit ({})", usage.file_count, limits.max_files),
                };
            }
            if usage.total_bytes > limits.max_bytes {
                return LimitCheck::Exceeded {
                    usage,
                    reason: format!(
                        "Output size ({:.1} MB) exceeded limit ({:.1} MB)",
                        usage.total_bytes as f64 / (1024.0 * 1024.0),
                        limits.max_bytes as f64 / (1024.0 * 1024.0)
                    ),
                };
            }
        }
    }

    LimitCheck::Within(usage)
}

// ============================================================================
// Monitor
// ============================================================================

/// How a monitored carving run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarveOutcome {
    /// Tool exited within limits; `exit_code` is `None` when killed by a signal
    Completed {
        stdout: String,
        stderr: String,
        usage: OutputUsage,
        exit_code: Option<i32>,
    },
    /// A cap was hit (before start, mid-run, or at exit)
    Limited { reason: String, usage: OutputUsage, spawned: bool },
    Cancelled,
    /// The tool could not be started or waited on
    Failed { reason: String },
}

impl CarveOutcome {
    /// Completed with exit code 0
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, CarveOutcome::Completed { exit_code: Some(0), .. })
    }
}

/// Runs an external carving tool under output caps
#[derive(Debug, Clone)]
pub struct CarvingMonitor {
    limits: CarvingLimits,
    poll_interval: Duration,
    terminate_timeout: Duration,
}

impl CarvingMonitor {
    pub fn new(limits: CarvingLimits) -> Self {
        Self {
            limits,
            poll_interval: Duration::from_secs(2),
            terminate_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_settings(limits: CarvingLimits, settings: &CarvingSettings) -> Self {
        Self::new(limits)
            .with_poll_interval(settings.poll_interval())
            .with_terminate_timeout(settings.terminate_timeout())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    pub fn limits(&self) -> &CarvingLimits {
        &self.limits
    }

    /// Run `command` writing into `output_dir` until it exits, hits a cap,
    /// or the run is cancelled
    pub fn run(
        &self,
        tool: &str,
        mut command: Command,
        output_dir: &Path,
        callbacks: &dyn ExtractorCallbacks,
    ) -> CarveOutcome {
        if let LimitCheck::Exceeded { usage, reason } = check_carve_limits(output_dir, &self.limits) {
            audit::log_carving_limited(tool, output_dir, &reason);
            callbacks.on_log(&format!("Carving not started: {}", reason), LogLevel::Warning);
            return CarveOutcome::Limited { reason, usage, spawned: false };
        }

        callbacks.on_log(
            &format!(
                "Limits: {} MB, {} files",
                self.limits.max_bytes / (1024 * 1024),
                self.limits.max_files
            ),
            LogLevel::Info,
        );

        let mut child = match command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return CarveOutcome::Failed {
                    reason: format!("Failed to start {}: {}", tool, e),
                }
            }
        };
        info!(tool, pid = child.id(), output_dir = %output_dir.display(), "Carving tool started");

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit = self.supervise(tool, &mut child, output_dir, callbacks);

        // Children of the tool may still hold the pipes open
        let drain_deadline = Instant::now() + self.terminate_timeout;
        let stdout = join_drain(stdout, drain_deadline);
        let stderr = join_drain(stderr, drain_deadline);

        match exit {
            Supervision::Exited(status) => {
                // Tool may have crossed a cap after the last poll
                match check_carve_limits(output_dir, &self.limits) {
                    LimitCheck::Exceeded { usage, reason } => {
                        audit::log_carving_limited(tool, output_dir, &reason);
                        callbacks.on_log(&format!("Carving terminated: {}", reason), LogLevel::Warning);
                        CarveOutcome::Limited { reason, usage, spawned: true }
                    }
                    LimitCheck::Within(usage) => {
                        if !status.success() {
                            warn!(tool, %status, "Carving tool exited non-zero, keeping its output");
                            callbacks.on_log(
                                &format!("{} exited with {}: {}", tool, status, tail(&stderr)),
                                LogLevel::Warning,
                            );
                        }
                        CarveOutcome::Completed { stdout, stderr, usage, exit_code: status.code() }
                    }
                }
            }
            Supervision::Limited { reason, usage } => {
                audit::log_carving_limited(tool, output_dir, &reason);
                callbacks.on_log(&format!("Carving terminated: {}", reason), LogLevel::Warning);
                CarveOutcome::Limited { reason, usage, spawned: true }
            }
            Supervision::Cancelled => {
                callbacks.on_log("Carving cancelled", LogLevel::Warning);
                CarveOutcome::Cancelled
            }
            Supervision::WaitFailed(reason) => CarveOutcome::Failed { reason },
        }
    }

    fn supervise(
        &self,
        tool: &str,
        child: &mut Child,
        output_dir: &Path,
        callbacks: &dyn ExtractorCallbacks,
    ) -> Supervision {
        let mut next_check = Instant::now() + self.poll_interval;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Supervision::Exited(status),
                Ok(None) => {}
                Err(e) => {
                    terminate(child, self.terminate_timeout);
                    return Supervision::WaitFailed(format!("Failed to wait for {}: {}", tool, e));
                }
            }

            if callbacks.is_cancelled() {
                info!(tool, "Cancellation requested, terminating carving tool");
                terminate(child, self.terminate_timeout);
                return Supervision::Cancelled;
            }

            if Instant::now() >= next_check {
                match check_carve_limits(output_dir, &self.limits) {
                    LimitCheck::Exceeded { usage, reason } => {
                        warn!(tool, %reason, "Carving limit exceeded, terminating");
                        terminate(child, self.terminate_timeout);
                        return Supervision::Limited { reason, usage };
                    }
                    LimitCheck::Within(usage) => {
                        debug!(tool, bytes = usage.total_bytes, files = usage.file_count, "Carving progress");
                        callbacks.on_progress(usage.file_count, self.limits.max_files, "Carving");
                    }
                }
                next_check = Instant::now() + self.poll_interval;
            }

            thread::sleep(WAIT_SLICE.min(self.poll_interval));
        }
    }
}

enum Supervision {
    Exited(ExitStatus),
    Limited { reason: String, usage: OutputUsage },
    Cancelled,
    WaitFailed(String),
}

/// SIGTERM, wait up to `timeout`, then force-kill
fn terminate(child: &mut Child, timeout: Duration) {
    let pid = Pid::from_u32(child.id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    let signalled = system
        .process(pid)
        .and_then(|process| process.kill_with(Signal::Term))
        .unwrap_or(false);

    if signalled {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                debug!(pid = child.id(), "Carving tool exited after SIGTERM");
                return;
            }
            thread::sleep(WAIT_SLICE);
        }
        warn!(pid = child.id(), "Carving tool ignored SIGTERM, killing");
    }

    if let Err(e) = child.kill() {
        debug!("Kill failed (process likely already exited): {}", e);
    }
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<String>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

/// Collect a drained stream, abandoning it at `deadline`
fn join_drain(handle: Option<JoinHandle<String>>, deadline: Instant) -> String {
    let Some(handle) = handle else { return String::new() };
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Carving tool output still open after exit, not waiting for it");
            return String::new();
        }
        thread::sleep(WAIT_SLICE);
    }
    handle.join().unwrap_or_default()
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().rev().take(5).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

// ============================================================================
// Pruning
// ============================================================================

/// Byproducts the ingestion phase never reads
#[derive(Debug, Clone, Default)]
pub struct PrunePolicy {
    /// Top-level subdirectory names removed wholesale
    pub directories: Vec<String>,
    /// Extensions (leading dot, lowercase) removed anywhere
    pub extensions: Vec<String>,
    /// Extensions never removed, even inside a prunable directory
    pub keep_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub files_removed: u64,
    pub bytes_freed: u64,
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn collect_files(dir: &Path, out: &mut Vec<(PathBuf, u64)>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            collect_files(&entry.path(), out);
        } else if file_type.is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push((entry.path(), size));
        }
    }
}

impl PrunePolicy {
    fn keeps(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        self.keep_extensions.iter().any(|k| *k == ext)
    }

    fn removes(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        !ext.is_empty() && self.extensions.iter().any(|e| *e == ext)
    }

    /// Delete byproducts under `root`
    pub fn prune(&self, root: &Path, callbacks: &dyn ExtractorCallbacks) -> PruneStats {
        let mut stats = PruneStats::default();

        for name in &self.directories {
            let target = root.join(name);
            if !target.is_dir() {
                continue;
            }
            let mut files = Vec::new();
            collect_files(&target, &mut files);
            if files.iter().any(|(p, _)| self.keeps(p)) {
                debug!(dir = %target.display(), "Prunable directory holds kept files, pruning per file");
                continue;
            }
            match fs::remove_dir_all(&target) {
                Ok(()) => {
                    let bytes: u64 = files.iter().map(|(_, s)| s).sum();
                    stats.files_removed += files.len() as u64;
                    stats.bytes_freed += bytes;
                    callbacks.on_log(
                        &format!(
                            "Pruned directory: {} ({} files, {:.1} MB)",
                            name,
                            files.len(),
                            bytes as f64 / (1024.0 * 1024.0)
                        ),
                        LogLevel::Info,
                    );
                }
                Err(e) => warn!("Failed to prune directory {:?}: {}", target, e),
            }
        }

        let mut files = Vec::new();
        collect_files(root, &mut files);
        for (path, size) in files {
            if self.keeps(&path) || !self.removes(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    stats.files_removed += 1;
                    stats.bytes_freed += size;
                }
                Err(e) => debug!("Failed to prune file {:?}: {}", path, e),
            }
        }

        if stats.files_removed > 0 {
            info!(
                files = stats.files_removed,
                mb = stats.bytes_freed as f64 / (1024.0 * 1024.0),
                "Pruned non-ingested files"
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::callbacks::{CancellationToken, TracingCallbacks};
    use tempfile::TempDir;

    fn write(path: &Path, size: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; size]).unwrap();
    }

    #[test]
    fn test_check_limits() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            check_carve_limits(&dir.path().join("missing"), &CarvingLimits::new(1, 1)),
            LimitCheck::Within(OutputUsage::default())
        );

        write(&dir.path().join("jpg/1.jpg"), 600);
        write(&dir.path().join("jpg/2.jpg"), 600);

        match check_carve_limits(dir.path(), &CarvingLimits::new(10_000, 10)) {
            LimitCheck::Within(usage) => {
                assert_eq!(usage.file_count, 2);
                assert_eq!(usage.total_bytes, 1200);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(check_carve_limits(dir.path(), &CarvingLimits::new(1000, 10)).is_exceeded());
        assert!(check_carve_limits(dir.path(), &CarvingLimits::new(10_000, 1)).is_exceeded());
    }

    #[test]
    fn test_limits_from_config() {
        let settings = CarvingSettings::default();
        let config = RunConfig::new().with(keys::MAX_CARVED_FILES, 10);
        let limits = CarvingLimits::from_config(&config, &settings);
        assert_eq!(limits.max_files, 10);
        assert_eq!(limits.max_bytes, 10_000 * 1024 * 1024);
    }

    #[test]
    fn test_prestart_limit_does_not_spawn() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("stale/old.jpg"), 2048);
        let marker = dir.path().join("spawned");

        let mut command = Command::new("sh");
        command.arg("-c").arg(format!("touch {}", marker.display()));

        let monitor = CarvingMonitor::new(CarvingLimits::new(1024, 100));
        let outcome = monitor.run("fake", command, dir.path(), &TracingCallbacks::new("test"));

        assert!(matches!(outcome, CarveOutcome::Limited { spawned: false, .. }));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_limit_hit_mid_run_terminates() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();

        // Writes 1 KiB files forever
        let script = format!(
            "i=0; while true; do head -c 1024 /dev/zero > {}/f$i.bin; i=$((i+1)); sleep 0.01; done",
            out.display()
        );
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);

        let monitor = CarvingMonitor::new(CarvingLimits::new(8 * 1024, 10_000))
            .with_poll_interval(Duration::from_millis(50))
            .with_terminate_timeout(Duration::from_secs(2));

        let start = Instant::now();
        let outcome = monitor.run("fake", command, &out, &TracingCallbacks::new("test"));
        assert!(start.elapsed() < Duration::from_secs(10));

        match outcome {
            CarveOutcome::Limited { spawned, usage, .. } => {
                assert!(spawned);
                assert!(usage.total_bytes > 8 * 1024);
            }
            other => panic!("expected Limited, got {:?}", other),
        }

        // Same directory, next run: refused before starting
        let mut again = Command::new("sh");
        again.arg("-c").arg("exit 0");
        assert!(matches!(
            monitor.run("fake", again, &out, &TracingCallbacks::new("test")),
            CarveOutcome::Limited { spawned: false, .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_limit_crossed_between_polls() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();

        let mut command = Command::new("sh");
        command.arg("-c").arg(format!("head -c 4096 /dev/zero > {}/big.bin", out.display()));

        let monitor = CarvingMonitor::new(CarvingLimits::new(1024, 100))
            .with_poll_interval(Duration::from_secs(60));
        let outcome = monitor.run("fake", command, &out, &TracingCallbacks::new("test"));
        assert!(matches!(outcome, CarveOutcome::Limited { spawned: true, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_codes() {
        let dir = TempDir::new().unwrap();

        let mut ok = Command::new("sh");
        ok.arg("-c").arg("echo carved; echo warn >&2");
        let monitor = CarvingMonitor::new(CarvingLimits::new(1 << 20, 100));
        match monitor.run("fake", ok, dir.path(), &TracingCallbacks::new("test")) {
            outcome @ CarveOutcome::Completed { .. } => {
                assert!(outcome.is_clean_exit());
                if let CarveOutcome::Completed { stdout, stderr, .. } = outcome {
                    assert_eq!(stdout.trim(), "carved");
                    assert_eq!(stderr.trim(), "warn");
                }
            }
            other => panic!("expected Completed, got {:?}", other),
        }

        // Partial success: output kept, exit code reported
        let mut partial = Command::new("sh");
        partial
            .arg("-c")
            .arg(format!("printf 'JPEG' > {}/1.jpg; echo 'bad sector' >&2; exit 1", dir.path().display()));
        match monitor.run("fake", partial, dir.path(), &TracingCallbacks::new("test")) {
            CarveOutcome::Completed { exit_code, usage, stderr, .. } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(usage.file_count, 1);
                assert!(stderr.contains("bad sector"));
            }
            other => panic!("expected Completed, got {:?}", other),
        }

        let missing = Command::new("/nonexistent/carver");
        assert!(matches!(
            monitor.run("fake", missing, dir.path(), &TracingCallbacks::new("test")),
            CarveOutcome::Failed { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancellation_terminates_tool() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let callbacks = TracingCallbacks::new("test").with_token(token.clone());

        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 30");

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                token.cancel();
            })
        };

        let start = Instant::now();
        let monitor = CarvingMonitor::new(CarvingLimits::new(1 << 20, 100))
            .with_terminate_timeout(Duration::from_secs(2));
        let outcome = monitor.run("fake", command, dir.path(), &callbacks);
        canceller.join().unwrap();

        assert_eq!(outcome, CarveOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_inherited_pipe_does_not_block() {
        let dir = TempDir::new().unwrap();

        // Background child keeps stdout open long after the tool exits
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 30 & echo started");

        let monitor = CarvingMonitor::new(CarvingLimits::new(1 << 20, 100))
            .with_terminate_timeout(Duration::from_millis(500));
        let start = Instant::now();
        let outcome = monitor.run("fake", command, dir.path(), &TracingCallbacks::new("test"));

        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(outcome.is_clean_exit());
    }

    #[test]
    fn test_prune_is_conservative() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join("ldb/a.ldb"), 100);
        write(&root.join("ldb/b.ldb"), 100);
        write(&root.join("sst/keep.jpg"), 10);
        write(&root.join("sst/x.sst"), 50);
        write(&root.join("jpg/1.jpg"), 10);
        write(&root.join("jpg/audit.log"), 5);
        write(&root.join("History"), 5);

        let policy = PrunePolicy {
            directories: vec!["ldb".into(), "sst".into()],
            extensions: vec![".ldb".into(), ".sst".into(), ".log".into()],
            keep_extensions: vec![".jpg".into()],
        };
        let stats = policy.prune(root, &TracingCallbacks::new("test"));

        assert_eq!(stats.files_removed, 4);
        assert_eq!(stats.bytes_freed, 255);
        assert!(!root.join("ldb").exists());
        assert!(root.join("sst/keep.jpg").exists());
        assert!(!root.join("sst/x.sst").exists());
        assert!(root.join("jpg/1.jpg").exists());
        assert!(root.join("History").exists());
    }
}
