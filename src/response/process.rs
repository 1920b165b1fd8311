//! Process enumeration and signalling for threat response

use anyhow::Context;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Information about a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub comm: String,
    /// Wall-clock start time
    pub started: SystemTime,
}

/// Signal used to stop a suspect process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
    /// SIGKILL
    #[default]
    Kill,
    /// SIGSTOP, leaving the process around for inspection
    Freeze,
}

impl StopSignal {
    fn as_signal(self) -> Signal {
        match self {
            StopSignal::Kill => Signal::SIGKILL,
            StopSignal::Freeze => Signal::SIGSTOP,
        }
    }
}

/// Result of delivering a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The process had already exited
    Gone,
}

/// Source of process information and signal delivery
pub trait ProcessTable: Send + Sync {
    /// All processes visible to the daemon
    fn processes(&self) -> anyhow::Result<Vec<ProcessInfo>>;

    /// Send `signal` to `pid`
    fn signal(&self, pid: u32, signal: StopSignal) -> anyhow::Result<SignalOutcome>;
}

/// `/proc` backed process table
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcFs;

impl ProcessTable for ProcFs {
    fn processes(&self) -> anyhow::Result<Vec<ProcessInfo>> {
        let boot = boot_time()?;
        let ticks = clock_ticks();
        let mut procs = Vec::new();

        for entry in std::fs::read_dir("/proc").context("failed to list /proc")? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let pid: u32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                Some(pid) => pid,
                None => continue,
            };

            // Processes exit while we walk; skip anything that vanished
            let stat = match std::fs::read_to_string(entry.path().join("stat")) {
                Ok(stat) => stat,
                Err(_) => continue,
            };

            if let Some((comm, start_ticks)) = parse_stat(&stat) {
                let since_boot = Duration::from_secs_f64(start_ticks as f64 / ticks as f64);
                procs.push(ProcessInfo {
                    pid,
                    comm,
                    started: boot + since_boot,
                });
            }
        }

        Ok(procs)
    }

    fn signal(&self, pid: u32, stop: StopSignal) -> anyhow::Result<SignalOutcome> {
        let target = Pid::from_raw(pid as i32);

        match signal::kill(target, stop.as_signal()) {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(Errno::ESRCH) => Ok(SignalOutcome::Gone),
            Err(e) => Err(e).with_context(|| format!("failed to signal process {}", pid)),
        }
    }
}

/// Extract `(comm, starttime)` from a `/proc/<pid>/stat` line.
///
/// The command name is wrapped in parentheses and may itself contain
/// spaces or parentheses, so fields are counted from the last `)`.
fn parse_stat(stat: &str) -> Option<(String, u64)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?.to_string();

    // Field 3 (state) is the first after the command; starttime is field 22
    let start_ticks = stat.get(close + 1..)?.split_whitespace().nth(19)?.parse().ok()?;

    Some((comm, start_ticks))
}

/// System boot time from the `btime` line of `/proc/stat`
fn boot_time() -> anyhow::Result<SystemTime> {
    let stat = std::fs::read_to_string(Path::new("/proc/stat")).context("failed to read /proc/stat")?;
    parse_btime(&stat).context("no btime in /proc/stat")
}

fn parse_btime(stat: &str) -> Option<SystemTime> {
    stat.lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|secs| secs.trim().parse().ok())
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}

fn clock_ticks() -> u64 {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as u64,
        _ => 100,
    }
}

/// Summary of a stop sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Processes that received the signal
    pub stopped: Vec<u32>,
    /// Processes that could not be signalled
    pub failed: Vec<u32>,
}

/// Signal every process started less than `age` before `now`, except this one.
///
/// One failure does not abort the sweep.
pub fn stop_processes_younger_than(
    table: &dyn ProcessTable,
    age: Duration,
    now: SystemTime,
    stop: StopSignal,
) -> anyhow::Result<StopReport> {
    let own_pid = std::process::id();
    let threshold = now.checked_sub(age).unwrap_or(UNIX_EPOCH);
    let mut report = StopReport::default();

    for process in table.processes()? {
        if process.pid == own_pid || process.started < threshold {
            continue;
        }

        match table.signal(process.pid, stop) {
            Ok(SignalOutcome::Delivered) => {
                info!(pid = process.pid, comm = %process.comm, signal = ?stop, "Stopped process");
                report.stopped.push(process.pid);
            }
            Ok(SignalOutcome::Gone) => {
                debug!(pid = process.pid, "Process exited before it could be stopped");
            }
            Err(e) => {
                warn!("Failed to stop process {} ({}): {:#}", process.pid, process.comm, e);
                report.failed.push(process.pid);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory process table recording delivered signals
    #[derive(Default)]
    pub(crate) struct FakeProcesses {
        pub procs: Vec<ProcessInfo>,
        pub fail: Vec<u32>,
        pub gone: Vec<u32>,
        pub signalled: Mutex<Vec<(u32, StopSignal)>>,
    }

    impl FakeProcesses {
        pub fn with_ages(now: SystemTime, ages: &[(u32, u64)]) -> Self {
            Self {
                procs: ages
                    .iter()
                    .map(|&(pid, secs)| ProcessInfo {
                        pid,
                        comm: format!("proc{}", pid),
                        started: now - Duration::from_secs(secs),
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl ProcessTable for FakeProcesses {
        fn processes(&self) -> anyhow::Result<Vec<ProcessInfo>> {
            Ok(self.procs.clone())
        }

        fn signal(&self, pid: u32, signal: StopSignal) -> anyhow::Result<SignalOutcome> {
            if self.fail.contains(&pid) {
                anyhow::bail!("EPERM");
            }
            if self.gone.contains(&pid) {
                return Ok(SignalOutcome::Gone);
            }
            self.signalled.lock().push((pid, signal));
            Ok(SignalOutcome::Delivered)
        }
    }

    #[test]
    fn test_stops_only_young_processes() {
        let now = SystemTime::now();
        let table = FakeProcesses::with_ages(now, &[(100, 2), (200, 10)]);

        let report =
            stop_processes_younger_than(&table, Duration::from_secs(5), now, StopSignal::Kill)
                .unwrap();

        assert_eq!(report.stopped, vec![100]);
        assert_eq!(*table.signalled.lock(), vec![(100, StopSignal::Kill)]);
    }

    #[test]
    fn test_never_stops_self() {
        let now = SystemTime::now();
        let table = FakeProcesses::with_ages(now, &[(std::process::id(), 0), (300, 1)]);

        let report =
            stop_processes_younger_than(&table, Duration::from_secs(5), now, StopSignal::Freeze)
                .unwrap();

        assert_eq!(report.stopped, vec![300]);
    }

    #[test]
    fn test_failure_does_not_abort_sweep() {
        let now = SystemTime::now();
        let mut table = FakeProcesses::with_ages(now, &[(1, 1), (2, 1), (3, 1)]);
        table.fail = vec![1];
        table.gone = vec![2];

        let report =
            stop_processes_younger_than(&table, Duration::from_secs(5), now, StopSignal::Kill)
                .unwrap();

        assert_eq!(report.stopped, vec![3]);
        assert_eq!(report.failed, vec![1]);
    }

    #[test]
    fn test_parse_stat() {
        let stat = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 100 0 0 0 \
                    1 2 0 0 20 0 1 0 98765 1000000 100 18446744073709551615";
        assert_eq!(
            parse_stat(stat),
            Some(("my (odd) proc".to_string(), 98765))
        );
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn test_parse_btime() {
        let stat = "cpu  1 2 3\nbtime 1700000000\nprocesses 42\n";
        assert_eq!(
            parse_btime(stat),
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_lists_self() {
        let procs = ProcFs.processes().unwrap();
        let own = procs
            .iter()
            .find(|p| p.pid == std::process::id())
            .expect("own process listed");
        assert!(own.started <= SystemTime::now() + Duration::from_secs(2));
        assert!(!own.comm.is_empty());
    }
}
