//! Threat response module
//!
//! What happens after a file is classified as random: stop recently
//! started processes and/or hand the path to an operator-supplied hook.

mod process;
mod script;

pub use process::{
    stop_processes_younger_than, ProcFs, ProcessInfo, ProcessTable, SignalOutcome, StopReport,
    StopSignal,
};
pub use script::invoke_response_script;

use crate::config::ResponseConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, warn};

/// Response action to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Log only
    Log,
    /// Signal young processes
    StopProcesses,
    /// Run the response hook
    RunScript,
    /// Both of the above
    StopAndRunScript,
}

/// Response result
#[derive(Debug, Clone)]
pub struct Response {
    /// Action that was taken
    pub action: ResponseAction,
    /// Outcome of the stop sweep, if one ran
    pub stopped: Option<StopReport>,
    /// Whether the hook was launched
    pub script_launched: bool,
}

/// Mitigation dispatcher shared by inspection tasks
pub struct Mitigator {
    stop_age: Option<Duration>,
    stop_signal: StopSignal,
    script: Option<PathBuf>,
    processes: Arc<dyn ProcessTable>,
}

impl Mitigator {
    pub fn new(config: &ResponseConfig) -> Self {
        Self::with_process_table(config, Arc::new(ProcFs))
    }

    pub fn with_process_table(config: &ResponseConfig, processes: Arc<dyn ProcessTable>) -> Self {
        Self {
            stop_age: (config.stop_age_secs != 0)
                .then(|| Duration::from_secs(config.stop_age_secs)),
            stop_signal: config.signal,
            script: config
                .script
                .clone()
                .filter(|s| !s.as_os_str().is_empty()),
            processes,
        }
    }

    /// Which action a detection triggers under this configuration
    pub fn action(&self) -> ResponseAction {
        match (self.stop_age.is_some(), self.script.is_some()) {
            (false, false) => ResponseAction::Log,
            (true, false) => ResponseAction::StopProcesses,
            (false, true) => ResponseAction::RunScript,
            (true, true) => ResponseAction::StopAndRunScript,
        }
    }

    /// Respond to a suspicious file. Failures are logged, never returned.
    pub fn respond(&self, suspicious: &Path) -> Response {
        let stopped = self.stop_age.map(|age| {
            match stop_processes_younger_than(
                self.processes.as_ref(),
                age,
                SystemTime::now(),
                self.stop_signal,
            ) {
                Ok(report) => report,
                Err(e) => {
                    error!("Failed to enumerate processes: {:#}", e);
                    StopReport::default()
                }
            }
        });

        let script_launched = match &self.script {
            Some(script) => match invoke_response_script(script, suspicious) {
                Ok(_) => true,
                Err(e) => {
                    warn!("{:#}", e);
                    false
                }
            },
            None => false,
        };

        Response {
            action: self.action(),
            stopped,
            script_launched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::process::tests::FakeProcesses;
    use super::*;

    fn config(stop_age_secs: u64, script: Option<&str>) -> ResponseConfig {
        ResponseConfig {
            stop_age_secs,
            signal: StopSignal::Kill,
            script: script.map(PathBuf::from),
        }
    }

    #[test]
    fn test_log_only_by_default() {
        let table = Arc::new(FakeProcesses::with_ages(SystemTime::now(), &[(10, 1)]));
        let mitigator = Mitigator::with_process_table(&ResponseConfig::default(), table.clone());

        let response = mitigator.respond(Path::new("/data/a.bin"));
        assert_eq!(response.action, ResponseAction::Log);
        assert!(response.stopped.is_none());
        assert!(!response.script_launched);
        assert!(table.signalled.lock().is_empty());
    }

    #[test]
    fn test_stop_age_signals_young_processes() {
        let table = Arc::new(FakeProcesses::with_ages(
            SystemTime::now(),
            &[(100, 2), (200, 10)],
        ));
        let mitigator = Mitigator::with_process_table(&config(5, None), table.clone());

        let response = mitigator.respond(Path::new("/data/a.bin"));
        assert_eq!(response.action, ResponseAction::StopProcesses);
        assert_eq!(response.stopped.unwrap().stopped, vec![100]);
    }

    #[test]
    fn test_empty_script_disables_hook() {
        let mitigator =
            Mitigator::with_process_table(&config(0, Some("")), Arc::new(FakeProcesses::default()));
        assert_eq!(mitigator.action(), ResponseAction::Log);
    }

    #[tokio::test]
    async fn test_failed_script_is_not_fatal() {
        let mitigator = Mitigator::with_process_table(
            &config(0, Some("/nonexistent/hook")),
            Arc::new(FakeProcesses::default()),
        );

        let response = mitigator.respond(Path::new("/data/a.bin"));
        assert_eq!(response.action, ResponseAction::RunScript);
        assert!(!response.script_launched);
    }
}
