//! Process listings in `ps`-style columns.

use std::time::Duration;

use berth_common::error::Result;
use berth_common::types::ContainerState;
use serde::Serialize;

use crate::backend::ProcessInfo;
use crate::engine::{Engine, require_state};

/// Descriptors used when none (or none recognizable) are given.
pub const DEFAULT_DESCRIPTORS: &[&str] = &["user", "pid", "ppid", "pcpu", "etime", "args"];

/// One column of a process listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// Container user.
    User,
    /// Host user.
    HostUser,
    /// Container PID.
    Pid,
    /// Host PID.
    HostPid,
    /// Parent PID.
    Ppid,
    /// CPU usage.
    Pcpu,
    /// Elapsed time.
    Etime,
    /// Scheduler state.
    State,
    /// Nice value.
    Nice,
    /// Executable name.
    Comm,
    /// Full command line.
    Args,
}

impl Descriptor {
    /// Parses one descriptor name, accepting the common `ps` aliases.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let d = match name.trim().to_ascii_lowercase().as_str() {
            "user" | "uname" => Self::User,
            "huser" => Self::HostUser,
            "pid" => Self::Pid,
            "hpid" => Self::HostPid,
            "ppid" => Self::Ppid,
            "pcpu" | "%cpu" => Self::Pcpu,
            "etime" | "elapsed" => Self::Etime,
            "state" | "stat" => Self::State,
            "nice" | "ni" => Self::Nice,
            "comm" | "ucomm" => Self::Comm,
            "args" | "command" | "cmd" => Self::Args,
            _ => return None,
        };
        Some(d)
    }

    /// Column title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::HostUser => "HUSER",
            Self::Pid => "PID",
            Self::HostPid => "HPID",
            Self::Ppid => "PPID",
            Self::Pcpu => "%CPU",
            Self::Etime => "ELAPSED",
            Self::State => "STATE",
            Self::Nice => "NI",
            Self::Comm | Self::Args => "COMMAND",
        }
    }

    fn value(self, process: &ProcessInfo) -> String {
        match self {
            Self::User => process.user.clone(),
            Self::HostUser => process.host_user.clone(),
            Self::Pid => process.pid.to_string(),
            Self::HostPid => process.host_pid.to_string(),
            Self::Ppid => process.ppid.to_string(),
            Self::Pcpu => format!("{:.3}", process.cpu_percent),
            Self::Etime => format_elapsed(process.elapsed),
            Self::State => process.state.clone(),
            Self::Nice => process.nice.to_string(),
            Self::Comm => process.comm.clone(),
            Self::Args => process.args.clone(),
        }
    }
}

/// Splits descriptors on commas and whitespace, dropping unknown names.
/// Falls back to [`DEFAULT_DESCRIPTORS`] when nothing usable remains.
#[must_use]
pub fn parse_descriptors<S: AsRef<str>>(input: &[S]) -> Vec<Descriptor> {
    let parsed: Vec<Descriptor> = input
        .iter()
        .flat_map(|d| {
            d.as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter_map(|name| Descriptor::parse(&name))
        .collect();
    if parsed.is_empty() {
        DEFAULT_DESCRIPTORS
            .iter()
            .filter_map(|d| Descriptor::parse(d))
            .collect()
    } else {
        parsed
    }
}

/// `[[dd-]hh:]mm:ss`, like `ps -o etime`.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Header plus one row per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopReport {
    /// Column titles.
    pub titles: Vec<String>,
    /// One row per process, aligned with `titles`.
    pub processes: Vec<Vec<String>>,
}

impl TopReport {
    /// Builds the report for `processes`.
    #[must_use]
    pub fn render(processes: &[ProcessInfo], descriptors: &[Descriptor]) -> Self {
        Self {
            titles: descriptors.iter().map(|d| d.title().to_string()).collect(),
            processes: processes
                .iter()
                .map(|p| descriptors.iter().map(|d| d.value(p)).collect())
                .collect(),
        }
    }

    /// Header and rows as tab-separated lines.
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        std::iter::once(&self.titles)
            .chain(&self.processes)
            .map(|row| row.join("\t"))
            .collect()
    }
}

impl Engine {
    /// Lists the processes of a running container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reference, `InvalidState` unless
    /// the container is `Running`, or the backend's error.
    pub async fn top<S: AsRef<str>>(&self, reference: &str, descriptors: &[S]) -> Result<TopReport> {
        let entry = self.inner.store.resolve(reference)?;
        let record = entry.lock().await;
        require_state(&record, &[ContainerState::Running], "top")?;
        let processes = self.inner.backend.processes(&record.id).await?;
        drop(record);

        let descriptors = parse_descriptors(descriptors);
        tracing::debug!(id = %entry.id(), processes = processes.len(), "process listing");
        Ok(TopReport::render(&processes, &descriptors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process() -> ProcessInfo {
        ProcessInfo {
            pid: 1,
            host_pid: 4242,
            ppid: 0,
            user: "root".into(),
            host_user: "root".into(),
            cpu_percent: 0.0,
            elapsed: Duration::from_secs(65),
            state: "S".into(),
            comm: "top".into(),
            args: "top -b".into(),
            nice: 0,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_recognized() {
        let none: [&str; 0] = [];
        assert_eq!(parse_descriptors(&none).len(), DEFAULT_DESCRIPTORS.len());
        assert_eq!(
            parse_descriptors(&["bogus", "nothing"]),
            parse_descriptors(&none)
        );
    }

    #[test]
    fn unknown_descriptors_are_dropped() {
        assert_eq!(
            parse_descriptors(&["pid,bogus", "hpid"]),
            vec![Descriptor::Pid, Descriptor::HostPid]
        );
    }

    #[test]
    fn renders_header_and_rows() {
        let report = TopReport::render(&[process()], &parse_descriptors(&["user,pid,etime,args"]));
        assert_eq!(report.titles, vec!["USER", "PID", "ELAPSED", "COMMAND"]);
        assert_eq!(report.processes[0], vec!["root", "1", "01:05", "top -b"]);
        assert_eq!(report.to_lines()[0], "USER\tPID\tELAPSED\tCOMMAND");
    }

    #[test]
    fn elapsed_uses_ps_layout() {
        assert_eq!(format_elapsed(Duration::from_secs(5)), "00:05");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_elapsed(Duration::from_secs(90_061)), "1-01:01:01");
    }
}
