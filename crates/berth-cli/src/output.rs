//! Formatted output helpers for CLI commands.
//!
//! Provides consistent table formatting, status strings, and
//! human-readable byte/age formatting.

use std::fmt::Write as _;
use std::process::ExitCode;

use berth_common::types::ContainerState;
use chrono::{DateTime, Utc};

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn age_between(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (value, unit) = match secs {
        0..60 => (secs, "second"),
        60..3_600 => (secs / 60, "minute"),
        3_600..86_400 => (secs / 3_600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{value} {unit}{plural} ago")
}

/// Formats a past instant relative to now (e.g., "3 minutes ago").
#[must_use]
pub fn format_age(then: DateTime<Utc>) -> String {
    age_between(then, Utc::now())
}

/// One-word status with the exit code for stopped containers.
#[must_use]
pub fn format_status(
    state: ContainerState,
    exit_code: i32,
    finished_at: Option<DateTime<Utc>>,
) -> String {
    match (state, finished_at) {
        (ContainerState::Running, _) => "Up".to_string(),
        (ContainerState::Stopped, Some(at)) => format!("Exited ({exit_code}) {}", format_age(at)),
        (ContainerState::Stopped, None) => format!("Exited ({exit_code})"),
        (other, _) => {
            let name = other.as_str();
            let mut chars = name.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        }
    }
}

/// Renders left-aligned columns separated by three spaces.
#[must_use]
pub fn table<H: AsRef<str>>(headers: &[H], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.as_ref().len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<&str> = headers.iter().map(AsRef::as_ref).collect();
    for line in std::iter::once(header).chain(rows.iter().map(|r| r.iter().map(String::as_str).collect())) {
        let last = line.len().saturating_sub(1);
        for (i, (cell, width)) in line.iter().zip(&widths).enumerate() {
            if i == last {
                let _ = write!(out, "{cell}");
            } else {
                let _ = write!(out, "{cell:<width$}   ");
            }
        }
        out.push('\n');
    }
    out
}

/// Maps a container exit code onto a process exit status.
#[must_use]
pub fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
