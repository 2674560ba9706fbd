//! Signal name parsing and exit-code derivation.

use std::str::FromStr;

use berth_common::error::{BerthError, Result};
pub use nix::sys::signal::Signal;

/// Parses a signal given as `SIGTERM`, `TERM`, `term`, or `15`.
///
/// # Errors
///
/// Returns an invalid-argument error for anything that is not a signal
/// known to the host.
pub fn parse_signal(input: &str) -> Result<Signal> {
    let trimmed = input.trim();
    if let Ok(number) = trimmed.parse::<i32>() {
        return Signal::try_from(number)
            .map_err(|_| BerthError::invalid_argument(format!("invalid signal number {number}")));
    }

    let upper = trimmed.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name)
        .map_err(|_| BerthError::invalid_argument(format!("invalid signal {input:?}")))
}

/// Parses a signal that may be delivered to a running container.
///
/// Job-control signals are refused: they would freeze or resume the
/// process behind the record's back, and `pause`/`unpause` own those
/// transitions.
///
/// # Errors
///
/// Returns an invalid-argument error for an unknown or job-control signal.
pub fn parse_deliverable(input: &str) -> Result<Signal> {
    let signal = parse_signal(input)?;
    if is_job_control(signal) {
        return Err(BerthError::invalid_argument(format!(
            "signal {signal} cannot be sent to a container, use pause or unpause"
        )));
    }
    Ok(signal)
}

/// Returns true for the signals that stop or resume a process.
#[must_use]
pub const fn is_job_control(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU | Signal::SIGCONT
    )
}

/// Exit code reported for a process terminated by `signal`.
#[must_use]
pub const fn exit_code_for(signal: Signal) -> i32 {
    128 + signal as i32
}

/// Returns true when the default disposition of `signal` ends the process.
#[must_use]
pub const fn is_terminating(signal: Signal) -> bool {
    !matches!(
        signal,
        Signal::SIGCHLD
            | Signal::SIGCONT
            | Signal::SIGSTOP
            | Signal::SIGTSTP
            | Signal::SIGTTIN
            | Signal::SIGTTOU
            | Signal::SIGURG
            | Signal::SIGWINCH
    )
}

#[cfg(test)]
mod tests {
    use berth_common::error::ErrorKind;

    use super::*;

    #[test]
    fn accepts_common_spellings() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("term").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("KILL").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal("2").unwrap(), Signal::SIGINT);
        assert_eq!(parse_signal(" sigint ").unwrap(), Signal::SIGINT);
    }

    #[test]
    fn rejects_unknown_names() {
        let err = parse_signal("foobar").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(parse_signal("999").is_err());
        assert!(parse_signal("").is_err());
    }

    #[test]
    fn job_control_signals_are_not_deliverable() {
        for name in ["SIGSTOP", "tstp", "CONT", "19"] {
            let err = parse_deliverable(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{name}");
        }
        assert_eq!(parse_deliverable("hup").unwrap(), Signal::SIGHUP);
    }

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(exit_code_for(Signal::SIGTERM), 143);
        assert_eq!(exit_code_for(Signal::SIGKILL), 137);
        assert_eq!(exit_code_for(Signal::SIGINT), 130);
    }

    #[test]
    fn stop_and_continue_do_not_terminate() {
        assert!(is_terminating(Signal::SIGTERM));
        assert!(is_terminating(Signal::SIGUSR1));
        assert!(!is_terminating(Signal::SIGSTOP));
        assert!(!is_terminating(Signal::SIGWINCH));
    }
}
