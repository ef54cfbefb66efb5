use std::time::Duration;

pub type PacerResult<T, E = PacerReport> = core::result::Result<T, E>;

/// The ways the pacer can fail. None of them are retried internally; the
/// owner is expected to rebuild device-dependent state from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacerError {
    /// The fence or the upload buffer could not be created.
    ResourceCreation {
        resource: &'static str,
        reason: String,
    },
    /// The GPU did not reach `value` within `timeout`.
    SyncTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },
    /// The pacer was reset after device loss and has not been restored.
    Released,
    InvalidConfig(String),
    SlotOutOfRange {
        slot: usize,
        count: usize,
    },
    DrawOutOfRange {
        draw: usize,
        count: usize,
    },
}

impl std::error::Error for PacerError {}
impl std::fmt::Display for PacerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacerError::ResourceCreation { resource, reason } => {
                write!(f, "failed to create {resource}: {reason}")
            }
            PacerError::SyncTimeout {
                value,
                completed,
                timeout,
            } => write!(
                f,
                "timed out after {timeout:?} waiting for fence value {value} (completed {completed})"
            ),
            PacerError::Released => write!(f, "pacer resources were released by reset()"),
            PacerError::InvalidConfig(msg) => write!(f, "invalid pacer config: {msg}"),
            PacerError::SlotOutOfRange { slot, count } => {
                write!(f, "slot {slot} out of range for a ring of {count}")
            }
            PacerError::DrawOutOfRange { draw, count } => {
                write!(f, "draw {draw} out of range for {count} draws per frame")
            }
        }
    }
}

pub struct PacerReport {
    inner: eyre::Report,
}

impl PacerReport {
    /// The typed error behind this report, if it came from the pacer itself.
    pub fn kind(&self) -> Option<&PacerError> {
        self.inner.downcast_ref::<PacerError>()
    }

    pub fn into_inner(self) -> eyre::Report {
        self.inner
    }
}

impl From<eyre::Report> for PacerReport {
    fn from(report: eyre::Report) -> Self {
        Self { inner: report }
    }
}

impl From<PacerError> for PacerReport {
    fn from(error: PacerError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl From<PacerReport> for eyre::Report {
    fn from(report: PacerReport) -> Self {
        report.inner
    }
}

impl std::fmt::Display for PacerReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::fmt::Debug for PacerReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for PacerReport {
    fn from(error: windows::core::Error) -> Self {
        Self {
            inner: eyre::Report::new(WrappedWindowsError::from(error)),
        }
    }
}

/// `windows::core::Error` carries an HRESULT whose `Debug` output is noisy;
/// this keeps reports readable.
#[cfg(windows)]
pub struct WrappedWindowsError {
    inner: windows::core::Error,
}

#[cfg(windows)]
impl WrappedWindowsError {
    pub fn code(&self) -> windows::core::HRESULT {
        self.inner.code()
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for WrappedWindowsError {
    fn from(error: windows::core::Error) -> Self {
        Self { inner: error }
    }
}

#[cfg(windows)]
impl std::error::Error for WrappedWindowsError {}

#[cfg(windows)]
impl std::fmt::Display for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[cfg(windows)]
impl std::fmt::Debug for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_recovers_typed_error() {
        let report = PacerReport::from(PacerError::Released);
        assert_eq!(report.kind(), Some(&PacerError::Released));
    }

    #[test]
    fn kind_is_none_for_foreign_reports() {
        let report = PacerReport::from(eyre::eyre!("something else"));
        assert!(report.kind().is_none());
    }

    #[test]
    fn timeout_message_names_the_value() {
        let error = PacerError::SyncTimeout {
            value: 7,
            completed: 3,
            timeout: Duration::from_millis(5),
        };
        let message = error.to_string();
        assert!(message.contains("fence value 7"));
        assert!(message.contains("completed 3"));
    }
}
