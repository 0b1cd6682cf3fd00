//! Exit code logic for the exporter process.

use exporter_core::{ExportError, ExportSummary};

use crate::ProcessExit;

/// Maps a finished run to the process exit outcome.
pub(crate) fn determine_exit_outcome(summary: &ExportSummary) -> ProcessExit {
    if summary.is_success() {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    }
}

/// Maps a command error to the process exit outcome.
pub(crate) fn exit_for_error(error: &anyhow::Error) -> ProcessExit {
    let expired = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ExportError>())
        .any(ExportError::is_credentials_expired);
    if expired {
        ProcessExit::CredentialsExpired
    } else {
        ProcessExit::Failure
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_exit_outcome_success_for_clean_summary() {
        assert_eq!(
            determine_exit_outcome(&ExportSummary::default()),
            ProcessExit::Success
        );
    }

    #[test]
    fn test_exit_outcome_partial_when_documents_failed() {
        let summary = ExportSummary {
            documents_written: 2,
            documents_failed: 1,
            ..ExportSummary::default()
        };
        assert_eq!(determine_exit_outcome(&summary), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_for_expired_credentials_through_context() {
        let error = Err::<(), _>(ExportError::CredentialsExpired)
            .context("export failed")
            .unwrap_err();
        assert_eq!(exit_for_error(&error), ProcessExit::CredentialsExpired);
    }

    #[test]
    fn test_exit_for_other_errors_is_failure() {
        let error = anyhow::anyhow!("boom");
        assert_eq!(exit_for_error(&error), ProcessExit::Failure);
    }
}
