//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Error taxonomy shared across the crate.
//!
//! Each component defines its own error enum for the failures it can
//! produce locally and converts into `ErrorKind` at the boundary where
//! it is reported to a caller (a `ControlPlane` handler, a log line, or
//! a state-machine transition). No exceptions, no `unwrap()` on
//! non-bug conditions.
//!

use std::fmt;

/// Top-level error kind, matching the taxonomy of the error handling design.
#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    #[error("parameter validation failed: {0}")]
    ParameterValidation(#[from] ParameterError),

    #[error("hardware not ready: {0}")]
    HardwareUnready(String),

    #[error("acquisition aborted: {0}")]
    AcquisitionAborted(String),

    #[error("session I/O error: {0}")]
    SessionIo(String),

    #[error("analysis failed: {0}")]
    AnalysisFailure(#[from] AnalysisError),

    #[error("control plane error: {0}")]
    ControlPlaneBad(String),
}

/// Failures raised by `ParameterStore`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("unknown parameter group '{0}'")]
    UnknownGroup(String),

    #[error("invalid values for group '{group}': {reason} (keys: {keys:?})")]
    Invalid {
        group: String,
        keys: Vec<String>,
        reason: String,
    },
}

/// Failures raised by `StimulusEngine`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("stimulus engine not ready: monitor parameters are invalid")]
    NotReady,

    #[error("bad sweep direction: {0}")]
    BadDirection(String),
}

/// Failures raised by `AcquisitionCoordinator`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("camera frame source stalled for more than {0:?}")]
    CameraTimeout(std::time::Duration),

    #[error("parameter group '{0}' cannot change while acquisition is active")]
    ParameterLocked(String),

    #[error("acquisition is not idle")]
    NotIdle,

    #[error("acquisition is idle")]
    AlreadyIdle,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failures raised by `SessionRecorder`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("session recorder already owns an active session")]
    AlreadyRecording,

    #[error("no active session to finalize")]
    NotRecording,
}

/// Failures raised by `AnalysisPipeline`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("non-finite input encountered in '{0}'")]
    NonFinite(String),

    #[error("empty frame set for direction {0}")]
    EmptyFrameSet(String),

    #[error("mismatched frame/angle dimensions: {0}")]
    DimensionMismatch(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failures raised by `ControlPlane` dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlError {
    UnknownCommand(String),
    MalformedPayload(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::UnknownCommand(cmd) => write!(f, "unknown command '{cmd}'"),
            ControlError::MalformedPayload(reason) => {
                write!(f, "malformed command payload: {reason}")
            }
        }
    }
}

impl std::error::Error for ControlError {}

impl From<ControlError> for ErrorKind {
    fn from(err: ControlError) -> ErrorKind {
        ErrorKind::ControlPlaneBad(err.to_string())
    }
}

impl From<AcquisitionError> for ErrorKind {
    fn from(err: AcquisitionError) -> ErrorKind {
        ErrorKind::AcquisitionAborted(err.to_string())
    }
}

impl From<SessionError> for ErrorKind {
    fn from(err: SessionError) -> ErrorKind {
        ErrorKind::SessionIo(err.to_string())
    }
}

impl From<EngineError> for ErrorKind {
    fn from(err: EngineError) -> ErrorKind {
        ErrorKind::HardwareUnready(err.to_string())
    }
}
