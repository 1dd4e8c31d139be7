//! Status codes surfaced to hosts, and the numbered error messages carried by error packages.

use crate::communication::CommunicationError;

/// Coarse outcome of a protocol operation, as reported to the host (and used as exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    GenericError = 1,
    NoContentToRead = 2,
    DeviceDisconnected = 3,
    MaximumRetryAttemptsReached = 53,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Status of a poll for the next package: a read budget that passes without one is
    /// `NoContentToRead`, failures map through [`CommunicationError::status_code`].
    pub fn of_receive<P>(received: &Result<Option<P>, CommunicationError>) -> StatusCode {
        match received {
            Ok(Some(_)) => StatusCode::Success,
            Ok(None) => StatusCode::NoContentToRead,
            Err(e) => e.status_code(),
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::GenericError => "GENERIC_ERROR",
            StatusCode::NoContentToRead => "NO_CONTENT_TO_READ",
            StatusCode::DeviceDisconnected => "DEVICE_DISCONNECTED",
            StatusCode::MaximumRetryAttemptsReached => "MAXIMUM_RETRY_ATTEMPTS_REACHED",
        };
        f.write_str(s)
    }
}

/// Catalogue of failures a device reports to its peer. The discriminant is the error code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorMessage {
    NoError = 0,
    CouldNotStartLog = 1,
    CouldNotStartBluetoothService = 2,
    CouldNotSendConfirmation = 3,
    RecordAlreadyRunning = 4,
    FailedToStartRecord = 5,
    FailedToTransmitResult = 6,
    MaximumWriteAttempts = 7,
    NoConfirmationReceived = 8,
    RecordNotRunning = 9,
    CouldNotStopRecord = 10,
    DeviceIsRecording = 11,
    NoAudioRecordFound = 12,
    CouldNotTransmitAudioRecord = 13,
    ConnectionLost = 14,
    MaximumReadAttempts = 15,
    FailedToFinishCommunication = 16,
    FailedToUnregisterService = 17,
    FailedToTransmitError = 18,
    CouldNotSendFileHeader = 19,
    CouldNotSendFileContent = 20,
    CouldNotSendFileTrailer = 21,
    CouldNotCloseConnection = 22,
}

impl ErrorMessage {
    const ALL: [ErrorMessage; 23] = [
        ErrorMessage::NoError,
        ErrorMessage::CouldNotStartLog,
        ErrorMessage::CouldNotStartBluetoothService,
        ErrorMessage::CouldNotSendConfirmation,
        ErrorMessage::RecordAlreadyRunning,
        ErrorMessage::FailedToStartRecord,
        ErrorMessage::FailedToTransmitResult,
        ErrorMessage::MaximumWriteAttempts,
        ErrorMessage::NoConfirmationReceived,
        ErrorMessage::RecordNotRunning,
        ErrorMessage::CouldNotStopRecord,
        ErrorMessage::DeviceIsRecording,
        ErrorMessage::NoAudioRecordFound,
        ErrorMessage::CouldNotTransmitAudioRecord,
        ErrorMessage::ConnectionLost,
        ErrorMessage::MaximumReadAttempts,
        ErrorMessage::FailedToFinishCommunication,
        ErrorMessage::FailedToUnregisterService,
        ErrorMessage::FailedToTransmitError,
        ErrorMessage::CouldNotSendFileHeader,
        ErrorMessage::CouldNotSendFileContent,
        ErrorMessage::CouldNotSendFileTrailer,
        ErrorMessage::CouldNotCloseConnection,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn text(self) -> &'static str {
        match self {
            ErrorMessage::NoError => "No error.",
            ErrorMessage::CouldNotStartLog => "Could not start log.",
            ErrorMessage::CouldNotStartBluetoothService => "Could not start bluetooth service.",
            ErrorMessage::CouldNotSendConfirmation => "Could not send confirmation message.",
            ErrorMessage::RecordAlreadyRunning => "Record program already running.",
            ErrorMessage::FailedToStartRecord => "Failed to start record program.",
            ErrorMessage::FailedToTransmitResult => "Failed to transmit result.",
            ErrorMessage::MaximumWriteAttempts => {
                "Maximum attempts reached while trying to write data on socket."
            }
            ErrorMessage::NoConfirmationReceived => "No confirmation received.",
            ErrorMessage::RecordNotRunning => "Record program not running.",
            ErrorMessage::CouldNotStopRecord => "Could not stop record program gracefully.",
            ErrorMessage::DeviceIsRecording => "Device is recording.",
            ErrorMessage::NoAudioRecordFound => "No audio record file found.",
            ErrorMessage::CouldNotTransmitAudioRecord => "Could not transmit audio record.",
            ErrorMessage::ConnectionLost => "Connection lost.",
            ErrorMessage::MaximumReadAttempts => {
                "Maximum attempts reached while trying to read content from socket."
            }
            ErrorMessage::FailedToFinishCommunication => "Failed to finish communication.",
            ErrorMessage::FailedToUnregisterService => "Failed to unregister bluetooth service.",
            ErrorMessage::FailedToTransmitError => "Failed to transmit error message.",
            ErrorMessage::CouldNotSendFileHeader => "Could not send file header.",
            ErrorMessage::CouldNotSendFileContent => "Could not send file content.",
            ErrorMessage::CouldNotSendFileTrailer => "Could not send file trailer.",
            ErrorMessage::CouldNotCloseConnection => "Could not close connection gracefully.",
        }
    }
}
