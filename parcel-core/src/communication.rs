//! Communication protocol: send with confirmation, receive, confirm, probe the peer.
//!
//! One package is in flight at a time. Every loop is bounded by a [`RetryInformations`]
//! budget, so a silent peer is always detected after a finite number of polls.

use std::io;

use crate::byte_array::ByteArray;
use crate::config::{ConfigError, ProtocolConfig};
use crate::framing::{Framer, FramingError, ReadOutcome};
use crate::protocol::Package;
use crate::retry::{Delay, DelayError, RetryInformations, ThreadSleep, WaitOutcome};
use crate::status::{ErrorMessage, StatusCode};
use crate::transfer::TransferError;
use crate::transport::Transport;
use crate::wire::{self, DecodeError, EncodeError};

/// Failure of a protocol operation.
#[derive(Debug, thiserror::Error)]
pub enum CommunicationError {
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodeError),
    #[error("decoding failed: {0}")]
    Decoding(#[from] DecodeError),
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
    #[error("peer disconnected")]
    Disconnected,
    #[error("{operation}: maximum of {attempts} attempts reached")]
    RetryExhausted {
        operation: &'static str,
        attempts: u32,
    },
    #[error(transparent)]
    DelayInterrupted(#[from] DelayError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("invalid protocol configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl From<FramingError> for CommunicationError {
    fn from(e: FramingError) -> Self {
        match e {
            FramingError::Disconnected => CommunicationError::Disconnected,
            FramingError::Transport(e) => CommunicationError::Transport(e),
            FramingError::ProtocolViolation(what) => CommunicationError::ProtocolViolation(what),
        }
    }
}

impl CommunicationError {
    /// Status code reported to the host for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CommunicationError::Disconnected => StatusCode::DeviceDisconnected,
            CommunicationError::RetryExhausted { .. } => StatusCode::MaximumRetryAttemptsReached,
            _ => StatusCode::GenericError,
        }
    }

    /// The session is over; retrying on this connection is pointless.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CommunicationError::Disconnected)
    }
}

/// One protocol session over a transport.
#[derive(Debug)]
pub struct Connection<T, D = ThreadSleep> {
    framer: Framer<T>,
    delay: D,
    config: ProtocolConfig,
}

impl<T: Transport> Connection<T, ThreadSleep> {
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        Self::with_delay(transport, config, ThreadSleep::new())
    }
}

impl<T: Transport, D: Delay> Connection<T, D> {
    pub fn with_delay(transport: T, config: ProtocolConfig, delay: D) -> Self {
        Self {
            framer: Framer::new(transport, &config),
            delay,
            config,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        self.framer.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.framer.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.framer.into_inner()
    }

    /// Close the underlying transport. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), CommunicationError> {
        self.framer.close().map_err(|e| {
            tracing::error!("error closing connection: {e}");
            e.into()
        })
    }

    fn encode(&self, package: &Package) -> Result<ByteArray, CommunicationError> {
        let frame = wire::encode_package(package).map_err(|e| {
            tracing::error!(id = package.id, "error encoding package: {e}");
            e
        })?;
        if frame.len() > self.config.max_frame_len {
            tracing::error!(
                id = package.id,
                len = frame.len(),
                "package larger than the frame limit"
            );
            return Err(EncodeError::TooLarge {
                len: frame.len(),
                max: self.config.max_frame_len,
            }
            .into());
        }
        Ok(frame)
    }

    /// Consult the retry budget after a failed attempt. `Ok` means try again.
    fn retry(
        &mut self,
        retry: &mut RetryInformations,
        operation: &'static str,
    ) -> Result<(), CommunicationError> {
        match retry.wait(&self.config.backoff, &mut self.delay) {
            Ok(WaitOutcome::Continue) => Ok(()),
            Ok(WaitOutcome::Exhausted) => {
                tracing::error!(attempts = retry.attempts(), "{operation}: maximum attempts reached");
                Err(CommunicationError::RetryExhausted {
                    operation,
                    attempts: retry.attempts(),
                })
            }
            Err(e) => {
                tracing::error!("{operation}: error while waiting to retry: {e}");
                Err(e.into())
            }
        }
    }

    /// Write a whole frame, retrying failed writes within the write budget.
    fn write_frame(
        &mut self,
        frame: &[u8],
        operation: &'static str,
    ) -> Result<(), CommunicationError> {
        let mut retry = RetryInformations::new(self.config.max_write_attempts);
        loop {
            match self.framer.write_all(frame) {
                Ok(()) => return Ok(()),
                Err(FramingError::Disconnected) => {
                    tracing::error!("{operation}: peer disconnected");
                    return Err(CommunicationError::Disconnected);
                }
                Err(e) => {
                    tracing::debug!("{operation}: write failed ({e}), retrying");
                    self.retry(&mut retry, operation)?;
                }
            }
        }
    }

    /// Send a package and wait for the peer to confirm it.
    pub fn send_package(&mut self, package: &Package) -> Result<(), CommunicationError> {
        tracing::trace!(id = package.id, kind = ?package.package_type(), "sending package");
        let frame = self.encode(package)?;
        self.write_frame(&frame, "write package")?;
        self.receive_confirmation(package.id).map_err(|e| {
            tracing::error!("did not receive confirmation of package id {:#x}: {e}", package.id);
            e
        })
    }

    /// Wait for a confirmation of `expected_id`. Anything else read meanwhile is dropped and
    /// counts against the read budget.
    pub fn receive_confirmation(&mut self, expected_id: u32) -> Result<(), CommunicationError> {
        let mut retry = RetryInformations::new(self.config.max_read_attempts);
        loop {
            match self.framer.read_framed()? {
                ReadOutcome::Framed(bytes) => match wire::decode_package(&bytes) {
                    Ok(p) if p.confirms(expected_id) => {
                        tracing::trace!(id = expected_id, "package confirmed");
                        return Ok(());
                    }
                    Ok(p) => tracing::warn!(
                        id = p.id,
                        kind = ?p.package_type(),
                        awaiting = expected_id,
                        "dropping package received while awaiting confirmation"
                    ),
                    Err(e) => tracing::warn!("dropping undecodable package: {e}"),
                },
                ReadOutcome::NoContent => {}
            }
            self.retry(&mut retry, "await confirmation")?;
        }
    }

    /// Poll for the next package. `Ok(None)` when the read budget passes without one.
    /// The caller confirms the package if its type requires it.
    pub fn receive_package(&mut self) -> Result<Option<Package>, CommunicationError> {
        let mut retry = RetryInformations::new(self.config.max_read_attempts);
        loop {
            if let ReadOutcome::Framed(bytes) = self.framer.read_framed()? {
                let package = wire::decode_package(&bytes).map_err(|e| {
                    tracing::error!("error decoding received package: {e}");
                    e
                })?;
                tracing::trace!(id = package.id, kind = ?package.package_type(), "package received");
                return Ok(Some(package));
            }
            match retry.wait(&self.config.backoff, &mut self.delay)? {
                WaitOutcome::Continue => {}
                WaitOutcome::Exhausted => {
                    tracing::trace!("no package received");
                    return Ok(None);
                }
            }
        }
    }

    /// Confirm delivery of `package_to_confirm`. No confirmation of the confirmation is expected.
    pub fn send_confirmation(&mut self, package_to_confirm: &Package) -> Result<(), CommunicationError> {
        let confirmation = Package::confirmation(package_to_confirm.id);
        let frame = self.encode(&confirmation)?;
        self.write_frame(&frame, "write confirmation")
    }

    /// Receive a package and confirm it when its type requires confirmation.
    pub fn receive_and_confirm(&mut self) -> Result<Option<Package>, CommunicationError> {
        let Some(package) = self.receive_package()? else {
            return Ok(None);
        };
        if package.requires_confirmation() {
            self.send_confirmation(&package)?;
        }
        Ok(Some(package))
    }

    /// Probe the peer. Failure, including a missing confirmation, means it is unreachable.
    pub fn check_connection(&mut self) -> Result<(), CommunicationError> {
        self.send_package(&Package::check_connection()).map_err(|e| {
            tracing::error!("connection check failed: {e}");
            e
        })
    }

    /// Report the outcome of a command to the peer.
    pub fn transmit_command_result(&mut self, result_code: i32) -> Result<(), CommunicationError> {
        self.send_package(&Package::command_result(result_code))
            .map_err(|e| {
                tracing::error!("error sending command result: {e}");
                e
            })
    }

    /// Report a failure to the peer.
    pub fn transmit_error(
        &mut self,
        error_code: i32,
        error_message: &str,
    ) -> Result<(), CommunicationError> {
        self.send_package(&Package::error(error_code, error_message))
            .map_err(|e| {
                tracing::error!("error sending error message: {e}");
                e
            })
    }

    pub fn transmit_error_message(&mut self, message: ErrorMessage) -> Result<(), CommunicationError> {
        self.transmit_error(message.code(), message.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use crate::protocol::{PackageContent, PackageType};
    use crate::test_helpers::{RecordingDelay, ScriptedTransport};

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            max_read_attempts: 5,
            max_write_attempts: 4,
            ..ProtocolConfig::default()
        }
    }

    fn connection(t: ScriptedTransport) -> Connection<ScriptedTransport, RecordingDelay> {
        Connection::with_delay(t, config(), RecordingDelay::default())
    }

    #[test]
    fn send_package_confirmed() {
        let mut c = connection(ScriptedTransport::confirming_peer());
        let p = Package::command_result(0);
        c.send_package(&p).unwrap();
        assert_eq!(c.transport().sent, vec![p]);
        assert!(c.delay.delays.is_empty());
    }

    #[test]
    fn send_package_without_confirmation_fails_after_read_budget() {
        let mut c = connection(ScriptedTransport::new());
        let err = c.send_package(&Package::check_connection()).unwrap_err();
        assert!(matches!(
            err,
            CommunicationError::RetryExhausted { attempts: 5, .. }
        ));
        assert_eq!(err.status_code(), StatusCode::MaximumRetryAttemptsReached);
        // The first read plus four retries; no delay after the last.
        assert_eq!(c.delay.delays.len(), 4);
        // Written once: missing confirmations do not trigger rewrites.
        assert_eq!(c.transport().sent.len(), 1);
    }

    #[test]
    fn confirmation_for_other_id_is_ignored() {
        let t = ScriptedTransport::new().respond_with(|p| vec![Package::confirmation(p.id.wrapping_add(1))]);
        let mut c = connection(t);
        let err = c.send_package(&Package::file_trailer()).unwrap_err();
        assert!(matches!(err, CommunicationError::RetryExhausted { .. }));
    }

    #[test]
    fn matching_confirmation_after_noise_succeeds() {
        let t = ScriptedTransport::new().respond_with(|p| {
            vec![
                Package::confirmation(p.id ^ 0xFFFF),
                Package::check_connection(),
                Package::confirmation(p.id),
            ]
        });
        let config = ProtocolConfig {
            framing: crate::config::FramingMode::Buffered,
            ..config()
        };
        let mut c = Connection::with_delay(t, config, RecordingDelay::default());
        c.send_package(&Package::command_result(3)).unwrap();
    }

    #[test]
    fn undecodable_frame_while_awaiting_is_dropped() {
        let mut c = connection(ScriptedTransport::new());
        let mut junk = wire::encode_package(&Package::confirmation(9)).unwrap().into_vec();
        junk[0] = 0x77;
        c.transport_mut().push_bytes(junk);
        c.transport_mut().push_package(&Package::with_id(1, PackageContent::Confirmation { package_id: 9 }));
        c.receive_confirmation(9).unwrap();
    }

    #[test]
    fn write_failures_are_retried() {
        let mut t = ScriptedTransport::confirming_peer();
        t.fail_writes(2, io::ErrorKind::Other);
        let mut c = connection(t);
        c.send_package(&Package::check_connection()).unwrap();
        assert_eq!(c.delay.delays.len(), 2);
        assert_eq!(c.transport().write_calls, 3);
    }

    #[test]
    fn write_budget_exhaustion_fails() {
        let mut t = ScriptedTransport::confirming_peer();
        t.fail_writes(10, io::ErrorKind::Other);
        let mut c = connection(t);
        let err = c.send_package(&Package::check_connection()).unwrap_err();
        assert!(matches!(
            err,
            CommunicationError::RetryExhausted { operation: "write package", attempts: 4 }
        ));
        assert_eq!(c.transport().write_calls, 4);
    }

    #[test]
    fn disconnect_on_write_is_not_retried() {
        let mut t = ScriptedTransport::confirming_peer();
        t.fail_writes(1, io::ErrorKind::BrokenPipe);
        let mut c = connection(t);
        let err = c.send_package(&Package::check_connection()).unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(c.transport().write_calls, 1);
        assert!(c.delay.delays.is_empty());
    }

    #[test]
    fn peer_reset_while_awaiting_confirmation_is_disconnect() {
        let t = ScriptedTransport::new().respond_with(|_| Vec::new());
        let mut c = connection(t);
        c.transport_mut().push_error(io::ErrorKind::ConnectionReset);
        let err = c.send_package(&Package::check_connection()).unwrap_err();
        assert!(matches!(err, CommunicationError::Disconnected));
        assert_eq!(err.status_code(), StatusCode::DeviceDisconnected);
        assert!(c.delay.delays.is_empty());
    }

    #[test]
    fn transport_error_while_awaiting_confirmation_is_not_retried() {
        let t = ScriptedTransport::new().respond_with(|_| Vec::new());
        let mut c = connection(t);
        c.transport_mut().push_error(io::ErrorKind::PermissionDenied);
        let err = c.send_package(&Package::check_connection()).unwrap_err();
        assert!(
            matches!(err, CommunicationError::Transport(ref e) if e.kind() == io::ErrorKind::PermissionDenied)
        );
        assert!(!err.is_disconnect());
        assert_eq!(err.status_code(), StatusCode::GenericError);
        assert!(c.delay.delays.is_empty());
    }

    #[test]
    fn delay_error_terminates_wait() {
        let mut c = Connection::with_delay(
            ScriptedTransport::new(),
            config(),
            RecordingDelay::failing_after(1),
        );
        let err = c.receive_confirmation(1).unwrap_err();
        assert!(matches!(err, CommunicationError::DelayInterrupted(_)));
    }

    #[test]
    fn receive_package_returns_any_package() {
        let mut c = connection(ScriptedTransport::new());
        let p = Package::error_message(ErrorMessage::DeviceIsRecording);
        c.transport_mut().push_package(&p);
        assert_eq!(c.receive_package().unwrap(), Some(p));
        // Not confirmed by receive_package itself.
        assert!(c.transport().written.is_empty());
    }

    #[test]
    fn receive_package_no_content_after_budget() {
        let mut c = connection(ScriptedTransport::new());
        assert_eq!(c.receive_package().unwrap(), None);
        assert_eq!(c.delay.delays.len(), 4);
    }

    #[test]
    fn receive_package_reports_decode_errors() {
        let mut c = connection(ScriptedTransport::new());
        let mut junk = wire::encode_package(&Package::file_trailer()).unwrap().into_vec();
        junk[0] = 0;
        c.transport_mut().push_bytes(junk);
        assert!(matches!(
            c.receive_package(),
            Err(CommunicationError::Decoding(_))
        ));
    }

    #[test]
    fn receive_and_confirm_sends_confirmation() {
        let mut c = connection(ScriptedTransport::new());
        let p = Package::file_header(3, "x");
        c.transport_mut().push_package(&p);
        assert_eq!(c.receive_and_confirm().unwrap(), Some(p.clone()));
        let sent = &c.transport().sent;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].confirms(p.id));
    }

    #[test]
    fn confirmations_are_not_confirmed() {
        let mut c = connection(ScriptedTransport::new());
        c.transport_mut().push_package(&Package::confirmation(77));
        assert!(c.receive_and_confirm().unwrap().is_some());
        assert!(c.transport().sent.is_empty());
    }

    #[test]
    fn check_connection_roundtrip() {
        let mut c = connection(ScriptedTransport::confirming_peer());
        c.check_connection().unwrap();
        assert_eq!(
            c.transport().sent[0].package_type(),
            PackageType::CheckConnection
        );

        let mut silent = connection(ScriptedTransport::new());
        assert!(silent.check_connection().is_err());
    }

    #[test]
    fn transmit_error_and_result() {
        let mut c = connection(ScriptedTransport::confirming_peer());
        c.transmit_command_result(-2).unwrap();
        c.transmit_error_message(ErrorMessage::NoAudioRecordFound).unwrap();
        let sent = &c.transport().sent;
        assert_eq!(sent[0].content, PackageContent::CommandResult { result_code: -2 });
        assert_eq!(
            sent[1].content,
            PackageContent::Error {
                error_code: 12,
                error_message: "No audio record file found.".into()
            }
        );
    }

    #[test]
    fn oversized_package_is_an_encoding_error() {
        let config = ProtocolConfig {
            max_frame_len: 64,
            ..config()
        };
        let mut c = Connection::with_delay(
            ScriptedTransport::confirming_peer(),
            config,
            RecordingDelay::default(),
        );
        let err = c.send_package(&Package::file_chunk(vec![0u8; 100])).unwrap_err();
        assert!(matches!(
            err,
            CommunicationError::Encoding(EncodeError::TooLarge { .. })
        ));
        assert!(c.transport().written.is_empty());
    }

    #[test]
    fn backoff_delays_are_used_between_polls() {
        let config = ProtocolConfig {
            max_read_attempts: 3,
            backoff: Backoff {
                kind: crate::config::BackoffKind::Constant,
                base_ms: 7,
                max_ms: 7,
            },
            ..ProtocolConfig::default()
        };
        let mut c = Connection::with_delay(ScriptedTransport::new(), config, RecordingDelay::default());
        assert_eq!(c.receive_package().unwrap(), None);
        assert_eq!(
            c.delay.delays,
            vec![std::time::Duration::from_millis(7); 2]
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut c = connection(ScriptedTransport::new());
        c.close().unwrap();
        c.close().unwrap();
        assert!(c.transport().closed);
    }
}
