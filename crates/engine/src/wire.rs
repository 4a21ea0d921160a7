//! Shared endpoint helpers for the two state machines.

use std::time::{Duration, Instant};

use logging::debug_log;
use nasty::DatagramEndpoint;
use protocol::{Frame, MAX_FRAME_SIZE};

use crate::EngineError;

/// Sends one frame.
pub(crate) fn send_frame<E: DatagramEndpoint>(
    endpoint: &mut E,
    frame: &Frame,
) -> Result<(), EngineError> {
    endpoint.send(&frame.encode())?;
    Ok(())
}

/// Waits up to `timeout` for the next well-formed frame.
///
/// Malformed datagrams are logged and skipped without consuming the whole
/// timeout; `Ok(None)` means the deadline passed with nothing usable.
pub(crate) fn recv_frame<E: DatagramEndpoint>(
    endpoint: &mut E,
    timeout: Duration,
) -> Result<Option<Frame>, EngineError> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_FRAME_SIZE + 64];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match endpoint.recv_timeout(&mut buf, remaining)? {
            None => return Ok(None),
            Some(len) => match Frame::decode(&buf[..len]) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    debug_log!(Net, 1, "dropping malformed datagram: {err}");
                }
            },
        }
    }
}
