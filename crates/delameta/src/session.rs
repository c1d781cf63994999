use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::descriptor::SharedDescriptor;
use crate::error::{Error, Result};
use crate::stream::Stream;

/// The framing handler a session server drives: given one inbound byte
/// frame, produce the reply stream. The handler owns the interpretation of
/// what "one frame" means and may re-enter the descriptor (`read_until`)
/// when it needs more bytes.
pub type SessionHandler = Arc<dyn Fn(&SharedDescriptor, &str, &[u8]) -> Stream + Send + Sync>;

/// Anything with a framing-handler slot: the seam where the HTTP engine and
/// the Modbus server bind themselves onto a transport server.
pub trait SessionHost {
    fn set_session_handler(&mut self, handler: SessionHandler);
}

/// Thin request/reply wrapper over a descriptor: write one stream, read one
/// reply frame.
#[derive(Clone, Debug)]
pub struct SessionClient {
    pub desc: SharedDescriptor,
}

impl SessionClient {
    pub fn new(desc: SharedDescriptor) -> Self {
        Self { desc }
    }

    pub fn request(&self, mut out: Stream) -> Result<Vec<u8>> {
        out.write_to(&self.desc)?;
        self.desc.read()
    }
}

impl From<crate::descriptor::Descriptor> for SessionClient {
    fn from(desc: crate::descriptor::Descriptor) -> Self {
        Self::new(desc.into_shared())
    }
}

/// Serve one connected child descriptor to completion: read a frame, invoke
/// the handler, write the reply; loop while the peer stays connected,
/// `keep_alive` holds and `max` is not reached. Used by the TCP and TLS
/// servers.
pub(crate) fn serve_connection(
    desc: SharedDescriptor,
    peer: &str,
    handler: &SessionHandler,
    running: &AtomicBool,
) {
    let mut count = 0i32;
    while running.load(Ordering::Acquire) {
        let frame = match desc.read() {
            Ok(frame) => frame,
            Err(e) if e.is_transfer_timeout() && desc.lock().keep_alive() => continue,
            Err(e) => {
                log_session_end(peer, &e);
                break;
            }
        };

        let mut reply = handler(&desc, peer, &frame);
        if let Err(e) = reply.write_to(&desc) {
            tracing::warn!(peer, error = %e, "failed writing reply");
            break;
        }
        drop(reply);

        count += 1;
        let guard = desc.lock();
        let max = guard.max();
        if !guard.keep_alive() {
            break;
        }
        if max > 0 && count >= max {
            tracing::warn!(peer, max, "reached maximum exchanges");
            break;
        }
    }
    tracing::debug!(peer, count, "session finished");
}

fn log_session_end(peer: &str, err: &Error) {
    if err.is_connection_closed() {
        tracing::debug!(peer, "closed by peer");
    } else if err.is_transfer_timeout() {
        tracing::debug!(peer, "read timed out");
    } else {
        tracing::warn!(peer, error = %err, "session read failed");
    }
}
