use std::io::{BufRead, Write};

use crate::error::ReadError;
use crate::handler::Handler;
use crate::peer::{RpcCtx, RpcPeer};
use crate::wire::{self, WireMessage};

/// Drives one side of a line-delimited JSON-RPC connection: owns the write
/// half (via the `RpcPeer` it hands out) and, once `mainloop` is called,
/// reads lines off a caller-supplied reader and dispatches them to a
/// `Handler`.
///
/// Generalizes a child-stdio peer/loop to any `Write` half (a `TcpStream`, a
/// pipe, an in-memory buffer for tests).
pub struct RpcLoop {
    peer: RpcPeer,
}

impl RpcLoop {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        RpcLoop { peer: RpcPeer::new(Box::new(writer)) }
    }

    /// A cheap handle to send notifications/requests to the other side,
    /// independent of whether `mainloop` has started reading yet.
    pub fn get_raw_peer(&self) -> RpcPeer {
        self.peer.clone()
    }

    /// Blocks the calling thread reading lines from `reader_f()` and
    /// dispatching them to `handler` until the stream closes or a framing
    /// error occurs. Any requests in flight when the stream closes are
    /// failed with `Error::PeerDisconnect`.
    pub fn mainloop<R, F, H>(&mut self, reader_f: F, handler: &mut H) -> Result<(), ReadError>
    where
        R: BufRead,
        F: FnOnce() -> R,
        H: Handler,
    {
        let reader = reader_f();
        let result = self.drive(reader, handler);
        self.peer.fail_all_pending();
        result
    }

    fn drive<R: BufRead, H: Handler>(&mut self, reader: R, handler: &mut H) -> Result<(), ReadError> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match wire::parse_message(&line)? {
                WireMessage::Call(call) => self.dispatch(call, handler),
                WireMessage::Response { id, result } => self.peer.resolve(id, result),
            }
        }
        Ok(())
    }

    fn dispatch<H: Handler>(&self, call: wire::RpcCall, handler: &mut H) {
        let envelope = serde_json::json!({ "method": call.method.clone(), "params": call.params.clone() });
        let ctx = RpcCtx::new(&self.peer, &call);
        if let Some(id) = call.id {
            let result = match serde_json::from_value::<H::Request>(envelope) {
                Ok(req) => handler.handle_request(&ctx, req),
                Err(e) => Err(crate::error::RemoteError::InvalidRequest(Some(
                    serde_json::Value::String(e.to_string()),
                ))),
            };
            self.peer.respond(id, result);
        } else {
            match serde_json::from_value::<H::Notification>(envelope) {
                Ok(note) => handler.handle_notification(&ctx, note),
                Err(e) => tracing::warn!(method = %call.method, error = %e, "dropping malformed notification"),
            }
        }
    }
}
