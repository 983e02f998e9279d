use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{Error, RemoteError};
use crate::wire::{self, RpcCall};

type AsyncCallback = Box<dyn FnOnce(Result<Value, Error>) + Send>;

enum Pending {
    Blocking(crossbeam_channel::Sender<Result<Value, Error>>),
    Async(AsyncCallback),
}

struct PeerState {
    writer: Mutex<Box<dyn Write + Send>>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
}

/// A handle used to send RPCs to the other side of a connection (broker or
/// child). Cheap to clone; every clone shares the same underlying writer and
/// pending-request table.
#[derive(Clone)]
pub struct RpcPeer(pub(crate) Arc<PeerState>);

impl RpcPeer {
    pub(crate) fn new(writer: Box<dyn Write + Send>) -> Self {
        RpcPeer(Arc::new(PeerState {
            writer: Mutex::new(writer),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }))
    }

    fn write_line(&self, value: &Value) -> Result<(), Error> {
        let mut line = serde_json::to_vec(value).map_err(|_| Error::InvalidResponse)?;
        line.push(b'\n');
        let mut w = self.0.writer.lock().unwrap();
        w.write_all(&line)?;
        w.flush()?;
        Ok(())
    }

    pub fn send_rpc_notification(&self, method: &str, params: &Value) {
        let msg = wire::encode_notification(method, params);
        if let Err(e) = self.write_line(&msg) {
            tracing::warn!(method, error = %e, "failed to send rpc notification");
        }
    }

    /// Send a request and block the calling thread until the response
    /// arrives (or the peer disconnects).
    pub fn send_rpc_request(&self, method: &str, params: &Value) -> Result<Value, Error> {
        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.0.pending.lock().unwrap().insert(id, Pending::Blocking(tx));
        let msg = wire::encode_request(id, method, params);
        if let Err(e) = self.write_line(&msg) {
            self.0.pending.lock().unwrap().remove(&id);
            return Err(e);
        }
        rx.recv().unwrap_or(Err(Error::PeerDisconnect))
    }

    /// Send a request without blocking; `callback` fires from whichever
    /// thread drives the mainloop once a response (or disconnect) arrives.
    pub fn send_rpc_request_async(
        &self,
        method: &str,
        params: &Value,
        callback: AsyncCallback,
    ) {
        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
        self.0.pending.lock().unwrap().insert(id, Pending::Async(callback));
        let msg = wire::encode_request(id, method, params);
        if let Err(e) = self.write_line(&msg) {
            if let Some(Pending::Async(cb)) = self.0.pending.lock().unwrap().remove(&id) {
                cb(Err(e));
            }
        }
    }

    pub fn request_is_pending(&self) -> bool {
        !self.0.pending.lock().unwrap().is_empty()
    }

    pub(crate) fn resolve(&self, id: u64, result: Result<Value, RemoteError>) {
        let pending = self.0.pending.lock().unwrap().remove(&id);
        let result = result.map_err(Error::RemoteError);
        match pending {
            Some(Pending::Blocking(tx)) => {
                let _ = tx.send(result);
            }
            Some(Pending::Async(cb)) => cb(result),
            None => tracing::warn!(id, "response for unknown request id"),
        }
    }

    pub(crate) fn fail_all_pending(&self) {
        let mut pending = self.0.pending.lock().unwrap();
        for (_, p) in pending.drain() {
            match p {
                Pending::Blocking(tx) => {
                    let _ = tx.send(Err(Error::PeerDisconnect));
                }
                Pending::Async(cb) => cb(Err(Error::PeerDisconnect)),
            }
        }
    }

    pub(crate) fn respond(&self, id: u64, result: Result<Value, RemoteError>) {
        let msg = wire::encode_response(id, &result);
        if let Err(e) = self.write_line(&msg) {
            tracing::warn!(id, error = %e, "failed to send rpc response");
        }
    }
}

/// Context handed to a `Handler` while it is servicing a call, giving it a
/// way to talk back to the same peer (e.g. for nested requests).
pub struct RpcCtx<'a> {
    peer: &'a RpcPeer,
    raw: &'a RpcCall,
}

impl<'a> RpcCtx<'a> {
    pub(crate) fn new(peer: &'a RpcPeer, raw: &'a RpcCall) -> Self {
        RpcCtx { peer, raw }
    }

    pub fn get_peer(&self) -> &RpcPeer {
        self.peer
    }

    pub fn raw_call(&self) -> &RpcCall {
        self.raw
    }
}
