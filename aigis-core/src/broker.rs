//! Capability broker: a single TCP RPC server exposing the Skills Registry
//! to child processes. Built on `aigis-rpc`'s peer/loop/handler design,
//! generalized from line-framing over a child's stdio pipe to framing over
//! a `TcpStream`.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use aigis_rpc::{Handler, RpcCtx, RpcLoop, RpcPeer};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::skills::Skills;

pub const DEFAULT_BIND: &str = "0.0.0.0:50000";
pub const SHARED_SECRET: &str = "aigis";

/// The broker's one server-side entity. A child issues
/// `call(path, args, kwargs)`; everything else is rejected.
#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum BrokerMethod {
    Call { path: Vec<String>, args: Vec<Value>, kwargs: Map<String, Value> },
    Authenticate { secret: String },
}

struct BrokerHandler {
    skills: Arc<Skills>,
    dispatch_lock: Arc<Mutex<()>>,
    authenticated: bool,
}

impl Handler for BrokerHandler {
    type Notification = BrokerMethod;
    type Request = BrokerMethod;

    fn handle_notification(&mut self, _ctx: &RpcCtx, notification: Self::Notification) {
        if let BrokerMethod::Authenticate { secret } = notification {
            self.authenticated = secret == SHARED_SECRET;
        }
    }

    fn handle_request(&mut self, _ctx: &RpcCtx, request: Self::Request) -> Result<Value, aigis_rpc::RemoteError> {
        match request {
            BrokerMethod::Authenticate { secret } => {
                self.authenticated = secret == SHARED_SECRET;
                Ok(Value::Bool(self.authenticated))
            }
            BrokerMethod::Call { path, args, kwargs } => {
                if !self.authenticated {
                    return Err(aigis_rpc::RemoteError::custom(401, "not authenticated".to_string(), None));
                }
                let _serialize = self.dispatch_lock.lock().unwrap_or_else(|poison| poison.into_inner());
                self.skills
                    .call(&path, &args, &kwargs)
                    .map_err(|e| aigis_rpc::RemoteError::custom(1, e, None))
            }
        }
    }
}

/// Starts the broker listening at `bind` (default `0.0.0.0:50000`). Must be
/// running before any plugin is spawned. Each accepted connection still gets
/// its own `RpcLoop` thread for framing, but every connection shares one
/// `dispatch_lock`: a child's `call` holds that lock only for the duration
/// of the `Skills::call` it triggers, so two children can never execute a
/// skill concurrently against the tree, even though their wire I/O runs on
/// separate threads.
pub fn start(bind: &str, skills: Arc<Skills>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)?;
    tracing::info!(target: "aigis::boot", %bind, "capability broker listening");

    let dispatch_lock = Arc::new(Mutex::new(()));
    std::thread::Builder::new().name("aigis-broker".to_string()).spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let skills = Arc::clone(&skills);
                    let dispatch_lock = Arc::clone(&dispatch_lock);
                    std::thread::spawn(move || serve_connection(stream, skills, dispatch_lock));
                }
                Err(e) => tracing::warn!("broker accept failed: {e}"),
            }
        }
    })?;
    Ok(())
}

fn serve_connection(stream: std::net::TcpStream, skills: Arc<Skills>, dispatch_lock: Arc<Mutex<()>>) {
    let writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("broker connection clone failed: {e}");
            return;
        }
    };
    let reader = std::io::BufReader::new(stream);
    let looper = RpcLoop::new(writer);
    let mut handler = BrokerHandler { skills, dispatch_lock, authenticated: false };
    if let Err(e) = looper.mainloop(|| reader, &mut handler) {
        tracing::debug!("broker connection closed: {e}");
    }
}

/// Unused directly by the server (kept for symmetry with the injector,
/// which constructs the same peer shape to call in).
pub fn peer_for(stream: std::net::TcpStream) -> anyhow::Result<RpcPeer> {
    let loop_ = RpcLoop::new(stream);
    Ok(loop_.get_raw_peer())
}
