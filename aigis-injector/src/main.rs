//! Child-side proxy every internal-local plugin starts with (spawned by
//! `aigis-core::loader::internal_local` as `aigis-injector <ENTRYPOINT>
//! <LAUNCH>`). Connects to the capability broker, authenticates, builds a
//! client handle, then `dlopen`s the LAUNCH artifact and calls its
//! `launch()`.
//!
//! The original proxy is a dynamic attribute-chain object installed into
//! the child's import namespace; a statically typed child has no
//! equivalent of "any attribute access returns a fresh capture object", so
//! this hands the plugin a reusable [`aigis_plugin_api::AigisClient`]
//! instead — one client, any number of calls, each a fresh RPC.

use std::io::{BufReader, Write};
use std::net::TcpStream;

use aigis_plugin_api::{AigisClient, LaunchPlugin};
use aigis_rpc::{Handler, RemoteError, RpcCtx, RpcLoop};
use libloading::{Library, Symbol};
use serde_json::{json, Map, Value};

const BROKER_ADDR: &str = "127.0.0.1:50000";
const SHARED_SECRET: &str = "aigis";
const READY_SENTINEL: &str = "AIGIS_READY";
const LAUNCH_CONSTRUCTOR_SYMBOL: &[u8] = b"_aigis_launch_create";

/// Never matches anything; the broker never sends this child a request or
/// notification of its own.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "method", content = "params")]
enum Silent {}

struct NoOpHandler;

impl Handler for NoOpHandler {
    type Notification = Silent;
    type Request = Silent;

    fn handle_notification(&mut self, _ctx: &RpcCtx, _rpc: Self::Notification) {}

    fn handle_request(&mut self, _ctx: &RpcCtx, _rpc: Self::Request) -> Result<Value, RemoteError> {
        unreachable!("Silent has no variants")
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut argv = std::env::args().skip(1);
    let entrypoint = argv.next().ok_or_else(|| anyhow::anyhow!("missing ENTRYPOINT argument"))?;
    let launch = argv.next().ok_or_else(|| anyhow::anyhow!("missing LAUNCH argument"))?;

    let stream = TcpStream::connect(BROKER_ADDR)?;
    let writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    let looper = RpcLoop::new(writer);
    let peer = looper.get_raw_peer();

    std::thread::Builder::new().name("aigis-injector-rpc".to_string()).spawn(move || {
        let mut looper = looper;
        let mut handler = NoOpHandler;
        if let Err(e) = looper.mainloop(|| reader, &mut handler) {
            tracing::debug!("broker connection closed: {e}");
        }
    })?;

    let authenticated =
        peer.send_rpc_request("authenticate", &json!({ "secret": SHARED_SECRET })).map_err(|e| {
            anyhow::anyhow!("authentication failed: {e}")
        })?;
    if authenticated != Value::Bool(true) {
        anyhow::bail!("broker rejected shared secret");
    }

    let client_peer = peer.clone();
    let client = AigisClient::new(move |path: &[String], args: Vec<Value>, kwargs: Map<String, Value>| {
        let params = json!({ "path": path, "args": args, "kwargs": kwargs });
        client_peer.send_rpc_request("call", &params).map_err(|e| e.into())
    });

    if !entrypoint.is_empty() {
        let _ = std::env::set_current_dir(&entrypoint);
    }

    let plugin = load_launch_plugin(&launch)?;
    plugin.launch(client);

    println!("{READY_SENTINEL}");
    std::io::stdout().flush().ok();

    // Keep the process alive as long as the broker connection lasts; the
    // plugin's own RPC calls and any background work it spawned carry on
    // until this process is killed by the supervisor's watchdog.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}

fn load_launch_plugin(path: &str) -> anyhow::Result<Box<dyn LaunchPlugin>> {
    unsafe {
        let lib = Library::new(path)?;
        let ctor: Symbol<unsafe extern "C" fn() -> *mut dyn LaunchPlugin> =
            lib.get(LAUNCH_CONSTRUCTOR_SYMBOL)?;
        let raw = ctor();
        std::mem::forget(lib);
        Ok(Box::from_raw(raw))
    }
}
