use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RemoteError;
use crate::peer::{RpcCtx, RpcPeer};

/// Implemented by whatever is on the receiving end of an `RpcLoop`: the
/// broker (receiving `call` requests from children) or the child-side proxy
/// (receiving nothing back from the broker beyond responses, but kept
/// generic so the same loop code serves both directions).
pub trait Handler: Send {
    type Notification: DeserializeOwned + Send + 'static;
    type Request: DeserializeOwned + Send + 'static;

    fn handle_notification(&mut self, ctx: &RpcCtx, rpc: Self::Notification);

    fn handle_request(&mut self, ctx: &RpcCtx, rpc: Self::Request) -> Result<Value, RemoteError>;

    /// Called periodically when the loop has no pending IO; most handlers
    /// ignore this.
    #[allow(unused_variables)]
    fn idle(&mut self, peer: &RpcPeer) {}
}
