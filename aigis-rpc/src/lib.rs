// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Utilities for building peers (both server and client side) for AIGIS's
//! line-delimited JSON-RPC variant.
//!
//! Originally framed over a plugin process's stdio pipe; the same
//! peer/loop/handler split now also carries the capability broker's wire
//! protocol over a `TcpStream`.

mod error;
mod handler;
mod looper;
mod peer;
mod wire;

pub use error::{Error, ReadError, RemoteError};
pub use handler::Handler;
pub use looper::RpcLoop;
pub use peer::{RpcCtx, RpcPeer};
pub use wire::{dict_get_string, dict_get_u64, RpcCall};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::io::{BufReader, Cursor};
    use std::sync::{Arc, Mutex};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    #[serde(rename_all = "snake_case", tag = "method", content = "params")]
    enum TestNotification {
        Ping,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    #[serde(rename_all = "snake_case", tag = "method", content = "params")]
    enum TestRequest {
        Echo { value: i64 },
    }

    struct EchoHandler {
        pings: Arc<Mutex<u32>>,
    }

    impl Handler for EchoHandler {
        type Notification = TestNotification;
        type Request = TestRequest;

        fn handle_notification(&mut self, _ctx: &RpcCtx, rpc: Self::Notification) {
            match rpc {
                TestNotification::Ping => {
                    *self.pings.lock().unwrap() += 1;
                }
            }
        }

        fn handle_request(&mut self, _ctx: &RpcCtx, rpc: Self::Request) -> Result<Value, RemoteError> {
            match rpc {
                TestRequest::Echo { value } => Ok(Value::from(value)),
            }
        }
    }

    #[test]
    fn dispatches_notification_and_request() {
        let input = "{\"method\":\"ping\",\"params\":null}\n{\"id\":0,\"method\":\"echo\",\"params\":{\"value\":7}}\n";
        let sink: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        struct SharedWriter(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for SharedWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().write(buf)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut rpc_loop = RpcLoop::new(SharedWriter(sink.clone()));
        let pings = Arc::new(Mutex::new(0));
        let mut handler = EchoHandler { pings: pings.clone() };

        rpc_loop
            .mainloop(|| BufReader::new(Cursor::new(input.as_bytes().to_vec())), &mut handler)
            .unwrap();

        assert_eq!(*pings.lock().unwrap(), 1);
        let written = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        assert!(written.contains("\"result\":7"));
    }
}
