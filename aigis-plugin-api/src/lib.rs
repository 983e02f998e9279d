//! A base for AIGIS core/internal-local plugins.
//!
//! A plugin built against this crate compiles to a `cdylib` exposing a
//! single `extern "C"` constructor (see [`aigis_declare_plugin`]). The host
//! (or, for `internal-local` plugins, the injector process running inside
//! the plugin's own child process) `dlopen`s the artifact and calls that
//! constructor to obtain a `Box<dyn CorePlugin>`.

mod log;

use std::sync::Arc;

pub use log::PluginLog;
use serde_json::{Map, Value};

/// An error raised by a skill callable, surfaced to the caller (in-process
/// or, via the broker, out-of-process) as the RPC's error payload.
#[derive(Debug, Clone)]
pub struct SkillError(pub String);

impl std::fmt::Display for SkillError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SkillError {}

impl<E: std::fmt::Display> From<E> for SkillError {
    fn from(e: E) -> Self {
        SkillError(e.to_string())
    }
}

/// What a skill call is invoked with, and what it can use to log — the
/// always-present replacement for the original's "pass `log` as a keyword
/// argument, retry without it if the target doesn't accept it" trick, which
/// has no direct translation once call signatures are statically typed.
pub struct SkillCall<'a> {
    pub args: &'a [Value],
    pub kwargs: &'a Map<String, Value>,
    pub log: &'a PluginLog,
}

pub type SkillFn = Arc<dyn Fn(SkillCall) -> Result<Value, SkillError> + Send + Sync>;

/// A single entry a plugin's `skills()` exposes, at a dotted path
/// (`pX.pY....pN`) the host will walk/create namespace nodes for.
pub enum SkillValue {
    Callable(SkillFn),
    Value(Value),
}

pub struct SkillSpec {
    pub path: Vec<String>,
    pub value: SkillValue,
}

impl SkillSpec {
    pub fn callable<F>(path: &str, f: F) -> Self
    where
        F: Fn(SkillCall) -> Result<Value, SkillError> + Send + Sync + 'static,
    {
        SkillSpec {
            path: path.split('.').map(str::to_owned).collect(),
            value: SkillValue::Callable(Arc::new(f)),
        }
    }

    pub fn value(path: &str, value: Value) -> Self {
        SkillSpec { path: path.split('.').map(str::to_owned).collect(), value: SkillValue::Value(value) }
    }
}

/// Implemented by a plugin's entry type. Both `core` and `internal-local`
/// plugins implement this; the difference is only where the `dlopen` call
/// happens (the host process, or the spawned injector process).
pub trait CorePlugin: Send + Sync {
    /// Skills this plugin contributes, one [`SkillSpec`] per dotted path
    /// declared in its manifest's `SKILLS` list.
    fn skills(&self) -> Vec<SkillSpec>;

    /// Optional cleanup hook, run once when the plugin is buried.
    fn cleanup(&self) {}
}

/// Handle an `internal-local` plugin's `launch()` uses to reach the
/// Capability Broker — the statically typed stand-in for the dynamic
/// attribute-chain proxy the injector installs in a scripting-language
/// child. Every call is a fresh, independent RPC; unlike the proxy object
/// it replaces, a client handle is reusable for any number of calls.
#[derive(Clone)]
pub struct AigisClient {
    call: Arc<dyn Fn(&[String], Vec<Value>, Map<String, Value>) -> Result<Value, SkillError> + Send + Sync>,
}

impl AigisClient {
    pub fn new<F>(call: F) -> Self
    where
        F: Fn(&[String], Vec<Value>, Map<String, Value>) -> Result<Value, SkillError> + Send + Sync + 'static,
    {
        AigisClient { call: Arc::new(call) }
    }

    /// Calls a dotted skill path through the broker, e.g. `client.call("p1.p2", args, kwargs)`.
    pub fn call(&self, path: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, SkillError> {
        let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
        (self.call)(&segments, args, kwargs)
    }
}

/// Implemented by the artifact an `internal-local` plugin's `LAUNCH` points
/// at; the injector `dlopen`s it, builds an [`AigisClient`], and calls
/// `launch`.
pub trait LaunchPlugin: Send + Sync {
    fn launch(&self, client: AigisClient);
}

/// Exports the `extern "C"` constructor symbol the injector looks for when
/// `dlopen`-ing a `LAUNCH` artifact.
#[macro_export]
macro_rules! aigis_declare_launch {
    ($plugin_type:ty, $constructor:expr) => {
        #[no_mangle]
        pub extern "C" fn _aigis_launch_create() -> *mut dyn $crate::LaunchPlugin {
            let ctor: fn() -> $plugin_type = $constructor;
            let boxed: Box<dyn $crate::LaunchPlugin> = Box::new(ctor());
            Box::into_raw(boxed)
        }
    };
}

/// Exports the `extern "C"` constructor symbol the host looks for when
/// `dlopen`-ing a plugin artifact.
///
/// ```ignore
/// struct Greeter;
/// impl CorePlugin for Greeter {
///     fn skills(&self) -> Vec<SkillSpec> {
///         vec![SkillSpec::callable("hello", |_call| Ok("hi".into()))]
///     }
/// }
/// aigis_plugin_api::aigis_declare_plugin!(Greeter, Greeter);
/// ```
#[macro_export]
macro_rules! aigis_declare_plugin {
    ($plugin_type:ty, $constructor:expr) => {
        #[no_mangle]
        pub extern "C" fn _aigis_plugin_create() -> *mut dyn $crate::CorePlugin {
            let ctor: fn() -> $plugin_type = $constructor;
            let boxed: Box<dyn $crate::CorePlugin> = Box::new(ctor());
            Box::into_raw(boxed)
        }
    };
}
