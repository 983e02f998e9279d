//! Internal-remote loader: the variant promoted by a manifest `host` field,
//! ships the plugin and its injector to a remote machine over SSH/SCP and
//! runs it there. Kept behind a narrow `RemoteTransport` trait so the
//! SSH/SCP details stay an isolated, swappable collaborator.

use std::sync::Arc;

use crate::error::LoadError;
use crate::plugin::PluginRecord;
use crate::registry::PluginRegistry;
use crate::watchdog::Scheduler;

/// The seam between the loader and whatever ships bytes/commands over SSH.
/// A production build supplies [`Ssh2Transport`]; tests can supply a fake.
pub trait RemoteTransport: Send + 'static {
    fn connect(&mut self, host: &str, login: &str, password: &str) -> Result<(), LoadError>;
    fn send_path(&mut self, local: &std::path::Path, remote: &str) -> Result<(), LoadError>;
    fn ensure_injector(&mut self, remote_injector_path: &str) -> Result<(), LoadError>;
    /// Launches the injector remotely with the given entrypoint/launch
    /// arguments and returns once it can no longer read from the session
    /// (the remote process has exited).
    fn run_and_wait(&mut self, entrypoint: &str, launch: &str) -> Result<(), LoadError>;
    fn close(&mut self);
}

/// Lets `loader::stop` ask a remote watch task to tear the SSH session
/// down. SSH gives us no local-signal equivalent to TERM, so this is
/// coarser than the local `StopHandle` — closing the channel is the only
/// lever available.
pub struct RemoteStopHandle {
    tx: Option<tokio::sync::oneshot::Sender<tokio::sync::oneshot::Sender<()>>>,
}

impl RemoteStopHandle {
    pub fn request_stop(&mut self, scheduler: &Scheduler) {
        let Some(tx) = self.tx.take() else { return };
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        if tx.send(done_tx).is_ok() {
            let _ = scheduler.block_on(done_rx);
        }
    }
}

#[cfg(feature = "remote")]
pub struct Ssh2Transport {
    session: Option<ssh2::Session>,
}

#[cfg(feature = "remote")]
impl Default for Ssh2Transport {
    fn default() -> Self {
        Ssh2Transport { session: None }
    }
}

#[cfg(feature = "remote")]
impl RemoteTransport for Ssh2Transport {
    fn connect(&mut self, host: &str, login: &str, password: &str) -> Result<(), LoadError> {
        let tcp = std::net::TcpStream::connect((host, 22))
            .map_err(|e| LoadError::Unknown(format!("ssh connect to {host} failed: {e}")))?;
        let mut session = ssh2::Session::new().map_err(|e| LoadError::Unknown(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| LoadError::Unknown(format!("ssh handshake failed: {e}")))?;
        session
            .userauth_password(login, password)
            .map_err(|e| LoadError::Unknown(format!("ssh auth failed: {e}")))?;
        self.session = Some(session);
        Ok(())
    }

    fn send_path(&mut self, local: &std::path::Path, remote: &str) -> Result<(), LoadError> {
        let session = self.session.as_ref().ok_or_else(|| LoadError::Unknown("not connected".into()))?;
        let data = std::fs::read(local)?;
        let mut remote_file = session
            .scp_send(std::path::Path::new(remote), 0o755, data.len() as u64, None)
            .map_err(|e| LoadError::Unknown(format!("scp send failed: {e}")))?;
        std::io::Write::write_all(&mut remote_file, &data).map_err(LoadError::Io)?;
        Ok(())
    }

    fn ensure_injector(&mut self, remote_injector_path: &str) -> Result<(), LoadError> {
        let session = self.session.as_ref().ok_or_else(|| LoadError::Unknown("not connected".into()))?;
        let mut channel = session.channel_session().map_err(|e| LoadError::Unknown(e.to_string()))?;
        channel
            .exec(&format!("test -x {remote_injector_path}"))
            .map_err(|e| LoadError::Unknown(e.to_string()))?;
        channel.wait_close().ok();
        if channel.exit_status().unwrap_or(1) != 0 {
            return Err(LoadError::RequirementError(format!("remote injector missing at {remote_injector_path}")));
        }
        Ok(())
    }

    fn run_and_wait(&mut self, entrypoint: &str, launch: &str) -> Result<(), LoadError> {
        let session = self.session.as_ref().ok_or_else(|| LoadError::Unknown("not connected".into()))?;
        let mut channel = session.channel_session().map_err(|e| LoadError::Unknown(e.to_string()))?;
        channel
            .exec(&format!("aigis-injector {entrypoint} {launch}"))
            .map_err(|e| LoadError::Unknown(e.to_string()))?;
        channel.wait_close().map_err(|e| LoadError::Unknown(e.to_string()))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "aigis shutdown", None);
        }
    }
}

pub fn run(record: &mut PluginRecord, scheduler: &Scheduler, registry: &Arc<PluginRegistry>) -> Result<(), LoadError> {
    #[cfg(feature = "remote")]
    {
        run_with_transport(record, scheduler, registry, Ssh2Transport::default())
    }
    #[cfg(not(feature = "remote"))]
    {
        let _ = (scheduler, registry);
        Err(LoadError::InvalidPluginType(
            "internal-remote plugin declared but this build was compiled without the `remote` feature".to_string(),
        ))
    }
}

#[cfg(feature = "remote")]
fn run_with_transport<T: RemoteTransport>(
    record: &mut PluginRecord,
    scheduler: &Scheduler,
    registry: &Arc<PluginRegistry>,
    mut transport: T,
) -> Result<(), LoadError> {
    let manifest = record.manifest.as_ref().expect("configured before dispatch");
    let host = manifest.host.clone().ok_or_else(|| LoadError::RequirementError("HOST required for internal-remote".into()))?;
    let launch = manifest.launch.first().cloned().unwrap_or_default();
    let entrypoint = manifest.entrypoint.clone();
    let creds = registry.system_creds();

    transport.connect(&host, creds.login.as_deref().unwrap_or(""), creds.password.as_deref().unwrap_or(""))?;
    transport.ensure_injector("/usr/local/bin/aigis-injector")?;

    let name = record.name.clone();
    let registry = Arc::clone(registry);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();

    scheduler.spawn(async move {
        remote_watch(transport, entrypoint, launch, name, registry, stop_rx).await;
    });

    record.child = Some(crate::plugin::ChildHandle::Remote { stop: RemoteStopHandle { tx: Some(stop_tx) } });
    Ok(())
}

#[cfg(feature = "remote")]
async fn remote_watch<T: RemoteTransport>(
    mut transport: T,
    entrypoint: String,
    launch: String,
    name: String,
    registry: Arc<PluginRegistry>,
    stop_rx: tokio::sync::oneshot::Receiver<tokio::sync::oneshot::Sender<()>>,
) {
    let run_future = tokio::task::spawn_blocking(move || {
        let result = transport.run_and_wait(&entrypoint, &launch);
        transport.close();
        result
    });

    tokio::select! {
        result = run_future => {
            if let Err(e) = result {
                tracing::warn!(plugin = %name, "remote watch task panicked: {e}");
            }
            registry.bury(&name);
        }
        done_tx = stop_rx => {
            if let Ok(done_tx) = done_tx {
                let _ = done_tx.send(());
            }
        }
    }
}
