use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::protocol::{AdbError, DEFAULT_PORT};
use crate::session::ShellSession;
use crate::sync::SyncCommand;
use crate::transport::{HostTransport, SyncAck};

/// Trailing `nc -w 3 <host> <port>` whose port gets rewritten to the local
/// acceptor in receive-by-socket mode.
static NC_COMMAND: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+nc -w 3 .+ )(.+)$").unwrap());

/// The local adb server, addressed by port.
///
/// Server-level one-shots run on an ephemeral reactor on the caller's
/// thread, so they work without any [`Client`] being started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// TCP port the server listens on. Defaults to 5037.
    pub port: u16,
}

impl Default for Host {
    fn default() -> Host {
        Host { port: DEFAULT_PORT }
    }
}

impl Host {
    /// Retrieve the version of the adb server.
    ///
    /// Equivalent to `adb version`. Returns the raw 4-hex-digit string.
    pub fn version(&self, timeout: Duration) -> Result<String, AdbError> {
        self.bounded_request("host:version", timeout)
    }

    /// Retrieve the list of attached devices.
    ///
    /// Equivalent to `adb devices`. One `<serial>\t<state>` line per device.
    pub fn devices(&self, timeout: Duration) -> Result<String, AdbError> {
        self.bounded_request("host:devices", timeout)
    }

    /// Kill the adb server if it is running.
    ///
    /// Equivalent to `adb kill-server`.
    pub fn kill_server(&self, timeout: Duration) -> Result<(), AdbError> {
        let port = self.port;
        oneshot_runtime()?.block_on(with_deadline(timeout, async move {
            let mut transport = HostTransport::connect(port).await?;
            transport.host_request("host:kill").await
        }))
    }

    fn bounded_request(&self, request: &str, timeout: Duration) -> Result<String, AdbError> {
        let port = self.port;
        oneshot_runtime()?.block_on(with_deadline(timeout, async move {
            let mut transport = HostTransport::connect(port).await?;
            transport.host_request(request).await?;
            transport.host_message().await
        }))
    }
}

/// Retrieve the version of the local adb server. See [`Host::version`].
pub fn version(timeout: Duration) -> Result<String, AdbError> {
    Host::default().version(timeout)
}

/// Retrieve the attached devices from the local adb server. See [`Host::devices`].
pub fn devices(timeout: Duration) -> Result<String, AdbError> {
    Host::default().devices(timeout)
}

/// Kill the local adb server. See [`Host::kill_server`].
pub fn kill_server(timeout: Duration) -> Result<(), AdbError> {
    Host::default().kill_server(timeout)
}

/// A client bound to a single device serial.
///
/// The client owns one reactor serviced by one worker thread; [`start`]
/// launches it and [`stop`] joins it. Every operation opens a fresh
/// connection to the server, runs its request chain on the reactor and
/// blocks the calling thread under the given deadline.
///
/// Operations on the same serial share one device transport session per
/// connection, so pushes and shells on a single client must be serialised
/// by the caller.
///
/// [`start`]: Client::start
/// [`stop`]: Client::stop
pub struct Client {
    serial: String,
    port: u16,
    runtime: Mutex<Option<Runtime>>,
}

impl Client {
    /// Create a client for a specific device.
    ///
    /// An empty serial means "the unique attached device"; if several
    /// devices are online the server will report failure.
    pub fn create(serial: impl Into<String>) -> Client {
        Client::with_port(serial, DEFAULT_PORT)
    }

    /// Create a client talking to an adb server on a non-default port.
    pub fn with_port(serial: impl Into<String>, port: u16) -> Client {
        Client {
            serial: serial.into(),
            port,
            runtime: Mutex::new(None),
        }
    }

    /// Serial this client is bound to.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Start the event loop for the client.
    ///
    /// A worker thread is created to service it. Calling `start` on a
    /// running client is a no-op; restarting after [`Client::stop`] is
    /// supported.
    pub fn start(&self) -> Result<(), AdbError> {
        let mut slot = self.runtime.lock().unwrap();
        if slot.is_none() {
            let runtime = Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("adb-host-reactor")
                .enable_all()
                .build()?;
            *slot = Some(runtime);
        }
        Ok(())
    }

    /// Stop the event loop, blocking until the worker thread is joined.
    ///
    /// Dropping the client has the same effect.
    pub fn stop(&self) {
        let runtime = self.runtime.lock().unwrap().take();
        // Lock released here; the drop below joins the worker.
        drop(runtime);
    }

    /// Connect the server to the device.
    ///
    /// Equivalent to `adb connect <serial>`. Returns the connection status
    /// reported by the server.
    pub fn connect(&self, timeout: Duration) -> Result<String, AdbError> {
        let request = format!("host:connect:{}", self.serial);
        self.host_bounded(request, timeout)
    }

    /// Disconnect the server from the device.
    ///
    /// Equivalent to `adb disconnect <serial>`.
    pub fn disconnect(&self, timeout: Duration) -> Result<String, AdbError> {
        let request = format!("host:disconnect:{}", self.serial);
        self.host_bounded(request, timeout)
    }

    /// Run a one-shot shell command on the device.
    ///
    /// Equivalent to `adb -s <serial> shell <command>` without stdin. Output
    /// is converted lossily to UTF-8; use [`Client::exec`] for raw bytes.
    pub fn shell(&self, command: &str, timeout: Duration) -> Result<String, AdbError> {
        let service = device_service("shell", command)?;
        let output = self.device_streamed(service, timeout)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Run a one-shot command on the device using a raw PTY.
    ///
    /// Equivalent to `adb -s <serial> exec-out <command>` without stdin.
    /// The output is not mangled, so it may be binary (e.g. `screencap -p`).
    pub fn exec(&self, command: &str, timeout: Duration) -> Result<Vec<u8>, AdbError> {
        let service = device_service("exec", command)?;
        self.device_streamed(service, timeout)
    }

    /// [`Client::shell`], receiving the output over an inbound socket.
    ///
    /// A trailing `nc -w 3 <host> <port>` in the command is rewritten to
    /// target a local acceptor; the device's nc connection is drained to
    /// EOF and becomes the result. Useful on devices that do not terminate
    /// the outbound stream reliably.
    pub fn shell_by_socket(&self, command: &str, timeout: Duration) -> Result<String, AdbError> {
        let output = self.device_streamed_by_socket("shell", command, timeout)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// [`Client::exec`], receiving the output over an inbound socket.
    pub fn exec_by_socket(&self, command: &str, timeout: Duration) -> Result<Vec<u8>, AdbError> {
        self.device_streamed_by_socket("exec", command, timeout)
    }

    /// Send a file to the device.
    ///
    /// Equivalent to `adb -s <serial> push <src> <dst>`. `perm` is the unix
    /// mode of the destination file, e.g. `0o755`. Succeeds only when the
    /// server acknowledges the transfer with `OKAY`.
    pub fn push(
        &self,
        src: impl AsRef<Path>,
        dst: &str,
        perm: u32,
        timeout: Duration,
    ) -> Result<(), AdbError> {
        let src = src.as_ref();
        let send_body = format!("{},{}", dst, perm);

        self.block_on(timeout, async move {
            let mut transport = HostTransport::connect(self.port).await?;
            transport.switch_transport(&self.serial).await?;
            transport.host_request("sync:").await?;
            transport
                .sync_request(
                    SyncCommand::Send,
                    send_body.len() as u32,
                    Some(send_body.as_bytes()),
                )
                .await?;
            transport.sync_send_file(src).await?;
            transport
                .sync_request(SyncCommand::Done, unix_timestamp(), None)
                .await?;

            match transport.sync_response().await? {
                SyncAck::Okay => Ok(()),
                SyncAck::Fail(reason) => Err(AdbError::PushUnacknowledged(reason)),
            }
        })
    }

    /// Restart adbd on the device with root permissions.
    ///
    /// Equivalent to `adb -s <serial> root`. The device may go offline
    /// afterwards; remember to [`Client::wait_for_device`].
    pub fn root(&self, timeout: Duration) -> Result<String, AdbError> {
        let output = self.device_streamed("root:".to_owned(), timeout)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Restart adbd on the device without root permissions.
    ///
    /// Equivalent to `adb -s <serial> unroot`. The device may go offline
    /// afterwards; remember to [`Client::wait_for_device`].
    pub fn unroot(&self, timeout: Duration) -> Result<String, AdbError> {
        let output = self.device_streamed("unroot:".to_owned(), timeout)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Start an interactive shell session on the device.
    ///
    /// Equivalent to `adb -s <serial> shell <command>` with stdin. The
    /// deadline covers the handshake only; the returned session lives until
    /// dropped.
    pub fn interactive_shell(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ShellSession, AdbError> {
        let service = device_service("shell", command)?;
        let stream = self.block_on(timeout, async move {
            let mut transport = HostTransport::connect(self.port).await?;
            transport.switch_transport(&self.serial).await?;
            transport.host_request(&service).await?;
            Ok(transport.into_stream())
        })?;

        ShellSession::new(stream)
    }

    /// Block until the device shows up as `device` in the server's listing.
    ///
    /// `timeout` bounds each `devices` probe, not the overall wait. Any
    /// non-recoverable probe error aborts the wait.
    pub fn wait_for_device(&self, timeout: Duration) -> Result<(), AdbError> {
        // If adbd restarts, the old session may still be advertised; let the
        // device get offline first.
        thread::sleep(Duration::from_secs(1));

        let host = Host { port: self.port };
        let pattern = format!("{}\tdevice", self.serial);
        loop {
            if host.devices(timeout)?.contains(&pattern) {
                return Ok(());
            }
            thread::sleep(Duration::from_micros(500));
        }
    }

    fn host_bounded(&self, request: String, timeout: Duration) -> Result<String, AdbError> {
        self.block_on(timeout, async move {
            let mut transport = HostTransport::connect(self.port).await?;
            transport.host_request(&request).await?;
            transport.host_message().await
        })
    }

    fn device_streamed(&self, service: String, timeout: Duration) -> Result<Vec<u8>, AdbError> {
        self.block_on(timeout, async move {
            let mut transport = HostTransport::connect(self.port).await?;
            transport.switch_transport(&self.serial).await?;
            transport.host_request(&service).await?;
            transport.host_data().await
        })
    }

    fn device_streamed_by_socket(
        &self,
        prefix: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, AdbError> {
        self.block_on(timeout, async move {
            let acceptor = TcpListener::bind(("127.0.0.1", 0)).await?;
            let local_port = acceptor.local_addr()?.port();

            let command = rewrite_nc_port(command, local_port)
                .unwrap_or_else(|| command.to_owned());
            let service = device_service(prefix, &command)?;

            let mut transport = HostTransport::connect(self.port).await?;
            transport.switch_transport(&self.serial).await?;
            transport.host_request(&service).await?;

            // The outbound connection stays open while the device's nc
            // writes the output back to us.
            let (mut inbound, peer) = acceptor.accept().await?;
            debug!("receive-by-socket connection from {}", peer);

            let mut output = Vec::new();
            inbound.read_to_end(&mut output).await?;
            Ok(output)
        })
    }

    fn reactor(&self) -> Result<Handle, AdbError> {
        self.runtime
            .lock()
            .unwrap()
            .as_ref()
            .map(|runtime| runtime.handle().clone())
            .ok_or_else(|| {
                AdbError::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "client event loop is not running; call start() first",
                ))
            })
    }

    fn block_on<T>(
        &self,
        timeout: Duration,
        future: impl Future<Output = Result<T, AdbError>>,
    ) -> Result<T, AdbError> {
        self.reactor()?.block_on(with_deadline(timeout, future))
    }
}

/// Race an operation chain against its deadline; the loser is dropped,
/// which cancels outstanding socket I/O and closes the connection.
async fn with_deadline<T>(
    timeout: Duration,
    future: impl Future<Output = Result<T, AdbError>>,
) -> Result<T, AdbError> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(AdbError::TimedOut),
    }
}

fn oneshot_runtime() -> Result<Runtime, AdbError> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

/// Build a `shell:`/`exec:` service string. The command travels
/// length-delimited, so an embedded NUL can never be expressed.
fn device_service(prefix: &str, command: &str) -> Result<String, AdbError> {
    if command.contains('\0') {
        return Err(AdbError::Protocol("command contains a NUL byte".to_owned()));
    }
    Ok(format!("{}:{}", prefix, command))
}

/// Rewrite the destination port of a trailing `nc -w 3 <host> <port>` to the
/// local acceptor's port. Commands without the pattern are left untouched.
fn rewrite_nc_port(command: &str, port: u16) -> Option<String> {
    NC_COMMAND
        .captures(command)
        .map(|caps| format!("{}{}", &caps[1], port))
}

fn unix_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_nc_port() {
        let rewritten = rewrite_nc_port("screencap -p | nc -w 3 10.0.2.2 40004", 51234);
        assert_eq!(
            rewritten.as_deref(),
            Some("screencap -p | nc -w 3 10.0.2.2 51234")
        );
    }

    #[test]
    fn test_rewrite_leaves_plain_commands_alone() {
        assert_eq!(rewrite_nc_port("echo hello", 51234), None);
        assert_eq!(rewrite_nc_port("nc -w 5 10.0.2.2 40004", 51234), None);
    }

    #[test]
    fn test_device_service_rejects_nul() {
        assert!(device_service("shell", "echo hi\0there").is_err());
        assert_eq!(device_service("shell", "echo hi").unwrap(), "shell:echo hi");
    }

    #[test]
    fn test_unix_timestamp_is_current() {
        assert!(unix_timestamp() > 1_700_000_000);
    }

    #[test]
    fn test_client_requires_start() {
        let client = Client::create("emulator-5554");
        let err = client.shell("echo hi", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, AdbError::Io(_)));

        client.stop(); // no-op on a stopped client
    }
}
