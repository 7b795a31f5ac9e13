//! adb-host - async client for the ADB (Android Debug Bridge) host protocol
//!
//! This library talks to a locally running adb server over TCP (loopback,
//! port 5037 by default) to drive Android devices programmatically without
//! spawning the `adb` command-line tool: host queries, one-shot and
//! interactive shells, raw `exec` output and file pushes over the SYNC
//! sub-protocol.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use adb_host::Client;
//!
//! # fn main() -> Result<(), adb_host::AdbError> {
//! let timeout = Duration::from_secs(3);
//! println!("adb server version: {}", adb_host::version(timeout)?);
//! println!("{}", adb_host::devices(timeout)?);
//!
//! let client = Client::create("127.0.0.1:5555");
//! client.start()?;
//!
//! println!("{}", client.connect(timeout)?);
//! let listing = client.shell("ls -l /data/local/tmp", timeout)?;
//! println!("{listing}");
//!
//! client.push("minitouch", "/data/local/tmp/minitouch", 0o700, timeout)?;
//!
//! let mut session = client.interactive_shell("cat", timeout)?;
//! session.write(b"hi\n")?;
//! let echoed = session.read_timeout(Duration::from_millis(500))?;
//! # let _ = echoed;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod client;
pub mod protocol;
pub mod session;
pub mod sync;
mod transport;

// Re-export main types
pub use client::{devices, kill_server, version, Client, Host};
pub use protocol::{AdbError, DEFAULT_PORT};
pub use session::ShellSession;
