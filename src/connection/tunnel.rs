//! Local port forwarding through the system SSH client

use std::io::{BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SshHop;

/// How often the forwarded port is probed while the tunnel comes up
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tunnel setup failure
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Failed to reserve a local port: {0}")]
    Bind(std::io::Error),

    #[error("Failed to start ssh: {0}")]
    Spawn(std::io::Error),

    #[error("ssh exited ({status}): {stderr}")]
    Exited { status: String, stderr: String },

    #[error("Tunnel not ready after {0:?}")]
    Timeout(Duration),
}

/// A running `ssh -L` forward from a local ephemeral port to a remote endpoint
///
/// The ssh process is killed when the tunnel is stopped or dropped.
pub struct SshTunnel {
    child: Child,
    local_port: u16,
    remote: String,
    stopped: bool,
}

impl SshTunnel {
    /// Start forwarding `127.0.0.1:<ephemeral>` to `remote_host:remote_port`
    /// through `hop`, blocking until the local port accepts connections.
    pub fn open(
        ssh_command: &str,
        hop: &SshHop,
        remote_host: &str,
        remote_port: u16,
        timeout: Duration,
    ) -> Result<Self, TunnelError> {
        let local_port = reserve_local_port()?;
        let remote = format!("{}:{}", remote_host, remote_port);

        let mut cmd = Command::new(ssh_command);
        cmd.arg("-N")
            .args(["-o", "ExitOnForwardFailure=yes", "-o", "BatchMode=yes"])
            .arg("-p")
            .arg(hop.port.to_string());
        if let Some(identity) = &hop.identity {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg("-L")
            .arg(format!("127.0.0.1:{}:{}", local_port, remote))
            .arg(format!("{}@{}", hop.user, hop.host))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(TunnelError::Spawn)?;
        let mut tunnel = Self {
            child,
            local_port,
            remote,
            stopped: false,
        };

        tunnel.wait_ready(timeout)?;
        tunnel.forward_stderr();

        info!(
            local_port = tunnel.local_port,
            remote = %tunnel.remote,
            ssh_host = %hop.host,
            "SSH tunnel ready"
        );
        Ok(tunnel)
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<(), TunnelError> {
        let deadline = Instant::now() + timeout;
        let addr = SocketAddr::from(([127, 0, 0, 1], self.local_port));

        loop {
            if let Some(status) = self.child.try_wait().map_err(TunnelError::Spawn)? {
                self.stopped = true;
                let stderr = self.read_stderr();
                warn!(status = %status, stderr = %stderr, "ssh exited before tunnel was ready");
                return Err(TunnelError::Exited {
                    status: status.to_string(),
                    stderr,
                });
            }

            if TcpStream::connect_timeout(&addr, POLL_INTERVAL).is_ok() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(TunnelError::Timeout(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn read_stderr(&mut self) -> String {
        let mut buf = String::new();
        if let Some(mut stderr) = self.child.stderr.take() {
            let _ = stderr.read_to_string(&mut buf);
        }
        buf.trim().to_string()
    }

    /// Log ssh diagnostics for the rest of the tunnel's life
    ///
    /// Keeps the pipe drained so ssh never blocks writing to it.
    fn forward_stderr(&mut self) {
        let Some(stderr) = self.child.stderr.take() else {
            return;
        };
        let local_port = self.local_port;
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                debug!(local_port, message = %line, "ssh");
            }
        });
    }

    /// Local end of the forward
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Kill the ssh process; safe to call more than once
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "ssh already gone");
        }
        let _ = self.child.wait();
        info!(local_port = self.local_port, remote = %self.remote, "Closed tunnel");
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ask the OS for a free port on the loopback interface
fn reserve_local_port() -> Result<u16, TunnelError> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(TunnelError::Bind)?;
    let port = listener.local_addr().map_err(TunnelError::Bind)?.port();
    Ok(port)
}
