//! Double-hop SSH sessions through a bastion host.
//!
//! The outer `ssh` reaches the bastion with `ProxyCommand ... -W %h:%p`,
//! which forwards a raw channel to `target:22`, then authenticates to the
//! target over it. The connection is held open as a control master so that
//! every diagnostic command multiplexes over the same session.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::debug;

use crate::error::ConnectFailure;
use crate::tools;

const TARGET_PORT: u16 = 22;
const READY_POLL: Duration = Duration::from_millis(200);

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// A live, authenticated command-execution session on one instance.
pub trait RemoteShell: Send + Sync {
    fn exec(
        &self,
        command: &str,
    ) -> impl Future<Output = std::io::Result<CommandOutput>> + Send;

    /// Graceful teardown. Dropping the session without calling this still
    /// releases the underlying connection.
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

/// Opens sessions to instances by private address.
pub trait Connector: Send + Sync + 'static {
    type Session: RemoteShell + 'static;

    fn open(
        &self,
        target_address: &str,
    ) -> impl Future<Output = Result<Self::Session, ConnectFailure>> + Send;
}

/// Bastion endpoint and login material shared by every session of a run.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub bastion_address: String,
    pub bastion_username: String,
    pub target_username: String,
    pub key_path: PathBuf,
    pub connect_timeout: Duration,
}

pub struct OpenSshConnector {
    ssh: PathBuf,
    config: TunnelConfig,
    /// Parent of the per-session `fleetpulse-*` socket directories.
    control_root: PathBuf,
}

impl OpenSshConnector {
    pub fn new(config: TunnelConfig) -> Result<Self, ConnectFailure> {
        let ssh = tools::find("ssh").ok_or(ConnectFailure::SshMissing)?;
        Ok(Self {
            ssh,
            config,
            control_root: std::env::temp_dir(),
        })
    }

    fn proxy_command(&self) -> String {
        let c = &self.config;
        format!(
            "{} -i {} -o BatchMode=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o LogLevel=ERROR -o ConnectTimeout={} -W %h:%p {}",
            shell_quote(&self.ssh.to_string_lossy()),
            shell_quote(&c.key_path.to_string_lossy()),
            c.connect_timeout.as_secs().max(1),
            shell_quote(&format!("{}@{}", c.bastion_username, c.bastion_address)),
        )
    }

    fn master_args(&self, socket: &Path, target_address: &str) -> Vec<String> {
        let c = &self.config;
        vec![
            "-M".into(),
            "-N".into(),
            "-o".into(),
            format!("ControlPath={}", socket.display()),
            "-o".into(),
            format!("ProxyCommand={}", self.proxy_command()),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
            "-o".into(),
            format!("ConnectTimeout={}", c.connect_timeout.as_secs().max(1)),
            "-i".into(),
            c.key_path.to_string_lossy().into_owned(),
            "-p".into(),
            TARGET_PORT.to_string(),
            format!("{}@{}", c.target_username, target_address),
        ]
    }
}

impl Connector for OpenSshConnector {
    type Session = OpenSshSession;

    async fn open(&self, target_address: &str) -> Result<OpenSshSession, ConnectFailure> {
        let control_dir = tempfile::Builder::new()
            .prefix("fleetpulse-")
            .tempdir_in(&self.control_root)?;
        let socket = control_dir.path().join("ctl");
        let destination = format!("{}@{}", self.config.target_username, target_address);

        let mut master = Command::new(&self.ssh)
            .args(self.master_args(&socket, target_address))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Two handshakes: bastion, then target.
        let budget = self.config.connect_timeout * 2;
        let deadline = Instant::now() + budget;

        loop {
            if master.try_wait()?.is_some() {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return Err(ConnectFailure::Rejected {
                    address: target_address.to_string(),
                    stderr: stderr.trim().to_string(),
                });
            }

            if control_check(&self.ssh, &socket, &destination).await {
                break;
            }

            if Instant::now() >= deadline {
                return Err(ConnectFailure::NotReady {
                    address: target_address.to_string(),
                    secs: budget.as_secs(),
                });
            }
            tokio::time::sleep(READY_POLL).await;
        }

        debug!(address = %target_address, "control master ready");

        // An unread pipe would eventually stall the master once full.
        if let Some(pipe) = master.stderr.take() {
            let address = target_address.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(address = %address, "ssh: {}", line);
                }
            });
        }

        Ok(OpenSshSession {
            ssh: self.ssh.clone(),
            socket,
            destination,
            master,
            _control_dir: control_dir,
        })
    }
}

/// An established control master. Dropping it kills the master process and
/// removes its socket directory.
pub struct OpenSshSession {
    ssh: PathBuf,
    socket: PathBuf,
    destination: String,
    master: Child,
    _control_dir: TempDir,
}

impl OpenSshSession {
    fn client(&self) -> Command {
        let mut cmd = Command::new(&self.ssh);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.socket.display()))
            .args(["-o", "BatchMode=yes", "-T"])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl RemoteShell for OpenSshSession {
    async fn exec(&self, command: &str) -> std::io::Result<CommandOutput> {
        let output = self
            .client()
            .arg(&self.destination)
            .arg("--")
            .arg(command)
            .output()
            .await?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn close(mut self) {
        let exit = self
            .client()
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = exit {
            debug!(error = %e, destination = %self.destination, "control exit failed");
        }
        if tokio::time::timeout(Duration::from_secs(2), self.master.wait())
            .await
            .is_err()
        {
            let _ = self.master.start_kill();
        }
    }
}

async fn control_check(ssh: &Path, socket: &Path, destination: &str) -> bool {
    if !socket.exists() {
        return false;
    }
    Command::new(ssh)
        .arg("-o")
        .arg(format!("ControlPath={}", socket.display()))
        .args(["-O", "check"])
        .arg(destination)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Single-quote for `sh -c`, which is how ssh runs ProxyCommand.
fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::domain::testing::stub_binary;

    fn connector() -> OpenSshConnector {
        OpenSshConnector {
            ssh: PathBuf::from("/usr/bin/ssh"),
            config: TunnelConfig {
                bastion_address: "203.0.113.7".into(),
                bastion_username: "ec2-user".into(),
                target_username: "ubuntu".into(),
                key_path: PathBuf::from("/home/ops/keys/fleet key.pem"),
                connect_timeout: Duration::from_secs(5),
            },
            control_root: PathBuf::from("/tmp"),
        }
    }

    /// Answers `-M` by writing the socket and idling, `-O check` with
    /// success, `-O exit` by stopping the master, and echoes anything else.
    #[cfg(unix)]
    const MULTIPLEXING_SSH: &str = r#"
for arg in "$@"; do
  case "$arg" in
    ControlPath=*) ctl="${arg#ControlPath=}" ;;
  esac
done
case " $* " in
  *" -M "*)
    echo $$ > "$ctl.pid"
    : > "$ctl"
    echo 'debug1: mux listener ready' >&2
    exec sleep 30 ;;
  *" -O exit "*)
    kill "$(cat "$ctl.pid")"
    exit 0 ;;
  *" -O check "*)
    exit 0 ;;
esac
for last in "$@"; do :; done
echo "ran: $last""#;

    #[cfg(unix)]
    fn stub_connector(dir: &Path, ssh_body: &str) -> OpenSshConnector {
        let control_root = dir.join("control");
        std::fs::create_dir(&control_root).unwrap();
        OpenSshConnector {
            ssh: stub_binary(dir, "ssh", ssh_body),
            config: TunnelConfig {
                connect_timeout: Duration::from_secs(1),
                ..connector().config
            },
            control_root,
        }
    }

    #[cfg(unix)]
    fn control_dirs(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn proxy_command_forwards_through_bastion() {
        let cmd = connector().proxy_command();
        assert!(cmd.starts_with("/usr/bin/ssh -i '/home/ops/keys/fleet key.pem' "));
        assert!(cmd.contains("-o ConnectTimeout=5"));
        assert!(cmd.ends_with("-W %h:%p ec2-user@203.0.113.7"));
    }

    #[test]
    fn bastion_login_is_quoted_for_the_proxy_shell() {
        let mut c = connector();
        c.config.bastion_username = "ops;touch /tmp/owned".into();
        let cmd = c.proxy_command();
        assert!(cmd.ends_with("-W %h:%p 'ops;touch /tmp/owned@203.0.113.7'"));
    }

    #[test]
    fn master_targets_private_address_on_port_22() {
        let args = connector().master_args(Path::new("/tmp/fp/ctl"), "10.0.3.14");
        assert_eq!(args[0], "-M");
        assert!(args.contains(&"ControlPath=/tmp/fp/ctl".to_string()));
        assert!(args.iter().any(|a| a.starts_with("ProxyCommand=")));
        assert_eq!(args[args.len() - 3..], ["-p", "22", "ubuntu@10.0.3.14"]);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/plain/path.pem"), "/plain/path.pem");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn only_zero_status_is_success() {
        let out = |status| CommandOutput {
            status,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(out(Some(0)).success());
        assert!(!out(Some(1)).success());
        assert!(!out(None).success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejected_master_reports_stderr_and_leaves_no_socket_dir() {
        let dir = tempfile::tempdir().unwrap();
        let connector = stub_connector(
            dir.path(),
            "echo 'Permission denied (publickey).' >&2\nexit 255",
        );

        match connector.open("10.0.3.14").await {
            Err(ConnectFailure::Rejected { address, stderr }) => {
                assert_eq!(address, "10.0.3.14");
                assert_eq!(stderr, "Permission denied (publickey).");
            }
            Err(other) => panic!("expected Rejected, got {other:?}"),
            Ok(_) => panic!("expected Rejected, got a session"),
        }
        assert_eq!(control_dirs(&connector.control_root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_master_is_not_ready_after_twice_the_connect_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let connector = stub_connector(dir.path(), "exec sleep 30");

        let started = std::time::Instant::now();
        let err = connector.open("10.0.3.14").await.err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Some(ConnectFailure::NotReady { secs: 2, .. })));
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
        assert_eq!(control_dirs(&connector.control_root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_runs_commands_over_the_master_and_close_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let connector = stub_connector(dir.path(), MULTIPLEXING_SSH);

        let session = connector.open("10.0.3.14").await.unwrap();
        assert!(session.master.stderr.is_none(), "master stderr left undrained");
        assert_eq!(control_dirs(&connector.control_root), 1);

        let out = session.exec("uptime").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "ran: uptime\n");

        tokio::time::timeout(Duration::from_secs(5), session.close())
            .await
            .unwrap();
        assert_eq!(control_dirs(&connector.control_root), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_session_removes_socket_dir() {
        let dir = tempfile::tempdir().unwrap();
        let connector = stub_connector(dir.path(), MULTIPLEXING_SSH);

        let session = connector.open("10.0.3.14").await.unwrap();
        assert_eq!(control_dirs(&connector.control_root), 1);
        drop(session);
        assert_eq!(control_dirs(&connector.control_root), 0);
    }
}
