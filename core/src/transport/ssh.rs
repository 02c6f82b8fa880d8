use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{CheckResult, ExtendedData, KnownHostFileKind, Session};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::key::parse_private_key;
use super::RemoteHost;
use crate::context::RunContext;
use crate::error::TransportError;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Commands starting with this never prompt for a password.
pub const NON_INTERACTIVE_SUDO: &str = "sudo -n ";
/// Replacement that reads the password from stdin without printing a prompt.
pub const PROMPTING_SUDO: &str = "sudo -S -p '' ";

const PHASE_DIAL: &str = "dial";
const PHASE_HANDSHAKE: &str = "handshake";
const PHASE_COMMAND: &str = "command";

/// `LIBSSH2_ERROR_FILE`: libssh2 could not load the key material it was handed.
const LIBSSH2_ERROR_FILE: i32 = -16;

/// Login identity for one server.
#[derive(Debug, Clone, Default)]
pub struct SshUser {
    pub name: String,
    pub ssh_key: Option<String>,
    pub sudo_password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    /// `None` means enabled.
    pub use_agent: Option<bool>,
    pub handshake_timeout: Option<Duration>,
}

/// A server reached over SSH, authenticated with an explicit key and/or the local agent.
#[derive(Debug, Clone)]
pub struct SshHost {
    name: String,
    address: String,
    user: SshUser,
    known_hosts: Option<String>,
    opts: SshOptions,
}

#[derive(Debug)]
enum AuthMethod {
    PrivateKey { path: PathBuf, pem: String },
    Agent,
}

impl SshHost {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        user: SshUser,
        known_hosts: Option<String>,
        opts: SshOptions,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            user,
            known_hosts,
            opts,
        }
    }

    pub fn user(&self) -> &SshUser {
        &self.user
    }

    fn use_agent(&self) -> bool {
        self.opts.use_agent.unwrap_or(true)
    }

    fn handshake_timeout(&self) -> Duration {
        match self.opts.handshake_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Explicit key first, agent second. Reading or parsing the key is fatal.
    fn resolve_auth(&self) -> Result<Vec<AuthMethod>, TransportError> {
        let mut methods = Vec::new();

        if let Some(key) = self.user.ssh_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let path = expand_path(key)?;
            let contents = std::fs::read_to_string(&path).map_err(|source| {
                TransportError::KeyRead {
                    path: path.clone(),
                    source,
                }
            })?;
            let pem = parse_private_key(&path, &contents)?;
            methods.push(AuthMethod::PrivateKey { path, pem });
        }

        if self.use_agent() && agent_reachable() {
            methods.push(AuthMethod::Agent);
        }

        if methods.is_empty() {
            return Err(TransportError::NoAuthMethod);
        }
        Ok(methods)
    }
}

#[async_trait]
impl RemoteHost for SshHost {
    fn id(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(&self, ctx: &RunContext, command: &str) -> Result<String, TransportError> {
        let addr = with_default_port(&self.address);

        let methods = self.resolve_auth()?;
        let known_hosts = resolve_known_hosts_path(self.known_hosts.as_deref())?;
        std::fs::metadata(&known_hosts).map_err(|e| TransportError::KnownHosts {
            path: known_hosts.clone(),
            reason: e.to_string(),
        })?;

        let tcp = dial(ctx, &addr).await?;
        let raw = tcp.try_clone().map_err(|source| TransportError::Io {
            phase: PHASE_DIAL,
            source,
        })?;

        let deadline = handshake_deadline(Instant::now(), self.handshake_timeout(), ctx.deadline());
        let timeout_ms = apply_deadline(&raw, deadline)?;

        let watcher = ConnWatcher::spawn(ctx, &raw, PHASE_HANDSHAKE)?;
        let handshake = HandshakeParams {
            addr: addr.clone(),
            user: self.user.name.clone(),
            known_hosts,
            methods,
            timeout_ms,
        };
        let established = tokio::task::spawn_blocking(move || establish(tcp, handshake)).await;
        watcher.stop().await;

        let session = match established {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return Err(attribute(ctx, PHASE_HANDSHAKE, err)),
            Err(join) => {
                return Err(TransportError::Handshake {
                    addr,
                    reason: join.to_string(),
                })
            }
        };
        clear_deadline(&raw)?;

        // Long-running commands are bounded only by the caller's context from here on.
        let watcher = ConnWatcher::spawn(ctx, &raw, PHASE_COMMAND)?;
        let (command, stdin) = elevate_command(command, self.user.sudo_password.as_deref());
        let ran = tokio::task::spawn_blocking(move || run_command(session, &command, stdin)).await;
        watcher.stop().await;

        match ran {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(attribute(ctx, PHASE_COMMAND, err)),
            Err(join) => Err(TransportError::Session(join.to_string())),
        }
    }
}

/// Rewrites `sudo -n <cmd>` into a prompting form when a password is configured.
///
/// Returns the command to run and the bytes to feed on stdin. Commands without the marker,
/// or any command when no password is set, pass through untouched and get no stdin.
pub fn elevate_command(command: &str, sudo_password: Option<&str>) -> (String, Option<String>) {
    let password = sudo_password.filter(|p| !p.is_empty());
    match (password, command.strip_prefix(NON_INTERACTIVE_SUDO)) {
        (Some(password), Some(rest)) => (format!("{PROMPTING_SUDO}{rest}"), Some(format!("{password}\n"))),
        _ => (command.to_string(), None),
    }
}

/// Appends the default SSH port when the address has none.
pub fn with_default_port(address: &str) -> String {
    if address.starts_with('[') {
        if address.contains("]:") {
            return address.to_string();
        }
        return format!("{address}:{DEFAULT_SSH_PORT}");
    }
    match address.matches(':').count() {
        0 => format!("{address}:{DEFAULT_SSH_PORT}"),
        1 => address.to_string(),
        // Bare IPv6 literal.
        _ => format!("[{address}]:{DEFAULT_SSH_PORT}"),
    }
}

/// Earlier of `now + timeout` and the context deadline. A zero timeout means none.
pub fn handshake_deadline(
    now: Instant,
    timeout: Duration,
    ctx_deadline: Option<Instant>,
) -> Option<Instant> {
    let mut deadline = (!timeout.is_zero()).then(|| now + timeout);
    if let Some(ctx_deadline) = ctx_deadline {
        if deadline.map_or(true, |d| ctx_deadline < d) {
            deadline = Some(ctx_deadline);
        }
    }
    deadline
}

pub fn resolve_known_hosts_path(path: Option<&str>) -> Result<PathBuf, TransportError> {
    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => expand_path(path),
        None => dirs::home_dir()
            .map(|home| home.join(".ssh").join("known_hosts"))
            .ok_or_else(|| TransportError::KnownHosts {
                path: PathBuf::from("~/.ssh/known_hosts"),
                reason: "failed to resolve home directory".to_string(),
            }),
    }
}

/// Expands `~` and environment variables.
pub fn expand_path(path: &str) -> Result<PathBuf, TransportError> {
    shellexpand::full(path)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| TransportError::Path {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

fn agent_reachable() -> bool {
    let Some(sock) = std::env::var_os("SSH_AUTH_SOCK").filter(|s| !s.is_empty()) else {
        return false;
    };
    #[cfg(unix)]
    {
        std::os::unix::net::UnixStream::connect(sock).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = sock;
        true
    }
}

async fn dial(ctx: &RunContext, addr: &str) -> Result<TcpStream, TransportError> {
    let stream = tokio::select! {
        biased;
        cause = ctx.done() => {
            return Err(TransportError::Cancelled { phase: PHASE_DIAL, cause });
        }
        res = tokio::net::TcpStream::connect(addr) => res.map_err(|source| TransportError::Dial {
            addr: addr.to_string(),
            source,
        })?,
    };
    let stream = stream.into_std().map_err(|source| TransportError::Io {
        phase: PHASE_DIAL,
        source,
    })?;
    stream
        .set_nonblocking(false)
        .map_err(|source| TransportError::Io {
            phase: PHASE_DIAL,
            source,
        })?;
    Ok(stream)
}

/// Applies the handshake deadline to the socket and returns the libssh2 timeout in ms (0 = none).
fn apply_deadline(conn: &TcpStream, deadline: Option<Instant>) -> Result<u32, TransportError> {
    let Some(deadline) = deadline else {
        return Ok(0);
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(TransportError::Cancelled {
            phase: PHASE_HANDSHAKE,
            cause: crate::error::CancelCause::DeadlineExceeded,
        });
    }
    let io_err = |source| TransportError::Io {
        phase: PHASE_HANDSHAKE,
        source,
    };
    conn.set_read_timeout(Some(remaining)).map_err(io_err)?;
    conn.set_write_timeout(Some(remaining)).map_err(io_err)?;
    Ok(u32::try_from(remaining.as_millis()).unwrap_or(u32::MAX).max(1))
}

fn clear_deadline(conn: &TcpStream) -> Result<(), TransportError> {
    let io_err = |source| TransportError::Io {
        phase: PHASE_HANDSHAKE,
        source,
    };
    conn.set_read_timeout(None).map_err(io_err)?;
    conn.set_write_timeout(None).map_err(io_err)
}

/// A failure while the context was already done is reported as cancellation.
///
/// A finished command keeps its own error so the captured output survives.
fn attribute(ctx: &RunContext, phase: &'static str, err: TransportError) -> TransportError {
    if matches!(err, TransportError::Command { .. }) {
        return err;
    }
    match ctx.cause() {
        Some(cause) if !err.is_cancelled() => {
            debug!(phase, error = %err, "ssh failure after context stopped");
            TransportError::Cancelled { phase, cause }
        }
        _ => err,
    }
}

/// Closes the connection if the context stops before the guarded phase ends.
struct ConnWatcher {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ConnWatcher {
    fn spawn(ctx: &RunContext, conn: &TcpStream, phase: &'static str) -> Result<Self, TransportError> {
        let conn = conn.try_clone().map_err(|source| TransportError::Io { phase, source })?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                cause = ctx.done() => {
                    debug!(phase, %cause, "closing ssh connection");
                    let _ = conn.shutdown(Shutdown::Both);
                }
                _ = stop_rx => {}
            }
        });
        Ok(Self {
            stop: Some(stop_tx),
            handle,
        })
    }

    /// Ends the watch and waits for the watcher task to exit.
    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

struct HandshakeParams {
    addr: String,
    user: String,
    known_hosts: PathBuf,
    methods: Vec<AuthMethod>,
    timeout_ms: u32,
}

fn establish(tcp: TcpStream, params: HandshakeParams) -> Result<Session, TransportError> {
    let handshake_err = |reason: String| TransportError::Handshake {
        addr: params.addr.clone(),
        reason,
    };

    let mut session = Session::new().map_err(|e| handshake_err(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(params.timeout_ms);
    session.handshake().map_err(|e| handshake_err(e.to_string()))?;

    verify_host_key(&session, &params.addr, &params.known_hosts)?;
    authenticate(&session, &params)?;

    session.set_timeout(0);
    Ok(session)
}

fn verify_host_key(session: &Session, addr: &str, known_hosts: &Path) -> Result<(), TransportError> {
    let host_key_err = |reason: String| TransportError::HostKey {
        addr: addr.to_string(),
        reason,
    };

    let mut known = session
        .known_hosts()
        .map_err(|e| host_key_err(e.to_string()))?;
    known
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|e| TransportError::KnownHosts {
            path: known_hosts.to_path_buf(),
            reason: e.to_string(),
        })?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| host_key_err("server presented no host key".to_string()))?;
    let (host, port) = split_host_port(addr);

    match known.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(host_key_err(format!(
            "host not present in {}",
            known_hosts.display()
        ))),
        CheckResult::Mismatch => Err(host_key_err(format!(
            "host key does not match entry in {}",
            known_hosts.display()
        ))),
        CheckResult::Failure => Err(host_key_err("known_hosts lookup failed".to_string())),
    }
}

fn split_host_port(addr: &str) -> (&str, u16) {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_SSH_PORT)),
        None => (addr, DEFAULT_SSH_PORT),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (host, port)
}

fn authenticate(session: &Session, params: &HandshakeParams) -> Result<(), TransportError> {
    let mut failures = Vec::new();

    for method in &params.methods {
        match method {
            AuthMethod::PrivateKey { path, pem } => {
                match session.userauth_pubkey_memory(&params.user, None, pem, None) {
                    Ok(()) if session.authenticated() => return Ok(()),
                    Ok(()) => failures.push(format!("publickey {}: rejected", path.display())),
                    Err(e) if is_key_load_error(&e) => {
                        return Err(TransportError::KeyParse {
                            path: path.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => failures.push(format!("publickey {}: {e}", path.display())),
                }
            }
            AuthMethod::Agent => match agent_auth(session, &params.user) {
                Ok(true) => return Ok(()),
                Ok(false) => failures.push("agent: no identity accepted".to_string()),
                Err(e) => failures.push(format!("agent: {e}")),
            },
        }
    }

    Err(TransportError::Auth {
        user: params.user.clone(),
        addr: params.addr.clone(),
        reason: failures.join("; "),
    })
}

/// Separates a key libssh2 could not load from one the server refused.
fn is_key_load_error(err: &ssh2::Error) -> bool {
    matches!(err.code(), ssh2::ErrorCode::Session(LIBSSH2_ERROR_FILE))
}

fn agent_auth(session: &Session, user: &str) -> Result<bool, ssh2::Error> {
    let mut agent = session.agent()?;
    agent.connect()?;
    let result = try_agent_identities(session, &mut agent, user);
    let _ = agent.disconnect();
    result
}

fn try_agent_identities(
    session: &Session,
    agent: &mut ssh2::Agent,
    user: &str,
) -> Result<bool, ssh2::Error> {
    agent.list_identities()?;
    for identity in agent.identities()? {
        if agent.userauth(user, &identity).is_ok() && session.authenticated() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn run_command(session: Session, command: &str, stdin: Option<String>) -> Result<String, TransportError> {
    let session_err = |e: ssh2::Error| TransportError::Session(e.to_string());
    let io_err = |source| TransportError::Io {
        phase: PHASE_COMMAND,
        source,
    };

    let mut channel = session.channel_session().map_err(session_err)?;
    channel
        .handle_extended_data(ExtendedData::Merge)
        .map_err(session_err)?;
    channel.exec(command).map_err(session_err)?;

    if let Some(input) = stdin {
        channel.write_all(input.as_bytes()).map_err(io_err)?;
    }
    channel.send_eof().map_err(session_err)?;

    let mut buf = Vec::new();
    channel.read_to_end(&mut buf).map_err(io_err)?;
    let output = String::from_utf8_lossy(&buf).into_owned();

    channel.wait_close().map_err(session_err)?;
    let status = channel.exit_status().map_err(session_err)?;
    let signal = channel
        .exit_signal()
        .ok()
        .and_then(|signal| signal.exit_signal);
    let _ = session.disconnect(None, "done", None);

    if let Some(signal) = signal {
        return Err(TransportError::Command {
            command: command.to_string(),
            status: format!("killed by signal {signal}"),
            output,
        });
    }
    if status != 0 {
        return Err(TransportError::Command {
            command: command.to_string(),
            status: format!("exit status {status}"),
            output,
        });
    }
    Ok(output)
}
