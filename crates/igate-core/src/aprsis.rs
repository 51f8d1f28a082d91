//! APRS-IS client
//!
//! This module implements the uplink side of an iGate: a TCP session to an
//! APRS-IS server that logs in with a callsign/passcode pair and then writes
//! one TNC2 packet per line.
//!
//! Default APRS-IS port: 14580

use crate::{RelayError, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

/// Default APRS-IS filtered port
pub const DEFAULT_APRSIS_PORT: u16 = 14580;

/// How many server lines to read while waiting for `# logresp`
pub const LOGIN_RESPONSE_MAX_LINES: usize = 5;

/// Prefix of the server's login response line
const LOGRESP_PREFIX: &str = "# logresp";

/// Terms that mark a login response as a rejection
const REJECTION_TERMS: [&str; 4] = ["unverified", "invalid", "reject", "bad"];

/// Connection parameters for one APRS-IS session
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Server hostname
    pub host: String,

    /// Server port
    pub port: u16,

    /// Login callsign (with SSID)
    pub callsign: String,

    /// APRS-IS passcode
    pub passcode: String,

    /// Software name reported in the login line
    pub client_name: String,

    /// Software version reported in the login line
    pub client_version: String,

    /// Optional server-side filter
    pub filter: Option<String>,

    /// Bound on connect, each login read and each packet write
    pub timeout: Duration,
}

impl RelayConfig {
    /// Create a configuration with default software identification and timeout
    pub fn new(host: &str, port: u16, callsign: &str, passcode: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            callsign: callsign.to_string(),
            passcode: passcode.to_string(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            filter: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// `host:port` for logging
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the login line, without the trailing newline
    pub fn login_line(&self) -> String {
        let mut line = format!(
            "user {} pass {} vers {} {}",
            self.callsign, self.passcode, self.client_name, self.client_version
        );
        if let Some(filter) = self.filter.as_deref().filter(|f| !f.is_empty()) {
            line.push_str(" filter ");
            line.push_str(filter);
        }
        line
    }
}

/// Outcome of a `# logresp` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// Server accepted the login
    Verified,

    /// Server refused the login
    Rejected,
}

/// Classify one server line
///
/// Returns `None` for lines that are not a login response, and for login
/// responses that carry neither an acceptance nor a rejection.
pub fn classify_login_response(line: &str) -> Option<LoginStatus> {
    let line = line.trim().to_lowercase();
    if !line.starts_with(LOGRESP_PREFIX) {
        return None;
    }

    if REJECTION_TERMS.iter().any(|term| line.contains(term)) {
        return Some(LoginStatus::Rejected);
    }
    if line.contains("verified") || line.ends_with(" ok") {
        return Some(LoginStatus::Verified);
    }

    None
}

/// Relay connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    AwaitingLoginResponse,
    Established,
}

/// Both halves of an open socket
///
/// Held as one value so a session is either fully present or absent.
struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Session {
    /// Release writer, reader and socket in that order
    async fn shutdown(self) {
        let Session { reader, mut writer } = self;
        if let Err(e) = writer.shutdown().await {
            debug!("Ignoring error while shutting down APRS-IS writer: {}", e);
        }
        drop(writer);
        drop(reader);
    }
}

/// A client for one APRS-IS server
pub struct RelayClient {
    config: RelayConfig,
    state: watch::Sender<RelayState>,
    session: Option<Session>,
}

/// Puts the state back to `Disconnected` if a connect attempt is abandoned
struct ConnectAttempt<'a> {
    state: &'a watch::Sender<RelayState>,
    finished: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn start(state: &'a watch::Sender<RelayState>) -> Self {
        state.send_replace(RelayState::Connecting);
        Self {
            state,
            finished: false,
        }
    }

    fn advance(&self, next: RelayState) {
        self.state.send_replace(next);
    }

    fn finish(mut self, last: RelayState) {
        self.state.send_replace(last);
        self.finished = true;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.send_replace(RelayState::Disconnected);
        }
    }
}

impl RelayClient {
    /// Create a disconnected client
    pub fn new(config: RelayConfig) -> Self {
        let (state, _) = watch::channel(RelayState::Disconnected);
        Self {
            config,
            state,
            session: None,
        }
    }

    /// Session parameters
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Follow state changes from another task
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Whether a session is established
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Connect and log in
    ///
    /// Does nothing when a session is already established. On any failure
    /// everything opened by this call is released before the error returns.
    /// Cancel-safe: dropping the future drops the half-open socket and
    /// leaves the client `Disconnected`.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!(
                "APRS-IS session already active for {}",
                self.config.server_addr()
            );
            return Ok(());
        }

        debug!(
            "Opening APRS-IS session to {} as {}",
            self.config.server_addr(),
            self.config.callsign
        );
        let attempt = ConnectAttempt::start(&self.state);

        let mut session = open(&self.config).await?;

        attempt.advance(RelayState::AwaitingLoginResponse);
        match login(&self.config, &mut session).await {
            Ok(response) => {
                debug!("APRS-IS login response: {}", response);
                self.session = Some(session);
                attempt.finish(RelayState::Established);
                info!(
                    "Connected to APRS-IS {} as {}",
                    self.config.server_addr(),
                    self.config.callsign
                );
                Ok(())
            }
            Err(e) => {
                session.shutdown().await;
                Err(e)
            }
        }
    }

    /// Send one packet line
    ///
    /// Trailing CR/LF is replaced by a single newline. A failed write leaves
    /// the session in place; the caller decides whether to close it.
    pub async fn send_packet(&mut self, packet: &str) -> Result<()> {
        let limit = self.config.timeout;
        let session = self.session.as_mut().ok_or(RelayError::NotConnected)?;

        let mut line = packet.trim_end_matches(['\r', '\n']).to_string();
        line.push('\n');

        let write = async {
            session.writer.write_all(line.as_bytes()).await?;
            session.writer.flush().await
        };

        match timeout(limit, write).await {
            Ok(Ok(())) => {
                debug!("Sent {} bytes to APRS-IS", line.len());
                Ok(())
            }
            Ok(Err(e)) => Err(RelayError::Send(e)),
            Err(_) => Err(RelayError::Timeout {
                operation: "send",
                timeout: limit,
            }),
        }
    }

    /// Close the session
    ///
    /// Safe to call any number of times; closing a disconnected client is a
    /// no-op.
    pub async fn close(&mut self) {
        match self.session.take() {
            Some(session) => {
                session.shutdown().await;
                info!("Closed APRS-IS connection to {}", self.config.server_addr());
            }
            None => {
                debug!(
                    "APRS-IS close requested with no active session for {}",
                    self.config.server_addr()
                );
            }
        }
        self.state.send_replace(RelayState::Disconnected);
    }
}

/// Open the TCP connection
async fn open(config: &RelayConfig) -> Result<Session> {
    let addr = config.server_addr();
    let limit = config.timeout;

    let stream = match timeout(limit, TcpStream::connect((config.host.as_str(), config.port))).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(RelayError::Connect { addr, source }),
        Err(_) => {
            return Err(RelayError::Timeout {
                operation: "connect",
                timeout: limit,
            })
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY on APRS-IS socket: {}", e);
    }

    let (read_half, write_half) = stream.into_split();
    Ok(Session {
        reader: BufReader::new(read_half),
        writer: write_half,
    })
}

/// Send the login line and wait for a classifiable response
///
/// The whole exchange shares one deadline. Returns the accepting
/// `# logresp` line.
async fn login(config: &RelayConfig, session: &mut Session) -> Result<String> {
    let limit = config.timeout;
    let deadline = Instant::now() + limit;
    let expired = || RelayError::Timeout {
        operation: "login",
        timeout: limit,
    };

    let mut login = config.login_line();
    login.push('\n');

    let write = async {
        session.writer.write_all(login.as_bytes()).await?;
        session.writer.flush().await
    };
    match timeout_at(deadline, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(RelayError::Send(e)),
        Err(_) => return Err(expired()),
    }

    for _ in 0..LOGIN_RESPONSE_MAX_LINES {
        let line = match timeout_at(deadline, read_line(&mut session.reader)).await {
            Ok(line) => line?,
            Err(_) => return Err(expired()),
        };
        debug!("APRS-IS server: {}", line);

        match classify_login_response(&line) {
            Some(LoginStatus::Verified) => return Ok(line),
            Some(LoginStatus::Rejected) => return Err(RelayError::LoginRejected(line)),
            None => continue,
        }
    }

    Err(RelayError::LoginResponseMissing)
}

/// Read one line, replacing invalid UTF-8
async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Result<String> {
    let mut raw = Vec::new();
    let read = reader
        .read_until(b'\n', &mut raw)
        .await
        .map_err(RelayError::Read)?;

    if read == 0 {
        return Err(RelayError::ClosedDuringLogin);
    }

    Ok(String::from_utf8_lossy(&raw).trim().to_string())
}
