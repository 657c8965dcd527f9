use std::io::Read;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::data_aquisition::core::{CliCredential, CliOutput, CliTransport};

pub struct SshClient {
    username: String,
    host: IpAddr,
    password: Option<String>,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    session: Option<Arc<Mutex<ssh2::Session>>>,
}

#[derive(Debug, Error)]
pub enum SshError {
    #[error("TCP error: {0}")]
    TcpError(String),
    #[error("SSH error: {0}")]
    SshError(String),
    #[error("SSH handshake error: {0}")]
    HandshakeError(String),
    #[error("SSH authentication error: {0}")]
    SshAuthError(String),
    #[error("Command execution error: {0}")]
    CommandError(String),
    #[error("Async error: {0}")]
    AsyncError(String),
}

impl SshError {
    /// Authentication failures mean the credential is wrong for this device, so there is no point
    /// in trying further commands with it.
    pub fn is_auth(&self) -> bool {
        matches!(self, SshError::SshAuthError(_))
    }

    /// The device could not be reached at all, or what answered does not speak SSH; no credential
    /// will help.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SshError::TcpError(_) | SshError::HandshakeError(_))
    }
}

impl SshClient {
    pub fn new_with_password(username: String, host: IpAddr, password: String, port: u16) -> Self {
        Self {
            username,
            host,
            password: Some(password),
            port,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(20),
            session: None,
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, command_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.command_timeout = command_timeout;
        self
    }

    fn connect_sync_inner(
        username: String,
        addr: SocketAddr,
        password: Option<String>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Session, SshError> {
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| SshError::TcpError(e.to_string()))?;
        let mut session = ssh2::Session::new().map_err(|e| SshError::SshError(e.to_string()))?;
        session.set_tcp_stream(tcp);
        // libssh2 applies this to every blocking call: handshake, auth, exec and reads
        session.set_timeout(u32::try_from(command_timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(|e| SshError::HandshakeError(e.to_string()))?;
        if let Some(password) = password {
            session
                .userauth_password(&username, &password)
                .map_err(|e| SshError::SshAuthError(e.to_string()))?;
        }
        if !session.authenticated() {
            return Err(SshError::SshAuthError("Authentication failed".to_string()));
        }
        Ok(session)
    }

    pub async fn connect(&mut self) -> Result<(), SshError> {
        if self.session.is_some() {
            return Err(SshError::SshError("Already connected".to_string()));
        }
        let username = self.username.clone();
        let addr = SocketAddr::new(self.host, self.port);
        let password = self.password.clone();
        let (connect_timeout, command_timeout) = (self.connect_timeout, self.command_timeout);
        let session = tokio::task::spawn_blocking(move || {
            SshClient::connect_sync_inner(username, addr, password, connect_timeout, command_timeout)
        })
        .await
        .map_err(|e| SshError::AsyncError(e.to_string()))??;
        self.session = Some(Arc::new(Mutex::new(session)));
        Ok(())
    }

    fn execute_command_sync(session: &mut ssh2::Session, command: &str) -> Result<CliOutput, SshError> {
        let mut channel = session
            .channel_session()
            .map_err(|e| SshError::SshError(e.to_string()))?;
        channel
            .exec(command)
            .map_err(|e| SshError::CommandError(e.to_string()))?;
        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| SshError::CommandError(e.to_string()))?;
        let mut stderr = String::new();
        // some embedded servers close stderr early; stdout is what matters
        let _ = channel.stderr().read_to_string(&mut stderr);
        channel
            .wait_close()
            .map_err(|e| SshError::SshError(e.to_string()))?;
        Ok(CliOutput {
            stdout,
            stderr,
            exit_status: channel.exit_status().ok(),
        })
    }

    pub async fn execute_command(&self, command: &str) -> Result<CliOutput, SshError> {
        let command = command.to_string();
        let session_mutex = match &self.session {
            Some(s) => s.clone(),
            None => return Err(SshError::SshError("Session not initialized".to_string())),
        };
        tokio::task::spawn_blocking(move || {
            let mut session = session_mutex.blocking_lock();
            Self::execute_command_sync(&mut session, &command)
        })
        .await
        .map_err(|e| SshError::AsyncError(e.to_string()))?
    }

    pub async fn close(self) -> Result<(), SshError> {
        if let Some(session) = self.session {
            tokio::task::spawn_blocking(move || {
                let session = session.blocking_lock();
                session
                    .disconnect(Some(ssh2::DisconnectCode::ByApplication), "", None)
                    .map_err(|e| SshError::SshError(e.to_string()))
            })
            .await
            .map_err(|e| SshError::AsyncError(e.to_string()))??;
        }
        Ok(())
    }
}

/// `CliTransport` over SSH: connect, authenticate, run one command, disconnect.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(20),
        }
    }
}

#[async_trait]
impl CliTransport for SshTransport {
    async fn run_command(
        &self,
        host: IpAddr,
        credential: &CliCredential,
        command: &str,
    ) -> Result<CliOutput, SshError> {
        let mut client = SshClient::new_with_password(
            credential.username.clone(),
            host,
            credential.password.clone(),
            self.port,
        )
        .with_timeouts(self.connect_timeout, self.command_timeout);
        client.connect().await?;
        debug!("{host}: running '{command}' as {}", credential.username);
        let output = client.execute_command(command).await;
        if let Err(e) = client.close().await {
            // the command already ran; a failed disconnect doesn't invalidate its output
            debug!("{host}: disconnect failed: {e}");
        }
        output
    }
}
