use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use yascheduler_core::SchedulerError;

/// Accepts any host key. Equivalent to the "auto-add unknown hosts" policy
/// every other SSH orchestration tool in this space defaults to; worker
/// fleets are provisioned by the same cloud account that runs the daemon,
/// not third parties.
struct AcceptAllHostKeys;

#[async_trait]
impl client::Handler for AcceptAllHostKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One authenticated SSH connection to a worker node.
pub(crate) struct Session {
    handle: Handle<AcceptAllHostKeys>,
}

impl Session {
    pub(crate) async fn connect(
        ip: &str,
        user: &str,
        private_key_path: &Path,
        connect_timeout: Duration,
    ) -> Result<Self, SchedulerError> {
        let key_pair = russh_keys::load_secret_key(private_key_path, None).map_err(|err| {
            SchedulerError::Transport(format!("loading {}: {err}", private_key_path.display()))
        })?;

        let config = Arc::new(client::Config::default());
        let mut handle = tokio::time::timeout(
            connect_timeout,
            client::connect(config, (ip, 22), AcceptAllHostKeys),
        )
        .await
        .map_err(|_| SchedulerError::Transport(format!("connect to {ip} timed out")))?
        .map_err(|err| SchedulerError::Transport(format!("connect to {ip}: {err}")))?;

        let authenticated = handle
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|err| SchedulerError::Transport(format!("authenticate on {ip}: {err}")))?;
        if !authenticated {
            return Err(SchedulerError::Transport(format!(
                "{ip} rejected public key authentication"
            )));
        }

        Ok(Self { handle })
    }

    /// Run `command` to completion and return its exit status and combined
    /// stdout.
    pub(crate) async fn exec(&self, command: &str) -> Result<(u32, String), SchedulerError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|err| SchedulerError::Transport(format!("opening channel: {err}")))?;
        channel
            .exec(true, command)
            .await
            .map_err(|err| SchedulerError::Transport(format!("exec {command:?}: {err}")))?;

        let mut output = Vec::new();
        let mut exit_status = 0u32;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = code,
                _ => {}
            }
        }
        Ok((exit_status, String::from_utf8_lossy(&output).into_owned()))
    }

    /// Run `command` detached from the session so the call returns as soon
    /// as the shell accepts it, not when the job finishes.
    pub(crate) async fn exec_detached(&self, command: &str) -> Result<(), SchedulerError> {
        self.exec(&disown_command(command)).await.map(|_| ())
    }

    pub(crate) async fn sftp(&self) -> Result<russh_sftp::client::SftpSession, SchedulerError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|err| SchedulerError::Transport(format!("opening sftp channel: {err}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| {
                SchedulerError::Transport(format!("requesting sftp subsystem: {err}"))
            })?;
        russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| SchedulerError::Transport(format!("starting sftp session: {err}")))
    }
}

/// Wrap `command` so a remote shell backgrounds and disowns it, detaching
/// its lifetime from the SSH channel that launched it.
fn disown_command(command: &str) -> String {
    format!("nohup sh -c {command:?} > /dev/null 2>&1 < /dev/null &")
}

pub(crate) async fn write_remote_file(
    sftp: &russh_sftp::client::SftpSession,
    path: &str,
    contents: &[u8],
) -> Result<(), SchedulerError> {
    let mut file = sftp
        .create(path)
        .await
        .map_err(|err| SchedulerError::Transport(format!("creating {path}: {err}")))?;
    file.write_all(contents)
        .await
        .map_err(|err| SchedulerError::Transport(format!("writing {path}: {err}")))?;
    file.shutdown()
        .await
        .map_err(|err| SchedulerError::Transport(format!("closing {path}: {err}")))?;
    Ok(())
}

pub(crate) async fn read_remote_file(
    sftp: &russh_sftp::client::SftpSession,
    path: &str,
) -> Result<Vec<u8>, SchedulerError> {
    let mut file = sftp
        .open(path)
        .await
        .map_err(|err| SchedulerError::Transport(format!("opening {path}: {err}")))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .await
        .map_err(|err| SchedulerError::Transport(format!("reading {path}: {err}")))?;
    Ok(buf)
}
