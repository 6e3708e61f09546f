//! SSH shell channels.

use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::debug;
use russh::ChannelMsg;
use tokio::sync::mpsc;

use super::{Channel, ConnectTarget, ConnectionSecurityOptions, Link, QUEUE_DEPTH, Utf8Decoder};
use crate::error::SessionError;

/// Opens an SSH connection, authenticates with the target's password and
/// starts an interactive shell on a PTY.
pub async fn open(
    target: &ConnectTarget,
    security: &ConnectionSecurityOptions,
    connect_timeout: Duration,
) -> Result<Channel, SessionError> {
    let label = target.label();

    let config = Config {
        preferred: security.preferred(),
        inactivity_timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    };

    let connecting = Client::connect_with_config(
        (target.address.clone(), target.port),
        &target.credentials.username,
        AuthMethod::with_password(&target.credentials.password),
        security.server_check.clone(),
        config,
    );
    let client = match tokio::time::timeout(connect_timeout, connecting).await {
        Err(_) => {
            return Err(SessionError::Connect(format!(
                "{label}: no SSH handshake within {} ms",
                connect_timeout.as_millis()
            )));
        }
        Ok(Err(e)) => return Err(map_ssh_error(&label, e)),
        Ok(Ok(client)) => client,
    };
    debug!("{} SSH connection established", label);

    let mut channel = client
        .get_channel()
        .await
        .map_err(|e| SessionError::Connect(format!("{label}: {e}")))?;
    channel
        .request_pty(false, "xterm", 800, 600, 0, 0, &[])
        .await
        .map_err(|e| SessionError::Connect(format!("{label}: pty request failed: {e}")))?;
    channel
        .request_shell(false)
        .await
        .map_err(|e| SessionError::Connect(format!("{label}: shell request failed: {e}")))?;
    debug!("{} shell started", label);

    let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(QUEUE_DEPTH);
    let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(QUEUE_DEPTH);

    let task_label = label.clone();
    let io_task = tokio::spawn(async move {
        let mut utf8 = Utf8Decoder::default();
        loop {
            tokio::select! {
                data = receiver_from_user.recv() => {
                    let Some(data) = data else { break };
                    if let Err(e) = channel.data(data.as_bytes()).await {
                        debug!("{} failed to send data to shell: {:?}", task_label, e);
                        break;
                    }
                },
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            let text = utf8.decode(data);
                            if text.is_empty() {
                                continue;
                            }
                            if sender_to_user.send(text).await.is_err() {
                                debug!("{} shell output receiver dropped", task_label);
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!("{} shell exited with status {}", task_label, exit_status);
                            let _ = channel.eof().await;
                            break;
                        }
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                            debug!("{} shell sent EOF", task_label);
                            break;
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        debug!("{} SSH I/O task ended", task_label);
    });

    Ok(Channel::from_parts(
        label,
        sender_to_shell,
        receiver_from_shell,
        Link::Ssh { client, io_task },
    ))
}

fn map_ssh_error(label: &str, error: async_ssh2_tokio::Error) -> SessionError {
    match error {
        async_ssh2_tokio::Error::PasswordWrong => {
            SessionError::Auth(format!("{label}: password rejected"))
        }
        other => SessionError::Connect(format!("{label}: {other}")),
    }
}
