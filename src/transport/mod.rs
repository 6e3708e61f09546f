//! Byte-stream channels to devices.
//!
//! Every transport runs one I/O task that bridges the socket to a pair of
//! in-process queues, so a [`Channel`] looks the same regardless of whether SSH,
//! Telnet or a simulated device sits behind it.
//!
//! # Main Components
//!
//! - [`Channel`] - text in, text out, with timed reads
//! - [`Connector`] - opens a channel for a [`ConnectTarget`]
//! - [`NetworkConnector`] - the real SSH/Telnet connector

use std::fmt;
use std::time::Duration;

use async_ssh2_tokio::client::Client;
use futures_util::future::BoxFuture;
use log::debug;
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::device::{Credentials, Device, Protocol};
use crate::error::SessionError;

pub use security::{ConnectionSecurityOptions, SecurityLevel};

mod algorithms;
mod security;
pub mod ssh;
pub mod telnet;

/// Capacity of the queues between a channel and its I/O task.
pub(crate) const QUEUE_DEPTH: usize = 256;

/// Read/write failures on an open channel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Nothing arrived before the read deadline.
    #[error("read timed out")]
    Timeout,
    /// The peer or the I/O task went away.
    #[error("channel closed")]
    Closed,
}

/// Turns a byte stream into text without splitting multi-byte characters.
///
/// Packet boundaries can fall inside a UTF-8 sequence. An unfinished sequence
/// at the end of a chunk is held back and completed by the next one. Bytes
/// that are invalid outright are replaced with U+FFFD.
#[derive(Debug, Clone, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, input: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(input);
        let cut = unfinished_tail(&bytes);
        self.pending = bytes.split_off(cut);
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// Index where a trailing, still incomplete UTF-8 sequence starts, or `bytes.len()`.
fn unfinished_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

/// What keeps the far side of a channel alive.
pub enum Link {
    /// SSH client plus the task pumping its shell channel.
    Ssh { client: Client, io_task: JoinHandle<()> },
    /// A socket or simulated device driven by a single task.
    Task(JoinHandle<()>),
    /// Nothing to tear down beyond the queues.
    Detached,
}

/// An open text channel to a device shell.
pub struct Channel {
    label: String,
    sender: Sender<String>,
    recv: Receiver<String>,
    link: Link,
    closed: bool,
}

impl Channel {
    /// Assembles a channel from the queues of an already running I/O task.
    ///
    /// `sender` carries text towards the device, `recv` yields text the device printed.
    pub fn from_parts(
        label: impl Into<String>,
        sender: Sender<String>,
        recv: Receiver<String>,
        link: Link,
    ) -> Self {
        Self {
            label: label.into(),
            sender,
            recv,
            link,
            closed: false,
        }
    }

    /// Creates a channel together with the device-side ends of its queues.
    pub fn pair(label: impl Into<String>) -> (Self, Sender<String>, Receiver<String>) {
        let (to_device, from_user) = mpsc::channel::<String>(QUEUE_DEPTH);
        let (to_user, from_device) = mpsc::channel::<String>(QUEUE_DEPTH);
        (
            Self::from_parts(label, to_device, from_device, Link::Detached),
            to_user,
            from_user,
        )
    }

    /// Attaches the task serving the device side of a [`Channel::pair`].
    pub fn with_link(mut self, link: Link) -> Self {
        self.link = link;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Sends text to the device shell.
    pub async fn write(&mut self, data: &str) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.sender.send(data.to_string()).await.is_err() {
            debug!("{} write failed, I/O task is gone", self.label);
            self.closed = true;
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    /// Waits up to `timeout` for the next chunk of output.
    pub async fn read(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        match tokio::time::timeout(timeout, self.recv.recv()).await {
            Err(_) => Err(ChannelError::Timeout),
            Ok(None) => {
                debug!("{} output stream ended", self.label);
                self.closed = true;
                Err(ChannelError::Closed)
            }
            Ok(Some(data)) => Ok(data),
        }
    }

    /// Discards output that is already queued, returning how many bytes were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        loop {
            match self.recv.try_recv() {
                Ok(data) => dropped += data.len(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        dropped
    }

    /// Whether the channel can no longer carry data.
    pub fn is_closed(&self) -> bool {
        if self.closed || self.sender.is_closed() {
            return true;
        }
        match &self.link {
            Link::Ssh { client, io_task } => client.is_closed() || io_task.is_finished(),
            Link::Task(io_task) => io_task.is_finished(),
            Link::Detached => false,
        }
    }

    /// Tears the transport down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed && matches!(self.link, Link::Detached) {
            return;
        }
        self.closed = true;
        self.recv.close();
        match std::mem::replace(&mut self.link, Link::Detached) {
            Link::Ssh { client, io_task } => {
                io_task.abort();
                if let Err(e) = client.disconnect().await {
                    debug!("{} error during SSH disconnect: {:?}", self.label, e);
                }
            }
            Link::Task(io_task) => io_task.abort(),
            Link::Detached => {}
        }
        debug!("{} channel closed", self.label);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.label)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Where and how to open a channel.
#[derive(Clone)]
pub struct ConnectTarget {
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    pub credentials: Credentials,
}

impl ConnectTarget {
    pub fn for_device(device: &Device, protocol: Protocol) -> Self {
        Self {
            address: device.ip_address.clone(),
            port: device.port_for(protocol),
            protocol,
            credentials: device.credentials(),
        }
    }

    /// `user@addr:port`, used as a log label.
    pub fn label(&self) -> String {
        format!(
            "{}@{}:{}",
            self.credentials.username, self.address, self.port
        )
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Opens channels. Implemented by the real network connector and by simulators.
pub trait Connector: Send + Sync {
    /// Opens one channel. Failures are `Connect` or `Auth`.
    fn open<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, Result<Channel, SessionError>>;
}

/// Connector for real devices over SSH or Telnet.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    security: ConnectionSecurityOptions,
    connect_timeout: Duration,
}

impl NetworkConnector {
    pub fn new(security: ConnectionSecurityOptions, connect_timeout: Duration) -> Self {
        Self {
            security,
            connect_timeout,
        }
    }
}

impl Default for NetworkConnector {
    fn default() -> Self {
        Self::new(ConnectionSecurityOptions::default(), Duration::from_secs(10))
    }
}

impl Connector for NetworkConnector {
    fn open<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, Result<Channel, SessionError>> {
        Box::pin(async move {
            match target.protocol {
                Protocol::Ssh => ssh::open(target, &self.security, self.connect_timeout).await,
                Protocol::Telnet => telnet::open(target, self.connect_timeout).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    #[test]
    fn decoder_holds_unfinished_sequences_only() {
        let mut utf8 = Utf8Decoder::default();
        let emoji = "\u{1F600}".as_bytes();
        assert_eq!(utf8.decode(&emoji[..3]), "");
        assert_eq!(utf8.decode(&emoji[3..]), "\u{1F600}");

        // A stray continuation byte is replaced, not held.
        assert_eq!(utf8.decode(&[b'a', 0xA9, b'b']), "a\u{FFFD}b");
        assert_eq!(utf8.decode(b"R1>"), "R1>");
    }

    #[tokio::test]
    async fn read_reports_timeout_then_data_then_closed() {
        let (mut channel, to_user, _from_user) = Channel::pair("test");

        let err = channel
            .read(Duration::from_millis(20))
            .await
            .expect_err("nothing queued yet");
        assert_eq!(err, ChannelError::Timeout);

        to_user.send("Router#".to_string()).await.expect("queue open");
        assert_eq!(
            channel.read(Duration::from_millis(20)).await.expect("data"),
            "Router#"
        );

        drop(to_user);
        assert_eq!(
            channel.read(Duration::from_millis(20)).await,
            Err(ChannelError::Closed)
        );
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn write_fails_once_device_side_is_gone() {
        let (mut channel, _to_user, from_user) = Channel::pair("test");
        channel.write("show clock\n").await.expect("device side alive");
        drop(from_user);
        assert_eq!(channel.write("show clock\n").await, Err(ChannelError::Closed));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn drain_discards_queued_output() {
        let (mut channel, to_user, _from_user) = Channel::pair("test");
        to_user.send("stale ".to_string()).await.expect("queue open");
        to_user.send("output".to_string()).await.expect("queue open");
        assert_eq!(channel.drain(), 12);
        assert_eq!(channel.drain(), 0);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_the_task() {
        let (channel, _to_user, _from_user) = Channel::pair("test");
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let mut channel = channel.with_link(Link::Task(task));
        channel.close().await;
        channel.close().await;
        assert!(channel.is_closed());
        assert_eq!(channel.write("x").await, Err(ChannelError::Closed));
    }

    #[test]
    fn target_uses_protocol_port_and_hides_password() {
        let device = Device::new("R1", "192.0.2.10", DeviceType::Router, Protocol::Ssh)
            .with_credentials("admin", "s3cret");
        let target = ConnectTarget::for_device(&device, Protocol::Telnet);
        assert_eq!(target.port, 23);
        assert_eq!(target.label(), "admin@192.0.2.10:23");
        assert!(!format!("{target:?}").contains("s3cret"));
    }
}
