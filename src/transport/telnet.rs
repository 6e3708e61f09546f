//! Telnet channels.
//!
//! Only the small slice of RFC 854 option negotiation that device CLIs need:
//! the server may echo and suppress go-ahead, everything else is refused.

use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{Channel, ConnectTarget, Link, QUEUE_DEPTH, Utf8Decoder};
use crate::error::SessionError;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Strips telnet commands from the inbound stream and produces replies.
#[derive(Debug)]
pub struct TelnetFilter {
    state: State,
    answered_will: [bool; 256],
    answered_do: [bool; 256],
    utf8: Utf8Decoder,
}

impl Default for TelnetFilter {
    fn default() -> Self {
        Self {
            state: State::Data,
            answered_will: [false; 256],
            answered_do: [false; 256],
            utf8: Utf8Decoder::default(),
        }
    }
}

impl TelnetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes raw socket bytes.
    ///
    /// Returns the printable text and the negotiation bytes to send back. An
    /// incomplete UTF-8 sequence at the end is held until the next call.
    pub fn feed(&mut self, input: &[u8]) -> (String, Vec<u8>) {
        let mut data = Vec::with_capacity(input.len());
        let mut replies = Vec::new();

        for &byte in input {
            self.state = match self.state {
                State::Data => match byte {
                    IAC => State::Iac,
                    0 => State::Data,
                    other => {
                        data.push(other);
                        State::Data
                    }
                },
                State::Iac => match byte {
                    IAC => {
                        data.push(IAC);
                        State::Data
                    }
                    WILL | WONT | DO | DONT => State::Negotiate(byte),
                    SB => State::Sub,
                    _ => State::Data,
                },
                State::Negotiate(command) => {
                    self.negotiate(command, byte, &mut replies);
                    State::Data
                }
                State::Sub => match byte {
                    IAC => State::SubIac,
                    _ => State::Sub,
                },
                State::SubIac => match byte {
                    SE => State::Data,
                    _ => State::Sub,
                },
            };
        }

        let text = self.utf8.decode(&data);
        (text, replies)
    }

    fn negotiate(&mut self, command: u8, option: u8, replies: &mut Vec<u8>) {
        let slot = option as usize;
        match command {
            WILL if !self.answered_will[slot] => {
                self.answered_will[slot] = true;
                let answer = if option == OPT_ECHO || option == OPT_SGA {
                    DO
                } else {
                    DONT
                };
                replies.extend_from_slice(&[IAC, answer, option]);
            }
            DO if !self.answered_do[slot] => {
                self.answered_do[slot] = true;
                replies.extend_from_slice(&[IAC, WONT, option]);
            }
            _ => {}
        }
    }
}

/// Opens a Telnet connection. Login happens later, in the shell session.
pub async fn open(target: &ConnectTarget, connect_timeout: Duration) -> Result<Channel, SessionError> {
    let label = target.label();
    let address = (target.address.as_str(), target.port);
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await {
        Err(_) => {
            return Err(SessionError::Connect(format!(
                "{label}: TCP connect timed out after {} ms",
                connect_timeout.as_millis()
            )));
        }
        Ok(Err(e)) => return Err(SessionError::Connect(format!("{label}: {e}"))),
        Ok(Ok(stream)) => stream,
    };
    let _ = stream.set_nodelay(true);
    debug!("{} telnet TCP connection established", label);

    let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(QUEUE_DEPTH);
    let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(QUEUE_DEPTH);

    let task_label = label.clone();
    let io_task = tokio::spawn(async move {
        let (mut reader, mut writer) = stream.into_split();
        let mut filter = TelnetFilter::new();
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                data = receiver_from_user.recv() => {
                    let Some(data) = data else { break };
                    if let Err(e) = writer.write_all(data.as_bytes()).await {
                        debug!("{} failed to write to socket: {}", task_label, e);
                        break;
                    }
                },
                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            debug!("{} telnet peer closed the connection", task_label);
                            break;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            debug!("{} socket read failed: {}", task_label, e);
                            break;
                        }
                    };
                    let (text, replies) = filter.feed(&buf[..n]);
                    if !replies.is_empty() {
                        trace!("{} negotiation reply {:?}", task_label, replies);
                        if writer.write_all(&replies).await.is_err() {
                            break;
                        }
                    }
                    if !text.is_empty() && sender_to_user.send(text).await.is_err() {
                        debug!("{} output receiver dropped", task_label);
                        break;
                    }
                }
            }
        }
        let _ = writer.shutdown().await;
        debug!("{} telnet I/O task ended", task_label);
    });

    Ok(Channel::from_parts(
        label,
        sender_to_shell,
        receiver_from_shell,
        Link::Task(io_task),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let mut filter = TelnetFilter::new();
        let (text, replies) = filter.feed(b"User Access Verification\r\n\r\nUsername: ");
        assert_eq!(text, "User Access Verification\r\n\r\nUsername: ");
        assert!(replies.is_empty());
    }

    #[test]
    fn accepts_echo_and_sga_refuses_the_rest() {
        let mut filter = TelnetFilter::new();
        let input = [
            IAC, WILL, OPT_ECHO, IAC, WILL, OPT_SGA, IAC, DO, 24, IAC, WILL, 31, b'>',
        ];
        let (text, replies) = filter.feed(&input);
        assert_eq!(text, ">");
        assert_eq!(
            replies,
            vec![
                IAC, DO, OPT_ECHO, IAC, DO, OPT_SGA, IAC, WONT, 24, IAC, DONT, 31
            ]
        );
    }

    #[test]
    fn repeated_offers_are_answered_once() {
        let mut filter = TelnetFilter::new();
        let (_, first) = filter.feed(&[IAC, WILL, OPT_ECHO]);
        let (_, second) = filter.feed(&[IAC, WILL, OPT_ECHO]);
        assert_eq!(first.len(), 3);
        assert!(second.is_empty());
    }

    #[test]
    fn subnegotiation_is_skipped_across_reads() {
        let mut filter = TelnetFilter::new();
        let (first, _) = filter.feed(&[b'a', IAC, SB, 24, 1, 2]);
        let (second, _) = filter.feed(&[3, IAC, SE, b'b']);
        assert_eq!(first, "a");
        assert_eq!(second, "b");
    }

    #[test]
    fn escaped_iac_and_nul_padding() {
        let mut filter = TelnetFilter::new();
        let (text, _) = filter.feed(b"line\r\0next");
        assert_eq!(text, "line\rnext");
        let (bytes, _) = filter.feed(&[IAC, IAC]);
        assert_eq!(bytes, "\u{FFFD}");
    }

    #[test]
    fn split_utf8_sequence_is_reassembled() {
        let mut filter = TelnetFilter::new();
        let euro = "€".as_bytes();
        let (first, _) = filter.feed(&euro[..1]);
        let (second, _) = filter.feed(&euro[1..]);
        assert_eq!(first, "");
        assert_eq!(second, "€");
    }
}
