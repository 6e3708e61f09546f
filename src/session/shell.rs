use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::time::Instant;

use super::{CommandLog, CommandResult, ConnectionId, SessionState};
use crate::device::{Credentials, DeviceSnapshot, Protocol};
use crate::error::SessionError;
use crate::profile::{DeviceProfile, LineClass, PromptMode, clean_line};
use crate::transport::{Channel, ChannelError};

/// Timeouts and limits shared by every shell session.
#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub command_timeout: Duration,
    pub slow_command_timeout: Duration,
    /// Command prefixes that get `slow_command_timeout`.
    pub slow_commands: Vec<String>,
    pub login_timeout: Duration,
    /// Silence after which login sends one bare line terminator.
    pub nudge_after: Duration,
    pub history_limit: usize,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            slow_command_timeout: Duration::from_secs(60),
            slow_commands: default_slow_commands(),
            login_timeout: Duration::from_secs(30),
            nudge_after: Duration::from_secs(2),
            history_limit: 100,
        }
    }
}

/// Commands known to print for a long time on large devices.
pub fn default_slow_commands() -> Vec<String> {
    [
        "show running-config",
        "show startup-config",
        "show tech-support",
        "show logging",
        "show interfaces",
        "more ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl ShellSettings {
    /// Deadline for one command: explicit value, slow-command timeout, or the default.
    pub fn timeout_for(&self, command: &str, explicit: Option<Duration>) -> Duration {
        if let Some(timeout) = explicit {
            return timeout;
        }
        let command = command.trim().to_ascii_lowercase();
        if self
            .slow_commands
            .iter()
            .any(|prefix| command.starts_with(&prefix.to_ascii_lowercase()))
        {
            self.slow_command_timeout
        } else {
            self.command_timeout
        }
    }
}

/// A logged-in device CLI with command/response semantics.
pub struct ShellSession {
    id: ConnectionId,
    snapshot: DeviceSnapshot,
    channel: Channel,
    profile: DeviceProfile,
    prompt: String,
    hostname: Option<String>,
    mode: Option<PromptMode>,
    state: SessionState,
    degraded: bool,
    settings: Arc<ShellSettings>,
    history: CommandLog,
}

impl ShellSession {
    /// Wraps an open channel. The session stays `Connecting` until [`ShellSession::login`] succeeds.
    pub fn new(
        id: ConnectionId,
        snapshot: DeviceSnapshot,
        channel: Channel,
        profile: DeviceProfile,
        settings: Arc<ShellSettings>,
    ) -> Self {
        let history = CommandLog::new(settings.history_limit);
        Self {
            id,
            snapshot,
            channel,
            profile,
            prompt: String::new(),
            hostname: None,
            mode: None,
            state: SessionState::Connecting,
            degraded: false,
            settings,
            history,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last detected prompt, e.g. `Router1#`.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn mode(&self) -> Option<PromptMode> {
        self.mode
    }

    /// Whether the last command hit its deadline.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn history(&self) -> &CommandLog {
        &self.history
    }

    /// Whether the transport underneath has gone away.
    pub fn is_channel_closed(&self) -> bool {
        self.channel.is_closed()
    }

    fn terminator(&self) -> &'static str {
        self.snapshot.protocol.line_terminator()
    }

    fn label(&self) -> String {
        format!("{} {}", self.id, self.snapshot.label())
    }

    fn record_prompt(&mut self, prompt: String, mode: PromptMode) {
        if self.prompt != prompt {
            trace!("{} prompt is now {:?}", self.id, prompt);
        }
        self.hostname = self.profile.hostname(&prompt).or(self.hostname.take());
        self.mode = Some(mode);
        self.prompt = prompt;
    }

    /// Waits for the first device prompt, answering login challenges on Telnet.
    ///
    /// SSH devices have already authenticated the user in the transport, so only
    /// the prompt is awaited. If an enable password is supplied and the device
    /// lands in user mode, privileged mode is entered as part of the login.
    pub async fn login(&mut self, credentials: &Credentials, timeout: Duration) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::NotReady(self.state));
        }
        let deadline = Instant::now() + timeout;
        let answer_prompts = self.snapshot.protocol == Protocol::Telnet;
        let terminator = self.terminator();

        let mut buffer = String::new();
        let mut transcript = String::new();
        let mut sent_username = false;
        let mut sent_password = false;
        let mut nudged = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.handshake_timeout(&transcript));
            }
            let remaining = deadline - now;
            let wait = if nudged {
                remaining
            } else {
                remaining.min(self.settings.nudge_after)
            };

            match self.channel.read(wait).await {
                Ok(data) => {
                    trace!("{:?}", data);
                    buffer.push_str(&data);
                    transcript.push_str(&data);
                }
                Err(ChannelError::Timeout) => {
                    if !nudged && transcript.is_empty() && Instant::now() < deadline {
                        debug!("{} no output yet, sending a bare line terminator", self.label());
                        self.login_write(terminator, false).await?;
                    }
                    nudged = true;
                    continue;
                }
                Err(ChannelError::Closed) => {
                    self.state = SessionState::Closed;
                    return Err(closed_during_login(
                        &self.label(),
                        sent_username || sent_password,
                    ));
                }
            }

            while let Some(pos) = buffer.find('\n') {
                let raw: String = buffer.drain(..=pos).collect();
                let line = clean_line(&self.profile, &raw);
                if self.profile.classify(&line) == LineClass::LoginFailed {
                    debug!("{} login rejected: {}", self.label(), line);
                    return Err(SessionError::Auth(line.trim().to_string()));
                }
            }
            if buffer.is_empty() {
                continue;
            }

            let tail = clean_line(&self.profile, &buffer).into_owned();
            match self.profile.classify(&tail) {
                LineClass::Prompt(mode) => {
                    self.record_prompt(tail, mode);
                    break;
                }
                LineClass::LoginFailed => {
                    return Err(SessionError::Auth(tail.trim().to_string()));
                }
                LineClass::Username if answer_prompts => {
                    if sent_username {
                        return Err(SessionError::Auth(
                            "device asked for the username again".to_string(),
                        ));
                    }
                    sent_username = true;
                    buffer.clear();
                    let line = format!("{}{}", credentials.username, terminator);
                    self.login_write(&line, false).await?;
                }
                LineClass::Password if answer_prompts => {
                    if sent_password {
                        return Err(SessionError::Auth("password rejected".to_string()));
                    }
                    sent_password = true;
                    buffer.clear();
                    let line = format!("{}{}", credentials.password, terminator);
                    self.login_write(&line, sent_username).await?;
                }
                _ => {}
            }
        }

        if let Some(secret) = credentials.enable_password.as_deref()
            && self.mode == Some(PromptMode::User)
        {
            self.enable(secret, deadline).await?;
        }

        self.state = SessionState::Ready;
        debug!("{} ready at prompt {:?}", self.label(), self.prompt);
        Ok(())
    }

    async fn login_write(&mut self, data: &str, credentials_sent: bool) -> Result<(), SessionError> {
        match self.channel.write(data).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.state = SessionState::Closed;
                Err(closed_during_login(&self.label(), credentials_sent))
            }
        }
    }

    fn handshake_timeout(&self, transcript: &str) -> SessionError {
        let seen = transcript.trim();
        SessionError::HandshakeTimeout(if seen.is_empty() {
            format!("{}: no prompt received", self.snapshot.label())
        } else {
            format!(
                "{}: no prompt matched in {:?}",
                self.snapshot.label(),
                tail_of(seen, 200)
            )
        })
    }

    /// Moves from user to privileged mode.
    async fn enable(&mut self, secret: &str, deadline: Instant) -> Result<(), SessionError> {
        let terminator = self.terminator();
        self.channel.drain();
        let command = format!("enable{terminator}");
        self.login_write(&command, true).await?;

        let mut buffer = String::new();
        let mut transcript = String::new();
        let mut sent_secret = false;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.handshake_timeout(&transcript));
            }
            match self.channel.read(deadline - now).await {
                Ok(data) => {
                    buffer.push_str(&data);
                    transcript.push_str(&data);
                }
                Err(ChannelError::Timeout) => continue,
                Err(ChannelError::Closed) => {
                    self.state = SessionState::Closed;
                    return Err(closed_during_login(&self.label(), true));
                }
            }

            while let Some(pos) = buffer.find('\n') {
                let raw: String = buffer.drain(..=pos).collect();
                let line = clean_line(&self.profile, &raw);
                if matches!(
                    self.profile.classify(&line),
                    LineClass::LoginFailed | LineClass::Error
                ) {
                    return Err(SessionError::Auth(format!(
                        "enable refused: {}",
                        line.trim()
                    )));
                }
            }
            if buffer.is_empty() {
                continue;
            }

            let tail = clean_line(&self.profile, &buffer).into_owned();
            match self.profile.classify(&tail) {
                LineClass::Password => {
                    if sent_secret {
                        return Err(SessionError::Auth("enable password rejected".to_string()));
                    }
                    sent_secret = true;
                    buffer.clear();
                    let line = format!("{secret}{terminator}");
                    self.login_write(&line, true).await?;
                }
                LineClass::Prompt(PromptMode::User) => {
                    return Err(SessionError::Auth("enable password rejected".to_string()));
                }
                LineClass::Prompt(mode) => {
                    self.record_prompt(tail, mode);
                    debug!("{} entered privileged mode", self.label());
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    /// Runs one command and collects its output up to the next prompt.
    ///
    /// A deadline miss is not an error here: the partial output comes back with
    /// `truncated` set and the session is flagged degraded. A dead channel moves
    /// the session to `Closed`.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, SessionError> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Closed => {
                return Err(SessionError::Closed(format!("{} is closed", self.id)));
            }
            other => return Err(SessionError::NotReady(other)),
        }

        let timeout = self.settings.timeout_for(command, timeout);
        let started = Instant::now();
        let deadline = started + timeout;

        let stale = self.channel.drain();
        if stale > 0 {
            trace!("{} dropped {} bytes of stale output", self.id, stale);
        }
        // After a missed deadline the device may still be printing the earlier
        // command. Output only counts once the echo of this command shows up.
        let mut synced = !self.degraded;
        if !synced && !self.resync(deadline).await? {
            return Ok(self.unsynced(command, started, timeout));
        }
        let line = format!("{}{}", command, self.terminator());
        if self.channel.write(&line).await.is_err() {
            return Err(self.mark_closed("write failed"));
        }

        let mut output = String::new();
        let mut buffer = String::new();
        let mut success = true;
        let mut truncated = false;
        let mut pages = 0u32;
        let mut prompt = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                truncated = true;
                break;
            }
            match self.channel.read(deadline - now).await {
                Ok(data) => {
                    trace!("{:?}", data);
                    buffer.push_str(&data);
                }
                Err(ChannelError::Timeout) => {
                    truncated = true;
                    break;
                }
                Err(ChannelError::Closed) => {
                    return Err(self.mark_closed("channel closed during command"));
                }
            }

            // Complete lines are output; the partial tail may be a pager or the prompt.
            while let Some(pos) = buffer.find('\n') {
                let raw: String = buffer.drain(..=pos).collect();
                let line = clean_line(&self.profile, &raw);
                if !synced {
                    if is_echo(&self.profile, &line, command) {
                        synced = true;
                    } else {
                        trace!("{} discarding late output {:?}", self.id, line);
                        continue;
                    }
                }
                if self.profile.classify(&line) == LineClass::Error {
                    success = false;
                }
                output.push_str(&line);
                output.push('\n');
            }
            if buffer.is_empty() {
                continue;
            }

            if self.profile.has_pager(&buffer) {
                buffer = self.profile.strip_pager(&buffer).into_owned();
                if synced {
                    pages += 1;
                    trace!("{} answering pager #{}", self.id, pages);
                }
                let continuation = self.profile.continuation().to_string();
                if self.channel.write(&continuation).await.is_err() {
                    return Err(self.mark_closed("write failed while paging"));
                }
                continue;
            }
            if !synced {
                continue;
            }

            let tail = clean_line(&self.profile, &buffer).into_owned();
            if let LineClass::Prompt(mode) = self.profile.classify(&tail) {
                prompt = Some(tail);
                buffer.clear();
                if let Some(p) = prompt.clone() {
                    self.record_prompt(p, mode);
                }
                break;
            }
        }

        if truncated {
            if synced {
                output.push_str(&clean_line(&self.profile, &buffer));
            }
            self.degraded = true;
            warn!(
                "{} command {:?} hit its {} ms deadline, returning partial output",
                self.label(),
                command,
                timeout.as_millis()
            );
        } else if self.degraded {
            debug!("{} prompt recovered, clearing degraded flag", self.id);
            self.degraded = false;
        }

        let content = strip_echo(&self.profile, &output, command);
        let content = if truncated {
            content
        } else {
            content.trim_end_matches(['\r', '\n'])
        };

        let result = CommandResult {
            command: command.to_string(),
            output: content.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            truncated,
            success,
            prompt,
            pages,
        };
        self.history.record(&result);
        Ok(result)
    }

    /// Sends a bare line terminator and discards input up to its echo.
    ///
    /// The echo is an empty line, or a line holding only a prompt when the
    /// earlier command did finish. Returns `false` if it never arrives before
    /// `deadline`.
    async fn resync(&mut self, deadline: Instant) -> Result<bool, SessionError> {
        debug!("{} resynchronising with the device", self.id);
        let terminator = self.terminator();
        if self.channel.write(terminator).await.is_err() {
            return Err(self.mark_closed("write failed"));
        }
        let mut buffer = String::new();
        let mut discarded = 0usize;
        let mut paged = false;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            match self.channel.read(deadline - now).await {
                Ok(data) => buffer.push_str(&data),
                Err(ChannelError::Timeout) => return Ok(false),
                Err(ChannelError::Closed) => {
                    return Err(self.mark_closed("channel closed while resynchronising"));
                }
            }
            while let Some(pos) = buffer.find('\n') {
                let raw: String = buffer.drain(..=pos).collect();
                let line = clean_line(&self.profile, &raw);
                let line = line.trim();
                if line.is_empty() || self.profile.prompt_mode(line).is_some() {
                    trace!("{} dropped {} bytes of late output", self.id, discarded);
                    return Ok(true);
                }
                discarded += raw.len();
            }
            if self.profile.has_pager(&buffer) {
                buffer.clear();
                paged = true;
                let continuation = self.profile.continuation().to_string();
                if self.channel.write(&continuation).await.is_err() {
                    return Err(self.mark_closed("write failed while paging"));
                }
            } else if paged
                && self
                    .profile
                    .prompt_mode(clean_line(&self.profile, &buffer).trim())
                    .is_some()
            {
                // A pager swallowed the terminator as a keypress.
                paged = false;
                buffer.clear();
                if self.channel.write(terminator).await.is_err() {
                    return Err(self.mark_closed("write failed"));
                }
            }
        }
    }

    /// Result for a command that was never sent because the device did not settle.
    fn unsynced(&mut self, command: &str, started: Instant, timeout: Duration) -> CommandResult {
        warn!(
            "{} device still busy after {} ms, {:?} was not sent",
            self.label(),
            timeout.as_millis(),
            command
        );
        let result = CommandResult {
            command: command.to_string(),
            output: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            truncated: true,
            success: false,
            prompt: None,
            pages: 0,
        };
        self.history.record(&result);
        result
    }

    fn mark_closed(&mut self, reason: &str) -> SessionError {
        self.state = SessionState::Closed;
        warn!("{} {}, session closed", self.label(), reason);
        SessionError::Closed(format!("{}: {}", self.id, reason))
    }

    /// Leaves the device CLI and tears the channel down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Ready && !self.channel.is_closed() {
            let exit = format!("exit{}", self.terminator());
            if let Err(e) = self.channel.write(&exit).await {
                debug!("{} failed to send exit: {}", self.id, e);
            } else {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        self.state = SessionState::Closed;
        self.channel.close().await;
    }
}

fn closed_during_login(label: &str, credentials_sent: bool) -> SessionError {
    if credentials_sent {
        SessionError::Auth(format!("{label}: connection closed after credentials were sent"))
    } else {
        SessionError::Connect(format!("{label}: connection closed during login"))
    }
}

/// Whether `line` is the device echoing `command`, with or without the prompt in front.
fn is_echo(profile: &DeviceProfile, line: &str, command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() {
        return line.trim().is_empty() || profile.prompt_mode(line.trim()).is_some();
    }
    match line.trim_end().strip_suffix(command) {
        Some("") => true,
        Some(prefix) => profile.prompt_mode(prefix).is_some(),
        None => false,
    }
}

/// Removes the echoed command from the first line of `output`.
fn strip_echo<'a>(profile: &DeviceProfile, output: &'a str, command: &str) -> &'a str {
    if command.trim().is_empty() {
        return output;
    }
    let end = output.find('\n').map(|p| p + 1).unwrap_or(output.len());
    if is_echo(profile, &output[..end], command) {
        &output[end..]
    } else {
        output
    }
}

fn tail_of(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
