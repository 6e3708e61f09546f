//! Simulated devices.
//!
//! A [`SimulatedDevice`] speaks a small Cisco-like CLI over an in-process
//! [`Channel`]: login prompts, user/privileged/config modes, command echo,
//! pagination and `% Invalid input` errors. [`SimulatedConnector`] hands them
//! out in place of real SSH/Telnet connections, which is what `--simulate`
//! mode and the test-suite run against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use log::debug;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::Instant;

use crate::device::{Credentials, Protocol};
use crate::error::SessionError;
use crate::profile::PromptMode;
use crate::transport::{Channel, ConnectTarget, Connector, Link};

pub const IOS_SHOW_VERSION: &str = r#"Cisco IOS Software, C2600 Software (C2600-IPBASE-M), Version 12.4(25d), RELEASE SOFTWARE (fc1)
Technical Support: http://www.cisco.com/techsupport
Copyright (c) 1986-2010 by Cisco Systems, Inc.
Compiled Wed 18-Aug-10 10:49 by prod_rel_team

ROM: System Bootstrap, Version 12.2(8r) [fcz 8r], RELEASE SOFTWARE (fc1)

{host} uptime is 2 days, 5 hours, 37 minutes
System returned to ROM by power-on
System image file is "flash:c2600-ipbase-mz.124-25d.bin"
"#;

pub const IOS_SHOW_INTERFACES: &str = r#"FastEthernet0/0 is up, line protocol is up
  Hardware is AmdFE, address is 0001.42c3.f401 (bia 0001.42c3.f401)
  Internet address is 192.168.1.1/24
  MTU 1500 bytes, BW 100000 Kbit/sec, DLY 100 usec,
     reliability 255/255, txload 1/255, rxload 1/255
  Encapsulation ARPA, loopback not set
  Keepalive set (10 sec)
  Full-duplex, 100Mb/s, 100BaseTX/FX
  ARP type: ARPA, ARP Timeout 04:00:00
  Last input 00:00:08, output 00:00:05, output hang never
  Last clearing of "show interface" counters never
"#;

pub const IOS_SHOW_IP_INTERFACE_BRIEF: &str = r#"Interface                  IP-Address      OK? Method Status                Protocol
FastEthernet0/0            192.168.1.1     YES NVRAM  up                    up
FastEthernet0/1            unassigned      YES NVRAM  administratively down down
Serial0/0                  unassigned      YES NVRAM  administratively down down
Serial0/1                  unassigned      YES NVRAM  administratively down down
Loopback0                  10.1.1.1        YES NVRAM  up                    up
"#;

pub const IOS_SHOW_RUNNING_CONFIG: &str = r#"Building configuration...

Current configuration : 1112 bytes
!
version 12.4
service timestamps debug datetime msec
service timestamps log datetime msec
no service password-encryption
!
hostname {host}
!
boot-start-marker
boot-end-marker
!
enable secret 5 $1$rE8r$jL0Y3DAqz1M.hBBbV0lgg.
!
no aaa new-model
memory-size iomem 5
!
ip cef
!
username admin privilege 15 secret 5 $1$mERr$hx5rVt7rPNoS4wqbXKX7m0
!
interface FastEthernet0/0
 description LAN Interface
 ip address 192.168.1.1 255.255.255.0
 duplex auto
 speed auto
!
interface Serial0/0
 no ip address
 shutdown
!
ip route 0.0.0.0 0.0.0.0 FastEthernet0/0
!
access-list 101 permit ip any any
!
line con 0
line aux 0
line vty 0 4
 password cisco
 login
!
end
"#;

pub const ASA_SHOW_VERSION: &str = r#"
Cisco Adaptive Security Appliance Software Version 9.8(4)32
Firepower Extensible Operating System Version 2.2(2.121)
Device Manager Version 7.12(2)

Compiled on Wed 22-Jan-20 11:57 PST by builders
System image file is "disk0:/asa984-32-lfbff-k8.SPA"
Config file at boot was "startup-config"

{host} up 14 days 3 hours

Hardware:   ASA5516, 8192 MB RAM, CPU Atom C2000 series 2416 MHz, 1 CPU (8 cores)
"#;

pub const ASA_SHOW_INTERFACE_IP_BRIEF: &str = r#"Interface                  IP-Address      OK? Method Status                Protocol
GigabitEthernet1/1         203.0.113.1     YES CONFIG up                    up
GigabitEthernet1/2         10.10.0.1       YES CONFIG up                    up
GigabitEthernet1/3         unassigned      YES unset  administratively down down
Management1/1              192.168.100.1   YES CONFIG up                    up
"#;

pub const ASA_SHOW_RUNNING_CONFIG: &str = r#": Saved
:
ASA Version 9.8(4)32
!
hostname {host}
enable password ***** pbkdf2
names
!
interface GigabitEthernet1/1
 nameif outside
 security-level 0
 ip address 203.0.113.1 255.255.255.0
!
interface GigabitEthernet1/2
 nameif inside
 security-level 100
 ip address 10.10.0.1 255.255.255.0
!
access-list OUTSIDE_IN extended permit tcp any host 203.0.113.10 eq https
route outside 0.0.0.0 0.0.0.0 203.0.113.254 1
username admin password ***** pbkdf2 privilege 15
: end
"#;

const IOS_PAGER: &str = " --More-- ";
const IOS_ERASE: &str =
    "\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}        \u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}\u{8}";
const ASA_PAGER: &str = "<--- More --->";
const ASA_ERASE: &str = "\r              \r";

/// Commands that only work in privileged mode.
const PRIVILEGED_ONLY: &[&str] = &["show running-config", "show startup-config"];

/// A scripted device CLI.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    hostname: String,
    credentials: Option<(String, String)>,
    enable_secret: Option<String>,
    login_prompt: bool,
    privileged: bool,
    outputs: HashMap<String, String>,
    pager: &'static str,
    erase: &'static str,
    page_lines: Option<usize>,
    response_delay: Duration,
    hang_on: Vec<String>,
    drop_on: Vec<String>,
    silent: bool,
    wait_for_return: bool,
    drop_on_connect: bool,
    hang_up_after: Option<Duration>,
}

enum Flow {
    Prompt,
    Quiet,
    Hangup,
}

impl SimulatedDevice {
    fn base(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            credentials: None,
            enable_secret: None,
            login_prompt: false,
            privileged: false,
            outputs: HashMap::new(),
            pager: IOS_PAGER,
            erase: IOS_ERASE,
            page_lines: None,
            response_delay: Duration::ZERO,
            hang_on: Vec::new(),
            drop_on: Vec::new(),
            silent: false,
            wait_for_return: false,
            drop_on_connect: false,
            hang_up_after: None,
        }
    }

    /// An IOS router answering `show version`, `show interfaces`,
    /// `show ip interface brief`, `show running-config` and `show clock`.
    pub fn cisco_router(hostname: &str) -> Self {
        Self::base(hostname)
            .with_output("show version", &IOS_SHOW_VERSION.replace("{host}", hostname))
            .with_output("show interfaces", IOS_SHOW_INTERFACES)
            .with_output("show ip interface brief", IOS_SHOW_IP_INTERFACE_BRIEF)
            .with_output(
                "show running-config",
                &IOS_SHOW_RUNNING_CONFIG.replace("{host}", hostname),
            )
            .with_output("show clock", "*09:15:02.123 UTC Sun Oct 18 2026")
    }

    /// An ASA firewall with its own pager and interface table.
    pub fn cisco_asa(hostname: &str) -> Self {
        let mut device = Self::base(hostname)
            .with_output("show version", &ASA_SHOW_VERSION.replace("{host}", hostname))
            .with_output("show interface ip brief", ASA_SHOW_INTERFACE_IP_BRIEF)
            .with_output(
                "show running-config",
                &ASA_SHOW_RUNNING_CONFIG.replace("{host}", hostname),
            )
            .with_output("show clock", "09:15:02.123 UTC Sun Oct 18 2026");
        device.pager = ASA_PAGER;
        device.erase = ASA_ERASE;
        device
    }

    /// Only these credentials are accepted. Without this any login succeeds.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn with_enable_secret(mut self, secret: &str) -> Self {
        self.enable_secret = Some(secret.to_string());
        self
    }

    /// Asks for username and password in-band, the way Telnet devices do.
    pub fn with_login_prompt(mut self) -> Self {
        self.login_prompt = true;
        self
    }

    /// Lands directly in privileged mode after login.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_output(mut self, command: &str, output: &str) -> Self {
        self.outputs.insert(command.to_string(), output.to_string());
        self
    }

    /// Splits long output into pages of `lines` lines.
    pub fn with_paging(mut self, lines: usize) -> Self {
        self.page_lines = Some(lines.max(1));
        self
    }

    /// Waits before answering each command.
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Prints a first line for `command` and then never returns to the prompt.
    pub fn hang_on(mut self, command: &str) -> Self {
        self.hang_on.push(command.to_string());
        self
    }

    /// Drops the connection when `command` is entered.
    pub fn drop_on(mut self, command: &str) -> Self {
        self.drop_on.push(command.to_string());
        self
    }

    /// Never prints anything.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Stays quiet until the first RETURN.
    pub fn wait_for_return(mut self) -> Self {
        self.wait_for_return = true;
        self
    }

    /// Hangs up before printing anything.
    pub fn drop_on_connect(mut self) -> Self {
        self.drop_on_connect = true;
        self
    }

    /// Closes the connection `after` login without printing anything, the way an
    /// idle-timeout on the device or a dropped link looks from our side.
    pub fn hang_up_after(mut self, after: Duration) -> Self {
        self.hang_up_after = Some(after);
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Canned output for `command`, if the device knows it.
    pub fn output_for(&self, command: &str) -> Option<&str> {
        self.outputs.get(command).map(String::as_str)
    }

    /// Whether an SSH login with `credentials` would be accepted.
    pub fn accepts(&self, credentials: &Credentials) -> bool {
        match &self.credentials {
            None => true,
            Some((user, pass)) => *user == credentials.username && *pass == credentials.password,
        }
    }

    fn prompt(&self, mode: PromptMode) -> String {
        match mode {
            PromptMode::User => format!("{}>", self.hostname),
            PromptMode::Privileged => format!("{}#", self.hostname),
            PromptMode::Config => format!("{}(config)#", self.hostname),
        }
    }

    /// Starts the device on a fresh in-process channel.
    pub fn spawn(self, label: impl Into<String>) -> Channel {
        let (channel, to_user, from_user) = Channel::pair(label);
        let task = tokio::spawn(self.serve(from_user, to_user));
        channel.with_link(Link::Task(task))
    }

    /// Runs the CLI until the user side goes away or the device hangs up.
    pub async fn serve(self, from_user: Receiver<String>, to_user: Sender<String>) {
        let mut input = Input::new(from_user);
        let out = Output(to_user);

        if self.drop_on_connect {
            return;
        }
        if self.silent {
            while input.line().await.is_some() {}
            return;
        }
        if self.wait_for_return && input.line().await.is_none() {
            return;
        }
        if self.login_prompt && !self.login(&mut input, &out).await {
            return;
        }

        let mut mode = if self.privileged {
            PromptMode::Privileged
        } else {
            PromptMode::User
        };
        let mut paging = self.page_lines.is_some();
        if !out.send(format!("\r\n{}", self.prompt(mode))).await {
            return;
        }

        let hang_up_at = self.hang_up_after.map(|after| Instant::now() + after);
        loop {
            let line = match hang_up_at {
                Some(at) => match tokio::time::timeout_at(at, input.line()).await {
                    Ok(line) => line,
                    Err(_) => {
                        debug!("simulated device {} dropped the link", self.hostname);
                        return;
                    }
                },
                None => input.line().await,
            };
            let Some(line) = line else {
                return;
            };
            if !self.response_delay.is_zero() {
                tokio::time::sleep(self.response_delay).await;
            }
            if !out.send(format!("{line}\r\n")).await {
                return;
            }
            let flow = self
                .run(line.trim(), &mut mode, &mut paging, &mut input, &out)
                .await;
            match flow {
                Flow::Prompt => {
                    if !out.send(self.prompt(mode)).await {
                        return;
                    }
                }
                Flow::Quiet => {}
                Flow::Hangup => {
                    debug!("simulated device {} hung up", self.hostname);
                    return;
                }
            }
        }
    }

    async fn login(&self, input: &mut Input, out: &Output) -> bool {
        if !out.send("\r\n\r\nUser Access Verification\r\n\r\n".to_string()).await {
            return false;
        }
        for _ in 0..3 {
            if !out.send("Username: ".to_string()).await {
                return false;
            }
            let Some(username) = input.line().await else {
                return false;
            };
            if !out.send(format!("{username}\r\n")).await || !out.send("Password: ".to_string()).await {
                return false;
            }
            let Some(password) = input.line().await else {
                return false;
            };
            let accepted = self.accepts(&Credentials {
                username,
                password,
                enable_password: None,
            });
            if accepted {
                return true;
            }
            if !out.send("\r\n% Login invalid\r\n\r\n".to_string()).await {
                return false;
            }
        }
        let _ = out.send("% Bad passwords\r\n".to_string()).await;
        false
    }

    async fn run(
        &self,
        command: &str,
        mode: &mut PromptMode,
        paging: &mut bool,
        input: &mut Input,
        out: &Output,
    ) -> Flow {
        if command.is_empty() {
            return Flow::Prompt;
        }
        if self.drop_on.iter().any(|c| c == command) {
            return Flow::Hangup;
        }
        if self.hang_on.iter().any(|c| c == command) {
            let _ = out.send("Collecting data...\r\n".to_string()).await;
            return Flow::Quiet;
        }

        match command {
            "enable" => {
                if let Some(secret) = &self.enable_secret {
                    if !out.send("Password: ".to_string()).await {
                        return Flow::Hangup;
                    }
                    let Some(attempt) = input.line().await else {
                        return Flow::Hangup;
                    };
                    if attempt != *secret {
                        let _ = out.send("\r\n% Access denied\r\n\r\n".to_string()).await;
                        return Flow::Prompt;
                    }
                    let _ = out.send("\r\n".to_string()).await;
                }
                if *mode == PromptMode::User {
                    *mode = PromptMode::Privileged;
                }
                Flow::Prompt
            }
            "disable" => {
                *mode = PromptMode::User;
                Flow::Prompt
            }
            "configure terminal" | "conf t" | "config t" if *mode != PromptMode::User => {
                let _ = out
                    .send("Enter configuration commands, one per line.  End with CNTL/Z.\r\n".to_string())
                    .await;
                *mode = PromptMode::Config;
                Flow::Prompt
            }
            "end" if *mode == PromptMode::Config => {
                *mode = PromptMode::Privileged;
                Flow::Prompt
            }
            "exit" | "logout" | "quit" => {
                if *mode == PromptMode::Config {
                    *mode = PromptMode::Privileged;
                    Flow::Prompt
                } else {
                    Flow::Hangup
                }
            }
            "terminal length 0" | "terminal pager 0" => {
                *paging = false;
                Flow::Prompt
            }
            _ if *mode == PromptMode::Config => Flow::Prompt,
            _ => {
                let allowed = *mode != PromptMode::User || !PRIVILEGED_ONLY.contains(&command);
                match self.outputs.get(command) {
                    Some(text) if allowed => self.print(text, *paging, input, out).await,
                    _ => {
                        let marker = " ".repeat(self.prompt(*mode).len());
                        let text = format!(
                            "{marker}^\r\n% Invalid input detected at '^' marker.\r\n\r\n"
                        );
                        if out.send(text).await {
                            Flow::Prompt
                        } else {
                            Flow::Hangup
                        }
                    }
                }
            }
        }
    }

    async fn print(&self, text: &str, paging: bool, input: &mut Input, out: &Output) -> Flow {
        let lines: Vec<&str> = text.lines().collect();
        let page = match self.page_lines {
            Some(page) if paging => page,
            _ => lines.len().max(1),
        };
        let chunks: Vec<&[&str]> = lines.chunks(page).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let mut text = chunk.join("\r\n");
            text.push_str("\r\n");
            let last = i + 1 == chunks.len();
            if !last {
                text.push_str(self.pager);
            }
            if !out.send(text).await {
                return Flow::Hangup;
            }
            if last {
                break;
            }
            match input.key().await {
                None => return Flow::Hangup,
                Some('q') | Some('Q') => {
                    let _ = out.send("\r\n".to_string()).await;
                    break;
                }
                Some(_) => {
                    if !out.send(self.erase.to_string()).await {
                        return Flow::Hangup;
                    }
                }
            }
        }
        Flow::Prompt
    }
}

/// Line-oriented view of what the user typed.
struct Input {
    rx: Receiver<String>,
    pending: String,
}

impl Input {
    fn new(rx: Receiver<String>) -> Self {
        Self {
            rx,
            pending: String::new(),
        }
    }

    async fn line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.find('\n') {
                let line: String = self.pending.drain(..=pos).collect();
                return Some(line.trim_end_matches(['\r', '\n']).to_string());
            }
            let chunk = self.rx.recv().await?;
            self.pending.push_str(&chunk);
        }
    }

    async fn key(&mut self) -> Option<char> {
        loop {
            if let Some(c) = self.pending.chars().next() {
                self.pending.drain(..c.len_utf8());
                return Some(c);
            }
            let chunk = self.rx.recv().await?;
            self.pending.push_str(&chunk);
        }
    }
}

struct Output(Sender<String>);

impl Output {
    async fn send(&self, text: String) -> bool {
        self.0.send(text).await.is_ok()
    }
}

/// Connector that serves simulated devices instead of dialing out.
#[derive(Debug, Default)]
pub struct SimulatedConnector {
    devices: HashMap<String, SimulatedDevice>,
    fallback: Option<SimulatedDevice>,
    opened: AtomicUsize,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `device` for connections to `address`.
    pub fn with_device(mut self, address: &str, device: SimulatedDevice) -> Self {
        self.devices.insert(address.to_string(), device);
        self
    }

    /// Serves `device` for every address without a dedicated entry.
    pub fn with_fallback(mut self, device: SimulatedDevice) -> Self {
        self.fallback = Some(device);
        self
    }

    /// Every address answers as an IOS router that accepts any credentials.
    pub fn demo() -> Self {
        Self::new().with_fallback(SimulatedDevice::cisco_router("Router1"))
    }

    /// Number of channels handed out so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl Connector for SimulatedConnector {
    fn open<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, Result<Channel, SessionError>> {
        Box::pin(async move {
            let label = target.label();
            let Some(template) = self
                .devices
                .get(&target.address)
                .or(self.fallback.as_ref())
            else {
                return Err(SessionError::Connect(format!("{label}: connection refused")));
            };

            let mut device = template.clone();
            match target.protocol {
                Protocol::Ssh => {
                    if !device.accepts(&target.credentials) {
                        return Err(SessionError::Auth(format!("{label}: password rejected")));
                    }
                    device.login_prompt = false;
                }
                Protocol::Telnet => device.login_prompt = true,
            }
            self.opened.fetch_add(1, Ordering::Relaxed);
            debug!("{} simulated {} connection", label, target.protocol);
            Ok(device.spawn(label))
        })
    }
}
