//! # netgate - CLI session gateway for network devices
//!
//! `netgate` keeps many long-lived SSH and Telnet CLI sessions to routers,
//! switches and firewalls open at once, and exposes them to stateless callers
//! as a command/response API.
//!
//! ## Features
//!
//! - **Prompt-driven sessions**: login handshake, prompt detection and `--More--` pagination per vendor profile
//! - **Serialized access**: one command at a time per device, different devices in parallel
//! - **Idle reaping**: sessions nobody uses are closed, busy sessions are never interrupted
//! - **Typed failures**: unreachable, rejected credentials, timeouts with partial output, dropped sessions
//! - **Device facts**: version, interface counts and running configuration sections
//! - **Simulated devices**: a Cisco-like CLI for trying the API and for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use netgate::device::{Device, DeviceType, Protocol};
//! use netgate::dispatcher::Dispatcher;
//! use netgate::session::{RegistrySettings, SessionRegistry};
//! use netgate::transport::NetworkConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(SessionRegistry::new(
//!         Arc::new(NetworkConnector::default()),
//!         RegistrySettings::default(),
//!     ));
//!     registry.start_reaper();
//!     let dispatcher = Dispatcher::new(registry);
//!
//!     let device = Device::new("core-1", "192.0.2.1", DeviceType::Router, Protocol::Ssh)
//!         .with_credentials("admin", "secret");
//!     let id = dispatcher.connect(&device, None).await?;
//!
//!     let result = dispatcher.send_command(id, "show version", None).await?;
//!     println!("{}", result.output);
//!
//!     let info = dispatcher.device_info(id).await?;
//!     println!("{} interfaces, {} up", info.total_interfaces, info.interfaces_up);
//!
//!     dispatcher.disconnect(id).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`transport`] - SSH and Telnet channels
//! - [`profile`] - vendor prompt, pager and error patterns
//! - [`session::ShellSession`] - login, prompt detection, pagination and execute
//! - [`session::SessionRegistry`] - live sessions and idle reaping
//! - [`dispatcher::Dispatcher`] - the request facade
//! - [`parser`] - device facts from CLI output
//! - [`api`] - the HTTP surface
//! - [`error::SessionError`] - failure taxonomy

pub mod api;
pub mod cli;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod parser;
pub mod profile;
pub mod session;
pub mod sim;
pub mod transport;
