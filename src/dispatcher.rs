//! The entry point callers use.
//!
//! [`Dispatcher`] turns request-style calls into registry and session
//! operations. It serializes commands per session through the session lock and
//! evicts sessions whose channel died, so the next call sees
//! [`SessionError::NotFound`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use schemars::JsonSchema;
use serde::Serialize;

use crate::device::{Device, Protocol};
use crate::error::SessionError;
use crate::parser::{self, DeviceInfo, RunningConfig};
use crate::session::{CommandRecord, CommandResult, ConnectionId, SessionRegistry, SessionSummary};

/// `show running-config` output and what could be extracted from it.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RunningConfigReport {
    pub output: String,
    /// False when the device refused the command, typically outside privileged mode.
    pub success: bool,
    pub config: Option<RunningConfig>,
}

/// Request facade over the [`SessionRegistry`].
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Opens and logs into a new session. `protocol` defaults to the device's own.
    pub async fn connect(&self, device: &Device, protocol: Option<Protocol>) -> Result<ConnectionId, SessionError> {
        let protocol = protocol.unwrap_or(device.protocol);
        let id = self.registry.create(device, protocol).await?;
        debug!("{} connected to {} over {}", id, device.name, protocol);
        Ok(id)
    }

    /// Runs one command on a session.
    ///
    /// Commands on the same session run one at a time in arrival order. A
    /// deadline miss comes back as [`SessionError::Timeout`] with the partial
    /// output; the session stays usable. Nothing is retried.
    pub async fn send_command(
        &self,
        id: ConnectionId,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, SessionError> {
        let command = command.trim_end_matches(['\r', '\n']);
        if command.contains(['\r', '\n']) {
            return Err(SessionError::InvalidRequest(
                "command must be a single line".to_string(),
            ));
        }

        let handle = self.registry.get(id).await?;
        let mut session = handle.lock().await;
        // Disconnected or reaped while we waited for the lock.
        if handle.is_closed() {
            return Err(SessionError::NotFound(id));
        }

        handle.touch();
        let outcome = session.execute(command, timeout).await;
        handle.touch();

        match outcome {
            Ok(result) if result.truncated => Err(SessionError::Timeout { partial: result }),
            Ok(result) => {
                debug!("{} {:?} done in {} ms", id, command, result.duration_ms);
                Ok(result)
            }
            Err(err) => {
                if err.is_fatal_to_session() {
                    session.close().await;
                    drop(session);
                    self.registry.discard(&handle).await;
                }
                Err(err)
            }
        }
    }

    /// Closes a session. Unknown ids are fine.
    pub async fn disconnect(&self, id: ConnectionId) {
        if self.registry.remove(id).await {
            debug!("{} disconnected", id);
        }
    }

    /// Version and interface counts, using the session profile's commands.
    ///
    /// Command failures propagate; unparseable output is reported as `unknown` / `0`.
    pub async fn device_info(&self, id: ConnectionId) -> Result<DeviceInfo, SessionError> {
        let handle = self.registry.get(id).await?;
        let (version_command, interfaces_command) = {
            let session = handle.lock().await;
            let profile = session.profile();
            (
                profile.version_command().to_string(),
                profile.interfaces_command().to_string(),
            )
        };

        let version = self.send_command(id, &version_command, None).await?;
        let interfaces = self.send_command(id, &interfaces_command, None).await?;

        let mut info = match parser::parse(&version.output, &interfaces.output) {
            Ok(info) => info,
            Err(err) => {
                warn!("{} device info incomplete: {}", id, err);
                parser::parse_lenient(&version.output, &interfaces.output)
            }
        };

        let snapshot = handle.snapshot();
        info.name = Some(snapshot.name.clone());
        info.device_type = Some(snapshot.device_type);
        info.model = snapshot.model.clone().or_else(|| info.hardware.clone());
        info.hostname = handle.lock().await.hostname().map(str::to_string);
        Ok(info)
    }

    /// Fetches and splits the running configuration.
    pub async fn running_config(&self, id: ConnectionId) -> Result<RunningConfigReport, SessionError> {
        let handle = self.registry.get(id).await?;
        let command = handle.lock().await.profile().running_config_command().to_string();
        let result = self.send_command(id, &command, None).await?;

        let config = if result.success {
            match parser::parse_running_config(&result.output) {
                Ok(config) => Some(config),
                Err(err) => {
                    warn!("{} running config not parsed: {}", id, err);
                    None
                }
            }
        } else {
            None
        };
        Ok(RunningConfigReport {
            output: result.output,
            success: result.success,
            config,
        })
    }

    /// Commands run on a session so far, oldest first.
    pub async fn history(&self, id: ConnectionId) -> Result<Vec<CommandRecord>, SessionError> {
        let handle = self.registry.get(id).await?;
        Ok(handle.history().entries())
    }

    pub fn connections(&self) -> Vec<SessionSummary> {
        self.registry.list()
    }

    /// Closes every session.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use crate::session::{RegistrySettings, ShellSettings};
    use crate::sim::{SimulatedConnector, SimulatedDevice};

    fn dispatcher(connector: SimulatedConnector, idle: Duration) -> Dispatcher {
        let settings = RegistrySettings {
            idle_timeout: idle,
            reap_interval: Duration::from_millis(50),
            shell: Arc::new(ShellSettings {
                command_timeout: Duration::from_secs(1),
                slow_command_timeout: Duration::from_secs(1),
                login_timeout: Duration::from_secs(2),
                nudge_after: Duration::from_millis(200),
                ..ShellSettings::default()
            }),
        };
        Dispatcher::new(Arc::new(SessionRegistry::new(Arc::new(connector), settings)))
    }

    fn lab() -> SimulatedConnector {
        SimulatedConnector::new()
            .with_device(
                "10.0.0.1",
                SimulatedDevice::cisco_router("R1").with_credentials("admin", "cisco"),
            )
            .with_device(
                "10.0.0.2",
                SimulatedDevice::cisco_router("R2")
                    .with_enable_secret("class")
                    .with_paging(4),
            )
            .with_device("10.0.0.3", SimulatedDevice::cisco_asa("fw1").privileged())
            .with_device(
                "10.0.0.4",
                SimulatedDevice::cisco_router("R4").hang_up_after(Duration::from_millis(100)),
            )
            .with_device(
                "10.0.0.5",
                SimulatedDevice::cisco_router("R5")
                    .with_response_delay(Duration::from_millis(50))
                    .hang_on("debug all"),
            )
    }

    fn r1() -> Device {
        Device::new("R1", "10.0.0.1", DeviceType::Router, Protocol::Ssh).with_credentials("admin", "cisco")
    }

    fn device(name: &str, address: &str, device_type: DeviceType) -> Device {
        Device::new(name, address, device_type, Protocol::Ssh).with_credentials("admin", "cisco")
    }

    #[tokio::test]
    async fn connect_then_disconnect_leaves_no_entry() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        for protocol in [Protocol::Ssh, Protocol::Telnet] {
            let id = dispatcher.connect(&r1(), Some(protocol)).await.expect("connects");
            assert!(dispatcher.registry().contains(id));
            dispatcher.disconnect(id).await;
            assert!(!dispatcher.registry().contains(id));
        }
        assert!(dispatcher.connections().is_empty());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher.connect(&r1(), None).await.expect("connects");
        dispatcher.disconnect(id).await;
        dispatcher.disconnect(id).await;
        dispatcher.disconnect(ConnectionId::from_raw(u64::MAX)).await;
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let missing = ConnectionId::from_raw(u64::MAX - 1);
        let err = dispatcher
            .send_command(missing, "show clock", None)
            .await
            .expect_err("unknown id");
        assert!(matches!(err, SessionError::NotFound(id) if id == missing));
        assert!(matches!(
            dispatcher.device_info(missing).await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            dispatcher.history(missing).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bad_credentials_are_auth_errors() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let bad = r1().with_credentials("admin", "wrong");
        let err = dispatcher.connect(&bad, None).await.expect_err("rejected");
        assert!(matches!(err, SessionError::Auth(_)));
        assert!(dispatcher.connections().is_empty());
    }

    #[tokio::test]
    async fn multi_line_commands_are_rejected() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher.connect(&r1(), None).await.expect("connects");
        let err = dispatcher
            .send_command(id, "show clock\nreload", None)
            .await
            .expect_err("two lines");
        assert!(matches!(err, SessionError::InvalidRequest(_)));

        let ok = dispatcher
            .send_command(id, "show clock\r\n", None)
            .await
            .expect("trailing newline is trimmed");
        assert!(ok.output.contains("UTC"));
    }

    #[tokio::test]
    async fn concurrent_commands_never_interleave() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher
            .connect(&device("R5", "10.0.0.5", DeviceType::Router), None)
            .await
            .expect("connects");

        let (version, brief) = tokio::join!(
            dispatcher.send_command(id, "show version", None),
            dispatcher.send_command(id, "show ip interface brief", None),
        );
        let version = version.expect("version");
        let brief = brief.expect("brief");

        assert!(version.output.contains("Cisco IOS Software"));
        assert!(!version.output.contains("Interface"));
        assert!(!version.output.contains("show ip interface brief"));
        assert!(brief.output.contains("FastEthernet0/0"));
        assert!(!brief.output.contains("Cisco IOS Software"));
        assert!(!brief.output.contains("show version"));
    }

    #[tokio::test]
    async fn idle_sessions_are_reaped_then_not_found() {
        let dispatcher = dispatcher(lab(), Duration::from_millis(100));
        let id = dispatcher.connect(&r1(), None).await.expect("connects");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dispatcher.registry().reap_idle().await, vec![id]);

        let err = dispatcher
            .send_command(id, "show clock", None)
            .await
            .expect_err("reaped");
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn paginated_output_is_one_string() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let device = device("R2", "10.0.0.2", DeviceType::Router).with_enable_password("class");
        let id = dispatcher.connect(&device, None).await.expect("connects");

        let result = dispatcher
            .send_command(id, "show running-config", None)
            .await
            .expect("runs");
        assert!(result.pages > 1);
        assert!(!result.output.contains("More"));
        assert!(result.output.contains("hostname R2"));
        assert!(result.output.contains("interface Serial0/0\n no ip address\n shutdown"));
        assert!(result.output.trim_end().ends_with("end"));
    }

    #[tokio::test]
    async fn version_then_device_info() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher.connect(&r1(), None).await.expect("connects");

        let version = dispatcher
            .send_command(id, "show version", None)
            .await
            .expect("runs");
        assert!(version.output.contains("Version 12.4(25d)"));

        let info = dispatcher.device_info(id).await.expect("device info");
        assert_eq!(info.ios_version, "12.4(25d)");
        assert_eq!(info.total_interfaces, 5);
        assert_eq!(info.interfaces_up, 2);
        assert!(info.interfaces_up <= info.total_interfaces);
        assert_eq!(info.name.as_deref(), Some("R1"));
        assert_eq!(info.device_type, Some(DeviceType::Router));
        assert_eq!(info.hostname.as_deref(), Some("R1"));

        let history = dispatcher.history(id).await.expect("history");
        let commands: Vec<&str> = history.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(
            commands,
            vec!["show version", "show version", "show ip interface brief"]
        );
    }

    #[tokio::test]
    async fn firewall_device_info_uses_asa_commands() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher
            .connect(&device("fw1", "10.0.0.3", DeviceType::Firewall), None)
            .await
            .expect("connects");
        let info = dispatcher.device_info(id).await.expect("device info");
        assert_eq!(info.ios_version, "9.8(4)32");
        assert_eq!(info.total_interfaces, 4);
        assert_eq!(info.interfaces_up, 3);
        assert_eq!(info.model.as_deref(), Some("ASA5516"));
    }

    #[tokio::test]
    async fn unparseable_output_degrades_to_defaults() {
        let connector = SimulatedConnector::new().with_device(
            "10.0.0.9",
            SimulatedDevice::cisco_router("R9")
                .with_output("show version", "firmware build 7")
                .with_output("show ip interface brief", "no interfaces"),
        );
        let dispatcher = dispatcher(connector, Duration::from_secs(60));
        let id = dispatcher
            .connect(&device("R9", "10.0.0.9", DeviceType::Router), None)
            .await
            .expect("connects");
        let info = dispatcher.device_info(id).await.expect("still succeeds");
        assert_eq!(info.ios_version, parser::UNKNOWN);
        assert_eq!(info.total_interfaces, 0);
        assert_eq!(info.interfaces_up, 0);
    }

    #[tokio::test]
    async fn timeout_keeps_session_and_returns_partial_output() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher
            .connect(&device("R5", "10.0.0.5", DeviceType::Router), None)
            .await
            .expect("connects");

        let err = dispatcher
            .send_command(id, "debug all", Some(Duration::from_millis(300)))
            .await
            .expect_err("never returns to the prompt");
        match err {
            SessionError::Timeout { partial } => {
                assert!(partial.truncated);
                assert!(partial.output.contains("Collecting data"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(dispatcher.registry().contains(id));
        assert!(dispatcher.connections()[0].degraded);
    }

    #[tokio::test]
    async fn silently_dropped_transport_is_closed_then_not_found() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher
            .connect(&device("R4", "10.0.0.4", DeviceType::Router), None)
            .await
            .expect("connects");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = dispatcher
            .send_command(id, "show clock", None)
            .await
            .expect_err("link is gone");
        assert!(matches!(err, SessionError::Closed(_)));

        let err = dispatcher
            .send_command(id, "show clock", None)
            .await
            .expect_err("evicted");
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn running_config_needs_privileged_mode() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let id = dispatcher.connect(&r1(), None).await.expect("connects");
        let report = dispatcher.running_config(id).await.expect("runs");
        assert!(!report.success);
        assert!(report.config.is_none());

        let device = device("R2", "10.0.0.2", DeviceType::Router).with_enable_password("class");
        let id = dispatcher.connect(&device, None).await.expect("connects");
        let report = dispatcher.running_config(id).await.expect("runs");
        assert!(report.success);
        let config = report.config.expect("parsed");
        assert_eq!(config.hostname.as_deref(), Some("R2"));
        assert_eq!(config.users[0].privilege, Some(15));
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let dispatcher = dispatcher(lab(), Duration::from_secs(60));
        let a = dispatcher.connect(&r1(), None).await.expect("connects");
        let b = dispatcher
            .connect(&device("fw1", "10.0.0.3", DeviceType::Firewall), None)
            .await
            .expect("connects");
        assert_eq!(dispatcher.connections().len(), 2);

        dispatcher.shutdown().await;
        assert!(dispatcher.connections().is_empty());
        for id in [a, b] {
            assert!(matches!(
                dispatcher.send_command(id, "show clock", None).await,
                Err(SessionError::NotFound(_))
            ));
        }
    }
}
