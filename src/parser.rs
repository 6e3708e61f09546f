//! Extraction of device facts from CLI output.
//!
//! Every function here is pure. Output formats drift between OS releases, so
//! callers treat [`SessionError::Parse`] as a soft failure and fall back to
//! [`parse_lenient`].

use std::collections::BTreeMap;

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::DeviceType;
use crate::error::SessionError;

/// Placeholder used when the version cannot be determined.
pub const UNKNOWN: &str = "unknown";

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid parser regex {pattern:?}: {err}"),
    }
}

static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // NX-OS: "  NXOS: version 9.3(8)" / "  system:    version 7.0(3)I7(4)"
        compile(r"(?m)^\s*(?:NXOS|system):\s+version\s+(\S+)"),
        compile(r"(?m)^Junos:\s+(\S+)"),
        compile(r"\bVersion\s+([^,\s]+)"),
    ]
});
static UPTIME: Lazy<Regex> = Lazy::new(|| compile(r"(?m)\buptime is (.+?)\s*$"));
static ASA_UPTIME: Lazy<Regex> = Lazy::new(|| compile(r"(?m)^\S+ up (\d.*?)\s*$"));
static SYSTEM_IMAGE: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?m)System image file is "?([^"\r\n]+?)"?\s*$"#));
static HARDWARE: Lazy<Regex> = Lazy::new(|| compile(r"(?m)^Hardware:\s*([^,\r\n]+)"));
static IOS_PLATFORM: Lazy<Regex> =
    Lazy::new(|| compile(r"(?m)^[Cc]isco (\S+) \(.*\) processor"));
static DETAIL_HEADER: Lazy<Regex> = Lazy::new(|| {
    compile(r"^(\S+) is (administratively down|up|down|deleted)(?:, line protocol is (\S+))?")
});

/// Facts from `show version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VersionInfo {
    pub version: Option<String>,
    pub uptime: Option<String>,
    pub system_image: Option<String>,
    pub hardware: Option<String>,
}

/// One row of an interface listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceStatus {
    pub name: String,
    pub ip_address: Option<String>,
    /// `up`, `down` or `administratively down`.
    pub status: String,
    pub protocol: Option<String>,
}

impl InterfaceStatus {
    pub fn is_up(&self) -> bool {
        self.status == "up"
    }
}

/// Aggregated interface listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceSummary {
    pub total: u32,
    pub up: u32,
    pub interfaces: Vec<InterfaceStatus>,
}

/// What `GET /device_info` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceInfo {
    pub ios_version: String,
    pub total_interfaces: u32,
    pub interfaces_up: u32,
    pub name: Option<String>,
    pub device_type: Option<DeviceType>,
    pub model: Option<String>,
    pub hostname: Option<String>,
    pub uptime: Option<String>,
    pub system_image: Option<String>,
    pub hardware: Option<String>,
}

impl DeviceInfo {
    fn from_parts(version: VersionInfo, interfaces: InterfaceSummary) -> Self {
        Self {
            ios_version: version.version.unwrap_or_else(|| UNKNOWN.to_string()),
            total_interfaces: interfaces.total,
            interfaces_up: interfaces.up,
            name: None,
            device_type: None,
            model: None,
            hostname: None,
            uptime: version.uptime,
            system_image: version.system_image,
            hardware: version.hardware,
        }
    }
}

/// Extracts version, uptime, system image and hardware from `show version`.
pub fn parse_version(output: &str) -> Result<VersionInfo, SessionError> {
    let version = VERSION_PATTERNS
        .iter()
        .find_map(|re| re.captures(output))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| SessionError::Parse("no version banner found".to_string()))?;

    let uptime = UPTIME
        .captures(output)
        .or_else(|| ASA_UPTIME.captures(output))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let system_image = SYSTEM_IMAGE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let hardware = HARDWARE
        .captures(output)
        .or_else(|| IOS_PLATFORM.captures(output))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());

    Ok(VersionInfo {
        version: Some(version),
        uptime,
        system_image,
        hardware,
    })
}

/// Counts interfaces in a brief table (`show ip interface brief`,
/// `show interface ip brief`) or in detailed `show interfaces` output.
pub fn parse_interfaces(output: &str) -> Result<InterfaceSummary, SessionError> {
    let mut interfaces = Vec::new();
    let mut in_table = false;

    for line in output.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("Interface") && trimmed.contains("Status") {
            in_table = true;
            continue;
        }
        if in_table {
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.len() < 6 {
                continue;
            }
            let last = tokens.len() - 1;
            interfaces.push(InterfaceStatus {
                name: tokens[0].to_string(),
                ip_address: Some(tokens[1].to_string()).filter(|ip| ip != "unassigned"),
                status: tokens[4..last].join(" "),
                protocol: Some(tokens[last].to_string()),
            });
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        if let Some(caps) = DETAIL_HEADER.captures(trimmed) {
            interfaces.push(InterfaceStatus {
                name: caps[1].to_string(),
                ip_address: None,
                status: caps[2].to_string(),
                protocol: caps.get(3).map(|m| m.as_str().to_string()),
            });
        }
    }

    if interfaces.is_empty() {
        return Err(SessionError::Parse("no interfaces found".to_string()));
    }
    let up = interfaces.iter().filter(|i| i.is_up()).count() as u32;
    Ok(InterfaceSummary {
        total: interfaces.len() as u32,
        up,
        interfaces,
    })
}

/// Builds [`DeviceInfo`], failing if either output is unrecognisable.
pub fn parse(version_output: &str, interfaces_output: &str) -> Result<DeviceInfo, SessionError> {
    let version = parse_version(version_output)?;
    let interfaces = parse_interfaces(interfaces_output)?;
    Ok(DeviceInfo::from_parts(version, interfaces))
}

/// Like [`parse`], but substitutes `unknown` / `0` for whatever cannot be parsed.
pub fn parse_lenient(version_output: &str, interfaces_output: &str) -> DeviceInfo {
    let version = parse_version(version_output).unwrap_or_else(|err| {
        warn!("show version: {}, reporting version as {}", err, UNKNOWN);
        VersionInfo::default()
    });
    let interfaces = parse_interfaces(interfaces_output).unwrap_or_else(|err| {
        warn!("interface listing: {}, reporting 0 interfaces", err);
        InterfaceSummary::default()
    });
    DeviceInfo::from_parts(version, interfaces)
}

/// A `ip route` / `route` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StaticRoute {
    pub destination: String,
    pub mask: String,
    pub next_hop: Option<String>,
    /// Egress interface name, for ASA `route <nameif> ...`.
    pub interface: Option<String>,
}

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UserAccount {
    pub username: String,
    pub privilege: Option<u8>,
}

/// An `interface` block with its indented sub-commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceConfig {
    pub name: String,
    pub lines: Vec<String>,
}

/// Sections of `show running-config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunningConfig {
    pub hostname: Option<String>,
    pub interfaces: Vec<InterfaceConfig>,
    pub static_routes: Vec<StaticRoute>,
    pub services: Vec<String>,
    /// ACL name or number to its entries.
    pub access_lists: BTreeMap<String, Vec<String>>,
    pub users: Vec<UserAccount>,
}

/// Splits a running configuration into its commonly used sections.
pub fn parse_running_config(output: &str) -> Result<RunningConfig, SessionError> {
    let mut config = RunningConfig::default();
    let mut current_interface: Option<usize> = None;
    let mut current_acl: Option<String> = None;

    for line in output.lines() {
        let line = line.trim_end();
        let indented = line.starts_with(' ');
        if !indented {
            current_interface = None;
            current_acl = None;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        if indented {
            if let Some(index) = current_interface {
                config.interfaces[index].lines.push(line.trim().to_string());
            } else if let Some(name) = &current_acl {
                config
                    .access_lists
                    .entry(name.clone())
                    .or_default()
                    .push(line.trim().to_string());
            }
            continue;
        }

        match tokens.as_slice() {
            ["hostname", name, ..] => config.hostname = Some(name.to_string()),
            ["interface", name, ..] => {
                config.interfaces.push(InterfaceConfig {
                    name: name.to_string(),
                    lines: Vec::new(),
                });
                current_interface = Some(config.interfaces.len() - 1);
            }
            ["ip", "route", destination, mask, rest @ ..] => {
                config.static_routes.push(StaticRoute {
                    destination: destination.to_string(),
                    mask: mask.to_string(),
                    next_hop: rest.first().map(|s| s.to_string()),
                    interface: None,
                });
            }
            ["route", interface, destination, mask, next_hop, ..] => {
                config.static_routes.push(StaticRoute {
                    destination: destination.to_string(),
                    mask: mask.to_string(),
                    next_hop: Some(next_hop.to_string()),
                    interface: Some(interface.to_string()),
                });
            }
            ["service", ..] | ["no", "service", ..] => config.services.push(line.to_string()),
            ["access-list", name, ..] => {
                config
                    .access_lists
                    .entry(name.to_string())
                    .or_default()
                    .push(line.to_string());
            }
            ["ip", "access-list", _kind, name, ..] => {
                config.access_lists.entry(name.to_string()).or_default();
                current_acl = Some(name.to_string());
            }
            ["username", name, rest @ ..] => {
                let privilege = rest
                    .iter()
                    .position(|t| *t == "privilege")
                    .and_then(|i| rest.get(i + 1))
                    .and_then(|level| level.parse().ok());
                config.users.push(UserAccount {
                    username: name.to_string(),
                    privilege,
                });
            }
            _ => {}
        }
    }

    if config.hostname.is_none() && config.interfaces.is_empty() {
        return Err(SessionError::Parse(
            "output does not look like a running configuration".to_string(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim;

    #[test]
    fn ios_show_version() {
        let output = sim::IOS_SHOW_VERSION.replace("{host}", "Router1");
        let info = parse_version(&output).expect("ios banner");
        assert_eq!(info.version.as_deref(), Some("12.4(25d)"));
        assert_eq!(info.uptime.as_deref(), Some("2 days, 5 hours, 37 minutes"));
        assert_eq!(
            info.system_image.as_deref(),
            Some("flash:c2600-ipbase-mz.124-25d.bin")
        );
    }

    #[test]
    fn asa_show_version() {
        let output = sim::ASA_SHOW_VERSION.replace("{host}", "fw1");
        let info = parse_version(&output).expect("asa banner");
        assert_eq!(info.version.as_deref(), Some("9.8(4)32"));
        assert_eq!(info.uptime.as_deref(), Some("14 days 3 hours"));
        assert_eq!(info.hardware.as_deref(), Some("ASA5516"));
        assert_eq!(
            info.system_image.as_deref(),
            Some("disk0:/asa984-32-lfbff-k8.SPA")
        );
    }

    #[test]
    fn nxos_and_junos_banners() {
        let nxos = "Software\n  BIOS: version 07.69\n  NXOS: version 9.3(8)\n";
        assert_eq!(
            parse_version(nxos).expect("nxos").version.as_deref(),
            Some("9.3(8)")
        );
        let junos = "Hostname: mx1\nModel: mx204\nJunos: 21.4R3-S2.3\n";
        assert_eq!(
            parse_version(junos).expect("junos").version.as_deref(),
            Some("21.4R3-S2.3")
        );
    }

    #[test]
    fn ios_platform_line_is_hardware() {
        let output = "Cisco IOS Software, Version 15.1(4)M4\ncisco 2911 (revision 1.0) processor with 487424K/36864K bytes of memory.\n";
        let info = parse_version(output).expect("banner");
        assert_eq!(info.hardware.as_deref(), Some("2911"));
    }

    #[test]
    fn missing_version_is_parse_error() {
        let err = parse_version("% Invalid input detected at '^' marker.").expect_err("no banner");
        assert!(matches!(err, SessionError::Parse(_)));
    }

    #[test]
    fn brief_table_counts_up_interfaces() {
        let summary = parse_interfaces(sim::IOS_SHOW_IP_INTERFACE_BRIEF).expect("table");
        assert_eq!(summary.total, 5);
        assert_eq!(summary.up, 2);
        assert_eq!(summary.interfaces[1].status, "administratively down");
        assert_eq!(summary.interfaces[1].ip_address, None);
        assert_eq!(summary.interfaces[4].name, "Loopback0");
        assert_eq!(summary.interfaces[4].protocol.as_deref(), Some("up"));
    }

    #[test]
    fn asa_brief_table() {
        let summary = parse_interfaces(sim::ASA_SHOW_INTERFACE_IP_BRIEF).expect("table");
        assert_eq!(summary.total, 4);
        assert_eq!(summary.up, 3);
    }

    #[test]
    fn detailed_interfaces_output() {
        let output = format!(
            "{}Serial0/0 is administratively down, line protocol is down\n  Hardware is PowerQUICC Serial\n",
            sim::IOS_SHOW_INTERFACES
        );
        let summary = parse_interfaces(&output).expect("detail");
        assert_eq!(summary.total, 2);
        assert_eq!(summary.up, 1);
        assert_eq!(summary.interfaces[0].name, "FastEthernet0/0");
        assert_eq!(summary.interfaces[1].status, "administratively down");
    }

    #[test]
    fn up_never_exceeds_total() {
        for output in [
            sim::IOS_SHOW_IP_INTERFACE_BRIEF,
            sim::ASA_SHOW_INTERFACE_IP_BRIEF,
            sim::IOS_SHOW_INTERFACES,
        ] {
            let summary = parse_interfaces(output).expect("parses");
            assert!(summary.up <= summary.total);
        }
    }

    #[test]
    fn parse_combines_both_outputs() {
        let info = parse(
            &sim::IOS_SHOW_VERSION.replace("{host}", "Router1"),
            sim::IOS_SHOW_IP_INTERFACE_BRIEF,
        )
        .expect("both parse");
        assert_eq!(info.ios_version, "12.4(25d)");
        assert_eq!(info.total_interfaces, 5);
        assert_eq!(info.interfaces_up, 2);
    }

    #[test]
    fn lenient_parse_substitutes_defaults() {
        let info = parse_lenient("garbage", "more garbage");
        assert_eq!(info.ios_version, UNKNOWN);
        assert_eq!(info.total_interfaces, 0);
        assert_eq!(info.interfaces_up, 0);

        let partial = parse_lenient("garbage", sim::IOS_SHOW_IP_INTERFACE_BRIEF);
        assert_eq!(partial.ios_version, UNKNOWN);
        assert_eq!(partial.total_interfaces, 5);
    }

    #[test]
    fn device_info_serializes_with_snake_case_keys() {
        let info = parse_lenient("Version 1.0", "");
        let json = serde_json::to_value(&info).expect("serializes");
        assert_eq!(json["ios_version"], "1.0");
        assert_eq!(json["total_interfaces"], 0);
        assert_eq!(json["interfaces_up"], 0);
    }

    #[test]
    fn ios_running_config_sections() {
        let output = sim::IOS_SHOW_RUNNING_CONFIG.replace("{host}", "Router1");
        let config = parse_running_config(&output).expect("config");
        assert_eq!(config.hostname.as_deref(), Some("Router1"));
        assert_eq!(config.interfaces.len(), 2);
        assert_eq!(config.interfaces[0].name, "FastEthernet0/0");
        assert!(config.interfaces[0]
            .lines
            .contains(&"ip address 192.168.1.1 255.255.255.0".to_string()));
        assert_eq!(config.interfaces[1].lines, vec!["no ip address", "shutdown"]);
        assert_eq!(
            config.static_routes,
            vec![StaticRoute {
                destination: "0.0.0.0".to_string(),
                mask: "0.0.0.0".to_string(),
                next_hop: Some("FastEthernet0/0".to_string()),
                interface: None,
            }]
        );
        assert_eq!(config.services.len(), 3);
        assert_eq!(config.access_lists["101"], vec!["access-list 101 permit ip any any"]);
        assert_eq!(
            config.users,
            vec![UserAccount {
                username: "admin".to_string(),
                privilege: Some(15),
            }]
        );
    }

    #[test]
    fn named_acl_and_asa_routes() {
        let output = "hostname edge\n\
            ip access-list extended WEB\n permit tcp any any eq 443\n deny ip any any\n\
            route outside 0.0.0.0 0.0.0.0 203.0.113.254 1\n";
        let config = parse_running_config(output).expect("config");
        assert_eq!(
            config.access_lists["WEB"],
            vec!["permit tcp any any eq 443", "deny ip any any"]
        );
        assert_eq!(config.static_routes[0].interface.as_deref(), Some("outside"));
        assert_eq!(
            config.static_routes[0].next_hop.as_deref(),
            Some("203.0.113.254")
        );
    }

    #[test]
    fn non_config_output_is_parse_error() {
        let err = parse_running_config("% Invalid input detected").expect_err("not a config");
        assert!(matches!(err, SessionError::Parse(_)));
    }
}
