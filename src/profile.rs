//! Vendor CLI profiles.
//!
//! A [`DeviceProfile`] classifies lines of device output (prompt, pager marker,
//! error, login challenge) with a single combined [`RegexSet`], and knows which
//! commands yield the facts the device-info parser needs.

use std::borrow::Cow;
use std::collections::HashMap;

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::device::DeviceType;
use crate::error::SessionError;

/// Built-in profile names.
pub const BUILTIN_PROFILES: &[&str] = &["cisco_ios", "cisco_asa", "generic"];

/// CLI privilege level inferred from a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// `host>`
    User,
    /// `host#`
    Privileged,
    /// `host(config)#` and sub-modes.
    Config,
}

/// Classification of one line (or the trailing partial line) of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Output,
    Pager,
    Error,
    LoginFailed,
    Username,
    Password,
    Prompt(PromptMode),
}

/// Pattern configuration used to build a [`DeviceProfile`].
#[derive(Debug, Clone, Default)]
pub struct ProfileConfig<'a> {
    pub name: &'a str,
    /// Prompt patterns per mode. A `(?P<host>...)` group, when present, captures the hostname.
    pub prompts: Vec<(PromptMode, Vec<&'a str>)>,
    pub pagers: Vec<&'a str>,
    pub errors: Vec<&'a str>,
    /// Error lines that should be treated as plain output.
    pub ignore_errors: Vec<&'a str>,
    pub login_failures: Vec<&'a str>,
    pub username_prompts: Vec<&'a str>,
    pub password_prompts: Vec<&'a str>,
    /// Keystroke sent to advance a pager.
    pub continuation: &'a str,
    pub version_command: &'a str,
    pub interfaces_command: &'a str,
    pub running_config_command: &'a str,
}

/// Compiled pattern set for one device family.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    name: String,
    all_regex: RegexSet,
    /// Maps a regex index in `all_regex` to its line class.
    regex_class: HashMap<usize, LineClass>,
    prompt_regexes: Vec<Regex>,
    pager_regex: Option<Regex>,
    ignore_errors: Option<RegexSet>,
    continuation: String,
    version_command: String,
    interfaces_command: String,
    running_config_command: String,
}

/// Leading carriage returns, NULs and backspace runs devices emit when redrawing a line.
pub static IGNORE_START_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^[\x00\r]*((\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*))") {
        Ok(re) => re,
        Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
    }
});

/// ANSI CSI sequences some devices use to clear the pager line.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]") {
    Ok(re) => re,
    Err(err) => panic!("invalid ANSI_ESCAPE regex: {err}"),
});

impl DeviceProfile {
    /// Compiles a profile.
    pub fn new(config: ProfileConfig<'_>) -> Result<Self, SessionError> {
        let mut regexs: Vec<String> = Vec::new();
        let mut regex_class = HashMap::new();

        let mut push = |patterns: Vec<String>, class: LineClass| {
            for pattern in patterns {
                regex_class.insert(regexs.len(), class);
                regexs.push(pattern);
            }
        };

        push(owned(&config.pagers), LineClass::Pager);
        push(owned(&config.login_failures), LineClass::LoginFailed);
        push(owned(&config.errors), LineClass::Error);

        let mut prompt_regexes = Vec::new();
        for (mode, patterns) in &config.prompts {
            // Anchor every prompt at the start of the line, tolerating NUL padding and a bare CR.
            let anchored = patterns
                .iter()
                .map(|s| format!(r"^\x00*\r{{0,1}}{}", s.trim_start_matches('^')))
                .collect::<Vec<_>>();
            for pattern in &anchored {
                prompt_regexes.push(Regex::new(pattern).map_err(|err| {
                    SessionError::InvalidProfile(format!(
                        "invalid prompt regex for profile '{}': {}",
                        config.name, err
                    ))
                })?);
            }
            push(anchored, LineClass::Prompt(*mode));
        }

        push(owned(&config.username_prompts), LineClass::Username);
        push(owned(&config.password_prompts), LineClass::Password);

        let all_regex = RegexSet::new(&regexs).map_err(|err| {
            SessionError::InvalidProfile(format!(
                "failed to build regex set for profile '{}': {}",
                config.name, err
            ))
        })?;

        let pager_regex = if config.pagers.is_empty() {
            None
        } else {
            let alternation = config
                .pagers
                .iter()
                .map(|p| format!("(?:{p})"))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&alternation).map_err(|err| {
                SessionError::InvalidProfile(format!("invalid pager regex: {err}"))
            })?)
        };

        let ignore_errors = if config.ignore_errors.is_empty() {
            None
        } else {
            Some(RegexSet::new(&config.ignore_errors).map_err(|err| {
                SessionError::InvalidProfile(format!("invalid ignore_errors regex set: {err}"))
            })?)
        };

        Ok(Self {
            name: config.name.to_string(),
            all_regex,
            regex_class,
            prompt_regexes,
            pager_regex,
            ignore_errors,
            continuation: config.continuation.to_string(),
            version_command: config.version_command.to_string(),
            interfaces_command: config.interfaces_command.to_string(),
            running_config_command: config.running_config_command.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classifies a line. Lines matching nothing are plain output.
    ///
    /// When several patterns match, the earliest registered class wins, so a
    /// pager marker is never mistaken for a prompt.
    pub fn classify(&self, line: &str) -> LineClass {
        let Some(index) = self.all_regex.matches(line).into_iter().next() else {
            return LineClass::Output;
        };
        let class = self
            .regex_class
            .get(&index)
            .copied()
            .unwrap_or(LineClass::Output);
        if class == LineClass::Error && self.ignore_error(line) {
            trace!("Ignoring error line: '{:?}'", line);
            return LineClass::Output;
        }
        class
    }

    fn ignore_error(&self, line: &str) -> bool {
        self.ignore_errors
            .as_ref()
            .map(|set| set.is_match(line))
            .unwrap_or(false)
    }

    /// Returns the prompt mode if `tail` is a complete prompt.
    pub fn prompt_mode(&self, tail: &str) -> Option<PromptMode> {
        match self.classify(tail) {
            LineClass::Prompt(mode) => Some(mode),
            _ => None,
        }
    }

    /// Extracts the hostname from a prompt line.
    pub fn hostname(&self, prompt: &str) -> Option<String> {
        self.prompt_regexes.iter().find_map(|re| {
            re.captures(prompt)
                .and_then(|caps| caps.name("host"))
                .map(|m| m.as_str().to_string())
        })
    }

    /// Whether `text` contains a pager marker.
    pub fn has_pager(&self, text: &str) -> bool {
        self.pager_regex
            .as_ref()
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    }

    /// Removes pager markers and the erase sequences that follow them.
    pub fn strip_pager<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let Some(re) = self.pager_regex.as_ref() else {
            return Cow::Borrowed(text);
        };
        match re.replace_all(text, "") {
            Cow::Borrowed(_) => Cow::Borrowed(text),
            Cow::Owned(stripped) => Cow::Owned(ANSI_ESCAPE.replace_all(&stripped, "").into_owned()),
        }
    }

    pub fn continuation(&self) -> &str {
        &self.continuation
    }

    pub fn version_command(&self) -> &str {
        &self.version_command
    }

    pub fn interfaces_command(&self) -> &str {
        &self.interfaces_command
    }

    pub fn running_config_command(&self) -> &str {
        &self.running_config_command
    }
}

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|s| s.to_string()).collect()
}

/// Cleans one line of raw output: leading redraw noise, pager leftovers and line endings.
pub fn clean_line<'t>(profile: &DeviceProfile, line: &'t str) -> Cow<'t, str> {
    let trimmed = IGNORE_START_LINE.replace(line, "");
    let stripped = match profile.strip_pager(&trimmed) {
        Cow::Borrowed(_) => trimmed,
        Cow::Owned(s) => Cow::Owned(IGNORE_START_LINE.replace(&s, "").into_owned()),
    };
    match stripped {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim_end_matches(['\r', '\n'])),
        Cow::Owned(s) => Cow::Owned(s.trim_end_matches(['\r', '\n']).to_string()),
    }
}

const HOST: &str = r"(?P<host>[A-Za-z0-9][\w.\-/@:]*?)";

/// Cisco IOS / IOS-XE routers and switches.
pub fn cisco_ios() -> Result<DeviceProfile, SessionError> {
    let config_prompt = format!(r"{HOST}\(conf[^)]*\)#\s*$");
    let privileged_prompt = format!(r"{HOST}#\s*$");
    let user_prompt = format!(r"{HOST}>\s*$");
    DeviceProfile::new(ProfileConfig {
        name: "cisco_ios",
        prompts: vec![
            (PromptMode::Config, vec![config_prompt.as_str()]),
            (PromptMode::Privileged, vec![privileged_prompt.as_str()]),
            (PromptMode::User, vec![user_prompt.as_str()]),
        ],
        pagers: vec![r"\s*--More--\s*"],
        errors: vec![
            r"^% ?Invalid input detected",
            r"^% ?Incomplete command",
            r"^% ?Ambiguous command",
            r"^% ?Unknown command",
            r"^% ?Bad IP address",
            r"^Command authorization failed",
        ],
        ignore_errors: vec![],
        login_failures: vec![
            r"^% ?Login invalid",
            r"^% ?Authentication failed",
            r"^% ?Access denied",
            r"^% ?Bad (passwords|secrets)",
            r"^Login incorrect",
        ],
        username_prompts: vec![r"(?i)(user ?name|login)\s*:\s*$"],
        password_prompts: vec![r"(?i)password\s*:\s*$"],
        continuation: " ",
        version_command: "show version",
        interfaces_command: "show ip interface brief",
        running_config_command: "show running-config",
    })
}

/// Cisco ASA firewalls.
pub fn cisco_asa() -> Result<DeviceProfile, SessionError> {
    let config_prompt = format!(r"{HOST}\(conf[^)]*\)#\s*$");
    let privileged_prompt = format!(r"{HOST}#\s*$");
    let user_prompt = format!(r"{HOST}>\s*$");
    DeviceProfile::new(ProfileConfig {
        name: "cisco_asa",
        prompts: vec![
            (PromptMode::Config, vec![config_prompt.as_str()]),
            (PromptMode::Privileged, vec![privileged_prompt.as_str()]),
            (PromptMode::User, vec![user_prompt.as_str()]),
        ],
        pagers: vec![r"\s*<--- More --->\s*"],
        errors: vec![
            r"^ERROR: .+",
            r"^% ?Invalid input detected",
            r"^% ?Incomplete command",
        ],
        ignore_errors: vec![r"^ERROR: object \(.+\) does not exist\."],
        login_failures: vec![
            r"^Invalid password",
            r"^Access denied",
            r"^% ?Authentication failed",
            r"^Login incorrect",
        ],
        username_prompts: vec![r"(?i)(user ?name|login)\s*:\s*$"],
        password_prompts: vec![r"(?i)password\s*:\s*$"],
        continuation: " ",
        version_command: "show version",
        interfaces_command: "show interface ip brief",
        running_config_command: "show running-config",
    })
}

/// Permissive profile for anything that prints `host>` / `host#` style prompts.
pub fn generic() -> Result<DeviceProfile, SessionError> {
    let config_prompt = format!(r"{HOST}\([^)]*\)#\s*$");
    let privileged_prompt = format!(r"{HOST}#\s*$");
    let user_prompt = format!(r"{HOST}[>$%]\s*$");
    let angle_prompt = format!(r"<{HOST}>\s*$");
    let bracket_prompt = format!(r"\[{HOST}\]\s*$");
    DeviceProfile::new(ProfileConfig {
        name: "generic",
        prompts: vec![
            (PromptMode::Config, vec![config_prompt.as_str(), bracket_prompt.as_str()]),
            (PromptMode::Privileged, vec![privileged_prompt.as_str()]),
            (PromptMode::User, vec![user_prompt.as_str(), angle_prompt.as_str()]),
        ],
        pagers: vec![
            r"\s*--More--\s*",
            r"\s*<--- More --->\s*",
            r"\s*-- ?More ?--\s*",
            r"\s*---- More ----\s*",
            r"(?i)\s*Press any key to continue\s*",
        ],
        errors: vec![
            r"^% ?Invalid input detected",
            r"^% ?Incomplete command",
            r"^% ?Unknown command",
            r"^ERROR: .+",
            r"^Error: .+",
        ],
        ignore_errors: vec![],
        login_failures: vec![
            r"^% ?Login invalid",
            r"^% ?Authentication failed",
            r"^Login incorrect",
            r"^Access denied",
        ],
        username_prompts: vec![r"(?i)(user ?name|login)\s*:\s*$"],
        password_prompts: vec![r"(?i)password\s*:\s*$"],
        continuation: " ",
        version_command: "show version",
        interfaces_command: "show ip interface brief",
        running_config_command: "show running-config",
    })
}

/// Creates a built-in profile by name (case-insensitive).
pub fn by_name(name: &str) -> Result<DeviceProfile, SessionError> {
    match name.to_ascii_lowercase().replace('-', "_").as_str() {
        "cisco_ios" | "ios" | "cisco" => cisco_ios(),
        "cisco_asa" | "asa" => cisco_asa(),
        "generic" => generic(),
        other => Err(SessionError::InvalidProfile(format!(
            "unknown profile '{other}', expected one of {BUILTIN_PROFILES:?}"
        ))),
    }
}

/// Default profile for a device type.
pub fn for_device_type(device_type: DeviceType) -> Result<DeviceProfile, SessionError> {
    match device_type {
        DeviceType::Router | DeviceType::Switch => cisco_ios(),
        DeviceType::Firewall => cisco_asa(),
    }
}
