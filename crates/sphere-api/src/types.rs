//! Value types exchanged with a virtualization client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property mapping of a VM, as reported by the server.
pub type VmProperties = BTreeMap<String, serde_json::Value>;

/// Power state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    /// VM is running
    PoweredOn,
    /// VM is off
    PoweredOff,
    /// VM is suspended to disk
    Suspended,
}

impl PowerState {
    /// Parse a state name (`poweredOn`, `powered_off`, `SUSPENDED`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['_', '-', ' '], "").as_str() {
            "poweredon" | "on" => Some(Self::PoweredOn),
            "poweredoff" | "off" => Some(Self::PoweredOff),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::PoweredOn => write!(f, "poweredOn"),
            PowerState::PoweredOff => write!(f, "poweredOff"),
            PowerState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Entry from the guest process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestProcess {
    /// Process id inside the guest.
    pub pid: i64,
    /// Program name.
    pub name: String,
    /// Guest user owning the process.
    pub owner: String,
    /// Full command line.
    pub cmd_line: String,
    /// When the process started.
    pub start_time: DateTime<Utc>,
    /// When the process ended, `None` while it is still running.
    pub end_time: Option<DateTime<Utc>>,
    /// Exit code, only meaningful once `end_time` is set.
    pub exit_code: Option<i32>,
}

impl GuestProcess {
    /// True once the guest reports an end time.
    pub fn has_exited(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Kind of a guest filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// Entry from a guest directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestFileEntry {
    /// Absolute guest path.
    pub path: String,
    /// File or directory.
    pub kind: FileKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

/// Program to start inside a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Absolute path of the program in the guest.
    pub program: String,
    /// Command line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory, guest default when unset.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ProcessSpec {
    /// Create a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Program followed by its arguments, space separated.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_display() {
        assert_eq!(PowerState::PoweredOn.to_string(), "poweredOn");
        assert_eq!(PowerState::PoweredOff.to_string(), "poweredOff");
        assert_eq!(PowerState::Suspended.to_string(), "suspended");
    }

    #[test]
    fn test_power_state_parse() {
        assert_eq!(PowerState::parse("poweredOn"), Some(PowerState::PoweredOn));
        assert_eq!(PowerState::parse("POWERED_OFF"), Some(PowerState::PoweredOff));
        assert_eq!(PowerState::parse("suspended"), Some(PowerState::Suspended));
        assert_eq!(PowerState::parse("rebooting"), None);
    }

    #[test]
    fn test_power_state_serde() {
        let json = serde_json::to_string(&PowerState::PoweredOff).unwrap();
        assert_eq!(json, "\"poweredOff\"");
        let state: PowerState = serde_json::from_str("\"poweredOn\"").unwrap();
        assert_eq!(state, PowerState::PoweredOn);
    }

    #[test]
    fn test_process_spec_command_line() {
        let spec = ProcessSpec::new("/bin/sh")
            .args(["-c", "true"])
            .env("LANG", "C")
            .cwd("/tmp");
        assert_eq!(spec.command_line(), "/bin/sh -c true");
        assert_eq!(spec.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(spec.cwd.as_deref(), Some("/tmp"));
    }

    #[test]
    fn test_process_spec_deserialize_defaults() {
        let spec: ProcessSpec = serde_json::from_str(r#"{"program":"/bin/true"}"#).unwrap();
        assert_eq!(spec, ProcessSpec::new("/bin/true"));
    }
}
