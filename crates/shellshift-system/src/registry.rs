use std::fmt;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::{CommandRunner, ConfigStore};

const REG_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_VALUE_TYPE: &str = "REG_SZ";
const VALUE_SEPARATOR: &str = "::";

/// A registry value addressed as `<key path>::<value name>`; a missing or
/// empty value name addresses the key's default value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValueKey {
    pub key_path: String,
    pub value_name: Option<String>,
}

impl RegistryValueKey {
    pub fn new(key_path: impl Into<String>, value_name: Option<&str>) -> Self {
        Self {
            key_path: key_path.into(),
            value_name: value_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (key_path, value_name) = match raw.split_once(VALUE_SEPARATOR) {
            Some((key_path, value_name)) => (key_path, Some(value_name)),
            None => (raw, None),
        };
        if key_path.trim().is_empty() {
            return Err(anyhow!("registry key path must not be empty: '{raw}'"));
        }
        Ok(Self::new(key_path.trim(), value_name))
    }

    fn push_value_args(&self, command: &mut Command) {
        match &self.value_name {
            Some(name) => {
                command.arg("/v").arg(name);
            }
            None => {
                command.arg("/ve");
            }
        }
    }
}

impl fmt::Display for RegistryValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value_name {
            Some(name) => write!(f, "{}{VALUE_SEPARATOR}{name}", self.key_path),
            None => write!(f, "{}", self.key_path),
        }
    }
}

/// Windows registry access through `reg.exe`, preserving each value's type.
#[derive(Clone)]
pub struct RegistryStore {
    runner: Arc<dyn CommandRunner>,
}

impl RegistryStore {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Returns `(type, data)` for a value, or `None` when it does not exist.
    pub fn read_typed(&self, key: &RegistryValueKey) -> Result<Option<(String, String)>> {
        let mut command = Command::new("reg");
        command.arg("query").arg(&key.key_path);
        key.push_value_args(&mut command);

        let output = self.runner.run(command, REG_TIMEOUT)?;
        if !output.success {
            if is_not_found_message(&output.combined_text()) {
                return Ok(None);
            }
            return Err(anyhow!(
                "failed to query registry value {key}: {}",
                output.describe()
            ));
        }

        Ok(parse_reg_query_value(
            &output.stdout,
            key.value_name.as_deref(),
        ))
    }
}

impl ConfigStore for RegistryStore {
    fn describe(&self) -> String {
        "registry".to_string()
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let key = RegistryValueKey::parse(key)?;
        Ok(self.read_typed(&key)?.map(|(_, data)| data))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let key = RegistryValueKey::parse(key)?;
        let value_type = self
            .read_typed(&key)?
            .map(|(value_type, _)| value_type)
            .unwrap_or_else(|| DEFAULT_VALUE_TYPE.to_string());

        let mut command = Command::new("reg");
        command.arg("add").arg(&key.key_path);
        key.push_value_args(&mut command);
        command
            .arg("/t")
            .arg(&value_type)
            .arg("/d")
            .arg(value)
            .arg("/f");

        debug!(key = %key, value_type = %value_type, "writing registry value");
        let output = self.runner.run(command, REG_TIMEOUT)?;
        if !output.success {
            return Err(anyhow!(
                "failed to write registry value {key}: {}",
                output.describe()
            ));
        }
        Ok(())
    }
}

fn is_not_found_message(text: &str) -> bool {
    text.to_ascii_lowercase().contains("unable to find")
}

/// Extracts `(type, data)` from `reg query` output.
///
/// Value rows are indented and columns are separated by four spaces:
/// `    Path    REG_EXPAND_SZ    C:\Windows\system32;...`. When `value_name` is
/// `None` the first row is taken (the `(Default)` label is localized).
pub fn parse_reg_query_value(stdout: &str, value_name: Option<&str>) -> Option<(String, String)> {
    for line in stdout.lines() {
        if !line.starts_with("    ") {
            continue;
        }
        let row = line.trim_start();
        let Some(type_at) = row.find("    REG_") else {
            continue;
        };

        let name = row[..type_at].trim();
        if let Some(expected) = value_name {
            if !name.eq_ignore_ascii_case(expected) {
                continue;
            }
        }

        let rest = &row[type_at + 4..];
        let (value_type, data) = match rest.split_once("    ") {
            Some((value_type, data)) => (value_type, data),
            None => (rest.trim_end(), ""),
        };
        return Some((value_type.trim().to_string(), data.to_string()));
    }
    None
}
