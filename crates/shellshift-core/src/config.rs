use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Every location, registry key and marker the engine touches.
///
/// String fields may contain `%VAR%` references; they are expanded against the
/// host environment when the engine is assembled, not when the file is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    pub mutator_timeout_secs: u64,
    /// Configuration steps run one by one before the parallel batch; any
    /// failure among them aborts the run.
    pub prerequisite_steps: Vec<String>,
    pub locator: LocatorConfig,
    pub install: InstallConfig,
    pub path: PathConfig,
    pub association: AssociationConfig,
    pub alias: AliasConfig,
    pub terminal: TerminalConfig,
    pub demotion: DemotionConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub candidates: Vec<String>,
    pub probe_version: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub failure_markers: Vec<String>,
    pub already_installed_markers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub registry_key: String,
    pub value_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    pub extension_key: String,
    pub command_key: String,
    pub prog_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    pub directory: String,
    pub command_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub settings_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_guid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemotionConfig {
    pub directory: String,
    pub executable: String,
    pub backup_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub report_path: String,
    pub restore_script_path: String,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            mutator_timeout_secs: 120,
            prerequisite_steps: Vec::new(),
            locator: LocatorConfig::default(),
            install: InstallConfig::default(),
            path: PathConfig::default(),
            association: AssociationConfig::default(),
            alias: AliasConfig::default(),
            terminal: TerminalConfig::default(),
            demotion: DemotionConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                r"%ProgramFiles%\PowerShell\7\pwsh.exe".to_string(),
                r"%ProgramFiles(x86)%\PowerShell\7\pwsh.exe".to_string(),
                r"%LOCALAPPDATA%\Microsoft\PowerShell\7\pwsh.exe".to_string(),
            ],
            probe_version: true,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "winget".to_string(),
            args: [
                "install",
                "Microsoft.PowerShell",
                "--accept-package-agreements",
                "--accept-source-agreements",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
            timeout_secs: 300,
            failure_markers: vec![
                "No package found matching input criteria".to_string(),
                "Installer failed".to_string(),
            ],
            already_installed_markers: vec![
                "Found an existing package already installed".to_string(),
                "No available upgrade found".to_string(),
                "No newer package versions are available".to_string(),
            ],
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            registry_key: r"HKLM\SYSTEM\CurrentControlSet\Control\Session Manager\Environment"
                .to_string(),
            value_name: "Path".to_string(),
        }
    }
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            extension_key: r"HKCR\.ps1".to_string(),
            command_key: r"HKCR\Microsoft.PowerShellScript.1\Shell\Open\Command".to_string(),
            prog_id: "Microsoft.PowerShellScript.1".to_string(),
        }
    }
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            directory: r"%SystemRoot%\System32".to_string(),
            command_name: "powershell".to_string(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            settings_path: r"%LOCALAPPDATA%\Packages\Microsoft.WindowsTerminal_8wekyb3d8bbwe\LocalState\settings.json"
                .to_string(),
            profile_guid: None,
        }
    }
}

impl Default for DemotionConfig {
    fn default() -> Self {
        Self {
            directory: r"%SystemRoot%\System32\WindowsPowerShell\v1.0".to_string(),
            executable: "powershell.exe".to_string(),
            backup_name: "powershell_v51_backup.exe".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_path: "powershell_installation_report.txt".to_string(),
            restore_script_path: "restore_powershell51.ps1".to_string(),
        }
    }
}

impl ShiftConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse shellshift config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize shellshift config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.locator.candidates.is_empty() {
            return Err(anyhow!("locator.candidates must list at least one path"));
        }
        if self.mutator_timeout_secs == 0 {
            return Err(anyhow!("mutator_timeout_secs must be greater than zero"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for step in &self.prerequisite_steps {
            if !seen.insert(step.as_str()) {
                return Err(anyhow!("prerequisite_steps lists '{step}' twice"));
            }
        }
        if self.install.enabled && self.install.program.trim().is_empty() {
            return Err(anyhow!("install.program must not be empty when install is enabled"));
        }
        if self.alias.command_name.trim().is_empty() {
            return Err(anyhow!("alias.command_name must not be empty"));
        }
        for (field, value) in [
            ("demotion.executable", &self.demotion.executable),
            ("demotion.backup_name", &self.demotion.backup_name),
        ] {
            if value.trim().is_empty() || value.contains(['/', '\\']) {
                return Err(anyhow!("{field} must be a bare file name: '{value}'"));
            }
        }
        if self
            .demotion
            .executable
            .eq_ignore_ascii_case(&self.demotion.backup_name)
        {
            return Err(anyhow!(
                "demotion.backup_name must differ from demotion.executable"
            ));
        }
        Ok(())
    }

    /// Expands a configured template into a path, failing on unset variables.
    pub fn expand_path<F>(template: &str, lookup: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        expand_env_vars(template, lookup).map(PathBuf::from)
    }

    /// Locator candidates in order; candidates naming unset variables are dropped.
    pub fn candidate_paths<F>(&self, lookup: F) -> Vec<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.locator
            .candidates
            .iter()
            .filter_map(|template| expand_env_vars(template, &lookup).ok())
            .map(PathBuf::from)
            .collect()
    }
}

/// Expands `%NAME%` references; `%%` yields a literal `%`.
pub fn expand_env_vars<F>(template: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('%') else {
            return Err(anyhow!("unterminated variable reference in '{template}'"));
        };

        let name = &after[..end];
        if name.is_empty() {
            out.push('%');
        } else {
            let value = lookup(name).ok_or_else(|| {
                anyhow!("environment variable '{name}' is not set (needed by '{template}')")
            })?;
            out.push_str(&value);
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
