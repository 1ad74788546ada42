use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use shellshift_core::InstallationTarget;
use shellshift_system::ConfigStore;
use tracing::info;

use super::{MutationOutput, Mutator};

pub const TERMINAL_STEP: &str = "terminal-profile";
pub const POWERSHELL_CORE_SOURCE: &str = "Windows.Terminal.PowershellCore";

const DEFAULT_PROFILE_KEY: &str = "defaultProfile";
const PROFILES_KEY: &str = "profiles";

pub struct TerminalProfileMutator {
    store: Arc<dyn ConfigStore>,
    profile_guid: Option<String>,
}

impl TerminalProfileMutator {
    pub fn new(store: Arc<dyn ConfigStore>, profile_guid: Option<String>) -> Self {
        Self {
            store,
            profile_guid: profile_guid.filter(|guid| !guid.trim().is_empty()),
        }
    }

    fn resolve_guid(&self) -> Result<String> {
        if let Some(guid) = &self.profile_guid {
            return Ok(guid.clone());
        }

        let raw = self
            .store
            .read(PROFILES_KEY)
            .with_context(|| format!("failed to read profiles from {}", self.store.describe()))?
            .ok_or_else(|| anyhow!("no profiles defined in {}", self.store.describe()))?;
        let profiles: Value = serde_json::from_str(&raw)
            .with_context(|| format!("profiles in {} are not valid JSON", self.store.describe()))?;

        find_profile_guid(&profiles).ok_or_else(|| {
            anyhow!(
                "PowerShell 7 profile not found in {}",
                self.store.describe()
            )
        })
    }
}

impl Mutator for TerminalProfileMutator {
    fn id(&self) -> &str {
        TERMINAL_STEP
    }

    fn apply(&self, _target: &InstallationTarget) -> Result<MutationOutput> {
        let present = self
            .store
            .exists()
            .with_context(|| format!("failed to probe {}", self.store.describe()))?;
        if !present {
            return Ok(MutationOutput::skipped(format!(
                "Windows Terminal settings not found at {}",
                self.store.describe()
            )));
        }

        let guid = self.resolve_guid()?;
        let current = self
            .store
            .read(DEFAULT_PROFILE_KEY)
            .with_context(|| format!("failed to read {DEFAULT_PROFILE_KEY}"))?;
        if current
            .as_deref()
            .is_some_and(|current| current.eq_ignore_ascii_case(&guid))
        {
            return Ok(MutationOutput::skipped(format!(
                "default profile is already {guid}"
            )));
        }

        self.store
            .write(DEFAULT_PROFILE_KEY, &guid)
            .with_context(|| format!("failed to set {DEFAULT_PROFILE_KEY} in {}", self.store.describe()))?;
        info!(guid = %guid, "terminal default profile updated");
        Ok(MutationOutput::success(format!(
            "{DEFAULT_PROFILE_KEY} {} -> {guid}",
            current.unwrap_or_else(|| "<unset>".to_string())
        )))
    }
}

/// GUID of the first PowerShell 7 profile.
///
/// Accepts either the `profiles` object (`{"list": [...]}`) or a bare list,
/// the older settings layout.
pub fn find_profile_guid(profiles: &Value) -> Option<String> {
    let list = match profiles {
        Value::Array(list) => list,
        Value::Object(object) => object.get("list")?.as_array()?,
        _ => return None,
    };

    list.iter()
        .find(|profile| {
            let source = profile.get("source").and_then(Value::as_str).unwrap_or("");
            let name = profile.get("name").and_then(Value::as_str).unwrap_or("");
            source == POWERSHELL_CORE_SOURCE || (name.contains("PowerShell") && name.contains('7'))
        })
        .and_then(|profile| profile.get("guid"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
