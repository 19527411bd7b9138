//! Change-request form: validation and translation into a runner job run.
//!
//! Operators pick a change type (compliance or patching), paste a list of
//! machines and choose type-specific options. The form is turned into a
//! Rundeck `argString` and dispatched to the job configured for that change
//! type.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{FormConfig, JobsConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("change type is required")]
    MissingChangeType,

    #[error("at least one machine must be specified")]
    NoMachines,

    #[error("select at least one compliance rule")]
    NoComplianceRules,

    #[error("select a patching version")]
    NoPatchingVersion,
}

/// Raw form body as posted by the dashboard.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestForm {
    #[serde(default)]
    pub change_type: Option<String>,
    /// Free text, one machine per line or comma separated.
    #[serde(default)]
    pub machines: Option<String>,
    /// Array of rules for compliance, a single version for patching.
    #[serde(default)]
    pub specific_options: Option<Value>,
}

/// Type-specific selection once validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ChangeOptions {
    Compliance { rules: Vec<String> },
    Patching { version: String },
    Other { values: Vec<String> },
}

/// A validated change request, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub change_type: String,
    pub machines: Vec<String>,
    pub options: ChangeOptions,
}

/// Split on newlines and commas, trim, drop empties.
pub fn parse_machines(raw: &str) -> Vec<String> {
    raw.split(['\n', '\r', ','])
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

/// Flatten a JSON selection into plain strings.
fn option_values(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if s.trim().is_empty() => Vec::new(),
        Some(Value::String(s)) => vec![s.trim().to_string()],
        Some(Value::Number(n)) => vec![n.to_string()],
        Some(other) => vec![other.to_string()],
    }
}

impl ChangeRequestForm {
    pub fn validate(&self) -> Result<ChangeRequest, FormError> {
        let change_type = self
            .change_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(FormError::MissingChangeType)?
            .to_string();

        let machines = parse_machines(self.machines.as_deref().unwrap_or_default());
        if machines.is_empty() {
            return Err(FormError::NoMachines);
        }

        let values = option_values(self.specific_options.as_ref());
        let options = match change_type.as_str() {
            "compliance" => {
                if values.is_empty() {
                    return Err(FormError::NoComplianceRules);
                }
                ChangeOptions::Compliance { rules: values }
            }
            "patching" => {
                let version = values.into_iter().next().ok_or(FormError::NoPatchingVersion)?;
                ChangeOptions::Patching { version }
            }
            _ => ChangeOptions::Other { values },
        };

        Ok(ChangeRequest {
            change_type,
            machines,
            options,
        })
    }
}

impl ChangeRequest {
    /// Rundeck `argString` for this request.
    pub fn arg_string(&self) -> String {
        let mut args = format!(
            "-changeType \"{}\" -machines \"{}\"",
            self.change_type,
            self.machines.join(",")
        );
        match &self.options {
            ChangeOptions::Compliance { rules } => {
                args.push_str(&format!(" -complianceRules \"{}\"", rules.join(",")));
            }
            ChangeOptions::Patching { version } => {
                args.push_str(&format!(" -patchingVersion \"{version}\""));
            }
            ChangeOptions::Other { .. } => {}
        }
        args
    }

    /// Job id configured for this change type, falling back to the default job.
    pub fn job_id<'a>(&self, jobs: &'a JobsConfig) -> &'a str {
        match self.change_type.as_str() {
            "compliance" => &jobs.compliance,
            "patching" => &jobs.patching,
            _ => &jobs.default,
        }
    }

    /// Options payload stored on the execution record.
    pub fn record_options(&self) -> Value {
        let specific = match &self.options {
            ChangeOptions::Compliance { rules } => json!(rules),
            ChangeOptions::Patching { version } => json!(version),
            ChangeOptions::Other { values } => json!(values),
        };
        json!({
            "changeType": self.change_type,
            "specificOptions": specific,
            "machines": self.machines.join("\n"),
            "machinesList": self.machines,
            "argString": self.arg_string(),
        })
    }
}

/// A selectable value in the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormOption {
    pub value: String,
    pub label: String,
}

/// Everything the dashboard needs to render the form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormOptions {
    pub change_types: Vec<FormOption>,
    pub compliance_rules: Vec<FormOption>,
    pub patching_versions: Vec<FormOption>,
}

fn as_options(values: &[String]) -> Vec<FormOption> {
    values
        .iter()
        .map(|v| FormOption {
            value: v.clone(),
            label: v.clone(),
        })
        .collect()
}

pub fn form_options(config: &FormConfig) -> FormOptions {
    FormOptions {
        change_types: vec![
            FormOption {
                value: "compliance".to_string(),
                label: "Compliance".to_string(),
            },
            FormOption {
                value: "patching".to_string(),
                label: "Patching".to_string(),
            },
        ],
        compliance_rules: as_options(&config.compliance_rules),
        patching_versions: as_options(&config.patching_versions),
    }
}
