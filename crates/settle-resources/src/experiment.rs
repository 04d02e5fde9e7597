//! Fault-injection experiment template blocks
//!
//! Targets and actions are nested blocks with set semantics. Set-valued
//! fields (`resource_arns`, filter `values`, `start_after`) are emitted
//! sorted so declaration order does not change identity.

use serde::{Deserialize, Serialize};
use settle_record::{ConversionError, FromRecord, Record, RecordRules, ToRecord, Value};
use std::collections::BTreeMap;

/// Resource selection mode: `ALL`, `COUNT(n)` or `PERCENT(n)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SelectionMode {
    /// Every matching resource
    All,
    /// A fixed number of resources
    Count(u32),
    /// A percentage of resources
    Percent(u32),
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("ALL"),
            Self::Count(n) => write!(f, "COUNT({n})"),
            Self::Percent(n) => write!(f, "PERCENT({n})"),
        }
    }
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = |rest: &str| -> Option<u32> {
            rest.strip_suffix(')')
                .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse().ok())
        };
        if s == "ALL" {
            Ok(Self::All)
        } else if let Some(n) = s.strip_prefix("COUNT(").and_then(number) {
            Ok(Self::Count(n))
        } else if let Some(n) = s.strip_prefix("PERCENT(").and_then(number) {
            Ok(Self::Percent(n))
        } else {
            Err(format!(
                "{s:?} is not one of ALL, COUNT(number), PERCENT(number)"
            ))
        }
    }
}

impl TryFrom<String> for SelectionMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SelectionMode> for String {
    fn from(mode: SelectionMode) -> Self {
        mode.to_string()
    }
}

/// Filter narrowing a target by resource attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFilter {
    /// Attribute path
    pub path: String,
    /// Accepted values
    pub values: Vec<String>,
}

impl ToRecord for TargetFilter {
    fn to_record(&self) -> Record {
        Record::new()
            .with("path", self.path.as_str())
            .with("values", Value::text_list(sorted(&self.values)))
    }
}

impl FromRecord for TargetFilter {
    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        Ok(Self {
            path: record.text("path")?.to_string(),
            values: record.text_list("values")?,
        })
    }
}

/// Experiment target block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentTarget {
    /// Target name, referenced by actions
    pub name: String,
    /// Resource type (e.g. `aws:ec2:instance`)
    pub resource_type: String,
    /// How many matching resources to pick
    pub selection_mode: SelectionMode,
    /// Explicit resource ARNs; exclusive with `resource_tag`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_arns: Vec<String>,
    /// Tags selecting resources; exclusive with `resource_arns`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_tag: BTreeMap<String, String>,
    /// Attribute filters, in declared order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<TargetFilter>,
    /// Resource-type specific parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl ExperimentTarget {
    /// Target selecting every resource of `resource_type` with no selector yet
    #[must_use]
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            selection_mode: SelectionMode::All,
            resource_arns: Vec::new(),
            resource_tag: BTreeMap::new(),
            filter: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Select by ARNs
    #[must_use]
    pub fn with_arns<I, S>(mut self, arns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_arns.extend(arns.into_iter().map(Into::into));
        self
    }

    /// Select by tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_tag.insert(key.into(), value.into());
        self
    }

    /// Set selection mode
    #[must_use]
    pub fn with_selection_mode(mut self, mode: SelectionMode) -> Self {
        self.selection_mode = mode;
        self
    }
}

impl ToRecord for ExperimentTarget {
    fn to_record(&self) -> Record {
        let filters: Vec<Value> = self.filter.iter().map(|f| f.to_record().into()).collect();
        Record::new()
            .with("name", self.name.as_str())
            .with("resource_type", self.resource_type.as_str())
            .with("selection_mode", self.selection_mode.to_string())
            .with("resource_arns", Value::text_list(sorted(&self.resource_arns)))
            .with("resource_tag", Value::text_map(self.resource_tag.clone()))
            .with("filter", Value::List(filters))
            .with("parameters", Value::text_map(self.parameters.clone()))
    }

    fn rules() -> RecordRules {
        RecordRules::none()
            .required("name")
            .required("resource_type")
            .required("selection_mode")
            .mutually_exclusive(["resource_arns", "resource_tag"])
    }
}

impl FromRecord for ExperimentTarget {
    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        let mode = record.text("selection_mode")?;
        Ok(Self {
            name: record.text("name")?.to_string(),
            resource_type: record.text("resource_type")?.to_string(),
            selection_mode: mode.parse().map_err(|_| ConversionError::InvalidValue {
                field: "selection_mode".to_string(),
                value: mode.to_string(),
            })?,
            resource_arns: record.text_list("resource_arns")?,
            resource_tag: record.text_map("resource_tag")?,
            filter: record
                .record_list("filter")?
                .iter()
                .map(TargetFilter::from_record)
                .collect::<Result<_, _>>()?,
            parameters: record.text_map("parameters")?,
        })
    }
}

/// Experiment action block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentAction {
    /// Action name, referenced by `start_after`
    pub name: String,
    /// Action type, `aws:service-name:action-name`
    pub action_id: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Action parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameter: BTreeMap<String, String>,
    /// Actions that must finish first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_after: Vec<String>,
    /// Target reference: target key to target name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target: BTreeMap<String, String>,
}

impl ExperimentAction {
    /// Create action
    #[must_use]
    pub fn new(name: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action_id: action_id.into(),
            description: None,
            parameter: BTreeMap::new(),
            start_after: Vec::new(),
            target: BTreeMap::new(),
        }
    }

    /// Point the action at a target
    #[must_use]
    pub fn with_target(mut self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.target.insert(key.into(), target.into());
        self
    }
}

impl ToRecord for ExperimentAction {
    fn to_record(&self) -> Record {
        Record::new()
            .with("name", self.name.as_str())
            .with("action_id", self.action_id.as_str())
            .with("description", self.description.clone())
            .with("parameter", Value::text_map(self.parameter.clone()))
            .with("start_after", Value::text_list(sorted(&self.start_after)))
            .with("target", Value::text_map(self.target.clone()))
    }

    fn rules() -> RecordRules {
        RecordRules::none()
            .required("name")
            .required("action_id")
            .format("action_id", "aws:<service>:<action>", is_action_id)
    }
}

impl FromRecord for ExperimentAction {
    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        let action_id = record.text("action_id")?;
        if !is_action_id(action_id) {
            return Err(ConversionError::InvalidValue {
                field: "action_id".to_string(),
                value: action_id.to_string(),
            });
        }
        Ok(Self {
            name: record.text("name")?.to_string(),
            action_id: action_id.to_string(),
            description: record.opt_text("description")?.map(str::to_string),
            parameter: record.text_map("parameter")?,
            start_after: record.text_list("start_after")?,
            target: record.text_map("target")?,
        })
    }
}

/// `aws:<service>:<action>`
fn is_action_id(s: &str) -> bool {
    let mut parts = s.splitn(3, ':');
    let (Some("aws"), Some(service), Some(action)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    !service.is_empty()
        && service
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase() || b == b'-')
        && !action.is_empty()
        && action
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'/' || b == b'-')
}

fn sorted(items: &[String]) -> Vec<String> {
    let mut out = items.to_vec();
    out.sort();
    out
}
