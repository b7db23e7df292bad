use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a parent object. Dependents share it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels(pub BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }

    pub fn selector(self) -> LabelSelector {
        LabelSelector {
            match_labels: Some(self.0),
            match_expressions: None,
        }
    }
}

/// Renders a label selector the way `kubectl` and the scale subresource expect
/// it, e.g. `app=app-foo,tier in (web,api)`. An empty selector is `<none>`.
pub fn format_label_selector(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    parts.extend(
        selector
            .match_expressions
            .iter()
            .flatten()
            .filter_map(format_requirement),
    );

    if parts.is_empty() {
        "<none>".to_string()
    } else {
        parts.join(",")
    }
}

fn format_requirement(req: &LabelSelectorRequirement) -> Option<String> {
    let mut values = req.values.clone().unwrap_or_default();
    values.sort();
    let values = values.join(",");
    match req.operator.as_str() {
        "In" => Some(format!("{} in ({values})", req.key)),
        "NotIn" => Some(format!("{} notin ({values})", req.key)),
        "Exists" => Some(req.key.clone()),
        "DoesNotExist" => Some(format!("!{}", req.key)),
        _ => None,
    }
}
