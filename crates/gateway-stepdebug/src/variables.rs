//! Display-only snapshots of the context variables visible to a policy run.
//!
//! The interpreter exposes its request/response data through [`VariableResolver`]; the
//! debugger turns that into a tree of [`DebugVariable`]s with every value already rendered
//! to text, so a snapshot never holds on to live message state.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::config::VariablesConfig;

/// A value as reported by the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    List(Vec<VariableValue>),
    /// A structured value (a message, a header set, ...) whose interesting parts are its
    /// named children.
    Object {
        type_name: String,
        summary: Option<String>,
    },
}

impl VariableValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn object(type_name: impl Into<String>) -> Self {
        Self::Object {
            type_name: type_name.into(),
            summary: None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "string",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Boolean(_) => "boolean",
            Self::Bytes(_) => "binary",
            Self::List(_) => "list",
            Self::Object { type_name, .. } => type_name,
        }
    }

    fn render_into(&self, out: &mut String, nested: bool) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Text(text) if nested => {
                let _ = write!(out, "{text:?}");
            }
            Self::Text(text) => out.push_str(text),
            Self::Integer(value) => {
                let _ = write!(out, "{value}");
            }
            Self::Decimal(value) => {
                let _ = write!(out, "{value}");
            }
            Self::Boolean(value) => {
                let _ = write!(out, "{value}");
            }
            Self::Bytes(bytes) => {
                let _ = write!(out, "<{} bytes>", bytes.len());
            }
            Self::List(items) => {
                out.push('[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    item.render_into(out, true);
                }
                out.push(']');
            }
            Self::Object { type_name, summary } => {
                out.push_str(summary.as_deref().unwrap_or(type_name));
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, false);
        out
    }
}

/// Result of resolving one variable name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVariable {
    pub value: VariableValue,
    /// Child name suffixes. A child `c` of variable `v` is resolved as `v.c`.
    pub children: Vec<String>,
}

impl ResolvedVariable {
    pub fn new(value: VariableValue) -> Self {
        Self {
            value,
            children: Vec::new(),
        }
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }
}

/// Read access to the variables of the request being processed.
///
/// Implemented by the interpreter integration. Called on the worker thread, on the critical
/// path of every node visited while a session is armed, so it must be cheap.
pub trait VariableResolver {
    /// Variables shown at every stop regardless of the operator's selection
    /// (typically `request` and `response`).
    fn builtin_names(&self) -> Vec<String>;

    fn resolve(&self, name: &str) -> Option<ResolvedVariable>;
}

/// A rendered variable, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugVariable {
    /// Fully qualified dotted name (`request.http.method`).
    pub name: String,
    pub value: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DebugVariable>,
}

impl DebugVariable {
    fn undefined(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: "<not set>".to_owned(),
            type_name: "undefined".to_owned(),
            children: Vec::new(),
        }
    }

    /// Depth-first search for `name` in this variable and its children.
    pub fn find(&self, name: &str) -> Option<&DebugVariable> {
        if self.name == name {
            return Some(self);
        }
        if !name.starts_with(self.name.as_str()) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

/// Tree of rendered variables captured at one point of a policy run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSnapshot {
    variables: BTreeMap<String, DebugVariable>,
}

impl VariableSnapshot {
    /// Captures the resolver's built-in variables plus `extra_names`.
    ///
    /// Built-ins the resolver cannot resolve are omitted; extra names that do not resolve
    /// are kept with an `undefined` placeholder so the operator can see the lookup failed.
    /// Nested expansion stops once `limits.max_nodes` variables have been rendered.
    pub fn capture<'a>(
        resolver: &dyn VariableResolver,
        extra_names: impl IntoIterator<Item = &'a str>,
        limits: &VariablesConfig,
    ) -> Self {
        let mut variables = BTreeMap::new();
        let mut budget = limits.max_nodes;

        for name in resolver.builtin_names() {
            if variables.contains_key(&name) {
                continue;
            }
            if let Some(resolved) = resolver.resolve(&name) {
                budget = budget.saturating_sub(1);
                let variable =
                    render_variable(resolver, &name, resolved, 0, limits, &mut budget);
                variables.insert(name, variable);
            }
        }

        for name in extra_names {
            if variables.contains_key(name) {
                continue;
            }
            let variable = match resolver.resolve(name) {
                Some(resolved) => {
                    budget = budget.saturating_sub(1);
                    render_variable(resolver, name, resolved, 0, limits, &mut budget)
                }
                None => DebugVariable::undefined(name),
            };
            variables.insert(name.to_owned(), variable);
        }

        Self { variables }
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn get(&self, name: &str) -> Option<&DebugVariable> {
        self.variables.get(name)
    }

    /// Looks `name` up among top-level variables first, then inside structured ones.
    pub fn find(&self, name: &str) -> Option<&DebugVariable> {
        self.variables
            .get(name)
            .or_else(|| self.variables.values().find_map(|var| var.find(name)))
    }

    pub fn clear(&mut self) {
        self.variables.clear();
    }

    /// Top-level variables ordered by name.
    pub fn to_vec(&self) -> Vec<DebugVariable> {
        self.variables.values().cloned().collect()
    }
}

fn render_variable(
    resolver: &dyn VariableResolver,
    name: &str,
    resolved: ResolvedVariable,
    depth: usize,
    limits: &VariablesConfig,
    budget: &mut usize,
) -> DebugVariable {
    let ResolvedVariable { value, children } = resolved;

    let mut rendered_children = Vec::new();
    if depth < limits.max_depth {
        for child in children.iter().take(limits.max_children) {
            if *budget == 0 {
                break;
            }
            let child_name = format!("{name}.{child}");
            if let Some(child_resolved) = resolver.resolve(&child_name) {
                *budget -= 1;
                rendered_children.push(render_variable(
                    resolver,
                    &child_name,
                    child_resolved,
                    depth + 1,
                    limits,
                    budget,
                ));
            }
        }
    }

    DebugVariable {
        name: name.to_owned(),
        value: truncate_chars(value.render(), limits.max_value_chars),
        type_name: value.type_name().to_owned(),
        children: rendered_children,
    }
}

fn truncate_chars(value: String, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut truncated = value[..cut].to_owned();
            truncated.push_str("...");
            truncated
        }
        None => value,
    }
}
