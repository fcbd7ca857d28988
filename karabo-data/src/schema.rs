//! Schema: a declarative description of a [`Container`]'s expected shape,
//! used to validate and normalize configuration containers.

use crate::container::Container;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Mandatory,
    Optional,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericBounds {
    pub min_inclusive: Option<f64>,
    pub max_inclusive: Option<f64>,
    pub min_exclusive: Option<f64>,
    pub max_exclusive: Option<f64>,
}

impl Default for NumericBounds {
    fn default() -> Self {
        Self { min_inclusive: None, max_inclusive: None, min_exclusive: None, max_exclusive: None }
    }
}

impl NumericBounds {
    fn check(&self, v: f64) -> bool {
        if let Some(min) = self.min_inclusive {
            if v < min {
                return false;
            }
        }
        if let Some(max) = self.max_inclusive {
            if v > max {
                return false;
            }
        }
        if let Some(min) = self.min_exclusive {
            if v <= min {
                return false;
            }
        }
        if let Some(max) = self.max_exclusive {
            if v >= max {
                return false;
            }
        }
        true
    }
}

/// The row schema for a table element is just another [`Schema`], nested.
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub key: String,
    pub access_mode: AccessMode,
    pub assignment: Assignment,
    pub default: Option<Value>,
    pub options: Vec<Value>,
    pub bounds: NumericBounds,
    pub allowed_states: Vec<String>,
    pub unit: Option<String>,
    pub metric_prefix: Option<String>,
    pub required_access_level: Option<u32>,
    pub tags: Vec<String>,
    pub display_type: Option<String>,
    pub alias: Option<Value>,
    pub row_schema: Option<Box<Schema>>,
}

impl ParamDescriptor {
    fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            access_mode: AccessMode::Write,
            assignment: Assignment::Optional,
            default: None,
            options: Vec::new(),
            bounds: NumericBounds::default(),
            allowed_states: Vec::new(),
            unit: None,
            metric_prefix: None,
            required_access_level: None,
            tags: Vec::new(),
            display_type: None,
            alias: None,
            row_schema: None,
        }
    }
}

/// A description of an expected configuration Container: a root name and a
/// set of parameter descriptors, keyed by dotted path.
#[derive(Debug, Clone)]
pub struct Schema {
    pub root_name: String,
    descriptors: Vec<ParamDescriptor>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.root_name == other.root_name && self.descriptors.len() == other.descriptors.len()
    }
}

impl Schema {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self { root_name: root_name.into(), descriptors: Vec::new() }
    }

    pub fn descriptors(&self) -> &[ParamDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, path: &str) -> Option<&ParamDescriptor> {
        self.descriptors.iter().find(|d| d.key == path)
    }

    pub(crate) fn push_descriptor(&mut self, descriptor: ParamDescriptor) {
        self.descriptors.push(descriptor);
    }

    /// Validate `input` against this schema. Returns the list of path
    /// errors (empty if valid) plus a normalized copy of `input` with
    /// missing optional/mandatory-with-default values filled in.
    pub fn validate(&self, input: &Container) -> (Vec<(String, String)>, Container) {
        let mut errors = Vec::new();
        let mut normalized = input.clone();

        for d in &self.descriptors {
            let present = normalized.get_path(&d.key).is_some();
            if !present {
                match (&d.assignment, &d.default) {
                    (Assignment::Mandatory, None) => {
                        errors.push((d.key.clone(), "mandatory parameter missing and has no default".to_string()));
                        continue;
                    }
                    (_, Some(default)) => {
                        if let Err(e) = normalized.set_path(&d.key, default.clone()) {
                            errors.push((d.key.clone(), e.to_string()));
                        }
                        continue;
                    }
                    (Assignment::Optional, None) | (Assignment::Internal, None) => continue,
                    (Assignment::Mandatory, Some(_)) => unreachable!(),
                }
            }

            let value = normalized.get_path(&d.key).unwrap();

            if !d.options.is_empty() && !d.options.contains(value) {
                errors.push((d.key.clone(), "value is not one of the allowed options".to_string()));
            }

            if let Some(v) = value.as_f64() {
                if !d.bounds.check(v) {
                    errors.push((d.key.clone(), "value is out of the configured numeric bounds".to_string()));
                }
            }
        }

        (errors, normalized)
    }
}

/// Fluent builder for [`Schema`] -- the single canonical API referenced by
/// the design notes; per-element GUI-oriented convenience wrappers are out
/// of scope and live above this layer.
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self { schema: Schema::new(root_name) }
    }

    pub fn param(mut self, key: impl Into<String>, configure: impl FnOnce(ParamBuilder) -> ParamBuilder) -> Self {
        let built = configure(ParamBuilder { descriptor: ParamDescriptor::new(key) }).descriptor;
        self.schema.descriptors.push(built);
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

pub struct ParamBuilder {
    descriptor: ParamDescriptor,
}

impl ParamBuilder {
    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.descriptor.access_mode = mode;
        self
    }

    pub fn assignment(mut self, assignment: Assignment) -> Self {
        self.descriptor.assignment = assignment;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.descriptor.default = Some(value.into());
        self
    }

    pub fn options(mut self, options: Vec<Value>) -> Self {
        self.descriptor.options = options;
        self
    }

    pub fn min_inc(mut self, v: f64) -> Self {
        self.descriptor.bounds.min_inclusive = Some(v);
        self
    }

    pub fn max_inc(mut self, v: f64) -> Self {
        self.descriptor.bounds.max_inclusive = Some(v);
        self
    }

    pub fn min_exc(mut self, v: f64) -> Self {
        self.descriptor.bounds.min_exclusive = Some(v);
        self
    }

    pub fn max_exc(mut self, v: f64) -> Self {
        self.descriptor.bounds.max_exclusive = Some(v);
        self
    }

    pub fn allowed_states(mut self, states: Vec<String>) -> Self {
        self.descriptor.allowed_states = states;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.descriptor.unit = Some(unit.into());
        self
    }

    pub fn metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.descriptor.metric_prefix = Some(prefix.into());
        self
    }

    pub fn required_access_level(mut self, level: u32) -> Self {
        self.descriptor.required_access_level = Some(level);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.descriptor.tags = tags;
        self
    }

    pub fn display_type(mut self, dt: impl Into<String>) -> Self {
        self.descriptor.display_type = Some(dt.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<Value>) -> Self {
        self.descriptor.alias = Some(alias.into());
        self
    }

    pub fn row_schema(mut self, schema: Schema) -> Self {
        self.descriptor.row_schema = Some(Box::new(schema));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_in_default() {
        let schema = SchemaBuilder::new("DataLoggerManager")
            .param("flushInterval", |p| p.default(40i32).assignment(Assignment::Optional).min_inc(1.0))
            .build();

        let input = Container::new();
        let (errors, normalized) = schema.validate(&input);
        assert!(errors.is_empty());
        assert_eq!(normalized.get("flushInterval"), Some(&Value::Int32(40)));
    }

    #[test]
    fn mandatory_without_default_errors() {
        let schema = SchemaBuilder::new("Device")
            .param("deviceId", |p| p.assignment(Assignment::Mandatory))
            .build();
        let (errors, _) = schema.validate(&Container::new());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "deviceId");
    }

    #[test]
    fn out_of_bounds_flagged() {
        let schema = SchemaBuilder::new("LoggerManager")
            .param("timeout", |p| p.default(500i32).min_inc(100.0).max_inc(60000.0))
            .build();
        let mut input = Container::new();
        input.set("timeout", 99999i32).unwrap();
        let (errors, _) = schema.validate(&input);
        assert_eq!(errors.len(), 1);
    }
}
