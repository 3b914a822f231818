//! Tool definition, schema derivation and validation

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::agents::domain::ToolDefinition;
use crate::agents::error::{AgentError, AgentResult};

/// Keyword arguments passed to a tool function
pub type ToolArgs = Map<String, Value>;

/// Type-erased async tool function
pub type ToolFn = Arc<dyn Fn(ToolArgs) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Name of the primary callable of every tool
pub const CALL_METHOD: &str = "call";

/// JSON schema types a tool parameter may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub const ALL: [ParamType; 6] = [
        ParamType::String,
        ParamType::Integer,
        ParamType::Number,
        ParamType::Boolean,
        ParamType::Object,
        ParamType::Array,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Map a declared Rust type name onto a schema type, defaulting to string
    pub fn from_rust_type(type_name: &str) -> Self {
        let ty = type_name.trim().trim_start_matches('&').trim();
        let ty = ty
            .strip_prefix("Option<")
            .and_then(|inner| inner.strip_suffix('>'))
            .unwrap_or(ty)
            .trim();
        let base = ty.split('<').next().unwrap_or(ty).rsplit("::").next().unwrap_or(ty);

        match base {
            "String" | "str" | "char" => ParamType::String,
            "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
            | "u128" | "usize" => ParamType::Integer,
            "f32" | "f64" => ParamType::Number,
            "bool" => ParamType::Boolean,
            "HashMap" | "BTreeMap" | "Map" | "Value" => ParamType::Object,
            "Vec" | "VecDeque" | "HashSet" | "BTreeSet" => ParamType::Array,
            _ if ty.starts_with('[') => ParamType::Array,
            _ => ParamType::String,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema entry for one tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn new(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A named, schema-described callable.
///
/// Immutable once built. The primary function is exposed as the
/// [`CALL_METHOD`] method; additional named methods may be attached for
/// direct invocation through `Agent::call_tool`.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: BTreeMap<String, ParamSpec>,
    methods: HashMap<String, ToolFn>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("methods", &methods)
            .finish()
    }
}

impl Tool {
    /// Start building a tool
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamSpec> {
        &self.parameters
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Invoke the primary function with keyword arguments
    pub async fn call(&self, args: ToolArgs) -> Result<Value, String> {
        self.call_method(CALL_METHOD, args).await
    }

    /// Invoke a named method with keyword arguments
    pub async fn call_method(&self, method: &str, args: ToolArgs) -> Result<Value, String> {
        let function = self
            .methods
            .get(method)
            .ok_or_else(|| format!("Tool '{}' has no method '{}'", self.name, method))?;

        if method == CALL_METHOD {
            let missing: Vec<&str> = self
                .parameters
                .iter()
                .filter(|(name, spec)| spec.required && !args.contains_key(name.as_str()))
                .map(|(name, _)| name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(format!(
                    "Tool '{}' requires arguments: {}",
                    self.name,
                    missing.join(", ")
                ));
            }
        }

        function(args).await
    }

    /// JSON Schema object describing the parameters
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    json!({
                        "type": spec.param_type.as_str(),
                        "description": spec.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Definition advertised to LLM providers
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description, self.parameters_schema())
    }
}

/// Builder for [`Tool`].
///
/// Parameters come from one of three places, in priority order: typed
/// [`ToolBuilder::param`] entries, a raw JSON map given to
/// [`ToolBuilder::parameters`] (validated strictly), or best-effort
/// derivation from [`ToolBuilder::doc`].
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    function: Option<ToolFn>,
    extra_methods: Vec<(String, ToolFn)>,
    raw_parameters: Option<Value>,
    typed_parameters: BTreeMap<String, ParamSpec>,
    doc: Option<String>,
    declared_types: HashMap<String, String>,
}

impl ToolBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            function: None,
            extra_methods: Vec::new(),
            raw_parameters: None,
            typed_parameters: BTreeMap::new(),
            doc: None,
            declared_types: HashMap::new(),
        }
    }

    /// Primary async function
    pub fn function<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.function = Some(erase(f));
        self
    }

    /// Primary function for synchronous work
    pub fn sync_function<F>(self, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Result<Value, String> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.function(move |args| {
            let f = f.clone();
            async move { f(args) }
        })
    }

    /// Additional named method reachable through `call_method`
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.extra_methods.push((name.into(), erase(f)));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Explicit parameter schema as a JSON map `name -> {type, description, required?}`
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.raw_parameters = Some(parameters);
        self
    }

    /// Typed parameter entry
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.typed_parameters.insert(name.into(), spec);
        self
    }

    /// Documentation comment used to derive a missing description/schema
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Declared parameter types (`name`, Rust type name) used during derivation
    pub fn declared_types<I, K, V>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.declared_types
            .extend(types.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> AgentResult<Tool> {
        let function = self.function.ok_or_else(|| {
            AgentError::Configuration(format!("Function is required for tool '{}'", self.name))
        })?;

        let doc = self.doc.unwrap_or_default();

        let description = match self.description {
            Some(description) => description,
            None => doc
                .split("\n\n")
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
        };

        let parameters = if !self.typed_parameters.is_empty() {
            self.typed_parameters
        } else if let Some(raw) = &self.raw_parameters {
            validate_parameters(raw)?
        } else {
            derive_parameters(&doc, &self.declared_types)
        };

        let mut methods = HashMap::new();
        methods.insert(CALL_METHOD.to_string(), function);
        for (name, method) in self.extra_methods {
            methods.insert(name, method);
        }

        Ok(Tool {
            name: self.name,
            description,
            parameters,
            methods,
        })
    }
}

fn erase<F, Fut>(f: F) -> ToolFn
where
    F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)) as BoxFuture<'static, Result<Value, String>>)
}

/// Validate an explicit parameter map
fn validate_parameters(raw: &Value) -> AgentResult<BTreeMap<String, ParamSpec>> {
    let entries = raw
        .as_object()
        .ok_or_else(|| AgentError::Validation("Tool parameters must be a JSON object".to_string()))?;

    let mut parameters = BTreeMap::new();
    for (name, info) in entries {
        let info = info.as_object().ok_or_else(|| {
            AgentError::Validation(format!("Parameter {} info must be an object", name))
        })?;

        for key in ["type", "description"] {
            if !info.contains_key(key) {
                return Err(AgentError::Validation(format!(
                    "Parameter {} missing required info: {}",
                    name, key
                )));
            }
        }

        let type_name = info.get("type").and_then(Value::as_str).unwrap_or_default();
        let param_type = ParamType::parse(type_name).ok_or_else(|| {
            let valid: Vec<&str> = ParamType::ALL.iter().map(|t| t.as_str()).collect();
            AgentError::Validation(format!(
                "Parameter {} has invalid type. Must be one of: {}",
                name,
                valid.join(", ")
            ))
        })?;

        let description = info
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AgentError::Validation(format!("Parameter {} description must be a string", name))
            })?;

        let required = info.get("required").and_then(Value::as_bool).unwrap_or(false);

        parameters.insert(
            name.clone(),
            ParamSpec {
                param_type,
                description: description.to_string(),
                required,
            },
        );
    }

    Ok(parameters)
}

/// Best-effort schema derivation from `- name: description` lines
fn derive_parameters(doc: &str, declared_types: &HashMap<String, String>) -> BTreeMap<String, ParamSpec> {
    let mut parameters = BTreeMap::new();

    for line in doc.lines() {
        let Some(entry) = line.trim().strip_prefix("- ") else {
            continue;
        };
        let Some((name, description)) = entry.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name == "self" || name.contains(char::is_whitespace) {
            continue;
        }

        let param_type = declared_types
            .get(name)
            .map(|ty| ParamType::from_rust_type(ty))
            .unwrap_or(ParamType::String);

        parameters.insert(name.to_string(), ParamSpec::new(param_type, description.trim()));
    }

    parameters
}
