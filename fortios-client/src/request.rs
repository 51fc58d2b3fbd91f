//! Request descriptors and the request builder.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::ValidationError;
use crate::response::RequestMetadata;

/// Bytes left unescaped in a path segment: ALPHA / DIGIT / "-" / "_" / "." / "~".
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Comparison operators understood by FortiOS filter expressions.
const FILTER_OPERATORS: [&str; 8] = ["==", "!=", "=@", "!@", "<=", ">=", "<", ">"];

/// Percent-encode a value for use as a single URL path segment.
///
/// Input is never decoded first, so a literal `%` becomes `%25`.
///
/// ```
/// use fortios_client::encode_path_component;
///
/// assert_eq!(encode_path_component("test address"), "test%20address");
/// assert_eq!(encode_path_component("10.0.0.0/8"), "10.0.0.0%2F8");
/// ```
pub fn encode_path_component(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// Whether a raw path segment would be resolved away as `.` or `..` when
/// the URL is parsed, including its percent-encoded spellings.
pub(crate) fn is_dot_segment(segment: &str) -> bool {
    matches!(
        segment.to_ascii_lowercase().as_str(),
        "." | ".." | "%2e" | ".%2e" | "%2e." | "%2e%2e"
    )
}

/// FortiOS API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// Configuration database.
    Cmdb,
    /// Runtime monitor endpoints.
    Monitor,
    /// Log retrieval.
    Log,
}

impl ApiType {
    /// URL segment for this API family.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cmdb => "cmdb",
            Self::Monitor => "monitor",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP methods used by the FortiOS API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the method mutates backend state.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get)
    }

    pub(crate) fn to_http(self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
            Self::Delete => http::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Virtual-domain scope of a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The client's configured default vdom, or none.
    #[default]
    Default,
    /// Global scope.
    Global,
    /// A specific vdom.
    Named(String),
}

impl Scope {
    /// Query parameter selecting this scope.
    pub(crate) fn query_pair(&self, default_vdom: Option<&str>) -> Option<(&'static str, String)> {
        match self {
            Self::Default => default_vdom.map(|vdom| ("vdom", vdom.to_string())),
            Self::Global => Some(("global", "1".to_string())),
            Self::Named(name) => Some(("vdom", name.clone())),
        }
    }
}

impl From<&str> for Scope {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for Scope {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<bool> for Scope {
    fn from(global: bool) -> Self {
        if global { Self::Global } else { Self::Default }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Global => f.write_str("global"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Query parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Repeats the query key once per element.
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Values as they appear on the wire, one per repeated key.
    pub fn query_values(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.iter().flat_map(ParamValue::query_values).collect(),
            scalar => vec![scalar.to_string()],
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            // `i64::MAX as f64` rounds up to 2^63, which is out of range.
            Self::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Some(*f as i64)
            }
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u16> for ParamValue {
    fn from(v: u16) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Ordered query parameters. Inserting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the one it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert only when a value was supplied. `Some(false)`, `Some(0)` and
    /// `Some("")` are kept.
    pub fn with_opt<V: Into<ParamValue>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Merge `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: Params) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into wire pairs; list values repeat their key.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .flat_map(|(key, value)| {
                value
                    .query_values()
                    .into_iter()
                    .map(move |v| (key.clone(), v))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// A caller-supplied filter: one expression (possibly pre-joined) or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Single(String),
    List(Vec<String>),
}

impl From<&str> for Filter {
    fn from(v: &str) -> Self {
        Self::Single(v.to_string())
    }
}

impl From<String> for Filter {
    fn from(v: String) -> Self {
        Self::Single(v)
    }
}

impl From<Vec<String>> for Filter {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

impl From<Vec<&str>> for Filter {
    fn from(v: Vec<&str>) -> Self {
        Self::List(v.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Filter {
    fn from(v: &[&str]) -> Self {
        Self::List(v.iter().map(|s| s.to_string()).collect())
    }
}

/// Normalize a filter into one expression per `filter` query key.
///
/// A leading `filter=` is stripped and pre-joined input is split on
/// `&filter=`, and on a bare `&` when the text after it is itself an
/// expression. Segments are ANDed by the backend, so order is preserved.
///
/// ```
/// use fortios_client::normalize_filter;
///
/// let joined = normalize_filter("name==a&filter=name==b").unwrap();
/// let listed = normalize_filter(vec!["name==a", "name==b"]).unwrap();
/// assert_eq!(joined, listed);
/// assert_eq!(listed, vec!["name==a", "name==b"]);
/// ```
pub fn normalize_filter(filter: impl Into<Filter>) -> Result<Vec<String>, ValidationError> {
    let inputs = match filter.into() {
        Filter::Single(s) => vec![s],
        Filter::List(items) => items,
    };

    let mut normalized = Vec::new();
    for input in &inputs {
        normalized.extend(split_filter(input)?);
    }

    if normalized.is_empty() {
        return Err(ValidationError::new("filter", "filter expression must not be empty")
            .with_constraint("filter"));
    }
    Ok(normalized)
}

fn split_filter(input: &str) -> Result<Vec<String>, ValidationError> {
    let stripped = input.strip_prefix("filter=").unwrap_or(input);

    let mut segments: Vec<String> = Vec::new();
    for part in stripped.split("&filter=") {
        let mut pieces = part.split('&');
        let mut current = pieces.next().unwrap_or_default().to_string();
        for piece in pieces {
            if is_filter_expression(piece) {
                segments.push(std::mem::take(&mut current));
                current = piece.to_string();
            } else {
                // `&` belongs to the value, e.g. `comment==R&D`.
                current.push('&');
                current.push_str(piece);
            }
        }
        segments.push(current);
    }

    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(ValidationError::new("filter", "filter contains an empty expression")
            .with_constraint("filter")
            .with_value(input));
    }
    Ok(segments)
}

fn is_filter_expression(text: &str) -> bool {
    let field_end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(text.len());
    field_end > 0 && FILTER_OPERATORS.iter().any(|op| text[field_end..].starts_with(op))
}

/// Declared constraint on an operation parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Any,
    /// Value must be one of the listed strings.
    OneOf(Vec<String>),
    /// Integer value within `min..=max`.
    Range { min: i64, max: i64 },
}

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub constraint: Constraint,
}

impl ParamSpec {
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Constraint::Any,
        }
    }

    pub fn one_of(name: impl Into<String>, allowed: &[&str]) -> Self {
        Self {
            name: name.into(),
            constraint: Constraint::OneOf(allowed.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn range(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            constraint: Constraint::Range { min, max },
        }
    }

    /// Validate a supplied value against this parameter's constraint.
    pub fn validate(&self, value: &ParamValue) -> Result<(), ValidationError> {
        if let ParamValue::List(items) = value {
            return items.iter().try_for_each(|item| self.validate(item));
        }

        match &self.constraint {
            Constraint::Any => Ok(()),
            Constraint::OneOf(allowed) => {
                let text = value.to_string();
                if allowed.iter().any(|a| *a == text) {
                    Ok(())
                } else {
                    Err(ValidationError::new(
                        &self.name,
                        format!("must be one of: {}", allowed.join(", ")),
                    )
                    .with_constraint("enum")
                    .with_value(text))
                }
            }
            Constraint::Range { min, max } => match value.as_i64() {
                Some(n) if n >= *min && n <= *max => Ok(()),
                Some(n) => Err(ValidationError::new(
                    &self.name,
                    format!("must be between {} and {}", min, max),
                )
                .with_constraint("range")
                .with_value(n.to_string())),
                None => Err(ValidationError::new(&self.name, "must be an integer")
                    .with_constraint("range")
                    .with_value(value.to_string())),
            },
        }
    }
}

/// Static description of one endpoint operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSpec {
    pub api_type: ApiType,
    pub method: HttpMethod,
    /// Collection path, e.g. `firewall/address`.
    pub path: String,
    /// Primary-key parameter appended to the path as one segment.
    pub mkey: Option<String>,
    pub mkey_required: bool,
    pub params: Vec<ParamSpec>,
}

impl OperationSpec {
    pub fn new(api_type: ApiType, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            api_type,
            method,
            path: path.into(),
            mkey: None,
            mkey_required: false,
            params: Vec::new(),
        }
    }

    /// Declare the primary-key parameter.
    pub fn with_mkey(mut self, name: impl Into<String>, required: bool) -> Self {
        self.mkey = Some(name.into());
        self.mkey_required = required;
        self
    }

    /// Declare a parameter.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Declare the `start`/`count` pagination parameters.
    pub fn paginated(self) -> Self {
        self.param(ParamSpec::range("start", 0, i64::MAX))
            .param(ParamSpec::range("count", 1, i64::MAX))
    }

    pub fn param_spec(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Start building a request for this operation.
    pub fn request(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self)
    }
}

/// A fully built request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    api_type: ApiType,
    method: HttpMethod,
    path: String,
    query: Params,
    body: Option<Value>,
    scope: Scope,
}

impl RequestDescriptor {
    /// Raw descriptor; `path` is used verbatim, so callers encode any
    /// identifier segments with [`encode_path_component`].
    pub fn new(api_type: ApiType, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            api_type,
            method,
            path: path.into(),
            query: Params::new(),
            body: None,
            scope: Scope::Default,
        }
    }

    pub fn with_query(mut self, query: Params) -> Self {
        self.query.merge(query);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn api_type(&self) -> ApiType {
        self.api_type
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &Params {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// `{api_type}/{path}`, as recorded in the operation log.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.api_type, self.path.trim_start_matches('/'))
    }

    pub fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            method: self.method,
            path: self.endpoint(),
            scope: self.scope.clone(),
        }
    }
}

/// Builds a [`RequestDescriptor`] for an [`OperationSpec`], validating
/// caller-supplied values against the declared parameters.
#[derive(Debug, Clone)]
pub struct RequestBuilder<'a> {
    spec: &'a OperationSpec,
    mkey: Option<ParamValue>,
    params: Params,
    extra: Params,
    filter: Option<Filter>,
    body: Option<Value>,
    scope: Scope,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(spec: &'a OperationSpec) -> Self {
        Self {
            spec,
            mkey: None,
            params: Params::new(),
            extra: Params::new(),
            filter: None,
            body: None,
            scope: Scope::Default,
        }
    }

    /// Set the primary-key value.
    pub fn mkey(mut self, value: impl Into<ParamValue>) -> Self {
        self.mkey = Some(value.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Set a parameter only when a value was supplied.
    pub fn param_opt<V: Into<ParamValue>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.params.insert(key, value);
        }
        self
    }

    /// Additional parameters, merged after everything else.
    pub fn extra(mut self, extra: Params) -> Self {
        self.extra.merge(extra);
        self
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Build the descriptor.
    pub fn build(self) -> Result<RequestDescriptor, ValidationError> {
        let spec = self.spec;
        let mut path = spec.path.trim_end_matches('/').to_string();

        if let Some(name) = &spec.mkey {
            let mkey = self.mkey.map(|v| v.to_string()).filter(|v| !v.is_empty());
            match mkey {
                Some(value) => {
                    let segment = encode_path_component(&value);
                    if is_dot_segment(&segment) {
                        return Err(ValidationError::new(name.as_str(), "cannot be '.' or '..'")
                            .with_constraint("mkey")
                            .with_value(value));
                    }
                    path.push('/');
                    path.push_str(&segment);
                }
                None if spec.mkey_required => {
                    return Err(ValidationError::new(name.as_str(), "is required")
                        .with_constraint("required"));
                }
                None => {}
            }
        }

        let mut query = self.params;
        if let Some(filter) = self.filter {
            let mut expressions = normalize_filter(filter)?;
            let value = if expressions.len() == 1 {
                ParamValue::Str(expressions.remove(0))
            } else {
                ParamValue::List(expressions.into_iter().map(ParamValue::Str).collect())
            };
            query.insert("filter", value);
        }
        query.merge(self.extra);

        for (key, value) in query.iter() {
            if let Some(param) = spec.param_spec(key) {
                param.validate(value)?;
            }
        }

        Ok(RequestDescriptor {
            api_type: spec.api_type,
            method: spec.method,
            path,
            query,
            body: self.body,
            scope: self.scope,
        })
    }
}

/// Anything the clients can turn into a request.
pub trait IntoRequest {
    /// Metadata echoed into responses, available before validation.
    fn metadata(&self) -> RequestMetadata;

    fn into_request(self) -> Result<RequestDescriptor, ValidationError>;
}

impl IntoRequest for RequestDescriptor {
    fn metadata(&self) -> RequestMetadata {
        RequestDescriptor::metadata(self)
    }

    fn into_request(self) -> Result<RequestDescriptor, ValidationError> {
        Ok(self)
    }
}

impl IntoRequest for RequestBuilder<'_> {
    fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            method: self.spec.method,
            path: format!("{}/{}", self.spec.api_type, self.spec.path),
            scope: self.scope.clone(),
        }
    }

    fn into_request(self) -> Result<RequestDescriptor, ValidationError> {
        self.build()
    }
}
