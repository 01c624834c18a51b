//! Schema Model Builder
//!
//! Renders a resolved [`Configuration`] into the model document the external
//! relational engine consumes. The operand is a nested map of
//! section → field → string value:
//!
//! ```json
//! {"azure":{"tenantId":"t1",...},"aws":{...},"cache":{"enabled":"true",...},"providers":"azure,aws"}
//! ```
//!
//! Output is built by hand rather than through a JSON serializer so field order
//! follows resolution order exactly and the same configuration always yields the
//! same bytes.

use std::fmt::{self, Write as _};

use crate::config::{Configuration, Provider};

/// Schema name exposed to SQL
pub const DEFAULT_SCHEMA: &str = "cloudops";

/// Factory the engine instantiates for the custom schema
pub const SCHEMA_FACTORY: &str = "org.apache.calcite.adapter.ops.CloudOpsSchemaFactory";

/// Model document version
pub const MODEL_VERSION: &str = "1.0";

/// Relations served by the custom schema
pub const RELATIONS: [&str; 7] = [
    "compute_resources",
    "storage_resources",
    "network_resources",
    "database_resources",
    "kubernetes_clusters",
    "container_registries",
    "iam_resources",
];

/// Returns true for a relation in the catalog (case-insensitive)
#[must_use]
pub fn is_relation(name: &str) -> bool {
    RELATIONS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Escape a value for embedding inside a JSON string literal
///
/// Covers backslash, double quote, newline, carriage return and tab.
#[must_use]
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Connection options appended to the engine URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub scheme: String,
    pub lex: String,
    pub unquoted_casing: String,
    pub quoting: String,
    pub case_sensitive: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scheme: "jdbc:calcite:".to_string(),
            lex: "ORACLE".to_string(),
            unquoted_casing: "TO_LOWER".to_string(),
            quoting: "DOUBLE_QUOTE".to_string(),
            case_sensitive: false,
        }
    }
}

/// A named group of string fields in the operand
#[derive(Clone, PartialEq, Eq)]
struct Section {
    name: String,
    fields: Vec<(String, String)>,
}

/// Engine model for one connection
///
/// Holds credentials, so `Debug` prints section and field names only.
#[derive(Clone, PartialEq, Eq)]
pub struct SchemaModel {
    sections: Vec<Section>,
    enabled: Vec<Provider>,
}

impl SchemaModel {
    /// Build the model for a configuration
    ///
    /// Provider sections appear in canonical provider order with fields in
    /// resolution order, followed by the `cache` section and, when any provider
    /// is enabled, the `providers` selection.
    #[must_use]
    pub fn build(config: &Configuration) -> Self {
        let mut sections: Vec<Section> = config
            .providers()
            .iter()
            .map(|creds| Section {
                name: creds.provider().as_str().to_string(),
                fields: creds
                    .fields()
                    .map(|(spec, value)| (spec.name().to_string(), value.to_string()))
                    .collect(),
            })
            .collect();

        let policy = config.cache_policy();
        sections.push(Section {
            name: "cache".to_string(),
            fields: vec![
                ("enabled".to_string(), policy.enabled.to_string()),
                ("ttlMinutes".to_string(), policy.ttl_minutes().to_string()),
                ("debugMode".to_string(), policy.debug_mode.to_string()),
            ],
        });

        Self { sections, enabled: config.enabled_providers().iter().copied().collect() }
    }

    /// Providers the engine should query
    #[must_use]
    pub fn enabled_providers(&self) -> &[Provider] {
        &self.enabled
    }

    /// Value of `section.field`, if present
    #[must_use]
    pub fn field(&self, section: &str, field: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section)?
            .fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Section names in output order
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    /// The operand object on its own
    #[must_use]
    pub fn operand_json(&self) -> String {
        let mut out = String::from("{");
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "\"{}\":{{", escape(&section.name));
            for (j, (name, value)) in section.fields.iter().enumerate() {
                if j > 0 {
                    out.push(',');
                }
                let _ = write!(out, "\"{}\":\"{}\"", escape(name), escape(value));
            }
            out.push('}');
        }
        if !self.enabled.is_empty() {
            let joined = self.enabled.iter().map(Provider::as_str).collect::<Vec<_>>().join(",");
            let _ = write!(out, ",\"providers\":\"{}\"", escape(&joined));
        }
        out.push('}');
        out
    }

    /// Full model document, without the `inline:` prefix
    #[must_use]
    pub fn to_json(&self) -> String {
        format!(
            "{{\"version\":\"{MODEL_VERSION}\",\"defaultSchema\":\"{DEFAULT_SCHEMA}\",\"schemas\":[{{\"name\":\"{DEFAULT_SCHEMA}\",\"type\":\"custom\",\"factory\":\"{SCHEMA_FACTORY}\",\"operand\":{}}}]}}",
            self.operand_json()
        )
    }

    /// Model document in the engine's inline form
    #[must_use]
    pub fn to_inline(&self) -> String {
        format!("inline:{}", self.to_json())
    }

    /// Engine connection string for this model
    #[must_use]
    pub fn engine_url(&self, options: &EngineOptions) -> String {
        format!(
            "{}model={};lex={};unquotedCasing={};quoting={};caseSensitive={}",
            options.scheme,
            self.to_inline(),
            options.lex,
            options.unquoted_casing,
            options.quoting,
            options.case_sensitive
        )
    }
}

impl fmt::Debug for SchemaModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("SchemaModel");
        for section in &self.sections {
            let names: Vec<&str> = section.fields.iter().map(|(n, _)| n.as_str()).collect();
            dbg.field(&section.name, &names);
        }
        dbg.field("enabled", &self.enabled).finish()
    }
}
