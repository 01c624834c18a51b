//! Configuration Resolution
//!
//! This module turns a connection descriptor into an immutable [`Configuration`]
//! snapshot: per-provider credentials, the enabled-provider set, and cache policy.
//!
//! # Resolution Precedence
//! 1. Explicit descriptor parameters (highest priority)
//! 2. Connection properties supplied alongside the descriptor
//! 3. Environment variables
//! 4. Built-in defaults
//!
//! # Validation
//! Validation is eager. A provider with some but not all of its required fields
//! fails the connection attempt with the missing field names. Values that look like
//! unfilled templates (`your-...`, `/path/to/...`) count as missing.
//!
//! Unparsable cache settings never fail a connection; they fall back to their
//! defaults and are recorded as [`ParseWarning`]s.

pub mod descriptor;
pub mod env;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::error::{CloudOpsError, Result};

pub use descriptor::{accepts, parse, parse_fragments, Fragment, RawParams, SkipReason, SCHEME};
pub use env::{EnvSource, MapEnv, ProcessEnv};

/// Default cache TTL in minutes
pub const DEFAULT_TTL_MINUTES: u64 = 5;

/// Descriptor key for the provider allow-list
pub const PROVIDERS_KEY: &str = "providers";

const CACHE_ENABLED: SettingSpec =
    SettingSpec { key: "cache.enabled", env: "CLOUDOPS_CACHE_ENABLED" };
const CACHE_TTL_MINUTES: SettingSpec =
    SettingSpec { key: "cache.ttlMinutes", env: "CLOUDOPS_CACHE_TTL_MINUTES" };
const CACHE_DEBUG_MODE: SettingSpec =
    SettingSpec { key: "cache.debugMode", env: "CLOUDOPS_CACHE_DEBUG_MODE" };
const PROVIDERS: SettingSpec = SettingSpec { key: PROVIDERS_KEY, env: "CLOUDOPS_PROVIDERS" };

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Azure,
    Gcp,
    Aws,
}

impl Provider {
    /// All providers in canonical order
    pub const ALL: [Self; 3] = [Self::Azure, Self::Gcp, Self::Aws];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::Aws => "aws",
        }
    }

    /// Look up a provider by name, ignoring case and surrounding whitespace
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|p| p.as_str().eq_ignore_ascii_case(name))
    }

    /// Credential fields recognized for this provider, in canonical order
    #[must_use]
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Azure => &AZURE_FIELDS,
            Self::Gcp => &GCP_FIELDS,
            Self::Aws => &AWS_FIELDS,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognized credential field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Descriptor key, e.g. `azure.tenantId`
    pub key: &'static str,
    /// Equivalent environment variable
    pub env: &'static str,
    pub required: bool,
    /// Never logged or rendered in the redacted view
    pub secret: bool,
}

impl FieldSpec {
    const fn required(key: &'static str, env: &'static str) -> Self {
        Self { key, env, required: true, secret: false }
    }

    const fn secret(key: &'static str, env: &'static str) -> Self {
        Self { key, env, required: true, secret: true }
    }

    const fn optional(key: &'static str, env: &'static str) -> Self {
        Self { key, env, required: false, secret: false }
    }

    /// Field name without the provider prefix (`tenantId` for `azure.tenantId`)
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.key.split_once('.').map_or(self.key, |(_, name)| name)
    }
}

static AZURE_FIELDS: [FieldSpec; 4] = [
    FieldSpec::required("azure.tenantId", "AZURE_TENANT_ID"),
    FieldSpec::required("azure.clientId", "AZURE_CLIENT_ID"),
    FieldSpec::secret("azure.clientSecret", "AZURE_CLIENT_SECRET"),
    FieldSpec::required("azure.subscriptionIds", "AZURE_SUBSCRIPTION_IDS"),
];

static GCP_FIELDS: [FieldSpec; 2] = [
    FieldSpec::required("gcp.projectIds", "GCP_PROJECT_IDS"),
    FieldSpec::required("gcp.credentialsPath", "GOOGLE_APPLICATION_CREDENTIALS"),
];

static AWS_FIELDS: [FieldSpec; 5] = [
    FieldSpec::required("aws.accountIds", "AWS_ACCOUNT_IDS"),
    FieldSpec::required("aws.region", "AWS_REGION"),
    FieldSpec::required("aws.accessKeyId", "AWS_ACCESS_KEY_ID"),
    FieldSpec::secret("aws.secretAccessKey", "AWS_SECRET_ACCESS_KEY"),
    FieldSpec::optional("aws.roleArn", "AWS_ROLE_ARN"),
];

/// A non-credential setting and its environment equivalent
#[derive(Debug, Clone, Copy)]
struct SettingSpec {
    key: &'static str,
    env: &'static str,
}

/// Returns true for values left at a sample/template value
#[must_use]
pub fn is_placeholder(value: &str) -> bool {
    value.contains("your-") || value.contains("/path/to/")
}

/// Credential fields gathered for one provider
///
/// Fields keep canonical order. `Debug` redacts secret values.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    provider: Provider,
    fields: Vec<(FieldSpec, String)>,
}

impl ProviderCredentials {
    #[must_use]
    pub const fn new(provider: Provider) -> Self {
        Self { provider, fields: Vec::new() }
    }

    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Value of a field by descriptor key or bare field name
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(spec, _)| spec.key == field || spec.name() == field)
            .map(|(_, value)| value.as_str())
    }

    /// Fields in insertion (canonical) order
    pub fn fields(&self) -> impl Iterator<Item = (&FieldSpec, &str)> {
        self.fields.iter().map(|(spec, value)| (spec, value.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Descriptor keys of required fields that are absent
    #[must_use]
    pub fn missing_required(&self) -> Vec<String> {
        self.provider
            .fields()
            .iter()
            .filter(|spec| spec.required && self.get(spec.key).is_none())
            .map(|spec| spec.key.to_string())
            .collect()
    }

    /// True when at least one required field is present
    fn has_required_field(&self) -> bool {
        self.fields.iter().any(|(spec, _)| spec.required)
    }

    fn push(&mut self, spec: FieldSpec, value: String) {
        self.fields.push((spec, value));
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        map.entry(&"provider", &self.provider.as_str());
        for (spec, value) in &self.fields {
            if spec.secret {
                map.entry(&spec.key, &"<redacted>");
            } else {
                map.entry(&spec.key, value);
            }
        }
        map.finish()
    }
}

/// Cache behaviour for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachePolicy {
    pub enabled: bool,
    #[serde(serialize_with = "serialize_minutes", rename = "ttl_minutes")]
    pub ttl: Duration,
    pub debug_mode: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(DEFAULT_TTL_MINUTES * 60),
            debug_mode: false,
        }
    }
}

impl CachePolicy {
    /// Policy with caching switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    #[must_use]
    pub const fn ttl_minutes(&self) -> u64 {
        self.ttl.as_secs() / 60
    }
}

fn serialize_minutes<S: serde::Serializer>(ttl: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(ttl.as_secs() / 60)
}

/// A setting that could not be parsed and fell back to its default
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub key: String,
    pub value: String,
    pub fallback: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid value '{}' for {}; using default {}", self.value, self.key, self.fallback)
    }
}

/// Options controlling validation strictness
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Fail when no provider ends up enabled
    pub require_provider: bool,
}

/// Immutable configuration snapshot for one connection attempt
#[derive(Debug, Clone)]
pub struct Configuration {
    providers: Vec<ProviderCredentials>,
    enabled: BTreeSet<Provider>,
    cache: CachePolicy,
    warnings: Vec<ParseWarning>,
    fingerprint: String,
}

impl Configuration {
    /// Configured providers in canonical order
    #[must_use]
    pub fn providers(&self) -> &[ProviderCredentials] {
        &self.providers
    }

    #[must_use]
    pub fn provider(&self, provider: Provider) -> Option<&ProviderCredentials> {
        self.providers.iter().find(|p| p.provider == provider)
    }

    #[must_use]
    pub const fn enabled_providers(&self) -> &BTreeSet<Provider> {
        &self.enabled
    }

    #[must_use]
    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.enabled.contains(&provider)
    }

    #[must_use]
    pub const fn cache_policy(&self) -> &CachePolicy {
        &self.cache
    }

    #[must_use]
    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// Hex SHA-256 over provider credentials and the enabled-provider set
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Serializable view with secret values masked
    #[must_use]
    pub fn redacted(&self) -> RedactedConfiguration {
        let providers = self
            .providers
            .iter()
            .map(|creds| RedactedProvider {
                provider: creds.provider,
                fields: creds
                    .fields
                    .iter()
                    .map(|(spec, value)| {
                        let shown = if spec.secret { "<redacted>".to_string() } else { value.clone() };
                        (spec.key.to_string(), shown)
                    })
                    .collect(),
            })
            .collect();

        RedactedConfiguration {
            providers,
            enabled_providers: self.enabled.iter().copied().collect(),
            cache: self.cache,
            warnings: self.warnings.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Redacted configuration, safe for output
#[derive(Debug, Clone, Serialize)]
pub struct RedactedConfiguration {
    pub providers: Vec<RedactedProvider>,
    pub enabled_providers: Vec<Provider>,
    pub cache: CachePolicy,
    pub warnings: Vec<ParseWarning>,
    pub fingerprint: String,
}

/// Redacted provider credentials
#[derive(Debug, Clone, Serialize)]
pub struct RedactedProvider {
    pub provider: Provider,
    pub fields: Vec<(String, String)>,
}

/// The ordered sources a value may come from
struct Layers<'a> {
    descriptor: &'a RawParams,
    properties: &'a RawParams,
    env: &'a dyn EnvSource,
}

impl Layers<'_> {
    /// First non-blank value across descriptor, properties, then environment
    fn lookup(&self, key: &str, env_name: &str) -> Option<String> {
        let non_blank = |v: &str| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };

        self.descriptor
            .get(key)
            .and_then(non_blank)
            .or_else(|| self.properties.get(key).and_then(non_blank))
            .or_else(|| self.env.var(env_name).as_deref().and_then(non_blank))
    }
}

/// Resolve a configuration from layered sources and validate it
///
/// `descriptor` holds the parsed descriptor parameters and `properties` the
/// connection properties passed alongside it (may be empty).
pub fn resolve(
    descriptor: &RawParams,
    properties: &RawParams,
    env: &dyn EnvSource,
    options: ResolveOptions,
) -> Result<Configuration> {
    let layers = Layers { descriptor, properties, env };

    let candidates = gather_credentials(&layers);
    let providers = validate_providers(candidates)?;
    let configured: BTreeSet<Provider> = providers.iter().map(|p| p.provider).collect();

    let enabled = match layers.lookup(PROVIDERS.key, PROVIDERS.env) {
        Some(list) => select_providers(&list, &configured)?,
        None => configured,
    };

    if options.require_provider && enabled.is_empty() {
        return Err(CloudOpsError::config_error(format!(
            "No cloud provider is configured; supply credentials for at least one of {}",
            provider_names()
        )));
    }

    let mut warnings = Vec::new();
    let cache = resolve_cache_policy(&layers, &mut warnings);
    for warning in &warnings {
        tracing::warn!(key = %warning.key, fallback = %warning.fallback, "{warning}");
    }

    let fingerprint = fingerprint(&providers, &enabled);
    tracing::debug!(
        providers = ?providers.iter().map(|p| p.provider.as_str()).collect::<Vec<_>>(),
        enabled = ?enabled.iter().map(Provider::as_str).collect::<Vec<_>>(),
        cache_enabled = cache.enabled,
        ttl_minutes = cache.ttl_minutes(),
        "Resolved configuration"
    );

    Ok(Configuration { providers, enabled, cache, warnings, fingerprint })
}

/// Collect whatever credential fields each provider has, placeholders excluded
fn gather_credentials(layers: &Layers<'_>) -> Vec<ProviderCredentials> {
    Provider::ALL
        .into_iter()
        .map(|provider| {
            let mut creds = ProviderCredentials::new(provider);
            for spec in provider.fields() {
                match layers.lookup(spec.key, spec.env) {
                    Some(value) if is_placeholder(&value) => {
                        tracing::debug!(field = spec.key, "Ignoring placeholder value");
                    }
                    Some(value) => creds.push(*spec, value),
                    None => {}
                }
            }
            creds
        })
        .collect()
}

/// Keep complete providers, drop absent ones, reject partial ones
///
/// A provider counts as present once any required field is set. Optional fields
/// alone (such as `aws.roleArn`) do not make a provider present.
pub fn validate_providers(candidates: Vec<ProviderCredentials>) -> Result<Vec<ProviderCredentials>> {
    let mut configured = Vec::new();
    for creds in candidates {
        if !creds.has_required_field() {
            continue;
        }
        let missing = creds.missing_required();
        if !missing.is_empty() {
            return Err(CloudOpsError::incomplete_provider(creds.provider.as_str(), missing));
        }
        configured.push(creds);
    }
    Ok(configured)
}

/// Apply the comma-separated allow-list to the configured providers
fn select_providers(list: &str, configured: &BTreeSet<Provider>) -> Result<BTreeSet<Provider>> {
    let mut enabled = BTreeSet::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let provider = Provider::from_name(name).ok_or_else(|| {
            CloudOpsError::config_error(format!(
                "Unknown provider '{name}' in {PROVIDERS_KEY}; expected one of {}",
                provider_names()
            ))
        })?;
        if configured.contains(&provider) {
            enabled.insert(provider);
        } else {
            tracing::warn!(provider = provider.as_str(), "Selected provider has no credentials; skipping");
        }
    }
    Ok(enabled)
}

fn resolve_cache_policy(layers: &Layers<'_>, warnings: &mut Vec<ParseWarning>) -> CachePolicy {
    let defaults = CachePolicy::default();

    let enabled = parse_bool(layers, CACHE_ENABLED, defaults.enabled, warnings);
    let debug_mode = parse_bool(layers, CACHE_DEBUG_MODE, defaults.debug_mode, warnings);
    let ttl = match layers.lookup(CACHE_TTL_MINUTES.key, CACHE_TTL_MINUTES.env) {
        None => defaults.ttl,
        Some(raw) => match parse_ttl_minutes(&raw) {
            Some(ttl) => ttl,
            None => {
                warnings.push(ParseWarning {
                    key: CACHE_TTL_MINUTES.key.to_string(),
                    value: raw,
                    fallback: DEFAULT_TTL_MINUTES.to_string(),
                });
                defaults.ttl
            }
        },
    };

    CachePolicy { enabled, ttl, debug_mode }
}

fn parse_bool(
    layers: &Layers<'_>,
    setting: SettingSpec,
    default: bool,
    warnings: &mut Vec<ParseWarning>,
) -> bool {
    let Some(raw) = layers.lookup(setting.key, setting.env) else {
        return default;
    };
    if raw.eq_ignore_ascii_case("true") {
        true
    } else if raw.eq_ignore_ascii_case("false") {
        false
    } else {
        warnings.push(ParseWarning {
            key: setting.key.to_string(),
            value: raw,
            fallback: default.to_string(),
        });
        default
    }
}

/// Whole, non-negative minutes
fn parse_ttl_minutes(raw: &str) -> Option<Duration> {
    raw.parse::<u64>().ok().and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
}

fn fingerprint(providers: &[ProviderCredentials], enabled: &BTreeSet<Provider>) -> String {
    let mut hasher = Sha256::new();
    for creds in providers {
        hasher.update(creds.provider.as_str().as_bytes());
        hasher.update([0x1d]);
        for (spec, value) in &creds.fields {
            hasher.update(spec.key.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
            hasher.update([0x1e]);
        }
    }
    hasher.update(b"enabled:");
    for provider in enabled {
        hasher.update(provider.as_str().as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

fn provider_names() -> String {
    Provider::ALL.iter().map(Provider::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolve_str(params: &str, env: &MapEnv) -> Result<Configuration> {
        resolve(&parse(params), &RawParams::new(), env, ResolveOptions::default())
    }

    const AZURE_FULL: &str = "azure.tenantId=t1;azure.clientId=c1;azure.clientSecret=s1;azure.subscriptionIds=sub1,sub2";

    #[test]
    fn test_empty_descriptor_uses_defaults() {
        let config = resolve_str("", &MapEnv::new()).unwrap();
        assert!(config.providers().is_empty());
        assert!(config.enabled_providers().is_empty());
        assert_eq!(*config.cache_policy(), CachePolicy::default());
        assert_eq!(config.cache_policy().ttl_minutes(), 5);
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_descriptor_wins_over_environment() {
        let env = MapEnv::new()
            .with("AZURE_TENANT_ID", "env-val")
            .with("AZURE_CLIENT_ID", "env-client")
            .with("AZURE_CLIENT_SECRET", "env-secret")
            .with("AZURE_SUBSCRIPTION_IDS", "env-sub");
        let config = resolve_str("azure.tenantId=url-val", &env).unwrap();

        let azure = config.provider(Provider::Azure).unwrap();
        assert_eq!(azure.get("azure.tenantId"), Some("url-val"));
        assert_eq!(azure.get("clientId"), Some("env-client"));
    }

    #[test]
    fn test_properties_sit_between_descriptor_and_environment() {
        let env = MapEnv::new().with("CLOUDOPS_CACHE_TTL_MINUTES", "30");
        let properties = RawParams::new().with("cache.ttlMinutes", "15");

        let config =
            resolve(&parse(""), &properties, &env, ResolveOptions::default()).unwrap();
        assert_eq!(config.cache_policy().ttl_minutes(), 15);

        let config = resolve(&parse("cache.ttlMinutes=10"), &properties, &env, ResolveOptions::default())
            .unwrap();
        assert_eq!(config.cache_policy().ttl_minutes(), 10);
    }

    #[test]
    fn test_environment_fallback_for_cache_policy() {
        let env = MapEnv::new()
            .with("CLOUDOPS_CACHE_ENABLED", "FALSE")
            .with("CLOUDOPS_CACHE_DEBUG_MODE", "True");
        let config = resolve_str("", &env).unwrap();
        assert!(!config.cache_policy().enabled);
        assert!(config.cache_policy().debug_mode);
    }

    #[test]
    fn test_partial_azure_names_three_missing_fields() {
        let err = resolve_str("azure.tenantId=t1", &MapEnv::new()).unwrap_err();
        match err {
            CloudOpsError::IncompleteProvider { provider, missing } => {
                assert_eq!(provider, "azure");
                assert_eq!(
                    missing,
                    vec!["azure.clientId", "azure.clientSecret", "azure.subscriptionIds"]
                );
            }
            other => panic!("expected IncompleteProvider, got {other:?}"),
        }
    }

    #[test]
    fn test_placeholder_counts_as_missing() {
        let err = resolve_str(
            "gcp.projectIds=project1;gcp.credentialsPath=/path/to/creds.json",
            &MapEnv::new(),
        )
        .unwrap_err();
        assert!(err.message().contains("gcp.credentialsPath"));
    }

    #[test]
    fn test_only_placeholders_means_absent() {
        let config = resolve_str(
            "azure.tenantId=your-tenant-id;azure.clientId=your-client-id",
            &MapEnv::new(),
        )
        .unwrap();
        assert!(config.provider(Provider::Azure).is_none());
    }

    #[test]
    fn test_is_placeholder() {
        assert!(is_placeholder("your-client-secret"));
        assert!(is_placeholder("/path/to/creds.json"));
        assert!(!is_placeholder("/etc/gcp/creds.json"));
        assert!(!is_placeholder("yours"));
    }

    #[test]
    fn test_optional_field_alone_is_not_a_provider() {
        let config = resolve_str("aws.roleArn=arn:aws:iam::123:role/ops", &MapEnv::new()).unwrap();
        assert!(config.provider(Provider::Aws).is_none());
    }

    #[test]
    fn test_aws_with_optional_role() {
        let config = resolve_str(
            "aws.accountIds=123456;aws.region=us-east-1;aws.accessKeyId=AKIATEST;aws.secretAccessKey=secret;aws.roleArn=arn:aws:iam::123456:role/ops",
            &MapEnv::new(),
        )
        .unwrap();
        let aws = config.provider(Provider::Aws).unwrap();
        assert_eq!(aws.get("roleArn"), Some("arn:aws:iam::123456:role/ops"));
        assert!(config.is_enabled(Provider::Aws));
    }

    #[test]
    fn test_malformed_ttl_recovers_to_default() {
        let config = resolve_str("cache.ttlMinutes=abc", &MapEnv::new()).unwrap();
        assert_eq!(config.cache_policy().ttl, Duration::from_secs(300));
        assert_eq!(
            config.warnings(),
            &[ParseWarning {
                key: "cache.ttlMinutes".into(),
                value: "abc".into(),
                fallback: "5".into(),
            }]
        );
    }

    #[test]
    fn test_negative_ttl_recovers_to_default() {
        let config = resolve_str("cache.ttlMinutes=-3", &MapEnv::new()).unwrap();
        assert_eq!(config.cache_policy().ttl_minutes(), 5);
        assert_eq!(config.warnings().len(), 1);
    }

    #[test]
    fn test_malformed_bool_recovers_to_default() {
        let config = resolve_str("cache.enabled=maybe;cache.debugMode=TRUE", &MapEnv::new()).unwrap();
        assert!(config.cache_policy().enabled);
        assert!(config.cache_policy().debug_mode);
        assert_eq!(config.warnings().len(), 1);
        assert_eq!(config.warnings()[0].key, "cache.enabled");
    }

    #[test]
    fn test_provider_allow_list() {
        let params = format!(
            "{AZURE_FULL};aws.accountIds=1;aws.region=us-east-1;aws.accessKeyId=a;aws.secretAccessKey=s;providers=AWS"
        );
        let config = resolve_str(&params, &MapEnv::new()).unwrap();
        assert_eq!(config.providers().len(), 2);
        assert_eq!(config.enabled_providers().iter().copied().collect::<Vec<_>>(), vec![Provider::Aws]);
    }

    #[test]
    fn test_allow_list_drops_unconfigured_provider() {
        let config = resolve_str(&format!("{AZURE_FULL};providers=azure,gcp"), &MapEnv::new()).unwrap();
        assert_eq!(
            config.enabled_providers().iter().copied().collect::<Vec<_>>(),
            vec![Provider::Azure]
        );
    }

    #[test]
    fn test_unknown_provider_in_allow_list() {
        let err = resolve_str("providers=azure,oracle", &MapEnv::new()).unwrap_err();
        assert!(matches!(err, CloudOpsError::ConfigError(_)));
        assert!(err.message().contains("oracle"));
    }

    #[test]
    fn test_require_provider() {
        let options = ResolveOptions { require_provider: true };
        let err = resolve(&parse(""), &RawParams::new(), &MapEnv::new(), options).unwrap_err();
        assert!(err.message().contains("azure, gcp, aws"));

        let ok = resolve(&parse(AZURE_FULL), &RawParams::new(), &MapEnv::new(), options);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = resolve_str(AZURE_FULL, &MapEnv::new()).unwrap();
        let b = resolve_str(AZURE_FULL, &MapEnv::new()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_credentials() {
        let a = resolve_str(AZURE_FULL, &MapEnv::new()).unwrap();
        let b = resolve_str(&AZURE_FULL.replace("s1", "s2"), &MapEnv::new()).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_cache_policy() {
        let a = resolve_str(AZURE_FULL, &MapEnv::new()).unwrap();
        let b = resolve_str(&format!("{AZURE_FULL};cache.ttlMinutes=60"), &MapEnv::new()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let config = resolve_str(AZURE_FULL, &MapEnv::new()).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("s1\""));

        let json = serde_json::to_string(&config.redacted()).unwrap();
        assert!(json.contains("azure.clientSecret"));
        assert!(!json.contains("\"s1\""));
        assert!(json.contains("\"ttl_minutes\":5"));
    }

    #[test]
    fn test_blank_descriptor_value_falls_through() {
        let env = MapEnv::new().with("CLOUDOPS_CACHE_TTL_MINUTES", "12");
        let config = resolve_str("cache.ttlMinutes=", &env).unwrap();
        assert_eq!(config.cache_policy().ttl_minutes(), 12);
    }
}
