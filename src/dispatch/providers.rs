use serde::{Deserialize, Serialize};

/// Name reported for endpoints that match no provider profile.
pub const GENERIC_PROVIDER: &str = "generic";

/// Identity of the calling application, sent as attribution headers to
/// providers that ask for them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppIdentity {
    pub origin: String,
    pub title: String,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            title: "React Builder".to_string(),
        }
    }
}

/// Per-provider request augmentation, matched by endpoint host.
///
/// Header values may contain `{origin}` and `{title}` placeholders, filled
/// from [`AppIdentity`] when the request is built. `body_fields` are merged
/// into the request body verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderProfile {
    pub name: String,
    /// Matches when the endpoint host equals this value or ends with `.{host_suffix}`.
    pub host_suffix: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body_fields: serde_json::Map<String, serde_json::Value>,
    /// Required API key prefix, if the provider issues recognizable keys.
    #[serde(default)]
    pub key_prefix: Option<String>,
}

impl ProviderProfile {
    pub fn openrouter() -> Self {
        let mut body_fields = serde_json::Map::new();
        body_fields.insert("route".to_string(), serde_json::json!("fallback"));
        body_fields.insert("transforms".to_string(), serde_json::json!(["middle-out"]));

        Self {
            name: "openrouter".to_string(),
            host_suffix: "openrouter.ai".to_string(),
            headers: vec![
                ("HTTP-Referer".to_string(), "{origin}".to_string()),
                ("X-Title".to_string(), "{title}".to_string()),
                ("X-Original-Domain".to_string(), "{origin}".to_string()),
            ],
            body_fields,
            key_prefix: Some("sk-or-".to_string()),
        }
    }

    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let suffix = self.host_suffix.to_ascii_lowercase();
        host == suffix || host.ends_with(&format!(".{suffix}"))
    }

    /// Extra headers with identity placeholders resolved.
    pub fn resolved_headers(&self, app: &AppIdentity) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), fill_placeholders(v, app)))
            .collect()
    }

    /// Human-readable advice for a 401 from this provider.
    pub fn auth_guidance(&self, detail: &str) -> String {
        let Some(prefix) = self.key_prefix.as_deref() else {
            return generic_auth_guidance();
        };
        let name = &self.name;
        if detail.contains("No auth credentials found") {
            format!(
                "{name} could not find your credentials. Make sure the API key starts with \
                 '{prefix}', has no extra whitespace, and is valid on the {name} website."
            )
        } else if detail.contains("invalid") {
            format!("the {name} API key is invalid, create a new key on the {name} website")
        } else {
            format!(
                "the {name} API key was rejected. Make sure it starts with '{prefix}', is \
                 still valid, the account has remaining credit, and this site's domain is \
                 allowed in the account settings."
            )
        }
    }
}

pub fn generic_auth_guidance() -> String {
    "the API key is invalid, check that it was entered correctly".to_string()
}

fn fill_placeholders(value: &str, app: &AppIdentity) -> String {
    value
        .replace("{origin}", &app.origin)
        .replace("{title}", &app.title)
}

/// Ordered lookup table of provider profiles. First match wins.
#[derive(Debug, Clone)]
pub struct ProviderTable {
    profiles: Vec<ProviderProfile>,
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderTable {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![ProviderProfile::openrouter()],
        }
    }

    pub fn empty() -> Self {
        Self { profiles: vec![] }
    }

    /// Add profiles. Additional profiles are consulted before built-ins so
    /// configuration can override a built-in entry for the same host.
    pub fn with_profiles(mut self, extra: Vec<ProviderProfile>) -> Self {
        let mut profiles = extra;
        profiles.append(&mut self.profiles);
        self.profiles = profiles;
        self
    }

    pub fn lookup(&self, host: &str) -> Option<&ProviderProfile> {
        self.profiles.iter().find(|p| p.matches_host(host))
    }

    /// Lookup by endpoint URL. Unparseable URLs match nothing.
    pub fn lookup_url(&self, url: &str) -> Option<&ProviderProfile> {
        let parsed = reqwest::Url::parse(url).ok()?;
        self.lookup(parsed.host_str()?)
    }
}
