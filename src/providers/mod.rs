mod builtin;
pub mod extract;

use serde::Serialize;
use tracing::warn;

use crate::domain::{extract_domain, matches_any};
use crate::types::UNKNOWN;

pub use builtin::builtin_providers;

/// Extraction strategy attached to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Replicate,
    Together,
    Cohere,
    Perplexity,
    Google,
    Custom,
}

impl ProviderKind {
    pub const BUILTIN: [ProviderKind; 7] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Replicate,
        ProviderKind::Together,
        ProviderKind::Cohere,
        ProviderKind::Perplexity,
        ProviderKind::Google,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Replicate => "replicate",
            ProviderKind::Together => "together",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Perplexity => "perplexity",
            ProviderKind::Google => "google",
            ProviderKind::Custom => "custom",
        }
    }

    /// Model reported when neither body nor URL identifies one.
    pub fn fallback_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai-api",
            ProviderKind::Anthropic => "anthropic-api",
            ProviderKind::Replicate => "replicate-api",
            ProviderKind::Together => "together-api",
            ProviderKind::Cohere => "cohere-api",
            ProviderKind::Perplexity => "perplexity-api",
            ProviderKind::Google => "google-api",
            ProviderKind::Custom => UNKNOWN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDefinition {
    pub name: String,
    pub domains: Vec<String>,
    pub kind: ProviderKind,
}

impl ProviderDefinition {
    /// Union `domains` into this provider, keeping first-seen order.
    fn merge_domains(&mut self, domains: &[String]) {
        for d in domains {
            if !self.domains.contains(d) {
                self.domains.push(d.clone());
            }
        }
    }
}

/// Provider and model a call was attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub provider: String,
    pub model: String,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            provider: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
        }
    }
}

/// Ordered provider list: built-ins first, then custom providers in the
/// order they were added. The first provider whose patterns match wins.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDefinition>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: builtin_providers(),
        }
    }

    pub fn providers(&self) -> &[ProviderDefinition] {
        &self.providers
    }

    pub fn resolve(&self, url: &str) -> Option<&ProviderDefinition> {
        let domain = extract_domain(url);
        if domain.is_empty() {
            return None;
        }
        self.providers
            .iter()
            .find(|p| matches_any(&domain, &p.domains))
    }

    pub fn should_track(&self, url: &str) -> bool {
        self.resolve(url).is_some()
    }

    pub fn extract_model(&self, url: &str, body: Option<&str>) -> Classification {
        match self.resolve(url) {
            Some(p) => Classification {
                provider: p.name.clone(),
                model: extract::extract(p.kind, url, body),
            },
            None => Classification::unknown(),
        }
    }

    /// Add domains under `name`, merging into an existing custom entry of
    /// that name. Built-in definitions are never modified.
    pub fn add_custom_provider(&mut self, name: &str, domains: &[String]) {
        if builtin::is_builtin_name(name) {
            warn!(provider = name, "refusing to modify built-in provider");
            return;
        }
        if let Some(existing) = self.providers.iter_mut().find(|p| p.name == name) {
            existing.merge_domains(domains);
            return;
        }
        let mut def = ProviderDefinition {
            name: name.to_string(),
            domains: Vec::new(),
            kind: ProviderKind::Custom,
        };
        def.merge_domains(domains);
        self.providers.push(def);
    }

    /// Drop a custom provider. Built-ins stay.
    pub fn remove_custom_provider(&mut self, name: &str) {
        self.providers
            .retain(|p| p.kind != ProviderKind::Custom || p.name != name);
    }

    /// Replace every custom provider with one `custom` entry built from
    /// `domains`. Blank entries are skipped.
    pub fn update_custom_providers<S: AsRef<str>>(&mut self, domains: &[S]) {
        self.providers.retain(|p| p.kind != ProviderKind::Custom);
        for domain in domains {
            let domain = domain.as_ref().trim();
            if domain.is_empty() {
                continue;
            }
            self.add_custom_provider("custom", &[domain.to_string()]);
        }
    }

    pub fn all_domains(&self) -> Vec<&str> {
        self.providers
            .iter()
            .flat_map(|p| p.domains.iter().map(String::as_str))
            .collect()
    }
}
