use super::{ProviderDefinition, ProviderKind};

/// Built-in providers in resolution order.
pub fn builtin_providers() -> Vec<ProviderDefinition> {
    ProviderKind::BUILTIN
        .into_iter()
        .map(|kind| ProviderDefinition {
            name: kind.name().to_string(),
            domains: domains_for(kind).iter().map(|d| d.to_string()).collect(),
            kind,
        })
        .collect()
}

fn domains_for(kind: ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::OpenAi => &[
            "api.openai.com",
            "chatgpt.com",
            "*.chatgpt.com",
            "chat.openai.com",
            "*.chat.openai.com",
        ],
        ProviderKind::Anthropic => &["api.anthropic.com", "claude.ai", "*.claude.ai"],
        ProviderKind::Replicate => &["api.replicate.com"],
        ProviderKind::Together => &["api.together.xyz"],
        ProviderKind::Cohere => &["api.cohere.ai"],
        ProviderKind::Perplexity => &["api.perplexity.ai"],
        ProviderKind::Google => &["generativelanguage.googleapis.com", "ai.google.dev"],
        ProviderKind::Custom => &[],
    }
}

pub fn is_builtin_name(name: &str) -> bool {
    ProviderKind::BUILTIN.iter().any(|k| k.name() == name)
}
