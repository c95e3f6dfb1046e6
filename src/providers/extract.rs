use crate::domain::{extract_domain, matches_any};
use crate::types::UNKNOWN;

use super::ProviderKind;

const CHATGPT_WEB_HOSTS: &[&str] = &["chatgpt.com", "*.chatgpt.com", "chat.openai.com", "*.chat.openai.com"];
const CLAUDE_WEB_HOSTS: &[&str] = &["claude.ai", "*.claude.ai"];

/// `model` field of a JSON request body, if the body is JSON and has one.
/// Anything unparsable counts as no body at all.
pub fn body_model(body: Option<&str>) -> Option<String> {
    let body = body?.trim();
    if body.is_empty() {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let model = parsed.get("model")?.as_str()?.trim();
    if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    }
}

/// Path of the URL without query or fragment. Falls back to the raw string
/// when it does not parse so the path heuristics still get a chance.
fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    }
}

/// Segments following `/models/` in the path.
fn segments_after_models(url: &str) -> Vec<String> {
    let path = url_path(url);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    for seg in segments.by_ref() {
        if seg == "models" {
            break;
        }
    }
    segments.map(str::to_string).collect()
}

/// Replicate: `/models/<owner>/<name>`.
fn replicate_model(url: &str) -> Option<String> {
    let segs = segments_after_models(url);
    match segs.as_slice() {
        [owner, name, ..] => Some(format!("{owner}/{name}")),
        _ => None,
    }
}

/// Gemini: `/models/<id>` or `/models/<id>:generateContent`.
fn google_model(url: &str) -> Option<String> {
    let segs = segments_after_models(url);
    let id = segs.first()?.split(':').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

fn web_sentinel(url: &str, hosts: &[&str], sentinel: &str) -> Option<String> {
    matches_any(&extract_domain(url), hosts).then(|| sentinel.to_string())
}

/// Derive the model id for a call already attributed to `kind`.
///
/// Order: JSON body `model`, then a provider URL heuristic, then the
/// provider's `-api` fallback. Replicate keeps its model in the path, so the
/// path is checked before the body there.
pub fn extract(kind: ProviderKind, url: &str, body: Option<&str>) -> String {
    let from_body = || body_model(body);

    let found = match kind {
        ProviderKind::OpenAi => {
            from_body().or_else(|| web_sentinel(url, CHATGPT_WEB_HOSTS, "chatgpt-web"))
        }
        ProviderKind::Anthropic => {
            from_body().or_else(|| web_sentinel(url, CLAUDE_WEB_HOSTS, "claude-web"))
        }
        ProviderKind::Replicate => replicate_model(url).or_else(from_body),
        ProviderKind::Google => from_body().or_else(|| google_model(url)),
        ProviderKind::Together | ProviderKind::Cohere | ProviderKind::Perplexity => from_body(),
        ProviderKind::Custom => return UNKNOWN.to_string(),
    };

    found.unwrap_or_else(|| kind.fallback_model().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_model_ignores_garbage() {
        assert_eq!(body_model(Some(r#"{"model":"gpt-4"}"#)), Some("gpt-4".into()));
        assert_eq!(body_model(Some("invalid json")), None);
        assert_eq!(body_model(Some(r#"{"messages":[]}"#)), None);
        assert_eq!(body_model(Some(r#"{"model":""}"#)), None);
        assert_eq!(body_model(Some(r#"{"model":7}"#)), None);
        assert_eq!(body_model(Some("[1,2]")), None);
        assert_eq!(body_model(None), None);
    }

    #[test]
    fn replicate_reads_owner_and_name() {
        assert_eq!(
            extract(
                ProviderKind::Replicate,
                "https://api.replicate.com/v1/models/meta/llama-2-70b-chat/predictions",
                None
            ),
            "meta/llama-2-70b-chat"
        );
        assert_eq!(
            extract(ProviderKind::Replicate, "https://api.replicate.com/v1/predictions", None),
            "replicate-api"
        );
    }

    #[test]
    fn google_strips_method_suffix() {
        assert_eq!(
            extract(
                ProviderKind::Google,
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent?key=x",
                None
            ),
            "gemini-pro"
        );
        assert_eq!(
            extract(ProviderKind::Google, "https://ai.google.dev/", None),
            "google-api"
        );
    }

    #[test]
    fn fallbacks_are_provider_specific() {
        assert_eq!(extract(ProviderKind::OpenAi, "https://api.openai.com/v1/chat", None), "openai-api");
        assert_eq!(
            extract(ProviderKind::Anthropic, "https://api.anthropic.com/v1/messages", Some("{")),
            "anthropic-api"
        );
        assert_eq!(extract(ProviderKind::Cohere, "https://api.cohere.ai/v1/chat", None), "cohere-api");
        assert_eq!(extract(ProviderKind::Custom, "https://api.custom.com/", Some(r#"{"model":"x"}"#)), UNKNOWN);
    }
}
