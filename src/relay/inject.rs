//! Context injection.
//!
//! Prepares a client chat request for the backend:
//! - prepends the uploaded document (if any) as exactly one leading message
//! - pins `model` to the registry's current model
//! - sets `stream` explicitly to the mode the relay will use
//!
//! The injected message uses the configured role (`system` by default) and is
//! cut to `max_chars` characters (5000 by default, 0 = unlimited) to bound
//! prompt size.

use crate::config::{ContextConfig, ContextRetention, ContextRole, RelayPolicyConfig};
use crate::relay::types::{ChatMessage, ChatRequest};
use crate::state::documents::ContextSource;

/// Settings that shape an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionPolicy {
    pub role: ContextRole,
    pub max_chars: usize,
    pub retention: ContextRetention,
    pub force_stream: bool,
}

impl InjectionPolicy {
    pub fn from_config(context: &ContextConfig, relay: &RelayPolicyConfig) -> Self {
        Self {
            role: context.role,
            max_chars: context.max_chars,
            retention: context.retention,
            force_stream: relay.force_stream,
        }
    }
}

impl Default for InjectionPolicy {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default(), &RelayPolicyConfig::default())
    }
}

/// Cut `text` to at most `max_chars` characters (never splitting a char).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Apply `blob`, `model` and the stream policy to `request`.
pub fn apply(
    mut request: ChatRequest,
    blob: Option<&str>,
    model: &str,
    policy: &InjectionPolicy,
) -> ChatRequest {
    if let Some(blob) = blob.filter(|b| !b.is_empty()) {
        let content = truncate_chars(blob, policy.max_chars);
        request
            .messages
            .insert(0, ChatMessage::new(policy.role.as_str(), content));
    }

    request.model = Some(model.to_string());
    request.stream = Some(policy.force_stream || request.wants_stream());
    request
}

/// Injects context pulled from a `ContextSource`.
pub struct ContextInjector<'a> {
    source: &'a dyn ContextSource,
    policy: InjectionPolicy,
}

impl<'a> ContextInjector<'a> {
    pub fn new(source: &'a dyn ContextSource, policy: InjectionPolicy) -> Self {
        Self { source, policy }
    }

    /// Prepare `request` for dispatch. Under `consume_once` this clears the stored context.
    pub fn inject(&self, request: ChatRequest, model: &str) -> ChatRequest {
        let blob = self.source.context(self.policy.retention);
        if let Some(blob) = &blob {
            tracing::debug!(
                chars = blob.chars().count(),
                max_chars = self.policy.max_chars,
                role = self.policy.role.as_str(),
                "Injecting document context"
            );
        }
        apply(request, blob.as_deref().map(String::as_str), model, &self.policy)
    }
}
