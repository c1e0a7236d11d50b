//! Topic guardrail: decides whether a turn is in scope before any model call.
//!
//! The check is a static keyword classifier over the newest user turn only.
//! Multi-turn topic drift is not detected.

use serde::Serialize;
use tripmate_config::GuardrailConfig;

/// Reply used if a guardrail is somehow built with an empty redirect pool.
const FALLBACK_REDIRECT: &str = "I can only help with travel planning. Where are you headed next?";

/// Outcome of classifying one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailDecision {
    pub in_scope: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_text: Option<String>,
}

impl GuardrailDecision {
    pub fn allow() -> Self {
        Self {
            in_scope: true,
            redirect_text: None,
        }
    }

    pub fn redirect(text: impl Into<String>) -> Self {
        Self {
            in_scope: false,
            redirect_text: Some(text.into()),
        }
    }
}

/// Chooses which canned redirect to use.
pub trait RedirectPolicy: Send + Sync {
    /// Return an index in `0..pool_len`. `pool_len` is never zero.
    fn pick(&self, pool_len: usize) -> usize;
}

/// Uniform random choice.
pub struct RandomRedirect;

impl RedirectPolicy for RandomRedirect {
    fn pick(&self, pool_len: usize) -> usize {
        use rand::Rng;
        let mut rng = rand::rng();
        rng.random_range(0..pool_len)
    }
}

/// Always the same entry (wrapped into range).
pub struct FixedRedirect(pub usize);

impl RedirectPolicy for FixedRedirect {
    fn pick(&self, pool_len: usize) -> usize {
        self.0 % pool_len
    }
}

/// Keyword classifier with a pool of redirect replies.
pub struct TopicGuardrail {
    enabled: bool,
    keywords: Vec<String>,
    redirects: Vec<String>,
    policy: Box<dyn RedirectPolicy>,
}

impl TopicGuardrail {
    pub fn new(keywords: Vec<String>, redirects: Vec<String>, policy: Box<dyn RedirectPolicy>) -> Self {
        Self {
            enabled: true,
            keywords: keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            redirects,
            policy,
        }
    }

    /// Build from configuration with uniform random redirect selection.
    pub fn from_config(config: &GuardrailConfig) -> Self {
        Self::from_config_with_policy(config, Box::new(RandomRedirect))
    }

    pub fn from_config_with_policy(config: &GuardrailConfig, policy: Box<dyn RedirectPolicy>) -> Self {
        let mut guardrail = Self::new(config.keywords.clone(), config.redirects.clone(), policy);
        guardrail.enabled = config.enabled;
        guardrail
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Classify the newest user text.
    ///
    /// Empty or whitespace-only input is out of scope. A disabled guardrail
    /// allows everything.
    pub fn classify(&self, latest_user_text: &str) -> GuardrailDecision {
        if !self.enabled {
            return GuardrailDecision::allow();
        }

        let text = latest_user_text.to_lowercase();
        if !text.trim().is_empty() {
            if let Some(hit) = self.keywords.iter().find(|k| text.contains(k.as_str())) {
                tracing::debug!(keyword = %hit, "Guardrail: in scope");
                return GuardrailDecision::allow();
            }
        }

        tracing::info!("Guardrail: out of scope, redirecting");
        GuardrailDecision::redirect(self.pick_redirect())
    }

    fn pick_redirect(&self) -> String {
        if self.redirects.is_empty() {
            return FALLBACK_REDIRECT.to_string();
        }
        let index = self.policy.pick(self.redirects.len()).min(self.redirects.len() - 1);
        self.redirects[index].clone()
    }
}
