//! Request routing between image generation and conversational turns

/// Where an utterance should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// One-shot image generation request
    ImageRequest,
    /// Streamed conversational turn over the socket
    ConversationalTurn,
}

/// Classifies utterances against an allow-list of trigger terms
///
/// Matching is a case-insensitive substring check, so terms work for
/// scripts without word boundaries as well.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    image_triggers: Vec<String>,
}

impl RequestRouter {
    /// Create a router from trigger terms
    ///
    /// Terms are lowercased and trimmed; blank terms are dropped.
    #[must_use]
    pub fn new(image_triggers: impl IntoIterator<Item = String>) -> Self {
        let image_triggers: Vec<String> = image_triggers
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        tracing::debug!(triggers = ?image_triggers, "request router initialized");

        Self { image_triggers }
    }

    /// Normalized trigger terms
    #[must_use]
    pub fn image_triggers(&self) -> &[String] {
        &self.image_triggers
    }

    /// Classify an utterance
    #[must_use]
    pub fn classify(&self, utterance: &str) -> Route {
        let lower = utterance.to_lowercase();

        if self
            .image_triggers
            .iter()
            .any(|trigger| lower.contains(trigger.as_str()))
        {
            Route::ImageRequest
        } else {
            Route::ConversationalTurn
        }
    }
}

impl From<&crate::config::RouterConfig> for RequestRouter {
    fn from(config: &crate::config::RouterConfig) -> Self {
        Self::new(config.image_triggers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;

    fn router() -> RequestRouter {
        RequestRouter::from(&RouterConfig::default())
    }

    #[test]
    fn draw_is_image_request() {
        assert_eq!(router().classify("draw a cat"), Route::ImageRequest);
    }

    #[test]
    fn question_is_conversational() {
        assert_eq!(router().classify("what is 2+2"), Route::ConversationalTurn);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(router().classify("Show me a PICTURE OF a boat"), Route::ImageRequest);
        assert_eq!(router().classify("Generate Image: sunset"), Route::ImageRequest);
    }

    #[test]
    fn chinese_triggers() {
        assert_eq!(router().classify("帮我画一只小猫"), Route::ImageRequest);
        assert_eq!(router().classify("请生成图片"), Route::ImageRequest);
        assert_eq!(router().classify("你好"), Route::ConversationalTurn);
    }

    #[test]
    fn custom_allow_list() {
        let router = RequestRouter::new(vec!["  Sketch ".to_string(), String::new()]);

        assert_eq!(router.image_triggers(), &["sketch"]);
        assert_eq!(router.classify("sketch a tree"), Route::ImageRequest);
        assert_eq!(router.classify("draw a tree"), Route::ConversationalTurn);
    }

    #[test]
    fn empty_allow_list_routes_everything_to_chat() {
        let router = RequestRouter::new(Vec::new());
        assert_eq!(router.classify("draw a cat"), Route::ConversationalTurn);
    }
}
