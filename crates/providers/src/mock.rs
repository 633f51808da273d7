use crate::{ProviderError, VisionProvider};

/// Canned responses keyed on the prompt wording, for runs without a model.
#[derive(Debug, Default)]
pub struct MockProvider;

#[async_trait::async_trait]
impl VisionProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, _image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        let prompt = prompt.to_lowercase();
        let text = if prompt.contains("title") {
            "Beautiful sunset over mountains"
        } else if prompt.contains("description") {
            "A stunning landscape photograph featuring golden hour light illuminating snow-capped peaks with dramatic clouds in the background"
        } else if prompt.contains("keyword") {
            "landscape, nature, mountains, sunset, golden hour, photography, outdoor, scenic, dramatic, beautiful"
        } else {
            "Mock AI response for testing purposes"
        };
        Ok(text.to_string())
    }
}
