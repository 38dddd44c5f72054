use serde_json::Value;
use studio_contracts::events::{sanitize_payload, EventPayload, EventWriter};
use studio_contracts::models::{ModelSelector, QualityTier};
use studio_contracts::records::{png_data_url, strip_data_url_prefix};

use crate::error::StudioError;
use crate::transport::{GenerateRequest, ImageTransport, RequestPart};

const COMPOSITE_INSTRUCTIONS: &str = "\
Task: Create a professional product image for an ecommerce store by merging a subject product into a reference scene.

Input 1 (Subject): A towel that may have creases or wrinkles.
Input 2 (Reference): A scene featuring a towel on a hanger with a specific background.

Instructions:
1. Replace the towel in the Reference image with the Subject towel.
2. Keep the EXACT hanger and the EXACT background from the Reference image.
3. Do NOT fold the Subject towel; show it hung straight or draped naturally as in the Reference image, without any artificial folding.
4. Remove all creases, wrinkles, and imperfections from the Subject towel so it looks smooth and high-end.
5. CRITICAL: Keep the exact color, material texture, and overall lighting of the original Subject towel.
6. Integrate the Subject towel seamlessly into the Reference background, hung on the Reference hanger.
7. Output ONLY the resulting composite image.";

pub fn refine_instructions(text_prompt: &str) -> String {
    format!(
        "Edit the provided image based on this request: \"{}\".\n\
         Keep the core product (the towel) consistent in color and quality unless the request specifically asks to change it.",
        text_prompt.trim()
    )
}

/// Client for the hosted image model. One instance lives for the whole
/// session.
pub struct GenerationClient {
    transport: Box<dyn ImageTransport>,
    selector: ModelSelector,
    standard_override: Option<String>,
    high_override: Option<String>,
    events: Option<EventWriter>,
}

impl GenerationClient {
    pub fn new(transport: Box<dyn ImageTransport>) -> Self {
        Self {
            transport,
            selector: ModelSelector::new(None),
            standard_override: None,
            high_override: None,
            events: None,
        }
    }

    pub fn with_model_overrides(mut self, standard: Option<String>, high: Option<String>) -> Self {
        self.standard_override = standard;
        self.high_override = high;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn model_for(&self, tier: QualityTier) -> Result<String, StudioError> {
        let requested = match tier {
            QualityTier::Standard => self.standard_override.as_deref(),
            QualityTier::High => self.high_override.as_deref(),
        };
        self.selector
            .select(requested, tier)
            .map(|selection| selection.model.name)
            .map_err(StudioError::Transport)
    }

    /// Merges the subject into the reference scene.
    pub fn composite(
        &self,
        subject_payload: &str,
        reference_payload: &str,
        tier: QualityTier,
    ) -> Result<String, StudioError> {
        self.generate_image(
            vec![
                RequestPart::png(strip_data_url_prefix(subject_payload)),
                RequestPart::png(strip_data_url_prefix(reference_payload)),
            ],
            COMPOSITE_INSTRUCTIONS,
            tier,
        )
    }

    /// Applies a free-text edit to an existing image.
    pub fn refine(
        &self,
        image_payload: &str,
        text_prompt: &str,
        tier: QualityTier,
    ) -> Result<String, StudioError> {
        self.generate_image(
            vec![RequestPart::png(strip_data_url_prefix(image_payload))],
            &refine_instructions(text_prompt),
            tier,
        )
    }

    fn generate_image(
        &self,
        mut parts: Vec<RequestPart>,
        instructions: &str,
        tier: QualityTier,
    ) -> Result<String, StudioError> {
        parts.push(RequestPart::Text(instructions.to_string()));
        let request = GenerateRequest {
            model: self.model_for(tier)?,
            parts,
            image_config: tier.image_config(),
        };
        self.log_request(&request, tier);
        let response = self.transport.generate_content(&request)?;
        extract_image_data_url(&response)
    }

    fn log_request(&self, request: &GenerateRequest, tier: QualityTier) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let mut payload = EventPayload::new();
        payload.insert(
            "transport".to_string(),
            Value::String(self.transport.name().to_string()),
        );
        payload.insert("model".to_string(), Value::String(request.model.clone()));
        payload.insert("tier".to_string(), Value::String(tier.to_string()));
        payload.insert(
            "payload".to_string(),
            sanitize_payload(&request.to_payload()),
        );
        if let Err(err) = events.emit("generation_request", payload) {
            eprintln!("event write failed: {err:#}");
        }
    }
}

/// Returns the first inline image of the first candidate as a PNG data URL.
pub fn extract_image_data_url(response: &Value) -> Result<String, StudioError> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .filter(|rows| !rows.is_empty())
        .ok_or(StudioError::NoCandidates)?;

    let parts = candidates[0]
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for part in parts {
        let data = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !data.is_empty() {
            return Ok(png_data_url(data));
        }
    }

    Err(StudioError::NoImageData)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use studio_contracts::models::QualityTier;

    use super::{extract_image_data_url, GenerationClient};
    use crate::error::StudioError;
    use crate::testing::{image_response, ScriptedTransport};
    use crate::transport::RequestPart;

    #[test]
    fn extraction_with_text_only_candidate_has_no_image_data() {
        let response = json!({"candidates": [{"content": {"parts": [{"text": "x"}]}}]});
        assert!(matches!(
            extract_image_data_url(&response),
            Err(StudioError::NoImageData)
        ));
    }

    #[test]
    fn extraction_returns_png_data_url() -> anyhow::Result<()> {
        let response = json!({"candidates": [{"content": {"parts": [
            {"text": "here you go"},
            {"inlineData": {"mimeType": "image/png", "data": "Zm9v"}}
        ]}}]});
        assert_eq!(
            extract_image_data_url(&response)?,
            "data:image/png;base64,Zm9v"
        );
        Ok(())
    }

    #[test]
    fn extraction_without_candidates_fails() {
        assert!(matches!(
            extract_image_data_url(&json!({"candidates": []})),
            Err(StudioError::NoCandidates)
        ));
        assert!(matches!(
            extract_image_data_url(&json!({})),
            Err(StudioError::NoCandidates)
        ));
    }

    #[test]
    fn extraction_accepts_snake_case_and_skips_empty_data() -> anyhow::Result<()> {
        let response = json!({"candidates": [{"content": {"parts": [
            {"inlineData": {"mimeType": "image/png", "data": ""}},
            {"inline_data": {"mime_type": "image/png", "data": "YmFy"}}
        ]}}]});
        assert_eq!(
            extract_image_data_url(&response)?,
            "data:image/png;base64,YmFy"
        );
        Ok(())
    }

    #[test]
    fn composite_strips_prefixes_and_sends_subject_then_reference() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![Ok(image_response("b3V0"))]);
        let requests = transport.requests();
        let client = GenerationClient::new(Box::new(transport));

        let url = client.composite(
            "data:image/jpeg;base64,c3ViamVjdA==",
            "cmVm",
            QualityTier::Standard,
        )?;
        assert_eq!(url, "data:image/png;base64,b3V0");

        let sent = requests.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, "gemini-2.5-flash-image");
        assert_eq!(sent[0].image_config, None);
        assert_eq!(sent[0].parts[0], RequestPart::png("c3ViamVjdA=="));
        assert_eq!(sent[0].parts[1], RequestPart::png("cmVm"));
        let RequestPart::Text(instructions) = &sent[0].parts[2] else {
            panic!("expected instruction text last");
        };
        assert!(instructions.contains("Replace the towel in the Reference image"));
        assert!(instructions.contains("Output ONLY the resulting composite image."));
        Ok(())
    }

    #[test]
    fn refine_uses_high_tier_model_and_embeds_prompt() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![Ok(image_response("b3V0"))]);
        let requests = transport.requests();
        let client = GenerationClient::new(Box::new(transport));

        client.refine("data:image/png;base64,aW1n", "Make it fluffier", QualityTier::High)?;

        let sent = requests.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(sent[0].model, "gemini-3-pro-image-preview");
        assert!(sent[0].image_config.is_some());
        assert_eq!(sent[0].parts.len(), 2);
        assert_eq!(sent[0].parts[0], RequestPart::png("aW1n"));
        let RequestPart::Text(instructions) = &sent[0].parts[1] else {
            panic!("expected instruction text");
        };
        assert!(instructions.contains("\"Make it fluffier\""));
        Ok(())
    }

    #[test]
    fn refine_propagates_extraction_failures() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"candidates": []}))]);
        let client = GenerationClient::new(Box::new(transport));
        let err = client.refine("aW1n", "brighter", QualityTier::Standard).err();
        assert!(matches!(err, Some(StudioError::NoCandidates)));
    }

    #[test]
    fn model_overrides_resolve_through_registry() -> anyhow::Result<()> {
        let client = GenerationClient::new(Box::new(ScriptedTransport::new(Vec::new())))
            .with_model_overrides(Some("unknown-model".to_string()), Some("dryrun-image-hd".to_string()));
        assert_eq!(client.model_for(QualityTier::Standard)?, "gemini-2.5-flash-image");
        assert_eq!(client.model_for(QualityTier::High)?, "dryrun-image-hd");
        Ok(())
    }
}
