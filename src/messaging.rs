use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::gemini::{parse_model_json, GeminiClient, GenerationSettings};
use crate::models::{Campaign, Lead, MessageKind};
use crate::store::Store;

pub const MESSAGE_SETTINGS: GenerationSettings = GenerationSettings {
    temperature: 0.7,
    max_output_tokens: 600,
    error_body_limit: 200,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailCopy {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedinCopy {
    pub connection_note: String,
    pub follow_up: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageCopy {
    Email(EmailCopy),
    Linkedin(LinkedinCopy),
}

/// `{type, lead, ...copy fields}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Business name of the lead.
    pub lead: String,
    #[serde(flatten)]
    pub copy: MessageCopy,
}

fn context_block(lead: &Lead, campaign: &Campaign) -> String {
    let score = lead
        .score
        .map(|s| format!("{}/100", s))
        .unwrap_or_else(|| "not scored".to_string());
    format!(
        "Sender offer: {}\nTarget role: {}\nCampaign niche: {} in {}\n\n\
         Recipient business: {}\nRecipient role: {}\nWebsite: {}\n\
         Fit score: {}\nWhy it fits: {}",
        campaign.value_proposition,
        campaign.target_role,
        campaign.niche,
        campaign.country,
        lead.business_name,
        lead.role,
        lead.website.as_deref().unwrap_or("unknown"),
        score,
        lead.score_reasoning.as_deref().unwrap_or("n/a"),
    )
}

pub fn build_message_prompt(kind: MessageKind, lead: &Lead, campaign: &Campaign) -> String {
    let context = context_block(lead, campaign);
    match kind {
        MessageKind::Email => format!(
            "Write a short cold email for the recipient below. Keep it under 120 words, \
             open with something specific to their business, mention one concrete benefit \
             of the offer and end with a low-friction question. No buzzwords.\n\n{}\n\n\
             Reply with JSON only: {{\"subject\": \"...\", \"body\": \"...\"}}",
            context
        ),
        MessageKind::Linkedin => format!(
            "Write LinkedIn outreach for the recipient below: a connection note under 300 \
             characters that does not pitch, and a follow-up message to send once they \
             accept that introduces the offer in two or three sentences.\n\n{}\n\n\
             Reply with JSON only: {{\"connection_note\": \"...\", \"follow_up\": \"...\"}}",
            context
        ),
    }
}

pub fn parse_message_reply(kind: MessageKind, text: &str) -> Result<MessageCopy, AppError> {
    match kind {
        MessageKind::Email => parse_model_json(text).map(MessageCopy::Email),
        MessageKind::Linkedin => parse_model_json(text).map(MessageCopy::Linkedin),
    }
}

/// Generates outreach copy for a lead owned by `user_id`.
pub async fn generate_message(
    store: &dyn Store,
    gemini: &GeminiClient,
    user_id: Uuid,
    lead_id: Uuid,
    kind: MessageKind,
) -> Result<GeneratedMessage, AppError> {
    let (lead, campaign) = store
        .get_lead_with_campaign(user_id, lead_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?;

    let prompt = build_message_prompt(kind, &lead, &campaign);
    let reply = gemini.generate(&prompt, &MESSAGE_SETTINGS).await?;
    let copy = parse_message_reply(kind, &reply)?;

    tracing::info!("Generated {:?} copy for lead {}", kind, lead.id);

    Ok(GeneratedMessage {
        kind,
        lead: lead.business_name,
        copy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shape_follows_kind() {
        let email = parse_message_reply(
            MessageKind::Email,
            r#"{"subject": "Quick idea", "body": "Hi there"}"#,
        )
        .unwrap();
        assert!(matches!(email, MessageCopy::Email(_)));

        let err = parse_message_reply(
            MessageKind::Linkedin,
            r#"{"subject": "Quick idea", "body": "Hi there"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }

    #[test]
    fn test_generated_message_is_flat() {
        let message = GeneratedMessage {
            kind: MessageKind::Linkedin,
            lead: "Sorriso Lisboa".into(),
            copy: MessageCopy::Linkedin(LinkedinCopy {
                connection_note: "Hello".into(),
                follow_up: "Thanks".into(),
            }),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({
                "type": "linkedin",
                "lead": "Sorriso Lisboa",
                "connection_note": "Hello",
                "follow_up": "Thanks"
            })
        );
    }
}
