//! Relevance judgment through the OpenAI chat completions API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::models::{InterestStatement, Judgment, Listing};
use crate::plugins::traits::RelevanceClassifier;
use crate::utils::error::{AppError, Result};

const JUDGE_SYSTEM_PROMPT: &str = "Tu es un agent immobilier qui reçoit une description d'une annonce immobilière. \
Tu dois décider si cette annonce est intéressante ou non.";

const SUMMARY_SYSTEM_PROMPT: &str = "Tu es un agent immobilier qui reçoit une description d'une annonce immobilière. \
Tu dois donner un résumé pertinent de cette annonce.";

const SUMMARY_FORMAT: &str = "Le format attendu pour le résumé est le suivant :
**Localisation**
- Quartier: [Nom du quartier], [Ville] ([code postal])
- Proximité: [Eléments notables de l'environnement immédiat]

**Détails du bien**
- Type de bien: [Maison/Maison de ville/Appartement/etc.]
- Prix: [Prix] € ([Détails des honoraires si applicable])
- Superficie habitable: [Superficie habitable] m²
- Superficie du terrain: [Superficie du terrain] m²

**Disposition**
- Nombre de pièces: [Nombre total]
- Chambres: [Nombre de chambres]
- Salles d'eau: [Nombre de salles de bain + caractéristiques]
- Annexes: [Liste des annexes telles que jardin, garage, cave, etc.]

**Caractéristiques**
- État général: [État général du bien]
- Chauffage: [Type de chauffage]
- Exposition: [Exposition si applicable]

**Diagnostics énergétiques**
- DPE: [Classe énergétique]
- GES: [Classe climatique]

**Informations complémentaires**
- [Toute autre information intéressante sur le bien]";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// The answer shape the judge prompt asks for.
#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(rename = "Interessante", default)]
    interesting: bool,
    #[serde(rename = "Titre", default)]
    title: Option<String>,
}

pub struct OpenAiClassifier {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    summarize: bool,
}

impl OpenAiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Missing OpenAI API key".into())))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            summarize: config.summarize,
        })
    }

    async fn complete(&self, system: &str, prompt: &str, json_mode: bool) -> Result<String> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: json_mode.then(|| json!({"type": "json_object"})),
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "OpenAI API error");
            return Err(AppError::Api {
                service: "OpenAI",
                status: status.as_u16(),
                message: body,
            });
        }

        let body: ChatResponse = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::Classifier("No completion returned".to_string()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "OpenAI chat completion"
        );
        Ok(content)
    }
}

#[async_trait]
impl RelevanceClassifier for OpenAiClassifier {
    async fn judge(&self, listing: &Listing, criteria: &[InterestStatement]) -> Result<Judgment> {
        if listing.description.trim().is_empty() {
            debug!(listing_id = %listing.id, "Empty description, judged irrelevant without asking");
            return Ok(Judgment::irrelevant());
        }

        let answer = self
            .complete(JUDGE_SYSTEM_PROMPT, &judge_prompt(listing, criteria), true)
            .await?;
        let verdict = parse_verdict(&answer)?;

        if !verdict.interesting {
            return Ok(Judgment::irrelevant());
        }

        info!(listing_id = %listing.id, "Listing judged relevant");
        let summary = if self.summarize {
            match self.complete(SUMMARY_SYSTEM_PROMPT, &summary_prompt(listing), false).await {
                Ok(summary) => Some(summary.trim().to_string()),
                Err(e) => {
                    warn!(listing_id = %listing.id, error = %e, "Summary request failed, notifying without it");
                    None
                }
            }
        } else {
            None
        };

        Ok(Judgment {
            relevant: true,
            title: verdict.title.filter(|t| !t.trim().is_empty()),
            summary,
        })
    }
}

fn listing_context(listing: &Listing) -> String {
    let mut context = format!(
        "Voici une description d'une annonce immobilière: {}\n\n",
        listing.description.trim()
    );
    if !listing.location_tags.is_empty() {
        context.push_str(&format!("Localisation : {}\n\n", listing.location_label()));
    }
    if let Some(info) = listing.additional_info.as_deref().filter(|i| !i.is_empty()) {
        context.push_str(&format!("Informations supplémentaires : {}\n\n", info));
    }
    context
}

fn judge_prompt(listing: &Listing, criteria: &[InterestStatement]) -> String {
    let statements = criteria
        .iter()
        .map(InterestStatement::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{}Critères intéressants : {}. ATTENTION : si un critère est marqué PAS, l'annonce devient \
immédiatement non intéressante si elle le remplit.\n\n\
Est-ce que cette annonce répond à ces critères ? Formate ta réponse de la façon suivante : \
{{\"Interessante\": true/false, \"Titre\": \"Titre annonce\"}}. Réponds uniquement avec cette structure JSON.",
        listing_context(listing),
        statements
    )
}

fn summary_prompt(listing: &Listing) -> String {
    format!(
        "Donne-moi un résumé pertinent (prix, superficie, nombre de chambres, état général, critères, etc.) \
sous forme de bullet-point, formaté avec bold et italic, de cette annonce immobilière.\n\n{}{}",
        listing_context(listing),
        SUMMARY_FORMAT
    )
}

/// Accepts the bare JSON object, optionally wrapped in a markdown code fence.
fn parse_verdict(answer: &str) -> Result<Verdict> {
    let trimmed = answer.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    let candidate = match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };

    serde_json::from_str(candidate)
        .map_err(|e| AppError::Classifier(format!("Unparseable judgment '{}': {}", trimmed, e)))
}
