//! Identity Matcher Gateway.
//!
//! Wraps the external recognition call behind a contract that always returns:
//! a captured image plus a bounded gallery goes in, `Matched(id)` or
//! `NoMatch` comes out. Transport failures, provider refusals and unreadable
//! replies all degrade to `NoMatch` and are counted in [`GatewayStats`].

pub mod frame;

use crate::model::Student;
use crate::provider::{GenerateRequest, ProviderError, RecognitionProvider};
use frame::EncodedImage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const NEW_SENTINEL: &str = "NEW";

const DEFAULT_PROMPT: &str = "You are verifying student identity for a school register.
The first image is the TARGET. Every following image is a gallery reference, in the same order as the list below.
Decide whether the person in the TARGET appears in the gallery, comparing stable facial structure only.
Reply with the exact gallery ID of the matching person, or NEW when the person is not in the gallery.
Gallery (ID: name):
{gallery}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GalleryOrder {
    #[default]
    MostRecentLast,
    MostRecentFirst,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub window: usize,
    pub order: GalleryOrder,
    pub min_confidence: Option<f64>,
    pub prompt_template: Option<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            window: 40,
            order: GalleryOrder::MostRecentLast,
            min_confidence: None,
            prompt_template: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub id: String,
    pub name: String,
    pub image: EncodedImage,
}

impl GalleryEntry {
    pub fn from_student(s: &Student) -> Self {
        GalleryEntry {
            id: s.id.clone(),
            name: s.full_name.clone(),
            image: EncodedImage::from_stored(&s.face_reference),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched(String),
    NoMatch,
}

#[derive(Debug, Clone, PartialEq)]
enum Verdict {
    Matched { id: String, confidence: Option<f64> },
    New,
    UnknownId(String),
    LowConfidence { id: String, confidence: f64 },
    Unreadable(String),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub class: String,
    pub message: String,
    pub at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub calls: u64,
    pub matches: u64,
    pub no_matches: u64,
    pub failures: u64,
    pub last_failure: Option<FailureRecord>,
}

pub struct MatcherGateway {
    provider: Arc<dyn RecognitionProvider>,
    config: MatcherConfig,
    stats: Mutex<GatewayStats>,
}

impl MatcherGateway {
    pub fn new(provider: Arc<dyn RecognitionProvider>, config: MatcherConfig) -> Self {
        MatcherGateway {
            provider,
            config,
            stats: Mutex::new(GatewayStats::default()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Most recently added `window` entries of `population` (insertion order),
    /// arranged per the configured order.
    pub fn window<'a, T>(&self, population: &'a [T]) -> Vec<&'a T> {
        let start = population.len().saturating_sub(self.config.window);
        let mut picked: Vec<&T> = population[start..].iter().collect();
        if self.config.order == GalleryOrder::MostRecentFirst {
            picked.reverse();
        }
        picked
    }

    pub async fn match_students(&self, capture: &EncodedImage, students: &[Student]) -> MatchResult {
        let gallery: Vec<GalleryEntry> = self
            .window(students)
            .into_iter()
            .map(GalleryEntry::from_student)
            .collect();
        self.match_gallery(capture, &gallery).await
    }

    /// `gallery` is windowed again here, so callers may pass a full population.
    pub async fn match_capture(&self, capture: &EncodedImage, gallery: &[GalleryEntry]) -> MatchResult {
        let windowed: Vec<GalleryEntry> = self.window(gallery).into_iter().cloned().collect();
        self.match_gallery(capture, &windowed).await
    }

    async fn match_gallery(&self, capture: &EncodedImage, gallery: &[GalleryEntry]) -> MatchResult {
        if gallery.is_empty() {
            debug!("empty gallery; skipping recognition call");
            return MatchResult::NoMatch;
        }
        self.bump(|s| s.calls += 1);

        let request = self.build_request(capture, gallery);
        let reply = match self.provider.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                self.record_failure(&e);
                return MatchResult::NoMatch;
            }
        };

        match parse_verdict(&reply, gallery, self.config.min_confidence) {
            Verdict::Matched { id, confidence } => {
                info!(student = %id, ?confidence, "gallery match");
                self.bump(|s| s.matches += 1);
                MatchResult::Matched(id)
            }
            Verdict::New => {
                self.bump(|s| s.no_matches += 1);
                MatchResult::NoMatch
            }
            Verdict::UnknownId(id) => {
                warn!(reply_id = %id, "provider named an id outside the gallery");
                self.bump(|s| s.no_matches += 1);
                MatchResult::NoMatch
            }
            Verdict::LowConfidence { id, confidence } => {
                debug!(student = %id, confidence, "match below confidence threshold");
                self.bump(|s| s.no_matches += 1);
                MatchResult::NoMatch
            }
            Verdict::Unreadable(reason) => {
                warn!(%reason, "unreadable recognition reply");
                self.bump(|s| {
                    s.no_matches += 1;
                    s.failures += 1;
                    s.last_failure = Some(FailureRecord {
                        class: "unreadable".to_string(),
                        message: reason.clone(),
                        at: chrono::Utc::now().to_rfc3339(),
                    });
                });
                MatchResult::NoMatch
            }
        }
    }

    fn build_request(&self, capture: &EncodedImage, gallery: &[GalleryEntry]) -> GenerateRequest {
        let listing = gallery
            .iter()
            .map(|g| format!("{}: {}", g.id, g.name))
            .collect::<Vec<_>>()
            .join("\n");
        let template = self.config.prompt_template.as_deref().unwrap_or(DEFAULT_PROMPT);
        let prompt = if template.contains("{gallery}") {
            template.replace("{gallery}", &listing)
        } else {
            format!("{}\n{}", template, listing)
        };

        let mut images = Vec::with_capacity(gallery.len() + 1);
        images.push(capture.clone());
        images.extend(gallery.iter().map(|g| g.image.clone()));

        GenerateRequest {
            prompt,
            images,
            response_schema: Some(json!({
                "type": "OBJECT",
                "properties": {
                    "matchId": {
                        "type": "STRING",
                        "description": "Gallery ID of the matching person, or NEW."
                    },
                    "confidence": {
                        "type": "NUMBER",
                        "description": "Match confidence between 0 and 1."
                    }
                },
                "required": ["matchId"]
            })),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut GatewayStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut stats);
    }

    fn record_failure(&self, e: &ProviderError) {
        warn!(class = e.class(), error = %e, "recognition call failed");
        self.bump(|s| {
            s.no_matches += 1;
            s.failures += 1;
            s.last_failure = Some(FailureRecord {
                class: e.class().to_string(),
                message: e.to_string(),
                at: chrono::Utc::now().to_rfc3339(),
            });
        });
    }
}

fn strip_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_verdict(reply: &str, gallery: &[GalleryEntry], min_confidence: Option<f64>) -> Verdict {
    let body = strip_fence(reply);
    if body.is_empty() {
        return Verdict::Unreadable("empty reply".into());
    }
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return Verdict::Unreadable(format!("not json: {e}")),
    };
    let Some(obj) = value.as_object() else {
        return Verdict::Unreadable("reply is not an object".into());
    };
    let Some(raw_id) = obj.get("matchId").and_then(|v| v.as_str()) else {
        return Verdict::Unreadable("matchId missing or not a string".into());
    };
    let id = raw_id.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if id.is_empty() || id.eq_ignore_ascii_case(NEW_SENTINEL) {
        return Verdict::New;
    }
    if !gallery.iter().any(|g| g.id == id) {
        return Verdict::UnknownId(id.to_string());
    }
    let confidence = obj.get("confidence").and_then(|v| v.as_f64());
    if let (Some(threshold), Some(c)) = (min_confidence, confidence) {
        if c < threshold {
            return Verdict::LowConfidence {
                id: id.to_string(),
                confidence: c,
            };
        }
    }
    Verdict::Matched {
        id: id.to_string(),
        confidence,
    }
}
