use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use showroom_core::domain::session::{SessionId, SessionState, Slots, Turn, TurnRole};
use showroom_core::funnel::states::FunnelSignal;
use showroom_core::merge::CandidateUpdate;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{LlmClient, LlmError, LlmMessage, LlmRequest};

/// What the extractor sees for one turn. It never gets write access to state.
#[derive(Clone, Copy, Debug)]
pub struct ExtractionRequest<'a> {
    pub message: &'a str,
    pub slots: &'a Slots,
    pub history: &'a [Turn],
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("extractor output was malformed: {0}")]
    Malformed(String),
    #[error("extractor did not answer within {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait SlotExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        request: ExtractionRequest<'_>,
    ) -> Result<CandidateUpdate, ExtractionError>;
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a car sales assistant guiding a customer from needs discovery to delivery.
Read the customer's latest message in the context of the conversation and the currently known preferences.
Respond with a single JSON object and nothing else:
{
  "slots": { only the fields the customer just stated or changed },
  "signals": [ structured signals, usually empty ],
  "reply": "a short, friendly reply that moves the conversation forward"
}
Allowed slot fields:
- "body": body style such as "SUV", "sedan", "hatchback", "coupe", "wagon", "minivan", "pickup"
- "seats_min": minimum number of seats as an integer
- "fuel": one of "petrol", "diesel", "hybrid", "plug-in hybrid", "electric"
- "brand": manufacturer name
- "model": model name
Allowed signals:
- "test_drive_completed": only when the customer clearly states they already finished a test drive
- "advance_stage": only when the customer explicitly confirms they want to proceed to the next step
Omit any field you are not confident about. Never repeat unchanged values."#;

/// Slot extractor backed by an LLM returning structured JSON.
pub struct LlmSlotExtractor {
    client: Arc<dyn LlmClient>,
}

impl LlmSlotExtractor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn build_request(request: &ExtractionRequest<'_>) -> LlmRequest {
        let mut messages = request
            .history
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => LlmMessage::user(turn.text.clone()),
                TurnRole::Assistant => LlmMessage::assistant(turn.text.clone()),
            })
            .collect::<Vec<_>>();

        let known = serde_json::to_string(request.slots).unwrap_or_else(|_| "{}".to_string());
        messages.push(LlmMessage::user(format!(
            "Known preferences: {known}\nCustomer message: {}",
            request.message
        )));

        LlmRequest { system: Some(EXTRACTION_SYSTEM_PROMPT.to_string()), messages }
    }
}

#[async_trait]
impl SlotExtractor for LlmSlotExtractor {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn extract(
        &self,
        request: ExtractionRequest<'_>,
    ) -> Result<CandidateUpdate, ExtractionError> {
        let raw = self.client.complete(&Self::build_request(&request)).await?;
        parse_candidate(&raw)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    slots: BTreeMap<String, Value>,
    #[serde(default)]
    signals: Vec<Value>,
    #[serde(default)]
    reply: Option<String>,
}

/// Parses the model's answer, tolerating code fences and surrounding prose.
/// Null slot values mean "no opinion" and are dropped here; everything else is
/// left for the merger to validate.
pub fn parse_candidate(raw: &str) -> Result<CandidateUpdate, ExtractionError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => return Err(ExtractionError::Malformed("no JSON object in output".to_string())),
    };

    let parsed: RawExtraction = serde_json::from_str(body)
        .map_err(|error| ExtractionError::Malformed(error.to_string()))?;

    let mut candidate = CandidateUpdate::empty();
    for (key, value) in parsed.slots {
        if !value.is_null() {
            candidate = candidate.with_slot(key, value);
        }
    }

    for signal in parsed.signals {
        match signal.as_str().map(str::parse::<FunnelSignal>) {
            Some(Ok(signal)) => candidate = candidate.with_signal(signal),
            _ => {
                debug!(event_name = "extraction.signal_dropped", signal = %signal, "unknown signal")
            }
        }
    }

    if let Some(reply) = parsed.reply.map(|reply| reply.trim().to_string()) {
        if !reply.is_empty() {
            candidate = candidate.with_reply(reply);
        }
    }

    Ok(candidate)
}

struct BrandCatalog {
    brand: &'static str,
    aliases: &'static [&'static str],
    models: &'static [(&'static str, &'static [&'static str])],
}

const BRANDS: &[BrandCatalog] = &[
    BrandCatalog {
        brand: "Audi",
        aliases: &["audi"],
        models: &[
            ("A3", &["a3"]),
            ("A4", &["a4"]),
            ("A6", &["a6"]),
            ("Q3", &["q3"]),
            ("Q5", &["q5"]),
            ("Q7", &["q7"]),
            ("e-tron", &["e-tron", "etron"]),
        ],
    },
    BrandCatalog {
        brand: "BMW",
        aliases: &["bmw"],
        models: &[
            ("X1", &["x1"]),
            ("X3", &["x3"]),
            ("X5", &["x5"]),
            ("3 Series", &["3 series", "3-series"]),
            ("5 Series", &["5 series", "5-series"]),
            ("i4", &["i4"]),
        ],
    },
    BrandCatalog {
        brand: "Mercedes-Benz",
        aliases: &["mercedes-benz", "mercedes", "benz"],
        models: &[
            ("C-Class", &["c-class", "c class"]),
            ("E-Class", &["e-class", "e class"]),
            ("GLC", &["glc"]),
            ("GLE", &["gle"]),
        ],
    },
    BrandCatalog {
        brand: "Toyota",
        aliases: &["toyota"],
        models: &[
            ("Corolla", &["corolla"]),
            ("Camry", &["camry"]),
            ("RAV4", &["rav4", "rav 4"]),
            ("Prius", &["prius"]),
            ("Highlander", &["highlander"]),
        ],
    },
    BrandCatalog {
        brand: "Honda",
        aliases: &["honda"],
        models: &[("Civic", &["civic"]), ("Accord", &["accord"]), ("CR-V", &["cr-v", "crv"])],
    },
    BrandCatalog {
        brand: "Volvo",
        aliases: &["volvo"],
        models: &[("XC40", &["xc40"]), ("XC60", &["xc60"]), ("XC90", &["xc90"])],
    },
    BrandCatalog {
        brand: "Tesla",
        aliases: &["tesla"],
        models: &[
            ("Model 3", &["model 3"]),
            ("Model Y", &["model y"]),
            ("Model S", &["model s"]),
            ("Model X", &["model x"]),
        ],
    },
    BrandCatalog {
        brand: "Volkswagen",
        aliases: &["volkswagen", "vw"],
        models: &[
            ("Golf", &["golf"]),
            ("Passat", &["passat"]),
            ("Tiguan", &["tiguan"]),
            ("ID.4", &["id.4", "id4"]),
        ],
    },
    BrandCatalog {
        brand: "Ford",
        aliases: &["ford"],
        models: &[
            ("Focus", &["focus"]),
            ("Mustang", &["mustang"]),
            ("Explorer", &["explorer"]),
            ("F-150", &["f-150", "f150"]),
        ],
    },
    BrandCatalog {
        brand: "Kia",
        aliases: &["kia"],
        models: &[("Sportage", &["sportage"]), ("Sorento", &["sorento"]), ("EV6", &["ev6"])],
    },
    BrandCatalog {
        brand: "Hyundai",
        aliases: &["hyundai"],
        models: &[
            ("Tucson", &["tucson"]),
            ("Santa Fe", &["santa fe"]),
            ("Ioniq 5", &["ioniq 5", "ioniq5"]),
        ],
    },
];

const BODY_TYPES: &[(&str, &[&str])] = &[
    ("SUV", &["suv", "suvs", "crossover"]),
    ("sedan", &["sedan", "saloon"]),
    ("hatchback", &["hatchback", "hatch"]),
    ("coupe", &["coupe"]),
    ("convertible", &["convertible", "cabriolet"]),
    ("wagon", &["wagon", "estate"]),
    ("minivan", &["minivan", "mpv", "people carrier"]),
    ("pickup", &["pickup", "pick-up", "truck"]),
];

// order matters: plug-in hybrid must win over hybrid
const FUEL_TYPES: &[(&str, &[&str])] = &[
    ("plug-in hybrid", &["plug-in hybrid", "plugin hybrid", "phev"]),
    ("hybrid", &["hybrid"]),
    ("electric", &["electric", "ev", "bev", "battery electric"]),
    ("diesel", &["diesel"]),
    ("petrol", &["petrol", "gasoline", "gas"]),
];

const SEAT_UNITS: &[&str] = &["seat", "seats", "seater", "seaters", "passengers", "people"];

/// Offline, deterministic extractor. It recognises body style, seat count,
/// fuel, and a fixed brand/model catalog. It never raises funnel signals.
#[derive(Clone, Debug, Default)]
pub struct KeywordSlotExtractor;

impl KeywordSlotExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_text(&self, text: &str) -> CandidateUpdate {
        let tokens = tokenize(text);
        let haystack = format!(" {} ", tokens.join(" "));
        let mut candidate = CandidateUpdate::empty();

        if let Some(body) = first_match(&haystack, BODY_TYPES) {
            candidate = candidate.with_slot("body", body);
        }
        if let Some(seats) = extract_seats(&tokens) {
            candidate = candidate.with_slot("seats_min", seats);
        }
        if let Some(fuel) = first_match(&haystack, FUEL_TYPES) {
            candidate = candidate.with_slot("fuel", fuel);
        }

        let brand = BRANDS
            .iter()
            .find(|catalog| catalog.aliases.iter().any(|alias| contains_phrase(&haystack, alias)));
        let model = BRANDS.iter().find_map(|catalog| {
            catalog
                .models
                .iter()
                .find(|(_, aliases)| aliases.iter().any(|alias| contains_phrase(&haystack, alias)))
                .map(|(model, _)| (catalog, *model))
        });

        match (brand, model) {
            (Some(brand), Some((owner, model))) if brand.brand == owner.brand => {
                candidate = candidate.with_slot("brand", brand.brand).with_slot("model", model);
            }
            (Some(brand), _) => candidate = candidate.with_slot("brand", brand.brand),
            (None, Some((owner, model))) => {
                candidate = candidate.with_slot("brand", owner.brand).with_slot("model", model);
            }
            (None, None) => {}
        }

        candidate
    }
}

#[async_trait]
impl SlotExtractor for KeywordSlotExtractor {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn extract(
        &self,
        request: ExtractionRequest<'_>,
    ) -> Result<CandidateUpdate, ExtractionError> {
        Ok(self.extract_text(request.message))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.to_ascii_lowercase().chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '-' | '.') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|c| c == '.' || c == '-').to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.contains(&format!(" {phrase} "))
}

fn first_match(haystack: &str, table: &[(&'static str, &[&str])]) -> Option<&'static str> {
    table
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|alias| contains_phrase(haystack, alias)))
        .map(|(canonical, _)| *canonical)
}

fn parse_count(token: &str) -> Option<u32> {
    if let Ok(value) = token.parse::<u32>() {
        return Some(value);
    }
    let value = match token {
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        _ => return None,
    };
    Some(value)
}

/// Recognises "7 seats", "seven seater", "5-seater" and "seats 5".
fn extract_seats(tokens: &[String]) -> Option<u32> {
    for token in tokens {
        if let Some((count, unit)) = token.split_once('-') {
            if SEAT_UNITS.contains(&unit) {
                if let Some(count) = parse_count(count) {
                    return Some(count);
                }
            }
        }
    }

    for window in tokens.windows(2) {
        if let [first, second] = window {
            if SEAT_UNITS.contains(&second.as_str()) {
                if let Some(count) = parse_count(first) {
                    return Some(count);
                }
            }
            if matches!(first.as_str(), "seats" | "seating") {
                if let Some(count) = parse_count(second) {
                    return Some(count);
                }
            }
        }
    }

    None
}

/// Outcome of one advisory extraction call.
#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub candidate: CandidateUpdate,
    pub fell_back: bool,
}

/// Wraps an extractor with the history window, a request-level timeout, and
/// the empty-update fallback.
pub struct ExtractionAdapter {
    extractor: Arc<dyn SlotExtractor>,
    timeout: Duration,
    history_window: usize,
}

impl ExtractionAdapter {
    pub fn new(
        extractor: Arc<dyn SlotExtractor>,
        timeout: Duration,
        history_window: usize,
    ) -> Self {
        Self { extractor, timeout, history_window }
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    pub async fn propose(
        &self,
        state: &SessionState,
        message: &str,
        session_id: &SessionId,
        correlation_id: &str,
    ) -> Extraction {
        let request = ExtractionRequest {
            message,
            slots: &state.slots,
            history: state.recent_history(self.history_window),
        };

        let result = match tokio::time::timeout(self.timeout, self.extractor.extract(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::TimedOut(self.timeout)),
        };

        match result {
            Ok(candidate) => {
                debug!(
                    event_name = "extraction.completed",
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    extractor = self.extractor.name(),
                    proposed_slots = candidate.slots.len(),
                    proposed_signals = candidate.signals.len(),
                    "slot extraction completed"
                );
                Extraction { candidate, fell_back: false }
            }
            Err(error) => {
                warn!(
                    event_name = "extraction.failed",
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    extractor = self.extractor.name(),
                    error = %error,
                    "slot extraction failed; continuing with an empty update"
                );
                Extraction { candidate: CandidateUpdate::empty(), fell_back: true }
            }
        }
    }
}
