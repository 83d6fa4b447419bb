//! # Simulation Data Model
//!
//! Typed forms of the loosely-typed documents exchanged with the simulation
//! service. A manifest entry is parsed into a [`SimulationRequest`] at load
//! time: settings are validated and defaulted here, and unknown settings keys
//! are dropped with a debug log so they never reach the wire.
//!
//! ## Wire shapes
//!
//! ```json
//! {"type": "REGULAR", "settings": {...}, "regular": "rank(close)"}
//! {"type": "SUPER", "settings": {...}, "combo": "...", "selection": "..."}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::errors::{AlphaBatchError, Result};

/// Settings keys understood by the platform for every alpha type.
const KNOWN_SETTINGS: &[&str] = &[
    "instrumentType",
    "region",
    "universe",
    "delay",
    "decay",
    "neutralization",
    "truncation",
    "pasteurization",
    "testPeriod",
    "unitHandling",
    "nanHandling",
    "maxTrade",
    "language",
    "visualization",
    "selectionHandling",
    "selectionLimit",
];

/// Kind of alpha being simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlphaType {
    Regular,
    Super,
}

impl AlphaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlphaType::Regular => "REGULAR",
            AlphaType::Super => "SUPER",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "REGULAR" => Ok(AlphaType::Regular),
            "SUPER" => Ok(AlphaType::Super),
            other => Err(AlphaBatchError::validation(format!(
                "alpha type should be REGULAR or SUPER, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AlphaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulation settings with the platform defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationSettings {
    pub instrument_type: String,
    pub region: String,
    pub universe: String,
    pub delay: u8,
    pub decay: i64,
    pub neutralization: String,
    pub truncation: f64,
    pub pasteurization: String,
    pub test_period: String,
    pub unit_handling: String,
    pub nan_handling: String,
    pub max_trade: String,
    pub language: String,
    pub visualization: bool,
    /// SUPER only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_handling: Option<String>,
    /// SUPER only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_limit: Option<u32>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            instrument_type: "EQUITY".to_string(),
            region: "USA".to_string(),
            universe: "TOP3000".to_string(),
            delay: 1,
            decay: 0,
            neutralization: "INDUSTRY".to_string(),
            truncation: 0.08,
            pasteurization: "ON".to_string(),
            test_period: "P0Y0M0D".to_string(),
            unit_handling: "VERIFY".to_string(),
            nan_handling: "OFF".to_string(),
            max_trade: "OFF".to_string(),
            language: "FASTEXPR".to_string(),
            visualization: false,
            selection_handling: None,
            selection_limit: None,
        }
    }
}

impl SimulationSettings {
    /// Parse a raw settings object, ignoring keys the platform does not know.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| AlphaBatchError::validation("settings must be an object"))?;

        let mut known = Map::new();
        for (key, value) in object {
            if KNOWN_SETTINGS.contains(&key.as_str()) {
                known.insert(key.clone(), value.clone());
            } else {
                debug!("Ignoring unknown settings field {}", key);
            }
        }

        let settings: SimulationSettings = serde_json::from_value(Value::Object(known))
            .map_err(|e| AlphaBatchError::validation(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.delay > 1 {
            return Err(AlphaBatchError::validation(format!(
                "delay must be 0 or 1, got {}",
                self.delay
            )));
        }
        if self.decay < 0 {
            return Err(AlphaBatchError::validation(format!(
                "decay must be non-negative, got {}",
                self.decay
            )));
        }
        if !self.truncation.is_finite() || !(0.0..=1.0).contains(&self.truncation) {
            return Err(AlphaBatchError::validation(format!(
                "truncation must be within 0..1, got {}",
                self.truncation
            )));
        }
        if self.region.trim().is_empty() || self.universe.trim().is_empty() {
            return Err(AlphaBatchError::validation("region and universe are required"));
        }
        Ok(())
    }

    fn for_type(mut self, alpha_type: AlphaType) -> Self {
        match alpha_type {
            AlphaType::Regular => {
                self.selection_handling = None;
                self.selection_limit = None;
            }
            AlphaType::Super => {
                self.selection_handling
                    .get_or_insert_with(|| "POSITIVE".to_string());
                self.selection_limit.get_or_insert(100);
            }
        }
        self
    }
}

/// Strategy body carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Regular { expression: String },
    Super { combo: String, selection: String },
}

impl Payload {
    /// Human readable form used in logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Payload::Regular { expression } => expression.clone(),
            Payload::Super { combo, selection } => {
                format!("combo={} selection={}", combo, selection)
            }
        }
    }
}

/// One candidate alpha to simulate.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    alpha_type: AlphaType,
    settings: SimulationSettings,
    payload: Payload,
}

impl SimulationRequest {
    /// A REGULAR request with the given expression.
    pub fn regular(expression: impl Into<String>, settings: SimulationSettings) -> Self {
        Self {
            alpha_type: AlphaType::Regular,
            settings: settings.for_type(AlphaType::Regular),
            payload: Payload::Regular {
                expression: expression.into(),
            },
        }
    }

    /// A SUPER request combining a selection and a combo expression.
    pub fn super_alpha(
        combo: impl Into<String>,
        selection: impl Into<String>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            alpha_type: AlphaType::Super,
            settings: settings.for_type(AlphaType::Super),
            payload: Payload::Super {
                combo: combo.into(),
                selection: selection.into(),
            },
        }
    }

    /// Parse and validate one manifest entry.
    ///
    /// A bare string is taken as a REGULAR expression with default settings.
    pub fn from_value(raw: &Value) -> Result<Self> {
        if let Value::String(expression) = raw {
            return Self::checked_regular(expression, SimulationSettings::default());
        }

        let object = raw.as_object().ok_or_else(|| {
            AlphaBatchError::validation("simulation entry must be an object or an expression string")
        })?;

        let alpha_type = match object.get("type") {
            None | Some(Value::Null) => AlphaType::Regular,
            Some(Value::String(raw_type)) => AlphaType::parse(raw_type)?,
            Some(other) => {
                return Err(AlphaBatchError::validation(format!(
                    "alpha type must be a string, got {}",
                    other
                )))
            }
        };

        let settings = match object.get("settings") {
            None | Some(Value::Null) => SimulationSettings::default(),
            Some(raw_settings) => SimulationSettings::from_value(raw_settings)?,
        };

        match alpha_type {
            AlphaType::Regular => {
                let expression = object
                    .get("regular")
                    .or_else(|| object.get("expression"))
                    .and_then(code_of)
                    .ok_or_else(|| AlphaBatchError::validation("REGULAR alpha needs a regular expression"))?;
                Self::checked_regular(&expression, settings)
            }
            AlphaType::Super => {
                let combo = object.get("combo").and_then(code_of).unwrap_or_default();
                let selection = object.get("selection").and_then(code_of).unwrap_or_default();
                if combo.trim().is_empty() || selection.trim().is_empty() {
                    return Err(AlphaBatchError::validation(
                        "SUPER alpha needs both combo and selection expressions",
                    ));
                }
                Ok(Self::super_alpha(combo, selection, settings))
            }
        }
    }

    fn checked_regular(expression: &str, settings: SimulationSettings) -> Result<Self> {
        if expression.trim().is_empty() {
            return Err(AlphaBatchError::validation("expression must not be empty"));
        }
        Ok(Self::regular(expression, settings))
    }

    pub fn alpha_type(&self) -> AlphaType {
        self.alpha_type
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_super(&self) -> bool {
        self.alpha_type == AlphaType::Super
    }

    /// Document submitted to `POST /simulations`.
    pub fn to_document(&self) -> Value {
        let settings = serde_json::to_value(&self.settings).unwrap_or(Value::Null);
        match &self.payload {
            Payload::Regular { expression } => json!({
                "type": self.alpha_type.as_str(),
                "settings": settings,
                "regular": expression,
            }),
            Payload::Super { combo, selection } => json!({
                "type": self.alpha_type.as_str(),
                "settings": settings,
                "combo": combo,
                "selection": selection,
            }),
        }
    }
}

/// Expressions appear either as plain strings or as `{"code": ...}` objects.
fn code_of(value: &Value) -> Option<String> {
    match value {
        Value::String(code) => Some(code.clone()),
        Value::Object(object) => object.get("code").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// An alpha produced by a completed simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlphaResult {
    pub id: String,
    pub alpha_type: AlphaType,
    pub settings: SimulationSettings,
    #[serde(skip)]
    pub payload: Payload,
    /// Platform status of the alpha, e.g. `UNSUBMITTED`.
    pub status: String,
    pub completed_at: DateTime<Utc>,
}

impl AlphaResult {
    /// Combine the submitted request with the platform's alpha document.
    pub fn from_document(request: &SimulationRequest, alpha_id: &str, document: &Value) -> Self {
        let status = document
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(alpha_id)
            .to_string();
        Self {
            id,
            alpha_type: request.alpha_type(),
            settings: request.settings().clone(),
            payload: request.payload().clone(),
            status,
            completed_at: Utc::now(),
        }
    }
}
