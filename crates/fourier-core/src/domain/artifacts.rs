//! Generated code artifacts and their hard validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::TranslationError;

/// Fourier coefficients `a0`, `an[1..=N]`, `bn[1..=N]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub a0: f64,
    pub an: Vec<f64>,
    pub bn: Vec<f64>,
}

impl Coefficients {
    /// Number of harmonics carried.
    pub fn n_terms(&self) -> usize {
        self.an.len()
    }

    /// Evaluate `a0/2 + Σ an·cos(nω₀t) + bn·sin(nω₀t)` with `ω₀ = 2π/period`.
    pub fn evaluate(&self, t: f64, period: f64) -> f64 {
        let omega0 = std::f64::consts::TAU / period;
        let harmonics: f64 = self
            .an
            .iter()
            .zip(&self.bn)
            .enumerate()
            .map(|(i, (a, b))| {
                let phase = (i as f64 + 1.0) * omega0 * t;
                a * phase.cos() + b * phase.sin()
            })
            .sum();
        self.a0 / 2.0 + harmonics
    }

    fn from_value(value: &Value, n_terms: usize) -> Result<Self, TranslationError> {
        let obj = value
            .as_object()
            .ok_or_else(|| TranslationError::InvalidType {
                field: "coefficients".to_string(),
                expected: "object".to_string(),
            })?;

        let a0 = obj
            .get("a0")
            .ok_or_else(|| missing("coefficients.a0"))
            .and_then(|v| number(v, "coefficients.a0"))?;
        let an = number_list(obj.get("an"), "an", n_terms)?;
        let bn = number_list(obj.get("bn"), "bn", n_terms)?;
        Ok(Self { a0, an, bn })
    }
}

/// The reconstruction half of a translation reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reconstruction {
    /// Function source defining `reconstruct(t)`.
    Source { source: String },
    /// Numeric coefficients the reconstruction is synthesised from.
    Coefficients { coefficients: Coefficients },
}

/// Code produced by the translation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeArtifacts {
    /// Source defining the original function `f(t)`.
    pub original_function: String,
    pub reconstruction: Reconstruction,
}

impl CodeArtifacts {
    /// Hard-validate a parsed translation reply.
    ///
    /// `original_function` is required. A `fourier_reconstruction` source wins
    /// over `coefficients` when both are present; coefficient lists must have
    /// exactly `n_terms` entries.
    pub fn from_translation(value: &Value, n_terms: usize) -> Result<Self, TranslationError> {
        let obj = value
            .as_object()
            .ok_or_else(|| TranslationError::InvalidType {
                field: "response".to_string(),
                expected: "object".to_string(),
            })?;

        let original_function = obj
            .get("original_function")
            .ok_or_else(|| missing("original_function"))
            .and_then(|v| source(v, "original_function"))?;

        let reconstruction = match (obj.get("fourier_reconstruction"), obj.get("coefficients")) {
            (Some(v), _) if !v.is_null() => Reconstruction::Source {
                source: source(v, "fourier_reconstruction")?,
            },
            (_, Some(v)) if !v.is_null() => Reconstruction::Coefficients {
                coefficients: Coefficients::from_value(v, n_terms)?,
            },
            _ => return Err(TranslationError::NoReconstruction),
        };

        Ok(Self {
            original_function,
            reconstruction,
        })
    }

    /// Reconstruction source, or a rendered equivalent for coefficient replies.
    pub fn reconstruction_source(&self) -> String {
        match &self.reconstruction {
            Reconstruction::Source { source } => source.clone(),
            Reconstruction::Coefficients { coefficients } => format!(
                "# a0 = {}\n# an = {:?}\n# bn = {:?}",
                coefficients.a0, coefficients.an, coefficients.bn
            ),
        }
    }

    /// Coefficients, when the reply carried them.
    pub fn coefficients(&self) -> Option<&Coefficients> {
        match &self.reconstruction {
            Reconstruction::Coefficients { coefficients } => Some(coefficients),
            Reconstruction::Source { .. } => None,
        }
    }
}

fn missing(field: &str) -> TranslationError {
    TranslationError::MissingField {
        field: field.to_string(),
    }
}

fn source(value: &Value, field: &str) -> Result<String, TranslationError> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        Some(_) => Err(missing(field)),
        None => Err(TranslationError::InvalidType {
            field: field.to_string(),
            expected: "string".to_string(),
        }),
    }
}

fn number(value: &Value, field: &str) -> Result<f64, TranslationError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| TranslationError::InvalidType {
            field: field.to_string(),
            expected: "finite number".to_string(),
        })
}

fn number_list(
    value: Option<&Value>,
    field: &str,
    expected: usize,
) -> Result<Vec<f64>, TranslationError> {
    let qualified = format!("coefficients.{field}");
    let items = value
        .ok_or_else(|| missing(&qualified))?
        .as_array()
        .ok_or_else(|| TranslationError::InvalidType {
            field: qualified.clone(),
            expected: "array".to_string(),
        })?;
    if items.len() != expected {
        return Err(TranslationError::CoefficientLength {
            field: field.to_string(),
            expected,
            got: items.len(),
        });
    }
    items.iter().map(|v| number(v, &qualified)).collect()
}
