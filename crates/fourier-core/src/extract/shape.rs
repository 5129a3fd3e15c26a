//! Expected response shapes and soft validation.

use serde_json::Value;

use crate::config::TranslationMode;

/// What a caller expects the parsed object to look like.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseShape {
    pub name: &'static str,
    /// Strategy 4 accepts a candidate only if it has at least one of these keys.
    /// Empty means any object is accepted.
    pub anchor_keys: Vec<&'static str>,
    /// Keys whose absence is reported as a warning.
    pub required_keys: Vec<&'static str>,
    /// Top-level keys holding `{a0, an, bn}` objects whose numeric strings are coerced.
    pub coefficient_fields: Vec<&'static str>,
}

impl ResponseShape {
    /// Reply of the code-translation stage.
    pub fn translation(mode: TranslationMode) -> Self {
        let reconstruction_key = match mode {
            TranslationMode::Functions => "fourier_reconstruction",
            TranslationMode::Coefficients => "coefficients",
        };
        Self {
            name: "translation",
            anchor_keys: vec!["original_function", reconstruction_key],
            required_keys: vec!["original_function", reconstruction_key],
            coefficient_fields: vec!["coefficients"],
        }
    }

    /// Reply of the error-analysis stage.
    pub fn analysis() -> Self {
        Self {
            name: "analysis",
            anchor_keys: vec!["error_category", "need_recalculation"],
            required_keys: vec![
                "error_category",
                "severity",
                "need_recalculation",
                "recalculation_target",
                "explanation",
                "suggestion_to_user",
                "auto_stop",
            ],
            coefficient_fields: Vec::new(),
        }
    }

    /// Any JSON object.
    pub fn any() -> Self {
        Self {
            name: "any",
            anchor_keys: Vec::new(),
            required_keys: Vec::new(),
            coefficient_fields: Vec::new(),
        }
    }

    pub(crate) fn anchors_match(&self, value: &Value) -> bool {
        if self.anchor_keys.is_empty() {
            return value.is_object();
        }
        value
            .as_object()
            .is_some_and(|obj| self.anchor_keys.iter().any(|k| obj.contains_key(*k)))
    }

    /// Coerce numeric strings in coefficient fields and collect shape warnings.
    /// Never fails; the value is returned partially fixed.
    pub(crate) fn conform(&self, value: &mut Value) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(obj) = value.as_object_mut() else {
            warnings.push("response is not a JSON object".to_string());
            return warnings;
        };

        for key in &self.required_keys {
            if !obj.contains_key(*key) {
                warnings.push(format!("missing required key: {key}"));
            }
        }

        for field in &self.coefficient_fields {
            let Some(coeffs) = obj.get_mut(*field).and_then(Value::as_object_mut) else {
                continue;
            };
            if let Some(a0) = coeffs.get_mut("a0") {
                if let Err(w) = coerce_number(a0) {
                    warnings.push(format!("{field}.a0: {w}"));
                }
            }
            for list in ["an", "bn"] {
                match coeffs.get_mut(list) {
                    Some(Value::Array(items)) => {
                        for (i, item) in items.iter_mut().enumerate() {
                            if let Err(w) = coerce_number(item) {
                                warnings.push(format!("{field}.{list}[{i}]: {w}"));
                            }
                        }
                    }
                    Some(_) => warnings.push(format!("{field}.{list} must be a list")),
                    None => {}
                }
            }
        }
        warnings
    }
}

fn coerce_number(value: &mut Value) -> Result<(), String> {
    match value {
        Value::Number(_) => Ok(()),
        Value::String(s) => {
            let parsed: f64 = s
                .trim()
                .parse()
                .map_err(|_| format!("invalid number '{s}'"))?;
            let number = serde_json::Number::from_f64(parsed)
                .ok_or_else(|| format!("non-finite number '{s}'"))?;
            *value = Value::Number(number);
            Ok(())
        }
        other => Err(format!("expected a number, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerces_coefficient_strings() {
        let shape = ResponseShape::translation(TranslationMode::Coefficients);
        let mut value = json!({
            "original_function": "t",
            "coefficients": {"a0": "0.5", "an": ["1.0", 2], "bn": [" -3 "]}
        });
        let warnings = shape.conform(&mut value);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(value["coefficients"]["a0"], json!(0.5));
        assert_eq!(value["coefficients"]["an"], json!([1.0, 2]));
        assert_eq!(value["coefficients"]["bn"], json!([-3.0]));
    }

    #[test]
    fn test_missing_keys_are_warnings() {
        let shape = ResponseShape::analysis();
        let mut value = json!({"error_category": "gibbs_phenomenon"});
        let warnings = shape.conform(&mut value);
        assert_eq!(warnings.len(), 6);
        assert!(warnings.iter().any(|w| w.contains("severity")));
    }

    #[test]
    fn test_bad_coefficient_kept_with_warning() {
        let shape = ResponseShape::translation(TranslationMode::Coefficients);
        let mut value = json!({
            "original_function": "t",
            "coefficients": {"a0": "half", "an": [], "bn": []}
        });
        let warnings = shape.conform(&mut value);
        assert_eq!(warnings.len(), 1);
        assert_eq!(value["coefficients"]["a0"], json!("half"));
    }

    #[test]
    fn test_anchor_match() {
        let shape = ResponseShape::translation(TranslationMode::Functions);
        assert!(shape.anchors_match(&json!({"fourier_reconstruction": "t"})));
        assert!(!shape.anchors_match(&json!({"a": 1})));
        assert!(ResponseShape::any().anchors_match(&json!({"a": 1})));
    }
}
