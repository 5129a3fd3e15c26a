//! Run request: the immutable input of one orchestrator run.

use serde::{Deserialize, Serialize};

use super::error::{FourierError, Result};

/// A validated request to derive and verify a Fourier series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Function expression in `t`, e.g. `"np.sin(t)"`.
    pub function_expr: String,

    /// Period of the function (finite, > 0).
    pub period: f64,

    /// Number of harmonics requested (1..=max_terms).
    pub n_terms: u32,
}

impl RunRequest {
    /// Validate and build a request.
    pub fn new(
        function_expr: impl Into<String>,
        period: f64,
        n_terms: u32,
        max_terms: u32,
    ) -> Result<Self> {
        let function_expr = function_expr.into().trim().to_string();
        if function_expr.is_empty() {
            return Err(FourierError::InvalidRequest(
                "function expression must not be empty".to_string(),
            ));
        }
        if !(period.is_finite() && period > 0.0) {
            return Err(FourierError::InvalidRequest(format!(
                "period must be a finite positive number, got {period}"
            )));
        }
        if n_terms == 0 || n_terms > max_terms {
            return Err(FourierError::InvalidRequest(format!(
                "n_terms must be between 1 and {max_terms}, got {n_terms}"
            )));
        }
        Ok(Self {
            function_expr,
            period,
            n_terms,
        })
    }

    /// Re-check an already-built request (e.g. one deserialized from JSON).
    pub fn validate(&self, max_terms: u32) -> Result<()> {
        Self::new(self.function_expr.clone(), self.period, self.n_terms, max_terms).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let req = RunRequest::new("  np.sin(t) ", std::f64::consts::TAU, 5, 20).expect("valid");
        assert_eq!(req.function_expr, "np.sin(t)");
        assert_eq!(req.n_terms, 5);
    }

    #[test]
    fn test_rejects_empty_expression() {
        assert!(RunRequest::new("   ", 1.0, 1, 20).is_err());
    }

    #[test]
    fn test_rejects_bad_period() {
        assert!(RunRequest::new("t", 0.0, 1, 20).is_err());
        assert!(RunRequest::new("t", -1.0, 1, 20).is_err());
        assert!(RunRequest::new("t", f64::NAN, 1, 20).is_err());
        assert!(RunRequest::new("t", f64::INFINITY, 1, 20).is_err());
    }

    #[test]
    fn test_rejects_term_count_out_of_range() {
        assert!(RunRequest::new("t", 1.0, 0, 20).is_err());
        assert!(RunRequest::new("t", 1.0, 21, 20).is_err());
        assert!(RunRequest::new("t", 1.0, 20, 20).is_ok());
    }

    #[test]
    fn test_validate_deserialized() {
        let req: RunRequest =
            serde_json::from_str(r#"{"function_expr":"t","period":2.0,"n_terms":50}"#)
                .expect("deserialize");
        assert!(req.validate(20).is_err());
    }
}
