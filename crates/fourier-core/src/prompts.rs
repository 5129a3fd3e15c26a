//! Prompt construction.
//!
//! The orchestrator treats every prompt as an opaque string; only the
//! [`PromptBuilder`] implementation knows what the text says.

use crate::config::TranslationMode;
use crate::domain::{CodeArtifacts, RunRequest};
use crate::oracle::Verification;

/// Everything the error-analysis prompt may draw on.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub request: &'a RunRequest,
    pub derivation: &'a str,
    pub artifacts: Option<&'a CodeArtifacts>,
    pub verification: &'a Verification,
    pub threshold: f64,
}

/// Builds the text sent to the model at each stage.
pub trait PromptBuilder: Send + Sync {
    fn derivation(&self, request: &RunRequest, retry_hint: Option<&str>) -> String;

    fn translation(
        &self,
        request: &RunRequest,
        derivation: &str,
        mode: TranslationMode,
        retry_hint: Option<&str>,
    ) -> String;

    fn error_analysis(&self, ctx: &AnalysisContext<'_>) -> String;

    fn json_repair(&self, raw: &str) -> String;
}

/// English prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

const DERIVATION_EXCERPT: usize = 2000;

impl PromptBuilder for DefaultPrompts {
    fn derivation(&self, request: &RunRequest, retry_hint: Option<&str>) -> String {
        let retry = retry_hint
            .map(|hint| {
                format!(
                    "\n## Important\nA previous attempt was rejected. Pay particular attention to:\n{hint}\n\nRedo the derivation carefully with this in mind.\n"
                )
            })
            .unwrap_or_default();

        format!(
            r#"You are a mathematics professor showing a student a complete derivation.

## Problem
Function: f(t) = {expr}
Period: T = {period}
Number of terms: n = {n}

## Task
Derive the Fourier series of this function up to the first {n} harmonics.

Present the full derivation in **Markdown**:

### Step 1: Characterise the function
- symmetry (odd, even, neither)
- periodicity
- discontinuities, if any

### Step 2: Compute a0
- write the integral, show the evaluation, give the result in symbolic form

### Step 3: Compute an
- write the integral, evaluate it, give the general term or each term symbolically

### Step 4: Compute bn
- write the integral, evaluate it, give the general term or each term symbolically

### Step 5: Assemble the series

Reference:
f(t) = a0/2 + sum[an cos(n w0 t) + bn sin(n w0 t)], w0 = 2 pi / T
a0 = (2/T) int_0^T f(t) dt
an = (2/T) int_0^T f(t) cos(n w0 t) dt
bn = (2/T) int_0^T f(t) sin(n w0 t) dt

Use LaTeX for formulas ($...$ or $$...$$). Keep results symbolic; numeric values are not needed.
{retry}
Begin the derivation."#,
            expr = request.function_expr,
            period = request.period,
            n = request.n_terms,
        )
    }

    fn translation(
        &self,
        request: &RunRequest,
        derivation: &str,
        mode: TranslationMode,
        retry_hint: Option<&str>,
    ) -> String {
        let (format_block, notes) = match mode {
            TranslationMode::Functions => (
                r#"{
  "original_function": "def f(t):\n    return np.sin(t) + np.cos(t)",
  "fourier_reconstruction": "def reconstruct(t):\n    w0 = 2 * np.pi / T\n    return np.cos(w0 * t) + np.sin(w0 * t)"
}"#
                .to_string(),
                format!(
                    "- original_function defines f(t)\n- fourier_reconstruction defines reconstruct(t) as the truncated series with {n} harmonics, with numeric values substituted for every coefficient",
                    n = request.n_terms
                ),
            ),
            TranslationMode::Coefficients => (
                r#"{
  "original_function": "def f(t):\n    return np.sin(t) + np.cos(t)",
  "coefficients": {"a0": 0.0, "an": [1.0, 0.0, 0.0], "bn": [1.0, 0.0, 0.0]}
}"#
                .to_string(),
                format!(
                    "- original_function defines f(t)\n- coefficients.an and coefficients.bn each have exactly {n} numeric entries; an[0] is a1, an[1] is a2, and so on\n- a0 is the constant coefficient (the series uses a0/2)",
                    n = request.n_terms
                ),
            ),
        };
        let retry = retry_hint
            .map(|hint| format!("\n## Note from the previous attempt\n{hint}\n"))
            .unwrap_or_default();

        format!(
            r#"You have just derived a Fourier series. Translate it into code.

## Your derivation
"""
{derivation}
"""

## Original problem
- Function: f(t) = {expr}
- Period: T = {period}
- Terms: n = {n}

## Output
Return **strict JSON only**, in this form:

{format_block}

Rules:
{notes}
- Function bodies may only use arithmetic, local assignments, a single return, and numpy-style math (np.sin, np.cos, np.exp, np.sqrt, np.pi, np.where, ...)
- Coefficients must be numbers, not symbols
- Use \n for line breaks inside strings
{retry}"#,
            expr = request.function_expr,
            period = request.period,
            n = request.n_terms,
        )
    }

    fn error_analysis(&self, ctx: &AnalysisContext<'_>) -> String {
        let excerpt: String = ctx.derivation.chars().take(DERIVATION_EXCERPT).collect();
        let code = ctx
            .artifacts
            .map(|a| {
                format!(
                    "## Original function code\n```python\n{}\n```\n\n## Reconstruction\n```python\n{}\n```",
                    a.original_function,
                    a.reconstruction_source()
                )
            })
            .unwrap_or_else(|| "## Code\n(not available)".to_string());

        let evidence = match ctx.verification {
            Verification::EvaluationFailed(failure) => format!(
                "## Code execution error ({})\n{}\n\nThe generated code could not be evaluated.",
                failure.error_type.as_str(),
                failure.error_message
            ),
            Verification::Completed(result) => {
                let m = &result.error_metrics;
                format!(
                    "## Numerical verification failed\n- max relative error: {:.2}%\n- mean absolute error: {:.6}\n- max error at t = {:.3} (original {:.6}, reconstruction {:.6})\n- error pattern: {}\n- threshold: {:.2}%",
                    m.max_relative_error * 100.0,
                    m.mean_absolute_error,
                    m.max_error_location,
                    m.max_error_original_value,
                    m.max_error_reconstruction_value,
                    m.error_pattern,
                    ctx.threshold * 100.0
                )
            }
        };

        format!(
            r#"You are an expert in mathematics and numerical computing. Analyse the verification result of this Fourier series computation.

## Original problem
Function: f(t) = {expr}
Period: T = {period}
Terms: n = {n}

## Your derivation
"""
{excerpt}...
"""

{code}

{evidence}

## Possible causes
1. gibbs_phenomenon: inherent overshoot at discontinuities, expected
2. insufficient_terms: n is too small, acceptable or suggest more terms
3. derivation_error: wrong integral or coefficient formula, re-derive
4. code_translation_error: the derivation is right but the code is wrong, regenerate code only
5. numerical_precision: floating-point effects, usually acceptable

Return **strict JSON only**:

{{
  "error_category": "gibbs_phenomenon | insufficient_terms | derivation_error | code_translation_error | numerical_precision",
  "severity": "acceptable | warning | critical",
  "need_recalculation": true | false,
  "recalculation_target": null | "derivation" | "code_only",
  "explanation": "analysis for the user",
  "suggestion_to_user": "advice for the user",
  "suggestion_to_ai": "what to check on the next attempt, or null",
  "auto_stop": true | false
}}

auto_stop = true accepts the current result even though it did not pass verification."#,
            expr = ctx.request.function_expr,
            period = ctx.request.period,
            n = ctx.request.n_terms,
        )
    }

    fn json_repair(&self, raw: &str) -> String {
        format!(
            "The following text should be valid JSON but contains formatting errors.\nPlease output ONLY the corrected JSON, with no additional text or explanation.\n\nOriginal text:\n{raw}\n\nOutput only the corrected JSON:"
        )
    }
}
