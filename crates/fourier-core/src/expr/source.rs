//! Compilation of model-produced function source into a callable.
//!
//! Accepted shapes: a bare expression in `t`, `lambda t: ...`,
//! `name = lambda t: ...`, or a `def name(param):` whose body is a sequence
//! of local bindings followed by a single `return`. Imports, comments,
//! docstrings and markdown fences are skipped. Anything else is rejected.

use std::sync::OnceLock;

use regex::Regex;

use super::error::{EvalError, EvalResult};
use super::parser::{parse_expr, parse_list, Env, Expr, Scope};

/// A compiled, sandboxed single-argument numeric function.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    name: String,
    param: usize,
    prologue: Vec<Statement>,
    body: Expr,
    template: Env,
}

#[derive(Debug, Clone)]
enum Statement {
    Scalar { slot: usize, expr: Expr },
    List { slot: usize, items: Vec<Expr> },
}

impl CompiledFunction {
    /// Name of the selected function (`"<expr>"` for bare expressions).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate at `t`. Non-finite results are reported as errors.
    pub fn eval(&self, t: f64) -> EvalResult<f64> {
        let mut env = self.template.clone();
        env.scalars[self.param] = t;
        for statement in &self.prologue {
            match statement {
                Statement::Scalar { slot, expr } => {
                    let value = expr.eval(&mut env)?;
                    env.scalars[*slot] = value;
                }
                Statement::List { slot, items } => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(item.eval(&mut env)?);
                    }
                    env.lists[*slot] = values;
                }
            }
        }

        let value = self.body.eval(&mut env)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvalError::NonFinite { t, value })
        }
    }
}

/// Compile `source`, selecting the function called `expected_name` when the
/// source defines more than one.
pub fn compile_function(source: &str, expected_name: &str) -> EvalResult<CompiledFunction> {
    let lines = logical_lines(source);
    if lines.is_empty() {
        return Err(EvalError::EmptySource);
    }
    let items = parse_items(&lines)?;

    let mut bindings = Vec::new();
    let mut functions = Vec::new();
    let mut expressions = Vec::new();
    for item in items {
        match item {
            Item::Binding(binding) => bindings.push(binding),
            Item::Function(function) => functions.push(function),
            Item::Expr(text) => expressions.push(text),
        }
    }

    let selected = if functions.is_empty() {
        let text = expressions.pop().ok_or(EvalError::EmptySource)?;
        if let Some(extra) = expressions.first() {
            return Err(EvalError::UnsupportedStatement(extra.clone()));
        }
        FunctionItem {
            name: "<expr>".to_string(),
            param: "t".to_string(),
            locals: Vec::new(),
            result: text,
        }
    } else if let Some(pos) = functions.iter().position(|f| f.name == expected_name) {
        functions.swap_remove(pos)
    } else if functions.len() == 1 {
        let only = functions.remove(0);
        tracing::debug!(
            expected = expected_name,
            found = %only.name,
            "using the only function defined in source"
        );
        only
    } else {
        return Err(EvalError::FunctionNotFound {
            expected: expected_name.to_string(),
            available: functions.into_iter().map(|f| f.name).collect(),
        });
    };

    let mut scope = Scope::default();
    let mut prologue = Vec::new();
    for binding in &bindings {
        compile_binding(binding, &mut scope, &mut prologue)?;
    }
    let param = scope.declare_scalar(&selected.param);
    for binding in &selected.locals {
        compile_binding(binding, &mut scope, &mut prologue)?;
    }
    let body = parse_expr(&selected.result, &mut scope)?;

    Ok(CompiledFunction {
        name: selected.name,
        param,
        prologue,
        body,
        template: scope.env(),
    })
}

#[derive(Debug, Clone)]
struct BindingItem {
    name: String,
    op: Option<char>,
    rhs: String,
}

#[derive(Debug, Clone)]
struct FunctionItem {
    name: String,
    param: String,
    locals: Vec<BindingItem>,
    result: String,
}

#[derive(Debug, Clone)]
enum Item {
    Binding(BindingItem),
    Function(FunctionItem),
    Expr(String),
}

#[derive(Debug, Clone)]
struct Line {
    indent: usize,
    text: String,
}

fn def_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^def\s+([A-Za-z_]\w*)\s*\(\s*([A-Za-z_]\w*)\s*(?::\s*[\w\.\[\], ]+)?\)\s*(?:->\s*[^:]+)?:\s*(.*)$",
        )
        .expect("valid def regex")
    })
}

fn lambda_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:([A-Za-z_]\w*)\s*=\s*)?lambda\s+([A-Za-z_]\w*)\s*:\s*(.+)$")
            .expect("valid lambda regex")
    })
}

fn assignment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_]\w*)\s*([+\-*/]?)=\s*(.*)$").expect("valid assignment regex")
    })
}

fn array_wrapper() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:np|numpy)\.array\(\s*(\[.*\])\s*\)$").expect("valid array regex")
    })
}

/// Split source into logical lines: fences, imports, comments and
/// docstrings removed, bracket and backslash continuations joined.
fn logical_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut in_docstring = false;
    let mut pending: Option<Line> = None;
    let mut depth: i32 = 0;

    for raw in source.lines() {
        let trimmed = raw.trim();
        if trimmed.starts_with("```") {
            continue;
        }

        let quotes = trimmed.matches("\"\"\"").count() + trimmed.matches("'''").count();
        if in_docstring {
            if quotes % 2 == 1 {
                in_docstring = false;
            }
            continue;
        }
        if trimmed.starts_with("\"\"\"") || trimmed.starts_with("'''") {
            in_docstring = quotes % 2 == 1;
            continue;
        }

        let code = match trimmed.find('#') {
            Some(idx) => trimmed[..idx].trim_end(),
            None => trimmed,
        };
        if code.is_empty() && pending.is_none() {
            continue;
        }
        if pending.is_none() && (code.starts_with("import ") || code.starts_with("from ")) {
            continue;
        }

        let continued = code.ends_with('\\');
        let code = code.trim_end_matches('\\').trim_end();
        for c in code.chars() {
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                _ => {}
            }
        }

        let line = match pending.take() {
            Some(mut open) => {
                open.text.push(' ');
                open.text.push_str(code);
                open
            }
            None => Line {
                indent: raw.len() - raw.trim_start().len(),
                text: code.to_string(),
            },
        };

        if depth > 0 || continued {
            pending = Some(line);
        } else {
            depth = 0;
            lines.push(line);
        }
    }

    if let Some(open) = pending {
        lines.push(open);
    }
    lines
}

fn parse_items(lines: &[Line]) -> EvalResult<Vec<Item>> {
    let base = lines.iter().map(|l| l.indent).min().unwrap_or(0);
    let mut items = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        if line.indent > base {
            return Err(EvalError::UnsupportedStatement(line.text.clone()));
        }
        let text = line.text.as_str();

        if text.starts_with("def ") {
            let caps = def_header()
                .captures(text)
                .ok_or_else(|| EvalError::UnsupportedStatement(text.to_string()))?;
            let name = caps[1].to_string();
            let param = caps[2].to_string();
            let mut body: Vec<String> = Vec::new();
            let inline = caps[3].trim();
            if !inline.is_empty() {
                body.push(inline.to_string());
            }
            i += 1;
            while i < lines.len() && lines[i].indent > base {
                body.push(lines[i].text.clone());
                i += 1;
            }
            items.push(Item::Function(parse_def_body(name, param, &body)?));
            continue;
        }

        if let Some(caps) = lambda_form().captures(text) {
            items.push(Item::Function(FunctionItem {
                name: caps
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "<lambda>".to_string()),
                param: caps[2].to_string(),
                locals: Vec::new(),
                result: caps[3].to_string(),
            }));
        } else if let Some(binding) = parse_assignment(text) {
            items.push(Item::Binding(binding));
        } else {
            items.push(Item::Expr(text.to_string()));
        }
        i += 1;
    }

    Ok(items)
}

fn parse_def_body(name: String, param: String, body: &[String]) -> EvalResult<FunctionItem> {
    let mut locals = Vec::new();
    for (idx, statement) in body.iter().enumerate() {
        let is_return = statement == "return"
            || statement.starts_with("return ")
            || statement.starts_with("return(");
        if is_return {
            let rest = &statement["return".len()..];
            if let Some(trailing) = body.get(idx + 1) {
                return Err(EvalError::UnsupportedStatement(trailing.clone()));
            }
            return Ok(FunctionItem {
                name,
                param,
                locals,
                result: rest.trim().to_string(),
            });
        }
        match parse_assignment(statement) {
            Some(binding) => locals.push(binding),
            None => return Err(EvalError::UnsupportedStatement(statement.clone())),
        }
    }
    Err(EvalError::UnsupportedStatement(format!(
        "function '{name}' has no return statement"
    )))
}

fn parse_assignment(text: &str) -> Option<BindingItem> {
    let caps = assignment().captures(text)?;
    let rhs = caps[3].to_string();
    if rhs.starts_with('=') {
        return None;
    }
    Some(BindingItem {
        name: caps[1].to_string(),
        op: caps[2].chars().next(),
        rhs,
    })
}

fn compile_binding(
    binding: &BindingItem,
    scope: &mut Scope,
    prologue: &mut Vec<Statement>,
) -> EvalResult<()> {
    let rhs = binding.rhs.trim();
    let list_text = array_wrapper()
        .captures(rhs)
        .map(|caps| caps[1].to_string())
        .or_else(|| rhs.starts_with('[').then(|| rhs.to_string()));

    if let Some(list_text) = list_text {
        if binding.op.is_some() {
            return Err(EvalError::UnsupportedStatement(format!(
                "{} {}= {}",
                binding.name,
                binding.op.unwrap_or('='),
                rhs
            )));
        }
        let items = parse_list(&list_text, scope)?;
        let slot = scope.declare_list(&binding.name, items.len());
        prologue.push(Statement::List { slot, items });
        return Ok(());
    }

    let text = match binding.op {
        Some(op) => format!("{} {} ({})", binding.name, op, rhs),
        None => rhs.to_string(),
    };
    let expr = parse_expr(&text, scope)?;
    let slot = scope.declare_scalar(&binding.name);
    prologue.push(Statement::Scalar { slot, expr });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_bare_expression() {
        let f = compile_function("np.sin(t) + 1", "f").expect("compile");
        assert!(approx(f.eval(0.0).unwrap(), 1.0));
        assert_eq!(f.name(), "<expr>");
    }

    #[test]
    fn test_python_def_with_imports_and_docstring() {
        let source = "```python\nimport numpy as np\n\ndef f(t):\n    \"\"\"Square wave.\"\"\"\n    x = t % (2 * np.pi)  # wrap\n    return 1.0 if x < np.pi else -1.0\n```";
        let f = compile_function(source, "f").expect("compile");
        assert_eq!(f.eval(1.0).unwrap(), 1.0);
        assert_eq!(f.eval(4.0).unwrap(), -1.0);
    }

    #[test]
    fn test_selects_expected_name_among_several() {
        let source = "def f(t):\n    return t\n\ndef reconstruct(t):\n    return 2 * t";
        let g = compile_function(source, "reconstruct").expect("compile");
        assert_eq!(g.eval(3.0).unwrap(), 6.0);
        let err = compile_function(source, "missing").unwrap_err();
        assert!(matches!(err, EvalError::FunctionNotFound { .. }));
    }

    #[test]
    fn test_lists_and_generator_reconstruction() {
        let source = "import numpy as np\na0 = 0.0\nan = np.array([0.0, 0.0])\nbn = [1.0,\n      0.0]\n\ndef reconstruct(t):\n    w = 2 * np.pi / (2 * np.pi)\n    return a0 / 2 + sum(an[n - 1] * np.cos(n * w * t) + bn[n - 1] * np.sin(n * w * t) for n in range(1, len(an) + 1))";
        let g = compile_function(source, "reconstruct").expect("compile");
        assert!(approx(g.eval(1.0).unwrap(), 1.0f64.sin()));
    }

    #[test]
    fn test_lambda_forms() {
        let f = compile_function("f = lambda x: x ** 2", "f").expect("compile");
        assert_eq!(f.eval(3.0).unwrap(), 9.0);
        let g = compile_function("lambda t: -t", "reconstruct").expect("compile");
        assert_eq!(g.eval(3.0).unwrap(), -3.0);
    }

    #[test]
    fn test_augmented_assignment() {
        let f = compile_function("def f(t):\n    y = t\n    y += 1\n    return y", "f")
            .expect("compile");
        assert_eq!(f.eval(1.0).unwrap(), 2.0);
    }

    #[test]
    fn test_rejects_loops_and_calls_to_unknown_names() {
        let looped = "def f(t):\n    for i in range(3):\n        t += i\n    return t";
        assert!(matches!(
            compile_function(looped, "f"),
            Err(EvalError::UnsupportedStatement(_))
        ));
        assert!(matches!(
            compile_function("__import__('os').system('ls')", "f"),
            Err(_)
        ));
    }

    #[test]
    fn test_module_binding_cannot_see_parameter() {
        let source = "k = t * 2\ndef f(t):\n    return k";
        assert_eq!(
            compile_function(source, "f").unwrap_err(),
            EvalError::UnknownName("t".to_string())
        );
    }

    #[test]
    fn test_non_finite_is_an_error() {
        let f = compile_function("1 / t", "f").expect("compile");
        assert!(matches!(f.eval(0.0), Err(EvalError::NonFinite { .. })));
    }
}
