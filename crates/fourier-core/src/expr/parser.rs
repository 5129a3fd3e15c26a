//! Recursive-descent parser and tree-walking evaluator.
//!
//! Names are resolved while parsing, so a successfully parsed [`Expr`] can
//! only reference slots that exist in the [`Env`] it is evaluated against.

use super::error::{EvalError, EvalResult};
use super::lexer::{tokenize, Spanned, Token};
use super::namespace::{constant, floor_div, floor_mod, truthy, Builtin, MODULE_PREFIXES};

/// Upper bound on iterations of a single `sum(... for n in range(...))`,
/// and on the magnitude of its range bounds.
const MAX_GENERATOR_ITERATIONS: i64 = 100_000;

/// Generator body evaluations allowed per call, across all nested sums.
pub(crate) const MAX_EVAL_STEPS: u64 = 200_000;

/// Maximum syntactic nesting of a single expression.
const MAX_NESTING: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Num(f64),
    Scalar(usize),
    Index {
        list: usize,
        name: String,
        index: Box<Expr>,
    },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call(Builtin, Vec<Expr>),
    Sum {
        var: usize,
        start: Box<Expr>,
        stop: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Box<Expr>,
    },
}

/// Evaluation environment: scalar slots, list slots and the step counter.
#[derive(Debug, Clone, Default)]
pub(crate) struct Env {
    pub scalars: Vec<f64>,
    pub lists: Vec<Vec<f64>>,
    pub steps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Scalar(usize),
    List { slot: usize, len: usize },
}

/// Lexical scope built up while compiling a function.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    names: Vec<(String, Binding)>,
    scalar_slots: usize,
    list_slots: usize,
}

impl Scope {
    pub(crate) fn declare_scalar(&mut self, name: &str) -> usize {
        let slot = self.scalar_slots;
        self.scalar_slots += 1;
        self.names.push((name.to_string(), Binding::Scalar(slot)));
        slot
    }

    pub(crate) fn declare_list(&mut self, name: &str, len: usize) -> usize {
        let slot = self.list_slots;
        self.list_slots += 1;
        self.names
            .push((name.to_string(), Binding::List { slot, len }));
        slot
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.names
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| *b)
    }

    pub(crate) fn env(&self) -> Env {
        Env {
            scalars: vec![0.0; self.scalar_slots],
            lists: vec![Vec::new(); self.list_slots],
            steps: 0,
        }
    }
}

/// Parse a complete expression against `scope`.
pub(crate) fn parse_expr(source: &str, scope: &mut Scope) -> EvalResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        scope,
    };
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a list literal `[a, b, ...]` against `scope`.
pub(crate) fn parse_list(source: &str, scope: &mut Scope) -> EvalResult<Vec<Expr>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        scope,
    };
    parser.expect(&Token::LBracket, "'['")?;
    let mut items = Vec::new();
    while !parser.eat(&Token::RBracket) {
        items.push(parser.expr()?);
        if !parser.eat(&Token::Comma) {
            parser.expect(&Token::RBracket, "']'")?;
            break;
        }
    }
    parser.expect_end()?;
    Ok(items)
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    scope: &'a mut Scope,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn column(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.column)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> EvalResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(EvalError::syntax(self.column(), format!("expected {what}")))
        }
    }

    fn expect_end(&self) -> EvalResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(EvalError::syntax(
                self.column(),
                format!("unexpected trailing token {token:?}"),
            )),
        }
    }

    /// Count one more level of tree depth.
    fn deepen(&mut self) -> EvalResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(EvalError::syntax(
                self.column(),
                "expression nested too deeply",
            ));
        }
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        let depth = self.depth;
        self.deepen()?;
        let out = parse(self);
        self.depth = depth;
        out
    }

    fn expr(&mut self) -> EvalResult<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> EvalResult<Expr> {
        let value = self.or_expr()?;
        if self.eat_keyword("if") {
            let cond = self.or_expr()?;
            if !self.eat_keyword("else") {
                return Err(EvalError::syntax(self.column(), "expected 'else'"));
            }
            let otherwise = self.expr()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    // Left-deep chains raise the depth once per link, so the counter
    // tracks the depth of the tree being built.

    fn or_expr(&mut self) -> EvalResult<Expr> {
        let depth = self.depth;
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            self.deepen()?;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn and_expr(&mut self) -> EvalResult<Expr> {
        let depth = self.depth;
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("and") {
            self.deepen()?;
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn not_expr(&mut self) -> EvalResult<Expr> {
        if self.eat_keyword("not") {
            let inner = self.nested(Self::not_expr)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> EvalResult<Expr> {
        let depth = self.depth;
        let first = self.arith()?;
        let mut chain: Option<Expr> = None;
        let mut lhs = first.clone();

        while let Some(op) = self.cmp_op() {
            self.pos += 1;
            self.deepen()?;
            let rhs = self.arith()?;
            let link = Expr::Compare(op, Box::new(lhs), Box::new(rhs.clone()));
            chain = Some(match chain {
                None => link,
                Some(prev) => Expr::And(Box::new(prev), Box::new(link)),
            });
            lhs = rhs;
        }

        self.depth = depth;
        Ok(chain.unwrap_or(first))
    }

    fn cmp_op(&self) -> Option<CmpOp> {
        match self.peek()? {
            Token::Lt => Some(CmpOp::Lt),
            Token::Le => Some(CmpOp::Le),
            Token::Gt => Some(CmpOp::Gt),
            Token::Ge => Some(CmpOp::Ge),
            Token::EqEq => Some(CmpOp::Eq),
            Token::NotEq => Some(CmpOp::Ne),
            _ => None,
        }
    }

    fn arith(&mut self) -> EvalResult<Expr> {
        let depth = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.deepen()?;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn term(&mut self) -> EvalResult<Expr> {
        let depth = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::DoubleSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.deepen()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn unary(&mut self) -> EvalResult<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat(&Token::Plus) {
            return self.nested(Self::unary);
        }
        self.power()
    }

    fn power(&mut self) -> EvalResult<Expr> {
        let base = self.atom()?;
        if self.eat(&Token::DoubleStar) {
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> EvalResult<Expr> {
        let column = self.column();
        match self.advance() {
            Some(Token::Num(value)) => Ok(Expr::Num(value)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.name(name, column),
            Some(token) => Err(EvalError::syntax(
                column,
                format!("unexpected token {token:?}"),
            )),
            None => Err(EvalError::syntax(column, "unexpected end of expression")),
        }
    }

    fn name(&mut self, first: String, column: usize) -> EvalResult<Expr> {
        let mut qualified = false;
        let mut name = first;
        while self.eat(&Token::Dot) {
            if !MODULE_PREFIXES.contains(&name.as_str()) {
                return Err(EvalError::UnknownName(name));
            }
            match self.advance() {
                Some(Token::Ident(next)) => name = next,
                _ => return Err(EvalError::syntax(column, "expected name after '.'")),
            }
            qualified = true;
        }

        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            return self.call(name, qualified);
        }

        if self.peek() == Some(&Token::LBracket) && !qualified {
            self.pos += 1;
            let index = self.expr()?;
            self.expect(&Token::RBracket, "']'")?;
            return match self.scope.lookup(&name) {
                Some(Binding::List { slot, .. }) => Ok(Expr::Index {
                    list: slot,
                    name,
                    index: Box::new(index),
                }),
                _ => Err(EvalError::UnknownName(name)),
            };
        }

        if !qualified {
            match self.scope.lookup(&name) {
                Some(Binding::Scalar(slot)) => return Ok(Expr::Scalar(slot)),
                Some(Binding::List { .. }) => {
                    return Err(EvalError::syntax(
                        column,
                        format!("list '{name}' used as a scalar"),
                    ))
                }
                None => {}
            }
            match name.as_str() {
                "True" => return Ok(Expr::Num(1.0)),
                "False" => return Ok(Expr::Num(0.0)),
                _ => {}
            }
        }

        constant(&name)
            .map(Expr::Num)
            .ok_or(EvalError::UnknownName(name))
    }

    fn call(&mut self, name: String, qualified: bool) -> EvalResult<Expr> {
        if !qualified {
            match name.as_str() {
                "sum" => return self.generator_sum(),
                "len" => return self.len_call(),
                "float" => {
                    let inner = self.expr()?;
                    self.expect(&Token::RParen, "')'")?;
                    return Ok(inner);
                }
                "int" => {
                    let inner = self.expr()?;
                    self.expect(&Token::RParen, "')'")?;
                    return Ok(Expr::Call(Builtin::Trunc, vec![inner]));
                }
                _ => {}
            }
        }

        let builtin = Builtin::lookup(&name).ok_or_else(|| EvalError::UnknownName(name.clone()))?;
        let mut args = Vec::new();
        while !self.eat(&Token::RParen) {
            args.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "')'")?;
                break;
            }
        }

        let (min, max) = builtin.arity();
        let within = args.len() >= min && max.map_or(true, |m| args.len() <= m);
        if !within {
            let expected = match max {
                Some(m) if m == min => min.to_string(),
                Some(m) => format!("{min}..={m}"),
                None => format!("at least {min}"),
            };
            return Err(EvalError::Arity {
                name,
                expected,
                got: args.len(),
            });
        }
        Ok(Expr::Call(builtin, args))
    }

    fn len_call(&mut self) -> EvalResult<Expr> {
        let column = self.column();
        let name = match self.advance() {
            Some(Token::Ident(name)) => name,
            _ => return Err(EvalError::syntax(column, "len() expects a list name")),
        };
        self.expect(&Token::RParen, "')'")?;
        match self.scope.lookup(&name) {
            Some(Binding::List { len, .. }) => Ok(Expr::Num(len as f64)),
            _ => Err(EvalError::UnknownName(name)),
        }
    }

    /// `sum(<body> for <var> in range(<a>[, <b>[, <step>]]))`
    fn generator_sum(&mut self) -> EvalResult<Expr> {
        let body_start = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token {
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket if depth > 0 => depth -= 1,
                Token::Ident(kw) if kw == "for" && depth == 0 => break,
                Token::RParen => {
                    return Err(EvalError::syntax(
                        self.column(),
                        "sum() only supports generator expressions",
                    ))
                }
                _ => {}
            }
            self.pos += 1;
        }
        let body_end = self.pos;
        if !self.eat_keyword("for") {
            return Err(EvalError::syntax(self.column(), "expected 'for' in sum()"));
        }

        let column = self.column();
        let var_name = match self.advance() {
            Some(Token::Ident(name)) => name,
            _ => return Err(EvalError::syntax(column, "expected loop variable")),
        };
        if !self.eat_keyword("in") || !self.eat_keyword("range") {
            return Err(EvalError::syntax(self.column(), "expected 'in range('"));
        }
        self.expect(&Token::LParen, "'('")?;
        let mut bounds = Vec::new();
        while !self.eat(&Token::RParen) {
            bounds.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "')'")?;
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;

        let (start, stop, step) = match bounds.len() {
            1 => (Expr::Num(0.0), bounds.remove(0), None),
            2 => {
                let stop = bounds.remove(1);
                (bounds.remove(0), stop, None)
            }
            3 => {
                let step = bounds.remove(2);
                let stop = bounds.remove(1);
                (bounds.remove(0), stop, Some(Box::new(step)))
            }
            n => {
                return Err(EvalError::Arity {
                    name: "range".to_string(),
                    expected: "1..=3".to_string(),
                    got: n,
                })
            }
        };

        // The body sees the loop variable, so it is parsed after declaring it.
        let saved = self.scope.names.len();
        let var = self.scope.declare_scalar(&var_name);
        let body_tokens = self.tokens[body_start..body_end].to_vec();
        let mut body_parser = Parser {
            tokens: body_tokens,
            pos: 0,
            depth: self.depth,
            scope: &mut *self.scope,
        };
        let body = body_parser.expr()?;
        body_parser.expect_end()?;
        self.scope.names.truncate(saved);

        Ok(Expr::Sum {
            var,
            start: Box::new(start),
            stop: Box::new(stop),
            step,
            body: Box::new(body),
        })
    }
}

impl Expr {
    pub(crate) fn eval(&self, env: &mut Env) -> EvalResult<f64> {
        Ok(match self {
            Expr::Num(value) => *value,
            Expr::Scalar(slot) => env.scalars[*slot],
            Expr::Index { list, name, index } => {
                let raw = index.eval(env)?.trunc() as i64;
                let items = &env.lists[*list];
                let len = items.len();
                // Negative indices count from the end.
                let resolved = if raw < 0 { raw + len as i64 } else { raw };
                if resolved < 0 || resolved >= len as i64 {
                    return Err(EvalError::IndexOutOfRange {
                        name: name.clone(),
                        index: raw,
                        len,
                    });
                }
                items[resolved as usize]
            }
            Expr::Neg(inner) => -inner.eval(env)?,
            Expr::Not(inner) => bool_value(!truthy(inner.eval(env)?)),
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(env)?;
                let b = rhs.eval(env)?;
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::FloorDiv => floor_div(a, b),
                    BinOp::Mod => floor_mod(a, b),
                    BinOp::Pow => a.powf(b),
                }
            }
            Expr::Compare(op, lhs, rhs) => {
                let a = lhs.eval(env)?;
                let b = rhs.eval(env)?;
                bool_value(match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                })
            }
            Expr::And(lhs, rhs) => {
                let a = lhs.eval(env)?;
                if truthy(a) {
                    rhs.eval(env)?
                } else {
                    a
                }
            }
            Expr::Or(lhs, rhs) => {
                let a = lhs.eval(env)?;
                if truthy(a) {
                    a
                } else {
                    rhs.eval(env)?
                }
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                if truthy(cond.eval(env)?) {
                    then.eval(env)?
                } else {
                    otherwise.eval(env)?
                }
            }
            Expr::Call(builtin, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.eval(env)?);
                }
                builtin.apply(&values)
            }
            Expr::Sum {
                var,
                start,
                stop,
                step,
                body,
            } => {
                let start = range_bound(start.eval(env)?)?;
                let stop = range_bound(stop.eval(env)?)?;
                let step = match step {
                    Some(step) => range_bound(step.eval(env)?)?,
                    None => 1,
                };
                if step == 0 {
                    return Err(EvalError::syntax(1, "range() step must not be zero"));
                }
                let iterations = stop
                    .checked_sub(start)
                    .and_then(|span| span.checked_add(step - step.signum()))
                    .map(|span| span / step)
                    .ok_or(EvalError::RangeTooLarge(i64::MAX))?;
                if iterations > MAX_GENERATOR_ITERATIONS {
                    return Err(EvalError::RangeTooLarge(iterations));
                }

                let mut total = 0.0;
                let mut n = start;
                while (step > 0 && n < stop) || (step < 0 && n > stop) {
                    env.steps += 1;
                    if env.steps > MAX_EVAL_STEPS {
                        return Err(EvalError::StepBudgetExceeded(MAX_EVAL_STEPS));
                    }
                    env.scalars[*var] = n as f64;
                    total += body.eval(env)?;
                    n = match n.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
                total
            }
        })
    }
}

/// Truncate a `range()` argument, rejecting values no sane loop needs.
fn range_bound(value: f64) -> EvalResult<i64> {
    let bound = value.trunc();
    if !bound.is_finite() || bound.abs() > MAX_GENERATOR_ITERATIONS as f64 {
        return Err(EvalError::RangeBound(value));
    }
    Ok(bound as i64)
}

fn bool_value(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
