//! The fixed numeric namespace visible to generated function source.

use std::f64::consts::{E, PI, TAU};

/// Module prefixes accepted in front of namespace names (`np.sin`, `math.pi`).
pub(crate) const MODULE_PREFIXES: &[&str] = &["np", "numpy", "math"];

/// Resolve a constant name.
pub(crate) fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(PI),
        "e" => Some(E),
        "tau" => Some(TAU),
        "inf" => Some(f64::INFINITY),
        _ => None,
    }
}

/// Built-in numeric functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Expm1,
    Log,
    Log10,
    Log2,
    Log1p,
    Sqrt,
    Cbrt,
    Abs,
    Floor,
    Ceil,
    Round,
    Trunc,
    Sign,
    Mod,
    Power,
    Hypot,
    Min,
    Max,
    Where,
    Heaviside,
    Clip,
    Square,
}

impl Builtin {
    pub(crate) fn lookup(name: &str) -> Option<Self> {
        use Builtin::*;
        let builtin = match name {
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "arcsin" | "asin" => Asin,
            "arccos" | "acos" => Acos,
            "arctan" | "atan" => Atan,
            "arctan2" | "atan2" => Atan2,
            "sinh" => Sinh,
            "cosh" => Cosh,
            "tanh" => Tanh,
            "exp" => Exp,
            "expm1" => Expm1,
            "log" => Log,
            "log10" => Log10,
            "log2" => Log2,
            "log1p" => Log1p,
            "sqrt" => Sqrt,
            "cbrt" => Cbrt,
            "abs" | "fabs" | "absolute" => Abs,
            "floor" => Floor,
            "ceil" => Ceil,
            "round" => Round,
            "trunc" => Trunc,
            "sign" => Sign,
            "mod" | "fmod" | "remainder" => Mod,
            "power" | "pow" => Power,
            "hypot" => Hypot,
            "minimum" | "min" => Min,
            "maximum" | "max" => Max,
            "where" => Where,
            "heaviside" => Heaviside,
            "clip" => Clip,
            "square" => Square,
            _ => return None,
        };
        Some(builtin)
    }

    /// Inclusive `(min, max)` argument count; `None` max means variadic.
    pub(crate) fn arity(self) -> (usize, Option<usize>) {
        use Builtin::*;
        match self {
            Atan2 | Mod | Power | Hypot => (2, Some(2)),
            Min | Max => (2, None),
            Where | Clip => (3, Some(3)),
            Heaviside | Round => (1, Some(2)),
            _ => (1, Some(1)),
        }
    }

    pub(crate) fn apply(self, args: &[f64]) -> f64 {
        use Builtin::*;
        let x = args.first().copied().unwrap_or(f64::NAN);
        let y = args.get(1).copied();
        match self {
            Sin => x.sin(),
            Cos => x.cos(),
            Tan => x.tan(),
            Asin => x.asin(),
            Acos => x.acos(),
            Atan => x.atan(),
            Atan2 => x.atan2(y.unwrap_or(f64::NAN)),
            Sinh => x.sinh(),
            Cosh => x.cosh(),
            Tanh => x.tanh(),
            Exp => x.exp(),
            Expm1 => x.exp_m1(),
            Log => x.ln(),
            Log10 => x.log10(),
            Log2 => x.log2(),
            Log1p => x.ln_1p(),
            Sqrt => x.sqrt(),
            Cbrt => x.cbrt(),
            Abs => x.abs(),
            Floor => x.floor(),
            Ceil => x.ceil(),
            Round => match y {
                Some(digits) => {
                    let scale = 10f64.powi(digits as i32);
                    round_half_even(x * scale) / scale
                }
                None => round_half_even(x),
            },
            Trunc => x.trunc(),
            Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    x
                }
            }
            Mod => floor_mod(x, y.unwrap_or(f64::NAN)),
            Power => x.powf(y.unwrap_or(f64::NAN)),
            Hypot => x.hypot(y.unwrap_or(f64::NAN)),
            Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Where => {
                if truthy(x) {
                    args[1]
                } else {
                    args[2]
                }
            }
            Heaviside => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    0.0
                } else {
                    y.unwrap_or(0.5)
                }
            }
            Clip => x.max(args[1]).min(args[2]),
            Square => x * x,
        }
    }
}

/// Floor-division remainder: the result takes the sign of the divisor.
pub(crate) fn floor_mod(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return f64::NAN;
    }
    a - b * (a / b).floor()
}

pub(crate) fn floor_div(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return f64::NAN;
    }
    (a / b).floor()
}

pub(crate) fn truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_mod_takes_divisor_sign() {
        assert_eq!(floor_mod(-1.0, 3.0), 2.0);
        assert_eq!(floor_mod(7.0, 3.0), 1.0);
        assert!(floor_mod(1.0, 0.0).is_nan());
    }

    #[test]
    fn test_lookup_aliases() {
        assert_eq!(Builtin::lookup("arcsin"), Some(Builtin::Asin));
        assert_eq!(Builtin::lookup("fabs"), Some(Builtin::Abs));
        assert_eq!(Builtin::lookup("exec"), None);
    }

    #[test]
    fn test_round_is_half_even() {
        assert_eq!(Builtin::Round.apply(&[2.5]), 2.0);
        assert_eq!(Builtin::Round.apply(&[3.5]), 4.0);
    }
}
