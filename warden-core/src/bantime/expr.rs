//! ## warden-core::bantime::expr
//! **Ban-time formula language**
//!
//! A deliberately small grammar: numbers, the variables `ban.Time`,
//! `ban.Count` and `banFactor`, arithmetic (`+ - * / // % **`), shifts,
//! comparisons, `min`/`max`/`abs` and the conditional form
//! `a if cond else b`. Precedence, lowest first:
//!
//! ```text
//! conditional  := comparison ("if" comparison "else" conditional)?
//! comparison   := shift (("<=" | ">=" | "==" | "!=" | "<" | ">") shift)?
//! shift        := additive (("<<" | ">>") additive)*
//! additive     := term (("+" | "-") term)*
//! term         := unary (("*" | "//" | "/" | "%") unary)*
//! unary        := ("-" | "+") unary | power
//! power        := atom ("**" unary)?
//! atom         := number | call | variable | "(" conditional ")"
//! ```
//!
//! Nesting is bounded by [`MAX_DEPTH`] and input length by
//! [`MAX_FORMULA_LEN`], so evaluation depth is bounded too.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    error::{Error as NomError, ErrorKind},
    multi::{fold_many0, separated_list1},
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use thiserror::Error;

type Res<'a, T> = IResult<&'a str, T>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("syntax error at offset {offset} near {near:?}")]
    Syntax { offset: usize, near: String },
    #[error("expression must be constant, found variable {0}")]
    NotConstant(Variable),
    #[error("expression nests deeper than {max} levels")]
    TooDeep { max: usize },
    #[error("expression is {len} bytes long, at most {max} allowed")]
    TooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    BanTime,
    BanCount,
    BanFactor,
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Variable::BanTime => "ban.Time",
            Variable::BanCount => "ban.Count",
            Variable::BanFactor => "banFactor",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Abs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(Variable),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
    Cond {
        then: Box<Expr>,
        cond: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Values the formula variables resolve to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bindings {
    pub ban_time: f64,
    pub ban_count: f64,
    pub ban_factor: f64,
}

impl Expr {
    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn eval(&self, vars: &Bindings) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Var(Variable::BanTime) => vars.ban_time,
            Expr::Var(Variable::BanCount) => vars.ban_count,
            Expr::Var(Variable::BanFactor) => vars.ban_factor,
            Expr::Neg(inner) => -inner.eval(vars),
            Expr::Binary(op, lhs, rhs) => apply(*op, lhs.eval(vars), rhs.eval(vars)),
            Expr::Call(function, args) => {
                let mut values = args.iter().map(|arg| arg.eval(vars));
                match function {
                    Function::Min => values.fold(f64::INFINITY, f64::min),
                    Function::Max => values.fold(f64::NEG_INFINITY, f64::max),
                    Function::Abs => values.next().map_or(f64::NAN, f64::abs),
                }
            }
            Expr::Cond {
                then,
                cond,
                otherwise,
            } => {
                if cond.eval(vars) != 0.0 {
                    then.eval(vars)
                } else {
                    otherwise.eval(vars)
                }
            }
        }
    }

    /// First variable referenced by the expression, if any.
    pub fn first_variable(&self) -> Option<Variable> {
        match self {
            Expr::Number(_) => None,
            Expr::Var(var) => Some(*var),
            Expr::Neg(inner) => inner.first_variable(),
            Expr::Binary(_, lhs, rhs) => lhs.first_variable().or_else(|| rhs.first_variable()),
            Expr::Call(_, args) => args.iter().find_map(Expr::first_variable),
            Expr::Cond {
                then,
                cond,
                otherwise,
            } => then
                .first_variable()
                .or_else(|| cond.first_variable())
                .or_else(|| otherwise.first_variable()),
        }
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn apply(op: BinOp, lhs: f64, rhs: f64) -> f64 {
    match op {
        BinOp::Add => lhs + rhs,
        BinOp::Sub => lhs - rhs,
        BinOp::Mul => lhs * rhs,
        BinOp::Div => lhs / rhs,
        BinOp::FloorDiv => (lhs / rhs).floor(),
        // Sign follows the divisor.
        BinOp::Mod => lhs - rhs * (lhs / rhs).floor(),
        BinOp::Pow => lhs.powf(rhs),
        BinOp::Shl => lhs.trunc() * 2f64.powi(clamp_shift(rhs)),
        BinOp::Shr => (lhs.trunc() / 2f64.powi(clamp_shift(rhs))).floor(),
        BinOp::Lt => truth(lhs < rhs),
        BinOp::Le => truth(lhs <= rhs),
        BinOp::Gt => truth(lhs > rhs),
        BinOp::Ge => truth(lhs >= rhs),
        BinOp::Eq => truth(lhs == rhs),
        BinOp::Ne => truth(lhs != rhs),
    }
}

fn clamp_shift(amount: f64) -> i32 {
    amount.trunc().clamp(0.0, 1024.0) as i32
}

/// Formulas longer than this are rejected before parsing.
pub const MAX_FORMULA_LEN: usize = 1024;

/// Deepest nesting of parentheses, calls, signs, exponents and
/// conditionals the parser descends into.
pub const MAX_DEPTH: usize = 64;

/// Parse a complete formula.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    if input.len() > MAX_FORMULA_LEN {
        return Err(ExprError::TooLong {
            len: input.len(),
            max: MAX_FORMULA_LEN,
        });
    }
    match all_consuming(ws(formula)).parse(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err))
            if err.code == ErrorKind::TooLarge =>
        {
            Err(ExprError::TooDeep { max: MAX_DEPTH })
        }
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => Err(syntax_error(input, err)),
        Err(nom::Err::Incomplete(_)) => Err(ExprError::Syntax {
            offset: input.len(),
            near: String::new(),
        }),
    }
}

/// Parse an expression that may not reference any variable.
pub fn parse_constant(input: &str) -> Result<f64, ExprError> {
    let expr = parse(input)?;
    if let Some(var) = expr.first_variable() {
        return Err(ExprError::NotConstant(var));
    }
    Ok(expr.eval(&Bindings {
        ban_time: 0.0,
        ban_count: 0.0,
        ban_factor: 1.0,
    }))
}

fn syntax_error(input: &str, err: NomError<&str>) -> ExprError {
    let offset = input.len() - err.input.len();
    ExprError::Syntax {
        offset,
        near: err.input.chars().take(16).collect(),
    }
}

fn formula(input: &str) -> Res<'_, Expr> {
    conditional(input, 0)
}

/// One level deeper, or a hard failure once [`MAX_DEPTH`] is reached.
fn nested(input: &str, depth: usize) -> Result<usize, nom::Err<NomError<&str>>> {
    if depth >= MAX_DEPTH {
        return Err(nom::Err::Failure(NomError::new(input, ErrorKind::TooLarge)));
    }
    Ok(depth + 1)
}

fn ws<'a, O, P>(inner: P) -> impl Parser<&'a str, Output = O, Error = NomError<&'a str>>
where
    P: Parser<&'a str, Output = O, Error = NomError<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn number(input: &str) -> Res<'_, Expr> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |digits: &str| digits.parse::<f64>().map(Expr::Number),
    )
    .parse(input)
}

fn variable(input: &str) -> Res<'_, Expr> {
    map(
        alt((
            value(Variable::BanTime, tag("ban.Time")),
            value(Variable::BanCount, tag("ban.Count")),
            value(Variable::BanFactor, tag("banFactor")),
        )),
        Expr::Var,
    )
    .parse(input)
}

fn call<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let name = alt((
        value(Function::Min, tag("min")),
        value(Function::Max, tag("max")),
        value(Function::Abs, tag("abs")),
    ));
    let args = delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), |i: &'a str| conditional(i, depth)),
        ws(char(')')),
    );
    map_res(pair(name, args), |(function, args): (Function, Vec<Expr>)| {
        if function == Function::Abs && args.len() != 1 {
            return Err("abs takes exactly one argument");
        }
        Ok(Expr::Call(function, args))
    })
    .parse(input)
}

fn atom<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    ws(alt((
        number,
        |i: &'a str| call(i, depth),
        variable,
        delimited(char('('), ws(|i: &'a str| conditional(i, depth)), char(')')),
    )))
    .parse(input)
}

fn power<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let (input, base) = atom(input, depth)?;
    let exponent = |i: &'a str| -> Res<'a, Expr> {
        let depth = nested(i, depth)?;
        unary(i, depth)
    };
    let (input, exponent) = opt(preceded(tag("**"), exponent)).parse(input)?;
    let expr = match exponent {
        Some(exponent) => Expr::binary(BinOp::Pow, base, exponent),
        None => base,
    };
    Ok((input, expr))
}

fn unary<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let (rest, sign) = opt(ws(alt((char('-'), char('+'))))).parse(input)?;
    let Some(sign) = sign else {
        return power(input, depth);
    };
    let depth = nested(input, depth)?;
    let (rest, expr) = unary(rest, depth)?;
    let expr = if sign == '-' {
        Expr::Neg(Box::new(expr))
    } else {
        expr
    };
    Ok((rest, expr))
}

fn term<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let (input, first) = unary(input, depth)?;
    let op = ws(alt((
        value(BinOp::FloorDiv, tag("//")),
        value(BinOp::Mul, tag("*")),
        value(BinOp::Div, tag("/")),
        value(BinOp::Mod, tag("%")),
    )));
    fold_many0(
        pair(op, |i: &'a str| unary(i, depth)),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::binary(op, lhs, rhs),
    )
    .parse(input)
}

fn additive<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let (input, first) = term(input, depth)?;
    let op = ws(alt((value(BinOp::Add, tag("+")), value(BinOp::Sub, tag("-")))));
    fold_many0(
        pair(op, |i: &'a str| term(i, depth)),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::binary(op, lhs, rhs),
    )
    .parse(input)
}

fn shift<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let (input, first) = additive(input, depth)?;
    let op = ws(alt((value(BinOp::Shl, tag("<<")), value(BinOp::Shr, tag(">>")))));
    fold_many0(
        pair(op, |i: &'a str| additive(i, depth)),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::binary(op, lhs, rhs),
    )
    .parse(input)
}

fn comparison<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let (input, lhs) = shift(input, depth)?;
    let op = ws(alt((
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Lt, tag("<")),
        value(BinOp::Gt, tag(">")),
    )));
    let (input, rhs) = opt(pair(op, |i: &'a str| shift(i, depth))).parse(input)?;
    let expr = match rhs {
        Some((op, rhs)) => Expr::binary(op, lhs, rhs),
        None => lhs,
    };
    Ok((input, expr))
}

fn conditional<'a>(input: &'a str, depth: usize) -> Res<'a, Expr> {
    let depth = nested(input, depth)?;
    let (input, then) = comparison(input, depth)?;
    let (input, branch) = opt(pair(
        preceded(ws(tag("if")), |i: &'a str| comparison(i, depth)),
        preceded(ws(tag("else")), |i: &'a str| conditional(i, depth)),
    ))
    .parse(input)?;
    let expr = match branch {
        Some((cond, otherwise)) => Expr::Cond {
            then: Box::new(then),
            cond: Box::new(cond),
            otherwise: Box::new(otherwise),
        },
        None => then,
    };
    Ok((input, expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, time: f64, count: f64) -> f64 {
        parse(src).unwrap().eval(&Bindings {
            ban_time: time,
            ban_count: count,
            ban_factor: 1.0,
        })
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3", 0.0, 0.0), 7.0);
        assert_eq!(eval("(1 + 2) * 3", 0.0, 0.0), 9.0);
        assert_eq!(eval("-2 ** 2", 0.0, 0.0), -4.0);
        assert_eq!(eval("2 ** -1", 0.0, 0.0), 0.5);
        assert_eq!(eval("7 // 2", 0.0, 0.0), 3.0);
        assert_eq!(eval("-7 % 3", 0.0, 0.0), 2.0);
        assert_eq!(eval("10 - 2 - 3", 0.0, 0.0), 5.0);
    }

    #[test]
    fn shifts_bind_looser_than_addition() {
        assert_eq!(eval("1 << 2 + 1", 0.0, 0.0), 8.0);
        assert_eq!(eval("32 >> 2", 0.0, 0.0), 8.0);
    }

    #[test]
    fn default_formula_escalates() {
        let src = "ban.Time * (1<<min(ban.Count,20)) * banFactor";
        assert_eq!(eval(src, 600.0, 0.0), 600.0);
        assert_eq!(eval(src, 600.0, 3.0), 4800.0);
        assert_eq!(eval(src, 1.0, 40.0), (1u64 << 20) as f64);
    }

    #[test]
    fn conditional_form_parses() {
        let src = "ban.Time * (1<<(ban.Count if ban.Count<20 else 20)) * banFactor";
        assert_eq!(eval(src, 10.0, 2.0), 40.0);
        assert_eq!(eval(src, 1.0, 25.0), (1u64 << 20) as f64);
    }

    #[test]
    fn comparisons_yield_truth_values() {
        assert_eq!(eval("ban.Count >= 3", 0.0, 3.0), 1.0);
        assert_eq!(eval("ban.Count != 3", 0.0, 3.0), 0.0);
        assert_eq!(eval("max(ban.Time, 100, 5)", 50.0, 0.0), 100.0);
        assert_eq!(eval("abs(-4)", 0.0, 0.0), 4.0);
    }

    #[test]
    fn rejects_unknown_names_and_trailing_input() {
        assert!(matches!(parse("ban.Time * foo"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("__import__('os')"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("1 +"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("abs(1, 2)"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse(""), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn nesting_is_bounded() {
        let nest = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(eval(&nest(40), 0.0, 0.0), 1.0);
        assert_eq!(parse(&nest(100)), Err(ExprError::TooDeep { max: MAX_DEPTH }));
        assert_eq!(
            parse(&format!("{}1", "-".repeat(200))),
            Err(ExprError::TooDeep { max: MAX_DEPTH })
        );
        assert_eq!(
            parse(&format!("2{}", " ** 2".repeat(100))),
            Err(ExprError::TooDeep { max: MAX_DEPTH })
        );
        assert_eq!(
            parse(&format!("1{}", " if 1 else 1".repeat(80))),
            Err(ExprError::TooDeep { max: MAX_DEPTH })
        );
        assert!(matches!(
            parse(&nest(10_000)),
            Err(ExprError::TooLong { len: 20_001, .. })
        ));
        assert!(matches!(
            parse(&"1+".repeat(MAX_FORMULA_LEN)),
            Err(ExprError::TooLong { .. })
        ));
    }

    #[test]
    fn constants_reject_variables() {
        assert_eq!(parse_constant("2 * 1.5"), Ok(3.0));
        assert_eq!(
            parse_constant("ban.Count"),
            Err(ExprError::NotConstant(Variable::BanCount))
        );
    }
}
