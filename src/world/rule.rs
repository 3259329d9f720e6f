//! Declarative world rules and their expression grammar
//!
//! Rules are authored as short strings in scenario files and parsed once at
//! load time. The grammar is deliberately small:
//!
//! ```text
//! rule  := "forbid" IDENT               # ban an action kind outright
//!        | scope "." IDENT cmp NUMBER   # bound an attribute post-action
//! scope := "actor" | "target"
//! cmp   := ">=" | "<=" | ">" | "<" | "==" | "!="
//! ```
//!
//! An attribute bound constrains the value the attribute would hold *after*
//! the action's delta is applied, so `actor.energy >= 0` reads "no action
//! may leave its actor with negative energy".

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{multispace0, multispace1};
use nom::number::complete::double;
use nom::IResult;
use nom::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Actor,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl Cmp {
    pub fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Cmp::Ge => lhs >= rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Eq => (lhs - rhs).abs() < 1e-9,
            Cmp::Ne => (lhs - rhs).abs() >= 1e-9,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Cmp::Ge => ">=",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Lt => "<",
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
        }
    }
}

/// Parsed form of a rule expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleExpr {
    /// No action of this kind may pass adjudication
    ForbidKind(String),
    /// The named attribute must satisfy the bound after the action applies
    AttrBound {
        scope: Scope,
        attr: String,
        cmp: Cmp,
        value: f64,
    },
}

impl RuleExpr {
    pub fn describe(&self) -> String {
        match self {
            RuleExpr::ForbidKind(kind) => format!("forbid {}", kind),
            RuleExpr::AttrBound { scope, attr, cmp, value } => {
                let scope = match scope {
                    Scope::Actor => "actor",
                    Scope::Target => "target",
                };
                format!("{}.{} {} {}", scope, attr, cmp.symbol(), value)
            }
        }
    }
}

/// A named declarative rule attached to the world state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub expr: String,
    pub parsed: RuleExpr,
}

impl Rule {
    /// Parse `expr` into a rule, failing with a human-readable message on
    /// grammar errors
    pub fn parse(name: impl Into<String>, expr: &str) -> Result<Self, String> {
        let parsed = parse_rule_expr(expr)?;
        Ok(Self {
            name: name.into(),
            expr: expr.to_string(),
            parsed,
        })
    }
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

fn cmp(input: &str) -> IResult<&str, Cmp> {
    alt((
        tag(">=").map(|_| Cmp::Ge),
        tag("<=").map(|_| Cmp::Le),
        tag("==").map(|_| Cmp::Eq),
        tag("!=").map(|_| Cmp::Ne),
        tag(">").map(|_| Cmp::Gt),
        tag("<").map(|_| Cmp::Lt),
    ))
    .parse(input)
}

fn scope(input: &str) -> IResult<&str, Scope> {
    alt((
        tag("actor").map(|_| Scope::Actor),
        tag("target").map(|_| Scope::Target),
    ))
    .parse(input)
}

fn forbid_expr(input: &str) -> IResult<&str, RuleExpr> {
    let (input, _) = tag("forbid").parse(input)?;
    let (input, _) = multispace1.parse(input)?;
    let (input, kind) = ident(input)?;
    Ok((input, RuleExpr::ForbidKind(kind.to_string())))
}

fn bound_expr(input: &str) -> IResult<&str, RuleExpr> {
    let (input, scope) = scope(input)?;
    let (input, _) = tag(".").parse(input)?;
    let (input, attr) = ident(input)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, cmp) = cmp(input)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, value) = double.parse(input)?;
    Ok((
        input,
        RuleExpr::AttrBound {
            scope,
            attr: attr.to_string(),
            cmp,
            value,
        },
    ))
}

fn parse_rule_expr(expr: &str) -> Result<RuleExpr, String> {
    let trimmed = expr.trim();
    match alt((forbid_expr, bound_expr)).parse(trimmed) {
        Ok(("", parsed)) => Ok(parsed),
        Ok((rest, _)) => Err(format!("trailing input in rule expression: {:?}", rest)),
        Err(e) => Err(format!("invalid rule expression {:?}: {}", trimmed, e)),
    }
}
