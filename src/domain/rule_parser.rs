//! Rule expression compiler.
//!
//! Recursive descent over a small boolean DSL, producing an ordinary
//! [`Rule`]. Names resolve eagerly through the [`Registry`]: identifiers
//! followed by a comparison operator are value-functions, bare identifier
//! calls are registered rule predicates.
//!
//! ```text
//! expr       := and_expr ("or" and_expr)*
//! and_expr   := term ("and" term)*
//! term       := "(" expr ")"
//!             | "cross_above" "(" value "," value ")"
//!             | "cross_below" "(" value "," value ")"
//!             | value cmp value
//!             | rule_name [ "(" numbers ")" ]
//! value      := number | func_name [ "(" numbers ")" ]
//! cmp        := ">=" | "<=" | ">" | "<" | "==" | "!="
//! ```

use std::rc::Rc;

use crate::domain::context::EvalContext;
use crate::domain::error::{ParseError, TickreplayError};
use crate::domain::registry::{Registry, RuleView};
use crate::domain::rule::Rule;
use crate::domain::series::Series;

const EPSILON: f64 = 1e-9;

type ValueExpr = Rc<dyn Fn(&Series, usize, &EvalContext) -> Option<f64>>;

/// Compile `input` into a rule, resolving every name against `registry`.
pub fn compile(input: &str, registry: &Registry) -> Result<Rule, TickreplayError> {
    let mut parser = Parser::new(input);
    let rule = parser.parse_expr(registry)?;
    parser.skip_whitespace();
    if !parser.remaining().is_empty() {
        return Err(ParseError {
            message: format!("unexpected input '{}'", parser.peek_word()),
            position: parser.pos,
        }
        .into());
    }
    Ok(rule)
}

impl Registry {
    /// Textual registration: compile `expr` against the current entries and
    /// register the result as a zero-parameter rule predicate.
    pub fn register_rule_expr(&mut self, name: &str, expr: &str) -> Result<(), TickreplayError> {
        let rule = compile(expr, self)?;
        self.register_rule(name, 0, move |view, _| {
            rule.eval(view.series, view.index, view.ctx)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Lt => left < right,
            CmpOp::Ge => left >= right,
            CmpOp::Le => left <= right,
            CmpOp::Eq => (left - right).abs() < EPSILON,
            CmpOp::Ne => (left - right).abs() >= EPSILON,
        }
    }
}

/// A parsed value position, before name resolution.
enum Operand {
    Number(f64),
    Call {
        name: String,
        args: Vec<f64>,
        position: usize,
    },
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(ParseError {
                message: format!("expected '{}', found '{}'", expected, ch),
                position: self.pos,
            }),
            None => Err(ParseError {
                message: format!("expected '{}', found end of input", expected),
                position: self.pos,
            }),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && (remaining.len() == keyword.len()
                || !remaining[keyword.len()..]
                    .chars()
                    .next()
                    .map(|c| c.is_alphanumeric() || c == '_')
                    .unwrap_or(false))
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let mut word = String::new();
        for ch in self.remaining().chars() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
            } else {
                break;
            }
        }
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    fn parse_expr(&mut self, registry: &Registry) -> Result<Rule, TickreplayError> {
        let mut rule = self.parse_and(registry)?;
        loop {
            self.skip_whitespace();
            if self.consume_keyword("or") {
                rule = rule.or(self.parse_and(registry)?);
            } else {
                break;
            }
        }
        Ok(rule)
    }

    fn parse_and(&mut self, registry: &Registry) -> Result<Rule, TickreplayError> {
        let mut rule = self.parse_term(registry)?;
        loop {
            self.skip_whitespace();
            if self.consume_keyword("and") {
                rule = rule.and(self.parse_term(registry)?);
            } else {
                break;
            }
        }
        Ok(rule)
    }

    fn parse_term(&mut self, registry: &Registry) -> Result<Rule, TickreplayError> {
        self.skip_whitespace();

        if self.peek() == Some('(') {
            self.advance();
            let rule = self.parse_expr(registry)?;
            self.expect_char(')')?;
            return Ok(rule);
        }

        if self.peek_keyword("cross_above") {
            return self.parse_cross(registry, true);
        }
        if self.peek_keyword("cross_below") {
            return self.parse_cross(registry, false);
        }

        let start = self.pos;
        let lhs = self.parse_operand()?;
        self.skip_whitespace();

        if let Some(op) = self.try_parse_cmp_op() {
            let rhs = self.parse_operand()?;
            let name = self.input[start..self.pos].trim().to_string();
            let lhs = resolve_value(lhs, registry)?;
            let rhs = resolve_value(rhs, registry)?;
            return Ok(comparison_leaf(name, lhs, op, rhs));
        }

        // No comparison operator: a bare call is a registered rule predicate.
        match lhs {
            Operand::Call {
                name,
                args,
                position,
            } => {
                let entry = registry.rule(&name)?;
                if entry.arity != args.len() {
                    return Err(ParseError {
                        message: format!(
                            "{name} expects {} parameter(s), got {}",
                            entry.arity,
                            args.len()
                        ),
                        position,
                    }
                    .into());
                }
                let label = self.input[start..self.pos].trim().to_string();
                let call = entry.call;
                Ok(Rule::named(label, move |series, index, ctx| {
                    let view = RuleView { series, index, ctx };
                    (*call)(&view, &args)
                }))
            }
            Operand::Number(_) => Err(ParseError {
                message: "expected comparison operator after number".to_string(),
                position: self.pos,
            }
            .into()),
        }
    }

    fn parse_cross(&mut self, registry: &Registry, above: bool) -> Result<Rule, TickreplayError> {
        let start = self.pos;
        // Keyword presence was checked by the caller.
        let keyword = if above { "cross_above" } else { "cross_below" };
        self.consume_keyword(keyword);

        self.expect_char('(')?;
        let left = resolve_value(self.parse_operand()?, registry)?;
        self.expect_char(',')?;
        let right = resolve_value(self.parse_operand()?, registry)?;
        self.expect_char(')')?;

        let name = self.input[start..self.pos].trim().to_string();
        Ok(Rule::named(name, move |series, index, ctx| {
            if index == 0 {
                return false;
            }
            match (
                (*left)(series, index, ctx),
                (*right)(series, index, ctx),
                (*left)(series, index - 1, ctx),
                (*right)(series, index - 1, ctx),
            ) {
                (Some(lc), Some(rc), Some(lp), Some(rp)) => {
                    if above {
                        lc > rc && lp <= rp
                    } else {
                        lc < rc && lp >= rp
                    }
                }
                _ => false,
            }
        }))
    }

    fn try_parse_cmp_op(&mut self) -> Option<CmpOp> {
        self.skip_whitespace();
        let two = [
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
        ];
        for (text, op) in two {
            if self.remaining().starts_with(text) {
                self.pos += text.len();
                return Some(op);
            }
        }
        match self.peek() {
            Some('>') => {
                self.advance();
                Some(CmpOp::Gt)
            }
            Some('<') => {
                self.advance();
                Some(CmpOp::Lt)
            }
            _ => None,
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();
        let position = self.pos;
        match self.peek() {
            Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '.' => {
                Ok(Operand::Number(self.parse_number()?))
            }
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let name = self.parse_ident();
                let mut args = Vec::new();
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.advance();
                    self.skip_whitespace();
                    if self.peek() == Some(')') {
                        self.advance();
                    } else {
                        loop {
                            args.push(self.parse_number()?);
                            self.skip_whitespace();
                            if self.peek() == Some(',') {
                                self.advance();
                            } else {
                                self.expect_char(')')?;
                                break;
                            }
                        }
                    }
                }
                Ok(Operand::Call {
                    name,
                    args,
                    position,
                })
            }
            _ => Err(ParseError {
                message: format!("expected value, found '{}'", self.peek_word()),
                position,
            }),
        }
    }
}

fn resolve_value(operand: Operand, registry: &Registry) -> Result<ValueExpr, TickreplayError> {
    match operand {
        Operand::Number(n) => Ok(Rc::new(move |_: &Series, _, _: &EvalContext| Some(n))),
        Operand::Call {
            name,
            args,
            position,
        } => {
            let entry = registry.func(&name)?;
            if entry.arity != args.len() {
                return Err(ParseError {
                    message: format!(
                        "{name} expects {} parameter(s), got {}",
                        entry.arity,
                        args.len()
                    ),
                    position,
                }
                .into());
            }
            let call = entry.call;
            Ok(Rc::new(move |series: &Series, index, ctx: &EvalContext| {
                (*call)(series, index, &args, ctx)
            }))
        }
    }
}

fn comparison_leaf(name: String, lhs: ValueExpr, op: CmpOp, rhs: ValueExpr) -> Rule {
    Rule::named(name, move |series, index, ctx| {
        match ((*lhs)(series, index, ctx), (*rhs)(series, index, ctx)) {
            (Some(left), Some(right)) => op.apply(left, right),
            _ => false,
        }
    })
}
