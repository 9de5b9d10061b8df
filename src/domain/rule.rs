//! Composable boolean rules over (series, index, context).
//!
//! A rule is an immutable predicate tree: leaves are closures, interior
//! nodes are AND/OR with short-circuit evaluation. A leaf whose underlying
//! indicator value is absent must answer `false`, never fail: absence means
//! "the rule does not hold here".

use std::fmt;
use std::rc::Rc;

use crate::domain::context::EvalContext;
use crate::domain::series::Series;

pub type LeafFn = Rc<dyn Fn(&Series, usize, &EvalContext) -> bool>;

#[derive(Clone)]
enum Node {
    Leaf { name: Option<Rc<str>>, pred: LeafFn },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

#[derive(Clone)]
pub struct Rule {
    node: Node,
}

impl Rule {
    /// Anonymous leaf from a predicate closure.
    pub fn when(pred: impl Fn(&Series, usize, &EvalContext) -> bool + 'static) -> Rule {
        Rule {
            node: Node::Leaf {
                name: None,
                pred: Rc::new(pred),
            },
        }
    }

    /// Named leaf; the name only shows up in debug output.
    pub fn named(
        name: impl Into<Rc<str>>,
        pred: impl Fn(&Series, usize, &EvalContext) -> bool + 'static,
    ) -> Rule {
        Rule {
            node: Node::Leaf {
                name: Some(name.into()),
                pred: Rc::new(pred),
            },
        }
    }

    /// Both rules must hold. The right side is only evaluated when the left
    /// side holds.
    pub fn and(self, other: Rule) -> Rule {
        Rule {
            node: Node::And(Box::new(self.node), Box::new(other.node)),
        }
    }

    /// Either rule may hold. The right side is only evaluated when the left
    /// side does not hold.
    pub fn or(self, other: Rule) -> Rule {
        Rule {
            node: Node::Or(Box::new(self.node), Box::new(other.node)),
        }
    }

    pub fn eval(&self, series: &Series, index: usize, ctx: &EvalContext) -> bool {
        eval_node(&self.node, series, index, ctx)
    }

    /// Scan every index of the context's series in ascending order and
    /// return those where the rule holds.
    pub fn scan(&self, ctx: &EvalContext) -> Vec<usize> {
        let series = ctx.series().clone();
        (0..series.len())
            .filter(|&i| self.eval(&series, i, ctx))
            .collect()
    }
}

fn eval_node(node: &Node, series: &Series, index: usize, ctx: &EvalContext) -> bool {
    match node {
        Node::Leaf { pred, .. } => (**pred)(series, index, ctx),
        Node::And(left, right) => {
            eval_node(left, series, index, ctx) && eval_node(right, series, index, ctx)
        }
        Node::Or(left, right) => {
            eval_node(left, series, index, ctx) || eval_node(right, series, index, ctx)
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_node(&self.node, f)
    }
}

fn fmt_node(node: &Node, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match node {
        Node::Leaf { name, .. } => match name {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "<leaf>"),
        },
        Node::And(left, right) => {
            write!(f, "(")?;
            fmt_node(left, f)?;
            write!(f, " and ")?;
            fmt_node(right, f)?;
            write!(f, ")")
        }
        Node::Or(left, right) => {
            write!(f, "(")?;
            fmt_node(left, f)?;
            write!(f, " or ")?;
            fmt_node(right, f)?;
            write!(f, ")")
        }
    }
}
