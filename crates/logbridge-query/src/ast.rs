//! Syntax tree of a filter query
//!
//! The tree mirrors the grammar precedence: an [`Expression`] is a list of
//! OR-branches, each branch is a list of AND-ed terms, and each term is either
//! a single `key:value` condition or a parenthesized sub-expression.

/// Condition key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Pod,
    Container,
    File,
}

impl Key {
    /// Resolve a key name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "POD" => Some(Self::Pod),
            "CONTAINER" => Some(Self::Container),
            "FILE" => Some(Self::File),
            _ => None,
        }
    }

    /// Name of the store field this key is matched against
    pub fn field(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Container => "cname",
            Self::File => "cid",
        }
    }
}

/// A `key:value` leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub key: Key,
    pub value: String,
}

/// Payload of a term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Leaf(Condition),
    Group(Expression),
}

/// A possibly negated term of an AND chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XCondition {
    pub negated: bool,
    pub operand: Operand,
}

/// Terms combined with AND
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrCondition {
    pub terms: Vec<XCondition>,
}

/// Branches combined with OR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub branches: Vec<OrCondition>,
}

impl Expression {
    /// Collect every leaf condition in source order
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        for term in self.branches.iter().flat_map(|b| &b.terms) {
            match &term.operand {
                Operand::Leaf(condition) => out.push(condition),
                Operand::Group(expr) => expr.collect_conditions(out),
            }
        }
    }

    /// Check if any term anywhere in the tree is negated
    pub fn has_negation(&self) -> bool {
        self.branches.iter().flat_map(|b| &b.terms).any(|term| {
            term.negated
                || match &term.operand {
                    Operand::Leaf(_) => false,
                    Operand::Group(expr) => expr.has_negation(),
                }
        })
    }
}
