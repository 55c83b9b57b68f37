//! Filter query parsing and compilation for logbridge
//!
//! A filter query such as `pod:web AND NOT container:sidecar` is parsed into an
//! [`Expression`] and compiled either into a log store query ([`build_lql`]) or,
//! after flattening into a [`Filter`](logbridge_types::Filter), into a POSIX ERE
//! for the tailing path ([`build_matcher`]).

mod ast;
mod error;
mod filter;
mod lexer;
mod lql;
mod matcher;
mod parser;

pub use ast::{Condition, Expression, Key, Operand, OrCondition, XCondition};
pub use error::QueryError;
pub use filter::parse_filter;
pub use lql::{build_lql, build_query_request};
pub use matcher::build_matcher;
pub use parser::parse;
