use std::fmt;

use thiserror::Error;

use crate::error::Error;

/// Boolean connective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
            LogicalOp::Not => "NOT",
        })
    }
}

/// Comparison between two operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        })
    }
}

/// What a query node is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Logical(LogicalOp),
    /// `negated` inverts the comparison result (`Eq` becomes not-equal)
    Operator { op: CompareOp, negated: bool },
    /// Literal text. Unquoted values may name a field and are resolved
    /// against the scanned record.
    Value { quoted: bool },
    /// Reference to a record field by ordinal
    Field(usize),
}

/// Payload of one query tree node
#[derive(Debug, Clone, PartialEq)]
pub struct QueryNode {
    kind: NodeKind,
    value: String,
    alt_value: String,
}

impl QueryNode {
    pub fn logical(op: LogicalOp) -> Self {
        QueryNode {
            kind: NodeKind::Logical(op),
            value: String::new(),
            alt_value: String::new(),
        }
    }

    pub fn operator(op: CompareOp, negated: bool) -> Self {
        QueryNode {
            kind: NodeKind::Operator { op, negated },
            value: String::new(),
            alt_value: String::new(),
        }
    }

    /// Unquoted literal, resolvable to a field of the same name
    pub fn value<S: Into<String>>(text: S) -> Self {
        QueryNode {
            kind: NodeKind::Value { quoted: false },
            value: text.into(),
            alt_value: String::new(),
        }
    }

    /// Quoted literal, never taken for a field name
    pub fn quoted<S: Into<String>>(text: S) -> Self {
        QueryNode {
            kind: NodeKind::Value { quoted: true },
            ..QueryNode::value(text)
        }
    }

    pub fn field(idx: usize) -> Self {
        QueryNode {
            kind: NodeKind::Field(idx),
            value: String::new(),
            alt_value: String::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn value_text(&self) -> &str {
        &self.value
    }

    pub fn set_value<S: Into<String>>(&mut self, text: S) {
        self.value = text.into();
    }

    /// Secondary text. The scanner stores the field name here when it
    /// resolves a value node to a field; evaluation never reads it.
    pub fn alt_value(&self) -> &str {
        &self.alt_value
    }

    pub fn set_alt_value<S: Into<String>>(&mut self, text: S) {
        self.alt_value = text.into();
    }

    /// Turn this node into a reference to field `idx` of the bound record.
    pub fn set_field(&mut self, idx: usize) {
        self.kind = NodeKind::Field(idx);
    }

    pub fn logical_op(&self) -> Option<LogicalOp> {
        match self.kind {
            NodeKind::Logical(op) => Some(op),
            _ => None,
        }
    }

    pub fn compare_op(&self) -> Option<(CompareOp, bool)> {
        match self.kind {
            NodeKind::Operator { op, negated } => Some((op, negated)),
            _ => None,
        }
    }

    pub fn field_index(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Field(idx) => Some(idx),
            _ => None,
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            NodeKind::Logical(op) => write!(f, "{}", op),
            NodeKind::Operator { op: CompareOp::Eq, negated: true } => f.write_str("!="),
            NodeKind::Operator { op, negated: true } => write!(f, "NOT {}", op),
            NodeKind::Operator { op, negated: false } => write!(f, "{}", op),
            NodeKind::Value { quoted: true } => write!(f, "'{}'", self.value),
            NodeKind::Value { quoted: false } => f.write_str(&self.value),
            NodeKind::Field(idx) if self.alt_value.is_empty() => write!(f, "field #{}", idx),
            NodeKind::Field(idx) => write!(f, "field #{} ({})", idx, self.alt_value),
        }
    }
}

/// A query node with its owned arguments
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTree {
    pub node: QueryNode,
    pub children: Vec<QueryTree>,
}

impl QueryTree {
    pub fn leaf(node: QueryNode) -> Self {
        QueryTree {
            node,
            children: Vec::new(),
        }
    }

    pub fn with_children(node: QueryNode, children: Vec<QueryTree>) -> Self {
        QueryTree { node, children }
    }

    /// Depth-first visit, parents before children
    pub fn walk<F: FnMut(&QueryTree, usize)>(&self, f: &mut F) {
        self.walk_at(0, f);
    }

    fn walk_at<F: FnMut(&QueryTree, usize)>(&self, depth: usize, f: &mut F) {
        f(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, f);
        }
    }

    pub fn walk_mut<E, F>(&mut self, f: &mut F) -> Result<(), E>
    where
        F: FnMut(&mut QueryNode) -> Result<(), E>,
    {
        f(&mut self.node)?;
        for child in &mut self.children {
            child.walk_mut(f)?;
        }
        Ok(())
    }

    fn write_indented(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        writeln!(f, "{:width$}{}", "", self.node, width = depth * 2)?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl From<QueryNode> for QueryTree {
    fn from(node: QueryNode) -> Self {
        QueryTree::leaf(node)
    }
}

impl From<&str> for QueryTree {
    fn from(text: &str) -> Self {
        QueryTree::leaf(QueryNode::value(text))
    }
}

impl From<String> for QueryTree {
    fn from(text: String) -> Self {
        QueryTree::leaf(QueryNode::value(text))
    }
}

impl fmt::Display for QueryTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// A logical node could not be built; the arguments are handed back.
#[derive(Debug, Error)]
#[error("cannot build {op} node: {reason}")]
pub struct NodeBuildError {
    op: LogicalOp,
    reason: &'static str,
    orphans: Vec<QueryTree>,
}

impl NodeBuildError {
    /// The argument subtrees that were not attached
    pub fn into_orphans(self) -> Vec<QueryTree> {
        self.orphans
    }
}

impl From<NodeBuildError> for Error {
    fn from(e: NodeBuildError) -> Self {
        Error::MalformedQuery(e.to_string())
    }
}

/// A boolean filter over record fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    root: Option<QueryTree>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn with_clause(clause: QueryTree) -> Self {
        Query { root: Some(clause) }
    }

    /// Replace the clause; the previous tree is dropped.
    pub fn set_query_clause(&mut self, clause: QueryTree) {
        self.root = Some(clause);
    }

    pub fn reset_query_clause(&mut self) {
        self.root = None;
    }

    pub fn query_clause(&self) -> Option<&QueryTree> {
        self.root.as_ref()
    }

    pub fn query_clause_mut(&mut self) -> Option<&mut QueryTree> {
        self.root.as_mut()
    }

    /// `lhs op rhs`. Strings become value nodes.
    pub fn new_operator_node<L, R>(op: CompareOp, lhs: L, rhs: R) -> QueryTree
    where
        L: Into<QueryTree>,
        R: Into<QueryTree>,
    {
        QueryTree::with_children(QueryNode::operator(op, false), vec![lhs.into(), rhs.into()])
    }

    /// `NOT (lhs op rhs)` folded into the operator node
    pub fn new_negated_operator_node<L, R>(op: CompareOp, lhs: L, rhs: R) -> QueryTree
    where
        L: Into<QueryTree>,
        R: Into<QueryTree>,
    {
        QueryTree::with_children(QueryNode::operator(op, true), vec![lhs.into(), rhs.into()])
    }

    /// `AND`/`OR` take both arguments, `NOT` takes only `lhs`. On an arity
    /// mismatch nothing is attached and the error carries the arguments.
    pub fn new_logical_node(
        op: LogicalOp,
        lhs: QueryTree,
        rhs: Option<QueryTree>,
    ) -> Result<QueryTree, NodeBuildError> {
        let node = QueryNode::logical(op);
        match (op, rhs) {
            (LogicalOp::Not, None) => Ok(QueryTree::with_children(node, vec![lhs])),
            (LogicalOp::Not, Some(rhs)) => Err(NodeBuildError {
                op,
                reason: "NOT takes exactly one argument",
                orphans: vec![lhs, rhs],
            }),
            (_, Some(rhs)) => Ok(QueryTree::with_children(node, vec![lhs, rhs])),
            (_, None) => Err(NodeBuildError {
                op,
                reason: "two arguments required",
                orphans: vec![lhs],
            }),
        }
    }

    pub fn new_not_node(arg: QueryTree) -> QueryTree {
        QueryTree::with_children(QueryNode::logical(LogicalOp::Not), vec![arg])
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.root {
            Some(root) => write!(f, "{}", root),
            None => writeln!(f, "(empty query)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_node_adopts_arguments() {
        let tree = Query::new_operator_node(CompareOp::Ge, "age", "30");
        assert_eq!(tree.node.compare_op(), Some((CompareOp::Ge, false)));
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].node.value_text(), "age");
        assert_eq!(tree.children[1].node.kind(), NodeKind::Value { quoted: false });
    }

    #[test]
    fn test_logical_node_arity() {
        let a = Query::new_operator_node(CompareOp::Eq, "a", "1");
        let b = Query::new_operator_node(CompareOp::Eq, "b", "2");
        let and = Query::new_logical_node(LogicalOp::And, a.clone(), Some(b.clone())).unwrap();
        assert_eq!(and.children, vec![a.clone(), b.clone()]);

        let err = Query::new_logical_node(LogicalOp::Not, a.clone(), Some(b.clone())).unwrap_err();
        assert_eq!(err.into_orphans(), vec![a.clone(), b]);

        let err = Query::new_logical_node(LogicalOp::Or, a.clone(), None).unwrap_err();
        assert!(matches!(Error::from(err), Error::MalformedQuery(_)));

        let not = Query::new_logical_node(LogicalOp::Not, a, None).unwrap();
        assert_eq!(not.node.logical_op(), Some(LogicalOp::Not));
    }

    #[test]
    fn test_set_and_reset_clause() {
        let mut query = Query::new();
        assert!(query.query_clause().is_none());
        query.set_query_clause(Query::new_operator_node(CompareOp::Lt, "x", "1"));
        query.set_query_clause(Query::new_operator_node(CompareOp::Gt, "y", "2"));
        let root = query.query_clause().unwrap();
        assert_eq!(root.children[0].node.value_text(), "y");
        query.reset_query_clause();
        assert!(query.query_clause().is_none());
    }

    #[test]
    fn test_set_field() {
        let mut node = QueryNode::value("name");
        node.set_field(3);
        assert_eq!(node.field_index(), Some(3));
        assert_eq!(node.logical_op(), None);
    }

    #[test]
    fn test_display_indents_by_depth() {
        let lhs = Query::new_negated_operator_node(CompareOp::Eq, "name", QueryNode::quoted("bob"));
        let rhs = Query::new_operator_node(CompareOp::Le, "age", "40");
        let query = Query::with_clause(Query::new_logical_node(LogicalOp::Or, lhs, Some(rhs)).unwrap());
        let expected = "OR\n  !=\n    name\n    'bob'\n  <=\n    age\n    40\n";
        assert_eq!(query.to_string(), expected);
    }
}
