use std::cmp::Ordering;

use log::debug;

use crate::error::{Error, Result, Status};
use crate::file::RecordFile;
use crate::query::{CompareOp, LogicalOp, NodeKind, Query, QueryNode, QueryTree};
use crate::record::Record;
use crate::record_cursor::{FetchDirection, RecordCursor};
use crate::transaction::Transaction;
use crate::value::FieldValue;

/// Returned by `OnRecordFound` to continue or end a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    Continue,
    Stop,
}

/// Called for every record matching the scanned query
pub trait OnRecordFound {
    fn on_record_found(&mut self, _record: &Record) -> ScanAction {
        ScanAction::Continue
    }
}

/// Handler that accepts every match and never stops
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepScanning;

impl OnRecordFound for KeepScanning {}

impl<F> OnRecordFound for F
where
    F: FnMut(&Record) -> ScanAction,
{
    fn on_record_found(&mut self, record: &Record) -> ScanAction {
        self(record)
    }
}

fn malformed(node: &QueryNode, what: &str) -> Error {
    Error::MalformedQuery(format!("{} node: {}", node, what))
}

/// Evaluates queries against records, one file or cursor at a time.
#[derive(Debug, Default)]
pub struct FileScanner<H = KeepScanning> {
    handler: H,
}

impl FileScanner<KeepScanning> {
    pub fn new() -> Self {
        FileScanner {
            handler: KeepScanning,
        }
    }
}

impl<H: OnRecordFound> FileScanner<H> {
    pub fn with_handler(handler: H) -> Self {
        FileScanner { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Bind the query's field references to `record`.
    ///
    /// Unquoted values naming a field become field nodes (the name is kept
    /// as the node's alt value). Field nodes resolved earlier are looked up
    /// again by that name, so a query can move between records whose field
    /// order differs. Literals compared against a field must parse as that
    /// field's type.
    pub fn resolve_fields(&self, query: &mut Query, record: &Record) -> Result<()> {
        let Some(root) = query.query_clause_mut() else {
            return Ok(());
        };
        root.walk_mut(&mut |node: &mut QueryNode| -> Result<()> {
            match node.kind() {
                NodeKind::Value { quoted: false } => {
                    if let Some(idx) = record.field_index(node.value_text()) {
                        let name = node.value_text().to_string();
                        node.set_field(idx);
                        node.set_alt_value(name);
                    }
                    Ok(())
                }
                NodeKind::Field(idx) => {
                    if !node.alt_value().is_empty() {
                        let idx = record.field_index(node.alt_value()).ok_or_else(|| {
                            Error::invalid(format!("record has no field {:?}", node.alt_value()))
                        })?;
                        node.set_field(idx);
                    } else if record.field(idx).is_none() {
                        return Err(Error::invalid(format!(
                            "field #{} out of range, record has {} fields",
                            idx,
                            record.field_count()
                        )));
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        })?;
        check_literals(root, record)
    }

    /// Evaluate the query against the record's current values. An empty
    /// query matches everything.
    pub fn evaluate(&self, query: &Query, record: &Record) -> Result<bool> {
        match query.query_clause() {
            Some(root) => eval(root, record),
            None => Ok(true),
        }
    }

    /// Evaluate without touching any cursor, for checking a query against
    /// values set by hand.
    pub fn static_evaluate(&self, query: &Query, record: &Record) -> Result<bool> {
        self.evaluate(query, record)
    }

    /// Scan the whole file in key order. Returns the number of matches
    /// reported to the handler.
    pub fn scan(&mut self, file: &mut RecordFile, txn: Option<&Transaction>, query: &mut Query) -> Result<usize> {
        let mut cursor = RecordCursor::new(file, txn)?;
        self.scan_cursor(&mut cursor, query)
    }

    /// Scan the rows a positioned cursor yields, starting from its `from`
    /// bound. When the handler stops the scan the cursor stays on the
    /// matching row.
    pub fn scan_cursor(&mut self, cursor: &mut RecordCursor<'_>, query: &mut Query) -> Result<usize> {
        self.resolve_fields(query, cursor.record())?;
        let mut found = 0;
        let mut status = cursor.fetch_first()?;
        while status == Status::Ok {
            if self.evaluate(query, cursor.record())? {
                found += 1;
                if self.handler.on_record_found(cursor.record()) == ScanAction::Stop {
                    debug!("scan stopped by handler after {} matches", found);
                    break;
                }
            }
            status = cursor.fetch(FetchDirection::Default)?;
        }
        Ok(found)
    }
}

fn check_literals(tree: &QueryTree, record: &Record) -> Result<()> {
    if let NodeKind::Operator { .. } = tree.node.kind() {
        if let [lhs, rhs] = tree.children.as_slice() {
            let pair = match (lhs.node.kind(), rhs.node.kind()) {
                (NodeKind::Field(idx), NodeKind::Value { .. }) => Some((idx, rhs)),
                (NodeKind::Value { .. }, NodeKind::Field(idx)) => Some((idx, lhs)),
                _ => None,
            };
            if let Some((idx, literal)) = pair {
                let ty = field_value(record, idx, &tree.node)?.field_type();
                FieldValue::parse(ty, literal.node.value_text())?;
            }
        }
    }
    for child in &tree.children {
        check_literals(child, record)?;
    }
    Ok(())
}

fn field_value<'r>(record: &'r Record, idx: usize, node: &QueryNode) -> Result<&'r FieldValue> {
    match record.field(idx) {
        Some(_) => Ok(record.value(idx)),
        None => Err(malformed(node, "field reference out of range")),
    }
}

fn eval(tree: &QueryTree, record: &Record) -> Result<bool> {
    match tree.node.kind() {
        NodeKind::Logical(LogicalOp::And) => {
            if tree.children.is_empty() {
                return Err(malformed(&tree.node, "no arguments"));
            }
            for child in &tree.children {
                if !eval(child, record)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        NodeKind::Logical(LogicalOp::Or) => {
            if tree.children.is_empty() {
                return Err(malformed(&tree.node, "no arguments"));
            }
            for child in &tree.children {
                if eval(child, record)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        NodeKind::Logical(LogicalOp::Not) => match tree.children.as_slice() {
            [arg] => Ok(!eval(arg, record)?),
            _ => Err(malformed(&tree.node, "expects one argument")),
        },
        NodeKind::Operator { op, negated } => {
            let [lhs, rhs] = tree.children.as_slice() else {
                return Err(malformed(&tree.node, "expects two arguments"));
            };
            let ord = compare_operands(tree, lhs, rhs, record)?;
            let result = match op {
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Ge => ord != Ordering::Less,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Le => ord != Ordering::Greater,
            };
            Ok(result != negated)
        }
        NodeKind::Value { .. } | NodeKind::Field(_) => Err(malformed(&tree.node, "not a condition")),
    }
}

/// Order of `lhs` relative to `rhs`, using the field's type for literals
fn compare_operands(op: &QueryTree, lhs: &QueryTree, rhs: &QueryTree, record: &Record) -> Result<Ordering> {
    match (lhs.node.kind(), rhs.node.kind()) {
        (NodeKind::Field(a), NodeKind::Field(b)) => {
            let a = field_value(record, a, &lhs.node)?;
            let b = field_value(record, b, &rhs.node)?;
            a.compare(b)
        }
        (NodeKind::Field(idx), NodeKind::Value { .. }) => {
            let field = field_value(record, idx, &lhs.node)?;
            let literal = FieldValue::parse(field.field_type(), rhs.node.value_text())?;
            field.compare(&literal)
        }
        (NodeKind::Value { .. }, NodeKind::Field(idx)) => {
            let field = field_value(record, idx, &rhs.node)?;
            let literal = FieldValue::parse(field.field_type(), lhs.node.value_text())?;
            literal.compare(field)
        }
        _ => Err(malformed(&op.node, "needs a field operand")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;
    use crate::value::FieldType;

    fn person(age: i32, name: &str) -> Record {
        let mut rec = Record::new();
        rec.bind_key("id", FieldType::Uint32)
            .bind_data("age", FieldType::Int32)
            .bind_data("name", FieldType::Str);
        rec.set("age", age).unwrap();
        rec.set("name", name).unwrap();
        rec
    }

    fn check(text: &str, rec: &Record) -> bool {
        let scanner = FileScanner::new();
        let mut query = parse_query(text).unwrap();
        scanner.resolve_fields(&mut query, rec).unwrap();
        scanner.evaluate(&query, rec).unwrap()
    }

    #[test]
    fn test_operator_truth_table() {
        let cases = [
            (CompareOp::Eq, [false, true, false]),
            (CompareOp::Gt, [false, false, true]),
            (CompareOp::Ge, [false, true, true]),
            (CompareOp::Lt, [true, false, false]),
            (CompareOp::Le, [true, true, false]),
        ];
        let scanner = FileScanner::new();
        for (op, expected) in cases {
            for (age, want) in [29, 30, 31].into_iter().zip(expected) {
                let rec = person(age, "x");
                for negated in [false, true] {
                    let tree = if negated {
                        Query::new_negated_operator_node(op, "age", "30")
                    } else {
                        Query::new_operator_node(op, "age", "30")
                    };
                    let mut query = Query::with_clause(tree);
                    scanner.resolve_fields(&mut query, &rec).unwrap();
                    assert_eq!(
                        scanner.evaluate(&query, &rec).unwrap(),
                        want != negated,
                        "{:?} negated={} age={}",
                        op,
                        negated,
                        age
                    );
                }
            }
        }
    }

    #[test]
    fn test_literal_on_the_left_is_reversed() {
        let rec = person(40, "x");
        assert!(check("50 > age", &rec));
        assert!(!check("30 >= age", &rec));
    }

    #[test]
    fn test_logical_truth_tables() {
        for (a, b) in [(false, false), (false, true), (true, false), (true, true)] {
            let rec = person(if a { 1 } else { 0 }, if b { "yes" } else { "no" });
            let lhs = "age = 1";
            let rhs = "name = 'yes'";
            assert_eq!(check(&format!("{} AND {}", lhs, rhs), &rec), a && b);
            assert_eq!(check(&format!("{} OR {}", lhs, rhs), &rec), a || b);
            assert_eq!(check(&format!("NOT {}", lhs), &rec), !a);
            assert_eq!(check(&format!("NOT ({} AND {})", lhs, rhs), &rec), !(a && b));
        }
    }

    #[test]
    fn test_numeric_fields_compare_numerically() {
        let rec = person(9, "x");
        assert!(check("age < 10", &rec));
        assert!(check("name < 'y'", &rec));
    }

    #[test]
    fn test_resolution_follows_field_names() {
        let rec = person(5, "x");
        let mut query = parse_query("age = 5").unwrap();
        let scanner = FileScanner::new();
        scanner.resolve_fields(&mut query, &rec).unwrap();
        let lhs = &query.query_clause().unwrap().children[0].node;
        assert_eq!(lhs.field_index(), Some(1));
        assert_eq!(lhs.alt_value(), "age");

        let mut other = Record::new();
        other.bind_key("age", FieldType::Int64);
        other.set("age", 5i64).unwrap();
        scanner.resolve_fields(&mut query, &other).unwrap();
        assert!(scanner.static_evaluate(&query, &other).unwrap());

        let mut unrelated = Record::new();
        unrelated.bind_key("id", FieldType::Int32);
        assert!(scanner.resolve_fields(&mut query, &unrelated).is_err());
    }

    #[test]
    fn test_bad_literal_and_malformed_tree() {
        let rec = person(5, "x");
        let scanner = FileScanner::new();
        let mut query = parse_query("age = abc").unwrap();
        assert!(matches!(
            scanner.resolve_fields(&mut query, &rec),
            Err(Error::InvalidValue(_))
        ));

        let mut query = parse_query("'a' = 'b'").unwrap();
        scanner.resolve_fields(&mut query, &rec).unwrap();
        assert!(matches!(scanner.evaluate(&query, &rec), Err(Error::MalformedQuery(_))));

        let lone = Query::with_clause(QueryNode::field(1).into());
        assert!(matches!(scanner.evaluate(&lone, &rec), Err(Error::MalformedQuery(_))));
    }

    #[test]
    fn test_empty_query_matches() {
        let rec = person(1, "x");
        assert!(FileScanner::new().evaluate(&Query::new(), &rec).unwrap());
    }
}
