//! Wire codec for shipping filter trees between processes.
//!
//! A tree is streamed in pre-order with one marker byte per child slot, so
//! arbitrarily deep trees encode and decode on an explicit stack instead of
//! the call stack. Every node carries a type tag, its payload fields, and
//! its derived-table tag.
//!
//! Format, per slot: `[marker: u8]` where 0 = absent, 1 = present, followed
//! for present slots by `[node tag: u8][payload][derived table: string]` and
//! then the left and right slots. Strings are `[len: u32][utf-8 bytes]`;
//! all integers are little-endian.

use std::io;

use crate::arithmetic::{ArithmeticOperator, ResultCarrier};
use crate::columns::{ConstKind, ConstantColumn, ExpressionColumn, ReturnedColumn, SimpleColumn};
use crate::decimal::Decimal;
use crate::filters::{ConstantFilter, SimpleFilter};
use crate::node::TreeNode;
use crate::operators::{LogicOperator, OpType, PredicateOperator};
use crate::row::Datum;
use crate::tree::ParseTree;
use crate::types::{ColType, CompressionKind, DataType};

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

const NODE_ARITHMETIC: u8 = 1;
const NODE_LOGIC: u8 = 2;
const NODE_PREDICATE: u8 = 3;
const NODE_COLUMN: u8 = 4;
const NODE_CONSTANT: u8 = 5;
const NODE_FILTER: u8 = 6;
const NODE_CONSTANT_FILTER: u8 = 7;

const OPERAND_SIMPLE: u8 = 0;
const OPERAND_CONSTANT: u8 = 1;
const OPERAND_EXPRESSION: u8 = 2;

const DATUM_NULL: u8 = 0;
const DATUM_INT: u8 = 1;
const DATUM_UINT: u8 = 2;
const DATUM_FLOAT: u8 = 3;
const DATUM_DOUBLE: u8 = 4;
const DATUM_DECIMAL: u8 = 5;
const DATUM_STR: u8 = 6;
const DATUM_BOOL: u8 = 7;

/// Serialize a tree; an absent tree is a single absent marker.
pub fn serialize_tree(tree: Option<&ParseTree>) -> Vec<u8> {
    let mut buf = Vec::new();
    write_tree(&mut buf, tree);
    buf
}

/// Decode one tree and require the input to end with it.
pub fn deserialize_tree(data: &[u8]) -> io::Result<Option<Box<ParseTree>>> {
    let mut r = Reader::new(data);
    let tree = read_tree(&mut r)?;
    if r.remaining() != 0 {
        return Err(invalid("trailing bytes after the tree"));
    }
    Ok(tree)
}

fn write_tree(buf: &mut Vec<u8>, tree: Option<&ParseTree>) {
    let mut stack = vec![tree];
    while let Some(slot) = stack.pop() {
        match slot {
            None => buf.push(ABSENT),
            Some(node) => {
                buf.push(PRESENT);
                write_node(buf, node.data());
                write_str(buf, node.derived_table());
                // Right below left so the left subtree pops first.
                stack.push(node.right());
                stack.push(node.left());
            }
        }
    }
}

struct DecodeFrame {
    node: Box<ParseTree>,
    filled_left: bool,
}

fn read_tree(r: &mut Reader) -> io::Result<Option<Box<ParseTree>>> {
    let root = match read_slot(r)? {
        Some(n) => n,
        None => return Ok(None),
    };
    let mut stack = vec![DecodeFrame {
        node: root,
        filled_left: false,
    }];
    let mut done = None;
    while !stack.is_empty() {
        match read_slot(r)? {
            Some(child) => stack.push(DecodeFrame {
                node: child,
                filled_left: false,
            }),
            None => attach(&mut stack, None, &mut done),
        }
    }
    Ok(done)
}

/// Place a completed subtree in the next open slot; frames whose right slot
/// just filled complete in turn and cascade upward.
fn attach(
    stack: &mut Vec<DecodeFrame>,
    child: Option<Box<ParseTree>>,
    done: &mut Option<Box<ParseTree>>,
) {
    let mut child = child;
    loop {
        let top = match stack.last_mut() {
            Some(t) => t,
            None => {
                *done = child;
                return;
            }
        };
        if !top.filled_left {
            top.node.set_left(child);
            top.filled_left = true;
            return;
        }
        top.node.set_right(child);
        match stack.pop() {
            Some(f) => child = Some(f.node),
            None => return,
        }
    }
}

fn read_slot(r: &mut Reader) -> io::Result<Option<Box<ParseTree>>> {
    match r.u8()? {
        ABSENT => Ok(None),
        PRESENT => {
            let data = read_node(r)?;
            let derived = r.string()?;
            let mut node = Box::new(ParseTree::leaf(data));
            node.derived_table = derived;
            Ok(Some(node))
        }
        other => Err(invalid(format!("bad child marker {other}"))),
    }
}

fn write_node(buf: &mut Vec<u8>, node: &TreeNode) {
    match node {
        TreeNode::Arithmetic(a) => {
            buf.push(NODE_ARITHMETIC);
            buf.push(a.op.wire_code());
            write_col_type(buf, &a.result_type);
            write_col_type(buf, &a.operation_type);
            buf.extend_from_slice(&a.timezone.to_le_bytes());
            buf.push(a.overflow_check as u8);
            match a.carrier() {
                ResultCarrier::Native => buf.push(0),
                ResultCarrier::DecimalAsDouble { scale } => {
                    buf.push(1);
                    buf.extend_from_slice(&scale.to_le_bytes());
                }
            }
        }
        TreeNode::Logic(l) => {
            buf.push(NODE_LOGIC);
            buf.push(l.op.wire_code());
            write_col_type(buf, &l.result_type);
        }
        TreeNode::Predicate(p) => {
            buf.push(NODE_PREDICATE);
            buf.push(p.op.wire_code());
            write_col_type(buf, &p.result_type);
            write_col_type(buf, &p.operation_type);
        }
        TreeNode::Column(c) => {
            buf.push(NODE_COLUMN);
            write_simple_column(buf, c);
        }
        TreeNode::Constant(c) => {
            buf.push(NODE_CONSTANT);
            write_constant_column(buf, c);
        }
        TreeNode::Filter(f) => {
            buf.push(NODE_FILTER);
            write_filter(buf, f);
        }
        TreeNode::ConstantFilter(f) => {
            buf.push(NODE_CONSTANT_FILTER);
            buf.push(f.op.wire_code());
            write_str(buf, &f.function_name);
            match &f.col {
                Some(c) => {
                    buf.push(PRESENT);
                    write_simple_column(buf, c);
                }
                None => buf.push(ABSENT),
            }
            buf.extend_from_slice(&(f.filter_list.len() as u32).to_le_bytes());
            for sf in &f.filter_list {
                write_filter(buf, sf);
            }
        }
    }
}

fn read_node(r: &mut Reader) -> io::Result<TreeNode> {
    match r.u8()? {
        NODE_ARITHMETIC => {
            let op = read_op(r)?;
            if !op.is_arithmetic() {
                return Err(invalid(format!("operator {op} on an arithmetic node")));
            }
            let result = read_col_type(r)?;
            let operation = read_col_type(r)?;
            let timezone = r.i64()?;
            let overflow = r.u8()? != 0;
            let carrier = match r.u8()? {
                0 => ResultCarrier::Native,
                1 => ResultCarrier::DecimalAsDouble { scale: r.i32()? },
                other => return Err(invalid(format!("bad carrier tag {other}"))),
            };
            let mut a = ArithmeticOperator::new(op)
                .with_overflow_check(overflow)
                .with_timezone(timezone);
            a.operation_type = operation;
            a.result_type = result;
            a.set_carrier(carrier);
            Ok(TreeNode::Arithmetic(a))
        }
        NODE_LOGIC => {
            let op = read_op(r)?;
            if !op.is_logic() {
                return Err(invalid(format!("operator {op} on a logic node")));
            }
            let mut l = LogicOperator::new(op);
            l.result_type = read_col_type(r)?;
            Ok(TreeNode::Logic(l))
        }
        NODE_PREDICATE => {
            let op = read_op(r)?;
            let mut p = PredicateOperator::new(op);
            p.result_type = read_col_type(r)?;
            p.operation_type = read_col_type(r)?;
            Ok(TreeNode::Predicate(p))
        }
        NODE_COLUMN => Ok(TreeNode::Column(read_simple_column(r)?)),
        NODE_CONSTANT => Ok(TreeNode::Constant(read_constant_column(r)?)),
        NODE_FILTER => Ok(TreeNode::Filter(read_filter(r)?)),
        NODE_CONSTANT_FILTER => {
            let op = read_op(r)?;
            let function_name = r.string()?;
            let col = match r.u8()? {
                ABSENT => None,
                PRESENT => Some(read_simple_column(r)?),
                other => return Err(invalid(format!("bad column marker {other}"))),
            };
            let count = r.u32()? as usize;
            let mut filter_list = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                filter_list.push(read_filter(r)?);
            }
            Ok(TreeNode::ConstantFilter(ConstantFilter {
                op,
                filter_list,
                col,
                function_name,
            }))
        }
        other => Err(invalid(format!("bad node tag {other}"))),
    }
}

fn write_filter(buf: &mut Vec<u8>, f: &SimpleFilter) {
    buf.push(f.op.op.wire_code());
    write_col_type(buf, &f.op.operation_type);
    write_col_type(buf, &f.op.result_type);
    write_operand(buf, &f.lhs);
    write_operand(buf, &f.rhs);
}

fn read_filter(r: &mut Reader) -> io::Result<SimpleFilter> {
    let mut pred = PredicateOperator::new(read_op(r)?);
    pred.operation_type = read_col_type(r)?;
    pred.result_type = read_col_type(r)?;
    let lhs = read_operand(r)?;
    let rhs = read_operand(r)?;
    Ok(SimpleFilter {
        op: pred,
        lhs,
        rhs,
    })
}

fn write_operand(buf: &mut Vec<u8>, c: &ReturnedColumn) {
    match c {
        ReturnedColumn::Simple(c) => {
            buf.push(OPERAND_SIMPLE);
            write_simple_column(buf, c);
        }
        ReturnedColumn::Constant(c) => {
            buf.push(OPERAND_CONSTANT);
            write_constant_column(buf, c);
        }
        ReturnedColumn::Expression(e) => {
            buf.push(OPERAND_EXPRESSION);
            write_str(buf, &e.text);
            write_tree(buf, Some(&e.expression));
        }
    }
}

fn read_operand(r: &mut Reader) -> io::Result<ReturnedColumn> {
    match r.u8()? {
        OPERAND_SIMPLE => Ok(ReturnedColumn::Simple(read_simple_column(r)?)),
        OPERAND_CONSTANT => Ok(ReturnedColumn::Constant(read_constant_column(r)?)),
        OPERAND_EXPRESSION => {
            let text = r.string()?;
            let expression = read_tree(r)?
                .ok_or_else(|| invalid("expression operand without a tree"))?;
            Ok(ReturnedColumn::Expression(ExpressionColumn {
                expression,
                text,
            }))
        }
        other => Err(invalid(format!("bad operand tag {other}"))),
    }
}

fn write_simple_column(buf: &mut Vec<u8>, c: &SimpleColumn) {
    write_str(buf, &c.schema_name);
    write_str(buf, &c.table_name);
    write_str(buf, &c.column_name);
    write_str(buf, &c.table_alias);
    write_str(buf, &c.derived_table);
    buf.extend_from_slice(&c.oid.to_le_bytes());
    buf.extend_from_slice(&(c.input_index as u64).to_le_bytes());
    write_col_type(buf, &c.result_type);
}

fn read_simple_column(r: &mut Reader) -> io::Result<SimpleColumn> {
    Ok(SimpleColumn {
        schema_name: r.string()?,
        table_name: r.string()?,
        column_name: r.string()?,
        table_alias: r.string()?,
        derived_table: r.string()?,
        oid: r.u32()?,
        input_index: r.u64()? as usize,
        result_type: read_col_type(r)?,
    })
}

fn write_constant_column(buf: &mut Vec<u8>, c: &ConstantColumn) {
    let kind = match c.kind {
        ConstKind::Literal => 0u8,
        ConstKind::Num => 1,
        ConstKind::Null => 2,
    };
    buf.push(kind);
    write_str(buf, &c.const_val);
    write_col_type(buf, &c.result_type);
    write_datum(buf, c.datum());
}

fn read_constant_column(r: &mut Reader) -> io::Result<ConstantColumn> {
    let kind = match r.u8()? {
        0 => ConstKind::Literal,
        1 => ConstKind::Num,
        2 => ConstKind::Null,
        other => return Err(invalid(format!("bad constant kind {other}"))),
    };
    let const_val = r.string()?;
    let result_type = read_col_type(r)?;
    let datum = read_datum(r)?;
    Ok(ConstantColumn::from_parts(const_val, kind, result_type, datum))
}

fn write_datum(buf: &mut Vec<u8>, d: &Datum) {
    match d {
        Datum::Null => buf.push(DATUM_NULL),
        Datum::Int(v) => {
            buf.push(DATUM_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Uint(v) => {
            buf.push(DATUM_UINT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Float(v) => {
            buf.push(DATUM_FLOAT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Double(v) => {
            buf.push(DATUM_DOUBLE);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Decimal(d) => {
            buf.push(DATUM_DECIMAL);
            buf.extend_from_slice(&d.value.to_le_bytes());
            buf.extend_from_slice(&d.scale.to_le_bytes());
            buf.extend_from_slice(&d.precision.to_le_bytes());
        }
        Datum::Str(s) => {
            buf.push(DATUM_STR);
            write_str(buf, s);
        }
        Datum::Bool(v) => {
            buf.push(DATUM_BOOL);
            buf.push(*v as u8);
        }
    }
}

fn read_datum(r: &mut Reader) -> io::Result<Datum> {
    Ok(match r.u8()? {
        DATUM_NULL => Datum::Null,
        DATUM_INT => Datum::Int(r.i64()?),
        DATUM_UINT => Datum::Uint(r.u64()?),
        DATUM_FLOAT => Datum::Float(r.f32()?),
        DATUM_DOUBLE => Datum::Double(r.f64()?),
        DATUM_DECIMAL => {
            let value = r.i128()?;
            let scale = r.i32()?;
            let precision = r.i32()?;
            Datum::Decimal(Decimal::new(value, scale, precision))
        }
        DATUM_STR => Datum::Str(r.string()?),
        DATUM_BOOL => Datum::Bool(r.u8()? != 0),
        other => return Err(invalid(format!("bad datum tag {other}"))),
    })
}

fn write_col_type(buf: &mut Vec<u8>, t: &ColType) {
    buf.push(t.data_type.wire_tag());
    buf.extend_from_slice(&t.width.to_le_bytes());
    buf.extend_from_slice(&t.scale.to_le_bytes());
    buf.extend_from_slice(&t.precision.to_le_bytes());
    buf.push(t.compression.code());
}

fn read_col_type(r: &mut Reader) -> io::Result<ColType> {
    let tag = r.u8()?;
    let data_type = DataType::from_wire_tag(tag)
        .ok_or_else(|| invalid(format!("bad data type tag {tag}")))?;
    let width = r.u32()?;
    let scale = r.i32()?;
    let precision = r.i32()?;
    let code = r.u8()?;
    let compression = CompressionKind::from_code(code)
        .ok_or_else(|| invalid(format!("bad compression code {code}")))?;
    Ok(ColType {
        data_type,
        width,
        scale,
        precision,
        compression,
    })
}

fn read_op(r: &mut Reader) -> io::Result<OpType> {
    let code = r.u8()?;
    OpType::from_wire_code(code).ok_or_else(|| invalid(format!("bad operator code {code}")))
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input ended mid-field",
            ));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> io::Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> io::Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i128(&mut self) -> io::Result<i128> {
        Ok(i128::from_le_bytes(self.take(16)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> io::Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> io::Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> io::Result<String> {
        let n = self.u32()? as usize;
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("string field is not utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::LogicOperator;

    fn filter_leaf(text: &str) -> Box<ParseTree> {
        Box::new(ParseTree::leaf(TreeNode::Filter(
            SimpleFilter::parse(text).unwrap(),
        )))
    }

    fn logic(op: OpType, l: Box<ParseTree>, r: Box<ParseTree>) -> Box<ParseTree> {
        Box::new(ParseTree::internal(
            TreeNode::Logic(LogicOperator::new(op)),
            l,
            r,
        ))
    }

    #[test]
    fn absent_tree_is_a_single_marker() {
        let buf = serialize_tree(None);
        assert_eq!(buf, vec![ABSENT]);
        assert!(deserialize_tree(&buf).unwrap().is_none());
    }

    #[test]
    fn filter_tree_round_trips() {
        let tree = logic(
            OpType::And,
            filter_leaf("t1.id < 30"),
            logic(
                OpType::Or,
                filter_leaf("t1.pos > 5000"),
                filter_leaf("t1.place = 'abc'"),
            ),
        );
        let buf = serialize_tree(Some(&tree));
        let back = deserialize_tree(&buf).unwrap().unwrap();
        assert_eq!(*back, *tree);
    }

    #[test]
    fn expression_operands_round_trip() {
        let tree = filter_leaf("t1.pos + 10 < 5000");
        let buf = serialize_tree(Some(&tree));
        let back = deserialize_tree(&buf).unwrap().unwrap();
        assert_eq!(*back, *tree);
        match back.data() {
            TreeNode::Filter(f) => assert!(matches!(f.lhs, ReturnedColumn::Expression(_))),
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn arithmetic_node_keeps_timezone_and_carrier() {
        let mut a = ArithmeticOperator::new(OpType::Div)
            .with_overflow_check(true)
            .with_timezone(-3600);
        a.adjust_result_type(ColType::decimal(18, 4));

        let tree = Box::new(ParseTree::internal(
            TreeNode::Arithmetic(a),
            Box::new(ParseTree::leaf(TreeNode::Constant(
                ConstantColumn::from_int(10),
            ))),
            Box::new(ParseTree::leaf(TreeNode::Constant(
                ConstantColumn::from_int(4),
            ))),
        ));
        let buf = serialize_tree(Some(&tree));
        let back = deserialize_tree(&buf).unwrap().unwrap();
        assert_eq!(*back, *tree);
        match back.data() {
            TreeNode::Arithmetic(a) => {
                assert_eq!(a.timezone, -3600);
                assert!(a.overflow_check);
                assert_eq!(a.carrier(), ResultCarrier::DecimalAsDouble { scale: 4 });
            }
            _ => panic!("expected arithmetic node"),
        }
    }

    #[test]
    fn constant_filter_round_trips() {
        let mut cf = ConstantFilter::new(OpType::Or).with_function_name("in");
        cf.col = Some(SimpleColumn::new("tpch.lineitem.l_orderkey"));
        for v in [3, 7, 11] {
            cf.push_filter(SimpleFilter::parse(&format!("l_orderkey = {v}")).unwrap());
        }
        let tree = Box::new(ParseTree::leaf(TreeNode::ConstantFilter(cf)));
        let buf = serialize_tree(Some(&tree));
        let back = deserialize_tree(&buf).unwrap().unwrap();
        assert_eq!(*back, *tree);
    }

    #[test]
    fn derived_table_tags_survive_the_trip() {
        let mut tree = logic(
            OpType::And,
            filter_leaf("sub1.id < 30"),
            filter_leaf("sub1.pos > 5000"),
        );
        tree.set_derived_table();
        let buf = serialize_tree(Some(&tree));
        let back = deserialize_tree(&buf).unwrap().unwrap();
        assert_eq!(back.derived_table(), tree.derived_table());
    }

    #[test]
    fn deep_chains_encode_without_recursion() {
        let mut tree = filter_leaf("t1.id < 0");
        for i in 1..10_000 {
            tree = logic(OpType::And, tree, filter_leaf(&format!("t1.id < {i}")));
        }
        let buf = serialize_tree(Some(&tree));
        let back = deserialize_tree(&buf).unwrap().unwrap();
        assert_eq!(*back, *tree);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let tree = filter_leaf("t1.id < 30");
        let buf = serialize_tree(Some(&tree));
        let err = deserialize_tree(&buf[..buf.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn trailing_bytes_are_an_error() {
        let tree = filter_leaf("t1.id < 30");
        let mut buf = serialize_tree(Some(&tree));
        buf.push(0xab);
        let err = deserialize_tree(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn corrupt_node_tag_is_an_error_not_a_panic() {
        let tree = filter_leaf("t1.id < 30");
        let mut buf = serialize_tree(Some(&tree));
        buf[1] = 0x63;
        assert!(deserialize_tree(&buf).is_err());
    }
}
