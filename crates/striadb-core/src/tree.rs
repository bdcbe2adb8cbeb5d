//! Binary expression tree container.
//!
//! Trees built from real WHERE clauses can nest OR/AND chains thousands of
//! levels deep, so every whole-tree operation here (walk, teardown, clone,
//! structural transform, equality) runs on an explicit stack instead of the
//! call stack.

use std::fmt;

use crate::columns::ConstantColumn;
use crate::decimal::Decimal;
use crate::node::{combine_derived, ExprError, TreeNode};
use crate::row::Row;
use crate::types::ColType;

/// Traversal direction pending for a stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Descend {
    Left,
    Right,
    Up,
}

/// One tree node: an owned payload plus up to two owned children. A leaf has
/// neither child; an operator node always has both.
#[derive(Debug)]
pub struct ParseTree {
    pub(crate) data: TreeNode,
    pub(crate) left: Option<Box<ParseTree>>,
    pub(crate) right: Option<Box<ParseTree>>,
    pub(crate) derived_table: String,
}

impl ParseTree {
    pub fn leaf(data: TreeNode) -> ParseTree {
        let derived_table = data.derived_table();
        ParseTree {
            data,
            left: None,
            right: None,
            derived_table,
        }
    }

    pub fn internal(data: TreeNode, left: Box<ParseTree>, right: Box<ParseTree>) -> ParseTree {
        let derived_table = data.derived_table();
        ParseTree {
            data,
            left: Some(left),
            right: Some(right),
            derived_table,
        }
    }

    pub fn data(&self) -> &TreeNode {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TreeNode {
        &mut self.data
    }

    pub fn set_data(&mut self, data: TreeNode) {
        self.data = data;
    }

    pub fn left(&self) -> Option<&ParseTree> {
        self.left.as_deref()
    }

    pub fn right(&self) -> Option<&ParseTree> {
        self.right.as_deref()
    }

    pub fn left_mut(&mut self) -> Option<&mut ParseTree> {
        self.left.as_deref_mut()
    }

    pub fn right_mut(&mut self) -> Option<&mut ParseTree> {
        self.right.as_deref_mut()
    }

    pub fn take_left(&mut self) -> Option<Box<ParseTree>> {
        self.left.take()
    }

    pub fn take_right(&mut self) -> Option<Box<ParseTree>> {
        self.right.take()
    }

    pub fn set_left(&mut self, child: Option<Box<ParseTree>>) {
        self.left = child;
    }

    pub fn set_right(&mut self, child: Option<Box<ParseTree>>) {
        self.right = child;
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn derived_table(&self) -> &str {
        &self.derived_table
    }

    pub fn result_type(&self) -> ColType {
        self.data.result_type()
    }

    /// Postorder traversal: children before parent, on an explicit stack.
    pub fn walk<F: FnMut(&ParseTree)>(&self, mut action: F) {
        let mut stack: Vec<(&ParseTree, Descend)> = vec![(self, Descend::Left)];
        while let Some((node, dir)) = stack.pop() {
            match dir {
                Descend::Left => {
                    stack.push((node, Descend::Right));
                    if let Some(l) = node.left.as_deref() {
                        stack.push((l, Descend::Left));
                    }
                }
                Descend::Right => {
                    stack.push((node, Descend::Up));
                    if let Some(r) = node.right.as_deref() {
                        stack.push((r, Descend::Left));
                    }
                }
                Descend::Up => action(node),
            }
        }
    }

    /// Postorder structural transform. Each node is detached, its transformed
    /// children are reattached, then `f` runs on the node; `f` may freely
    /// restructure the subtree it is handed.
    pub fn transform_in_place<F: FnMut(&mut ParseTree)>(&mut self, mut f: F) {
        let placeholder = ParseTree::leaf(TreeNode::Constant(ConstantColumn::null()));
        let owned = std::mem::replace(self, placeholder);
        let transformed = transform_subtree(Box::new(owned), &mut f);
        *self = *transformed;
    }

    /// Deep-copy `src` over this tree. The previous contents are torn down
    /// iteratively by the assignment.
    pub fn copy_tree(&mut self, src: &ParseTree) {
        *self = src.clone();
    }

    /// Recompute derived-table tags bottom-up: a node's tag is the agreement
    /// of its children's tags, with "*" (binds no table) yielding to the
    /// other side and disagreement clearing the tag.
    pub fn set_derived_table(&mut self) {
        self.transform_in_place(|node| {
            node.derived_table = match (&node.left, &node.right) {
                (None, None) => node.data.derived_table(),
                (l, r) => {
                    let lt = l
                        .as_deref()
                        .map(|c| c.derived_table.clone())
                        .unwrap_or_else(|| "*".to_string());
                    let rt = r
                        .as_deref()
                        .map(|c| c.derived_table.clone())
                        .unwrap_or_else(|| "*".to_string());
                    combine_derived(&lt, &rt)
                }
            };
        });
    }

    /// Evaluate for side effects only; typed getters read the result.
    pub fn evaluate(&mut self, row: &Row, is_null: &mut bool) -> Result<(), ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.evaluate(row, is_null, l, r),
                TreeNode::Logic(op) => op.get_bool_val(row, l, r, is_null).map(|_| ()),
                TreeNode::Predicate(op) => op.get_bool_val(row, l, r, is_null).map(|_| ()),
                other => Err(not_an_operator(other)),
            },
            (None, None) => match data {
                TreeNode::Filter(_) | TreeNode::ConstantFilter(_) => {
                    data.get_bool_val(row, is_null).map(|_| ())
                }
                _ => Ok(()),
            },
            _ => Err(one_child(data)),
        }
    }

    pub fn get_int_val(&mut self, row: &Row, is_null: &mut bool) -> Result<i64, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.get_int_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_int_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }

    pub fn get_uint_val(&mut self, row: &Row, is_null: &mut bool) -> Result<u64, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.get_uint_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_uint_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }

    pub fn get_float_val(&mut self, row: &Row, is_null: &mut bool) -> Result<f32, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.get_float_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_float_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }

    pub fn get_double_val(&mut self, row: &Row, is_null: &mut bool) -> Result<f64, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.get_double_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_double_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }

    pub fn get_long_double_val(&mut self, row: &Row, is_null: &mut bool) -> Result<f64, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.get_long_double_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_long_double_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }

    pub fn get_decimal_val(&mut self, row: &Row, is_null: &mut bool) -> Result<Decimal, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.get_decimal_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_decimal_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }

    pub fn get_str_val(&mut self, row: &Row, is_null: &mut bool) -> Result<String, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Arithmetic(op) => op.get_str_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_str_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }

    pub fn get_bool_val(&mut self, row: &Row, is_null: &mut bool) -> Result<bool, ExprError> {
        let ParseTree {
            data, left, right, ..
        } = self;
        match (left.as_deref_mut(), right.as_deref_mut()) {
            (Some(l), Some(r)) => match data {
                TreeNode::Logic(op) => op.get_bool_val(row, l, r, is_null),
                TreeNode::Predicate(op) => op.get_bool_val(row, l, r, is_null),
                TreeNode::Arithmetic(op) => op.get_bool_val(row, l, r, is_null),
                other => Err(not_an_operator(other)),
            },
            (None, None) => data.get_bool_val(row, is_null),
            _ => Err(one_child(data)),
        }
    }
}

fn not_an_operator(data: &TreeNode) -> ExprError {
    ExprError::MalformedTree(format!(
        "interior node '{}' is not an operator",
        data.data()
    ))
}

fn one_child(data: &TreeNode) -> ExprError {
    ExprError::MalformedTree(format!(
        "node '{}' has exactly one child",
        data.data()
    ))
}

impl Drop for ParseTree {
    fn drop(&mut self) {
        // Detach children onto a stack; every popped node has already had its
        // own children taken, so its drop glue never recurses.
        let mut stack: Vec<Box<ParseTree>> = Vec::new();
        if let Some(l) = self.left.take() {
            stack.push(l);
        }
        if let Some(r) = self.right.take() {
            stack.push(r);
        }
        while let Some(mut node) = stack.pop() {
            if let Some(l) = node.left.take() {
                stack.push(l);
            }
            if let Some(r) = node.right.take() {
                stack.push(r);
            }
        }
    }
}

impl Clone for ParseTree {
    fn clone(&self) -> Self {
        let mut out: Vec<Box<ParseTree>> = Vec::new();
        self.walk(|node| {
            let right = if node.right.is_some() { out.pop() } else { None };
            let left = if node.left.is_some() { out.pop() } else { None };
            out.push(Box::new(ParseTree {
                data: node.data.clone(),
                left,
                right,
                derived_table: node.derived_table.clone(),
            }));
        });
        match out.pop() {
            Some(t) => *t,
            None => unreachable!("postorder walk always visits the root"),
        }
    }
}

impl PartialEq for ParseTree {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.data != b.data {
                return false;
            }
            match (a.left.as_deref(), b.left.as_deref()) {
                (Some(x), Some(y)) => stack.push((x, y)),
                (None, None) => {}
                _ => return false,
            }
            match (a.right.as_deref(), b.right.as_deref()) {
                (Some(x), Some(y)) => stack.push((x, y)),
                (None, None) => {}
                _ => return false,
            }
        }
        true
    }
}

impl fmt::Display for ParseTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        self.walk(|n| lines.push(n.data.data()));
        f.write_str(&lines.join("\n"))
    }
}

struct TransformFrame {
    node: Box<ParseTree>,
    state: Descend,
    left_out: Option<Box<ParseTree>>,
    right_out: Option<Box<ParseTree>>,
}

impl TransformFrame {
    fn new(node: Box<ParseTree>) -> Self {
        TransformFrame {
            node,
            state: Descend::Left,
            left_out: None,
            right_out: None,
        }
    }
}

/// Owned-frame postorder rebuild driving [`ParseTree::transform_in_place`].
/// A parent frame's state records which child it is waiting on, so a
/// completing child knows which slot to deliver into.
pub(crate) fn transform_subtree<F: FnMut(&mut ParseTree)>(
    root: Box<ParseTree>,
    f: &mut F,
) -> Box<ParseTree> {
    let mut stack = vec![TransformFrame::new(root)];
    let mut finished: Option<Box<ParseTree>> = None;

    loop {
        let state = match stack.last() {
            Some(frame) => frame.state,
            None => break,
        };
        match state {
            Descend::Left => {
                let child = match stack.last_mut() {
                    Some(top) => {
                        top.state = Descend::Right;
                        top.node.left.take()
                    }
                    None => None,
                };
                if let Some(l) = child {
                    stack.push(TransformFrame::new(l));
                }
            }
            Descend::Right => {
                let child = match stack.last_mut() {
                    Some(top) => {
                        top.state = Descend::Up;
                        top.node.right.take()
                    }
                    None => None,
                };
                if let Some(r) = child {
                    stack.push(TransformFrame::new(r));
                }
            }
            Descend::Up => {
                if let Some(mut frame) = stack.pop() {
                    frame.node.left = frame.left_out.take();
                    frame.node.right = frame.right_out.take();
                    f(&mut frame.node);
                    match stack.last_mut() {
                        Some(parent) => match parent.state {
                            Descend::Right => parent.left_out = Some(frame.node),
                            _ => parent.right_out = Some(frame.node),
                        },
                        None => finished = Some(frame.node),
                    }
                }
            }
        }
    }

    match finished {
        Some(t) => t,
        None => unreachable!("transform always completes the root frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{ReturnedColumn, SimpleColumn};
    use crate::filters::SimpleFilter;
    use crate::operators::{LogicOperator, OpType};
    use crate::row::Datum;

    fn filter_leaf(text: &str, idx: usize) -> Box<ParseTree> {
        let mut f = SimpleFilter::parse(text).unwrap();
        if let ReturnedColumn::Simple(c) = &mut f.lhs {
            c.input_index = idx;
        }
        Box::new(ParseTree::leaf(TreeNode::Filter(f)))
    }

    fn and(left: Box<ParseTree>, right: Box<ParseTree>) -> Box<ParseTree> {
        Box::new(ParseTree::internal(
            TreeNode::Logic(LogicOperator::new(OpType::And)),
            left,
            right,
        ))
    }

    fn deep_chain(depth: usize) -> Box<ParseTree> {
        let mut root = filter_leaf("id < 30", 0);
        for _ in 0..depth {
            root = and(root, filter_leaf("pos > 5000", 1));
        }
        root
    }

    #[test]
    fn deep_trees_tear_down_without_overflow() {
        let tree = deep_chain(50_000);
        drop(tree);
    }

    #[test]
    fn deep_trees_clone_and_compare_without_overflow() {
        let tree = deep_chain(20_000);
        let copy = tree.clone();
        assert_eq!(*tree, *copy);
    }

    #[test]
    fn clone_is_independent_of_the_original() {
        let tree = and(filter_leaf("id < 30", 0), filter_leaf("pos > 5000", 1));
        let mut copy = ParseTree::leaf(TreeNode::Constant(
            crate::columns::ConstantColumn::from_int(0),
        ));
        copy.copy_tree(&tree);
        assert_eq!(*tree, copy);

        if let Some(leaf) = copy.left_mut() {
            leaf.set_data(TreeNode::Filter(SimpleFilter::parse("id < 99").unwrap()));
        }
        assert_ne!(*tree, copy);
        assert!(tree.to_string().contains("id < 30"));
    }

    #[test]
    fn to_string_is_postorder_lines() {
        let tree = and(filter_leaf("id < 30", 0), filter_leaf("pos > 5000", 1));
        assert_eq!(tree.to_string(), "id < 30\npos > 5000\nand");
    }

    #[test]
    fn evaluation_dispatches_on_shape() {
        let mut tree = and(filter_leaf("id < 30", 0), filter_leaf("pos > 5000", 1));
        let row = Row::new(vec![Datum::Int(10), Datum::Int(6000)]);
        let mut is_null = false;
        assert!(tree.get_bool_val(&row, &mut is_null).unwrap());

        let row = Row::new(vec![Datum::Int(10), Datum::Int(10)]);
        assert!(!tree.get_bool_val(&row, &mut is_null).unwrap());
    }

    #[test]
    fn single_child_nodes_are_contract_violations() {
        let mut bad = ParseTree::internal(
            TreeNode::Logic(LogicOperator::new(OpType::And)),
            filter_leaf("id < 30", 0),
            filter_leaf("pos > 5000", 1),
        );
        bad.set_right(None);
        let row = Row::default();
        let mut is_null = false;
        assert!(matches!(
            bad.get_bool_val(&row, &mut is_null),
            Err(ExprError::MalformedTree(_))
        ));
    }

    #[test]
    fn derived_table_tags_propagate_bottom_up() {
        let mut lhs_col = SimpleColumn::new("sub1.a");
        lhs_col.derived_table = "sub1".to_string();
        let lf = SimpleFilter::new(
            OpType::Gt,
            ReturnedColumn::Simple(lhs_col),
            ReturnedColumn::Constant(crate::columns::ConstantColumn::from_int(5)),
        );
        let mut rhs_col = SimpleColumn::new("sub1.b");
        rhs_col.derived_table = "sub1".to_string();
        let rf = SimpleFilter::new(
            OpType::Lt,
            ReturnedColumn::Simple(rhs_col),
            ReturnedColumn::Constant(crate::columns::ConstantColumn::from_int(9)),
        );

        let mut tree = ParseTree::internal(
            TreeNode::Logic(LogicOperator::new(OpType::And)),
            Box::new(ParseTree::leaf(TreeNode::Filter(lf))),
            Box::new(ParseTree::leaf(TreeNode::Filter(rf))),
        );
        tree.set_derived_table();
        assert_eq!(tree.derived_table(), "sub1");

        // Mixed children clear the tag.
        let mut other_col = SimpleColumn::new("sub2.c");
        other_col.derived_table = "sub2".to_string();
        let of = SimpleFilter::new(
            OpType::Eq,
            ReturnedColumn::Simple(other_col),
            ReturnedColumn::Constant(crate::columns::ConstantColumn::from_int(1)),
        );
        if let Some(r) = tree.right_mut() {
            r.set_data(TreeNode::Filter(of));
        }
        tree.set_derived_table();
        assert_eq!(tree.derived_table(), "");
    }

    #[test]
    fn transform_visits_children_before_parents() {
        let mut tree = *and(filter_leaf("id < 30", 0), filter_leaf("pos > 5000", 1));
        let mut order = Vec::new();
        tree.transform_in_place(|node| order.push(node.data.data()));
        assert_eq!(order, vec!["id < 30", "pos > 5000", "and"]);
    }
}
