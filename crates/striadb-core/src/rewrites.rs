//! Filter tree rewrites.
//!
//! The main rewrite factors common leaf conjunctions out of OR-of-AND filter
//! shapes: `(A AND B) OR (A AND C)` becomes `A AND (B OR C)`, so `A` is
//! evaluated once instead of per branch. Both passes run on explicit stacks;
//! WHERE-clause trees can be arbitrarily deep.

use std::collections::BTreeMap;

use crate::node::TreeNode;
use crate::operators::{LogicOperator, OpType};
use crate::tree::{Descend, ParseTree};

/// Order-normalized identity of a filter leaf.
///
/// A binary comparison is keyed with its operands in textual order, flipping
/// the operator when they swap, so `a < b` and `b > a` produce equal keys.
/// Anything else is keyed by its rendered text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterKey {
    Comparison {
        lhs: String,
        op: OpType,
        rhs: String,
    },
    Text(String),
}

/// Semantic key of a filter leaf; `None` for nodes that are not filters.
pub fn semantic_key(tree: &ParseTree) -> Option<FilterKey> {
    match tree.data() {
        TreeNode::Filter(f) => {
            let l = f.lhs.data();
            let r = f.rhs.data();
            let op = f.op.op;
            Some(if l <= r {
                FilterKey::Comparison {
                    lhs: l,
                    op,
                    rhs: r,
                }
            } else {
                FilterKey::Comparison {
                    lhs: r,
                    op: op.opposite(),
                    rhs: l,
                }
            })
        }
        TreeNode::ConstantFilter(f) => Some(FilterKey::Text(f.data())),
        _ => None,
    }
}

fn node_addr(t: &ParseTree) -> usize {
    t as *const ParseTree as usize
}

fn is_or_node(t: &ParseTree) -> bool {
    matches!(t.data(), TreeNode::Logic(l) if l.op == OpType::Or)
}

fn is_and_node(t: &ParseTree) -> bool {
    matches!(t.data(), TreeNode::Logic(l) if l.op == OpType::And)
}

fn and_node(left: Box<ParseTree>, right: Box<ParseTree>) -> Box<ParseTree> {
    Box::new(ParseTree::internal(
        TreeNode::Logic(LogicOperator::new(OpType::And)),
        left,
        right,
    ))
}

/// Hoist every common leaf conjunction above the disjunctions it is repeated
/// under. With `STABLE_SORT` the hoisted conjuncts are ordered by their
/// rendered text for reproducible plan output; otherwise they follow the
/// semantic key order.
pub fn extract_common_leaf_conjunctions_to_root<const STABLE_SORT: bool>(
    tree: Box<ParseTree>,
) -> Box<ParseTree> {
    let common = collect_common_conjunctions(&tree);
    if common.is_empty() {
        return tree;
    }

    let mut hoisted: BTreeMap<FilterKey, Box<ParseTree>> = BTreeMap::new();
    let remainder = remove_from_tree(tree, &common, &mut hoisted);

    let mut nodes: Vec<Box<ParseTree>> = hoisted.into_values().collect();
    if STABLE_SORT {
        nodes.sort_by_key(|n| n.data().data());
    }
    append_to_root(remainder, nodes)
}

/// Reject fan-out beyond `limit`: false when any constant filter list with
/// OR/IN semantics holds more entries than allowed. An absent tree passes.
pub fn check_filters_limit(tree: Option<&ParseTree>, limit: usize) -> bool {
    let t = match tree {
        Some(t) => t,
        None => return true,
    };
    let mut within = true;
    t.walk(|node| {
        if let TreeNode::ConstantFilter(cf) = node.data() {
            if cf.has_or_semantics() && cf.len() > limit {
                within = false;
            }
        }
    });
    within
}

struct CollectFrame<'a> {
    node: &'a ParseTree,
    state: Descend,
    /// An OR sits somewhere on the path above this node.
    or_above: bool,
    /// The immediate parent edge is an AND.
    parent_is_and: bool,
    acc: BTreeMap<FilterKey, usize>,
    seen_children: usize,
}

impl<'a> CollectFrame<'a> {
    fn new(node: &'a ParseTree, or_above: bool, parent_is_and: bool) -> Self {
        CollectFrame {
            node,
            state: Descend::Left,
            or_above,
            parent_is_and,
            acc: BTreeMap::new(),
            seen_children: 0,
        }
    }
}

/// First pass: find every filter leaf that is a conjunct under an AND which
/// itself sits below at least one OR. Completed frames merge upward: an OR
/// parent intersects its branches' candidate sets (a conjunct must appear in
/// every branch to be hoistable), any other parent unions them. The value
/// kept per key is the address of the first instance seen, which later
/// distinguishes "reuse this node" from "drop this duplicate".
fn collect_common_conjunctions(root: &ParseTree) -> BTreeMap<FilterKey, usize> {
    let mut stack = vec![CollectFrame::new(root, false, false)];
    let mut result = BTreeMap::new();

    loop {
        let state = match stack.last() {
            Some(f) => f.state,
            None => break,
        };
        match state {
            Descend::Left => {
                let mut pushed = None;
                if let Some(top) = stack.last_mut() {
                    top.state = Descend::Right;
                    let node = top.node;
                    let oa = top.or_above || is_or_node(node);
                    pushed = node.left().map(|c| (c, oa, is_and_node(node)));
                }
                if let Some((child, oa, pa)) = pushed {
                    stack.push(CollectFrame::new(child, oa, pa));
                }
            }
            Descend::Right => {
                let mut pushed = None;
                if let Some(top) = stack.last_mut() {
                    top.state = Descend::Up;
                    let node = top.node;
                    let oa = top.or_above || is_or_node(node);
                    pushed = node.right().map(|c| (c, oa, is_and_node(node)));
                }
                if let Some((child, oa, pa)) = pushed {
                    stack.push(CollectFrame::new(child, oa, pa));
                }
            }
            Descend::Up => {
                let frame = match stack.pop() {
                    Some(f) => f,
                    None => break,
                };
                let local = if frame.node.is_leaf() {
                    let mut set = BTreeMap::new();
                    if frame.or_above && frame.parent_is_and {
                        if let Some(key) = semantic_key(frame.node) {
                            set.insert(key, node_addr(frame.node));
                        }
                    }
                    set
                } else {
                    frame.acc
                };
                match stack.last_mut() {
                    Some(parent) => {
                        if is_or_node(parent.node) {
                            if parent.seen_children == 0 {
                                parent.acc = local;
                            } else {
                                let keep = std::mem::take(&mut parent.acc);
                                parent.acc = keep
                                    .into_iter()
                                    .filter(|(k, _)| local.contains_key(k))
                                    .collect();
                            }
                        } else {
                            for (k, v) in local {
                                parent.acc.entry(k).or_insert(v);
                            }
                        }
                        parent.seen_children += 1;
                    }
                    None => result = local,
                }
            }
        }
    }
    result
}

/// Disposition of a subtree in the removal pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Subtree stays where it is.
    Leave,
    /// Subtree was consumed; the slot is gone.
    Delete,
    /// The exact hoisted instance; detached for reuse, not freed.
    Unchain,
}

struct RemoveFrame {
    node: Box<ParseTree>,
    state: Descend,
    had_left: bool,
    had_right: bool,
    left_out: Option<(Mark, Option<Box<ParseTree>>)>,
    right_out: Option<(Mark, Option<Box<ParseTree>>)>,
}

impl RemoveFrame {
    fn new(node: Box<ParseTree>) -> Self {
        RemoveFrame {
            node,
            state: Descend::Left,
            had_left: false,
            had_right: false,
            left_out: None,
            right_out: None,
        }
    }
}

/// Second pass: detach each hoisted instance, free semantic duplicates, and
/// splice surviving children up through emptied AND/OR nodes. Returns the
/// remainder tree, which disappears entirely when every leaf was consumed.
fn remove_from_tree(
    root: Box<ParseTree>,
    common: &BTreeMap<FilterKey, usize>,
    hoisted: &mut BTreeMap<FilterKey, Box<ParseTree>>,
) -> Option<Box<ParseTree>> {
    let mut stack = vec![RemoveFrame::new(root)];
    let mut outcome: Option<(Mark, Option<Box<ParseTree>>)> = None;

    loop {
        let state = match stack.last() {
            Some(f) => f.state,
            None => break,
        };
        match state {
            Descend::Left => {
                let mut child = None;
                if let Some(top) = stack.last_mut() {
                    top.state = Descend::Right;
                    child = top.node.take_left();
                    top.had_left = child.is_some();
                }
                if let Some(l) = child {
                    stack.push(RemoveFrame::new(l));
                }
            }
            Descend::Right => {
                let mut child = None;
                if let Some(top) = stack.last_mut() {
                    top.state = Descend::Up;
                    child = top.node.take_right();
                    top.had_right = child.is_some();
                }
                if let Some(r) = child {
                    stack.push(RemoveFrame::new(r));
                }
            }
            Descend::Up => {
                let mut frame = match stack.pop() {
                    Some(f) => f,
                    None => break,
                };
                let delivered = if !frame.had_left && !frame.had_right {
                    classify_leaf(frame.node, common, hoisted)
                } else {
                    combine_children(frame.node, frame.left_out.take(), frame.right_out.take())
                };
                match stack.last_mut() {
                    Some(parent) => {
                        if parent.state == Descend::Right {
                            parent.left_out = Some(delivered);
                        } else {
                            parent.right_out = Some(delivered);
                        }
                    }
                    None => outcome = Some(delivered),
                }
            }
        }
    }

    outcome.and_then(|(_, node)| node)
}

fn classify_leaf(
    node: Box<ParseTree>,
    common: &BTreeMap<FilterKey, usize>,
    hoisted: &mut BTreeMap<FilterKey, Box<ParseTree>>,
) -> (Mark, Option<Box<ParseTree>>) {
    let key = match semantic_key(&node) {
        Some(k) => k,
        None => return (Mark::Leave, Some(node)),
    };
    match common.get(&key) {
        Some(&rep) if rep == node_addr(&node) => {
            hoisted.insert(key, node);
            (Mark::Unchain, None)
        }
        Some(_) => (Mark::Delete, None),
        None => (Mark::Leave, Some(node)),
    }
}

fn combine_children(
    mut node: Box<ParseTree>,
    left: Option<(Mark, Option<Box<ParseTree>>)>,
    right: Option<(Mark, Option<Box<ParseTree>>)>,
) -> (Mark, Option<Box<ParseTree>>) {
    match (left, right) {
        (Some((lm, ln)), Some((rm, rn))) => match (lm == Mark::Leave, rm == Mark::Leave) {
            (true, true) => {
                node.set_left(ln);
                node.set_right(rn);
                (Mark::Leave, Some(node))
            }
            (true, false) => (Mark::Leave, ln),
            (false, true) => (Mark::Leave, rn),
            (false, false) => (Mark::Delete, None),
        },
        (Some((m, n)), None) | (None, Some((m, n))) => {
            debug_assert!(false, "internal node carried exactly one child");
            (m, n)
        }
        (None, None) => (Mark::Leave, Some(node)),
    }
}

/// Reattach the hoisted conjuncts above the remainder as a chain of ANDs.
/// The conjuncts arrive in comparator order and are threaded from the back,
/// so the first conjunct ends up nearest the root.
fn append_to_root(
    remainder: Option<Box<ParseTree>>,
    nodes: Vec<Box<ParseTree>>,
) -> Box<ParseTree> {
    let mut iter = nodes.into_iter().rev();
    let mut acc = match remainder {
        Some(r) => r,
        None => match iter.next() {
            Some(n) => n,
            None => unreachable!("hoist always has at least one conjunct to attach"),
        },
    };
    for n in iter {
        acc = and_node(acc, n);
    }
    acc
}
