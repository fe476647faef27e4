use std::rc::Rc;

use crate::dispatch::Engine;
use crate::eval::{
    EvalError, EvalSettings, ValueRef, eval_condition, eval_expression, resolve_type_wildcards,
};
use crate::expression::ItemExpression;
use crate::providers::list::get_ptr_value;
use crate::providers::nodes::NodeCache;
use crate::schema::nodes::TreeItemsNode;

/// A parent stack deeper than this means a malformed tree (2^100 nodes
/// cannot be real).
const MAX_TREE_DEPTH: usize = 100;

/// Iterative in-order traversal of a `<TreeItems>` binary tree, caching
/// dereferenced nodes. A per-node condition prunes subtrees.
pub(crate) struct TreeWalker {
    engine: Rc<Engine>,
    next_node_pointer: ValueRef,
    parent_nodes_stack: Vec<ValueRef>,
    left_expression: String,
    right_expression: String,
    node_condition: Option<String>,
}

impl TreeWalker {
    pub(crate) fn new(
        engine: &Rc<Engine>,
        node: &TreeItemsNode,
        ctx_val: &ValueRef,
        wildcards: &[String],
    ) -> Result<Self, EvalError> {
        let head_expression = resolve_type_wildcards(&node.head_pointer, wildcards);
        let head_pointer = eval_expression(
            engine.session(),
            ctx_val,
            &head_expression,
            &EvalSettings::with_metadata(None),
            None,
        )?;
        let node_condition = node
            .value_node
            .condition
            .as_ref()
            .and_then(|condition| condition.condition.as_deref())
            .filter(|condition| !condition.is_empty())
            .map(|condition| resolve_type_wildcards(condition, wildcards));
        Ok(Self {
            engine: Rc::clone(engine),
            next_node_pointer: head_pointer,
            parent_nodes_stack: Vec::new(),
            left_expression: resolve_type_wildcards(&node.left_pointer, wildcards),
            right_expression: resolve_type_wildcards(&node.right_pointer, wildcards),
            node_condition,
        })
    }

    fn check_node_condition(&self, node: &ValueRef) -> Result<bool, EvalError> {
        let Some(condition) = &self.node_condition else {
            return Ok(true);
        };
        let dereferenced = node.non_synthetic().dereference()?;
        eval_condition(
            self.engine.session(),
            &dereferenced,
            Some(condition),
            None,
        )
    }

    pub(crate) fn has_uncalculated(&mut self) -> Result<bool, EvalError> {
        if get_ptr_value(&self.next_node_pointer) != 0
            && self.check_node_condition(&self.next_node_pointer)?
        {
            return Ok(true);
        }
        Ok(!self.parent_nodes_stack.is_empty())
    }

    pub(crate) fn calculate_nodes(
        &mut self,
        cache: &mut NodeCache,
        stop_at: usize,
    ) -> Result<(), EvalError> {
        while self.has_uncalculated()? && cache.next_node_index() <= stop_at {
            while get_ptr_value(&self.next_node_pointer) != 0
                && self.check_node_condition(&self.next_node_pointer)?
            {
                if self.parent_nodes_stack.len() > MAX_TREE_DEPTH {
                    return Err(EvalError::runtime("Invalid tree"));
                }
                self.parent_nodes_stack.push(self.next_node_pointer.clone());
                let dereferenced =
                    ItemExpression::dereference(&self.next_node_pointer.non_synthetic())?;
                self.next_node_pointer = eval_expression(
                    self.engine.session(),
                    &dereferenced,
                    &self.left_expression,
                    &EvalSettings::with_metadata(None),
                    None,
                )?;
            }

            let Some(parent) = self.parent_nodes_stack.pop() else {
                break;
            };
            self.next_node_pointer = parent;
            let dereferenced =
                ItemExpression::dereference(&self.next_node_pointer.non_synthetic())?;
            cache.set_calculated(dereferenced.clone())?;
            self.next_node_pointer = eval_expression(
                self.engine.session(),
                &dereferenced,
                &self.right_expression,
                &EvalSettings::with_metadata(None),
                None,
            )?;
        }
        Ok(())
    }
}
