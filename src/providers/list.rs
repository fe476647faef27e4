use std::rc::Rc;

use crate::dispatch::Engine;
use crate::eval::{EvalError, EvalSettings, ValueRef, eval_expression, resolve_type_wildcards};
use crate::expression::ItemExpression;
use crate::providers::nodes::NodeCache;
use crate::schema::nodes::LinkedListItemsNode;

/// Unsigned pointer value of a node, 0 for anything that is not a valid
/// pointer.
pub(crate) fn get_ptr_value(node: &ValueRef) -> u64 {
    let non_synth = node.non_synthetic();
    if !non_synth.is_valid() || !non_synth.value_type().is_pointer() {
        return 0;
    }
    non_synth.value_as_unsigned().unwrap_or(0)
}

/// Cursor over the node pointers of a linked list.
struct LinkedListIterator {
    engine: Rc<Engine>,
    node_value: ValueRef,
    next_expression: String,
}

impl LinkedListIterator {
    fn is_valid(&self) -> bool {
        get_ptr_value(&self.node_value) != 0
    }

    fn cur_ptr(&self) -> u64 {
        get_ptr_value(&self.node_value)
    }

    fn cur_value(&self) -> Result<ValueRef, EvalError> {
        ItemExpression::dereference(&self.node_value.non_synthetic())
    }

    fn move_to_next(&mut self) -> Result<(), EvalError> {
        let current = self.cur_value()?;
        self.node_value = eval_expression(
            self.engine.session(),
            &current,
            &self.next_expression,
            &EvalSettings::with_metadata(None),
            None,
        )?;
        Ok(())
    }
}

/// Walks a `<LinkedListItems>` chain, caching dereferenced nodes. The only
/// cycle detection is a one-step return to the head pointer; deeper cycles
/// run into the max-children cap.
pub(crate) struct ListWalker {
    iterator: LinkedListIterator,
    head_node_value: u64,
}

impl ListWalker {
    pub(crate) fn new(
        engine: &Rc<Engine>,
        node: &LinkedListItemsNode,
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
        let next_expression = resolve_type_wildcards(&node.next_pointer, wildcards);
        let head_node_value = get_ptr_value(&head_pointer);
        Ok(Self {
            iterator: LinkedListIterator {
                engine: Rc::clone(engine),
                node_value: head_pointer,
                next_expression,
            },
            head_node_value,
        })
    }

    pub(crate) fn has_uncalculated(&self) -> bool {
        self.iterator.is_valid()
    }

    pub(crate) fn calculate_nodes(
        &mut self,
        cache: &mut NodeCache,
        stop_at: usize,
    ) -> Result<(), EvalError> {
        while self.has_uncalculated() && cache.next_node_index() <= stop_at {
            let next_value = self.iterator.cur_value()?;
            cache.set_calculated(next_value)?;
            self.iterator.move_to_next()?;
            if self.iterator.is_valid() && self.iterator.cur_ptr() == self.head_node_value {
                // weak loop detection: only a direct return to the head
                break;
            }
        }
        Ok(())
    }
}
