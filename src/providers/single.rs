use std::rc::Rc;

use crate::dispatch::Engine;
use crate::eval::{EvalError, EvalSettings, ValueRef, get_root_value, resolve_type_wildcards};
use crate::expression::ItemExpression;
use crate::format::{FormatCode, update_value_dynamic_state};
use crate::providers::{
    ChildrenProvider, INVALID_CHILD_INDEX, UpdateResult, evaluate_expression_and_apply_formatting,
    node_condition_holds, optional_node,
};
use crate::schema::nodes::{ExpandedNode, ItemProvider, SingleNode};

pub const RAW_VIEW_ITEM_NAME: &str = "Raw View";

/// `<Item>`: one named child, re-evaluated on every access.
pub struct SingleItemProvider {
    engine: Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    ctx_val: ValueRef,
    expression: String,
    wildcards: Vec<String>,
}

impl SingleItemProvider {
    fn node(&self) -> &SingleNode {
        match &*self.item_provider {
            ItemProvider::Single(node) => node,
            _ => unreachable!("SingleItemProvider holds a Single node"),
        }
    }

    fn calculate_value(&self) -> Result<ValueRef, EvalError> {
        let node = self.node();
        let settings =
            EvalSettings::with_metadata_getter(Some(&node.name), node.getter.get().map(|getter| {
                getter.call(Vec::new())
            }));
        evaluate_expression_and_apply_formatting(
            &self.engine,
            &self.ctx_val,
            &self.expression,
            &settings,
            &node.expr.view_options,
            &self.wildcards,
            None,
        )
    }
}

impl ChildrenProvider for SingleItemProvider {
    fn num_children(&mut self) -> usize {
        1
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        if self.node().name == name {
            0
        } else {
            INVALID_CHILD_INDEX
        }
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        debug_assert_eq!(index, 0);
        self.calculate_value()
    }
}

pub fn create_single_item_provider(
    engine: &Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    node: &SingleNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<Box<dyn ChildrenProvider>>, EvalError> {
    optional_node(node.optional, (|| {
        if !node_condition_holds(engine, node.condition.as_ref(), ctx_val, wildcards, None)? {
            return Ok(None);
        }
        let expression = resolve_type_wildcards(&node.expr.text, wildcards);
        let provider = SingleItemProvider {
            engine: Rc::clone(engine),
            item_provider,
            ctx_val: ctx_val.clone(),
            expression,
            wildcards: wildcards.to_vec(),
        };
        // evaluate now so a broken item fails the candidate fast
        provider.calculate_value()?;
        Ok(Some(Box::new(provider) as Box<dyn ChildrenProvider>))
    })())
}

/// `<ExpandedItem>`: inlines the children of the target value, hiding any
/// nested `Raw View` entry.
pub struct ExpandedItemProvider {
    expanded_value: ValueRef,
    size: usize,
    has_raw_view: bool,
}

impl ExpandedItemProvider {
    fn new(expanded_value: ValueRef) -> Self {
        let size = expanded_value.num_children();
        let has_raw_view = size != 0
            && expanded_value
                .index_of_child_with_name(RAW_VIEW_ITEM_NAME)
                .is_some();
        Self {
            expanded_value,
            size,
            has_raw_view,
        }
    }
}

impl ChildrenProvider for ExpandedItemProvider {
    fn num_children(&mut self) -> usize {
        if self.has_raw_view {
            self.size - 1
        } else {
            self.size
        }
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        self.expanded_value
            .index_of_child_with_name(name)
            .unwrap_or(INVALID_CHILD_INDEX)
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        let result = self
            .expanded_value
            .child_at_index(index)
            .ok_or_else(|| EvalError::runtime(format!("no expanded child at index {index}")))?;
        update_value_dynamic_state(&result);
        if result.non_synthetic().name().as_deref() == Some(RAW_VIEW_ITEM_NAME) {
            return Err(EvalError::runtime("nested raw view is hidden"));
        }
        Ok(result)
    }

    fn try_update_size(&mut self, _value_non_synth: &ValueRef) -> UpdateResult {
        let old_size = self.size;
        self.size = self.expanded_value.num_children();
        if old_size != self.size {
            UpdateResult::SIZE_UPDATED
        } else {
            UpdateResult::empty()
        }
    }
}

pub fn create_expanded_item_provider(
    engine: &Rc<Engine>,
    node: &ExpandedNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<Box<dyn ChildrenProvider>>, EvalError> {
    optional_node(node.optional, (|| {
        if !node_condition_holds(engine, node.condition.as_ref(), ctx_val, wildcards, None)? {
            return Ok(None);
        }
        let expression = resolve_type_wildcards(&node.expr.text, wildcards);
        let settings = EvalSettings::with_metadata_getter(
            None,
            node.getter.get().map(|getter| getter.call(Vec::new())),
        );
        let value = evaluate_expression_and_apply_formatting(
            engine,
            ctx_val,
            &expression,
            &settings,
            &node.expr.view_options,
            wildcards,
            None,
        )?;
        Ok(Some(
            Box::new(ExpandedItemProvider::new(value)) as Box<dyn ChildrenProvider>
        ))
    })())
}

/// The trailing `Raw View` child: the value itself, re-read from its
/// address with natvis disabled.
pub struct RawViewItemProvider {
    value: ValueRef,
}

impl RawViewItemProvider {
    pub fn new(value: &ValueRef) -> Result<Self, EvalError> {
        let child = match value.address() {
            Some(address) => value.create_value_from_address(
                RAW_VIEW_ITEM_NAME,
                address,
                &value.value_type(),
            )?,
            None => value.non_synthetic(),
        };
        get_root_value(&child).set_format(FormatCode::RAW_VIEW);
        ItemExpression::copy_item_expression(value, &child);
        Ok(Self { value: child })
    }
}

impl ChildrenProvider for RawViewItemProvider {
    fn num_children(&mut self) -> usize {
        1
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        if name == RAW_VIEW_ITEM_NAME {
            0
        } else {
            INVALID_CHILD_INDEX
        }
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        debug_assert_eq!(index, 0);
        Ok(self.value.clone())
    }
}
