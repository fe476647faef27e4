use std::collections::HashMap;
use std::rc::Rc;

use crate::dispatch::Engine;
use crate::eval::{EvalError, EvalSettings, ValueRef};
use crate::eval::resolve_type_wildcards;
use crate::expression::ItemExpression;
use crate::methods::SyntheticMethod;
use crate::providers::list::ListWalker;
use crate::providers::tree::TreeWalker;
use crate::providers::{
    ChildrenProvider, INVALID_CHILD_INDEX, UpdateResult, calculate_items_provider_size,
    evaluate_expression_and_apply_formatting, node_condition_holds, optional_node,
    parse_child_index_name,
};
use crate::schema::nodes::ItemProvider;
use crate::schema::viz::{FormatOptions, InterpolatedString};

/// Lazily filled cache of container nodes. With a known size the slots are
/// created empty and computed on demand; without one the walker runs up to
/// the engine's max-children cap, remembering whether more nodes exist.
pub struct NodeCache {
    engine: Rc<Engine>,
    ctx_val: ValueRef,
    next_node_index: usize,
    cache: Vec<Option<ValueRef>>,
    pub cache_size: usize,
    pub has_more: bool,
    custom_name: Option<(InterpolatedString, Vec<String>)>,
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl NodeCache {
    fn new(
        engine: &Rc<Engine>,
        ctx_val: &ValueRef,
        custom_name: Option<(InterpolatedString, Vec<String>)>,
    ) -> Self {
        Self {
            engine: Rc::clone(engine),
            ctx_val: ctx_val.clone(),
            next_node_index: 0,
            cache: Vec::new(),
            cache_size: 0,
            has_more: false,
            custom_name,
            names: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn next_node_index(&self) -> usize {
        self.next_node_index
    }

    #[must_use]
    pub fn has_custom_names(&self) -> bool {
        self.custom_name.is_some()
    }

    #[must_use]
    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Record the next walked node, filling a reserved slot or growing the
    /// cache.
    pub fn set_calculated(&mut self, node: ValueRef) -> Result<(), EvalError> {
        if let Some((custom_name, wildcards)) = &self.custom_name {
            let name = self
                .engine
                .eval_interpolated_string(custom_name, &node, wildcards, None)?;
            self.name_to_index.insert(name.clone(), self.next_node_index);
            self.names.push(name);
        }
        if self.next_node_index < self.cache.len() {
            debug_assert!(self.cache[self.next_node_index].is_none());
            self.cache[self.next_node_index] = Some(node);
        } else {
            debug_assert_eq!(self.next_node_index, self.cache.len());
            self.cache.push(Some(node));
        }
        self.next_node_index += 1;
        Ok(())
    }
}

enum Walker {
    List(ListWalker),
    Tree(TreeWalker),
}

impl Walker {
    fn calculate_nodes(&mut self, cache: &mut NodeCache, stop_at: usize) -> Result<(), EvalError> {
        match self {
            Self::List(walker) => walker.calculate_nodes(cache, stop_at),
            Self::Tree(walker) => walker.calculate_nodes(cache, stop_at),
        }
    }

    fn has_uncalculated(&mut self) -> Result<bool, EvalError> {
        match self {
            Self::List(walker) => Ok(walker.has_uncalculated()),
            Self::Tree(walker) => walker.has_uncalculated(),
        }
    }
}

/// Node cache plus the container-specific walker filling it.
pub struct NodesProvider {
    cache: NodeCache,
    walker: Walker,
}

impl NodesProvider {
    fn prepare(&mut self, known_size: Option<usize>) -> Result<(), EvalError> {
        match known_size {
            Some(size) => {
                // empty cache, calculated lazily
                self.cache.cache = vec![None; size];
                self.cache.has_more = false;
                self.cache.cache_size = size;
            }
            None => {
                let max_children = self.cache.engine.session().settings.max_num_children.get();
                self.walker.calculate_nodes(&mut self.cache, max_children)?;
                self.cache.has_more = self.walker.has_uncalculated()?
                    && self.cache.next_node_index > max_children;
                self.cache.cache_size = self.cache.cache.len();
            }
        }
        Ok(())
    }

    fn ensure_node_calculated(&mut self, index: usize) -> Result<(), EvalError> {
        if self.cache.cache.get(index).is_some_and(Option::is_some) {
            return Ok(());
        }
        self.walker.calculate_nodes(&mut self.cache, index)?;
        if let Some(Some(node)) = self.cache.cache.get(index) {
            ItemExpression::copy_item_expression(&self.cache.ctx_val, node);
        }
        Ok(())
    }

    fn node_at(&self, index: usize) -> Option<ValueRef> {
        self.cache.cache.get(index).cloned().flatten()
    }

    /// When a synthetic getter will rebuild item paths as getter calls, the
    /// cached nodes inherit the context expression instead of their own.
    fn update_cache_for_synthetic_getter(&mut self, this_ctx: &ValueRef, getter_set: bool) {
        if !getter_set {
            return;
        }
        for node in self.cache.cache.iter().flatten() {
            ItemExpression::copy_item_expression(this_ctx, node);
        }
    }
}

/// The provider shared by `<LinkedListItems>` and `<TreeItems>`: walked
/// nodes are cached, child values come from evaluating the value expression
/// against each node.
pub struct CustomItemsProvider {
    engine: Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    nodes_provider: NodesProvider,
    value_expression: String,
    value_opts: FormatOptions,
    wildcards: Vec<String>,
    element_getter: Option<SyntheticMethod>,
}

impl ChildrenProvider for CustomItemsProvider {
    fn num_children(&mut self) -> usize {
        self.nodes_provider.cache.cache_size
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        if self.nodes_provider.cache.has_custom_names() {
            return self
                .nodes_provider
                .cache
                .index_of_name(name)
                .unwrap_or(INVALID_CHILD_INDEX);
        }
        parse_child_index_name(name)
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        if index >= self.nodes_provider.cache.cache_size {
            return Err(EvalError::runtime(format!(
                "Index {index} is out of range [0; {})",
                self.nodes_provider.cache.cache_size
            )));
        }
        self.nodes_provider.ensure_node_calculated(index)?;
        let node_value = self
            .nodes_provider
            .node_at(index)
            .ok_or_else(|| EvalError::runtime(format!("Node {index} was not evaluated")))?;

        let name = match self.nodes_provider.cache.name_of(index) {
            Some(name) => name.to_string(),
            None => format!("[{index}]"),
        };
        let getter_call = self
            .element_getter
            .as_ref()
            .map(|getter| getter.call(vec![index.to_string()]));
        let settings = EvalSettings::with_metadata_getter(Some(&name), getter_call);
        evaluate_expression_and_apply_formatting(
            &self.engine,
            &node_value,
            &self.value_expression,
            &settings,
            &self.value_opts,
            &self.wildcards,
            None,
        )
    }

    fn try_update_size(&mut self, value_non_synth: &ValueRef) -> UpdateResult {
        let old_size = self.nodes_provider.cache.cache_size;
        let size_nodes = match &*self.item_provider {
            ItemProvider::LinkedListItems(node) => &node.size_nodes,
            ItemProvider::TreeItems(node) => &node.size_nodes,
            _ => return UpdateResult::empty(),
        };
        let Ok(new_size) = calculate_items_provider_size(
            &self.engine,
            size_nodes,
            value_non_synth,
            &self.wildcards,
        ) else {
            return UpdateResult::empty();
        };
        let Ok(nodes_provider) = create_nodes_provider(
            &self.engine,
            &self.item_provider,
            value_non_synth,
            &self.wildcards,
            new_size,
        ) else {
            return UpdateResult::empty();
        };
        self.nodes_provider = nodes_provider;
        if old_size != self.nodes_provider.cache.cache_size {
            UpdateResult::SIZE_UPDATED
        } else {
            UpdateResult::empty()
        }
    }
}

/// Assemble the node walker for a linked-list or tree items block and run
/// its eager pass (when the size is unknown).
pub(crate) fn create_nodes_provider(
    engine: &Rc<Engine>,
    item_provider: &Rc<ItemProvider>,
    ctx_val: &ValueRef,
    wildcards: &[String],
    size: Option<usize>,
) -> Result<NodesProvider, EvalError> {
    let (walker, custom_name, getter_set) = match &**item_provider {
        ItemProvider::LinkedListItems(node) => {
            let walker = ListWalker::new(engine, node, ctx_val, wildcards)?;
            let custom_name = node
                .value_node
                .name
                .clone()
                .map(|name| (name, wildcards.to_vec()));
            (Walker::List(walker), custom_name, node.getter.is_set())
        }
        ItemProvider::TreeItems(node) => {
            let walker = TreeWalker::new(engine, node, ctx_val, wildcards)?;
            let custom_name = node
                .value_node
                .name
                .clone()
                .map(|name| (name, wildcards.to_vec()));
            (Walker::Tree(walker), custom_name, node.getter.is_set())
        }
        _ => {
            return Err(EvalError::setup(
                "LinkedListItems or TreeItems node expected",
            ));
        }
    };

    let cache = NodeCache::new(engine, ctx_val, custom_name);
    let mut nodes_provider = NodesProvider { cache, walker };
    nodes_provider.prepare(size)?;
    nodes_provider.update_cache_for_synthetic_getter(ctx_val, getter_set);
    Ok(nodes_provider)
}

/// Create the provider for a `<LinkedListItems>` or `<TreeItems>` block.
pub fn create_custom_items_provider(
    engine: &Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<Box<dyn ChildrenProvider>>, EvalError> {
    let optional = item_provider.optional();
    optional_node(optional, (|| {
        if !node_condition_holds(engine, item_provider.condition(), ctx_val, wildcards, None)? {
            return Ok(None);
        }
        let (size_nodes, value_expr, value_opts, getter) = match &*item_provider {
            ItemProvider::LinkedListItems(node) => (
                &node.size_nodes,
                &node.value_node.expr,
                node.value_node.expr.view_options.clone(),
                node.getter.get(),
            ),
            ItemProvider::TreeItems(node) => (
                &node.size_nodes,
                &node.value_node.expr,
                node.value_node.expr.view_options.clone(),
                node.getter.get(),
            ),
            _ => {
                return Err(EvalError::setup(
                    "LinkedListItems or TreeItems node expected",
                ));
            }
        };
        let size = calculate_items_provider_size(engine, size_nodes, ctx_val, wildcards)?;
        let value_expression = resolve_type_wildcards(&value_expr.text, wildcards);
        let nodes_provider =
            create_nodes_provider(engine, &item_provider, ctx_val, wildcards, size)?;
        Ok(Some(Box::new(CustomItemsProvider {
            engine: Rc::clone(engine),
            item_provider: Rc::clone(&item_provider),
            nodes_provider,
            value_expression,
            value_opts,
            wildcards: wildcards.to_vec(),
            element_getter: getter,
        }) as Box<dyn ChildrenProvider>))
    })())
}
