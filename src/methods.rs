use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::cpp;
use crate::intrinsics::{INTRINSIC_NAME_PREFIX, IntrinsicsScope};
use crate::schema::nodes::{
    ArrayItemsNode, IndexListItemsNode, IndexNode, ItemProvider, LinkedListItemsNode,
    SyntheticGetterSlot, TreeItemsNode, ValuePointerNode,
};
use crate::schema::viz::{TypeViz, TypeVizName, TypeVizSmartPointer, TypeVizStringView,
    SmartPointerUsage, TypeVizCondition};
use crate::type_traits;

/// Identifier of a synthesised helper the debugger will know: either a
/// named method or the subscript operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticMethod {
    Named(String),
    SubscriptOperator,
}

impl SyntheticMethod {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::SubscriptOperator => "operator[]",
        }
    }

    #[must_use]
    pub fn call(&self, args: Vec<String>) -> SyntheticMethodCall {
        SyntheticMethodCall {
            method: self.clone(),
            args,
        }
    }
}

/// A call to a synthesised method, rendered against a `this` reference.
#[derive(Debug, Clone)]
pub struct SyntheticMethodCall {
    method: SyntheticMethod,
    args: Vec<String>,
}

impl SyntheticMethodCall {
    #[must_use]
    pub fn make_call_expr(&self, this_reference: &str) -> String {
        let args = self.args.join(", ");
        match &self.method {
            SyntheticMethod::Named(name) => format!("{this_reference}.{name}({args})"),
            SyntheticMethod::SubscriptOperator => format!("{this_reference}[{args}]"),
        }
    }
}

/// The unit handed to the debugger's top-level declaration API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticMethodDefinition {
    pub full_name: String,
    pub body: String,
    pub name_uses_regex: bool,
}

const INTERNAL_INTRINSIC_PREFIX: &str = "_jb$intrinsic$internal$";

static INVALID_NAME_CHAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w$]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptStatus {
    Required,
    AlreadyExists,
    Forbidden,
}

#[derive(Debug, Clone)]
struct TypeName {
    name: String,
    has_wildcards: bool,
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A `ValuePointer` or indexed `ValueNode` viewed uniformly by the
/// subscript synthesis.
#[derive(Clone, Copy)]
enum IndexableNode<'node> {
    ValuePointer(&'node ValuePointerNode),
    Index(&'node IndexNode),
}

impl<'node> IndexableNode<'node> {
    fn expr_text(&self) -> &str {
        match self {
            Self::ValuePointer(node) => &node.expr.text,
            Self::Index(node) => &node.expr.text,
        }
    }

    fn condition(&self) -> Option<&TypeVizCondition> {
        match self {
            Self::ValuePointer(node) => node.condition.as_ref(),
            Self::Index(node) => node.condition.as_ref(),
        }
    }

    fn getter(&self) -> &'node SyntheticGetterSlot {
        match self {
            Self::ValuePointer(node) => &node.getter,
            Self::Index(node) => &node.getter,
        }
    }
}

fn make_internal_name(name: &str) -> String {
    format!("jb$internal$name$${name}$$")
}

fn mangle_name(name: &str) -> String {
    INVALID_NAME_CHAR.replace_all(name, "$").into_owned()
}

fn fix_type_regex(type_regex: &str) -> String {
    let type_regex = type_regex.strip_prefix('^').unwrap_or(type_regex);
    let type_regex = type_regex.strip_suffix('$').unwrap_or(type_regex);
    let mut fixed = type_regex.to_string();
    while fixed.contains(">>") {
        fixed = fixed.replace(">>", "> >");
    }
    fixed
}

/// Rewrite a visualizer expression for registration: intrinsic calls go to
/// their internal spellings, `$Tn` becomes the `%{n+1}` regex-group
/// placeholder (`%1` is the whole matched type).
fn prepare_expr(expr: &str) -> String {
    let expr = expr.replace(INTRINSIC_NAME_PREFIX, INTERNAL_INTRINSIC_PREFIX);
    let (substituted, all_substituted) =
        cpp::substitute_wildcards(&expr, |index| Some(format!("%{}", index + 2)));
    if !all_substituted {
        debug!("There are unsubstituted wildcards left in the expression '{substituted}'");
    }
    substituted
}

fn sha256_hex(data: &str) -> String {
    Sha256::digest(data.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Walks registered visualizers and synthesises the auxiliary C++ method
/// definitions (subscript operators, getters, smart-pointer and string
/// comparators) the debugger declares lazily, so natvis expressions compile
/// to cheap member calls.
#[derive(Default)]
pub struct TopLevelMethods {
    /// type -> method name -> expression -> collision id
    known_method_names: HashMap<String, HashMap<String, HashMap<String, usize>>>,
    known_intrinsics: HashSet<(String, String, String)>,
    private_getters: HashMap<String, String>,
    subscript_operators_in_types: HashMap<String, String>,
    definitions: Vec<SyntheticMethodDefinition>,
}

impl TopLevelMethods {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_definitions(self) -> Vec<SyntheticMethodDefinition> {
        self.definitions
    }

    pub fn collect_from(&mut self, type_regex: &str, type_viz: &TypeViz, viz_name: &TypeVizName) {
        let type_name = TypeName {
            name: fix_type_regex(type_regex),
            has_wildcards: viz_name.has_wildcard(),
        };

        self.add_global_intrinsics(&type_viz.global_intrinsics);
        self.add_type_intrinsics(&type_name, &type_viz.type_intrinsics);

        let mut string_methods: Option<Vec<SyntheticMethodDefinition>> = None;
        for item_provider in type_viz.item_providers.iter().flatten() {
            match &**item_provider {
                ItemProvider::Single(node) => self.add_single_item_getter(
                    &type_name,
                    Some(node.name.as_str()),
                    &node.expr.text,
                    &node.getter,
                ),
                ItemProvider::Expanded(node) => {
                    self.add_single_item_getter(&type_name, None, &node.expr.text, &node.getter);
                }
                ItemProvider::ArrayItems(node) => {
                    self.add_array_methods(&type_name, node);
                    if string_methods.is_none() {
                        let methods = self.string_methods_from_array_items(&type_name, node);
                        if !methods.is_empty() {
                            self.definitions.extend(methods.iter().cloned());
                            string_methods = Some(methods);
                        }
                    }
                }
                ItemProvider::IndexListItems(node) => self.add_index_list_methods(&type_name, node),
                ItemProvider::LinkedListItems(node) => {
                    self.add_linked_list_method(&type_name, node);
                }
                ItemProvider::TreeItems(node) => self.add_tree_method(&type_name, node),
                ItemProvider::CustomListItems(_) => {}
            }
        }

        if let Some(smart_pointer) = &type_viz.smart_pointer {
            let methods = self.smart_pointer_methods(&type_name, smart_pointer);
            self.definitions.extend(methods);
        }
        if string_methods.is_none() {
            let methods = Self::string_methods_from_string_view(&type_name, &type_viz.string_views);
            self.definitions.extend(methods);
        }
    }

    /// Reserve a unique getter name for `(type, method, expression)`;
    /// colliding names get a numeric suffix. Returns whether the expression
    /// was seen for the first time (and so needs a definition emitted).
    fn add_getter_with_unique_name(
        &mut self,
        type_name: &TypeName,
        getter_slot: &SyntheticGetterSlot,
        method_name: &str,
        method_expr: &str,
    ) -> bool {
        let method_expressions = self
            .known_method_names
            .entry(type_name.name.clone())
            .or_default()
            .entry(method_name.to_string())
            .or_default();
        let new_method_name_id = method_expressions.len();
        let method_name_id = *method_expressions
            .entry(method_expr.to_string())
            .or_insert(new_method_name_id);
        let unique_name = if method_name_id != 0 {
            format!("{method_name}{method_name_id}")
        } else {
            method_name.to_string()
        };
        getter_slot.set_if_empty(SyntheticMethod::Named(unique_name));
        new_method_name_id == method_name_id
    }

    fn try_declare_subscript_operator(
        &mut self,
        type_name: &TypeName,
        method_expr: &str,
    ) -> SubscriptStatus {
        if let Some(declared) = self.subscript_operators_in_types.get(&type_name.name) {
            return if declared == method_expr {
                SubscriptStatus::AlreadyExists
            } else {
                SubscriptStatus::Forbidden
            };
        }
        self.subscript_operators_in_types
            .insert(type_name.name.clone(), method_expr.to_string());
        SubscriptStatus::Required
    }

    fn join_operator_regex_and_declarations(
        type_name: &TypeName,
        operators: &[(String, String)],
    ) -> Vec<SyntheticMethodDefinition> {
        if type_name.has_wildcards {
            let operator_names = operators
                .iter()
                .map(|(op, _)| regex::escape(op))
                .collect::<Vec<_>>()
                .join("|");
            let full_name = format!("^({type_name})::operator(?:{operator_names})$");
            let body = operators
                .iter()
                .map(|(_, decl)| decl.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            return vec![SyntheticMethodDefinition {
                full_name,
                body,
                name_uses_regex: true,
            }];
        }
        operators
            .iter()
            .map(|(op, decl)| SyntheticMethodDefinition {
                full_name: format!("{type_name}::operator{op}"),
                body: decl.replace("%1", &type_name.name),
                name_uses_regex: false,
            })
            .collect()
    }

    fn smart_pointer_methods(
        &mut self,
        type_name: &TypeName,
        smart_pointer: &TypeVizSmartPointer,
    ) -> Vec<SyntheticMethodDefinition> {
        let expr = prepare_expr(&smart_pointer.expression.text);
        let mut methods =
            Self::join_operator_regex_and_declarations(type_name, &Self::minimal_operators(&expr));
        // 'Indexable' operators go separately: `operator+`/`operator-` need
        // a copy constructor the evaluator may fail to find
        if smart_pointer.usage == SmartPointerUsage::Indexable {
            let indexable = self.indexable_operators(type_name, &expr);
            if !indexable.is_empty() {
                methods.extend(Self::join_operator_regex_and_declarations(
                    type_name, &indexable,
                ));
            }
        }
        methods
    }

    fn minimal_operators(expr: &str) -> Vec<(String, String)> {
        let other = make_internal_name("other");
        vec![
            (
                "->".to_string(),
                format!("auto %1::operator->() const -> decltype({expr}) {{ return {expr}; }}"),
            ),
            (
                "*".to_string(),
                format!(
                    "auto %1::operator*() const -> decltype((*({expr}))) {{ return (*({expr})); }}"
                ),
            ),
            (
                "!".to_string(),
                format!("bool %1::operator!() const {{ return !({expr}); }}"),
            ),
            (
                "==".to_string(),
                format!(
                    "bool %1::operator==(const ::%1 &{other}) const {{ return ({expr}) == {other}.operator->(); }}"
                ),
            ),
            (
                "!=".to_string(),
                format!(
                    "bool %1::operator!=(const ::%1 &{other}) const {{ return ({expr}) != {other}.operator->(); }}"
                ),
            ),
        ]
    }

    fn indexable_operators(
        &mut self,
        type_name: &TypeName,
        expr: &str,
    ) -> Vec<(String, String)> {
        let index = make_internal_name("index");
        let mut operators = Vec::new();
        let subscript_body = format!("return (({expr})[{index}]);");
        // Even a FORBIDDEN status adds the operator: it is not wired as a
        // synthetic getter, and a redeclaration is simply ignored.
        if self.try_declare_subscript_operator(type_name, &subscript_body)
            != SubscriptStatus::AlreadyExists
        {
            operators.push((
                "[]".to_string(),
                format!("decltype(auto) %1::operator[](long long {index}) const {{ {subscript_body} }}"),
            ));
        }
        // Only trivial property accesses like '_Ptr' can move; expressions
        // like '_Ptr->_Isnil ? nullptr : &_Ptr->_Myval' cannot.
        if cpp::is_trivial_expression(expr) {
            let offset = make_internal_name("offset");
            let result = make_internal_name("result");
            operators.push((
                "+".to_string(),
                format!(
                    "::%1 %1::operator+(long long {offset}) const {{ %1 {result} = *this; {result}.{expr} += {offset}; return {result}; }}"
                ),
            ));
            operators.push((
                "-".to_string(),
                format!(
                    "::%1 %1::operator-(long long {offset}) const {{ %1 {result} = *this; {result}.{expr} -= {offset}; return {result}; }}"
                ),
            ));
        }
        operators
    }

    fn indexable_node_expression(node: IndexableNode<'_>, index_param: &str) -> String {
        let expr = prepare_expr(node.expr_text());
        match node {
            IndexableNode::Index(_) => expr.replace("$i", index_param),
            IndexableNode::ValuePointer(_) => format!("({expr})[{index_param}]"),
        }
    }

    fn subscript_operator_body(nodes: &[IndexableNode<'_>], index_param: &str) -> String {
        let mut lines = String::new();
        for (index, node) in nodes.iter().enumerate() {
            let expr = Self::indexable_node_expression(*node, index_param);
            let ignore_condition = index + 1 == nodes.len();
            let condition = node
                .condition()
                .and_then(|condition| condition.condition.as_deref())
                .filter(|condition| !ignore_condition && !condition.is_empty());
            match condition {
                Some(condition) => {
                    let mut condition_expr = prepare_expr(condition);
                    if matches!(node, IndexableNode::Index(_)) {
                        condition_expr = condition_expr.replace("$i", index_param);
                    }
                    lines.push_str(&format!("if ({condition_expr}) "));
                    lines.push_str(&format!("return ({expr});\n"));
                }
                None => {
                    lines.push_str(&format!("return ({expr});\n"));
                    return lines;
                }
            }
        }
        lines
    }

    /// A mutable helper plus a `const` forwarder casting `const` away, so
    /// the getter compiles against const and non-const objects alike.
    fn make_mutable_const_method(
        type_name: &TypeName,
        method_name: &str,
        body: &str,
        params: &[(String, String)],
        mutable_method_prefix: Option<&str>,
    ) -> SyntheticMethodDefinition {
        let param_list = params
            .iter()
            .map(|(param_type, param_name)| format!("{param_type} {param_name}"))
            .collect::<Vec<_>>()
            .join(", ");
        let arg_list = params
            .iter()
            .map(|(_, param_name)| param_name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let mutable_method = make_internal_name(&format!(
            "{}$mutable",
            mutable_method_prefix.unwrap_or(method_name)
        ));
        if type_name.has_wildcards {
            SyntheticMethodDefinition {
                full_name: format!("^({type_name})::{}$", regex::escape(method_name)),
                body: format!(
                    "decltype(auto) %1::{mutable_method}({param_list}) {{ {body} }}\n\
                     decltype(auto) %1::{method_name}({param_list}) const {{ return const_cast<::%1 *>(this)->{mutable_method}({arg_list}); }}"
                ),
                name_uses_regex: true,
            }
        } else {
            SyntheticMethodDefinition {
                full_name: format!("{type_name}::{method_name}"),
                body: format!(
                    "decltype(auto) {type_name}::{mutable_method}({param_list}) {{ {body} }}\n\
                     decltype(auto) {type_name}::{method_name}({param_list}) const {{ return const_cast<::{type_name} *>(this)->{mutable_method}({arg_list}); }}"
                ),
                name_uses_regex: false,
            }
        }
    }

    fn container_method_definition(
        type_name: &TypeName,
        getter_slot: &SyntheticGetterSlot,
        body: &str,
        index_param: &str,
        mutable_method_prefix: Option<&str>,
    ) -> SyntheticMethodDefinition {
        let method_name = getter_slot
            .get()
            .map(|method| method.name().to_string())
            .unwrap_or_default();
        let params = vec![("long long".to_string(), index_param.to_string())];
        Self::make_mutable_const_method(
            type_name,
            &method_name,
            body,
            &params,
            mutable_method_prefix,
        )
    }

    fn add_indexed_methods(
        &mut self,
        type_name: &TypeName,
        provider_getter: &SyntheticGetterSlot,
        item_nodes: &[IndexableNode<'_>],
    ) {
        let index_param = make_internal_name("index");
        if item_nodes.len() == 1 || type_traits::is_subscript_operator_required(&type_name.name) {
            let body = Self::subscript_operator_body(item_nodes, &index_param);
            let subscript_status = self.try_declare_subscript_operator(type_name, &body);
            if subscript_status != SubscriptStatus::Forbidden {
                provider_getter.set_if_empty(SyntheticMethod::SubscriptOperator);
                if subscript_status == SubscriptStatus::Required {
                    let definition = Self::container_method_definition(
                        type_name,
                        provider_getter,
                        &body,
                        &index_param,
                        Some("op$subscript"),
                    );
                    self.definitions.push(definition);
                }
                return;
            }
        }

        for node in item_nodes {
            let expr = Self::indexable_node_expression(*node, &index_param);
            if self.add_getter_with_unique_name(type_name, node.getter(), "_get$", &expr) {
                let body = format!("return ({expr});");
                let definition = Self::container_method_definition(
                    type_name,
                    node.getter(),
                    &body,
                    &index_param,
                    None,
                );
                self.definitions.push(definition);
            }
        }
    }

    fn add_array_methods(&mut self, type_name: &TypeName, array_items: &ArrayItemsNode) {
        let nodes: Vec<IndexableNode<'_>> = array_items
            .value_pointer_nodes
            .iter()
            .map(IndexableNode::ValuePointer)
            .collect();
        self.add_indexed_methods(type_name, &array_items.getter, &nodes);
    }

    fn add_index_list_methods(&mut self, type_name: &TypeName, index_list: &IndexListItemsNode) {
        let nodes: Vec<IndexableNode<'_>> = index_list
            .value_nodes
            .iter()
            .map(IndexableNode::Index)
            .collect();
        self.add_indexed_methods(type_name, &index_list.getter, &nodes);
    }

    /// Complex sub-expressions become content-addressed private getters so
    /// `next`/`left`/`right`/value accessors compile as cheap member calls.
    fn try_as_internal_getter(&mut self, purpose: &str, expr: &str) -> String {
        let expr = prepare_expr(&cpp::simplify_cpp_expression(expr));
        if cpp::is_trivial_expression(&expr) {
            return expr;
        }
        let getter = make_internal_name(&format!("private$get${purpose}${}", sha256_hex(&expr)));
        if !self.private_getters.contains_key(&getter) {
            let any_type = TypeName {
                name: "(.*)".to_string(),
                has_wildcards: true,
            };
            self.definitions.push(Self::make_mutable_const_method(
                &any_type,
                &getter,
                &format!("return ({expr});"),
                &[],
                None,
            ));
            self.private_getters.insert(getter.clone(), expr);
        }
        format!("{getter}()")
    }

    /// A method walking `index` steps along the next pointer and returning
    /// the node value.
    fn add_linked_list_method(&mut self, type_name: &TypeName, list_items: &LinkedListItemsNode) {
        let index_param = make_internal_name("index");
        let next_ptr = self.try_as_internal_getter("list$next", &list_items.next_pointer);
        let get_value = self.try_as_internal_getter("list$value", &list_items.value_node.expr.text);
        let head = prepare_expr(&list_items.head_pointer);
        let body = format!(
            "auto it = {head};\nwhile ({index_param}-- > 0) it = it->{next_ptr};\nreturn (it->{get_value});\n"
        );
        if self.add_getter_with_unique_name(type_name, &list_items.getter, "_get$", &body) {
            let definition = Self::container_method_definition(
                type_name,
                &list_items.getter,
                &body,
                &index_param,
                None,
            );
            self.definitions.push(definition);
        }
    }

    /// A recursive in-order helper returning the `index`-th tree element.
    fn add_tree_method(&mut self, type_name: &TypeName, tree_items: &TreeItemsNode) {
        let index_param = make_internal_name("index");
        let counter = make_internal_name("element_counter");
        let node = make_internal_name("node");
        let found = make_internal_name("found");
        let inorder_method = make_internal_name("get_inorder_element");
        let node_ptr_type = make_internal_name("NodePtr");
        let inorder_helper_type = make_internal_name("InorderHelper");

        let head_ptr = prepare_expr(&tree_items.head_pointer);
        let left_ptr = self.try_as_internal_getter("tree$left", &tree_items.left_pointer);
        let right_ptr = self.try_as_internal_getter("tree$right", &tree_items.right_pointer);
        let get_value = self.try_as_internal_getter("tree$value", &tree_items.value_node.expr.text);
        let mut stop_condition = format!("(!{node})");
        if let Some(condition) = tree_items
            .value_node
            .condition
            .as_ref()
            .and_then(|condition| condition.condition.as_deref())
            .filter(|condition| !condition.is_empty())
        {
            let condition_expr = self.try_as_internal_getter("tree$condition", condition);
            stop_condition.push_str(&format!(" || !({node}->{condition_expr})"));
        }

        let body = format!(
            "using {node_ptr_type} = decltype({head_ptr});\n\
             struct {inorder_helper_type} {{\n\
             static {node_ptr_type} {inorder_method}({node_ptr_type} {node}, long long &{counter}) {{\n\
             if ({stop_condition}) return nullptr;\n\
             if (auto {found} = {inorder_method}({node}->{left_ptr}, {counter})) return {found};\n\
             if ({counter}-- <= 0) return {node};\n\
             return {inorder_method}({node}->{right_ptr}, {counter});}}\n\
             }};\n\
             return ({inorder_helper_type}::{inorder_method}({head_ptr}, {index_param})->{get_value});\n"
        );

        if self.add_getter_with_unique_name(type_name, &tree_items.getter, "_get$", &body) {
            let definition = Self::container_method_definition(
                type_name,
                &tree_items.getter,
                &body,
                &index_param,
                None,
            );
            self.definitions.push(definition);
        }
    }

    /// `_item$<name>$` / `_expanded$` getters for `<Item>`/`<ExpandedItem>`
    /// expressions too complex to restate inline.
    fn add_single_item_getter(
        &mut self,
        type_name: &TypeName,
        item_name: Option<&str>,
        expr_text: &str,
        getter_slot: &SyntheticGetterSlot,
    ) {
        let expr = cpp::simplify_cpp_expression(expr_text);
        if cpp::is_trivial_expression(&expr) {
            return;
        }
        if cpp::cut_deref_or_address_of_from_trivial(&expr).is_some() {
            return;
        }
        let expr = prepare_expr(&expr);
        let method_name = match item_name {
            None => "_expanded$".to_string(),
            Some(name) => format!("_item${}$", mangle_name(name)),
        };
        if self.add_getter_with_unique_name(type_name, getter_slot, &method_name, &expr) {
            let unique_method_name = getter_slot
                .get()
                .map(|method| method.name().to_string())
                .unwrap_or(method_name);
            let definition = Self::make_mutable_const_method(
                type_name,
                &unique_method_name,
                &format!("return ({expr});"),
                &[],
                None,
            );
            self.definitions.push(definition);
        }
    }

    /// Lazy global intrinsics become free-function declarations.
    fn add_global_intrinsics(&mut self, global_intrinsics: &IntrinsicsScope) {
        for intrinsic in global_intrinsics.sorted_list().iter().rev() {
            if !intrinsic.is_used.get() || !intrinsic.is_lazy {
                continue;
            }
            let key = (
                String::new(),
                intrinsic.name.clone(),
                intrinsic.expression.clone(),
            );
            if !self.known_intrinsics.insert(key) {
                continue;
            }
            let name = format!("{INTERNAL_INTRINSIC_PREFIX}{}", intrinsic.name);
            let params = intrinsic
                .parameters
                .iter()
                .map(|param| {
                    format!(
                        "{} {}",
                        param.parameter_type,
                        param.parameter_name.as_deref().unwrap_or("")
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let expr = prepare_expr(&intrinsic.expression);
            self.definitions.push(SyntheticMethodDefinition {
                full_name: name.clone(),
                body: format!("decltype(auto) {name}({params}) {{ return {expr}; }}"),
                name_uses_regex: false,
            });
        }
    }

    /// Lazy type intrinsics become member declarations of the type.
    fn add_type_intrinsics(&mut self, type_name: &TypeName, type_intrinsics: &IntrinsicsScope) {
        for intrinsic in type_intrinsics.sorted_list().iter().rev() {
            if !intrinsic.is_used.get() || !intrinsic.is_lazy {
                continue;
            }
            let key = (
                type_name.name.clone(),
                intrinsic.name.clone(),
                intrinsic.expression.clone(),
            );
            if !self.known_intrinsics.insert(key) {
                continue;
            }
            let expr = prepare_expr(&intrinsic.expression);
            let name = format!("{INTERNAL_INTRINSIC_PREFIX}{}", intrinsic.name);
            let params: Vec<(String, String)> = intrinsic
                .parameters
                .iter()
                .map(|param| {
                    (
                        param.parameter_type.clone(),
                        param.parameter_name.clone().unwrap_or_default(),
                    )
                })
                .collect();
            self.definitions.push(Self::make_mutable_const_method(
                type_name,
                &name,
                &format!("return {expr};"),
                &params,
                None,
            ));
        }
    }

    fn string_methods(
        type_name: &TypeName,
        init_block_builder: impl Fn(&type_traits::StringTraits, &str, &str) -> String,
    ) -> Vec<SyntheticMethodDefinition> {
        let string_type_traits = type_traits::get_string_type_traits(&type_name.name);
        if string_type_traits.is_empty() {
            return Vec::new();
        }

        let mut methods = Vec::new();
        let self_size = make_internal_name("self$size");
        let self_data = make_internal_name("self$data");
        let other_data = make_internal_name("other$data");
        let other_size = make_internal_name("other$size");

        for (type_specialization, traits) in string_type_traits {
            let init_part = init_block_builder(traits, &self_data, &self_size);

            let make_compare_part = |is_equal: bool| {
                let op = if is_equal { "==" } else { "!=" };
                let size_mismatch = if is_equal { "false" } else { "true" };
                // Unreal natvis encodes an empty string as "\0" of size 1
                let unreal_empty_string_hack =
                    format!("if ({self_size} == 1 && {self_data} && !*{self_data}) {self_size} = 0;");
                format!(
                    "{unreal_empty_string_hack}\n\
                     if (!{other_data}) return {self_size} {op} 0;\n\
                     const unsigned long long {other_size} = {strlen}({other_data});\n\
                     if (!{self_data}) return {other_size} {op} 0;\n\
                     if ({other_size} != {self_size}) return {size_mismatch};\n\
                     return {strncmp}({self_data}, {other_data}, {self_size}) {op} 0;",
                    strlen = traits.strlen,
                    strncmp = traits.strncmp,
                )
            };

            let specialized_type_name = TypeName {
                name: type_specialization,
                has_wildcards: type_name.has_wildcards,
            };
            // Register the operators one by one so each compiles and
            // evaluates on its own
            methods.extend(Self::join_operator_regex_and_declarations(
                &specialized_type_name,
                &[(
                    "==".to_string(),
                    format!(
                        "bool %1::operator==(const {} *{other_data}) const {{\n{init_part}\n{}\n}}",
                        traits.char_type,
                        make_compare_part(true)
                    ),
                )],
            ));
            methods.extend(Self::join_operator_regex_and_declarations(
                &specialized_type_name,
                &[(
                    "!=".to_string(),
                    format!(
                        "bool %1::operator!=(const {} *{other_data}) const {{\n{init_part}\n{}\n}}",
                        traits.char_type,
                        make_compare_part(false)
                    ),
                )],
            ));
        }
        methods
    }

    fn string_methods_from_array_items(
        &self,
        type_name: &TypeName,
        array_items: &ArrayItemsNode,
    ) -> Vec<SyntheticMethodDefinition> {
        Self::string_methods(type_name, |traits, self_data, self_size| {
            let mut lines = format!(
                "unsigned long long {self_size} = 0;\nconst {} *{self_data} = nullptr;\n",
                traits.char_type
            );
            for size_node in &array_items.size_nodes {
                if let Some(condition) = size_node
                    .condition
                    .as_ref()
                    .and_then(|condition| condition.condition.as_deref())
                    .filter(|condition| !condition.is_empty())
                {
                    lines.push_str(&format!("if ({}) ", prepare_expr(condition)));
                }
                lines.push_str(&format!(
                    "{self_size} = (unsigned long long)({});\n",
                    prepare_expr(&size_node.text)
                ));
            }
            for pointer_node in &array_items.value_pointer_nodes {
                if let Some(condition) = pointer_node
                    .condition
                    .as_ref()
                    .and_then(|condition| condition.condition.as_deref())
                    .filter(|condition| !condition.is_empty())
                {
                    lines.push_str(&format!("if ({}) ", prepare_expr(condition)));
                }
                lines.push_str(&format!(
                    "{self_data} = (const {} *)({});\n",
                    traits.char_type,
                    prepare_expr(&pointer_node.expr.text)
                ));
            }
            lines
        })
    }

    fn string_methods_from_string_view(
        type_name: &TypeName,
        string_views: &[TypeVizStringView],
    ) -> Vec<SyntheticMethodDefinition> {
        if string_views.is_empty() {
            return Vec::new();
        }
        Self::string_methods(type_name, |traits, self_data, self_size| {
            let mut lines = format!(
                "unsigned long long {self_size} = (unsigned long long)(-1);\nconst {} *{self_data} = nullptr;\n",
                traits.char_type
            );
            for string_view in string_views {
                if let Some(condition) = string_view
                    .condition
                    .as_ref()
                    .and_then(|condition| condition.condition.as_deref())
                    .filter(|condition| !condition.is_empty())
                {
                    lines.push_str(&format!("if ({})\n", prepare_expr(condition)));
                }
                lines.push_str("{\n");
                lines.push_str(&format!(
                    "{self_data} = (const {} *)({});\n",
                    traits.char_type,
                    prepare_expr(&string_view.expression.text)
                ));
                if let Some(array_size) = &string_view.expression.view_options.array_size {
                    lines.push_str(&format!(
                        "{self_size} = (unsigned long long)({});\n",
                        prepare_expr(array_size)
                    ));
                }
                lines.push_str("}\n");
            }
            lines.push_str(&format!(
                "if ({self_size} == (unsigned long long)(-1)) {self_size} = {self_data} ? {}({self_data}) : 0;\n",
                traits.strlen
            ));
            lines
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::viz::TypeVizExpression;

    fn type_name(name: &str, wildcards: bool) -> TypeName {
        TypeName {
            name: name.to_string(),
            has_wildcards: wildcards,
        }
    }

    #[test]
    fn test_fix_type_regex() {
        assert_eq!(fix_type_regex("^Vec<(.*)>$"), "Vec<(.*)>");
        assert_eq!(fix_type_regex("Map<A<B>>"), "Map<A<B> >");
        assert_eq!(fix_type_regex("A<B<C>>>"), "A<B<C> > >");
    }

    #[test]
    fn test_prepare_expr() {
        assert_eq!(prepare_expr("($T1)m_data[$T2]"), "(%2)m_data[%3]");
        assert_eq!(
            prepare_expr("jb$intrinsic$size()"),
            "_jb$intrinsic$internal$size()"
        );
    }

    #[test]
    fn test_method_call_rendering() {
        let named = SyntheticMethod::Named("_get$".to_string());
        assert_eq!(
            named.call(vec!["3".to_string()]).make_call_expr("obj"),
            "obj._get$(3)"
        );
        let subscript = SyntheticMethod::SubscriptOperator;
        assert_eq!(
            subscript.call(vec!["3".to_string()]).make_call_expr("obj"),
            "obj[3]"
        );
    }

    #[test]
    fn test_smart_pointer_minimal_operators() {
        let mut methods = TopLevelMethods::new();
        let smart_pointer = TypeVizSmartPointer {
            expression: TypeVizExpression::new("m_ptr"),
            usage: SmartPointerUsage::Minimal,
        };
        let definitions =
            methods.smart_pointer_methods(&type_name("(Ptr<(.*)>)", true), &smart_pointer);
        assert_eq!(definitions.len(), 1);
        assert!(definitions[0].name_uses_regex);
        assert!(definitions[0].full_name.contains("operator"));
        for op in ["->", "*", "!", "==", "!="] {
            assert!(
                definitions[0].full_name.contains(&regex::escape(op)),
                "missing operator{op}"
            );
        }
        assert!(!definitions[0].body.contains("operator[]"));
    }

    #[test]
    fn test_smart_pointer_indexable_adds_subscript() {
        let mut methods = TopLevelMethods::new();
        let smart_pointer = TypeVizSmartPointer {
            expression: TypeVizExpression::new("m_ptr"),
            usage: SmartPointerUsage::Indexable,
        };
        let definitions =
            methods.smart_pointer_methods(&type_name("Iter", false), &smart_pointer);
        let all_names: Vec<&str> = definitions
            .iter()
            .map(|definition| definition.full_name.as_str())
            .collect();
        assert!(all_names.contains(&"Iter::operator[]"));
        assert!(all_names.contains(&"Iter::operator+"));
        assert!(all_names.contains(&"Iter::operator-"));
    }

    #[test]
    fn test_private_getter_is_deduplicated() {
        let mut methods = TopLevelMethods::new();
        let first = methods.try_as_internal_getter("list$next", "m_next ? m_next : nullptr");
        let before = methods.definitions.len();
        let second = methods.try_as_internal_getter("list$next", "m_next ? m_next : nullptr");
        assert_eq!(first, second);
        assert_eq!(methods.definitions.len(), before);
        assert!(first.starts_with("jb$internal$name$$private$get$list$next$"));
        assert!(first.ends_with("()"));
    }

    #[test]
    fn test_trivial_getter_stays_inline() {
        let mut methods = TopLevelMethods::new();
        assert_eq!(methods.try_as_internal_getter("list$next", "m_next"), "m_next");
        assert!(methods.definitions.is_empty());
    }

    #[test]
    fn test_getter_collision_numbering() {
        let mut methods = TopLevelMethods::new();
        let slot_a = SyntheticGetterSlot::default();
        let slot_b = SyntheticGetterSlot::default();
        let name = type_name("T", false);
        assert!(methods.add_getter_with_unique_name(&name, &slot_a, "_get$", "a"));
        assert!(methods.add_getter_with_unique_name(&name, &slot_b, "_get$", "b"));
        assert_eq!(slot_a.get().unwrap().name(), "_get$");
        assert_eq!(slot_b.get().unwrap().name(), "_get$1");
        // same expression again is not new
        let slot_c = SyntheticGetterSlot::default();
        assert!(!methods.add_getter_with_unique_name(&name, &slot_c, "_get$", "a"));
        assert_eq!(slot_c.get().unwrap().name(), "_get$");
    }

    #[test]
    fn test_mutable_const_pair() {
        let definition = TopLevelMethods::make_mutable_const_method(
            &type_name("Vec<int>", false),
            "_get$",
            "return (m_data[i]);",
            &[("long long".to_string(), "i".to_string())],
            None,
        );
        assert_eq!(definition.full_name, "Vec<int>::_get$");
        assert!(!definition.name_uses_regex);
        assert!(definition.body.contains("const_cast<::Vec<int> *>(this)"));
        assert!(definition.body.contains("jb$internal$name$$_get$$mutable$$"));
    }
}
