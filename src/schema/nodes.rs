use std::cell::RefCell;

use crate::methods::SyntheticMethod;
use crate::schema::viz::{InterpolatedString, TypeVizCondition, TypeVizExpression};

/// Slot the top-level synthesiser writes a generated getter into; read by
/// the child providers when they reconstruct item expressions. Per-type, so
/// detachment deep-copies the nodes carrying one.
#[derive(Debug, Default)]
pub struct SyntheticGetterSlot(RefCell<Option<SyntheticMethod>>);

impl SyntheticGetterSlot {
    #[must_use]
    pub fn get(&self) -> Option<SyntheticMethod> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub fn set_if_empty(&self, method: SyntheticMethod) {
        let mut slot = self.0.borrow_mut();
        if slot.is_none() {
            *slot = Some(method);
        }
    }
}

impl Clone for SyntheticGetterSlot {
    fn clone(&self) -> Self {
        Self(RefCell::new(self.0.borrow().clone()))
    }
}

/// `<Item>`: a single named child.
#[derive(Debug, Clone)]
pub struct SingleNode {
    pub name: String,
    pub expr: TypeVizExpression,
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
    pub getter: SyntheticGetterSlot,
}

/// `<ExpandedItem>`: inline the target's own children.
#[derive(Debug, Clone)]
pub struct ExpandedNode {
    pub expr: TypeVizExpression,
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
    pub getter: SyntheticGetterSlot,
}

/// `<Size>` inside an items block; the first node whose condition holds
/// wins.
#[derive(Debug, Clone)]
pub struct SizeNode {
    pub text: String,
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
}

impl SizeNode {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            condition: None,
            optional: false,
        }
    }
}

/// `<ValuePointer>` of an `<ArrayItems>` block.
#[derive(Debug, Clone)]
pub struct ValuePointerNode {
    pub expr: TypeVizExpression,
    pub condition: Option<TypeVizCondition>,
    pub getter: SyntheticGetterSlot,
}

#[derive(Debug, Clone)]
pub struct ArrayItemsNode {
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
    pub size_nodes: Vec<SizeNode>,
    pub value_pointer_nodes: Vec<ValuePointerNode>,
    pub getter: SyntheticGetterSlot,
}

/// `<ValueNode>` of an `<IndexListItems>` block; `$i` is bound to the
/// requested index.
#[derive(Debug, Clone)]
pub struct IndexNode {
    pub expr: TypeVizExpression,
    pub condition: Option<TypeVizCondition>,
    pub getter: SyntheticGetterSlot,
}

#[derive(Debug, Clone)]
pub struct IndexListItemsNode {
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
    pub size_nodes: Vec<SizeNode>,
    pub value_nodes: Vec<IndexNode>,
    pub getter: SyntheticGetterSlot,
}

/// `<ValueNode>` of a `<LinkedListItems>` block, with an optional
/// interpolated custom child name.
#[derive(Debug, Clone)]
pub struct ListValueNode {
    pub name: Option<InterpolatedString>,
    pub expr: TypeVizExpression,
}

#[derive(Debug, Clone)]
pub struct LinkedListItemsNode {
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
    pub size_nodes: Vec<SizeNode>,
    pub head_pointer: String,
    pub next_pointer: String,
    pub value_node: ListValueNode,
    pub getter: SyntheticGetterSlot,
}

/// `<ValueNode>` of a `<TreeItems>` block; its condition (with `$i`
/// available) prunes traversal.
#[derive(Debug, Clone)]
pub struct TreeValueNode {
    pub name: Option<InterpolatedString>,
    pub expr: TypeVizExpression,
    pub condition: Option<TypeVizCondition>,
}

#[derive(Debug, Clone)]
pub struct TreeItemsNode {
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
    pub size_nodes: Vec<SizeNode>,
    pub head_pointer: String,
    pub left_pointer: String,
    pub right_pointer: String,
    pub value_node: TreeValueNode,
    pub getter: SyntheticGetterSlot,
}

/// `<Variable>` binding of a `<CustomListItems>` block.
#[derive(Debug, Clone)]
pub struct VariableNode {
    pub name: String,
    pub initial_value: String,
}

/// One statement of a `<CustomListItems>` code block.
#[derive(Debug, Clone)]
pub enum CodeBlockNode {
    Exec {
        value: String,
        condition: Option<String>,
    },
    Item {
        name: Option<InterpolatedString>,
        expr: TypeVizExpression,
        condition: Option<String>,
    },
    If {
        condition: String,
        body: Vec<CodeBlockNode>,
    },
    ElseIf {
        condition: Option<String>,
        body: Vec<CodeBlockNode>,
    },
    Else {
        body: Vec<CodeBlockNode>,
    },
    Loop {
        condition: Option<String>,
        body: Vec<CodeBlockNode>,
    },
    Break {
        condition: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct CustomListItemsNode {
    pub condition: Option<TypeVizCondition>,
    pub optional: bool,
    pub size_nodes: Vec<SizeNode>,
    pub variables: Vec<VariableNode>,
    pub code_blocks: Vec<CodeBlockNode>,
}

/// One child-production block of a visualizer (tagged by kind).
#[derive(Debug, Clone)]
pub enum ItemProvider {
    Single(SingleNode),
    Expanded(ExpandedNode),
    ArrayItems(ArrayItemsNode),
    IndexListItems(IndexListItemsNode),
    LinkedListItems(LinkedListItemsNode),
    TreeItems(TreeItemsNode),
    CustomListItems(CustomListItemsNode),
}

impl ItemProvider {
    #[must_use]
    pub fn condition(&self) -> Option<&TypeVizCondition> {
        match self {
            Self::Single(node) => node.condition.as_ref(),
            Self::Expanded(node) => node.condition.as_ref(),
            Self::ArrayItems(node) => node.condition.as_ref(),
            Self::IndexListItems(node) => node.condition.as_ref(),
            Self::LinkedListItems(node) => node.condition.as_ref(),
            Self::TreeItems(node) => node.condition.as_ref(),
            Self::CustomListItems(node) => node.condition.as_ref(),
        }
    }

    /// An optional provider swallows evaluation errors and produces no
    /// children instead.
    #[must_use]
    pub fn optional(&self) -> bool {
        match self {
            Self::Single(node) => node.optional,
            Self::Expanded(node) => node.optional,
            Self::ArrayItems(node) => node.optional,
            Self::IndexListItems(node) => node.optional,
            Self::LinkedListItems(node) => node.optional,
            Self::TreeItems(node) => node.optional,
            Self::CustomListItems(node) => node.optional,
        }
    }
}
