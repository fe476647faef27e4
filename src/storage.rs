use std::collections::HashMap;
use std::rc::Rc;

use crate::methods::{SyntheticMethodDefinition, TopLevelMethods};
use crate::schema::viz::{TypeViz, TypeVizName};
use crate::template::TypeNameTemplate;

/// One storage entry per (key, regex) pair: a priority-sorted list of
/// visualizers plus edges to the strictly-more-specific wildcard
/// descriptors of the same bucket.
#[derive(Debug)]
pub struct TypeVizDescriptor {
    pub name: TypeVizName,
    pub regex: String,
    pub visualizers: Vec<Rc<TypeViz>>,
    /// Indexes into the owning wildcard bucket.
    more_specific: Vec<usize>,
}

impl TypeVizDescriptor {
    fn new(name: TypeVizName, regex: String, visualizer: Rc<TypeViz>) -> Self {
        Self {
            name,
            regex,
            visualizers: vec![visualizer],
            more_specific: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct StorageItem {
    descriptors_was_sorted: bool,
    exact_match: Vec<TypeVizDescriptor>,
    wildcard_match: Vec<TypeVizDescriptor>,
}

impl StorageItem {
    fn ensure_descriptors_sorted(&mut self) {
        if self.descriptors_was_sorted {
            return;
        }

        for descriptor in &mut self.exact_match {
            descriptor
                .visualizers
                .sort_by_key(|visualizer| -visualizer.priority);
        }
        for descriptor in &mut self.wildcard_match {
            descriptor
                .visualizers
                .sort_by_key(|visualizer| -visualizer.priority);
        }

        // topological order of the specificity DAG: more specific first
        let order = dfs_post_order(self.wildcard_match.len(), |vertex| {
            self.wildcard_match[vertex].more_specific.as_slice()
        });
        let mut new_index = vec![0usize; order.len()];
        for (position, &old_index) in order.iter().enumerate() {
            new_index[old_index] = position;
        }
        let mut taken: Vec<Option<TypeVizDescriptor>> =
            self.wildcard_match.drain(..).map(Some).collect();
        self.wildcard_match = order
            .iter()
            .map(|&old_index| {
                let mut descriptor = taken[old_index].take().unwrap();
                for edge in &mut descriptor.more_specific {
                    *edge = new_index[*edge];
                }
                descriptor
            })
            .collect();
        self.descriptors_was_sorted = true;
    }
}

/// Depth-first post-order over a DAG given by child index lists: children
/// (more specific vertices) come before their parents.
fn dfs_post_order<'a>(count: usize, children: impl Fn(usize) -> &'a [usize]) -> Vec<usize> {
    fn visit<'a>(
        vertex: usize,
        children: &impl Fn(usize) -> &'a [usize],
        visited: &mut [bool],
        stack: &mut Vec<usize>,
    ) {
        visited[vertex] = true;
        for &child in children(vertex) {
            if !visited[child] {
                visit(child, children, visited, stack);
            }
        }
        stack.push(vertex);
    }

    let mut visited = vec![false; count];
    let mut stack = Vec::with_capacity(count);
    for vertex in 0..count {
        if !visited[vertex] {
            visit(vertex, &children, &mut visited, &mut stack);
        }
    }
    stack
}

/// Indexes visualizers by name-prefix key; exact and wildcard entries live
/// in separate buckets, sorted lazily on first read.
#[derive(Debug, Default)]
pub struct TypeVizStorage {
    types: HashMap<String, StorageItem>,
    top_level_methods: Vec<SyntheticMethodDefinition>,
}

fn try_add_visualizer_to_descriptor(
    regex: &str,
    type_viz: &Rc<TypeViz>,
    descriptors: &mut [TypeVizDescriptor],
) -> bool {
    for descriptor in descriptors {
        if descriptor.regex == regex {
            descriptor.visualizers.push(Rc::clone(type_viz));
            return true;
        }
    }
    false
}

impl TypeVizStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, type_viz: Rc<TypeViz>) {
        for type_viz_name in type_viz.type_viz_names.clone() {
            let key = type_viz_name.template.storage_key().to_string();
            let item = self.types.entry(key).or_default();
            item.descriptors_was_sorted = false;
            if type_viz_name.has_wildcard() {
                let regex = format!("^{}$", type_viz_name.template.build_regex());
                if try_add_visualizer_to_descriptor(&regex, &type_viz, &mut item.wildcard_match) {
                    continue;
                }

                let new_index = item.wildcard_match.len();
                let mut descriptor_to_add =
                    TypeVizDescriptor::new(type_viz_name.clone(), regex, Rc::clone(&type_viz));
                for (index, descriptor) in item.wildcard_match.iter_mut().enumerate() {
                    if descriptor.name.template.matches(&type_viz_name.template) {
                        descriptor.more_specific.push(new_index);
                    } else if type_viz_name.template.matches(&descriptor.name.template) {
                        descriptor_to_add.more_specific.push(index);
                    }
                }
                item.wildcard_match.push(descriptor_to_add);
            } else {
                let type_name = type_viz_name.template.to_string();
                if try_add_visualizer_to_descriptor(&type_name, &type_viz, &mut item.exact_match) {
                    continue;
                }
                item.exact_match.push(TypeVizDescriptor::new(
                    type_viz_name,
                    type_name,
                    Rc::clone(&type_viz),
                ));
            }
        }
    }

    /// Candidates for a requested type, exact matches first, wildcard
    /// matches in specificity order, visualizers in descending priority.
    pub fn get_matched_types(
        &mut self,
        type_name_template: &TypeNameTemplate,
    ) -> Vec<(Rc<TypeViz>, TypeVizName)> {
        let key = type_name_template.storage_key();
        let Some(item) = self.types.get_mut(key) else {
            return Vec::new();
        };
        item.ensure_descriptors_sorted();

        let mut result = Vec::new();
        let requested_type_name = type_name_template.to_string();
        for descriptor in &item.exact_match {
            if requested_type_name == descriptor.regex {
                for visualizer in &descriptor.visualizers {
                    result.push((Rc::clone(visualizer), descriptor.name.clone()));
                }
            }
        }
        for descriptor in &item.wildcard_match {
            if descriptor.name.template.matches(type_name_template) {
                for visualizer in &descriptor.visualizers {
                    result.push((Rc::clone(visualizer), descriptor.name.clone()));
                }
            }
        }
        result
    }

    /// Every exactly-named visualizer, as (registered name, visualizer,
    /// name) triples.
    pub fn iterate_exactly_matched(&mut self) -> Vec<(String, Rc<TypeViz>, TypeVizName)> {
        let mut result = Vec::new();
        for item in self.types.values_mut() {
            item.ensure_descriptors_sorted();
            for descriptor in &item.exact_match {
                for visualizer in &descriptor.visualizers {
                    result.push((
                        descriptor.regex.clone(),
                        Rc::clone(visualizer),
                        descriptor.name.clone(),
                    ));
                }
            }
        }
        result
    }

    /// Every wildcard visualizer, as (registered regex, visualizer, name)
    /// triples.
    pub fn iterate_wildcard_matched(&mut self) -> Vec<(String, Rc<TypeViz>, TypeVizName)> {
        let mut result = Vec::new();
        for item in self.types.values_mut() {
            item.ensure_descriptors_sorted();
            for descriptor in &item.wildcard_match {
                for visualizer in &descriptor.visualizers {
                    result.push((
                        descriptor.regex.clone(),
                        Rc::clone(visualizer),
                        descriptor.name.clone(),
                    ));
                }
            }
        }
        result
    }

    /// Give visualizers registered under several names their own per-name
    /// copies, so per-type synthetic-getter slots never leak across names.
    fn detach_alternative_type_visualizers(descriptor: &mut TypeVizDescriptor) {
        for slot in &mut descriptor.visualizers {
            if slot.type_viz_names.len() > 1 {
                let mut type_viz_copy = (**slot).clone();
                type_viz_copy.type_viz_names = vec![descriptor.name.clone()];
                type_viz_copy.item_providers = slot.item_providers.as_ref().map(|providers| {
                    providers
                        .iter()
                        .map(|provider| Rc::new((**provider).clone()))
                        .collect()
                });
                *slot = Rc::new(type_viz_copy);
            }
        }
    }

    /// Walk every visualizer and collect the auxiliary method definitions
    /// to hand to the debugger.
    pub fn generate_top_level_methods(&mut self) {
        let mut top_level_methods = TopLevelMethods::new();
        for item in self.types.values_mut() {
            item.ensure_descriptors_sorted();
            for descriptors in [&mut item.exact_match, &mut item.wildcard_match] {
                for descriptor in descriptors.iter_mut() {
                    Self::detach_alternative_type_visualizers(descriptor);
                    for visualizer in &descriptor.visualizers {
                        top_level_methods.collect_from(
                            &descriptor.regex,
                            visualizer,
                            &descriptor.name,
                        );
                    }
                }
            }
        }
        self.top_level_methods = top_level_methods.into_definitions();
    }

    #[must_use]
    pub fn top_level_methods(&self) -> &[SyntheticMethodDefinition] {
        &self.top_level_methods
    }
}
