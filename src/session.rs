use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::cache::{ProcessCache, TargetEvents};
use crate::intrinsics::IntrinsicsScope;

/// Tunables of the rendering engine, adjusted by the embedder's commands.
#[derive(Debug)]
pub struct EngineSettings {
    /// Wrap summary runs in markup sentinels.
    pub markup: Cell<bool>,
    pub global_hex: Cell<bool>,
    pub global_hex_show_both: Cell<bool>,
    pub charset_override: RefCell<Option<String>>,
    /// Cap on eagerly discovered children of unsized containers.
    pub max_num_children: Cell<usize>,
    /// Cap on the length of one summary string.
    pub max_string_length: Cell<usize>,
    /// Nested natvis summaries beyond this level fall back to the struct
    /// visualizer.
    pub max_recursion_level: Cell<usize>,
    /// Swallow internal errors instead of propagating them.
    pub suppress_errors: Cell<bool>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            markup: Cell::new(false),
            global_hex: Cell::new(false),
            global_hex_show_both: Cell::new(false),
            charset_override: RefCell::new(None),
            max_num_children: Cell::new(100),
            max_string_length: Cell::new(1024),
            max_recursion_level: Cell::new(5),
            suppress_errors: Cell::new(true),
        }
    }
}

/// Intrinsic scope installed for the visualizer currently being applied.
#[derive(Debug, Default, Clone)]
pub struct IntrinsicScopeFrame {
    pub global_scope: Option<Rc<IntrinsicsScope>>,
    pub type_scope: Option<Rc<IntrinsicsScope>>,
    pub wildcards: Vec<String>,
}

/// Prolog/epilog code realizing `<Variable>` bindings of one
/// `CustomListItems` block, bound once per (provider, wildcards).
#[derive(Debug, Clone)]
pub struct VariableBindings {
    pub prolog: String,
    pub epilog: String,
    pub first_time_code: String,
    pub repeat_code: String,
}

/// Per-debug-session engine state: settings, the intrinsic scope stack, the
/// recursion level, and the process-scoped caches. The engine is
/// single-threaded, so all interior state is `Cell`/`RefCell`.
pub struct Session {
    pub settings: EngineSettings,
    recursion_level: Cell<usize>,
    current_scope: RefCell<IntrinsicScopeFrame>,
    saved_scopes: RefCell<Vec<IntrinsicScopeFrame>>,
    prolog_cache: RefCell<ProcessCache<(String, String), String>>,
    pub(crate) subscript_missing: RefCell<HashMap<String, HashMap<String, String>>>,
    pub(crate) types_with_index_list_items: RefCell<HashSet<String>>,
    pub(crate) variable_bindings: RefCell<HashMap<(usize, String), VariableBindings>>,
    static_counter: Cell<usize>,
}

impl Session {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            settings: EngineSettings::default(),
            recursion_level: Cell::new(0),
            current_scope: RefCell::new(IntrinsicScopeFrame::default()),
            saved_scopes: RefCell::new(Vec::new()),
            prolog_cache: RefCell::new(ProcessCache::new(
                "IntrinsicsPrologCache",
                TargetEvents::MODULES_LOADED
                    | TargetEvents::MODULES_UNLOADED
                    | TargetEvents::SYMBOLS_LOADED,
            )),
            subscript_missing: RefCell::new(HashMap::new()),
            types_with_index_list_items: RefCell::new(HashSet::new()),
            variable_bindings: RefCell::new(HashMap::new()),
            static_counter: Cell::new(0),
        })
    }

    #[must_use]
    pub fn recursion_level(&self) -> usize {
        self.recursion_level.get()
    }

    pub fn set_recursion_level(&self, level: usize) -> usize {
        self.recursion_level.replace(level)
    }

    /// Enter a nested recursion level; the previous level is restored when
    /// the guard drops.
    #[must_use]
    pub fn enter_recursion_level(self: &Rc<Self>, level: usize) -> RecursionLevelGuard {
        let previous = self.set_recursion_level(level);
        RecursionLevelGuard {
            session: Rc::clone(self),
            previous,
        }
    }

    #[must_use]
    pub fn current_intrinsics(&self) -> IntrinsicScopeFrame {
        self.current_scope.borrow().clone()
    }

    /// Install the intrinsic scope of a visualizer candidate. The previous
    /// scope is restored when the guard drops, on every exit path.
    #[must_use]
    pub fn install_intrinsics_scope(
        self: &Rc<Self>,
        global_scope: Option<Rc<IntrinsicsScope>>,
        type_scope: Option<Rc<IntrinsicsScope>>,
        wildcards: Vec<String>,
    ) -> IntrinsicsScopeGuard {
        let frame = IntrinsicScopeFrame {
            global_scope,
            type_scope,
            wildcards,
        };
        let previous = self.current_scope.replace(frame);
        self.saved_scopes.borrow_mut().push(previous);
        IntrinsicsScopeGuard {
            session: Rc::clone(self),
        }
    }

    fn rollback_intrinsics_scope(&self) {
        if let Some(previous) = self.saved_scopes.borrow_mut().pop() {
            *self.current_scope.borrow_mut() = previous;
        }
    }

    pub(crate) fn cached_prolog(&self, process_id: u64, key: &(String, String)) -> Option<String> {
        self.prolog_cache.borrow().get(process_id, key)
    }

    pub(crate) fn store_prolog(&self, process_id: u64, key: (String, String), prolog: String) {
        self.prolog_cache.borrow_mut().set(process_id, key, prolog);
    }

    /// Feed debugger target events into the process-scoped caches.
    pub fn on_target_events(&self, process_id: u64, events: TargetEvents) {
        self.prolog_cache
            .borrow_mut()
            .handle_target_events(process_id, events);
    }

    /// Monotonic counter used to name persistent helper variables.
    pub(crate) fn next_static_id(&self) -> usize {
        let next = self.static_counter.get() + 1;
        self.static_counter.set(next);
        next
    }
}

pub struct IntrinsicsScopeGuard {
    session: Rc<Session>,
}

impl Drop for IntrinsicsScopeGuard {
    fn drop(&mut self) {
        self.session.rollback_intrinsics_scope();
    }
}

pub struct RecursionLevelGuard {
    session: Rc<Session>,
    previous: usize,
}

impl Drop for RecursionLevelGuard {
    fn drop(&mut self) {
        self.session.set_recursion_level(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_guard_unwinds() {
        let session = Session::new();
        assert!(session.current_intrinsics().type_scope.is_none());
        {
            let _guard = session.install_intrinsics_scope(
                None,
                Some(Rc::new(IntrinsicsScope::default())),
                vec!["int".to_string()],
            );
            assert!(session.current_intrinsics().type_scope.is_some());
            {
                let _nested = session.install_intrinsics_scope(None, None, Vec::new());
                assert!(session.current_intrinsics().type_scope.is_none());
            }
            assert!(session.current_intrinsics().type_scope.is_some());
        }
        assert!(session.current_intrinsics().type_scope.is_none());
    }

    #[test]
    fn test_recursion_guard_restores() {
        let session = Session::new();
        session.set_recursion_level(2);
        {
            let _guard = session.enter_recursion_level(3);
            assert_eq!(session.recursion_level(), 3);
        }
        assert_eq!(session.recursion_level(), 2);
    }
}
