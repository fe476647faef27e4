//! Natvis-style declarative type visualizer engine for native debuggers.
//!
//! Given a set of visualizer rules loaded from `.natvis` files and a live
//! debugger value, the engine produces a summary string and a lazy,
//! index-addressable list of synthetic children. The debugger side
//! (expression evaluation, value handles, top-level declarations) is
//! abstracted behind the traits in [`eval`].

use std::{error, fmt};

/// Fallback visualizer shapes for values without natvis rules
pub mod builtins;
/// Process-scoped caches cleared on target events
pub mod cache;
/// C++ fragment utilities
pub mod cpp;
/// Visualizer matching and dispatch
pub mod dispatch;
/// Debugger abstraction and expression evaluation
pub mod eval;
/// Item-expression tracking
pub mod expression;
/// Bit-packed format codes
pub mod format;
/// Intrinsic scopes and the validated prolog cache
pub mod intrinsics;
/// Registered visualizer files
pub mod manager;
/// Synthetic method synthesis
pub mod methods;
/// Child-provider family
pub mod providers;
/// Per-debug-session engine state
pub mod session;
/// Visualizer storage and candidate ordering
pub mod storage;
/// Summary output buffer
pub mod stream;
/// Type-name templates and wildcard matching
pub mod template;
/// String-type traits
pub mod type_traits;

/// The in-memory visualizer tree produced by the loader
pub mod schema {
    /// Item-provider nodes
    pub mod nodes;
    /// Type visualizer rules
    pub mod viz;
}

pub use self::dispatch::{DeclarativeSynthProvider, Engine, declarative_summary};
pub use self::eval::{DebugProcess, DebugType, DebugValue, DebuggerHost, EvalError};
pub use self::manager::{FormattersManager, VizFileLoader};
pub use self::methods::SyntheticMethodDefinition;
pub use self::providers::{ChildrenProvider, INVALID_CHILD_INDEX};
pub use self::session::Session;
pub use self::storage::TypeVizStorage;
pub use self::template::TypeNameTemplate;

/// Engine-level errors
#[derive(Debug)]
pub enum Error {
    /// An expression failed to compile or run
    Evaluate(EvalError),
    /// A visualizer file could not be loaded
    Loader(String),
    /// Silently produce no children and no summary
    IgnoreSynth,
    /// Unexpected invariant breakage
    Internal(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evaluate(err) => err.fmt(f),
            Self::Loader(message) => write!(f, "loader error: {message}"),
            Self::IgnoreSynth => f.write_str("synthetic provider is ignored"),
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl error::Error for Error {}

impl From<EvalError> for Error {
    fn from(err: EvalError) -> Self {
        Self::Evaluate(err)
    }
}
