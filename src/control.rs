//! Operator-facing control surface: persisted application state, session factories, and the
//! command/dialogue state machine that turns operator input into dispatch jobs.

pub mod context;
pub mod dialogue;
pub mod factory;
pub mod store;
pub mod surface;

pub use context::{Account, AppContext, Operator, OperatorId, Preferences};
pub use dialogue::{parse_selection, DialogueState, SelectionError};
pub use factory::{GatewaySessionFactory, SessionFactory};
pub use store::{JsonFileStore, MemoryStore, StateStore};
pub use surface::{format_snapshot, ControlSurface, Input, Reply};
