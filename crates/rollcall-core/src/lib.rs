//! Rollcall Core - module registry, event bus, and reactive state store.
//!
//! This crate contains the composition runtime shared by every Rollcall
//! component. It has no dependencies on other Rollcall crates.

pub mod bus;
pub mod error;
pub mod registry;
pub mod storage;
pub mod store;
pub mod validation;

// Re-exports for convenience
pub use bus::{
    Callback, Dispatch, EventBus, ListenerFailure, ListenerId, ListenerInfo, ListenerResult,
    WILDCARD,
};
pub use error::{
    BusError, CoreError, ListenerError, ModuleError, RegistryError, StorageError, StoreError,
};
pub use registry::{
    Dependencies, DependencyPolicy, InitReport, Module, ModuleInfo, ModuleInstance,
    ModuleRegistry, ModuleState, Resolution,
};
pub use storage::{load_as, save_as, PersistencePort, Storage};
pub use store::{StateMap, StateStore, DEFAULT_STATE_KEY};
pub use validation::Validator;

#[cfg(any(test, feature = "test-utils"))]
pub use storage::memory::InMemoryPersistence;
