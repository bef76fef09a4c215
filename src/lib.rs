pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod managers;
pub mod models;
pub mod routes;
pub mod state;
pub mod view;

pub use app::{default_state, CompositionRoot};
pub use config::Config;
pub use error::{AppError, DomainError};
pub use managers::{StudentManager, TaskManager};
pub use models::{Student, Submission, Task};
pub use routes::create_router;
pub use state::AppState;
pub use view::{RosterSnapshot, RosterView};
