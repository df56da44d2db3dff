//! Task record domain entities.

pub mod lane;
pub mod model;
pub mod outcome;
pub mod status;

pub use lane::Lane;
pub use model::{NewTask, TaskMeta, TaskRecord};
pub use outcome::TaskOutcome;
pub use status::TaskState;
