//! Event names carried on the bus, `domain:verb`.

pub const APP_INITIALIZED: &str = "app:initialized";
pub const APP_DESTROY: &str = "app:destroy";
pub const APP_NOTICE: &str = "app:notice";

pub const STATE_CHANGE: &str = "state:change";

pub const STUDENT_ADDED: &str = "student:added";
pub const STUDENT_UPDATED: &str = "student:updated";
pub const STUDENT_REMOVED: &str = "student:removed";
pub const STUDENT_TOGGLE: &str = "student:toggle";

pub const TASK_ADDED: &str = "task:added";
pub const TASK_UPDATED: &str = "task:updated";
pub const TASK_REMOVED: &str = "task:removed";
pub const TASK_SWITCH: &str = "task:switch";
