//! Pipeline coordination and user actions

mod action;
mod coordinator;

pub use action::Action;
pub use coordinator::{Coordinator, CoordinatorConfig, NickChangeHook};
