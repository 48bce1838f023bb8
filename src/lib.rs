pub mod approval;
pub mod config;
pub mod documents;
pub mod error;
pub mod money;
pub mod package;
pub mod render;
pub mod store;
pub mod templates;

pub use approval::{
    transition_approval, update_assignees, Approval, ApprovalAction, ApprovalStatus, Role,
};
pub use error::{ClosingError, Result};
pub use package::{create_package, PackageOptions, PackageRequest, PackageResponse, TaskInput};
pub use store::{Database, Store};
