pub mod common;
pub mod delete;
pub mod get;
pub mod list;
pub mod put;
pub mod status;
pub mod sync;

pub use delete::run_delete;
pub use get::run_get;
pub use list::run_list;
pub use put::run_put;
pub use status::run_status;
pub use sync::run_sync;
