pub mod naming;
pub mod path_guard;

pub use naming::{first_free_name, normalize_file_name, safe_ascii, sanitize_segment};
pub use path_guard::PathGuard;
