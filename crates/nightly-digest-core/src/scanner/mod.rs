pub mod walk;

pub use walk::{locate_session_files, SessionFiles};
