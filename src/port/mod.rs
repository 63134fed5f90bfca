pub mod conflict;

pub use conflict::{get_free_port, PortConflict, ProcessInfo};
