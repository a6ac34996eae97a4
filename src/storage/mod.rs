pub mod export;
pub mod files;
pub mod registry;
pub mod tasks;

pub use export::write_history_file;
pub use registry::DeviceRegistry;
pub use tasks::TaskLog;
