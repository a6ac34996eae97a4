pub mod protocol;
pub mod scanner;
pub mod session;
pub mod transport;

pub use scanner::{open_adapter, scan_for_sensors};
pub use session::{FetchSession, SessionListener, SessionSettings, SessionState};
pub use transport::{BluerTransport, Transport};
