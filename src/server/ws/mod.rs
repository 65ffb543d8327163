pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

pub use protocol::{MessageKind, ServerMessage};
pub use registry::{ClientHandle, Registration, SessionRegistry};
