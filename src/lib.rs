pub mod core;
pub mod documents;
pub mod rag;
pub mod server;
pub mod state;
