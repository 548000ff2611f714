//! Pollable extraction tasks: state machine, persistence and the worker pool.

pub mod documents;
pub mod manager;
pub mod store;

pub use documents::{DocumentStore, InMemoryDocumentStore};
pub use manager::TaskManager;
pub use store::{FileTaskStore, InMemoryTaskStore, TaskStore, open_store};
