pub mod runtime;

pub use runtime::InMemoryRuntimeStore;
