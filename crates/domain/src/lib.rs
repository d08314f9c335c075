pub mod clock;
pub mod error;
pub mod forms;
pub mod plan;
pub mod ports;
pub mod runtime;
pub mod snapshot;
pub mod util;
pub mod validation;

#[cfg(test)]
mod testing;

pub type DomainResult<T> = Result<T, error::DomainError>;
