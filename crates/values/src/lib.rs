//! Scalar value types shared by table schemas and the SQL surface:
//! ages, sizes, CPU quantities, and UTC timestamps.

mod age;
mod size;
mod time;

pub use age::{parse_age, to_age, Age};
pub use size::{parse_cpu, parse_size, to_size};
pub use time::{parse_utc, to_utc};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("empty age")]
    EmptyAge,
    #[error("invalid age syntax: {0}")]
    BadAge(String),
    #[error("invalid suffix '{0}', must be one of [dhms]")]
    BadAgeSuffix(char),
    #[error("invalid size: {0}")]
    BadSize(String),
    #[error("invalid cpu: {0}")]
    BadCpu(String),
    #[error("invalid UTC timestamp: {0}")]
    BadTimestamp(String),
}
