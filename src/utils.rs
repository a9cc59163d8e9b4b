use std::time::Instant;

pub use anyhow::{anyhow, bail, Context};
pub use itertools::Itertools;

pub type StdResult<T, E> = std::result::Result<T, E>;
pub type Result<T> = anyhow::Result<T>;
pub type EmptyRes = Result<()>;

#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {Err(anyhow::anyhow!($($arg)*))};
}

#[macro_export]
macro_rules! require {
    ($cond:expr) => {
        if !($cond) { anyhow::bail!("Requirement failed: {}", stringify!($cond)); }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) { anyhow::bail!($($arg)*); }
    };
}

/// Executes the given logic, supplying its result and elapsed milliseconds to the callback.
pub fn measure<T, CB: FnOnce(&T, u128)>(logic: impl FnOnce() -> T, callback: CB) -> T {
    let start_time = Instant::now();
    let result = logic();
    callback(&result, start_time.elapsed().as_millis());
    result
}
