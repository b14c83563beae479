//! Unwrap helpers with good error messages.
//!
//! These replace `unwrap()` in test code; `#[track_caller]` points the
//! panic at the calling test line.

use std::fmt::Debug;

/// Unwrap a `Result`, panicking with the error value.
///
/// # Example
///
/// ```rust
/// use rsu_test_helpers::must;
///
/// let result: Result<i32, &str> = Ok(42);
/// assert_eq!(must(result), 42);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`.
#[track_caller]
pub fn must<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must: unexpected Err: {e:?}"),
    }
}

/// Unwrap an `Option`.
///
/// # Panics
///
/// Panics if the option is `None`.
#[track_caller]
pub fn must_some<T>(option: Option<T>) -> T {
    match option {
        Some(v) => v,
        None => panic!("must_some: unexpected None"),
    }
}
