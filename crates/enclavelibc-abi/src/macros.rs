//! Helper macros shared by the ABI modules.

/// Unwraps a `Result<T, c_int>`, returning the errno from the enclosing
/// entry point on `Err`.
macro_rules! try_errno {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(code) => return code,
        }
    };
}
