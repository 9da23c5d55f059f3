//! # Converters
//!
//! Purpose: Turn a native reply into the facade's public value.
//!
//! ## Design Principles
//! 1. **Null Short-Circuit**: `apply(None)` returns `None` without running the
//!    conversion, so conversion functions never need to be null-safe.
//! 2. **Identity Default**: Commands whose native value already is the public
//!    value use `Converter::identity()`.
//! 3. **Same Rule Everywhere**: Direct calls and session flushes both go
//!    through `apply`, so conversion cannot diverge between strategies.

use std::fmt;

use ukv_common::KvResult;

/// Fallible unary mapping from native value `N` to public value `P`.
pub struct Converter<N, P> {
    convert: Box<dyn FnOnce(N) -> KvResult<P> + Send>,
}

impl<N: 'static, P: 'static> Converter<N, P> {
    /// Wraps an infallible conversion.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(N) -> P + Send + 'static,
    {
        Converter {
            convert: Box::new(move |native| Ok(f(native))),
        }
    }

    /// Wraps a conversion that can reject the native value.
    pub fn try_new<F>(f: F) -> Self
    where
        F: FnOnce(N) -> KvResult<P> + Send + 'static,
    {
        Converter {
            convert: Box::new(f),
        }
    }
}

impl<N, P> Converter<N, P> {
    /// Applies the conversion, short-circuiting a null native result.
    pub fn apply(self, native: Option<N>) -> KvResult<Option<P>> {
        match native {
            Some(value) => (self.convert)(value).map(Some),
            None => Ok(None),
        }
    }
}

impl<N: 'static> Converter<N, N> {
    /// No-op conversion.
    pub fn identity() -> Self {
        Converter {
            convert: Box::new(Ok),
        }
    }
}

impl<N, P> fmt::Debug for Converter<N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Converter")
    }
}
