//! Logging facade for the ember crates.
//!
//! Nothing in the workspace depends on `tracing` macros directly; everything goes through here.
//! Logging is compiled in only when `EMBER_LOG` is set at build time, otherwise every macro
//! expands to a branch on a `false` constant and the arguments are never evaluated.

#[doc(hidden)]
pub use tracing as __tracing;
#[doc(hidden)]
pub const ENABLED: bool = option_env!("EMBER_LOG").is_some();

pub use tracing::Level;

#[macro_export]
macro_rules! trace {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::trace!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! debug {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::debug!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! info {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::info!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::warn!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::error!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! span {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::Span::Enabled($crate::__tracing::span!($($tok)*))
        } else {
            $crate::Span::Disabled
        }
    };
}

/// A span that may or may not be backed by a `tracing` span
pub enum Span {
    Enabled(tracing::Span),
    Disabled,
}

impl Span {
    pub fn enter(&self) -> Entered<'_> {
        match self {
            Self::Enabled(s) => Entered::Enabled(s.enter()),
            Self::Disabled => Entered::Disabled,
        }
    }

    pub fn in_scope<T, F: FnOnce() -> T>(&self, f: F) -> T {
        match self {
            Self::Enabled(s) => s.in_scope(f),
            Self::Disabled => f(),
        }
    }
}

pub enum Entered<'a> {
    Enabled(tracing::span::Entered<'a>),
    Disabled,
}
