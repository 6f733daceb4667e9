/// Build a crate's error type from a plain message string.
///
/// Each crate in the workspace defines its own `Error` enum; the ones that
/// want `.context()` ergonomics implement this trait for the variant that
/// carries a free-form message, then invoke [`impl_context!`] next to it.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Glue a context prefix onto an underlying failure's display output.
#[doc(hidden)]
#[must_use]
pub fn format_context(context: &str, source: &dyn std::fmt::Display) -> String {
    format!("{context}: {source}")
}

/// Generate a crate-local `Context` trait adding `.context()` and
/// `.with_context()` to `Result` and `Option`, in the spirit of
/// `anyhow::Context` but landing in the crate's own error type.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`; the generated trait
/// resolves both names from the surrounding scope.
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.with_context(|| context.into())
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message($crate::error::format_context(
                        &f().into(),
                        &source,
                    ))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.with_context(|| context.into())
            }

            // No underlying error to chain; the context becomes the whole
            // message.
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Error(String);

    impl FromMessage for Error {
        fn from_message(message: String) -> Self {
            Self(message)
        }
    }

    type Result<T> = std::result::Result<T, Error>;

    crate::impl_context!();

    #[test]
    fn context_prefixes_the_source_error() {
        let result: std::result::Result<(), &str> = Err("socket closed");
        let err = result.context("connecting to sink").unwrap_err();
        assert_eq!(err, Error("connecting to sink: socket closed".into()));
    }

    #[test]
    fn option_context_stands_alone() {
        let missing: Option<u8> = None;
        let err = missing.context("device mapping absent").unwrap_err();
        assert_eq!(err, Error("device mapping absent".into()));
    }

    #[test]
    fn with_context_is_lazy() {
        let ok: std::result::Result<u8, &str> = Ok(7);
        let value = ok
            .with_context(|| -> String { unreachable!("must not run on the Ok path") })
            .unwrap();
        assert_eq!(value, 7);
    }
}
