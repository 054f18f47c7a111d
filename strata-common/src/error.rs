// Copyright 2026 strata Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    backtrace::Backtrace,
    fmt::{Debug, Display},
    sync::Arc,
};

/// All kinds of [`Error`] raised by strata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// I/O error.
    Io,
    /// External error, raised by caller supplied code.
    External,
    /// Config error.
    ///
    /// Raised synchronously by the builder or setter that introduces an invalid value.
    Config,
    /// The resource is held by someone else.
    ///
    /// e.g. a second store opened over a directory that is already in use,
    /// or a second editor opened for a key that is being written.
    Busy,
    /// Closed.
    Closed,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::Io => "I/O error",
            ErrorKind::External => "External error",
            ErrorKind::Config => "Config error",
            ErrorKind::Busy => "Resource busy",
            ErrorKind::Closed => "Closed",
        }
    }
}

/// Error is the error struct returned by all fallible strata functions.
///
/// `Display` prints a single line:
///
/// ```shell
/// Config error, context: { multiplier: -1 } => size multiplier must be non-negative
/// ```
///
/// `Debug` prints the same information over multiple lines, followed by the source and the captured backtrace.
/// `{:#?}` falls back to the conventional struct-style representation.
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,

    source: Option<Arc<anyhow::Error>>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            de.field("backtrace", &self.backtrace);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "  {k}: {v}")?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source:")?;
            writeln!(f, "  {source:#}")?;
        }

        if let Some(backtrace) = &self.backtrace {
            writeln!(f)?;
            writeln!(f, "Backtrace:")?;
            writeln!(f, "{backtrace}")?;
        }

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            let mut iter = self.context.iter().peekable();
            while let Some((k, v)) = iter.next() {
                write!(f, "{k}: {v}")?;
                if iter.peek().is_some() {
                    write!(f, ", ")?;
                }
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref().as_ref())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: self.source.clone(),
            backtrace: self.backtrace.clone(),
        }
    }
}

impl Error {
    /// Create a new error.
    ///
    /// If the error needs to carry a source error, please use `with_source` method.
    ///
    /// ```rust
    /// # use strata_common::error::{Error, ErrorKind};
    /// let io_error = std::io::Error::other("disk is gone");
    /// Error::new(ErrorKind::Io, "cannot open the cache directory").with_source(io_error);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            source: None,
            backtrace: Some(Arc::new(Backtrace::capture())),
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// Setting the source twice panics in debug builds.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error context.
    pub fn context(&self) -> &Vec<(&'static str, String)> {
        &self.context
    }

    /// Get the error backtrace.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }

    /// Get the error source.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Downcast the reference of the source error to a specific error type reference.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Result type for strata.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper methods for Error.
impl Error {
    /// Helper for creating an [`ErrorKind::Io`] error from [`std::io::Error`].
    pub fn io_error(source: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, "").with_source(source)
    }

    /// Helper for creating an [`ErrorKind::External`] error from a failure of caller supplied code.
    pub fn external(source: impl Into<anyhow::Error>) -> Self {
        Error::new(ErrorKind::External, "").with_source(source)
    }

    /// Helper for creating an [`ErrorKind::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Config, message)
    }

    /// Helper for creating an [`ErrorKind::Busy`] error.
    pub fn busy(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Busy, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::io_error(e)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Error>();
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct WriterError(String);

    impl std::fmt::Display for WriterError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "WriterError: {}", self.0)
        }
    }

    impl std::error::Error for WriterError {}

    #[test]
    fn test_error_display() {
        let err = Error::config("size multiplier must be non-negative")
            .with_context("multiplier", -1.5)
            .with_context("initial", 10);

        assert_eq!(
            "Config error, context: { multiplier: -1.5, initial: 10 } => size multiplier must be non-negative",
            err.to_string()
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = std::io::Error::other("disk is gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!("I/O error, source: disk is gone", err.to_string());
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_external_error_wraps_source() {
        let err = Error::external(std::io::Error::other("short write"));
        assert_eq!(err.kind(), ErrorKind::External);
        assert_eq!("External error, source: short write", err.to_string());
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_error_downcast() {
        let inner = WriterError("short write".to_string());
        let err = Error::new(ErrorKind::External, "writer failed").with_source(inner.clone());

        let downcasted = err.downcast_ref::<WriterError>().unwrap();
        assert_eq!(downcasted, &inner);
    }

    #[test]
    fn test_error_debug_contains_sections() {
        let e = Error::busy("directory already in use")
            .with_context("dir", "/tmp/cache")
            .with_source(WriterError("held".into()));

        let debug = format!("{e:?}");
        assert!(debug.starts_with("Resource busy => directory already in use"));
        assert!(debug.contains("Context:"));
        assert!(debug.contains("dir: /tmp/cache"));
        assert!(debug.contains("Source:"));
    }
}
