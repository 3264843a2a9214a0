// Copyright 2025 The kmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use std::{
    borrow::Cow,
    fmt::{Debug, Display},
};

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque error used at crate boundaries.
///
/// Anything that converts into a [`BoxedError`] converts into an `Error`, including `&str` and `String`.
/// `Error` itself deliberately does not implement [`std::error::Error`] so that the blanket conversion stays coherent;
/// use [`Error::inner`] or [`Error::find_in_chain`] to inspect the cause.
pub struct Error(BoxedError);

impl Error {
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }

    pub fn into_inner(self) -> BoxedError {
        self.0
    }

    /// Walks the source chain looking for an error of type `E`.
    pub fn find_in_chain<E: std::error::Error + 'static>(&self) -> Option<&E> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self.0.as_ref());
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }

    #[must_use]
    pub fn context<C: Into<Cow<'static, str>>>(self, context: C) -> Self {
        Self(Box::new(WithContext { context: context.into(), source: self.0 }))
    }
}

impl<E: Into<BoxedError>> From<E> for Error {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, "\n  caused by: {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

#[derive(Debug)]
struct WithContext {
    context: Cow<'static, str>,
    source: BoxedError,
}

impl Display for WithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.source)
    }
}

impl std::error::Error for WithContext {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

pub trait Context<T> {
    fn context<C: Into<Cow<'static, str>>>(self, context: C) -> Result<T>;
    fn with_context<C: Into<Cow<'static, str>>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
    fn with_context_msg(self, msg: impl Display) -> Result<T>;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn context<C: Into<Cow<'static, str>>>(self, context: C) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C: Into<Cow<'static, str>>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().context(f()))
    }

    fn with_context_msg(self, msg: impl Display) -> Result<T> {
        self.map_err(|e| e.into().context(msg.to_string()))
    }
}

impl<T> Context<T> for Option<T> {
    fn context<C: Into<Cow<'static, str>>>(self, context: C) -> Result<T> {
        self.ok_or_else(|| Error::from(context.into().into_owned()))
    }

    fn with_context<C: Into<Cow<'static, str>>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.ok_or_else(|| Error::from(f().into().into_owned()))
    }

    fn with_context_msg(self, msg: impl Display) -> Result<T> {
        self.ok_or_else(|| Error::from(msg.to_string()))
    }
}
