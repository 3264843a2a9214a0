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

//! Panic containment around plugin calls.
//!
//! A loaded module carries its own copy of std, and a panic from it cannot be caught by the host. The symbols
//! exported by [`declare_dso_filter!`](crate::declare_dso_filter) therefore run [`call_plugin`] inside the module
//! and hand the panic message back as a value. Plugins linked into the host are guarded by the host directly.
//!
//! Only unwinding panics are caught. A plugin built with `panic = "abort"` still takes the process down.

use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
};

/// Runs plugin code, turning a panic into its message.
///
/// Whatever the closure borrows is considered unusable for the stream after a panic; callers fail the stream.
pub fn call_plugin<T>(plugin_fn: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(plugin_fn)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value() {
        assert_eq!(call_plugin(|| 42), Ok(42));
    }

    #[test]
    #[allow(clippy::panic)]
    fn catches_panics() {
        assert_eq!(call_plugin(|| -> u8 { panic!("boom") }), Err("boom".to_owned()));
        let code = 7;
        assert_eq!(call_plugin(|| -> u8 { panic!("failed with {code}") }), Err("failed with 7".to_owned()));
    }
}
