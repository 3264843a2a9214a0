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
    any::{Any, TypeId},
    collections::HashMap,
};

/// Per stream values a plugin keeps between phases, one slot per type.
#[derive(Debug, Default)]
pub struct StreamState {
    values: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl StreamState {
    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref())
    }

    pub fn get_or_default<T: Any + Send + Default>(&mut self) -> &mut T {
        let slot = self.values.entry(TypeId::of::<T>()).or_insert_with(|| Box::new(T::default()));
        #[allow(clippy::expect_used)]
        slot.downcast_mut().expect("slot is keyed by the type id of its value")
    }

    pub fn insert<T: Any + Send>(&mut self, value: T) -> Option<T> {
        self.values.insert(TypeId::of::<T>(), Box::new(value)).and_then(|old| old.downcast().ok()).map(|old| *old)
    }

    pub fn take<T: Any + Send>(&mut self) -> Option<T> {
        self.values.remove(&TypeId::of::<T>()).and_then(|old| old.downcast().ok()).map(|old| *old)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
