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

//! Example dso filter.
//!
//! Requests get `test-x-set-header-0: foo` added, `x-test-header-1` removed and their body uppercased. Responses
//! get the request path and body length as headers and their body uppercased; with `wrap: true` in the route
//! config an empty response body becomes `ok`.
//!
//! The query flags `async`, `sleep` and `data_sleep` move the work to a worker thread and/or delay it, which must
//! not change what the peers observe. Two more flags make the filter misbehave: `panic` panics in the request
//! headers phase and `resume_twice` resumes the request headers phase a second time from the worker thread.

use bytes::Bytes;
use dso_lib::{
    filter::{AsyncResult, DestroyContext, PhaseContext, PhaseStatus},
    plugin::{EntryPoints, JsonMap},
};
use serde_json::Value;
use std::{thread, time::Duration};

const DELAY: Duration = Duration::from_millis(20);

dso_lib::declare_dso_filter! {
    decode_headers => decode_headers,
    decode_data => decode_data,
    encode_headers => encode_headers,
    encode_data => encode_data,
    on_destroy => on_destroy,
    validate_config => validate_config,
}

/// The same entry points, for hosts linking the filter statically.
pub fn entry_points() -> EntryPoints {
    EntryPoints {
        decode_headers: Some(decode_headers),
        decode_data: Some(decode_data),
        encode_headers: Some(encode_headers),
        encode_data: Some(encode_data),
        on_destroy: Some(on_destroy),
        validate_config: Some(validate_config),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
struct Request {
    path: String,
    body_length: usize,
    worker: bool,
    delay_headers: bool,
    delay_body: bool,
    panic: bool,
    resume_twice: bool,
}

impl Request {
    fn new(path: &str) -> Self {
        let query = path.split_once('?').map(|(_, query)| query).unwrap_or_default();
        let flag = |name: &str| query.split('&').any(|pair| pair == name || pair.strip_prefix(name) == Some("=1"));
        Self {
            path: path.to_owned(),
            body_length: 0,
            worker: flag("async"),
            delay_headers: flag("sleep"),
            delay_body: flag("data_sleep"),
            panic: flag("panic"),
            resume_twice: flag("resume_twice"),
        }
    }
}

fn uppercase(ctx: &PhaseContext<'_>) -> Bytes {
    Bytes::from(ctx.body().to_ascii_uppercase())
}

fn wrap(ctx: &PhaseContext<'_>) -> bool {
    ctx.config_value("wrap").and_then(Value::as_bool).unwrap_or(false)
}

#[allow(clippy::panic)]
fn decode_headers(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    let path = ctx.headers().and_then(|h| h.path()).unwrap_or_default().to_owned();
    let request = Request::new(&path);
    if request.panic {
        panic!("asked to panic by {path}");
    }
    let (worker, delay, twice) = (request.worker, request.delay_headers, request.resume_twice);
    *ctx.state::<Request>() = request;

    if worker || twice {
        let continuation = ctx.defer();
        let again = twice.then(|| continuation.clone());
        thread::spawn(move || {
            if delay {
                thread::sleep(DELAY);
            }
            let result =
                AsyncResult::resume().add_header("test-x-set-header-0", "foo").remove_header("x-test-header-1");
            continuation.resume(result);
            if let Some(again) = again {
                again.resume(AsyncResult::resume());
            }
        });
        return PhaseStatus::Async;
    }
    if delay {
        thread::sleep(DELAY);
    }
    if let Some(headers) = ctx.headers() {
        headers.add("test-x-set-header-0", "foo").ok();
        headers.remove("x-test-header-1");
    }
    PhaseStatus::Continue
}

fn decode_data(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    if !ctx.end_of_stream() {
        return PhaseStatus::StopAndBuffer;
    }
    let received = ctx.body_received();
    let request = ctx.state::<Request>();
    request.body_length = received;
    let (worker, delay) = (request.worker, request.delay_body);
    let body = uppercase(ctx);

    if worker && delay {
        let continuation = ctx.defer();
        thread::spawn(move || {
            thread::sleep(DELAY);
            continuation.resume(AsyncResult::resume().replace_body(body));
        });
        return PhaseStatus::Async;
    }
    if delay {
        thread::sleep(DELAY);
    }
    match ctx.replace_body(body) {
        Ok(()) => PhaseStatus::Continue,
        Err(_) => PhaseStatus::StopIteration,
    }
}

fn encode_headers(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    let request = ctx.state::<Request>();
    let (length, path) = (request.body_length.to_string(), request.path.clone());
    let headers_only = ctx.end_of_stream();
    let wrap = wrap(ctx);
    if let Some(headers) = ctx.headers() {
        headers.set("test-req-body-length", length).ok();
        headers.set("test-path", path).ok();
    }
    if headers_only && wrap {
        ctx.replace_body("ok").ok();
    }
    PhaseStatus::Continue
}

fn encode_data(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    if !ctx.end_of_stream() {
        return PhaseStatus::StopAndBuffer;
    }
    let body = if ctx.body().is_empty() && wrap(ctx) { Bytes::from_static(b"ok") } else { uppercase(ctx) };
    match ctx.replace_body(body) {
        Ok(()) => PhaseStatus::Continue,
        Err(_) => PhaseStatus::StopIteration,
    }
}

fn on_destroy(ctx: &mut DestroyContext<'_>) {
    ctx.state().take::<Request>();
}

fn validate_config(_plugin_name: &str, config: &JsonMap) -> Result<(), String> {
    match config.get("wrap") {
        None | Some(Value::Bool(_)) => Ok(()),
        Some(other) => Err(format!("`wrap` must be a boolean, got {other}")),
    }
}
