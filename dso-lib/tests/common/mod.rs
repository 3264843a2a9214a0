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

#![allow(dead_code)]

use bytes::Bytes;
use dso_configuration::config::connection_manager::ConnectionManagerConfig;
use dso_lib::{
    filter::{AsyncResult, PhaseContext, PhaseStatus},
    plugin::EntryPoints,
    ConnectionManager, Dispatcher, Frame, HeaderMap, HostStats, PluginDescriptor, PluginRegistry, StreamEvent,
    StreamId,
};
use std::{sync::Arc, thread, time::Duration};

pub const SLEEP: Duration = Duration::from_millis(20);

pub const MANAGER: &str = r#"
name: ingress
http_filters:
  - name: dso
    filter_type: dso
    filter_settings:
      library_id: basic
      plugin_name: basic
      plugin_config:
        type_url: typexx
        value:
          key: value
          int: 10
route_config:
  name: test-routes
  virtual_hosts:
    - name: test-host
      domains: ["*"]
      typed_per_filter_config:
        dso:
          plugins_config:
            basic:
              config:
                type_url: typexx
                value:
                  foo: bar
      routes:
        - name: test
          match: { prefix: "/test" }
          typed_per_filter_config:
            dso:
              plugins_config:
                basic:
                  config:
                    value:
                      baz: bat
          metadata:
            filter_metadata:
              envoy.filters.http.dso:
                owner: test
        - name: wrap
          match: { path: "/wrap" }
          typed_per_filter_config:
            dso:
              plugins_config:
                basic:
                  config:
                    value:
                      wrap: true
        - name: nowrap
          match: { path: "/nowrap" }
        - name: disabled
          match: { prefix: "/disabled" }
          typed_per_filter_config:
            dso:
              plugins_config:
                basic:
                  disabled: true
"#;

/// Flags the scenario plugin reads from the request query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Variant {
    pub async_mode: bool,
    pub sleep: bool,
    pub data_sleep: bool,
}

impl Variant {
    fn from_path(path: &str) -> Self {
        let query = path.split_once('?').map(|(_, query)| query).unwrap_or_default();
        let flag = |name: &str| query.split('&').any(|pair| pair == name || pair == format!("{name}=1"));
        Self { async_mode: flag("async"), sleep: flag("sleep"), data_sleep: flag("data_sleep") }
    }
}

#[derive(Debug, Default)]
struct RequestFacts {
    path: String,
    body_length: usize,
}

fn shout(ctx: &PhaseContext<'_>) -> Bytes {
    Bytes::from(ctx.body().to_ascii_uppercase())
}

fn set_request_headers(headers: &mut HeaderMap) {
    headers.add("test-x-set-header-0", "foo").ok();
    headers.remove("x-test-header-1");
}

pub fn decode_headers(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    let path = ctx.headers().and_then(|h| h.path()).unwrap_or_default().to_owned();
    let variant = Variant::from_path(&path);
    ctx.stream_state().insert(variant);
    ctx.state::<RequestFacts>().path = path;

    if variant.async_mode {
        let continuation = ctx.defer();
        thread::spawn(move || {
            if variant.sleep {
                thread::sleep(SLEEP);
            }
            let result =
                AsyncResult::resume().add_header("test-x-set-header-0", "foo").remove_header("x-test-header-1");
            continuation.resume(result);
        });
        return PhaseStatus::Async;
    }
    if variant.sleep {
        thread::sleep(SLEEP);
    }
    if let Some(headers) = ctx.headers() {
        set_request_headers(headers);
    }
    PhaseStatus::Continue
}

pub fn decode_data(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    if !ctx.end_of_stream() {
        return PhaseStatus::StopAndBuffer;
    }
    let variant = ctx.stream_state().get::<Variant>().copied().unwrap_or_default();
    ctx.state::<RequestFacts>().body_length = ctx.body_received();
    let body = shout(ctx);

    if variant.data_sleep && variant.async_mode {
        let continuation = ctx.defer();
        thread::spawn(move || {
            thread::sleep(SLEEP);
            continuation.resume(AsyncResult::resume().replace_body(body));
        });
        return PhaseStatus::Async;
    }
    if variant.data_sleep {
        thread::sleep(SLEEP);
    }
    match ctx.replace_body(body) {
        Ok(()) => PhaseStatus::Continue,
        Err(_) => PhaseStatus::StopIteration,
    }
}

pub fn encode_headers(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    let facts = ctx.state::<RequestFacts>();
    let (length, path) = (facts.body_length.to_string(), facts.path.clone());
    let end_of_stream = ctx.end_of_stream();
    let wrap = wrap_enabled(ctx);
    let Some(headers) = ctx.headers() else {
        return PhaseStatus::Continue;
    };
    headers.set("test-req-body-length", length).ok();
    headers.set("test-path", path).ok();
    if end_of_stream && wrap {
        ctx.replace_body("ok").ok();
    }
    PhaseStatus::Continue
}

pub fn encode_data(ctx: &mut PhaseContext<'_>) -> PhaseStatus {
    if !ctx.end_of_stream() {
        return PhaseStatus::StopAndBuffer;
    }
    let body = if ctx.body().is_empty() && wrap_enabled(ctx) { Bytes::from_static(b"ok") } else { shout(ctx) };
    match ctx.replace_body(body) {
        Ok(()) => PhaseStatus::Continue,
        Err(_) => PhaseStatus::StopIteration,
    }
}

fn wrap_enabled(ctx: &PhaseContext<'_>) -> bool {
    ctx.config_value("wrap").and_then(serde_json::Value::as_bool).unwrap_or(false)
}

pub fn basic_entry_points() -> EntryPoints {
    EntryPoints {
        decode_headers: Some(decode_headers),
        decode_data: Some(decode_data),
        encode_headers: Some(encode_headers),
        encode_data: Some(encode_data),
        ..Default::default()
    }
}

pub fn registry_with(entry_points: EntryPoints) -> PluginRegistry {
    let registry = PluginRegistry::default();
    registry.register(PluginDescriptor::new_static("basic", entry_points)).unwrap();
    registry
}

pub fn manager_config() -> ConnectionManagerConfig {
    serde_yaml::from_str(MANAGER).unwrap()
}

pub fn manager(entry_points: EntryPoints) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::build(&manager_config(), &registry_with(entry_points)).unwrap())
}

pub fn dispatcher(entry_points: EntryPoints) -> (Dispatcher, Arc<HostStats>) {
    let stats = Arc::new(HostStats::default());
    (Dispatcher::new(manager(entry_points), Arc::clone(&stats)), stats)
}

pub fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    pairs.iter().copied().collect()
}

pub fn request_headers(path: &str) -> HeaderMap {
    headers(&[
        (":method", "POST"),
        (":path", path),
        (":authority", "example.com"),
        ("content-length", "10"),
        ("x-test-header-0", "zero"),
        ("X-Test-Header-1", "one"),
    ])
}

/// Applies resumptions until the stream is no longer suspended.
pub async fn settle(dispatcher: &mut Dispatcher, id: StreamId) {
    while dispatcher.is_suspended(id) {
        let resumed = tokio::time::timeout(Duration::from_secs(5), dispatcher.process_next_resumption()).await;
        assert!(resumed.is_ok(), "stream {id} never resumed");
    }
}

/// What one side of a stream looked like once it left the host.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Observed {
    pub headers: Option<HeaderMap>,
    pub body: Vec<u8>,
    pub trailers: Option<HeaderMap>,
    pub ended: bool,
}

impl Observed {
    fn push(&mut self, frame: Frame) {
        match frame {
            Frame::Headers { headers, end_of_stream } => {
                self.headers = Some(headers);
                self.ended = end_of_stream;
            },
            Frame::Data { data, end_of_stream } => {
                self.body.extend_from_slice(&data);
                self.ended = end_of_stream;
            },
            Frame::Trailers(trailers) => {
                self.trailers = Some(trailers);
                self.ended = true;
            },
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|h| h.first(name))
    }
}

#[derive(Debug, Default)]
pub struct Exchange {
    pub upstream: Observed,
    pub downstream: Observed,
    pub other: Vec<StreamEvent>,
}

impl Exchange {
    pub fn record(&mut self, events: Vec<(StreamId, StreamEvent)>) {
        for (_, event) in events {
            match event {
                StreamEvent::Upstream(frame) => self.upstream.push(frame),
                StreamEvent::Downstream(frame) => self.downstream.push(frame),
                other => self.other.push(other),
            }
        }
    }

    pub fn completed(&self) -> bool {
        self.other.contains(&StreamEvent::Complete)
    }
}

/// Drives the `POST /test` exchange: three request chunks, then a two chunk response.
pub async fn run_scenario(dispatcher: &mut Dispatcher, path: &str) -> Exchange {
    let mut exchange = Exchange::default();
    let id = dispatcher.decode_headers(request_headers(path), false).unwrap();
    dispatcher.decode_data(id, Bytes::from_static(b"hello"), false).unwrap();
    dispatcher.decode_data(id, Bytes::from_static(b"world"), false).unwrap();
    dispatcher.decode_data(id, Bytes::new(), true).unwrap();
    settle(dispatcher, id).await;
    exchange.record(dispatcher.take_events());

    dispatcher.encode_headers(id, headers(&[(":status", "200"), ("content-length", "7")]), false).unwrap();
    dispatcher.encode_data(id, Bytes::from_static(b"good"), false).unwrap();
    dispatcher.encode_data(id, Bytes::from_static(b"bye"), true).unwrap();
    settle(dispatcher, id).await;
    exchange.record(dispatcher.take_events());
    exchange
}
