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

use bytes::Bytes;
use dso_configuration::{
    config::{
        bootstrap::{BootstrapExtension, DsoLibrary, DynamicResources},
        Bootstrap,
    },
    Config, Options,
};
use dso_host::{
    signal::{ControlSignal, ShutdownSignal},
    Host,
};
use dso_lib::{
    Dispatcher, Frame, HeaderMap, PluginDescriptor, PluginRegistry, RouteConfigurationChange, StreamEvent, StreamId,
};
use std::{
    env::consts::{DLL_PREFIX, DLL_SUFFIX},
    path::{Path, PathBuf},
    process::Command,
    sync::OnceLock,
    time::Duration,
};
use tokio::sync::broadcast;
use tracing_test::traced_test;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn scratch_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dso-host-{}-{name}", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

/// The demo bootstrap with the plugin linked in and the route file at `rds_path`.
fn demo_bootstrap(rds_path: &Path) -> Bootstrap {
    let config = Config::new(&Options::from_path(workspace_root().join("demos/conf/bootstrap.yaml"))).unwrap();
    let mut bootstrap = config.bootstrap;
    bootstrap.dynamic_resources = Some(DynamicResources { rds_path: rds_path.to_path_buf() });
    bootstrap
}

fn demo_registry() -> PluginRegistry {
    let registry = PluginRegistry::default();
    registry.register(PluginDescriptor::new_static("basic", basic_filter::entry_points())).unwrap();
    registry
}

/// Builds `demos/basic-filter` as a shared library, once per test binary, with the profile of this binary.
fn demo_module() -> &'static Path {
    static MODULE: OnceLock<PathBuf> = OnceLock::new();
    MODULE.get_or_init(|| {
        // <target>/<profile>/deps/<test binary>
        let exe = std::env::current_exe().unwrap();
        let profile_dir = exe.parent().and_then(Path::parent).unwrap();
        let profile = profile_dir.file_name().and_then(|name| name.to_str()).unwrap();
        let target_dir = profile_dir.parent().unwrap().join("dso-modules");

        let mut build = Command::new(env!("CARGO"));
        build.current_dir(workspace_root()).args(["build", "--quiet", "--lib", "-p", "basic-filter", "--target-dir"]);
        build.arg(&target_dir);
        if profile != "debug" {
            build.args(["--profile", profile]);
        }
        let status = build.status().unwrap();
        assert!(status.success(), "building the demo module failed: {status}");
        target_dir.join(profile).join(format!("{DLL_PREFIX}basic_filter{DLL_SUFFIX}"))
    })
}

/// The demo bootstrap loading the demo module from disk.
fn loaded_bootstrap(rds_path: &Path) -> Bootstrap {
    let mut bootstrap = demo_bootstrap(rds_path);
    bootstrap.bootstrap_extensions =
        vec![BootstrapExtension::Dso(DsoLibrary { so_id: "basic".into(), so_path: demo_module().to_path_buf() })];
    bootstrap
}

fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    pairs.iter().copied().collect()
}

fn body(events: &[(dso_lib::StreamId, StreamEvent)], upstream: bool) -> Vec<u8> {
    let mut body = Vec::new();
    for (_, event) in events {
        let frame = match (event, upstream) {
            (StreamEvent::Upstream(frame), true) | (StreamEvent::Downstream(frame), false) => frame,
            _ => continue,
        };
        if let Frame::Data { data, .. } = frame {
            body.extend_from_slice(data);
        }
    }
    body
}

fn empty_response(dispatcher: &mut Dispatcher, authority: &str, path: &str) -> Vec<u8> {
    let request = headers(&[(":method", "GET"), (":path", path), (":authority", authority)]);
    let id = dispatcher.decode_headers(request, true).unwrap();
    dispatcher.encode_headers(id, headers(&[(":status", "200")]), true).unwrap();
    body(&dispatcher.take_events(), false)
}

fn frame_headers(events: &[(StreamId, StreamEvent)], upstream: bool) -> Option<&HeaderMap> {
    events.iter().find_map(|(_, event)| match (event, upstream) {
        (StreamEvent::Upstream(Frame::Headers { headers, .. }), true)
        | (StreamEvent::Downstream(Frame::Headers { headers, .. }), false) => Some(headers),
        _ => None,
    })
}

async fn settle(dispatcher: &mut Dispatcher, id: StreamId) {
    while dispatcher.is_suspended(id) {
        let resumed = tokio::time::timeout(Duration::from_secs(5), dispatcher.process_next_resumption()).await;
        assert!(resumed.is_ok(), "stream {id} never resumed");
    }
}

/// One request and response through the basic filter, with the body in two chunks each way.
async fn exchange(dispatcher: &mut Dispatcher, path: &str) -> Vec<(StreamId, StreamEvent)> {
    let request = headers(&[
        (":method", "POST"),
        (":path", path),
        (":authority", "example.com"),
        ("x-test-header-0", "zero"),
        ("x-test-header-1", "one"),
    ]);
    let id = dispatcher.decode_headers(request, false).unwrap();
    dispatcher.decode_data(id, Bytes::from_static(b"hello"), false).unwrap();
    dispatcher.decode_data(id, Bytes::from_static(b"world"), true).unwrap();
    settle(dispatcher, id).await;

    dispatcher.encode_headers(id, headers(&[(":status", "200")]), false).unwrap();
    dispatcher.encode_data(id, Bytes::from_static(b"good"), false).unwrap();
    dispatcher.encode_data(id, Bytes::from_static(b"bye"), true).unwrap();
    settle(dispatcher, id).await;
    dispatcher.take_events().into_iter().filter(|(stream, _)| *stream == id).collect()
}

const DEMO_ROUTES: &str = include_str!("../../demos/conf/routes.yaml");

#[traced_test]
#[test]
fn demo_bootstrap_serves_the_basic_filter() {
    let rds_path = scratch_file("demo-routes.yaml", DEMO_ROUTES);
    let host = Host::with_registry(&demo_bootstrap(&rds_path), demo_registry()).unwrap();
    assert_eq!(host.managers().len(), 2);
    assert!(host.managers().iter().all(|m| m.routes().is_some()));

    let mut ingress = host.dispatcher("ingress").unwrap();
    let id = ingress
        .decode_headers(headers(&[(":method", "POST"), (":path", "/test"), (":authority", "example.com")]), false)
        .unwrap();
    ingress.decode_data(id, Bytes::from_static(b"hello"), false).unwrap();
    ingress.decode_data(id, Bytes::from_static(b"world"), false).unwrap();
    ingress.decode_data(id, Bytes::new(), true).unwrap();
    assert_eq!(body(&ingress.take_events(), true), b"HELLOWORLD");
    assert_eq!(empty_response(&mut ingress, "example.com", "/wrap"), b"ok");
    assert!(empty_response(&mut ingress, "example.com", "/nowrap").is_empty());

    let mut dynamic = host.dispatcher("dynamic").unwrap();
    assert_eq!(empty_response(&mut dynamic, "v1.api.example.com:8080", "/anything"), b"ok");
    assert!(empty_response(&mut dynamic, "example.com", "/anything").is_empty());

    assert!(host.dispatcher("missing").is_none());
    assert_eq!(host.stats().snapshot().plugin_faults, 0);
    std::fs::remove_file(rds_path).ok();
}

#[traced_test]
#[tokio::test]
async fn reload_applies_the_route_file() {
    let rds_path = scratch_file("reload-routes.yaml", DEMO_ROUTES);
    let host = Host::with_registry(&demo_bootstrap(&rds_path), demo_registry()).unwrap();
    let dynamic = host.managers().iter().find(|m| m.name() == "dynamic").cloned().unwrap();
    let ingress = host.managers().iter().find(|m| m.name() == "ingress").cloned().unwrap();
    assert!(dynamic.routes().is_some());

    std::fs::write(&rds_path, "resources: []\n").unwrap();
    let changes = host.route_changes().unwrap();
    assert!(matches!(changes.as_slice(), [RouteConfigurationChange::Removed(name)] if name == "dynamic-routes"));

    let (control_tx, control_rx) = broadcast::channel(4);
    control_tx.send(ControlSignal::ReloadRoutes).unwrap();
    control_tx.send(ControlSignal::Shutdown(ShutdownSignal::Manual)).unwrap();
    host.serve(control_rx).await;

    assert!(logs_contain("shutting down on Manual"));
    assert!(dynamic.routes().is_none());
    // inline routes are not governed by the route file
    assert!(ingress.routes().is_some());
    std::fs::remove_file(rds_path).ok();
}

#[traced_test]
#[tokio::test]
async fn unreadable_route_file_keeps_routes_on_reload() {
    let rds_path = scratch_file("broken-routes.yaml", DEMO_ROUTES);
    let host = Host::with_registry(&demo_bootstrap(&rds_path), demo_registry()).unwrap();
    let dynamic = host.managers().iter().find(|m| m.name() == "dynamic").cloned().unwrap();
    let before = dynamic.routes().unwrap();

    std::fs::write(&rds_path, "resources: [").unwrap();
    let (control_tx, control_rx) = broadcast::channel(4);
    control_tx.send(ControlSignal::ReloadRoutes).unwrap();
    control_tx.send(ControlSignal::Shutdown(ShutdownSignal::Manual)).unwrap();
    host.serve(control_rx).await;

    assert!(logs_contain("route reload failed, keeping previous configuration"));
    assert!(std::sync::Arc::ptr_eq(&before, &dynamic.routes().unwrap()));
    std::fs::remove_file(rds_path).ok();
}

#[traced_test]
#[test]
fn startup_failures_are_fatal() {
    let missing = std::env::temp_dir().join(format!("dso-host-{}-missing.yaml", std::process::id()));
    let err = Host::with_registry(&demo_bootstrap(&missing), demo_registry()).unwrap_err();
    assert!(err.to_string().starts_with("failed to read route discovery file"));

    let rds_path = scratch_file("startup-routes.yaml", DEMO_ROUTES);
    let mut bootstrap = demo_bootstrap(&rds_path);
    bootstrap.bootstrap_extensions.clear();
    let err = Host::build(&bootstrap).unwrap_err();
    assert!(err.to_string().starts_with("invalid connection manager `ingress`"));

    bootstrap.bootstrap_extensions = vec![BootstrapExtension::Dso(DsoLibrary {
        so_id: "basic".into(),
        so_path: "/nonexistent/libbasic_filter.so".into(),
    })];
    let err = Host::build(&bootstrap).unwrap_err();
    assert!(err.to_string().starts_with("failed to load dso libraries"));
    std::fs::remove_file(rds_path).ok();
}

#[traced_test]
#[tokio::test]
async fn loaded_module_serves_every_variant() {
    let rds_path = scratch_file("loaded-routes.yaml", DEMO_ROUTES);
    let host = Host::build(&loaded_bootstrap(&rds_path)).unwrap();
    assert!(host.registry().get("basic").is_some_and(|plugin| plugin.is_loaded()));

    let mut ingress = host.dispatcher("ingress").unwrap();
    let variants = [
        "/test",
        "/test?async=1",
        "/test?sleep=1",
        "/test?async=1&sleep=1",
        "/test?data_sleep=1",
        "/test?async=1&data_sleep=1",
    ];
    for path in variants {
        let events = exchange(&mut ingress, path).await;
        let upstream = frame_headers(&events, true).unwrap();
        assert_eq!(upstream.first("test-x-set-header-0"), Some("foo"), "{path}");
        assert_eq!(upstream.first("x-test-header-0"), Some("zero"), "{path}");
        assert!(!upstream.contains("x-test-header-1"), "{path}");
        assert_eq!(body(&events, true), b"HELLOWORLD", "{path}");

        let downstream = frame_headers(&events, false).unwrap();
        assert_eq!(downstream.first("test-req-body-length"), Some("10"), "{path}");
        assert_eq!(downstream.first("test-path"), Some(path), "{path}");
        assert_eq!(body(&events, false), b"GOODBYE", "{path}");
        assert_eq!(events.last().map(|(_, event)| event), Some(&StreamEvent::Complete), "{path}");
    }

    assert_eq!(empty_response(&mut ingress, "example.com", "/wrap"), b"ok");
    let mut dynamic = host.dispatcher("dynamic").unwrap();
    assert_eq!(empty_response(&mut dynamic, "api.example.com", "/"), b"ok");
    assert_eq!(ingress.active_streams(), 0);
    assert_eq!(host.stats().snapshot().plugin_faults, 0);
    std::fs::remove_file(rds_path).ok();
}

#[traced_test]
#[tokio::test]
async fn panic_in_loaded_module_fails_only_its_stream() {
    let rds_path = scratch_file("panic-routes.yaml", DEMO_ROUTES);
    let host = Host::build(&loaded_bootstrap(&rds_path)).unwrap();
    let mut ingress = host.dispatcher("ingress").unwrap();

    let request = headers(&[(":method", "GET"), (":path", "/test?panic=1"), (":authority", "example.com")]);
    let id = ingress.decode_headers(request, true).unwrap();
    let events = ingress.take_events();
    assert_eq!(frame_headers(&events, false).and_then(HeaderMap::status), Some(500));
    assert_eq!(body(&events, false), b"plugin fault");
    assert!(frame_headers(&events, true).is_none());
    assert!(ingress.decode_data(id, Bytes::from_static(b"late"), true).is_err());
    assert!(logs_contain("asked to panic by /test?panic=1"));

    let events = exchange(&mut ingress, "/test?async=1").await;
    assert_eq!(body(&events, true), b"HELLOWORLD");
    assert_eq!(body(&events, false), b"GOODBYE");
    assert_eq!(host.stats().snapshot().plugin_faults, 1);
    std::fs::remove_file(rds_path).ok();
}

#[traced_test]
#[tokio::test]
async fn double_resume_from_loaded_module_is_logged_by_the_host() {
    let rds_path = scratch_file("double-routes.yaml", DEMO_ROUTES);
    let host = Host::build(&loaded_bootstrap(&rds_path)).unwrap();
    let mut ingress = host.dispatcher("ingress").unwrap();

    // the stream stays open, so the second resume finds the token consumed rather than gone
    let request = headers(&[(":method", "POST"), (":path", "/test?resume_twice=1"), (":authority", "example.com")]);
    let id = ingress.decode_headers(request, false).unwrap();
    settle(&mut ingress, id).await;
    for _ in 0..500 {
        if host.stats().snapshot().double_resumes > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(host.stats().snapshot().double_resumes, 1);
    assert_eq!(ingress.process_ready_resumptions(), 0);
    assert!(logs_contain("continuation resumed more than once"));

    ingress.decode_data(id, Bytes::from_static(b"hello"), true).unwrap();
    let events = ingress.take_events();
    let upstream = frame_headers(&events, true).unwrap();
    assert_eq!(upstream.first("test-x-set-header-0"), Some("foo"));
    assert_eq!(body(&events, true), b"HELLO");
    assert_eq!(host.stats().snapshot().stale_continuations, 0);
    assert_eq!(host.stats().snapshot().plugin_faults, 0);
    std::fs::remove_file(rds_path).ok();
}
