use dupetriage::duplicates::{CandidateGroup, DetectionMode};
use dupetriage::review::{start_server, ReviewApi, ReviewStateStore, ServerHandle};
use dupetriage::scanner::FileRecord;
use dupetriage::staging::{StagedGroup, StagingManager};
use serde_json::Value;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct Review {
    _dir: TempDir,
    decision: PathBuf,
    api: Arc<ReviewApi>,
    group: StagedGroup,
    server: ServerHandle,
}

fn review(mode: DetectionMode) -> Review {
    let dir = tempdir().unwrap();
    let root = dir.path().join("photos");
    let decision = dir.path().join("review");
    let mut files = Vec::new();
    for (folder, name) in [("x", "a.jpg"), ("y", "b.jpg"), ("y", "c.png")] {
        let path = root.join(folder).join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("bytes of {name}")).unwrap();
        files.push(FileRecord::new(path, 10));
    }
    let candidate = CandidateGroup {
        mode,
        threshold: mode.is_perceptual().then_some(6),
        digest: "0123456789abcdef".repeat(4),
        files,
    };
    let group = StagingManager::new(&decision)
        .stage_all(vec![candidate])
        .unwrap()
        .staged
        .remove(0);

    let api = Arc::new(ReviewApi::new(&decision, ReviewStateStore::new(&decision)));
    let server = start_server(Arc::clone(&api), "127.0.0.1", 0).unwrap();
    Review {
        _dir: dir,
        decision,
        api,
        group,
        server,
    }
}

struct Response {
    status: u16,
    head: String,
    body: Vec<u8>,
}

impl Response {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

fn send(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> Response {
    let body = body.unwrap_or("");
    let mut stream = TcpStream::connect(addr).unwrap();
    write!(
        stream,
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has a header block");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let mut body = raw[split + 4..].to_vec();
    if head.to_ascii_lowercase().contains("transfer-encoding: chunked") {
        body = dechunk(&body);
    }
    Response { status, head, body }
}

fn dechunk(mut data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = data.windows(2).position(|w| w == b"\r\n").unwrap();
        let size = usize::from_str_radix(
            std::str::from_utf8(&data[..line_end]).unwrap().trim(),
            16,
        )
        .unwrap();
        if size == 0 {
            return out;
        }
        let start = line_end + 2;
        out.extend_from_slice(&data[start..start + size]);
        data = &data[start + size + 2..];
    }
}

#[test]
fn test_group_endpoint_reports_active_group() {
    let r = review(DetectionMode::Exact);
    let addr = r.server.addr();

    let inactive = send(addr, "GET", "/api/group", None);
    assert_eq!(inactive.status, 200);
    assert_eq!(inactive.json()["active"], false);

    r.api.activate(&r.group).unwrap();
    let active = send(addr, "GET", "/api/group", None).json();
    assert_eq!(active["active"], true);
    assert_eq!(active["group_id"], 1);
    assert_eq!(active["mode"], "exact");
    assert_eq!(active["items"].as_array().unwrap().len(), 3);
    assert_eq!(active["items"][0]["name"], "a.jpg");
    assert_eq!(active["items"][0]["folder_name"], "x");
    assert_eq!(active["finished_clicks"], 0);
}

#[test]
fn test_mutations_without_active_group_are_rejected() {
    let r = review(DetectionMode::Exact);
    let addr = r.server.addr();

    for path in [
        "/api/finished",
        "/api/reset_finished",
        "/api/toggle_auto_finish",
    ] {
        let response = send(addr, "POST", path, Some("{}"));
        assert_eq!(response.status, 400, "{path}");
        assert_eq!(response.json()["ok"], false);
    }
    let response = send(addr, "POST", "/api/toggle_keep", Some(r#"{"name":"a.jpg"}"#));
    assert_eq!(response.status, 400);
}

#[test]
fn test_keep_and_finish_flow_over_http() {
    let r = review(DetectionMode::Exact);
    let addr = r.server.addr();
    r.api.activate(&r.group).unwrap();

    let keep = send(addr, "POST", "/api/toggle_keep", Some(r#"{"name":"b.jpg"}"#));
    assert_eq!(keep.status, 200);
    assert_eq!(keep.json()["keep"], serde_json::json!(["b.jpg"]));

    let unknown = send(addr, "POST", "/api/toggle_keep", Some(r#"{"name":"zzz.jpg"}"#));
    assert_eq!(unknown.status, 404);

    let first = send(addr, "POST", "/api/finished", Some("{}")).json();
    assert_eq!(first["confirmed"], false);
    assert_eq!(first["finished_clicks"], 1);

    let reset = send(addr, "POST", "/api/reset_finished", Some("{}")).json();
    assert_eq!(reset["finished_clicks"], 0);

    send(addr, "POST", "/api/finished", Some("{}"));
    let second = send(addr, "POST", "/api/finished", Some("{}")).json();
    assert_eq!(second["confirmed"], true);
    assert_eq!(second["finished_clicks"], 2);

    let late = send(addr, "POST", "/api/toggle_keep", Some(r#"{"name":"a.jpg"}"#));
    assert_eq!(late.status, 409);
    let late_reset = send(addr, "POST", "/api/reset_finished", Some("{}"));
    assert_eq!(late_reset.status, 409);

    let state = r.api.store().group(r.group.id).unwrap().unwrap();
    assert_eq!(state.keep.into_iter().collect::<Vec<_>>(), vec!["b.jpg"]);
}

#[test]
fn test_prefer_folder_over_http() {
    let r = review(DetectionMode::Exact);
    let addr = r.server.addr();
    r.api.activate(&r.group).unwrap();

    let folder = r.group.entries[1]
        .original
        .parent()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    let body = serde_json::json!({ "folder_path": folder }).to_string();

    let set = send(addr, "POST", "/api/prefer_folder", Some(&body)).json();
    assert_eq!(set["keep"], serde_json::json!(["b.jpg", "c.png"]));
    assert_eq!(set["preferred_folder"], Value::String(folder.clone()));

    let cleared = send(addr, "POST", "/api/prefer_folder", Some(&body)).json();
    assert_eq!(cleared["preferred_folder"], Value::Null);
    assert_eq!(cleared["keep"], serde_json::json!(["b.jpg", "c.png"]));
}

#[test]
fn test_auto_finish_unavailable_for_perceptual_groups() {
    let r = review(DetectionMode::Ahash);
    let addr = r.server.addr();
    r.api.activate(&r.group).unwrap();

    let response = send(addr, "POST", "/api/toggle_auto_finish", Some("{}"));
    assert_eq!(response.status, 400);
    let state = r.api.store().group(r.group.id).unwrap().unwrap();
    assert!(!state.auto_finish);
}

#[test]
fn test_auto_finish_fires_on_single_keep() {
    let r = review(DetectionMode::Exact);
    let addr = r.server.addr();
    r.api.activate(&r.group).unwrap();

    let toggled = send(addr, "POST", "/api/toggle_auto_finish", Some("{}")).json();
    assert_eq!(toggled["auto_finish"], true);

    send(addr, "POST", "/api/toggle_keep", Some(r#"{"name":"a.jpg"}"#));
    let view = send(addr, "GET", "/api/group", None).json();
    assert_eq!(view["finished_clicks"], 2);
    assert!(r.api.store().load().unwrap().auto_finish);
}

#[test]
fn test_serves_member_files() {
    let r = review(DetectionMode::Exact);
    let addr = r.server.addr();
    r.api.activate(&r.group).unwrap();

    let jpg = send(addr, "GET", "/files/a.jpg", None);
    assert_eq!(jpg.status, 200);
    assert_eq!(jpg.body, b"bytes of a.jpg");
    let head = jpg.head.to_ascii_lowercase();
    assert!(head.contains("content-type: image/jpeg"), "{head}");
    assert!(head.contains("cache-control: no-store"), "{head}");

    let png = send(addr, "GET", "/files/c.png", None);
    assert!(png.head.to_ascii_lowercase().contains("content-type: image/png"));

    let missing = send(addr, "GET", "/files/nope.jpg", None);
    assert_eq!(missing.status, 404);
}

#[test]
fn test_rejects_path_traversal() {
    let r = review(DetectionMode::Exact);
    let addr = r.server.addr();
    r.api.activate(&r.group).unwrap();
    fs::write(r.decision.join("secret.txt"), b"secret").unwrap();

    for path in [
        "/files/../../etc/passwd",
        "/files/..%2F..%2Fetc%2Fpasswd",
        "/files/..%2Fsecret.txt",
        "/files/%2Fetc%2Fpasswd",
        "/files/..",
        "/files/a.jpg%5C..%5Csecret.txt",
    ] {
        let response = send(addr, "GET", path, None);
        assert!(
            (400..500).contains(&response.status),
            "{path} returned {}",
            response.status
        );
        assert_ne!(response.body, b"secret");
    }
}

#[test]
fn test_rejects_symlink_escaping_group_folder() {
    #[cfg(unix)]
    {
        let r = review(DetectionMode::Exact);
        let addr = r.server.addr();
        r.api.activate(&r.group).unwrap();

        let outside = r.decision.join("outside.jpg");
        fs::write(&outside, b"outside").unwrap();
        let staged = r.group.dir.join("a.jpg");
        fs::remove_file(&staged).unwrap();
        std::os::unix::fs::symlink(&outside, &staged).unwrap();

        let response = send(addr, "GET", "/files/a.jpg", None);
        assert_eq!(response.status, 400);
    }
}
