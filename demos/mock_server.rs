//! Mock localization service for exercising a session without the real
//! mapping backend.
//!
//!   - `POST /upload` accepts the multipart capture (`image` + `meta_json`)
//!   - the first album image is answered with `firstAlbumFrame: true`
//!   - after `SCENELOCK_MOCK_FRAMES` uploads (default 3) the reference pose
//!     (identity rotation, 2 m along +Z) is returned
//!   - `GET /ping` answers 200
//!
//! Usage:
//!   cargo run --example mock_server [port]

use serde_json::{json, Value};
use std::io::Read as _;

const DEFAULT_PORT: u16 = 5000;

fn main() {
    env_logger::init();

    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let frames_needed: usize = std::env::var("SCENELOCK_MOCK_FRAMES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);

    let server = match tiny_http::Server::http(("0.0.0.0", port)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    eprintln!("[MOCK] Listening on http://0.0.0.0:{}/upload", port);
    eprintln!("[MOCK] Localizing after {} uploads", frames_needed);

    let mut uploads = 0usize;
    let mut album_acked = false;

    for mut request in server.incoming_requests() {
        let method = request.method().to_string();
        let url = request.url().to_string();

        let (status, body) = match (method.as_str(), url.as_str()) {
            ("GET", "/ping") => (200, json!({ "ok": true })),
            ("POST", "/upload") => {
                let mut data = Vec::new();
                if let Err(e) = request.as_reader().read_to_end(&mut data) {
                    eprintln!("[MOCK] read error: {}", e);
                    continue;
                }
                let meta = extract_meta(&data);
                uploads += 1;

                let from_album = meta
                    .as_ref()
                    .and_then(|m| m.get("isFromAlbum"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if let Some(m) = &meta {
                    eprintln!(
                        "[MOCK] #{} {} bytes, frame {}/{}/{}, album={}",
                        uploads,
                        data.len(),
                        m["movieName"].as_str().unwrap_or("-"),
                        m["sceneName"].as_str().unwrap_or("-"),
                        m["frameId"].as_str().unwrap_or("-"),
                        from_album
                    );
                } else {
                    eprintln!("[MOCK] #{} without meta_json", uploads);
                }

                if from_album && !album_acked {
                    album_acked = true;
                    (
                        202,
                        json!({
                            "success": false,
                            "reason": "album frame received",
                            "firstAlbumFrame": true,
                        }),
                    )
                } else if uploads < frames_needed {
                    (202, json!({ "success": false, "reason": "please keep scanning" }))
                } else {
                    (
                        200,
                        json!({
                            "success": true,
                            "session_pose": {
                                "translation": [0.0, 0.0, 2.0],
                                "rotation_xyzw": [0.0, 0.0, 0.0, 1.0],
                            },
                        }),
                    )
                }
            }
            _ => (404, json!({ "success": false, "reason": "not found" })),
        };

        let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
            .expect("static header");
        let response = tiny_http::Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header(header);
        if let Err(e) = request.respond(response) {
            eprintln!("[MOCK] respond error: {}", e);
        }
    }
}

/// Pull the `meta_json` part out of a multipart body.
fn extract_meta(body: &[u8]) -> Option<Value> {
    let marker = b"name=\"meta_json\"";
    let start = find(body, marker)?;
    let rest = &body[start..];
    let content = find(rest, b"\r\n\r\n")? + 4;
    let rest = &rest[content..];
    let end = find(rest, b"\r\n--").unwrap_or(rest.len());
    serde_json::from_slice(&rest[..end]).ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
