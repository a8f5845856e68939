//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Stand-in for the graph processing tool. It writes a minimal product at
/// the `-t` target, or at the last `<file>` of a graph, and appends every
/// call to `calls.log` next to itself.
const FAKE_GPT: &str = r#"#!/bin/sh
here=$(dirname "$0")
echo "$1" >> "$here/calls.log"
first="$1"
target=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-t" ]; then target="$2"; fi
  shift
done
if [ -z "$target" ]; then
  target=$(grep -o '<file>[^<]*</file>' "$first" | tail -n 1 | sed -e 's/<[^>]*>//g' -e 's/\.dim$//')
fi
mkdir -p "$target.data"
echo "<Dimap_Document/>" > "$target.dim"
echo "ENVI" > "$target.data/Sigma0_VV.hdr"
echo "fake" > "$target.data/Sigma0_VV.img"
"#;

/// Tool that always fails
const FAILING_GPT: &str = "#!/bin/sh\necho \"Error: operator failed\" >&2\nexit 1\n";

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("Failed to chmod script");
    path
}

#[cfg(unix)]
pub fn fake_gpt(dir: &Path) -> PathBuf {
    write_script(dir, "gpt", FAKE_GPT)
}

#[cfg(unix)]
pub fn failing_gpt(dir: &Path) -> PathBuf {
    write_script(dir, "gpt_failing", FAILING_GPT)
}

/// Operators and graphs the fake tool was called with
pub fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(|l| {
            Path::new(l)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| l.to_string())
        })
        .collect()
}

/// Create a downloaded scene archive with its marker
pub fn fake_download(download_dir: &Path, scene_id: &str) -> PathBuf {
    let scene = ardflow::Sentinel1Scene::new(scene_id).expect("Invalid scene id");
    let path = scene.download_path(download_dir);
    std::fs::create_dir_all(path.parent().expect("No parent")).expect("Failed to create download dir");
    std::fs::write(&path, "not a zip").expect("Failed to write archive");
    std::fs::write(scene.download_marker(download_dir), "").expect("Failed to write marker");
    path
}

/// Request heads received by a [`stub_server`]
pub type Requests = Arc<Mutex<Vec<String>>>;

/// Local HTTP server answering each request with `respond(head)`, where the
/// head is the request line plus headers. Returns the base url.
pub fn stub_server<F>(respond: F) -> (String, Requests)
where
    F: Fn(&str) -> (u16, Vec<u8>) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind stub server");
    let url = format!("http://{}", listener.local_addr().expect("No local address"));
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                match stream.read(&mut byte) {
                    Ok(1) => head.push(byte[0]),
                    _ => break,
                }
            }
            let head = String::from_utf8_lossy(&head).into_owned();
            let (status, body) = respond(&head);
            seen.lock().expect("Stub server lock poisoned").push(head);
            let reason = match status {
                200 => "OK",
                206 => "Partial Content",
                404 => "Not Found",
                _ => "Error",
            };
            let header = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                reason,
                body.len()
            );
            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(&body);
        }
    });
    (url, requests)
}

/// Value of a request header, matched case-insensitively
pub fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
    })
}

/// Product archive with a single member
pub fn zip_archive() -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer
            .start_file("S1A.SAFE/manifest.safe", options)
            .expect("Failed to start zip member");
        writer.write_all(&[7u8; 4096]).expect("Failed to write zip member");
        writer.finish().expect("Failed to finish zip");
    }
    cursor.into_inner()
}
