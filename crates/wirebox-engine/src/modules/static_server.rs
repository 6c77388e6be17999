#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use core::net::Ipv4Addr;

use wirebox_fs::{Fs, FsError, NodeKind, SeedNode};
use wirebox_net_stack::{Action, Endpoint, EndpointConfig, Millis};
use wirebox_packet::MacAddr;

use crate::log::{LogLevel, LogRecord};
use crate::machine::{FrameOut, Machine, MachineOutputs};
use crate::EngineError;

const HTTP_PORT: u16 = 80;
const SERVER_HEADER: &str = "wirebox-static/1.0";

/// A request that grows past this without a complete header block is
/// abandoned.
const REQUEST_BUFFER_LIMIT: usize = 16 * 1024;

const MIME_TYPES: &[(&str, &str)] = &[
    ("css", "text/css"),
    ("gif", "image/gif"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/x-icon"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("svg", "image/svg+xml"),
    ("txt", "text/plain"),
    ("wasm", "application/wasm"),
    ("xml", "application/xml"),
];

fn mime_for(path: &str) -> &'static str {
    path.rsplit_once('.')
        .and_then(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            MIME_TYPES
                .iter()
                .find(|(e, _)| *e == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or("application/octet-stream")
}

type ConnKey = (Ipv4Addr, u16, u16);

struct Response {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
    location: Option<String>,
    allow: Option<&'static str>,
}

impl Response {
    fn page(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            content_type: "text/html",
            body: format!("<html><body><h1>{status} {reason}</h1></body></html>").into_bytes(),
            location: None,
            allow: None,
        }
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nServer: {SERVER_HEADER}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len(),
        );
        if let Some(location) = &self.location {
            head.push_str(&format!("Location: {location}\r\n"));
        }
        if let Some(allow) = self.allow {
            head.push_str(&format!("Allow: {allow}\r\n"));
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}

/// Static HTTP file server on port 80, backed by the in-memory filesystem.
pub struct StaticServer {
    id: String,
    endpoint: Endpoint,
    fs: Fs,
    show_directory_listing: bool,
    requests: HashMap<ConnKey, Vec<u8>>,
}

impl StaticServer {
    pub fn new(
        id: &str,
        mac: MacAddr,
        ip: Ipv4Addr,
        files: &BTreeMap<String, SeedNode>,
        show_directory_listing: bool,
        seed: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            endpoint: Endpoint::new(EndpointConfig {
                mac,
                ip,
                open_ports: vec![HTTP_PORT],
                seed,
            }),
            fs: Fs::from_seed(files),
            show_directory_listing,
            requests: HashMap::new(),
        }
    }

    fn process_actions(&mut self, actions: Vec<Action>, now: Millis) -> MachineOutputs {
        let mut out = MachineOutputs::default();
        for action in actions {
            match action {
                Action::EmitFrame(frame) => out.frames.push(FrameOut { port: 0, frame }),
                Action::Data {
                    remote_ip,
                    remote_port,
                    local_port,
                    data,
                    eof,
                } => {
                    let key = (remote_ip, remote_port, local_port);
                    if eof {
                        self.requests.remove(&key);
                        continue;
                    }
                    let buf = self.requests.entry(key).or_default();
                    buf.extend_from_slice(&data);
                    if let Some(end) = super::http::header_end(buf) {
                        let head = buf[..end].to_vec();
                        self.requests.remove(&key);
                        self.serve(key, &head, now, &mut out);
                    } else if buf.len() > REQUEST_BUFFER_LIMIT {
                        self.requests.remove(&key);
                        out.logs.push(LogRecord::new(
                            now,
                            LogLevel::Warn,
                            &self.id,
                            "request without header boundary exceeded buffer limit",
                        ));
                    }
                }
                // The server never opens connections.
                Action::Connected { .. } | Action::ConnectFailed { .. } => {}
            }
        }
        out
    }

    fn serve(&mut self, key: ConnKey, head: &[u8], now: Millis, out: &mut MachineOutputs) {
        let (method, target) = match parse_request_line(head) {
            Some(parts) => parts,
            None => {
                out.logs.push(LogRecord::new(
                    now,
                    LogLevel::Warn,
                    &self.id,
                    "malformed request line",
                ));
                self.reply(key, &Response::page(400, "Bad Request"), false, now, out);
                return;
            }
        };
        let head_only = method == "HEAD";
        let response = self.respond(&method, &target);
        out.logs.push(LogRecord::new(
            now,
            LogLevel::Info,
            &self.id,
            format!("{method} {target} -> {}", response.status),
        ));
        self.reply(key, &response, head_only, now, out);
    }

    fn reply(
        &mut self,
        key: ConnKey,
        response: &Response,
        head_only: bool,
        now: Millis,
        out: &mut MachineOutputs,
    ) {
        let (remote_ip, remote_port, local_port) = key;
        let mut actions = Vec::new();
        match self.endpoint.send(
            remote_ip,
            remote_port,
            local_port,
            &response.header_bytes(),
            now,
        ) {
            Ok(sent) => actions.extend(sent),
            Err(err) => {
                out.logs.push(LogRecord::new(
                    now,
                    LogLevel::Error,
                    &self.id,
                    format!("failed to send response headers: {err}"),
                ));
                return;
            }
        }
        if !head_only && !response.body.is_empty() {
            match self
                .endpoint
                .send(remote_ip, remote_port, local_port, &response.body, now)
            {
                Ok(sent) => actions.extend(sent),
                Err(err) => out.logs.push(LogRecord::new(
                    now,
                    LogLevel::Error,
                    &self.id,
                    format!("failed to send response body: {err}"),
                )),
            }
        }
        for action in actions {
            if let Action::EmitFrame(frame) = action {
                out.frames.push(FrameOut { port: 0, frame });
            }
        }
    }

    fn respond(&self, method: &str, target: &str) -> Response {
        if method != "GET" && method != "HEAD" {
            let mut response = Response::page(405, "Method Not Allowed");
            response.allow = Some("GET, HEAD");
            return response;
        }

        // Query and fragment play no part in path resolution.
        let path = target.split(['?', '#']).next().unwrap_or(target);
        let trailing_slash = path.ends_with('/');
        let canonical = match sanitize(path) {
            Some(canonical) => canonical,
            None => return Response::page(403, "Forbidden"),
        };

        let is_dir = canonical == "/"
            || matches!(
                self.fs.stat(&canonical),
                Ok(stat) if stat.kind == NodeKind::Dir
            );
        if is_dir {
            if !trailing_slash && canonical != "/" {
                let mut response = Response::page(301, "Moved Permanently");
                response.location = Some(format!("{canonical}/"));
                return response;
            }
            let index = if canonical == "/" {
                "/index.html".to_string()
            } else {
                format!("{canonical}/index.html")
            };
            if self.fs.exists(&index) {
                return self.serve_file(&index);
            }
            if self.show_directory_listing {
                return self.listing(&canonical);
            }
            return Response::page(403, "Forbidden");
        }

        self.serve_file(&canonical)
    }

    fn serve_file(&self, path: &str) -> Response {
        match self.fs.read_file(path) {
            Ok(bytes) => Response {
                status: 200,
                reason: "OK",
                content_type: mime_for(path),
                body: bytes.to_vec(),
                location: None,
                allow: None,
            },
            Err(FsError::NotFound(_)) => Response::page(404, "Not Found"),
            Err(_) => Response::page(500, "Internal Server Error"),
        }
    }

    fn listing(&self, path: &str) -> Response {
        let entries = match self.fs.read_dir(path) {
            Ok(entries) => entries,
            Err(FsError::NotFound(_)) => return Response::page(404, "Not Found"),
            Err(_) => return Response::page(500, "Internal Server Error"),
        };
        let mut body = format!("<html><head><title>Index of {path}</title></head><body><h1>Index of {path}</h1><ul>");
        for entry in entries {
            let suffix = if entry.kind == NodeKind::Dir { "/" } else { "" };
            body.push_str(&format!(
                "<li><a href=\"{0}{1}\">{0}{1}</a></li>",
                entry.name, suffix
            ));
        }
        body.push_str("</ul></body></html>");
        Response {
            status: 200,
            reason: "OK",
            content_type: "text/html",
            body: body.into_bytes(),
            location: None,
            allow: None,
        }
    }
}

impl Machine for StaticServer {
    fn start(&mut self, now: Millis) -> Result<MachineOutputs, EngineError> {
        let mut out = MachineOutputs::default();
        out.logs.push(LogRecord::new(
            now,
            LogLevel::Info,
            &self.id,
            format!(
                "static server listening on {}:{HTTP_PORT}",
                self.endpoint.ip()
            ),
        ));
        Ok(out)
    }

    fn handle_frame(
        &mut self,
        _port: u16,
        frame: &[u8],
        now: Millis,
    ) -> Result<MachineOutputs, EngineError> {
        let actions = self.endpoint.handle_frame(frame, now);
        Ok(self.process_actions(actions, now))
    }

    fn on_tick(&mut self, now: Millis) -> Result<MachineOutputs, EngineError> {
        let actions = self.endpoint.on_tick(now);
        Ok(self.process_actions(actions, now))
    }
}

/// Resolves `.` and `..` textually. `None` means the path tried to escape
/// the document root.
fn sanitize(path: &str) -> Option<String> {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop()?;
            }
            other => components.push(other),
        }
    }
    if components.is_empty() {
        Some("/".to_string())
    } else {
        Some(format!("/{}", components.join("/")))
    }
}

fn parse_request_line(head: &[u8]) -> Option<(String, String)> {
    let text = core::str::from_utf8(head).ok()?;
    let line = text.split("\r\n").next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    Some((method.to_string(), target.to_string()))
}
