#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use core::net::Ipv4Addr;

use wirebox_net_stack::{Action, Endpoint, EndpointConfig, Millis};
use wirebox_packet::MacAddr;

use crate::bridge::{FetchRequest, FetchResponse};
use crate::log::{LogLevel, LogRecord};
use crate::machine::{FrameOut, Machine, MachineEvent, MachineOutputs};
use crate::EngineError;

const DEFAULT_HTTP_PORT: u16 = 80;
const USER_AGENT: &str = "wirebox-browser/1.0";

type ConnKey = (Ipv4Addr, u16, u16);

/// One in-flight HTTP exchange, keyed by its TCP connection.
struct Exchange {
    request_id: u64,
    request: Vec<u8>,
    /// HEAD responses carry a Content-Length but no body.
    head: bool,
    buf: Vec<u8>,
    /// Offset just past the response header block once it has been seen.
    header_end: Option<usize>,
    status: u16,
    status_text: String,
    headers: BTreeMap<String, String>,
    content_length: Option<usize>,
}

/// HTTP client machine bridging fetch commands onto the virtual network.
pub struct Browser {
    id: String,
    endpoint: Endpoint,
    target_url: String,
    exchanges: HashMap<ConnKey, Exchange>,
}

impl Browser {
    pub fn new(id: &str, mac: MacAddr, ip: Ipv4Addr, target_url: &str, seed: u64) -> Self {
        Self {
            id: id.to_string(),
            endpoint: Endpoint::new(EndpointConfig {
                mac,
                ip,
                open_ports: vec![],
                seed,
            }),
            target_url: target_url.to_string(),
            exchanges: HashMap::new(),
        }
    }

    fn fetch(&mut self, request: FetchRequest, now: Millis) -> MachineOutputs {
        let mut out = MachineOutputs::default();

        // Requests addressed to other browser instances are not ours.
        let our_mac = self.endpoint.mac().to_string();
        if !request.client_id.contains(&our_mac) {
            out.logs.push(LogRecord::new(
                now,
                LogLevel::Debug,
                &self.id,
                format!("ignoring fetch {} for {:?}", request.request_id, request.client_id),
            ));
            return out;
        }

        let (ip, port, host) = match parse_target(&self.target_url) {
            Some(target) => target,
            None => {
                out.logs.push(LogRecord::new(
                    now,
                    LogLevel::Error,
                    &self.id,
                    format!("unusable target URL {:?}", self.target_url),
                ));
                out.fetch_responses
                    .push(FetchResponse::failure(request.request_id, "bad target URL"));
                return out;
            }
        };

        let request_bytes = build_request(&request, &host);
        match self.endpoint.connect(ip, port, now) {
            Ok((local_port, actions)) => {
                out.logs.push(LogRecord::new(
                    now,
                    LogLevel::Info,
                    &self.id,
                    format!(
                        "fetch {}: {} {} -> {ip}:{port}",
                        request.request_id, request.method, request.path
                    ),
                ));
                self.exchanges.insert(
                    (ip, port, local_port),
                    Exchange {
                        request_id: request.request_id,
                        request: request_bytes,
                        head: request.method.eq_ignore_ascii_case("HEAD"),
                        buf: Vec::new(),
                        header_end: None,
                        status: 0,
                        status_text: String::new(),
                        headers: BTreeMap::new(),
                        content_length: None,
                    },
                );
                out.merge(self.process_actions(actions, now));
            }
            Err(err) => {
                out.fetch_responses
                    .push(FetchResponse::failure(request.request_id, err.to_string()));
            }
        }
        out
    }

    fn process_actions(&mut self, actions: Vec<Action>, now: Millis) -> MachineOutputs {
        let mut out = MachineOutputs::default();
        for action in actions {
            match action {
                Action::EmitFrame(frame) => out.frames.push(FrameOut { port: 0, frame }),
                Action::Connected {
                    remote_ip,
                    remote_port,
                    local_port,
                } => {
                    let key = (remote_ip, remote_port, local_port);
                    let Some(exchange) = self.exchanges.get(&key) else {
                        continue;
                    };
                    let request = exchange.request.clone();
                    match self
                        .endpoint
                        .send(remote_ip, remote_port, local_port, &request, now)
                    {
                        Ok(actions) => out.merge(self.process_actions(actions, now)),
                        Err(err) => {
                            if let Some(exchange) = self.exchanges.remove(&key) {
                                out.fetch_responses.push(FetchResponse::failure(
                                    exchange.request_id,
                                    err.to_string(),
                                ));
                            }
                        }
                    }
                }
                Action::ConnectFailed {
                    remote_ip,
                    remote_port,
                    local_port,
                    reason,
                } => {
                    let key = (remote_ip, remote_port, local_port);
                    if let Some(exchange) = self.exchanges.remove(&key) {
                        out.logs.push(LogRecord::new(
                            now,
                            LogLevel::Warn,
                            &self.id,
                            format!("fetch {} failed: {reason}", exchange.request_id),
                        ));
                        out.fetch_responses
                            .push(FetchResponse::failure(exchange.request_id, reason.to_string()));
                    }
                }
                Action::Data {
                    remote_ip,
                    remote_port,
                    local_port,
                    data,
                    eof,
                } => {
                    let key = (remote_ip, remote_port, local_port);
                    self.on_data(key, &data, eof, now, &mut out);
                }
            }
        }
        out
    }

    fn on_data(
        &mut self,
        key: ConnKey,
        data: &[u8],
        eof: bool,
        now: Millis,
        out: &mut MachineOutputs,
    ) {
        let Some(exchange) = self.exchanges.get_mut(&key) else {
            return;
        };
        exchange.buf.extend_from_slice(data);

        if exchange.header_end.is_none() {
            if let Some(end) = super::http::header_end(&exchange.buf) {
                if !exchange.parse_head(end) {
                    let exchange = match self.exchanges.remove(&key) {
                        Some(exchange) => exchange,
                        None => return,
                    };
                    out.fetch_responses.push(FetchResponse::failure(
                        exchange.request_id,
                        "malformed response head",
                    ));
                    return;
                }
            }
        }

        let complete = match (exchange.header_end, exchange.content_length) {
            (Some(_), _) if exchange.head => true,
            (Some(end), Some(length)) => exchange.buf.len() - end >= length,
            // Without a Content-Length the response runs to EOF.
            _ => false,
        };

        if complete || (eof && exchange.header_end.is_some()) {
            if let Some(exchange) = self.exchanges.remove(&key) {
                out.fetch_responses.push(exchange.into_response());
            }
        } else if eof {
            if let Some(exchange) = self.exchanges.remove(&key) {
                out.logs.push(LogRecord::new(
                    now,
                    LogLevel::Warn,
                    &self.id,
                    format!("fetch {}: connection closed before headers", exchange.request_id),
                ));
                out.fetch_responses.push(FetchResponse::failure(
                    exchange.request_id,
                    "connection closed before headers",
                ));
            }
        }
    }
}

impl Exchange {
    /// Parses the status line and headers ending at `end`. Returns false if
    /// the head is not valid HTTP.
    fn parse_head(&mut self, end: usize) -> bool {
        let Ok(text) = core::str::from_utf8(&self.buf[..end]) else {
            return false;
        };
        let mut lines = text.split("\r\n");
        let Some(status_line) = lines.next() else {
            return false;
        };
        let mut parts = status_line.splitn(3, ' ');
        let Some(version) = parts.next() else {
            return false;
        };
        if !version.starts_with("HTTP/") {
            return false;
        }
        let Some(status) = parts.next().and_then(|s| s.parse::<u16>().ok()) else {
            return false;
        };
        self.status = status;
        self.status_text = parts.next().unwrap_or("").to_string();
        let header_text = &text[status_line.len().min(text.len())..];
        self.headers = super::http::parse_headers(header_text);
        self.content_length = self
            .headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok());
        self.header_end = Some(end);
        true
    }

    fn into_response(self) -> FetchResponse {
        let end = self.header_end.unwrap_or(self.buf.len());
        let mut body = self.buf[end..].to_vec();
        if let Some(length) = self.content_length {
            body.truncate(length);
        }
        FetchResponse {
            request_id: self.request_id,
            ok: (200..300).contains(&self.status),
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body,
            error: None,
        }
    }
}

impl Machine for Browser {
    fn start(&mut self, now: Millis) -> Result<MachineOutputs, EngineError> {
        let mut out = MachineOutputs::default();
        out.logs.push(LogRecord::new(
            now,
            LogLevel::Info,
            &self.id,
            format!("browser targeting {}", self.target_url),
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

    fn handle_event(
        &mut self,
        event: MachineEvent,
        now: Millis,
    ) -> Result<MachineOutputs, EngineError> {
        match event {
            MachineEvent::Fetch(request) => Ok(self.fetch(request, now)),
            MachineEvent::UpdateDomain { url } => {
                let mut out = MachineOutputs::default();
                out.logs.push(LogRecord::new(
                    now,
                    LogLevel::Info,
                    &self.id,
                    format!("target URL changed to {url}"),
                ));
                self.target_url = url;
                Ok(out)
            }
            MachineEvent::SendInput { .. } => Ok(MachineOutputs::default()),
        }
    }

    fn on_tick(&mut self, now: Millis) -> Result<MachineOutputs, EngineError> {
        let actions = self.endpoint.on_tick(now);
        Ok(self.process_actions(actions, now))
    }
}

/// Pulls host IP and port out of an `http://host[:port][/...]` URL. The host
/// must be a literal IPv4 address; there is no resolver on this network.
fn parse_target(url: &str) -> Option<(Ipv4Addr, u16, String)> {
    let rest = url.strip_prefix("http://")?;
    let authority = rest.split('/').next()?;
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => (authority, DEFAULT_HTTP_PORT),
    };
    let ip = host.parse::<Ipv4Addr>().ok()?;
    Some((ip, port, authority.to_string()))
}

fn build_request(request: &FetchRequest, host: &str) -> Vec<u8> {
    let path = if request.path.starts_with('/') {
        request.path.clone()
    } else {
        format!("/{}", request.path)
    };
    let mut headers: BTreeMap<String, String> = BTreeMap::from([
        ("Host".to_string(), host.to_string()),
        ("Connection".to_string(), "close".to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
        ("Accept".to_string(), "*/*".to_string()),
    ]);
    for (name, value) in &request.headers {
        headers.insert(name.clone(), value.clone());
    }
    let mut text = format!("{} {path} HTTP/1.1\r\n", request.method);
    for (name, value) in &headers {
        text.push_str(&format!("{name}: {value}\r\n"));
    }
    text.push_str("\r\n");
    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_urls_parse() {
        assert_eq!(
            parse_target("http://192.168.1.2"),
            Some((Ipv4Addr::new(192, 168, 1, 2), 80, "192.168.1.2".to_string()))
        );
        assert_eq!(
            parse_target("http://10.0.0.1:8080/path"),
            Some((Ipv4Addr::new(10, 0, 0, 1), 8080, "10.0.0.1:8080".to_string()))
        );
        assert_eq!(parse_target("https://192.168.1.2"), None);
        assert_eq!(parse_target("http://server.lan"), None);
    }

    #[test]
    fn request_merges_default_headers() {
        let request = FetchRequest {
            request_id: 1,
            client_id: "c".to_string(),
            url: "http://192.168.1.2/x".to_string(),
            path: "x".to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::from([("User-Agent".to_string(), "custom".to_string())]),
        };
        let text = String::from_utf8(build_request(&request, "192.168.1.2")).unwrap();
        assert!(text.starts_with("GET /x HTTP/1.1\r\n"));
        assert!(text.contains("Host: 192.168.1.2\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("User-Agent: custom\r\n"));
        assert!(!text.contains(USER_AGENT));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
