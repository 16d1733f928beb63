//! HTTP analyzer
//!
//! Extracts request and response headers into the flow's http
//! extension. A flow carries one request/response exchange: seeing a
//! second request (or second response) asks the cache to flush the
//! flow and restart it from the current packet, so each exchange
//! exports as its own record.

use httparse::Status;
use meter_common::ext::{ExtensionData, ExtensionId, HttpData, HTTP_TEMPLATE};
use meter_common::plugin::ActionMask;
use meter_common::{Flow, Packet};

use crate::plugin::ProcessPlugin;

const MAX_METHOD: usize = 16;
const MAX_HOST: usize = 64;
const MAX_URI: usize = 128;
const MAX_AGENT: usize = 128;
const MAX_REFERER: usize = 128;
const MAX_CONTENT_TYPE: usize = 32;
const MAX_HEADERS: usize = 32;

#[derive(Debug, Default)]
struct Parsed {
    request: bool,
    response: bool,
    method: String,
    host: String,
    uri: String,
    user_agent: String,
    referer: String,
    content_type: String,
    status_code: u16,
}

fn truncated(value: &[u8], cap: usize) -> String {
    let end = value.len().min(cap);
    String::from_utf8_lossy(&value[..end]).into_owned()
}

fn parse(payload: &[u8]) -> Option<Parsed> {
    if payload.is_empty() {
        return None;
    }
    if payload.starts_with(b"HTTP/") {
        parse_response(payload)
    } else {
        parse_request(payload)
    }
}

fn parse_request(payload: &[u8]) -> Option<Parsed> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(payload) {
        Ok(Status::Complete(_)) => {}
        _ => return None,
    }
    let mut out = Parsed {
        request: true,
        method: truncated(req.method?.as_bytes(), MAX_METHOD),
        uri: truncated(req.path?.as_bytes(), MAX_URI),
        ..Parsed::default()
    };
    for h in req.headers.iter() {
        if h.name.eq_ignore_ascii_case("host") {
            out.host = truncated(h.value, MAX_HOST);
        } else if h.name.eq_ignore_ascii_case("user-agent") {
            out.user_agent = truncated(h.value, MAX_AGENT);
        } else if h.name.eq_ignore_ascii_case("referer") {
            out.referer = truncated(h.value, MAX_REFERER);
        }
    }
    Some(out)
}

fn parse_response(payload: &[u8]) -> Option<Parsed> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);
    match res.parse(payload) {
        Ok(Status::Complete(_)) => {}
        _ => return None,
    }
    let mut out = Parsed {
        response: true,
        status_code: res.code?,
        ..Parsed::default()
    };
    for h in res.headers.iter() {
        if h.name.eq_ignore_ascii_case("content-type") {
            out.content_type = truncated(h.value, MAX_CONTENT_TYPE);
        }
    }
    Some(out)
}

fn merge(data: &mut HttpData, parsed: &Parsed) {
    data.request_seen |= parsed.request;
    data.response_seen |= parsed.response;
    if !parsed.method.is_empty() {
        data.method = parsed.method.clone();
    }
    if !parsed.host.is_empty() {
        data.host = parsed.host.clone();
    }
    if !parsed.uri.is_empty() {
        data.uri = parsed.uri.clone();
    }
    if !parsed.user_agent.is_empty() {
        data.user_agent = parsed.user_agent.clone();
    }
    if !parsed.referer.is_empty() {
        data.referer = parsed.referer.clone();
    }
    if !parsed.content_type.is_empty() {
        data.content_type = parsed.content_type.clone();
    }
    if parsed.status_code != 0 {
        data.status_code = parsed.status_code;
    }
}

#[derive(Default)]
pub struct HttpPlugin {
    ext_id: ExtensionId,
}

impl HttpPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, flow: &mut Flow, parsed: &Parsed) {
        if let Some(ExtensionData::Http(data)) = flow.extensions.get_mut(self.ext_id) {
            merge(data, parsed);
            return;
        }
        let mut data = HttpData::default();
        merge(&mut data, parsed);
        flow.extensions.insert(self.ext_id, ExtensionData::Http(data));
    }
}

impl ProcessPlugin for HttpPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn assign_ext_id(&mut self, id: ExtensionId) {
        self.ext_id = id;
    }

    fn template_fields(&self) -> &'static [&'static str] {
        HTTP_TEMPLATE
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        if !pkt.is_tcp() {
            return ActionMask::NONE;
        }
        if let Some(parsed) = parse(pkt.payload) {
            self.apply(flow, &parsed);
        }
        ActionMask::NONE
    }

    fn pre_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        if !pkt.is_tcp() {
            return ActionMask::NONE;
        }
        let Some(parsed) = parse(pkt.payload) else {
            return ActionMask::NONE;
        };
        if let Some(ExtensionData::Http(data)) = flow.extensions.get(self.ext_id) {
            // A repeated request or response starts the next exchange.
            if (parsed.request && data.request_seen) || (parsed.response && data.response_seen) {
                return ActionMask::FLUSH_WITH_REINSERT;
            }
        }
        ActionMask::NONE
    }

    fn post_update(&mut self, flow: &mut Flow, pkt: &Packet) -> ActionMask {
        if !pkt.is_tcp() {
            return ActionMask::NONE;
        }
        if let Some(parsed) = parse(pkt.payload) {
            self.apply(flow, &parsed);
        }
        ActionMask::NONE
    }
}
