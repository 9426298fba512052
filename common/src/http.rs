use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    assets::WebAssets,
    config::ControlConfig,
    error::RequestError,
    state::TemperatureProvider,
    types::{ErrorBody, TargetUpdateResponse, TelemetryPayload},
};

const MAX_HEADERS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

impl Request {
    pub fn parse(raw: &[u8]) -> Result<Self, RequestError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(RequestError::Empty);
        }
        let text = std::str::from_utf8(raw).map_err(|_| RequestError::NotUtf8)?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Request::new(&mut headers);
        let head_len = match head.parse(raw).map_err(RequestError::Head)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let (Some(method), Some(target)) = (head.method, head.path) else {
            return Err(RequestError::MalformedRequestLine);
        };
        if !target.starts_with('/') {
            return Err(RequestError::MalformedRequestLine);
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };

        let content_type = header_value(head.headers, "content-type")
            .map(|value| value.trim().to_ascii_lowercase());

        Ok(Self {
            method: Method::parse(method),
            path: path.to_string(),
            query,
            content_type,
            body: text[head_len..].to_string(),
        })
    }
}

pub fn request_complete(buf: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut head = httparse::Request::new(&mut headers);
    let head_len = match head.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return false,
        Err(_) => return true,
    };

    let content_length = header_value(head.headers, "content-length")
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    buf.len() >= head_len + content_length
}

fn header_value<'b>(headers: &[httparse::Header<'b>], name: &str) -> Option<&'b str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .and_then(|header| std::str::from_utf8(header.value).ok())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: Option<&'static str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self::new(200, Some("text/html"), body)
    }

    pub fn css(body: String) -> Self {
        Self::new(200, Some("text/css"), body)
    }

    pub fn json<T: Serialize>(status: u16, payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(body) => Self::new(status, Some("application/json"), body),
            Err(err) => {
                warn!("response serialization failed: {err}");
                Self::new(500, None, Vec::new())
            }
        }
    }

    pub fn not_found() -> Self {
        Self::new(
            404,
            Some("text/html"),
            "<html><body><h1>404 Not Found</h1></body></html>",
        )
    }

    pub fn bad_request(message: &str) -> Self {
        Self::json(
            400,
            &ErrorBody {
                success: false,
                error: message.to_string(),
            },
        )
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason());
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

pub struct Routes<'a, P: ?Sized> {
    pub provider: &'a P,
    pub control: &'a ControlConfig,
    pub assets: &'a WebAssets,
}

impl<P> Routes<'_, P>
where
    P: TemperatureProvider + ?Sized,
{
    pub fn dispatch(&self, request: &Request) -> Response {
        match (request.method, request.path.as_str()) {
            (Method::Get, "/" | "/index.html") => self.handle_index(),
            (Method::Get, "/style.css") => self.handle_style(),
            (Method::Get, "/api/data") => self.handle_get_data(),
            (Method::Post, "/api/target") => self.handle_set_target(request),
            _ => Response::not_found(),
        }
    }

    fn handle_index(&self) -> Response {
        Response::html(self.assets.index_html())
    }

    fn handle_style(&self) -> Response {
        match self.assets.stylesheet() {
            Some(css) => Response::css(css),
            None => Response::not_found(),
        }
    }

    fn handle_get_data(&self) -> Response {
        let payload = TelemetryPayload::from_readings(self.provider.snapshot());
        Response::json(200, &payload).with_header("Access-Control-Allow-Origin", "*")
    }

    fn handle_set_target(&self, request: &Request) -> Response {
        let target = match extract_target(request) {
            Ok(target) => target,
            Err(message) => return Response::bad_request(message),
        };
        if !self.control.accepts_target(target) {
            return Response::bad_request("Target temperature out of range");
        }

        self.provider.set_target(target);
        info!("target temperature set to {target:.1}°C over http");

        Response::json(
            200,
            &TargetUpdateResponse {
                success: true,
                target,
            },
        )
    }
}

fn extract_target(request: &Request) -> Result<f32, &'static str> {
    let raw = match request.query.as_deref().and_then(form_value) {
        Some(value) => Some(value),
        None => body_target(request),
    };

    let Some(raw) = raw else {
        return Err("Missing 'target' value");
    };
    match raw.trim().parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err("Invalid temperature value"),
    }
}

fn body_target(request: &Request) -> Option<String> {
    let body = request.body.trim();
    let is_json = request
        .content_type
        .as_deref()
        .is_some_and(|value| value.starts_with("application/json"))
        || body.starts_with('{');

    if is_json {
        let value: Value = serde_json::from_str(body).ok()?;
        return match value.get("target")? {
            Value::Number(number) => Some(number.to_string()),
            Value::String(text) => Some(text.clone()),
            _ => None,
        };
    }
    form_value(body)
}

fn form_value(encoded: &str) -> Option<String> {
    form_urlencoded::parse(encoded.as_bytes())
        .find(|(key, _)| key == "target")
        .map(|(_, value)| value.into_owned())
}
