//! `wifi` and `http` namespaces.
//!
//! Both use [`ErrorConvention::Sentinel`]: a failed connect or request
//! returns `nil` plus a message. The station and the HTTP client are
//! collaborators behind [`Station`] and [`HttpClient`].

use std::{
    cell::RefCell,
    collections::HashMap,
    io::Read,
    net::Ipv4Addr,
    rc::Rc,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    bridge::{ErrorConvention, Namespace, NativeError},
    config::{DeviceConfig, NetworkEntry},
    diagnostics::{HostError, Result},
};

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Wireless station interface.
pub trait Station {
    /// Brings the radio up. Idempotent.
    fn start(&mut self) -> std::result::Result<(), NativeError>;
    fn started(&self) -> bool;
    /// Joins `ssid`, giving up after `timeout`.
    fn connect(&mut self, ssid: &str, password: &str, timeout: Duration) -> std::result::Result<(), NativeError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn ip(&self) -> Option<Ipv4Addr>;
    /// Signal strength of the joined access point in dBm.
    fn rssi(&self) -> Option<i32>;
}

#[derive(Debug, Clone)]
struct Association {
    ip: Ipv4Addr,
    rssi: i32,
}

/// Station that can join a fixed list of networks.
#[derive(Debug, Default)]
pub struct SimulatedStation {
    networks: Vec<NetworkEntry>,
    started: bool,
    joined: Option<Association>,
}

impl SimulatedStation {
    pub fn new(networks: Vec<NetworkEntry>) -> Self {
        Self {
            networks,
            started: false,
            joined: None,
        }
    }
}

impl Station for SimulatedStation {
    fn start(&mut self) -> std::result::Result<(), NativeError> {
        self.started = true;
        Ok(())
    }

    fn started(&self) -> bool {
        self.started
    }

    fn connect(&mut self, ssid: &str, password: &str, timeout: Duration) -> std::result::Result<(), NativeError> {
        self.joined = None;
        let Some(idx) = self.networks.iter().position(|net| net.ssid == ssid) else {
            return Err(NativeError::Timeout(format!(
                "no response from {ssid} within {} ms",
                timeout.as_millis()
            )));
        };
        if self.networks[idx].password != password {
            return Err(NativeError::failed(format!("failed to connect to {ssid}")));
        }
        let host = 2 + idx.min(250) as u8;
        self.joined = Some(Association {
            ip: Ipv4Addr::new(192, 168, 4, host),
            rssi: -40 - 5 * idx.min(10) as i32,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.joined = None;
    }

    fn is_connected(&self) -> bool {
        self.joined.is_some()
    }

    fn ip(&self) -> Option<Ipv4Addr> {
        self.joined.as_ref().map(|assoc| assoc.ip)
    }

    fn rssi(&self) -> Option<i32> {
        self.joined.as_ref().map(|assoc| assoc.rssi)
    }
}

pub fn wifi_namespace(station: Rc<RefCell<dyn Station>>, default_timeout: Duration) -> Namespace {
    Namespace::new("wifi", ErrorConvention::Sentinel)
        .function("init", {
            let station = station.clone();
            move |_, ()| {
                station.borrow_mut().start()?;
                Ok(true)
            }
        })
        .function("connect", {
            let station = station.clone();
            move |_, (ssid, password, timeout_ms): (String, String, Option<u64>)| {
                let mut station = station.borrow_mut();
                if !station.started() {
                    station.start()?;
                }
                let timeout = timeout_ms.map_or(default_timeout, Duration::from_millis);
                info!(%ssid, "connecting");
                match station.connect(&ssid, &password, timeout) {
                    Ok(()) => {
                        info!(%ssid, ip = ?station.ip(), "connected");
                        Ok(true)
                    }
                    Err(err) => {
                        warn!(%ssid, "connect failed: {err}");
                        Err(err)
                    }
                }
            }
        })
        .function("disconnect", {
            let station = station.clone();
            move |_, ()| {
                station.borrow_mut().disconnect();
                Ok(true)
            }
        })
        .function("is_connected", {
            let station = station.clone();
            move |_, ()| Ok(station.borrow().is_connected())
        })
        .function("get_ip", {
            let station = station.clone();
            move |_, ()| Ok(station.borrow().ip().map(|ip| ip.to_string()))
        })
        .function("get_rssi", {
            let station = station.clone();
            move |_, ()| Ok(station.borrow().rssi().map(i64::from))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

pub trait HttpClient {
    fn perform(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, NativeError>;
}

/// Blocking HTTP client backed by `reqwest`.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    max_response_bytes: usize,
}

impl ReqwestClient {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .user_agent(config.http_user_agent.clone())
            .build()
            .map_err(|err| HostError::Device(format!("http client init failed: {err}")))?;
        Ok(Self {
            client,
            max_response_bytes: config.http_max_response_bytes,
        })
    }
}

impl HttpClient for ReqwestClient {
    fn perform(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, NativeError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        }
        .timeout(request.timeout);
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(|err| {
            if err.is_timeout() {
                NativeError::Timeout(format!("request timed out: {err}"))
            } else {
                NativeError::failed(format!("request failed: {err}"))
            }
        })?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        response
            .take(self.max_response_bytes as u64)
            .read_to_end(&mut body)
            .map_err(|err| NativeError::failed(format!("reading response failed: {err}")))?;
        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Canned responses keyed by URL. Requests to unknown URLs fail as if the
/// host were unreachable. Every request is recorded.
#[derive(Debug, Default)]
pub struct StaticHttp {
    routes: HashMap<String, HttpResponse>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl StaticHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: impl Into<String>, response: HttpResponse) -> Self {
        self.routes.insert(url.into(), response);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }
}

impl HttpClient for StaticHttp {
    fn perform(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, NativeError> {
        self.requests.borrow_mut().push(request.clone());
        self.routes
            .get(&request.url)
            .cloned()
            .ok_or_else(|| NativeError::failed(format!("host unreachable: {}", request.url)))
    }
}

/// Limits applied by the `http` namespace to every request.
#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    pub timeout: Duration,
    /// Bodies keep at most one byte less than this, like a NUL-terminated
    /// receive buffer of this size.
    pub max_response_bytes: usize,
}

impl From<&DeviceConfig> for HttpLimits {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.http_timeout_ms),
            max_response_bytes: config.http_max_response_bytes,
        }
    }
}

fn truncate(mut body: String, max: usize) -> String {
    let mut keep = max.saturating_sub(1);
    if body.len() > keep {
        while !body.is_char_boundary(keep) {
            keep -= 1;
        }
        body.truncate(keep);
    }
    body
}

fn perform(
    client: &dyn HttpClient,
    limits: HttpLimits,
    request: HttpRequest,
) -> std::result::Result<String, NativeError> {
    let response = client.perform(&request)?;
    debug!(url = %request.url, status = response.status, bytes = response.body.len(), "http response");
    if !(200..300).contains(&response.status) {
        return Err(NativeError::failed(format!("HTTP error: {}", response.status)));
    }
    Ok(truncate(response.body, limits.max_response_bytes))
}

pub fn http_namespace(client: Rc<dyn HttpClient>, limits: HttpLimits) -> Namespace {
    let timeout = move |ms: Option<u64>| ms.map_or(limits.timeout, Duration::from_millis);

    Namespace::new("http", ErrorConvention::Sentinel)
        .function("get", {
            let client = client.clone();
            move |_, (url, timeout_ms): (String, Option<u64>)| {
                let request = HttpRequest {
                    method: Method::Get,
                    url,
                    body: None,
                    content_type: None,
                    timeout: timeout(timeout_ms),
                };
                perform(client.as_ref(), limits, request)
            }
        })
        .function("post", {
            let client = client.clone();
            move |_, (url, body, content_type, timeout_ms): (String, Option<String>, Option<String>, Option<u64>)| {
                let request = HttpRequest {
                    method: Method::Post,
                    url,
                    body: Some(body.unwrap_or_default()),
                    content_type: Some(content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())),
                    timeout: timeout(timeout_ms),
                };
                perform(client.as_ref(), limits, request)
            }
        })
}
