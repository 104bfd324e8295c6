//! Blocking HTTP client for the Roth Touchline controller.
//!
//! - Single read endpoint, `POST /cgi-bin/ILRReadValues.cgi`, XML in and out (see `crate::codec`).
//! - The controller has no authentication.
//! - One `ureq::Agent` per attached device, released by [`TouchlineClient::shutdown`].
//!
//! Failure policy
//! - Timeouts and transport failures surface as [`ConnectivityError`] from
//!   `test_connection` and `list_zones`.
//! - Non-200 replies are logged and degrade to `false` / no zones / no zone data.
//! - `get_zone_data` absorbs every failure into `None` so one zone cannot abort a refresh.

use http::StatusCode;
use log::{debug, error, info};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::codec::{self, ProtocolError};
use crate::config::{Config, DEFAULT_TIMEOUT_SECS};
use crate::models::touchline::{RegisterPath, Zone, ZoneDescriptor, ZoneId};
use crate::zones;

pub const READ_VALUES_PATH: &str = "/cgi-bin/ILRReadValues.cgi";

/// The controller firmware only answers requests that look like the vendor's SpiderControl software.
pub const USER_AGENT: &str = "SpiderControl/1.0 (iniNet-Solutions GmbH)";
pub const ACCEPT: &str = "text/html, image/gif, image/jpeg, *; q = .2, */*; q=.2";

const REQUEST_HEADERS: &[(&str, &str)] = &[
    ("Accept-Language", "*"),
    ("Content-Type", "text/xml"),
    ("User-Agent", USER_AGENT),
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
    ("Accept", ACCEPT),
];

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("timed out after {0:?} waiting for the controller")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("client session already shut down")]
    SessionClosed,
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// Everything the controller sent back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Outcome of one request that reached the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// HTTP 200.
    Accepted(Reply),
    /// Any other status; the body is kept for diagnostics.
    Rejected(Reply),
}

impl Exchange {
    pub fn reply(&self) -> &Reply {
        match self {
            Exchange::Accepted(reply) | Exchange::Rejected(reply) => reply,
        }
    }
}

fn collect_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or("<non-ascii value>");
            (name.as_str().to_string(), value.to_string())
        })
        .collect()
}

pub struct TouchlineClient {
    session: Mutex<Option<ureq::Agent>>,
    base_url: String,
    endpoint: String,
    max_zones: u32,
    timeout: Duration,
}

/// Attach to the controller described by `config`. No request is made.
pub fn attach(config: &Config) -> TouchlineClient {
    TouchlineClient::new(&config.host, config.port, config.max_zones, config.request_timeout)
}

/// Attach with the default request timeout.
pub fn attach_with(host: &str, port: u16, max_zones: u32) -> TouchlineClient {
    TouchlineClient::new(host, port, max_zones, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

impl TouchlineClient {
    pub fn new(host: &str, port: u16, max_zones: u32, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let base_url = format!("http://{}:{}", host, port);
        TouchlineClient {
            session: Mutex::new(Some(agent)),
            endpoint: format!("{}{}", base_url, READ_VALUES_PATH),
            base_url,
            max_zones,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_zones(&self) -> u32 {
        self.max_zones
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ureq::Agent>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn agent(&self) -> Result<ureq::Agent, ConnectivityError> {
        self.lock_session().clone().ok_or(ConnectivityError::SessionClosed)
    }

    fn classify(&self, err: ureq::Error) -> ConnectivityError {
        match err {
            ureq::Error::Timeout(_) => ConnectivityError::Timeout(self.timeout),
            ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => ConnectivityError::Timeout(self.timeout),
            other => ConnectivityError::Transport(other.to_string()),
        }
    }

    /// Post a read request for `items` and return the raw outcome.
    pub fn read_values(&self, items: &[RegisterPath]) -> Result<Exchange, ConnectivityError> {
        let body = codec::build_request(items)?;
        let agent = self.agent()?;

        let mut request = agent.post(&self.endpoint);
        for &(name, value) in REQUEST_HEADERS {
            request = request.header(name, value);
        }

        let mut response = request.send(body.as_str()).map_err(|e| self.classify(e))?;
        let status = response.status();
        let headers = collect_headers(response.headers());
        if status != StatusCode::OK {
            let body = response
                .body_mut()
                .read_to_string()
                .unwrap_or_else(|_| String::from("<no body>"));
            return Ok(Exchange::Rejected(Reply { status, headers, body }));
        }
        let body = response.body_mut().read_to_string().map_err(|e| self.classify(e))?;
        Ok(Exchange::Accepted(Reply { status, headers, body }))
    }

    /// Plain `GET /` against the controller's web server; any status counts as reachable.
    pub fn check_reachable(&self) -> Result<StatusCode, ConnectivityError> {
        let agent = self.agent()?;
        let response = agent
            .get(format!("{}/", self.base_url))
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| self.classify(e))?;
        Ok(response.status())
    }

    /// Check the controller with the registers of zone `G0`.
    ///
    /// `Ok(false)` means the controller answered with a non-200 status.
    pub fn test_connection(&self) -> Result<bool, ConnectivityError> {
        let items = zones::zone_request_items(ZoneId(0));
        match self.read_values(&items) {
            Ok(Exchange::Accepted(reply)) => {
                debug!("Connection test successful: {}", reply.body.chars().take(200).collect::<String>());
                Ok(true)
            }
            Ok(Exchange::Rejected(reply)) => {
                error!("Connection test failed with status: {}", reply.status);
                Ok(false)
            }
            Err(e) => {
                error!("Error connecting to Roth Touchline at {}: {}", self.endpoint, e);
                Err(e)
            }
        }
    }

    /// Zones the controller reports any register for, in index order.
    pub fn list_zones(&self) -> Result<Vec<ZoneDescriptor>, ConnectivityError> {
        let items = zones::build_zone_request_items(self.max_zones);
        match self.read_values(&items) {
            Ok(Exchange::Accepted(reply)) => {
                let values = codec::parse_response(&reply.body);
                Ok(zones::list_available_zones(&values, self.max_zones))
            }
            Ok(Exchange::Rejected(reply)) => {
                error!("Failed to get zones, status: {}", reply.status);
                Ok(Vec::new())
            }
            Err(e) => {
                error!("Error getting zones: {}", e);
                Err(e)
            }
        }
    }

    /// Current state of one zone, or `None` if it could not be fetched.
    pub fn get_zone_data(&self, zone: ZoneId) -> Option<Zone> {
        let items = zones::zone_request_items(zone);
        match self.read_values(&items) {
            Ok(Exchange::Accepted(reply)) => {
                let values = codec::parse_response(&reply.body);
                Some(zones::extract_zone_data(&values, zone))
            }
            Ok(Exchange::Rejected(reply)) => {
                error!("Failed to get zone {} data, status: {}", zone, reply.status);
                None
            }
            Err(e) => {
                error!("Error getting zone {} data: {}", zone, e);
                None
            }
        }
    }

    /// Release the HTTP session. Returns `false` if it was already released.
    pub fn shutdown(&self) -> bool {
        match self.lock_session().take() {
            Some(agent) => {
                drop(agent);
                info!("Released Roth Touchline session for {}", self.endpoint);
                true
            }
            None => false,
        }
    }
}
