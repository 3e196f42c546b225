//! Client for the switch management API.
//!
//! The switch hands out a session cookie from `/auth/` which must accompany
//! every later request. Interface counters come from the `ifXTable` MIB as a
//! JSON object keyed by ifIndex, which is the legacy port integer.

use reqwest::{
    StatusCode,
    header::{ACCEPT, HeaderMap, HeaderValue},
};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{config, sample::Reading};

/// Media type the management API answers with.
pub const MEDIA_TYPE: &str = "application/vnd.alcatellucentaos+json";

const AUTH_PATH: &str = "/auth/";
const COUNTERS_PATH: &str = "/mib/ifXTable?mibObject0=ifHCInOctets&mibObject1=ifHCOutOctets";

/// Errors produced by [`Switch`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request did not complete.
    #[error("Request to switch failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The switch refused the credentials.
    #[error("Authentication failed with status {0}")]
    Authentication(StatusCode),
    /// The counter request was refused.
    #[error("Counter fetch failed with status {0}")]
    Fetch(StatusCode),
    /// The counter payload did not have the expected shape.
    #[error("Failed to decode counter payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// A row was keyed by something other than a port integer.
    #[error("Row key '{0}' is not a port integer")]
    RowKey(String),
    /// A counter value was not an unsigned integer.
    #[error("Counter value '{0}' is not an unsigned integer")]
    Counter(String),
    /// The switch answered with no rows.
    #[error("Switch returned no counter rows")]
    NoData,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    result: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    data: Data,
}

#[derive(Debug, Deserialize)]
struct Data {
    #[serde(default)]
    rows: FxHashMap<String, Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "ifHCInOctets")]
    in_octets: Counter,
    #[serde(rename = "ifHCOutOctets")]
    out_octets: Counter,
}

/// The API reports counters as decimal strings, some firmware as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Counter {
    Number(u64),
    Text(String),
}

impl Counter {
    fn value(&self) -> Result<u64, Error> {
        match self {
            Counter::Number(n) => Ok(*n),
            Counter::Text(s) => s.trim().parse().map_err(|_| Error::Counter(s.clone())),
        }
    }
}

/// A session with one switch.
#[derive(Debug)]
pub struct Switch {
    config: config::Switch,
    client: reqwest::Client,
    base_url: String,
}

impl Switch {
    /// Create a new [`Switch`] client. No request is made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`] if the TLS backend cannot be initialized.
    pub fn new(config: &config::Switch) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MEDIA_TYPE));

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(Error::Client)?;

        Ok(Self {
            base_url: config.base_url(),
            config: config.clone(),
            client,
        })
    }

    /// Address of the switch as configured.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Log in and keep the session cookie for later requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the switch answers with anything
    /// but 200, or [`Error::Http`] if it cannot be reached.
    pub async fn authenticate(&self) -> Result<(), Error> {
        info!("Sending authentication request to {}", self.config.address);
        let response = self
            .client
            .get(format!("{}{AUTH_PATH}", self.base_url))
            .query(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Authentication(status));
        }
        Ok(())
    }

    /// Read the inbound and outbound octet counters of every interface,
    /// sorted by port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] on a non-200 answer, [`Error::Decode`] and
    /// friends on a malformed payload and [`Error::NoData`] when the table is
    /// empty.
    pub async fn fetch_counters(&self) -> Result<Vec<Reading>, Error> {
        info!("Fetching interface counters from {}", self.config.address);
        let response = self
            .client
            .get(format!("{}{COUNTERS_PATH}", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Fetch(status));
        }
        let body = response.text().await?;
        let readings = parse_counters(&body)?;
        debug!("Switch reported {} interfaces", readings.len());
        Ok(readings)
    }
}

fn parse_counters(body: &str) -> Result<Vec<Reading>, Error> {
    let envelope: Envelope = serde_json::from_str(body)?;
    let rows = envelope.result.data.rows;
    if rows.is_empty() {
        return Err(Error::NoData);
    }

    let mut readings = rows
        .into_iter()
        .map(|(key, row)| {
            let port = key.trim().parse().map_err(|_| Error::RowKey(key.clone()))?;
            Ok(Reading {
                port,
                in_octets: row.in_octets.value()?,
                out_octets: row.out_octets.value()?,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    readings.sort_unstable_by_key(|r| r.port);
    Ok(readings)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use warp::{Filter, http::StatusCode as WarpStatus};

    use super::*;

    pub(crate) const ROWS: &str = r#"{
        "domain": "mib",
        "result": {
            "diag": 200,
            "data": {
                "rows": {
                    "1002": {"ifHCInOctets": "5000", "ifHCOutOctets": "7000"},
                    "1001": {"ifHCInOctets": "1234", "ifHCOutOctets": 4321},
                    "2017": {"ifHCInOctets": "0", "ifHCOutOctets": "0"}
                }
            }
        }
    }"#;

    /// Serve a fake management API on an ephemeral port. The counter table
    /// is only served to a client holding the session cookie.
    pub(crate) fn mock_switch(
        password: &'static str,
        rows: &'static str,
    ) -> (std::net::SocketAddr, impl std::future::Future<Output = ()>) {
        let auth = warp::path("auth")
            .and(warp::query::<HashMap<String, String>>())
            .map(move |q: HashMap<String, String>| {
                if q.get("password").map(String::as_str) == Some(password) {
                    warp::reply::with_status(
                        warp::reply::with_header("", "set-cookie", "wv_sess=abc123; Path=/"),
                        WarpStatus::OK,
                    )
                } else {
                    warp::reply::with_status(
                        warp::reply::with_header("", "x-denied", "1"),
                        WarpStatus::UNAUTHORIZED,
                    )
                }
            });
        let counters = warp::path!("mib" / "ifXTable")
            .and(warp::cookie::optional::<String>("wv_sess"))
            .map(move |session: Option<String>| match session.as_deref() {
                Some("abc123") => warp::reply::with_status(rows, WarpStatus::OK),
                _ => warp::reply::with_status("", WarpStatus::UNAUTHORIZED),
            });

        warp::serve(auth.or(counters)).bind_ephemeral(([127, 0, 0, 1], 0))
    }

    pub(crate) fn switch_config(addr: std::net::SocketAddr, password: &str) -> config::Switch {
        config::Switch {
            address: addr.to_string(),
            scheme: "http".to_string(),
            username: "admin".to_string(),
            password: password.to_string(),
            accept_invalid_certs: false,
            timeout_seconds: 5,
        }
    }

    #[test]
    fn parse_sorts_by_port_and_accepts_numbers() -> Result<(), Error> {
        let readings = parse_counters(ROWS)?;
        assert_eq!(
            readings,
            vec![
                Reading {
                    port: 1001,
                    in_octets: 1234,
                    out_octets: 4321
                },
                Reading {
                    port: 1002,
                    in_octets: 5000,
                    out_octets: 7000
                },
                Reading {
                    port: 2017,
                    in_octets: 0,
                    out_octets: 0
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_rows_is_no_data() {
        let body = r#"{"result": {"data": {"rows": {}}}}"#;
        assert!(matches!(parse_counters(body), Err(Error::NoData)));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            parse_counters(r#"{"result": {}}"#),
            Err(Error::Decode(_))
        ));
        let bad_key =
            r#"{"result": {"data": {"rows": {"eth0": {"ifHCInOctets": "1", "ifHCOutOctets": "1"}}}}}"#;
        assert!(matches!(parse_counters(bad_key), Err(Error::RowKey(k)) if k == "eth0"));
        let bad_value =
            r#"{"result": {"data": {"rows": {"1001": {"ifHCInOctets": "-1", "ifHCOutOctets": "1"}}}}}"#;
        assert!(matches!(parse_counters(bad_value), Err(Error::Counter(_))));
    }

    #[tokio::test]
    async fn authenticated_session_fetches_counters() -> Result<(), Error> {
        let (addr, server) = mock_switch("switch", ROWS);
        let _handle = tokio::spawn(server);

        let switch = Switch::new(&switch_config(addr, "switch"))?;
        switch.authenticate().await?;
        let readings = switch.fetch_counters().await?;
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].port, 1001);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_is_authentication_error() -> Result<(), Error> {
        let (addr, server) = mock_switch("switch", ROWS);
        let _handle = tokio::spawn(server);

        let switch = Switch::new(&switch_config(addr, "wrong"))?;
        let result = switch.authenticate().await;
        assert!(matches!(
            result,
            Err(Error::Authentication(StatusCode::UNAUTHORIZED))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn fetch_without_session_is_refused() -> Result<(), Error> {
        let (addr, server) = mock_switch("switch", ROWS);
        let _handle = tokio::spawn(server);

        let switch = Switch::new(&switch_config(addr, "switch"))?;
        let result = switch.fetch_counters().await;
        assert!(matches!(result, Err(Error::Fetch(StatusCode::UNAUTHORIZED))));
        Ok(())
    }
}
