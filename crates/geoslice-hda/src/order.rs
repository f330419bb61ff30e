//! Search and order negotiation for one interval.
//!
//! Search: `POST /stac/search` with the interval as STAC `datetime`, first
//! feature wins. Resolve: `GET` its download link; 200 is a ready payload,
//! 202 is an asynchronous order to poll at `Location`.

use geoslice_core::partition::DateInterval;
use geoslice_core::stream::StreamError;
use geoslice_core::IntervalError;
use serde::{Deserialize, Serialize};

use crate::client::{ArchiveClient, error_excerpt};
use crate::config::Query;

/// Status reported when a pending order carries none
pub const UNKNOWN_STATUS: &str = "unknown";

/// Negotiated source of an interval's bytes
#[derive(Debug)]
pub enum Order {
    /// Payload ready; the live response is streamed, not requested again
    Direct(reqwest::Response),
    /// Asynchronous order still being prepared
    Pending { status_url: String, status: String },
}

#[derive(Serialize)]
struct Eq<T> {
    eq: T,
}

#[derive(Serialize)]
struct SearchFilters<'a> {
    variable: Eq<&'a [String]>,
    data_format: Eq<&'a str>,
    area: Eq<&'a [f64; 4]>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    collections: [&'a str; 1],
    datetime: String,
    query: SearchFilters<'a>,
}

#[derive(Deserialize)]
struct SearchResponse {
    features: Option<Vec<Feature>>,
}

#[derive(Deserialize)]
struct Feature {
    id: Option<String>,
    assets: Option<Assets>,
}

#[derive(Deserialize)]
struct Assets {
    #[serde(rename = "downloadLink")]
    download_link: Option<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
}

#[derive(Deserialize)]
struct OrderStatus {
    status: Option<String>,
}

/// Build the STAC search document for an interval
pub fn search_body(query: &Query, interval: &DateInterval) -> serde_json::Value {
    let request = SearchRequest {
        collections: [query.collection.as_str()],
        datetime: interval.stac_datetime(),
        query: SearchFilters {
            variable: Eq {
                eq: query.variables.as_slice(),
            },
            data_format: Eq {
                eq: query.data_format.as_str(),
            },
            area: Eq { eq: &query.area },
        },
    };
    // Plain structs of strings and floats always serialize
    serde_json::to_value(request).unwrap_or(serde_json::Value::Null)
}

/// Status field of a 202 body; missing or unparsable means unknown
pub fn parse_order_status(body: &[u8]) -> String {
    serde_json::from_slice::<OrderStatus>(body)
        .ok()
        .and_then(|s| s.status)
        .unwrap_or_else(|| UNKNOWN_STATUS.to_string())
}

/// `Location` header resolved against the URL that answered
pub(crate) fn location_of(response: &reqwest::Response) -> Option<String> {
    let raw = response
        .headers()
        .get(reqwest::header::LOCATION)?
        .to_str()
        .ok()?;
    match response.url().join(raw) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Some(raw.to_string()),
    }
}

fn search_error(status: Option<u16>, e: StreamError) -> IntervalError {
    match e {
        StreamError::Cancelled => IntervalError::Cancelled,
        e => IntervalError::SearchProtocol {
            status,
            message: e.to_string(),
        },
    }
}

/// Turns an interval into an [`Order`]
pub struct OrderResolver<'a> {
    client: &'a ArchiveClient,
    query: &'a Query,
}

impl<'a> OrderResolver<'a> {
    pub fn new(client: &'a ArchiveClient, query: &'a Query) -> Self {
        Self { client, query }
    }

    /// Search and initiate the download of the first matching product
    pub fn resolve(&self, interval: &DateInterval) -> Result<Order, IntervalError> {
        let href = self.search(interval)?;
        self.initiate(&href)
    }

    /// Download link of the first feature matching `interval`
    pub fn search(&self, interval: &DateInterval) -> Result<String, IntervalError> {
        log::debug!("{interval}: STAC search");
        let response = self
            .client
            .post_json(&self.client.search_url(), &search_body(self.query, interval))
            .map_err(|e| search_error(e.status(), e))?;

        let status = response.status().as_u16();
        let body = self
            .client
            .read_body(response)
            .map_err(|e| search_error(Some(status), e))?;

        if status != 200 {
            return Err(IntervalError::SearchProtocol {
                status: Some(status),
                message: error_excerpt(&body),
            });
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(IntervalError::SearchProtocol {
                status: Some(status),
                message: "empty response".to_string(),
            });
        }

        let parsed: SearchResponse =
            serde_json::from_slice(&body).map_err(|e| IntervalError::SearchProtocol {
                status: Some(status),
                message: format!("invalid search response: {e}"),
            })?;
        let feature = parsed
            .features
            .and_then(|features| features.into_iter().next())
            .ok_or(IntervalError::NoMatch)?;
        let id = feature.id.unwrap_or_default();

        feature
            .assets
            .and_then(|a| a.download_link)
            .map(|link| {
                log::debug!("{interval}: product {id}");
                link.href
            })
            .ok_or_else(|| IntervalError::SearchProtocol {
                status: Some(status),
                message: format!("feature {id} has no assets.downloadLink.href"),
            })
    }

    /// Request the product behind a download link
    pub fn initiate(&self, href: &str) -> Result<Order, IntervalError> {
        let response = self.client.get(href)?;
        let status = response.status().as_u16();

        match status {
            200 => Ok(Order::Direct(response)),
            202 => {
                let location = location_of(&response);
                let body = self.client.read_body(response)?;
                let order_status = parse_order_status(&body);
                match location {
                    Some(status_url) => Ok(Order::Pending {
                        status_url,
                        status: order_status,
                    }),
                    None => Err(IntervalError::DownloadInitiation {
                        status,
                        message: format!("order accepted without Location (status {order_status})"),
                    }),
                }
            }
            _ => {
                let body = match self.client.read_body(response) {
                    Ok(body) => body,
                    Err(StreamError::Cancelled) => return Err(IntervalError::Cancelled),
                    Err(e) => e.to_string().into_bytes(),
                };
                Err(IntervalError::DownloadInitiation {
                    status,
                    message: error_excerpt(&body),
                })
            }
        }
    }
}
