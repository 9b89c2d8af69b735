use std::fs::File;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::PdbId;
use crate::error::PdbFetchError;

/// Fixed backoff schedule: one immediate attempt, then two delayed retries.
const RETRY_DELAYS_MS: [u64; 3] = [0, 500, 2000];

/// The remote structure archive the orchestrator fetches PDB files from.
pub trait ArchiveClient: Send + Sync {
    fn fetch_structure(&self, id: &PdbId, destination: &Utf8Path) -> Result<(), PdbFetchError>;
}

#[derive(Clone)]
pub struct RcsbHttpClient {
    client: Client,
}

impl RcsbHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, PdbFetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pdbfetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PdbFetchError::RcsbHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PdbFetchError::RcsbHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn structure_url(id: &PdbId) -> String {
        format!("https://files.rcsb.org/download/{}.pdb", id.as_str())
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, PdbFetchError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "RCSB request failed".to_string());
        Err(PdbFetchError::RcsbStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, PdbFetchError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            if RETRY_DELAYS_MS[attempt] > 0 {
                thread::sleep(Duration::from_millis(RETRY_DELAYS_MS[attempt]));
            }
            let more_attempts = attempt + 1 < RETRY_DELAYS_MS.len();
            match make_req().send() {
                Ok(resp) => {
                    if more_attempts && is_retryable_status(resp.status().as_u16()) {
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if more_attempts && is_retryable_error(&err) {
                        attempt += 1;
                        continue;
                    }
                    return Err(PdbFetchError::RcsbHttp(err.to_string()));
                }
            }
        }
    }
}

impl ArchiveClient for RcsbHttpClient {
    fn fetch_structure(&self, id: &PdbId, destination: &Utf8Path) -> Result<(), PdbFetchError> {
        let url = Self::structure_url(id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let mut response = Self::handle_status(response)?;
        let mut file = File::create(destination.as_std_path())
            .map_err(|err| PdbFetchError::Filesystem(format!("create {destination}: {err}")))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| PdbFetchError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_url_keeps_entry_casing() {
        let id: PdbId = "4xt1".parse().unwrap();
        assert_eq!(
            RcsbHttpClient::structure_url(&id),
            "https://files.rcsb.org/download/4xt1.pdb"
        );
    }
}
