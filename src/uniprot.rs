use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::{PdbId, UniprotId};
use crate::error::PdbFetchError;

const RETRY_DELAYS_MS: [u64; 3] = [0, 500, 2000];

/// One PDB structure associated with a UniProt entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureRef {
    pub uniprot_id: UniprotId,
    pub pdb_id: PdbId,
    pub method: Option<String>,
    pub resolution: Option<String>,
    pub chain: Option<String>,
    pub positions: Option<String>,
}

/// Resolves a UniProt entry into its associated PDB structures,
/// deduplicated by PDB id and sorted by PDB id. An empty list means the
/// entry resolved to nothing; the orchestrator reports that per token.
pub trait UniprotClient: Send + Sync {
    fn structures(&self, id: &UniprotId) -> Result<Vec<StructureRef>, PdbFetchError>;
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    client: Client,
}

impl UniprotHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, PdbFetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pdbfetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PdbFetchError::UniprotHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PdbFetchError::UniprotHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn search_url(id: &UniprotId) -> String {
        format!(
            "https://rest.uniprot.org/uniprotkb/search?query=reviewed:true+AND+{}",
            id.as_str()
        )
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
            .unwrap_or_else(|_| "UniProt request failed".to_string());
        Err(PdbFetchError::UniprotStatus { status, message })
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
                    return Err(PdbFetchError::UniprotHttp(err.to_string()));
                }
            }
        }
    }
}

impl UniprotClient for UniprotHttpClient {
    fn structures(&self, id: &UniprotId) -> Result<Vec<StructureRef>, PdbFetchError> {
        let url = Self::search_url(id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| PdbFetchError::UniprotHttp(err.to_string()))?;
        Ok(extract_structures(id, &raw))
    }
}

/// Pulls the PDB cross-references out of a UniProtKB search response. The
/// search matches loosely, so only the result whose entry name or primary
/// accession equals the query counts.
pub fn extract_structures(id: &UniprotId, raw: &Value) -> Vec<StructureRef> {
    let Some(results) = raw.get("results").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let Some(result) = results.iter().find(|entry| {
        entry.get("uniProtkbId").and_then(|v| v.as_str()) == Some(id.as_str())
            || entry.get("primaryAccession").and_then(|v| v.as_str()) == Some(id.as_str())
    }) else {
        return Vec::new();
    };

    let mut by_pdb = BTreeMap::new();
    let xrefs = result
        .get("uniProtKBCrossReferences")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for xref in xrefs {
        if xref.get("database").and_then(|v| v.as_str()) != Some("PDB") {
            continue;
        }
        let Some(pdb) = xref.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        // Cross-references occasionally carry non-PDB ids under the PDB
        // database; only 4-character entries qualify.
        let Ok(pdb_id) = pdb.parse::<PdbId>() else {
            continue;
        };

        let mut method = None;
        let mut resolution = None;
        let mut chain = None;
        let mut positions = None;
        if let Some(props) = xref.get("properties").and_then(|v| v.as_array()) {
            for prop in props {
                let key = prop.get("key").and_then(|v| v.as_str());
                let value = prop.get("value").and_then(|v| v.as_str());
                match (key, value) {
                    (Some("Method"), Some(value)) => method = Some(value.to_string()),
                    (Some("Resolution"), Some(value)) => resolution = Some(value.to_string()),
                    (Some("Chains"), Some(value)) => {
                        let fields: Vec<&str> = value.split('=').collect();
                        if let [chains, range] = fields[..] {
                            chain = Some(chains.to_string());
                            positions = Some(range.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        by_pdb
            .entry(pdb_id.as_str().to_string())
            .or_insert(StructureRef {
                uniprot_id: id.clone(),
                pdb_id,
                method,
                resolution,
                chain,
                positions,
            });
    }

    by_pdb.into_values().collect()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn search_response() -> Value {
        json!({
            "results": [
                {
                    "uniProtkbId": "LGR4_HUMAN",
                    "primaryAccession": "Q8TDU6",
                    "uniProtKBCrossReferences": []
                },
                {
                    "uniProtkbId": "PD2R2_HUMAN",
                    "primaryAccession": "Q9Y5Y4",
                    "uniProtKBCrossReferences": [
                        {
                            "database": "PDB",
                            "id": "6D27",
                            "properties": [
                                {"key": "Method", "value": "X-ray"},
                                {"key": "Resolution", "value": "2.80 A"},
                                {"key": "Chains", "value": "A=1-319"}
                            ]
                        },
                        {
                            "database": "PDB",
                            "id": "6D26",
                            "properties": [
                                {"key": "Method", "value": "X-ray"},
                                {"key": "Resolution", "value": "2.74 A"},
                                {"key": "Chains", "value": "A=1-319"}
                            ]
                        },
                        {
                            "database": "PDB",
                            "id": "6D26",
                            "properties": []
                        },
                        {
                            "database": "PDB",
                            "id": "NOTPDB"
                        },
                        {
                            "database": "AlphaFoldDB",
                            "id": "Q9Y5Y4"
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn extracts_deduplicates_and_sorts_by_pdb_id() {
        let id: UniprotId = "Q9Y5Y4".parse().unwrap();
        let structures = extract_structures(&id, &search_response());

        let pdb_ids: Vec<&str> = structures
            .iter()
            .map(|s| s.pdb_id.as_str())
            .collect();
        assert_eq!(pdb_ids, vec!["6D26", "6D27"]);
        // First occurrence wins on duplicates.
        assert_eq!(structures[0].resolution.as_deref(), Some("2.74 A"));
        assert_eq!(structures[0].chain.as_deref(), Some("A"));
        assert_eq!(structures[0].positions.as_deref(), Some("1-319"));
    }

    #[test]
    fn unmatched_entry_resolves_to_nothing() {
        let id: UniprotId = "P00000".parse().unwrap();
        assert!(extract_structures(&id, &search_response()).is_empty());
    }

    #[test]
    fn empty_results_resolve_to_nothing() {
        let id: UniprotId = "Q9Y5Y4".parse().unwrap();
        assert!(extract_structures(&id, &json!({"results": []})).is_empty());
    }
}
