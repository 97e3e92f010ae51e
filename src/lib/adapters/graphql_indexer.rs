use alloy::primitives::{Address, B256};
use serde::Deserialize;
use serde_json::json;

use crate::domain::unwrap::UnwrapRequest;
use crate::ports::indexer::{IndexerError, IndexerPort, UnwrapRequestFilter};

const UNWRAP_REQUESTS_QUERY: &str = r#"
query UnwrapRequests($recipient: String!, $tokenAddress: String!, $isFinalized: Boolean!) {
  unwrapRequests(
    where: { recipient: $recipient, tokenAddress: $tokenAddress, isFinalized: $isFinalized }
    orderBy: requestTimestamp
    orderDirection: desc
  ) {
    id
    burntAmount
    recipient
    requestBlockNumber
    requestTransactionHash
    requestTimestamp
    isFinalized
    cleartextAmount
    finalizedBlockNumber
    finalizedTransactionHash
    finalizedTimestamp
    tokenAddress
    tokenName
    tokenSymbol
  }
}
"#;

/// Client for the GraphQL endpoint of the burn/finalize event indexer.
pub struct GraphqlIndexer {
    client: reqwest::Client,
    url: String,
}

impl GraphqlIndexer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl IndexerPort for GraphqlIndexer {
    async fn unwrap_requests(
        &self,
        filter: &UnwrapRequestFilter,
    ) -> Result<Vec<UnwrapRequest>, IndexerError> {
        let body = json!({
            "query": UNWRAP_REQUESTS_QUERY,
            "variables": {
                "recipient": format!("{:#x}", filter.recipient),
                "tokenAddress": format!("{:#x}", filter.token_address),
                "isFinalized": filter.is_finalized,
            }
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IndexerError::Unavailable(format!(
                "indexer returned HTTP {}",
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| IndexerError::Unavailable(e.to_string()))?;
        parse_response(&text)
    }
}

#[derive(Deserialize)]
struct GraphqlResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    unwrap_requests: Vec<RawUnwrapRequest>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

/// Indexers encode big integers as strings; small ones sometimes as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Text(String),
    Number(u64),
}

impl Numeric {
    fn to_u64(&self, field: &str) -> Result<u64, IndexerError> {
        match self {
            Numeric::Number(n) => Ok(*n),
            Numeric::Text(s) => s
                .parse()
                .map_err(|_| IndexerError::InvalidResponse(format!("{field}: not a u64: {s}"))),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUnwrapRequest {
    id: String,
    burnt_amount: B256,
    recipient: Address,
    request_block_number: Numeric,
    request_transaction_hash: B256,
    request_timestamp: Numeric,
    is_finalized: bool,
    cleartext_amount: Option<Numeric>,
    finalized_block_number: Option<Numeric>,
    finalized_transaction_hash: Option<B256>,
    finalized_timestamp: Option<Numeric>,
    token_address: Address,
    #[serde(default)]
    token_name: String,
    #[serde(default)]
    token_symbol: String,
}

impl RawUnwrapRequest {
    fn into_domain(self) -> Result<UnwrapRequest, IndexerError> {
        let optional = |value: Option<Numeric>, field: &str| -> Result<Option<u64>, IndexerError> {
            value.map(|v| v.to_u64(field)).transpose()
        };

        Ok(UnwrapRequest {
            id: self.id,
            burnt_amount: self.burnt_amount,
            recipient: self.recipient,
            request_block_number: self.request_block_number.to_u64("requestBlockNumber")?,
            request_transaction_hash: self.request_transaction_hash,
            request_timestamp: self.request_timestamp.to_u64("requestTimestamp")?,
            is_finalized: self.is_finalized,
            cleartext_amount: optional(self.cleartext_amount, "cleartextAmount")?,
            finalized_block_number: optional(self.finalized_block_number, "finalizedBlockNumber")?,
            finalized_transaction_hash: self.finalized_transaction_hash,
            finalized_timestamp: optional(self.finalized_timestamp, "finalizedTimestamp")?,
            token_address: self.token_address,
            token_name: self.token_name,
            token_symbol: self.token_symbol,
        })
    }
}

/// Decode a GraphQL response body into unwrap requests.
pub fn parse_response(body: &str) -> Result<Vec<UnwrapRequest>, IndexerError> {
    let response: GraphqlResponse =
        serde_json::from_str(body).map_err(|e| IndexerError::InvalidResponse(e.to_string()))?;

    if let Some(first) = response.errors.first() {
        return Err(IndexerError::Query(first.message.clone()));
    }

    let data = response
        .data
        .ok_or_else(|| IndexerError::InvalidResponse("missing data".into()))?;

    data.unwrap_requests
        .into_iter()
        .map(RawUnwrapRequest::into_domain)
        .collect()
}
