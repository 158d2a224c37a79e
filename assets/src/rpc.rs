//! Batched account fetcher over JSON-RPC.
//!
//! Every lookup is one request inside an array body; the request `id` is the
//! queried address so responses can be matched back regardless of order.
//! Addresses are chunked to stay under endpoint batch limits, chunks run
//! concurrently (bounded), and a failing or timed-out chunk only fails its
//! own addresses.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_program::pubkey::Pubkey;

use crate::{config::RpcConfig, error::FetchError};

// ==================== Transport ====================

/// Posts one JSON-RPC batch and returns the raw response array.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn post_batch(&self, body: Vec<Value>) -> Result<Vec<Value>, FetchError>;
}

#[async_trait]
impl<T: BatchTransport + ?Sized> BatchTransport for std::sync::Arc<T> {
    async fn post_batch(&self, body: Vec<Value>) -> Result<Vec<Value>, FetchError> {
        (**self).post_batch(body).await
    }
}

/// reqwest-backed transport
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(url: &str) -> Self {
        let normalized_url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("https://{}", url)
        };

        Self {
            url: normalized_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn post_batch(&self, body: Vec<Value>) -> Result<Vec<Value>, FetchError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let bytes = resp.bytes().await?;
        let json: Value =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))?;

        match json {
            Value::Array(items) => Ok(items),
            // Some endpoints reject a whole batch with a single error object
            Value::Object(obj) => match obj.get("error") {
                Some(error) => Err(rpc_error(error)),
                None => Err(FetchError::Malformed("expected array response".to_string())),
            },
            _ => Err(FetchError::Malformed("expected array response".to_string())),
        }
    }
}

// ==================== Request kinds ====================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Base64,
    JsonParsed,
}

impl Encoding {
    fn as_str(&self) -> &'static str {
        match self {
            Encoding::Base64 => "base64",
            Encoding::JsonParsed => "jsonParsed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemcmpBytes {
    Fixed(Vec<u8>),
    /// The address being queried
    QueriedAddress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemcmpFilter {
    pub offset: usize,
    pub bytes: MemcmpBytes,
}

impl MemcmpFilter {
    pub fn fixed(offset: usize, bytes: &[u8]) -> Self {
        Self {
            offset,
            bytes: MemcmpBytes::Fixed(bytes.to_vec()),
        }
    }

    pub fn queried_address(offset: usize) -> Self {
        Self {
            offset,
            bytes: MemcmpBytes::QueriedAddress,
        }
    }

    fn to_json(&self, address: &Pubkey) -> Value {
        let bytes = match &self.bytes {
            MemcmpBytes::Fixed(b) => bs58::encode(b).into_string(),
            MemcmpBytes::QueriedAddress => address.to_string(),
        };
        json!({ "memcmp": { "offset": self.offset, "bytes": bytes } })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataSlice {
    pub offset: usize,
    pub length: usize,
}

/// What to ask the ledger for each address
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchKind {
    /// `getAccountInfo` on the address
    Generic(Encoding),
    /// `getAccountInfo` on a mint, always base64
    MintAccountInfo,
    /// `getTokenAccountsByOwner` with the address as owner
    TokenAccountsByOwner { program_id: Pubkey, encoding: Encoding },
    /// `getProgramAccounts` with filters built per address
    ProgramAccountsByFilter {
        program_id: Pubkey,
        filters: Vec<MemcmpFilter>,
        data_slice: Option<DataSlice>,
    },
}

impl FetchKind {
    fn label(&self) -> &'static str {
        match self {
            FetchKind::Generic(_) => "getAccountInfo",
            FetchKind::MintAccountInfo => "getAccountInfo(mint)",
            FetchKind::TokenAccountsByOwner { .. } => "getTokenAccountsByOwner",
            FetchKind::ProgramAccountsByFilter { .. } => "getProgramAccounts",
        }
    }
}

// ==================== Results ====================

/// Account as returned by the ledger. `parsed` is set for `jsonParsed`
/// responses the node could parse; `data` is empty in that case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAccount {
    pub lamports: u64,
    pub owner: Pubkey,
    pub executable: bool,
    pub data: Vec<u8>,
    pub parsed: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyedAccount {
    pub pubkey: Pubkey,
    pub account: RawAccount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Vec<KeyedAccount>),
    /// Valid absence: the account does not exist
    Missing,
    Failed(FetchError),
}

#[derive(Clone, Debug, Default)]
pub struct FetchResults {
    pub entries: Vec<(Pubkey, FetchOutcome)>,
}

impl FetchResults {
    pub fn get(&self, address: &Pubkey) -> Option<&FetchOutcome> {
        self.entries.iter().find(|(a, _)| a == address).map(|(_, o)| o)
    }

    /// The single account fetched for `address` by an account-info lookup
    pub fn account(&self, address: &Pubkey) -> Option<&RawAccount> {
        match self.get(address) {
            Some(FetchOutcome::Found(list)) => {
                list.iter().find(|k| k.pubkey == *address).map(|k| &k.account)
            }
            _ => None,
        }
    }

    pub fn failures(&self) -> Vec<(Pubkey, FetchError)> {
        self.entries
            .iter()
            .filter_map(|(a, o)| match o {
                FetchOutcome::Failed(e) => Some((*a, e.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn missing(&self) -> Vec<Pubkey> {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, FetchOutcome::Missing))
            .map(|(a, _)| *a)
            .collect()
    }
}

// ==================== Fetcher ====================

pub struct BatchedFetcher<T: BatchTransport> {
    transport: T,
    config: RpcConfig,
}

impl<T: BatchTransport> BatchedFetcher<T> {
    pub fn new(transport: T, config: RpcConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Fetch every address with the given kind. Duplicate addresses are
    /// queried once. The result holds one entry per unique address.
    pub async fn fetch_accounts(&self, addresses: &[Pubkey], kind: &FetchKind) -> FetchResults {
        let mut seen = HashSet::new();
        let unique: Vec<Pubkey> = addresses.iter().filter(|a| seen.insert(**a)).copied().collect();
        if unique.is_empty() {
            return FetchResults::default();
        }

        let batch_size = self.config.max_batch_size.max(1);
        let in_flight = self.config.max_concurrent_batches.max(1);
        let chunks: Vec<Vec<Pubkey>> = unique.chunks(batch_size).map(|c| c.to_vec()).collect();
        tracing::debug!(
            "{}: {} addresses in {} batches",
            kind.label(),
            unique.len(),
            chunks.len()
        );

        let per_chunk: Vec<Vec<(Pubkey, FetchOutcome)>> = stream::iter(chunks)
            .map(|chunk| self.fetch_chunk(chunk, kind))
            .buffer_unordered(in_flight)
            .collect()
            .await;

        FetchResults {
            entries: per_chunk.into_iter().flatten().collect(),
        }
    }

    async fn fetch_chunk(
        &self,
        chunk: Vec<Pubkey>,
        kind: &FetchKind,
    ) -> Vec<(Pubkey, FetchOutcome)> {
        let body: Vec<Value> = chunk.iter().map(|a| self.request(a, kind)).collect();
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        let responses = match tokio::time::timeout(timeout, self.transport.post_batch(body)).await {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout(self.config.request_timeout_ms)),
        };

        let responses = match responses {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("{} batch of {} failed: {}", kind.label(), chunk.len(), e);
                return chunk.into_iter().map(|a| (a, FetchOutcome::Failed(e.clone()))).collect();
            }
        };

        let mut by_id: HashMap<String, Value> = HashMap::with_capacity(responses.len());
        for response in responses {
            if let Some(id) = response.get("id").and_then(Value::as_str) {
                by_id.insert(id.to_string(), response);
            }
        }

        chunk
            .into_iter()
            .map(|address| {
                let outcome = match by_id.remove(&address.to_string()) {
                    Some(response) => decode_response(&address, response, kind),
                    None => FetchOutcome::Failed(FetchError::Malformed(
                        "no response for request".to_string(),
                    )),
                };
                if let FetchOutcome::Failed(e) = &outcome {
                    tracing::warn!("{} failed for {}: {}", kind.label(), address, e);
                }
                (address, outcome)
            })
            .collect()
    }

    fn request(&self, address: &Pubkey, kind: &FetchKind) -> Value {
        let id = address.to_string();
        let commitment = self.config.commitment.as_str();

        let (method, params) = match kind {
            FetchKind::Generic(encoding) => (
                "getAccountInfo",
                json!([id, { "commitment": commitment, "encoding": encoding.as_str() }]),
            ),
            FetchKind::MintAccountInfo => (
                "getAccountInfo",
                json!([id, { "commitment": commitment, "encoding": "base64" }]),
            ),
            FetchKind::TokenAccountsByOwner { program_id, encoding } => (
                "getTokenAccountsByOwner",
                json!([
                    id,
                    { "programId": program_id.to_string() },
                    { "commitment": commitment, "encoding": encoding.as_str() }
                ]),
            ),
            FetchKind::ProgramAccountsByFilter {
                program_id,
                filters,
                data_slice,
            } => {
                let mut config = json!({
                    "commitment": commitment,
                    "encoding": "base64",
                    "filters": filters.iter().map(|f| f.to_json(address)).collect::<Vec<_>>(),
                });
                if let Some(slice) = data_slice {
                    config["dataSlice"] = json!({ "offset": slice.offset, "length": slice.length });
                }
                ("getProgramAccounts", json!([program_id.to_string(), config]))
            }
        };

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        })
    }
}

// ==================== Response decoding ====================

#[derive(Debug, Deserialize)]
struct RawUiAccount {
    data: Value,
    lamports: u64,
    owner: String,
    #[serde(default)]
    executable: bool,
}

#[derive(Debug, Deserialize)]
struct RawKeyedAccount {
    pubkey: String,
    account: RawUiAccount,
}

#[derive(Debug, Deserialize)]
struct RawContextValue<T> {
    value: T,
}

fn rpc_error(error: &Value) -> FetchError {
    FetchError::Rpc {
        code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    }
}

fn decode_response(address: &Pubkey, mut response: Value, kind: &FetchKind) -> FetchOutcome {
    if let Some(error) = response.get("error") {
        return FetchOutcome::Failed(rpc_error(error));
    }
    let Some(result) = response.get_mut("result").map(Value::take) else {
        return FetchOutcome::Failed(FetchError::Malformed("no result in response".to_string()));
    };

    let decoded = match kind {
        FetchKind::Generic(_) | FetchKind::MintAccountInfo => {
            serde_json::from_value::<RawContextValue<Option<RawUiAccount>>>(result)
                .map_err(|e| e.to_string())
                .and_then(|r| match r.value {
                    None => Ok(None),
                    Some(ui) => decode_ui_account(&ui).map(|account| {
                        Some(vec![KeyedAccount {
                            pubkey: *address,
                            account,
                        }])
                    }),
                })
        }
        FetchKind::TokenAccountsByOwner { .. } => {
            serde_json::from_value::<RawContextValue<Vec<RawKeyedAccount>>>(result)
                .map_err(|e| e.to_string())
                .and_then(|r| decode_keyed(r.value).map(Some))
        }
        FetchKind::ProgramAccountsByFilter { .. } => {
            serde_json::from_value::<Vec<RawKeyedAccount>>(result)
                .map_err(|e| e.to_string())
                .and_then(|r| decode_keyed(r).map(Some))
        }
    };

    match decoded {
        Ok(Some(list)) => FetchOutcome::Found(list),
        Ok(None) => FetchOutcome::Missing,
        Err(e) => FetchOutcome::Failed(FetchError::Malformed(e)),
    }
}

fn decode_keyed(raw: Vec<RawKeyedAccount>) -> Result<Vec<KeyedAccount>, String> {
    raw.into_iter()
        .map(|k| {
            let pubkey = k.pubkey.parse::<Pubkey>().map_err(|e| e.to_string())?;
            let account = decode_ui_account(&k.account)?;
            Ok(KeyedAccount { pubkey, account })
        })
        .collect()
}

fn decode_ui_account(ui: &RawUiAccount) -> Result<RawAccount, String> {
    let owner = ui.owner.parse::<Pubkey>().map_err(|e| e.to_string())?;

    // Data comes as [encoded, encoding], a bare base58 string, or a parsed object
    let (data, parsed) = match &ui.data {
        Value::Array(arr) if !arr.is_empty() => {
            let encoded = arr[0].as_str().ok_or_else(|| "invalid data format".to_string())?;
            let encoding = arr.get(1).and_then(Value::as_str).unwrap_or("base64");
            let data = match encoding {
                "base64" => base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| e.to_string())?,
                "base58" => bs58::decode(encoded).into_vec().map_err(|e| e.to_string())?,
                other => return Err(format!("unsupported encoding: {}", other)),
            };
            (data, None)
        }
        Value::String(s) => (bs58::decode(s).into_vec().map_err(|e| e.to_string())?, None),
        Value::Object(_) => (Vec::new(), Some(ui.data.clone())),
        other => return Err(format!("unexpected data format: {:?}", other)),
    };

    Ok(RawAccount {
        lamports: ui.lamports,
        owner,
        executable: ui.executable,
        data,
        parsed,
    })
}
