//! JSON-RPC handle to the node.
//!
//! [`RpcSession`] speaks JSON-RPC 1.0 over HTTP with basic authentication,
//! the dialect Bitcoin Core and its forks expose on `-rpcport`. Calls are
//! blocking: the orchestrator waits for every round-trip before continuing.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound on a single round-trip. Mining many blocks in one call can
/// take a while on slow machines.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const REQUEST_ID: &str = "testchain";

/// Satoshis per coin.
pub const COIN: u64 = 100_000_000;

/// Bitcoin Core's "still warming up" error code.
pub const RPC_IN_WARMUP: i64 = -28;

/// Errors raised by a single RPC call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC {method} failed with code {code}: {message}")]
    Server {
        method: String,
        code: i64,
        message: String,
    },

    #[error("RPC {method} returned HTTP {status} without a JSON-RPC body")]
    Status { method: String, status: u16 },

    #[error("RPC {method} returned an unexpected payload: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    /// Whether the node answered but is not ready to serve yet.
    pub fn is_warmup(&self) -> bool {
        matches!(self, RpcError::Server { code, .. } if *code == RPC_IN_WARMUP)
    }

    /// Whether the node could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ServerError>,
}

#[derive(Deserialize)]
struct ServerError {
    code: i64,
    message: String,
}

/// An unspent output as reported by `listunspent`.
#[derive(Debug, Clone, Deserialize)]
pub struct Unspent {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    pub amount: f64,
}

impl Unspent {
    pub fn amount_sats(&self) -> u64 {
        (self.amount * COIN as f64).round() as u64
    }
}

/// Result of `signrawtransactionwithwallet`.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
}

/// Convert satoshis to the coin-denominated JSON number the node expects.
pub fn sats_to_amount(sats: u64) -> Value {
    json!(sats as f64 / COIN as f64)
}

/// Authenticated RPC handle shared by every generator of a session.
#[derive(Debug, Clone)]
pub struct RpcSession {
    client: Client,
    url: String,
    user: String,
    password: String,
}

impl RpcSession {
    /// Handle for a node listening on `127.0.0.1:<port>`.
    pub fn new(port: u16, user: &str, password: &str) -> Result<Self, RpcError> {
        Self::with_url(&format!("http://127.0.0.1:{}/", port), user, password)
    }

    pub fn with_url(url: &str, user: &str, password: &str) -> Result<Self, RpcError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(RpcSession {
            client,
            url: url.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one call and return the raw `result`.
    pub fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        self.send(method, params, None)
    }

    /// [`call`](Self::call) bounded by `timeout` instead of the default
    /// round-trip bound; a timeout surfaces as a transport error.
    pub fn call_within(&self, method: &str, params: &[Value], timeout: Duration) -> Result<Value, RpcError> {
        self.send(method, params, Some(timeout))
    }

    fn send(&self, method: &str, params: &[Value], timeout: Option<Duration>) -> Result<Value, RpcError> {
        let request = Request {
            jsonrpc: "1.0",
            id: REQUEST_ID,
            method,
            params,
        };
        log::trace!("rpc -> {} {:?}", method, params);

        let mut builder = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send()?;
        let status = response.status();
        let body = response.text()?;

        // The node reports RPC errors with a non-2xx status and a JSON body,
        // so the body is decoded before the status is looked at.
        match serde_json::from_str::<Response>(&body) {
            Ok(Response {
                error: Some(err), ..
            }) => Err(RpcError::Server {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            }),
            Ok(Response { result, .. }) => Ok(result),
            Err(_) if !status.is_success() => Err(RpcError::Status {
                method: method.to_string(),
                status: status.as_u16(),
            }),
            Err(source) => Err(RpcError::Decode {
                method: method.to_string(),
                source,
            }),
        }
    }

    /// Issue one call and decode the `result` into `T`.
    pub fn call_as<T: DeserializeOwned>(&self, method: &str, params: &[Value]) -> Result<T, RpcError> {
        let value = self.call(method, params)?;
        serde_json::from_value(value).map_err(|source| RpcError::Decode {
            method: method.to_string(),
            source,
        })
    }

    pub fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call_as("getblockcount", &[])
    }

    /// `getblockcount` that gives up after `timeout`.
    pub fn get_block_count_within(&self, timeout: Duration) -> Result<u64, RpcError> {
        let value = self.call_within("getblockcount", &[], timeout)?;
        serde_json::from_value(value).map_err(|source| RpcError::Decode {
            method: "getblockcount".to_string(),
            source,
        })
    }

    pub fn get_best_block_hash(&self) -> Result<String, RpcError> {
        self.call_as("getbestblockhash", &[])
    }

    pub fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call_as("getblockhash", &[json!(height)])
    }

    /// Serialized block as hex (`getblock <hash> 0`).
    pub fn get_raw_block(&self, hash: &str) -> Result<String, RpcError> {
        self.call_as("getblock", &[json!(hash), json!(0)])
    }

    /// Import a WIF key without rescanning.
    pub fn import_priv_key(&self, wif: &str, label: &str) -> Result<(), RpcError> {
        self.call("importprivkey", &[json!(wif), json!(label), json!(false)])?;
        Ok(())
    }

    /// New wallet address; `address_type` is omitted for nodes without one.
    pub fn get_new_address(&self, label: &str, address_type: Option<&str>) -> Result<String, RpcError> {
        let mut params = vec![json!(label)];
        params.extend(address_type.map(|t| json!(t)));
        self.call_as("getnewaddress", &params)
    }

    /// Add an `n`-of-`keys` multisig to the wallet and return its address.
    pub fn add_multisig_address(
        &self,
        required: u32,
        keys: &[String],
        label: &str,
        address_type: Option<&str>,
    ) -> Result<String, RpcError> {
        let mut params = vec![json!(required), json!(keys), json!(label)];
        params.extend(address_type.map(|t| json!(t)));
        let result = self.call("addmultisigaddress", &params)?;
        result
            .get("address")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode {
                method: "addmultisigaddress".to_string(),
                source: serde::de::Error::missing_field("address"),
            })
    }

    pub fn generate_to_address(&self, blocks: u32, address: &str) -> Result<Vec<String>, RpcError> {
        self.call_as("generatetoaddress", &[json!(blocks), json!(address)])
    }

    pub fn set_mock_time(&self, timestamp: u64) -> Result<(), RpcError> {
        self.call("setmocktime", &[json!(timestamp)])?;
        Ok(())
    }

    pub fn send_to_address(&self, address: &str, sats: u64) -> Result<String, RpcError> {
        self.call_as("sendtoaddress", &[json!(address), sats_to_amount(sats)])
    }

    /// Confirmed unspent outputs paying to any of `addresses`.
    pub fn list_unspent(&self, addresses: &[String]) -> Result<Vec<Unspent>, RpcError> {
        self.call_as("listunspent", &[json!(1), json!(9_999_999), json!(addresses)])
    }

    pub fn create_raw_transaction(
        &self,
        inputs: &[Unspent],
        outputs: &[(String, u64)],
    ) -> Result<String, RpcError> {
        let inputs: Vec<Value> = inputs
            .iter()
            .map(|utxo| json!({ "txid": utxo.txid, "vout": utxo.vout }))
            .collect();
        let outputs: serde_json::Map<String, Value> = outputs
            .iter()
            .map(|(addr, sats)| (addr.clone(), sats_to_amount(*sats)))
            .collect();
        self.call_as("createrawtransaction", &[json!(inputs), Value::Object(outputs)])
    }

    pub fn sign_raw_transaction_with_wallet(&self, hex: &str) -> Result<SignedTransaction, RpcError> {
        self.call_as("signrawtransactionwithwallet", &[json!(hex)])
    }

    pub fn send_raw_transaction(&self, hex: &str) -> Result<String, RpcError> {
        self.call_as("sendrawtransaction", &[json!(hex)])
    }

    /// Ask the node to shut down gracefully.
    /// Ask the node to shut down, waiting at most `timeout` for the reply.
    pub fn stop(&self, timeout: Duration) -> Result<(), RpcError> {
        self.call_within("stop", &[], timeout)?;
        Ok(())
    }
}
