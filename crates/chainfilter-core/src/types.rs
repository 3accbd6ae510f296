//! Shared data model: block references, filter params, logs and blocks.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::FilterError;
use crate::quantity::{parse_numeral, Quantity};

// ─── BlockRef ────────────────────────────────────────────────────────────────

/// A block number or one of the symbolic tags.
///
/// The derived ordering is the one filters rely on: `earliest` below every
/// number, numbers by value, then `latest`, then `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BlockRef {
    Earliest,
    Number(u64),
    #[default]
    Latest,
    Pending,
}

impl BlockRef {
    /// Returns the concrete block number, if this is not a tag.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// Resolve against the current chain head.
    pub fn resolve(&self, head: u64) -> u64 {
        match self {
            Self::Earliest => 0,
            Self::Number(n) => *n,
            Self::Latest | Self::Pending => head,
        }
    }
}

impl std::str::FromStr for BlockRef {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            "pending" => Ok(Self::Pending),
            other => parse_numeral(other)
                .map(Self::Number)
                .ok_or_else(|| FilterError::InvalidParams(format!("invalid block reference {other:?}"))),
        }
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Earliest => write!(f, "earliest"),
            Self::Number(n) => write!(f, "{n:#x}"),
            Self::Latest => write!(f, "latest"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

impl From<u64> for BlockRef {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl Serialize for BlockRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct BlockRefVisitor;

impl<'de> Visitor<'de> for BlockRefVisitor {
    type Value = BlockRef;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a block number or one of \"earliest\", \"latest\", \"pending\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<BlockRef, E> {
        Ok(BlockRef::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<BlockRef, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for BlockRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(BlockRefVisitor)
    }
}

// ─── FilterParams ────────────────────────────────────────────────────────────

/// One position of a topic filter.
///
/// `null` positions are represented as `None` in [`FilterParams::topics`];
/// an alternative set may itself contain `null`, which accepts any topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicPattern {
    Single(String),
    AnyOf(Vec<Option<String>>),
}

impl TopicPattern {
    /// The acceptable values at this position; `None` is the wildcard marker.
    pub fn alternatives(&self) -> Vec<Option<&str>> {
        match self {
            Self::Single(topic) => vec![Some(topic.as_str())],
            Self::AnyOf(set) => set.iter().map(|t| t.as_deref()).collect(),
        }
    }
}

/// Parameters of an `eth_newFilter` / `logs` subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParams {
    #[serde(default)]
    pub from_block: BlockRef,
    #[serde(default)]
    pub to_block: BlockRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<Option<TopicPattern>>,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            from_block: BlockRef::Latest,
            to_block: BlockRef::Latest,
            address: None,
            topics: vec![],
        }
    }
}

impl FilterParams {
    /// Parse request params and normalise the address to lowercase.
    pub fn from_value(value: Value) -> Result<Self, FilterError> {
        let params: Self = serde_json::from_value(value)
            .map_err(|e| FilterError::InvalidParams(e.to_string()))?;
        Ok(params.normalized())
    }

    /// Lowercase the address; everything else is kept as given.
    pub fn normalized(mut self) -> Self {
        self.address = self.address.map(|a| a.to_ascii_lowercase());
        self
    }

    /// Only logs emitted by `address`.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into().to_ascii_lowercase());
        self
    }

    /// Append a topic position.
    pub fn topic(mut self, pattern: Option<TopicPattern>) -> Self {
        self.topics.push(pattern);
        self
    }

    pub fn from_block(mut self, block: impl Into<BlockRef>) -> Self {
        self.from_block = block.into();
        self
    }

    pub fn to_block(mut self, block: impl Into<BlockRef>) -> Self {
        self.to_block = block.into();
        self
    }

    /// Copy of these params narrowed to the concrete range `[from, to]`,
    /// as sent to `eth_getLogs`.
    pub fn with_range(&self, from: u64, to: u64) -> Self {
        Self {
            from_block: BlockRef::Number(from),
            to_block: BlockRef::Number(to),
            ..self.clone()
        }
    }
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// A log entry as returned by `eth_getLogs`, numeric fields normalised.
///
/// Fields this crate does not interpret are carried through in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Log {
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.map(Quantity::as_u64)
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// The header fields pushed to `newHeads` subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: Quantity,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha3_uncles: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bloom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mix_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<String>,
}

/// A transaction entry in a block body: a bare hash (`eth_getBlockByNumber`
/// with `false`) or a full object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTransaction {
    Hash(String),
    Full { hash: String },
}

impl BlockTransaction {
    pub fn hash(&self) -> &str {
        match self {
            Self::Hash(hash) | Self::Full { hash } => hash,
        }
    }
}

/// A block body as returned by `eth_getBlockByNumber`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number.as_u64()
    }

    pub fn hash(&self) -> Option<&str> {
        self.header.hash.as_deref()
    }
}

// ─── Filter results ──────────────────────────────────────────────────────────

/// The kind of an installed filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    Log,
    Block,
    PendingTransaction,
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Log => write!(f, "log"),
            Self::Block => write!(f, "block"),
            Self::PendingTransaction => write!(f, "pendingTransaction"),
        }
    }
}

/// One result item reported by a filter: a log, or a block / transaction hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterItem {
    Hash(String),
    Log(Box<Log>),
}

impl FilterItem {
    pub fn as_log(&self) -> Option<&Log> {
        match self {
            Self::Log(log) => Some(log),
            Self::Hash(_) => None,
        }
    }

    pub fn as_hash(&self) -> Option<&str> {
        match self {
            Self::Hash(hash) => Some(hash),
            Self::Log(_) => None,
        }
    }
}

impl From<Log> for FilterItem {
    fn from(log: Log) -> Self {
        Self::Log(Box::new(log))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
