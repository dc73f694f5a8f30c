//! Projection of raw indexer records into [`Transaction`]s.
//!
//! Two record shapes are understood. A *detailed receipt* nests the transaction under
//! `header` and its execution under `receipt`; a *summary* is a flat list item. Field
//! names vary between indexer versions, so every field accepts its camelCase and
//! snake_case spellings.

use ruint::aliases::U256;
use serde::Deserialize;
use serde_json::Value;
use starknet_core::{types::Felt, utils::get_selector_from_name};

use super::{
    calldata::CalldataDecoder,
    types::{Transaction, TransactionKind, TransactionStatus},
};
use crate::{
    address::{felt_to_hex, pad_address, parse_felt_lenient},
    amount::{format_units, parse_raw_amount, u256_from_felts},
    tokens::{find_by_address, TokenInfo},
};

/// Timestamps below this are taken to be seconds.
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(u64),
    Text(String),
}

impl NumberLike {
    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(text) => parse_raw_amount(text).ok().and_then(|v| u64::try_from(v).ok()),
        }
    }

    fn as_string(&self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.to_string()),
            Self::Text(text) => parse_raw_amount(text)
                .map(|v| v.to_string())
                .ok()
                .or_else(|| (!text.is_empty()).then(|| text.clone())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeeValue {
    Amount { amount: NumberLike },
    Plain(NumberLike),
}

impl FeeValue {
    fn as_string(&self) -> Option<String> {
        match self {
            Self::Amount { amount } | Self::Plain(amount) => amount.as_string(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawTransfer {
    #[serde(alias = "from_address", alias = "fromAddress")]
    from: Option<String>,
    #[serde(alias = "to_address", alias = "toAddress")]
    to: Option<String>,
    #[serde(alias = "value", alias = "rawAmount", alias = "raw_amount")]
    amount: Option<NumberLike>,
    #[serde(
        alias = "tokenAddress",
        alias = "token",
        alias = "contract_address",
        alias = "contractAddress"
    )]
    token_address: Option<String>,
    #[serde(alias = "tokenSymbol", alias = "token_symbol")]
    symbol: Option<String>,
    #[serde(alias = "tokenDecimals", alias = "token_decimals")]
    decimals: Option<u8>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawEvent {
    name: Option<String>,
    #[serde(alias = "fromAddress", alias = "contract_address")]
    from_address: Option<String>,
    keys: Vec<String>,
    data: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawHeader {
    #[serde(alias = "transaction_hash", alias = "transactionHash", alias = "txHash")]
    hash: Option<String>,
    #[serde(rename = "type", alias = "txType", alias = "tx_type")]
    tx_type: Option<String>,
    timestamp: Option<NumberLike>,
    #[serde(alias = "blockNumber", alias = "block")]
    block_number: Option<NumberLike>,
    #[serde(alias = "executionStatus")]
    execution_status: Option<String>,
    #[serde(alias = "finality_status", alias = "finalityStatus")]
    status: Option<String>,
    #[serde(
        alias = "senderAddress",
        alias = "sender_address",
        alias = "contract_address",
        alias = "contractAddress"
    )]
    sender: Option<String>,
    #[serde(alias = "actualFee")]
    actual_fee: Option<FeeValue>,
    #[serde(alias = "gasUsed", alias = "gas_consumed", alias = "gasConsumed")]
    gas_used: Option<NumberLike>,
    transfers: Vec<RawTransfer>,
    events: Vec<RawEvent>,
    calldata: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawReceipt {
    #[serde(alias = "executionStatus")]
    execution_status: Option<String>,
    #[serde(alias = "finalityStatus", alias = "status")]
    finality_status: Option<String>,
    #[serde(alias = "actualFee")]
    actual_fee: Option<FeeValue>,
    #[serde(alias = "gasUsed", alias = "gas_consumed", alias = "gasConsumed")]
    gas_used: Option<NumberLike>,
    events: Vec<RawEvent>,
    transfers: Vec<RawTransfer>,
}

#[derive(Deserialize)]
struct DetailedRecord {
    header: RawHeader,
    #[serde(default)]
    receipt: RawReceipt,
    #[serde(default)]
    calldata: Vec<String>,
}

/// One token movement, whatever shape it was reported in.
struct Movement {
    from: Option<Felt>,
    to: Option<Felt>,
    amount: MovementAmount,
    token_address: Option<String>,
    symbol: Option<String>,
    decimals: Option<u8>,
}

enum MovementAmount {
    Raw(U256),
    Display(String),
}

/// Shape-independent view of a record.
struct RecordView {
    hash: String,
    tx_type: String,
    timestamp_ms: u64,
    block_number: Option<u64>,
    execution_status: Option<String>,
    finality_status: Option<String>,
    sender: Option<String>,
    actual_fee: Option<String>,
    gas_used: Option<String>,
    movements: Vec<Movement>,
    events: Vec<RawEvent>,
    calldata: Vec<Felt>,
}

/// Whether `record` is a detailed receipt.
pub(crate) fn is_detailed(record: &Value) -> bool {
    record.get("header").is_some_and(Value::is_object)
        && record.get("receipt").is_some_and(Value::is_object)
}

/// Whether a summary record carries token movements of its own.
pub(crate) fn has_transfer_data(record: &Value) -> bool {
    record
        .get("transfers")
        .and_then(Value::as_array)
        .is_some_and(|transfers| !transfers.is_empty())
}

/// Whether a summary record is an account deployment.
pub(crate) fn is_deploy_record(record: &Value) -> bool {
    ["type", "txType", "tx_type"]
        .iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .any(|kind| kind.to_ascii_uppercase().contains("DEPLOY"))
}

pub(crate) struct Normalizer<'a> {
    pub(crate) wallet: Felt,
    pub(crate) tokens: &'a [TokenInfo],
    pub(crate) decoder: &'a dyn CalldataDecoder,
}

impl Normalizer<'_> {
    /// Projects one raw record. `None` when the record has no usable hash.
    pub(crate) fn normalize(&self, record: &Value) -> Option<Transaction> {
        let view = if is_detailed(record) {
            let detailed: DetailedRecord = serde_json::from_value(record.clone()).ok()?;
            view_from_detailed(detailed)
        } else {
            let summary: RawHeader = serde_json::from_value(record.clone()).ok()?;
            view_from_summary(summary)
        }?;
        Some(self.project(view))
    }

    fn project(&self, view: RecordView) -> Transaction {
        let status = status_of(&view);
        let mut tx = Transaction {
            hash: view.hash.clone(),
            kind: TransactionKind::Send,
            amount: "0".to_string(),
            token: String::new(),
            timestamp_ms: view.timestamp_ms,
            status,
            from: view.sender.clone(),
            to: None,
            block_number: view.block_number,
            gas_used: view.gas_used.clone(),
            actual_fee: view.actual_fee.clone(),
        };

        if view.tx_type.to_ascii_uppercase().contains("DEPLOY") {
            tx.kind = TransactionKind::Deploy;
            return tx;
        }

        let outgoing: Vec<&Movement> = view
            .movements
            .iter()
            .filter(|m| m.from == Some(self.wallet) && !self.is_fee(m, &view))
            .collect();
        let incoming: Vec<&Movement> = view
            .movements
            .iter()
            .filter(|m| m.to == Some(self.wallet) && m.from != Some(self.wallet))
            .collect();

        if is_swap(&view.events, &outgoing, &incoming) {
            tx.kind = TransactionKind::Swap;
            if let Some(spent) = outgoing.first().or_else(|| incoming.first()) {
                self.apply_movement(&mut tx, spent);
            }
            return tx;
        }

        if let Some(sent) = outgoing.first() {
            tx.kind = TransactionKind::Send;
            self.apply_movement(&mut tx, sent);
            return tx;
        }

        if let Some(received) = incoming.first() {
            tx.kind = TransactionKind::Receive;
            self.apply_movement(&mut tx, received);
            return tx;
        }

        if let Some(decoded) = self.decoder.decode_transfer(&view.calldata) {
            let movement = Movement {
                from: Some(self.wallet),
                to: Some(decoded.recipient),
                amount: MovementAmount::Raw(decoded.amount),
                token_address: Some(felt_to_hex(&decoded.token)),
                symbol: None,
                decimals: None,
            };
            self.apply_movement(&mut tx, &movement);
        }

        tx
    }

    /// The fee transfer the account makes to the sequencer looks like a send.
    fn is_fee(&self, movement: &Movement, view: &RecordView) -> bool {
        let Some(fee) = view.actual_fee.as_deref() else {
            return false;
        };
        let MovementAmount::Raw(amount) = &movement.amount else {
            return false;
        };
        let payments = view
            .movements
            .iter()
            .filter(|m| m.from == Some(self.wallet))
            .count();
        payments > 1 && amount.to_string() == fee
    }

    fn apply_movement(&self, tx: &mut Transaction, movement: &Movement) {
        let registry_token = movement
            .token_address
            .as_deref()
            .and_then(|address| find_by_address(self.tokens, address));

        tx.token = registry_token
            .map(|token| token.symbol.clone())
            .or_else(|| movement.symbol.clone())
            .or_else(|| movement.token_address.as_deref().map(short_address))
            .unwrap_or_default();

        tx.amount = match &movement.amount {
            MovementAmount::Raw(raw) => {
                let decimals = registry_token
                    .map(|token| token.decimals)
                    .or(movement.decimals)
                    .unwrap_or(18);
                format_units(*raw, decimals).unwrap_or_else(|err| {
                    log::debug!("dropping amount of {}: {err}", tx.hash);
                    String::new()
                })
            }
            MovementAmount::Display(amount) => amount.clone(),
        };
        tx.from = movement.from.as_ref().map(felt_to_hex).or_else(|| tx.from.take());
        tx.to = movement.to.as_ref().map(felt_to_hex);
    }
}

fn short_address(address: &str) -> String {
    if address.len() <= 12 {
        address.to_string()
    } else {
        format!("{}...{}", &address[..6], &address[address.len() - 4..])
    }
}

fn status_of(view: &RecordView) -> TransactionStatus {
    let finality = view
        .finality_status
        .as_deref()
        .map(TransactionStatus::from_indexer);
    if finality == Some(TransactionStatus::Failed) {
        return TransactionStatus::Failed;
    }
    view.execution_status
        .as_deref()
        .map(TransactionStatus::from_indexer)
        .or(finality)
        .unwrap_or(TransactionStatus::Pending)
}

fn is_swap(events: &[RawEvent], outgoing: &[&Movement], incoming: &[&Movement]) -> bool {
    let swap_selector = get_selector_from_name("Swap").ok();
    let named_swap = events.iter().any(|event| {
        event
            .name
            .as_deref()
            .is_some_and(|name| name.to_ascii_lowercase().contains("swap"))
            || event
                .keys
                .first()
                .and_then(|key| parse_felt_lenient(key))
                .is_some_and(|key| Some(key) == swap_selector)
    });
    if named_swap {
        return true;
    }

    // sent one token and got another back in the same transaction
    outgoing.iter().any(|out| {
        incoming
            .iter()
            .any(|inc| token_key(out) != token_key(inc))
    })
}

fn token_key(movement: &Movement) -> Option<String> {
    movement
        .token_address
        .as_deref()
        .and_then(|address| pad_address(address).ok())
        .or_else(|| movement.symbol.clone())
}

fn timestamp_ms(value: Option<&NumberLike>) -> u64 {
    let raw = value.and_then(NumberLike::as_u64).unwrap_or(0);
    if raw < MILLIS_THRESHOLD {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

fn movement_from_transfer(transfer: RawTransfer) -> Option<Movement> {
    let amount = match transfer.amount.as_ref()? {
        NumberLike::Number(n) => MovementAmount::Raw(U256::from(*n)),
        NumberLike::Text(text) => parse_raw_amount(text).map_or_else(
            |_| MovementAmount::Display(text.clone()),
            MovementAmount::Raw,
        ),
    };
    Some(Movement {
        from: transfer.from.as_deref().and_then(parse_felt_lenient),
        to: transfer.to.as_deref().and_then(parse_felt_lenient),
        amount,
        token_address: transfer.token_address,
        symbol: transfer.symbol,
        decimals: transfer.decimals,
    })
}

/// ERC-20 `Transfer` events: keys `[selector, from, to]` with data `[low, high]`, or the
/// legacy layout with everything in data `[from, to, low, high]`.
fn movement_from_event(event: &RawEvent) -> Option<Movement> {
    let transfer_selector = get_selector_from_name("Transfer").ok()?;
    let keys: Vec<Felt> = event.keys.iter().filter_map(|k| parse_felt_lenient(k)).collect();
    let data: Vec<Felt> = event.data.iter().filter_map(|d| parse_felt_lenient(d)).collect();

    let named_transfer = event.name.as_deref() == Some("Transfer");
    if keys.first() != Some(&transfer_selector) && !named_transfer {
        return None;
    }

    let (from, to, low, high) = match (keys.as_slice(), data.as_slice()) {
        ([_, from, to], [low, high]) => (*from, *to, *low, *high),
        (_, [from, to, low, high]) => (*from, *to, *low, *high),
        _ => return None,
    };

    Some(Movement {
        from: Some(from),
        to: Some(to),
        amount: MovementAmount::Raw(u256_from_felts(&low, &high)),
        token_address: event.from_address.clone(),
        symbol: None,
        decimals: None,
    })
}

fn view_from_summary(summary: RawHeader) -> Option<RecordView> {
    let hash = summary.hash.filter(|h| !h.is_empty())?;
    let mut movements: Vec<Movement> = summary
        .transfers
        .into_iter()
        .filter_map(movement_from_transfer)
        .collect();
    if movements.is_empty() {
        movements = summary.events.iter().filter_map(movement_from_event).collect();
    }
    Some(RecordView {
        hash,
        tx_type: summary.tx_type.unwrap_or_default(),
        timestamp_ms: timestamp_ms(summary.timestamp.as_ref()),
        block_number: summary.block_number.as_ref().and_then(NumberLike::as_u64),
        execution_status: summary.execution_status,
        finality_status: summary.status,
        sender: summary.sender,
        actual_fee: summary.actual_fee.as_ref().and_then(FeeValue::as_string),
        gas_used: summary.gas_used.as_ref().and_then(NumberLike::as_string),
        movements,
        events: summary.events,
        calldata: parse_calldata(&summary.calldata),
    })
}

fn view_from_detailed(record: DetailedRecord) -> Option<RecordView> {
    let DetailedRecord {
        header,
        receipt,
        calldata,
    } = record;
    let hash = header.hash.filter(|h| !h.is_empty())?;

    let mut movements: Vec<Movement> = receipt
        .transfers
        .into_iter()
        .chain(header.transfers)
        .filter_map(movement_from_transfer)
        .collect();
    if movements.is_empty() {
        movements = receipt.events.iter().filter_map(movement_from_event).collect();
    }

    let calldata = if calldata.is_empty() {
        header.calldata
    } else {
        calldata
    };

    Some(RecordView {
        hash,
        tx_type: header.tx_type.unwrap_or_default(),
        timestamp_ms: timestamp_ms(header.timestamp.as_ref()),
        block_number: header.block_number.as_ref().and_then(NumberLike::as_u64),
        execution_status: receipt.execution_status.or(header.execution_status),
        finality_status: receipt.finality_status.or(header.status),
        sender: header.sender,
        actual_fee: receipt
            .actual_fee
            .as_ref()
            .or(header.actual_fee.as_ref())
            .and_then(FeeValue::as_string),
        gas_used: receipt
            .gas_used
            .as_ref()
            .or(header.gas_used.as_ref())
            .and_then(NumberLike::as_string),
        movements,
        events: receipt.events,
        calldata: parse_calldata(&calldata),
    })
}

fn parse_calldata(calldata: &[String]) -> Vec<Felt> {
    calldata
        .iter()
        .map(|value| parse_felt_lenient(value))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default()
}
