//! Shared fixtures for the historical sync integration tests: a deterministic
//! scripted chain and a mock RPC client with call journaling, per-request
//! delays and injected failures.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use historical_sync::{
    Block, Log, LogFilter, RequestError, RequestQueue, Transaction, TransactionReceipt,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const CHAIN_ID: u64 = 1;

/// Deterministic transaction hash for the single transaction in each block.
pub fn tx_hash(block_number: u64) -> B256 {
    B256::left_padding_from(&block_number.to_be_bytes())
}

pub fn block_hash(block_number: u64) -> B256 {
    let mut bytes = [0xbb; 32];
    bytes[24..].copy_from_slice(&block_number.to_be_bytes());
    B256::from(bytes)
}

pub fn make_block(number: u64) -> Block {
    Block {
        number,
        hash: block_hash(number),
        parent_hash: block_hash(number.wrapping_sub(1)),
        timestamp: 1_000 + number * 12,
        transactions: vec![Transaction {
            hash: tx_hash(number),
            block_number: number,
            transaction_index: 0,
            from: Address::repeat_byte(0x99),
            to: None,
            input: Bytes::new(),
        }],
    }
}

pub fn make_log(address: Address, block_number: u64, log_index: u64, topics: Vec<B256>) -> Log {
    Log {
        address,
        topics,
        data: Bytes::new(),
        block_number,
        block_hash: block_hash(block_number),
        transaction_hash: tx_hash(block_number),
        transaction_index: 0,
        log_index,
    }
}

/// A completed RPC call, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    GetLogs {
        from_block: u64,
        to_block: u64,
        address: Option<Vec<Address>>,
    },
    GetBlock {
        block_number: u64,
    },
    GetReceipt,
}

type FailPredicate = Box<dyn Fn(&LogFilter) -> bool + Send + Sync>;

#[derive(Default)]
pub struct MockRpc {
    blocks: Vec<Block>,
    logs: Vec<Log>,
    journal: Mutex<Vec<RpcCall>>,
    log_delays: Mutex<HashMap<(u64, u64), Duration>>,
    fail_once: Mutex<Option<FailPredicate>>,
}

impl MockRpc {
    /// A chain of `tip + 1` blocks with one transaction each.
    pub fn new(tip: u64) -> Self {
        Self {
            blocks: (0..=tip).map(make_block).collect(),
            ..Self::default()
        }
    }

    pub fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    /// Delays the `get_logs` call covering exactly `[from_block, to_block]`.
    pub fn delay_log_query(&self, from_block: u64, to_block: u64, delay: Duration) {
        self.log_delays
            .lock()
            .unwrap()
            .insert((from_block, to_block), delay);
    }

    /// Fails the next `get_logs` call matching the predicate, once.
    pub fn fail_once_when(&self, predicate: impl Fn(&LogFilter) -> bool + Send + Sync + 'static) {
        *self.fail_once.lock().unwrap() = Some(Box::new(predicate));
    }

    pub fn journal(&self) -> Vec<RpcCall> {
        self.journal.lock().unwrap().clone()
    }

    /// Block numbers fetched via `get_block_by_number`, in call order.
    pub fn block_fetches(&self) -> Vec<u64> {
        self.journal()
            .into_iter()
            .filter_map(|call| match call {
                RpcCall::GetBlock { block_number } => Some(block_number),
                _ => None,
            })
            .collect()
    }

    /// `(from, to)` ranges of completed `get_logs` calls, in completion order.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.journal()
            .into_iter()
            .filter_map(|call| match call {
                RpcCall::GetLogs {
                    from_block,
                    to_block,
                    ..
                } => Some((from_block, to_block)),
                _ => None,
            })
            .collect()
    }

    /// Index in the journal of the first call equal to `call`.
    pub fn journal_position(&self, call: &RpcCall) -> Option<usize> {
        self.journal().iter().position(|entry| entry == call)
    }

    fn record(&self, call: RpcCall) {
        self.journal.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RequestQueue for MockRpc {
    async fn get_logs(&self, filter: LogFilter) -> Result<Vec<Log>, RequestError> {
        let delay = self
            .log_delays
            .lock()
            .unwrap()
            .get(&(filter.from_block, filter.to_block))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // Failed attempts are journaled too, so tests can observe retries.
        self.record(RpcCall::GetLogs {
            from_block: filter.from_block,
            to_block: filter.to_block,
            address: filter.address.clone(),
        });

        let should_fail = {
            let mut fail = self.fail_once.lock().unwrap();
            if fail.as_ref().is_some_and(|predicate| predicate(&filter)) {
                *fail = None;
                true
            } else {
                false
            }
        };
        if should_fail {
            return Err(RequestError::Timeout);
        }

        let logs = self
            .logs
            .iter()
            .filter(|log| {
                log.block_number >= filter.from_block
                    && log.block_number <= filter.to_block
                    && filter
                        .address
                        .as_ref()
                        .map_or(true, |addresses| addresses.contains(&log.address))
                    && filter.topics.iter().enumerate().all(|(i, topic)| {
                        topic.as_ref().map_or(true, |accepted| {
                            log.topics.get(i).is_some_and(|t| accepted.contains(t))
                        })
                    })
            })
            .cloned()
            .collect();
        Ok(logs)
    }

    async fn get_block_by_number(&self, block_number: u64) -> Result<Option<Block>, RequestError> {
        self.record(RpcCall::GetBlock { block_number });
        Ok(self.blocks.get(block_number as usize).cloned())
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: B256,
    ) -> Result<Option<TransactionReceipt>, RequestError> {
        self.record(RpcCall::GetReceipt);
        Ok(self
            .blocks
            .iter()
            .flat_map(|block| &block.transactions)
            .find(|tx| tx.hash == transaction_hash)
            .map(|tx| TransactionReceipt {
                transaction_hash: tx.hash,
                block_number: tx.block_number,
                transaction_index: tx.transaction_index,
                status: true,
                gas_used: 21_000,
            }))
    }
}
