//! Historical Sync Demo
//!
//! Runs a full historical sync against a small scripted chain: one plain log
//! source and one factory source over the first 200 blocks. The scripted RPC
//! below stands in for the network's rate-limited JSON-RPC client; the
//! in-memory store stands in for the durable sync store.

use anyhow::Result;
use historical_sync::{
    Block, ChildAddressLocation, EventSource, FactoryCriteria, FactorySource, HistoricalSync,
    InMemorySyncStore, Log, LogFilter, LogFilterCriteria, LogSource, Network, RequestError,
    RequestQueue, SyncEvent, Transaction, TransactionReceipt,
};

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::sync::Arc;

const CHAIN_ID: u64 = 31337;
const CHAIN_TIP: u64 = 200;

/// A deterministic in-process chain: a block every slot, a token contract
/// emitting a log every 13 blocks, and a factory creating a child contract
/// at blocks 40 and 90 whose children log every 17 blocks afterwards.
struct ScriptedChain {
    blocks: Vec<Block>,
    logs: Vec<Log>,
}

fn token_address() -> Address {
    Address::repeat_byte(0x11)
}

fn factory_address() -> Address {
    Address::repeat_byte(0xfa)
}

fn creation_selector() -> B256 {
    B256::repeat_byte(0xcc)
}

fn make_log(address: Address, block_number: u64, log_index: u64, topics: Vec<B256>) -> Log {
    Log {
        address,
        topics,
        data: Bytes::new(),
        block_number,
        block_hash: B256::with_last_byte((block_number % 251) as u8),
        transaction_hash: B256::left_padding_from(&block_number.to_be_bytes()),
        transaction_index: 0,
        log_index,
    }
}

impl ScriptedChain {
    fn generate() -> Self {
        let mut blocks = Vec::new();
        let mut logs = Vec::new();

        for number in 0..=CHAIN_TIP {
            blocks.push(Block {
                number,
                hash: B256::with_last_byte((number % 251) as u8),
                parent_hash: B256::with_last_byte((number.wrapping_sub(1) % 251) as u8),
                timestamp: 1_700_000_000 + number * 12,
                transactions: vec![Transaction {
                    hash: B256::left_padding_from(&number.to_be_bytes()),
                    block_number: number,
                    transaction_index: 0,
                    from: Address::repeat_byte(0x99),
                    to: Some(token_address()),
                    input: Bytes::new(),
                }],
            });

            if number % 13 == 0 {
                logs.push(make_log(token_address(), number, 0, vec![B256::repeat_byte(0x01)]));
            }
        }

        for (creation_block, child_byte) in [(40u64, 0x21u8), (90, 0x22)] {
            let child = Address::repeat_byte(child_byte);
            logs.push(make_log(
                factory_address(),
                creation_block,
                1,
                vec![creation_selector(), B256::left_padding_from(child.as_slice())],
            ));
            for number in (creation_block..=CHAIN_TIP).step_by(17) {
                logs.push(make_log(child, number, 2, vec![B256::repeat_byte(0x02)]));
            }
        }

        Self { blocks, logs }
    }
}

struct ScriptedRpc {
    chain: ScriptedChain,
}

#[async_trait]
impl RequestQueue for ScriptedRpc {
    async fn get_logs(&self, filter: LogFilter) -> Result<Vec<Log>, RequestError> {
        Ok(self
            .chain
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
                        topic
                            .as_ref()
                            .map_or(true, |accepted| {
                                log.topics.get(i).is_some_and(|t| accepted.contains(t))
                            })
                    })
            })
            .cloned()
            .collect())
    }

    async fn get_block_by_number(&self, block_number: u64) -> Result<Option<Block>, RequestError> {
        Ok(self.chain.blocks.get(block_number as usize).cloned())
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: B256,
    ) -> Result<Option<TransactionReceipt>, RequestError> {
        Ok(self
            .chain
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

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(InMemorySyncStore::new());
    let rpc = Arc::new(ScriptedRpc {
        chain: ScriptedChain::generate(),
    });

    let token_source = EventSource::Log(LogSource {
        id: "log_Token".into(),
        contract_name: "Token".into(),
        chain_id: CHAIN_ID,
        start_block: 0,
        end_block: None,
        criteria: LogFilterCriteria {
            address: Some(vec![token_address()]),
            topics: vec![],
            include_transaction_receipts: false,
        },
        max_block_range: Some(50),
    });
    let pair_source = EventSource::Factory(FactorySource {
        id: "factory_Pair".into(),
        contract_name: "Pair".into(),
        chain_id: CHAIN_ID,
        start_block: 0,
        end_block: None,
        criteria: FactoryCriteria {
            address: factory_address(),
            event_selector: creation_selector(),
            child_address_location: ChildAddressLocation::Topic(1),
            topics: vec![],
            include_transaction_receipts: false,
        },
        max_block_range: Some(50),
    });

    let sync = HistoricalSync::builder()
        .network(Network::new("demo", CHAIN_ID).with_max_task_concurrency(4))
        .add_sources([token_source.clone(), pair_source])
        .store(Arc::clone(&store))
        .request_queue(rpc)
        .build()?;

    let mut events = sync.subscribe();
    sync.setup(CHAIN_TIP, CHAIN_TIP).await?;
    sync.start();

    loop {
        match events.recv().await? {
            SyncEvent::Checkpoint(checkpoint) => {
                println!(
                    "checkpoint: block {} (timestamp {})",
                    checkpoint.block_number, checkpoint.block_timestamp
                );
            }
            SyncEvent::SyncComplete => {
                println!("historical sync complete");
                break;
            }
        }
    }

    if let EventSource::Log(source) = &token_source {
        let inserts = store.log_filter_inserts(CHAIN_ID, &source.criteria);
        println!(
            "token source: {} intervals inserted, {} logs",
            inserts.len(),
            inserts.iter().map(|record| record.log_count).sum::<usize>()
        );
    }
    println!(
        "factory child creations stored: {}",
        store.child_address_log_count(CHAIN_ID)
    );

    Ok(())
}
