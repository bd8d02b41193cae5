//! Task contract ABI: log decoding and call encoding.

use crate::ChainClientError;
use ethers::abi::{self, Abi, RawLog, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};
use ethers::utils::keccak256;
use tracing::{debug, warn};
use vb_worker::{ChainError, ChainResult, InputData, ResultHash, TaskEvent};

/// Human-readable contract surface used by the worker and the requester.
pub const TASK_CONTRACT_ABI: &[&str] = &[
    "event TaskCreated(uint256 indexed taskId, bytes32 inputData)",
    "event TaskAccepted(uint256 indexed taskId)",
    "function submitResult(uint256 taskId, bytes32 result)",
    "function nextTaskId(address requester) view returns (uint256)",
    "function requestCompute(bytes32 inputData, uint256 lifecycle)",
];

/// Task events decoded from one `eth_getLogs` batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedLogs {
    /// Task events in block and log-index order.
    pub events: Vec<TaskEvent>,
    /// Task logs that failed to decode and were dropped.
    pub undecodable: usize,
}

/// Input data committed by `requestCompute`.
///
/// `keccak256(abi.encode(uint256 taskId, bytes32 keccak256(rawData)))`,
/// where `taskId` is the requester's next task id.
pub fn derive_input_data(next_task_id: u64, raw_data: &[u8]) -> InputData {
    let encoded = abi::encode(&[
        Token::Uint(U256::from(next_task_id)),
        Token::FixedBytes(keccak256(raw_data).to_vec()),
    ]);
    keccak256(encoded)
}

/// Parsed task contract ABI with cached event signatures.
#[derive(Debug, Clone)]
pub struct TaskContract {
    abi: Abi,
    created_topic: H256,
    accepted_topic: H256,
}

impl TaskContract {
    /// Parse the contract ABI.
    pub fn new() -> Result<Self, ChainClientError> {
        let abi = abi::parse_abi(TASK_CONTRACT_ABI)
            .map_err(|e| ChainClientError::Abi(e.to_string()))?;
        let created_topic = abi
            .event("TaskCreated")
            .map_err(|e| ChainClientError::Abi(e.to_string()))?
            .signature();
        let accepted_topic = abi
            .event("TaskAccepted")
            .map_err(|e| ChainClientError::Abi(e.to_string()))?
            .signature();
        Ok(Self {
            abi,
            created_topic,
            accepted_topic,
        })
    }

    /// topic0 of `TaskCreated`.
    pub fn created_topic(&self) -> H256 {
        self.created_topic
    }

    /// topic0 of `TaskAccepted`.
    pub fn accepted_topic(&self) -> H256 {
        self.accepted_topic
    }

    /// Decode a contract log.
    ///
    /// Returns `Ok(None)` for logs that are not task events.
    pub fn decode_log(&self, log: &Log) -> ChainResult<Option<TaskEvent>> {
        let Some(topic0) = log.topics.first().copied() else {
            return Ok(None);
        };

        let name = if topic0 == self.created_topic {
            "TaskCreated"
        } else if topic0 == self.accepted_topic {
            "TaskAccepted"
        } else {
            return Ok(None);
        };

        let block_number = log
            .block_number
            .ok_or_else(|| ChainError::Decode(format!("{} log without block number", name)))?
            .as_u64();

        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let parsed = self
            .abi
            .event(name)
            .and_then(|event| event.parse_log(raw))
            .map_err(|e| ChainError::Decode(format!("{}: {}", name, e)))?;

        let mut task_id = None;
        let mut input_data = None;
        for param in parsed.params {
            match (param.name.as_str(), param.value) {
                ("taskId", Token::Uint(value)) => task_id = Some(task_id_from_u256(value)?),
                ("inputData", Token::FixedBytes(bytes)) => {
                    input_data = Some(bytes32(&bytes, "inputData")?)
                }
                _ => {}
            }
        }

        let task_id =
            task_id.ok_or_else(|| ChainError::Decode(format!("{} missing taskId", name)))?;

        if topic0 == self.accepted_topic {
            return Ok(Some(TaskEvent::Accepted {
                task_id,
                block_number,
            }));
        }

        let input_data = input_data
            .ok_or_else(|| ChainError::Decode("TaskCreated missing inputData".to_string()))?;
        Ok(Some(TaskEvent::Created {
            task_id,
            input_data,
            block_number,
        }))
    }

    /// Decode a batch of logs into task events.
    ///
    /// Logs are ordered by block number and log index. Removed logs and logs
    /// that are not task events are skipped. A task log that fails to decode
    /// is logged, counted and skipped so the rest of the batch still goes
    /// through.
    pub fn decode_batch(&self, mut logs: Vec<Log>) -> DecodedLogs {
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut decoded = DecodedLogs {
            events: Vec::with_capacity(logs.len()),
            undecodable: 0,
        };
        for log in &logs {
            if log.removed == Some(true) {
                debug!(block = ?log.block_number, "Skipping removed log");
                continue;
            }
            match self.decode_log(log) {
                Ok(Some(event)) => decoded.events.push(event),
                Ok(None) => debug!(topics = ?log.topics, "Skipping non-task log"),
                Err(e) => {
                    warn!(
                        error = %e,
                        block = ?log.block_number,
                        tx_hash = ?log.transaction_hash,
                        "Skipping undecodable task log"
                    );
                    decoded.undecodable += 1;
                }
            }
        }

        decoded
    }

    /// Calldata for `nextTaskId(requester)`.
    pub fn encode_next_task_id(&self, requester: Address) -> ChainResult<Bytes> {
        let calldata = self
            .abi
            .function("nextTaskId")
            .and_then(|function| function.encode_input(&[Token::Address(requester)]))
            .map_err(|e| ChainError::Decode(format!("nextTaskId encoding: {}", e)))?;
        Ok(Bytes::from(calldata))
    }

    /// Decode the return value of `nextTaskId`.
    pub fn decode_next_task_id(&self, output: &[u8]) -> ChainResult<u64> {
        let tokens = self
            .abi
            .function("nextTaskId")
            .and_then(|function| function.decode_output(output))
            .map_err(|e| ChainError::Decode(format!("nextTaskId output: {}", e)))?;
        match tokens.into_iter().next() {
            Some(Token::Uint(value)) => task_id_from_u256(value),
            other => Err(ChainError::Decode(format!(
                "nextTaskId returned {:?}",
                other
            ))),
        }
    }

    /// Calldata for `requestCompute(inputData, lifecycle)`.
    pub fn encode_request_compute(
        &self,
        input_data: InputData,
        lifecycle_secs: u64,
    ) -> ChainResult<Bytes> {
        let calldata = self
            .abi
            .function("requestCompute")
            .and_then(|function| {
                function.encode_input(&[
                    Token::FixedBytes(input_data.to_vec()),
                    Token::Uint(U256::from(lifecycle_secs)),
                ])
            })
            .map_err(|e| ChainError::Decode(format!("requestCompute encoding: {}", e)))?;
        Ok(Bytes::from(calldata))
    }

    /// Calldata for `submitResult(taskId, result)`.
    pub fn encode_submit_result(&self, task_id: u64, result: ResultHash) -> ChainResult<Bytes> {
        let calldata = self
            .abi
            .function("submitResult")
            .and_then(|function| {
                function.encode_input(&[
                    Token::Uint(U256::from(task_id)),
                    Token::FixedBytes(result.to_vec()),
                ])
            })
            .map_err(|e| ChainError::Decode(format!("submitResult encoding: {}", e)))?;
        Ok(Bytes::from(calldata))
    }
}

fn task_id_from_u256(value: U256) -> ChainResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::Decode(format!(
            "task id {} does not fit in 64 bits",
            value
        )));
    }
    Ok(value.as_u64())
}

fn bytes32(bytes: &[u8], field: &str) -> ChainResult<InputData> {
    <[u8; 32]>::try_from(bytes)
        .map_err(|_| ChainError::Decode(format!("{} is {} bytes, expected 32", field, bytes.len())))
}
