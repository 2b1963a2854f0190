//! Boundary between the orchestrator and the network.

mod rpc;
mod scripted;

pub use rpc::JsonRpcClient;
pub use scripted::{Fault, ScriptedClient, Submission};

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes};

use crate::{error::ClientError, params::GasParams};

/// Mined transaction as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Set for contract-creation transactions.
    pub contract_address: Option<Address>,
    /// `false` when the transaction reverted.
    pub status: bool,
}

/// Submits transactions and waits for them to be mined.
///
/// Implementations never retry a submission: a transaction handed to the node
/// may already be in flight, and resubmitting risks a duplicate deployment.
pub trait NetworkClient: Send + Sync {
    /// The network id reported by the node.
    fn network_id(&self) -> impl Future<Output = Result<u64, ClientError>> + Send;

    /// Submit a contract-creation transaction carrying `data`
    /// (creation bytecode plus encoded constructor arguments).
    fn deploy_contract(
        &self,
        data: Bytes,
        gas: GasParams,
    ) -> impl Future<Output = Result<B256, ClientError>> + Send;

    /// Submit a call of already-encoded `data` to `to`.
    fn call_method(
        &self,
        to: Address,
        data: Bytes,
        gas: GasParams,
    ) -> impl Future<Output = Result<B256, ClientError>> + Send;

    /// Wait until `tx_hash` is mined and buried under `confirmations` blocks.
    ///
    /// Has no timeout of its own; callers bound it.
    fn await_confirmation(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> impl Future<Output = Result<Receipt, ClientError>> + Send;
}
