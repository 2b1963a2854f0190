//! In-process [`NetworkClient`] with deterministic addresses and injectable faults.
//!
//! Backs dry runs and tests: nothing leaves the process, every submission is
//! mined immediately unless a fault was scheduled for it.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use alloy_core::primitives::{Address, B256, Bytes, keccak256};

use super::{NetworkClient, Receipt};
use crate::{error::ClientError, params::GasParams};

/// What goes wrong with a scheduled submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The node refuses the transaction at submission.
    Reject(String),
    /// The transaction is mined with a failed status.
    Revert,
    /// The transaction is never mined.
    Stall,
}

/// A transaction accepted by the scripted client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub data: Bytes,
    pub gas: GasParams,
    pub tx_hash: B256,
}

#[derive(Debug, Default)]
struct State {
    /// Submission attempts so far, including rejected ones.
    attempts: usize,
    submissions: Vec<Submission>,
    faults: BTreeMap<usize, Fault>,
    pending: BTreeMap<B256, PendingTx>,
    block_number: u64,
}

#[derive(Debug, Clone)]
struct PendingTx {
    contract_address: Option<Address>,
    fault: Option<Fault>,
}

#[derive(Debug)]
pub struct ScriptedClient {
    network_id: u64,
    state: Mutex<State>,
}

impl ScriptedClient {
    pub fn new(network_id: u64) -> Self {
        Self {
            network_id,
            state: Mutex::new(State::default()),
        }
    }

    /// Make the submission attempt at `index` (zero-based) fail with `fault`.
    pub fn fail_submission(self, index: usize, fault: Fault) -> Self {
        self.state().faults.insert(index, fault);
        self
    }

    /// Every accepted transaction, in submission order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn submit(
        &self,
        to: Option<Address>,
        data: Bytes,
        gas: GasParams,
    ) -> Result<B256, ClientError> {
        let mut state = self.state();
        let index = state.attempts;
        state.attempts += 1;

        let fault = state.faults.remove(&index);
        if let Some(Fault::Reject(message)) = fault {
            tracing::debug!(index, %message, "Scripted submission rejected");
            return Err(ClientError::Rpc(message));
        }

        let nonce = state.submissions.len() as u64;
        let mut preimage = Vec::with_capacity(16 + data.len());
        preimage.extend_from_slice(&self.network_id.to_be_bytes());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&data);
        let tx_hash = keccak256(&preimage);
        let contract_address = to.is_none().then(|| derive_address(self.network_id, nonce));

        state.pending.insert(
            tx_hash,
            PendingTx {
                contract_address,
                fault,
            },
        );
        state.submissions.push(Submission {
            to,
            data,
            gas,
            tx_hash,
        });
        Ok(tx_hash)
    }
}

/// Address of the contract created by the `nonce`-th submission.
fn derive_address(network_id: u64, nonce: u64) -> Address {
    let hash = keccak256([network_id.to_be_bytes(), nonce.to_be_bytes()].concat());
    Address::from_slice(&hash[12..])
}

impl NetworkClient for ScriptedClient {
    async fn network_id(&self) -> Result<u64, ClientError> {
        Ok(self.network_id)
    }

    async fn deploy_contract(&self, data: Bytes, gas: GasParams) -> Result<B256, ClientError> {
        self.submit(None, data, gas)
    }

    async fn call_method(
        &self,
        to: Address,
        data: Bytes,
        gas: GasParams,
    ) -> Result<B256, ClientError> {
        self.submit(Some(to), data, gas)
    }

    async fn await_confirmation(
        &self,
        tx_hash: B256,
        _confirmations: u64,
    ) -> Result<Receipt, ClientError> {
        let receipt = {
            let mut state = self.state();
            let pending = state
                .pending
                .get(&tx_hash)
                .cloned()
                .ok_or_else(|| ClientError::Response(format!("unknown transaction {tx_hash}")))?;

            if pending.fault == Some(Fault::Stall) {
                None
            } else {
                state.block_number += 1;
                Some(Receipt {
                    tx_hash,
                    block_number: state.block_number,
                    contract_address: pending.contract_address,
                    status: pending.fault != Some(Fault::Revert),
                })
            }
        };

        match receipt {
            Some(receipt) => Ok(receipt),
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAS: GasParams = GasParams {
        gas: 100_000,
        gas_price: 1,
    };

    #[tokio::test]
    async fn test_deploy_is_deterministic() {
        let first = ScriptedClient::new(3);
        let second = ScriptedClient::new(3);

        let mut addresses = Vec::new();
        for client in [&first, &second] {
            let tx = client
                .deploy_contract(Bytes::from_static(&[0x60, 0x80]), GAS)
                .await
                .expect("Failed to deploy");
            let receipt = client
                .await_confirmation(tx, 1)
                .await
                .expect("Failed to confirm");
            assert!(receipt.status);
            addresses.push(receipt.contract_address);
        }

        assert_eq!(addresses[0], addresses[1]);
        assert!(addresses[0].is_some());
        assert_ne!(addresses[0], Some(derive_address(5, 0)));
    }

    #[tokio::test]
    async fn test_reject_and_revert_faults() {
        let client = ScriptedClient::new(3)
            .fail_submission(0, Fault::Reject("insufficient funds".into()))
            .fail_submission(1, Fault::Revert);

        let rejected = client.deploy_contract(Bytes::new(), GAS).await;
        assert!(matches!(rejected, Err(ClientError::Rpc(msg)) if msg == "insufficient funds"));
        assert!(client.submissions().is_empty());

        let tx = client
            .call_method(Address::repeat_byte(1), Bytes::new(), GAS)
            .await
            .expect("Failed to submit");
        let receipt = client
            .await_confirmation(tx, 1)
            .await
            .expect("Failed to confirm");
        assert!(!receipt.status);
        assert_eq!(receipt.contract_address, None);
        assert_eq!(client.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_stall_never_confirms() {
        let client = ScriptedClient::new(3).fail_submission(0, Fault::Stall);
        let tx = client
            .deploy_contract(Bytes::new(), GAS)
            .await
            .expect("Failed to submit");

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            client.await_confirmation(tx, 1),
        )
        .await;
        assert!(result.is_err());
    }
}
