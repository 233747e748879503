//! Mock dispatch context for use in tests.
use crate::{
    config::LocalConfig,
    context::{BlockHeader, DispatchContext, Mode},
    modules::evm::{self, ExecutionOutcome, Log, Message, Spec},
    storage::{MemoryStore, Store},
    types::address::Address,
};

/// Chain identifier of mock blocks.
pub const CHAIN_ID: u64 = evm::DEFAULT_CHAIN_ID;

/// Mock dispatch context factory.
pub struct Mock {
    pub mode: Mode,
    pub recheck: bool,
    pub header: BlockHeader,
    pub local_config: LocalConfig,
    pub storage: MemoryStore,
}

impl Mock {
    /// Create a new mock dispatch context.
    pub fn create_ctx(&mut self) -> DispatchContext<'_> {
        DispatchContext::new(self.mode, self.header.clone(), &mut self.storage)
            .with_recheck(self.recheck)
            .with_local_config(self.local_config.clone())
    }

    /// Create an instance with the given local configuration.
    pub fn with_local_config(local_config: LocalConfig) -> Self {
        Self {
            mode: Mode::ExecuteTx,
            recheck: false,
            header: BlockHeader {
                height: 1,
                chain_id: CHAIN_ID,
                max_gas: 10_000_000,
                timestamp: 1_700_000_000,
                proposer: Address::default(),
            },
            local_config,
            storage: MemoryStore::new(),
        }
    }
}

impl Default for Mock {
    fn default() -> Self {
        Self::with_local_config(LocalConfig::permissive())
    }
}

/// An interpreter stand-in with scripted behavior.
#[derive(Clone, Debug, Default)]
pub struct MockExecutor {
    /// Gas every execution uses.
    pub gas_used: u64,
    /// Refund counter every execution accumulates.
    pub refund: u64,
    pub revert: bool,
    /// Return data, deployed as code on contract creation.
    pub return_data: Vec<u8>,
    /// Raw state entry written by every execution.
    pub write: Option<(Vec<u8>, Vec<u8>)>,
}

impl evm::Executor for MockExecutor {
    fn execute(
        &self,
        state: &mut dyn Store,
        _spec: Spec,
        message: &Message,
        gas_limit: u64,
    ) -> ExecutionOutcome {
        if self.gas_used > gas_limit {
            return ExecutionOutcome {
                gas_used: gas_limit,
                vm_error: Some("out of gas".to_owned()),
                ..Default::default()
            };
        }
        if let Some((key, value)) = &self.write {
            state.insert(key, value);
        }
        ExecutionOutcome {
            gas_used: self.gas_used,
            refund: self.refund,
            reverted: self.revert,
            logs: vec![Log {
                address: message.to.unwrap_or(message.caller),
                topics: vec![[0xaa; 32]],
                data: message.data.clone(),
            }],
            vm_error: None,
            return_data: self.return_data.clone(),
        }
    }
}
