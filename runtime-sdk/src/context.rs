//! Execution context.
use std::{any::Any, collections::BTreeMap};

use slog::{o, Discard, Logger};

use crate::{
    config::LocalConfig,
    event::{Event, EventTag},
    storage::{self, Store},
    types::address::Address,
};

/// Transaction execution mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    ExecuteTx,
    CheckTx,
    SimulateTx,
}

/// Header of the block being built or executed.
#[derive(Clone, Debug, Default)]
pub struct BlockHeader {
    pub height: u64,
    /// EIP-155 chain identifier.
    pub chain_id: u64,
    /// Maximum gas that can be used by all transactions in the block. Zero means unlimited.
    pub max_gas: u64,
    pub timestamp: u64,
    pub proposer: Address,
}

/// Dispatch context for the whole block.
pub struct DispatchContext<'a> {
    pub(crate) mode: Mode,
    pub(crate) recheck: bool,

    pub(crate) header: BlockHeader,
    pub(crate) runtime_storage: &'a mut dyn Store,
    pub(crate) local_config: LocalConfig,
    pub(crate) logger: Logger,

    /// Gas used by transactions committed so far in this block.
    pub(crate) block_gas_used: u64,

    /// Per-context values.
    pub(crate) values: BTreeMap<&'static str, Box<dyn Any>>,
}

impl<'a> DispatchContext<'a> {
    /// Create a new dispatch context over the given state.
    pub fn new(mode: Mode, header: BlockHeader, runtime_storage: &'a mut dyn Store) -> Self {
        Self {
            mode,
            recheck: false,
            header,
            runtime_storage,
            local_config: LocalConfig::default(),
            logger: Logger::root(Discard, o!()),
            block_gas_used: 0,
            values: BTreeMap::new(),
        }
    }

    /// Marks the context as re-checking transactions that were already checked once.
    pub fn with_recheck(mut self, recheck: bool) -> Self {
        self.recheck = recheck;
        self
    }

    /// Sets the node-local configuration.
    pub fn with_local_config(mut self, local_config: LocalConfig) -> Self {
        self.local_config = local_config;
        self
    }

    /// Sets the root logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current block header.
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Node-local configuration.
    pub fn local_config(&self) -> &LocalConfig {
        &self.local_config
    }

    /// Returns a logger for the given module.
    pub fn get_logger(&self, module: &'static str) -> Logger {
        self.logger.new(o!("module" => module))
    }

    /// Runtime state store.
    pub fn runtime_state(&mut self) -> &mut dyn Store {
        self.runtime_storage
    }

    /// Gas used by committed transactions in this block.
    pub fn block_gas_used(&self) -> u64 {
        self.block_gas_used
    }

    /// Accounts gas used by a committed transaction against the block.
    pub fn consume_block_gas(&mut self, gas: u64) {
        self.block_gas_used = self.block_gas_used.saturating_add(gas);
    }

    /// Gas remaining in the block.
    pub fn block_gas_remaining(&self) -> u64 {
        block_gas_remaining(&self.header, self.block_gas_used)
    }

    /// Fetches or sets a value associated with the context.
    pub fn value<V>(&mut self, key: &'static str) -> &mut V
    where
        V: Any + Default,
    {
        self.values
            .entry(key)
            .or_insert_with(|| Box::new(V::default()))
            .downcast_mut()
            .expect("type should stay the same")
    }

    /// Takes a value associated with the context.
    ///
    /// The previous value is removed so subsequent fetches will return the default value.
    pub fn take_value<V>(&mut self, key: &'static str) -> Box<V>
    where
        V: Any + Default,
    {
        self.values
            .remove(key)
            .map(|x| x.downcast().expect("type should stay the same"))
            .unwrap_or_default()
    }

    /// Executes a function with the transaction-specific context set.
    ///
    /// All state changes happen in a copy-on-write branch that is discarded unless the
    /// function calls `TxContext::commit`.
    pub fn with_tx<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(TxContext<'_, '_>) -> R,
    {
        let store = storage::OverlayStore::new(&mut self.runtime_storage);

        let tx_ctx = TxContext {
            mode: self.mode,
            recheck: self.recheck,
            header: &self.header,
            local_config: &self.local_config,
            logger: &self.logger,
            block_gas_used: self.block_gas_used,
            store,
            events: Vec::new(),
            values: &mut self.values,
            tx_values: BTreeMap::new(),
        };
        f(tx_ctx)
    }
}

fn block_gas_remaining(header: &BlockHeader, used: u64) -> u64 {
    if header.max_gas == 0 {
        return u64::MAX;
    }
    header.max_gas.saturating_sub(used)
}

/// Per-transaction dispatch context.
pub struct TxContext<'a, 'b> {
    mode: Mode,
    recheck: bool,

    header: &'b BlockHeader,
    local_config: &'b LocalConfig,
    logger: &'b Logger,
    block_gas_used: u64,

    store: storage::OverlayStore<&'b mut &'a mut dyn Store>,

    /// Emitted events.
    events: Vec<EventTag>,

    /// Per-context values.
    values: &'b mut BTreeMap<&'static str, Box<dyn Any>>,

    /// Per-transaction values.
    tx_values: BTreeMap<&'static str, Box<dyn Any>>,
}

impl<'a, 'b> TxContext<'a, 'b> {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the transaction is just being checked for validity.
    pub fn is_check_only(&self) -> bool {
        self.mode == Mode::CheckTx
    }

    /// Whether the transaction is being re-checked after a block was committed.
    pub fn is_recheck(&self) -> bool {
        self.is_check_only() && self.recheck
    }

    /// Whether the transaction is just being simulated.
    pub fn is_simulation(&self) -> bool {
        self.mode == Mode::SimulateTx
    }

    /// Current block header.
    pub fn header(&self) -> &BlockHeader {
        self.header
    }

    /// Node-local configuration.
    pub fn local_config(&self) -> &LocalConfig {
        self.local_config
    }

    /// Returns a logger for the given module.
    pub fn get_logger(&self, module: &'static str) -> Logger {
        self.logger.new(o!("module" => module))
    }

    /// Gas remaining in the block before this transaction.
    pub fn block_gas_remaining(&self) -> u64 {
        block_gas_remaining(self.header, self.block_gas_used)
    }

    /// Runtime state store.
    pub fn runtime_state(&mut self) -> &mut storage::OverlayStore<&'b mut &'a mut dyn Store> {
        &mut self.store
    }

    /// Emits an event.
    pub fn emit_event<E: Event>(&mut self, event: E) {
        self.events.push(event.into_event_tag());
    }

    /// Events emitted so far.
    pub fn events(&self) -> &[EventTag] {
        &self.events
    }

    /// Commit any changes made to storage and return the emitted events. It consumes the
    /// transaction context.
    pub fn commit(self) -> Vec<EventTag> {
        self.store.commit();
        self.events
    }

    /// Fetches or sets a value associated with the context.
    pub fn value<V>(&mut self, key: &'static str) -> &mut V
    where
        V: Any + Default,
    {
        self.values
            .entry(key)
            .or_insert_with(|| Box::new(V::default()))
            .downcast_mut()
            .expect("type should stay the same")
    }

    /// Takes a value associated with the context.
    ///
    /// The previous value is removed so subsequent fetches will return the default value.
    pub fn take_value<V>(&mut self, key: &'static str) -> Box<V>
    where
        V: Any + Default,
    {
        self.values
            .remove(key)
            .map(|x| x.downcast().expect("type should stay the same"))
            .unwrap_or_default()
    }

    /// Fetches or sets a value associated with the transaction.
    pub fn tx_value<V>(&mut self, key: &'static str) -> &mut V
    where
        V: Any + Default,
    {
        self.tx_values
            .entry(key)
            .or_insert_with(|| Box::new(V::default()))
            .downcast_mut()
            .expect("type should stay the same")
    }

    /// Takes a value associated with the transaction.
    ///
    /// The previous value is removed so subsequent fetches will return the default value.
    pub fn take_tx_value<V>(&mut self, key: &'static str) -> Box<V>
    where
        V: Any + Default,
    {
        self.tx_values
            .remove(key)
            .map(|x| x.downcast().expect("type should stay the same"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{modules::core::Event as CoreEvent, testing::mock::Mock};

    #[test]
    fn test_value() {
        let mut mock = Mock::default();
        let mut ctx = mock.create_ctx();

        let x: &mut Option<u64> = ctx.value("module.TestKey");
        assert_eq!(x, &None, "default value should be created");
        *x = Some(42);

        let y: &mut Option<u64> = ctx.value("module.TestKey");
        assert_eq!(y, &Some(42));

        let z: Box<Option<u64>> = ctx.take_value("module.TestKey");
        assert_eq!(z, Box::new(Some(42)));

        let y: &mut Option<u64> = ctx.value("module.TestKey");
        assert_eq!(y, &None);
    }

    #[test]
    #[should_panic]
    fn test_value_type_change() {
        let mut mock = Mock::default();
        let mut ctx = mock.create_ctx();

        let x: &mut Option<u64> = ctx.value("module.TestKey");
        assert_eq!(x, &None, "default value should be created");
        *x = Some(42);

        // Changing the type of a key should result in a panic.
        ctx.value::<Option<u32>>("module.TestKey");
    }

    #[test]
    fn test_value_tx_context() {
        let mut mock = Mock::default();
        let mut ctx = mock.create_ctx();

        let x: &mut Option<u64> = ctx.value("module.TestKey");
        assert_eq!(x, &None, "default value should be created");
        *x = Some(42);

        ctx.with_tx(|mut tx_ctx| {
            let y: &mut Option<u64> = tx_ctx.value("module.TestKey");
            assert_eq!(y, &Some(42));

            *y = Some(48);

            let a: &mut Option<u64> = tx_ctx.tx_value("module.TestTxKey");
            assert_eq!(a, &None);

            *a = Some(65);

            let b: &mut Option<u64> = tx_ctx.tx_value("module.TestTxKey");
            assert_eq!(b, &Some(65));
        });

        let x: &mut Option<u64> = ctx.value("module.TestKey");
        assert_eq!(x, &Some(48));

        ctx.with_tx(|mut tx_ctx| {
            let z: Box<Option<u64>> = tx_ctx.take_value("module.TestKey");
            assert_eq!(z, Box::new(Some(48)));

            let a: &mut Option<u64> = tx_ctx.tx_value("module.TestTxKey");
            assert_eq!(a, &None);
        });

        let y: &mut Option<u64> = ctx.value("module.TestKey");
        assert_eq!(y, &None);
    }

    #[test]
    fn test_tx_branch_commit_and_discard() {
        let mut mock = Mock::default();
        let mut ctx = mock.create_ctx();

        ctx.with_tx(|mut tx_ctx| {
            tx_ctx.runtime_state().insert(b"key", b"discarded");
        });
        assert_eq!(ctx.runtime_state().get(b"key"), None);

        let events = ctx.with_tx(|mut tx_ctx| {
            tx_ctx.runtime_state().insert(b"key", b"committed");
            tx_ctx.emit_event(CoreEvent::GasUsed { amount: 7 });
            tx_ctx.commit()
        });
        assert_eq!(ctx.runtime_state().get(b"key"), Some(b"committed".to_vec()));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_modes() {
        let mut mock = Mock::default();
        mock.mode = Mode::CheckTx;
        mock.recheck = true;
        let mut ctx = mock.create_ctx();
        ctx.with_tx(|tx_ctx| {
            assert!(tx_ctx.is_check_only());
            assert!(tx_ctx.is_recheck());
            assert!(!tx_ctx.is_simulation());
        });

        let mut mock = Mock::default();
        mock.mode = Mode::SimulateTx;
        mock.recheck = true;
        let mut ctx = mock.create_ctx();
        ctx.with_tx(|tx_ctx| {
            assert!(tx_ctx.is_simulation());
            assert!(!tx_ctx.is_recheck(), "recheck only applies to check mode");
        });
    }

    #[test]
    fn test_block_gas() {
        let mut mock = Mock::default();
        mock.header.max_gas = 1_000;
        let mut ctx = mock.create_ctx();
        assert_eq!(ctx.block_gas_remaining(), 1_000);
        ctx.consume_block_gas(400);
        assert_eq!(ctx.block_gas_remaining(), 600);
        ctx.with_tx(|tx_ctx| assert_eq!(tx_ctx.block_gas_remaining(), 600));
        ctx.consume_block_gas(1_000);
        assert_eq!(ctx.block_gas_remaining(), 0);

        let mut mock = Mock::default();
        mock.header.max_gas = 0;
        let ctx = mock.create_ctx();
        assert_eq!(ctx.block_gas_remaining(), u64::MAX);
    }
}
