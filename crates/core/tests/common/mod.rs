#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::JsonAbi,
    primitives::{Address, Bytes, TxHash, U256, keccak256},
    rpc::types::TransactionRequest,
    transports::TransportErrorKind,
};
use dapp_core::{
    ContentId, ContentStore, ContractArtifact, Ledger, LedgerError, StateStore,
    config::SessionArgs,
    content::StoreError,
    ledger::LedgerResult,
};

pub const CHAIN_ID: u64 = 5777;

pub fn fixture(name: &str) -> ContractArtifact {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(format!("{name}.json"));
    let json = std::fs::read_to_string(&path).unwrap();
    ContractArtifact::from_json(&json).unwrap()
}

pub fn account() -> Address {
    Address::repeat_byte(0xaa)
}

/// Session timings small enough for tests.
pub fn fast_session() -> SessionArgs {
    SessionArgs {
        authorization_timeout_secs: 1,
        confirmation_timeout_secs: 2,
        receipt_poll_interval_ms: 5,
        sync_max_retries: 3,
        sync_min_backoff_ms: 1,
        sync_max_backoff_ms: 5,
        inflight_ttl_secs: 60,
    }
}

pub fn transient() -> LedgerError {
    LedgerError::Rpc(TransportErrorKind::custom_str("connection reset"))
}

type ReadHandler = Box<dyn Fn(&[DynSolValue]) -> LedgerResult<Vec<DynSolValue>> + Send + Sync>;
type SendHook = Box<dyn Fn(&[DynSolValue], U256) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Grant,
    Reject,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBehavior {
    Accept,
    UserReject,
    NodeReject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptBehavior {
    Success,
    Reverted,
    Never,
}

/// A transaction as the wallet saw it.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub from: Option<Address>,
    pub to: Address,
    pub method: String,
    pub args: Vec<DynSolValue>,
    pub value: U256,
    pub hash: TxHash,
    /// Loading flag in the store when the wallet received the transaction.
    pub loading_at_send: Option<bool>,
    /// Loading flag in the store when the receipt was first polled.
    pub loading_at_receipt: Option<bool>,
}

struct State {
    accounts: Vec<Address>,
    authorization: Authorization,
    chain_id: u64,
    balance: U256,
    balance_fails: bool,
    read_delay: Option<Duration>,
    abis: HashMap<Address, JsonAbi>,
    reads: HashMap<(Address, String), ReadHandler>,
    send_hooks: HashMap<String, SendHook>,
    send_behavior: HashMap<String, SendBehavior>,
    receipt_behavior: ReceiptBehavior,
    sent: Vec<SentTx>,
    store: Option<StateStore>,
}

/// In-memory [`Ledger`] that decodes calls against real contract ABIs.
#[derive(Clone)]
pub struct MockLedger {
    state: Arc<Mutex<State>>,
    pub calls: Arc<AtomicUsize>,
}

impl MockLedger {
    pub fn new(chain_id: u64) -> Self {
        dapp_common::tracing::init();
        Self {
            state: Arc::new(Mutex::new(State {
                accounts: vec![account()],
                authorization: Authorization::Grant,
                chain_id,
                balance: U256::ZERO,
                balance_fails: false,
                read_delay: None,
                abis: HashMap::new(),
                reads: HashMap::new(),
                send_hooks: HashMap::new(),
                send_behavior: HashMap::new(),
                receipt_behavior: ReceiptBehavior::Success,
                sent: Vec::new(),
                store: None,
            })),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registers every contract in `artifact` deployed on this mock's chain.
    pub fn deploy(&self, artifact: &ContractArtifact) -> Address {
        let mut state = self.state.lock().unwrap();
        let address = artifact.deployment(state.chain_id).unwrap().address;
        state.abis.insert(address, artifact.abi.clone());
        address
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().unwrap().accounts = accounts;
    }

    pub fn set_authorization(&self, authorization: Authorization) {
        self.state.lock().unwrap().authorization = authorization;
    }

    pub fn set_balance(&self, balance: U256) {
        self.state.lock().unwrap().balance = balance;
    }

    pub fn fail_balance(&self) {
        self.state.lock().unwrap().balance_fails = true;
    }

    /// Holds the result of the next contract read for `delay`. The result is
    /// computed before the wait, so it reflects the state at call time.
    pub fn delay_next_read(&self, delay: Duration) {
        self.state.lock().unwrap().read_delay = Some(delay);
    }

    pub fn on_read(
        &self,
        contract: Address,
        method: &str,
        handler: impl Fn(&[DynSolValue]) -> LedgerResult<Vec<DynSolValue>> + Send + Sync + 'static,
    ) {
        self.state
            .lock()
            .unwrap()
            .reads
            .insert((contract, method.to_string()), Box::new(handler));
    }

    pub fn on_send(&self, method: &str, hook: impl Fn(&[DynSolValue], U256) + Send + Sync + 'static) {
        self.state
            .lock()
            .unwrap()
            .send_hooks
            .insert(method.to_string(), Box::new(hook));
    }

    pub fn set_send_behavior(&self, method: &str, behavior: SendBehavior) {
        self.state
            .lock()
            .unwrap()
            .send_behavior
            .insert(method.to_string(), behavior);
    }

    pub fn set_receipt_behavior(&self, behavior: ReceiptBehavior) {
        self.state.lock().unwrap().receipt_behavior = behavior;
    }

    /// Lets sends and receipt polls record the store's loading flag.
    pub fn observe(&self, store: &StateStore) {
        self.state.lock().unwrap().store = Some(store.clone());
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    fn read(&self, to: Address, input: &[u8]) -> (LedgerResult<Bytes>, Option<Duration>) {
        let mut state = self.state.lock().unwrap();
        let delay = state.read_delay.take();
        let (method, args) = Self::decode(&state, to, input);
        let handler = state
            .reads
            .get(&(to, method.clone()))
            .unwrap_or_else(|| panic!("no read handler for {method}"));
        let result = handler(&args).map(|values| {
            let function = &state.abis[&to].function(&method).unwrap()[0];
            function.abi_encode_output(&values).unwrap().into()
        });
        (result, delay)
    }

    fn decode(state: &State, to: Address, input: &[u8]) -> (String, Vec<DynSolValue>) {
        let abi = state.abis.get(&to).expect("call to unknown contract");
        let function = abi
            .functions()
            .find(|f| f.selector().as_slice() == &input[..4])
            .expect("unknown selector");
        let args = function.abi_decode_input(&input[4..]).unwrap();
        (function.name.clone(), args)
    }
}

impl Ledger for MockLedger {
    async fn request_accounts(&self) -> LedgerResult<Vec<Address>> {
        let authorization = self.state.lock().unwrap().authorization;
        match authorization {
            Authorization::Grant => Ok(self.state.lock().unwrap().accounts.clone()),
            Authorization::Reject => Err(LedgerError::UserRejected(
                "User rejected the request.".to_string(),
            )),
            Authorization::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn accounts(&self) -> LedgerResult<Vec<Address>> {
        Ok(self.state.lock().unwrap().accounts.clone())
    }

    async fn chain_id(&self) -> LedgerResult<u64> {
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn balance(&self, _account: Address) -> LedgerResult<U256> {
        let state = self.state.lock().unwrap();
        if state.balance_fails {
            return Err(LedgerError::NodeRejected("header not found".to_string()));
        }
        Ok(state.balance)
    }

    async fn call(&self, to: Address, input: Bytes) -> LedgerResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (result, delay) = self.read(to, &input);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> LedgerResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        let to = tx.to.and_then(|kind| kind.to().copied()).unwrap();
        let input = tx.input.input().cloned().unwrap_or_default();
        let (method, args) = Self::decode(&state, to, &input);

        match state.send_behavior.get(&method).copied().unwrap_or(SendBehavior::Accept) {
            SendBehavior::Accept => {}
            SendBehavior::UserReject => {
                return Err(LedgerError::UserRejected(
                    "User denied transaction signature.".to_string(),
                ));
            }
            SendBehavior::NodeReject => {
                return Err(LedgerError::NodeRejected("execution reverted".to_string()));
            }
        }

        let value = tx.value.unwrap_or_default();
        if let Some(hook) = state.send_hooks.get(&method) {
            hook(&args, value);
        }

        let hash = keccak256((state.sent.len() as u64).to_be_bytes());
        let loading_at_send = state.store.as_ref().map(|s| s.snapshot().loading);
        state.sent.push(SentTx {
            from: tx.from,
            to,
            method,
            args,
            value,
            hash,
            loading_at_send,
            loading_at_receipt: None,
        });
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> LedgerResult<Option<bool>> {
        let mut state = self.state.lock().unwrap();
        let loading = state.store.as_ref().map(|s| s.snapshot().loading);
        if let Some(tx) = state.sent.iter_mut().find(|tx| tx.hash == hash) {
            tx.loading_at_receipt.get_or_insert(loading.unwrap_or_default());
        }
        Ok(match state.receipt_behavior {
            ReceiptBehavior::Success => Some(true),
            ReceiptBehavior::Reverted => Some(false),
            ReceiptBehavior::Never => None,
        })
    }
}

/// One row of an image or video registry.
#[derive(Debug, Clone)]
pub struct Row {
    pub hash: String,
    pub metadata: String,
    pub tip: U256,
    pub author: Address,
}

impl Row {
    pub fn new(hash: &str, tip: u64) -> Self {
        Self {
            hash: hash.to_string(),
            metadata: format!("about {hash}"),
            tip: U256::from(tip),
            author: Address::repeat_byte(0x0b),
        }
    }
}

pub type Rows = Arc<Mutex<Vec<Row>>>;

fn row_id(args: &[DynSolValue]) -> usize {
    args[0].as_uint().unwrap().0.to::<usize>()
}

/// Serves `imageCount`/`images` from `rows` and appends a row on `uploadImage`.
pub fn serve_images(ledger: &MockLedger, contract: Address, rows: Rows) {
    let count_rows = rows.clone();
    ledger.on_read(contract, "imageCount", move |_| {
        let n = count_rows.lock().unwrap().len();
        Ok(vec![DynSolValue::Uint(U256::from(n), 256)])
    });

    let item_rows = rows.clone();
    ledger.on_read(contract, "images", move |args| {
        let id = row_id(args);
        let rows = item_rows.lock().unwrap();
        let row = &rows[id - 1];
        Ok(vec![
            DynSolValue::Uint(U256::from(id), 256),
            DynSolValue::String(row.hash.clone()),
            DynSolValue::String(row.metadata.clone()),
            DynSolValue::Uint(row.tip, 256),
            DynSolValue::Address(row.author),
        ])
    });

    let upload_rows = rows;
    ledger.on_send("uploadImage", move |args, _| {
        upload_rows.lock().unwrap().push(Row {
            hash: args[0].as_str().unwrap().to_string(),
            metadata: args[1].as_str().unwrap().to_string(),
            tip: U256::ZERO,
            author: account(),
        });
    });
}

/// Serves `videoCount`/`videos` from `rows` and appends a row on `uploadVideo`.
pub fn serve_videos(ledger: &MockLedger, contract: Address, rows: Rows) {
    let count_rows = rows.clone();
    ledger.on_read(contract, "videoCount", move |_| {
        let n = count_rows.lock().unwrap().len();
        Ok(vec![DynSolValue::Uint(U256::from(n), 256)])
    });

    let item_rows = rows.clone();
    ledger.on_read(contract, "videos", move |args| {
        let id = row_id(args);
        let rows = item_rows.lock().unwrap();
        let row = &rows[id - 1];
        Ok(vec![
            DynSolValue::Uint(U256::from(id), 256),
            DynSolValue::String(row.hash.clone()),
            DynSolValue::String(row.metadata.clone()),
            DynSolValue::Address(row.author),
        ])
    });

    ledger.on_send("uploadVideo", move |args, _| {
        rows.lock().unwrap().push(Row {
            hash: args[0].as_str().unwrap().to_string(),
            metadata: args[1].as_str().unwrap().to_string(),
            tip: U256::ZERO,
            author: account(),
        });
    });
}

/// In-memory [`ContentStore`] that hands out fixed identifiers.
#[derive(Clone)]
pub struct MockContentStore {
    pub next_id: Arc<Mutex<Result<String, String>>>,
    pub added: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Store loading flag during each `add`.
    pub loading_during_add: Arc<Mutex<Vec<bool>>>,
    store: Option<StateStore>,
    delay: Duration,
}

impl MockContentStore {
    pub fn returning(id: &str) -> Self {
        Self {
            next_id: Arc::new(Mutex::new(Ok(id.to_string()))),
            added: Arc::default(),
            loading_during_add: Arc::default(),
            store: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(message: &str) -> Self {
        let store = Self::returning("unused");
        *store.next_id.lock().unwrap() = Err(message.to_string());
        store
    }

    pub fn observing(mut self, store: &StateStore) -> Self {
        self.store = Some(store.clone());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ContentStore for MockContentStore {
    async fn add(&self, bytes: Vec<u8>) -> Result<ContentId, StoreError> {
        if let Some(store) = &self.store {
            self.loading_during_add
                .lock()
                .unwrap()
                .push(store.snapshot().loading);
        }
        tokio::time::sleep(self.delay).await;
        self.added.lock().unwrap().push(bytes);

        let next = self.next_id.lock().unwrap().clone();
        match next {
            Ok(id) => ContentId::new(id),
            Err(message) => Err(StoreError::Server {
                status: 500,
                message,
            }),
        }
    }
}
