//! The bridge context: owns every per-instance registry.
//!
//! Nothing here is process-wide; two bridges over two hosts are independent.
//! `BridgeContext` is the half the host's notification callback can reach
//! (shared region, correlation table, handlers). `Bridge` adds the host itself
//! and the ops map.

use std::cell::{OnceCell, RefCell};
use std::rc::{Rc, Weak};

use tracing::info;

use crate::completion_router::CompletionRouter;
use crate::constants::OpId;
use crate::correlation::PendingCalls;
use crate::error::Result;
use crate::host::{Host, SharedRegion};
use crate::op_registry::OpsMap;
use crate::protocol::{Codec, Utf8Codec};

pub struct BridgeContext {
    pub(crate) codec: Box<dyn Codec>,
    pub(crate) shared: OnceCell<SharedRegion>,
    pub(crate) pending: RefCell<PendingCalls>,
    pub(crate) router: RefCell<CompletionRouter>,
}

impl BridgeContext {
    fn new(codec: Box<dyn Codec>) -> Self {
        Self {
            codec,
            shared: OnceCell::new(),
            pending: RefCell::new(PendingCalls::new()),
            router: RefCell::new(CompletionRouter::default()),
        }
    }

    pub fn codec(&self) -> &dyn Codec {
        &*self.codec
    }

    /// Outstanding asynchronous calls.
    pub fn outstanding_calls(&self) -> usize {
        self.pending.borrow().len()
    }
}

pub struct Bridge {
    pub(crate) context: Rc<BridgeContext>,
    pub(crate) host: RefCell<Box<dyn Host>>,
    pub(crate) ops: OnceCell<OpsMap>,
}

impl Bridge {
    pub fn new(host: impl Host + 'static) -> Self {
        Self::with_codec(host, Utf8Codec)
    }

    pub fn with_codec(host: impl Host + 'static, codec: impl Codec + 'static) -> Self {
        Self {
            context: Rc::new(BridgeContext::new(Box::new(codec))),
            host: RefCell::new(Box::new(host)),
            ops: OnceCell::new(),
        }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.context
    }

    pub fn outstanding_calls(&self) -> usize {
        self.context.outstanding_calls()
    }

    pub fn is_initialized(&self) -> bool {
        self.context.shared.get().is_some()
    }

    /// The shared region, initializing on first use.
    pub fn shared_region(&self) -> SharedRegion {
        Rc::clone(self.maybe_init())
    }

    pub(crate) fn maybe_init(&self) -> &SharedRegion {
        match self.context.shared.get() {
            Some(region) => region,
            None => self.init(),
        }
    }

    fn init(&self) -> &SharedRegion {
        assert!(
            self.context.shared.get().is_none(),
            "shared region initialized twice"
        );
        let mut host = self.host.borrow_mut();
        let region = host.shared_region();
        let byte_len = region.borrow().byte_len();

        let context: Weak<BridgeContext> = Rc::downgrade(&self.context);
        host.register_notification_callback(Box::new(
            move |op_id: OpId, payload: Option<&[u8]>| -> Result<()> {
                match context.upgrade() {
                    Some(context) => context.on_host_notification(op_id, payload),
                    // Bridge dropped; nobody is waiting.
                    None => Ok(()),
                }
            },
        ));
        info!(byte_len, "bridge initialized");
        self.context.shared.get_or_init(|| region)
    }

    /// Let the host deliver whatever completions it has ready.
    pub fn poll_host(&self) -> Result<usize> {
        self.maybe_init();
        self.host.borrow_mut().poll()
    }
}
