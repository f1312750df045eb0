#![allow(dead_code)]

use nexa_updates::{HostTransaction, NodeId, Reconciler, Result, UpdateScheduler};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub type Log = Rc<RefCell<Vec<String>>>;
pub type Updates = UpdateScheduler<Recorder>;
type Hook = Rc<dyn Fn(&Updates) -> Result<()>>;

/// Reconciler double: logs every real update and runs per-node hooks while
/// the node "renders".
#[derive(Default)]
pub struct Recorder {
    log: Log,
    names: RefCell<HashMap<NodeId, &'static str>>,
    hooks: RefCell<HashMap<NodeId, Hook>>,
    skipped: Cell<usize>,
}

impl Recorder {
    pub fn log(&self) -> Log {
        self.log.clone()
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn skipped(&self) -> usize {
        self.skipped.get()
    }

    pub fn on_update(&self, node: NodeId, hook: impl Fn(&Updates) -> Result<()> + 'static) {
        self.hooks.borrow_mut().insert(node, Rc::new(hook));
    }

    pub fn clear_hook(&self, node: NodeId) {
        self.hooks.borrow_mut().remove(&node);
    }

    fn name(&self, node: NodeId) -> &'static str {
        self.names.borrow().get(&node).copied().unwrap_or("?")
    }
}

impl Reconciler for Recorder {
    type Public = &'static str;
    type Host = CountingHost;

    fn perform_update_if_necessary(
        &self,
        updates: &Updates,
        node: NodeId,
        host: &mut CountingHost,
        batch_number: u64,
    ) -> Result<()> {
        if !updates.claim_update(node, batch_number) {
            self.skipped.set(self.skipped.get() + 1);
            return Ok(());
        }

        host.updates += 1;
        self.log.borrow_mut().push(format!("update {}", self.name(node)));

        let hook = self.hooks.borrow().get(&node).cloned();
        match hook {
            Some(hook) => hook(updates),
            None => Ok(()),
        }
    }

    fn public_instance(&self, node: NodeId) -> &'static str {
        self.name(node)
    }

    fn label(&self, node: NodeId) -> Option<String> {
        Some(self.name(node).to_string())
    }
}

#[derive(Default)]
pub struct CountingHost {
    pub performs: usize,
    pub updates: usize,
}

impl HostTransaction for CountingHost {
    fn perform<F>(&mut self, procedure: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.performs += 1;
        procedure(self)
    }

    fn reinitialize(&mut self) {
        self.performs = 0;
        self.updates = 0;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn scheduler() -> Updates {
    init_tracing();
    UpdateScheduler::with_defaults(Recorder::default())
}

pub fn mount(updates: &Updates, name: &'static str) -> NodeId {
    let node = updates.mount_node();
    updates.reconciler().names.borrow_mut().insert(node, name);
    node
}

/// Callback that logs `cb <tag>` together with the receiver it got.
pub fn logging_callback(
    log: &Log,
    tag: &'static str,
) -> impl FnOnce(&'static str) -> Result<()> + use<> {
    let log = log.clone();
    move |receiver| {
        log.borrow_mut().push(format!("cb {tag} ({receiver})"));
        Ok(())
    }
}
