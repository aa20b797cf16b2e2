use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use charm_store::MemBackend;
use charm_value::Value;
use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigChanged {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub ratio: f64,
}

/// Shared log of handler runs as `handler:kind:sequence:fresh|redelivered`.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<String>>>);

impl Recorder {
    pub fn record<P>(&self, handler: &str, event: &Event<'_, P>) {
        let delivery = if event.is_redelivery() {
            "redelivered"
        } else {
            "fresh"
        };
        self.0.borrow_mut().push(format!(
            "{handler}:{}:{}:{delivery}",
            event.kind(),
            event.sequence_id()
        ));
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// One invocation of a `Charm` object that declares `start` and `config-changed`.
pub struct Unit {
    pub dispatcher: Dispatcher,
    pub charm: Handle,
    log: Recorder,
}

impl Unit {
    pub fn new(backend: &MemBackend, log: &Recorder) -> Self {
        let store = backend.open().expect("store is free");
        let mut dispatcher = Dispatcher::with_store(Box::new(store)).expect("load notices");
        let charm = Handle::root("Charm").unwrap();
        dispatcher.register_object(&charm).unwrap();
        dispatcher.define_event::<()>(&charm, "start").unwrap();
        dispatcher
            .define_event::<ConfigChanged>(&charm, "config-changed")
            .unwrap();
        Self {
            dispatcher,
            charm,
            log: log.clone(),
        }
    }

    pub fn observe_start(&mut self, handler: &str, outcome: Outcome) {
        let log = self.log.clone();
        let name = handler.to_string();
        self.dispatcher
            .observe(
                &self.charm,
                "start",
                &self.charm,
                handler,
                move |_: &mut Dispatcher, event: &Event<'_, ()>| {
                    log.record(&name, event);
                    Ok(outcome)
                },
            )
            .unwrap();
    }

    pub fn observe_config(&mut self, handler: &str) {
        let log = self.log.clone();
        let name = handler.to_string();
        self.dispatcher
            .observe(
                &self.charm,
                "config-changed",
                &self.charm,
                handler,
                move |_: &mut Dispatcher, event: &Event<'_, ConfigChanged>| {
                    log.record(&name, event);
                    Ok(Outcome::Handled)
                },
            )
            .unwrap();
    }

    pub fn dispatch_start(self) -> Result<DispatchReport, Aborted> {
        let trigger = Trigger::new(self.charm.clone(), "start", Value::Null);
        self.dispatch(trigger)
    }

    pub fn dispatch_config(self) -> Result<DispatchReport, Aborted> {
        let trigger =
            Trigger::from_payload(self.charm.clone(), "config-changed", &ConfigChanged::default())
                .unwrap();
        self.dispatch(trigger)
    }

    pub fn dispatch(self, trigger: Trigger) -> Result<DispatchReport, Aborted> {
        self.dispatcher.dispatch(trigger)
    }
}
