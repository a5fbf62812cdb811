//! Reference-counted, per-symbol subscription registry.
//!
//! UI rows register a listener for a symbol and keep the returned
//! `SubscriptionHandle` for as long as they are mounted. The registry:
//!
//! - issues a network `subscribeToStocks` only when a symbol gains its first listener,
//!   and `unsubscribeFromStocks` only when it loses its last one;
//! - merges every inbound update once into the symbol's shared `Quote`, then calls each
//!   live listener exactly once with the raw update and the merged quote;
//! - drops updates for symbols nobody listens to.
//!
//! The registry is single-threaded (`Rc<RefCell<..>>`): it lives on the session's event
//! loop thread, so every refcount change finishes before the next one starts. No borrow
//! is held while listeners run, so callbacks may subscribe or dispose freely.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use crossbeam_channel::Sender;
use feed_common::{ControlMessage, FeedError, QuoteUpdate, Result, Symbol};
use log::{debug, info, warn};

use crate::model::quote::{Quote, QuoteMergePolicy};

/// Callback invoked with the raw update and the freshly merged quote.
pub type Listener = Box<dyn FnMut(&QuoteUpdate, &Quote)>;

/// Destination of network-level subscribe/unsubscribe frames.
pub trait ControlSink {
    /// Queues a control frame; must not block.
    fn send_control(&self, message: ControlMessage);
}

impl ControlSink for Sender<ControlMessage> {
    fn send_control(&self, message: ControlMessage) {
        if let Err(e) = self.send(message) {
            warn!("Control frame dropped, receiver closed: {:?}", e.into_inner());
        }
    }
}

/// Opaque identity of the component owning a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(String);

impl From<&str> for ListenerId {
    fn from(value: &str) -> Self {
        ListenerId(value.to_string())
    }
}

impl From<String> for ListenerId {
    fn from(value: String) -> Self {
        ListenerId(value)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of routing one inbound update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Merged and handed to this many listeners.
    Delivered(usize),
    /// No live listener for the symbol; silently dropped.
    Orphaned,
    /// Failed validation; dropped.
    Rejected,
    /// Snapshot ignored because a live quote already exists.
    Skipped,
}

struct ListenerSlot {
    id: ListenerId,
    live: Cell<bool>,
    callback: RefCell<Listener>,
}

struct SymbolEntry {
    listeners: Vec<Rc<ListenerSlot>>,
    quote: Option<Quote>,
}

struct RegistryState {
    entries: HashMap<Symbol, SymbolEntry>,
    policy: QuoteMergePolicy,
    sink: Box<dyn ControlSink>,
}

/// Shared handle to the registry; clones refer to the same state.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Rc<RefCell<RegistryState>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry sending control frames to `sink`.
    pub fn new(sink: impl ControlSink + 'static, policy: QuoteMergePolicy) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RegistryState {
                entries: HashMap::new(),
                policy,
                sink: Box::new(sink),
            })),
        }
    }

    /// Registers `listener` for `symbol` under `listener_id`.
    ///
    /// The first listener of a symbol triggers a network subscribe. Subscribing the same
    /// `(symbol, listener_id)` twice without disposing is refused with
    /// `FeedError::DuplicateSubscription` and changes nothing.
    pub fn subscribe(
        &self,
        symbol: Symbol,
        listener_id: impl Into<ListenerId>,
        listener: impl FnMut(&QuoteUpdate, &Quote) + 'static,
    ) -> Result<SubscriptionHandle> {
        let id = listener_id.into();
        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;

        if let Some(entry) = state.entries.get(&symbol) {
            if entry.listeners.iter().any(|slot| slot.id == id) {
                return Err(FeedError::DuplicateSubscription {
                    symbol: symbol.to_string(),
                    listener: id.to_string(),
                });
            }
        }

        let slot = Rc::new(ListenerSlot {
            id,
            live: Cell::new(true),
            callback: RefCell::new(Box::new(listener)),
        });
        let entry = state
            .entries
            .entry(symbol.clone())
            .or_insert_with(|| SymbolEntry {
                listeners: Vec::new(),
                quote: None,
            });
        entry.listeners.push(Rc::clone(&slot));
        debug!(
            "Listener {} subscribed to {} (refcount {})",
            slot.id,
            symbol,
            entry.listeners.len()
        );

        if entry.listeners.len() == 1 {
            info!("Subscribing to {}", symbol);
            state.sink.send_control(ControlMessage::SubscribeToStocks {
                symbol: symbol.clone(),
            });
        }

        Ok(SubscriptionHandle {
            symbol,
            slot,
            registry: Rc::downgrade(&self.inner),
        })
    }

    /// Merges `update` into its symbol's quote and notifies every live listener once.
    pub fn dispatch(&self, update: &QuoteUpdate) -> DispatchOutcome {
        let (quote, slots) = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(&update.symbol) else {
                debug!("No listeners for {}, update dropped", update.symbol);
                return DispatchOutcome::Orphaned;
            };
            if let Err(e) = update.validate() {
                warn!("Dropping update: {}", e);
                return DispatchOutcome::Rejected;
            }
            let merged = state.policy.merge(entry.quote.take(), update);
            entry.quote = Some(merged.clone());
            (merged, entry.listeners.clone())
        };

        let mut delivered = 0;
        for slot in &slots {
            // disposed by an earlier listener of this same dispatch
            if !slot.live.get() {
                continue;
            }
            match slot.callback.try_borrow_mut() {
                Ok(mut callback) => {
                    (&mut **callback)(update, &quote);
                    delivered += 1;
                }
                Err(_) => warn!(
                    "Listener {} for {} is already running, skipping nested delivery",
                    slot.id, update.symbol
                ),
            }
        }
        DispatchOutcome::Delivered(delivered)
    }

    /// Delivers a REST snapshot to a subscribed symbol that has no live quote yet.
    pub fn prime(&self, snapshot: &QuoteUpdate) -> DispatchOutcome {
        {
            let state = self.inner.borrow();
            match state.entries.get(&snapshot.symbol) {
                None => return DispatchOutcome::Orphaned,
                Some(entry) if entry.quote.is_some() => return DispatchOutcome::Skipped,
                Some(_) => {}
            }
        }
        self.dispatch(snapshot)
    }

    /// Latest merged quote of `symbol`, if it has listeners and has received data.
    pub fn quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.inner
            .borrow()
            .entries
            .get(symbol)
            .and_then(|entry| entry.quote.clone())
    }

    /// Number of live listeners of `symbol`.
    pub fn refcount(&self, symbol: &Symbol) -> usize {
        self.inner
            .borrow()
            .entries
            .get(symbol)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    /// Symbols with at least one listener, sorted.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.inner.borrow().entries.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Re-issues a network subscribe for every active symbol.
    pub fn resubscribe_all(&self) {
        let state = self.inner.borrow();
        let mut symbols: Vec<&Symbol> = state.entries.keys().collect();
        symbols.sort();
        info!("Resubscribing {} symbol(s)", symbols.len());
        for symbol in symbols {
            state.sink.send_control(ControlMessage::SubscribeToStocks {
                symbol: symbol.clone(),
            });
        }
    }

    /// Flags every held quote as stale.
    pub fn mark_stale(&self) {
        let mut state = self.inner.borrow_mut();
        for quote in state.entries.values_mut().filter_map(|e| e.quote.as_mut()) {
            quote.stale = true;
        }
    }

    /// Drops every subscription and unsubscribes each active symbol.
    ///
    /// Outstanding handles become inert; disposing them later is a no-op.
    pub fn teardown(&self) {
        let entries = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let entries = mem::take(&mut state.entries);
            let mut symbols: Vec<&Symbol> = entries.keys().collect();
            symbols.sort();
            for symbol in symbols {
                for slot in &entries[symbol].listeners {
                    slot.live.set(false);
                }
                state.sink.send_control(ControlMessage::UnsubscribeFromStocks {
                    symbol: symbol.clone(),
                });
            }
            info!("Registry torn down, {} symbol(s) released", entries.len());
            entries
        };
        // listener callbacks may own handles; drop them with no borrow held
        drop(entries);
    }
}

/// Live subscription of one listener to one symbol.
///
/// Disposing (or dropping) the handle removes the listener synchronously: no callback
/// runs for it afterwards.
pub struct SubscriptionHandle {
    symbol: Symbol,
    slot: Rc<ListenerSlot>,
    registry: Weak<RefCell<RegistryState>>,
}

impl SubscriptionHandle {
    /// Symbol of this subscription.
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Identity of the owning listener.
    pub fn listener_id(&self) -> &ListenerId {
        &self.slot.id
    }

    /// `false` once the registry has been torn down.
    pub fn is_active(&self) -> bool {
        self.slot.live.get()
    }

    /// Unregisters the listener.
    pub fn dispose(self) {
        drop(self);
    }

    fn release(&mut self) {
        self.slot.live.set(false);
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let Ok(mut guard) = inner.try_borrow_mut() else {
            warn!(
                "Registry busy while disposing {} for {}",
                self.slot.id, self.symbol
            );
            return;
        };
        let state = &mut *guard;
        let Some(entry) = state.entries.get_mut(&self.symbol) else {
            return;
        };
        // a later subscription may reuse this listener id
        let Some(pos) = entry
            .listeners
            .iter()
            .position(|slot| Rc::ptr_eq(slot, &self.slot))
        else {
            return;
        };
        entry.listeners.remove(pos);
        debug!(
            "Listener {} disposed for {} (refcount {})",
            self.slot.id,
            self.symbol,
            entry.listeners.len()
        );

        if entry.listeners.is_empty() {
            state.entries.remove(&self.symbol);
            info!("Unsubscribing from {}", self.symbol);
            state.sink.send_control(ControlMessage::UnsubscribeFromStocks {
                symbol: self.symbol.clone(),
            });
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("symbol", &self.symbol)
            .field("listener", &self.slot.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, unbounded};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sym(s: &str) -> Symbol {
        s.parse().unwrap()
    }

    fn registry() -> (SubscriptionRegistry, Receiver<ControlMessage>) {
        let (tx, rx) = unbounded();
        (SubscriptionRegistry::new(tx, QuoteMergePolicy::new(10)), rx)
    }

    fn counter() -> (Rc<Cell<usize>>, impl FnMut(&QuoteUpdate, &Quote) + 'static) {
        let count = Rc::new(Cell::new(0));
        let inner = Rc::clone(&count);
        (count, move |_: &QuoteUpdate, _: &Quote| inner.set(inner.get() + 1))
    }

    fn net_subscriptions(rx: &Receiver<ControlMessage>, outstanding: &mut i64) {
        for msg in rx.try_iter() {
            match msg {
                ControlMessage::SubscribeToStocks { .. } => *outstanding += 1,
                ControlMessage::UnsubscribeFromStocks { .. } => *outstanding -= 1,
                _ => {}
            }
        }
    }

    #[test]
    fn first_listener_subscribes_last_listener_unsubscribes() {
        let (registry, rx) = registry();
        let a = registry.subscribe(sym("AAPL"), "row-1", |_, _| {}).unwrap();
        let b = registry.subscribe(sym("AAPL"), "row-2", |_, _| {}).unwrap();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![ControlMessage::SubscribeToStocks { symbol: sym("AAPL") }]
        );
        assert_eq!(registry.refcount(&sym("AAPL")), 2);

        a.dispose();
        assert!(rx.try_recv().is_err());
        b.dispose();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![ControlMessage::UnsubscribeFromStocks { symbol: sym("AAPL") }]
        );
        assert_eq!(registry.refcount(&sym("AAPL")), 0);
        assert!(registry.active_symbols().is_empty());
    }

    #[test]
    fn random_mount_unmount_bursts_keep_one_network_subscription() {
        let (registry, rx) = registry();
        let symbol = sym("NVDA");
        let mut rng = StdRng::seed_from_u64(7);
        let mut handles: Vec<SubscriptionHandle> = Vec::new();
        let mut outstanding = 0i64;
        let mut next_id = 0u32;

        for _ in 0..500 {
            if handles.is_empty() || rng.random_bool(0.5) {
                next_id += 1;
                let handle = registry
                    .subscribe(symbol.clone(), format!("row-{}", next_id), |_, _| {})
                    .unwrap();
                handles.push(handle);
            } else {
                let idx = rng.random_range(0..handles.len());
                handles.swap_remove(idx).dispose();
            }
            net_subscriptions(&rx, &mut outstanding);
            let expected = if handles.is_empty() { 0 } else { 1 };
            assert_eq!(outstanding, expected);
            assert_eq!(registry.refcount(&symbol), handles.len());
        }
    }

    #[test]
    fn duplicate_listener_is_rejected_without_side_effects() {
        let (registry, rx) = registry();
        let _first = registry.subscribe(sym("MSFT"), "detail", |_, _| {}).unwrap();
        let err = registry
            .subscribe(sym("MSFT"), "detail", |_, _| {})
            .unwrap_err();
        assert!(matches!(err, FeedError::DuplicateSubscription { .. }));
        assert_eq!(registry.refcount(&sym("MSFT")), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn same_listener_id_on_other_symbol_is_independent() {
        let (registry, rx) = registry();
        let _a = registry.subscribe(sym("MSFT"), "row", |_, _| {}).unwrap();
        let _b = registry.subscribe(sym("AAPL"), "row", |_, _| {}).unwrap();
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn each_listener_gets_exactly_one_call_per_message() {
        let (registry, _rx) = registry();
        let (first, l1) = counter();
        let (second, l2) = counter();
        let _h1 = registry.subscribe(sym("TSLA"), "tile", l1).unwrap();
        let _h2 = registry.subscribe(sym("TSLA"), "holding", l2).unwrap();

        let outcome = registry.dispatch(&QuoteUpdate::new(sym("TSLA"), 250.0, 240.0));
        assert_eq!(outcome, DispatchOutcome::Delivered(2));
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn disposed_listener_receives_nothing() {
        let (registry, _rx) = registry();
        let (calls, listener) = counter();
        let handle = registry.subscribe(sym("AMZN"), "l1", listener).unwrap();
        handle.dispose();

        let outcome = registry.dispatch(&QuoteUpdate::new(sym("AMZN"), 1.0, 1.0));
        assert_eq!(outcome, DispatchOutcome::Orphaned);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let (registry, rx) = registry();
        {
            let _handle = registry.subscribe(sym("META"), "row", |_, _| {}).unwrap();
        }
        let frames: Vec<_> = rx.try_iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[1],
            ControlMessage::UnsubscribeFromStocks { symbol: sym("META") }
        );
    }

    #[test]
    fn listener_disposed_mid_dispatch_is_skipped() {
        let (registry, _rx) = registry();
        let victim: Rc<RefCell<Option<SubscriptionHandle>>> = Rc::new(RefCell::new(None));
        let (victim_calls, victim_listener) = counter();

        let slot = Rc::clone(&victim);
        let _killer = registry
            .subscribe(sym("JPM"), "killer", move |_, _| {
                if let Some(handle) = slot.borrow_mut().take() {
                    handle.dispose();
                }
            })
            .unwrap();
        let handle = registry.subscribe(sym("JPM"), "victim", victim_listener).unwrap();
        *victim.borrow_mut() = Some(handle);

        let outcome = registry.dispatch(&QuoteUpdate::new(sym("JPM"), 10.0, 10.0));
        assert_eq!(outcome, DispatchOutcome::Delivered(1));
        assert_eq!(victim_calls.get(), 0);
        assert_eq!(registry.refcount(&sym("JPM")), 1);
    }

    #[test]
    fn listener_may_subscribe_during_dispatch() {
        let (registry, rx) = registry();
        let spawned: Rc<RefCell<Vec<SubscriptionHandle>>> = Rc::new(RefCell::new(Vec::new()));
        let reg = registry.clone();
        let store = Rc::clone(&spawned);
        let _h = registry
            .subscribe(sym("GS"), "parent", move |_, _| {
                if store.borrow().is_empty() {
                    let child = reg.subscribe(sym("MS"), "child", |_, _| {}).unwrap();
                    store.borrow_mut().push(child);
                }
            })
            .unwrap();

        registry.dispatch(&QuoteUpdate::new(sym("GS"), 1.0, 1.0));
        assert_eq!(registry.active_symbols(), vec![sym("GS"), sym("MS")]);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn quote_is_shared_and_evicted_after_last_dispose() {
        let (registry, _rx) = registry();
        let seen = Rc::new(Cell::new(0.0));
        let sink = Rc::clone(&seen);
        let handle = registry
            .subscribe(sym("V"), "row", move |_, quote: &Quote| sink.set(quote.current_price))
            .unwrap();

        registry.dispatch(&QuoteUpdate::new(sym("V"), 280.0, 275.0));
        registry.dispatch(&QuoteUpdate::new(sym("V"), 281.0, 275.0));
        assert_eq!(seen.get(), 281.0);
        assert_eq!(registry.quote(&sym("V")).unwrap().current_price, 281.0);

        handle.dispose();
        assert!(registry.quote(&sym("V")).is_none());
    }

    #[test]
    fn invalid_update_is_rejected_and_keeps_previous_quote() {
        let (registry, _rx) = registry();
        let (calls, listener) = counter();
        let _h = registry.subscribe(sym("PG"), "row", listener).unwrap();
        registry.dispatch(&QuoteUpdate::new(sym("PG"), 150.0, 149.0));

        let outcome = registry.dispatch(&QuoteUpdate::new(sym("PG"), -3.0, 149.0));
        assert_eq!(outcome, DispatchOutcome::Rejected);
        assert_eq!(calls.get(), 1);
        assert_eq!(registry.quote(&sym("PG")).unwrap().current_price, 150.0);
    }

    #[test]
    fn prime_only_fills_an_empty_quote() {
        let (registry, _rx) = registry();
        let (calls, listener) = counter();
        assert_eq!(
            registry.prime(&QuoteUpdate::new(sym("HD"), 1.0, 1.0)),
            DispatchOutcome::Orphaned
        );
        let _h = registry.subscribe(sym("HD"), "row", listener).unwrap();

        assert_eq!(
            registry.prime(&QuoteUpdate::new(sym("HD"), 300.0, 298.0)),
            DispatchOutcome::Delivered(1)
        );
        registry.dispatch(&QuoteUpdate::new(sym("HD"), 301.0, 298.0));
        assert_eq!(
            registry.prime(&QuoteUpdate::new(sym("HD"), 299.0, 298.0)),
            DispatchOutcome::Skipped
        );
        assert_eq!(calls.get(), 2);
        assert_eq!(registry.quote(&sym("HD")).unwrap().current_price, 301.0);
    }

    #[test]
    fn mark_stale_flags_quotes_until_next_update() {
        let (registry, _rx) = registry();
        let _h = registry.subscribe(sym("DIS"), "row", |_, _| {}).unwrap();
        registry.dispatch(&QuoteUpdate::new(sym("DIS"), 90.0, 91.0));
        registry.mark_stale();
        assert!(registry.quote(&sym("DIS")).unwrap().stale);
        registry.dispatch(&QuoteUpdate::new(sym("DIS"), 90.5, 91.0));
        assert!(!registry.quote(&sym("DIS")).unwrap().stale);
    }

    #[test]
    fn resubscribe_all_reissues_each_active_symbol_once() {
        let (registry, rx) = registry();
        let _a = registry.subscribe(sym("B"), "x", |_, _| {}).unwrap();
        let _b = registry.subscribe(sym("A"), "x", |_, _| {}).unwrap();
        let _c = registry.subscribe(sym("A"), "y", |_, _| {}).unwrap();
        rx.try_iter().for_each(drop);

        registry.resubscribe_all();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![
                ControlMessage::SubscribeToStocks { symbol: sym("A") },
                ControlMessage::SubscribeToStocks { symbol: sym("B") },
            ]
        );
    }

    #[test]
    fn teardown_invalidates_old_handles() {
        let (registry, rx) = registry();
        let old = registry.subscribe(sym("NFLX"), "row", |_, _| {}).unwrap();
        registry.teardown();
        assert!(!old.is_active());
        assert!(registry.active_symbols().is_empty());

        let (calls, listener) = counter();
        let _new = registry.subscribe(sym("NFLX"), "row", listener).unwrap();
        rx.try_iter().for_each(drop);

        // the stale handle must not release the new subscription
        old.dispose();
        assert!(rx.try_recv().is_err());
        assert_eq!(
            registry.dispatch(&QuoteUpdate::new(sym("NFLX"), 5.0, 5.0)),
            DispatchOutcome::Delivered(1)
        );
        assert_eq!(calls.get(), 1);
    }
}
