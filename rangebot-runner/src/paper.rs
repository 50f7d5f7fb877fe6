//! Paper execution adapter for replay and dry runs.
//!
//! Fill model:
//! - Entries are marketable on acceptance and fill at their reference price.
//! - Protective stops and targets work as an OCO pair. Each bar is resolved
//!   with the same same-bar priority the stream model uses.
//! - A bar that opens beyond a working level fills at the open (gap fill).
//! - Break-even modifies replace the working stop in place.
//! - Flatten fills at the last seen close and cancels the stream's working
//!   orders.
//!
//! Fills and cancels are queued as [`ExecutionUpdate`]s; the host drains
//! them with [`PaperAdapter::take_updates`] and feeds them to the engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use rangebot_core::adapter::{
    AdapterError, AdapterResult, BrokerAck, BrokerOrder, BrokerSnapshot, ExecutionAdapter,
};
use rangebot_core::domain::{
    Bar, BrokerOrderId, Direction, ExecutionUpdate, IntentId, OrderRequest, OrderSide, StreamId,
    UpdateKind,
};
use rangebot_core::stream::exit::{
    resolve_bar, stop_touched, target_touched, ExitHit, SameBarPriority,
};

#[derive(Debug, Clone)]
struct WorkingOrder {
    intent_id: IntentId,
    broker_order_id: BrokerOrderId,
    price: f64,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    instrument: String,
    direction: Direction,
    quantity: u32,
    stop: Option<WorkingOrder>,
    target: Option<WorkingOrder>,
}

#[derive(Debug, Default)]
struct PaperBook {
    positions: BTreeMap<StreamId, PaperPosition>,
    last_close: BTreeMap<String, f64>,
    updates: Vec<ExecutionUpdate>,
}

#[derive(Debug)]
pub struct PaperAdapter {
    priority: SameBarPriority,
    book: Mutex<PaperBook>,
    next_id: AtomicU64,
}

impl PaperAdapter {
    pub fn new(priority: SameBarPriority) -> Self {
        Self { priority, book: Mutex::new(PaperBook::default()), next_id: AtomicU64::new(0) }
    }

    /// Drain queued fill and cancel notifications.
    pub fn take_updates(&self) -> Vec<ExecutionUpdate> {
        std::mem::take(&mut self.book.lock().updates)
    }

    pub fn open_positions(&self) -> usize {
        self.book.lock().positions.len()
    }

    /// Work one bar against the resting orders. Call before the engine sees
    /// the bar so orders placed on this bar only work from the next one.
    pub fn on_bar(&self, instrument: &str, bar: &Bar) {
        let mut book = self.book.lock();
        book.last_close.insert(instrument.to_string(), bar.close);

        let mut closed = Vec::new();
        let mut updates = Vec::new();
        let positions = book.positions.iter_mut().filter(|(_, p)| p.instrument == instrument);
        for (stream_id, pos) in positions {
            let Some(exit) = self.resolve(pos, bar) else {
                continue;
            };
            let (filled, other) = match exit {
                ExitHit::Stop { .. } => (pos.stop.take(), pos.target.take()),
                ExitHit::Target { .. } => (pos.target.take(), pos.stop.take()),
            };
            if let Some(order) = filled {
                let price = fill_price(exit, bar, pos.direction);
                info!(
                    %stream_id,
                    broker_order_id = %order.broker_order_id,
                    price,
                    "paper exit filled"
                );
                updates.push(ExecutionUpdate::new(
                    order.intent_id,
                    UpdateKind::Filled { price, quantity: pos.quantity },
                ));
            }
            if let Some(order) = other {
                updates.push(ExecutionUpdate::new(order.intent_id, UpdateKind::Cancelled));
            }
            closed.push(stream_id.clone());
        }
        for stream_id in closed {
            book.positions.remove(&stream_id);
        }
        book.updates.extend(updates);
    }

    fn resolve(&self, pos: &PaperPosition, bar: &Bar) -> Option<ExitHit> {
        match (&pos.stop, &pos.target) {
            (Some(stop), Some(target)) => {
                resolve_bar(bar, pos.direction, stop.price, target.price, self.priority)
            }
            (Some(stop), None) => stop_touched(bar, pos.direction, stop.price)
                .then_some(ExitHit::Stop { price: stop.price }),
            (None, Some(target)) => target_touched(bar, pos.direction, target.price)
                .then_some(ExitHit::Target { price: target.price }),
            (None, None) => None,
        }
    }

    fn next_broker_id(&self) -> BrokerOrderId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        BrokerOrderId::new(format!("P{n}"))
    }

    fn working(&self, request: &OrderRequest) -> AdapterResult<(BrokerOrderId, WorkingOrder)> {
        let price = request.price.ok_or_else(|| {
            AdapterError::Rejected(format!("{} order without a price", request.role))
        })?;
        let broker_order_id = self.next_broker_id();
        let order = WorkingOrder {
            intent_id: request.intent_id.clone(),
            broker_order_id: broker_order_id.clone(),
            price,
        };
        Ok((broker_order_id, order))
    }
}

/// Stops and targets fill at their level, or at the open when the bar
/// gapped through it.
fn fill_price(exit: ExitHit, bar: &Bar, direction: Direction) -> f64 {
    let level = exit.price();
    let gapped = match (exit, direction) {
        (ExitHit::Stop { .. }, Direction::Long) | (ExitHit::Target { .. }, Direction::Short) => {
            bar.open <= level
        }
        (ExitHit::Stop { .. }, Direction::Short) | (ExitHit::Target { .. }, Direction::Long) => {
            bar.open >= level
        }
    };
    if gapped {
        bar.open
    } else {
        level
    }
}

fn direction_of(side: OrderSide) -> Direction {
    match side {
        OrderSide::Buy => Direction::Long,
        OrderSide::Sell => Direction::Short,
    }
}

impl ExecutionAdapter for PaperAdapter {
    fn submit_entry(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        let (broker_order_id, order) = self.working(request)?;
        let mut book = self.book.lock();
        if book.positions.contains_key(&request.stream_id) {
            return Err(AdapterError::Rejected(format!(
                "stream {} already has a position",
                request.stream_id
            )));
        }
        book.positions.insert(
            request.stream_id.clone(),
            PaperPosition {
                instrument: request.instrument.clone(),
                direction: direction_of(request.side),
                quantity: request.quantity,
                stop: None,
                target: None,
            },
        );
        book.updates.push(ExecutionUpdate::new(
            order.intent_id,
            UpdateKind::Filled { price: order.price, quantity: request.quantity },
        ));
        debug!(stream_id = %request.stream_id, price = order.price, "paper entry filled");
        Ok(BrokerAck { broker_order_id })
    }

    fn submit_protective_stop(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        let (broker_order_id, order) = self.working(request)?;
        let mut book = self.book.lock();
        let pos = book
            .positions
            .get_mut(&request.stream_id)
            .ok_or_else(|| AdapterError::Rejected("no open position for stop".into()))?;
        pos.stop = Some(order);
        Ok(BrokerAck { broker_order_id })
    }

    fn submit_target(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        let (broker_order_id, order) = self.working(request)?;
        let mut book = self.book.lock();
        let pos = book
            .positions
            .get_mut(&request.stream_id)
            .ok_or_else(|| AdapterError::Rejected("no open position for target".into()))?;
        pos.target = Some(order);
        Ok(BrokerAck { broker_order_id })
    }

    fn modify_stop_to_break_even(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        let (broker_order_id, order) = self.working(request)?;
        let mut book = self.book.lock();
        let stop = book
            .positions
            .get_mut(&request.stream_id)
            .and_then(|p| p.stop.as_mut())
            .filter(|s| request.replaces.as_ref().map_or(true, |id| *id == s.broker_order_id))
            .ok_or_else(|| AdapterError::Rejected("no working stop to replace".into()))?;
        *stop = order;
        Ok(BrokerAck { broker_order_id })
    }

    fn flatten(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        let broker_order_id = self.next_broker_id();
        let mut book = self.book.lock();
        let price = book.last_close.get(&request.instrument).copied();
        let position = book.positions.remove(&request.stream_id);
        let Some(price) = price else {
            return Err(AdapterError::Rejected(format!(
                "no market price for {}",
                request.instrument
            )));
        };
        if let Some(pos) = position {
            for order in [pos.stop, pos.target].into_iter().flatten() {
                book.updates.push(ExecutionUpdate::new(order.intent_id, UpdateKind::Cancelled));
            }
        }
        book.updates.push(ExecutionUpdate::new(
            request.intent_id.clone(),
            UpdateKind::Filled { price, quantity: request.quantity },
        ));
        info!(stream_id = %request.stream_id, price, "paper flatten filled");
        Ok(BrokerAck { broker_order_id })
    }

    fn sync_state(&self) -> AdapterResult<BrokerSnapshot> {
        let book = self.book.lock();
        let open_orders = book
            .positions
            .values()
            .flat_map(|p| {
                [&p.stop, &p.target].into_iter().flatten().map(move |o| BrokerOrder {
                    broker_order_id: o.broker_order_id.clone(),
                    instrument: p.instrument.clone(),
                    intent_id: Some(o.intent_id.clone()),
                })
            })
            .collect();
        Ok(BrokerSnapshot { open_orders })
    }
}
