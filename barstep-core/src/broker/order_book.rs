//! Order book state machine — order storage, lifecycle transitions, OCO
//! groups and dormant bracket children.
//!
//! The book does not price fills; it tracks state. Every transition is
//! validated against the lifecycle, appended to the run log, and queued as
//! a notification snapshot for the strategy and analyzers.

use super::BrokerError;
use crate::domain::{
    OcoGroupId, Order, OrderId, OrderStatus, RunLogEntry, RunLogEvent,
};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

#[derive(Debug, Default)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    /// Bracket entry → protective children held at `Created`.
    dormant: BTreeMap<OrderId, Vec<OrderId>>,
    /// Unresolved OCO groups. A group is removed once resolved.
    oco_groups: BTreeMap<OcoGroupId, Vec<OrderId>>,
    run_log: Vec<RunLogEntry>,
    notifications: Vec<Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookup ─────────────────────────────────────────────────────────

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: OrderId) -> Result<&mut Order, BrokerError> {
        self.orders.get_mut(&id).ok_or(BrokerError::UnknownOrder(id))
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Orders awaiting acceptance, oldest first.
    pub fn submitted(&self) -> Vec<OrderId> {
        self.ids_where(|o| o.status == OrderStatus::Submitted)
    }

    /// Accepted or partially filled orders, oldest first.
    pub fn working(&self) -> Vec<OrderId> {
        self.ids_where(Order::is_working)
    }

    pub fn working_for(&self, instrument: &str) -> Vec<&Order> {
        self.orders
            .values()
            .filter(|o| o.is_working() && o.instrument == instrument)
            .collect()
    }

    pub fn has_open_orders(&self) -> bool {
        self.orders
            .values()
            .any(|o| matches!(o.status, OrderStatus::Submitted) || o.is_working())
    }

    /// Whether `id` is a bracket child still waiting for its entry.
    pub fn is_dormant(&self, id: OrderId) -> bool {
        self.dormant.values().any(|children| children.contains(&id))
    }

    pub fn oco_members(&self, group: OcoGroupId) -> Option<&[OrderId]> {
        self.oco_groups.get(&group).map(Vec::as_slice)
    }

    pub fn run_log(&self) -> &[RunLogEntry] {
        &self.run_log
    }

    pub fn take_run_log(&mut self) -> Vec<RunLogEntry> {
        std::mem::take(&mut self.run_log)
    }

    pub fn take_notifications(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.notifications)
    }

    fn ids_where(&self, pred: impl Fn(&Order) -> bool) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| pred(o))
            .map(|o| o.id)
            .collect()
    }

    // ── Registration ───────────────────────────────────────────────────

    /// Store an order at `Created`. The caller follows up with a transition
    /// to `Submitted` or `Rejected`.
    pub fn insert(&mut self, order: Order) {
        debug_assert_eq!(order.status, OrderStatus::Created);
        self.orders.insert(order.id, order);
    }

    /// Link existing orders into an OCO group.
    pub fn link_oco(&mut self, group: OcoGroupId, members: &[OrderId]) -> Result<(), BrokerError> {
        for &id in members {
            self.get_mut(id)?.oco_group = Some(group);
        }
        self.oco_groups.insert(group, members.to_vec());
        Ok(())
    }

    /// Hold `children` dormant until `entry` completes.
    pub fn hold_children(&mut self, entry: OrderId, children: &[OrderId]) -> Result<(), BrokerError> {
        for &id in children {
            self.get_mut(id)?.parent = Some(entry);
        }
        self.dormant.insert(entry, children.to_vec());
        Ok(())
    }

    // ── Transitions ────────────────────────────────────────────────────

    /// Move `id` to `to`, validating the lifecycle edge and logging it.
    /// Group effects are not applied; call [`OrderBook::settle`] afterwards.
    pub fn transition(
        &mut self,
        id: OrderId,
        to: OrderStatus,
        step: usize,
        reason: &str,
    ) -> Result<(), BrokerError> {
        let order = self.get_mut(id)?;
        let from = order.status;
        if !from.can_transition_to(to) {
            return Err(BrokerError::OrderNotActive { id, status: from });
        }
        order.status = to;
        let snapshot = order.clone();
        debug!(order = %id, %from, %to, reason, "order transition");
        self.run_log.push(RunLogEntry {
            step,
            order_id: id,
            event: RunLogEvent::Transition {
                from,
                to,
                reason: reason.to_string(),
            },
        });
        self.notifications.push(snapshot);
        Ok(())
    }

    pub(crate) fn log_event(&mut self, step: usize, order_id: OrderId, event: RunLogEvent) {
        self.run_log.push(RunLogEntry {
            step,
            order_id,
            event,
        });
    }

    /// Apply OCO and bracket consequences of `id` having filled or ended.
    ///
    /// A first fill or any terminal state resolves the order's OCO group,
    /// canceling every live sibling. A terminal bracket entry releases its
    /// children: they go live (sized to what the entry filled) from the
    /// next step, or are canceled when the entry never filled.
    pub fn settle(&mut self, id: OrderId, step: usize) -> Result<(), BrokerError> {
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let order = self.get(current).ok_or(BrokerError::UnknownOrder(current))?;
            let (status, filled, group) = (order.status, order.filled, order.oco_group);

            if filled > 0.0 || status.is_terminal() {
                if let Some(group) = group {
                    if let Some(members) = self.oco_groups.remove(&group) {
                        for sibling in members.into_iter().filter(|&m| m != current) {
                            let live = self
                                .get(sibling)
                                .is_some_and(|o| !o.status.is_terminal());
                            if live {
                                let reason = format!("oco sibling {current} resolved");
                                self.transition(sibling, OrderStatus::Canceled, step, &reason)?;
                                queue.push_back(sibling);
                            }
                        }
                    }
                }
            }

            if status.is_terminal() {
                if let Some(children) = self.dormant.remove(&current) {
                    let children: Vec<OrderId> = children
                        .into_iter()
                        .filter(|&c| self.get(c).is_some_and(|o| !o.status.is_terminal()))
                        .collect();
                    if filled > 0.0 {
                        self.activate_children(current, &children, filled, step)?;
                    } else {
                        for child in children {
                            self.transition(child, OrderStatus::Canceled, step, "bracket entry ended unfilled")?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn activate_children(
        &mut self,
        entry: OrderId,
        children: &[OrderId],
        filled: f64,
        step: usize,
    ) -> Result<(), BrokerError> {
        for &child in children {
            let order = self.get_mut(child)?;
            order.size = filled;
            order.eligible_step = order.eligible_step.max(step + 1);
            let reason = format!("bracket entry {entry} filled");
            self.transition(child, OrderStatus::Submitted, step, &reason)?;
        }
        if children.len() > 1 {
            if let Some(group) = self.get(children[0]).and_then(|o| o.oco_group) {
                self.oco_groups.insert(group, children.to_vec());
            }
        }
        Ok(())
    }
}
