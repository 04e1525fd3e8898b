//! Diff between the desired ladder and what is resting on the book.

use std::collections::{HashMap, HashSet};
use std::fmt;

use bigdecimal::BigDecimal;
use serde::Serialize;
use vortex_client::{OrderId, Side};

use crate::book::Order;
use crate::quote::{nearest_steps, Ladder};

/// One instruction for the submitter. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Action {
    Cancel { order_id: OrderId },
    Place { side: Side, price: BigDecimal, size: BigDecimal },
}

impl Action {
    pub fn is_cancel(&self) -> bool {
        matches!(self, Action::Cancel { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Cancel { .. } => "cancel",
            Action::Place { .. } => "place",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Cancel { order_id } => write!(f, "Cancel(#{order_id})"),
            Action::Place { side, price, size } => write!(f, "Place({side} {size}@{price})"),
        }
    }
}

type Key = (Side, BigDecimal);

fn key(side: Side, price: &BigDecimal, tick_size: &BigDecimal) -> Key {
    (side, nearest_steps(price, tick_size))
}

/// Minimal cancel/place list turning `observed` into `desired`.
///
/// Only `Open` orders take part. Prices are compared in whole ticks, so an order resting a
/// fraction of a tick away from a level still matches it. A matching order with a different
/// remaining size is replaced. Cancels come first, by ascending id; places follow in ladder
/// order.
pub fn plan(desired: &Ladder, observed: &[Order], tick_size: &BigDecimal) -> Vec<Action> {
    let wanted: HashMap<Key, &BigDecimal> = desired
        .iter()
        .map(|level| (key(level.side, &level.price, tick_size), &level.size))
        .collect();

    let mut open: Vec<&Order> = observed.iter().filter(|o| o.is_open()).collect();
    open.sort_by_key(|o| o.id);

    let mut claimed: HashSet<Key> = HashSet::new();
    let mut actions = Vec::new();

    for order in open {
        let k = key(order.side, &order.price, tick_size);
        let keep = !claimed.contains(&k) && wanted.get(&k).is_some_and(|size| **size == order.remaining);
        if keep {
            claimed.insert(k);
        } else {
            actions.push(Action::Cancel { order_id: order.id });
        }
    }

    for level in desired.iter() {
        if !claimed.contains(&key(level.side, &level.price, tick_size)) {
            actions.push(Action::Place {
                side: level.side,
                price: level.price.clone(),
                size: level.size.clone(),
            });
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::OrderStatus;
    use crate::quote::Level;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn tick() -> BigDecimal {
        dec("0.01")
    }

    fn level(side: Side, price: &str, size: &str) -> Level {
        Level {
            side,
            price: dec(price),
            size: dec(size),
        }
    }

    fn order(id: u64, side: Side, price: &str, size: &str) -> Order {
        Order {
            id: OrderId(id),
            side,
            price: dec(price),
            size: dec(size),
            remaining: dec(size),
            status: OrderStatus::Open,
        }
    }

    #[test]
    fn missing_level_is_placed() {
        let desired: Ladder = [
            level(Side::Short, "100.10", "5"),
            level(Side::Long, "99.90", "5"),
        ]
        .into_iter()
        .collect();
        let observed = [order(1, Side::Short, "100.10", "5")];

        assert_eq!(
            plan(&desired, &observed, &tick()),
            vec![Action::Place {
                side: Side::Long,
                price: dec("99.90"),
                size: dec("5")
            }]
        );
    }

    #[test]
    fn size_mismatch_is_replaced() {
        let desired: Ladder = [level(Side::Short, "100.10", "10")].into_iter().collect();
        let observed = [order(1, Side::Short, "100.10", "5")];

        assert_eq!(
            plan(&desired, &observed, &tick()),
            vec![
                Action::Cancel { order_id: OrderId(1) },
                Action::Place {
                    side: Side::Short,
                    price: dec("100.10"),
                    size: dec("10")
                },
            ]
        );
    }

    #[test]
    fn matching_book_needs_nothing() {
        let desired: Ladder = [
            level(Side::Short, "100.10", "5"),
            level(Side::Long, "99.90", "5"),
            level(Side::Short, "100.20", "5"),
            level(Side::Long, "99.80", "5"),
        ]
        .into_iter()
        .collect();
        let observed: Vec<Order> = desired
            .iter()
            .enumerate()
            .map(|(i, l)| order(i as u64 + 1, l.side, &l.price.to_string(), &l.size.to_string()))
            .collect();

        assert!(plan(&desired, &observed, &tick()).is_empty());
    }

    #[test]
    fn cancels_precede_places() {
        let desired: Ladder = [
            level(Side::Short, "101.10", "5"),
            level(Side::Long, "100.90", "5"),
        ]
        .into_iter()
        .collect();
        let observed = [
            order(9, Side::Long, "99.90", "5"),
            order(4, Side::Short, "100.10", "5"),
        ];

        let actions = plan(&desired, &observed, &tick());
        assert_eq!(actions.len(), 4);
        let first_place = actions.iter().position(|a| !a.is_cancel()).unwrap();
        assert!(actions[..first_place].iter().all(Action::is_cancel));
        assert!(actions[first_place..].iter().all(|a| !a.is_cancel()));
        assert_eq!(actions[0], Action::Cancel { order_id: OrderId(4) });
        assert_eq!(actions[1], Action::Cancel { order_id: OrderId(9) });
    }

    #[test]
    fn pending_and_filled_orders_are_ignored() {
        let desired: Ladder = [level(Side::Short, "100.10", "5")].into_iter().collect();
        let mut pending = order(2, Side::Long, "99.00", "5");
        pending.status = OrderStatus::PendingCancel;
        let mut filled = order(3, Side::Long, "98.00", "5");
        filled.status = OrderStatus::Filled;
        let observed = [order(1, Side::Short, "100.10", "5"), pending, filled];

        assert!(plan(&desired, &observed, &tick()).is_empty());
    }

    #[test]
    fn duplicate_orders_on_one_level_keep_the_oldest() {
        let desired: Ladder = [level(Side::Short, "100.10", "5")].into_iter().collect();
        let observed = [
            order(7, Side::Short, "100.10", "5"),
            order(3, Side::Short, "100.10", "5"),
        ];

        assert_eq!(
            plan(&desired, &observed, &tick()),
            vec![Action::Cancel { order_id: OrderId(7) }]
        );
    }

    #[test]
    fn prices_within_half_a_tick_match() {
        let desired: Ladder = [level(Side::Long, "99.90", "5")].into_iter().collect();
        let observed = [order(1, Side::Long, "99.9004", "5")];

        assert!(plan(&desired, &observed, &tick()).is_empty());
    }

    #[test]
    fn partially_filled_order_is_replaced() {
        let desired: Ladder = [level(Side::Long, "99.90", "5")].into_iter().collect();
        let mut partial = order(1, Side::Long, "99.90", "5");
        partial.remaining = dec("2");

        let actions = plan(&desired, &[partial], &tick());
        assert_eq!(actions[0], Action::Cancel { order_id: OrderId(1) });
        assert!(matches!(actions[1], Action::Place { side: Side::Long, .. }));
    }

    #[test]
    fn opposite_side_at_same_price_does_not_match() {
        let desired: Ladder = [level(Side::Short, "100.00", "5")].into_iter().collect();
        let observed = [order(1, Side::Long, "100.00", "5")];

        assert_eq!(plan(&desired, &observed, &tick()).len(), 2);
    }
}
