use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{app_error::AppError, models::OrderStatus};

/// Signed stock adjustment implied by a status transition.
///
/// Entering a confirmed-sale status reserves inventory; leaving one for a
/// cancellation/refund restocks it. Every other pair leaves stock alone.
pub fn stock_delta_direction(old: OrderStatus, new: OrderStatus) -> i32 {
    use OrderStatus::{Canceled, Fulfilled, Paid, Pending, Refunded};

    if old == Pending && matches!(new, Paid | Fulfilled) {
        return -1;
    }
    if matches!(old, Paid | Fulfilled) && matches!(new, Canceled | Refunded) {
        return 1;
    }
    0
}

/// Final stock value to write for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StockAdjustment {
    pub variant_id: Uuid,
    pub next_stock: i32,
}

/// Compute the stock writes for the variant lines of one order.
///
/// `lines` holds (variant_id, qty) for every order item referencing a
/// variant; `current` is the batched stock read taken inside the same
/// transaction. Multiple lines on one variant accumulate against the
/// running value. Any line that would drive a variant below zero fails the
/// whole plan; a variant id that no longer resolves reads as stock 0.
pub fn plan_stock_adjustments(
    lines: &[(Uuid, i32)],
    current: &HashMap<Uuid, i32>,
    direction: i32,
) -> Result<Vec<StockAdjustment>, AppError> {
    let mut next: HashMap<Uuid, i32> = HashMap::new();
    let mut seen: Vec<Uuid> = Vec::new();

    for &(variant_id, qty) in lines {
        let running = next
            .get(&variant_id)
            .or_else(|| current.get(&variant_id))
            .copied()
            .unwrap_or(0);
        let adjusted = running + direction * qty;
        if adjusted < 0 {
            return Err(AppError::InsufficientStock {
                variant_id,
                current: running,
                need: qty,
            });
        }
        if !next.contains_key(&variant_id) {
            seen.push(variant_id);
        }
        next.insert(variant_id, adjusted);
    }

    Ok(seen
        .into_iter()
        .map(|variant_id| StockAdjustment {
            next_stock: next[&variant_id],
            variant_id,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::{Canceled, Fulfilled, Paid, Pending, Refunded};

    #[test]
    fn confirming_a_pending_sale_decrements() {
        assert_eq!(stock_delta_direction(Pending, Paid), -1);
        assert_eq!(stock_delta_direction(Pending, Fulfilled), -1);
    }

    #[test]
    fn reversing_a_confirmed_sale_increments() {
        assert_eq!(stock_delta_direction(Paid, Canceled), 1);
        assert_eq!(stock_delta_direction(Paid, Refunded), 1);
        assert_eq!(stock_delta_direction(Fulfilled, Canceled), 1);
        assert_eq!(stock_delta_direction(Fulfilled, Refunded), 1);
    }

    #[test]
    fn all_other_pairs_leave_stock_alone() {
        let statuses = [Pending, Paid, Fulfilled, Canceled, Refunded];
        let moving = [
            (Pending, Paid),
            (Pending, Fulfilled),
            (Paid, Canceled),
            (Paid, Refunded),
            (Fulfilled, Canceled),
            (Fulfilled, Refunded),
        ];

        for old in statuses {
            for new in statuses {
                if !moving.contains(&(old, new)) {
                    assert_eq!(stock_delta_direction(old, new), 0, "{old} -> {new}");
                }
            }
        }
    }

    #[test]
    fn decrement_reserves_available_stock() {
        let variant_id = Uuid::new_v4();
        let current = HashMap::from([(variant_id, 5)]);

        let plan = plan_stock_adjustments(&[(variant_id, 3)], &current, -1).unwrap();

        assert_eq!(
            plan,
            vec![StockAdjustment {
                variant_id,
                next_stock: 2
            }]
        );
    }

    #[test]
    fn decrement_below_zero_fails_whole_plan() {
        let variant_id = Uuid::new_v4();
        let current = HashMap::from([(variant_id, 1)]);

        let err = plan_stock_adjustments(&[(variant_id, 3)], &current, -1).unwrap_err();

        match err {
            AppError::InsufficientStock {
                variant_id: id,
                current,
                need,
            } => {
                assert_eq!(id, variant_id);
                assert_eq!(current, 1);
                assert_eq!(need, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn increment_restocks_reversed_sales() {
        let variant_id = Uuid::new_v4();
        let current = HashMap::from([(variant_id, 2)]);

        let plan = plan_stock_adjustments(&[(variant_id, 3)], &current, 1).unwrap();

        assert_eq!(plan[0].next_stock, 5);
    }

    #[test]
    fn repeated_variant_lines_accumulate_against_the_running_value() {
        let variant_id = Uuid::new_v4();
        let current = HashMap::from([(variant_id, 3)]);

        let err =
            plan_stock_adjustments(&[(variant_id, 2), (variant_id, 2)], &current, -1).unwrap_err();

        match err {
            AppError::InsufficientStock { current, need, .. } => {
                assert_eq!(current, 1);
                assert_eq!(need, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let ok =
            plan_stock_adjustments(&[(variant_id, 2), (variant_id, 1)], &current, -1).unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].next_stock, 0);
    }

    #[test]
    fn unresolvable_variant_reads_as_zero_stock() {
        let variant_id = Uuid::new_v4();
        let current = HashMap::new();

        let restock = plan_stock_adjustments(&[(variant_id, 2)], &current, 1).unwrap();
        assert_eq!(restock[0].next_stock, 2);

        let err = plan_stock_adjustments(&[(variant_id, 2)], &current, -1).unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock { current: 0, need: 2, .. }
        ));
    }

    #[test]
    fn empty_line_list_plans_nothing() {
        assert!(
            plan_stock_adjustments(&[], &HashMap::new(), -1)
                .unwrap()
                .is_empty()
        );
    }
}
