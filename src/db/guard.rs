//! Guarded quantity updates, the single primitive every stage moves through.
//!
//! A debit is a conditional UPDATE: `SET qty = qty - ? WHERE <row> AND
//! qty >= ?`. The row write-lock is taken by the UPDATE itself and held to
//! commit, which closes the check-then-act race a read-then-write would
//! have, and the `rows_affected` count is the verdict. No stage hand-rolls
//! its own variant of this.

use sea_orm::sea_query::{Condition, Expr, SimpleExpr};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};

/// Extra column assignments applied atomically with a guarded update,
/// typically timestamps or a terminal status.
pub type ColumnSets<E> = Vec<(<E as EntityTrait>::Column, SimpleExpr)>;

/// Subtracts `amount` from `quantity` on the rows matched by `selector`,
/// refusing (no rows touched) unless the current quantity covers it.
///
/// Returns whether a row was updated. `false` means the row either does not
/// exist, is not matched by `selector`, or holds too little; callers
/// re-read inside the same transaction to tell those apart.
pub async fn debit<E, C>(
    conn: &C,
    quantity: E::Column,
    selector: Condition,
    amount: i64,
    also_set: ColumnSets<E>,
) -> Result<bool, DbErr>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let mut update = E::update_many().col_expr(quantity, Expr::col(quantity).sub(amount));
    for (col, expr) in also_set {
        update = update.col_expr(col, expr);
    }

    let result = update
        .filter(selector)
        .filter(quantity.gte(amount))
        .exec(conn)
        .await?;

    Ok(result.rows_affected > 0)
}

/// Adds `amount` to `quantity` on the rows matched by `selector`.
///
/// When `cap` names a column, the credit is refused if it would push the
/// quantity past that column's value. The ledger uses this to police
/// over-release against `total_quantity`.
pub async fn credit<E, C>(
    conn: &C,
    quantity: E::Column,
    selector: Condition,
    amount: i64,
    cap: Option<E::Column>,
    also_set: ColumnSets<E>,
) -> Result<bool, DbErr>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let mut update = E::update_many().col_expr(quantity, Expr::col(quantity).add(amount));
    for (col, expr) in also_set {
        update = update.col_expr(col, expr);
    }

    let mut update = update.filter(selector);
    if let Some(cap_col) = cap {
        update = update.filter(Expr::col(quantity).lte(Expr::col(cap_col).sub(amount)));
    }

    let result = update.exec(conn).await?;

    Ok(result.rows_affected > 0)
}

/// Deletes matched rows whose quantity has reached zero.
///
/// Run after a debit on stages that do not retain terminal rows; partial
/// consumption leaves the row in place.
pub async fn delete_if_empty<E, C>(
    conn: &C,
    quantity: E::Column,
    selector: Condition,
) -> Result<u64, DbErr>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let result = E::delete_many()
        .filter(selector)
        .filter(quantity.lte(0))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// Conditionally applies `sets` to the rows matched by `selector`, for
/// terminal marks (returned, returned_to_stock) on stages that retain their
/// rows. Returns whether a row was updated, so a concurrent consumer that
/// got there first is detected rather than overwritten.
pub async fn mark<E, C>(conn: &C, selector: Condition, sets: ColumnSets<E>) -> Result<bool, DbErr>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let mut update = E::update_many();
    for (col, expr) in sets {
        update = update.col_expr(col, expr);
    }

    let result = update.filter(selector).exec(conn).await?;

    Ok(result.rows_affected > 0)
}
