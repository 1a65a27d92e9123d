//! Portfolio Store
//!
//! Accounts, holdings, watchlist and the audit ledger, plus the
//! transactional scope every multi-statement settlement runs inside.
//!
//! Query functions are free functions over a connection so the same SQL
//! serves both pooled single reads and statements inside a transaction.
//! Business invariants (balance >= 0, holding quantity >= 0, one trade
//! audit row per order) live in the SQL predicates, which makes concurrent
//! settlement race on the row and lets the loser see a clean conflict.

use futures::future::BoxFuture;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::portfolio::{
    Account, AccountType, Currency, Holding, Transaction, TransactionType, WatchlistItem,
};

pub struct InsertAccountParams {
    pub user_id: Uuid,
    pub account_number: String,
    pub account_type: AccountType,
    pub currency: Currency,
    pub balance: Decimal,
}

pub struct InsertAuditLogParams {
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: String,
    pub reference_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct PortfolioStore {
    pool: PgPool,
}

impl PortfolioStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run `f` inside one database transaction: commit on success, roll
    /// back on error. A panic unwinds through the scope and the dropped
    /// transaction rolls back as well.
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut PgConnection) -> BoxFuture<'t, Result<T, AppError>>,
    {
        let mut tx = self.pool.begin().await?;

        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::error!("transaction rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    // ==================== Pooled single operations ====================

    pub async fn get_account_by_id(&self, id: Uuid) -> Result<Account, AppError> {
        let mut conn = self.pool.acquire().await?;
        get_account_by_id(&mut conn, id).await
    }

    pub async fn get_accounts_by_user_id(&self, user_id: Uuid) -> Result<Vec<Account>, AppError> {
        let mut conn = self.pool.acquire().await?;
        get_accounts_by_user_id(&mut conn, user_id).await
    }

    pub async fn get_holdings_by_account_id(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<Holding>, AppError> {
        let holdings = sqlx::query_as::<_, Holding>(
            "SELECT * FROM holdings WHERE account_id = $1 ORDER BY symbol",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(holdings)
    }

    pub async fn get_holding(
        &self,
        account_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Holding>, AppError> {
        let mut conn = self.pool.acquire().await?;
        get_holding(&mut conn, account_id, symbol).await
    }

    pub async fn get_transactions_by_account_id(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<Transaction>, AppError> {
        let txs = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE account_id = $1 ORDER BY created_at DESC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(txs)
    }

    pub async fn delete_account(&self, id: Uuid) -> Result<(), AppError> {
        let deleted = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::not_found(format!("account {}", id)));
        }
        Ok(())
    }

    // ==================== Watchlist ====================

    pub async fn add_to_watchlist(&self, user_id: Uuid, symbol: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO watchlist_items (user_id, symbol)
            VALUES ($1, $2)
            ON CONFLICT (user_id, symbol) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove_from_watchlist(&self, user_id: Uuid, symbol: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM watchlist_items WHERE user_id = $1 AND symbol = $2")
            .bind(user_id)
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_watchlist(&self, user_id: Uuid) -> Result<Vec<WatchlistItem>, AppError> {
        let items = sqlx::query_as::<_, WatchlistItem>(
            "SELECT * FROM watchlist_items WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }
}

// ==================== Transaction-scoped queries ====================

pub async fn get_account_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Account, AppError> {
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("account {}", id)))
}

pub async fn get_accounts_by_user_id(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Vec<Account>, AppError> {
    let accounts = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(accounts)
}

pub async fn insert_account(
    conn: &mut PgConnection,
    params: InsertAccountParams,
) -> Result<Account, AppError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (user_id, account_number, account_type, currency, balance)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(params.user_id)
    .bind(&params.account_number)
    .bind(params.account_type)
    .bind(params.currency)
    .bind(params.balance)
    .fetch_one(&mut *conn)
    .await?;

    Ok(account)
}

/// Add a signed delta to the balance. The predicate keeps the post-state
/// non-negative; a debit past zero matches no row and surfaces as a
/// conflict instead of a negative balance.
pub async fn update_account_balance(
    conn: &mut PgConnection,
    id: Uuid,
    delta: Decimal,
) -> Result<Account, AppError> {
    let updated = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts
        SET balance = balance + $2, updated_at = NOW()
        WHERE id = $1 AND balance + $2 >= 0
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(delta)
    .fetch_optional(&mut *conn)
    .await?;

    match updated {
        Some(account) => Ok(account),
        None => {
            get_account_by_id(&mut *conn, id).await?;
            Err(AppError::conflict("insufficient funds"))
        }
    }
}

/// Buy-side upsert with the weighted-average cost update:
/// new_avg = (old_qty * old_avg + delta_qty * fill_cost) / (old_qty + delta_qty).
pub async fn upsert_holding(
    conn: &mut PgConnection,
    account_id: Uuid,
    symbol: &str,
    quantity_delta: Decimal,
    avg_cost: Decimal,
) -> Result<Holding, AppError> {
    let holding = sqlx::query_as::<_, Holding>(
        r#"
        INSERT INTO holdings (account_id, symbol, quantity, avg_cost)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (account_id, symbol) DO UPDATE SET
            avg_cost = CASE
                WHEN holdings.quantity + EXCLUDED.quantity = 0 THEN holdings.avg_cost
                ELSE (holdings.quantity * holdings.avg_cost + EXCLUDED.quantity * EXCLUDED.avg_cost)
                     / (holdings.quantity + EXCLUDED.quantity)
            END,
            quantity = holdings.quantity + EXCLUDED.quantity,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .bind(quantity_delta)
    .bind(avg_cost)
    .fetch_one(&mut *conn)
    .await?;

    Ok(holding)
}

/// Sell-side decrease; avg_cost is preserved. A sold-out position stays as
/// a zero-quantity row.
pub async fn decrease_holding(
    conn: &mut PgConnection,
    account_id: Uuid,
    symbol: &str,
    quantity: Decimal,
) -> Result<Holding, AppError> {
    let updated = sqlx::query_as::<_, Holding>(
        r#"
        UPDATE holdings
        SET quantity = quantity - $3, updated_at = NOW()
        WHERE account_id = $1 AND symbol = $2 AND quantity >= $3
        RETURNING *
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .bind(quantity)
    .fetch_optional(&mut *conn)
    .await?;

    match updated {
        Some(holding) => Ok(holding),
        None => match get_holding(&mut *conn, account_id, symbol).await? {
            Some(_) => Err(AppError::conflict("insufficient holdings")),
            None => Err(AppError::not_found(format!(
                "no holding for {} in account {}",
                symbol, account_id
            ))),
        },
    }
}

pub async fn get_holding(
    conn: &mut PgConnection,
    account_id: Uuid,
    symbol: &str,
) -> Result<Option<Holding>, AppError> {
    let holding = sqlx::query_as::<_, Holding>(
        "SELECT * FROM holdings WHERE account_id = $1 AND symbol = $2",
    )
    .bind(account_id)
    .bind(symbol)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(holding)
}

pub async fn insert_audit_log(
    conn: &mut PgConnection,
    params: InsertAuditLogParams,
) -> Result<Transaction, AppError> {
    let tx = sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (account_id, transaction_type, amount, description, reference_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(params.account_id)
    .bind(params.transaction_type)
    .bind(params.amount)
    .bind(&params.description)
    .bind(params.reference_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(tx)
}

/// Audit insert for trade settlements, deduplicated on the order id via
/// the partial unique index on (reference_id) for buy/sell rows. A second
/// settlement of the same order conflicts, which rolls the surrounding
/// transaction back before any balance or holding change commits.
pub async fn insert_trade_audit_log(
    conn: &mut PgConnection,
    params: InsertAuditLogParams,
) -> Result<Transaction, AppError> {
    let inserted = sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (account_id, transaction_type, amount, description, reference_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (reference_id) WHERE transaction_type IN ('buy', 'sell') DO NOTHING
        RETURNING *
        "#,
    )
    .bind(params.account_id)
    .bind(params.transaction_type)
    .bind(params.amount)
    .bind(&params.description)
    .bind(params.reference_id)
    .fetch_optional(&mut *conn)
    .await?;

    inserted.ok_or_else(|| {
        AppError::conflict(format!(
            "order {} already settled",
            params
                .reference_id
                .map(|id| id.to_string())
                .unwrap_or_default()
        ))
    })
}

/// First INVESTMENT account for the user, the account trades settle into.
pub async fn find_investment_account(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Option<Account>, AppError> {
    let accounts = get_accounts_by_user_id(&mut *conn, user_id).await?;
    Ok(accounts
        .into_iter()
        .find(|acc| acc.account_type == AccountType::Investment))
}
