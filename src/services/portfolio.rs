//! Portfolio Service
//!
//! Account management, deposits and transfers, holdings and watchlist
//! reads. Every operation that writes more than one row runs in the
//! store's transactional scope and appends its audit row inside it.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::portfolio::{self, InsertAccountParams, InsertAuditLogParams};
use crate::db::PortfolioStore;
use crate::error::AppError;
use crate::models::portfolio::{
    Account, CreateAccountRequest, Currency, Holding, PortfolioSummary, Transaction,
    TransactionType, WatchlistItem,
};

/// Opening balance every simulated account starts with.
const OPENING_BALANCE: Decimal = Decimal::from_parts(500, 0, 0, false, 0);

pub struct PortfolioService {
    store: PortfolioStore,
}

impl PortfolioService {
    pub fn new(store: PortfolioStore) -> Self {
        Self { store }
    }

    /// Create an account seeded with the simulated opening balance; the
    /// seed is recorded as a DEPOSIT audit row in the same transaction.
    pub async fn create_account(&self, req: CreateAccountRequest) -> Result<Account, AppError> {
        let account_number = generate_account_number();

        self.store
            .with_transaction(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let account = portfolio::insert_account(
                        &mut *conn,
                        InsertAccountParams {
                            user_id: req.user_id,
                            account_number,
                            account_type: req.account_type,
                            currency: req.currency,
                            balance: OPENING_BALANCE,
                        },
                    )
                    .await?;

                    portfolio::insert_audit_log(
                        &mut *conn,
                        InsertAuditLogParams {
                            account_id: account.id,
                            transaction_type: TransactionType::Deposit,
                            amount: OPENING_BALANCE,
                            description: "Initial Deposit".to_string(),
                            reference_id: None,
                        },
                    )
                    .await?;

                    Ok(account)
                })
            })
            .await
    }

    pub async fn delete_account(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete_account(id).await
    }

    pub async fn get_account(&self, id: Uuid) -> Result<Account, AppError> {
        self.store.get_account_by_id(id).await
    }

    pub async fn get_portfolio_summary(&self, user_id: Uuid) -> Result<PortfolioSummary, AppError> {
        let accounts = self.store.get_accounts_by_user_id(user_id).await?;
        let total_balance = accounts.iter().map(|acc| acc.balance).sum();

        Ok(PortfolioSummary {
            accounts,
            total_balance,
        })
    }

    pub async fn get_holdings(&self, account_id: Uuid) -> Result<Vec<Holding>, AppError> {
        self.store.get_holdings_by_account_id(account_id).await
    }

    pub async fn get_holding(&self, account_id: Uuid, symbol: &str) -> Result<Holding, AppError> {
        self.store
            .get_holding(account_id, symbol)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("no holding for {} in account {}", symbol, account_id))
            })
    }

    /// Transactions for an account; the account itself must exist.
    pub async fn get_transactions(&self, account_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        self.store.get_account_by_id(account_id).await?;
        self.store.get_transactions_by_account_id(account_id).await
    }

    /// Credit an account. The deposit currency, when supplied, must match
    /// the account's.
    pub async fn deposit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        currency: Option<Currency>,
    ) -> Result<Account, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::invalid_argument("deposit amount must be positive"));
        }

        self.store
            .with_transaction(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let account = portfolio::get_account_by_id(&mut *conn, account_id).await?;

                    if let Some(currency) = currency {
                        if currency != account.currency {
                            return Err(AppError::invalid_argument(format!(
                                "currency mismatch: account is {}, deposit is {}",
                                account.currency, currency
                            )));
                        }
                    }

                    let updated =
                        portfolio::update_account_balance(&mut *conn, account_id, amount).await?;

                    portfolio::insert_audit_log(
                        &mut *conn,
                        InsertAuditLogParams {
                            account_id,
                            transaction_type: TransactionType::Deposit,
                            amount,
                            description: "Manual Deposit".to_string(),
                            reference_id: None,
                        },
                    )
                    .await?;

                    Ok(updated)
                })
            })
            .await
    }

    /// Move funds between two same-currency accounts; both audit rows
    /// reference the counter-account.
    pub async fn transfer(
        &self,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: Decimal,
        currency: Option<Currency>,
    ) -> Result<(), AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::invalid_argument(
                "transfer amount must be positive",
            ));
        }
        if from_account_id == to_account_id {
            return Err(AppError::invalid_argument(
                "cannot transfer to the same account",
            ));
        }

        self.store
            .with_transaction(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let from = portfolio::get_account_by_id(&mut *conn, from_account_id).await?;
                    let to = portfolio::get_account_by_id(&mut *conn, to_account_id).await?;

                    if let Some(currency) = currency {
                        if currency != from.currency {
                            return Err(AppError::invalid_argument(format!(
                                "currency mismatch: source account is {}, transfer is {}",
                                from.currency, currency
                            )));
                        }
                    }

                    if from.currency != to.currency {
                        return Err(AppError::invalid_argument(format!(
                            "cross-currency transfer not supported ({} -> {})",
                            from.currency, to.currency
                        )));
                    }

                    // The balance predicate turns an overdraft into a
                    // conflict and rolls the whole transfer back.
                    portfolio::update_account_balance(&mut *conn, from_account_id, -amount).await?;
                    portfolio::update_account_balance(&mut *conn, to_account_id, amount).await?;

                    portfolio::insert_audit_log(
                        &mut *conn,
                        InsertAuditLogParams {
                            account_id: from_account_id,
                            transaction_type: TransactionType::TransferOut,
                            amount,
                            description: format!("Transfer to {}", to.account_number),
                            reference_id: Some(to_account_id),
                        },
                    )
                    .await?;

                    portfolio::insert_audit_log(
                        &mut *conn,
                        InsertAuditLogParams {
                            account_id: to_account_id,
                            transaction_type: TransactionType::TransferIn,
                            amount,
                            description: format!("Transfer from {}", from.account_number),
                            reference_id: Some(from_account_id),
                        },
                    )
                    .await?;

                    Ok(())
                })
            })
            .await
    }

    // ==================== Watchlist ====================

    pub async fn add_to_watchlist(&self, user_id: Uuid, symbol: &str) -> Result<(), AppError> {
        self.store.add_to_watchlist(user_id, symbol).await
    }

    pub async fn remove_from_watchlist(&self, user_id: Uuid, symbol: &str) -> Result<(), AppError> {
        self.store.remove_from_watchlist(user_id, symbol).await
    }

    pub async fn get_watchlist(&self, user_id: Uuid) -> Result<Vec<WatchlistItem>, AppError> {
        self.store.get_watchlist(user_id).await
    }
}

/// Human-readable account number: twelve hex characters from a fresh id.
fn generate_account_number() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn opening_balance_is_five_hundred() {
        assert_eq!(OPENING_BALANCE, dec!(500));
    }

    #[test]
    fn account_numbers_are_twelve_chars_and_unique() {
        let a = generate_account_number();
        let b = generate_account_number();
        assert_eq!(a.len(), 12);
        assert_eq!(b.len(), 12);
        assert_ne!(a, b);
    }
}
