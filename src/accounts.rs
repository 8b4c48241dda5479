//! Account read model shared by every slice.
//!
//! Slices only read from the book (fetching on first use); a completed
//! execute refreshes it through the [`ReadModels`] hooks rather than by
//! touching its maps.
use crate::client::{LedgerClient, LedgerResult, Position, ReadModels, WalletBalances};
use crate::key::{Identity, SubjectId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type AccountKey = (u64, String, SubjectId);

/// Bounds validation runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub wallet: WalletBalances,
    pub position: Position,
}

#[derive(Default)]
struct Books {
    wallets: HashMap<AccountKey, WalletBalances>,
    positions: HashMap<AccountKey, Position>,
}

pub struct AccountBook {
    client: Arc<dyn LedgerClient>,
    books: Mutex<Books>,
}

impl AccountBook {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self {
            client,
            books: Mutex::new(Books::default()),
        }
    }

    /// Cached snapshot, if both halves are known.
    pub fn cached(&self, identity: &Identity, subject: &SubjectId) -> Option<AccountSnapshot> {
        let key = account_key(identity, subject)?;
        let books = self.books();
        Some(AccountSnapshot {
            wallet: books.wallets.get(&key)?.clone(),
            position: books.positions.get(&key)?.clone(),
        })
    }

    /// Snapshot for `identity` in `subject`; `None` in read-only mode.
    ///
    /// Missing halves are fetched; `refetch` forces both.
    pub async fn fetch(
        &self,
        identity: &Identity,
        subject: &SubjectId,
        refetch: bool,
    ) -> LedgerResult<Option<AccountSnapshot>> {
        let Some(key) = account_key(identity, subject) else {
            return Ok(None);
        };
        let (wallet, position) = {
            let books = self.books();
            (
                books.wallets.get(&key).cloned().filter(|_| !refetch),
                books.positions.get(&key).cloned().filter(|_| !refetch),
            )
        };
        let wallet = match wallet {
            Some(wallet) => wallet,
            None => self.load_wallet(identity, subject, &key).await?,
        };
        let position = match position {
            Some(position) => position,
            None => self.load_position(identity, subject, &key).await?,
        };
        Ok(Some(AccountSnapshot { wallet, position }))
    }

    async fn load_wallet(
        &self,
        identity: &Identity,
        subject: &SubjectId,
        key: &AccountKey,
    ) -> LedgerResult<WalletBalances> {
        let wallet = self.client.wallet_balances(identity, subject).await?;
        self.books().wallets.insert(key.clone(), wallet.clone());
        Ok(wallet)
    }

    async fn load_position(
        &self,
        identity: &Identity,
        subject: &SubjectId,
        key: &AccountKey,
    ) -> LedgerResult<Position> {
        let position = self.client.position(identity, subject).await?;
        self.books().positions.insert(key.clone(), position.clone());
        Ok(position)
    }

    fn books(&self) -> MutexGuard<'_, Books> {
        self.books
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ReadModels for AccountBook {
    async fn refresh_balances(&self, identity: &Identity, subject: &SubjectId) {
        let Some(key) = account_key(identity, subject) else {
            return;
        };
        if let Err(err) = self.load_wallet(identity, subject, &key).await {
            self.books().wallets.remove(&key);
            tracing::warn!(subject = %subject, error = %err, "wallet refresh failed");
        }
    }

    async fn refresh_subject(&self, identity: &Identity, subject: &SubjectId) {
        let Some(key) = account_key(identity, subject) else {
            return;
        };
        if let Err(err) = self.load_position(identity, subject, &key).await {
            self.books().positions.remove(&key);
            tracing::warn!(subject = %subject, error = %err, "position refresh failed");
        }
    }
}

fn account_key(identity: &Identity, subject: &SubjectId) -> Option<AccountKey> {
    let signer = identity.signer()?;
    Some((identity.network_id, signer.to_string(), subject.clone()))
}
