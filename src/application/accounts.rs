use crate::domain::account::{Account, AccountId, Role};
use crate::domain::geo::Location;
use crate::domain::ports::{Sequence, StoreHandle};
use crate::error::{LogisticsError, Result};
use tracing::{info, instrument};

/// Hospitals, vendors and admins known to the marketplace.
#[derive(Clone)]
pub struct AccountRegistry {
    store: StoreHandle,
}

impl AccountRegistry {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    #[instrument(skip(self, location))]
    pub async fn register(
        &self,
        name: &str,
        role: Role,
        location: Option<Location>,
    ) -> Result<Account> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LogisticsError::ValidationError(
                "Account name must not be blank".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        let account = Account {
            id: uow.next_id(Sequence::Account).await?,
            name: name.to_string(),
            role,
            location,
            created_at: uow.now().await?,
        };
        uow.put_account(&account).await?;
        uow.commit().await?;

        info!(account_id = account.id, "account registered");
        Ok(account)
    }

    pub async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        self.store.account(id).await
    }

    pub async fn require(&self, id: AccountId) -> Result<Account> {
        self.get(id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Account", id))
    }

    pub async fn list(&self, role: Option<Role>) -> Result<Vec<Account>> {
        self.store.accounts(role).await
    }
}
