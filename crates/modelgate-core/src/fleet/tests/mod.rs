mod selector_tests;
mod state_tests;

use super::*;
use modelgate_types::{Account, AuthData};

pub(crate) fn test_account(id: &str, provider_id: &str) -> Account {
    Account::new(id, provider_id, AuthData::from_api_key(format!("key-{id}")))
}

pub(crate) fn test_store() -> AccountStateStore {
    AccountStateStore::new(60, 3600)
}
