//! Typed dashboard queries on top of the query engine.
//!
//! Every read goes through a [`QueryBinding`] keyed by [`query_keys`], so
//! several panels showing the same data share one cache entry. Card freezes
//! go through a [`Mutation`] that flips the cached card list optimistically
//! and restores it if the server refuses.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::models::card::with_status;
use crate::models::{Account, Card, CardStatus, CryptoHolding, Loan, Transaction};
use crate::query::{
    Mutation, MutationOptions, QueryBinding, QueryClient, QueryData, QueryOptions,
};

/// Keys for every dashboard query. Transactions nest under their account so
/// invalidating `accounts()` also drops them.
pub mod query_keys {
    use crate::query::QueryKey;
    use crate::query_key;

    pub fn accounts() -> QueryKey {
        query_key!["accounts"]
    }

    pub fn account_transactions(account_id: &str) -> QueryKey {
        query_key!["accounts", account_id, "transactions"]
    }

    pub fn cards() -> QueryKey {
        query_key!["cards"]
    }

    pub fn loans() -> QueryKey {
        query_key!["loans"]
    }

    pub fn crypto() -> QueryKey {
        query_key!["crypto"]
    }
}

/// Variables of a freeze/unfreeze request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezeCard {
    pub card_id: String,
    pub frozen: bool,
}

impl FreezeCard {
    pub fn freeze(card_id: impl Into<String>) -> Self {
        Self {
            card_id: card_id.into(),
            frozen: true,
        }
    }

    pub fn unfreeze(card_id: impl Into<String>) -> Self {
        Self {
            card_id: card_id.into(),
            frozen: false,
        }
    }

    fn target_status(&self) -> CardStatus {
        if self.frozen {
            CardStatus::Frozen
        } else {
            CardStatus::Active
        }
    }
}

/// Card list as it was before the optimistic write, if one was cached.
pub type CardsSnapshot = Option<Vec<Card>>;

/// Mutation options for freezing a card.
///
/// `freeze` performs the write; `reload` refetches the card list once the
/// write settles and the cached list has been invalidated.
pub fn freeze_card_options<F, Fut, L, LFut>(
    client: &QueryClient,
    freeze: F,
    reload: L,
) -> MutationOptions<FreezeCard, Card, CardsSnapshot>
where
    F: Fn(FreezeCard) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Card>> + Send + 'static,
    L: Fn() -> LFut + Send + Sync + 'static,
    LFut: Future<Output = anyhow::Result<Vec<Card>>> + Send + 'static,
{
    let reload = Arc::new(reload);
    let on_mutate_client = client.clone();
    let on_error_client = client.clone();
    let on_settled_client = client.clone();

    MutationOptions::new(freeze)
        .on_mutate(move |request: &FreezeCard| {
            let key = query_keys::cards();
            let previous = on_mutate_client.get_query_data::<Vec<Card>>(&key);
            if let Some(cards) = &previous {
                let optimistic = with_status(cards, &request.card_id, request.target_status());
                if let Err(err) = on_mutate_client.set_query_data(&key, &optimistic) {
                    warn!(card_id = %request.card_id, error = %err, "Optimistic card update failed");
                }
            }
            previous
        })
        .on_error(move |err, request, snapshot: Option<&CardsSnapshot>| {
            let Some(Some(previous)) = snapshot else {
                return;
            };
            debug!(card_id = %request.card_id, error = %err, "Rolling back card list");
            if let Err(err) = on_error_client.set_query_data(&query_keys::cards(), previous) {
                warn!(card_id = %request.card_id, error = %err, "Card list rollback failed");
            }
        })
        .on_settled(move |_, _, _| {
            let client = on_settled_client.clone();
            client.invalidate_queries(Some(&query_keys::cards()));
            let reload = Arc::clone(&reload);
            tokio::spawn(async move {
                let key = query_keys::cards();
                client.prefetch_query(&key, || (*reload)()).await;
            });
        })
}

/// Query client and transport wired together.
#[derive(Clone)]
pub struct Dashboard {
    client: QueryClient,
    api: ApiClient,
}

impl Dashboard {
    pub fn new(client: QueryClient, api: ApiClient) -> Self {
        Self { client, api }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn accounts_query(&self) -> QueryOptions<Vec<Account>> {
        let api = self.api.clone();
        self.client.query_options(query_keys::accounts(), move || {
            let api = api.clone();
            async move { api.fetch_accounts().await }
        })
    }

    pub fn transactions_query(&self, account_id: &str) -> QueryOptions<Vec<Transaction>> {
        let api = self.api.clone();
        let id = account_id.to_string();
        self.client
            .query_options(query_keys::account_transactions(account_id), move || {
                let api = api.clone();
                let id = id.clone();
                async move { api.fetch_transactions(&id).await }
            })
    }

    pub fn cards_query(&self) -> QueryOptions<Vec<Card>> {
        let api = self.api.clone();
        self.client.query_options(query_keys::cards(), move || {
            let api = api.clone();
            async move { api.fetch_cards().await }
        })
    }

    pub fn loans_query(&self) -> QueryOptions<Vec<Loan>> {
        let api = self.api.clone();
        self.client.query_options(query_keys::loans(), move || {
            let api = api.clone();
            async move { api.fetch_loans().await }
        })
    }

    pub fn crypto_query(&self) -> QueryOptions<Vec<CryptoHolding>> {
        let api = self.api.clone();
        self.client.query_options(query_keys::crypto(), move || {
            let api = api.clone();
            async move { api.fetch_crypto_holdings().await }
        })
    }

    pub fn watch<T: QueryData>(&self, options: QueryOptions<T>) -> QueryBinding<T> {
        self.client.watch_query(options)
    }

    /// Warm the cache for the overview panels concurrently.
    pub async fn prefetch_overview(&self) {
        let (accounts, cards, loans, crypto) = (
            self.api.clone(),
            self.api.clone(),
            self.api.clone(),
            self.api.clone(),
        );
        let accounts_key = query_keys::accounts();
        let cards_key = query_keys::cards();
        let loans_key = query_keys::loans();
        let crypto_key = query_keys::crypto();
        tokio::join!(
            self.client.prefetch_query(&accounts_key, || async move {
                accounts.fetch_accounts().await
            }),
            self.client
                .prefetch_query(&cards_key, || async move { cards.fetch_cards().await }),
            self.client
                .prefetch_query(&loans_key, || async move { loans.fetch_loans().await }),
            self.client.prefetch_query(&crypto_key, || async move {
                crypto.fetch_crypto_holdings().await
            }),
        );
    }

    pub fn freeze_card(&self) -> Mutation<FreezeCard, Card, CardsSnapshot> {
        let writer = self.api.clone();
        let reader = self.api.clone();
        self.client.mutation(freeze_card_options(
            &self.client,
            move |request: FreezeCard| {
                let api = writer.clone();
                async move { api.set_card_frozen(&request.card_id, request.frozen).await }
            },
            move || {
                let api = reader.clone();
                async move { api.fetch_cards().await }
            },
        ))
    }
}
