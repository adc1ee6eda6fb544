//! Reference reconciliation for one game.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::debug;
use uuid::Uuid;

use super::payload::GameRelations;
use crate::error::SyncError;
use crate::models::reference::ReferenceKind;
use crate::repositories::reference;

#[derive(Clone)]
pub struct RelationReconciler {
    db: Arc<DatabaseConnection>,
}

impl RelationReconciler {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Replaces every association set of `game_id` with the sets in `relations`.
    ///
    /// Each kind commits in its own transaction, so a failure leaves earlier
    /// kinds replaced and later kinds untouched, never half-written.
    pub async fn reconcile(&self, game_id: Uuid, relations: &GameRelations) -> Result<(), SyncError> {
        for kind in ReferenceKind::ALL {
            self.reconcile_kind(game_id, kind, relations).await?;
        }
        Ok(())
    }

    async fn reconcile_kind(
        &self,
        game_id: Uuid,
        kind: ReferenceKind,
        relations: &GameRelations,
    ) -> Result<(), SyncError> {
        let items = reference::dedupe_items(relations.items(kind));

        let txn = self.db.begin().await?;
        let ids = reference::find_or_create(&txn, kind, &items).await?;
        let links: Vec<_> = items
            .iter()
            .filter_map(|item| ids.get(&item.external_id).map(|id| (*id, item.roles)))
            .collect();
        reference::replace_links(&txn, kind, game_id, &links).await?;
        txn.commit().await?;

        debug!(%game_id, kind = %kind, count = links.len(), "Replaced associations");
        Ok(())
    }
}
