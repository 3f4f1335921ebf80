//! Default [`EvaluationSync`] implementation.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::store::EvaluationStore;
use crate::sync::{BoxFuture, EvaluationGateway, EvaluationSync, RefreshKind, RefreshSummary};
use crate::user::{UserContext, UserHolder};

/// Drives one refresh end to end: build the request from the stored cursor
/// and the attributes-updated flag, apply the response to the store, and
/// only then advance the cursor and clear the flag.
pub struct EvaluationInteractor {
    gateway: Arc<dyn EvaluationGateway>,
    store: Arc<EvaluationStore>,
    user_holder: Arc<UserHolder>,
    feature_tag: String,
}

impl EvaluationInteractor {
    pub fn new(
        gateway: Arc<dyn EvaluationGateway>,
        store: Arc<EvaluationStore>,
        user_holder: Arc<UserHolder>,
        feature_tag: String,
    ) -> Self {
        Self {
            gateway,
            store,
            user_holder,
            feature_tag,
        }
    }
}

impl EvaluationSync for EvaluationInteractor {
    fn fetch(
        &self,
        user: UserContext,
        timeout: Option<Duration>,
    ) -> BoxFuture<Result<RefreshSummary>> {
        let gateway = Arc::clone(&self.gateway);
        let store = Arc::clone(&self.store);
        let user_holder = Arc::clone(&self.user_holder);
        let feature_tag = self.feature_tag.clone();

        Box::pin(async move {
            let cursor = store.cursor(&user.id)?;
            let attributes_updated = user_holder.attributes_updated();

            let payload = gateway
                .get_evaluations(
                    user.clone(),
                    cursor,
                    attributes_updated,
                    feature_tag.clone(),
                    timeout,
                )
                .await?;

            let updated = !payload.evaluations.is_empty()
                || !payload.archived_feature_ids.is_empty()
                || payload.kind == RefreshKind::Full;

            // The cursor is committed in the same transaction as the rows;
            // a store failure here leaves the previous cursor in place.
            match payload.kind {
                RefreshKind::Full => {
                    store.replace_all(&user.id, &payload.evaluations, payload.cursor)?;
                }
                RefreshKind::Partial => {
                    store.merge(
                        &user.id,
                        &payload.evaluations,
                        &payload.archived_feature_ids,
                        payload.cursor,
                    )?;
                }
            }

            user_holder.clear_attributes_updated();
            tracing::debug!(
                user_id = %user.id,
                cursor = payload.cursor,
                evaluations = payload.evaluations.len(),
                "refresh applied"
            );

            Ok(RefreshSummary {
                elapsed: payload.elapsed,
                size_bytes: payload.size_bytes,
                feature_tag,
                updated,
            })
        })
    }
}
