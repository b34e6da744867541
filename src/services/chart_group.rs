//! Chart group membership

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::legacy::ChartGroupEntry;
use crate::error::GitOpsResult;
use crate::store::ChartGroupEntryRepository;

/// Requested member of a chart group; `id == 0` adds a new entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartGroupEntryRequest {
    pub id: i32,
    pub app_store_values_version_id: i32,
    pub app_store_application_version_id: i32,
}

pub struct ChartGroupService {
    entries: Arc<dyn ChartGroupEntryRepository>,
}

impl ChartGroupService {
    pub fn new(entries: Arc<dyn ChartGroupEntryRepository>) -> Self {
        Self { entries }
    }

    /// Make the group's live entries match `requested`
    ///
    /// Existing entries named in the request are updated, the rest are
    /// soft-deleted and id-less requests are created. Returns every written
    /// row, new entries first.
    pub async fn update_chart_group_entries(
        &self,
        chart_group_id: i32,
        requested: &[ChartGroupEntryRequest],
        user_id: i32,
    ) -> GitOpsResult<Vec<ChartGroupEntry>> {
        let now = Utc::now();
        let by_id: HashMap<i32, &ChartGroupEntryRequest> = requested
            .iter()
            .filter(|r| r.id != 0)
            .map(|r| (r.id, r))
            .collect();

        let update: Vec<ChartGroupEntry> = self
            .entries
            .find_by_group(chart_group_id)
            .await?
            .into_iter()
            .map(|mut existing| {
                match by_id.get(&existing.id) {
                    Some(req) => {
                        existing.app_store_values_version_id = req.app_store_values_version_id;
                        existing.app_store_application_version_id = req.app_store_application_version_id;
                    }
                    None => existing.deleted = true,
                }
                existing.updated_on = Some(now);
                existing.updated_by = user_id;
                existing
            })
            .collect();

        let save: Vec<ChartGroupEntry> = requested
            .iter()
            .filter(|r| r.id == 0)
            .map(|r| ChartGroupEntry {
                id: 0,
                chart_group_id,
                app_store_values_version_id: r.app_store_values_version_id,
                app_store_application_version_id: r.app_store_application_version_id,
                deleted: false,
                created_on: Some(now),
                created_by: user_id,
                updated_on: Some(now),
                updated_by: user_id,
            })
            .collect();

        debug!(
            chart_group_id,
            created = save.len(),
            updated = update.len(),
            "Writing chart group entries"
        );
        Ok(self
            .entries
            .save_and_update_in_transaction(save, update)
            .await?)
    }
}
