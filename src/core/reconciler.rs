use crate::domain::model::{MatchStatus, MergedEntry, RemoteRecord};
use crate::domain::ports::{JsonCompletion, NameMatchStrategy};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_CANDIDATE_LIMIT: usize = 50;

/// 預設策略：不做模糊比對
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactOnly;

#[async_trait]
impl NameMatchStrategy for ExactOnly {
    fn strategy_name(&self) -> &'static str {
        "exact-only"
    }

    async fn best_match(&self, _name: &str, _candidates: &[String]) -> Result<Option<String>> {
        Ok(None)
    }
}

/// 以語意比對服務從候選名稱中挑出最接近的一個
pub struct SemanticNameMatch<C: JsonCompletion> {
    client: C,
}

impl<C: JsonCompletion> SemanticNameMatch<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

pub fn build_name_prompt(name: &str, candidates: &[String]) -> Result<String> {
    let candidates_json = serde_json::to_string(candidates)?;
    Ok(format!(
        r#"Find the best match for the nursery name '{name}' from the following list.
If no reasonable match exists, return null.

Candidates:
{candidates_json}

Return ONLY a JSON object: {{"match": "candidate_name_or_null"}}
"#
    ))
}

#[async_trait]
impl<C: JsonCompletion> NameMatchStrategy for SemanticNameMatch<C> {
    fn strategy_name(&self) -> &'static str {
        "semantic"
    }

    async fn best_match(&self, name: &str, candidates: &[String]) -> Result<Option<String>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let prompt = build_name_prompt(name, candidates)?;
        let response = self.client.complete_json(&prompt).await?;

        let Value::Object(obj) = &response else {
            return Err(EtlError::MatchingError {
                message: format!("expected a JSON object, got: {}", response),
            });
        };
        if let Some(error) = obj.get("error") {
            return Err(EtlError::MatchingError {
                message: format!("service reported an error: {}", error),
            });
        }
        Ok(match obj.get("match") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub primary_name_field: String,
    pub secondary_name_field: String,
    pub candidate_limit: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            primary_name_field: "name".to_string(),
            secondary_name_field: "保育園".to_string(),
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub matched: usize,
    pub unmatched: usize,
    pub fuzzy_matched: usize,
    /// 副資料中出現多次的名稱；查詢表保留最後一筆
    pub duplicate_keys: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub entries: Vec<MergedEntry>,
    pub summary: ReconcileSummary,
}

pub struct RecordReconciler<N: NameMatchStrategy> {
    options: ReconcileOptions,
    fallback: N,
}

impl RecordReconciler<ExactOnly> {
    pub fn exact(options: ReconcileOptions) -> Self {
        Self::new(options, ExactOnly)
    }
}

impl<N: NameMatchStrategy> RecordReconciler<N> {
    pub fn new(options: ReconcileOptions, fallback: N) -> Self {
        Self { options, fallback }
    }

    pub async fn reconcile(
        &self,
        primary: Vec<RemoteRecord>,
        secondary: Vec<RemoteRecord>,
    ) -> Reconciliation {
        let mut summary = ReconcileSummary::default();

        let mut lookup: HashMap<String, RemoteRecord> = HashMap::new();
        // 候選名稱保持輸入順序，送給後備策略時才穩定
        let mut candidate_order: Vec<String> = Vec::new();
        for record in secondary {
            let name = record.text(&self.options.secondary_name_field);
            if name.is_empty() {
                continue;
            }
            if lookup.insert(name.clone(), record).is_some() {
                if !summary.duplicate_keys.contains(&name) {
                    summary.duplicate_keys.push(name);
                }
            } else {
                candidate_order.push(name);
            }
        }

        if !summary.duplicate_keys.is_empty() {
            let message = format!(
                "{} secondary names appear more than once; the last record was used for: {}",
                summary.duplicate_keys.len(),
                summary.duplicate_keys.join(", ")
            );
            tracing::warn!("⚠️ {}", message);
            summary.warnings.push(message);
        }

        let candidates: Vec<String> = candidate_order
            .into_iter()
            .take(self.options.candidate_limit)
            .collect();

        let mut entries = Vec::with_capacity(primary.len());
        for master in primary {
            let name = master.text(&self.options.primary_name_field);
            let mut found = lookup.get(&name).cloned();

            if found.is_none() && !name.is_empty() {
                match self.fallback.best_match(&name, &candidates).await {
                    Ok(Some(candidate)) => {
                        // 服務回傳的名稱必須是既有的鍵
                        found = lookup.get(&candidate).cloned();
                        if found.is_some() {
                            tracing::debug!("Fuzzy matched '{}' -> '{}'", name, candidate);
                            summary.fuzzy_matched += 1;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let message = format!(
                            "{} fallback failed for '{}': {}",
                            self.fallback.strategy_name(),
                            name,
                            e
                        );
                        tracing::warn!("⚠️ {}", message);
                        summary.warnings.push(message);
                    }
                }
            }

            let status = if found.is_some() {
                summary.matched += 1;
                MatchStatus::Matched
            } else {
                summary.unmatched += 1;
                MatchStatus::Unmatched
            };

            entries.push(MergedEntry {
                master,
                secondary: found,
                status,
            });
        }

        tracing::info!(
            "🔗 Reconciled {} records: {} matched, {} unmatched",
            entries.len(),
            summary.matched,
            summary.unmatched
        );

        Reconciliation { entries, summary }
    }
}
