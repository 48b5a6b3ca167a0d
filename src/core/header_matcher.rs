use crate::domain::model::{HeaderLabel, HeaderMapping};
use crate::domain::ports::{HeaderMatcher, JsonCompletion};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

/// 只接受位元組完全相同的表頭
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactHeaderMatcher;

impl ExactHeaderMatcher {
    pub fn build_mapping(pdf_headers: &[HeaderLabel], target_headers: &[String]) -> HeaderMapping {
        let targets: HashSet<&str> = target_headers.iter().map(String::as_str).collect();
        HeaderMapping::from_entries(pdf_headers.iter().map(|h| {
            let target = targets.contains(h.as_str()).then(|| h.clone());
            (h.clone(), target)
        }))
    }
}

#[async_trait]
impl HeaderMatcher for ExactHeaderMatcher {
    fn strategy_name(&self) -> &'static str {
        "exact"
    }

    async fn match_headers(
        &self,
        pdf_headers: &[HeaderLabel],
        target_headers: &[String],
    ) -> Result<HeaderMapping> {
        Ok(Self::build_mapping(pdf_headers, target_headers))
    }
}

/// 交給語意比對服務判斷名稱不同但意義相同的表頭
pub struct AssistedHeaderMatcher<C: JsonCompletion> {
    client: C,
}

impl<C: JsonCompletion> AssistedHeaderMatcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

pub fn build_header_prompt(pdf_headers: &[HeaderLabel], target_headers: &[String]) -> Result<String> {
    let pdf_json = serde_json::to_string(pdf_headers)?;
    let target_json = serde_json::to_string(target_headers)?;

    Ok(format!(
        r#"You are a data mapping assistant.

I have two lists of column headers:
1. PDF Headers (from a nursery facilities list PDF):
   {pdf_json}
   *Note: Some PDF headers are merged from 2 rows, joined by '_'.
   Example: "ParentCategory_ChildItem" means the column is "ChildItem" under "ParentCategory".

2. Spreadsheet Headers (the target columns):
   {target_json}

Your task: For each PDF header, find the matching Spreadsheet header.
Headers may have slightly different names but mean the same thing.

Matching Examples:
- PDF: "施設名称" -> Sheet: "保育施設名"
- PDF: "保育施設定員_乳児" -> Sheet: "乳児（定員）" (Matches ChildItem and ParentCategory context)
- PDF: "在籍児童数（従業員枠_自社枠）_1・2歳児" -> Sheet: "1・2歳児（従業員枠_自社枠）"

Return a JSON object where:
- Keys are the PDF header names (exactly as given)
- Values are the matching Spreadsheet header names (exactly as given)
- If no match is found, use null

Only match headers that clearly refer to the same data.
"#
    ))
}

/// 回應必須是物件且沒有頂層 `error`；不完整的結果整個捨棄
pub fn parse_mapping_response(
    pdf_headers: &[HeaderLabel],
    target_headers: &[String],
    response: &Value,
) -> Result<HeaderMapping> {
    let Value::Object(obj) = response else {
        return Err(EtlError::MatchingError {
            message: format!("expected a JSON object, got: {}", response),
        });
    };

    if let Some(error) = obj.get("error") {
        return Err(EtlError::MatchingError {
            message: format!("service reported an error: {}", error),
        });
    }

    let known: HashSet<&str> = pdf_headers.iter().map(String::as_str).collect();
    let unknown_keys = obj.keys().filter(|k| !known.contains(k.as_str())).count();
    if unknown_keys > 0 {
        tracing::debug!("Ignoring {} mapping keys that are not PDF headers", unknown_keys);
    }

    // 不在目標表頭內的值、或已被其他來源佔用的目標，一律視為無對應
    let targets: HashSet<&str> = target_headers.iter().map(String::as_str).collect();
    let mut claimed: HashSet<&str> = HashSet::new();
    Ok(HeaderMapping::from_entries(pdf_headers.iter().map(|h| {
        let target = match obj.get(h) {
            Some(Value::String(s)) if targets.contains(s.as_str()) => {
                if claimed.insert(s.as_str()) {
                    Some(s.clone())
                } else {
                    tracing::debug!("Target '{}' already mapped, dropping it for '{}'", s, h);
                    None
                }
            }
            Some(Value::String(s)) if !s.is_empty() => {
                tracing::debug!("Ignoring unknown target '{}' for '{}'", s, h);
                None
            }
            _ => None,
        };
        (h.clone(), target)
    })))
}

#[async_trait]
impl<C: JsonCompletion> HeaderMatcher for AssistedHeaderMatcher<C> {
    fn strategy_name(&self) -> &'static str {
        "assisted"
    }

    async fn match_headers(
        &self,
        pdf_headers: &[HeaderLabel],
        target_headers: &[String],
    ) -> Result<HeaderMapping> {
        let prompt = build_header_prompt(pdf_headers, target_headers)?;
        tracing::debug!(
            "Requesting semantic header match for {} PDF headers against {} targets",
            pdf_headers.len(),
            target_headers.len()
        );
        let response = self.client.complete_json(&prompt).await?;
        parse_mapping_response(pdf_headers, target_headers, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    struct StubCompletion {
        response: Result<Value>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubCompletion {
        fn ok(value: Value) -> Self {
            Self {
                response: Ok(value),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(EtlError::MatchingError {
                    message: "not json".to_string(),
                }),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JsonCompletion for StubCompletion {
        async fn complete_json(&self, prompt: &str) -> Result<Value> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.response {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(EtlError::MatchingError {
                    message: e.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_exact_identical_lists_fully_match_in_any_order() {
        let pdf = labels(&["施設名称", "住所", "定員"]);
        let target = labels(&["定員", "施設名称", "住所"]);

        let mapping = ExactHeaderMatcher.match_headers(&pdf, &target).await.unwrap();
        let reversed = ExactHeaderMatcher
            .match_headers(&pdf.iter().rev().cloned().collect::<Vec<_>>(), &target)
            .await
            .unwrap();

        assert_eq!(mapping.matched_count(), 3);
        assert_eq!(mapping, reversed);
        for h in &pdf {
            assert_eq!(mapping.target_for(h), Some(h.as_str()));
        }
    }

    #[tokio::test]
    async fn test_exact_disjoint_lists_are_all_null() {
        let pdf = labels(&["施設名称", "保育施設定員_乳児"]);
        let target = labels(&["保育施設名", "乳児（定員）"]);

        let mapping = ExactHeaderMatcher.match_headers(&pdf, &target).await.unwrap();

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.matched_count(), 0);
    }

    #[test]
    fn test_exact_is_byte_identical_only() {
        let mapping = ExactHeaderMatcher::build_mapping(&labels(&["施設名 "]), &labels(&["施設名"]));
        assert_eq!(mapping.target_for("施設名 "), None);
    }

    #[tokio::test]
    async fn test_assisted_uses_service_mapping() {
        let stub = StubCompletion::ok(json!({
            "施設名称": "保育施設名",
            "保育施設定員_乳児": "乳児（定員）",
            "備考": null,
            "幻の列": "X"
        }));
        let matcher = AssistedHeaderMatcher::new(stub);
        let pdf = labels(&["施設名称", "保育施設定員_乳児", "備考"]);
        let target = labels(&["保育施設名", "乳児（定員）"]);

        let mapping = matcher.match_headers(&pdf, &target).await.unwrap();

        assert_eq!(mapping.target_for("施設名称"), Some("保育施設名"));
        assert_eq!(mapping.target_for("保育施設定員_乳児"), Some("乳児（定員）"));
        assert_eq!(mapping.target_for("備考"), None);
        assert!(!mapping.contains_source("幻の列"));

        let prompts = matcher.client.prompts.lock().unwrap();
        assert!(prompts[0].contains("\"施設名称\""));
        assert!(prompts[0].contains("joined by '_'"));
    }

    #[tokio::test]
    async fn test_assisted_drops_unknown_and_reused_targets() {
        let matcher = AssistedHeaderMatcher::new(StubCompletion::ok(json!({
            "施設名称": "保育施設名",
            "施設名称_カナ": "保育施設名",
            "所在地": "住所（番地）"
        })));
        let pdf = labels(&["施設名称", "施設名称_カナ", "所在地"]);
        let target = labels(&["保育施設名", "住所"]);

        let mapping = matcher.match_headers(&pdf, &target).await.unwrap();

        assert_eq!(mapping.target_for("施設名称"), Some("保育施設名"));
        assert_eq!(mapping.target_for("施設名称_カナ"), None);
        assert_eq!(mapping.target_for("所在地"), None);
        assert_eq!(mapping.matched_count(), 1);
    }

    #[tokio::test]
    async fn test_assisted_error_field_is_unusable() {
        let matcher = AssistedHeaderMatcher::new(StubCompletion::ok(json!({
            "error": "quota exceeded",
            "施設名称": "保育施設名"
        })));

        let result = matcher
            .match_headers(&labels(&["施設名称"]), &labels(&["保育施設名"]))
            .await;

        assert!(matches!(result, Err(EtlError::MatchingError { .. })));
    }

    #[tokio::test]
    async fn test_assisted_non_object_is_unusable() {
        let matcher = AssistedHeaderMatcher::new(StubCompletion::ok(json!(["施設名称"])));
        let result = matcher.match_headers(&labels(&["施設名称"]), &labels(&["x"])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_assisted_transport_failure_propagates() {
        let matcher = AssistedHeaderMatcher::new(StubCompletion::failing());
        let result = matcher.match_headers(&labels(&["a"]), &labels(&["a"])).await;
        tokio_test::assert_err!(result);
    }
}
