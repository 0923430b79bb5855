//! `inventory_analysis`, `inventory_decisions`, and `demand_forecasts`
//! tables: the AI-collaborator-adjacent side effects of threshold
//! propagation, and of the `/ai/forecast` and `/ai/insights` endpoints.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{Store, StoreResult};

/// One `ModelClient`-produced trend analysis for a SKU.
#[derive(Debug, Clone)]
pub struct AnalysisRow {
    /// SKU analyzed.
    pub sku: String,
    /// Path this analysis was recorded against.
    pub location: String,
    /// Raw structured analysis payload.
    pub analysis: Value,
    /// Model-reported confidence, `0.0..=1.0`.
    pub confidence: f64,
    /// When the analysis was produced.
    pub timestamp: DateTime<Utc>,
}

/// One recorded reorder (or no-reorder) decision.
#[derive(Debug, Clone)]
pub struct DecisionRow {
    /// SKU the decision concerns.
    pub sku: String,
    /// Path this decision was recorded against.
    pub location: String,
    /// e.g. `"reorder"` or `"hold"`.
    pub decision_type: String,
    /// Free-text reasoning, echoing the analysis that drove the decision.
    pub reasoning: String,
    /// When the decision was recorded.
    pub timestamp: DateTime<Utc>,
}

/// One demand forecast produced by `/ai/forecast`.
#[derive(Debug, Clone)]
pub struct ForecastRow {
    /// SKU forecasted.
    pub sku: String,
    /// Path this forecast was recorded against.
    pub location: String,
    /// Predicted demand over the forecast horizon.
    pub predicted_demand: f64,
    /// Model-reported confidence, `0.0..=1.0`.
    pub confidence: f64,
    /// e.g. `"up"`, `"down"`, `"flat"`.
    pub trend_direction: String,
    /// Free-text reasoning.
    pub reasoning: String,
    /// The date this forecast covers.
    pub forecast_date: DateTime<Utc>,
}

mod sql {
    pub const INSERT_ANALYSIS: &str = "INSERT INTO inventory_analysis \
         (sku, location, analysis, confidence, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)";
    pub const SELECT_ANALYSIS: &str = "SELECT sku, location, analysis, confidence, timestamp \
         FROM inventory_analysis WHERE location = ?1 ORDER BY timestamp DESC LIMIT ?2";

    pub const INSERT_DECISION: &str = "INSERT INTO inventory_decisions \
         (sku, location, decision_type, reasoning, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)";
    pub const SELECT_DECISIONS: &str = "SELECT sku, location, decision_type, reasoning, timestamp \
         FROM inventory_decisions WHERE location = ?1 ORDER BY timestamp DESC LIMIT ?2";

    pub const INSERT_FORECAST: &str = "INSERT INTO demand_forecasts \
         (sku, location, predicted_demand, confidence, trend_direction, reasoning, forecast_date) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
    pub const SELECT_FORECASTS: &str = "SELECT sku, location, predicted_demand, confidence, trend_direction, \
         reasoning, forecast_date FROM demand_forecasts WHERE location = ?1 ORDER BY forecast_date DESC LIMIT ?2";
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Store {
    /// Record one trend analysis.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn insert_analysis(&self, row: &AnalysisRow) -> StoreResult<()> {
        sqlx::query(sql::INSERT_ANALYSIS)
            .bind(&row.sku)
            .bind(&row.location)
            .bind(row.analysis.to_string())
            .bind(row.confidence)
            .bind(row.timestamp.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Most recent analyses for `location`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn recent_analyses(&self, location: &str, limit: i64) -> StoreResult<Vec<AnalysisRow>> {
        let rows: Vec<(String, String, String, f64, String)> =
            sqlx::query_as(sql::SELECT_ANALYSIS)
                .bind(location)
                .bind(limit)
                .fetch_all(self.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(sku, location, analysis, confidence, timestamp)| AnalysisRow {
                sku,
                location,
                analysis: serde_json::from_str(&analysis).unwrap_or(Value::Null),
                confidence,
                timestamp: parse_ts(&timestamp),
            })
            .collect())
    }

    /// Record one reorder decision.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn insert_decision(&self, row: &DecisionRow) -> StoreResult<()> {
        sqlx::query(sql::INSERT_DECISION)
            .bind(&row.sku)
            .bind(&row.location)
            .bind(&row.decision_type)
            .bind(&row.reasoning)
            .bind(row.timestamp.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Most recent decisions for `location`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn recent_decisions(&self, location: &str, limit: i64) -> StoreResult<Vec<DecisionRow>> {
        let rows: Vec<(String, String, String, String, String)> =
            sqlx::query_as(sql::SELECT_DECISIONS)
                .bind(location)
                .bind(limit)
                .fetch_all(self.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(sku, location, decision_type, reasoning, timestamp)| DecisionRow {
                sku,
                location,
                decision_type,
                reasoning,
                timestamp: parse_ts(&timestamp),
            })
            .collect())
    }

    /// Record one demand forecast.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn insert_forecast(&self, row: &ForecastRow) -> StoreResult<()> {
        sqlx::query(sql::INSERT_FORECAST)
            .bind(&row.sku)
            .bind(&row.location)
            .bind(row.predicted_demand)
            .bind(row.confidence)
            .bind(&row.trend_direction)
            .bind(&row.reasoning)
            .bind(row.forecast_date.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Most recent forecasts for `location`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn recent_forecasts(&self, location: &str, limit: i64) -> StoreResult<Vec<ForecastRow>> {
        let rows: Vec<(String, String, f64, f64, String, String, String)> =
            sqlx::query_as(sql::SELECT_FORECASTS)
                .bind(location)
                .bind(limit)
                .fetch_all(self.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(
                |(sku, location, predicted_demand, confidence, trend_direction, reasoning, forecast_date)| {
                    ForecastRow {
                        sku,
                        location,
                        predicted_demand,
                        confidence,
                        trend_direction,
                        reasoning,
                        forecast_date: parse_ts(&forecast_date),
                    }
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use serde_json::json;

    #[tokio::test]
    async fn records_and_lists_analysis() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_analysis(&AnalysisRow {
                sku: "SKU-1".to_string(),
                location: "demo:/wh".to_string(),
                analysis: json!({"trend": "up"}),
                confidence: 0.8,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let rows = store.recent_analyses("demo:/wh", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].analysis, json!({"trend": "up"}));
    }

    #[tokio::test]
    async fn records_decision_and_forecast() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_decision(&DecisionRow {
                sku: "SKU-1".to_string(),
                location: "demo:/wh".to_string(),
                decision_type: "reorder".to_string(),
                reasoning: "below threshold".to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        store
            .insert_forecast(&ForecastRow {
                sku: "SKU-1".to_string(),
                location: "demo:/wh".to_string(),
                predicted_demand: 42.0,
                confidence: 0.5,
                trend_direction: "up".to_string(),
                reasoning: "seasonal".to_string(),
                forecast_date: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.recent_decisions("demo:/wh", 10).await.unwrap().len(), 1);
        assert_eq!(store.recent_forecasts("demo:/wh", 10).await.unwrap().len(), 1);
    }
}
