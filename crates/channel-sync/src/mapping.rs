//! Field mapping between channel records and the internal inventory record.

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// An inventory record in internal terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub product_id: ProductId,
    pub quantity: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Names of the external fields holding each internal field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub product_id: String,
    pub quantity: String,
    pub updated_at: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            product_id: "sku".to_string(),
            quantity: "quantity".to_string(),
            updated_at: "updated_at".to_string(),
        }
    }
}

impl FieldMapping {
    pub fn new(
        product_id: impl Into<String>,
        quantity: impl Into<String>,
        updated_at: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            quantity: quantity.into(),
            updated_at: updated_at.into(),
        }
    }

    /// Maps an external record to a [`ChannelRecord`].
    ///
    /// Quantities may be JSON numbers or numeric strings. A missing or
    /// unparsable timestamp maps to `None`.
    pub fn map_record(&self, record: &Value) -> Result<ChannelRecord, SyncError> {
        let object = record
            .as_object()
            .ok_or_else(|| SyncError::InvalidRecord(format!("expected an object, got {record}")))?;

        let product_id = match object.get(&self.product_id) {
            Some(Value::String(s)) if !s.is_empty() => ProductId::new(s.as_str()),
            Some(Value::Number(n)) => ProductId::new(n.to_string()),
            _ => {
                return Err(SyncError::InvalidRecord(format!(
                    "missing field '{}'",
                    self.product_id
                )));
            }
        };

        let quantity = match object.get(&self.quantity) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .and_then(|q| u32::try_from(q).ok())
        .ok_or_else(|| {
            SyncError::InvalidRecord(format!(
                "field '{}' of {product_id} is not a non-negative quantity",
                self.quantity
            ))
        })?;

        let updated_at = object
            .get(&self.updated_at)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(ChannelRecord {
            product_id,
            quantity,
            updated_at,
        })
    }

    /// Maps an internal record to the channel's field names.
    pub fn to_external(&self, record: &ChannelRecord) -> Value {
        let mut object = Map::new();
        object.insert(
            self.product_id.clone(),
            Value::String(record.product_id.to_string()),
        );
        object.insert(self.quantity.clone(), Value::from(record.quantity));
        if let Some(updated_at) = record.updated_at {
            object.insert(
                self.updated_at.clone(),
                Value::String(updated_at.to_rfc3339()),
            );
        }
        Value::Object(object)
    }
}
