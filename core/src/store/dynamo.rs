//! DynamoDB store backend.
//!
//! One physical table holds every entity: composite primary key of `pk`
//! (hash) and `sk` (range), a `version` number attribute, an `itemType`
//! discriminant, and the entity's own attributes flattened alongside.
//! Records are serialized through `serde_json` and converted attribute by
//! attribute, so the entity structs stay the single source of truth for
//! the item layout.
//!
//! Conditional writes map [`PutCondition`] onto DynamoDB condition
//! expressions; a `ConditionalCheckFailedException` surfaces as
//! [`StoreError::ConditionFailed`] and everything else as
//! [`StoreError::Unavailable`].

use std::collections::HashMap;

use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::errors::StoreError;
use crate::store::{PutCondition, Record, RecordKey, Store};
use crate::types::Entity;

const PK_ATTR: &str = "pk";
const SK_ATTR: &str = "sk";
const VERSION_ATTR: &str = "version";

/// [`Store`] backed by a single DynamoDB table.
#[derive(Debug, Clone)]
pub struct DynamoStore {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoStore {
    /// Creates a store over an existing client and table.
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// The table this store reads and writes.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Creates the backing table if it does not exist yet.
    ///
    /// On-demand billing, `pk` hash key and `sk` range key. Safe to call
    /// repeatedly; an existing table is left untouched.
    pub async fn create_table_if_missing(&self) -> Result<(), StoreError> {
        let exists = match self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                if e.to_string().contains("ResourceNotFoundException") {
                    false
                } else {
                    return Err(StoreError::Unavailable(e.to_string()));
                }
            }
        };
        if exists {
            tracing::info!(table = %self.table_name, "table already exists");
            return Ok(());
        }

        self.client
            .create_table()
            .table_name(&self.table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(PK_ATTR)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(SK_ATTR)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(PK_ATTR)
                    .key_type(KeyType::Hash)
                    .build()
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(SK_ATTR)
                    .key_type(KeyType::Range)
                    .build()
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            )
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(table = %self.table_name, "created table");
        Ok(())
    }

    fn key_attributes(key: &RecordKey) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (PK_ATTR.to_string(), AttributeValue::S(key.pk.clone())),
            (SK_ATTR.to_string(), AttributeValue::S(key.sk.clone())),
        ])
    }

    fn encode_record(record: &Record) -> Result<HashMap<String, AttributeValue>, StoreError> {
        let body = serde_json::to_value(&record.entity)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let Value::Object(fields) = body else {
            return Err(StoreError::Serialization(
                "entity did not serialize to an object".to_string(),
            ));
        };

        let mut item = Self::key_attributes(&record.key);
        item.insert(
            VERSION_ATTR.to_string(),
            AttributeValue::N(record.version.to_string()),
        );
        for (name, value) in fields {
            if value.is_null() {
                continue;
            }
            item.insert(name, json_to_attribute(value)?);
        }
        Ok(item)
    }

    fn decode_record(item: HashMap<String, AttributeValue>) -> Result<Record, StoreError> {
        let pk = string_attr(&item, PK_ATTR)?;
        let sk = string_attr(&item, SK_ATTR)?;
        let version = item
            .get(VERSION_ATTR)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| StoreError::Serialization(format!("missing version on {pk}/{sk}")))?;

        let mut fields = serde_json::Map::new();
        for (name, value) in item {
            if name == PK_ATTR || name == SK_ATTR || name == VERSION_ATTR {
                continue;
            }
            fields.insert(name, attribute_to_json(value)?);
        }
        let entity: Entity = serde_json::from_value(Value::Object(fields))
            .map_err(|e| StoreError::Serialization(format!("{pk}/{sk}: {e}")))?;

        Ok(Record {
            key: RecordKey::new(pk, sk),
            version,
            entity,
        })
    }

    fn map_write_error(e: impl std::fmt::Display) -> StoreError {
        let text = e.to_string();
        if text.contains("ConditionalCheckFailedException") {
            StoreError::ConditionFailed
        } else {
            StoreError::Unavailable(text)
        }
    }
}

/// Renders a condition expression and its value bindings, or `None` for
/// an unconditional write.
fn condition_expression(
    condition: PutCondition,
) -> Option<(&'static str, Option<(String, AttributeValue)>)> {
    match condition {
        PutCondition::None => None,
        PutCondition::NotExists => Some(("attribute_not_exists(pk)", None)),
        PutCondition::Exists => Some(("attribute_exists(pk)", None)),
        PutCondition::VersionIs(v) => Some((
            "version = :expected_version",
            Some((":expected_version".to_string(), AttributeValue::N(v.to_string()))),
        )),
    }
}

#[async_trait]
impl Store for DynamoStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PK_ATTR, AttributeValue::S(key.pk.clone()))
            .key(SK_ATTR, AttributeValue::S(key.sk.clone()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(Self::decode_record(item)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: Record, condition: PutCondition) -> Result<(), StoreError> {
        let item = Self::encode_record(&record)?;
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item));

        if let Some((expression, binding)) = condition_expression(condition) {
            request = request.condition_expression(expression);
            if let Some((name, value)) = binding {
                request = request.expression_attribute_values(name, value);
            }
        }

        request.send().await.map_err(Self::map_write_error)?;
        Ok(())
    }

    async fn delete(&self, key: &RecordKey, condition: PutCondition) -> Result<(), StoreError> {
        let mut request = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_attributes(key)));

        if let Some((expression, binding)) = condition_expression(condition) {
            request = request.condition_expression(expression);
            if let Some((name, value)) = binding {
                request = request.expression_attribute_values(name, value);
            }
        }

        request.send().await.map_err(Self::map_write_error)?;
        Ok(())
    }

    async fn query_partition(&self, pk: &str) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        let mut start_key = None;
        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("pk = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            for item in result.items.unwrap_or_default() {
                records.push(Self::decode_record(item)?);
            }
            start_key = result.last_evaluated_key;
            if start_key.is_none() {
                break;
            }
        }
        Ok(records)
    }

    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        let mut start_key = None;
        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("pk = :pk AND begins_with(sk, :prefix)")
                .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
                .expression_attribute_values(":prefix", AttributeValue::S(sk_prefix.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            for item in result.items.unwrap_or_default() {
                records.push(Self::decode_record(item)?);
            }
            start_key = result.last_evaluated_key;
            if start_key.is_none() {
                break;
            }
        }
        Ok(records)
    }

    async fn scan_pk_prefix(&self, pk_prefix: &str) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        let mut start_key = None;
        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("begins_with(pk, :prefix)")
                .expression_attribute_values(":prefix", AttributeValue::S(pk_prefix.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            for item in result.items.unwrap_or_default() {
                records.push(Self::decode_record(item)?);
            }
            start_key = result.last_evaluated_key;
            if start_key.is_none() {
                break;
            }
        }
        Ok(records)
    }
}

fn string_attr(
    item: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Serialization(format!("missing attribute {name}")))
}

/// Converts a JSON value into a DynamoDB attribute.
fn json_to_attribute(value: Value) -> Result<AttributeValue, StoreError> {
    Ok(match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s),
        Value::Array(values) => {
            let mut list = Vec::with_capacity(values.len());
            for v in values {
                list.push(json_to_attribute(v)?);
            }
            AttributeValue::L(list)
        }
        Value::Object(fields) => {
            let mut map = HashMap::with_capacity(fields.len());
            for (name, v) in fields {
                map.insert(name, json_to_attribute(v)?);
            }
            AttributeValue::M(map)
        }
    })
}

/// Converts a DynamoDB attribute back into a JSON value. Numbers parse as
/// integers first so counters and timestamps round-trip exactly.
fn attribute_to_json(value: AttributeValue) -> Result<Value, StoreError> {
    Ok(match value {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(b),
        AttributeValue::N(n) => {
            if let Ok(i) = n.parse::<i64>() {
                Value::from(i)
            } else {
                let f = n
                    .parse::<f64>()
                    .map_err(|e| StoreError::Serialization(format!("bad number {n}: {e}")))?;
                Value::from(f)
            }
        }
        AttributeValue::S(s) => Value::String(s),
        AttributeValue::L(values) => {
            let mut list = Vec::with_capacity(values.len());
            for v in values {
                list.push(attribute_to_json(v)?);
            }
            Value::Array(list)
        }
        AttributeValue::M(fields) => {
            let mut map = serde_json::Map::new();
            for (name, v) in fields {
                map.insert(name, attribute_to_json(v)?);
            }
            Value::Object(map)
        }
        AttributeValue::Ss(values) => {
            Value::Array(values.into_iter().map(Value::String).collect())
        }
        other => {
            return Err(StoreError::Serialization(format!(
                "unsupported attribute type: {other:?}"
            )));
        }
    })
}
