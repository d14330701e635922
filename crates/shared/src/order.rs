use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Record;

pub const DEFAULT_ORDER_ID_FIELD: &str = "OrderID";
pub const DEFAULT_SHIPPED_DATE_FIELD: &str = "ShippedDate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Approved,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Decline,
}

impl From<Decision> for OrderStatus {
    fn from(value: Decision) -> Self {
        match value {
            Decision::Approve => OrderStatus::Approved,
            Decision::Decline => OrderStatus::Declined,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("order record has no value in field {0}")]
    MissingOrderId(String),
    #[error("order {order_id} is {status:?} and can no longer be decided")]
    NotPending {
        order_id: String,
        status: OrderStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFields {
    pub id: String,
    pub shipped_date: String,
}

impl Default for OrderFields {
    fn default() -> Self {
        Self {
            id: DEFAULT_ORDER_ID_FIELD.into(),
            shipped_date: DEFAULT_SHIPPED_DATE_FIELD.into(),
        }
    }
}

/// Approve/decline decisions made during one session. Nothing is written back
/// to the data source; dropping the log forgets every decision.
#[derive(Debug, Clone, Default)]
pub struct DecisionLog {
    fields: OrderFields,
    decisions: HashMap<String, Decision>,
}

impl DecisionLog {
    pub fn new(fields: OrderFields) -> Self {
        Self {
            fields,
            decisions: HashMap::new(),
        }
    }

    pub fn order_id(&self, order: &Record) -> Option<String> {
        let id = order.get(&self.fields.id);
        (!id.is_null()).then(|| id.to_string())
    }

    pub fn decision_for(&self, order_id: &str) -> Option<Decision> {
        self.decisions.get(order_id).copied()
    }

    /// Status shown for an order. A recorded decision always wins over the
    /// shipped-date derivation, so reloading a list keeps declined orders
    /// declined.
    pub fn status_of(&self, order: &Record) -> OrderStatus {
        if let Some(decision) = self
            .order_id(order)
            .and_then(|order_id| self.decision_for(&order_id))
        {
            return decision.into();
        }
        shipping_status(order, &self.fields)
    }

    pub fn approve(&mut self, order: &Record) -> Result<String, DecisionError> {
        self.decide(order, Decision::Approve)
    }

    pub fn decline(&mut self, order: &Record) -> Result<String, DecisionError> {
        self.decide(order, Decision::Decline)
    }

    pub fn decide(&mut self, order: &Record, decision: Decision) -> Result<String, DecisionError> {
        let order_id = self
            .order_id(order)
            .ok_or_else(|| DecisionError::MissingOrderId(self.fields.id.clone()))?;
        let status = self.status_of(order);
        if status != OrderStatus::Pending {
            return Err(DecisionError::NotPending { order_id, status });
        }
        self.decisions.insert(order_id.clone(), decision);
        Ok(order_id)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

pub fn shipping_status(order: &Record, fields: &OrderFields) -> OrderStatus {
    if order.get(&fields.shipped_date).is_null() {
        OrderStatus::Pending
    } else {
        OrderStatus::Shipped
    }
}
