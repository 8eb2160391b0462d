use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Placed,
    Ready,
    Complete,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Ready => "ready",
            OrderStatus::Complete => "complete",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "placed" => Some(OrderStatus::Placed),
            "ready" => Some(OrderStatus::Ready),
            "complete" => Some(OrderStatus::Complete),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Who placed the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitiatorType {
    Patient,
    Pharmacy,
}

impl InitiatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiatorType::Patient => "patient",
            InitiatorType::Pharmacy => "pharmacy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "patient" => Some(InitiatorType::Patient),
            "pharmacy" => Some(InitiatorType::Pharmacy),
            _ => None,
        }
    }
}

/// Pharmacy review decision for patient-initiated orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptanceStatus {
    Pending,
    Accepted,
    Rejected,
}

impl AcceptanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptanceStatus::Pending => "pending",
            AcceptanceStatus::Accepted => "accepted",
            AcceptanceStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AcceptanceStatus::Pending),
            "accepted" => Some(AcceptanceStatus::Accepted),
            "rejected" => Some(AcceptanceStatus::Rejected),
            _ => None,
        }
    }
}

/// Stock-side progress of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulfillmentStatus {
    Pending,
    InProgress,
    Completed,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "pending",
            FulfillmentStatus::InProgress => "in_progress",
            FulfillmentStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FulfillmentStatus::Pending),
            "in_progress" => Some(FulfillmentStatus::InProgress),
            "completed" => Some(FulfillmentStatus::Completed),
            _ => None,
        }
    }
}

/// A pharmacy order. `patient_id` is NULL for walk-in sales recorded by
/// pharmacy staff.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub pharmacy_id: Uuid,
    pub total_price: Decimal,
    pub status: String,
    pub initiator_type: String,
    pub acceptance_status: String,
    pub acceptance_deadline: Option<DateTime<Utc>>,
    pub fulfillment_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn status(&self) -> Option<OrderStatus> {
        OrderStatus::from_str(&self.status)
    }

    pub fn acceptance_status(&self) -> Option<AcceptanceStatus> {
        AcceptanceStatus::from_str(&self.acceptance_status)
    }

    pub fn fulfillment_status(&self) -> Option<FulfillmentStatus> {
        FulfillmentStatus::from_str(&self.fulfillment_status)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_fulfillment::Entity")]
    OrderFulfillments,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_fulfillment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderFulfillments.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);

            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }

        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}
