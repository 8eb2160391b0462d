use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of stock movement recorded against a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    Addition,
    Consumption,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Addition => "addition",
            MovementType::Consumption => "consumption",
            MovementType::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "addition" => Some(MovementType::Addition),
            "consumption" => Some(MovementType::Consumption),
            "adjustment" => Some(MovementType::Adjustment),
            _ => None,
        }
    }
}

/// Append-only ledger row. `quantity_delta` is signed: positive for
/// additions, negative for consumption, either sign for adjustments.
/// The deltas for a batch must always sum to its `remaining_qty`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub batch_id: Uuid,
    pub movement_type: String,
    pub quantity_delta: i32,
    pub order_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn movement_type(&self) -> Option<MovementType> {
        MovementType::from_str(&self.movement_type)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::batch::Entity",
        from = "Column::BatchId",
        to = "super::batch::Column::Id"
    )]
    Batch,
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
