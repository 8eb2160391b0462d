use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One physical delivery of a medicine. `quantity` is the size the batch
/// was received at; `remaining_qty` is what is still on the shelf and only
/// ever changes together with a ledger movement.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub inventory_id: Uuid,
    pub pharmacy_id: Uuid,
    pub batch_code: String,
    pub manufacturing_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
    pub remaining_qty: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// A batch is expired once its expiry date is strictly before today.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    /// Usable batches still hold stock and have not expired.
    pub fn is_usable(&self, today: NaiveDate) -> bool {
        self.remaining_qty > 0 && !self.is_expired(today)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_item::Entity",
        from = "Column::InventoryId",
        to = "super::inventory_item::Column::Id"
    )]
    InventoryItem,
    #[sea_orm(has_many = "super::batch_movement::Entity")]
    BatchMovements,
}

impl Related<super::inventory_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryItem.def()
    }
}

impl Related<super::batch_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BatchMovements.def()
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
