use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use karigar_core::domain::account::{Account, AccountRole, ChatId, NewAccount};
use karigar_core::domain::seller::{
    ListedProduct, ProductCategory, ProductRecord, Seller, SellerUpdate, StoreProfile,
};
use karigar_core::ports::{RecordStore, StoreError};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

const ACCOUNT_COLUMNS: &str =
    "email, name, phone, city, role, chat_id, balance, created_at, updated_at";

const PRODUCT_COLUMNS: &str = "p.seller_email, p.name, p.image_url, p.description, p.category, \
     p.location, p.sells_online, p.created_at, p.updated_at";

/// Accounts, sellers and their products in SQLite. Seller sub-records are
/// stored as JSON documents; products get a row each so browsing can filter
/// by category.
pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn account_by_chat(&self, chat_id: ChatId) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE chat_id = ?"))
            .bind(chat_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(account_from_row).transpose()
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(account_from_row).transpose()
    }

    async fn insert_account(&self, account: NewAccount) -> Result<Account, RepositoryError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO accounts (email, name, phone, city, role, chat_id, balance, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, NULL, 0, ?, ?)",
        )
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.phone.as_deref())
        .bind(account.city.as_deref())
        .bind(account.role.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Account {
            email: account.email,
            name: account.name,
            phone: account.phone,
            city: account.city,
            role: account.role,
            chat_id: None,
            balance: 0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn bind_chat(&self, email: &str, chat_id: ChatId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let holder: Option<String> =
            sqlx::query_scalar("SELECT email FROM accounts WHERE chat_id = ?")
                .bind(chat_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        if matches!(holder.as_deref(), Some(existing) if existing != email) {
            return Err(RepositoryError::Conflict(format!("chat {chat_id} already linked")));
        }

        let current: Option<Option<i64>> =
            sqlx::query_scalar("SELECT chat_id FROM accounts WHERE email = ?")
                .bind(email)
                .fetch_optional(&mut *tx)
                .await?;
        match current {
            None => return Err(RepositoryError::NotFound(format!("account {email}"))),
            Some(Some(linked)) if linked != chat_id.0 => {
                return Err(RepositoryError::Conflict(format!("account {email} already linked")));
            }
            Some(_) => {}
        }

        sqlx::query("UPDATE accounts SET chat_id = ?, updated_at = ? WHERE email = ?")
            .bind(chat_id.0)
            .bind(Utc::now().to_rfc3339())
            .bind(email)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_to_balance(&self, email: &str, amount: i64) -> Result<i64, RepositoryError> {
        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance + ?, updated_at = ?
             WHERE email = ?
             RETURNING balance",
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        balance.ok_or_else(|| RepositoryError::NotFound(format!("account {email}")))
    }

    async fn seller_by_email(&self, email: &str) -> Result<Option<Seller>, RepositoryError> {
        let Some(row) = sqlx::query(
            "SELECT email, verification_json, store_json, story_json, created_at, updated_at
             FROM sellers
             WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let products = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM seller_products p WHERE p.seller_email = ? ORDER BY p.id"
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(product_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Seller {
            email: row.try_get("email")?,
            products,
            verification: decode_optional(row.try_get("verification_json")?)?,
            store: decode_optional(row.try_get("store_json")?)?,
            story: decode_optional(row.try_get("story_json")?)?,
            created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
            updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        }))
    }

    async fn insert_seller(&self, seller: Seller) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO sellers (email, verification_json, store_json, story_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&seller.email)
        .bind(encode_optional(seller.verification.as_ref())?)
        .bind(encode_optional(seller.store.as_ref())?)
        .bind(encode_optional(seller.story.as_ref())?)
        .bind(seller.created_at.to_rfc3339())
        .bind(seller.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for product in &seller.products {
            insert_product(&mut tx, &seller.email, product).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn push_product(&self, email: &str, product: ProductRecord) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query("UPDATE sellers SET updated_at = ? WHERE email = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(email)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if touched == 0 {
            return Err(RepositoryError::NotFound(format!("seller {email}")));
        }
        insert_product(&mut tx, email, &product).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn overwrite_field(&self, email: &str, update: SellerUpdate) -> Result<(), RepositoryError> {
        let (column, document) = match &update {
            SellerUpdate::Verification(details) => ("verification_json", encode(details)?),
            SellerUpdate::Store(profile) => ("store_json", encode(profile)?),
            SellerUpdate::Story(story) => ("story_json", encode(story)?),
        };
        let touched =
            sqlx::query(&format!("UPDATE sellers SET {column} = ?, updated_at = ? WHERE email = ?"))
                .bind(document)
                .bind(Utc::now().to_rfc3339())
                .bind(email)
                .execute(&self.pool)
                .await?
                .rows_affected();
        if touched == 0 {
            return Err(RepositoryError::NotFound(format!("seller {email}")));
        }
        Ok(())
    }

    async fn listed_in(
        &self,
        category: ProductCategory,
    ) -> Result<Vec<ListedProduct>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS}, s.store_json
             FROM seller_products p
             JOIN sellers s ON s.email = p.seller_email
             WHERE p.category = ?
             ORDER BY p.seller_email ASC, p.id ASC"
        ))
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let seller_email: String = row.try_get("seller_email")?;
                let store: Option<StoreProfile> = decode_optional(row.try_get("store_json")?)?;
                let seller_name =
                    store.map(|store| store.name).unwrap_or_else(|| seller_email.clone());
                Ok(ListedProduct { seller_email, seller_name, product: product_from_row(row)? })
            })
            .collect()
    }
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn find_account_by_chat(&self, chat_id: ChatId) -> Result<Option<Account>, StoreError> {
        Ok(self.account_by_chat(chat_id).await?)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.account_by_email(email).await?)
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        Ok(self.insert_account(account).await?)
    }

    async fn link_account(&self, email: &str, chat_id: ChatId) -> Result<(), StoreError> {
        Ok(self.bind_chat(email, chat_id).await?)
    }

    async fn increment_balance(&self, email: &str, amount: i64) -> Result<i64, StoreError> {
        Ok(self.add_to_balance(email, amount).await?)
    }

    async fn find_seller_by_email(&self, email: &str) -> Result<Option<Seller>, StoreError> {
        Ok(self.seller_by_email(email).await?)
    }

    async fn create_seller(&self, seller: Seller) -> Result<(), StoreError> {
        Ok(self.insert_seller(seller).await?)
    }

    async fn append_product(&self, email: &str, product: ProductRecord) -> Result<(), StoreError> {
        Ok(self.push_product(email, product).await?)
    }

    async fn update_seller(&self, email: &str, update: SellerUpdate) -> Result<(), StoreError> {
        Ok(self.overwrite_field(email, update).await?)
    }

    async fn products_by_category(
        &self,
        category: ProductCategory,
    ) -> Result<Vec<ListedProduct>, StoreError> {
        Ok(self.listed_in(category).await?)
    }
}

async fn insert_product(
    tx: &mut Transaction<'_, Sqlite>,
    email: &str,
    product: &ProductRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO seller_products (
            seller_email,
            name,
            image_url,
            description,
            category,
            location,
            sells_online,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(email)
    .bind(&product.name)
    .bind(&product.image_url)
    .bind(&product.description)
    .bind(product.category.as_str())
    .bind(&product.location)
    .bind(product.sells_online)
    .bind(product.created_at.to_rfc3339())
    .bind(product.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn account_from_row(row: SqliteRow) -> Result<Account, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = AccountRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown account role `{role_raw}`")))?;

    Ok(Account {
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        city: row.try_get("city")?,
        role,
        chat_id: row.try_get::<Option<i64>, _>("chat_id")?.map(ChatId),
        balance: row.try_get("balance")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn product_from_row(row: SqliteRow) -> Result<ProductRecord, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = ProductCategory::parse(&category_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown product category `{category_raw}`"))
    })?;

    Ok(ProductRecord {
        name: row.try_get("name")?,
        image_url: row.try_get("image_url")?,
        description: row.try_get("description")?,
        category,
        location: row.try_get("location")?,
        sells_online: row.try_get("sells_online")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn encode<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    Ok(serde_json::to_string(value)?)
}

fn encode_optional<T: Serialize>(value: Option<&T>) -> Result<Option<String>, RepositoryError> {
    value.map(encode).transpose()
}

fn decode_optional<T: DeserializeOwned>(value: Option<String>) -> Result<Option<T>, RepositoryError> {
    value.map(|raw| serde_json::from_str(&raw)).transpose().map_err(RepositoryError::from)
}
