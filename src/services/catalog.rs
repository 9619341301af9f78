use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::models::{CategoryRecord, DishRecord, NewDish, RestaurantRef};

/// Narrow catalog interface the pipeline writes to and the assistant reads
/// from. The surrounding application owns every other catalog operation.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_category(&self, name: &str, restaurant_id: i64)
        -> Result<Option<CategoryRecord>>;
    async fn create_category(&self, name: &str, restaurant_id: i64) -> Result<CategoryRecord>;
    async fn create_dish(&self, dish: &NewDish) -> Result<DishRecord>;
    async fn list_restaurants(&self) -> Result<Vec<RestaurantRef>>;
}

pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let catalog = PostgresCatalog { pool };
        catalog.init_tables().await?;
        Ok(catalog)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS restaurants (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS menu_categories (
                id BIGSERIAL PRIMARY KEY,
                restaurant_id BIGINT NOT NULL REFERENCES restaurants(id),
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (restaurant_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dishes (
                id BIGSERIAL PRIMARY KEY,
                restaurant_id BIGINT NOT NULL REFERENCES restaurants(id),
                category_id BIGINT NOT NULL REFERENCES menu_categories(id),
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                price DOUBLE PRECISION NOT NULL DEFAULT 0,
                display_price TEXT NOT NULL DEFAULT '',
                allergens TEXT[] NOT NULL DEFAULT '{}',
                is_vegetarian BOOLEAN NOT NULL DEFAULT FALSE,
                is_vegan BOOLEAN NOT NULL DEFAULT FALSE,
                is_gluten_free BOOLEAN NOT NULL DEFAULT FALSE,
                spicy_level INTEGER NOT NULL DEFAULT 0,
                flavor_profile TEXT,
                texture TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogStore for PostgresCatalog {
    async fn find_category(
        &self,
        name: &str,
        restaurant_id: i64,
    ) -> Result<Option<CategoryRecord>> {
        let row = sqlx::query(
            "SELECT id, restaurant_id, name, created_at FROM menu_categories \
             WHERE name = $1 AND restaurant_id = $2",
        )
        .bind(name)
        .bind(restaurant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CategoryRecord {
            id: row.get("id"),
            restaurant_id: row.get("restaurant_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        }))
    }

    async fn create_category(&self, name: &str, restaurant_id: i64) -> Result<CategoryRecord> {
        let row = sqlx::query(
            "INSERT INTO menu_categories (restaurant_id, name) VALUES ($1, $2) \
             RETURNING id, restaurant_id, name, created_at",
        )
        .bind(restaurant_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(CategoryRecord {
            id: row.get("id"),
            restaurant_id: row.get("restaurant_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        })
    }

    async fn create_dish(&self, dish: &NewDish) -> Result<DishRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO dishes (
                restaurant_id, category_id, name, description, price, display_price,
                allergens, is_vegetarian, is_vegan, is_gluten_free, spicy_level,
                flavor_profile, texture
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, created_at
            "#,
        )
        .bind(dish.restaurant_id)
        .bind(dish.category_id)
        .bind(&dish.name)
        .bind(&dish.description)
        .bind(dish.price)
        .bind(&dish.display_price)
        .bind(&dish.allergens)
        .bind(dish.is_vegetarian)
        .bind(dish.is_vegan)
        .bind(dish.is_gluten_free)
        .bind(dish.spicy_level)
        .bind(&dish.flavor_profile)
        .bind(&dish.texture)
        .fetch_one(&self.pool)
        .await?;

        Ok(DishRecord {
            id: row.get("id"),
            restaurant_id: dish.restaurant_id,
            category_id: dish.category_id,
            name: dish.name.clone(),
            description: dish.description.clone(),
            price: dish.price,
            display_price: dish.display_price.clone(),
            allergens: dish.allergens.clone(),
            is_vegetarian: dish.is_vegetarian,
            is_vegan: dish.is_vegan,
            is_gluten_free: dish.is_gluten_free,
            spicy_level: dish.spicy_level,
            flavor_profile: dish.flavor_profile.clone(),
            texture: dish.texture.clone(),
            created_at: row.get("created_at"),
        })
    }

    async fn list_restaurants(&self) -> Result<Vec<RestaurantRef>> {
        let rows = sqlx::query("SELECT id, name FROM restaurants ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| RestaurantRef {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }
}
