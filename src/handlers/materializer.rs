use std::sync::Arc;

use anyhow::Result;

use crate::models::{CategoryOutcome, MaterializeSummary, MenuAnalysisResult, NewDish};
use crate::services::catalog::CatalogStore;

pub const SPICY_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeEffect {
    Vegetarian,
    Vegan,
    GlutenFree,
    Spicy,
}

/// Exact-token capability table. Extending the catalog (say, graded spice
/// levels) means adding rows here, not scattering string checks.
pub const ATTRIBUTE_EFFECTS: &[(&str, AttributeEffect)] = &[
    ("vegetarian", AttributeEffect::Vegetarian),
    ("vegan", AttributeEffect::Vegan),
    ("gluten-free", AttributeEffect::GlutenFree),
    ("spicy", AttributeEffect::Spicy),
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DishFlags {
    pub is_vegetarian: bool,
    pub is_vegan: bool,
    pub is_gluten_free: bool,
    pub spicy_level: i32,
}

pub fn map_attributes(attributes: &[String]) -> DishFlags {
    let mut flags = DishFlags::default();
    for token in attributes {
        let effect = ATTRIBUTE_EFFECTS
            .iter()
            .find(|(candidate, _)| *candidate == token.as_str())
            .map(|(_, effect)| *effect);
        match effect {
            Some(AttributeEffect::Vegetarian) => flags.is_vegetarian = true,
            Some(AttributeEffect::Vegan) => flags.is_vegan = true,
            Some(AttributeEffect::GlutenFree) => flags.is_gluten_free = true,
            Some(AttributeEffect::Spicy) => flags.spicy_level = SPICY_LEVEL,
            None => {}
        }
    }
    flags
}

/// Outcome of parsing a detected price string. Callers can tell a genuine
/// zero price from an unparsable one.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPrice {
    Value(f64),
    Unparsed(String),
}

/// Strips everything but digits and `.` before parsing.
pub fn parse_price(raw: &str) -> ParsedPrice {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => ParsedPrice::Value(value),
        _ => ParsedPrice::Unparsed(raw.to_string()),
    }
}

/// Turns one menu analysis into persistent catalog rows.
pub struct DishMaterializer {
    catalog: Arc<dyn CatalogStore>,
}

impl DishMaterializer {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Categories are found-or-created (idempotent per name and restaurant);
    /// dishes are always appended. The first write failure aborts the
    /// remaining loop and surfaces to the caller.
    pub async fn materialize(
        &self,
        restaurant_id: i64,
        analysis: &MenuAnalysisResult,
    ) -> Result<MaterializeSummary> {
        let mut categories_created = 0u32;
        let mut dish_items_created = 0u32;
        let mut outcomes = Vec::with_capacity(analysis.categories.len());

        for category in &analysis.categories {
            let record = match self
                .catalog
                .find_category(&category.name, restaurant_id)
                .await?
            {
                Some(existing) => existing,
                None => {
                    log::info!(
                        "📁 Creating category '{}' for restaurant {}",
                        category.name,
                        restaurant_id
                    );
                    categories_created += 1;
                    self.catalog
                        .create_category(&category.name, restaurant_id)
                        .await?
                }
            };

            let mut dish_names = Vec::with_capacity(category.items.len());
            for item in &category.items {
                let price = match parse_price(&item.price) {
                    ParsedPrice::Value(value) => value,
                    ParsedPrice::Unparsed(raw) => {
                        log::warn!(
                            "⚠️ Could not parse price '{}' for '{}', storing 0",
                            raw,
                            item.name
                        );
                        0.0
                    }
                };
                let flags = map_attributes(&item.attributes);

                let dish = NewDish {
                    restaurant_id,
                    category_id: record.id,
                    name: item.name.clone(),
                    description: item.description.clone(),
                    price,
                    display_price: item.price.clone(),
                    allergens: item.allergens.clone(),
                    is_vegetarian: flags.is_vegetarian,
                    is_vegan: flags.is_vegan,
                    is_gluten_free: flags.is_gluten_free,
                    spicy_level: flags.spicy_level,
                    flavor_profile: item.flavor_profile.clone(),
                    texture: item.texture.clone(),
                };
                self.catalog.create_dish(&dish).await?;
                dish_items_created += 1;
                dish_names.push(item.name.clone());
            }

            outcomes.push(CategoryOutcome {
                category: category.name.clone(),
                dish_items: dish_names,
            });
        }

        log::info!(
            "✅ Materialized {} dishes across {} categories ({} new)",
            dish_items_created,
            analysis.categories.len(),
            categories_created
        );

        Ok(MaterializeSummary {
            categories_created,
            dish_items_created,
            categories: outcomes,
        })
    }
}
