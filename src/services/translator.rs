use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::models::{MenuByCategory, StoredCategory, TextValue, TranslatedMenu};
use crate::services::openrouter::{CallOptions, ChatMessage, ModelError, ModelGateway};

/// Native-script labels the app's language picker offers, mapped to the
/// canonical name the model is prompted with.
const LANGUAGE_LABELS: &[(&str, &str)] = &[
    ("English", "English"),
    ("繁體中文", "Traditional Chinese"),
    ("简体中文", "Simplified Chinese"),
    ("日本語", "Japanese"),
    ("한국어", "Korean"),
    ("Español", "Spanish"),
    ("Français", "French"),
    ("Deutsch", "German"),
    ("Italiano", "Italian"),
    ("Português", "Portuguese"),
    ("ไทย", "Thai"),
    ("Tiếng Việt", "Vietnamese"),
    ("Türkçe", "Turkish"),
];

const FIELD_CONCURRENCY: usize = 4;
const FIELD_TOKEN_BUDGET: u32 = 256;
const FIELD_TEMPERATURE: f32 = 0.2;

/// Unrecognized labels fall back to English instead of failing.
pub fn canonical_language(label: &str) -> &'static str {
    LANGUAGE_LABELS
        .iter()
        .find(|(candidate, _)| *candidate == label.trim())
        .map(|(_, canonical)| *canonical)
        .unwrap_or("English")
}

#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub menu: TranslatedMenu,
    /// Ids of categories that kept their source text after a field failure.
    pub fallback_categories: Vec<String>,
}

/// Which leaf of a category a translated string belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
enum FieldSlot {
    CategoryName,
    CategoryDescription,
    DishName(usize),
    DishDescription(usize),
    FlavorProfile(usize),
    TextureOne(usize),
    TextureMany(usize, usize),
}

pub struct MenuTranslator {
    model: Arc<dyn ModelGateway>,
}

impl MenuTranslator {
    pub fn new(model: Arc<dyn ModelGateway>) -> Self {
        Self { model }
    }

    /// Translates every text field of the stored menu. Infallible by design:
    /// a category whose translation fails anywhere is returned verbatim while
    /// every other category proceeds normally.
    pub async fn translate(&self, menu: &MenuByCategory, target_label: &str) -> TranslationOutcome {
        let language = canonical_language(target_label);
        log::info!(
            "🌐 Translating {} categories into {} (label: '{}')",
            menu.len(),
            language,
            target_label
        );

        let mut translated_menu = TranslatedMenu::new();
        let mut fallback_categories = Vec::new();

        for (category_id, category) in menu {
            match self.translate_category(category, language).await {
                Ok(translated) => {
                    translated_menu.insert(category_id.clone(), translated);
                }
                Err(err) => {
                    log::warn!(
                        "⚠️ Category {} kept its source text after a translation failure: {}",
                        category_id,
                        err
                    );
                    fallback_categories.push(category_id.clone());
                    translated_menu.insert(category_id.clone(), category.clone());
                }
            }
        }

        TranslationOutcome {
            menu: translated_menu,
            fallback_categories,
        }
    }

    /// Bounded fan-out over the category's fields, joined before any field is
    /// applied. Any single failure discards the whole category's translations.
    async fn translate_category(
        &self,
        category: &StoredCategory,
        language: &str,
    ) -> Result<StoredCategory, ModelError> {
        let mut jobs: Vec<(FieldSlot, String)> = vec![(
            FieldSlot::CategoryName,
            category.category_info.name.clone(),
        )];
        if let Some(description) = &category.category_info.description {
            jobs.push((FieldSlot::CategoryDescription, description.clone()));
        }
        for (index, dish) in category.dish_items.iter().enumerate() {
            jobs.push((FieldSlot::DishName(index), dish.name.clone()));
            if !dish.description.is_empty() {
                jobs.push((FieldSlot::DishDescription(index), dish.description.clone()));
            }
            if let Some(flavor) = &dish.flavor_profile {
                jobs.push((FieldSlot::FlavorProfile(index), flavor.clone()));
            }
            match &dish.texture {
                Some(TextValue::One(value)) => {
                    jobs.push((FieldSlot::TextureOne(index), value.clone()));
                }
                Some(TextValue::Many(values)) => {
                    for (element, value) in values.iter().enumerate() {
                        jobs.push((FieldSlot::TextureMany(index, element), value.clone()));
                    }
                }
                None => {}
            }
        }

        let results: Vec<(FieldSlot, Result<String, ModelError>)> =
            stream::iter(jobs.into_iter().map(|(slot, text)| async move {
                let translated = self.translate_field(&text, language).await;
                (slot, translated)
            }))
            .buffer_unordered(FIELD_CONCURRENCY)
            .collect()
            .await;

        let mut translated = category.clone();
        for (slot, result) in results {
            apply_field(&mut translated, slot, result?);
        }
        Ok(translated)
    }

    /// One unretried call per field.
    async fn translate_field(&self, text: &str, language: &str) -> Result<String, ModelError> {
        let messages = vec![
            ChatMessage::system(format!(
                "You are a professional restaurant menu translator. Translate \
                 the user's text into {language}. Reply with the translation \
                 only, without quotes or commentary. Keep proper nouns \
                 recognizable."
            )),
            ChatMessage::user(text),
        ];
        let options = CallOptions::text(FIELD_TOKEN_BUDGET).with_temperature(FIELD_TEMPERATURE);
        let reply = self.model.complete(&messages, options).await?;
        Ok(reply.into_text().trim().to_string())
    }
}

fn apply_field(category: &mut StoredCategory, slot: FieldSlot, text: String) {
    match slot {
        FieldSlot::CategoryName => category.category_info.name = text,
        FieldSlot::CategoryDescription => category.category_info.description = Some(text),
        FieldSlot::DishName(index) => category.dish_items[index].name = text,
        FieldSlot::DishDescription(index) => category.dish_items[index].description = text,
        FieldSlot::FlavorProfile(index) => {
            category.dish_items[index].flavor_profile = Some(text);
        }
        FieldSlot::TextureOne(index) => {
            category.dish_items[index].texture = Some(TextValue::One(text));
        }
        FieldSlot::TextureMany(index, element) => {
            if let Some(TextValue::Many(values)) = &mut category.dish_items[index].texture {
                values[element] = text;
            }
        }
    }
}
