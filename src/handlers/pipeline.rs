use std::sync::Arc;

use crate::handlers::materializer::DishMaterializer;
use crate::handlers::user_message;
use crate::models::{
    MaterializeSummary, MenuAnalysisResult, MenuByCategory, ServiceResponse, TranslatedMenu,
};
use crate::services::catalog::CatalogStore;
use crate::services::openrouter::ModelGateway;
use crate::services::translator::MenuTranslator;
use crate::services::vision::{ImageSource, MenuVisionAnalyzer};

/// Facade over the menu ingestion pipeline: analysis, translation and
/// materialization, each wrapped into the app-wide response envelope.
pub struct MenuPipeline {
    analyzer: MenuVisionAnalyzer,
    translator: MenuTranslator,
    materializer: DishMaterializer,
    expose_errors: bool,
}

impl MenuPipeline {
    pub fn new(
        model: Arc<dyn ModelGateway>,
        catalog: Arc<dyn CatalogStore>,
        expose_errors: bool,
    ) -> Self {
        Self {
            analyzer: MenuVisionAnalyzer::new(model.clone()),
            translator: MenuTranslator::new(model),
            materializer: DishMaterializer::new(catalog),
            expose_errors,
        }
    }

    pub async fn analyze_menu_image(
        &self,
        image: &ImageSource,
        language: &str,
    ) -> ServiceResponse<MenuAnalysisResult> {
        log::info!("📸 Analyzing menu image (output language: {})", language);
        match self.analyzer.analyze(image, language).await {
            Ok(analysis) => ServiceResponse::ok(analysis),
            Err(err) => {
                log::error!("❌ Menu analysis failed: {}", err);
                ServiceResponse::failure(user_message(
                    "The menu image could not be analyzed.",
                    &err,
                    self.expose_errors,
                ))
            }
        }
    }

    /// Never fails as a whole: categories that could not be translated come
    /// back verbatim, and their ids are logged here.
    pub async fn translate_menu(
        &self,
        menu: &MenuByCategory,
        language_label: &str,
    ) -> ServiceResponse<TranslatedMenu> {
        let outcome = self.translator.translate(menu, language_label).await;
        if !outcome.fallback_categories.is_empty() {
            log::warn!(
                "⚠️ {} of {} categories kept their source text: {:?}",
                outcome.fallback_categories.len(),
                menu.len(),
                outcome.fallback_categories
            );
        }
        ServiceResponse::ok(outcome.menu)
    }

    pub async fn materialize_dishes_from_analysis(
        &self,
        restaurant_id: i64,
        analysis: &MenuAnalysisResult,
    ) -> ServiceResponse<MaterializeSummary> {
        log::info!(
            "🍽️ Materializing menu analysis into catalog for restaurant {}",
            restaurant_id
        );
        match self.materializer.materialize(restaurant_id, analysis).await {
            Ok(summary) => ServiceResponse::ok(summary),
            Err(err) => {
                log::error!("❌ Dish materialization failed: {}", err);
                ServiceResponse::failure(user_message(
                    "The menu could not be saved to the catalog.",
                    &err,
                    self.expose_errors,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::catalog::testing::MemoryCatalog;
    use crate::services::openrouter::testing::{Scripted, ScriptedGateway};

    #[tokio::test]
    async fn analysis_failure_yields_a_failure_envelope() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Content("not json")]));
        let pipeline = MenuPipeline::new(gateway, Arc::new(MemoryCatalog::new()), false);

        let response = pipeline
            .analyze_menu_image(
                &ImageSource::Url("https://cdn.example/menu.jpg".into()),
                "English",
            )
            .await;

        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(
            response.error.as_deref(),
            Some("The menu image could not be analyzed.")
        );
    }

    #[tokio::test]
    async fn failure_envelopes_carry_detail_outside_production() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Content("not json")]));
        let pipeline = MenuPipeline::new(gateway, Arc::new(MemoryCatalog::new()), true);

        let response = pipeline
            .analyze_menu_image(
                &ImageSource::Url("https://cdn.example/menu.jpg".into()),
                "English",
            )
            .await;

        assert!(response.error.unwrap().len() > "The menu image could not be analyzed.".len());
    }
}
