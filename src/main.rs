use anyhow::Result;
use dotenv::dotenv;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use restaurant_menu_ai::handlers::{ChatAssistant, MenuPipeline};
use restaurant_menu_ai::models::ServiceResponse;
use restaurant_menu_ai::services::catalog::CatalogStore;
use restaurant_menu_ai::services::openrouter::ModelGateway;
use restaurant_menu_ai::services::vision::ImageSource;
use restaurant_menu_ai::services::{OpenRouterClient, PostgresCatalog};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    log::info!("🚀 Starting restaurant menu assistant...");

    let api_key = env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY must be set in .env file");

    let model = env::var("OPENROUTER_MODEL")
        .unwrap_or_else(|_| "google/gemini-2.0-flash-001".to_string());

    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    // Error detail reaches users only outside production
    let expose_errors = env::var("APP_ENV")
        .map(|value| value != "production")
        .unwrap_or(true);

    let catalog = Arc::new(PostgresCatalog::new(&database_url).await?) as Arc<dyn CatalogStore>;
    log::info!("✅ PostgreSQL catalog initialized");

    let gateway =
        Arc::new(OpenRouterClient::new(api_key, model.clone())?) as Arc<dyn ModelGateway>;
    log::info!("✅ OpenRouter gateway initialized with model: {}", model);

    let pipeline = MenuPipeline::new(gateway.clone(), catalog.clone(), expose_errors);
    let assistant = ChatAssistant::new(gateway, catalog, expose_errors);
    log::info!("✅ Menu pipeline and chat assistant initialized");

    println!("\n🍜 Menu assistant ready!");
    println!("   Ask a dining question, or:");
    println!("   analyze <image path or URL>       - read a menu photo");
    println!("   import <restaurant id> <image>    - read a menu photo and store its dishes");
    println!("\n🛑 Ctrl+D to quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(reference) = input.strip_prefix("analyze ") {
            let image = image_source(reference.trim());
            print_response(&pipeline.analyze_menu_image(&image, "English").await);
        } else if let Some(rest) = input.strip_prefix("import ") {
            let mut parts = rest.trim().splitn(2, ' ');
            let restaurant_id = parts.next().and_then(|id| id.parse::<i64>().ok());
            match (restaurant_id, parts.next()) {
                (Some(restaurant_id), Some(reference)) => {
                    let image = image_source(reference.trim());
                    let analyzed = pipeline.analyze_menu_image(&image, "English").await;
                    match analyzed.data {
                        Some(analysis) => print_response(
                            &pipeline
                                .materialize_dishes_from_analysis(restaurant_id, &analysis)
                                .await,
                        ),
                        None => println!("❌ {}", analyzed.error.unwrap_or_default()),
                    }
                }
                _ => println!("Usage: import <restaurant id> <image path or URL>"),
            }
        } else {
            let response = assistant.chat(input, "English").await;
            if let Some(text) = response.data.or(response.error) {
                println!("\n{}\n", text);
            }
        }
    }

    log::info!("🛑 Shutting down...");

    Ok(())
}

fn image_source(reference: &str) -> ImageSource {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        ImageSource::Url(reference.to_string())
    } else {
        ImageSource::LocalFile(reference.to_string())
    }
}

fn print_response<T: serde::Serialize>(response: &ServiceResponse<T>) {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("\n{}\n", json),
        Err(err) => println!("❌ {}", err),
    }
}
