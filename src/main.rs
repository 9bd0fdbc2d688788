mod handlers;
mod middleware;
mod models;
mod services;
mod utils;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};

use services::achievement_engine;
use services::region_index::RegionIndex;
use utils::{config::Config, db::establish_connection};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file FIRST before anything else
    dotenv::dotenv().ok();

    // Initialize logger with default level if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=================================================");
    println!("🌍 trekkr Backend Server");
    println!("=================================================");

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");
    let host = config.host.clone();
    let port = config.port;

    println!("📝 Configuration loaded:");
    println!(
        "   - Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );
    println!("   - Host: {}", host);
    println!("   - Port: {}", port);
    println!(
        "   - Registration: {}",
        if config.allow_registration {
            "ENABLED"
        } else {
            "DISABLED"
        }
    );
    println!("   - Max batch size: {}", config.max_batch_size);
    println!(
        "   - Log level: {}",
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    );

    // Establish database connection
    print!("🔌 Connecting to database... ");
    let db = establish_connection(&config.database_url)
        .await
        .expect("Failed to connect to database");
    println!("✅ Connected!");

    log::info!("Database connection established");

    // Seed the achievement catalog (insert-or-ignore, safe on every boot)
    achievement_engine::seed_achievements(&db)
        .await
        .expect("Failed to seed achievements");
    log::info!("Achievement catalog seeded");

    // Load region boundaries into the in-memory spatial index
    print!("🗺️  Loading region boundaries... ");
    let regions = Arc::new(
        RegionIndex::load(&db)
            .await
            .expect("Failed to load region boundaries"),
    );
    println!(
        "✅ {} countries, {} regions",
        regions.country_count(),
        regions.state_count()
    );

    // Start HTTP server
    println!("🌐 Starting HTTP server at http://{}:{}", host, port);
    println!("📍 Available endpoints:");
    println!("   - POST http://{}:{}/auth/register", host, port);
    println!("   - POST http://{}:{}/auth/login", host, port);
    println!(
        "   - POST http://{}:{}/location/ingest (JWT required)",
        host, port
    );
    println!(
        "   - POST http://{}:{}/location/ingest/batch (JWT required)",
        host, port
    );
    println!(
        "   - POST http://{}:{}/location/ingest/simple (JWT required)",
        host, port
    );
    println!(
        "   - GET  http://{}:{}/stats/overview (JWT required)",
        host, port
    );
    println!(
        "   - GET  http://{}:{}/stats/countries (JWT required)",
        host, port
    );
    println!(
        "   - GET  http://{}:{}/stats/regions (JWT required)",
        host, port
    );
    println!(
        "   - GET  http://{}:{}/stats/achievements (JWT required)",
        host, port
    );
    println!(
        "   - GET  http://{}:{}/map/summary (JWT required)",
        host, port
    );
    println!(
        "   - GET  http://{}:{}/map/cells (JWT required)",
        host, port
    );
    println!(
        "   - GET  http://{}:{}/map/polygons (JWT required)",
        host, port
    );
    println!("=================================================");

    log::info!("Server started at http://{}:{}", host, port);

    HttpServer::new(move || {
        // Strict CORS for authenticated API endpoints
        let cors = Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://localhost:3000")
            .allowed_origin(&config.frontend_url)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(db.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(regions.clone()))
            .wrap(Logger::default())
            .wrap(cors) // CORS must be wrapped AFTER Logger to ensure headers are added to all responses
            // Public endpoints (no authentication required)
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(handlers::auth::register))
                    .route("/login", web::post().to(handlers::auth::login)),
            )
            // Protected endpoints (JWT required)
            .service(
                web::scope("/location")
                    .wrap(crate::middleware::auth::JwtMiddleware)
                    .route("/ingest", web::post().to(handlers::location::ingest))
                    .route(
                        "/ingest/batch",
                        web::post().to(handlers::location::ingest_batch),
                    )
                    .route(
                        "/ingest/simple",
                        web::post().to(handlers::location::ingest_simple),
                    ),
            )
            .service(
                web::scope("/stats")
                    .wrap(crate::middleware::auth::JwtMiddleware)
                    .route("/overview", web::get().to(handlers::stats::overview))
                    .route("/countries", web::get().to(handlers::stats::countries))
                    .route("/regions", web::get().to(handlers::stats::regions))
                    .route(
                        "/achievements",
                        web::get().to(handlers::stats::achievements),
                    ),
            )
            .service(
                web::scope("/map")
                    .wrap(crate::middleware::auth::JwtMiddleware)
                    .route("/summary", web::get().to(handlers::map::summary))
                    .route("/cells", web::get().to(handlers::map::cells))
                    .route("/polygons", web::get().to(handlers::map::polygons)),
            )
    })
    .bind((host, port))?
    .run()
    .await
}
