pub struct Env {
    pub jwt_secret: String,
    pub database_url: String,
    pub redis_url: String,
    pub frontend_url: String,
    pub ip: String,
    pub port: u16,
    pub upload_dir: String,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub pending_delivery_batch: i64,
    pub message_page_size: i64,
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: &str) -> T {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>()))
}

impl Env {
    fn new() -> Self {
        let jwt_secret = std::env::var("SECRET_KEY")
            .expect("SECRET_KEY must be set in .env file or environment variable");

        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set in .env file or environment variable");
        let redis_url = std::env::var("REDIS_URL")
            .expect("REDIS_URL must be set in .env file or environment variable");

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
        let ip = std::env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parsed_or::<u16>("PORT", "8080");

        let upload_dir = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string());
        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| format!("http://{ip}:{port}"));
        let max_upload_bytes = parsed_or::<usize>("MAX_UPLOAD_BYTES", "20971520");

        // Caps the work a single reconnect can trigger.
        let pending_delivery_batch = parsed_or::<i64>("PENDING_DELIVERY_BATCH", "200");
        let message_page_size = parsed_or::<i64>("MESSAGE_PAGE_SIZE", "50");

        Env {
            jwt_secret,
            database_url,
            redis_url,
            frontend_url,
            ip,
            port,
            upload_dir,
            public_base_url,
            max_upload_bytes,
            pending_delivery_batch,
            message_page_size,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
