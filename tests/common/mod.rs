//! Common test utilities for E2E tests

use kindling::data::{Account, AccountMetadata, Hash, Item, KeyData};
use kindling::{AppState, config};
use chrono::Utc;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// Session secret shared by every test configuration
pub const SESSION_SECRET: &str = "test-session-secret-32-bytes-ok!";

impl TestServer {
    /// Create a new test server instance with no federation backend
    pub async fn new() -> Self {
        Self::with_federation(config::FederationConfig::default()).await
    }

    /// Create a test server pointed at a specific federation backend
    pub async fn with_federation(federation: config::FederationConfig) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "test.example.com".to_string(),
                protocol: "http".to_string(),
                environment: "dev".to_string(),
            },
            database: config::DatabaseConfig {
                path: db_path.clone(),
            },
            session: config::SessionConfig {
                enabled: true,
                secret: SESSION_SECRET.to_string(),
                max_age: 604800,
            },
            federation,
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config.clone()).await.unwrap();

        // Create HTTP client; redirects stay visible to assertions
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = kindling::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a test account with the given public key material
    pub async fn seed_account(&self, handle: &str, public_key_pem: &str) -> Account {
        let hash = Hash::from_content(handle.as_bytes());
        let account = Account {
            hash: hash.clone(),
            handle: handle.to_string(),
            email: format!("{}@test.example.com", handle),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            metadata: Some(AccountMetadata {
                key: Some(KeyData {
                    id: format!("{}/actors/{}#main-key", self.addr, hash),
                    pem: public_key_pem.to_string(),
                }),
                ..AccountMetadata::default()
            }),
            ..Account::default()
        };
        self.state.db.save_account(&account).await.unwrap();
        account
    }

    /// Create a test content item
    pub async fn seed_item(&self, title: &str, score: i64, submitted_by: &Hash) -> Item {
        let item = Item {
            key: Hash::from_content(title.as_bytes()),
            title: title.to_string(),
            mime_type: "text/plain".to_string(),
            data: title.as_bytes().to_vec(),
            score,
            submitted_at: Some(Utc::now()),
            submitted_by: submitted_by.clone(),
            ..Item::default()
        };
        self.state.db.save_item(&item).await.unwrap();
        item
    }
}

/// Generate an RSA keypair for signing test requests
///
/// Returns (private key PKCS#8 PEM, public key SPKI PEM).
pub fn generate_keypair() -> (String, String) {
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("private key pem")
        .to_string();
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .expect("public key pem");

    (private_key_pem, public_key_pem)
}
