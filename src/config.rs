// src/config.rs
// Central configuration, loaded once at startup from the environment

use serde::Serialize;
use std::env;

/// Runtime configuration for both the server and the worker process.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Shadow vector store (embedded, local)
    pub db_path: String,
    pub table_name: String,

    // Authoritative vector store (hosted)
    pub authoritative_vector_url: String,
    pub authoritative_vector_api_key: Option<String>,

    // Cache store (queue state + rate counters)
    pub cache_store_url: String,

    // Sender backend (media fetch)
    pub sender_backend_url: String,
    pub sender_backend_media_exception_token: Option<String>,
    pub sender_backend_media_exception_query: Option<String>,

    // Embedding sidecar
    pub embedding_url: String,
    pub embedding_model: String,

    // Provider credentials; a missing key disables that adapter
    pub groq_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub assemblyai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        // Missing .env is fine in production
        dotenv::dotenv().ok();

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parsed_or("PORT", 3014),

            db_path: env_or("DB_PATH", "./data/shadow"),
            table_name: env_or("TABLE_NAME", "messages"),

            authoritative_vector_url: env_or("AUTHORITATIVE_VECTOR_URL", "http://localhost:6334"),
            authoritative_vector_api_key: env_opt("AUTHORITATIVE_VECTOR_API_KEY"),

            cache_store_url: env_or("CACHE_STORE_URL", "redis://127.0.0.1:6379"),

            sender_backend_url: env_or("SENDER_BACKEND_URL", "http://localhost:8080"),
            sender_backend_media_exception_token: env_opt("SENDER_BACKEND_MEDIA_EXCEPTION_TOKEN"),
            sender_backend_media_exception_query: env_opt("SENDER_BACKEND_MEDIA_EXCEPTION_QUERY"),

            embedding_url: env_or("EMBEDDING_URL", "http://localhost:8081"),
            embedding_model: env_or("EMBEDDING_MODEL", "intfloat/multilingual-e5-small"),

            groq_api_key: env_opt("GROQ_API_KEY"),
            deepgram_api_key: env_opt("DEEPGRAM_API_KEY"),
            assemblyai_api_key: env_opt("ASSEMBLYAI_API_KEY"),
            gemini_api_key: env_opt("GEMINI_API_KEY"),

            log_level: env_or("LOG_LEVEL", "info"),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Names of providers with a configured credential, for the health report.
    pub fn configured_providers(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.groq_api_key.is_some() {
            names.push("groq");
        }
        if self.deepgram_api_key.is_some() {
            names.push("deepgram");
        }
        if self.assemblyai_api_key.is_some() {
            names.push("assemblyai");
        }
        if self.gemini_api_key.is_some() {
            names.push("gemini");
        }
        names
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
