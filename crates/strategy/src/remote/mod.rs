use std::env;

pub mod groq_client;

pub use groq_client::GroqScorer;

pub fn get_groq_base_url() -> String {
    env::var("GROQ_BASE_URL").unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string())
}
