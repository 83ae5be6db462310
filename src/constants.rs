// Defaults shared by the CLI, the web server and the Groq client.

/// Environment variable holding the Groq API key.
pub const GROQ_API_KEY_ENV: &str = "GROQ_API_KEY";
pub const GROQ_BASE_URL_ENV: &str = "GROQ_BASE_URL";
pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com";
/// Path of the OpenAI-compatible chat endpoint, relative to the base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/openai/v1/chat/completions";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const TEMPERATURE: f32 = 0.1;
pub const MAX_TOKENS: u32 = 1000;

pub const TEXT_PREVIEW_CHARS: usize = 1000;
pub const CSV_PREVIEW_ROWS: usize = 10;

pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_SESSION_TTL_MINS: u64 = 120;
