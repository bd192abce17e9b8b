// Wire framing
pub const MAX_CONTROL_FRAME_SIZE: usize = 2048;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

// Liveness
pub const DEFAULT_CLIENT_PING_INTERVAL_MS: u64 = 10_000;
pub const READ_DEADLINE_PING_MULTIPLIER: u32 = 3;
pub const WRITE_DEADLINE_SECONDS: u64 = 10;
pub const HANDLER_TIMEOUT_SECONDS: u64 = 60;

// Reapers
pub const SESSION_REAPER_PERIOD_SECONDS: u64 = 30;
pub const POLLING_SESSION_IDLE_SECONDS: u64 = 120;
pub const UPLOAD_REAPER_PERIOD_SECONDS: u64 = 60;
pub const DEFAULT_ORPHAN_UPLOAD_TTL_SECONDS: u64 = 600;
pub const UPLOAD_CANCEL_DEADLINE_SECONDS: u64 = 30;

// Listings
pub const DEFAULT_ITEMS_PER_PAGE: usize = 50;

// Uploads
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024; // 8 MiB
pub const MAX_BLOCK_ID_LENGTH: usize = 128;

// Identity
pub const ANONYMOUS_ID_LENGTH: usize = 16;
pub const SESSION_ID_LENGTH: usize = 16;
pub const ANONYMOUS_SUBJECT_PREFIX: &str = "anon-";

// Configuration
pub const CONFIG_PATH_ENV_VAR: &str = "FILEGATE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "filegate.json";
