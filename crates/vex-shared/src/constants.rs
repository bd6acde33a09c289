use std::time::Duration;

/// Default server port when the target omits one
pub const DEFAULT_PORT: u16 = 8000;

/// Default server host when the target is empty
pub const DEFAULT_HOST: &str = "localhost";

/// Websocket path served by vex servers
pub const SOCKET_PATH: &str = "/socket";

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Username given to a freshly registered account
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Status string servers use for a successful reply
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Whole-handshake watchdog
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat probe interval
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive unanswered probes before the server is declared unresponsive
pub const HEARTBEAT_MISS_THRESHOLD: u32 = 3;

/// Flat delay before a reconnect attempt
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on waiting for a history reply
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Cached messages replayed when joining a channel
pub const HISTORY_REPLAY_LIMIT: u32 = 100;

/// BLAKE3 context for key fingerprints shown to the operator
pub const KDF_CONTEXT_FINGERPRINT: &str = "vex-key-fingerprint-v1";
