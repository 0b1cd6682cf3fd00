//! Remote endpoints and tuning defaults.

use std::time::Duration;

/// Default Yuque host.
pub const DEFAULT_HOST: &str = "https://www.yuque.com";

/// Login endpoint used by the mobile application.
pub const LOGIN_PATH: &str = "/api/mobile_app/accounts/login?language=zh-cn";

/// Grouped personal knowledge base stacks.
pub const PERSONAL_WORKSPACES_PATH: &str = "/api/mine/book_stacks";

/// Knowledge bases owned by teams the user belongs to.
pub const TEAM_WORKSPACES_PATH: &str = "/api/mine/user_books?user_type=Group";

/// Knowledge bases shared with the user as a collaborator.
pub const COLLAB_WORKSPACES_PATH: &str = "/api/mine/raw_collab_books";

/// Current user profile.
pub const CURRENT_USER_PATH: &str = "/api/user";

/// Query flags appended to every Markdown export request, minus `linebreak`.
pub const MARKDOWN_EXPORT_FLAGS: &str = "attachment=true&latexcode=false&anchor=false";

/// Default TTL for cached workspace and document lists (24 hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default TTL for a stored session token (24 hours).
pub const DEFAULT_CREDENTIALS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default pause between two document fetches in the same workspace.
pub const DEFAULT_DOC_DELAY: Duration = Duration::from_millis(500);

/// Connection timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Whole-request timeout in seconds, applied to every call.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default image download workers.
pub const DEFAULT_IMAGE_WORKERS: usize = 5;

/// Minimum image download workers.
pub const MIN_IMAGE_WORKERS: usize = 1;

/// Maximum image download workers.
pub const MAX_IMAGE_WORKERS: usize = 30;

/// Default file name prefix for sequentially named images.
pub const DEFAULT_IMAGE_PREFIX: &str = "image-";

/// CDN host serving Yuque images.
pub const DEFAULT_CDN_DOMAIN: &str = "cdn.nlark.com";

/// HTML pages shorter than this are logged as suspicious.
pub const SHORT_PAGE_THRESHOLD: usize = 1000;

/// Markdown bodies of this many characters or fewer count as empty.
pub const MIN_MARKDOWN_CHARS: usize = 10;

/// Write granularity for streamed downloads.
pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;

/// Longest response body kept inside a `RequestFailed` error.
pub const MAX_ERROR_BODY_CHARS: usize = 2048;

/// Credentials file name under the meta directory.
pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// Cache key for the current user profile.
pub const USER_CACHE_KEY: &str = "user";

/// Cache key for the merged workspace list.
pub const WORKSPACES_CACHE_KEY: &str = "workspaces";

/// Output directory used when neither the CLI nor the config file names one.
pub const DEFAULT_OUTPUT_DIR: &str = "./docs";
