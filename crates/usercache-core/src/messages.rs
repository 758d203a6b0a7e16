//! User-facing copy shared by every front end.

pub const USER_CREATED: &str = "User created successfully";
pub const USER_UPDATED: &str = "User updated successfully";
pub const USER_DELETED: &str = "User deleted successfully";

pub const OFFLINE_INDICATOR: &str = "You are offline. Using cached data.";
pub const NO_CACHED_DATA: &str = "Nothing cached for this view yet. Connect to load it.";

pub const USERS_LOAD_FAILED: &str = "Failed to load users";
pub const NO_USERS: &str = "No users found";
pub const USER_NOT_FOUND: &str = "User not found";
pub const NO_POSTS: &str = "This user has no posts";
pub const POSTS_LOAD_FAILED: &str = "Failed to load posts";
pub const NO_COMMENTS: &str = "No comments yet";
pub const COMMENTS_LOAD_FAILED: &str = "Failed to load comments";
pub const RETRY: &str = "Retry";
