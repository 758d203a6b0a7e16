use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Post {
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub id: u64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Comment {
    #[serde(rename = "postId")]
    pub post_id: u64,
    pub id: u64,
    pub name: String,
    pub email: String,
    pub body: String,
}
