//! The seam between the cache and the network.

use futures::future::BoxFuture;

use crate::api::{ApiClient, ApiError};
use crate::mutation::{MutationOutput, UserMutation};

use super::{QueryData, QueryKey};

/// Maps query descriptors and mutations to remote calls.
///
/// `ApiClient` is the production implementation; tests substitute
/// scripted backends.
pub trait ResourceBackend: Send + Sync + 'static {
    fn fetch_query(&self, key: &QueryKey) -> BoxFuture<'static, Result<QueryData, ApiError>>;

    fn execute_mutation(
        &self,
        mutation: &UserMutation,
    ) -> BoxFuture<'static, Result<MutationOutput, ApiError>>;
}

impl ResourceBackend for ApiClient {
    fn fetch_query(&self, key: &QueryKey) -> BoxFuture<'static, Result<QueryData, ApiError>> {
        // Clone is cheap - shares the connection pool
        let api = self.clone();
        let key = key.clone();
        Box::pin(async move {
            match key {
                QueryKey::Users => api.fetch_users().await.map(QueryData::Users),
                QueryKey::User(id) => api.fetch_user(id).await.map(QueryData::User),
                QueryKey::UserPosts(user_id) => {
                    api.fetch_posts_by_user(user_id).await.map(QueryData::Posts)
                }
                QueryKey::Comments(post_id) => {
                    api.fetch_comments_by_post(post_id).await.map(QueryData::Comments)
                }
            }
        })
    }

    fn execute_mutation(
        &self,
        mutation: &UserMutation,
    ) -> BoxFuture<'static, Result<MutationOutput, ApiError>> {
        let api = self.clone();
        let mutation = mutation.clone();
        Box::pin(async move {
            match mutation {
                UserMutation::Create { user } => {
                    api.create_user(&user).await.map(MutationOutput::Created)
                }
                UserMutation::Update { id, patch } => {
                    api.update_user(id, &patch).await.map(MutationOutput::Updated)
                }
                UserMutation::Delete { id } => {
                    api.delete_user(id).await.map(|_| MutationOutput::Deleted(id))
                }
            }
        })
    }
}
