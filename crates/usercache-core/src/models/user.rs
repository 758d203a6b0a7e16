use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Geo {
    pub lat: String,
    pub lng: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Address {
    pub street: String,
    pub suite: String,
    pub city: String,
    pub zipcode: String,
    pub geo: Geo,
}

impl Address {
    /// Single-line address for display
    pub fn display(&self) -> String {
        format!("{}, {}, {} {}", self.street, self.suite, self.city, self.zipcode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Company {
    pub name: String,
    #[serde(rename = "catchPhrase")]
    pub catch_phrase: String,
    pub bs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: u64,
    pub name: String,
    pub username: String,
    pub email: String,
    pub address: Address,
    pub phone: String,
    pub website: String,
    pub company: Company,
}

impl User {
    /// Username as shown on cards, e.g. `@johndoe`
    pub fn handle(&self) -> String {
        format!("@{}", self.username)
    }

    /// Initials for the avatar placeholder
    pub fn initials(&self) -> String {
        self.name
            .split_whitespace()
            .filter_map(|part| part.chars().next())
            .take(2)
            .collect::<String>()
            .to_uppercase()
    }

    /// Produce a new record with the patch applied.
    pub fn with_patch(&self, patch: &UserPatch) -> User {
        User {
            id: self.id,
            name: patch.name.clone().unwrap_or_else(|| self.name.clone()),
            username: patch.username.clone().unwrap_or_else(|| self.username.clone()),
            email: patch.email.clone().unwrap_or_else(|| self.email.clone()),
            address: patch.address.clone().unwrap_or_else(|| self.address.clone()),
            phone: patch.phone.clone().unwrap_or_else(|| self.phone.clone()),
            website: patch.website.clone().unwrap_or_else(|| self.website.clone()),
            company: patch.company.clone().unwrap_or_else(|| self.company.clone()),
        }
    }
}

/// Payload for `POST /users`. Same shape as `User` without the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub email: String,
    pub address: Address,
    pub phone: String,
    pub website: String,
    pub company: Company,
}

/// Pre-fill an edit form from an existing record.
impl From<&User> for NewUser {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            address: user.address.clone(),
            phone: user.phone.clone(),
            website: user.website.clone(),
            company: user.company.clone(),
        }
    }
}

/// Partial payload for `PUT /users/{id}`. Absent fields are left out of the body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<Company>,
}

impl From<NewUser> for UserPatch {
    fn from(user: NewUser) -> Self {
        Self {
            name: Some(user.name),
            username: Some(user.username),
            email: Some(user.email),
            address: Some(user.address),
            phone: Some(user.phone),
            website: Some(user.website),
            company: Some(user.company),
        }
    }
}

/// Parse the user id out of a `/users/{slug}` route segment.
///
/// Empty or non-numeric slugs yield `None` and no query is issued for them.
pub fn parse_user_slug(slug: &str) -> Option<u64> {
    let slug = slug.trim();
    if slug.is_empty() {
        return None;
    }
    slug.parse().ok()
}
