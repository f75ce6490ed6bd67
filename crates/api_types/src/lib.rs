use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod user {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SignUp {
        pub name: String,
        pub password: String,
    }

    /// Public view of a user. The password hash never leaves the server.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UserView {
        pub id: u64,
        pub name: String,
        pub solid_balance: i64,
        pub stock_balance: i64,
        pub is_blocked: bool,
        pub last_farming: DateTime<Utc>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct UserResponse {
        pub user: UserView,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct FarmResponse {
        pub user: UserView,
        /// Solids granted by this farm.
        pub amount: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BuyStocks {
        pub num: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ChangeName {
        pub name: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ChangePassword {
        pub password: String,
    }
}

pub mod admin {
    use super::*;
    use crate::user::UserView;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TargetUser {
        pub id: u64,
    }

    fn unlimited() -> i64 {
        -1
    }

    /// Filter users with a query expression.
    ///
    /// `query` is the JSON form of a query: an array alternating
    /// `{"predicate": {...}}` and `{"combinator": "and" | "or"}` entries.
    /// A negative or missing `limit` returns every match.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct UserSearch {
        pub query: serde_json::Value,
        #[serde(default = "unlimited")]
        pub limit: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct UserList {
        pub users: Vec<UserView>,
    }
}

pub mod error {
    use super::*;
    use crate::user::UserView;

    /// Body of every failed request.
    ///
    /// `user` carries the record as it was when the operation gave up, when
    /// the failure is tied to one (too early farming, insufficient funds...).
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ErrorResponse {
        pub error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub user: Option<UserView>,
    }
}
