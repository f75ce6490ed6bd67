pub use error::{EngineError, StoreError};
pub use hash::PasswordHasher;
pub use query::{
    Field, FieldClass, Operand, Operator, Predicate, Query, QueryError, Separator, Term,
    TypeMismatch, Value,
};
pub use schedule::Schedule;
pub use service::{Economy, Farmed, UserService};
pub use store::{
    Backend, BalanceChange, DataBase, FileStore, Guard, SqlStore, StoreResult, connect,
};
pub use user::{NEVER_FARMED, User, validate_name, validate_password};

mod error;
mod hash;
mod query;
mod schedule;
mod service;
mod store;
mod user;

pub type ResultEngine<T> = Result<T, EngineError>;
